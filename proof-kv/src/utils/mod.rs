//! 工具模块

pub mod serialization;
pub mod hash;

pub use serialization::{encode, decode, to_json, CodecError};
pub use hash::{sha256_hash, key_path, path_bit, shares_prefix, bytes_to_hex, hex_to_bytes};

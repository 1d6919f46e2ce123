//! 哈希工具
//!
//! 整个存储统一使用 SHA-256，摘要类型为 `B256`

use alloy_primitives::B256;
use sha2::{Digest, Sha256};

/// 路径位数（SHA-256 输出 256 位）
pub const PATH_BITS: usize = 256;

/// SHA256 哈希
pub fn sha256_hash(data: &[u8]) -> B256 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    B256::from(<[u8; 32]>::from(hasher.finalize()))
}

/// 键在 trie 中的路径：SHA256(key)
pub fn key_path(key: &[u8]) -> B256 {
    sha256_hash(key)
}

/// 取路径第 `depth` 位（高位在前），true 表示向右
pub fn path_bit(path: &B256, depth: usize) -> bool {
    let byte = path[depth / 8];
    (byte >> (7 - depth % 8)) & 1 == 1
}

/// 两条路径的公共前缀是否至少有 `depth` 位
pub fn shares_prefix(a: &B256, b: &B256, depth: usize) -> bool {
    (0..depth).all(|d| path_bit(a, d) == path_bit(b, d))
}

/// 将十六进制字符串转换为字节数组
pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>, String> {
    let hex_clean = hex_str.trim_start_matches("0x").trim_start_matches("0X");
    hex::decode(hex_clean)
        .map_err(|e| format!("Invalid hex string: {}", e))
}

/// 将字节数组转换为十六进制字符串
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

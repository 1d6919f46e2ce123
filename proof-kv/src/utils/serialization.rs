//! 序列化工具
//!
//! 证明和区块的二进制编码使用 bincode，命令行输出使用 JSON

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// 编解码错误
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    Encode(String),

    #[error("Deserialization error: {0}")]
    Decode(String),
}

/// 序列化为字节数组（使用 bincode）
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))
}

/// 从字节数组反序列化（使用 bincode）
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

/// 序列化为格式化的 JSON 字符串
pub fn to_json<T: Serialize>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string_pretty(value).map_err(|e| CodecError::Encode(e.to_string()))
}

//! 存储 Trait 定义
//!
//! 定义持久化字典的核心接口：写入 (key, value, signature, index) 元组、
//! 经由认证字典读取、导出证明和根哈希

use alloy_primitives::B256;
use thiserror::Error;

use crate::collection::{Collection, CollectionError, Proof};

/// 记录的字段布局：[value, signature, index(LE u64)]
pub const FIELD_VALUE: usize = 0;
pub const FIELD_SIGNATURE: usize = 1;
pub const FIELD_INDEX: usize = 2;
pub const RECORD_FIELDS: usize = 3;

/// 存储错误类型
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Layout version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u64, found: u64 },

    #[error("Collection error: {0}")]
    Collection(#[from] CollectionError),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Corrupt store: {0}")]
    CorruptStore(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Commit rejected: {0}")]
    Rejected(String),
}

/// 读出的完整记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub value: Vec<u8>,
    pub signature: Vec<u8>,
    /// 写入该值的日志位置
    pub index: u64,
}

/// 提交前回调：参数为写入后的新根
pub type CommitHook<'a> = dyn FnMut(B256) -> Result<(), StoreError> + 'a;

/// 认证键值存储接口
///
/// 单写多读：写入与内存字典更新处于同一临界区，读者只会看到完整提交前或提交后的状态
pub trait KvStore: Send + Sync {
    /// 写入一条记录，并在提交前调用 `before_commit`
    ///
    /// 回调失败时持久化写入和内存变更都会回滚
    fn store_with(
        &self,
        key: &[u8],
        value: &[u8],
        signature: &[u8],
        index: u64,
        before_commit: &mut CommitHook<'_>,
    ) -> Result<B256, StoreError>;

    /// 写入一条记录，返回新根
    fn store(
        &self,
        key: &[u8],
        value: &[u8],
        signature: &[u8],
        index: u64,
    ) -> Result<B256, StoreError> {
        self.store_with(key, value, signature, index, &mut |_| Ok(()))
    }

    /// 经由认证字典读取
    fn get_value(&self, key: &[u8]) -> Result<StoredValue, StoreError>;

    /// 当前状态下某个键的证明（存在或不存在）
    fn proof(&self, key: &[u8]) -> Result<Proof, StoreError>;

    /// 当前根哈希
    fn root_hash(&self) -> B256;

    /// 记录数
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ==================== 共用辅助函数 ====================

/// 组装字段元组
pub(crate) fn record_fields(value: &[u8], signature: &[u8], index: u64) -> Vec<Vec<u8>> {
    vec![value.to_vec(), signature.to_vec(), index.to_le_bytes().to_vec()]
}

/// 解码小端 u64 索引
pub(crate) fn decode_index(key: &[u8], bytes: &[u8]) -> Result<u64, StoreError> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| {
        StoreError::CorruptStore(format!(
            "index for key {} has {} bytes, expected 8",
            hex::encode(key),
            bytes.len()
        ))
    })?;
    Ok(u64::from_le_bytes(raw))
}

/// 从字段元组还原记录
pub(crate) fn decode_record(key: &[u8], values: &[Vec<u8>]) -> Result<StoredValue, StoreError> {
    if values.len() != RECORD_FIELDS {
        return Err(StoreError::CorruptStore(format!(
            "record for key {} has {} fields",
            hex::encode(key),
            values.len()
        )));
    }
    Ok(StoredValue {
        value: values[FIELD_VALUE].clone(),
        signature: values[FIELD_SIGNATURE].clone(),
        index: decode_index(key, &values[FIELD_INDEX])?,
    })
}

/// 通过字典读取一条记录
pub(crate) fn read_record(collection: &Collection, key: &[u8]) -> Result<StoredValue, StoreError> {
    let record = collection.get(key).record()?;
    if !record.is_match() {
        return Err(StoreError::NotFound(hex::encode(key)));
    }
    decode_record(key, record.values()?)
}

/// 插入或覆盖，返回旧字段（用于回滚）
pub(crate) fn upsert(
    collection: &mut Collection,
    key: &[u8],
    fields: Vec<Vec<u8>>,
) -> Result<Option<Vec<Vec<u8>>>, CollectionError> {
    let previous = collection.get(key).record()?.into_values();
    if previous.is_some() {
        collection.set(key, fields)?;
    } else {
        collection.add(key, fields)?;
    }
    Ok(previous)
}

/// 撤销一次 `upsert`
///
/// 字典是规范形态，撤销后根哈希与写入前完全相同。撤销失败说明内存字典
/// 已与磁盘不一致，以 `CorruptStore` 报告
pub(crate) fn revert(
    collection: &mut Collection,
    key: &[u8],
    previous: Option<Vec<Vec<u8>>>,
) -> Result<(), StoreError> {
    let result = match previous {
        Some(values) => collection.set(key, values),
        None => collection.remove(key),
    };
    result.map_err(|e| {
        StoreError::CorruptStore(format!(
            "failed to revert in-memory write for key {}: {}",
            hex::encode(key),
            e
        ))
    })
}

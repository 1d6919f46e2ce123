//! 内存存储
//!
//! 与 `RedbStore` 语义相同但不落盘，用于测试和一次性演示

use alloy_primitives::B256;
use parking_lot::RwLock;

use crate::collection::{Collection, Proof};
use crate::db::traits::{
    read_record, record_fields, revert, upsert, CommitHook, KvStore, StoreError, StoredValue,
    RECORD_FIELDS,
};

pub struct MemoryStore {
    collection: RwLock<Collection>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { collection: RwLock::new(Collection::manager(RECORD_FIELDS)) }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryStore {
    fn store_with(
        &self,
        key: &[u8],
        value: &[u8],
        signature: &[u8],
        index: u64,
        before_commit: &mut CommitHook<'_>,
    ) -> Result<B256, StoreError> {
        let mut collection = self.collection.write();
        let previous = upsert(&mut collection, key, record_fields(value, signature, index))?;
        let root = collection.root();

        if let Err(e) = before_commit(root) {
            revert(&mut collection, key, previous)?;
            return Err(e);
        }
        Ok(root)
    }

    fn get_value(&self, key: &[u8]) -> Result<StoredValue, StoreError> {
        read_record(&self.collection.read(), key)
    }

    fn proof(&self, key: &[u8]) -> Result<Proof, StoreError> {
        Ok(self.collection.read().get(key).proof()?)
    }

    fn root_hash(&self) -> B256 {
        self.collection.read().root()
    }

    fn len(&self) -> usize {
        self.collection.read().len()
    }
}

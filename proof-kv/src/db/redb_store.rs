//! Redb 持久化字典
//!
//! 每个字典对应一组同前缀的 redb 表：
//! - `{name}/value`：key -> value
//! - `{name}/index`：key -> 8 字节小端 u64 日志位置
//! - `{name}/signature`：key -> 签名
//! - `{name}/meta`：磁盘布局版本
//!
//! 三个字段在同一个写事务中写入；内存中的认证字典在启动时由 `load_all` 重建。

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use alloy_primitives::B256;
use parking_lot::RwLock;
use redb::{Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition, TableHandle};
use tracing::{debug, info, warn};

use crate::collection::{Collection, Proof};
use crate::config::StoreConfig;
use crate::db::traits::{
    decode_index, read_record, record_fields, revert, upsert, CommitHook, KvStore, StoreError,
    StoredValue, RECORD_FIELDS,
};

/// 当前磁盘布局版本
pub const LAYOUT_VERSION: u64 = 1;

const LAYOUT_VERSION_KEY: &str = "layout_version";

type BytesTable<'a> = TableDefinition<'a, &'static [u8], &'static [u8]>;
type MetaTable<'a> = TableDefinition<'a, &'static str, u64>;

fn persistence<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Persistence(e.to_string())
}

/// 一个字典的表名集合
#[derive(Debug, Clone)]
struct TableNames {
    value: String,
    index: String,
    signature: String,
    meta: String,
}

impl TableNames {
    fn new(name: &str) -> Self {
        Self {
            value: format!("{}/value", name),
            index: format!("{}/index", name),
            signature: format!("{}/signature", name),
            meta: format!("{}/meta", name),
        }
    }

    fn value(&self) -> BytesTable<'_> {
        TableDefinition::new(&self.value)
    }

    fn index(&self) -> BytesTable<'_> {
        TableDefinition::new(&self.index)
    }

    fn signature(&self) -> BytesTable<'_> {
        TableDefinition::new(&self.signature)
    }

    fn meta(&self) -> MetaTable<'_> {
        TableDefinition::new(&self.meta)
    }

    fn all(&self) -> [&str; 4] {
        [&self.value, &self.index, &self.signature, &self.meta]
    }
}

// ==================== RedbStore ====================

/// 基于 Redb 的认证键值存储
pub struct RedbStore {
    /// Redb 数据库实例（多个字典可以共享同一个文件）
    db: Arc<Database>,

    /// 字典名
    name: String,

    tables: TableNames,

    /// 认证字典，写锁覆盖整个写事务
    collection: RwLock<Collection>,
}

impl RedbStore {
    /// 创建或打开数据库文件中的字典
    pub fn open(path: impl AsRef<Path>, name: &str) -> Result<Self, StoreError> {
        let path = path.as_ref();
        // 确保父目录存在
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(path)
            .map_err(|e| StoreError::Persistence(format!("Failed to open database: {}", e)))?;
        Self::open_with(Arc::new(db), name)
    }

    /// 在已打开的数据库上打开字典
    pub fn open_with(db: Arc<Database>, name: &str) -> Result<Self, StoreError> {
        let store = Self {
            db,
            name: name.to_string(),
            tables: TableNames::new(name),
            collection: RwLock::new(Collection::manager(RECORD_FIELDS)),
        };
        store.init_layout()?;
        store.load_all()?;
        Ok(store)
    }

    /// 按配置打开
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        Self::open(config.db_path(), &config.collection)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 底层数据库（用于在同一文件中打开其他字典）
    pub fn database(&self) -> Arc<Database> {
        Arc::clone(&self.db)
    }

    /// 建表或检查已有表的完整性与版本
    fn init_layout(&self) -> Result<(), StoreError> {
        let existing = {
            let read_txn = self.db.begin_read().map_err(persistence)?;
            existing_tables(&read_txn)?
        };
        let present = self
            .tables
            .all()
            .iter()
            .filter(|name| existing.contains(**name))
            .count();

        match present {
            0 => self.create_layout(),
            4 => self.check_version(),
            _ => Err(StoreError::CorruptStore(format!(
                "dictionary '{}' has {} of 4 tables",
                self.name, present
            ))),
        }
    }

    fn create_layout(&self) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write().map_err(persistence)?;
        {
            write_txn.open_table(self.tables.value()).map_err(persistence)?;
            write_txn.open_table(self.tables.index()).map_err(persistence)?;
            write_txn.open_table(self.tables.signature()).map_err(persistence)?;
            let mut meta = write_txn.open_table(self.tables.meta()).map_err(persistence)?;
            meta.insert(LAYOUT_VERSION_KEY, LAYOUT_VERSION).map_err(persistence)?;
        }
        write_txn.commit().map_err(persistence)?;

        info!("Created dictionary '{}' (layout v{})", self.name, LAYOUT_VERSION);
        Ok(())
    }

    fn check_version(&self) -> Result<(), StoreError> {
        let read_txn = self.db.begin_read().map_err(persistence)?;
        let meta = read_txn.open_table(self.tables.meta()).map_err(persistence)?;
        let found = meta
            .get(LAYOUT_VERSION_KEY)
            .map_err(persistence)?
            .map(|v| v.value())
            .ok_or_else(|| {
                StoreError::CorruptStore(format!("dictionary '{}' has no layout version", self.name))
            })?;

        if found != LAYOUT_VERSION {
            return Err(StoreError::VersionMismatch { expected: LAYOUT_VERSION, found });
        }
        Ok(())
    }

    /// 从磁盘重建认证字典，返回记录数
    ///
    /// 任一键缺少配套字段都视为损坏，不做修补
    pub fn load_all(&self) -> Result<usize, StoreError> {
        let read_txn = self.db.begin_read().map_err(persistence)?;
        let values = read_txn.open_table(self.tables.value()).map_err(persistence)?;
        let indexes = read_txn.open_table(self.tables.index()).map_err(persistence)?;
        let signatures = read_txn.open_table(self.tables.signature()).map_err(persistence)?;

        let mut collection = Collection::manager(RECORD_FIELDS);

        for entry in values.iter().map_err(persistence)? {
            let (key, value) = entry.map_err(persistence)?;
            let key = key.value();

            let signature = signatures.get(key).map_err(persistence)?.ok_or_else(|| {
                StoreError::CorruptStore(format!("missing signature for key {}", hex::encode(key)))
            })?;
            let index = indexes.get(key).map_err(persistence)?.ok_or_else(|| {
                StoreError::CorruptStore(format!("missing index for key {}", hex::encode(key)))
            })?;
            let index = decode_index(key, index.value())?;

            collection.add(key, record_fields(value.value(), signature.value(), index))?;
        }

        // 反向检查：没有 value 的 index / signature
        for (label, table) in [("index", &indexes), ("signature", &signatures)] {
            for entry in table.iter().map_err(persistence)? {
                let (key, _) = entry.map_err(persistence)?;
                if values.get(key.value()).map_err(persistence)?.is_none() {
                    return Err(StoreError::CorruptStore(format!(
                        "{} present without value for key {}",
                        label,
                        hex::encode(key.value())
                    )));
                }
            }
        }

        let count = collection.len();
        let root = collection.root();
        *self.collection.write() = collection;

        info!("Loaded dictionary '{}': {} records, root {}", self.name, count, root);
        Ok(count)
    }
}

/// 数据库中已存在的表名
fn existing_tables(read_txn: &ReadTransaction) -> Result<HashSet<String>, StoreError> {
    Ok(read_txn
        .list_tables()
        .map_err(persistence)?
        .map(|handle| handle.name().to_string())
        .collect())
}

// ==================== KvStore 实现 ====================

impl KvStore for RedbStore {
    fn store_with(
        &self,
        key: &[u8],
        value: &[u8],
        signature: &[u8],
        index: u64,
        before_commit: &mut CommitHook<'_>,
    ) -> Result<B256, StoreError> {
        let mut collection = self.collection.write();

        let write_txn = self.db.begin_write().map_err(persistence)?;
        {
            let mut values = write_txn.open_table(self.tables.value()).map_err(persistence)?;
            let mut indexes = write_txn.open_table(self.tables.index()).map_err(persistence)?;
            let mut signatures =
                write_txn.open_table(self.tables.signature()).map_err(persistence)?;

            values.insert(key, value).map_err(persistence)?;
            indexes.insert(key, index.to_le_bytes().as_slice()).map_err(persistence)?;
            signatures.insert(key, signature).map_err(persistence)?;
        }

        let previous = match upsert(&mut collection, key, record_fields(value, signature, index)) {
            Ok(previous) => previous,
            Err(e) => {
                if let Err(abort) = write_txn.abort() {
                    warn!("Failed to abort write for key {}: {}", hex::encode(key), abort);
                }
                return Err(e.into());
            }
        };
        let root = collection.root();

        if let Err(e) = before_commit(root) {
            if let Err(abort) = write_txn.abort() {
                warn!("Failed to abort write for key {}: {}", hex::encode(key), abort);
            }
            if let Err(corrupt) = revert(&mut collection, key, previous) {
                warn!("Commit hook rejected key {}: {}", hex::encode(key), e);
                return Err(corrupt);
            }
            return Err(e);
        }

        if let Err(e) = write_txn.commit() {
            if let Err(corrupt) = revert(&mut collection, key, previous) {
                warn!("Commit failed for key {}: {}", hex::encode(key), e);
                return Err(corrupt);
            }
            return Err(persistence(e));
        }

        debug!(
            "Stored key {} at index {} in '{}', root {}",
            hex::encode(key),
            index,
            self.name,
            root
        );
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{empty_hash, CollectionError};
    use tempfile::TempDir;

    fn create_test_store(dir: &TempDir) -> RedbStore {
        RedbStore::open(dir.path().join("store.redb"), "dict").unwrap()
    }

    #[test]
    fn test_new_store_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);

        assert!(store.is_empty());
        assert_eq!(store.root_hash(), empty_hash());
        assert!(matches!(store.get_value(b"Key0"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_store_and_get() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);

        let root = store.store(b"Key0", b"value0", b"sig0", 7).unwrap();
        assert_eq!(root, store.root_hash());

        let stored = store.get_value(b"Key0").unwrap();
        assert_eq!(stored.value, b"value0".to_vec());
        assert_eq!(stored.signature, b"sig0".to_vec());
        assert_eq!(stored.index, 7);

        let proof = store.proof(b"Key0").unwrap();
        assert!(proof.is_membership());
        assert!(proof.verify_against(&root));
    }

    #[test]
    fn test_overwrite_changes_root() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);

        let first = store.store(b"Key0", b"value0", b"sig0", 1).unwrap();
        let second = store.store(b"Key0", b"value1", b"sig1", 2).unwrap();
        assert_ne!(first, second);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_value(b"Key0").unwrap().index, 2);
    }

    #[test]
    fn test_rejected_hook_rolls_back() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);
        let root = store.store(b"Key0", b"value0", b"sig0", 1).unwrap();

        let result = store.store_with(b"Key1", b"value1", b"sig1", 2, &mut |_| {
            Err(StoreError::Rejected("log unavailable".to_string()))
        });
        assert!(matches!(result, Err(StoreError::Rejected(_))));
        assert_eq!(store.root_hash(), root);
        assert!(matches!(store.get_value(b"Key1"), Err(StoreError::NotFound(_))));

        // 磁盘上也没有留下痕迹
        assert_eq!(store.load_all().unwrap(), 1);
        assert_eq!(store.root_hash(), root);
    }

    #[test]
    fn test_hook_sees_new_root() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);

        let mut seen = None;
        let root = store
            .store_with(b"Key0", b"value0", b"sig0", 1, &mut |root| {
                seen = Some(root);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, Some(root));
    }

    #[test]
    fn test_dictionaries_share_a_file() {
        let dir = TempDir::new().unwrap();
        let first = create_test_store(&dir);
        let second = RedbStore::open_with(first.database(), "other").unwrap();

        first.store(b"Key0", b"value0", b"sig0", 1).unwrap();
        assert!(second.is_empty());
        assert!(matches!(
            second.get_value(b"Key0"),
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(second.root_hash(), empty_hash());
    }

    #[test]
    fn test_version_mismatch_on_open() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);
        let db = store.database();

        let names = TableNames::new("dict");
        let write_txn = db.begin_write().unwrap();
        {
            let mut meta = write_txn.open_table(names.meta()).unwrap();
            meta.insert(LAYOUT_VERSION_KEY, 99u64).unwrap();
        }
        write_txn.commit().unwrap();

        assert!(matches!(
            RedbStore::open_with(db, "dict"),
            Err(StoreError::VersionMismatch { expected: 1, found: 99 })
        ));
    }

    #[test]
    fn test_missing_signature_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);
        store.store(b"Key0", b"value0", b"sig0", 1).unwrap();

        let db = store.database();
        let names = TableNames::new("dict");
        let write_txn = db.begin_write().unwrap();
        {
            let mut signatures = write_txn.open_table(names.signature()).unwrap();
            signatures.remove(b"Key0".as_slice()).unwrap();
        }
        write_txn.commit().unwrap();

        assert!(matches!(store.load_all(), Err(StoreError::CorruptStore(_))));
    }

    #[test]
    fn test_orphan_index_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);

        let db = store.database();
        let names = TableNames::new("dict");
        let write_txn = db.begin_write().unwrap();
        {
            let mut indexes = write_txn.open_table(names.index()).unwrap();
            indexes.insert(b"ghost".as_slice(), 5u64.to_le_bytes().as_slice()).unwrap();
        }
        write_txn.commit().unwrap();

        assert!(matches!(store.load_all(), Err(StoreError::CorruptStore(_))));
    }

    #[test]
    fn test_partial_layout_is_corruption() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::create(dir.path().join("partial.redb")).unwrap());

        let names = TableNames::new("dict");
        let write_txn = db.begin_write().unwrap();
        {
            write_txn.open_table(names.value()).unwrap();
        }
        write_txn.commit().unwrap();

        assert!(matches!(
            RedbStore::open_with(db, "dict"),
            Err(StoreError::CorruptStore(_))
        ));
    }

    #[test]
    fn test_proof_of_absence() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);
        store.store(b"Key0", b"value0", b"sig0", 1).unwrap();

        let proof = store.proof(b"missing").unwrap();
        assert!(!proof.is_membership());
        assert!(proof.verify_against(&store.root_hash()));
        assert!(matches!(
            store.get_value(b"missing"),
            Err(StoreError::NotFound(_))
        ));
        // 集合层的 NotFound 与存储层的 NotFound 分开
        assert!(!matches!(
            store.get_value(b"missing"),
            Err(StoreError::Collection(CollectionError::NotFound(_)))
        ));
    }
}

//! 存储层
//!
//! 认证字典的持久化：redb 表与内存 trie 保持一致

pub mod memory;
pub mod redb_store;
pub mod traits;

pub use memory::MemoryStore;
pub use redb_store::{RedbStore, LAYOUT_VERSION};
pub use traits::{KvStore, StoreError, StoredValue};

//! 认证字典（Collection）
//!
//! 基于 SHA256(key) 比特路径的二叉 Merkle trie，把任意字节串键映射到固定长度的字段元组。
//!
//! 两种运行模式共用同一套节点：
//! - 管理者（Manager）：持有全部叶子，可直接增删改并为任意键生成证明
//! - 验证者（Verifier）：只持有根哈希和已验证证明覆盖到的路径，
//!   只能在已知路径上执行变更，永远不能生成证明
//!
//! `Collection` 内部不加锁，并发修改需要调用方自行互斥。

pub mod node;
pub mod proof;
pub mod cursor;

pub use cursor::{Cursor, Record};
pub use node::empty_hash;
pub use proof::{Proof, Step, Terminal};

use alloy_primitives::B256;
use thiserror::Error;
use tracing::debug;

use crate::utils::{key_path, path_bit};
use node::{Leaf, Node};

/// Collection 错误类型
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectionError {
    #[error("Key already exists: {0}")]
    Collision(String),

    #[error("Unknown subtree for key: {0}")]
    UnknownSubtree(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Cannot determine presence of key: {0}")]
    Indeterminate(String),

    #[error("Verifier cannot vouch for subtree contents")]
    NotAuthoritative,

    #[error("Expected {expected} fields, got {got}")]
    FieldCount { expected: usize, got: usize },

    #[error("Field index {index} out of range ({fields} fields)")]
    FieldIndex { index: usize, fields: usize },

    #[error("Invalid proof: {0}")]
    InvalidProof(String),

    #[error("Codec error: {0}")]
    Codec(String),
}

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Manager,
    Verifier,
}

/// 认证字典
#[derive(Debug, Clone)]
pub struct Collection {
    root: Node,
    mode: Mode,
    fields: usize,
}

impl Collection {
    /// 创建空的管理者
    pub fn manager(fields: usize) -> Self {
        Self {
            root: Node::Empty,
            mode: Mode::Manager,
            fields,
        }
    }

    /// 创建只信任根哈希的验证者
    ///
    /// 即使根等于空集合的根，在收到证明前也不做任何判断
    pub fn verifier(root: B256, fields: usize) -> Self {
        Self {
            root: Node::Unknown(root),
            mode: Mode::Verifier,
            fields,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_manager(&self) -> bool {
        self.mode == Mode::Manager
    }

    /// 每条记录的字段数
    pub fn fields(&self) -> usize {
        self.fields
    }

    /// 当前根哈希（缓存值，O(1)）
    pub fn root(&self) -> B256 {
        self.root.hash()
    }

    /// 已知叶子数（对管理者即记录总数）
    pub fn len(&self) -> usize {
        self.root.count_leaves()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按路径顺序列出已知记录
    pub fn records(&self) -> Vec<Record> {
        let mut leaves = Vec::new();
        self.root.collect_leaves(&mut leaves);
        leaves
            .into_iter()
            .filter_map(|leaf| self.get(&leaf.key).record().ok())
            .collect()
    }

    /// 定位某个键
    pub fn get(&self, key: &[u8]) -> Cursor<'_> {
        Cursor::new(self, key)
    }

    // ==================== 变更 ====================

    /// 插入新记录
    pub fn add(&mut self, key: &[u8], values: Vec<Vec<u8>>) -> Result<(), CollectionError> {
        self.check_arity(&values)?;
        let leaf = Leaf::new(key.to_vec(), values);

        // 先只读检查，失败时树保持不变
        self.probe_insert(&leaf)?;
        Self::insert(&mut self.root, leaf, 0);
        Ok(())
    }

    /// 覆盖已有记录的全部字段
    pub fn set(&mut self, key: &[u8], values: Vec<Vec<u8>>) -> Result<(), CollectionError> {
        self.check_arity(&values)?;
        let path = key_path(key);
        Self::update(&mut self.root, &path, key, 0, &mut |leaf| {
            leaf.replace_values(values.clone());
        })
    }

    /// 覆盖已有记录的单个字段
    pub fn set_field(
        &mut self,
        key: &[u8],
        index: usize,
        value: Vec<u8>,
    ) -> Result<(), CollectionError> {
        if index >= self.fields {
            return Err(CollectionError::FieldIndex { index, fields: self.fields });
        }
        let path = key_path(key);
        Self::update(&mut self.root, &path, key, 0, &mut |leaf| {
            let mut values = leaf.values.clone();
            values[index] = value.clone();
            leaf.replace_values(values);
        })
    }

    /// 删除记录
    pub fn remove(&mut self, key: &[u8]) -> Result<(), CollectionError> {
        let path = key_path(key);
        self.probe_remove(&path, key)?;
        Self::take(&mut self.root, &path, 0);
        Ok(())
    }

    // ==================== 证明 ====================

    /// 验证证明
    ///
    /// 证明重算出的根必须等于当前信任的根。验证者在通过后把证明路径并入已知子树，
    /// 这是验证者知识增长的唯一途径；管理者只做校验。
    pub fn verify(&mut self, proof: &Proof) -> bool {
        // 哈希链只能证明叶子内容，字段数必须另外校验
        if let Terminal::Leaf { values, .. } = proof.terminal() {
            if values.len() != self.fields {
                debug!(
                    "Rejected proof: leaf has {} fields, collection has {}",
                    values.len(),
                    self.fields
                );
                return false;
            }
        }

        let computed = match proof.root() {
            Ok(root) => root,
            Err(e) => {
                debug!("Rejected malformed proof: {}", e);
                return false;
            }
        };
        if computed != self.root() {
            debug!("Rejected proof: root {} != trusted {}", computed, self.root());
            return false;
        }
        if self.mode == Mode::Verifier {
            self.merge(proof);
        }
        true
    }

    /// 开始一批证明合并
    ///
    /// 返回的 `Batch` 独占借用本集合，`end()` 或提前 drop 时释放
    pub fn begin(&mut self) -> Batch<'_> {
        Batch {
            started_root: self.root(),
            collection: self,
            accepted: 0,
            rejected: 0,
        }
    }

    // ==================== 内部实现 ====================

    fn check_arity(&self, values: &[Vec<u8>]) -> Result<(), CollectionError> {
        if values.len() != self.fields {
            return Err(CollectionError::FieldCount {
                expected: self.fields,
                got: values.len(),
            });
        }
        Ok(())
    }

    fn probe_insert(&self, leaf: &Leaf) -> Result<(), CollectionError> {
        let mut node = &self.root;
        let mut depth = 0;
        loop {
            match node {
                Node::Empty => return Ok(()),
                Node::Unknown(_) => {
                    return Err(CollectionError::UnknownSubtree(hex::encode(&leaf.key)))
                }
                Node::Leaf(existing) => {
                    // 路径完全相同而键不同只可能是哈希碰撞，同样拒绝
                    if existing.key == leaf.key || existing.path == leaf.path {
                        return Err(CollectionError::Collision(hex::encode(&leaf.key)));
                    }
                    return Ok(());
                }
                Node::Internal(internal) => {
                    node = internal.child(path_bit(&leaf.path, depth));
                    depth += 1;
                }
            }
        }
    }

    fn insert(node: &mut Node, leaf: Leaf, depth: usize) {
        match node {
            Node::Empty => *node = Node::Leaf(leaf),
            Node::Leaf(_) => {
                if let Node::Leaf(existing) = std::mem::replace(node, Node::Empty) {
                    *node = Node::split(existing, leaf, depth);
                }
            }
            Node::Internal(internal) => {
                let right = path_bit(&leaf.path, depth);
                Self::insert(internal.child_mut(right), leaf, depth + 1);
                internal.rehash();
            }
            // probe_insert 已排除
            Node::Unknown(_) => {}
        }
    }

    fn update(
        node: &mut Node,
        path: &B256,
        key: &[u8],
        depth: usize,
        apply: &mut dyn FnMut(&mut Leaf),
    ) -> Result<(), CollectionError> {
        match node {
            Node::Empty => Err(CollectionError::NotFound(hex::encode(key))),
            Node::Unknown(_) => Err(CollectionError::UnknownSubtree(hex::encode(key))),
            Node::Leaf(leaf) => {
                if leaf.key != key {
                    return Err(CollectionError::NotFound(hex::encode(key)));
                }
                apply(leaf);
                Ok(())
            }
            Node::Internal(internal) => {
                Self::update(internal.child_mut(path_bit(path, depth)), path, key, depth + 1, apply)?;
                internal.rehash();
                Ok(())
            }
        }
    }

    /// 删除后需要收缩时必须知道叶子的兄弟是什么
    fn probe_remove(&self, path: &B256, key: &[u8]) -> Result<(), CollectionError> {
        let mut node = &self.root;
        let mut sibling: Option<&Node> = None;
        let mut depth = 0;
        loop {
            match node {
                Node::Empty => return Err(CollectionError::NotFound(hex::encode(key))),
                Node::Unknown(_) => return Err(CollectionError::UnknownSubtree(hex::encode(key))),
                Node::Leaf(leaf) => {
                    if leaf.key != key {
                        return Err(CollectionError::NotFound(hex::encode(key)));
                    }
                    if matches!(sibling, Some(Node::Unknown(_))) {
                        return Err(CollectionError::UnknownSubtree(hex::encode(key)));
                    }
                    return Ok(());
                }
                Node::Internal(internal) => {
                    let right = path_bit(path, depth);
                    sibling = Some(internal.sibling(right));
                    node = internal.child(right);
                    depth += 1;
                }
            }
        }
    }

    fn take(node: &mut Node, path: &B256, depth: usize) {
        match node {
            Node::Leaf(_) => *node = Node::Empty,
            Node::Internal(internal) => {
                Self::take(internal.child_mut(path_bit(path, depth)), path, depth + 1);
                internal.rehash();
                if node.needs_collapse() {
                    let owned = std::mem::replace(node, Node::Empty);
                    *node = owned.collapse();
                }
            }
            Node::Empty | Node::Unknown(_) => {}
        }
    }

    fn merge(&mut self, proof: &Proof) {
        let path = key_path(proof.key());
        let mut node = &mut self.root;

        for (depth, step) in proof.steps().iter().enumerate() {
            if node.is_unknown() {
                *node = Node::internal(Node::from_hash(step.left), Node::from_hash(step.right));
            }
            let current = node;
            node = match current {
                Node::Internal(internal) => internal.child_mut(path_bit(&path, depth)),
                // 哈希已经匹配，结构不可能不一致
                _ => return,
            };
        }

        if node.is_unknown() {
            *node = match proof.terminal() {
                Terminal::Empty => Node::Empty,
                Terminal::Leaf { key, values } => Node::Leaf(Leaf::new(key.clone(), values.clone())),
            };
        }
    }
}

/// 一批证明合并的统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub root: B256,
}

/// 证明合并批次
///
/// 持有集合的独占借用，批次进行中外部无法观察到中间状态
pub struct Batch<'a> {
    collection: &'a mut Collection,
    started_root: B256,
    accepted: usize,
    rejected: usize,
}

impl<'a> Batch<'a> {
    pub fn verify(&mut self, proof: &Proof) -> bool {
        let ok = self.collection.verify(proof);
        if ok {
            self.accepted += 1;
        } else {
            self.rejected += 1;
        }
        ok
    }

    /// 批次内的只读访问
    pub fn collection(&self) -> &Collection {
        self.collection
    }

    /// 结束批次
    pub fn end(self) -> BatchSummary {
        BatchSummary {
            accepted: self.accepted,
            rejected: self.rejected,
            root: self.collection.root(),
        }
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        debug!(
            accepted = self.accepted,
            rejected = self.rejected,
            "Proof batch released (root {} -> {})",
            self.started_root,
            self.collection.root()
        );
    }
}

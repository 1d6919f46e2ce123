//! 查询游标与记录

use super::node::Node;
use super::proof::{Proof, Step, Terminal};
use super::{Collection, CollectionError};
use crate::utils::{key_path, path_bit};

/// 一次查询的结果
///
/// `values` 为 `None` 表示确定不存在
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    key: Vec<u8>,
    values: Option<Vec<Vec<u8>>>,
}

impl Record {
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// 该键是否确实存在
    pub fn is_match(&self) -> bool {
        self.values.is_some()
    }

    /// 存储的字段；不存在时返回 `NotFound`
    pub fn values(&self) -> Result<&[Vec<u8>], CollectionError> {
        self.values
            .as_deref()
            .ok_or_else(|| CollectionError::NotFound(hex::encode(&self.key)))
    }

    pub fn into_values(self) -> Option<Vec<Vec<u8>>> {
        self.values
    }
}

/// 指向某个键位置的游标，键存在与否都可以创建
pub struct Cursor<'a> {
    collection: &'a Collection,
    key: Vec<u8>,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(collection: &'a Collection, key: &[u8]) -> Self {
        Self { collection, key: key.to_vec() }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// 读取记录
    ///
    /// 只有在无法判断存在与否时才返回错误（验证者尚未收到覆盖该路径的证明）
    pub fn record(&self) -> Result<Record, CollectionError> {
        let path = key_path(&self.key);
        let mut node = &self.collection.root;
        let mut depth = 0;

        loop {
            match node {
                Node::Empty => return Ok(self.absent()),
                Node::Unknown(_) => {
                    return Err(CollectionError::Indeterminate(hex::encode(&self.key)))
                }
                Node::Leaf(leaf) => {
                    if leaf.key == self.key {
                        return Ok(Record {
                            key: self.key.clone(),
                            values: Some(leaf.values.clone()),
                        });
                    }
                    return Ok(self.absent());
                }
                Node::Internal(internal) => {
                    node = internal.child(path_bit(&path, depth));
                    depth += 1;
                }
            }
        }
    }

    /// 为当前位置生成证明（仅管理者）
    pub fn proof(&self) -> Result<Proof, CollectionError> {
        if !self.collection.is_manager() {
            return Err(CollectionError::NotAuthoritative);
        }

        let path = key_path(&self.key);
        let mut steps = Vec::new();
        let mut node = &self.collection.root;

        loop {
            match node {
                Node::Empty => return Ok(Proof::new(self.key.clone(), steps, Terminal::Empty)),
                Node::Leaf(leaf) => {
                    let terminal = Terminal::Leaf {
                        key: leaf.key.clone(),
                        values: leaf.values.clone(),
                    };
                    return Ok(Proof::new(self.key.clone(), steps, terminal));
                }
                Node::Internal(internal) => {
                    steps.push(Step {
                        left: internal.left.hash(),
                        right: internal.right.hash(),
                    });
                    node = internal.child(path_bit(&path, steps.len() - 1));
                }
                // 管理者持有全部数据，不会出现未知子树
                Node::Unknown(_) => return Err(CollectionError::NotAuthoritative),
            }
        }
    }

    fn absent(&self) -> Record {
        Record { key: self.key.clone(), values: None }
    }
}

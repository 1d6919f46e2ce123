//! Merkle 证明生成与验证
//!
//! 证明由根到目标位置的每一层左右子哈希组成，末端是命中的叶子或空槽。
//! 只凭根哈希即可验证，既能证明存在，也能证明不存在。

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

use super::node::{empty_hash, internal_hash, leaf_hash};
use super::CollectionError;
use crate::utils::{decode, encode, key_path, path_bit, shares_prefix};
use crate::utils::hash::PATH_BITS;

/// 路径上的一层：当前内部节点的左右子哈希
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub left: B256,
    pub right: B256,
}

impl Step {
    /// 本层节点的哈希
    pub fn hash(&self) -> B256 {
        internal_hash(&self.left, &self.right)
    }

    /// 沿路径方向的子哈希
    pub fn child(&self, right: bool) -> B256 {
        if right { self.right } else { self.left }
    }
}

/// 证明末端
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminal {
    /// 空槽：目标键不存在
    Empty,
    /// 叶子：键相同为存在证明，键不同为不存在证明
    Leaf { key: Vec<u8>, values: Vec<Vec<u8>> },
}

/// Merkle 证明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// 被证明的键
    key: Vec<u8>,

    /// 由根向下的路径
    steps: Vec<Step>,

    /// 路径末端
    terminal: Terminal,
}

impl Proof {
    pub fn new(key: Vec<u8>, steps: Vec<Step>, terminal: Terminal) -> Self {
        Self { key, steps, terminal }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn terminal(&self) -> &Terminal {
        &self.terminal
    }

    pub fn depth(&self) -> usize {
        self.steps.len()
    }

    /// 是否为存在证明
    pub fn is_membership(&self) -> bool {
        matches!(&self.terminal, Terminal::Leaf { key, .. } if *key == self.key)
    }

    /// 存在证明携带的字段
    pub fn values(&self) -> Option<&[Vec<u8>]> {
        match &self.terminal {
            Terminal::Leaf { key, values } if *key == self.key => Some(values),
            _ => None,
        }
    }

    /// 末端节点哈希
    fn terminal_hash(&self) -> B256 {
        match &self.terminal {
            Terminal::Empty => empty_hash(),
            Terminal::Leaf { key, values } => leaf_hash(key, values),
        }
    }

    /// 由证明重新计算根哈希
    ///
    /// 结构不自洽（路径方向与哈希不符、末端叶子不在该位置）时返回错误
    pub fn root(&self) -> Result<B256, CollectionError> {
        if self.steps.len() > PATH_BITS {
            return Err(CollectionError::InvalidProof(format!(
                "path too deep: {} steps",
                self.steps.len()
            )));
        }

        let path = key_path(&self.key);
        let depth = self.steps.len();

        // 不存在证明中的叶子必须确实位于目标键的路径上
        if let Terminal::Leaf { key, .. } = &self.terminal {
            if *key != self.key {
                let other = key_path(key);
                if other == path || !shares_prefix(&other, &path, depth) {
                    return Err(CollectionError::InvalidProof(
                        "terminal leaf is not on the key's path".to_string(),
                    ));
                }
            }
        }

        let mut current = self.terminal_hash();
        for (level, step) in self.steps.iter().enumerate().rev() {
            if step.child(path_bit(&path, level)) != current {
                return Err(CollectionError::InvalidProof(format!(
                    "hash chain broken at depth {}",
                    level
                )));
            }
            current = step.hash();
        }

        Ok(current)
    }

    /// 对给定根验证（无状态）
    pub fn verify_against(&self, root: &B256) -> bool {
        matches!(self.root(), Ok(computed) if computed == *root)
    }

    /// 编码为字节（用于网络传输或落盘）
    pub fn to_bytes(&self) -> Result<Vec<u8>, CollectionError> {
        encode(self).map_err(|e| CollectionError::Codec(e.to_string()))
    }

    /// 从字节解码
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CollectionError> {
        decode(bytes).map_err(|e| CollectionError::Codec(e.to_string()))
    }
}

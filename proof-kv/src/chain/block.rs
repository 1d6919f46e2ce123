//! 日志条目数据结构
//!
//! 区块只承载字典根哈希；前向链接把相邻区块串起来，并由 roster 集体签名。

use alloy_primitives::B256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::utils::{decode, encode, CodecError};

/// 签名者集合
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    /// 各成员的 ed25519 公钥
    pub publics: Vec<[u8; 32]>,

    /// 至少需要多少个成员签名
    pub threshold: usize,
}

impl Roster {
    pub fn new(publics: Vec<[u8; 32]>, threshold: usize) -> Self {
        Self { publics, threshold }
    }

    /// 要求全体签名
    pub fn unanimous(publics: Vec<[u8; 32]>) -> Self {
        let threshold = publics.len();
        Self { publics, threshold }
    }

    pub fn len(&self) -> usize {
        self.publics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publics.is_empty()
    }

    /// Roster 标识：H(threshold ‖ n ‖ pk0 ‖ pk1 ‖ …)
    pub fn id(&self) -> B256 {
        let mut hasher = Sha256::new();
        hasher.update((self.threshold as u64).to_le_bytes());
        hasher.update((self.publics.len() as u64).to_le_bytes());
        for public in &self.publics {
            hasher.update(public);
        }
        B256::from(<[u8; 32]>::from(hasher.finalize()))
    }
}

/// 区块负载
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    /// 写入后的字典根
    pub root: B256,

    /// 本次写入的键（创世块为空）
    pub key: Option<Vec<u8>>,
}

/// 日志条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// 高度（即记录的 index）
    pub index: u64,

    /// 前一个区块的哈希，创世块为零
    pub prev: B256,

    pub timestamp: DateTime<Utc>,

    /// 签出接入本区块链接的 roster
    pub roster_id: B256,

    pub data: BlockData,
}

impl Block {
    pub fn genesis(roster: &Roster, root: B256) -> Self {
        Self {
            index: 0,
            prev: B256::ZERO,
            timestamp: Utc::now(),
            roster_id: roster.id(),
            data: BlockData { root, key: None },
        }
    }

    /// 在当前区块之后构造下一个区块
    ///
    /// `admitted_by` 是接入当前区块的链接；它携带新 roster 时，下一个区块改由新 roster 生成
    pub fn next(&self, admitted_by: &ForwardLink, data: BlockData) -> Self {
        let roster_id = admitted_by
            .new_roster
            .as_ref()
            .map_or(self.roster_id, Roster::id);
        Self {
            index: self.index + 1,
            prev: self.hash(),
            timestamp: Utc::now(),
            roster_id,
            data,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.prev == B256::ZERO
    }

    /// 区块哈希（也是区块 ID）
    pub fn hash(&self) -> B256 {
        let mut hasher = Sha256::new();
        hasher.update(self.index.to_le_bytes());
        hasher.update(self.prev.as_slice());
        hasher.update(self.timestamp.timestamp_millis().to_le_bytes());
        hasher.update(self.roster_id.as_slice());
        hasher.update(self.data.root.as_slice());
        match &self.data.key {
            Some(key) => {
                hasher.update([1u8]);
                hasher.update((key.len() as u64).to_le_bytes());
                hasher.update(key);
            }
            None => hasher.update([0u8]),
        }
        B256::from(<[u8; 32]>::from(hasher.finalize()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        decode(bytes)
    }
}

/// 前向链接：由 roster 签名，声明 `from` 的后继是 `to`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardLink {
    pub from: B256,
    pub to: B256,

    /// 从 `to` 的下一个区块起改由该 roster 签名
    pub new_roster: Option<Roster>,

    /// 对 `hash()` 的集体签名
    pub signature: Vec<u8>,
}

impl ForwardLink {
    pub fn unsigned(from: B256, to: B256, new_roster: Option<Roster>) -> Self {
        Self { from, to, new_roster, signature: Vec::new() }
    }

    /// 被签名的消息：H(from ‖ to ‖ [new_roster.id])
    pub fn hash(&self) -> B256 {
        let mut hasher = Sha256::new();
        hasher.update(self.from.as_slice());
        hasher.update(self.to.as_slice());
        if let Some(roster) = &self.new_roster {
            hasher.update(roster.id().as_slice());
        }
        B256::from(<[u8; 32]>::from(hasher.finalize()))
    }
}

/// 锚点：包含某个根的区块，以及把它接入链的那条前向链接
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub block: Block,
    pub link: ForwardLink,
}

impl Anchor {
    /// 锚点 ID 即区块哈希
    pub fn id(&self) -> B256 {
        self.block.hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_roster() -> Roster {
        Roster::unanimous(vec![[1u8; 32], [2u8; 32]])
    }

    #[test]
    fn test_roster_id_depends_on_threshold() {
        let full = create_test_roster();
        let partial = Roster::new(full.publics.clone(), 1);
        assert_ne!(full.id(), partial.id());
    }

    #[test]
    fn test_block_hash_covers_root() {
        let genesis = Block::genesis(&create_test_roster(), B256::ZERO);
        let link = ForwardLink::unsigned(B256::ZERO, genesis.hash(), None);
        let next =
            genesis.next(&link, BlockData { root: B256::repeat_byte(1), key: Some(b"k".to_vec()) });

        let mut tampered = next.clone();
        tampered.data.root = B256::repeat_byte(2);
        assert_ne!(next.hash(), tampered.hash());

        assert_eq!(next.prev, genesis.hash());
        assert_eq!(next.index, 1);
        assert_eq!(next.roster_id, genesis.roster_id);
        assert!(genesis.is_genesis());
        assert!(!next.is_genesis());
    }

    #[test]
    fn test_block_bytes_roundtrip() {
        let genesis = Block::genesis(&create_test_roster(), B256::repeat_byte(9));
        let decoded = Block::from_bytes(&genesis.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.hash(), genesis.hash());
    }

    #[test]
    fn test_link_hash_covers_roster_change() {
        let plain = ForwardLink::unsigned(B256::ZERO, B256::repeat_byte(1), None);
        let rotated =
            ForwardLink::unsigned(B256::ZERO, B256::repeat_byte(1), Some(create_test_roster()));
        assert_ne!(plain.hash(), rotated.hash());
    }

    #[test]
    fn test_next_block_takes_roster_from_link() {
        let genesis = Block::genesis(&create_test_roster(), B256::ZERO);
        let successor = Roster::new(vec![[3u8; 32]], 1);
        let link = ForwardLink::unsigned(B256::ZERO, genesis.hash(), Some(successor.clone()));

        let next = genesis.next(&link, BlockData { root: B256::ZERO, key: None });
        assert_eq!(next.roster_id, successor.id());
        assert_ne!(next.roster_id, genesis.roster_id);
    }
}

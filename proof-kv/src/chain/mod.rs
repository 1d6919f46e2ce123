//! 外部日志
//!
//! 字典根通过日志条目对外承诺。排序与共识不在本 crate 内实现，
//! 只通过 `ChainService` 与之交互；`LocalChain` 是单进程实现。

pub mod block;
pub mod local;
pub mod signature;

use alloy_primitives::B256;
use thiserror::Error;

pub use block::{Anchor, Block, BlockData, ForwardLink, Roster};
pub use local::LocalChain;
pub use signature::{CollectiveVerifier, Ed25519Multi, MultiSignature, SignatureError};

/// 日志服务错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("Unknown chain: {0}")]
    UnknownChain(B256),

    #[error("No block at index {index} in chain {chain}")]
    UnknownBlock { chain: B256, index: u64 },

    #[error("Unknown roster {roster} in chain {chain}")]
    UnknownRoster { chain: B256, roster: B256 },

    #[error("Invalid roster: {0}")]
    InvalidRoster(String),

    #[error("Signing failed: {0}")]
    Signing(String),
}

/// 日志服务接口
///
/// 链由创世区块哈希标识
pub trait ChainService: Send + Sync {
    /// 创建新链，返回创世锚点
    fn create_chain(&self, roster: Roster, root: B256) -> Result<Anchor, ChainError>;

    /// 追加一个区块，返回新区块及其前向链接
    fn append(&self, chain: &B256, data: BlockData) -> Result<Anchor, ChainError> {
        self.append_with_roster(chain, data, None)
    }

    /// 追加一个区块；`new_roster` 非空时，其后的区块改由新 roster 签名
    fn append_with_roster(
        &self,
        chain: &B256,
        data: BlockData,
        new_roster: Option<Roster>,
    ) -> Result<Anchor, ChainError>;

    /// 最新区块
    fn latest(&self, chain: &B256) -> Result<Anchor, ChainError>;

    /// 指定高度的区块
    fn anchor_at(&self, chain: &B256, index: u64) -> Result<Anchor, ChainError>;

    /// 下一个区块的高度
    fn next_index(&self, chain: &B256) -> Result<u64, ChainError> {
        Ok(self.latest(chain)?.block.index + 1)
    }

    /// 按 ID 查找链上出现过的 roster
    fn roster_of(&self, chain: &B256, roster_id: &B256) -> Result<Roster, ChainError>;

    /// 签出最新区块的 roster
    fn roster(&self, chain: &B256) -> Result<Roster, ChainError> {
        let latest = self.latest(chain)?;
        self.roster_of(chain, &latest.block.roster_id)
    }

    /// 自创世起的全部前向链接
    fn links(&self, chain: &B256) -> Result<Vec<ForwardLink>, ChainError>;
}

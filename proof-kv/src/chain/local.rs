//! 单进程日志
//!
//! 持有全部签名者私钥，每追加一个区块就由当前 roster 中的成员签出一条前向链接。
//! 不实现任何共识，只用于本地节点与测试。

use std::collections::HashMap;

use alloy_primitives::B256;
use chrono::Duration;
use ed25519_dalek::SigningKey;
use parking_lot::RwLock;
use rand::rngs::OsRng;
use tracing::{debug, info};

use super::block::{Anchor, Block, BlockData, ForwardLink, Roster};
use super::signature::MultiSignature;
use super::{ChainError, ChainService};

/// 一条链的全部区块，以及链上出现过的 roster
struct ChainState {
    rosters: HashMap<B256, Roster>,
    anchors: Vec<Anchor>,
}

pub struct LocalChain {
    signers: Vec<SigningKey>,
    chains: RwLock<HashMap<B256, ChainState>>,
}

impl LocalChain {
    /// 随机生成 `signers` 个签名者
    pub fn new(signers: usize) -> Self {
        let keys = (0..signers).map(|_| SigningKey::generate(&mut OsRng)).collect();
        Self::from_keys(keys)
    }

    pub fn from_keys(signers: Vec<SigningKey>) -> Self {
        Self { signers, chains: RwLock::new(HashMap::new()) }
    }

    /// 由全部签名者组成的 roster
    pub fn roster_with_threshold(&self, threshold: usize) -> Roster {
        Roster::new(
            self.signers.iter().map(|k| k.verifying_key().to_bytes()).collect(),
            threshold,
        )
    }

    pub fn default_roster(&self) -> Roster {
        self.roster_with_threshold(self.signers.len())
    }

    /// 公钥在 roster 中的私钥，附带其在 roster 中的位置
    fn members<'a>(&'a self, roster: &'a Roster) -> impl Iterator<Item = (u32, &'a SigningKey)> + 'a {
        self.signers.iter().filter_map(move |key| {
            let public = key.verifying_key().to_bytes();
            roster
                .publics
                .iter()
                .position(|p| *p == public)
                .map(|i| (i as u32, key))
        })
    }

    fn sign_link(
        &self,
        roster: &Roster,
        from: B256,
        to: B256,
        new_roster: Option<Roster>,
    ) -> Result<ForwardLink, ChainError> {
        let mut link = ForwardLink::unsigned(from, to, new_roster);
        let message = link.hash();

        let signature = MultiSignature::sign(self.members(roster), &message);
        if signature.parts.len() < roster.threshold {
            return Err(ChainError::Signing(format!(
                "only {} of {} required signers available",
                signature.parts.len(),
                roster.threshold
            )));
        }

        link.signature = signature
            .to_bytes()
            .map_err(|e| ChainError::Signing(e.to_string()))?;
        Ok(link)
    }
}

fn check_roster(roster: &Roster) -> Result<(), ChainError> {
    if roster.is_empty() || roster.threshold > roster.len() {
        return Err(ChainError::InvalidRoster(format!(
            "threshold {} with {} members",
            roster.threshold,
            roster.len()
        )));
    }
    Ok(())
}

impl ChainService for LocalChain {
    fn create_chain(&self, roster: Roster, root: B256) -> Result<Anchor, ChainError> {
        check_roster(&roster)?;

        let mut chains = self.chains.write();

        // 同一毫秒内以相同 roster 和根创建的链会得到相同的创世哈希
        let mut block = Block::genesis(&roster, root);
        while chains.contains_key(&block.hash()) {
            block.timestamp += Duration::milliseconds(1);
        }
        let id = block.hash();
        let link = self.sign_link(&roster, B256::ZERO, id, None)?;
        let anchor = Anchor { block, link };

        let rosters = HashMap::from([(roster.id(), roster)]);
        chains.insert(id, ChainState { rosters, anchors: vec![anchor.clone()] });

        info!("Created chain {}", id);
        Ok(anchor)
    }

    fn append_with_roster(
        &self,
        chain: &B256,
        data: BlockData,
        new_roster: Option<Roster>,
    ) -> Result<Anchor, ChainError> {
        if let Some(next) = &new_roster {
            check_roster(next)?;
            let available = self.members(next).count();
            if available < next.threshold {
                return Err(ChainError::InvalidRoster(format!(
                    "only {} of {} required signers available",
                    available, next.threshold
                )));
            }
        }

        let mut chains = self.chains.write();
        let state = chains.get_mut(chain).ok_or(ChainError::UnknownChain(*chain))?;

        let latest = state.anchors.last().ok_or(ChainError::UnknownChain(*chain))?;
        let block = latest.block.next(&latest.link, data);
        let roster = state
            .rosters
            .get(&block.roster_id)
            .ok_or(ChainError::UnknownRoster { chain: *chain, roster: block.roster_id })?;
        let link = self.sign_link(roster, block.prev, block.hash(), new_roster.clone())?;
        let anchor = Anchor { block, link };
        state.anchors.push(anchor.clone());
        if let Some(next) = new_roster {
            info!("Chain {} switches to roster {} after block #{}", chain, next.id(), anchor.block.index);
            state.rosters.insert(next.id(), next);
        }

        debug!(
            "Appended block #{} to chain {}, root {}",
            anchor.block.index, chain, anchor.block.data.root
        );
        Ok(anchor)
    }

    fn latest(&self, chain: &B256) -> Result<Anchor, ChainError> {
        self.chains
            .read()
            .get(chain)
            .and_then(|state| state.anchors.last().cloned())
            .ok_or(ChainError::UnknownChain(*chain))
    }

    fn anchor_at(&self, chain: &B256, index: u64) -> Result<Anchor, ChainError> {
        let chains = self.chains.read();
        let state = chains.get(chain).ok_or(ChainError::UnknownChain(*chain))?;
        usize::try_from(index)
            .ok()
            .and_then(|i| state.anchors.get(i).cloned())
            .ok_or(ChainError::UnknownBlock { chain: *chain, index })
    }

    fn roster_of(&self, chain: &B256, roster_id: &B256) -> Result<Roster, ChainError> {
        let chains = self.chains.read();
        let state = chains.get(chain).ok_or(ChainError::UnknownChain(*chain))?;
        state
            .rosters
            .get(roster_id)
            .cloned()
            .ok_or(ChainError::UnknownRoster { chain: *chain, roster: *roster_id })
    }

    fn links(&self, chain: &B256) -> Result<Vec<ForwardLink>, ChainError> {
        self.chains
            .read()
            .get(chain)
            .map(|state| state.anchors.iter().map(|a| a.link.clone()).collect())
            .ok_or(ChainError::UnknownChain(*chain))
    }
}

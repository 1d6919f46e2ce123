//! 区块锚定验证
//!
//! 确认一个值证明确实由日志中某个已签名的区块承诺：
//! 1. 证明重算出的根等于区块中的根
//! 2. 前向链接指向该区块，且从其前驱出发
//! 3. 前向链接上的集体签名对 roster 有效

use alloy_primitives::B256;
use thiserror::Error;

use crate::chain::{Anchor, Block, CollectiveVerifier, ForwardLink, Roster, SignatureError};
use crate::collection::Proof;

/// 锚定验证错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnchorError {
    #[error("invalid anchor: proof is for a different key")]
    KeyMismatch,

    #[error("invalid anchor: malformed proof: {0}")]
    MalformedProof(String),

    #[error("invalid anchor: proof root {proof} does not match block root {block}")]
    RootMismatch { proof: B256, block: B256 },

    #[error("invalid anchor: {0}")]
    BrokenLink(String),

    #[error("invalid anchor: block was produced by roster {block}, expected {expected}")]
    RosterMismatch { block: B256, expected: B256 },

    #[error("invalid anchor: {0}")]
    Signature(#[from] SignatureError),
}

/// 验证值证明与锚点
pub fn verify_anchor(
    key: &[u8],
    proof: &Proof,
    anchor: &Anchor,
    roster: &Roster,
    scheme: &dyn CollectiveVerifier,
) -> Result<(), AnchorError> {
    if proof.key() != key {
        return Err(AnchorError::KeyMismatch);
    }

    let root = proof.root().map_err(|e| AnchorError::MalformedProof(e.to_string()))?;
    if root != anchor.block.data.root {
        return Err(AnchorError::RootMismatch { proof: root, block: anchor.block.data.root });
    }

    verify_link(&anchor.block, &anchor.link, roster, scheme)
}

/// 验证把区块接入链的前向链接
pub fn verify_link(
    block: &Block,
    link: &ForwardLink,
    roster: &Roster,
    scheme: &dyn CollectiveVerifier,
) -> Result<(), AnchorError> {
    let id = block.hash();
    if link.to != id {
        return Err(AnchorError::BrokenLink(format!(
            "link points to {}, block is {}",
            link.to, id
        )));
    }
    if link.from != block.prev {
        return Err(AnchorError::BrokenLink(format!(
            "link leaves from {}, block follows {}",
            link.from, block.prev
        )));
    }

    let expected = roster.id();
    if block.roster_id != expected {
        return Err(AnchorError::RosterMismatch { block: block.roster_id, expected });
    }

    scheme.verify(&link.hash(), &link.signature, roster)?;
    Ok(())
}

/// 从创世区块沿前向链接走到最新区块，返回最新区块 ID
///
/// `links[0]` 是接入创世区块的链接（from 为零）。链接携带新 roster 时，
/// 之后的链接由新 roster 验证。
pub fn verify_chain(
    genesis: &B256,
    links: &[ForwardLink],
    roster: &Roster,
    scheme: &dyn CollectiveVerifier,
) -> Result<B256, AnchorError> {
    let first = links
        .first()
        .ok_or_else(|| AnchorError::BrokenLink("no links".to_string()))?;
    if first.to != *genesis {
        return Err(AnchorError::BrokenLink(format!(
            "first link points to {}, genesis is {}",
            first.to, genesis
        )));
    }

    let mut current = B256::ZERO;
    let mut roster = roster.clone();
    for (i, link) in links.iter().enumerate() {
        if link.from != current {
            return Err(AnchorError::BrokenLink(format!("link {} does not continue the chain", i)));
        }
        scheme.verify(&link.hash(), &link.signature, &roster)?;
        if let Some(next) = &link.new_roster {
            roster = next.clone();
        }
        current = link.to;
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{BlockData, ChainService, Ed25519Multi, LocalChain, MultiSignature};
    use crate::collection::Collection;
    use ed25519_dalek::SigningKey;

    fn create_test_keys() -> Vec<SigningKey> {
        (1..=3u8).map(|s| SigningKey::from_bytes(&[s; 32])).collect()
    }

    /// 一个字典加一条链，写入 Key0 后锚定
    fn anchored_collection() -> (Collection, LocalChain, Anchor, Roster) {
        let chain = LocalChain::from_keys(create_test_keys());
        let roster = chain.default_roster();

        let mut collection = Collection::manager(1);
        let genesis = chain.create_chain(roster.clone(), collection.root()).unwrap();

        collection.add(b"Key0", vec![b"value0".to_vec()]).unwrap();
        let anchor = chain
            .append(&genesis.id(), BlockData { root: collection.root(), key: Some(b"Key0".to_vec()) })
            .unwrap();
        (collection, chain, anchor, roster)
    }

    #[test]
    fn test_valid_anchor() {
        let (collection, _, anchor, roster) = anchored_collection();
        let proof = collection.get(b"Key0").proof().unwrap();
        assert!(verify_anchor(b"Key0", &proof, &anchor, &roster, &Ed25519Multi).is_ok());

        // 不存在证明同样可以锚定
        let absent = collection.get(b"Key9").proof().unwrap();
        assert!(verify_anchor(b"Key9", &absent, &anchor, &roster, &Ed25519Multi).is_ok());
    }

    #[test]
    fn test_root_mismatch_with_valid_signature() {
        let (mut collection, _, anchor, roster) = anchored_collection();

        // 区块和签名都完好，但证明来自之后的状态
        collection.add(b"Key1", vec![b"value1".to_vec()]).unwrap();
        let proof = collection.get(b"Key0").proof().unwrap();

        assert!(verify_link(&anchor.block, &anchor.link, &roster, &Ed25519Multi).is_ok());
        let err = verify_anchor(b"Key0", &proof, &anchor, &roster, &Ed25519Multi).unwrap_err();
        assert!(matches!(err, AnchorError::RootMismatch { .. }));
        assert!(err.to_string().starts_with("invalid anchor"));
    }

    #[test]
    fn test_key_mismatch() {
        let (collection, _, anchor, roster) = anchored_collection();
        let proof = collection.get(b"Key0").proof().unwrap();
        assert_eq!(
            verify_anchor(b"Key1", &proof, &anchor, &roster, &Ed25519Multi),
            Err(AnchorError::KeyMismatch)
        );
    }

    #[test]
    fn test_tampered_block() {
        let (collection, _, mut anchor, roster) = anchored_collection();
        let proof = collection.get(b"Key0").proof().unwrap();

        anchor.block.index += 1;
        assert!(matches!(
            verify_anchor(b"Key0", &proof, &anchor, &roster, &Ed25519Multi),
            Err(AnchorError::BrokenLink(_))
        ));
    }

    #[test]
    fn test_forged_signature() {
        let (collection, _, mut anchor, roster) = anchored_collection();
        let proof = collection.get(b"Key0").proof().unwrap();

        let outsider = SigningKey::from_bytes(&[42; 32]);
        anchor.link.signature = MultiSignature::sign(
            [(0, &outsider), (1, &outsider), (2, &outsider)],
            &anchor.link.hash(),
        )
        .to_bytes()
        .unwrap();

        assert!(matches!(
            verify_anchor(b"Key0", &proof, &anchor, &roster, &Ed25519Multi),
            Err(AnchorError::Signature(SignatureError::Invalid(0)))
        ));
    }

    #[test]
    fn test_other_roster_rejected() {
        let (collection, chain, anchor, _) = anchored_collection();
        let proof = collection.get(b"Key0").proof().unwrap();

        let weaker = chain.roster_with_threshold(1);
        assert!(matches!(
            verify_anchor(b"Key0", &proof, &anchor, &weaker, &Ed25519Multi),
            Err(AnchorError::RosterMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_chain_reaches_latest() {
        let (_, chain, anchor, roster) = anchored_collection();
        let links = chain.links(&anchor.block.prev).unwrap();

        let latest = verify_chain(&anchor.block.prev, &links, &roster, &Ed25519Multi).unwrap();
        assert_eq!(latest, anchor.id());

        // 跳过中间链接
        assert!(verify_chain(&anchor.block.prev, &links[1..], &roster, &Ed25519Multi).is_err());
        assert!(verify_chain(&anchor.block.prev, &[], &roster, &Ed25519Multi).is_err());
    }

    #[test]
    fn test_verify_chain_across_rotation() {
        let (mut collection, chain, anchor, roster) = anchored_collection();
        let id = anchor.block.prev;

        // 切换到两人 roster，阈值 2；原 roster 要求三人
        let successor = Roster::new(roster.publics[1..].to_vec(), 2);
        collection.add(b"Key1", vec![b"value1".to_vec()]).unwrap();
        chain
            .append_with_roster(
                &id,
                BlockData { root: collection.root(), key: Some(b"Key1".to_vec()) },
                Some(successor.clone()),
            )
            .unwrap();
        collection.add(b"Key2", vec![b"value2".to_vec()]).unwrap();
        let latest = chain
            .append(&id, BlockData { root: collection.root(), key: Some(b"Key2".to_vec()) })
            .unwrap();

        let links = chain.links(&id).unwrap();
        assert_eq!(verify_chain(&id, &links, &roster, &Ed25519Multi).unwrap(), latest.id());

        // 切换声明在签名覆盖范围内，不能被剥离
        let mut stripped = links.clone();
        stripped[2].new_roster = None;
        assert!(verify_chain(&id, &stripped, &roster, &Ed25519Multi).is_err());

        // 最新区块的锚点只认新 roster
        let proof = collection.get(b"Key2").proof().unwrap();
        let current = chain.roster_of(&id, &latest.block.roster_id).unwrap();
        assert_eq!(current, successor);
        assert!(verify_anchor(b"Key2", &proof, &latest, &current, &Ed25519Multi).is_ok());
        assert!(matches!(
            verify_anchor(b"Key2", &proof, &latest, &roster, &Ed25519Multi),
            Err(AnchorError::RosterMismatch { .. })
        ));
        println!("✅ rotation chain test passed");
    }
}

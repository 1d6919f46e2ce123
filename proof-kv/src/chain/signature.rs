//! 集体签名验证
//!
//! 签名方案通过 `CollectiveVerifier` 抽象，默认实现为逐成员 ed25519 多签加阈值。

use alloy_primitives::B256;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use super::block::Roster;
use crate::utils::{decode, encode};

/// 签名验证错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("Malformed signature: {0}")]
    Malformed(String),

    #[error("Signer {0} is not in the roster")]
    UnknownSigner(u32),

    #[error("Signer {0} appears twice")]
    DuplicateSigner(u32),

    #[error("Invalid signature from signer {0}")]
    Invalid(u32),

    #[error("Not enough signatures: got {got}, need {need}")]
    BelowThreshold { got: usize, need: usize },
}

/// 对已生成的集体签名做验证（不负责生成）
pub trait CollectiveVerifier: Send + Sync {
    fn verify(&self, message: &B256, signature: &[u8], roster: &Roster) -> Result<(), SignatureError>;
}

/// 单个成员的签名
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignaturePart {
    /// 成员在 roster 中的下标
    pub signer: u32,
    pub signature: Vec<u8>,
}

/// ed25519 多签
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiSignature {
    pub parts: Vec<SignaturePart>,
}

impl MultiSignature {
    /// 由一组 (下标, 私钥) 对消息签名
    pub fn sign<'a>(
        signers: impl IntoIterator<Item = (u32, &'a SigningKey)>,
        message: &B256,
    ) -> Self {
        let parts = signers
            .into_iter()
            .map(|(signer, key)| SignaturePart {
                signer,
                signature: key.sign(message.as_slice()).to_bytes().to_vec(),
            })
            .collect();
        Self { parts }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SignatureError> {
        encode(self).map_err(|e| SignatureError::Malformed(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        decode(bytes).map_err(|e| SignatureError::Malformed(e.to_string()))
    }
}

/// 逐成员验证 ed25519 签名，有效签名数达到阈值即通过
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Multi;

impl CollectiveVerifier for Ed25519Multi {
    fn verify(&self, message: &B256, signature: &[u8], roster: &Roster) -> Result<(), SignatureError> {
        let multi = MultiSignature::from_bytes(signature)?;
        let mut seen = HashSet::new();

        for part in &multi.parts {
            if !seen.insert(part.signer) {
                return Err(SignatureError::DuplicateSigner(part.signer));
            }
            let public = roster
                .publics
                .get(part.signer as usize)
                .ok_or(SignatureError::UnknownSigner(part.signer))?;
            let key = VerifyingKey::from_bytes(public)
                .map_err(|e| SignatureError::Malformed(e.to_string()))?;
            let sig = Signature::from_slice(&part.signature)
                .map_err(|e| SignatureError::Malformed(e.to_string()))?;
            key.verify(message.as_slice(), &sig)
                .map_err(|_| SignatureError::Invalid(part.signer))?;
        }

        // 阈值为 0 的 roster 不接受空签名
        let need = roster.threshold.max(1);
        if seen.len() < need {
            return Err(SignatureError::BelowThreshold { got: seen.len(), need });
        }
        Ok(())
    }
}

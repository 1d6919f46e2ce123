//! 字典服务
//!
//! 对外的三个操作：创建字典、写入键值、读取键值（附证明与锚点）。
//! 每个字典对应日志中的一条链，字典 ID 即创世区块哈希。

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::B256;
use parking_lot::RwLock;
use redb::Database;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::anchor::{verify_anchor, AnchorError};
use crate::chain::{Anchor, BlockData, ChainError, ChainService, CollectiveVerifier, Ed25519Multi, Roster};
use crate::collection::{empty_hash, Proof};
use crate::db::{KvStore, MemoryStore, RedbStore, StoreError};

/// 协议版本
pub type Version = u32;

pub const CURRENT_VERSION: Version = 1;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: Version, got: Version },

    #[error("Unknown dictionary: {0}")]
    UnknownDictionary(B256),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Anchor(#[from] AnchorError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Store root {store} diverged from chain root {chain}")]
    Diverged { store: B256, chain: B256 },
}

// ==================== 请求与响应 ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDictionary {
    pub version: Version,
    pub roster: Roster,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDictionaryResponse {
    pub version: Version,
    pub genesis: Anchor,
}

/// 写入请求
///
/// `signature` 是对 key+value 的签名，授权检查在调用方完成，这里只负责保存
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetKeyValue {
    pub version: Version,
    pub dictionary_id: B256,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetKeyValueResponse {
    pub version: Version,
    /// 承诺本次写入的区块
    pub anchor_id: B256,
    pub index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetValue {
    pub version: Version,
    pub dictionary_id: B256,
    pub key: Vec<u8>,
    /// 是否在返回前验证锚点
    pub check_anchor: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetValueResponse {
    pub version: Version,
    pub value: Vec<u8>,
    pub signature: Vec<u8>,
    pub index: u64,
    /// 对当前根的存在证明
    pub proof: Proof,
    /// 当前根所在的区块
    pub anchor: Anchor,
    /// 锚点已验证通过
    pub anchor_check: bool,
}

fn check_version(got: Version) -> Result<(), ServiceError> {
    if got != CURRENT_VERSION {
        return Err(ServiceError::VersionMismatch { expected: CURRENT_VERSION, got });
    }
    Ok(())
}

/// 字典在存储中的名字
pub fn dictionary_name(id: &B256) -> String {
    hex::encode(id.as_slice())
}

type StoreOpener = Box<dyn Fn(&str) -> Result<Arc<dyn KvStore>, StoreError> + Send + Sync>;

// ==================== Service ====================

pub struct Service<C: ChainService> {
    chain: Arc<C>,

    /// 按名字打开（或创建）字典存储
    opener: StoreOpener,

    stores: RwLock<HashMap<B256, Arc<dyn KvStore>>>,

    scheme: Box<dyn CollectiveVerifier>,

    /// 写入独占，读取共享：保证 index 与区块高度一致，读者看到一致的值、证明与锚点
    order: RwLock<()>,
}

impl<C: ChainService> Service<C> {
    pub fn new(chain: Arc<C>, opener: StoreOpener) -> Self {
        Self {
            chain,
            opener,
            stores: RwLock::new(HashMap::new()),
            scheme: Box::new(Ed25519Multi),
            order: RwLock::new(()),
        }
    }

    /// 所有字典放在同一个 redb 文件中
    pub fn with_redb(chain: Arc<C>, db: Arc<Database>) -> Self {
        let opener = move |name: &str| -> Result<Arc<dyn KvStore>, StoreError> {
            let store = RedbStore::open_with(Arc::clone(&db), name)?;
            Ok(Arc::new(store) as Arc<dyn KvStore>)
        };
        Self::new(chain, Box::new(opener))
    }

    pub fn in_memory(chain: Arc<C>) -> Self {
        let opener = |_: &str| -> Result<Arc<dyn KvStore>, StoreError> {
            Ok(Arc::new(MemoryStore::new()) as Arc<dyn KvStore>)
        };
        Self::new(chain, Box::new(opener))
    }

    pub fn with_scheme(mut self, scheme: Box<dyn CollectiveVerifier>) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    /// 创建字典：新建一条以空根为创世的链
    pub fn create_dictionary(
        &self,
        request: CreateDictionary,
    ) -> Result<CreateDictionaryResponse, ServiceError> {
        check_version(request.version)?;
        let _order = self.order.write();

        let genesis = self.chain.create_chain(request.roster, empty_hash())?;
        let id = genesis.id();

        let store = (self.opener)(&dictionary_name(&id))?;
        if store.root_hash() != genesis.block.data.root {
            return Err(ServiceError::Diverged {
                store: store.root_hash(),
                chain: genesis.block.data.root,
            });
        }
        self.stores.write().insert(id, store);

        info!("Created dictionary {}", id);
        Ok(CreateDictionaryResponse { version: CURRENT_VERSION, genesis })
    }

    /// 写入键值，并把新根追加到日志
    ///
    /// 日志拒绝时写入整体回滚
    pub fn set_key_value(&self, request: SetKeyValue) -> Result<SetKeyValueResponse, ServiceError> {
        check_version(request.version)?;
        let id = request.dictionary_id;
        let store = self.store(&id)?;
        let _order = self.order.write();

        let index = self.chain.next_index(&id)?;
        let mut anchor = None;
        let mut chain_error = None;

        let result = store.store_with(
            &request.key,
            &request.value,
            &request.signature,
            index,
            &mut |root| {
                let data = BlockData { root, key: Some(request.key.clone()) };
                match self.chain.append(&id, data) {
                    Ok(appended) => {
                        anchor = Some(appended);
                        Ok(())
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        chain_error = Some(e);
                        Err(StoreError::Rejected(reason))
                    }
                }
            },
        );

        if let Some(e) = chain_error {
            return Err(ServiceError::Chain(e));
        }
        result?;
        let anchor = anchor.ok_or(ServiceError::UnknownDictionary(id))?;

        debug!("Set key {} in {} at index {}", hex::encode(&request.key), id, anchor.block.index);
        Ok(SetKeyValueResponse {
            version: CURRENT_VERSION,
            anchor_id: anchor.id(),
            index: anchor.block.index,
        })
    }

    /// 读取键值及其证明；`check_anchor` 时验证失败返回错误
    pub fn get_value(&self, request: GetValue) -> Result<GetValueResponse, ServiceError> {
        check_version(request.version)?;
        let id = request.dictionary_id;
        let store = self.store(&id)?;
        let _order = self.order.read();

        let stored = store.get_value(&request.key)?;
        let proof = store.proof(&request.key)?;
        let anchor = self.chain.latest(&id)?;

        if request.check_anchor {
            let roster = self.chain.roster_of(&id, &anchor.block.roster_id)?;
            verify_anchor(&request.key, &proof, &anchor, &roster, self.scheme.as_ref())?;
        }

        Ok(GetValueResponse {
            version: CURRENT_VERSION,
            value: stored.value,
            signature: stored.signature,
            index: stored.index,
            proof,
            anchor,
            anchor_check: request.check_anchor,
        })
    }

    /// 字典当前的根
    pub fn root(&self, id: &B256) -> Result<B256, ServiceError> {
        Ok(self.store(id)?.root_hash())
    }

    /// 取已打开的存储，否则按需打开并与链上最新根比对
    fn store(&self, id: &B256) -> Result<Arc<dyn KvStore>, ServiceError> {
        if let Some(store) = self.stores.read().get(id) {
            return Ok(Arc::clone(store));
        }

        let latest = self.chain.latest(id).map_err(|e| match e {
            ChainError::UnknownChain(_) => ServiceError::UnknownDictionary(*id),
            other => ServiceError::Chain(other),
        })?;
        let store = (self.opener)(&dictionary_name(id))?;
        if store.root_hash() != latest.block.data.root {
            return Err(ServiceError::Diverged {
                store: store.root_hash(),
                chain: latest.block.data.root,
            });
        }

        let mut stores = self.stores.write();
        Ok(Arc::clone(stores.entry(*id).or_insert(store)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::LocalChain;
    use ed25519_dalek::SigningKey;

    fn create_test_service() -> Service<LocalChain> {
        let keys = (1..=4u8).map(|s| SigningKey::from_bytes(&[s; 32])).collect();
        Service::in_memory(Arc::new(LocalChain::from_keys(keys)))
    }

    fn create_dictionary(service: &Service<LocalChain>) -> B256 {
        let roster = service.chain().default_roster();
        service
            .create_dictionary(CreateDictionary { version: CURRENT_VERSION, roster })
            .unwrap()
            .genesis
            .id()
    }

    fn set(service: &Service<LocalChain>, id: B256, key: &str, value: &str) -> SetKeyValueResponse {
        service
            .set_key_value(SetKeyValue {
                version: CURRENT_VERSION,
                dictionary_id: id,
                key: key.as_bytes().to_vec(),
                value: value.as_bytes().to_vec(),
                signature: b"sig".to_vec(),
            })
            .unwrap()
    }

    #[test]
    fn test_set_and_get_with_anchor() {
        let service = create_test_service();
        let id = create_dictionary(&service);

        let response = set(&service, id, "Key0", "value0");
        assert_eq!(response.index, 1);

        let got = service
            .get_value(GetValue {
                version: CURRENT_VERSION,
                dictionary_id: id,
                key: b"Key0".to_vec(),
                check_anchor: true,
            })
            .unwrap();
        assert_eq!(got.value, b"value0".to_vec());
        assert_eq!(got.index, 1);
        assert!(got.anchor_check);
        assert_eq!(got.anchor.id(), response.anchor_id);
        assert!(got.proof.verify_against(&service.root(&id).unwrap()));
    }

    #[test]
    fn test_index_follows_log() {
        let service = create_test_service();
        let id = create_dictionary(&service);

        assert_eq!(set(&service, id, "Key0", "a").index, 1);
        assert_eq!(set(&service, id, "Key1", "b").index, 2);
        assert_eq!(set(&service, id, "Key0", "c").index, 3);
    }

    #[test]
    fn test_version_mismatch() {
        let service = create_test_service();
        let roster = service.chain().default_roster();
        assert!(matches!(
            service.create_dictionary(CreateDictionary { version: 2, roster }),
            Err(ServiceError::VersionMismatch { expected: 1, got: 2 })
        ));
    }

    #[test]
    fn test_unknown_dictionary() {
        let service = create_test_service();
        let missing = B256::repeat_byte(3);
        assert!(matches!(
            service.get_value(GetValue {
                version: CURRENT_VERSION,
                dictionary_id: missing,
                key: b"Key0".to_vec(),
                check_anchor: false,
            }),
            Err(ServiceError::UnknownDictionary(_))
        ));
    }

    #[test]
    fn test_dictionaries_are_separate() {
        let service = create_test_service();
        let first = create_dictionary(&service);
        let second = create_dictionary(&service);
        assert_ne!(first, second);

        set(&service, first, "Key0", "value0");
        assert_eq!(service.root(&second).unwrap(), empty_hash());
    }
}

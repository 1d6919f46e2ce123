use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use redb::Database;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use proof_kv::chain::LocalChain;
use proof_kv::config::NodeConfig;
use proof_kv::db::{KvStore, RedbStore};
use proof_kv::service::{CreateDictionary, GetValue, Service, SetKeyValue, CURRENT_VERSION};
use proof_kv::utils::{bytes_to_hex, hex_to_bytes, to_json};

/// 防篡改键值存储（本地节点）
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON 配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    /// 数据目录（覆盖配置文件）
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 字典名（覆盖配置文件）
    #[arg(long)]
    collection: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 写入一条记录
    Set {
        key: String,
        value: String,

        /// 调用方对 key+value 的签名（十六进制）
        #[arg(long, default_value = "")]
        signature: String,

        /// 写入该值的日志位置
        #[arg(long)]
        index: u64,
    },

    /// 读取一条记录并验证证明
    Get {
        key: String,

        /// 同时输出编码后的证明
        #[arg(long)]
        proof: bool,
    },

    /// 输出当前根哈希
    Root,

    /// 创建字典、写入若干键值并验证锚点
    Demo {
        /// 写入的键值对数量
        #[arg(long, default_value = "4")]
        pairs: usize,
    },
}

#[derive(Serialize)]
struct GetOutput {
    key: String,
    value: String,
    signature: String,
    index: u64,
    root: String,
    proof_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    proof: Option<String>,
}

fn load_config(args: &Args) -> Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.store.data_dir = dir.clone();
    }
    if let Some(collection) = &args.collection {
        config.store.collection = collection.clone();
    }
    config.validate()?;
    Ok(config)
}

fn run_get(store: &RedbStore, key: &str, with_proof: bool) -> Result<()> {
    let stored = store.get_value(key.as_bytes())?;
    let proof = store.proof(key.as_bytes())?;
    let root = store.root_hash();

    let output = GetOutput {
        key: key.to_string(),
        value: String::from_utf8_lossy(&stored.value).into_owned(),
        signature: bytes_to_hex(&stored.signature),
        index: stored.index,
        root: root.to_string(),
        proof_verified: proof.verify_against(&root),
        proof: if with_proof { Some(bytes_to_hex(&proof.to_bytes()?)) } else { None },
    };
    println!("{}", to_json(&output)?);
    Ok(())
}

fn run_demo(config: &NodeConfig, pairs: usize) -> Result<()> {
    let path = config.store.db_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Arc::new(Database::create(&path)?);

    let chain = Arc::new(LocalChain::new(config.signers));
    let roster = chain.roster_with_threshold(config.threshold());
    let service = Service::with_redb(chain, db);

    info!("🚀 创建字典（{} 个签名者，阈值 {}）", roster.len(), roster.threshold);
    let created = service.create_dictionary(CreateDictionary { version: CURRENT_VERSION, roster })?;
    let id = created.genesis.id();
    info!("   字典 ID: {}", id);

    for i in 0..pairs {
        let response = service.set_key_value(SetKeyValue {
            version: CURRENT_VERSION,
            dictionary_id: id,
            key: format!("Key{}", i).into_bytes(),
            value: format!("value{}", i).into_bytes(),
            signature: Vec::new(),
        })?;
        info!("✅ Key{} 写入区块 #{} ({})", i, response.index, response.anchor_id);
    }

    for i in 0..pairs {
        let key = format!("Key{}", i);
        let response = service.get_value(GetValue {
            version: CURRENT_VERSION,
            dictionary_id: id,
            key: key.clone().into_bytes(),
            check_anchor: true,
        })?;
        if !response.anchor_check {
            return Err(anyhow!("anchor for {} was not checked", key));
        }
        info!(
            "🔍 {} = {} (index {}, 锚点已验证)",
            key,
            String::from_utf8_lossy(&response.value),
            response.index
        );
    }

    info!("📦 根哈希: {}", service.root(&id)?);
    Ok(())
}

fn main() -> Result<()> {
    // 初始化日志
    fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    match &args.command {
        Command::Set { key, value, signature, index } => {
            let store = RedbStore::from_config(&config.store)?;
            let signature = hex_to_bytes(signature).map_err(|e| anyhow!(e))?;
            let root = store.store(key.as_bytes(), value.as_bytes(), &signature, *index)?;
            info!("✅ 已写入 {} (index {})", key, index);
            println!("{}", root);
        }
        Command::Get { key, proof } => {
            let store = RedbStore::from_config(&config.store)?;
            run_get(&store, key, *proof)?;
        }
        Command::Root => {
            let store = RedbStore::from_config(&config.store)?;
            info!("字典 '{}' 共 {} 条记录", store.name(), store.len());
            println!("{}", store.root_hash());
        }
        Command::Demo { pairs } => run_demo(&config, *pairs)?,
    }

    Ok(())
}

//! Proof KV Library
//!
//! 防篡改键值存储：认证字典 + 持久化 + 日志锚定验证

pub mod anchor;
pub mod chain;
pub mod collection;
pub mod config;
pub mod db;
pub mod service;
pub mod utils;

//! # PACS管理模块
//!
//! 提供配置加载、验证与导出

pub mod config;

pub use config::{
    write_config, ConfigManager, ConfigValidator, DatabaseConfig, LoggingConfig, PacsConfig,
    ServerConfig, StorageConfig,
};

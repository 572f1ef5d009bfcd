//! # PACS数据库模块
//!
//! 负责存档实体（患者、检查、系列、实例、存储位置）的事务性存取，
//! 提供PostgreSQL实现和用于测试的内存实现。

pub mod connection;
pub mod memory;
pub mod models;
pub mod queries;
pub mod repository;

// 重新导出主要类型
pub use connection::DatabasePool;
pub use memory::{MemoryRepository, RepositoryStats};
pub use models::*;
pub use queries::PgArchiveRepository;
pub use repository::{ArchiveRepository, ArchiveTransaction};

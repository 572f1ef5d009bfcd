//! # PACS存储模块
//!
//! 负责影像对象的物理存储和摘要计算。

pub mod storage;

pub use storage::StorageManager;

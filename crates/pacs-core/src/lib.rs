//! # PACS Core
//!
//! PACS系统的核心模块，提供错误定义、领域枚举与值类型以及通用工具。

pub mod error;
pub mod models;
pub mod utils;

pub use error::{ConflictKind, PacsError, Result};
pub use models::*;

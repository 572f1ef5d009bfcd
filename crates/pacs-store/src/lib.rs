//! # 入库模块
//!
//! 将已写入存储的DICOM对象登记到存档：重复对象判定与覆盖策略、
//! 拒绝说明处理、空系列/空检查级联删除以及重复患者合并。

pub mod conf;
pub mod context;
pub mod decision;
pub mod engine;
mod hierarchy;
pub mod patient;
pub mod reconcile;
pub mod rejection;
pub mod result;

#[cfg(test)]
mod test_support;

pub use conf::StoreConfig;
pub use context::{SourceKind, StoreContext, StoreSession};
pub use decision::{decide, Decision, DecisionInput, DropReason};
pub use engine::StoreService;
pub use patient::{DefaultPatientService, PatientService};
pub use result::UpdateResult;

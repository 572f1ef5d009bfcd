//! 入库结果

use crate::decision::DropReason;
use pacs_core::RejectionNote;
use pacs_database::{Instance, Location, Patient, Series, Study};

/// 一次入库创建、替换或拒绝的内容，供审计和协议层使用
#[derive(Debug, Clone, Default)]
pub struct UpdateResult {
    pub created_patient: Option<Patient>,
    pub created_study: Option<Study>,
    pub created_series: Option<Series>,
    /// 找到的同标识旧实例，无论是否被替换
    pub previous_instance: Option<Instance>,
    /// 未修改存档时的原因
    pub dropped: Option<DropReason>,
    pub rejection_note: Option<RejectionNote>,
    /// 拒绝说明实际修改过的实例
    pub rejected_instances: Vec<Instance>,
    pub instance: Option<Instance>,
    pub location: Option<Location>,
}

impl UpdateResult {
    /// 是否新建了实例
    pub fn is_stored(&self) -> bool {
        self.location.is_some()
    }

    pub fn has_creations(&self) -> bool {
        self.created_patient.is_some()
            || self.created_study.is_some()
            || self.created_series.is_some()
            || self.instance.is_some()
    }
}

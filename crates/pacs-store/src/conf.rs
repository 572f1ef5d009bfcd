//! 入库配置

use pacs_core::{AcceptPreviousRejectedInstance, Availability, Code, OverwritePolicy, RejectionNote};
use pacs_dicom::AttributeFilter;
use serde::{Deserialize, Serialize};

pub fn rejected_for_quality_reasons() -> Code {
    Code::new("113001", "DCM", None, "Rejected for Quality Reasons")
}

pub fn rejected_for_patient_safety_reasons() -> Code {
    Code::new("113037", "DCM", None, "Rejected for Patient Safety Reasons")
}

pub fn incorrect_modality_worklist_entry() -> Code {
    Code::new("113038", "DCM", None, "Incorrect Modality Worklist Entry")
}

pub fn data_retention_policy_expired() -> Code {
    Code::new("113039", "DCM", None, "Data Retention Policy Expired")
}

pub fn revoke_rejection() -> Code {
    Code::new("REVOKE_REJECTION", "99DCM4CHEE", None, "Restore rejected Instances")
}

/// 默认拒绝说明，后者可覆盖前者的拒绝
pub fn default_rejection_notes() -> Vec<RejectionNote> {
    let quality = rejected_for_quality_reasons();
    let safety = rejected_for_patient_safety_reasons();
    let mwl = incorrect_modality_worklist_entry();
    let retention = data_retention_policy_expired();
    vec![
        RejectionNote::new("Quality", quality.clone(), AcceptPreviousRejectedInstance::Ignore),
        RejectionNote::new("Patient Safety", safety.clone(), AcceptPreviousRejectedInstance::Reject)
            .with_overwrite(&[quality.clone()]),
        RejectionNote::new("Incorrect MWL Entry", mwl.clone(), AcceptPreviousRejectedInstance::Reject)
            .with_overwrite(&[quality.clone(), safety.clone()]),
        RejectionNote::new(
            "Retention Expired",
            retention.clone(),
            AcceptPreviousRejectedInstance::Restore,
        )
        .with_overwrite(&[quality.clone(), safety.clone(), mwl.clone()]),
        RejectionNote::new(
            "Revoke Rejection",
            revoke_rejection(),
            AcceptPreviousRejectedInstance::Ignore,
        )
        .with_overwrite(&[quality, safety, mwl, retention])
        .revoking(),
    ]
}

/// 入库配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub overwrite_policy: OverwritePolicy,
    /// 为空时使用会话的本地AE
    pub retrieve_aets: Vec<String>,
    pub instance_availability: Availability,
    pub access_control_id: Option<String>,
    pub patient_filter: AttributeFilter,
    pub study_filter: AttributeFilter,
    pub series_filter: AttributeFilter,
    pub instance_filter: AttributeFilter,
    pub rejection_notes: Vec<RejectionNote>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            overwrite_policy: OverwritePolicy::default(),
            retrieve_aets: Vec::new(),
            instance_availability: Availability::Online,
            access_control_id: None,
            patient_filter: AttributeFilter::patient(),
            study_filter: AttributeFilter::study(),
            series_filter: AttributeFilter::series(),
            instance_filter: AttributeFilter::instance(),
            rejection_notes: default_rejection_notes(),
        }
    }
}

impl StoreConfig {
    /// 按编码查找拒绝说明
    pub fn rejection_note(&self, code: &Code) -> Option<&RejectionNote> {
        self.rejection_notes.iter().find(|note| &note.code == code)
    }

    pub fn with_overwrite_policy(mut self, policy: OverwritePolicy) -> Self {
        self.overwrite_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacs_core::UpdatePolicy;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.overwrite_policy, OverwritePolicy::SameSource);
        assert_eq!(config.patient_filter.update_policy, Some(UpdatePolicy::Supplement));
        assert_eq!(config.study_filter.update_policy, Some(UpdatePolicy::Merge));
        assert_eq!(config.instance_filter.update_policy, None);
        assert_eq!(config.rejection_notes.len(), 5);
    }

    #[test]
    fn test_rejection_note_lookup_ignores_meaning() {
        let config = StoreConfig::default();
        let code = Code::new("113037", "DCM", None, "Patient Safety");
        let note = config.rejection_note(&code).unwrap();
        assert_eq!(note.accept_previous_rejected_instance, AcceptPreviousRejectedInstance::Reject);
        assert!(note.can_overwrite_previous_rejection(&rejected_for_quality_reasons()));

        let revoke = config.rejection_note(&revoke_rejection()).unwrap();
        assert!(revoke.revoke_rejection);
        assert_eq!(revoke.overwrite_previous_rejection.len(), 4);
        assert!(config
            .rejection_note(&Code::new("113001", "99LOCAL", None, "x"))
            .is_none());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"overwrite_policy": "NEVER"}"#).unwrap();
        assert_eq!(config.overwrite_policy, OverwritePolicy::Never);
        assert_eq!(config.rejection_notes, default_rejection_notes());
    }
}

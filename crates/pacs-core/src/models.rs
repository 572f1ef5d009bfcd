//! 核心数据模型定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// 拒绝状态，冗余存储在系列和检查上以加速查询
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionState {
    #[default]
    None,
    Partial,
    Complete,
}

impl RejectionState {
    /// 根据已拒绝与未拒绝实例数量计算聚合状态
    pub fn from_counts(rejected: u64, not_rejected: u64) -> Self {
        match (rejected, not_rejected) {
            (0, _) => RejectionState::None,
            (_, 0) => RejectionState::Complete,
            _ => RejectionState::Partial,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionState::None => "NONE",
            RejectionState::Partial => "PARTIAL",
            RejectionState::Complete => "COMPLETE",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "PARTIAL" => RejectionState::Partial,
            "COMPLETE" => RejectionState::Complete,
            _ => RejectionState::None,
        }
    }
}

/// 存储位置状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationStatus {
    #[default]
    Ok,
    ToDelete,
    FailedToDelete,
}

impl LocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationStatus::Ok => "OK",
            LocationStatus::ToDelete => "TO_DELETE",
            LocationStatus::FailedToDelete => "FAILED_TO_DELETE",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "TO_DELETE" => LocationStatus::ToDelete,
            "FAILED_TO_DELETE" => LocationStatus::FailedToDelete,
            _ => LocationStatus::Ok,
        }
    }
}

/// 实例可用性
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Availability {
    #[default]
    Online,
    Nearline,
    Offline,
    Unavailable,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Online => "ONLINE",
            Availability::Nearline => "NEARLINE",
            Availability::Offline => "OFFLINE",
            Availability::Unavailable => "UNAVAILABLE",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "NEARLINE" => Availability::Nearline,
            "OFFLINE" => Availability::Offline,
            "UNAVAILABLE" => Availability::Unavailable,
            _ => Availability::Online,
        }
    }
}

/// 覆盖策略：同一标识的实例再次接收时是否替换已存储内容
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverwritePolicy {
    Never,
    Always,
    #[default]
    SameSource,
    SameSourceAndSeries,
}

/// 属性更新策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdatePolicy {
    /// 只补充之前不存在的属性
    Supplement,
    /// 用任何非空的新值覆盖
    Merge,
}

/// 已拒绝实例再次接收时的处理方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcceptPreviousRejectedInstance {
    #[default]
    Ignore,
    Reject,
    Restore,
}

/// 编码值 (Code Value, Coding Scheme Designator, Coding Scheme Version)
///
/// 相等性不考虑 `meaning`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Code {
    pub value: String,
    pub designator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub meaning: String,
}

impl Code {
    pub fn new(value: &str, designator: &str, version: Option<&str>, meaning: &str) -> Self {
        Self {
            value: value.to_string(),
            designator: designator.to_string(),
            version: version.map(str::to_string),
            meaning: meaning.to_string(),
        }
    }
}

impl PartialEq for Code {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
            && self.designator == other.designator
            && self.version == other.version
    }
}

impl Eq for Code {}

impl Hash for Code {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
        self.designator.hash(state);
        self.version.hash(state);
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}", self.value, self.designator)?;
        if let Some(version) = &self.version {
            write!(f, " [{}]", version)?;
        }
        write!(f, ", \"{}\")", self.meaning)
    }
}

/// 签发机构 (Issuer of Patient ID / Accession Number)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct Issuer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_namespace_entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universal_entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universal_entity_id_type: Option<String>,
}

impl Issuer {
    pub fn is_empty(&self) -> bool {
        self.local_namespace_entity_id.is_none() && self.universal_entity_id.is_none()
    }

    /// 两个签发机构是否可能指同一实体：任一组成部分都不能相互矛盾
    pub fn matches(&self, other: &Issuer) -> bool {
        let local = match (&self.local_namespace_entity_id, &other.local_namespace_entity_id) {
            (Some(a), Some(b)) => Some(a == b),
            _ => None,
        };
        let universal = match (&self.universal_entity_id, &other.universal_entity_id) {
            (Some(a), Some(b)) => Some(
                a == b && self.universal_entity_id_type == other.universal_entity_id_type,
            ),
            _ => None,
        };
        match (local, universal) {
            (None, None) => false,
            (l, u) => l.unwrap_or(true) && u.unwrap_or(true),
        }
    }
}

impl fmt::Display for Issuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(local) = &self.local_namespace_entity_id {
            write!(f, "{}", local)?;
        }
        if let Some(universal) = &self.universal_entity_id {
            write!(
                f,
                "&{}&{}",
                universal,
                self.universal_entity_id_type.as_deref().unwrap_or("")
            )?;
        }
        Ok(())
    }
}

/// 带签发机构的患者ID
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct IdWithIssuer {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<Issuer>,
}

impl IdWithIssuer {
    pub fn new(id: impl Into<String>, issuer: Option<Issuer>) -> Self {
        Self {
            id: id.into(),
            issuer,
        }
    }

    /// 缺少签发机构的一方视为匹配
    pub fn matches(&self, other: &IdWithIssuer) -> bool {
        if self.id != other.id {
            return false;
        }
        match (&self.issuer, &other.issuer) {
            (Some(a), Some(b)) => a.matches(b),
            _ => true,
        }
    }
}

impl fmt::Display for IdWithIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.issuer {
            Some(issuer) => write!(f, "{}^^^{}", self.id, issuer),
            None => write!(f, "{}", self.id),
        }
    }
}

/// 拒绝说明配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RejectionNote {
    pub label: String,
    pub code: Code,
    #[serde(default)]
    pub accept_previous_rejected_instance: AcceptPreviousRejectedInstance,
    /// 允许覆盖的先前拒绝代码
    #[serde(default)]
    pub overwrite_previous_rejection: Vec<Code>,
    #[serde(default)]
    pub revoke_rejection: bool,
}

impl RejectionNote {
    pub fn new(label: &str, code: Code, accept: AcceptPreviousRejectedInstance) -> Self {
        Self {
            label: label.to_string(),
            code,
            accept_previous_rejected_instance: accept,
            overwrite_previous_rejection: Vec::new(),
            revoke_rejection: false,
        }
    }

    pub fn with_overwrite(mut self, codes: &[Code]) -> Self {
        self.overwrite_previous_rejection = codes.to_vec();
        self
    }

    pub fn revoking(mut self) -> Self {
        self.revoke_rejection = true;
        self
    }

    pub fn can_overwrite_previous_rejection(&self, previous: &Code) -> bool {
        self.overwrite_previous_rejection.contains(previous)
    }
}

/// 存储写入结果，由物理存储层提供
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteResult {
    pub storage_id: String,
    pub storage_path: String,
    pub size: i64,
    /// 小写十六进制摘要
    pub digest: Option<String>,
    pub transfer_syntax_uid: String,
}

impl WriteResult {
    pub fn digest_equals(&self, other: Option<&str>) -> bool {
        match (self.digest.as_deref(), other) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_state_aggregation() {
        assert_eq!(RejectionState::from_counts(0, 0), RejectionState::None);
        assert_eq!(RejectionState::from_counts(0, 5), RejectionState::None);
        assert_eq!(RejectionState::from_counts(5, 0), RejectionState::Complete);
        assert_eq!(RejectionState::from_counts(1, 4), RejectionState::Partial);

        for n in 1..6u64 {
            for k in 0..=n {
                let expected = if k == 0 {
                    RejectionState::None
                } else if k == n {
                    RejectionState::Complete
                } else {
                    RejectionState::Partial
                };
                assert_eq!(RejectionState::from_counts(k, n - k), expected);
            }
        }
    }

    #[test]
    fn test_code_equality_ignores_meaning() {
        let a = Code::new("113001", "DCM", None, "Rejected for Quality Reasons");
        let b = Code::new("113001", "DCM", None, "Quality");
        let c = Code::new("113001", "99LOCAL", None, "Rejected for Quality Reasons");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_id_with_issuer_matching() {
        let plain = IdWithIssuer::new("P1", None);
        let hospital = IdWithIssuer::new(
            "P1",
            Some(Issuer {
                local_namespace_entity_id: Some("HOSPITAL".to_string()),
                ..Default::default()
            }),
        );
        let clinic = IdWithIssuer::new(
            "P1",
            Some(Issuer {
                local_namespace_entity_id: Some("CLINIC".to_string()),
                ..Default::default()
            }),
        );
        assert!(plain.matches(&hospital));
        assert!(hospital.matches(&hospital.clone()));
        assert!(!hospital.matches(&clinic));
        assert!(!plain.matches(&IdWithIssuer::new("P2", None)));
        assert_eq!(hospital.to_string(), "P1^^^HOSPITAL");
    }

    #[test]
    fn test_rejection_note_precedence() {
        let quality = Code::new("113001", "DCM", None, "Rejected for Quality Reasons");
        let safety = Code::new("113037", "DCM", None, "Rejected for Patient Safety Reasons");
        let note = RejectionNote::new("Patient Safety", safety, AcceptPreviousRejectedInstance::Reject)
            .with_overwrite(&[quality.clone()]);
        assert!(note.can_overwrite_previous_rejection(&quality));
        assert!(!note.can_overwrite_previous_rejection(&note.code));
    }

    #[test]
    fn test_digest_comparison() {
        let result = WriteResult {
            storage_id: "fs1".to_string(),
            storage_path: "a/b/c".to_string(),
            size: 10,
            digest: Some("ABCDEF".to_string()),
            transfer_syntax_uid: "1.2.840.10008.1.2.1".to_string(),
        };
        assert!(result.digest_equals(Some("abcdef")));
        assert!(!result.digest_equals(Some("abcd00")));
        assert!(!result.digest_equals(None));
    }
}

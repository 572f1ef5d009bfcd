//! 错误定义模块

use std::fmt;
use thiserror::Error;

/// PACS系统统一错误类型
#[derive(Error, Debug)]
pub enum PacsError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据库错误: {0}")]
    Database(String),

    /// 唯一约束冲突，调用方应重新执行整个入库流程
    #[error("唯一约束冲突: {0}")]
    UniqueViolation(String),

    #[error("DICOM处理错误: {0}")]
    Dicom(String),

    #[error("DICOM解析错误: {0}")]
    DicomParseError(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("系统内部错误: {0}")]
    Internal(String),

    /// 入库冲突，由协议层映射为传输相关的状态码
    #[error("{kind}: {detail}")]
    Conflict { kind: ConflictKind, detail: String },
}

impl PacsError {
    pub fn conflict(kind: ConflictKind, detail: impl Into<String>) -> Self {
        PacsError::Conflict {
            kind,
            detail: detail.into(),
        }
    }

    /// 是否为可重试的瞬时错误
    pub fn is_transient(&self) -> bool {
        matches!(self, PacsError::UniqueViolation(_))
    }

    pub fn conflict_kind(&self) -> Option<ConflictKind> {
        match self {
            PacsError::Conflict { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for PacsError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            // PostgreSQL unique_violation
            if db_err.code().as_deref() == Some("23505") {
                return PacsError::UniqueViolation(db_err.message().to_string());
            }
        }
        PacsError::Database(e.to_string())
    }
}

/// 入库冲突类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    DuplicateRejectionNote,
    SubsequentRejectedOccurrence,
    NoSuchInstance,
    ClassInstanceConflict,
    AlreadyRejected,
}

impl ConflictKind {
    /// 私有状态码 0xA770 - 0xA774
    pub fn status_code(&self) -> u16 {
        match self {
            ConflictKind::DuplicateRejectionNote => 0xA770,
            ConflictKind::SubsequentRejectedOccurrence => 0xA771,
            ConflictKind::NoSuchInstance => 0xA772,
            ConflictKind::ClassInstanceConflict => 0xA773,
            ConflictKind::AlreadyRejected => 0xA774,
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictKind::DuplicateRejectionNote => "重复的拒绝说明",
            ConflictKind::SubsequentRejectedOccurrence => "已拒绝对象再次出现",
            ConflictKind::NoSuchInstance => "拒绝失败: 实例不存在",
            ConflictKind::ClassInstanceConflict => "拒绝失败: SOP类与实例冲突",
            ConflictKind::AlreadyRejected => "拒绝失败: 实例已被拒绝",
        };
        write!(f, "{} ({:#06X})", name, self.status_code())
    }
}

/// PACS系统统一结果类型
pub type Result<T> = std::result::Result<T, PacsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_status_codes() {
        assert_eq!(ConflictKind::DuplicateRejectionNote.status_code(), 0xA770);
        assert_eq!(ConflictKind::AlreadyRejected.status_code(), 0xA774);

        let err = PacsError::conflict(ConflictKind::NoSuchInstance, "uid=1.2.3");
        assert_eq!(err.conflict_kind(), Some(ConflictKind::NoSuchInstance));
        assert!(!err.is_transient());
        assert!(err.to_string().contains("0xA772"));
    }

    #[test]
    fn test_unique_violation_is_transient() {
        let err = PacsError::UniqueViolation("instances_sop_instance_uid_key".to_string());
        assert!(err.is_transient());
        assert_eq!(err.conflict_kind(), None);
    }
}

//! 数据库模型
//!
//! 领域实体之间只通过 `Uuid` 键引用，不持有对象图。
//! `Db*` 结构为 PostgreSQL 行映射。

use chrono::{DateTime, Utc};
use pacs_core::models::*;
use pacs_dicom::Attributes;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// 患者
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub pid: Option<IdWithIssuer>,
    pub attributes: Attributes,
    /// 已合并到的目标患者
    pub merged_with: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    pub fn new(pid: Option<IdWithIssuer>, attributes: Attributes) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            pid,
            attributes,
            merged_with: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 检查
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Study {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub study_uid: String,
    pub attributes: Attributes,
    /// 保存过该检查内容的存储后端
    pub storage_ids: Vec<String>,
    pub rejection_state: RejectionState,
    pub access_control_id: Option<String>,
    pub issuer_of_accession_number: Option<Issuer>,
    pub procedure_codes: Vec<Code>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Study {
    pub fn new(patient_id: Uuid, study_uid: impl Into<String>, attributes: Attributes) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            patient_id,
            study_uid: study_uid.into(),
            attributes,
            storage_ids: Vec::new(),
            rejection_state: RejectionState::None,
            access_control_id: None,
            issuer_of_accession_number: None,
            procedure_codes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 追加存储后端ID，已存在时返回 false
    pub fn add_storage_id(&mut self, storage_id: &str) -> bool {
        if self.storage_ids.iter().any(|id| id == storage_id) {
            return false;
        }
        self.storage_ids.push(storage_id.to_string());
        true
    }
}

/// 系列请求属性 (Request Attributes Sequence 条目)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SeriesRequestAttributes {
    pub accession_number: Option<String>,
    pub issuer_of_accession_number: Option<Issuer>,
    pub requested_procedure_id: Option<String>,
    pub scheduled_procedure_step_id: Option<String>,
    pub study_instance_uid: Option<String>,
}

/// 系列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub id: Uuid,
    pub study_id: Uuid,
    pub series_uid: String,
    pub attributes: Attributes,
    /// 首次接收时的发送方AE
    pub source_aet: Option<String>,
    pub rejection_state: RejectionState,
    pub institution_code: Option<Code>,
    pub request_attributes: Vec<SeriesRequestAttributes>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Series {
    pub fn new(study_id: Uuid, series_uid: impl Into<String>, attributes: Attributes) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            study_id,
            series_uid: series_uid.into(),
            attributes,
            source_aet: None,
            rejection_state: RejectionState::None,
            institution_code: None,
            request_attributes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn modality(&self) -> Option<&str> {
        self.attributes.get_string(pacs_dicom::tags::MODALITY)
    }
}

/// 验证观察者
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VerifyingObserver {
    pub name: Option<String>,
    pub organization: Option<String>,
    pub verification_datetime: Option<String>,
    pub observer_code: Option<Code>,
}

/// 内容项，只保存 CODE 和 TEXT 类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "value_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentItem {
    Code {
        relationship_type: String,
        concept_name: Code,
        concept_code: Code,
    },
    Text {
        relationship_type: String,
        concept_name: Code,
        text_value: String,
    },
}

/// 实例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: Uuid,
    pub series_id: Uuid,
    pub sop_instance_uid: String,
    pub sop_class_uid: String,
    pub attributes: Attributes,
    pub concept_name_code: Option<Code>,
    /// 非空表示该实例已被拒绝
    pub rejection_note_code: Option<Code>,
    pub verifying_observers: Vec<VerifyingObserver>,
    pub content_items: Vec<ContentItem>,
    pub retrieve_aets: Vec<String>,
    pub availability: Availability,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    pub fn new(
        series_id: Uuid,
        sop_instance_uid: impl Into<String>,
        sop_class_uid: impl Into<String>,
        attributes: Attributes,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            series_id,
            sop_instance_uid: sop_instance_uid.into(),
            sop_class_uid: sop_class_uid.into(),
            attributes,
            concept_name_code: None,
            rejection_note_code: None,
            verifying_observers: Vec::new(),
            content_items: Vec::new(),
            retrieve_aets: Vec::new(),
            availability: Availability::Online,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.rejection_note_code.is_some()
    }
}

/// 存储位置，实例删除前先解除关联
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: Uuid,
    pub instance_id: Option<Uuid>,
    pub storage_id: String,
    pub storage_path: String,
    pub transfer_syntax_uid: String,
    pub size: i64,
    pub digest: Option<String>,
    pub status: LocationStatus,
    pub created_at: DateTime<Utc>,
}

impl Location {
    pub fn new(instance_id: Uuid, write: &WriteResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id: Some(instance_id),
            storage_id: write.storage_id.clone(),
            storage_path: write.storage_path.clone(),
            transfer_syntax_uid: write.transfer_syntax_uid.clone(),
            size: write.size,
            digest: write.digest.as_ref().map(|d| d.to_ascii_lowercase()),
            status: LocationStatus::Ok,
            created_at: Utc::now(),
        }
    }
}

/// 实例计数过滤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceFilter {
    All,
    Rejected,
    NotRejected,
}

impl InstanceFilter {
    pub fn accepts(&self, instance: &Instance) -> bool {
        match self {
            InstanceFilter::All => true,
            InstanceFilter::Rejected => instance.is_rejected(),
            InstanceFilter::NotRejected => !instance.is_rejected(),
        }
    }
}

/// 系列查询属性缓存
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SeriesQueryAttributes {
    pub series_id: Uuid,
    pub number_of_instances: i64,
    pub number_of_rejected_instances: i64,
}

/// 检查查询属性缓存
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct StudyQueryAttributes {
    pub study_id: Uuid,
    pub number_of_series: i64,
    pub number_of_instances: i64,
    pub modalities_in_study: Vec<String>,
}

// 数据库表模型 - 使用FromRow trait用于SQL查询

/// 数据库患者表
#[derive(Debug, FromRow)]
pub struct DbPatient {
    pub id: Uuid,
    pub pid: Option<Json<IdWithIssuer>>,
    pub pid_id: Option<String>,
    pub attributes: Json<Attributes>,
    pub merged_with: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbPatient> for Patient {
    fn from(row: DbPatient) -> Self {
        Patient {
            id: row.id,
            pid: row.pid.map(|j| j.0),
            attributes: row.attributes.0,
            merged_with: row.merged_with,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// 数据库检查表
#[derive(Debug, FromRow)]
pub struct DbStudy {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub study_uid: String,
    pub attributes: Json<Attributes>,
    pub storage_ids: Vec<String>,
    pub rejection_state: String,
    pub access_control_id: Option<String>,
    pub issuer_of_accession_number: Option<Json<Issuer>>,
    pub procedure_codes: Json<Vec<Code>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbStudy> for Study {
    fn from(row: DbStudy) -> Self {
        Study {
            id: row.id,
            patient_id: row.patient_id,
            study_uid: row.study_uid,
            attributes: row.attributes.0,
            storage_ids: row.storage_ids,
            rejection_state: RejectionState::parse(&row.rejection_state),
            access_control_id: row.access_control_id,
            issuer_of_accession_number: row.issuer_of_accession_number.map(|j| j.0),
            procedure_codes: row.procedure_codes.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// 数据库系列表
#[derive(Debug, FromRow)]
pub struct DbSeries {
    pub id: Uuid,
    pub study_id: Uuid,
    pub series_uid: String,
    pub attributes: Json<Attributes>,
    pub source_aet: Option<String>,
    pub rejection_state: String,
    pub institution_code: Option<Json<Code>>,
    pub request_attributes: Json<Vec<SeriesRequestAttributes>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbSeries> for Series {
    fn from(row: DbSeries) -> Self {
        Series {
            id: row.id,
            study_id: row.study_id,
            series_uid: row.series_uid,
            attributes: row.attributes.0,
            source_aet: row.source_aet,
            rejection_state: RejectionState::parse(&row.rejection_state),
            institution_code: row.institution_code.map(|j| j.0),
            request_attributes: row.request_attributes.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// 数据库实例表
#[derive(Debug, FromRow)]
pub struct DbInstance {
    pub id: Uuid,
    pub series_id: Uuid,
    pub sop_instance_uid: String,
    pub sop_class_uid: String,
    pub attributes: Json<Attributes>,
    pub concept_name_code: Option<Json<Code>>,
    pub rejection_note_code: Option<Json<Code>>,
    pub verifying_observers: Json<Vec<VerifyingObserver>>,
    pub content_items: Json<Vec<ContentItem>>,
    pub retrieve_aets: Vec<String>,
    pub availability: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbInstance> for Instance {
    fn from(row: DbInstance) -> Self {
        Instance {
            id: row.id,
            series_id: row.series_id,
            sop_instance_uid: row.sop_instance_uid,
            sop_class_uid: row.sop_class_uid,
            attributes: row.attributes.0,
            concept_name_code: row.concept_name_code.map(|j| j.0),
            rejection_note_code: row.rejection_note_code.map(|j| j.0),
            verifying_observers: row.verifying_observers.0,
            content_items: row.content_items.0,
            retrieve_aets: row.retrieve_aets,
            availability: Availability::parse(&row.availability),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// 数据库存储位置表
#[derive(Debug, FromRow)]
pub struct DbLocation {
    pub id: Uuid,
    pub instance_id: Option<Uuid>,
    pub storage_id: String,
    pub storage_path: String,
    pub transfer_syntax_uid: String,
    pub size: i64,
    pub digest: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl From<DbLocation> for Location {
    fn from(row: DbLocation) -> Self {
        Location {
            id: row.id,
            instance_id: row.instance_id,
            storage_id: row.storage_id,
            storage_path: row.storage_path,
            transfer_syntax_uid: row.transfer_syntax_uid,
            size: row.size,
            digest: row.digest,
            status: LocationStatus::parse(&row.status),
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_storage_id() {
        let mut study = Study::new(Uuid::new_v4(), "1.2.3", Attributes::new());
        assert!(study.add_storage_id("fs1"));
        assert!(!study.add_storage_id("fs1"));
        assert!(study.add_storage_id("fs2"));
        assert_eq!(study.storage_ids, vec!["fs1", "fs2"]);
    }

    #[test]
    fn test_location_normalizes_digest() {
        let write = WriteResult {
            storage_id: "fs1".to_string(),
            storage_path: "2024/01/01/obj".to_string(),
            size: 128,
            digest: Some("ABCDEF01".to_string()),
            transfer_syntax_uid: "1.2.840.10008.1.2.1".to_string(),
        };
        let instance_id = Uuid::new_v4();
        let location = Location::new(instance_id, &write);
        assert_eq!(location.instance_id, Some(instance_id));
        assert_eq!(location.digest.as_deref(), Some("abcdef01"));
        assert_eq!(location.status, LocationStatus::Ok);
    }

    #[test]
    fn test_content_item_serde() {
        let item = ContentItem::Text {
            relationship_type: "CONTAINS".to_string(),
            concept_name: Code::new("113011", "DCM", None, "Document Title Modifier"),
            text_value: "short".to_string(),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["value_type"], "TEXT");
        let back: ContentItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }
}

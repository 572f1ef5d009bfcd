//! 入库会话与上下文

use pacs_core::utils::is_valid_dicom_uid;
use pacs_core::{PacsError, Result, WriteResult};
use pacs_dicom::{tags, Attributes, Tag};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// 对象来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceKind {
    Dicom,
    Web,
    Hl7,
    File,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Dicom => "DICOM",
            SourceKind::Web => "WEB",
            SourceKind::Hl7 => "HL7",
            SourceKind::File => "FILE",
        };
        f.write_str(name)
    }
}

/// 入库会话，同一连接上的多次入库共享
///
/// 会话缓存已提交的检查与系列键，后续对象优先通过缓存定位。
#[derive(Debug, Clone)]
pub struct StoreSession {
    pub calling_aet: Option<String>,
    pub called_aet: String,
    pub source: SourceKind,
    studies: HashMap<String, Uuid>,
    series: HashMap<(String, String), Uuid>,
}

impl StoreSession {
    pub fn new(calling_aet: Option<&str>, called_aet: &str, source: SourceKind) -> Self {
        Self {
            calling_aet: calling_aet.map(str::to_string),
            called_aet: called_aet.to_string(),
            source,
            studies: HashMap::new(),
            series: HashMap::new(),
        }
    }

    pub fn cached_study(&self, study_uid: &str) -> Option<Uuid> {
        self.studies.get(study_uid).copied()
    }

    pub fn cached_series(&self, study_uid: &str, series_uid: &str) -> Option<Uuid> {
        self.series
            .get(&(study_uid.to_string(), series_uid.to_string()))
            .copied()
    }

    pub(crate) fn cache(&mut self, ctx: &StoreContext, study_id: Uuid, series_id: Uuid) {
        self.studies.insert(ctx.study_uid.clone(), study_id);
        self.series
            .insert((ctx.study_uid.clone(), ctx.series_uid.clone()), series_id);
    }
}

impl fmt::Display for StoreSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{}({})",
            self.calling_aet.as_deref().unwrap_or("*"),
            self.called_aet,
            self.source
        )
    }
}

/// 单个对象的入库上下文
#[derive(Debug, Clone)]
pub struct StoreContext {
    pub attributes: Attributes,
    pub study_uid: String,
    pub series_uid: String,
    pub sop_instance_uid: String,
    pub sop_class_uid: String,
    pub write_result: WriteResult,
}

fn required_uid(attrs: &Attributes, tag: Tag, name: &str) -> Result<String> {
    let uid = attrs
        .get_string(tag)
        .ok_or_else(|| PacsError::Validation(format!("缺少 {}", name)))?;
    if !is_valid_dicom_uid(uid) {
        return Err(PacsError::Validation(format!("无效的 {}: {}", name, uid)));
    }
    Ok(uid.to_string())
}

impl StoreContext {
    /// 从属性集提取对象标识
    pub fn new(attributes: Attributes, write_result: WriteResult) -> Result<Self> {
        let study_uid = required_uid(&attributes, tags::STUDY_INSTANCE_UID, "StudyInstanceUID")?;
        let series_uid = required_uid(&attributes, tags::SERIES_INSTANCE_UID, "SeriesInstanceUID")?;
        let sop_instance_uid = required_uid(&attributes, tags::SOP_INSTANCE_UID, "SOPInstanceUID")?;
        let sop_class_uid = required_uid(&attributes, tags::SOP_CLASS_UID, "SOPClassUID")?;
        Ok(Self {
            attributes,
            study_uid,
            series_uid,
            sop_instance_uid,
            sop_class_uid,
            write_result,
        })
    }
}

impl fmt::Display for StoreContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[study={}, series={}, sop={}]",
            self.study_uid, self.series_uid, self.sop_instance_uid
        )
    }
}

//! 拒绝说明处理
//!
//! 拒绝说明 (Key Object Selection) 通过 Current Requested Procedure Evidence
//! Sequence 引用被拒绝的实例。每个引用实例在同一事务内设置或清除拒绝代码，
//! 每个系列、每个检查处理完后按实例计数重新计算拒绝状态。

use crate::context::StoreContext;
use crate::hierarchy::{refresh_series_state, refresh_study_state};
use pacs_core::{ConflictKind, PacsError, RejectionNote, Result};
use pacs_database::{ArchiveTransaction, Instance};
use pacs_dicom::{tags, Attributes};
use tracing::{debug, info};
use uuid::Uuid;

/// 被引用的实例
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencedInstance {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
}

/// 按系列分组的引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencedSeries {
    pub series_uid: String,
    pub instances: Vec<ReferencedInstance>,
}

/// 按检查分组的引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencedStudy {
    pub study_uid: String,
    pub series: Vec<ReferencedSeries>,
}

fn required(item: &Attributes, tag: pacs_dicom::Tag, name: &str) -> Result<String> {
    item.get_string(tag)
        .map(str::to_string)
        .ok_or_else(|| PacsError::Validation(format!("拒绝说明的引用缺少 {}", name)))
}

/// 解析拒绝说明引用的检查、系列和实例
pub fn referenced_studies(attrs: &Attributes) -> Result<Vec<ReferencedStudy>> {
    let mut studies = Vec::new();
    for study_item in attrs
        .get_sequence(tags::CURRENT_REQUESTED_PROCEDURE_EVIDENCE_SEQUENCE)
        .unwrap_or(&[])
    {
        let study_uid = required(study_item, tags::STUDY_INSTANCE_UID, "StudyInstanceUID")?;
        let mut series = Vec::new();
        for series_item in study_item
            .get_sequence(tags::REFERENCED_SERIES_SEQUENCE)
            .unwrap_or(&[])
        {
            let series_uid = required(series_item, tags::SERIES_INSTANCE_UID, "SeriesInstanceUID")?;
            let mut instances = Vec::new();
            for sop_item in series_item
                .get_sequence(tags::REFERENCED_SOP_SEQUENCE)
                .unwrap_or(&[])
            {
                instances.push(ReferencedInstance {
                    sop_class_uid: required(
                        sop_item,
                        tags::REFERENCED_SOP_CLASS_UID,
                        "ReferencedSOPClassUID",
                    )?,
                    sop_instance_uid: required(
                        sop_item,
                        tags::REFERENCED_SOP_INSTANCE_UID,
                        "ReferencedSOPInstanceUID",
                    )?,
                });
            }
            series.push(ReferencedSeries {
                series_uid,
                instances,
            });
        }
        studies.push(ReferencedStudy { study_uid, series });
    }
    Ok(studies)
}

/// 对单个实例应用拒绝说明，返回是否修改
fn reject(note: &RejectionNote, instance: &mut Instance) -> Result<bool> {
    if let Some(previous) = &instance.rejection_note_code {
        if previous == &note.code && !note.revoke_rejection {
            debug!("实例 [{}] 已被 {} 拒绝", instance.sop_instance_uid, previous);
            return Ok(false);
        }
        if !note.can_overwrite_previous_rejection(previous) {
            return Err(PacsError::conflict(
                ConflictKind::AlreadyRejected,
                format!(
                    "实例 [{}] 已被 {} 拒绝，{} 不能覆盖",
                    instance.sop_instance_uid, previous, note.code
                ),
            ));
        }
    } else if note.revoke_rejection {
        return Ok(false);
    }

    instance.rejection_note_code = if note.revoke_rejection {
        None
    } else {
        Some(note.code.clone())
    };
    Ok(true)
}

/// 对拒绝说明引用的全部实例执行拒绝或撤销，返回实际修改过的实例
pub(crate) async fn apply_rejection_note(
    tx: &mut dyn ArchiveTransaction,
    ctx: &StoreContext,
    note: &RejectionNote,
) -> Result<Vec<Instance>> {
    let mut changed = Vec::new();
    for study in referenced_studies(&ctx.attributes)? {
        let mut study_id: Option<Uuid> = None;
        for series in &study.series {
            let mut series_id: Option<Uuid> = None;
            for referenced in &series.instances {
                let mut instance = tx
                    .find_instance_in_series(
                        &study.study_uid,
                        &series.series_uid,
                        &referenced.sop_instance_uid,
                    )
                    .await?
                    .ok_or_else(|| {
                        PacsError::conflict(
                            ConflictKind::NoSuchInstance,
                            format!(
                                "拒绝说明引用的实例不存在 [study={}, series={}, sop={}]",
                                study.study_uid, series.series_uid, referenced.sop_instance_uid
                            ),
                        )
                    })?;
                if instance.sop_class_uid != referenced.sop_class_uid {
                    return Err(PacsError::conflict(
                        ConflictKind::ClassInstanceConflict,
                        format!(
                            "拒绝说明引用的实例 [{}] SOP类 {} 与已存储的 {} 不一致",
                            referenced.sop_instance_uid,
                            referenced.sop_class_uid,
                            instance.sop_class_uid
                        ),
                    ));
                }
                series_id = Some(instance.series_id);
                if reject(note, &mut instance)? {
                    tx.update_instance(&instance).await?;
                    changed.push(instance);
                }
            }
            if let Some(series_id) = series_id {
                let series = refresh_series_state(tx, series_id).await?;
                study_id = Some(series.study_id);
            }
        }
        if let Some(study_id) = study_id {
            refresh_study_state(tx, study_id).await?;
        }
    }
    info!(
        "{} {} 个实例 ({}) {}",
        if note.revoke_rejection { "撤销拒绝" } else { "拒绝" },
        changed.len(),
        note.label,
        ctx
    );
    Ok(changed)
}

//! 测试用对象构造

use crate::context::StoreContext;
use pacs_core::{Code, WriteResult};
use pacs_dicom::code::code_to_item;
use pacs_dicom::{tags, Attributes, KEY_OBJECT_SELECTION_DOCUMENT_STORAGE};

pub const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
pub const STORAGE_ID: &str = "fs1";

pub fn patient_attrs(pid: &str) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.set_string(tags::PATIENT_ID, pid);
    attrs.set_string(tags::PATIENT_NAME, "Test^Patient");
    attrs
}

pub fn instance_attrs(study: &str, series: &str, sop: &str, pid: Option<&str>) -> Attributes {
    let mut attrs = match pid {
        Some(pid) => patient_attrs(pid),
        None => Attributes::new(),
    };
    attrs.set_string(tags::STUDY_INSTANCE_UID, study);
    attrs.set_string(tags::SERIES_INSTANCE_UID, series);
    attrs.set_string(tags::SOP_INSTANCE_UID, sop);
    attrs.set_string(tags::SOP_CLASS_UID, CT_IMAGE_STORAGE);
    attrs.set_string(tags::MODALITY, "CT");
    attrs
}

pub fn write_result(digest: &str) -> WriteResult {
    WriteResult {
        storage_id: STORAGE_ID.to_string(),
        storage_path: format!("objects/{}.dcm", digest),
        size: 1024,
        digest: Some(digest.to_string()),
        transfer_syntax_uid: "1.2.840.10008.1.2.1".to_string(),
    }
}

/// Current Requested Procedure Evidence Sequence 条目
pub fn evidence_item(study: &str, series: &str, sops: &[&str], sop_class: &str) -> Attributes {
    let sop_items = sops
        .iter()
        .map(|sop| {
            let mut item = Attributes::new();
            item.set_string(tags::REFERENCED_SOP_CLASS_UID, sop_class);
            item.set_string(tags::REFERENCED_SOP_INSTANCE_UID, *sop);
            item
        })
        .collect();
    let mut series_item = Attributes::new();
    series_item.set_string(tags::SERIES_INSTANCE_UID, series);
    series_item.set_sequence(tags::REFERENCED_SOP_SEQUENCE, sop_items);

    let mut study_item = Attributes::new();
    study_item.set_string(tags::STUDY_INSTANCE_UID, study);
    study_item.set_sequence(tags::REFERENCED_SERIES_SEQUENCE, vec![series_item]);
    study_item
}

/// 拒绝说明对象，引用按 (检查, 系列, 实例列表) 给出
pub fn rejection_note_attrs(
    study: &str,
    series: &str,
    sop: &str,
    code: &Code,
    refs: &[(&str, &str, &[&str])],
) -> Attributes {
    let mut attrs = patient_attrs("P1");
    attrs.set_string(tags::STUDY_INSTANCE_UID, study);
    attrs.set_string(tags::SERIES_INSTANCE_UID, series);
    attrs.set_string(tags::SOP_INSTANCE_UID, sop);
    attrs.set_string(tags::SOP_CLASS_UID, KEY_OBJECT_SELECTION_DOCUMENT_STORAGE);
    attrs.set_string(tags::MODALITY, "KO");
    attrs.set_sequence(tags::CONCEPT_NAME_CODE_SEQUENCE, vec![code_to_item(code)]);
    attrs.set_sequence(
        tags::CURRENT_REQUESTED_PROCEDURE_EVIDENCE_SEQUENCE,
        refs.iter()
            .map(|(study, series, sops)| evidence_item(study, series, sops, CT_IMAGE_STORAGE))
            .collect(),
    );
    attrs
}

pub fn rejection_context(
    study: &str,
    series: &str,
    sop: &str,
    code: &Code,
    refs: &[(&str, &str, &[&str])],
) -> StoreContext {
    let attrs = rejection_note_attrs(study, series, sop, code, refs);
    StoreContext::new(attrs, write_result(sop)).unwrap()
}

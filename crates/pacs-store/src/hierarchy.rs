//! 患者/检查/系列/实例层级的查找与创建

use crate::conf::StoreConfig;
use crate::context::{StoreContext, StoreSession};
use crate::patient::PatientService;
use crate::result::UpdateResult;
use pacs_core::{Code, PacsError, RejectionNote, RejectionState, Result};
use pacs_database::{
    ArchiveTransaction, ContentItem, Instance, InstanceFilter, Location, Patient, Series,
    SeriesRequestAttributes, Study, VerifyingObserver,
};
use pacs_dicom::code::{find_code, find_codes, find_issuer};
use pacs_dicom::{tags, AttributeFilter, Attributes};
use tracing::{debug, info};
use uuid::Uuid;

/// TEXT 内容项的最大长度
const MAX_TEXT_VALUE_LENGTH: usize = 64;

/// 按过滤器更新属性，返回是否有变化
fn update_attributes(
    entity: &str,
    uid: &str,
    attributes: &mut Attributes,
    filter: &AttributeFilter,
    incoming: &Attributes,
) -> bool {
    let policy = match filter.update_policy {
        Some(policy) => policy,
        None => return false,
    };
    let info = attributes.update_selected(policy, incoming, &filter.selection);
    if info.is_empty() {
        return false;
    }
    info!("更新{} [{}] 属性: {}", entity, uid, info);
    true
}

pub(crate) async fn update_patient(
    tx: &mut dyn ArchiveTransaction,
    config: &StoreConfig,
    mut patient: Patient,
    attrs: &Attributes,
) -> Result<Patient> {
    let uid = patient.pid.as_ref().map_or_else(String::new, |p| p.to_string());
    if update_attributes("患者", &uid, &mut patient.attributes, &config.patient_filter, attrs) {
        tx.update_patient(&patient).await?;
    }
    Ok(patient)
}

/// 派生字段取自 `attrs`：新建时为完整的入库属性，更新时为合并后的属性
fn derive_study_fields(study: &mut Study, attrs: &Attributes) {
    study.issuer_of_accession_number =
        find_issuer(attrs, tags::ISSUER_OF_ACCESSION_NUMBER_SEQUENCE);
    study.procedure_codes = find_codes(attrs, tags::PROCEDURE_CODE_SEQUENCE);
}

/// 查找或创建检查
pub(crate) async fn find_or_create_study(
    tx: &mut dyn ArchiveTransaction,
    config: &StoreConfig,
    patients: &dyn PatientService,
    session: &StoreSession,
    ctx: &StoreContext,
    result: &mut UpdateResult,
) -> Result<Study> {
    let mut existing = None;
    if let Some(id) = session.cached_study(&ctx.study_uid) {
        existing = tx.get_study(id).await?;
    }
    if existing.is_none() {
        existing = tx.find_study(&ctx.study_uid).await?;
    }

    if let Some(mut study) = existing {
        debug!("检查 [{}] 已存在", study.study_uid);
        let mut changed = study.add_storage_id(&ctx.write_result.storage_id);
        if update_attributes(
            "检查",
            &study.study_uid,
            &mut study.attributes,
            &config.study_filter,
            &ctx.attributes,
        ) {
            let merged = study.attributes.clone();
            derive_study_fields(&mut study, &merged);
            changed = true;
        }
        if changed {
            tx.update_study(&study).await?;
        }
        if let Some(patient) = tx.get_patient(study.patient_id).await? {
            update_patient(tx, config, patient, &ctx.attributes).await?;
        }
        return Ok(study);
    }

    let patient = match patients.find_patient(tx, &ctx.attributes).await? {
        Some(patient) => update_patient(tx, config, patient, &ctx.attributes).await?,
        None => {
            let patient = patients.create_patient(tx, &ctx.attributes).await?;
            result.created_patient = Some(patient.clone());
            patient
        }
    };

    let mut study = Study::new(
        patient.id,
        ctx.study_uid.clone(),
        ctx.attributes.select(&config.study_filter.selection),
    );
    study.add_storage_id(&ctx.write_result.storage_id);
    study.access_control_id = config.access_control_id.clone();
    derive_study_fields(&mut study, &ctx.attributes);
    tx.insert_study(&study).await?;
    info!("创建检查 [{}]", study.study_uid);
    result.created_study = Some(study.clone());
    Ok(study)
}

fn derive_series_fields(series: &mut Series, attrs: &Attributes) {
    series.institution_code = find_code(attrs, tags::INSTITUTION_CODE_SEQUENCE);
    series.request_attributes = attrs
        .get_sequence(tags::REQUEST_ATTRIBUTES_SEQUENCE)
        .unwrap_or(&[])
        .iter()
        .map(|item| SeriesRequestAttributes {
            accession_number: item.get_string(tags::ACCESSION_NUMBER).map(str::to_string),
            issuer_of_accession_number: find_issuer(item, tags::ISSUER_OF_ACCESSION_NUMBER_SEQUENCE),
            requested_procedure_id: item
                .get_string(tags::REQUESTED_PROCEDURE_ID)
                .map(str::to_string),
            scheduled_procedure_step_id: item
                .get_string(tags::SCHEDULED_PROCEDURE_STEP_ID)
                .map(str::to_string),
            study_instance_uid: item.get_string(tags::STUDY_INSTANCE_UID).map(str::to_string),
        })
        .collect();
}

/// 查找或创建系列，拒绝说明新建的系列初始即为 COMPLETE
pub(crate) async fn find_or_create_series(
    tx: &mut dyn ArchiveTransaction,
    config: &StoreConfig,
    session: &StoreSession,
    ctx: &StoreContext,
    study: &Study,
    rejection_note: Option<&RejectionNote>,
    result: &mut UpdateResult,
) -> Result<Series> {
    let mut existing = None;
    if let Some(id) = session.cached_series(&ctx.study_uid, &ctx.series_uid) {
        existing = tx.get_series(id).await?.filter(|s| s.study_id == study.id);
    }
    if existing.is_none() {
        existing = tx.find_series(study.id, &ctx.series_uid).await?;
    }

    if let Some(mut series) = existing {
        debug!("系列 [{}] 已存在", series.series_uid);
        if update_attributes(
            "系列",
            &series.series_uid,
            &mut series.attributes,
            &config.series_filter,
            &ctx.attributes,
        ) {
            let merged = series.attributes.clone();
            derive_series_fields(&mut series, &merged);
            tx.update_series(&series).await?;
        }
        return Ok(series);
    }

    let mut series = Series::new(
        study.id,
        ctx.series_uid.clone(),
        ctx.attributes.select(&config.series_filter.selection),
    );
    series.source_aet = session.calling_aet.clone();
    if rejection_note.is_some() {
        series.rejection_state = RejectionState::Complete;
    }
    derive_series_fields(&mut series, &ctx.attributes);
    tx.insert_series(&series).await?;
    info!("创建系列 [{}]", series.series_uid);
    result.created_series = Some(series.clone());
    Ok(series)
}

fn verifying_observers(attrs: &Attributes) -> Vec<VerifyingObserver> {
    attrs
        .get_sequence(tags::VERIFYING_OBSERVER_SEQUENCE)
        .unwrap_or(&[])
        .iter()
        .map(|item| VerifyingObserver {
            name: item.get_string(tags::VERIFYING_OBSERVER_NAME).map(str::to_string),
            organization: item.get_string(tags::VERIFYING_ORGANIZATION).map(str::to_string),
            verification_datetime: item
                .get_string(tags::VERIFICATION_DATE_TIME)
                .map(str::to_string),
            observer_code: find_code(item, tags::VERIFYING_OBSERVER_IDENTIFICATION_CODE_SEQUENCE),
        })
        .collect()
}

fn content_item(item: &Attributes) -> Option<ContentItem> {
    let relationship_type = item.get_string(tags::RELATIONSHIP_TYPE)?.to_ascii_uppercase();
    let concept_name = find_code(item, tags::CONCEPT_NAME_CODE_SEQUENCE)?;
    match item.get_string(tags::VALUE_TYPE)? {
        "CODE" => Some(ContentItem::Code {
            relationship_type,
            concept_name,
            concept_code: find_code(item, tags::CONCEPT_CODE_SEQUENCE)?,
        }),
        "TEXT" => {
            let text_value = item.get_string(tags::TEXT_VALUE).unwrap_or("*");
            if text_value.chars().count() > MAX_TEXT_VALUE_LENGTH {
                return None;
            }
            Some(ContentItem::Text {
                relationship_type,
                concept_name,
                text_value: text_value.to_string(),
            })
        }
        _ => None,
    }
}

/// 内容序列中可检索的 CODE 和 TEXT 条目
pub(crate) fn content_items(attrs: &Attributes) -> Vec<ContentItem> {
    attrs
        .get_sequence(tags::CONTENT_SEQUENCE)
        .unwrap_or(&[])
        .iter()
        .filter_map(content_item)
        .collect()
}

/// 创建实例及其存储位置
pub(crate) async fn create_instance(
    tx: &mut dyn ArchiveTransaction,
    config: &StoreConfig,
    session: &StoreSession,
    ctx: &StoreContext,
    series: &Series,
    concept_name_code: Option<Code>,
    rejection_note: Option<&RejectionNote>,
) -> Result<(Instance, Location)> {
    let mut instance = Instance::new(
        series.id,
        ctx.sop_instance_uid.clone(),
        ctx.sop_class_uid.clone(),
        ctx.attributes.select(&config.instance_filter.selection),
    );
    instance.concept_name_code = concept_name_code;
    instance.rejection_note_code = rejection_note.map(|note| note.code.clone());
    instance.verifying_observers = verifying_observers(&ctx.attributes);
    instance.content_items = content_items(&ctx.attributes);
    instance.retrieve_aets = if config.retrieve_aets.is_empty() {
        vec![session.called_aet.clone()]
    } else {
        config.retrieve_aets.clone()
    };
    instance.availability = config.instance_availability;
    tx.insert_instance(&instance).await?;

    let location = Location::new(instance.id, &ctx.write_result);
    tx.insert_location(&location).await?;
    info!("创建实例 {} 存储于 {}:{}", ctx, location.storage_id, location.storage_path);
    Ok((instance, location))
}

/// 按实例计数重新计算系列拒绝状态，并使查询属性缓存失效
pub(crate) async fn refresh_series_state(
    tx: &mut dyn ArchiveTransaction,
    series_id: Uuid,
) -> Result<Series> {
    let mut series = tx
        .get_series(series_id)
        .await?
        .ok_or_else(|| PacsError::NotFound(format!("系列不存在: {}", series_id)))?;
    let rejected = tx
        .count_instances_of_series(series_id, InstanceFilter::Rejected)
        .await?;
    let not_rejected = tx
        .count_instances_of_series(series_id, InstanceFilter::NotRejected)
        .await?;
    let state = RejectionState::from_counts(rejected, not_rejected);
    if series.rejection_state != state {
        debug!(
            "系列 [{}] 拒绝状态 {} -> {}",
            series.series_uid,
            series.rejection_state.as_str(),
            state.as_str()
        );
        series.rejection_state = state;
        tx.update_series(&series).await?;
    }
    tx.delete_series_query_attributes(series_id).await?;
    Ok(series)
}

/// 按实例计数重新计算检查拒绝状态，并使查询属性缓存失效
pub(crate) async fn refresh_study_state(
    tx: &mut dyn ArchiveTransaction,
    study_id: Uuid,
) -> Result<Study> {
    let mut study = tx
        .get_study(study_id)
        .await?
        .ok_or_else(|| PacsError::NotFound(format!("检查不存在: {}", study_id)))?;
    let rejected = tx
        .count_instances_of_study(study_id, InstanceFilter::Rejected)
        .await?;
    let not_rejected = tx
        .count_instances_of_study(study_id, InstanceFilter::NotRejected)
        .await?;
    let state = RejectionState::from_counts(rejected, not_rejected);
    if study.rejection_state != state {
        debug!(
            "检查 [{}] 拒绝状态 {} -> {}",
            study.study_uid,
            study.rejection_state.as_str(),
            state.as_str()
        );
        study.rejection_state = state;
        tx.update_study(&study).await?;
    }
    tx.delete_study_query_attributes(study_id).await?;
    Ok(study)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacs_dicom::code::code_to_item;

    fn content(value_type: &str, relationship: &str, extra: impl FnOnce(&mut Attributes)) -> Attributes {
        let mut item = Attributes::new();
        item.set_string(tags::VALUE_TYPE, value_type);
        item.set_string(tags::RELATIONSHIP_TYPE, relationship);
        item.set_sequence(
            tags::CONCEPT_NAME_CODE_SEQUENCE,
            vec![code_to_item(&Code::new("121071", "DCM", None, "Finding"))],
        );
        extra(&mut item);
        item
    }

    #[test]
    fn test_content_items_keep_code_and_short_text() {
        let code = content("CODE", "contains", |item| {
            item.set_sequence(
                tags::CONCEPT_CODE_SEQUENCE,
                vec![code_to_item(&Code::new("F-01", "SRT", None, "Normal"))],
            );
        });
        let text = content("TEXT", "CONTAINS", |item| item.set_string(tags::TEXT_VALUE, "ok"));
        let long_text = content("TEXT", "CONTAINS", |item| {
            item.set_string(tags::TEXT_VALUE, "x".repeat(65))
        });
        let code_without_value = content("CODE", "CONTAINS", |_| {});
        let num = content("NUM", "CONTAINS", |_| {});

        let mut attrs = Attributes::new();
        attrs.set_sequence(
            tags::CONTENT_SEQUENCE,
            vec![code, text, long_text, code_without_value, num],
        );

        let items = content_items(&attrs);
        assert_eq!(items.len(), 2);
        match &items[0] {
            ContentItem::Code { relationship_type, concept_code, .. } => {
                assert_eq!(relationship_type, "CONTAINS");
                assert_eq!(concept_code.value, "F-01");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&items[1], ContentItem::Text { text_value, .. } if text_value == "ok"));
    }

    #[test]
    fn test_text_item_without_value_defaults_to_wildcard() {
        let mut attrs = Attributes::new();
        attrs.set_sequence(tags::CONTENT_SEQUENCE, vec![content("TEXT", "HAS PROPERTIES", |_| {})]);
        let items = content_items(&attrs);
        assert!(matches!(&items[0], ContentItem::Text { text_value, .. } if text_value == "*"));
    }

    #[test]
    fn test_series_request_attributes() {
        let mut request = Attributes::new();
        request.set_string(tags::ACCESSION_NUMBER, "A1");
        request.set_string(tags::REQUESTED_PROCEDURE_ID, "RP1");
        let mut issuer = Attributes::new();
        issuer.set_string(tags::LOCAL_NAMESPACE_ENTITY_ID, "HOSPITAL");
        request.set_sequence(tags::ISSUER_OF_ACCESSION_NUMBER_SEQUENCE, vec![issuer]);

        let mut attrs = Attributes::new();
        attrs.set_sequence(tags::REQUEST_ATTRIBUTES_SEQUENCE, vec![request]);
        let mut series = Series::new(Uuid::new_v4(), "1.2.3", Attributes::new());
        derive_series_fields(&mut series, &attrs);

        assert_eq!(series.request_attributes.len(), 1);
        let request = &series.request_attributes[0];
        assert_eq!(request.accession_number.as_deref(), Some("A1"));
        assert_eq!(request.requested_procedure_id.as_deref(), Some("RP1"));
        assert_eq!(
            request
                .issuer_of_accession_number
                .as_ref()
                .and_then(|i| i.local_namespace_entity_id.as_deref()),
            Some("HOSPITAL")
        );
        assert!(request.scheduled_procedure_step_id.is_none());
    }
}

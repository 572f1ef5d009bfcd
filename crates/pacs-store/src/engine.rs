//! 入库引擎
//!
//! 每个对象在一个事务中完成：查找同标识旧实例并判定处理方式，
//! 执行拒绝说明，或者创建患者/检查/系列/实例层级。
//! 唯一约束冲突以 `PacsError::UniqueViolation` 返回，由调用方重新执行整个入库。

use crate::conf::StoreConfig;
use crate::context::{StoreContext, StoreSession};
use crate::decision::{decide, Decision, DecisionInput, DropReason};
use crate::hierarchy::{
    create_instance, find_or_create_series, find_or_create_study, refresh_series_state,
    refresh_study_state,
};
use crate::patient::{DefaultPatientService, PatientService};
use crate::reconcile::reconcile_created_patient;
use crate::rejection::apply_rejection_note;
use crate::result::UpdateResult;
use pacs_core::{LocationStatus, OverwritePolicy, PacsError, Result};
use pacs_database::{
    ArchiveRepository, ArchiveTransaction, Instance, InstanceFilter, Location, Series,
    SeriesQueryAttributes, Study, StudyQueryAttributes,
};
use pacs_dicom::code::find_code;
use pacs_dicom::{tags, KEY_OBJECT_SELECTION_DOCUMENT_STORAGE};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 入库服务
pub struct StoreService {
    repository: Arc<dyn ArchiveRepository>,
    patients: Arc<dyn PatientService>,
    config: StoreConfig,
}

impl StoreService {
    pub fn new(repository: Arc<dyn ArchiveRepository>, config: StoreConfig) -> Self {
        let patients = Arc::new(DefaultPatientService::new(config.patient_filter.clone()));
        Self {
            repository,
            patients,
            config,
        }
    }

    /// 替换患者身份服务
    pub fn with_patient_service(mut self, patients: Arc<dyn PatientService>) -> Self {
        self.patients = patients;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// 入库单个对象
    ///
    /// 失败时事务回滚，存档不变。新建患者时在提交后检查重复患者，
    /// 该步骤失败只记录警告。
    pub async fn ingest(&self, session: &mut StoreSession, ctx: &StoreContext) -> Result<UpdateResult> {
        debug!("{} 开始入库 {}", session, ctx);
        let mut tx = self.repository.begin().await?;
        let (mut result, keys) = match self.update_db(tx.as_mut(), session, ctx).await {
            Ok(updated) => updated,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("回滚事务失败: {}", rollback_err);
                }
                info!("{} 入库 {} 失败: {}", session, ctx, e);
                return Err(e);
            }
        };
        tx.commit().await?;

        if let Some((study_id, series_id)) = keys {
            session.cache(ctx, study_id, series_id);
        }

        if let Some(created) = result.created_patient.clone() {
            match reconcile_created_patient(self.repository.as_ref(), self.patients.as_ref(), &created)
                .await
            {
                Ok(true) => result.created_patient = None,
                Ok(false) => {}
                Err(e) => warn!("检查重复患者 {} 失败: {}", created.id, e),
            }
        }
        Ok(result)
    }

    /// 检查的查询属性，入库后失效的缓存在此重新计算
    pub async fn study_query_attributes(
        &self,
        study_uid: &str,
    ) -> Result<Option<StudyQueryAttributes>> {
        let mut tx = self.repository.begin().await?;
        let loaded = match tx.find_study(study_uid).await {
            Ok(Some(study)) => tx.study_query_attributes(study.id).await.map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        finish(tx, loaded).await
    }

    /// 系列的查询属性
    pub async fn series_query_attributes(
        &self,
        study_uid: &str,
        series_uid: &str,
    ) -> Result<Option<SeriesQueryAttributes>> {
        let mut tx = self.repository.begin().await?;
        let loaded = match tx.find_study(study_uid).await {
            Ok(Some(study)) => match tx.find_series(study.id, series_uid).await {
                Ok(Some(series)) => tx.series_query_attributes(series.id).await.map(Some),
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            },
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        finish(tx, loaded).await
    }

    async fn find_previous_instance(
        &self,
        tx: &mut dyn ArchiveTransaction,
        ctx: &StoreContext,
    ) -> Result<Option<Instance>> {
        match self.config.overwrite_policy {
            OverwritePolicy::Always | OverwritePolicy::SameSource => {
                tx.find_instance(&ctx.sop_instance_uid).await
            }
            OverwritePolicy::Never | OverwritePolicy::SameSourceAndSeries => {
                tx.find_instance_in_series(&ctx.study_uid, &ctx.series_uid, &ctx.sop_instance_uid)
                    .await
            }
        }
    }

    async fn update_db(
        &self,
        tx: &mut dyn ArchiveTransaction,
        session: &StoreSession,
        ctx: &StoreContext,
    ) -> Result<(UpdateResult, Option<(Uuid, Uuid)>)> {
        let mut result = UpdateResult::default();

        // 1. 同标识旧实例
        if let Some(previous) = self.find_previous_instance(tx, ctx).await? {
            let locations = tx.find_locations(previous.id).await?;
            let series = tx.get_series(previous.series_id).await?.ok_or_else(|| {
                PacsError::NotFound(format!("实例所属系列不存在: {}", previous.series_id))
            })?;
            let study = tx.get_study(series.study_id).await?.ok_or_else(|| {
                PacsError::NotFound(format!("系列所属检查不存在: {}", series.study_id))
            })?;
            result.previous_instance = Some(previous.clone());

            let input = DecisionInput {
                overwrite_policy: self.config.overwrite_policy,
                calling_aet: session.calling_aet.as_deref(),
                sop_class_uid: &ctx.sop_class_uid,
                digest: ctx.write_result.digest.as_deref(),
                previous: &previous,
                previous_locations: &locations,
                previous_source_aet: series.source_aet.as_deref(),
            };
            match decide(&input, &self.config) {
                Decision::Drop(reason) => {
                    info!("{} 忽略 {}: {}", session, ctx, reason);
                    result.dropped = Some(reason);
                    return Ok((result, None));
                }
                Decision::RevokeRejection(code) => {
                    let mut restored = previous;
                    restored.rejection_note_code = None;
                    tx.update_instance(&restored).await?;
                    refresh_series_state(tx, series.id).await?;
                    refresh_study_state(tx, study.id).await?;
                    info!("{} 接收到相同对象 {}，撤销拒绝 {}", session, ctx, code);
                    result.dropped = Some(DropReason::EqualDigest);
                    return Ok((result, None));
                }
                Decision::Conflict(kind, detail) => {
                    return Err(PacsError::conflict(kind, detail));
                }
                Decision::Replace => {
                    info!("{} 替换已存储的实例 {}", session, ctx);
                    self.delete_previous(tx, ctx, &previous, locations, series, study)
                        .await?;
                }
            }
        }

        // 2. 拒绝说明
        let concept_name_code = find_code(&ctx.attributes, tags::CONCEPT_NAME_CODE_SEQUENCE);
        let rejection_note = if ctx.sop_class_uid == KEY_OBJECT_SELECTION_DOCUMENT_STORAGE {
            concept_name_code
                .as_ref()
                .and_then(|code| self.config.rejection_note(code))
        } else {
            None
        };
        if let Some(note) = rejection_note {
            result.rejected_instances = apply_rejection_note(tx, ctx, note).await?;
            result.rejection_note = Some(note.clone());
            if note.revoke_rejection {
                return Ok((result, None));
            }
        }

        // 3. 患者/检查/系列/实例
        let study = find_or_create_study(
            tx,
            &self.config,
            self.patients.as_ref(),
            session,
            ctx,
            &mut result,
        )
        .await?;
        let series = find_or_create_series(
            tx,
            &self.config,
            session,
            ctx,
            &study,
            rejection_note,
            &mut result,
        )
        .await?;
        let (instance, location) = create_instance(
            tx,
            &self.config,
            session,
            ctx,
            &series,
            concept_name_code,
            rejection_note,
        )
        .await?;

        // 4. 拒绝状态与查询属性
        refresh_series_state(tx, series.id).await?;
        refresh_study_state(tx, study.id).await?;

        result.instance = Some(instance);
        result.location = Some(location);
        Ok((result, Some((study.id, series.id))))
    }

    /// 删除被替换的旧实例，旧实例位于其他系列时级联删除空系列和空检查
    async fn delete_previous(
        &self,
        tx: &mut dyn ArchiveTransaction,
        ctx: &StoreContext,
        previous: &Instance,
        locations: Vec<Location>,
        series: Series,
        study: Study,
    ) -> Result<()> {
        for location in &locations {
            tx.detach_location(location.id, LocationStatus::ToDelete).await?;
        }
        tx.delete_instance(previous.id).await?;
        debug!(
            "删除实例 [{}]，{} 个存储位置待删除",
            previous.sop_instance_uid,
            locations.len()
        );

        if study.study_uid == ctx.study_uid && series.series_uid == ctx.series_uid {
            return Ok(());
        }

        if tx
            .count_instances_of_series(series.id, InstanceFilter::All)
            .await?
            == 0
        {
            tx.delete_series_query_attributes(series.id).await?;
            tx.delete_series(series.id).await?;
            info!("删除空系列 [{}]", series.series_uid);
        } else {
            refresh_series_state(tx, series.id).await?;
        }

        if study.study_uid != ctx.study_uid && tx.count_series_of_study(study.id).await? == 0 {
            tx.delete_study_query_attributes(study.id).await?;
            tx.delete_study(study.id).await?;
            info!("删除空检查 [{}]", study.study_uid);
        } else {
            refresh_study_state(tx, study.id).await?;
        }
        Ok(())
    }
}

/// 成功时提交以保存重新计算的缓存，失败时回滚
async fn finish<T>(tx: Box<dyn ArchiveTransaction>, loaded: Result<T>) -> Result<T> {
    match loaded {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("回滚事务失败: {}", rollback_err);
            }
            Err(e)
        }
    }
}

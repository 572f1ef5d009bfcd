//! 内存存档仓库
//!
//! 事务独占整个存档状态并在副本上修改，提交时替换原状态。
//! 唯一约束和外键约束与PostgreSQL表结构保持一致。

use crate::models::*;
use crate::repository::{ArchiveRepository, ArchiveTransaction};
use async_trait::async_trait;
use chrono::Utc;
use pacs_core::{IdWithIssuer, LocationStatus, PacsError, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct ArchiveState {
    patients: HashMap<Uuid, Patient>,
    studies: HashMap<Uuid, Study>,
    series: HashMap<Uuid, Series>,
    instances: HashMap<Uuid, Instance>,
    locations: HashMap<Uuid, Location>,
    series_query: HashMap<Uuid, SeriesQueryAttributes>,
    study_query: HashMap<Uuid, StudyQueryAttributes>,
}

/// 存档内容统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepositoryStats {
    pub patients: usize,
    pub studies: usize,
    pub series: usize,
    pub instances: usize,
    /// 仍关联实例的存储位置
    pub attached_locations: usize,
    pub detached_locations: usize,
}

/// 内存存档仓库
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    state: Arc<Mutex<ArchiveState>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stats(&self) -> RepositoryStats {
        let state = self.state.lock().await;
        let attached_locations = state
            .locations
            .values()
            .filter(|l| l.instance_id.is_some())
            .count();
        RepositoryStats {
            patients: state.patients.len(),
            studies: state.studies.len(),
            series: state.series.len(),
            instances: state.instances.len(),
            attached_locations,
            detached_locations: state.locations.len() - attached_locations,
        }
    }
}

#[async_trait]
impl ArchiveRepository for MemoryRepository {
    async fn begin(&self) -> Result<Box<dyn ArchiveTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<ArchiveState>,
    working: ArchiveState,
}

fn not_found(kind: &str, id: Uuid) -> PacsError {
    PacsError::NotFound(format!("{} {}", kind, id))
}

fn foreign_key(detail: String) -> PacsError {
    PacsError::Database(format!("外键约束冲突: {}", detail))
}

impl MemoryTransaction {
    fn instances_of_series(&self, series_id: Uuid) -> impl Iterator<Item = &Instance> {
        self.working
            .instances
            .values()
            .filter(move |i| i.series_id == series_id)
    }

    fn series_ids_of_study(&self, study_id: Uuid) -> Vec<Uuid> {
        self.working
            .series
            .values()
            .filter(|s| s.study_id == study_id)
            .map(|s| s.id)
            .collect()
    }

    fn count_of_study(&self, study_id: Uuid, filter: InstanceFilter) -> u64 {
        self.series_ids_of_study(study_id)
            .into_iter()
            .map(|series_id| {
                self.instances_of_series(series_id)
                    .filter(|i| filter.accepts(i))
                    .count() as u64
            })
            .sum()
    }

    fn check_study_unique(&self, study: &Study) -> Result<()> {
        let duplicate = self
            .working
            .studies
            .values()
            .any(|s| s.id != study.id && s.study_uid == study.study_uid);
        if duplicate {
            return Err(PacsError::UniqueViolation(format!(
                "studies.study_uid={}",
                study.study_uid
            )));
        }
        if !self.working.patients.contains_key(&study.patient_id) {
            return Err(foreign_key(format!("studies.patient_id={}", study.patient_id)));
        }
        Ok(())
    }

    fn check_series_unique(&self, series: &Series) -> Result<()> {
        let duplicate = self.working.series.values().any(|s| {
            s.id != series.id && s.study_id == series.study_id && s.series_uid == series.series_uid
        });
        if duplicate {
            return Err(PacsError::UniqueViolation(format!(
                "series.series_uid={}",
                series.series_uid
            )));
        }
        if !self.working.studies.contains_key(&series.study_id) {
            return Err(foreign_key(format!("series.study_id={}", series.study_id)));
        }
        Ok(())
    }

    fn check_instance_unique(&self, instance: &Instance) -> Result<()> {
        let duplicate = self
            .working
            .instances
            .values()
            .any(|i| i.id != instance.id && i.sop_instance_uid == instance.sop_instance_uid);
        if duplicate {
            return Err(PacsError::UniqueViolation(format!(
                "instances.sop_instance_uid={}",
                instance.sop_instance_uid
            )));
        }
        if !self.working.series.contains_key(&instance.series_id) {
            return Err(foreign_key(format!("instances.series_id={}", instance.series_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl ArchiveTransaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn find_patients(&mut self, pid: &IdWithIssuer) -> Result<Vec<Patient>> {
        let mut patients: Vec<Patient> = self
            .working
            .patients
            .values()
            .filter(|p| p.pid.as_ref().map_or(false, |other| other.matches(pid)))
            .cloned()
            .collect();
        patients.sort_by_key(|p| p.created_at);
        Ok(patients)
    }

    async fn get_patient(&mut self, id: Uuid) -> Result<Option<Patient>> {
        Ok(self.working.patients.get(&id).cloned())
    }

    async fn insert_patient(&mut self, patient: &Patient) -> Result<()> {
        self.working.patients.insert(patient.id, patient.clone());
        Ok(())
    }

    async fn update_patient(&mut self, patient: &Patient) -> Result<()> {
        let entry = self
            .working
            .patients
            .get_mut(&patient.id)
            .ok_or_else(|| not_found("patient", patient.id))?;
        *entry = Patient {
            updated_at: Utc::now(),
            ..patient.clone()
        };
        Ok(())
    }

    async fn delete_patient(&mut self, id: Uuid) -> Result<()> {
        if self.working.studies.values().any(|s| s.patient_id == id) {
            return Err(foreign_key(format!("studies.patient_id={}", id)));
        }
        self.working.patients.remove(&id);
        Ok(())
    }

    async fn find_study(&mut self, study_uid: &str) -> Result<Option<Study>> {
        Ok(self
            .working
            .studies
            .values()
            .find(|s| s.study_uid == study_uid)
            .cloned())
    }

    async fn get_study(&mut self, id: Uuid) -> Result<Option<Study>> {
        Ok(self.working.studies.get(&id).cloned())
    }

    async fn find_studies_of_patient(&mut self, patient_id: Uuid) -> Result<Vec<Study>> {
        let mut studies: Vec<Study> = self
            .working
            .studies
            .values()
            .filter(|s| s.patient_id == patient_id)
            .cloned()
            .collect();
        studies.sort_by_key(|s| s.created_at);
        Ok(studies)
    }

    async fn insert_study(&mut self, study: &Study) -> Result<()> {
        self.check_study_unique(study)?;
        self.working.studies.insert(study.id, study.clone());
        Ok(())
    }

    async fn update_study(&mut self, study: &Study) -> Result<()> {
        if !self.working.studies.contains_key(&study.id) {
            return Err(not_found("study", study.id));
        }
        self.check_study_unique(study)?;
        self.working.studies.insert(
            study.id,
            Study {
                updated_at: Utc::now(),
                ..study.clone()
            },
        );
        Ok(())
    }

    async fn delete_study(&mut self, id: Uuid) -> Result<()> {
        if self.working.series.values().any(|s| s.study_id == id) {
            return Err(foreign_key(format!("series.study_id={}", id)));
        }
        self.working.studies.remove(&id);
        self.working.study_query.remove(&id);
        Ok(())
    }

    async fn count_series_of_study(&mut self, study_id: Uuid) -> Result<u64> {
        Ok(self.series_ids_of_study(study_id).len() as u64)
    }

    async fn find_series(&mut self, study_id: Uuid, series_uid: &str) -> Result<Option<Series>> {
        Ok(self
            .working
            .series
            .values()
            .find(|s| s.study_id == study_id && s.series_uid == series_uid)
            .cloned())
    }

    async fn get_series(&mut self, id: Uuid) -> Result<Option<Series>> {
        Ok(self.working.series.get(&id).cloned())
    }

    async fn insert_series(&mut self, series: &Series) -> Result<()> {
        self.check_series_unique(series)?;
        self.working.series.insert(series.id, series.clone());
        Ok(())
    }

    async fn update_series(&mut self, series: &Series) -> Result<()> {
        if !self.working.series.contains_key(&series.id) {
            return Err(not_found("series", series.id));
        }
        self.check_series_unique(series)?;
        self.working.series.insert(
            series.id,
            Series {
                updated_at: Utc::now(),
                ..series.clone()
            },
        );
        Ok(())
    }

    async fn delete_series(&mut self, id: Uuid) -> Result<()> {
        if self.working.instances.values().any(|i| i.series_id == id) {
            return Err(foreign_key(format!("instances.series_id={}", id)));
        }
        self.working.series.remove(&id);
        self.working.series_query.remove(&id);
        Ok(())
    }

    async fn count_instances_of_series(
        &mut self,
        series_id: Uuid,
        filter: InstanceFilter,
    ) -> Result<u64> {
        Ok(self
            .instances_of_series(series_id)
            .filter(|i| filter.accepts(i))
            .count() as u64)
    }

    async fn count_instances_of_study(
        &mut self,
        study_id: Uuid,
        filter: InstanceFilter,
    ) -> Result<u64> {
        Ok(self.count_of_study(study_id, filter))
    }

    async fn find_instance(&mut self, sop_instance_uid: &str) -> Result<Option<Instance>> {
        Ok(self
            .working
            .instances
            .values()
            .find(|i| i.sop_instance_uid == sop_instance_uid)
            .cloned())
    }

    async fn find_instance_in_series(
        &mut self,
        study_uid: &str,
        series_uid: &str,
        sop_instance_uid: &str,
    ) -> Result<Option<Instance>> {
        let state = &self.working;
        Ok(state
            .instances
            .values()
            .find(|i| {
                i.sop_instance_uid == sop_instance_uid
                    && state.series.get(&i.series_id).map_or(false, |series| {
                        series.series_uid == series_uid
                            && state
                                .studies
                                .get(&series.study_id)
                                .map_or(false, |study| study.study_uid == study_uid)
                    })
            })
            .cloned())
    }

    async fn insert_instance(&mut self, instance: &Instance) -> Result<()> {
        self.check_instance_unique(instance)?;
        self.working.instances.insert(instance.id, instance.clone());
        Ok(())
    }

    async fn update_instance(&mut self, instance: &Instance) -> Result<()> {
        if !self.working.instances.contains_key(&instance.id) {
            return Err(not_found("instance", instance.id));
        }
        self.check_instance_unique(instance)?;
        self.working.instances.insert(
            instance.id,
            Instance {
                updated_at: Utc::now(),
                ..instance.clone()
            },
        );
        Ok(())
    }

    async fn delete_instance(&mut self, id: Uuid) -> Result<()> {
        if self
            .working
            .locations
            .values()
            .any(|l| l.instance_id == Some(id))
        {
            return Err(foreign_key(format!("locations.instance_id={}", id)));
        }
        self.working.instances.remove(&id);
        Ok(())
    }

    async fn find_locations(&mut self, instance_id: Uuid) -> Result<Vec<Location>> {
        let mut locations: Vec<Location> = self
            .working
            .locations
            .values()
            .filter(|l| l.instance_id == Some(instance_id))
            .cloned()
            .collect();
        locations.sort_by_key(|l| l.created_at);
        Ok(locations)
    }

    async fn insert_location(&mut self, location: &Location) -> Result<()> {
        if let Some(instance_id) = location.instance_id {
            if !self.working.instances.contains_key(&instance_id) {
                return Err(foreign_key(format!("locations.instance_id={}", instance_id)));
            }
        }
        self.working.locations.insert(location.id, location.clone());
        Ok(())
    }

    async fn detach_location(&mut self, location_id: Uuid, status: LocationStatus) -> Result<()> {
        let location = self
            .working
            .locations
            .get_mut(&location_id)
            .ok_or_else(|| not_found("location", location_id))?;
        location.instance_id = None;
        location.status = status;
        Ok(())
    }

    async fn find_locations_by_status(&mut self, status: LocationStatus) -> Result<Vec<Location>> {
        Ok(self
            .working
            .locations
            .values()
            .filter(|l| l.status == status)
            .cloned()
            .collect())
    }

    async fn series_query_attributes(&mut self, series_id: Uuid) -> Result<SeriesQueryAttributes> {
        if let Some(cached) = self.working.series_query.get(&series_id) {
            return Ok(cached.clone());
        }
        if !self.working.series.contains_key(&series_id) {
            return Err(not_found("series", series_id));
        }
        let attrs = SeriesQueryAttributes {
            series_id,
            number_of_instances: self
                .instances_of_series(series_id)
                .filter(|i| !i.is_rejected())
                .count() as i64,
            number_of_rejected_instances: self
                .instances_of_series(series_id)
                .filter(|i| i.is_rejected())
                .count() as i64,
        };
        self.working.series_query.insert(series_id, attrs.clone());
        Ok(attrs)
    }

    async fn study_query_attributes(&mut self, study_id: Uuid) -> Result<StudyQueryAttributes> {
        if let Some(cached) = self.working.study_query.get(&study_id) {
            return Ok(cached.clone());
        }
        if !self.working.studies.contains_key(&study_id) {
            return Err(not_found("study", study_id));
        }
        let series_ids = self.series_ids_of_study(study_id);
        let modalities: BTreeSet<String> = series_ids
            .iter()
            .filter_map(|id| self.working.series.get(id))
            .filter_map(|s| s.modality().map(str::to_string))
            .collect();
        let attrs = StudyQueryAttributes {
            study_id,
            number_of_series: series_ids.len() as i64,
            number_of_instances: self.count_of_study(study_id, InstanceFilter::NotRejected) as i64,
            modalities_in_study: modalities.into_iter().collect(),
        };
        self.working.study_query.insert(study_id, attrs.clone());
        Ok(attrs)
    }

    async fn delete_series_query_attributes(&mut self, series_id: Uuid) -> Result<()> {
        self.working.series_query.remove(&series_id);
        Ok(())
    }

    async fn delete_study_query_attributes(&mut self, study_id: Uuid) -> Result<()> {
        self.working.study_query.remove(&study_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacs_dicom::{tags, Attributes};

    async fn seed(tx: &mut Box<dyn ArchiveTransaction>) -> (Patient, Study, Series) {
        let patient = Patient::new(Some(IdWithIssuer::new("P1", None)), Attributes::new());
        tx.insert_patient(&patient).await.unwrap();
        let study = Study::new(patient.id, "1.2.3", Attributes::new());
        tx.insert_study(&study).await.unwrap();
        let mut attrs = Attributes::new();
        attrs.set_string(tags::MODALITY, "CT");
        let series = Series::new(study.id, "1.2.3.4", attrs);
        tx.insert_series(&series).await.unwrap();
        (patient, study, series)
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let repo = MemoryRepository::new();
        let mut tx = repo.begin().await.unwrap();
        seed(&mut tx).await;
        tx.rollback().await.unwrap();
        assert_eq!(repo.stats().await, RepositoryStats::default());

        let mut tx = repo.begin().await.unwrap();
        seed(&mut tx).await;
        tx.commit().await.unwrap();
        let stats = repo.stats().await;
        assert_eq!((stats.patients, stats.studies, stats.series), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_unique_constraints() {
        let repo = MemoryRepository::new();
        let mut tx = repo.begin().await.unwrap();
        let (patient, _study, series) = seed(&mut tx).await;

        let err = tx
            .insert_study(&Study::new(patient.id, "1.2.3", Attributes::new()))
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let instance = Instance::new(series.id, "1.2.3.4.5", "1.2.840.10008.5.1.4.1.1.2", Attributes::new());
        tx.insert_instance(&instance).await.unwrap();
        let dup = Instance::new(series.id, "1.2.3.4.5", "1.2.840.10008.5.1.4.1.1.2", Attributes::new());
        assert!(matches!(
            tx.insert_instance(&dup).await,
            Err(PacsError::UniqueViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_instance_delete_requires_detached_locations() {
        let repo = MemoryRepository::new();
        let mut tx = repo.begin().await.unwrap();
        let (_patient, study, series) = seed(&mut tx).await;
        let mut instance = Instance::new(series.id, "1.2.3.4.5", "1.2.840.10008.5.1.4.1.1.2", Attributes::new());
        tx.insert_instance(&instance).await.unwrap();
        let write = pacs_core::WriteResult {
            storage_id: "fs1".to_string(),
            storage_path: "a/b".to_string(),
            size: 1,
            digest: None,
            transfer_syntax_uid: "1.2.840.10008.1.2.1".to_string(),
        };
        let location = Location::new(instance.id, &write);
        tx.insert_location(&location).await.unwrap();

        assert!(tx.delete_instance(instance.id).await.is_err());
        assert!(tx.delete_series(series.id).await.is_err());

        instance.rejection_note_code = Some(pacs_core::Code::new("113001", "DCM", None, "Quality"));
        tx.update_instance(&instance).await.unwrap();
        let series_attrs = tx.series_query_attributes(series.id).await.unwrap();
        assert_eq!(series_attrs.number_of_rejected_instances, 1);
        let study_attrs = tx.study_query_attributes(study.id).await.unwrap();
        assert_eq!(study_attrs.number_of_instances, 0);
        assert_eq!(study_attrs.modalities_in_study, vec!["CT"]);

        tx.detach_location(location.id, LocationStatus::ToDelete)
            .await
            .unwrap();
        tx.delete_instance(instance.id).await.unwrap();
        assert_eq!(
            tx.find_locations_by_status(LocationStatus::ToDelete)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_find_instance_in_series() {
        let repo = MemoryRepository::new();
        let mut tx = repo.begin().await.unwrap();
        let (_patient, _study, series) = seed(&mut tx).await;
        let instance = Instance::new(series.id, "1.2.3.4.5", "1.2.840.10008.5.1.4.1.1.2", Attributes::new());
        tx.insert_instance(&instance).await.unwrap();

        assert!(tx
            .find_instance_in_series("1.2.3", "1.2.3.4", "1.2.3.4.5")
            .await
            .unwrap()
            .is_some());
        assert!(tx
            .find_instance_in_series("1.2.3", "9.9", "1.2.3.4.5")
            .await
            .unwrap()
            .is_none());
    }
}

//! 重复患者合并
//!
//! 并发入库可能为同一患者ID各自创建患者记录。提交后重新查询，
//! 恰好存在两条记录时把新建患者的检查移到另一条记录并删除新建患者，
//! 其余情况只记录警告。

use crate::patient::PatientService;
use pacs_core::Result;
use pacs_database::{ArchiveRepository, Patient};
use tracing::{info, warn};

/// 在独立事务中检查新建患者是否重复，已合并时返回 true
pub async fn reconcile_created_patient(
    repository: &dyn ArchiveRepository,
    patients: &dyn PatientService,
    created: &Patient,
) -> Result<bool> {
    let pid = match &created.pid {
        Some(pid) => pid,
        None => return Ok(false),
    };

    let mut tx = repository.begin().await?;
    let matches = patients.find_patients(tx.as_mut(), pid).await?;
    if !matches.iter().any(|p| p.id == created.id) {
        tx.rollback().await?;
        return Ok(false);
    }

    match matches.len() {
        1 => {
            tx.rollback().await?;
            Ok(false)
        }
        2 => {
            let other = match matches.iter().find(|p| p.id != created.id) {
                Some(other) => other,
                None => {
                    tx.rollback().await?;
                    return Ok(false);
                }
            };
            if other.merged_with.is_some() {
                warn!(
                    "患者 {} 存在重复记录 {} 和 {}，后者已被合并，保留两条记录",
                    pid, created.id, other.id
                );
                tx.rollback().await?;
                return Ok(false);
            }

            let studies = tx.find_studies_of_patient(created.id).await?;
            for mut study in studies {
                study.patient_id = other.id;
                tx.update_study(&study).await?;
            }
            tx.delete_patient(created.id).await?;
            tx.commit().await?;
            info!("合并重复患者 {}: {} -> {}", pid, created.id, other.id);
            Ok(true)
        }
        n => {
            warn!("患者 {} 存在 {} 条重复记录，不自动合并", pid, n);
            tx.rollback().await?;
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patient::DefaultPatientService;
    use crate::test_support::patient_attrs;
    use pacs_database::{MemoryRepository, Study};
    use pacs_dicom::{AttributeFilter, Attributes};

    async fn create_patient_with_study(
        repo: &MemoryRepository,
        service: &DefaultPatientService,
        pid: &str,
        study_uid: &str,
    ) -> Patient {
        let mut tx = repo.begin().await.unwrap();
        let patient = service
            .create_patient(tx.as_mut(), &patient_attrs(pid))
            .await
            .unwrap();
        tx.insert_study(&Study::new(patient.id, study_uid, Attributes::new()))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        patient
    }

    #[tokio::test]
    async fn test_two_duplicates_are_merged() {
        let repo = MemoryRepository::new();
        let service = DefaultPatientService::new(AttributeFilter::patient());
        let first = create_patient_with_study(&repo, &service, "P1", "1.2.1").await;
        let second = create_patient_with_study(&repo, &service, "P1", "1.2.2").await;

        assert!(reconcile_created_patient(&repo, &service, &second).await.unwrap());

        let mut tx = repo.begin().await.unwrap();
        assert!(tx.get_patient(second.id).await.unwrap().is_none());
        assert_eq!(tx.find_studies_of_patient(first.id).await.unwrap().len(), 2);
        // 再次执行无副作用
        drop(tx);
        assert!(!reconcile_created_patient(&repo, &service, &second).await.unwrap());
    }

    #[tokio::test]
    async fn test_merged_duplicate_is_kept() {
        let repo = MemoryRepository::new();
        let service = DefaultPatientService::new(AttributeFilter::patient());
        let target = create_patient_with_study(&repo, &service, "P9", "1.2.9").await;
        let first = create_patient_with_study(&repo, &service, "P1", "1.2.1").await;
        let mut tx = repo.begin().await.unwrap();
        let mut merged = tx.get_patient(first.id).await.unwrap().unwrap();
        merged.merged_with = Some(target.id);
        tx.update_patient(&merged).await.unwrap();
        tx.commit().await.unwrap();

        let second = create_patient_with_study(&repo, &service, "P1", "1.2.2").await;
        assert!(!reconcile_created_patient(&repo, &service, &second).await.unwrap());
        assert_eq!(repo.stats().await.patients, 3);
    }

    #[tokio::test]
    async fn test_more_than_two_duplicates_are_left_alone() {
        let repo = MemoryRepository::new();
        let service = DefaultPatientService::new(AttributeFilter::patient());
        create_patient_with_study(&repo, &service, "P1", "1.2.1").await;
        create_patient_with_study(&repo, &service, "P1", "1.2.2").await;
        let third = create_patient_with_study(&repo, &service, "P1", "1.2.3").await;

        assert!(!reconcile_created_patient(&repo, &service, &third).await.unwrap());
        assert_eq!(repo.stats().await.patients, 3);
    }
}

//! 患者身份服务

use async_trait::async_trait;
use pacs_core::{IdWithIssuer, PacsError, Result};
use pacs_database::{ArchiveTransaction, Patient};
use pacs_dicom::code::id_with_issuer;
use pacs_dicom::{AttributeFilter, Attributes};
use std::collections::HashSet;
use tracing::{debug, warn};

/// 患者查找与创建，引擎通过该接口解析检查所属患者
#[async_trait]
pub trait PatientService: Send + Sync {
    /// 按患者ID及签发机构查找，沿合并链返回最终患者
    async fn find_patient(
        &self,
        tx: &mut dyn ArchiveTransaction,
        attrs: &Attributes,
    ) -> Result<Option<Patient>>;

    async fn create_patient(
        &self,
        tx: &mut dyn ArchiveTransaction,
        attrs: &Attributes,
    ) -> Result<Patient>;

    /// 与给定ID匹配的全部患者记录
    async fn find_patients(
        &self,
        tx: &mut dyn ArchiveTransaction,
        pid: &IdWithIssuer,
    ) -> Result<Vec<Patient>>;
}

/// 默认患者服务
#[derive(Debug, Clone)]
pub struct DefaultPatientService {
    filter: AttributeFilter,
}

impl DefaultPatientService {
    pub fn new(filter: AttributeFilter) -> Self {
        Self { filter }
    }

    async fn follow_merged_with(
        &self,
        tx: &mut dyn ArchiveTransaction,
        mut patient: Patient,
    ) -> Result<Patient> {
        let mut visited = HashSet::new();
        visited.insert(patient.id);
        while let Some(target) = patient.merged_with {
            if !visited.insert(target) {
                return Err(PacsError::Internal(format!(
                    "患者合并链存在循环: {}",
                    target
                )));
            }
            patient = tx.get_patient(target).await?.ok_or_else(|| {
                PacsError::NotFound(format!("合并目标患者不存在: {}", target))
            })?;
        }
        Ok(patient)
    }
}

#[async_trait]
impl PatientService for DefaultPatientService {
    async fn find_patient(
        &self,
        tx: &mut dyn ArchiveTransaction,
        attrs: &Attributes,
    ) -> Result<Option<Patient>> {
        let pid = match id_with_issuer(attrs) {
            Some(pid) => pid,
            None => return Ok(None),
        };
        let mut patients = tx.find_patients(&pid).await?;
        if patients.is_empty() {
            debug!("未找到患者 {}", pid);
            return Ok(None);
        }
        if patients.len() > 1 {
            warn!("找到 {} 个与 {} 匹配的患者，使用最早创建的记录", patients.len(), pid);
        }
        let patient = patients.remove(0);
        self.follow_merged_with(tx, patient).await.map(Some)
    }

    async fn create_patient(
        &self,
        tx: &mut dyn ArchiveTransaction,
        attrs: &Attributes,
    ) -> Result<Patient> {
        let patient = Patient::new(id_with_issuer(attrs), attrs.select(&self.filter.selection));
        tx.insert_patient(&patient).await?;
        debug!(
            "创建患者 {}",
            patient.pid.as_ref().map_or_else(|| "<无ID>".to_string(), |p| p.to_string())
        );
        Ok(patient)
    }

    async fn find_patients(
        &self,
        tx: &mut dyn ArchiveTransaction,
        pid: &IdWithIssuer,
    ) -> Result<Vec<Patient>> {
        tx.find_patients(pid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::patient_attrs;
    use pacs_database::{ArchiveRepository, MemoryRepository};

    #[tokio::test]
    async fn test_find_or_create_patient() {
        let repo = MemoryRepository::new();
        let service = DefaultPatientService::new(AttributeFilter::patient());
        let attrs = patient_attrs("P1");

        let mut tx = repo.begin().await.unwrap();
        assert!(service.find_patient(tx.as_mut(), &attrs).await.unwrap().is_none());
        let created = service.create_patient(tx.as_mut(), &attrs).await.unwrap();
        let found = service.find_patient(tx.as_mut(), &attrs).await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_patient_without_id_is_never_matched() {
        let repo = MemoryRepository::new();
        let service = DefaultPatientService::new(AttributeFilter::patient());
        let attrs = Attributes::new();

        let mut tx = repo.begin().await.unwrap();
        service.create_patient(tx.as_mut(), &attrs).await.unwrap();
        assert!(service.find_patient(tx.as_mut(), &attrs).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_follow_merge_chain() {
        let repo = MemoryRepository::new();
        let service = DefaultPatientService::new(AttributeFilter::patient());

        let mut tx = repo.begin().await.unwrap();
        let target = service
            .create_patient(tx.as_mut(), &patient_attrs("P2"))
            .await
            .unwrap();
        let mut merged = service
            .create_patient(tx.as_mut(), &patient_attrs("P1"))
            .await
            .unwrap();
        merged.merged_with = Some(target.id);
        tx.update_patient(&merged).await.unwrap();

        let found = service
            .find_patient(tx.as_mut(), &patient_attrs("P1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, target.id);
    }

    #[tokio::test]
    async fn test_merge_cycle_is_an_error() {
        let repo = MemoryRepository::new();
        let service = DefaultPatientService::new(AttributeFilter::patient());

        let mut tx = repo.begin().await.unwrap();
        let mut a = service.create_patient(tx.as_mut(), &patient_attrs("PA")).await.unwrap();
        let mut b = service.create_patient(tx.as_mut(), &patient_attrs("PB")).await.unwrap();
        a.merged_with = Some(b.id);
        b.merged_with = Some(a.id);
        tx.update_patient(&a).await.unwrap();
        tx.update_patient(&b).await.unwrap();

        let err = service
            .find_patient(tx.as_mut(), &patient_attrs("PA"))
            .await
            .unwrap_err();
        assert!(matches!(err, PacsError::Internal(_)));
    }
}

//! 存档仓库接口
//!
//! 每次入库使用一个事务；唯一约束冲突以 `PacsError::UniqueViolation`
//! 返回，由调用方决定是否重新执行。

use crate::models::*;
use async_trait::async_trait;
use pacs_core::{IdWithIssuer, LocationStatus, Result};
use uuid::Uuid;

/// 存档仓库
#[async_trait]
pub trait ArchiveRepository: Send + Sync {
    /// 开始新事务
    async fn begin(&self) -> Result<Box<dyn ArchiveTransaction>>;
}

/// 存档事务，未提交即丢弃时所有修改回滚
#[async_trait]
pub trait ArchiveTransaction: Send {
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;

    // ========== 患者 ==========

    /// 按患者ID及签发机构查找，缺少签发机构的一方视为匹配
    async fn find_patients(&mut self, pid: &IdWithIssuer) -> Result<Vec<Patient>>;
    async fn get_patient(&mut self, id: Uuid) -> Result<Option<Patient>>;
    async fn insert_patient(&mut self, patient: &Patient) -> Result<()>;
    async fn update_patient(&mut self, patient: &Patient) -> Result<()>;
    async fn delete_patient(&mut self, id: Uuid) -> Result<()>;

    // ========== 检查 ==========

    async fn find_study(&mut self, study_uid: &str) -> Result<Option<Study>>;
    async fn get_study(&mut self, id: Uuid) -> Result<Option<Study>>;
    async fn find_studies_of_patient(&mut self, patient_id: Uuid) -> Result<Vec<Study>>;
    async fn insert_study(&mut self, study: &Study) -> Result<()>;
    async fn update_study(&mut self, study: &Study) -> Result<()>;
    async fn delete_study(&mut self, id: Uuid) -> Result<()>;
    async fn count_series_of_study(&mut self, study_id: Uuid) -> Result<u64>;

    // ========== 系列 ==========

    async fn find_series(&mut self, study_id: Uuid, series_uid: &str) -> Result<Option<Series>>;
    async fn get_series(&mut self, id: Uuid) -> Result<Option<Series>>;
    async fn insert_series(&mut self, series: &Series) -> Result<()>;
    async fn update_series(&mut self, series: &Series) -> Result<()>;
    async fn delete_series(&mut self, id: Uuid) -> Result<()>;

    async fn count_instances_of_series(
        &mut self,
        series_id: Uuid,
        filter: InstanceFilter,
    ) -> Result<u64>;
    async fn count_instances_of_study(
        &mut self,
        study_id: Uuid,
        filter: InstanceFilter,
    ) -> Result<u64>;

    // ========== 实例 ==========

    async fn find_instance(&mut self, sop_instance_uid: &str) -> Result<Option<Instance>>;
    async fn find_instance_in_series(
        &mut self,
        study_uid: &str,
        series_uid: &str,
        sop_instance_uid: &str,
    ) -> Result<Option<Instance>>;
    async fn insert_instance(&mut self, instance: &Instance) -> Result<()>;
    async fn update_instance(&mut self, instance: &Instance) -> Result<()>;
    /// 仍有关联存储位置时失败
    async fn delete_instance(&mut self, id: Uuid) -> Result<()>;

    // ========== 存储位置 ==========

    async fn find_locations(&mut self, instance_id: Uuid) -> Result<Vec<Location>>;
    async fn insert_location(&mut self, location: &Location) -> Result<()>;
    /// 解除与实例的关联并设置状态
    async fn detach_location(&mut self, location_id: Uuid, status: LocationStatus) -> Result<()>;
    async fn find_locations_by_status(&mut self, status: LocationStatus) -> Result<Vec<Location>>;

    // ========== 查询属性缓存 ==========

    /// 读取缓存，不存在时计算并保存
    async fn series_query_attributes(&mut self, series_id: Uuid) -> Result<SeriesQueryAttributes>;
    async fn study_query_attributes(&mut self, study_id: Uuid) -> Result<StudyQueryAttributes>;
    async fn delete_series_query_attributes(&mut self, series_id: Uuid) -> Result<()>;
    async fn delete_study_query_attributes(&mut self, study_id: Uuid) -> Result<()>;
}

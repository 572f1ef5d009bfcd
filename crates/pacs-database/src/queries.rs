//! PostgreSQL存档仓库

use crate::connection::DatabasePool;
use crate::models::*;
use crate::repository::{ArchiveRepository, ArchiveTransaction};
use async_trait::async_trait;
use pacs_core::{IdWithIssuer, LocationStatus, PacsError, Result};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use std::collections::BTreeSet;
use uuid::Uuid;

/// 基于PostgreSQL的存档仓库
#[derive(Debug, Clone)]
pub struct PgArchiveRepository {
    pool: DatabasePool,
}

impl PgArchiveRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS patients (
                id UUID PRIMARY KEY,
                pid JSONB,
                pid_id VARCHAR(64),
                attributes JSONB NOT NULL,
                merged_with UUID REFERENCES patients(id),
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS studies (
                id UUID PRIMARY KEY,
                patient_id UUID NOT NULL REFERENCES patients(id),
                study_uid VARCHAR(64) UNIQUE NOT NULL,
                attributes JSONB NOT NULL,
                storage_ids TEXT[] NOT NULL DEFAULT '{}',
                rejection_state VARCHAR(16) NOT NULL DEFAULT 'NONE',
                access_control_id VARCHAR(64),
                issuer_of_accession_number JSONB,
                procedure_codes JSONB NOT NULL DEFAULT '[]',
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS series (
                id UUID PRIMARY KEY,
                study_id UUID NOT NULL REFERENCES studies(id),
                series_uid VARCHAR(64) NOT NULL,
                attributes JSONB NOT NULL,
                source_aet VARCHAR(16),
                rejection_state VARCHAR(16) NOT NULL DEFAULT 'NONE',
                institution_code JSONB,
                request_attributes JSONB NOT NULL DEFAULT '[]',
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                UNIQUE (study_id, series_uid)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS instances (
                id UUID PRIMARY KEY,
                series_id UUID NOT NULL REFERENCES series(id),
                sop_instance_uid VARCHAR(64) UNIQUE NOT NULL,
                sop_class_uid VARCHAR(64) NOT NULL,
                attributes JSONB NOT NULL,
                concept_name_code JSONB,
                rejection_note_code JSONB,
                verifying_observers JSONB NOT NULL DEFAULT '[]',
                content_items JSONB NOT NULL DEFAULT '[]',
                retrieve_aets TEXT[] NOT NULL DEFAULT '{}',
                availability VARCHAR(16) NOT NULL DEFAULT 'ONLINE',
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS locations (
                id UUID PRIMARY KEY,
                instance_id UUID REFERENCES instances(id),
                storage_id VARCHAR(64) NOT NULL,
                storage_path VARCHAR(512) NOT NULL,
                transfer_syntax_uid VARCHAR(64) NOT NULL,
                size BIGINT NOT NULL,
                digest VARCHAR(128),
                status VARCHAR(20) NOT NULL DEFAULT 'OK',
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS series_query_attrs (
                series_id UUID PRIMARY KEY REFERENCES series(id) ON DELETE CASCADE,
                number_of_instances BIGINT NOT NULL,
                number_of_rejected_instances BIGINT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS study_query_attrs (
                study_id UUID PRIMARY KEY REFERENCES studies(id) ON DELETE CASCADE,
                number_of_series BIGINT NOT NULL,
                number_of_instances BIGINT NOT NULL,
                modalities_in_study TEXT[] NOT NULL DEFAULT '{}'
            )
            "#,
        ];

        for sql in statements {
            sqlx::query(sql).execute(pool).await?;
        }

        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_patients_pid_id ON patients(pid_id)",
            "CREATE INDEX IF NOT EXISTS idx_studies_patient_id ON studies(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_series_study_id ON series(study_id)",
            "CREATE INDEX IF NOT EXISTS idx_instances_series_id ON instances(series_id)",
            "CREATE INDEX IF NOT EXISTS idx_locations_instance_id ON locations(instance_id)",
            "CREATE INDEX IF NOT EXISTS idx_locations_status ON locations(status)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql).execute(pool).await?;
        }

        tracing::info!("Database indexes created successfully");
        Ok(())
    }
}

#[async_trait]
impl ArchiveRepository for PgArchiveRepository {
    async fn begin(&self) -> Result<Box<dyn ArchiveTransaction>> {
        let tx = self.pool.pool().begin().await?;
        Ok(Box::new(PgArchiveTransaction { tx }))
    }
}

/// PostgreSQL事务
pub struct PgArchiveTransaction {
    tx: Transaction<'static, Postgres>,
}

fn instance_filter_clause(filter: InstanceFilter) -> &'static str {
    match filter {
        InstanceFilter::All => "",
        InstanceFilter::Rejected => " AND i.rejection_note_code IS NOT NULL",
        InstanceFilter::NotRejected => " AND i.rejection_note_code IS NULL",
    }
}

fn expect_updated(rows: u64, kind: &str, id: Uuid) -> Result<()> {
    if rows == 0 {
        return Err(PacsError::NotFound(format!("{} {}", kind, id)));
    }
    Ok(())
}

#[async_trait]
impl ArchiveTransaction for PgArchiveTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }

    // ========== 患者相关操作 ==========

    async fn find_patients(&mut self, pid: &IdWithIssuer) -> Result<Vec<Patient>> {
        let rows = sqlx::query_as::<_, DbPatient>(
            "SELECT * FROM patients WHERE pid_id = $1 ORDER BY created_at",
        )
        .bind(&pid.id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows
            .into_iter()
            .map(Patient::from)
            .filter(|p| p.pid.as_ref().map_or(false, |other| other.matches(pid)))
            .collect())
    }

    async fn get_patient(&mut self, id: Uuid) -> Result<Option<Patient>> {
        let row = sqlx::query_as::<_, DbPatient>("SELECT * FROM patients WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(Patient::from))
    }

    async fn insert_patient(&mut self, patient: &Patient) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO patients (id, pid, pid_id, attributes, merged_with, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(patient.id)
        .bind(patient.pid.as_ref().map(Json))
        .bind(patient.pid.as_ref().map(|p| p.id.as_str()))
        .bind(Json(&patient.attributes))
        .bind(patient.merged_with)
        .bind(patient.created_at)
        .bind(patient.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_patient(&mut self, patient: &Patient) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE patients
            SET pid = $2, pid_id = $3, attributes = $4, merged_with = $5, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(patient.id)
        .bind(patient.pid.as_ref().map(Json))
        .bind(patient.pid.as_ref().map(|p| p.id.as_str()))
        .bind(Json(&patient.attributes))
        .bind(patient.merged_with)
        .execute(&mut *self.tx)
        .await?;
        expect_updated(result.rows_affected(), "patient", patient.id)
    }

    async fn delete_patient(&mut self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM patients WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    // ========== 检查相关操作 ==========

    async fn find_study(&mut self, study_uid: &str) -> Result<Option<Study>> {
        let row = sqlx::query_as::<_, DbStudy>("SELECT * FROM studies WHERE study_uid = $1")
            .bind(study_uid)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(Study::from))
    }

    async fn get_study(&mut self, id: Uuid) -> Result<Option<Study>> {
        let row = sqlx::query_as::<_, DbStudy>("SELECT * FROM studies WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(Study::from))
    }

    async fn find_studies_of_patient(&mut self, patient_id: Uuid) -> Result<Vec<Study>> {
        let rows = sqlx::query_as::<_, DbStudy>(
            "SELECT * FROM studies WHERE patient_id = $1 ORDER BY created_at",
        )
        .bind(patient_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Study::from).collect())
    }

    async fn insert_study(&mut self, study: &Study) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO studies (id, patient_id, study_uid, attributes, storage_ids, rejection_state,
                access_control_id, issuer_of_accession_number, procedure_codes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(study.id)
        .bind(study.patient_id)
        .bind(&study.study_uid)
        .bind(Json(&study.attributes))
        .bind(&study.storage_ids)
        .bind(study.rejection_state.as_str())
        .bind(&study.access_control_id)
        .bind(study.issuer_of_accession_number.as_ref().map(Json))
        .bind(Json(&study.procedure_codes))
        .bind(study.created_at)
        .bind(study.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_study(&mut self, study: &Study) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE studies
            SET patient_id = $2, attributes = $3, storage_ids = $4, rejection_state = $5,
                access_control_id = $6, issuer_of_accession_number = $7, procedure_codes = $8,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(study.id)
        .bind(study.patient_id)
        .bind(Json(&study.attributes))
        .bind(&study.storage_ids)
        .bind(study.rejection_state.as_str())
        .bind(&study.access_control_id)
        .bind(study.issuer_of_accession_number.as_ref().map(Json))
        .bind(Json(&study.procedure_codes))
        .execute(&mut *self.tx)
        .await?;
        expect_updated(result.rows_affected(), "study", study.id)
    }

    async fn delete_study(&mut self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM studies WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn count_series_of_study(&mut self, study_id: Uuid) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM series WHERE study_id = $1")
            .bind(study_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count as u64)
    }

    // ========== 系列相关操作 ==========

    async fn find_series(&mut self, study_id: Uuid, series_uid: &str) -> Result<Option<Series>> {
        let row = sqlx::query_as::<_, DbSeries>(
            "SELECT * FROM series WHERE study_id = $1 AND series_uid = $2",
        )
        .bind(study_id)
        .bind(series_uid)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Series::from))
    }

    async fn get_series(&mut self, id: Uuid) -> Result<Option<Series>> {
        let row = sqlx::query_as::<_, DbSeries>("SELECT * FROM series WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(Series::from))
    }

    async fn insert_series(&mut self, series: &Series) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO series (id, study_id, series_uid, attributes, source_aet, rejection_state,
                institution_code, request_attributes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(series.id)
        .bind(series.study_id)
        .bind(&series.series_uid)
        .bind(Json(&series.attributes))
        .bind(&series.source_aet)
        .bind(series.rejection_state.as_str())
        .bind(series.institution_code.as_ref().map(Json))
        .bind(Json(&series.request_attributes))
        .bind(series.created_at)
        .bind(series.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_series(&mut self, series: &Series) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE series
            SET attributes = $2, source_aet = $3, rejection_state = $4, institution_code = $5,
                request_attributes = $6, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(series.id)
        .bind(Json(&series.attributes))
        .bind(&series.source_aet)
        .bind(series.rejection_state.as_str())
        .bind(series.institution_code.as_ref().map(Json))
        .bind(Json(&series.request_attributes))
        .execute(&mut *self.tx)
        .await?;
        expect_updated(result.rows_affected(), "series", series.id)
    }

    async fn delete_series(&mut self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM series WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn count_instances_of_series(
        &mut self,
        series_id: Uuid,
        filter: InstanceFilter,
    ) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM instances i WHERE i.series_id = $1{}",
            instance_filter_clause(filter)
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(series_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count as u64)
    }

    async fn count_instances_of_study(
        &mut self,
        study_id: Uuid,
        filter: InstanceFilter,
    ) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM instances i JOIN series s ON i.series_id = s.id \
             WHERE s.study_id = $1{}",
            instance_filter_clause(filter)
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(study_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count as u64)
    }

    // ========== 实例相关操作 ==========

    async fn find_instance(&mut self, sop_instance_uid: &str) -> Result<Option<Instance>> {
        let row = sqlx::query_as::<_, DbInstance>(
            "SELECT * FROM instances WHERE sop_instance_uid = $1",
        )
        .bind(sop_instance_uid)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Instance::from))
    }

    async fn find_instance_in_series(
        &mut self,
        study_uid: &str,
        series_uid: &str,
        sop_instance_uid: &str,
    ) -> Result<Option<Instance>> {
        let row = sqlx::query_as::<_, DbInstance>(
            r#"
            SELECT i.* FROM instances i
            JOIN series s ON i.series_id = s.id
            JOIN studies st ON s.study_id = st.id
            WHERE st.study_uid = $1 AND s.series_uid = $2 AND i.sop_instance_uid = $3
            "#,
        )
        .bind(study_uid)
        .bind(series_uid)
        .bind(sop_instance_uid)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Instance::from))
    }

    async fn insert_instance(&mut self, instance: &Instance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO instances (id, series_id, sop_instance_uid, sop_class_uid, attributes,
                concept_name_code, rejection_note_code, verifying_observers, content_items,
                retrieve_aets, availability, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(instance.id)
        .bind(instance.series_id)
        .bind(&instance.sop_instance_uid)
        .bind(&instance.sop_class_uid)
        .bind(Json(&instance.attributes))
        .bind(instance.concept_name_code.as_ref().map(Json))
        .bind(instance.rejection_note_code.as_ref().map(Json))
        .bind(Json(&instance.verifying_observers))
        .bind(Json(&instance.content_items))
        .bind(&instance.retrieve_aets)
        .bind(instance.availability.as_str())
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_instance(&mut self, instance: &Instance) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE instances
            SET attributes = $2, concept_name_code = $3, rejection_note_code = $4,
                verifying_observers = $5, content_items = $6, retrieve_aets = $7,
                availability = $8, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(instance.id)
        .bind(Json(&instance.attributes))
        .bind(instance.concept_name_code.as_ref().map(Json))
        .bind(instance.rejection_note_code.as_ref().map(Json))
        .bind(Json(&instance.verifying_observers))
        .bind(Json(&instance.content_items))
        .bind(&instance.retrieve_aets)
        .bind(instance.availability.as_str())
        .execute(&mut *self.tx)
        .await?;
        expect_updated(result.rows_affected(), "instance", instance.id)
    }

    async fn delete_instance(&mut self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM instances WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    // ========== 存储位置相关操作 ==========

    async fn find_locations(&mut self, instance_id: Uuid) -> Result<Vec<Location>> {
        let rows = sqlx::query_as::<_, DbLocation>(
            "SELECT * FROM locations WHERE instance_id = $1 ORDER BY created_at",
        )
        .bind(instance_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Location::from).collect())
    }

    async fn insert_location(&mut self, location: &Location) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO locations (id, instance_id, storage_id, storage_path, transfer_syntax_uid,
                size, digest, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(location.id)
        .bind(location.instance_id)
        .bind(&location.storage_id)
        .bind(&location.storage_path)
        .bind(&location.transfer_syntax_uid)
        .bind(location.size)
        .bind(&location.digest)
        .bind(location.status.as_str())
        .bind(location.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn detach_location(&mut self, location_id: Uuid, status: LocationStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE locations SET instance_id = NULL, status = $2 WHERE id = $1",
        )
        .bind(location_id)
        .bind(status.as_str())
        .execute(&mut *self.tx)
        .await?;
        expect_updated(result.rows_affected(), "location", location_id)
    }

    async fn find_locations_by_status(&mut self, status: LocationStatus) -> Result<Vec<Location>> {
        let rows = sqlx::query_as::<_, DbLocation>(
            "SELECT * FROM locations WHERE status = $1 ORDER BY created_at",
        )
        .bind(status.as_str())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Location::from).collect())
    }

    // ========== 查询属性缓存 ==========

    async fn series_query_attributes(&mut self, series_id: Uuid) -> Result<SeriesQueryAttributes> {
        let cached = sqlx::query_as::<_, SeriesQueryAttributes>(
            "SELECT * FROM series_query_attrs WHERE series_id = $1",
        )
        .bind(series_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let attrs = SeriesQueryAttributes {
            series_id,
            number_of_instances: self
                .count_instances_of_series(series_id, InstanceFilter::NotRejected)
                .await? as i64,
            number_of_rejected_instances: self
                .count_instances_of_series(series_id, InstanceFilter::Rejected)
                .await? as i64,
        };
        sqlx::query(
            r#"
            INSERT INTO series_query_attrs (series_id, number_of_instances, number_of_rejected_instances)
            VALUES ($1, $2, $3)
            ON CONFLICT (series_id) DO UPDATE
            SET number_of_instances = EXCLUDED.number_of_instances,
                number_of_rejected_instances = EXCLUDED.number_of_rejected_instances
            "#,
        )
        .bind(attrs.series_id)
        .bind(attrs.number_of_instances)
        .bind(attrs.number_of_rejected_instances)
        .execute(&mut *self.tx)
        .await?;
        Ok(attrs)
    }

    async fn study_query_attributes(&mut self, study_id: Uuid) -> Result<StudyQueryAttributes> {
        let cached = sqlx::query_as::<_, StudyQueryAttributes>(
            "SELECT * FROM study_query_attrs WHERE study_id = $1",
        )
        .bind(study_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let modalities: Vec<Option<String>> = sqlx::query_scalar(
            "SELECT attributes->'00080060'->>0 FROM series WHERE study_id = $1",
        )
        .bind(study_id)
        .fetch_all(&mut *self.tx)
        .await?;
        let modalities: BTreeSet<String> = modalities
            .into_iter()
            .flatten()
            .filter(|m| !m.is_empty())
            .collect();

        let attrs = StudyQueryAttributes {
            study_id,
            number_of_series: self.count_series_of_study(study_id).await? as i64,
            number_of_instances: self
                .count_instances_of_study(study_id, InstanceFilter::NotRejected)
                .await? as i64,
            modalities_in_study: modalities.into_iter().collect(),
        };
        sqlx::query(
            r#"
            INSERT INTO study_query_attrs (study_id, number_of_series, number_of_instances, modalities_in_study)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (study_id) DO UPDATE
            SET number_of_series = EXCLUDED.number_of_series,
                number_of_instances = EXCLUDED.number_of_instances,
                modalities_in_study = EXCLUDED.modalities_in_study
            "#,
        )
        .bind(attrs.study_id)
        .bind(attrs.number_of_series)
        .bind(attrs.number_of_instances)
        .bind(&attrs.modalities_in_study)
        .execute(&mut *self.tx)
        .await?;
        Ok(attrs)
    }

    async fn delete_series_query_attributes(&mut self, series_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM series_query_attrs WHERE series_id = $1")
            .bind(series_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_study_query_attributes(&mut self, study_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM study_query_attrs WHERE study_id = $1")
            .bind(study_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacs_dicom::Attributes;

    #[tokio::test]
    #[ignore = "需要设置 DATABASE_URL 指向PostgreSQL"]
    async fn test_postgres_roundtrip() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
        let pool = DatabasePool::connect(&url, 2, 5).await.unwrap();
        let repo = PgArchiveRepository::new(pool);
        repo.create_tables().await.unwrap();

        let study_uid = format!("2.25.{}", Uuid::new_v4().as_u128());
        let mut tx = repo.begin().await.unwrap();
        let patient = Patient::new(Some(IdWithIssuer::new("PG-TEST", None)), Attributes::new());
        tx.insert_patient(&patient).await.unwrap();
        let study = Study::new(patient.id, study_uid.clone(), Attributes::new());
        tx.insert_study(&study).await.unwrap();

        let err = tx
            .insert_study(&Study::new(patient.id, study_uid.clone(), Attributes::new()))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        tx.rollback().await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        assert!(tx.find_study(&study_uid).await.unwrap().is_none());
        tx.rollback().await.unwrap();
    }
}

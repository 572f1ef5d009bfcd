//! 影像存储管理

use pacs_core::{PacsError, Result, WriteResult};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// 存储管理器，对象写入后返回位置和SHA-256摘要
#[derive(Debug, Clone)]
pub struct StorageManager {
    storage_id: String,
    base_path: PathBuf,
}

impl StorageManager {
    pub fn new(storage_id: &str, base_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_id: storage_id.to_string(),
            base_path: base_path.into(),
        }
    }

    pub fn storage_id(&self) -> &str {
        &self.storage_id
    }

    /// 按 检查/系列/实例 UID 生成相对路径，同一实例的不同版本以 `version` 区分
    pub fn object_path(
        study_uid: &str,
        series_uid: &str,
        sop_instance_uid: &str,
        version: &str,
    ) -> String {
        format!(
            "{}/{}/{}/{}.dcm",
            study_uid, series_uid, sop_instance_uid, version
        )
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(PacsError::Storage(format!("非法存储路径: {}", path)));
        }
        Ok(self.base_path.join(relative))
    }

    /// 存储DICOM文件
    pub async fn store_file(
        &self,
        data: &[u8],
        path: &str,
        transfer_syntax_uid: &str,
    ) -> Result<WriteResult> {
        let full_path = self.resolve(path)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, data).await?;

        let digest = hex::encode(Sha256::digest(data));
        debug!("写入对象 {:?}, 大小 {} bytes, 摘要 {}", full_path, data.len(), digest);

        Ok(WriteResult {
            storage_id: self.storage_id.clone(),
            storage_path: path.to_string(),
            size: data.len() as i64,
            digest: Some(digest),
            transfer_syntax_uid: transfer_syntax_uid.to_string(),
        })
    }

    /// 获取文件
    pub async fn get_file(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.resolve(path)?;
        let data = tokio::fs::read(full_path).await?;
        Ok(data)
    }

    /// 删除对象，文件不存在时视为成功
    pub async fn delete_file(&self, path: &str) -> Result<()> {
        let full_path = self.resolve(path)?;
        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";

    #[tokio::test]
    async fn test_store_file_computes_digest() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new("fs1", dir.path());
        let path = StorageManager::object_path("1.2", "1.2.3", "1.2.3.4", "v1");

        let result = storage.store_file(b"abc", &path, EXPLICIT_VR_LE).await.unwrap();
        assert_eq!(result.storage_id, "fs1");
        assert_eq!(result.storage_path, "1.2/1.2.3/1.2.3.4/v1.dcm");
        assert_eq!(result.size, 3);
        assert_eq!(
            result.digest.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(storage.get_file(&path).await.unwrap(), b"abc");

        storage.delete_file(&path).await.unwrap();
        storage.delete_file(&path).await.unwrap();
        assert!(storage.get_file(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new("fs1", dir.path());
        let err = storage
            .store_file(b"x", "../outside.dcm", EXPLICIT_VR_LE)
            .await
            .unwrap_err();
        assert!(matches!(err, PacsError::Storage(_)));
        assert!(storage.get_file("/etc/passwd").await.is_err());
    }
}

//! PACS服务器主程序

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pacs_admin::{write_config, ConfigManager, ConfigValidator, PacsConfig};
use pacs_database::{ArchiveRepository, DatabasePool, MemoryRepository, PgArchiveRepository};
use pacs_dicom::{tags, DicomParser};
use pacs_storage::StorageManager;
use pacs_store::{SourceKind, StoreContext, StoreService, StoreSession, UpdateResult};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// PACS服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "pacs-server")]
#[command(about = "PACS (Picture Archiving and Communication System) 服务器")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 导入DICOM文件
    Import {
        /// DICOM文件
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// 发送方AE标题
        #[arg(long)]
        calling_aet: Option<String>,
    },
    /// 生成默认配置文件
    InitConfig {
        #[arg(short, long, default_value = "pacs.toml")]
        output: PathBuf,
    },
}

#[derive(Debug, Default)]
struct ImportSummary {
    stored: usize,
    dropped: usize,
    rejection_notes: usize,
    failed: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ConfigManager::new(path)?.get_config().await,
        None => {
            let config = PacsConfig::default();
            ConfigValidator::new().validate(&config)?;
            config
        }
    };

    // 初始化日志
    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    let subscriber = tracing_subscriber::fmt().with_env_filter(EnvFilter::new(level));
    if config.logging.format == "compact" {
        subscriber.compact().init();
    } else {
        subscriber.init();
    }

    match args.command {
        Command::InitConfig { output } => {
            write_config(&output, &PacsConfig::default()).await?;
            info!("默认配置已写入 {}", output.display());
            Ok(())
        }
        Command::Import { files, calling_aet } => {
            let summary = import(&config, &files, calling_aet.as_deref()).await?;
            info!(
                "导入完成: 存储 {}, 忽略 {}, 拒绝说明 {}, 失败 {}",
                summary.stored, summary.dropped, summary.rejection_notes, summary.failed
            );
            if summary.failed > 0 {
                anyhow::bail!("{} 个文件导入失败", summary.failed);
            }
            Ok(())
        }
    }
}

async fn open_repository(config: &PacsConfig) -> Result<Arc<dyn ArchiveRepository>> {
    match config.database.database_type.as_str() {
        "memory" => {
            info!("使用内存存档");
            Ok(Arc::new(MemoryRepository::new()))
        }
        _ => {
            let pool = DatabasePool::connect(
                &config.database.connection_string,
                config.database.max_connections,
                config.database.connect_timeout_secs,
            )
            .await
            .context("无法连接数据库")?;
            let repository = PgArchiveRepository::new(pool);
            repository.create_tables().await?;
            Ok(Arc::new(repository))
        }
    }
}

async fn import(
    config: &PacsConfig,
    files: &[PathBuf],
    calling_aet: Option<&str>,
) -> Result<ImportSummary> {
    let repository = open_repository(config).await?;
    let store = StoreService::new(repository, config.archive.clone());
    let storage = StorageManager::new(&config.storage.storage_id, &config.storage.root_path);
    let mut session = StoreSession::new(calling_aet, &config.server.ae_title, SourceKind::File);
    info!("导入 {} 个文件, 会话 {}", files.len(), session);

    let mut summary = ImportSummary::default();
    let mut studies = BTreeSet::new();
    for file in files {
        match import_file(&store, &storage, &mut session, file).await {
            Ok((study_uid, result)) => {
                studies.insert(study_uid);
                if result.rejection_note.is_some() {
                    summary.rejection_notes += 1;
                } else if result.is_stored() {
                    summary.stored += 1;
                } else {
                    summary.dropped += 1;
                }
            }
            Err(e) => {
                error!("导入 {} 失败: {:#}", file.display(), e);
                summary.failed += 1;
            }
        }
    }

    for study_uid in &studies {
        match store.study_query_attributes(study_uid).await {
            Ok(Some(attrs)) => info!(
                "检查 [{}]: {} 个系列, {} 个实例, 模态 {}",
                study_uid,
                attrs.number_of_series,
                attrs.number_of_instances,
                attrs.modalities_in_study.join("\\")
            ),
            Ok(None) => {}
            Err(e) => warn!("读取检查 [{}] 查询属性失败: {}", study_uid, e),
        }
    }
    Ok(summary)
}

async fn import_file(
    store: &StoreService,
    storage: &StorageManager,
    session: &mut StoreSession,
    file: &Path,
) -> Result<(String, UpdateResult)> {
    let parsed = DicomParser::parse_file(file)?;
    let uid = |tag, name| {
        parsed
            .attributes
            .get_string(tag)
            .map(str::to_string)
            .with_context(|| format!("{} 缺少 {}", file.display(), name))
    };
    let study_uid = uid(tags::STUDY_INSTANCE_UID, "StudyInstanceUID")?;
    let path = StorageManager::object_path(
        &study_uid,
        &uid(tags::SERIES_INSTANCE_UID, "SeriesInstanceUID")?,
        &uid(tags::SOP_INSTANCE_UID, "SOPInstanceUID")?,
        &Uuid::new_v4().simple().to_string(),
    );

    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("无法读取 {}", file.display()))?;
    let write_result = storage
        .store_file(&data, &path, &parsed.transfer_syntax_uid)
        .await?;
    let ctx = match StoreContext::new(parsed.attributes, write_result) {
        Ok(ctx) => ctx,
        Err(e) => {
            storage.delete_file(&path).await?;
            return Err(e.into());
        }
    };

    let result = match store.ingest(session, &ctx).await {
        Err(e) if e.is_transient() => {
            warn!("入库 {} 遇到并发冲突，重试: {}", ctx, e);
            store.ingest(session, &ctx).await.map_err(|e| {
                if e.is_transient() {
                    // 按系列查找旧实例时，其他系列中的同一SOP实例UID每次都会冲突
                    error!("入库 {} 重试后仍违反唯一约束，不是并发竞争: {}", ctx, e);
                }
                e
            })
        }
        other => other,
    };
    let result = match result {
        Ok(result) => result,
        Err(e) => {
            storage.delete_file(&path).await?;
            return Err(e.into());
        }
    };
    if !result.is_stored() {
        storage.delete_file(&path).await?;
    }
    if let Some(reason) = &result.dropped {
        info!("{} 未存档: {}", file.display(), reason);
    }
    Ok((study_uid, result))
}

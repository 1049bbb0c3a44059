//! RFP content library pipeline: clean, materialize, mirror, reindex.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rcl_adapters::{
    GraphMirror, GraphMirrorConfig, MirrorPlatform, RestSearchIndex, SearchIndexConfig,
    SearchIndexService,
};
use rcl_storage::{DocumentStore, FsDocumentStore, FsSpreadsheetSource, SpreadsheetSource};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

pub mod config;
pub mod dedup;
pub mod index;
pub mod materialize;
pub mod mirror;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod runlog;

pub use config::{ConfigError, PipelineConfig};
pub use dedup::{DedupRun, DedupStats, SimilarityReviewItem};
pub use index::{IndexRefreshReport, IndexRefreshTrigger};
pub use materialize::{DocumentMaterializer, MaterializeReport};
pub use mirror::{plan, ItemFailure, MirrorSynchronizer, SyncPlan, SyncReport};
pub use normalize::{NormalizeStats, NormalizedBatch, Normalizer};
pub use pipeline::{latest_content_library, CleaningOutcome, CleaningPipeline};
pub use report::{write_run_reports, RunSummary};
pub use runlog::{init_tracing, RunLog};

pub const CRATE_NAME: &str = "rcl-sync";

/// Which part of the pipeline a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Clean,
    Materialize,
    Mirror,
    Reindex,
    All,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub cleaning: Option<CleaningOutcome>,
    pub report_dir: Option<PathBuf>,
    pub materialize: Option<MaterializeReport>,
    pub mirror: Option<SyncReport>,
    pub index: Option<IndexRefreshReport>,
}

/// Collaborators for one process, built once from the loaded config.
pub struct Services {
    pub config: PipelineConfig,
    pub store: Arc<dyn DocumentStore>,
    pub source: Arc<dyn SpreadsheetSource>,
    /// `None` when no mirror credentials are available.
    pub mirror: Option<Arc<dyn MirrorPlatform>>,
    pub search: Option<Arc<dyn SearchIndexService>>,
    pub run_log: RunLog,
}

impl Services {
    /// Filesystem store and source under `storage.root`, REST clients for the rest.
    pub fn from_config(config: PipelineConfig, run_log: RunLog) -> Result<Self> {
        let root = config.storage_root();
        let store: Arc<dyn DocumentStore> = Arc::new(FsDocumentStore::new(root.clone()));
        let source: Arc<dyn SpreadsheetSource> = Arc::new(FsSpreadsheetSource::new(root));

        let mirror = match config::secret_from_env(config::GRAPH_TOKEN_ENV) {
            Ok(access_token) => {
                let graph = GraphMirror::new(GraphMirrorConfig {
                    base_url: config.mirror.base_url.clone(),
                    drive_id: config.mirror.drive_id.clone(),
                    access_token,
                    timeout: Duration::from_secs(config.mirror.timeout_secs),
                })?;
                Some(Arc::new(graph) as Arc<dyn MirrorPlatform>)
            }
            Err(_) => None,
        };

        let search = match (&config.index, config::secret_from_env(config::SEARCH_API_KEY_ENV)) {
            (Some(index), Ok(api_key)) => {
                let client = RestSearchIndex::new(SearchIndexConfig {
                    endpoint: index.endpoint.clone(),
                    api_key,
                    api_version: index.api_version.clone(),
                    key_field: index.key_field.clone(),
                    timeout: Duration::from_secs(index.timeout_secs),
                })?;
                Some(Arc::new(client) as Arc<dyn SearchIndexService>)
            }
            _ => None,
        };

        Ok(Self {
            config,
            store,
            source,
            mirror,
            search,
            run_log,
        })
    }

    pub async fn clean(&self, today: NaiveDate) -> Result<(CleaningOutcome, PathBuf)> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let pipeline =
            CleaningPipeline::new(&self.config, self.store.clone(), self.source.clone())?;
        let outcome = pipeline.run(today).await?;

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            source_name: outcome.source_name.clone(),
            dataset_name: outcome.dataset_name.clone(),
            canonical_records: outcome.records.len(),
            normalize: outcome.normalize.clone(),
            dedup: outcome.dedup.clone(),
            review: outcome.review.clone(),
        };
        let report_dir = write_run_reports(&self.config.reports_root(), &summary, &outcome.records)
            .await
            .context("writing run reports")?;
        info!(%run_id, report_dir = %report_dir.display(), "run reports written");
        Ok((outcome, report_dir))
    }

    pub async fn materialize(&self) -> Result<MaterializeReport> {
        DocumentMaterializer::new(&self.config, self.store.clone())
            .materialize()
            .await
    }

    pub async fn mirror(&self) -> Result<SyncReport> {
        let platform = self
            .mirror
            .clone()
            .ok_or(ConfigError::MissingSecret(config::GRAPH_TOKEN_ENV))?;
        MirrorSynchronizer::new(&self.config, self.store.clone(), platform)
            .sync()
            .await
    }

    /// `Ok(None)` when no index is configured.
    pub async fn reindex(&self) -> Result<Option<IndexRefreshReport>> {
        let Some(index) = &self.config.index else {
            info!("no search index configured; refresh skipped");
            return Ok(None);
        };
        let service = self
            .search
            .clone()
            .ok_or(ConfigError::MissingSecret(config::SEARCH_API_KEY_ENV))?;
        let report = IndexRefreshTrigger::new(index, service).refresh().await?;
        Ok(Some(report))
    }

    async fn execute(&self, stage: Stage, today: NaiveDate) -> Result<RunReport> {
        let mut report = RunReport::default();
        if matches!(stage, Stage::Clean | Stage::All) {
            let (outcome, dir) = self.clean(today).await.context("cleaning stage")?;
            report.cleaning = Some(outcome);
            report.report_dir = Some(dir);
        }
        if matches!(stage, Stage::Materialize | Stage::All) {
            report.materialize = Some(self.materialize().await.context("materialize stage")?);
        }
        if matches!(stage, Stage::Mirror | Stage::All) {
            report.mirror = Some(self.mirror().await.context("mirror stage")?);
        }
        if matches!(stage, Stage::Reindex | Stage::All) {
            report.index = self.reindex().await.context("reindex stage")?;
        }
        Ok(report)
    }

    /// Run boundary: the log is uploaded whether the run succeeds or fails.
    pub async fn run(&self, stage: Stage, today: NaiveDate) -> Result<RunReport> {
        info!(?stage, %today, "pipeline run started");
        let result = self.execute(stage, today).await;
        match &result {
            Ok(_) => info!(?stage, "pipeline run finished"),
            Err(e) => error!(?stage, error = %format!("{e:#}"), "pipeline run failed"),
        }
        upload_run_log(self, today).await;
        result
    }
}

async fn upload_run_log(services: &Services, today: NaiveDate) {
    let container = &services.config.storage.containers.logs;
    if !runlog::upload_run_log(services.store.as_ref(), container, &services.run_log, today).await {
        warn!(container = %container, "run log not persisted");
    }
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// One job per cron expression, each running the full pipeline.
/// `None` when scheduling is disabled.
pub async fn build_scheduler(services: Arc<Services>) -> Result<Option<JobScheduler>> {
    if !services.config.scheduler.enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for cron in &services.config.scheduler.cron {
        let services = Arc::clone(&services);
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let services = Arc::clone(&services);
            Box::pin(async move {
                if let Err(e) = services.run(Stage::All, today()).await {
                    error!(error = %format!("{e:#}"), "scheduled run failed");
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
    }
    Ok(Some(sched))
}

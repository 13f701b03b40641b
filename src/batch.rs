//! Batch runner: walks the worksheet's unprocessed links one at a time.

use crate::fetch::RetryingFetcher;
use crate::http::Transport;
use crate::logbook::BoundedLog;
use crate::models::{
    BatchLink, BatchProgress, LogEntry, ProcessResult, ProcessSingleRequest, SheetSettings,
};
use crate::pipeline::{Pipeline, PipelineError};
use crate::sheet::SheetClient;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle, time::sleep};
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_ITEM_DELAY: Duration = Duration::from_millis(1500);

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("a batch is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Invalid(#[from] PipelineError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Completed,
    NoLinks,
    Cancelled,
    Failed { error: String },
}

#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub outcome: BatchOutcome,
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
}

/// Point-in-time view served to the popup.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub is_processing: bool,
    pub progress: BatchProgress,
    pub cancel_requested: bool,
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Default)]
struct BatchState {
    is_processing: bool,
    cancel_requested: bool,
    progress: BatchProgress,
}

struct Shared<T> {
    pipeline: Arc<Pipeline<T>>,
    sheet_fetcher: RetryingFetcher<T>,
    state: Mutex<BatchState>,
    log: BoundedLog,
    item_delay: Duration,
}

/// Owns the batch state. Clones share it.
pub struct BatchRunner<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BatchRunner<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Transport> BatchRunner<T> {
    pub fn new(
        pipeline: Arc<Pipeline<T>>,
        sheet_fetcher: RetryingFetcher<T>,
        log: BoundedLog,
        item_delay: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                pipeline,
                sheet_fetcher,
                state: Mutex::new(BatchState::default()),
                log,
                item_delay,
            }),
        }
    }

    /// Starts a run in the background. At most one run is active; a second start is
    /// refused without touching the running one.
    pub async fn start(
        &self,
        settings: SheetSettings,
    ) -> Result<JoinHandle<BatchSummary>, BatchError> {
        let mut state = self.shared.state.lock().await;
        if state.is_processing {
            self.shared.log.error("Already processing");
            return Err(BatchError::AlreadyRunning);
        }
        let sheet = SheetClient::new(self.shared.sheet_fetcher.clone(), settings).map_err(|err| {
            self.shared.log.error(format!("Settings error: {}", err.detail()));
            err
        })?;
        *state = BatchState {
            is_processing: true,
            cancel_requested: false,
            progress: BatchProgress::default(),
        };
        self.shared.log.info("=== Starting batch processing ===");
        drop(state);

        let shared = self.shared.clone();
        Ok(tokio::spawn(shared.run(sheet)))
    }

    /// Cooperative: the loop stops before its next link.
    pub async fn cancel(&self) {
        self.shared.state.lock().await.cancel_requested = true;
        self.shared.log.info("Cancel requested...");
    }

    pub async fn status(&self) -> StatusSnapshot {
        let state = self.shared.state.lock().await;
        StatusSnapshot {
            is_processing: state.is_processing,
            progress: state.progress.clone(),
            cancel_requested: state.cancel_requested,
            logs: self.shared.log.entries(),
        }
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.shared.log.entries()
    }

    pub fn clear_logs(&self) {
        self.shared.log.clear();
    }

    /// Processes one auction and pushes it to the sheet without a worksheet row.
    pub async fn process_single(
        &self,
        request: ProcessSingleRequest,
    ) -> Result<ProcessResult, PipelineError> {
        let ProcessSingleRequest { url, settings } = request;
        let log = &self.shared.log;
        log.info(format!("Processing: {url}"));
        let outcome = async {
            let sheet = SheetClient::new(self.shared.sheet_fetcher.clone(), settings)?;
            let result = self.shared.pipeline.process_one(&url).await?;
            sheet.push_auction(&result, None).await?;
            Ok::<_, PipelineError>(result)
        }
        .await;
        match &outcome {
            Ok(result) => log.success(format!("Created: {}", result.auction.sheet_name)),
            Err(err) => log.error(format!("Error: {}", err.detail())),
        }
        outcome
    }
}

impl<T: Transport> Shared<T> {
    async fn run(self: Arc<Self>, sheet: SheetClient<T>) -> BatchSummary {
        let run_id = Uuid::new_v4();
        info!(target = "tl.batch", %run_id, "batch_started");

        // The loop gets its own task so a panic surfaces here as a JoinError.
        let worker = {
            let shared = self.clone();
            tokio::spawn(async move { shared.process_links(run_id, &sheet).await })
        };
        let summary = match worker.await {
            Ok(Ok(summary)) => summary,
            Ok(Err(err)) => self.fail(run_id, err.detail().to_string()).await,
            Err(err) => self.fail(run_id, err.to_string()).await,
        };

        {
            let mut state = self.state.lock().await;
            state.is_processing = false;
            state.cancel_requested = false;
        }
        info!(
            target = "tl.batch",
            %run_id,
            outcome = ?summary.outcome,
            processed = summary.processed,
            failed = summary.failed,
            "batch_finished"
        );
        summary
    }

    async fn process_links(
        &self,
        run_id: Uuid,
        sheet: &SheetClient<T>,
    ) -> Result<BatchSummary, PipelineError> {
        self.log.info("Fetching links from WorkSheet...");
        let links = sheet.get_links().await?;
        let total = links.len();

        if links.is_empty() {
            self.log.error("No unprocessed links found");
            self.set_progress(BatchProgress::new(0, 0, "No links found")).await;
            return Ok(BatchSummary {
                run_id,
                outcome: BatchOutcome::NoLinks,
                total: 0,
                processed: 0,
                failed: 0,
            });
        }

        self.log.success(format!("Found {total} links to process"));
        self.set_progress(BatchProgress::new(0, total, "Starting...")).await;

        let mut processed = 0;
        let mut failed = 0;
        let mut cancelled = false;

        for (index, link) in links.iter().enumerate() {
            if self.cancel_requested().await {
                self.log.error(format!("Cancelled at {index}/{total}"));
                cancelled = true;
                break;
            }

            let position = index + 1;
            self.set_progress(BatchProgress::new(
                position,
                total,
                format!("Processing {position}/{total}..."),
            ))
            .await;
            self.log
                .info(format!("[{position}/{total}] {}", link_label(&link.url)));

            match self.process_link(sheet, link).await {
                Ok(result) => {
                    processed += 1;
                    crate::metrics::batch_link("ok");
                    self.log.success(format!(
                        "{} ({} items)",
                        result.auction.sheet_name,
                        result.item_count()
                    ));
                }
                Err(err) => {
                    failed += 1;
                    crate::metrics::batch_link("failed");
                    warn!(target = "tl.batch", %run_id, row = link.row, error = %err, "link_failed");
                    self.log
                        .error(format!("Failed row {}: {}", link.row, err.detail()));
                }
            }

            if position < total && !self.cancel_requested().await {
                sleep(self.item_delay).await;
            }
        }

        let progress = if cancelled {
            BatchProgress::new(
                processed + failed,
                total,
                format!("Cancelled: {processed} ok, {failed} failed"),
            )
        } else {
            BatchProgress::new(total, total, format!("Done: {processed} ok, {failed} failed"))
        };
        self.set_progress(progress).await;
        crate::metrics::batch_finished(cancelled, processed, failed);

        let closing = format!("=== Batch complete: {processed} succeeded, {failed} failed ===");
        if processed > 0 {
            self.log.success(closing);
        } else {
            self.log.error(closing);
        }

        Ok(BatchSummary {
            run_id,
            outcome: if cancelled {
                BatchOutcome::Cancelled
            } else {
                BatchOutcome::Completed
            },
            total,
            processed,
            failed,
        })
    }

    async fn process_link(
        &self,
        sheet: &SheetClient<T>,
        link: &BatchLink,
    ) -> Result<ProcessResult, PipelineError> {
        let result = self.pipeline.process_one(&link.url).await?;
        sheet.push_auction(&result, Some(link.row)).await?;
        Ok(result)
    }

    async fn fail(&self, run_id: Uuid, error: String) -> BatchSummary {
        self.log.error(format!("Batch error: {error}"));
        {
            let mut state = self.state.lock().await;
            state.progress.status = format!("Error: {error}");
        }
        BatchSummary {
            run_id,
            outcome: BatchOutcome::Failed { error },
            total: 0,
            processed: 0,
            failed: 0,
        }
    }

    async fn set_progress(&self, progress: BatchProgress) {
        self.state.lock().await.progress = progress;
    }

    async fn cancel_requested(&self) -> bool {
        self.state.lock().await.cancel_requested
    }
}

/// Auction slug after `/detail/`, or the whole URL.
fn link_label(url: &str) -> &str {
    url.split_once("/detail/")
        .and_then(|(_, rest)| rest.split('/').next())
        .filter(|slug| !slug.is_empty())
        .unwrap_or(url)
}

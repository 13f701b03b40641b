use crate::fetch::RetryingFetcher;
use crate::http::Transport;
use crate::manifest;
use crate::models::{AuctionRecord, ManifestItem, ManifestPayload, ProcessResult};
use crate::page::PageParser;
use std::{future::Future, str::FromStr, time::Instant};
use thiserror::Error;
use tracing::{info, warn};

/// What to do when the auction page parsed but its manifest could not be fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ManifestFailurePolicy {
    /// Fail the whole item.
    #[default]
    Abort,
    /// Keep the auction record with an empty manifest.
    Degrade,
}

impl FromStr for ManifestFailurePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "degrade" => Ok(Self::Degrade),
            other => Err(format!("unknown manifest failure policy `{other}`")),
        }
    }
}

pub struct Pipeline<T> {
    fetcher: RetryingFetcher<T>,
    parser: PageParser,
    manifest_policy: ManifestFailurePolicy,
}

impl<T: Transport> Pipeline<T> {
    pub fn new(
        fetcher: RetryingFetcher<T>,
        parser: PageParser,
        manifest_policy: ManifestFailurePolicy,
    ) -> Self {
        Self {
            fetcher,
            parser,
            manifest_policy,
        }
    }

    pub async fn fetch_auction(&self, url: &str) -> Result<AuctionRecord, PipelineError> {
        let url = validate_url("fetch_auction", url)?;
        self.timed("fetch_auction", async {
            let html = self
                .fetcher
                .get_text(url)
                .await
                .map_err(|err| PipelineError::upstream("fetch_auction", err.to_string()))?;
            Ok::<_, PipelineError>(self.parser.parse(&html, url))
        })
        .await
    }

    pub async fn fetch_manifest(&self, url: &str) -> Result<Vec<ManifestItem>, PipelineError> {
        let url = validate_url("fetch_manifest", url)?;
        self.timed("fetch_manifest", async {
            let bytes = self
                .fetcher
                .get(url)
                .await
                .map_err(|err| PipelineError::upstream("fetch_manifest", err.to_string()))?;
            Ok::<_, PipelineError>(manifest::parse(&bytes))
        })
        .await
    }

    /// Auction page first, then its manifest when the page links one.
    pub async fn process_one(&self, url: &str) -> Result<ProcessResult, PipelineError> {
        let auction = self.fetch_auction(url).await?;

        let items = if auction.manifest_url.is_empty() {
            info!(target = "tl.pipeline", url, "no_manifest_url");
            Vec::new()
        } else {
            match self.fetch_manifest(&auction.manifest_url).await {
                Ok(items) => items,
                Err(err) if self.manifest_policy == ManifestFailurePolicy::Degrade => {
                    warn!(
                        target = "tl.pipeline",
                        manifest_url = %auction.manifest_url,
                        error = %err,
                        "manifest_fetch_failed_degrading"
                    );
                    Vec::new()
                }
                Err(err) => return Err(err),
            }
        };

        info!(
            target = "tl.pipeline",
            sheet_name = %auction.sheet_name,
            items = items.len(),
            "auction_processed"
        );
        Ok(ProcessResult {
            auction,
            manifest: ManifestPayload::new(items),
        })
    }

    async fn timed<V, Fut>(&self, name: &'static str, fut: Fut) -> Result<V, PipelineError>
    where
        Fut: Future<Output = Result<V, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await;
        crate::metrics::stage_elapsed(name, started.elapsed());
        outcome
    }
}

fn validate_url<'a>(stage: &'static str, url: &'a str) -> Result<&'a str, PipelineError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(PipelineError::invalid_input(stage, "URL required"));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(PipelineError::invalid_input(
            stage,
            format!("not an http(s) URL: {url}"),
        ));
    }
    Ok(url)
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Upstream,
    Validation,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn upstream(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Upstream,
        }
    }

    pub fn validation(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Validation,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

use crate::fetch::RetryingFetcher;
use crate::http::Transport;
use crate::models::{BatchLink, ProcessResult, SheetConfig, SheetSettings};
use crate::pipeline::PipelineError;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

#[derive(Debug, Default, Deserialize)]
struct LinksResponse {
    #[serde(default)]
    links: Vec<BatchLink>,
}

/// Client for the spreadsheet automation web app.
pub struct SheetClient<T> {
    fetcher: RetryingFetcher<T>,
    endpoint: String,
    config: SheetConfig,
}

impl<T: Transport> SheetClient<T> {
    /// Settings must name the web app and both target spreadsheets.
    pub fn new(
        fetcher: RetryingFetcher<T>,
        settings: SheetSettings,
    ) -> Result<Self, PipelineError> {
        validate_settings(&settings)?;
        Ok(Self {
            fetcher,
            endpoint: settings.apps_script_url.trim().to_string(),
            config: settings.config,
        })
    }

    pub async fn get_links(&self) -> Result<Vec<BatchLink>, PipelineError> {
        let reply = self
            .call("get_links", json!({"action": "getLinks", "config": self.config}))
            .await?;
        let parsed: LinksResponse = if reply.is_null() {
            LinksResponse::default()
        } else {
            serde_json::from_value(reply).map_err(|err| {
                PipelineError::validation("get_links", format!("unexpected links payload: {err}"))
            })?
        };
        let total = parsed.links.len();
        let links: Vec<BatchLink> = parsed
            .links
            .into_iter()
            .filter(|link| !link.url.trim().is_empty())
            .collect();
        if links.len() < total {
            warn!(
                target = "tl.sheet",
                dropped = total - links.len(),
                "links_without_url_dropped"
            );
        }
        info!(target = "tl.sheet", links = links.len(), "links_fetched");
        Ok(links)
    }

    pub async fn push_auction(
        &self,
        result: &ProcessResult,
        worksheet_row: Option<u32>,
    ) -> Result<(), PipelineError> {
        let mut payload = json!({
            "action": "processAuction",
            "auction": result.auction,
            "manifest": result.manifest.items,
            "config": self.config,
        });
        if let Some(row) = worksheet_row {
            payload["worksheetRow"] = json!(row);
        }
        let reply = self.call("push_auction", payload).await?;
        if let Some(message) = rejection(&reply) {
            return Err(PipelineError::validation(
                "push_auction",
                format!("sheet rejected {}: {message}", result.auction.sheet_name),
            ));
        }
        info!(
            target = "tl.sheet",
            sheet_name = %result.auction.sheet_name,
            items = result.item_count(),
            row = ?worksheet_row,
            "auction_pushed"
        );
        Ok(())
    }

    async fn call(&self, stage: &'static str, payload: Value) -> Result<Value, PipelineError> {
        let body = self
            .fetcher
            .post_json(&self.endpoint, &payload)
            .await
            .map_err(|err| PipelineError::upstream(stage, err.to_string()))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body).map_err(|err| {
            PipelineError::validation(stage, format!("sheet reply is not JSON: {err}"))
        })
    }
}

fn rejection(reply: &Value) -> Option<String> {
    if let Some(error) = reply.get("error").filter(|e| !e.is_null()) {
        return Some(
            error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
        );
    }
    if reply.get("success") == Some(&Value::Bool(false)) {
        return Some("success=false".to_string());
    }
    None
}

pub fn validate_settings(settings: &SheetSettings) -> Result<(), PipelineError> {
    let url = settings.apps_script_url.trim();
    if url.is_empty() {
        return Err(PipelineError::validation(
            "settings",
            "Apps Script URL is not configured",
        ));
    }
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(PipelineError::validation(
            "settings",
            format!("Apps Script URL is not an http(s) URL: {url}"),
        ));
    }
    if settings.config.analysis_sheet_id.trim().is_empty() {
        return Err(PipelineError::validation(
            "settings",
            "analysis sheet id is not configured",
        ));
    }
    if settings.config.notes_sheet_id.trim().is_empty() {
        return Err(PipelineError::validation(
            "settings",
            "notes sheet id is not configured",
        ));
    }
    Ok(())
}

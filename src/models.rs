use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized auction listing, serialized with the field names the sheet script reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuctionRecord {
    pub title: String,
    pub full_title: String,
    #[serde(rename = "condition")]
    pub condition_code: ConditionCode,
    pub condition_text: String,
    pub condition_for_notes: String,
    #[serde(rename = "pstTime")]
    pub close_time_label: String,
    pub manifest_url: String,
    pub sheet_name: String,
    pub bid_price: f64,
    pub shipping: f64,
    pub auction_url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
pub enum ConditionCode {
    /// Uninspected returns.
    #[default]
    #[serde(rename = "UR")]
    Uninspected,
    /// Used, tested working.
    #[serde(rename = "UW")]
    UsedWorking,
    /// New condition.
    #[serde(rename = "NC")]
    New,
    #[serde(rename = "LN")]
    LikeNew,
    #[serde(rename = "S")]
    Salvage,
}

impl ConditionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionCode::Uninspected => "UR",
            ConditionCode::UsedWorking => "UW",
            ConditionCode::New => "NC",
            ConditionCode::LikeNew => "LN",
            ConditionCode::Salvage => "S",
        }
    }

    pub fn notes_label(&self) -> &'static str {
        condition_for_notes(self.as_str())
    }
}

/// Condition vocabulary used by the notes spreadsheet. Unknown codes pass through.
pub fn condition_for_notes(code: &str) -> &str {
    match code {
        "UR" | "UW" => "USED",
        "NC" => "NEW",
        "LN" => "OB",
        "S" => "S",
        other => other,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestItem {
    pub upc: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_retail: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestPayload {
    pub items: Vec<ManifestItem>,
    pub count: usize,
}

impl ManifestPayload {
    pub fn new(items: Vec<ManifestItem>) -> Self {
        let count = items.len();
        Self { items, count }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessResult {
    pub auction: AuctionRecord,
    pub manifest: ManifestPayload,
}

impl ProcessResult {
    pub fn item_count(&self) -> usize {
        self.manifest.count
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchLink {
    pub url: String,
    #[serde(default)]
    pub row: u32,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct BatchProgress {
    pub current: usize,
    pub total: usize,
    pub status: String,
}

impl BatchProgress {
    pub fn new(current: usize, total: usize, status: impl Into<String>) -> Self {
        Self {
            current,
            total,
            status: status.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub kind: LogKind,
}

/// Identifiers of the target spreadsheets, forwarded untouched to the sheet script.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SheetConfig {
    #[serde(default)]
    pub analysis_sheet_id: String,
    #[serde(default)]
    pub notes_sheet_id: String,
}

/// Settings the extension persists and sends along with every control request.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SheetSettings {
    #[serde(default)]
    pub apps_script_url: String,
    #[serde(default)]
    pub config: SheetConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSingleRequest {
    pub url: String,
    #[serde(flatten)]
    pub settings: SheetSettings,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

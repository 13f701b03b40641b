//! Auction page extraction.
//!
//! Every field has its own rule returning `Option`, so a rule that finds nothing simply
//! falls through to the next rule or to the field default. Parsing never fails.

use crate::models::{AuctionRecord, ConditionCode};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

pub const DEFAULT_SITE_ROOT: &str = "https://www.techliquidators.com";

const TITLE_BUDGET: usize = 45;
const WORD_BACKOFF: usize = 20;
const ACCESSORY_SUFFIX: &str = "Acce";
const DEFAULT_CONDITION_TEXT: &str = "Uninspected Returns";
const PACIFIC_STANDARD_OFFSET_SECS: i32 = 8 * 3600;

const PRICE: &str = r"\$((?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d{1,2})?)";

static TITLE_SINGLE_QUOTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)edit-listing-title[^>]*title='([^']+)'").expect("title regex")
});
static TITLE_DOUBLE_QUOTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)edit-listing-title[^>]*title="([^"]+)""#).expect("title regex")
});
static SHORTENINGS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        ("Accessories", "Acce"),
        ("Automation", "Auto"),
        ("Electronics", "Elec"),
        ("Monitoring", "Monitor"),
        ("Essentials", "Essen"),
        ("Computer", "Comp"),
        ("Entertainment", "Ent"),
    ]
    .into_iter()
    .map(|(word, short)| {
        (
            Regex::new(&format!("(?i){word}")).expect("shortening regex"),
            short,
        )
    })
    .collect()
});
static CONDITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<strong>\s*Condition:\s*</strong>\s*([^<\n]+)").expect("condition regex")
});
static CLOSE_TIMESTAMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)data-timestamp=['"]([^'"]+)['"]"#).expect("timestamp regex"));
static MANIFEST_HREF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)href=["']([^"']*pallet_manifests[^"']*\.(?:xlsx|xls|csv))["']"#)
        .expect("manifest regex")
});
static DOLLAR_AMOUNT: Lazy<Regex> = Lazy::new(|| Regex::new(PRICE).expect("price regex"));
static BOUND_PRICE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)ng-binding[^>]*>\s*{PRICE}")).expect("bound price regex")
});
static STRUCTURED_DATA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<script[^>]*type=["']application/ld\+json["'][^>]*>(.*?)</script>"#)
        .expect("json-ld regex")
});
static SHIPPING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Shipping[^$]*\$(-{2,}|\d[\d,]*(?:\.\d{1,2})?)").expect("shipping regex")
});

#[derive(Debug, Clone)]
pub struct PageParser {
    site_root: String,
}

impl Default for PageParser {
    fn default() -> Self {
        Self::new(DEFAULT_SITE_ROOT)
    }
}

impl PageParser {
    pub fn new(site_root: impl Into<String>) -> Self {
        Self {
            site_root: site_root.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn parse(&self, html: &str, source_url: &str) -> AuctionRecord {
        let full_title = extract_full_title(html).unwrap_or_default();
        let title = short_title(&full_title);

        let condition_text =
            extract_condition_text(html).unwrap_or_else(|| DEFAULT_CONDITION_TEXT.to_string());
        let condition_code = condition_code(&condition_text);

        let close_time_label = extract_close_timestamp(html)
            .and_then(close_time_label)
            .unwrap_or_default();
        let manifest_url = extract_manifest_url(html, &self.site_root).unwrap_or_default();
        let bid_price = extract_bid_price(html);
        let shipping = extract_shipping(html);
        let sheet_name = sheet_name(&title, condition_code, &close_time_label);

        debug!(
            target = "tl.page",
            url = source_url,
            sheet_name = %sheet_name,
            bid_price,
            shipping,
            has_manifest = !manifest_url.is_empty(),
            "auction_page_parsed"
        );

        AuctionRecord {
            title,
            full_title,
            condition_code,
            condition_text,
            condition_for_notes: condition_code.notes_label().to_string(),
            close_time_label,
            manifest_url,
            sheet_name,
            bid_price,
            shipping,
            auction_url: source_url.to_string(),
        }
    }
}

pub fn extract_full_title(html: &str) -> Option<String> {
    TITLE_SINGLE_QUOTED
        .captures(html)
        .or_else(|| TITLE_DOUBLE_QUOTED.captures(html))
        .map(|caps| decode_entities(&caps[1]))
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&#39;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Category part of the listing title, compressed to fit a sheet tab name.
pub fn short_title(full_title: &str) -> String {
    let category = full_title.split(" - ").next().unwrap_or_default().trim();
    let shortened = shorten_words(category);
    let merged = merge_accessory_segments(&shortened);
    truncate_title(&merged)
}

pub fn shorten_words(title: &str) -> String {
    SHORTENINGS
        .iter()
        .fold(title.to_string(), |acc, (pattern, short)| {
            pattern.replace_all(&acc, *short).into_owned()
        })
}

/// `"Home Theater Acce, Comp Acce"` becomes `"Home Theater/Comp Acce"`.
pub fn merge_accessory_segments(title: &str) -> String {
    let (accessories, others): (Vec<&str>, Vec<&str>) = title
        .split(',')
        .map(str::trim)
        .partition(|part| part.ends_with(ACCESSORY_SUFFIX));
    if accessories.len() < 2 {
        return title.to_string();
    }
    let prefixes = accessories
        .into_iter()
        .map(|part| part.strip_suffix(" Acce").unwrap_or(part))
        .collect::<Vec<_>>()
        .join("/");
    let merged = format!("{prefixes} {ACCESSORY_SUFFIX}");
    others
        .into_iter()
        .filter(|part| !part.is_empty())
        .chain(std::iter::once(merged.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn truncate_title(title: &str) -> String {
    let chars: Vec<char> = title.chars().collect();
    if chars.len() <= TITLE_BUDGET {
        return title.to_string();
    }
    let head: String = chars[..TITLE_BUDGET].iter().collect();
    let on_boundary =
        chars[TITLE_BUDGET].is_whitespace() || chars[TITLE_BUDGET - 1].is_whitespace();
    let cut = if on_boundary {
        head.as_str()
    } else {
        match head.rfind(' ') {
            Some(idx) if head[..idx].chars().count() > TITLE_BUDGET - WORD_BACKOFF => {
                &head[..idx]
            }
            _ => head.as_str(),
        }
    };
    cut.trim_end_matches(|c: char| c.is_whitespace() || c == ',')
        .to_string()
}

pub fn extract_condition_text(html: &str) -> Option<String> {
    let caps = CONDITION.captures(html)?;
    let text = caps[1].split(" - ").next().unwrap_or_default().trim();
    Some(text.to_string())
}

/// Free-text condition to code; rules are checked in priority order.
pub fn condition_code(text: &str) -> ConditionCode {
    let text = text.to_lowercase();
    if text.contains("uninspected") {
        ConditionCode::Uninspected
    } else if text.contains("used") || text.contains("working") {
        ConditionCode::UsedWorking
    } else if text.contains("brand new") || (text.contains("new") && !text.contains("like")) {
        ConditionCode::New
    } else if text.contains("like new") {
        ConditionCode::LikeNew
    } else if text.contains("salvage") {
        ConditionCode::Salvage
    } else {
        ConditionCode::Uninspected
    }
}

pub fn extract_close_timestamp(html: &str) -> Option<&str> {
    CLOSE_TIMESTAMP
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// UTC timestamp to Pacific standard time (fixed UTC-8, no DST), e.g. 08:09 → `"809"`.
pub fn close_time_label(timestamp: &str) -> Option<String> {
    let utc = DateTime::parse_from_rfc3339(timestamp.trim())
        .map(|dt| dt.naive_utc())
        .or_else(|_| NaiveDateTime::parse_from_str(timestamp.trim(), "%Y-%m-%dT%H:%M:%S"))
        .ok()?;
    let offset = FixedOffset::west_opt(PACIFIC_STANDARD_OFFSET_SECS)?;
    let local = utc.and_utc().with_timezone(&offset);
    Some(format!("{}{:02}", local.hour(), local.minute()))
}

pub fn extract_manifest_url(html: &str, site_root: &str) -> Option<String> {
    let href = MANIFEST_HREF.captures(html)?.get(1)?.as_str().trim();
    Some(resolve_url(href, site_root))
}

fn resolve_url(href: &str, site_root: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if let Some(rest) = href.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        format!(
            "{}/{}",
            site_root.trim_end_matches('/'),
            href.trim_start_matches('/')
        )
    }
}

/// Current bid; the first strategy yielding a positive amount wins, otherwise `0.0`.
pub fn extract_bid_price(html: &str) -> f64 {
    bid_from_pricing_box(html)
        .or_else(|| bid_from_bound_element(html))
        .or_else(|| bid_from_price_drop(html))
        .or_else(|| bid_from_structured_data(html))
        .unwrap_or(0.0)
}

pub fn bid_from_pricing_box(html: &str) -> Option<f64> {
    price_after_marker(html, "lot-pricing-box", 500)
}

pub fn bid_from_bound_element(html: &str) -> Option<f64> {
    let caps = BOUND_PRICE.captures(html)?;
    parse_amount(&caps[1]).filter(|price| *price > 0.0)
}

pub fn bid_from_price_drop(html: &str) -> Option<f64> {
    price_after_marker(html, "price-drop", 100)
}

/// Starting price from JSON-LD `offers.price`; not the live bid.
pub fn bid_from_structured_data(html: &str) -> Option<f64> {
    STRUCTURED_DATA.captures_iter(html).find_map(|caps| {
        let data: Value = serde_json::from_str(caps[1].trim()).ok()?;
        let offers = data.get("offers")?;
        let offer = match offers {
            Value::Array(list) => list.first()?,
            other => other,
        };
        let price = match offer.get("price")? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => parse_amount(s.trim().trim_start_matches('$')),
            _ => None,
        }?;
        (price > 0.0).then_some(price)
    })
}

/// First dollar amount whose `$` lies within `window` bytes after `marker` (case-insensitive).
fn price_after_marker(html: &str, marker: &str, window: usize) -> Option<f64> {
    let start = html.to_ascii_lowercase().find(marker)? + marker.len();
    let found = DOLLAR_AMOUNT.captures(&html[start..])?;
    if found.get(0)?.start() > window {
        return None;
    }
    parse_amount(&found[1]).filter(|price| *price > 0.0)
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok()
}

/// Shipping charge; "No Address" or a dashed placeholder means no quote yet.
pub fn extract_shipping(html: &str) -> f64 {
    if html.to_ascii_lowercase().contains("no address") {
        return 0.0;
    }
    SHIPPING
        .captures(html)
        .and_then(|caps| {
            let value = caps.get(1)?.as_str();
            if value.starts_with('-') {
                return Some(0.0);
            }
            parse_amount(value)
        })
        .unwrap_or(0.0)
}

pub fn sheet_name(title: &str, code: ConditionCode, close_time: &str) -> String {
    format!("TL {title} {} {close_time}", code.as_str())
        .trim()
        .to_string()
}

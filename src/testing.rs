//! In-memory transport and fixtures shared by unit tests.

use crate::fetch::FetchError;
use crate::http::{FetchMethod, FetchRequest, Transport};
use crate::proxy::{ProxyCredential, ProxyRotator};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};

pub const AUCTION_HTML: &str = r#"<!doctype html>
<html>
<head>
  <title>Lot PTRF29353</title>
  <script type="application/ld+json">{"@type":"Product","name":"Lot","offers":{"@type":"Offer","price":"150.00","priceCurrency":"USD"}}</script>
</head>
<body>
  <h1 class="edit-listing-title" title='Home Theater Accessories, Computer Accessories - Insignia &amp; Rocketfish - Orig. Retail $1,234'>Home Theater Accessories</h1>
  <p><strong>Condition:</strong> Uninspected Returns - Items have not been tested</p>
  <span class="countdown" data-timestamp='2025-12-12T16:10:00Z'></span>
  <a class="btn" href="/pallet_manifests/PTRF29353/PTRF29353.csv">Download Manifest</a>
  <div class="lot-pricing-box">
    <div class="lot-pricing-box-item"><div class="col-xs-9">Current Bid</div><div class="col-xs-3 text-left ng-binding">$1,201.90</div></div>
    <div class="lot-pricing-box-item"><div class="col-xs-9">Shipping</div><div class="col-xs-3 text-left ng-binding">$85.50</div></div>
  </div>
</body>
</html>"#;

pub const MANIFEST_CSV: &str = "UPC,Product Name,Quantity,Unit Retail
111,Remote,2,$9.99
222,hdmi switch,1,$24.50
333,Soundbar,,\"$1,299.99\"
444,HDMI Cable,3,$24.50
";

pub const NO_MANIFEST_HTML: &str = r#"<h1 class="edit-listing-title" title="Small Appliances - Brand">x</h1>
<p><strong>Condition:</strong> Brand New</p>
<span data-timestamp="2025-07-01T22:30:00Z"></span>"#;

pub fn test_rotator(size: usize) -> ProxyRotator {
    let pool = (0..size)
        .map(|i| {
            ProxyCredential::parse(&format!("proxy.test:{}:user:pass", 10001 + i), i)
                .expect("test proxy")
        })
        .collect();
    ProxyRotator::new(pool).expect("non-empty pool")
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: FetchMethod,
    pub url: String,
    pub body: Option<Vec<u8>>,
    pub proxy: Option<String>,
}

impl RecordedCall {
    pub fn json(&self) -> serde_json::Value {
        self.body
            .as_deref()
            .and_then(|body| serde_json::from_slice(body).ok())
            .unwrap_or(serde_json::Value::Null)
    }
}

type Handler =
    dyn Fn(&FetchRequest, Option<&ProxyCredential>) -> Result<Vec<u8>, FetchError> + Send + Sync;

struct Gate {
    url_fragment: String,
    entered: Arc<Notify>,
    permits: Arc<Semaphore>,
}

/// Answers requests from a closure, recording every call. A gate can hold requests for
/// matching URLs until the test releases them.
pub struct FakeTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<RecordedCall>>,
    gate: Option<Gate>,
}

impl FakeTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&FetchRequest, Option<&ProxyCredential>) -> Result<Vec<u8>, FetchError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Holds requests whose URL contains `url_fragment`; returns (entered, release).
    pub fn gated(mut self, url_fragment: &str) -> (Self, Arc<Notify>, Arc<Semaphore>) {
        let entered = Arc::new(Notify::new());
        let permits = Arc::new(Semaphore::new(0));
        self.gate = Some(Gate {
            url_fragment: url_fragment.to_string(),
            entered: entered.clone(),
            permits: permits.clone(),
        });
        (self, entered, permits)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn calls_to(&self, fragment: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.url.contains(fragment))
            .collect()
    }
}

impl Transport for FakeTransport {
    async fn send(
        &self,
        request: &FetchRequest,
        proxy: Option<&ProxyCredential>,
    ) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().expect("calls lock").push(RecordedCall {
            method: request.method,
            url: request.url.clone(),
            body: request.body.clone(),
            proxy: proxy.map(|p| p.label.clone()),
        });
        if let Some(gate) = &self.gate
            && request.url.contains(&gate.url_fragment)
        {
            gate.entered.notify_one();
            if let Ok(permit) = gate.permits.acquire().await {
                permit.forget();
            }
        }
        (self.handler)(request, proxy)
    }
}

/// Marketplace plus sheet endpoint: auction pages under `/detail/`, `fail` in the URL
/// answers 500, the sheet lists `links` and acknowledges pushes.
pub fn marketplace(links: Vec<(&str, u32)>) -> FakeTransport {
    let links: Vec<serde_json::Value> = links
        .into_iter()
        .map(|(url, row)| serde_json::json!({"url": url, "row": row}))
        .collect();
    FakeTransport::new(move |request, _| {
        if request.url.starts_with("https://sheet.test") {
            let body: serde_json::Value = request
                .body
                .as_deref()
                .and_then(|b| serde_json::from_slice(b).ok())
                .unwrap_or_default();
            return match body["action"].as_str() {
                Some("getLinks") => Ok(serde_json::to_vec(&serde_json::json!({"links": links}))
                    .expect("links json")),
                _ => Ok(br#"{"success":true}"#.to_vec()),
            };
        }
        if request.url.contains("fail") {
            return Err(FetchError::Status(500));
        }
        if request.url.contains("pallet_manifests") {
            return Ok(MANIFEST_CSV.as_bytes().to_vec());
        }
        if request.url.contains("/detail/") {
            return Ok(AUCTION_HTML.as_bytes().to_vec());
        }
        Err(FetchError::Status(404))
    })
}

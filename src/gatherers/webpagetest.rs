use super::{query_value, snippet, Gatherer, GathererError, Response};
use crate::config::{ConfigError, GathererConfig};
use crate::connectors::EnvVars;
use crate::engine::Options;
use crate::model::{Test, TestResult};
use crate::path;
use anyhow::Result;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

pub const NAME: &str = "webpagetest";
const DEFAULT_BASE_URL: &str = "https://www.webpagetest.org";
const DEFAULT_API_KEY_ENV: &str = "webPageTestApiKey";

/// First-view median metrics: (metric name, key path under `data.median.firstView`).
/// Some WebPageTest keys contain dots, so paths are given as segments.
const FIRST_VIEW_METRICS: &[(&str, &[&str])] = &[
    ("TTFB", &["TTFB"]),
    ("FirstContentfulPaint", &["firstContentfulPaint"]),
    ("StartRender", &["render"]),
    ("SpeedIndex", &["SpeedIndex"]),
    ("LargestContentfulPaint", &["chromeUserTiming.LargestContentfulPaint"]),
    ("CumulativeLayoutShift", &["chromeUserTiming.CumulativeLayoutShift"]),
    ("TotalBlockingTime", &["TotalBlockingTime"]),
    ("LoadTime", &["loadTime"]),
    ("FullyLoaded", &["fullyLoaded"]),
    ("BytesIn", &["bytesIn"]),
    ("Requests", &["requestsFull"]),
];

/// WebPageTest: asynchronous submit, then poll until the test completes.
pub struct WebPageTestGatherer {
    client: Client,
    base_url: String,
    api_key: String,
}

impl WebPageTestGatherer {
    pub fn new(config: &GathererConfig, env: &EnvVars) -> Result<Self, ConfigError> {
        let key_name = config.api_key_env.as_deref().unwrap_or(DEFAULT_API_KEY_ENV);
        let api_key = env.get(key_name).cloned().ok_or_else(|| ConfigError::MissingEnvVar {
            name: key_name.to_string(),
            component: format!("gatherer '{}'", NAME),
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid {
                component: format!("gatherer '{}'", NAME),
                reason: e.to_string(),
            })?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn get_json(&self, endpoint: &str, query: &[(String, String)]) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let resp = self.client.get(&url).query(query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GathererError::HttpStatus {
                service: "WebPageTest",
                status: status.as_u16(),
                body: snippet(&body),
            }
            .into());
        }
        Ok(resp.json::<Value>().await?)
    }
}

#[async_trait::async_trait]
impl Gatherer for WebPageTestGatherer {
    async fn run(&self, test: &Test, _options: &Options) -> Result<Response> {
        let mut query = vec![
            ("url".to_string(), test.url.clone()),
            ("k".to_string(), self.api_key.clone()),
            ("f".to_string(), "json".to_string()),
        ];
        if let Value::Object(settings) = test.source_settings(NAME) {
            for (k, v) in &settings {
                if let Some(v) = query_value(v) {
                    query.push((k.clone(), v));
                }
            }
        }

        debug!(url = %test.url, "Submitting WebPageTest run");
        match self.get_json("runtest.php", &query).await {
            Ok(json) => Ok(parse_submit(&json)),
            Err(e) => Ok(Response::error(e.to_string())),
        }
    }

    async fn retrieve(&self, result: &TestResult, _options: &Options) -> Result<Response> {
        let test_id = result
            .source(NAME)
            .and_then(|r| r.metadata.get("testId").and_then(Value::as_str).map(String::from));
        let Some(test_id) = test_id else {
            return Ok(Response::error("no WebPageTest testId in result metadata"));
        };

        debug!(%test_id, "Polling WebPageTest result");
        let query = [("test".to_string(), test_id)];
        match self.get_json("jsonResult.php", &query).await {
            Ok(json) => Ok(parse_result(&json)),
            Err(e) => Ok(Response::error(e.to_string())),
        }
    }
}

/// Map a `runtest.php` reply into a Response.
pub fn parse_submit(json: &Value) -> Response {
    let status_text = json
        .get("statusText")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if json.get("statusCode").and_then(Value::as_u64) != Some(200) {
        return Response::error(format!("WebPageTest rejected the test: {}", status_text));
    }
    let Some(data) = json.get("data") else {
        return Response::error(
            GathererError::MissingField {
                service: "WebPageTest",
                field: "data",
            }
            .to_string(),
        );
    };
    Response::submitted(json!({
        "testId": data.get("testId"),
        "jsonUrl": data.get("jsonUrl"),
        "userUrl": data.get("userUrl"),
    }))
}

/// Map a `jsonResult.php` reply into a Response.
pub fn parse_result(json: &Value) -> Response {
    let code = json.get("statusCode").and_then(Value::as_u64).unwrap_or(0);
    let status_text = json
        .get("statusText")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match code {
        100..=199 => Response::pending(status_text),
        200 => {
            let Some(first_view) = json.pointer("/data/median/firstView") else {
                return Response::error(
                    GathererError::MissingField {
                        service: "WebPageTest",
                        field: "data.median.firstView",
                    }
                    .to_string(),
                );
            };
            let mut metrics = Value::Object(Map::new());
            for (name, segments) in FIRST_VIEW_METRICS {
                if let Some(v) = path::get(first_view, *segments) {
                    path::set(&mut metrics, &[*name], v.clone());
                }
            }
            Response::retrieved(metrics).with_metadata(json!({
                "testId": json.pointer("/data/id"),
                "summary": json.pointer("/data/summary"),
                "location": json.pointer("/data/location"),
                "connectivity": json.pointer("/data/connectivity"),
            }))
        }
        _ => Response::error(format!("WebPageTest test failed ({}): {}", code, status_text)),
    }
}

use super::{query_value, snippet, Gatherer, GathererError, Response};
use crate::config::{ConfigError, GathererConfig};
use crate::connectors::EnvVars;
use crate::engine::Options;
use crate::model::Test;
use crate::path;
use anyhow::Result;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

pub const NAME: &str = "psi";
const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/pagespeedonline/v5/runPagespeed";
const DEFAULT_API_KEY_ENV: &str = "psiApiKey";

/// Lighthouse lab metrics: (metric name, dotted path in the PSI response).
const LAB_METRICS: &[(&str, &str)] = &[
    ("FirstContentfulPaint", "lighthouseResult.audits.first-contentful-paint.numericValue"),
    ("LargestContentfulPaint", "lighthouseResult.audits.largest-contentful-paint.numericValue"),
    ("SpeedIndex", "lighthouseResult.audits.speed-index.numericValue"),
    ("TotalBlockingTime", "lighthouseResult.audits.total-blocking-time.numericValue"),
    ("CumulativeLayoutShift", "lighthouseResult.audits.cumulative-layout-shift.numericValue"),
    ("TimeToInteractive", "lighthouseResult.audits.interactive.numericValue"),
    ("PerformanceScore", "lighthouseResult.categories.performance.score"),
];

/// Field (CrUX) percentiles reported alongside the lab run.
const FIELD_METRICS: &[(&str, &str)] = &[
    ("FirstContentfulPaint", "loadingExperience.metrics.FIRST_CONTENTFUL_PAINT_MS.percentile"),
    ("LargestContentfulPaint", "loadingExperience.metrics.LARGEST_CONTENTFUL_PAINT_MS.percentile"),
    ("CumulativeLayoutShift", "loadingExperience.metrics.CUMULATIVE_LAYOUT_SHIFT_SCORE.percentile"),
    ("InteractionToNextPaint", "loadingExperience.metrics.INTERACTION_TO_NEXT_PAINT.percentile"),
];

/// PageSpeed Insights: one synchronous call returns a complete Lighthouse run.
pub struct PsiGatherer {
    client: Client,
    base_url: String,
    api_key: String,
}

impl PsiGatherer {
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
        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
        })
    }

    async fn fetch(&self, test: &Test) -> Result<Value> {
        let settings = test.source_settings(NAME);
        let mut query = vec![
            ("url".to_string(), test.url.clone()),
            ("key".to_string(), self.api_key.clone()),
            ("category".to_string(), "performance".to_string()),
        ];
        if let Value::Object(map) = &settings {
            for (k, v) in map {
                if let Some(v) = query_value(v) {
                    query.push((k.clone(), v));
                }
            }
        }

        debug!(url = %test.url, "Requesting PageSpeed Insights run");
        let resp = self.client.get(&self.base_url).query(&query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GathererError::HttpStatus {
                service: "PageSpeed Insights",
                status: status.as_u16(),
                body: snippet(&body),
            }
            .into());
        }
        Ok(resp.json::<Value>().await?)
    }
}

#[async_trait::async_trait]
impl Gatherer for PsiGatherer {
    async fn run(&self, test: &Test, _options: &Options) -> Result<Response> {
        match self.fetch(test).await {
            Ok(json) => Ok(parse_response(&json)),
            Err(e) => Ok(Response::error(e.to_string())),
        }
    }
}

/// Map a `runPagespeed` payload into a Response.
pub fn parse_response(json: &Value) -> Response {
    if let Some(message) = json.pointer("/error/message").and_then(Value::as_str) {
        return Response::error(message);
    }
    if json.get("lighthouseResult").is_none() {
        return Response::error(
            GathererError::MissingField {
                service: "PageSpeed Insights",
                field: "lighthouseResult",
            }
            .to_string(),
        );
    }

    let mut metrics = Value::Object(Map::new());
    for (group, table) in [("lighthouse", LAB_METRICS), ("crux", FIELD_METRICS)] {
        for (name, source) in table {
            if let Some(v) = path::get(json, &path::parse(source)) {
                path::set(&mut metrics, &[group, *name], v.clone());
            }
        }
    }

    Response::retrieved(metrics).with_metadata(json!({
        "lighthouseVersion": json.pointer("/lighthouseResult/lighthouseVersion"),
        "fetchTime": json.pointer("/lighthouseResult/fetchTime"),
        "analysisUTCTimestamp": json.get("analysisUTCTimestamp"),
    }))
}

//! Gatherers submit Tests to one external measurement service and poll it
//! for results. One implementation per data source.

pub mod psi;
pub mod webpagetest;

use crate::engine::Options;
use crate::model::{Status, Test, TestResult};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GathererError {
    #[error("{service} returned HTTP {status}: {body}")]
    HttpStatus {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} response is missing {field}")]
    MissingField {
        service: &'static str,
        field: &'static str,
    },
}

/// What a gatherer reports for one Test or Result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status: Status,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub metrics: Option<Value>,
    #[serde(default)]
    pub settings: Option<Value>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl Response {
    pub fn submitted(metadata: Value) -> Self {
        Self {
            status: Status::Submitted,
            status_text: "Submitted".to_string(),
            metadata: Some(metadata),
            metrics: None,
            settings: None,
            errors: Vec::new(),
        }
    }

    /// Still running upstream; the stored metadata is left as is.
    pub fn pending(status_text: impl Into<String>) -> Self {
        Self {
            status: Status::Submitted,
            status_text: status_text.into(),
            metadata: None,
            metrics: None,
            settings: None,
            errors: Vec::new(),
        }
    }

    pub fn retrieved(metrics: Value) -> Self {
        Self {
            status: Status::Retrieved,
            status_text: "Retrieved".to_string(),
            metadata: None,
            metrics: Some(metrics),
            settings: None,
            errors: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status: Status::Error,
            status_text: message.clone(),
            metadata: None,
            metrics: None,
            settings: None,
            errors: vec![message],
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = text.into();
        self
    }
}

/// Trait for all data source adapters (WebPageTest, PageSpeed Insights, ...).
///
/// Every operation is optional. Failures should come back as an `Error`
/// [`Response`]; an `Err` is still tolerated and converted by the engine.
#[async_trait::async_trait]
pub trait Gatherer: Send + Sync {
    /// Submit one Test for measurement.
    async fn run(&self, _test: &Test, _options: &Options) -> Result<Response> {
        Ok(Response::error("run is not supported"))
    }

    /// Poll for a previously submitted job, keyed by the Result's metadata.
    async fn retrieve(&self, _result: &TestResult, _options: &Options) -> Result<Response> {
        Ok(Response::error("retrieve is not supported"))
    }

    /// Bulk `run`; one Response per Test in order, or `None` when unsupported.
    async fn run_batch(&self, _tests: &[Test], _options: &Options) -> Result<Option<Vec<Response>>> {
        Ok(None)
    }

    /// Bulk `retrieve`; one Response per Result in order, or `None`.
    async fn retrieve_batch(
        &self,
        _results: &[TestResult],
        _options: &Options,
    ) -> Result<Option<Vec<Response>>> {
        Ok(None)
    }
}

/// Render a settings value as a query-string parameter.
pub(crate) fn query_value(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        _ => None,
    }
}

/// First 200 characters of a response body, for error messages.
pub(crate) fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

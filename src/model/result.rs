use super::{ResultType, Status, Test};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The outcome of running one Test, with one sub-record per data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub id: String,
    #[serde(rename = "type")]
    pub result_type: ResultType,
    pub status: Status,
    #[serde(default)]
    pub label: String,
    pub url: String,
    pub created_timestamp: i64,
    pub modified_timestamp: i64,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Per-data-source section of a Result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    pub status: Status,
    #[serde(default)]
    pub status_text: String,
    #[serde(default = "empty_object")]
    pub metadata: Value,
    #[serde(default = "empty_object")]
    pub settings: Value,
    #[serde(default = "empty_object")]
    pub metrics: Value,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl TestResult {
    /// A fresh `Submitted` Result for `test`, created at `now`. The id is
    /// `{now}-{url}-{uuid}` so Tests sharing a URL never collide.
    pub fn for_test(test: &Test, result_type: ResultType, now: i64) -> Self {
        Self {
            id: format!("{}-{}-{}", now, test.url, uuid::Uuid::new_v4().simple()),
            result_type,
            status: Status::Submitted,
            label: test.display_label().to_string(),
            url: test.url.clone(),
            created_timestamp: now,
            modified_timestamp: now,
            errors: Vec::new(),
            fields: Map::new(),
        }
    }

    /// Decoded sub-record for `source`, if present and well-formed.
    pub fn source(&self, source: &str) -> Option<SourceRecord> {
        self.fields
            .get(source)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn has_source(&self, source: &str) -> bool {
        matches!(self.fields.get(source), Some(Value::Object(_)))
    }

    pub fn set_source(&mut self, source: &str, record: &SourceRecord) {
        match serde_json::to_value(record) {
            Ok(v) => {
                self.fields.insert(source.to_string(), v);
            }
            Err(e) => {
                tracing::warn!(%source, error = %e, "Failed to encode source record");
            }
        }
    }

    /// Status of the `source` sub-record; a sub-record without a readable
    /// status counts as `Error`.
    pub fn source_status(&self, source: &str) -> Option<Status> {
        let sub = self.fields.get(source)?;
        Some(
            sub.get("status")
                .and_then(|s| serde_json::from_value(s.clone()).ok())
                .unwrap_or(Status::Error),
        )
    }

    /// Recompute the overall status from the per-source statuses.
    pub fn update_overall_status(&mut self, data_sources: &[String]) -> Status {
        let statuses: Vec<Status> = data_sources
            .iter()
            .filter_map(|ds| self.source_status(ds))
            .collect();
        self.status = Status::aggregate(statuses);
        self.status
    }
}

use serde::{Deserialize, Serialize};

/// Options for one pipeline invocation, also handed to every gatherer,
/// connector and extension call made during it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    /// Filter predicates applied to the Test or Result list.
    pub filters: Vec<String>,
    /// Submit each data source once across all Tests instead of per Test.
    pub run_by_batch: bool,
    /// Overrides the configured write buffer size; 0 writes once at the end.
    pub batch_update_buffer: Option<usize>,
    /// `recurring` only arms schedules and makes no gatherer calls.
    pub activate_only: bool,
}

impl Options {
    pub fn with_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters = filters.into_iter().map(Into::into).collect();
        self
    }
}

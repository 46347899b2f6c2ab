//! Connectors persist Tests and Results to a backing store.

pub mod memory;
pub mod sqlite;

use crate::engine::Options;
use crate::model::{Test, TestResult};
use anyhow::Result;
use std::collections::BTreeMap;

/// Backend-held secrets and settings (API keys etc.), by name.
pub type EnvVars = BTreeMap<String, String>;

/// Trait for all storage backends.
///
/// After `update_*` returns, a following `get_*` in the same process must
/// observe the new values. Failures are returned as errors and are not
/// recovered by the engine.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Tests matching `options.filters`, with backend identity metadata attached.
    async fn get_test_list(&self, options: &Options) -> Result<Vec<Test>>;

    /// Persist mutated Tests in place, matched by backend identity metadata.
    async fn update_test_list(&self, tests: &[Test], options: &Options) -> Result<()>;

    /// Results matching `options.filters`, in insertion order.
    async fn get_result_list(&self, options: &Options) -> Result<Vec<TestResult>>;

    /// Add new Results.
    async fn append_result_list(&self, results: &[TestResult], options: &Options) -> Result<()>;

    /// Overwrite Results matched by `id`; unknown ids are appended.
    async fn update_result_list(&self, results: &[TestResult], options: &Options) -> Result<()>;

    async fn get_env_vars(&self) -> Result<EnvVars>;
}

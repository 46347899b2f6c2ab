//! In-process connector; backs tests and dry runs.

use super::{Connector, EnvVars};
use crate::engine::Options;
use crate::filter;
use crate::model::{Test, TestResult};
use anyhow::Result;
use serde_json::{json, Value};
use tokio::sync::Mutex;

/// Key of the identity metadata attached to every Test read from memory.
pub const METADATA_KEY: &str = "memory";

pub struct MemoryConnector {
    tests: Mutex<Vec<Test>>,
    results: Mutex<Vec<TestResult>>,
    env_vars: EnvVars,
}

impl MemoryConnector {
    pub fn new(tests: Vec<Test>, env_vars: EnvVars) -> Self {
        Self {
            tests: Mutex::new(tests),
            results: Mutex::new(Vec::new()),
            env_vars,
        }
    }

    pub fn with_results(self, results: Vec<TestResult>) -> Self {
        Self {
            results: Mutex::new(results),
            ..self
        }
    }

    /// Stored Tests, without identity metadata.
    pub async fn tests(&self) -> Vec<Test> {
        self.tests.lock().await.clone()
    }

    /// Stored Results in insertion order.
    pub async fn results(&self) -> Vec<TestResult> {
        self.results.lock().await.clone()
    }
}

fn row_index(test: &Test) -> Option<usize> {
    test.fields
        .get(METADATA_KEY)
        .and_then(|m| m.get("rowIndex"))
        .and_then(Value::as_u64)
        .map(|i| i as usize)
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    async fn get_test_list(&self, options: &Options) -> Result<Vec<Test>> {
        let tests: Vec<Test> = self
            .tests
            .lock()
            .await
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let mut t = t.clone();
                t.fields
                    .insert(METADATA_KEY.to_string(), json!({ "rowIndex": i }));
                t
            })
            .collect();
        Ok(filter::apply(tests, &options.filters))
    }

    async fn update_test_list(&self, tests: &[Test], _options: &Options) -> Result<()> {
        let mut stored = self.tests.lock().await;
        for test in tests {
            let idx = row_index(test)
                .ok_or_else(|| anyhow::anyhow!("test '{}' has no {}.rowIndex", test.url, METADATA_KEY))?;
            let slot = stored
                .get_mut(idx)
                .ok_or_else(|| anyhow::anyhow!("row index {} out of range", idx))?;
            let mut test = test.clone();
            test.fields.remove(METADATA_KEY);
            *slot = test;
        }
        Ok(())
    }

    async fn get_result_list(&self, options: &Options) -> Result<Vec<TestResult>> {
        let results = self.results.lock().await.clone();
        Ok(filter::apply(results, &options.filters))
    }

    async fn append_result_list(&self, results: &[TestResult], _options: &Options) -> Result<()> {
        self.results.lock().await.extend_from_slice(results);
        Ok(())
    }

    async fn update_result_list(&self, results: &[TestResult], _options: &Options) -> Result<()> {
        let mut stored = self.results.lock().await;
        for result in results {
            match stored.iter_mut().find(|r| r.id == result.id) {
                Some(slot) => *slot = result.clone(),
                None => stored.push(result.clone()),
            }
        }
        Ok(())
    }

    async fn get_env_vars(&self) -> Result<EnvVars> {
        Ok(self.env_vars.clone())
    }
}

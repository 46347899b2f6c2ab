//! Buffered write-back of Results and Tests.
//!
//! Items accumulate until `capacity` Results are held, then go to the
//! connector in one batch. A capacity of 0 holds everything until `finish`.

use crate::connectors::Connector;
use crate::engine::Options;
use crate::model::{Test, TestResult};
use anyhow::Result;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    /// New Results (`run`, `recurring`).
    Append,
    /// Existing Results, matched by id (`retrieve`).
    Update,
}

pub(crate) struct WriteBuffer<'a> {
    connector: &'a dyn Connector,
    mode: WriteMode,
    capacity: usize,
    results: Vec<TestResult>,
    tests: Vec<Test>,
    flushes: usize,
}

impl<'a> WriteBuffer<'a> {
    pub(crate) fn new(connector: &'a dyn Connector, mode: WriteMode, capacity: usize) -> Self {
        Self {
            connector,
            mode,
            capacity,
            results: Vec::new(),
            tests: Vec::new(),
            flushes: 0,
        }
    }

    /// Queue a Result, and optionally its Test, flushing when full.
    pub(crate) async fn push(
        &mut self,
        result: TestResult,
        test: Option<Test>,
        options: &Options,
    ) -> Result<()> {
        self.results.push(result);
        self.tests.extend(test);
        if self.capacity > 0 && self.results.len() >= self.capacity {
            self.flush(options).await?;
        }
        Ok(())
    }

    pub(crate) async fn flush(&mut self, options: &Options) -> Result<()> {
        if self.results.is_empty() && self.tests.is_empty() {
            return Ok(());
        }
        debug!(
            results = self.results.len(),
            tests = self.tests.len(),
            mode = ?self.mode,
            "Flushing write buffer"
        );
        if !self.results.is_empty() {
            match self.mode {
                WriteMode::Append => {
                    self.connector
                        .append_result_list(&self.results, options)
                        .await?
                }
                WriteMode::Update => {
                    self.connector
                        .update_result_list(&self.results, options)
                        .await?
                }
            }
        }
        if !self.tests.is_empty() {
            self.connector.update_test_list(&self.tests, options).await?;
        }
        self.results.clear();
        self.tests.clear();
        self.flushes += 1;
        Ok(())
    }

    /// Write whatever is left; returns the number of flushes made.
    pub(crate) async fn finish(mut self, options: &Options) -> Result<usize> {
        self.flush(options).await?;
        Ok(self.flushes)
    }
}

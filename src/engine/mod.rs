//! The orchestration engine: `run`, `recurring` and `retrieve` pipelines.
//!
//! Every pipeline reads its work list from the connector, drives the
//! gatherers one data source at a time, folds their responses into Results,
//! runs the extension hooks and writes back through a [`WriteBuffer`].

mod buffer;
mod options;

pub use options::Options;

use crate::config::AwpConfig;
use crate::connectors::Connector;
use crate::extensions::Extension;
use crate::gatherers::{Gatherer, Response};
use crate::model::{now_millis, Frequency, ResultType, SourceRecord, Status, Test, TestResult};
use crate::registry::Registry;
use anyhow::Result;
use buffer::{WriteBuffer, WriteMode};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Default `retrieve` selection: everything still waiting on a data source.
const PENDING_RESULTS_FILTER: &str = "status !== 'Retrieved' && status !== 'Duplicate'";

/// What one pipeline invocation did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSummary {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tests: Vec<Test>,
    pub results: Vec<TestResult>,
    pub errors: Vec<String>,
}

pub struct Engine {
    connector: Arc<dyn Connector>,
    data_sources: Vec<String>,
    gatherers: Vec<Arc<dyn Gatherer>>,
    extensions: Vec<Arc<dyn Extension>>,
    batch_update_buffer: usize,
}

impl Engine {
    /// Assemble an engine. `gatherers` gives the data sources in processing
    /// order, each with the gatherer serving it.
    pub fn new(
        connector: Arc<dyn Connector>,
        gatherers: Vec<(String, Arc<dyn Gatherer>)>,
        extensions: Vec<Arc<dyn Extension>>,
        batch_update_buffer: usize,
    ) -> Self {
        let (data_sources, gatherers) = gatherers.into_iter().unzip();
        Self {
            connector,
            data_sources,
            gatherers,
            extensions,
            batch_update_buffer,
        }
    }

    /// Build every plug-in named in `config` through `registry`. Gatherers
    /// are handed the connector's env vars.
    pub async fn from_config(config: &AwpConfig, registry: &Registry) -> Result<Self> {
        config.validate()?;
        registry.check(config)?;

        let connector = registry.connector(config)?;
        let env = connector.get_env_vars().await?;

        let mut gatherers = Vec::with_capacity(config.engine.data_sources.len());
        for ds in &config.engine.data_sources {
            let gatherer = registry.gatherer(ds, &config.gatherer(ds), &env)?;
            gatherers.push((ds.clone(), gatherer));
        }
        let extensions = config
            .engine
            .extensions
            .iter()
            .map(|name| registry.extension(name))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            connector = %config.engine.connector,
            data_sources = ?config.engine.data_sources,
            extensions = ?config.engine.extensions,
            "Engine ready"
        );
        Ok(Self::new(
            connector,
            gatherers,
            extensions,
            config.engine.batch_update_buffer,
        ))
    }

    // -----------------------------------------------------------------------
    // Pipelines
    // -----------------------------------------------------------------------

    /// Submit every selected Test once and append a new Result for each.
    #[instrument(skip_all, fields(pipeline = "run", run_id = %uuid::Uuid::new_v4()))]
    pub async fn run(&self, options: &Options) -> Result<PipelineSummary> {
        let tests = self.connector.get_test_list(options).await?;
        info!(tests = tests.len(), "Starting run");
        self.run_tests(tests, ResultType::Single, options).await
    }

    /// Run the recurring Tests that are due, then schedule their next trigger.
    /// With `activate_only`, only arms schedules whose frequency changed.
    #[instrument(skip_all, fields(pipeline = "recurring", run_id = %uuid::Uuid::new_v4()))]
    pub async fn recurring(&self, options: &Options) -> Result<PipelineSummary> {
        let tests = self.connector.get_test_list(options).await?;
        let now = now_millis();

        if options.activate_only {
            let mut armed = Vec::new();
            for mut test in tests {
                let needs_activation = test.frequency().is_some()
                    && test.recurring.as_ref().is_some_and(|r| r.needs_activation());
                if needs_activation {
                    update_next_trigger_timestamp(&mut test, now);
                    armed.push(test);
                }
            }
            if !armed.is_empty() {
                self.connector.update_test_list(&armed, options).await?;
            }
            info!(armed = armed.len(), "Activated recurring schedules");
            return Ok(PipelineSummary {
                tests: armed,
                ..Default::default()
            });
        }

        let due: Vec<Test> = tests
            .into_iter()
            .filter(|t| matches!(t.frequency(), Some(f) if f != Frequency::None))
            .filter(|t| t.recurring.as_ref().is_some_and(|r| r.is_due(now)))
            .collect();
        info!(due = due.len(), "Starting recurring run");
        self.run_tests(due, ResultType::Recurring, options).await
    }

    /// Poll the gatherers for every pending data source of the selected
    /// Results and write the updated Results back.
    #[instrument(skip_all, fields(pipeline = "retrieve", run_id = %uuid::Uuid::new_v4()))]
    pub async fn retrieve(&self, options: &Options) -> Result<PipelineSummary> {
        let mut read_options = options.clone();
        if read_options.filters.is_empty() {
            read_options.filters = vec![PENDING_RESULTS_FILTER.to_string()];
        }
        let mut results = self.connector.get_result_list(&read_options).await?;
        info!(results = results.len(), "Starting retrieve");

        let mut errors = self.dispatch("before_all_retrieves", |ext| {
            ext.before_all_retrieves(&mut results, options)
        });
        for result in results.iter_mut() {
            let hook_errors = self.dispatch("before_retrieve", |ext| ext.before_retrieve(result, options));
            result.errors.extend(hook_errors);
        }

        let mut touched = vec![false; results.len()];
        if options.run_by_batch {
            for (ds, gatherer) in self.data_sources.iter().zip(&self.gatherers) {
                let pending: Vec<usize> = (0..results.len())
                    .filter(|&i| is_pending(&results[i], ds))
                    .collect();
                if pending.is_empty() {
                    continue;
                }
                let batch: Vec<TestResult> = pending.iter().map(|&i| results[i].clone()).collect();
                let responses = self
                    .retrieve_gatherer_in_batch(ds, gatherer.as_ref(), &batch, options)
                    .await;
                for (&i, response) in pending.iter().zip(responses) {
                    merge_response(&mut results[i], ds, None, response);
                    touched[i] = true;
                }
            }
        } else {
            for (i, result) in results.iter_mut().enumerate() {
                for (ds, gatherer) in self.data_sources.iter().zip(&self.gatherers) {
                    if !is_pending(result, ds) {
                        continue;
                    }
                    let response = self.call_retrieve(ds, gatherer.as_ref(), result, options).await;
                    merge_response(result, ds, None, response);
                    touched[i] = true;
                }
            }
        }

        let capacity = options.batch_update_buffer.unwrap_or(self.batch_update_buffer);
        let mut buffer = WriteBuffer::new(self.connector.as_ref(), WriteMode::Update, capacity);
        for (result, touched) in results.iter_mut().zip(touched) {
            if touched {
                result.update_overall_status(&self.data_sources);
                result.modified_timestamp = now_millis();
            }
            let hook_errors = self.dispatch("after_retrieve", |ext| ext.after_retrieve(result, options));
            result.errors.extend(hook_errors);
            buffer.push(result.clone(), None, options).await?;
        }
        let flushes = buffer.finish(options).await?;

        errors.extend(self.dispatch("after_all_retrieves", |ext| {
            ext.after_all_retrieves(&mut results, options)
        }));
        info!(
            results = results.len(),
            retrieved = results.iter().filter(|r| r.status == Status::Retrieved).count(),
            flushes,
            errors = errors.len(),
            "Retrieve finished"
        );
        Ok(PipelineSummary {
            tests: Vec::new(),
            results,
            errors,
        })
    }

    /// Cancelling a submitted job is not offered by any gatherer.
    pub async fn cancel(&self, _options: &Options) -> Result<PipelineSummary> {
        anyhow::bail!("cancel is not supported")
    }

    // -----------------------------------------------------------------------
    // Run internals
    // -----------------------------------------------------------------------

    async fn run_tests(
        &self,
        tests: Vec<Test>,
        result_type: ResultType,
        options: &Options,
    ) -> Result<PipelineSummary> {
        let mut errors = Vec::new();
        let mut tests = tests;
        errors.extend(self.dispatch("before_all_runs", |ext| {
            ext.before_all_runs(&mut tests, options)
        }));

        // Tests without any configured data source produce no Result.
        let mut runnable = Vec::with_capacity(tests.len());
        for test in tests {
            if self.data_sources.iter().any(|ds| test.has_source(ds)) {
                runnable.push(test);
            } else {
                warn!(url = %test.url, "Test has no configured data source");
                errors.push(format!(
                    "[engine] test '{}' has no configured data source",
                    test.display_label()
                ));
            }
        }

        let mut results = Vec::with_capacity(runnable.len());
        for test in runnable.iter_mut() {
            let hook_errors = self.dispatch("before_run", |ext| ext.before_run(test, options));
            test.errors.extend(hook_errors);
            results.push(self.create_new_result(test, result_type));
        }

        if options.run_by_batch {
            for (ds, gatherer) in self.data_sources.iter().zip(&self.gatherers) {
                let members: Vec<usize> = (0..runnable.len())
                    .filter(|&i| runnable[i].has_source(ds))
                    .collect();
                if members.is_empty() {
                    continue;
                }
                let batch: Vec<Test> = members.iter().map(|&i| runnable[i].clone()).collect();
                let responses = self
                    .run_gatherer_in_batch(ds, gatherer.as_ref(), &batch, options)
                    .await;
                for (&i, response) in members.iter().zip(responses) {
                    let settings = runnable[i].source_settings(ds);
                    merge_response(&mut results[i], ds, Some(settings), response);
                }
            }
        } else {
            for (test, result) in runnable.iter().zip(results.iter_mut()) {
                for (ds, gatherer) in self.data_sources.iter().zip(&self.gatherers) {
                    if !test.has_source(ds) {
                        continue;
                    }
                    let response = self.call_run(ds, gatherer.as_ref(), test, options).await;
                    merge_response(result, ds, Some(test.source_settings(ds)), response);
                }
            }
        }

        let capacity = options.batch_update_buffer.unwrap_or(self.batch_update_buffer);
        let mut buffer = WriteBuffer::new(self.connector.as_ref(), WriteMode::Append, capacity);
        for (test, result) in runnable.iter_mut().zip(results.iter_mut()) {
            result.update_overall_status(&self.data_sources);
            let hook_errors = self.dispatch("after_run", |ext| ext.after_run(test, result, options));
            result.errors.extend(hook_errors);
            if result_type == ResultType::Recurring && result.status != Status::Error {
                update_next_trigger_timestamp(test, now_millis());
            }
            buffer
                .push(result.clone(), Some(test.clone()), options)
                .await?;
        }
        let flushes = buffer.finish(options).await?;

        errors.extend(self.dispatch("after_all_runs", |ext| {
            ext.after_all_runs(&mut runnable, &mut results, options)
        }));
        info!(
            tests = runnable.len(),
            results = results.len(),
            flushes,
            errors = errors.len(),
            "Run finished"
        );
        Ok(PipelineSummary {
            tests: runnable,
            results,
            errors,
        })
    }

    /// A fresh `Submitted` Result for `test`.
    fn create_new_result(&self, test: &Test, result_type: ResultType) -> TestResult {
        TestResult::for_test(test, result_type, now_millis())
    }

    async fn call_run(
        &self,
        ds: &str,
        gatherer: &dyn Gatherer,
        test: &Test,
        options: &Options,
    ) -> Response {
        debug!(data_source = ds, url = %test.url, "Running gatherer");
        match gatherer.run(test, options).await {
            Ok(response) => response,
            Err(e) => {
                warn!(data_source = ds, url = %test.url, error = %e, "Gatherer run failed");
                Response::error(e.to_string())
            }
        }
    }

    async fn call_retrieve(
        &self,
        ds: &str,
        gatherer: &dyn Gatherer,
        result: &TestResult,
        options: &Options,
    ) -> Response {
        debug!(data_source = ds, id = %result.id, "Retrieving from gatherer");
        match gatherer.retrieve(result, options).await {
            Ok(response) => response,
            Err(e) => {
                warn!(data_source = ds, id = %result.id, error = %e, "Gatherer retrieve failed");
                Response::error(e.to_string())
            }
        }
    }

    /// One Response per Test for data source `ds`, using the gatherer's bulk
    /// call when it has one.
    async fn run_gatherer_in_batch(
        &self,
        ds: &str,
        gatherer: &dyn Gatherer,
        tests: &[Test],
        options: &Options,
    ) -> Vec<Response> {
        debug!(data_source = ds, tests = tests.len(), "Running gatherer in batch");
        match gatherer.run_batch(tests, options).await {
            Ok(Some(responses)) => check_batch_len(ds, responses, tests.len()),
            Ok(None) => {
                let mut responses = Vec::with_capacity(tests.len());
                for test in tests {
                    responses.push(self.call_run(ds, gatherer, test, options).await);
                }
                responses
            }
            Err(e) => {
                warn!(data_source = ds, error = %e, "Gatherer batch run failed");
                vec![Response::error(e.to_string()); tests.len()]
            }
        }
    }

    async fn retrieve_gatherer_in_batch(
        &self,
        ds: &str,
        gatherer: &dyn Gatherer,
        results: &[TestResult],
        options: &Options,
    ) -> Vec<Response> {
        debug!(data_source = ds, results = results.len(), "Retrieving in batch");
        match gatherer.retrieve_batch(results, options).await {
            Ok(Some(responses)) => check_batch_len(ds, responses, results.len()),
            Ok(None) => {
                let mut responses = Vec::with_capacity(results.len());
                for result in results {
                    responses.push(self.call_retrieve(ds, gatherer, result, options).await);
                }
                responses
            }
            Err(e) => {
                warn!(data_source = ds, error = %e, "Gatherer batch retrieve failed");
                vec![Response::error(e.to_string()); results.len()]
            }
        }
    }

    /// Run `call` for every extension in order, collecting failures as
    /// `[<extension>] <message>`.
    fn dispatch<F>(&self, hook: &str, mut call: F) -> Vec<String>
    where
        F: FnMut(&dyn Extension) -> Result<()>,
    {
        let mut errors = Vec::new();
        for ext in &self.extensions {
            if let Err(e) = call(ext.as_ref()) {
                warn!(extension = ext.name(), hook, error = %e, "Extension hook failed");
                errors.push(format!("[{}] {}", ext.name(), e));
            }
        }
        errors
    }
}

/// Whether data source `ds` on `result` still needs a retrieve call.
fn is_pending(result: &TestResult, ds: &str) -> bool {
    matches!(result.source_status(ds), Some(status) if status != Status::Retrieved)
}

fn check_batch_len(ds: &str, responses: Vec<Response>, expected: usize) -> Vec<Response> {
    if responses.len() == expected {
        return responses;
    }
    warn!(
        data_source = ds,
        expected,
        got = responses.len(),
        "Batch response length mismatch"
    );
    let message = format!(
        "batch returned {} responses for {} items",
        responses.len(),
        expected
    );
    vec![Response::error(message); expected]
}

/// Fold a gatherer Response into the `ds` sub-record of `result`.
///
/// Status, status text and errors are replaced; metadata, metrics and
/// settings only when the Response carries them, so a failed poll keeps the
/// job id needed for the next one. Response errors are also appended to the
/// Result's own errors as `[<ds>] <message>`.
fn merge_response(
    result: &mut TestResult,
    ds: &str,
    settings: Option<Value>,
    response: Response,
) {
    let empty = || Value::Object(Map::new());
    let mut record = result.source(ds).unwrap_or_else(|| SourceRecord {
        status: Status::Submitted,
        status_text: String::new(),
        metadata: empty(),
        settings: empty(),
        metrics: empty(),
        errors: Vec::new(),
        extra: Map::new(),
    });
    if let Some(settings) = settings {
        record.settings = settings;
    }

    record.status = response.status;
    record.status_text = response.status_text;
    if let Some(metadata) = response.metadata {
        record.metadata = metadata;
    }
    if let Some(metrics) = response.metrics {
        record.metrics = metrics;
    }
    if let Some(settings) = response.settings {
        record.settings = settings;
    }
    // A re-poll replaces this source's earlier entries.
    let prefix = format!("[{}] ", ds);
    result.errors.retain(|e| !e.starts_with(&prefix));
    result
        .errors
        .extend(response.errors.iter().map(|e| format!("{}{}", prefix, e)));
    record.errors = response.errors;

    result.set_source(ds, &record);
}

/// Advance the schedule of `test` to `now` plus its frequency's offset and
/// record the frequency as activated. `none` clears the trigger.
pub fn update_next_trigger_timestamp(test: &mut Test, now: i64) {
    let Some(frequency) = test.frequency() else {
        return;
    };
    let Some(recurring) = test.recurring.as_mut() else {
        return;
    };
    match frequency.offset_millis() {
        Some(offset) => {
            let next = now + offset;
            recurring.next_trigger_timestamp = Some(next);
            recurring.next_trigger_time_str = Utc
                .timestamp_millis_opt(next)
                .single()
                .map(|dt| dt.to_rfc3339());
        }
        None => {
            recurring.next_trigger_timestamp = None;
            recurring.next_trigger_time_str = None;
        }
    }
    recurring.activated_frequency = Some(frequency.as_str().to_string());
}

//! Performance budgets: compares retrieved metrics against per-Test limits.
//!
//! A Test opts in with
//! `budgets: {dataSource: "psi", budget: {"lighthouse.LargestContentfulPaint": 2500}}`.
//! The Result gets the same object plus a `metrics` map holding, per budgeted
//! metric, `{budget, metricValue, overRatio}` once its status is `Retrieved`.

use super::Extension;
use crate::engine::Options;
use crate::model::{Status, Test, TestResult};
use crate::path;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};

pub const NAME: &str = "budgets";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BudgetConfig {
    data_source: String,
    #[serde(default)]
    budget: Map<String, Value>,
}

#[derive(Debug, Default)]
pub struct BudgetsExtension;

impl BudgetsExtension {
    pub fn new() -> Self {
        Self
    }
}

/// `(value - budget) / budget`, rounded to two decimals.
fn over_ratio(value: f64, budget: f64) -> Option<f64> {
    if budget == 0.0 {
        return None;
    }
    Some(((value - budget) / budget * 100.0).round() / 100.0)
}

fn apply(config: &Value, result: &mut TestResult) -> Result<()> {
    let cfg: BudgetConfig =
        serde_json::from_value(config.clone()).context("invalid budgets configuration")?;
    let mut out = json!({
        "dataSource": &cfg.data_source,
        "budget": &cfg.budget,
    });

    if result.status != Status::Retrieved {
        result.fields.insert(NAME.to_string(), out);
        return Ok(());
    }

    let source_metrics = result
        .fields
        .get(&cfg.data_source)
        .and_then(|sub| sub.get("metrics"));
    let mut metrics = Map::new();
    let mut missing = Vec::new();
    for (metric, budget) in &cfg.budget {
        let Some(budget_value) = budget.as_f64() else {
            missing.push(metric.clone());
            continue;
        };
        let value = source_metrics.and_then(|m| path::get(m, &path::parse(metric)));
        match value.and_then(|v| v.as_f64().map(|f| (v, f))) {
            Some((raw, v)) => {
                metrics.insert(
                    metric.clone(),
                    json!({
                        "budget": budget,
                        "metricValue": raw,
                        "overRatio": over_ratio(v, budget_value),
                    }),
                );
            }
            None => missing.push(metric.clone()),
        }
    }
    out["metrics"] = Value::Object(metrics);
    result.fields.insert(NAME.to_string(), out);

    if !missing.is_empty() {
        bail!(
            "no numeric value for {} in {}.metrics",
            missing.join(", "),
            cfg.data_source
        );
    }
    Ok(())
}

impl Extension for BudgetsExtension {
    fn name(&self) -> &str {
        NAME
    }

    fn after_run(&self, test: &mut Test, result: &mut TestResult, _options: &Options) -> Result<()> {
        match &test.budgets {
            Some(config) => apply(config, result),
            None => Ok(()),
        }
    }

    fn after_retrieve(&self, result: &mut TestResult, _options: &Options) -> Result<()> {
        match result.fields.get(NAME).cloned() {
            Some(config) => apply(&config, result),
            None => Ok(()),
        }
    }
}

//! Extensions are side-effect hooks run at fixed points of a pipeline.

pub mod budgets;

use crate::engine::Options;
use crate::model::{Test, TestResult};
use anyhow::Result;

/// A named set of optional pipeline hooks.
///
/// Hooks may mutate the borrowed Tests and Results in place. An `Err` is
/// recorded against the acting item (or the pipeline summary for the
/// all-items hooks) and never stops the pipeline or the other extensions.
#[allow(unused_variables)]
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    fn before_all_runs(&self, tests: &mut [Test], options: &Options) -> Result<()> {
        Ok(())
    }

    fn before_run(&self, test: &mut Test, options: &Options) -> Result<()> {
        Ok(())
    }

    fn after_run(&self, test: &mut Test, result: &mut TestResult, options: &Options) -> Result<()> {
        Ok(())
    }

    fn after_all_runs(
        &self,
        tests: &mut [Test],
        results: &mut [TestResult],
        options: &Options,
    ) -> Result<()> {
        Ok(())
    }

    fn before_all_retrieves(&self, results: &mut [TestResult], options: &Options) -> Result<()> {
        Ok(())
    }

    fn before_retrieve(&self, result: &mut TestResult, options: &Options) -> Result<()> {
        Ok(())
    }

    fn after_retrieve(&self, result: &mut TestResult, options: &Options) -> Result<()> {
        Ok(())
    }

    fn after_all_retrieves(&self, results: &mut [TestResult], options: &Options) -> Result<()> {
        Ok(())
    }
}

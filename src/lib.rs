//! autowebperf -- orchestration engine for recurring web-performance audits.
//!
//! Tests are read from a [`connectors::Connector`], submitted to one or more
//! measurement services through [`gatherers::Gatherer`]s, and the per-source
//! outcomes are merged into Results that are written back in batches. The
//! [`engine::Engine`] drives the `run`, `recurring` and `retrieve` pipelines;
//! [`extensions::Extension`]s hook into them at fixed points.

pub mod config;
pub mod connectors;
pub mod engine;
pub mod extensions;
pub mod filter;
pub mod gatherers;
pub mod model;
pub mod path;
pub mod registry;

pub use config::AwpConfig;
pub use engine::{Engine, Options, PipelineSummary};
pub use registry::Registry;

//! Annual Stock Risk Index (SRI) pipeline for US field crops.
//!
//! Four source collectors (crop yield, weather, drought, economic) feed a
//! pre-merge validator, a merger, the SRI calculator, a post-score validator
//! and a year-over-year comparator. Every stage hands off through files under
//! a [`DataLayout`], so a stage can be retried without re-running its
//! predecessors.
//!
//! This crate follows the Explicit Module Boundary Pattern (EMBP): multi-file
//! modules (`collectors`, `validation`) expose their surface through their
//! `mod.rs` gateway, and the binary only talks to [`pipeline`] and
//! [`config`].

pub mod collectors;
pub mod compare;
pub mod config;
pub mod error;
pub mod layout;
pub mod merge;
pub mod models;
pub mod pipeline;
pub mod scoring;
pub mod states;
pub mod stats;
pub mod table;
pub mod validation;

pub use config::Config;
pub use error::{PipelineError, Result};
pub use layout::DataLayout;
pub use models::{DataSource, MergedRecord, RiskCategory, Source, SriResult};
pub use scoring::ScoringConfig;

//! Shared types, error model, and configuration for TenderScope.
//!
//! This crate is the foundation depended on by all other TenderScope crates.
//! It provides:
//! - [`TenderScopeError`] and [`FailureKind`], the unified error model
//! - Domain types ([`Opportunity`], [`LineItem`], [`RelevanceAssessment`], [`Outcome`])
//! - Configuration ([`AppConfig`] and its sections, config loading)
//! - [`CancelFlag`] for cooperative shutdown

pub mod cancel;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use cancel::CancelFlag;
pub use config::{
    AppConfig, CategoryConfig, DefaultsConfig, ListingConfig, OpenDataConfig, OpenRouterConfig,
    RenderBackend, RenderConfig, ScoringConfig, TransportConfig, api_key, config_dir,
    config_file_path, default_categories, expand_home, init_config, load_config,
    load_config_from, validate_api_key, validate_categories,
};
pub use error::{FailureKind, Result, TenderScopeError};
pub use types::{
    ContractCode, DEFAULT_APPLICATION_STATUS, LineItem, NEEDS_MANUAL_REVIEW, Opportunity, Outcome, Priority,
    RelevanceAssessment, SkipReason, Source,
};

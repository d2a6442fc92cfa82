//! Bundleway - multi-bundle subscription commerce core
//!
//! Bundleway provides the commerce building blocks for bundle-based SaaS
//! billing: a bundle catalog, a pricing engine with tiered multi-bundle
//! discounts, an entitlement ledger, a subscription orchestrator driving an
//! external payment processor, and an audited admin override layer, plus an
//! axum route module for the public bundle endpoints.
//!
//! Components are explicitly constructed and wired by the caller; storage and
//! the payment processor sit behind traits with in-memory and mock
//! implementations shipped for tests and single-node use.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use bundleway::{
//!     CommerceConfig, MockProcessor, SubscriptionOrchestrator,
//!     catalog::default_catalog, storage::memory::InMemoryStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     bundleway::init_tracing();
//!
//!     let store = InMemoryStore::new();
//!     for def in default_catalog() {
//!         bundleway::storage::CatalogStore::insert_bundle(&store, &def).await?;
//!     }
//!
//!     let orchestrator = SubscriptionOrchestrator::new(
//!         store.clone(),
//!         store.clone(),
//!         store.clone(),
//!         MockProcessor::new(),
//!         &CommerceConfig::default(),
//!     );
//!     let _ = orchestrator;
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod audit;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod ledger;
pub mod live_client;
pub mod orchestrator;
pub mod pricing;
pub mod storage;
pub mod validation;

// Re-exports for public API
pub use admin::{AdminOverrides, DiscountType};
pub use audit::{AuditAction, AuditRecord, AuditStore, InMemoryAuditLog};
pub use catalog::{
    BillingCycle, BundleDefinition, CatalogManager, GrantSet, LimitValue, default_catalog,
};
pub use client::{MockProcessor, PaymentProcessor, RecurringChargeRequest};
pub use config::{CommerceConfig, CommerceConfigBuilder, ProcessorConfig};
pub use error::{CommerceError, Result};
pub use http::{AuthedAccount, CommerceState};
pub use ledger::{Deactivation, EntitlementLedger, EntitlementRecord, EntitlementStatus};
pub use live_client::LiveProcessorClient;
pub use orchestrator::{
    BillableAccount, SubscriptionOrchestrator, SubscriptionRecord, SubscriptionStatus,
};
pub use pricing::{PricingEngine, PricingQuote};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging with sensible defaults
///
/// This should be called early in your application, typically in main().
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "bundleway=debug")
/// - `BUNDLEWAY_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("BUNDLEWAY_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

//! Bundle catalog: typed definitions and versioned, audited mutations.
//!
//! A bundle is a purchasable package granting a fixed set of services,
//! features, and usage limits at a fixed price. Definitions are validated at
//! load time; every admin mutation bumps the version and appends an audit
//! record, so there is no silent overwrite. Bundles are never deleted, only
//! disabled, because active entitlements keep referencing them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{self, AuditAction, AuditRecord, AuditStore};
use crate::error::{CommerceError, Result};
use crate::storage::CatalogStore;
use crate::validation::validate_bundle_id;

/// Billing cycle for subscription pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl BillingCycle {
    /// Stable string form for processor metadata and logging.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

impl std::fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A set of granted service or feature identifiers.
///
/// `All` is the sentinel used by the top enterprise tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantSet {
    All,
    Of(BTreeSet<String>),
}

impl GrantSet {
    /// Build a grant set from an iterator of ids.
    pub fn of<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Of(ids.into_iter().map(Into::into).collect())
    }

    /// An empty grant set.
    #[must_use]
    pub fn none() -> Self {
        Self::Of(BTreeSet::new())
    }

    /// Whether this set grants the given identifier.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        match self {
            Self::All => true,
            Self::Of(ids) => ids.contains(id),
        }
    }

    /// Whether this is the all-access sentinel.
    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

/// A usage limit value: a numeric cap or unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitValue {
    Unlimited,
    Capped(u64),
}

/// A single catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleDefinition {
    /// Unique symbolic identifier (e.g. "creator", "ecommerce").
    pub bundle_id: String,
    pub display_name: String,
    /// Monthly price in minor currency units (cents). Non-negative.
    pub price_monthly_cents: i64,
    /// Yearly price in cents. Non-negative; normally at most 12x monthly.
    pub price_yearly_cents: i64,
    pub included_services: GrantSet,
    pub included_features: GrantSet,
    pub usage_limits: BTreeMap<String, LimitValue>,
    /// Whether new subscribers may purchase this bundle. Disabling never
    /// affects existing subscribers.
    pub enabled: bool,
    /// Bumped on every mutation.
    pub version: u64,
    /// Listing order; ties break on insertion order.
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BundleDefinition {
    /// Create a definition with version 1 and current timestamps.
    #[must_use]
    pub fn new(bundle_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            bundle_id: bundle_id.into(),
            display_name: display_name.into(),
            price_monthly_cents: 0,
            price_yearly_cents: 0,
            included_services: GrantSet::none(),
            included_features: GrantSet::none(),
            usage_limits: BTreeMap::new(),
            enabled: true,
            version: 1,
            sort_order: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_prices(mut self, monthly_cents: i64, yearly_cents: i64) -> Self {
        self.price_monthly_cents = monthly_cents;
        self.price_yearly_cents = yearly_cents;
        self
    }

    #[must_use]
    pub fn with_services(mut self, services: GrantSet) -> Self {
        self.included_services = services;
        self
    }

    #[must_use]
    pub fn with_features(mut self, features: GrantSet) -> Self {
        self.included_features = features;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, name: impl Into<String>, value: LimitValue) -> Self {
        self.usage_limits.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_sort_order(mut self, order: i32) -> Self {
        self.sort_order = order;
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Price in cents for the given billing cycle.
    #[must_use]
    pub fn price_for(&self, cycle: BillingCycle) -> i64 {
        match cycle {
            BillingCycle::Monthly => self.price_monthly_cents,
            BillingCycle::Yearly => self.price_yearly_cents,
        }
    }

    /// Validate the definition for catalog insertion.
    pub fn validate(&self) -> Result<()> {
        validate_bundle_id(&self.bundle_id)?;

        if self.display_name.trim().is_empty() {
            return Err(CommerceError::InvalidBundle {
                bundle_id: self.bundle_id.clone(),
                reason: "display_name cannot be empty".to_string(),
            });
        }

        if self.price_monthly_cents < 0 || self.price_yearly_cents < 0 {
            return Err(CommerceError::InvalidBundle {
                bundle_id: self.bundle_id.clone(),
                reason: "prices cannot be negative".to_string(),
            });
        }

        if self.price_yearly_cents > self.price_monthly_cents.saturating_mul(12) {
            return Err(CommerceError::InvalidBundle {
                bundle_id: self.bundle_id.clone(),
                reason: "yearly price exceeds 12x the monthly price".to_string(),
            });
        }

        Ok(())
    }
}

/// Catalog manager: read access plus versioned, audited admin mutations.
pub struct CatalogManager<C, A> {
    store: C,
    audit: A,
}

impl<C, A> CatalogManager<C, A>
where
    C: CatalogStore,
    A: AuditStore,
{
    pub fn new(store: C, audit: A) -> Self {
        Self { store, audit }
    }

    /// Resolve a bundle by id. Disabled bundles resolve too, so historical
    /// subscribers keep working.
    pub async fn get(&self, bundle_id: &str) -> Result<BundleDefinition> {
        validate_bundle_id(bundle_id)?;
        self.store
            .get_bundle(bundle_id)
            .await?
            .ok_or_else(|| CommerceError::UnknownBundle {
                bundle_id: bundle_id.to_string(),
            })
    }

    /// All bundles, ordered by sort order then insertion.
    pub async fn list_all(&self) -> Result<Vec<BundleDefinition>> {
        self.store.list_bundles().await
    }

    /// Only bundles currently purchasable by new subscribers.
    pub async fn list_enabled(&self) -> Result<Vec<BundleDefinition>> {
        Ok(self
            .store
            .list_bundles()
            .await?
            .into_iter()
            .filter(|b| b.enabled)
            .collect())
    }

    /// Whether a bundle exists and is open for new purchases.
    pub async fn is_enabled(&self, bundle_id: &str) -> Result<bool> {
        Ok(self.get(bundle_id).await?.enabled)
    }

    /// Register a new bundle. Rejected attempts are audited too.
    pub async fn create(&self, actor: &str, definition: BundleDefinition) -> Result<()> {
        if let Err(err) = definition.validate() {
            self.reject(actor, AuditAction::BundleCreated, &definition.bundle_id, &err)
                .await;
            return Err(err);
        }
        if let Err(err) = self.store.insert_bundle(&definition).await {
            self.reject(actor, AuditAction::BundleCreated, &definition.bundle_id, &err)
                .await;
            return Err(err);
        }

        audit::record(
            &self.audit,
            AuditRecord::applied(
                actor,
                AuditAction::BundleCreated,
                &bundle_target(&definition.bundle_id),
                serde_json::Value::Null,
                snapshot(&definition),
                "catalog create",
            ),
        )
        .await;
        Ok(())
    }

    /// Change a bundle's prices.
    pub async fn update_pricing(
        &self,
        actor: &str,
        bundle_id: &str,
        monthly_cents: i64,
        yearly_cents: i64,
        reason: &str,
    ) -> Result<BundleDefinition> {
        self.mutate(
            actor,
            bundle_id,
            AuditAction::BundlePricingUpdated,
            reason,
            |def| {
                def.price_monthly_cents = monthly_cents;
                def.price_yearly_cents = yearly_cents;
            },
        )
        .await
    }

    /// Add feature ids to a bundle. No-op on the All sentinel.
    pub async fn add_features(
        &self,
        actor: &str,
        bundle_id: &str,
        features: &[String],
        reason: &str,
    ) -> Result<BundleDefinition> {
        self.mutate(
            actor,
            bundle_id,
            AuditAction::BundleFeaturesUpdated,
            reason,
            |def| {
                if let GrantSet::Of(ids) = &mut def.included_features {
                    ids.extend(features.iter().cloned());
                }
            },
        )
        .await
    }

    /// Remove feature ids from a bundle. No-op on the All sentinel.
    pub async fn remove_features(
        &self,
        actor: &str,
        bundle_id: &str,
        features: &[String],
        reason: &str,
    ) -> Result<BundleDefinition> {
        self.mutate(
            actor,
            bundle_id,
            AuditAction::BundleFeaturesUpdated,
            reason,
            |def| {
                if let GrantSet::Of(ids) = &mut def.included_features {
                    for f in features {
                        ids.remove(f);
                    }
                }
            },
        )
        .await
    }

    /// Replace a bundle's service grants.
    pub async fn update_services(
        &self,
        actor: &str,
        bundle_id: &str,
        services: GrantSet,
        reason: &str,
    ) -> Result<BundleDefinition> {
        self.mutate(
            actor,
            bundle_id,
            AuditAction::BundleServicesUpdated,
            reason,
            |def| {
                def.included_services = services;
            },
        )
        .await
    }

    /// Set or replace usage limits. Limits not named are left untouched.
    pub async fn update_limits(
        &self,
        actor: &str,
        bundle_id: &str,
        limits: BTreeMap<String, LimitValue>,
        reason: &str,
    ) -> Result<BundleDefinition> {
        self.mutate(
            actor,
            bundle_id,
            AuditAction::BundleLimitsUpdated,
            reason,
            |def| {
                def.usage_limits.extend(limits);
            },
        )
        .await
    }

    /// Enable or disable a bundle for new purchases.
    pub async fn set_enabled(
        &self,
        actor: &str,
        bundle_id: &str,
        enabled: bool,
        reason: &str,
    ) -> Result<BundleDefinition> {
        self.mutate(
            actor,
            bundle_id,
            AuditAction::BundleEnablementChanged,
            reason,
            |def| {
                def.enabled = enabled;
            },
        )
        .await
    }

    /// Apply a mutation with a version bump. Every failure branch writes a
    /// rejected audit record, so attempted redefinitions are traceable.
    async fn mutate<F>(
        &self,
        actor: &str,
        bundle_id: &str,
        action: AuditAction,
        reason: &str,
        apply: F,
    ) -> Result<BundleDefinition>
    where
        F: FnOnce(&mut BundleDefinition),
    {
        let mut def = match self.get(bundle_id).await {
            Ok(def) => def,
            Err(err) => {
                self.reject(actor, action, bundle_id, &err).await;
                return Err(err);
            }
        };
        let before = snapshot(&def);

        apply(&mut def);
        def.version += 1;
        def.updated_at = Utc::now();
        if let Err(err) = def.validate() {
            self.reject(actor, action, bundle_id, &err).await;
            return Err(err);
        }

        if let Err(err) = self.store.update_bundle(&def).await {
            self.reject(actor, action, bundle_id, &err).await;
            return Err(err);
        }

        audit::record(
            &self.audit,
            AuditRecord::applied(
                actor,
                action,
                &bundle_target(bundle_id),
                before,
                snapshot(&def),
                reason,
            ),
        )
        .await;

        Ok(def)
    }

    async fn reject(&self, actor: &str, action: AuditAction, bundle_id: &str, err: &CommerceError) {
        audit::record(
            &self.audit,
            AuditRecord::rejected(
                actor,
                action,
                &bundle_target(bundle_id),
                serde_json::Value::Null,
                &err.to_string(),
            ),
        )
        .await;
    }
}

fn bundle_target(bundle_id: &str) -> String {
    format!("bundle:{bundle_id}")
}

fn snapshot(def: &BundleDefinition) -> serde_json::Value {
    serde_json::to_value(def).unwrap_or(serde_json::Value::Null)
}

/// The production bundle lineup.
#[must_use]
pub fn default_catalog() -> Vec<BundleDefinition> {
    vec![
        BundleDefinition::new("creator", "Creator")
            .with_prices(1900, 19_000)
            .with_services(GrantSet::of(["bio_links", "websites", "email_marketing"]))
            .with_features(GrantSet::of([
                "custom_domain",
                "analytics_basic",
                "templates",
            ]))
            .with_limit("websites", LimitValue::Capped(3))
            .with_limit("bio_links", LimitValue::Capped(10))
            .with_limit("ai_credits", LimitValue::Capped(100))
            .with_sort_order(10),
        BundleDefinition::new("ecommerce", "E-Commerce")
            .with_prices(2400, 24_000)
            .with_services(GrantSet::of(["storefront", "orders", "products"]))
            .with_features(GrantSet::of([
                "inventory_tracking",
                "discount_codes",
                "analytics_basic",
            ]))
            .with_limit("products", LimitValue::Capped(500))
            .with_limit("storefronts", LimitValue::Capped(1))
            .with_sort_order(20),
        BundleDefinition::new("business", "Business")
            .with_prices(3900, 39_000)
            .with_services(GrantSet::of([
                "storefront",
                "orders",
                "products",
                "invoicing",
                "crm",
            ]))
            .with_features(GrantSet::of([
                "inventory_tracking",
                "discount_codes",
                "analytics_advanced",
                "team_accounts",
            ]))
            .with_limit("products", LimitValue::Capped(5000))
            .with_limit("team_members", LimitValue::Capped(10))
            .with_sort_order(30),
        BundleDefinition::new("social_media", "Social Media")
            .with_prices(2900, 29_000)
            .with_services(GrantSet::of(["social_scheduling", "comments", "inbox"]))
            .with_features(GrantSet::of([
                "post_scheduling",
                "comment_moderation",
                "analytics_basic",
            ]))
            .with_limit("connected_accounts", LimitValue::Capped(5))
            .with_limit("scheduled_posts", LimitValue::Capped(200))
            .with_sort_order(40),
        BundleDefinition::new("education", "Education")
            .with_prices(2900, 29_000)
            .with_services(GrantSet::of(["courses", "communities", "certificates"]))
            .with_features(GrantSet::of([
                "course_builder",
                "student_progress",
                "analytics_basic",
            ]))
            .with_limit("courses", LimitValue::Capped(20))
            .with_limit("students", LimitValue::Capped(1000))
            .with_sort_order(50),
        BundleDefinition::new("enterprise", "Enterprise")
            .with_prices(9900, 99_000)
            .with_services(GrantSet::All)
            .with_features(GrantSet::All)
            .with_limit("websites", LimitValue::Unlimited)
            .with_limit("products", LimitValue::Unlimited)
            .with_limit("ai_credits", LimitValue::Unlimited)
            .with_sort_order(60),
    ]
}

//! Entitlement ledger: who has access to what, and since when.
//!
//! An entitlement snapshots the bundle's grants at activation time, so later
//! catalog edits never silently change what an existing subscriber can do.
//! At most one engaged record (Active, Paused, or unexpired Comp) exists per
//! `(account, bundle)` pair; the store enforces this atomically on insert.
//! A Comp record past its expiry stops being engaged, so it never blocks a
//! paid activation of the same bundle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{BundleDefinition, GrantSet};
use crate::error::{CommerceError, Result};
use crate::storage::{CatalogStore, LedgerStore};
use crate::validation::{validate_account_id, validate_bundle_id};

/// Lifecycle status of an entitlement record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementStatus {
    /// Granted through a paid subscription.
    Active,
    /// Deactivated; kept for history.
    Inactive,
    /// Temporarily suspended by an admin.
    Paused,
    /// Complimentary grant, no billing attached.
    Comp,
}

impl EntitlementStatus {
    /// Stable string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Paused => "paused",
            Self::Comp => "comp",
        }
    }

    /// Whether this record occupies the pair's uniqueness slot.
    ///
    /// Inactive records are history; everything else blocks a new activation.
    #[must_use]
    pub fn is_engaged(&self) -> bool {
        !matches!(self, Self::Inactive)
    }
}

impl std::fmt::Display for EntitlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The record that an account has (or had) access granted by a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitlementRecord {
    pub id: Uuid,
    pub account_id: String,
    pub bundle_id: String,
    pub status: EntitlementStatus,
    pub activated_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
    /// Comp grants may expire; paid entitlements have no expiry of their own.
    pub expires_at: Option<DateTime<Utc>>,
    /// Snapshot of the bundle's service grants at activation time.
    pub granted_services: GrantSet,
    /// Snapshot of the bundle's feature grants at activation time.
    pub granted_features: GrantSet,
    /// The status this record held before being paused, for exact restore.
    pub paused_from: Option<EntitlementStatus>,
}

impl EntitlementRecord {
    /// Create a record snapshotting the given grants.
    #[must_use]
    pub fn new(
        account_id: &str,
        bundle_id: &str,
        status: EntitlementStatus,
        granted_services: GrantSet,
        granted_features: GrantSet,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            bundle_id: bundle_id.to_string(),
            status,
            activated_at: Utc::now(),
            deactivated_at: None,
            expires_at: None,
            granted_services,
            granted_features,
            paused_from: None,
        }
    }

    /// Create an active record from plain grant lists.
    #[must_use]
    pub fn activated(
        account_id: &str,
        bundle_id: &str,
        services: &[&str],
        features: &[&str],
    ) -> Self {
        Self::new(
            account_id,
            bundle_id,
            EntitlementStatus::Active,
            GrantSet::of(services.iter().copied()),
            GrantSet::of(features.iter().copied()),
        )
    }

    /// Create an active record snapshotting a catalog definition.
    #[must_use]
    pub fn from_definition(account_id: &str, definition: &BundleDefinition) -> Self {
        Self::new(
            account_id,
            &definition.bundle_id,
            EntitlementStatus::Active,
            definition.included_services.clone(),
            definition.included_features.clone(),
        )
    }

    /// Whether this record grants access right now.
    ///
    /// Active records always do; Comp records only until their expiry;
    /// Paused and Inactive records never do.
    #[must_use]
    pub fn grants_access(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            EntitlementStatus::Active => true,
            EntitlementStatus::Comp => self.expires_at.map_or(true, |exp| now < exp),
            EntitlementStatus::Paused | EntitlementStatus::Inactive => false,
        }
    }

    /// Whether this record still blocks a new activation of the pair.
    ///
    /// Unlike [`EntitlementStatus::is_engaged`], this accounts for expiry:
    /// an expired Comp record occupies no slot, while a Paused record does
    /// even though it grants no access.
    #[must_use]
    pub fn is_engaged(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            EntitlementStatus::Inactive => false,
            EntitlementStatus::Comp => self.expires_at.map_or(true, |exp| now < exp),
            EntitlementStatus::Active | EntitlementStatus::Paused => true,
        }
    }
}

/// Outcome of a deactivation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deactivation {
    /// The record transitioned to Inactive.
    Transitioned,
    /// The record was already Inactive; nothing changed.
    AlreadyInactive,
}

/// Manages entitlement records over a [`LedgerStore`].
pub struct EntitlementLedger<L, C> {
    store: L,
    catalog: C,
}

impl<L, C> EntitlementLedger<L, C>
where
    L: LedgerStore,
    C: CatalogStore,
{
    pub fn new(store: L, catalog: C) -> Self {
        Self { store, catalog }
    }

    /// Activate a bundle for an account through the normal purchase path.
    ///
    /// Rejects unknown bundles, disabled bundles, and pairs that already
    /// hold an engaged record. Uniqueness is enforced by the store's insert,
    /// not by a lock here.
    pub async fn activate(&self, account_id: &str, bundle_id: &str) -> Result<EntitlementRecord> {
        validate_account_id(account_id)?;
        validate_bundle_id(bundle_id)?;

        let definition = self.resolve(bundle_id).await?;
        if !definition.enabled {
            return Err(CommerceError::BundleDisabled {
                bundle_id: bundle_id.to_string(),
            });
        }

        let record = EntitlementRecord::from_definition(account_id, &definition);
        self.store.insert_entitlement(&record).await?;

        tracing::info!(
            target: "bundleway::ledger",
            account_id = %account_id,
            bundle_id = %bundle_id,
            entitlement_id = %record.id,
            "Entitlement activated"
        );
        Ok(record)
    }

    /// Deactivate a bundle for an account.
    ///
    /// The first call transitions the engaged record to Inactive; repeated
    /// calls are a no-op success. `NotActive` is returned only when the pair
    /// was never activated at all.
    pub async fn deactivate(&self, account_id: &str, bundle_id: &str) -> Result<Deactivation> {
        validate_account_id(account_id)?;
        validate_bundle_id(bundle_id)?;

        if let Some(mut record) = self.store.get_engaged(account_id, bundle_id).await? {
            record.status = EntitlementStatus::Inactive;
            record.deactivated_at = Some(Utc::now());
            record.paused_from = None;
            self.store.update_entitlement(&record).await?;

            tracing::info!(
                target: "bundleway::ledger",
                account_id = %account_id,
                bundle_id = %bundle_id,
                entitlement_id = %record.id,
                "Entitlement deactivated"
            );
            return Ok(Deactivation::Transitioned);
        }

        match self.store.latest_for_pair(account_id, bundle_id).await? {
            Some(_) => Ok(Deactivation::AlreadyInactive),
            None => Err(CommerceError::NotActive {
                account_id: account_id.to_string(),
                bundle_id: bundle_id.to_string(),
            }),
        }
    }

    /// All records currently granting access, activation time ascending.
    pub async fn list_active(&self, account_id: &str) -> Result<Vec<EntitlementRecord>> {
        validate_account_id(account_id)?;
        let now = Utc::now();
        Ok(self
            .store
            .list_for_account(account_id)
            .await?
            .into_iter()
            .filter(|r| r.grants_access(now))
            .collect())
    }

    /// Whether any current entitlement grants the feature.
    pub async fn has_feature(&self, account_id: &str, feature_id: &str) -> Result<bool> {
        validate_account_id(account_id)?;
        let now = Utc::now();
        Ok(self
            .store
            .list_for_account(account_id)
            .await?
            .iter()
            .any(|r| r.grants_access(now) && r.granted_features.contains(feature_id)))
    }

    /// Whether any current entitlement grants the service.
    pub async fn has_service(&self, account_id: &str, service_id: &str) -> Result<bool> {
        validate_account_id(account_id)?;
        let now = Utc::now();
        Ok(self
            .store
            .list_for_account(account_id)
            .await?
            .iter()
            .any(|r| r.grants_access(now) && r.granted_services.contains(service_id)))
    }

    /// Grant a complimentary entitlement (admin path).
    ///
    /// Bypasses the disabled check and billing entirely. The grant may carry
    /// an expiry after which it stops granting access.
    pub async fn grant_comp(
        &self,
        account_id: &str,
        bundle_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<EntitlementRecord> {
        validate_account_id(account_id)?;
        validate_bundle_id(bundle_id)?;

        let definition = self.resolve(bundle_id).await?;
        let mut record = EntitlementRecord::from_definition(account_id, &definition);
        record.status = EntitlementStatus::Comp;
        record.expires_at = expires_at;
        self.store.insert_entitlement(&record).await?;

        tracing::info!(
            target: "bundleway::ledger",
            account_id = %account_id,
            bundle_id = %bundle_id,
            expires_at = ?expires_at,
            "Comp entitlement granted"
        );
        Ok(record)
    }

    /// Pause every engaged entitlement for an account, recording the prior
    /// status for exact restore. Returns the number of records paused.
    pub async fn pause_account(&self, account_id: &str) -> Result<usize> {
        validate_account_id(account_id)?;
        let now = Utc::now();
        let mut paused = 0;
        for mut record in self.store.list_for_account(account_id).await? {
            if record.is_engaged(now) && record.status != EntitlementStatus::Paused {
                record.paused_from = Some(record.status);
                record.status = EntitlementStatus::Paused;
                self.store.update_entitlement(&record).await?;
                paused += 1;
            }
        }
        Ok(paused)
    }

    /// Restore every paused entitlement to its pre-pause status. Returns the
    /// number of records resumed.
    pub async fn resume_account(&self, account_id: &str) -> Result<usize> {
        validate_account_id(account_id)?;
        let mut resumed = 0;
        for mut record in self.store.list_for_account(account_id).await? {
            if record.status == EntitlementStatus::Paused {
                record.status = record.paused_from.unwrap_or(EntitlementStatus::Active);
                record.paused_from = None;
                self.store.update_entitlement(&record).await?;
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    async fn resolve(&self, bundle_id: &str) -> Result<BundleDefinition> {
        self.catalog
            .get_bundle(bundle_id)
            .await?
            .ok_or_else(|| CommerceError::UnknownBundle {
                bundle_id: bundle_id.to_string(),
            })
    }
}

//! Storage traits for commerce data.
//!
//! Implement these traits to persist state to your database. The document
//! database is an external collaborator; an in-memory implementation is
//! provided in [`memory`] for tests and single-node use.

use async_trait::async_trait;

use crate::catalog::BundleDefinition;
use crate::error::Result;
use crate::ledger::EntitlementRecord;
use crate::orchestrator::SubscriptionRecord;

/// Storage for catalog definitions.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Get a bundle by id, including disabled bundles.
    async fn get_bundle(&self, bundle_id: &str) -> Result<Option<BundleDefinition>>;

    /// All bundles ordered by sort order, ties broken by insertion order.
    async fn list_bundles(&self) -> Result<Vec<BundleDefinition>>;

    /// Insert a new bundle. Fails if the id already exists.
    async fn insert_bundle(&self, definition: &BundleDefinition) -> Result<()>;

    /// Replace an existing bundle. Fails if the id is unknown.
    async fn update_bundle(&self, definition: &BundleDefinition) -> Result<()>;
}

/// Storage for entitlement records.
///
/// Historical records are kept; re-activation after deactivation creates a
/// new record rather than reviving the old one.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a new entitlement record.
    ///
    /// MUST atomically reject the insert with `AlreadyActive` when an engaged
    /// record (Active, Paused, or unexpired Comp) already exists for the same
    /// `(account_id, bundle_id)` pair. This is the uniqueness guarantee;
    /// callers do not hold locks. An expired Comp record does not count and
    /// is retired to Inactive as part of the insert.
    async fn insert_entitlement(&self, record: &EntitlementRecord) -> Result<()>;

    /// Update an existing record by id. Fails if the id is unknown.
    async fn update_entitlement(&self, record: &EntitlementRecord) -> Result<()>;

    /// The engaged (Active/Paused/unexpired Comp) record for a pair, if any.
    async fn get_engaged(
        &self,
        account_id: &str,
        bundle_id: &str,
    ) -> Result<Option<EntitlementRecord>>;

    /// The most recently activated record for a pair regardless of status.
    async fn latest_for_pair(
        &self,
        account_id: &str,
        bundle_id: &str,
    ) -> Result<Option<EntitlementRecord>>;

    /// All records for an account, activation time ascending.
    async fn list_for_account(&self, account_id: &str) -> Result<Vec<EntitlementRecord>>;
}

/// Storage for subscription records and processor customer mappings.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// The subscription for an account (at most one per account).
    async fn get_subscription(&self, account_id: &str) -> Result<Option<SubscriptionRecord>>;

    /// Look up a subscription by processor-assigned id.
    async fn get_by_processor_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>>;

    /// Insert a new subscription. Fails with `AlreadySubscribed` if the
    /// account already has one.
    async fn insert_subscription(&self, record: &SubscriptionRecord) -> Result<()>;

    /// Save only if the stored version matches `expected_version`.
    ///
    /// Returns `Ok(true)` on success, `Ok(false)` on version mismatch.
    /// Production implementations must make this an atomic compare-and-swap
    /// (conditional write or equivalent).
    async fn compare_and_save_subscription(
        &self,
        record: &SubscriptionRecord,
        expected_version: u64,
    ) -> Result<bool>;

    /// Remove the subscription record for an account.
    async fn delete_subscription(&self, account_id: &str) -> Result<()>;

    /// The processor customer id linked to an account, if any.
    async fn get_processor_customer_id(&self, account_id: &str) -> Result<Option<String>>;

    /// Link an account to a processor customer.
    async fn set_processor_customer_id(&self, account_id: &str, customer_id: &str) -> Result<()>;
}

/// In-memory store implementing all three storage traits.
pub mod memory {
    use super::*;
    use crate::error::CommerceError;
    use crate::ledger::EntitlementStatus;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock};

    /// In-memory store backed by `RwLock`ed maps.
    ///
    /// Wraps data in `Arc` for cheap cloning; all clones share state.
    #[derive(Default, Clone)]
    pub struct InMemoryStore {
        inner: Arc<Inner>,
    }

    #[derive(Default)]
    struct Inner {
        // Insertion order preserved for stable listing.
        bundles: RwLock<Vec<BundleDefinition>>,
        entitlements: RwLock<Vec<EntitlementRecord>>,
        subscriptions: RwLock<HashMap<String, SubscriptionRecord>>,
        customers: RwLock<HashMap<String, String>>,
    }

    fn poisoned() -> CommerceError {
        CommerceError::Storage {
            message: "in-memory store lock poisoned".to_string(),
        }
    }

    impl InMemoryStore {
        /// Create a new empty store.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl CatalogStore for InMemoryStore {
        async fn get_bundle(&self, bundle_id: &str) -> Result<Option<BundleDefinition>> {
            let bundles = self.inner.bundles.read().map_err(|_| poisoned())?;
            Ok(bundles.iter().find(|b| b.bundle_id == bundle_id).cloned())
        }

        async fn list_bundles(&self) -> Result<Vec<BundleDefinition>> {
            let bundles = self.inner.bundles.read().map_err(|_| poisoned())?;
            let mut out = bundles.clone();
            out.sort_by_key(|b| b.sort_order);
            Ok(out)
        }

        async fn insert_bundle(&self, definition: &BundleDefinition) -> Result<()> {
            let mut bundles = self.inner.bundles.write().map_err(|_| poisoned())?;
            if bundles.iter().any(|b| b.bundle_id == definition.bundle_id) {
                return Err(CommerceError::InvalidBundle {
                    bundle_id: definition.bundle_id.clone(),
                    reason: "bundle already exists".to_string(),
                });
            }
            bundles.push(definition.clone());
            Ok(())
        }

        async fn update_bundle(&self, definition: &BundleDefinition) -> Result<()> {
            let mut bundles = self.inner.bundles.write().map_err(|_| poisoned())?;
            match bundles
                .iter_mut()
                .find(|b| b.bundle_id == definition.bundle_id)
            {
                Some(existing) => {
                    *existing = definition.clone();
                    Ok(())
                }
                None => Err(CommerceError::UnknownBundle {
                    bundle_id: definition.bundle_id.clone(),
                }),
            }
        }
    }

    #[async_trait]
    impl LedgerStore for InMemoryStore {
        async fn insert_entitlement(&self, record: &EntitlementRecord) -> Result<()> {
            // Uniqueness check, expired-Comp retirement, and insert under
            // one write lock.
            let now = Utc::now();
            let mut entitlements = self.inner.entitlements.write().map_err(|_| poisoned())?;
            for existing in entitlements
                .iter_mut()
                .filter(|e| e.account_id == record.account_id && e.bundle_id == record.bundle_id)
            {
                if existing.is_engaged(now) {
                    return Err(CommerceError::AlreadyActive {
                        account_id: record.account_id.clone(),
                        bundle_id: record.bundle_id.clone(),
                        current_status: existing.status.as_str().to_string(),
                    });
                }
                if existing.status.is_engaged() {
                    // Expired Comp; retire it so the slot is free.
                    existing.status = EntitlementStatus::Inactive;
                    existing.deactivated_at = Some(now);
                }
            }
            entitlements.push(record.clone());
            Ok(())
        }

        async fn update_entitlement(&self, record: &EntitlementRecord) -> Result<()> {
            let mut entitlements = self.inner.entitlements.write().map_err(|_| poisoned())?;
            match entitlements.iter_mut().find(|e| e.id == record.id) {
                Some(existing) => {
                    *existing = record.clone();
                    Ok(())
                }
                None => Err(CommerceError::Storage {
                    message: format!("entitlement {} not found", record.id),
                }),
            }
        }

        async fn get_engaged(
            &self,
            account_id: &str,
            bundle_id: &str,
        ) -> Result<Option<EntitlementRecord>> {
            let now = Utc::now();
            let entitlements = self.inner.entitlements.read().map_err(|_| poisoned())?;
            Ok(entitlements
                .iter()
                .find(|e| {
                    e.account_id == account_id
                        && e.bundle_id == bundle_id
                        && e.is_engaged(now)
                })
                .cloned())
        }

        async fn latest_for_pair(
            &self,
            account_id: &str,
            bundle_id: &str,
        ) -> Result<Option<EntitlementRecord>> {
            let entitlements = self.inner.entitlements.read().map_err(|_| poisoned())?;
            Ok(entitlements
                .iter()
                .filter(|e| e.account_id == account_id && e.bundle_id == bundle_id)
                .max_by_key(|e| e.activated_at)
                .cloned())
        }

        async fn list_for_account(&self, account_id: &str) -> Result<Vec<EntitlementRecord>> {
            let entitlements = self.inner.entitlements.read().map_err(|_| poisoned())?;
            let mut out: Vec<EntitlementRecord> = entitlements
                .iter()
                .filter(|e| e.account_id == account_id)
                .cloned()
                .collect();
            out.sort_by_key(|e| e.activated_at);
            Ok(out)
        }
    }

    #[async_trait]
    impl SubscriptionStore for InMemoryStore {
        async fn get_subscription(&self, account_id: &str) -> Result<Option<SubscriptionRecord>> {
            let subs = self.inner.subscriptions.read().map_err(|_| poisoned())?;
            Ok(subs.get(account_id).cloned())
        }

        async fn get_by_processor_id(
            &self,
            subscription_id: &str,
        ) -> Result<Option<SubscriptionRecord>> {
            let subs = self.inner.subscriptions.read().map_err(|_| poisoned())?;
            Ok(subs
                .values()
                .find(|s| s.subscription_id == subscription_id)
                .cloned())
        }

        async fn insert_subscription(&self, record: &SubscriptionRecord) -> Result<()> {
            let mut subs = self.inner.subscriptions.write().map_err(|_| poisoned())?;
            if subs.contains_key(&record.account_id) {
                return Err(CommerceError::AlreadySubscribed {
                    account_id: record.account_id.clone(),
                });
            }
            subs.insert(record.account_id.clone(), record.clone());
            Ok(())
        }

        async fn compare_and_save_subscription(
            &self,
            record: &SubscriptionRecord,
            expected_version: u64,
        ) -> Result<bool> {
            let mut subs = self.inner.subscriptions.write().map_err(|_| poisoned())?;
            match subs.get(&record.account_id) {
                Some(current) if current.version != expected_version => Ok(false),
                _ => {
                    subs.insert(record.account_id.clone(), record.clone());
                    Ok(true)
                }
            }
        }

        async fn delete_subscription(&self, account_id: &str) -> Result<()> {
            let mut subs = self.inner.subscriptions.write().map_err(|_| poisoned())?;
            subs.remove(account_id);
            Ok(())
        }

        async fn get_processor_customer_id(&self, account_id: &str) -> Result<Option<String>> {
            let customers = self.inner.customers.read().map_err(|_| poisoned())?;
            Ok(customers.get(account_id).cloned())
        }

        async fn set_processor_customer_id(
            &self,
            account_id: &str,
            customer_id: &str,
        ) -> Result<()> {
            let mut customers = self.inner.customers.write().map_err(|_| poisoned())?;
            customers.insert(account_id.to_string(), customer_id.to_string());
            Ok(())
        }
    }

    impl InMemoryStore {
        /// All engaged entitlement records for a pair (test helper).
        pub fn engaged_count(&self, account_id: &str, bundle_id: &str) -> usize {
            self.inner
                .entitlements
                .read()
                .map(|e| {
                    e.iter()
                        .filter(|r| {
                            r.account_id == account_id
                                && r.bundle_id == bundle_id
                                && r.status.is_engaged()
                        })
                        .count()
                })
                .unwrap_or(0)
        }

        /// Statuses recorded for a pair over its whole history (test helper).
        pub fn status_history(&self, account_id: &str, bundle_id: &str) -> Vec<EntitlementStatus> {
            self.inner
                .entitlements
                .read()
                .map(|e| {
                    e.iter()
                        .filter(|r| r.account_id == account_id && r.bundle_id == bundle_id)
                        .map(|r| r.status)
                        .collect()
                })
                .unwrap_or_default()
        }
    }
}

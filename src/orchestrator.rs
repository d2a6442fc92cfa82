//! Subscription orchestrator: drives purchase, modify, and cancel flows
//! across the pricing engine, the payment processor, and the entitlement
//! ledger.
//!
//! Billing is the source of truth: a purchase only persists state after the
//! processor accepts the charge, and activation failures after a successful
//! charge are flagged for reconciliation rather than surfaced as purchase
//! failures (the customer was billed; they must not be billed again).
//! No lock is held across a processor call; subscription writes go through
//! optimistic compare-and-save.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::admin::DiscountType;
use crate::catalog::BillingCycle;
use crate::client::{
    CreateCustomerRequest, PaymentProcessor, ProcessorSubscription, RecurringChargeRequest,
    UpdateChargeRequest,
};
use crate::config::CommerceConfig;
use crate::error::{CommerceError, Result};
use crate::ledger::EntitlementLedger;
use crate::pricing::{PricingEngine, PricingQuote};
use crate::storage::{CatalogStore, LedgerStore, SubscriptionStore};
use crate::validation::validate_account_id;

/// Maximum attempts for an optimistic subscription save.
const MAX_SAVE_ATTEMPTS: u32 = 3;

/// An account that can be billed.
///
/// Implement this for your user or organization types.
pub trait BillableAccount: Send + Sync {
    /// Unique account id.
    fn account_id(&self) -> &str;

    /// Billing email, used to resolve the processor customer.
    fn email(&self) -> &str;

    /// Display name, if any.
    fn name(&self) -> Option<&str>;
}

/// Subscription status, mirroring the processor's states plus local ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    Incomplete,
    Unpaid,
    /// Suspended by an admin; local state, not mirrored from the processor.
    Paused,
    /// Complimentary subscription with no processor billing behind it.
    Comp,
}

impl SubscriptionStatus {
    /// Parse from a processor status string. Unknown statuses are treated
    /// as canceled rather than guessed at.
    #[must_use]
    pub fn from_processor(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "past_due" => Self::PastDue,
            "incomplete" => Self::Incomplete,
            "unpaid" => Self::Unpaid,
            "paused" => Self::Paused,
            _ => Self::Canceled,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Incomplete => "incomplete",
            Self::Unpaid => "unpaid",
            Self::Paused => "paused",
            Self::Comp => "comp",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An admin override applied to a subscription's billing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedOverride {
    pub actor: String,
    pub discount: DiscountType,
    /// Final cost after this override, in cents.
    pub resulting_cost_cents: i64,
    pub reason: String,
    pub applied_at: DateTime<Utc>,
}

/// A subscription tracked locally, with the processor as billing authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Processor-assigned subscription id.
    pub subscription_id: String,
    pub account_id: String,
    /// Distinct bundle ids, sorted.
    pub bundle_ids: Vec<String>,
    pub billing_cycle: BillingCycle,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub base_cost_cents: i64,
    pub discount_bp: u32,
    /// Amount actually charged per period, after discounts and overrides.
    pub final_cost_cents: i64,
    pub cancel_at_period_end: bool,
    /// Bundles billed but not yet activated; retried by reconciliation.
    pub pending_reconciliation: Vec<String>,
    pub overrides: Vec<AppliedOverride>,
    /// Status before an admin pause, for exact restore.
    pub paused_from: Option<SubscriptionStatus>,
    /// Optimistic concurrency token; bumped on every save.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    fn from_purchase(
        account_id: &str,
        quote: &PricingQuote,
        processor_sub: &ProcessorSubscription,
    ) -> Self {
        let now = Utc::now();
        Self {
            subscription_id: processor_sub.subscription_id.clone(),
            account_id: account_id.to_string(),
            bundle_ids: quote.bundle_ids.clone(),
            billing_cycle: quote.billing_cycle,
            status: SubscriptionStatus::from_processor(&processor_sub.status),
            current_period_start: processor_sub.current_period_start,
            current_period_end: processor_sub.current_period_end,
            base_cost_cents: quote.base_cost_cents,
            discount_bp: quote.discount_bp,
            final_cost_cents: quote.final_cost_cents,
            cancel_at_period_end: false,
            pending_reconciliation: Vec::new(),
            overrides: Vec::new(),
            paused_from: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Orchestrates subscription lifecycle across pricing, processor, and ledger.
pub struct SubscriptionOrchestrator<S, C, L, P> {
    subscriptions: S,
    pricing: PricingEngine<C>,
    ledger: EntitlementLedger<L, C>,
    catalog: C,
    processor: P,
    currency: String,
}

impl<S, C, L, P> SubscriptionOrchestrator<S, C, L, P>
where
    S: SubscriptionStore,
    C: CatalogStore + Clone,
    L: LedgerStore,
    P: PaymentProcessor,
{
    pub fn new(
        subscriptions: S,
        catalog: C,
        ledger_store: L,
        processor: P,
        config: &CommerceConfig,
    ) -> Self {
        Self {
            subscriptions,
            pricing: PricingEngine::new(catalog.clone(), config.currency.clone()),
            ledger: EntitlementLedger::new(ledger_store, catalog.clone()),
            catalog,
            processor,
            currency: config.currency.clone(),
        }
    }

    /// Access the entitlement ledger wired into this orchestrator.
    pub fn ledger(&self) -> &EntitlementLedger<L, C> {
        &self.ledger
    }

    /// Access the pricing engine wired into this orchestrator.
    pub fn pricing(&self) -> &PricingEngine<C> {
        &self.pricing
    }

    /// The subscription record for an account.
    pub async fn get_subscription(&self, account_id: &str) -> Result<SubscriptionRecord> {
        validate_account_id(account_id)?;
        self.subscriptions
            .get_subscription(account_id)
            .await?
            .ok_or_else(|| CommerceError::NoSubscription {
                account_id: account_id.to_string(),
            })
    }

    /// Purchase a bundle selection for an account.
    ///
    /// Quotes first so invalid selections fail before any processor call.
    /// A declined charge leaves no subscription record and no entitlements.
    pub async fn purchase(
        &self,
        account: &dyn BillableAccount,
        bundle_ids: &[String],
        billing_cycle: BillingCycle,
        payment_method_ref: &str,
    ) -> Result<SubscriptionRecord> {
        let account_id = account.account_id();
        validate_account_id(account_id)?;

        if self
            .subscriptions
            .get_subscription(account_id)
            .await?
            .is_some()
        {
            return Err(CommerceError::AlreadySubscribed {
                account_id: account_id.to_string(),
            });
        }

        let quote = self.pricing.quote(bundle_ids, billing_cycle).await?;
        self.ensure_purchasable(&quote.bundle_ids).await?;

        let customer_id = self.resolve_customer(account).await?;
        self.processor
            .attach_payment_method(&customer_id, payment_method_ref)
            .await?;

        let charge = RecurringChargeRequest {
            customer_id,
            amount_cents: quote.final_cost_cents,
            currency: self.currency.clone(),
            interval: billing_cycle,
            description: describe_bundles(&quote.bundle_ids, billing_cycle),
            metadata: charge_metadata(account_id, &quote.bundle_ids, billing_cycle),
        };
        let processor_sub = self.processor.create_recurring_charge(&charge).await?;

        // Billing succeeded; everything from here on is recoverable state.
        let mut record = SubscriptionRecord::from_purchase(account_id, &quote, &processor_sub);
        self.subscriptions.insert_subscription(&record).await?;

        let failed = self.activate_bundles(account_id, &record.bundle_ids).await;
        if !failed.is_empty() {
            record.pending_reconciliation = failed;
            self.persist(&mut record).await?;
        }

        tracing::info!(
            target: "bundleway::orchestrator",
            account_id = %account_id,
            subscription_id = %record.subscription_id,
            bundles = %record.bundle_ids.join(","),
            final_cost_cents = record.final_cost_cents,
            pending = record.pending_reconciliation.len(),
            "Subscription purchased"
        );
        Ok(record)
    }

    /// Change an account's bundle selection in place.
    ///
    /// Re-quotes, updates the processor charge (native proration), and
    /// reconciles the ledger by set difference: added bundles are activated,
    /// removed ones deactivated, surviving ones untouched.
    pub async fn modify(
        &self,
        account_id: &str,
        new_bundle_ids: &[String],
        billing_cycle: BillingCycle,
    ) -> Result<SubscriptionRecord> {
        let mut record = self.get_subscription(account_id).await?;

        let quote = self.pricing.quote(new_bundle_ids, billing_cycle).await?;
        let old: BTreeSet<&str> = record.bundle_ids.iter().map(String::as_str).collect();
        let new: BTreeSet<&str> = quote.bundle_ids.iter().map(String::as_str).collect();
        let added: Vec<String> = new.difference(&old).map(|s| s.to_string()).collect();
        let removed: Vec<String> = old.difference(&new).map(|s| s.to_string()).collect();

        self.ensure_purchasable(&added).await?;

        let update = UpdateChargeRequest {
            subscription_id: record.subscription_id.clone(),
            amount_cents: quote.final_cost_cents,
            description: describe_bundles(&quote.bundle_ids, billing_cycle),
            metadata: charge_metadata(account_id, &quote.bundle_ids, billing_cycle),
        };
        let processor_sub = self.processor.update_recurring_charge(&update).await?;

        for bundle_id in &removed {
            match self.ledger.deactivate(account_id, bundle_id).await {
                Ok(_) => {}
                // A removed bundle stuck in pending_reconciliation was
                // never activated; there is nothing to deactivate.
                Err(CommerceError::NotActive { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        let failed = self.activate_bundles(account_id, &added).await;

        for attempt in 0..MAX_SAVE_ATTEMPTS {
            record.bundle_ids = quote.bundle_ids.clone();
            record.billing_cycle = billing_cycle;
            record.base_cost_cents = quote.base_cost_cents;
            record.discount_bp = quote.discount_bp;
            record.final_cost_cents = quote.final_cost_cents;
            record.status = SubscriptionStatus::from_processor(&processor_sub.status);
            record.current_period_start = processor_sub.current_period_start;
            record.current_period_end = processor_sub.current_period_end;
            record.pending_reconciliation = failed.clone();

            match self.persist(&mut record).await {
                Ok(()) => {
                    tracing::info!(
                        target: "bundleway::orchestrator",
                        account_id = %account_id,
                        added = %added.join(","),
                        removed = %removed.join(","),
                        final_cost_cents = record.final_cost_cents,
                        "Subscription modified"
                    );
                    return Ok(record);
                }
                Err(CommerceError::ConcurrentModification { .. })
                    if attempt + 1 < MAX_SAVE_ATTEMPTS =>
                {
                    record = self.get_subscription(account_id).await?;
                }
                Err(err) => return Err(err),
            }
        }

        Err(CommerceError::ConcurrentModification {
            account_id: account_id.to_string(),
        })
    }

    /// Cancel a subscription.
    ///
    /// Immediate cancellation stops billing and deactivates all entitlements
    /// now; otherwise the cancel-at-period-end flag is set and entitlements
    /// stay active until [`reconcile_period_end`](Self::reconcile_period_end).
    pub async fn cancel(&self, account_id: &str, immediate: bool) -> Result<SubscriptionRecord> {
        let mut record = self.get_subscription(account_id).await?;

        self.processor
            .cancel_subscription(&record.subscription_id, !immediate)
            .await?;

        if immediate {
            self.deactivate_all(&record).await?;
            record.status = SubscriptionStatus::Canceled;
            record.cancel_at_period_end = false;
        } else {
            record.cancel_at_period_end = true;
        }
        self.persist(&mut record).await?;

        tracing::info!(
            target: "bundleway::orchestrator",
            account_id = %account_id,
            subscription_id = %record.subscription_id,
            immediate = immediate,
            "Subscription canceled"
        );
        Ok(record)
    }

    /// Period-end hook for the webhook collaborator.
    ///
    /// Finalizes a cancel-at-period-end subscription: deactivates its
    /// entitlements and marks it canceled. A subscription without the flag
    /// is left untouched.
    pub async fn reconcile_period_end(&self, subscription_id: &str) -> Result<()> {
        let Some(mut record) = self
            .subscriptions
            .get_by_processor_id(subscription_id)
            .await?
        else {
            return Err(CommerceError::Internal {
                message: format!("no subscription record for processor id {subscription_id}"),
            });
        };

        if !record.cancel_at_period_end {
            return Ok(());
        }

        self.deactivate_all(&record).await?;
        record.status = SubscriptionStatus::Canceled;
        record.cancel_at_period_end = false;
        self.persist(&mut record).await?;

        tracing::info!(
            target: "bundleway::orchestrator",
            account_id = %record.account_id,
            subscription_id = %subscription_id,
            "Subscription finalized at period end"
        );
        Ok(())
    }

    /// Retry pending activations from a partially failed purchase or modify.
    ///
    /// Entitlement-only; never touches the processor. Returns the number of
    /// bundles activated.
    pub async fn reconcile_entitlements(&self, account_id: &str) -> Result<usize> {
        let mut record = self.get_subscription(account_id).await?;
        if record.pending_reconciliation.is_empty() {
            return Ok(0);
        }

        let mut still_pending = Vec::new();
        let mut resolved = 0;
        for bundle_id in record.pending_reconciliation.clone() {
            match self.ledger.activate(account_id, &bundle_id).await {
                Ok(_) => resolved += 1,
                // Another record occupies the slot; that resolves the
                // pending bundle only if it currently grants access (a
                // paused one does not).
                Err(CommerceError::AlreadyActive { .. }) => {
                    let granting = self
                        .ledger
                        .list_active(account_id)
                        .await?
                        .iter()
                        .any(|r| r.bundle_id == bundle_id);
                    if granting {
                        resolved += 1;
                    } else {
                        still_pending.push(bundle_id);
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        target: "bundleway::orchestrator",
                        account_id = %account_id,
                        bundle_id = %bundle_id,
                        error = %err,
                        "Pending activation still failing"
                    );
                    still_pending.push(bundle_id);
                }
            }
        }

        record.pending_reconciliation = still_pending;
        self.persist(&mut record).await?;
        Ok(resolved)
    }

    /// Save a mutated record with a version bump. The caller already holds
    /// the freshest copy; a mismatch surfaces as `ConcurrentModification`.
    pub(crate) async fn persist(&self, record: &mut SubscriptionRecord) -> Result<()> {
        let expected = record.version;
        record.version += 1;
        record.updated_at = Utc::now();

        if self
            .subscriptions
            .compare_and_save_subscription(record, expected)
            .await?
        {
            Ok(())
        } else {
            Err(CommerceError::ConcurrentModification {
                account_id: record.account_id.clone(),
            })
        }
    }

    /// Resolve the processor customer for an account: stored mapping first,
    /// then lookup by billing email, then create. Never duplicates.
    async fn resolve_customer(&self, account: &dyn BillableAccount) -> Result<String> {
        let account_id = account.account_id();
        if let Some(customer_id) = self
            .subscriptions
            .get_processor_customer_id(account_id)
            .await?
        {
            return Ok(customer_id);
        }

        let customer = match self
            .processor
            .find_customer_by_email(account.email())
            .await?
        {
            Some(existing) => existing,
            None => {
                self.processor
                    .create_customer(&CreateCustomerRequest {
                        email: account.email().to_string(),
                        name: account.name().map(str::to_string),
                        account_id: account_id.to_string(),
                    })
                    .await?
            }
        };

        self.subscriptions
            .set_processor_customer_id(account_id, &customer.customer_id)
            .await?;
        Ok(customer.customer_id)
    }

    /// Reject any bundle in the list that is unknown or closed to purchases.
    async fn ensure_purchasable(&self, bundle_ids: &[String]) -> Result<()> {
        for bundle_id in bundle_ids {
            let definition = self.catalog.get_bundle(bundle_id).await?.ok_or_else(|| {
                CommerceError::UnknownBundle {
                    bundle_id: bundle_id.clone(),
                }
            })?;
            if !definition.enabled {
                return Err(CommerceError::BundleDisabled {
                    bundle_id: bundle_id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Activate bundles after billing. Failures are collected, not raised:
    /// the account was already charged.
    async fn activate_bundles(&self, account_id: &str, bundle_ids: &[String]) -> Vec<String> {
        let mut failed = Vec::new();
        for bundle_id in bundle_ids {
            if let Err(err) = self.ledger.activate(account_id, bundle_id).await {
                tracing::error!(
                    target: "bundleway::orchestrator",
                    account_id = %account_id,
                    bundle_id = %bundle_id,
                    error = %err,
                    "Activation failed after successful billing, flagged for reconciliation"
                );
                failed.push(bundle_id.clone());
            }
        }
        failed
    }

    async fn deactivate_all(&self, record: &SubscriptionRecord) -> Result<()> {
        for bundle_id in &record.bundle_ids {
            match self.ledger.deactivate(&record.account_id, bundle_id).await {
                Ok(_) => {}
                // A bundle stuck in pending_reconciliation was never activated.
                Err(CommerceError::NotActive { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

fn describe_bundles(bundle_ids: &[String], cycle: BillingCycle) -> String {
    format!("Bundles: {} ({})", bundle_ids.join(", "), cycle)
}

fn charge_metadata(
    account_id: &str,
    bundle_ids: &[String],
    cycle: BillingCycle,
) -> std::collections::BTreeMap<String, String> {
    let mut metadata = std::collections::BTreeMap::new();
    metadata.insert("account_id".to_string(), account_id.to_string());
    metadata.insert("bundle_ids".to_string(), bundle_ids.join(","));
    metadata.insert("billing_cycle".to_string(), cycle.as_str().to_string());
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_catalog;
    use crate::client::{MockFailure, MockProcessor};
    use crate::storage::memory::InMemoryStore;

    struct TestAccount {
        id: String,
        email: String,
    }

    impl TestAccount {
        fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                email: format!("{id}@example.com"),
            }
        }
    }

    impl BillableAccount for TestAccount {
        fn account_id(&self) -> &str {
            &self.id
        }
        fn email(&self) -> &str {
            &self.email
        }
        fn name(&self) -> Option<&str> {
            None
        }
    }

    type TestOrchestrator =
        SubscriptionOrchestrator<InMemoryStore, InMemoryStore, InMemoryStore, MockProcessor>;

    async fn orchestrator() -> (TestOrchestrator, InMemoryStore, MockProcessor) {
        let store = InMemoryStore::new();
        for def in default_catalog() {
            store.insert_bundle(&def).await.unwrap();
        }
        let processor = MockProcessor::new();
        let orchestrator = SubscriptionOrchestrator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            processor.clone(),
            &CommerceConfig::default(),
        );
        (orchestrator, store, processor)
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_purchase_happy_path() {
        let (orchestrator, _, processor) = orchestrator().await;
        let account = TestAccount::new("acct_1");

        let record = orchestrator
            .purchase(
                &account,
                &ids(&["creator", "ecommerce"]),
                BillingCycle::Monthly,
                "pm_card_visa",
            )
            .await
            .unwrap();

        assert_eq!(record.final_cost_cents, 3440);
        assert_eq!(record.discount_bp, 2000);
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert!(record.pending_reconciliation.is_empty());
        assert_eq!(processor.customer_count(), 1);

        assert!(orchestrator
            .ledger()
            .has_service("acct_1", "bio_links")
            .await
            .unwrap());
        assert!(orchestrator
            .ledger()
            .has_service("acct_1", "storefront")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_declined_purchase_leaves_no_state() {
        let (orchestrator, store, processor) = orchestrator().await;
        processor.set_failure(MockFailure::DeclineCharge("insufficient funds".to_string()));

        let account = TestAccount::new("acct_1");
        let err = orchestrator
            .purchase(
                &account,
                &ids(&["creator"]),
                BillingCycle::Monthly,
                "pm_card_visa",
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "payment_declined");

        assert!(store.get_subscription("acct_1").await.unwrap().is_none());
        assert!(orchestrator
            .ledger()
            .list_active("acct_1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_purchase_rejects_disabled_before_charging() {
        let (orchestrator, store, processor) = orchestrator().await;
        let mut def = store.get_bundle("creator").await.unwrap().unwrap();
        def.enabled = false;
        store.update_bundle(&def).await.unwrap();

        let account = TestAccount::new("acct_1");
        let err = orchestrator
            .purchase(
                &account,
                &ids(&["creator"]),
                BillingCycle::Monthly,
                "pm_card_visa",
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "bundle_disabled");
        assert_eq!(processor.charge_attempts(), 0);
    }

    #[tokio::test]
    async fn test_purchase_requires_no_existing_subscription() {
        let (orchestrator, _, _) = orchestrator().await;
        let account = TestAccount::new("acct_1");
        orchestrator
            .purchase(
                &account,
                &ids(&["creator"]),
                BillingCycle::Monthly,
                "pm_card_visa",
            )
            .await
            .unwrap();

        let err = orchestrator
            .purchase(
                &account,
                &ids(&["ecommerce"]),
                BillingCycle::Monthly,
                "pm_card_visa",
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "already_subscribed");
    }

    #[tokio::test]
    async fn test_customer_resolved_idempotently() {
        let (orchestrator, _, processor) = orchestrator().await;
        let account = TestAccount::new("acct_1");

        orchestrator
            .purchase(
                &account,
                &ids(&["creator"]),
                BillingCycle::Monthly,
                "pm_card_visa",
            )
            .await
            .unwrap();
        orchestrator.cancel("acct_1", true).await.unwrap();
        orchestrator
            .subscriptions
            .delete_subscription("acct_1")
            .await
            .unwrap();

        orchestrator
            .purchase(
                &account,
                &ids(&["ecommerce"]),
                BillingCycle::Monthly,
                "pm_card_visa",
            )
            .await
            .unwrap();
        assert_eq!(processor.customer_count(), 1);
    }

    #[tokio::test]
    async fn test_partial_activation_failure_flags_reconciliation() {
        let (orchestrator, _, _) = orchestrator().await;
        // An engaged comp record makes post-billing activation fail for
        // that bundle only.
        orchestrator
            .ledger()
            .grant_comp("acct_1", "ecommerce", None)
            .await
            .unwrap();

        let account = TestAccount::new("acct_1");
        let record = orchestrator
            .purchase(
                &account,
                &ids(&["creator", "ecommerce"]),
                BillingCycle::Monthly,
                "pm_card_visa",
            )
            .await
            .unwrap();

        assert_eq!(record.pending_reconciliation, ids(&["ecommerce"]));
        assert!(orchestrator
            .ledger()
            .has_service("acct_1", "bio_links")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_purchase_over_expired_comp_activates_immediately() {
        let (orchestrator, _, _) = orchestrator().await;
        orchestrator
            .ledger()
            .grant_comp(
                "acct_1",
                "creator",
                Some(Utc::now() - chrono::Duration::days(1)),
            )
            .await
            .unwrap();

        let account = TestAccount::new("acct_1");
        let record = orchestrator
            .purchase(
                &account,
                &ids(&["creator"]),
                BillingCycle::Monthly,
                "pm_card_visa",
            )
            .await
            .unwrap();

        // The lapsed grant does not occupy the slot; the paying customer
        // gets access right away, with nothing left to reconcile.
        assert!(record.pending_reconciliation.is_empty());
        assert!(orchestrator
            .ledger()
            .has_service("acct_1", "bio_links")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_reconcile_keeps_non_granting_bundles_pending() {
        let (orchestrator, _, _) = orchestrator().await;
        orchestrator
            .ledger()
            .grant_comp("acct_1", "ecommerce", None)
            .await
            .unwrap();

        let account = TestAccount::new("acct_1");
        orchestrator
            .purchase(
                &account,
                &ids(&["creator", "ecommerce"]),
                BillingCycle::Monthly,
                "pm_card_visa",
            )
            .await
            .unwrap();

        // While paused, the comp record occupies the slot but grants
        // nothing, so the pending bundle must stay flagged.
        orchestrator.ledger().pause_account("acct_1").await.unwrap();
        assert_eq!(
            orchestrator.reconcile_entitlements("acct_1").await.unwrap(),
            0
        );
        let record = orchestrator.get_subscription("acct_1").await.unwrap();
        assert_eq!(record.pending_reconciliation, ids(&["ecommerce"]));

        orchestrator.ledger().resume_account("acct_1").await.unwrap();
        assert_eq!(
            orchestrator.reconcile_entitlements("acct_1").await.unwrap(),
            1
        );
        let record = orchestrator.get_subscription("acct_1").await.unwrap();
        assert!(record.pending_reconciliation.is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_entitlements_retries_pending() {
        let (orchestrator, _, _) = orchestrator().await;
        orchestrator
            .ledger()
            .grant_comp("acct_1", "ecommerce", None)
            .await
            .unwrap();

        let account = TestAccount::new("acct_1");
        orchestrator
            .purchase(
                &account,
                &ids(&["creator", "ecommerce"]),
                BillingCycle::Monthly,
                "pm_card_visa",
            )
            .await
            .unwrap();

        // The comp record still occupies the slot; AlreadyActive resolves it.
        let resolved = orchestrator.reconcile_entitlements("acct_1").await.unwrap();
        assert_eq!(resolved, 1);

        let record = orchestrator.get_subscription("acct_1").await.unwrap();
        assert!(record.pending_reconciliation.is_empty());
    }

    #[tokio::test]
    async fn test_modify_reconciles_by_set_difference() {
        let (orchestrator, _, _) = orchestrator().await;
        let account = TestAccount::new("acct_1");
        orchestrator
            .purchase(
                &account,
                &ids(&["creator", "ecommerce"]),
                BillingCycle::Monthly,
                "pm_card_visa",
            )
            .await
            .unwrap();

        let record = orchestrator
            .modify(
                "acct_1",
                &ids(&["ecommerce", "business"]),
                BillingCycle::Monthly,
            )
            .await
            .unwrap();

        assert_eq!(record.bundle_ids, ids(&["business", "ecommerce"]));
        assert_eq!(record.discount_bp, 2000);

        let ledger = orchestrator.ledger();
        assert!(!ledger.has_service("acct_1", "bio_links").await.unwrap());
        assert!(ledger.has_service("acct_1", "crm").await.unwrap());
        assert!(ledger.has_service("acct_1", "storefront").await.unwrap());
    }

    #[tokio::test]
    async fn test_modify_tolerates_never_activated_bundles() {
        let (orchestrator, store, _) = orchestrator().await;
        let account = TestAccount::new("acct_1");
        orchestrator
            .purchase(
                &account,
                &ids(&["creator"]),
                BillingCycle::Monthly,
                "pm_card_visa",
            )
            .await
            .unwrap();

        // Simulate a purchase whose ecommerce activation never produced a
        // ledger record and was flagged for reconciliation.
        let mut record = store.get_subscription("acct_1").await.unwrap().unwrap();
        record.bundle_ids = ids(&["creator", "ecommerce"]);
        record.pending_reconciliation = ids(&["ecommerce"]);
        let version = record.version;
        assert!(store
            .compare_and_save_subscription(&record, version)
            .await
            .unwrap());

        // Removing the never-activated bundle must not abort the modify.
        let modified = orchestrator
            .modify("acct_1", &ids(&["creator"]), BillingCycle::Monthly)
            .await
            .unwrap();
        assert_eq!(modified.bundle_ids, ids(&["creator"]));
        assert!(modified.pending_reconciliation.is_empty());
    }

    #[tokio::test]
    async fn test_modify_without_subscription() {
        let (orchestrator, _, _) = orchestrator().await;
        let err = orchestrator
            .modify("acct_1", &ids(&["creator"]), BillingCycle::Monthly)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "no_subscription");
    }

    #[tokio::test]
    async fn test_cancel_immediate() {
        let (orchestrator, _, processor) = orchestrator().await;
        let account = TestAccount::new("acct_1");
        let purchased = orchestrator
            .purchase(
                &account,
                &ids(&["creator"]),
                BillingCycle::Monthly,
                "pm_card_visa",
            )
            .await
            .unwrap();

        let record = orchestrator.cancel("acct_1", true).await.unwrap();
        assert_eq!(record.status, SubscriptionStatus::Canceled);
        assert!(orchestrator
            .ledger()
            .list_active("acct_1")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            processor
                .subscription(&purchased.subscription_id)
                .unwrap()
                .status,
            "canceled"
        );
    }

    #[tokio::test]
    async fn test_cancel_at_period_end_keeps_entitlements() {
        let (orchestrator, _, _) = orchestrator().await;
        let account = TestAccount::new("acct_1");
        let purchased = orchestrator
            .purchase(
                &account,
                &ids(&["creator"]),
                BillingCycle::Monthly,
                "pm_card_visa",
            )
            .await
            .unwrap();

        let record = orchestrator.cancel("acct_1", false).await.unwrap();
        assert!(record.cancel_at_period_end);
        assert_ne!(record.status, SubscriptionStatus::Canceled);
        assert!(orchestrator
            .ledger()
            .has_service("acct_1", "bio_links")
            .await
            .unwrap());

        orchestrator
            .reconcile_period_end(&purchased.subscription_id)
            .await
            .unwrap();
        let record = orchestrator.get_subscription("acct_1").await.unwrap();
        assert_eq!(record.status, SubscriptionStatus::Canceled);
        assert!(orchestrator
            .ledger()
            .list_active("acct_1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_period_end_without_flag_is_noop() {
        let (orchestrator, _, _) = orchestrator().await;
        let account = TestAccount::new("acct_1");
        let purchased = orchestrator
            .purchase(
                &account,
                &ids(&["creator"]),
                BillingCycle::Monthly,
                "pm_card_visa",
            )
            .await
            .unwrap();

        orchestrator
            .reconcile_period_end(&purchased.subscription_id)
            .await
            .unwrap();
        let record = orchestrator.get_subscription("acct_1").await.unwrap();
        assert_eq!(record.status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_status_from_processor() {
        assert_eq!(
            SubscriptionStatus::from_processor("active"),
            SubscriptionStatus::Active
        );
        assert_eq!(
            SubscriptionStatus::from_processor("past_due"),
            SubscriptionStatus::PastDue
        );
        assert_eq!(
            SubscriptionStatus::from_processor("some_future_status"),
            SubscriptionStatus::Canceled
        );
    }
}

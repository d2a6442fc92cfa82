//! End-to-end subscription lifecycle tests using the public API with the
//! in-memory store and mock processor.

use bundleway::{
    AdminOverrides, AuditStore, BillableAccount, BillingCycle, CommerceConfig, DiscountType,
    EntitlementStatus, InMemoryAuditLog, MockProcessor, SubscriptionOrchestrator,
    SubscriptionStatus, catalog::default_catalog, client::MockFailure,
    storage::CatalogStore, storage::SubscriptionStore, storage::memory::InMemoryStore,
};

struct Account {
    id: String,
    email: String,
}

impl Account {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            email: format!("{id}@example.com"),
        }
    }
}

impl BillableAccount for Account {
    fn account_id(&self) -> &str {
        &self.id
    }
    fn email(&self) -> &str {
        &self.email
    }
    fn name(&self) -> Option<&str> {
        Some("Test User")
    }
}

struct Harness {
    store: InMemoryStore,
    processor: MockProcessor,
    orchestrator:
        SubscriptionOrchestrator<InMemoryStore, InMemoryStore, InMemoryStore, MockProcessor>,
    admin: AdminOverrides<InMemoryStore, InMemoryStore, InMemoryStore, InMemoryAuditLog>,
    audit: InMemoryAuditLog,
}

async fn harness() -> Harness {
    let store = InMemoryStore::new();
    for def in default_catalog() {
        store.insert_bundle(&def).await.unwrap();
    }
    let processor = MockProcessor::new();
    let audit = InMemoryAuditLog::new();
    Harness {
        orchestrator: SubscriptionOrchestrator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            processor.clone(),
            &CommerceConfig::default(),
        ),
        admin: AdminOverrides::new(store.clone(), store.clone(), store.clone(), audit.clone()),
        store,
        processor,
        audit,
    }
}

fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn purchase_grants_access_at_the_quoted_price() {
    let h = harness().await;
    let account = Account::new("acct_1");

    let record = h
        .orchestrator
        .purchase(
            &account,
            &ids(&["creator", "ecommerce", "business"]),
            BillingCycle::Monthly,
            "pm_card_visa",
        )
        .await
        .unwrap();

    assert_eq!(record.base_cost_cents, 8200);
    assert_eq!(record.discount_bp, 3000);
    assert_eq!(record.final_cost_cents, 5740);
    assert_eq!(record.status, SubscriptionStatus::Active);

    let ledger = h.orchestrator.ledger();
    assert!(ledger.has_service("acct_1", "bio_links").await.unwrap());
    assert!(ledger.has_service("acct_1", "crm").await.unwrap());
    assert!(!ledger.has_service("acct_1", "courses").await.unwrap());

    // The processor was charged exactly the quoted final cost.
    let processor_sub = h.processor.subscription(&record.subscription_id).unwrap();
    assert_eq!(processor_sub.amount_cents, 5740);
}

#[tokio::test]
async fn declined_card_leaves_the_account_untouched() {
    let h = harness().await;
    h.processor
        .set_failure(MockFailure::DeclineCharge("card_declined".to_string()));

    let account = Account::new("acct_1");
    let err = h
        .orchestrator
        .purchase(
            &account,
            &ids(&["creator"]),
            BillingCycle::Monthly,
            "pm_card_visa",
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "payment_declined");
    assert!(!err.is_retryable());
    assert!(h
        .orchestrator
        .get_subscription("acct_1")
        .await
        .is_err());
    assert!(h
        .orchestrator
        .ledger()
        .list_active("acct_1")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn processor_outage_is_retryable_and_leaves_no_state() {
    let h = harness().await;
    h.processor.set_failure(MockFailure::Unavailable);

    let account = Account::new("acct_1");
    let err = h
        .orchestrator
        .purchase(
            &account,
            &ids(&["creator"]),
            BillingCycle::Monthly,
            "pm_card_visa",
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "processor_unavailable");
    assert!(err.is_retryable());
    assert!(h.store.get_subscription("acct_1").await.unwrap().is_none());
}

#[tokio::test]
async fn modify_changes_bundles_and_price_in_place() {
    let h = harness().await;
    let account = Account::new("acct_1");
    h.orchestrator
        .purchase(
            &account,
            &ids(&["creator"]),
            BillingCycle::Monthly,
            "pm_card_visa",
        )
        .await
        .unwrap();

    let record = h
        .orchestrator
        .modify(
            "acct_1",
            &ids(&["creator", "social_media"]),
            BillingCycle::Monthly,
        )
        .await
        .unwrap();

    assert_eq!(record.base_cost_cents, 4800);
    assert_eq!(record.discount_bp, 2000);
    assert_eq!(record.final_cost_cents, 3840);

    let ledger = h.orchestrator.ledger();
    assert!(ledger.has_service("acct_1", "bio_links").await.unwrap());
    assert!(ledger
        .has_service("acct_1", "social_scheduling")
        .await
        .unwrap());
}

#[tokio::test]
async fn full_lifecycle_purchase_pause_resume_cancel() {
    let h = harness().await;
    let account = Account::new("acct_1");
    h.orchestrator
        .purchase(
            &account,
            &ids(&["creator", "ecommerce"]),
            BillingCycle::Monthly,
            "pm_card_visa",
        )
        .await
        .unwrap();

    // Admin pauses during a dispute; access is suspended, not revoked.
    h.admin
        .pause("admin_1", "acct_1", "chargeback dispute")
        .await
        .unwrap();
    let ledger = h.orchestrator.ledger();
    assert!(!ledger.has_service("acct_1", "bio_links").await.unwrap());

    h.admin
        .resume("admin_1", "acct_1", "dispute resolved")
        .await
        .unwrap();
    assert!(ledger.has_service("acct_1", "bio_links").await.unwrap());

    // Cancel at period end keeps access until the webhook fires.
    let record = h.orchestrator.cancel("acct_1", false).await.unwrap();
    assert!(record.cancel_at_period_end);
    assert!(ledger.has_service("acct_1", "bio_links").await.unwrap());

    h.orchestrator
        .reconcile_period_end(&record.subscription_id)
        .await
        .unwrap();
    assert!(!ledger.has_service("acct_1", "bio_links").await.unwrap());
    assert_eq!(
        h.orchestrator
            .get_subscription("acct_1")
            .await
            .unwrap()
            .status,
        SubscriptionStatus::Canceled
    );

    // Both admin actions are on the audit trail.
    let trail = h.audit.by_account("acct_1").await.unwrap();
    assert_eq!(trail.len(), 2);
    assert!(trail.iter().all(|r| r.succeeded));
}

#[tokio::test]
async fn admin_discount_stacks_on_the_bundle_discount() {
    let h = harness().await;
    let account = Account::new("acct_1");
    h.orchestrator
        .purchase(
            &account,
            &ids(&["creator", "ecommerce"]),
            BillingCycle::Monthly,
            "pm_card_visa",
        )
        .await
        .unwrap();

    let record = h
        .admin
        .apply_discount(
            "admin_1",
            "acct_1",
            DiscountType::FixedCents(440),
            "retention offer",
        )
        .await
        .unwrap();
    assert_eq!(record.final_cost_cents, 3000);

    // No combination of fixed discounts can push the cost negative.
    let record = h
        .admin
        .apply_discount(
            "admin_1",
            "acct_1",
            DiscountType::FixedCents(999_999),
            "goodwill",
        )
        .await
        .unwrap();
    assert_eq!(record.final_cost_cents, 0);
}

#[tokio::test]
async fn comp_grant_expires_without_billing() {
    let h = harness().await;
    let expiry = chrono::Utc::now() + chrono::Duration::days(14);
    h.admin
        .grant_comp(
            "admin_1",
            "acct_1",
            &ids(&["enterprise"]),
            Some(expiry),
            "pilot program",
        )
        .await
        .unwrap();

    let ledger = h.orchestrator.ledger();
    assert!(ledger.has_service("acct_1", "anything").await.unwrap());
    assert_eq!(h.processor.charge_attempts(), 0);

    let active = ledger.list_active("acct_1").await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].status, EntitlementStatus::Comp);
    assert_eq!(active[0].expires_at, Some(expiry));
}

#[tokio::test]
async fn expired_comp_never_blocks_a_paid_purchase() {
    let h = harness().await;
    let expiry = chrono::Utc::now() - chrono::Duration::days(1);
    h.admin
        .grant_comp(
            "admin_1",
            "acct_1",
            &ids(&["creator"]),
            Some(expiry),
            "lapsed pilot",
        )
        .await
        .unwrap();

    let ledger = h.orchestrator.ledger();
    assert!(!ledger.has_service("acct_1", "bio_links").await.unwrap());

    // Buying the same bundle after the grant lapsed must deliver access,
    // not a billed-but-empty subscription.
    let account = Account::new("acct_1");
    let record = h
        .orchestrator
        .purchase(
            &account,
            &ids(&["creator"]),
            BillingCycle::Monthly,
            "pm_card_visa",
        )
        .await
        .unwrap();
    assert!(record.pending_reconciliation.is_empty());
    assert!(ledger.has_service("acct_1", "bio_links").await.unwrap());
}

#[tokio::test]
async fn disabling_a_bundle_blocks_new_purchases_only() {
    let h = harness().await;
    let veteran = Account::new("acct_veteran");
    h.orchestrator
        .purchase(
            &veteran,
            &ids(&["education"]),
            BillingCycle::Monthly,
            "pm_card_visa",
        )
        .await
        .unwrap();

    let mut def = h.store.get_bundle("education").await.unwrap().unwrap();
    def.enabled = false;
    h.store.update_bundle(&def).await.unwrap();

    // Existing subscriber keeps access.
    assert!(h
        .orchestrator
        .ledger()
        .has_service("acct_veteran", "courses")
        .await
        .unwrap());

    // New purchases are rejected before any charge.
    let newcomer = Account::new("acct_new");
    let attempts_before = h.processor.charge_attempts();
    let err = h
        .orchestrator
        .purchase(
            &newcomer,
            &ids(&["education"]),
            BillingCycle::Monthly,
            "pm_card_visa",
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "bundle_disabled");
    assert_eq!(h.processor.charge_attempts(), attempts_before);
}

#[tokio::test]
async fn yearly_cycle_bills_yearly_prices() {
    let h = harness().await;
    let account = Account::new("acct_1");
    let record = h
        .orchestrator
        .purchase(
            &account,
            &ids(&["creator", "ecommerce"]),
            BillingCycle::Yearly,
            "pm_card_visa",
        )
        .await
        .unwrap();
    assert_eq!(record.base_cost_cents, 43_000);
    assert_eq!(record.final_cost_cents, 34_400);
    assert_eq!(record.billing_cycle, BillingCycle::Yearly);
}

//! Admin override layer.
//!
//! Manual discounts, comp grants, and pause/resume bypass the normal billing
//! flow, so every call here is audited, including attempts that fail. Catalog
//! redefinition goes through [`CatalogManager`](crate::catalog::CatalogManager),
//! which audits its own mutations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{self, AuditAction, AuditRecord, AuditStore};
use crate::error::{CommerceError, Result};
use crate::ledger::{EntitlementLedger, EntitlementRecord};
use crate::orchestrator::{AppliedOverride, SubscriptionRecord, SubscriptionStatus};
use crate::pricing::apply_discount_cents;
use crate::storage::{CatalogStore, LedgerStore, SubscriptionStore};
use crate::validation::validate_account_id;

/// A manual billing adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// Percent off the current final cost. Clamped to [0, 100] at application.
    Percentage(u32),
    /// Fixed amount off in cents. The final cost floors at zero.
    FixedCents(i64),
}

/// Admin operations over subscriptions and entitlements.
pub struct AdminOverrides<S, C, L, A> {
    subscriptions: S,
    ledger: EntitlementLedger<L, C>,
    audit: A,
}

impl<S, C, L, A> AdminOverrides<S, C, L, A>
where
    S: SubscriptionStore,
    C: CatalogStore,
    L: LedgerStore,
    A: AuditStore,
{
    pub fn new(subscriptions: S, catalog: C, ledger_store: L, audit: A) -> Self {
        Self {
            subscriptions,
            ledger: EntitlementLedger::new(ledger_store, catalog),
            audit,
        }
    }

    /// Apply a manual discount to an account's subscription.
    ///
    /// Percentage discounts clamp to [0, 100]; fixed discounts floor the
    /// final cost at zero. The adjustment is appended to the subscription's
    /// override history.
    pub async fn apply_discount(
        &self,
        actor: &str,
        account_id: &str,
        discount: DiscountType,
        reason: &str,
    ) -> Result<SubscriptionRecord> {
        validate_account_id(account_id)?;

        if let DiscountType::FixedCents(cents) = discount {
            if cents < 0 {
                let err = CommerceError::InvalidDiscount {
                    reason: "fixed discount cannot be negative".to_string(),
                };
                self.reject(actor, AuditAction::DiscountApplied, account_id, &err)
                    .await;
                return Err(err);
            }
        }

        let mut record = match self.load_subscription(account_id).await {
            Ok(record) => record,
            Err(err) => {
                self.reject(actor, AuditAction::DiscountApplied, account_id, &err)
                    .await;
                return Err(err);
            }
        };

        let before = serde_json::json!({ "final_cost_cents": record.final_cost_cents });
        let new_final = match discount {
            DiscountType::Percentage(percent) => {
                let clamped = percent.min(100);
                apply_discount_cents(record.final_cost_cents, clamped * 100)
            }
            DiscountType::FixedCents(cents) => (record.final_cost_cents - cents).max(0),
        };

        record.final_cost_cents = new_final;
        record.overrides.push(AppliedOverride {
            actor: actor.to_string(),
            discount,
            resulting_cost_cents: new_final,
            reason: reason.to_string(),
            applied_at: Utc::now(),
        });
        self.persist(&mut record).await?;

        audit::record(
            &self.audit,
            AuditRecord::applied(
                actor,
                AuditAction::DiscountApplied,
                account_id,
                before,
                serde_json::json!({ "final_cost_cents": record.final_cost_cents }),
                reason,
            ),
        )
        .await;
        Ok(record)
    }

    /// Grant complimentary entitlements with no processor involvement.
    pub async fn grant_comp(
        &self,
        actor: &str,
        account_id: &str,
        bundle_ids: &[String],
        expires_at: Option<DateTime<Utc>>,
        reason: &str,
    ) -> Result<Vec<EntitlementRecord>> {
        let mut granted = Vec::new();
        for bundle_id in bundle_ids {
            match self.ledger.grant_comp(account_id, bundle_id, expires_at).await {
                Ok(record) => granted.push(record),
                Err(err) => {
                    self.reject(actor, AuditAction::CompGranted, account_id, &err)
                        .await;
                    return Err(err);
                }
            }
        }

        audit::record(
            &self.audit,
            AuditRecord::applied(
                actor,
                AuditAction::CompGranted,
                account_id,
                serde_json::Value::Null,
                serde_json::json!({ "bundles": bundle_ids, "expires_at": expires_at }),
                reason,
            ),
        )
        .await;
        Ok(granted)
    }

    /// Pause an account's subscription and entitlements.
    ///
    /// The previous statuses are recorded so resume restores them exactly.
    pub async fn pause(
        &self,
        actor: &str,
        account_id: &str,
        reason: &str,
    ) -> Result<SubscriptionRecord> {
        validate_account_id(account_id)?;
        let mut record = match self.load_subscription(account_id).await {
            Ok(record) => record,
            Err(err) => {
                self.reject(actor, AuditAction::SubscriptionPaused, account_id, &err)
                    .await;
                return Err(err);
            }
        };

        if record.status == SubscriptionStatus::Paused {
            let err = CommerceError::AlreadyPaused {
                account_id: account_id.to_string(),
            };
            self.reject(actor, AuditAction::SubscriptionPaused, account_id, &err)
                .await;
            return Err(err);
        }

        let before = serde_json::json!({ "status": record.status });
        record.paused_from = Some(record.status);
        record.status = SubscriptionStatus::Paused;
        self.ledger.pause_account(account_id).await?;
        self.persist(&mut record).await?;

        audit::record(
            &self.audit,
            AuditRecord::applied(
                actor,
                AuditAction::SubscriptionPaused,
                account_id,
                before,
                serde_json::json!({ "status": record.status }),
                reason,
            ),
        )
        .await;
        Ok(record)
    }

    /// Resume a paused subscription, restoring the pre-pause status.
    pub async fn resume(
        &self,
        actor: &str,
        account_id: &str,
        reason: &str,
    ) -> Result<SubscriptionRecord> {
        validate_account_id(account_id)?;
        let mut record = match self.load_subscription(account_id).await {
            Ok(record) => record,
            Err(err) => {
                self.reject(actor, AuditAction::SubscriptionResumed, account_id, &err)
                    .await;
                return Err(err);
            }
        };

        if record.status != SubscriptionStatus::Paused {
            let err = CommerceError::NotPaused {
                account_id: account_id.to_string(),
            };
            self.reject(actor, AuditAction::SubscriptionResumed, account_id, &err)
                .await;
            return Err(err);
        }

        let before = serde_json::json!({ "status": record.status });
        record.status = record.paused_from.unwrap_or(SubscriptionStatus::Active);
        record.paused_from = None;
        self.ledger.resume_account(account_id).await?;
        self.persist(&mut record).await?;

        audit::record(
            &self.audit,
            AuditRecord::applied(
                actor,
                AuditAction::SubscriptionResumed,
                account_id,
                before,
                serde_json::json!({ "status": record.status }),
                reason,
            ),
        )
        .await;
        Ok(record)
    }

    /// Audit history for an account.
    pub async fn audit_trail(&self, account_id: &str) -> Result<Vec<AuditRecord>> {
        self.audit.by_account(account_id).await
    }

    async fn load_subscription(&self, account_id: &str) -> Result<SubscriptionRecord> {
        self.subscriptions
            .get_subscription(account_id)
            .await?
            .ok_or_else(|| CommerceError::NoSubscription {
                account_id: account_id.to_string(),
            })
    }

    async fn persist(&self, record: &mut SubscriptionRecord) -> Result<()> {
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

    async fn reject(
        &self,
        actor: &str,
        action: AuditAction,
        account_id: &str,
        err: &CommerceError,
    ) {
        audit::record(
            &self.audit,
            AuditRecord::rejected(
                actor,
                action,
                account_id,
                serde_json::Value::Null,
                &err.to_string(),
            ),
        )
        .await;
    }
}

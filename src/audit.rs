//! Audit trail for administrative and catalog mutations.
//!
//! Admin actions bypass billing, so every one of them must be traceable.
//! Records are append-only and queryable by account or by time range, and are
//! written for attempted-but-failed overrides as well as successful ones.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// The administrative action an audit record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A new bundle was registered in the catalog.
    BundleCreated,
    /// Bundle pricing changed.
    BundlePricingUpdated,
    /// Bundle feature set changed.
    BundleFeaturesUpdated,
    /// Bundle service set changed.
    BundleServicesUpdated,
    /// Bundle usage limits changed.
    BundleLimitsUpdated,
    /// Bundle was enabled or disabled for new purchases.
    BundleEnablementChanged,
    /// A manual discount was applied to a subscription.
    DiscountApplied,
    /// Complimentary entitlements were granted.
    CompGranted,
    /// A subscription and its entitlements were paused.
    SubscriptionPaused,
    /// A paused subscription was resumed.
    SubscriptionResumed,
}

impl AuditAction {
    /// Stable string form for structured logging.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BundleCreated => "bundle_created",
            Self::BundlePricingUpdated => "bundle_pricing_updated",
            Self::BundleFeaturesUpdated => "bundle_features_updated",
            Self::BundleServicesUpdated => "bundle_services_updated",
            Self::BundleLimitsUpdated => "bundle_limits_updated",
            Self::BundleEnablementChanged => "bundle_enablement_changed",
            Self::DiscountApplied => "discount_applied",
            Self::CompGranted => "comp_granted",
            Self::SubscriptionPaused => "subscription_paused",
            Self::SubscriptionResumed => "subscription_resumed",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable audit record.
///
/// `before`/`after` are JSON snapshots of the mutated state; `after` is `null`
/// when the attempted action was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    /// Who performed the action (admin user id or system identifier).
    pub actor: String,
    pub action: AuditAction,
    /// The account the action targeted. Catalog-wide mutations use the
    /// bundle id prefixed with `bundle:`.
    pub target_account: String,
    pub before: serde_json::Value,
    pub after: serde_json::Value,
    pub reason: String,
    /// Whether the action was applied. Rejected attempts are recorded too.
    pub succeeded: bool,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// Build a record for a successful mutation.
    #[must_use]
    pub fn applied(
        actor: &str,
        action: AuditAction,
        target: &str,
        before: serde_json::Value,
        after: serde_json::Value,
        reason: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor: actor.to_string(),
            action,
            target_account: target.to_string(),
            before,
            after,
            reason: reason.to_string(),
            succeeded: true,
            timestamp: Utc::now(),
        }
    }

    /// Build a record for an attempted action that was rejected.
    #[must_use]
    pub fn rejected(
        actor: &str,
        action: AuditAction,
        target: &str,
        before: serde_json::Value,
        reason: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor: actor.to_string(),
            action,
            target_account: target.to_string(),
            before,
            after: serde_json::Value::Null,
            reason: reason.to_string(),
            succeeded: false,
            timestamp: Utc::now(),
        }
    }
}

/// Append-only store for audit records.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append a record. Records are never updated or deleted.
    async fn append(&self, record: &AuditRecord) -> Result<()>;

    /// All records targeting an account, oldest first.
    async fn by_account(&self, target_account: &str) -> Result<Vec<AuditRecord>>;

    /// All records within a time range, oldest first.
    async fn by_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>>;
}

/// Append a record and emit it to the tracing subscriber.
///
/// Audit writes must not disrupt the operation being audited; a storage
/// failure here is logged and swallowed, since the tracing line itself
/// preserves the trail.
pub async fn record<A: AuditStore>(store: &A, rec: AuditRecord) {
    tracing::info!(
        target: "bundleway::audit",
        actor = %rec.actor,
        action = %rec.action,
        target_account = %rec.target_account,
        succeeded = rec.succeeded,
        reason = %rec.reason,
        "Audit event"
    );

    if let Err(err) = store.append(&rec).await {
        tracing::error!(
            target: "bundleway::audit",
            error = %err,
            action = %rec.action,
            "Failed to persist audit record"
        );
    }
}

/// In-memory append-only audit log.
///
/// Suitable for tests and single-node deployments; production backends
/// implement [`AuditStore`] over the document database.
#[derive(Default, Clone)]
pub struct InMemoryAuditLog {
    records: std::sync::Arc<std::sync::RwLock<Vec<AuditRecord>>>,
}

impl InMemoryAuditLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records (for test assertions).
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Check whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditLog {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        self.records
            .write()
            .map_err(|_| crate::error::CommerceError::Storage {
                message: "audit log lock poisoned".to_string(),
            })?
            .push(record.clone());
        Ok(())
    }

    async fn by_account(&self, target_account: &str) -> Result<Vec<AuditRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| crate::error::CommerceError::Storage {
                message: "audit log lock poisoned".to_string(),
            })?;
        Ok(records
            .iter()
            .filter(|r| r.target_account == target_account)
            .cloned()
            .collect())
    }

    async fn by_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| crate::error::CommerceError::Storage {
                message: "audit log lock poisoned".to_string(),
            })?;
        Ok(records
            .iter()
            .filter(|r| r.timestamp >= from && r.timestamp <= to)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_append_and_query_by_account() {
        let log = InMemoryAuditLog::new();

        record(
            &log,
            AuditRecord::applied(
                "admin_1",
                AuditAction::CompGranted,
                "acct_1",
                serde_json::json!(null),
                serde_json::json!({"bundles": ["creator"]}),
                "support escalation",
            ),
        )
        .await;

        record(
            &log,
            AuditRecord::applied(
                "admin_1",
                AuditAction::DiscountApplied,
                "acct_2",
                serde_json::json!({"final_cost_cents": 3440}),
                serde_json::json!({"final_cost_cents": 2440}),
                "retention offer",
            ),
        )
        .await;

        let for_one = log.by_account("acct_1").await.unwrap();
        assert_eq!(for_one.len(), 1);
        assert_eq!(for_one[0].action, AuditAction::CompGranted);
        assert!(for_one[0].succeeded);

        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_query_by_range() {
        let log = InMemoryAuditLog::new();
        let rec = AuditRecord::applied(
            "admin_1",
            AuditAction::SubscriptionPaused,
            "acct_1",
            serde_json::json!("active"),
            serde_json::json!("paused"),
            "payment dispute",
        );
        let ts = rec.timestamp;
        log.append(&rec).await.unwrap();

        let hits = log
            .by_range(ts - Duration::minutes(1), ts + Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let misses = log
            .by_range(ts + Duration::minutes(1), ts + Duration::minutes(2))
            .await
            .unwrap();
        assert!(misses.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_attempts_are_recorded() {
        let log = InMemoryAuditLog::new();
        record(
            &log,
            AuditRecord::rejected(
                "admin_2",
                AuditAction::DiscountApplied,
                "acct_9",
                serde_json::json!(null),
                "no subscription found",
            ),
        )
        .await;

        let records = log.by_account("acct_9").await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].succeeded);
        assert_eq!(records[0].after, serde_json::Value::Null);
    }

    #[test]
    fn test_action_as_str() {
        assert_eq!(AuditAction::CompGranted.as_str(), "comp_granted");
        assert_eq!(
            AuditAction::BundleEnablementChanged.as_str(),
            "bundle_enablement_changed"
        );
    }
}

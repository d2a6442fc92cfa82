//! Payment processor boundary.
//!
//! The processor is an external collaborator behind the [`PaymentProcessor`]
//! trait. Outbound requests are typed structs validated against the
//! processor's documented parameter schema before anything is sent; one
//! undocumented parameter once failed every purchase in production, so the
//! metadata keys are allowlisted here rather than trusted at call sites.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::BillingCycle;
use crate::error::{CommerceError, Result};

/// Metadata keys the processor's documented schema accepts.
pub const ALLOWED_METADATA_KEYS: [&str; 3] = ["account_id", "bundle_ids", "billing_cycle"];

/// A customer record on the processor side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorCustomer {
    pub customer_id: String,
    pub email: String,
    pub name: Option<String>,
}

/// Request to create a processor customer.
#[derive(Debug, Clone, Serialize)]
pub struct CreateCustomerRequest {
    pub email: String,
    pub name: Option<String>,
    pub account_id: String,
}

impl CreateCustomerRequest {
    /// Validate against the documented customer schema.
    pub fn validate(&self) -> Result<()> {
        if self.email.is_empty() || !self.email.contains('@') {
            return Err(CommerceError::CustomerCreationFailed {
                reason: "billing email is missing or malformed".to_string(),
            });
        }
        Ok(())
    }
}

/// Request to create a recurring charge (subscription) on the processor.
#[derive(Debug, Clone, Serialize)]
pub struct RecurringChargeRequest {
    pub customer_id: String,
    /// Amount per period in minor currency units.
    pub amount_cents: i64,
    /// ISO 4217 currency code.
    pub currency: String,
    pub interval: BillingCycle,
    /// Human-readable description of the bundle set.
    pub description: String,
    pub metadata: BTreeMap<String, String>,
}

impl RecurringChargeRequest {
    /// Validate against the processor's documented subscription schema.
    ///
    /// Rejects undocumented metadata keys with
    /// [`CommerceError::UnsupportedProcessorParameter`] before the request
    /// leaves the process.
    pub fn validate(&self) -> Result<()> {
        if self.customer_id.is_empty() {
            return Err(CommerceError::Internal {
                message: "recurring charge requires a customer id".to_string(),
            });
        }
        if self.amount_cents < 0 {
            return Err(CommerceError::Internal {
                message: format!("recurring charge amount is negative: {}", self.amount_cents),
            });
        }
        if self.currency.len() != 3 {
            return Err(CommerceError::Internal {
                message: format!("invalid currency code: {}", self.currency),
            });
        }
        if self.description.is_empty() {
            return Err(CommerceError::Internal {
                message: "recurring charge requires a description".to_string(),
            });
        }
        for key in self.metadata.keys() {
            if !ALLOWED_METADATA_KEYS.contains(&key.as_str()) {
                return Err(CommerceError::UnsupportedProcessorParameter {
                    parameter: key.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Request to update an existing recurring charge in place.
///
/// The processor applies its native proration when the amount changes.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateChargeRequest {
    pub subscription_id: String,
    pub amount_cents: i64,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
}

impl UpdateChargeRequest {
    /// Same schema rules as [`RecurringChargeRequest::validate`].
    pub fn validate(&self) -> Result<()> {
        if self.subscription_id.is_empty() {
            return Err(CommerceError::Internal {
                message: "charge update requires a subscription id".to_string(),
            });
        }
        if self.amount_cents < 0 {
            return Err(CommerceError::Internal {
                message: format!("charge update amount is negative: {}", self.amount_cents),
            });
        }
        for key in self.metadata.keys() {
            if !ALLOWED_METADATA_KEYS.contains(&key.as_str()) {
                return Err(CommerceError::UnsupportedProcessorParameter {
                    parameter: key.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Subscription state as reported by the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorSubscription {
    pub subscription_id: String,
    pub customer_id: String,
    /// Processor status string ("active", "past_due", ...).
    pub status: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub amount_cents: i64,
}

/// The payment processor's subscription surface.
///
/// Implemented by [`LiveProcessorClient`](crate::live_client::LiveProcessorClient)
/// in production and [`MockProcessor`] in tests.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Find an existing customer by billing email.
    async fn find_customer_by_email(&self, email: &str) -> Result<Option<ProcessorCustomer>>;

    /// Create a new customer.
    async fn create_customer(&self, request: &CreateCustomerRequest) -> Result<ProcessorCustomer>;

    /// Attach a payment method to a customer and mark it default.
    async fn attach_payment_method(
        &self,
        customer_id: &str,
        payment_method_ref: &str,
    ) -> Result<()>;

    /// Create a recurring charge. Begins billing immediately.
    async fn create_recurring_charge(
        &self,
        request: &RecurringChargeRequest,
    ) -> Result<ProcessorSubscription>;

    /// Update an existing recurring charge (amount, description, metadata).
    async fn update_recurring_charge(
        &self,
        request: &UpdateChargeRequest,
    ) -> Result<ProcessorSubscription>;

    /// Cancel a subscription, immediately or at period end.
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> Result<ProcessorSubscription>;
}

/// Configurable failure for [`MockProcessor`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MockFailure {
    #[default]
    None,
    /// Decline every charge with the given reason.
    DeclineCharge(String),
    /// Reject payment method attachment.
    RejectPaymentMethod,
    /// Fail customer creation.
    FailCustomerCreation,
    /// Simulate a processor outage or timeout.
    Unavailable,
}

#[derive(Default)]
struct MockState {
    customers: Vec<ProcessorCustomer>,
    subscriptions: Vec<ProcessorSubscription>,
    attached_methods: Vec<(String, String)>,
    failure: MockFailure,
    next_id: u64,
    charge_attempts: u64,
}

/// In-memory processor for tests.
#[derive(Default, Clone)]
pub struct MockProcessor {
    state: std::sync::Arc<std::sync::Mutex<MockState>>,
}

impl MockProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure mode for subsequent calls.
    pub fn set_failure(&self, failure: MockFailure) {
        if let Ok(mut state) = self.state.lock() {
            state.failure = failure;
        }
    }

    /// Number of charge create/update attempts seen.
    #[must_use]
    pub fn charge_attempts(&self) -> u64 {
        self.state.lock().map(|s| s.charge_attempts).unwrap_or(0)
    }

    /// Number of customers created.
    #[must_use]
    pub fn customer_count(&self) -> usize {
        self.state.lock().map(|s| s.customers.len()).unwrap_or(0)
    }

    /// Current processor-side subscription state (test helper).
    #[must_use]
    pub fn subscription(&self, subscription_id: &str) -> Option<ProcessorSubscription> {
        self.state.lock().ok().and_then(|s| {
            s.subscriptions
                .iter()
                .find(|sub| sub.subscription_id == subscription_id)
                .cloned()
        })
    }

    fn fail_if_configured(state: &MockState) -> Result<()> {
        match &state.failure {
            MockFailure::Unavailable => Err(CommerceError::ProcessorUnavailable {
                reason: "simulated outage".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl PaymentProcessor for MockProcessor {
    async fn find_customer_by_email(&self, email: &str) -> Result<Option<ProcessorCustomer>> {
        let state = self.state.lock().map_err(|_| CommerceError::Internal {
            message: "mock processor lock poisoned".to_string(),
        })?;
        Self::fail_if_configured(&state)?;
        Ok(state.customers.iter().find(|c| c.email == email).cloned())
    }

    async fn create_customer(&self, request: &CreateCustomerRequest) -> Result<ProcessorCustomer> {
        request.validate()?;
        let mut state = self.state.lock().map_err(|_| CommerceError::Internal {
            message: "mock processor lock poisoned".to_string(),
        })?;
        Self::fail_if_configured(&state)?;
        if state.failure == MockFailure::FailCustomerCreation {
            return Err(CommerceError::CustomerCreationFailed {
                reason: "simulated customer creation failure".to_string(),
            });
        }

        state.next_id += 1;
        let customer = ProcessorCustomer {
            customer_id: format!("cus_mock_{}", state.next_id),
            email: request.email.clone(),
            name: request.name.clone(),
        };
        state.customers.push(customer.clone());
        Ok(customer)
    }

    async fn attach_payment_method(
        &self,
        customer_id: &str,
        payment_method_ref: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| CommerceError::Internal {
            message: "mock processor lock poisoned".to_string(),
        })?;
        Self::fail_if_configured(&state)?;
        if state.failure == MockFailure::RejectPaymentMethod {
            return Err(CommerceError::PaymentMethodInvalid {
                reason: "simulated payment method rejection".to_string(),
            });
        }
        state
            .attached_methods
            .push((customer_id.to_string(), payment_method_ref.to_string()));
        Ok(())
    }

    async fn create_recurring_charge(
        &self,
        request: &RecurringChargeRequest,
    ) -> Result<ProcessorSubscription> {
        request.validate()?;
        let mut state = self.state.lock().map_err(|_| CommerceError::Internal {
            message: "mock processor lock poisoned".to_string(),
        })?;
        state.charge_attempts += 1;
        Self::fail_if_configured(&state)?;
        if let MockFailure::DeclineCharge(reason) = &state.failure {
            return Err(CommerceError::PaymentDeclined {
                reason: reason.clone(),
            });
        }

        state.next_id += 1;
        let now = Utc::now();
        let period = match request.interval {
            BillingCycle::Monthly => Duration::days(30),
            BillingCycle::Yearly => Duration::days(365),
        };
        let subscription = ProcessorSubscription {
            subscription_id: format!("sub_mock_{}", state.next_id),
            customer_id: request.customer_id.clone(),
            status: "active".to_string(),
            current_period_start: now,
            current_period_end: now + period,
            amount_cents: request.amount_cents,
        };
        state.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    async fn update_recurring_charge(
        &self,
        request: &UpdateChargeRequest,
    ) -> Result<ProcessorSubscription> {
        request.validate()?;
        let mut state = self.state.lock().map_err(|_| CommerceError::Internal {
            message: "mock processor lock poisoned".to_string(),
        })?;
        state.charge_attempts += 1;
        Self::fail_if_configured(&state)?;
        if let MockFailure::DeclineCharge(reason) = &state.failure {
            return Err(CommerceError::PaymentDeclined {
                reason: reason.clone(),
            });
        }

        let subscription = state
            .subscriptions
            .iter_mut()
            .find(|s| s.subscription_id == request.subscription_id)
            .ok_or_else(|| CommerceError::Internal {
                message: format!("unknown subscription {}", request.subscription_id),
            })?;
        subscription.amount_cents = request.amount_cents;
        Ok(subscription.clone())
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> Result<ProcessorSubscription> {
        let mut state = self.state.lock().map_err(|_| CommerceError::Internal {
            message: "mock processor lock poisoned".to_string(),
        })?;
        Self::fail_if_configured(&state)?;

        let subscription = state
            .subscriptions
            .iter_mut()
            .find(|s| s.subscription_id == subscription_id)
            .ok_or_else(|| CommerceError::Internal {
                message: format!("unknown subscription {subscription_id}"),
            })?;
        if !at_period_end {
            subscription.status = "canceled".to_string();
        }
        Ok(subscription.clone())
    }
}

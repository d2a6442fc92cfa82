//! Live payment processor client.
//!
//! Speaks the processor's documented REST API over `reqwest` with secure API
//! key handling, bounded timeouts, and exponential backoff for transient
//! failures. A timed-out call maps to `ProcessorUnavailable` (retryable); a
//! decline maps to `PaymentDeclined` (terminal) and is never retried.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::client::{
    CreateCustomerRequest, PaymentProcessor, ProcessorCustomer, ProcessorSubscription,
    RecurringChargeRequest, UpdateChargeRequest,
};
use crate::config::ProcessorConfig;
use crate::error::{CommerceError, Result};

/// Error returned when API key validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidApiKeyError {
    /// Description of why the key is invalid.
    pub reason: String,
}

impl std::fmt::Display for InvalidApiKeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid processor API key: {}", self.reason)
    }
}

impl std::error::Error for InvalidApiKeyError {}

/// Validate a processor API key format.
///
/// Valid formats:
/// - `sk_test_*` - Test mode secret key
/// - `sk_live_*` - Live mode secret key
fn validate_api_key(key: &str) -> std::result::Result<(), InvalidApiKeyError> {
    const MIN_KEY_LENGTH: usize = 20;

    if key.is_empty() {
        return Err(InvalidApiKeyError {
            reason: "API key cannot be empty".to_string(),
        });
    }

    if key.len() < MIN_KEY_LENGTH {
        return Err(InvalidApiKeyError {
            reason: format!("API key too short (minimum {} characters)", MIN_KEY_LENGTH),
        });
    }

    let valid_prefixes = ["sk_test_", "sk_live_"];
    if !valid_prefixes.iter().any(|prefix| key.starts_with(prefix)) {
        return Err(InvalidApiKeyError {
            reason: "API key must start with sk_test_ or sk_live_".to_string(),
        });
    }

    Ok(())
}

/// Live processor client for production use.
///
/// The API key is validated up front and held in a `SecretString`, so it is
/// never exposed in debug output or logs.
#[derive(Clone)]
pub struct LiveProcessorClient {
    http: reqwest::Client,
    config: ProcessorConfig,
    api_key: SecretString,
}

impl LiveProcessorClient {
    /// Create a new live client.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key format is invalid.
    pub fn new(
        api_key: impl Into<SecretString>,
        config: ProcessorConfig,
    ) -> std::result::Result<Self, InvalidApiKeyError> {
        let api_key: SecretString = api_key.into();
        validate_api_key(api_key.expose_secret())?;

        Ok(Self {
            http: reqwest::Client::new(),
            config,
            api_key,
        })
    }

    /// Create a client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key format is invalid.
    pub fn with_default_config(
        api_key: impl Into<SecretString>,
    ) -> std::result::Result<Self, InvalidApiKeyError> {
        Self::new(api_key, ProcessorConfig::default())
    }

    /// Check if the client is using a test mode API key.
    #[must_use]
    pub fn is_test_mode(&self) -> bool {
        self.api_key.expose_secret().starts_with("sk_test_")
    }

    /// Check if the client is using a live mode API key.
    #[must_use]
    pub fn is_live_mode(&self) -> bool {
        self.api_key.expose_secret().starts_with("sk_live_")
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// Execute a request with timeout and retry on transient failures only
    /// (timeouts, connection failures, HTTP 429, HTTP 5xx).
    async fn request_with_retry<F>(
        &self,
        operation: &str,
        build: F,
    ) -> Result<serde_json::Value>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let timeout = Duration::from_secs(self.config.timeout_seconds);
        let mut attempts = 0;

        loop {
            let request = build().bearer_auth(self.api_key.expose_secret());
            let outcome = tokio::time::timeout(timeout, request.send()).await;

            let retryable_reason = match outcome {
                Ok(Ok(response)) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json().await.map_err(|e| CommerceError::Internal {
                            message: format!("{operation}: malformed processor response: {e}"),
                        });
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        format!("HTTP {status}")
                    } else {
                        let body: serde_json::Value = response.json().await.unwrap_or_default();
                        return Err(map_api_error(operation, status.as_u16(), &body));
                    }
                }
                Ok(Err(e)) if e.is_timeout() || e.is_connect() => e.to_string(),
                Ok(Err(e)) => {
                    return Err(CommerceError::Internal {
                        message: format!("{operation}: request failed: {e}"),
                    });
                }
                Err(_elapsed) => {
                    format!("request timed out after {}s", self.config.timeout_seconds)
                }
            };

            if attempts >= self.config.max_retries {
                return Err(CommerceError::ProcessorUnavailable {
                    reason: format!("{operation}: {retryable_reason}"),
                });
            }

            let delay = backoff_delay(attempts, self.config.base_delay_ms, self.config.max_delay_ms);
            tracing::warn!(
                target: "bundleway::processor",
                operation = operation,
                attempt = attempts + 1,
                delay_ms = delay.as_millis() as u64,
                reason = %retryable_reason,
                "Retrying processor API call after transient error"
            );
            tokio::time::sleep(delay).await;
            attempts += 1;
        }
    }
}

// Debug implementation that doesn't expose the API key
impl std::fmt::Debug for LiveProcessorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveProcessorClient")
            .field("config", &self.config)
            .field("is_test_mode", &self.is_test_mode())
            .finish_non_exhaustive()
    }
}

/// Exponential backoff with jitter (0-25% of the delay).
fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let delay_ms = base_ms.saturating_mul(2_u64.saturating_pow(attempt));
    let delay_ms = delay_ms.min(max_ms);
    let jitter = if delay_ms > 0 {
        fastrand::u64(0..=delay_ms / 4)
    } else {
        0
    };
    Duration::from_millis(delay_ms.saturating_add(jitter))
}

/// Map a non-transient processor API error to the commerce taxonomy.
///
/// The processor reports failures as `{"error": {"type", "code", "message"}}`.
/// Card failures are terminal declines; payment-method attachment failures and
/// customer failures get their own kinds so callers can branch.
fn map_api_error(operation: &str, http_status: u16, body: &serde_json::Value) -> CommerceError {
    let error = &body["error"];
    let error_type = error["type"].as_str().unwrap_or("");
    let code = error["code"].as_str().unwrap_or("");
    let message = error["message"]
        .as_str()
        .unwrap_or("no detail provided")
        .to_string();

    if error_type == "card_error" || code.starts_with("card_") || http_status == 402 {
        return CommerceError::PaymentDeclined { reason: message };
    }

    if code.starts_with("payment_method") || operation == "attach_payment_method" {
        return CommerceError::PaymentMethodInvalid { reason: message };
    }

    if operation == "create_customer" {
        return CommerceError::CustomerCreationFailed { reason: message };
    }

    CommerceError::Internal {
        message: format!("{operation}: processor returned HTTP {http_status}: {message}"),
    }
}

fn parse_timestamp(value: &serde_json::Value, field: &str) -> Result<DateTime<Utc>> {
    let seconds = value[field].as_i64().ok_or_else(|| CommerceError::Internal {
        message: format!("processor response missing '{field}'"),
    })?;
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| CommerceError::Internal {
        message: format!("processor returned out-of-range '{field}': {seconds}"),
    })
}

fn parse_subscription(value: &serde_json::Value) -> Result<ProcessorSubscription> {
    let string_field = |field: &str| -> Result<String> {
        value[field]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CommerceError::Internal {
                message: format!("processor response missing '{field}'"),
            })
    };

    Ok(ProcessorSubscription {
        subscription_id: string_field("id")?,
        customer_id: string_field("customer")?,
        status: string_field("status")?,
        current_period_start: parse_timestamp(value, "current_period_start")?,
        current_period_end: parse_timestamp(value, "current_period_end")?,
        amount_cents: value["amount"].as_i64().unwrap_or(0),
    })
}

fn parse_customer(value: &serde_json::Value) -> Result<ProcessorCustomer> {
    Ok(ProcessorCustomer {
        customer_id: value["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CommerceError::Internal {
                message: "processor customer response missing 'id'".to_string(),
            })?,
        email: value["email"].as_str().unwrap_or_default().to_string(),
        name: value["name"].as_str().map(str::to_string),
    })
}

#[async_trait]
impl PaymentProcessor for LiveProcessorClient {
    async fn find_customer_by_email(&self, email: &str) -> Result<Option<ProcessorCustomer>> {
        let url = self.url("customers");
        let email = email.to_string();
        let body = self
            .request_with_retry("find_customer", || {
                self.http.get(&url).query(&[("email", email.as_str()), ("limit", "1")])
            })
            .await?;

        match body["data"].as_array().and_then(|list| list.first()) {
            Some(customer) => Ok(Some(parse_customer(customer)?)),
            None => Ok(None),
        }
    }

    async fn create_customer(&self, request: &CreateCustomerRequest) -> Result<ProcessorCustomer> {
        request.validate()?;
        let url = self.url("customers");

        let mut form: Vec<(String, String)> = vec![
            ("email".to_string(), request.email.clone()),
            ("metadata[account_id]".to_string(), request.account_id.clone()),
        ];
        if let Some(name) = &request.name {
            form.push(("name".to_string(), name.clone()));
        }

        let body = self
            .request_with_retry("create_customer", || self.http.post(&url).form(&form))
            .await?;
        parse_customer(&body)
    }

    async fn attach_payment_method(
        &self,
        customer_id: &str,
        payment_method_ref: &str,
    ) -> Result<()> {
        let attach_url = self.url(&format!("payment_methods/{payment_method_ref}/attach"));
        let attach_form = [("customer", customer_id)];
        self.request_with_retry("attach_payment_method", || {
            self.http.post(&attach_url).form(&attach_form)
        })
        .await?;

        // Mark it the default for recurring charges.
        let default_url = self.url(&format!("customers/{customer_id}"));
        let default_form = [(
            "invoice_settings[default_payment_method]",
            payment_method_ref,
        )];
        self.request_with_retry("attach_payment_method", || {
            self.http.post(&default_url).form(&default_form)
        })
        .await?;
        Ok(())
    }

    async fn create_recurring_charge(
        &self,
        request: &RecurringChargeRequest,
    ) -> Result<ProcessorSubscription> {
        request.validate()?;
        let url = self.url("subscriptions");

        let mut form: Vec<(String, String)> = vec![
            ("customer".to_string(), request.customer_id.clone()),
            ("amount".to_string(), request.amount_cents.to_string()),
            ("currency".to_string(), request.currency.clone()),
            ("interval".to_string(), request.interval.as_str().to_string()),
            ("description".to_string(), request.description.clone()),
        ];
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{key}]"), value.clone()));
        }

        let body = self
            .request_with_retry("create_recurring_charge", || {
                self.http.post(&url).form(&form)
            })
            .await?;
        parse_subscription(&body)
    }

    async fn update_recurring_charge(
        &self,
        request: &UpdateChargeRequest,
    ) -> Result<ProcessorSubscription> {
        request.validate()?;
        let url = self.url(&format!("subscriptions/{}", request.subscription_id));

        let mut form: Vec<(String, String)> = vec![
            ("amount".to_string(), request.amount_cents.to_string()),
            ("description".to_string(), request.description.clone()),
        ];
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{key}]"), value.clone()));
        }

        let body = self
            .request_with_retry("update_recurring_charge", || {
                self.http.post(&url).form(&form)
            })
            .await?;
        parse_subscription(&body)
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> Result<ProcessorSubscription> {
        let body = if at_period_end {
            let url = self.url(&format!("subscriptions/{subscription_id}"));
            let form = [("cancel_at_period_end", "true")];
            self.request_with_retry("cancel_subscription", || self.http.post(&url).form(&form))
                .await?
        } else {
            let url = self.url(&format!("subscriptions/{subscription_id}"));
            self.request_with_retry("cancel_subscription", || self.http.delete(&url))
                .await?
        };
        parse_subscription(&body)
    }
}

//! Error taxonomy for commerce operations.
//!
//! Every failure the core can produce is a typed variant, so callers branch on
//! kind rather than parsing messages. Variants carry enough state for the
//! caller to decide the next action (e.g. conflict errors include the current
//! status). The `IntoResponse` impl maps kinds to HTTP statuses and hides
//! server-error details from clients in production.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// The main error type for commerce operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommerceError {
    // Caller errors
    /// A pricing request was made with no bundles selected.
    #[error("No bundles selected")]
    EmptySelection,

    /// A bundle referenced by a request is unknown or malformed.
    #[error("Invalid bundle '{bundle_id}': {reason}")]
    InvalidBundle { bundle_id: String, reason: String },

    /// A bundle id referenced by a ledger operation does not exist.
    #[error("Unknown bundle: {bundle_id}")]
    UnknownBundle { bundle_id: String },

    /// The account id is malformed.
    #[error("Invalid account id '{id}': {reason}")]
    InvalidAccountId { id: String, reason: String },

    /// The bundle id is malformed.
    #[error("Invalid bundle id '{id}': {reason}")]
    InvalidBundleId { id: String, reason: String },

    /// An admin discount request was out of range or malformed.
    #[error("Invalid discount: {reason}")]
    InvalidDiscount { reason: String },

    // State-conflict errors
    /// The bundle is not purchasable through the normal flow.
    #[error("Bundle '{bundle_id}' is disabled for new purchases")]
    BundleDisabled { bundle_id: String },

    /// An entitlement for this (account, bundle) pair is already engaged.
    #[error("Bundle '{bundle_id}' is already {current_status} for account '{account_id}'")]
    AlreadyActive {
        account_id: String,
        bundle_id: String,
        current_status: String,
    },

    /// There is no entitlement to deactivate for this pair.
    #[error("Bundle '{bundle_id}' is not active for account '{account_id}'")]
    NotActive {
        account_id: String,
        bundle_id: String,
    },

    /// The account already has a subscription; use modify instead.
    #[error("Account '{account_id}' already has a subscription")]
    AlreadySubscribed { account_id: String },

    /// No subscription exists for the account.
    #[error("No subscription found for account '{account_id}'")]
    NoSubscription { account_id: String },

    /// The subscription is already paused.
    #[error("Subscription for account '{account_id}' is already paused")]
    AlreadyPaused { account_id: String },

    /// The subscription is not paused.
    #[error("Subscription for account '{account_id}' is not paused")]
    NotPaused { account_id: String },

    // Terminal payment errors (never retried)
    /// The processor declined the charge.
    #[error("Payment declined: {reason}")]
    PaymentDeclined { reason: String },

    /// The payment method could not be attached or used.
    #[error("Payment method invalid: {reason}")]
    PaymentMethodInvalid { reason: String },

    /// The processor could not create the customer record.
    #[error("Customer creation failed: {reason}")]
    CustomerCreationFailed { reason: String },

    // Transient errors (retryable)
    /// The processor timed out or returned a transient failure.
    #[error("Payment processor unavailable: {reason}")]
    ProcessorUnavailable { reason: String },

    /// Optimistic version check failed after retries; the caller should retry.
    #[error("Concurrent modification detected for account '{account_id}', please retry")]
    ConcurrentModification { account_id: String },

    // Server errors
    /// An outbound processor payload contained a parameter the processor's
    /// documented schema does not recognize. One undocumented parameter once
    /// failed every purchase, so this is checked before anything is sent.
    #[error("Outbound payload contains unsupported processor parameter '{parameter}'")]
    UnsupportedProcessorParameter { parameter: String },

    /// The request lacked a resolvable account credential.
    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// A storage operation failed.
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CommerceError {
    /// Stable machine-readable kind, suitable for caller branching.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptySelection => "empty_selection",
            Self::InvalidBundle { .. } => "invalid_bundle",
            Self::UnknownBundle { .. } => "unknown_bundle",
            Self::InvalidAccountId { .. } => "invalid_account_id",
            Self::InvalidBundleId { .. } => "invalid_bundle_id",
            Self::InvalidDiscount { .. } => "invalid_discount",
            Self::BundleDisabled { .. } => "bundle_disabled",
            Self::AlreadyActive { .. } => "already_active",
            Self::NotActive { .. } => "not_active",
            Self::AlreadySubscribed { .. } => "already_subscribed",
            Self::NoSubscription { .. } => "no_subscription",
            Self::AlreadyPaused { .. } => "already_paused",
            Self::NotPaused { .. } => "not_paused",
            Self::PaymentDeclined { .. } => "payment_declined",
            Self::PaymentMethodInvalid { .. } => "payment_method_invalid",
            Self::CustomerCreationFailed { .. } => "customer_creation_failed",
            Self::ProcessorUnavailable { .. } => "processor_unavailable",
            Self::ConcurrentModification { .. } => "concurrent_modification",
            Self::UnsupportedProcessorParameter { .. } => "unsupported_processor_parameter",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Storage { .. } => "storage_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Check if this is a client error (4xx).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is transient and safe to retry.
    ///
    /// `PaymentDeclined` is terminal and must never be retried; a timed-out
    /// processor call is `ProcessorUnavailable` and is expected to be retried.
    /// The two are never conflated.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProcessorUnavailable { .. } | Self::ConcurrentModification { .. }
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptySelection
            | Self::InvalidBundle { .. }
            | Self::InvalidAccountId { .. }
            | Self::InvalidBundleId { .. }
            | Self::InvalidDiscount { .. } => StatusCode::BAD_REQUEST,

            Self::UnknownBundle { .. } | Self::NoSubscription { .. } => StatusCode::NOT_FOUND,

            Self::BundleDisabled { .. }
            | Self::AlreadyActive { .. }
            | Self::NotActive { .. }
            | Self::AlreadySubscribed { .. }
            | Self::AlreadyPaused { .. }
            | Self::NotPaused { .. }
            | Self::ConcurrentModification { .. } => StatusCode::CONFLICT,

            Self::PaymentDeclined { .. }
            | Self::PaymentMethodInvalid { .. }
            | Self::CustomerCreationFailed { .. } => StatusCode::PAYMENT_REQUIRED,

            Self::ProcessorUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,

            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,

            Self::UnsupportedProcessorParameter { .. }
            | Self::Storage { .. }
            | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message suitable for client responses in production.
    ///
    /// Client errors expose their message; server errors return a generic
    /// message to avoid information disclosure. Full details are always
    /// logged server-side.
    fn safe_message(&self) -> String {
        if self.is_server_error() {
            match self {
                Self::ProcessorUnavailable { .. } => {
                    "Payment processor temporarily unavailable".to_string()
                }
                _ => "Internal server error".to_string(),
            }
        } else {
            self.to_string()
        }
    }
}

/// Standard error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
    error_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retryable: Option<bool>,
}

impl IntoResponse for CommerceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_id = uuid::Uuid::new_v4().to_string();

        tracing::error!(
            status = status.as_u16(),
            error_id = %error_id,
            kind = self.kind(),
            error = %self,
            "Commerce operation failed"
        );

        let body = ErrorBody {
            error: self.safe_message(),
            kind: self.kind(),
            error_id,
            retryable: self.is_retryable().then_some(true),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for commerce operations.
pub type Result<T> = std::result::Result<T, CommerceError>;

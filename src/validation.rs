//! Input validation for account and bundle identifiers.
//!
//! Identifiers flow into processor metadata and storage keys, so they are
//! validated up front to prevent injection and keep error messages safe to
//! echo back.

use crate::error::{CommerceError, Result};

/// Maximum length for account ids.
const MAX_ACCOUNT_ID_LENGTH: usize = 256;

/// Maximum length for bundle ids.
const MAX_BUNDLE_ID_LENGTH: usize = 64;

/// Validate an account id.
///
/// Account ids must be non-empty, at most 256 characters, and contain only
/// alphanumeric characters, underscores, and hyphens.
pub fn validate_account_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(CommerceError::InvalidAccountId {
            id: id.to_string(),
            reason: "account_id cannot be empty".to_string(),
        });
    }

    if id.len() > MAX_ACCOUNT_ID_LENGTH {
        return Err(CommerceError::InvalidAccountId {
            id: truncate_for_error(id),
            reason: format!(
                "account_id exceeds maximum length of {}",
                MAX_ACCOUNT_ID_LENGTH
            ),
        });
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(CommerceError::InvalidAccountId {
            id: sanitize_for_error(id),
            reason: "account_id contains invalid characters (only alphanumeric, underscore, and hyphen allowed)".to_string(),
        });
    }

    Ok(())
}

/// Validate a bundle id.
///
/// Same charset rules as account ids, with a 64 character cap.
pub fn validate_bundle_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(CommerceError::InvalidBundleId {
            id: id.to_string(),
            reason: "bundle_id cannot be empty".to_string(),
        });
    }

    if id.len() > MAX_BUNDLE_ID_LENGTH {
        return Err(CommerceError::InvalidBundleId {
            id: truncate_for_error(id),
            reason: format!(
                "bundle_id exceeds maximum length of {}",
                MAX_BUNDLE_ID_LENGTH
            ),
        });
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(CommerceError::InvalidBundleId {
            id: sanitize_for_error(id),
            reason: "bundle_id contains invalid characters".to_string(),
        });
    }

    Ok(())
}

/// Truncate an over-long id for inclusion in an error message.
fn truncate_for_error(id: &str) -> String {
    let truncated: String = id.chars().take(32).collect();
    format!("{}...", truncated)
}

/// Replace non-identifier characters so an invalid id is safe to echo back.
fn sanitize_for_error(id: &str) -> String {
    id.chars()
        .take(64)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '?'
            }
        })
        .collect()
}

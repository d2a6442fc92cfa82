//! Pricing engine: tiered multi-bundle discounts over integer cents.
//!
//! Discounts depend only on the number of distinct bundles selected. All
//! arithmetic is in minor currency units with the discount held in basis
//! points; the single rounding step is round-half-even at the cent.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::catalog::BillingCycle;
use crate::error::{CommerceError, Result};
use crate::storage::CatalogStore;
use crate::validation::validate_bundle_id;

/// Basis points in 100%.
const BP_SCALE: i128 = 10_000;

/// Discount in basis points for a count of distinct bundles.
///
/// 1 bundle: no discount; 2: 20%; 3: 30%; 4 or more: 40%.
#[must_use]
pub fn discount_basis_points(distinct_bundles: usize) -> u32 {
    match distinct_bundles {
        0 | 1 => 0,
        2 => 2_000,
        3 => 3_000,
        _ => 4_000,
    }
}

/// Apply a basis-point discount to a cent amount, rounding half to even.
#[must_use]
pub fn apply_discount_cents(base_cents: i64, discount_bp: u32) -> i64 {
    let numerator = i128::from(base_cents) * (BP_SCALE - i128::from(discount_bp));
    round_half_even_div(numerator, BP_SCALE)
}

/// Integer division rounding half to even. `numerator >= 0`, `denominator > 0`.
fn round_half_even_div(numerator: i128, denominator: i128) -> i64 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    let doubled = remainder * 2;

    let rounded = if doubled > denominator || (doubled == denominator && quotient % 2 != 0) {
        quotient + 1
    } else {
        quotient
    };
    rounded as i64
}

/// A priced bundle selection.
///
/// Deterministic for a given catalog state: ids are deduplicated and sorted,
/// so the quote is independent of selection order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingQuote {
    /// Distinct bundle ids, sorted.
    pub bundle_ids: Vec<String>,
    pub billing_cycle: BillingCycle,
    /// Sum of the selected bundles' undiscounted prices, in cents.
    pub base_cost_cents: i64,
    /// Discount applied, in basis points.
    pub discount_bp: u32,
    /// Amount to charge, in cents.
    pub final_cost_cents: i64,
    /// ISO 4217 currency code.
    pub currency: String,
}

impl PricingQuote {
    /// Discount as a whole-percent value for display.
    #[must_use]
    pub fn discount_percent(&self) -> u32 {
        self.discount_bp / 100
    }
}

/// Prices bundle selections against the catalog.
pub struct PricingEngine<C> {
    catalog: C,
    currency: String,
}

impl<C> PricingEngine<C>
where
    C: CatalogStore,
{
    pub fn new(catalog: C, currency: impl Into<String>) -> Self {
        Self {
            catalog,
            currency: currency.into(),
        }
    }

    /// Price a selection of bundles.
    ///
    /// Duplicates collapse before the discount tier is chosen. Disabled
    /// bundles are priced here (display and historical flows need their
    /// prices); purchase enforces enablement separately.
    pub async fn quote(
        &self,
        bundle_ids: &[String],
        billing_cycle: BillingCycle,
    ) -> Result<PricingQuote> {
        if bundle_ids.is_empty() {
            return Err(CommerceError::EmptySelection);
        }

        let distinct: BTreeSet<&str> = bundle_ids.iter().map(String::as_str).collect();

        let mut base_cost_cents: i64 = 0;
        for id in &distinct {
            validate_bundle_id(id)?;
            let definition =
                self.catalog
                    .get_bundle(id)
                    .await?
                    .ok_or_else(|| CommerceError::InvalidBundle {
                        bundle_id: (*id).to_string(),
                        reason: "not in catalog".to_string(),
                    })?;
            base_cost_cents += definition.price_for(billing_cycle);
        }

        let discount_bp = discount_basis_points(distinct.len());
        let final_cost_cents = apply_discount_cents(base_cost_cents, discount_bp);

        Ok(PricingQuote {
            bundle_ids: distinct.into_iter().map(str::to_string).collect(),
            billing_cycle,
            base_cost_cents,
            discount_bp,
            final_cost_cents,
            currency: self.currency.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_catalog;
    use crate::storage::memory::InMemoryStore;

    async fn engine() -> PricingEngine<InMemoryStore> {
        let store = InMemoryStore::new();
        for def in default_catalog() {
            store.insert_bundle(&def).await.unwrap();
        }
        PricingEngine::new(store, "usd")
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_discount_table() {
        assert_eq!(discount_basis_points(1), 0);
        assert_eq!(discount_basis_points(2), 2_000);
        assert_eq!(discount_basis_points(3), 3_000);
        assert_eq!(discount_basis_points(4), 4_000);
        assert_eq!(discount_basis_points(7), 4_000);
    }

    #[test]
    fn test_discount_monotone_non_decreasing() {
        let mut previous = 0;
        for count in 1..=10 {
            let bp = discount_basis_points(count);
            assert!(bp >= previous);
            previous = bp;
        }
    }

    #[test]
    fn test_round_half_even() {
        // Exact ties round to the even cent.
        assert_eq!(round_half_even_div(5, 2), 2);
        assert_eq!(round_half_even_div(7, 2), 4);
        assert_eq!(round_half_even_div(3, 2), 2);
        // Non-ties round normally.
        assert_eq!(round_half_even_div(7, 4), 2);
        assert_eq!(round_half_even_div(5, 4), 1);
        assert_eq!(round_half_even_div(8, 4), 2);
    }

    #[tokio::test]
    async fn test_single_bundle_no_discount() {
        let quote = engine()
            .await
            .quote(&ids(&["creator"]), BillingCycle::Monthly)
            .await
            .unwrap();
        assert_eq!(quote.base_cost_cents, 1900);
        assert_eq!(quote.discount_bp, 0);
        assert_eq!(quote.final_cost_cents, 1900);
    }

    #[tokio::test]
    async fn test_two_bundles_twenty_percent() {
        let quote = engine()
            .await
            .quote(&ids(&["creator", "ecommerce"]), BillingCycle::Monthly)
            .await
            .unwrap();
        assert_eq!(quote.base_cost_cents, 4300);
        assert_eq!(quote.discount_bp, 2_000);
        assert_eq!(quote.final_cost_cents, 3440);
    }

    #[tokio::test]
    async fn test_three_bundles_thirty_percent() {
        let quote = engine()
            .await
            .quote(
                &ids(&["creator", "ecommerce", "business"]),
                BillingCycle::Monthly,
            )
            .await
            .unwrap();
        assert_eq!(quote.base_cost_cents, 8200);
        assert_eq!(quote.discount_bp, 3_000);
        assert_eq!(quote.final_cost_cents, 5740);
    }

    #[tokio::test]
    async fn test_four_bundles_forty_percent() {
        let quote = engine()
            .await
            .quote(
                &ids(&["creator", "ecommerce", "social_media", "education"]),
                BillingCycle::Monthly,
            )
            .await
            .unwrap();
        assert_eq!(quote.base_cost_cents, 10_100);
        assert_eq!(quote.discount_bp, 4_000);
        assert_eq!(quote.final_cost_cents, 6060);
    }

    #[tokio::test]
    async fn test_order_independence_and_duplicate_collapse() {
        let engine = engine().await;
        let forward = engine
            .quote(&ids(&["creator", "ecommerce"]), BillingCycle::Monthly)
            .await
            .unwrap();
        let reversed = engine
            .quote(&ids(&["ecommerce", "creator"]), BillingCycle::Monthly)
            .await
            .unwrap();
        let duplicated = engine
            .quote(
                &ids(&["creator", "ecommerce", "creator"]),
                BillingCycle::Monthly,
            )
            .await
            .unwrap();

        assert_eq!(forward, reversed);
        assert_eq!(forward, duplicated);
        assert_eq!(forward.bundle_ids, ids(&["creator", "ecommerce"]));
    }

    #[tokio::test]
    async fn test_yearly_sums_yearly_prices() {
        let quote = engine()
            .await
            .quote(&ids(&["creator", "ecommerce"]), BillingCycle::Yearly)
            .await
            .unwrap();
        assert_eq!(quote.base_cost_cents, 43_000);
        assert_eq!(quote.final_cost_cents, 34_400);
    }

    #[tokio::test]
    async fn test_empty_selection() {
        let err = engine()
            .await
            .quote(&[], BillingCycle::Monthly)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "empty_selection");
    }

    #[tokio::test]
    async fn test_unknown_bundle_in_selection() {
        let err = engine()
            .await
            .quote(
                &ids(&["creator", "nonexistent_bundle"]),
                BillingCycle::Monthly,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_bundle");
    }

    #[tokio::test]
    async fn test_disabled_bundle_still_quotable() {
        let store = InMemoryStore::new();
        for mut def in default_catalog() {
            if def.bundle_id == "creator" {
                def.enabled = false;
            }
            store.insert_bundle(&def).await.unwrap();
        }
        let engine = PricingEngine::new(store, "usd");
        let quote = engine
            .quote(&ids(&["creator"]), BillingCycle::Monthly)
            .await
            .unwrap();
        assert_eq!(quote.final_cost_cents, 1900);
    }
}

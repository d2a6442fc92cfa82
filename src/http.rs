//! HTTP boundary for the commerce core.
//!
//! A self-contained axum router the host application mounts. Authenticated
//! routes take an [`AuthedAccount`] resolved from a request extension placed
//! by the host's auth middleware; the auth layer itself lives outside this
//! crate. Errors render through [`CommerceError`]'s `IntoResponse`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::catalog::{BillingCycle, BundleDefinition};
use crate::error::{CommerceError, Result};
use crate::ledger::{EntitlementLedger, EntitlementRecord};
use crate::pricing::{PricingEngine, PricingQuote};
use crate::storage::{CatalogStore, LedgerStore};

/// The authenticated account on a request.
///
/// The host's auth middleware inserts this as a request extension after
/// validating credentials.
#[derive(Debug, Clone)]
pub struct AuthedAccount(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthedAccount
where
    S: Send + Sync,
{
    type Rejection = CommerceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<AuthedAccount>()
            .cloned()
            .ok_or(CommerceError::Unauthorized {
                reason: "no authenticated account on request".to_string(),
            })
    }
}

/// Shared state for the bundle routes.
pub struct CommerceState<C, L> {
    pub catalog: C,
    pub pricing: Arc<PricingEngine<C>>,
    pub ledger: Arc<EntitlementLedger<L, C>>,
}

impl<C: Clone, L> Clone for CommerceState<C, L> {
    fn clone(&self) -> Self {
        Self {
            catalog: self.catalog.clone(),
            pricing: Arc::clone(&self.pricing),
            ledger: Arc::clone(&self.ledger),
        }
    }
}

impl<C, L> CommerceState<C, L>
where
    C: CatalogStore + Clone,
    L: LedgerStore,
{
    pub fn new(catalog: C, ledger_store: L, currency: impl Into<String>) -> Self {
        let currency = currency.into();
        Self {
            pricing: Arc::new(PricingEngine::new(catalog.clone(), currency)),
            ledger: Arc::new(EntitlementLedger::new(ledger_store, catalog.clone())),
            catalog,
        }
    }
}

/// Build the bundle route module.
pub fn router<C, L>(state: CommerceState<C, L>) -> Router
where
    C: CatalogStore + Clone + Send + Sync + 'static,
    L: LedgerStore + Send + Sync + 'static,
{
    Router::new()
        .route("/bundles", get(list_bundles::<C, L>))
        .route("/bundles/pricing", post(price_bundles::<C, L>))
        .route("/bundles/activate", post(activate_bundle::<C, L>))
        .route("/bundles/user/active", get(list_active::<C, L>))
        .route(
            "/bundles/user/access/feature/:id",
            get(check_feature::<C, L>),
        )
        .route(
            "/bundles/user/access/service/:id",
            get(check_service::<C, L>),
        )
        .route("/bundles/:id", get(get_bundle::<C, L>))
        .with_state(state)
}

#[derive(Deserialize)]
struct PricingRequest {
    bundle_ids: Vec<String>,
    #[serde(default = "default_cycle")]
    billing_cycle: BillingCycle,
}

fn default_cycle() -> BillingCycle {
    BillingCycle::Monthly
}

#[derive(Deserialize)]
struct ActivateRequest {
    bundle_id: String,
}

#[derive(Serialize)]
struct AccessResponse {
    has_access: bool,
}

/// `GET /bundles` - bundles currently open for purchase.
async fn list_bundles<C, L>(
    State(state): State<CommerceState<C, L>>,
) -> Result<Json<Vec<BundleDefinition>>>
where
    C: CatalogStore + Clone,
    L: LedgerStore,
{
    let bundles = state
        .catalog
        .list_bundles()
        .await?
        .into_iter()
        .filter(|b| b.enabled)
        .collect();
    Ok(Json(bundles))
}

/// `GET /bundles/{id}` - a single definition, disabled ones included.
async fn get_bundle<C, L>(
    State(state): State<CommerceState<C, L>>,
    Path(bundle_id): Path<String>,
) -> Result<Json<BundleDefinition>>
where
    C: CatalogStore + Clone,
    L: LedgerStore,
{
    let definition = state
        .catalog
        .get_bundle(&bundle_id)
        .await?
        .ok_or(CommerceError::UnknownBundle { bundle_id })?;
    Ok(Json(definition))
}

/// `POST /bundles/pricing` - quote a selection.
async fn price_bundles<C, L>(
    State(state): State<CommerceState<C, L>>,
    Json(request): Json<PricingRequest>,
) -> Result<Json<PricingQuote>>
where
    C: CatalogStore + Clone,
    L: LedgerStore,
{
    let quote = state
        .pricing
        .quote(&request.bundle_ids, request.billing_cycle)
        .await?;
    Ok(Json(quote))
}

/// `POST /bundles/activate` - activate a bundle for the authed account.
async fn activate_bundle<C, L>(
    State(state): State<CommerceState<C, L>>,
    AuthedAccount(account_id): AuthedAccount,
    Json(request): Json<ActivateRequest>,
) -> Result<(StatusCode, Json<EntitlementRecord>)>
where
    C: CatalogStore + Clone,
    L: LedgerStore,
{
    let record = state.ledger.activate(&account_id, &request.bundle_id).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `GET /bundles/user/active` - the authed account's current entitlements.
async fn list_active<C, L>(
    State(state): State<CommerceState<C, L>>,
    AuthedAccount(account_id): AuthedAccount,
) -> Result<Json<Vec<EntitlementRecord>>>
where
    C: CatalogStore + Clone,
    L: LedgerStore,
{
    Ok(Json(state.ledger.list_active(&account_id).await?))
}

/// `GET /bundles/user/access/feature/{id}`
async fn check_feature<C, L>(
    State(state): State<CommerceState<C, L>>,
    AuthedAccount(account_id): AuthedAccount,
    Path(feature_id): Path<String>,
) -> Result<Json<AccessResponse>>
where
    C: CatalogStore + Clone,
    L: LedgerStore,
{
    let has_access = state.ledger.has_feature(&account_id, &feature_id).await?;
    Ok(Json(AccessResponse { has_access }))
}

/// `GET /bundles/user/access/service/{id}`
async fn check_service<C, L>(
    State(state): State<CommerceState<C, L>>,
    AuthedAccount(account_id): AuthedAccount,
    Path(service_id): Path<String>,
) -> Result<Json<AccessResponse>>
where
    C: CatalogStore + Clone,
    L: LedgerStore,
{
    let has_access = state.ledger.has_service(&account_id, &service_id).await?;
    Ok(Json(AccessResponse { has_access }))
}

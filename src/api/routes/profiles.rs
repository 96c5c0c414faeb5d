//! Profile Routes
//!
//! - GET /api/v1/schools/:id/profiles - Profiles of a school, optional `?role=`
//! - POST /api/v1/profiles - Create a profile (admin)
//! - GET /api/v1/profiles/:id - Get a profile
//! - PUT /api/v1/profiles/:id - Update name or role (admin)
//! - DELETE /api/v1/profiles/:id - Delete a profile without history (admin)
//! - GET /api/v1/profiles/:id/balance - Coin balance
//! - GET /api/v1/profiles/:id/transactions - Ledger entries touching the profile
//! - GET /api/v1/profiles/:id/achievements - Achievements earned
//! - GET /api/v1/profiles/:id/purchases - Marketplace purchases
//! - GET /api/v1/profiles/:id/offers - Exchange offers made

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::auth::CurrentUser;
use crate::api::dto::{
    BalanceResponse, CreateProfileRequest, ListResponse, ProfileListParams, TransactionListParams,
};
use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::transactions::build_filter;
use crate::api::state::AppState;
use crate::store::{
    Achievement, ExchangeOffer, MarketplacePurchase, NewProfile, Profile, ProfileUpdate, Role,
    Transaction,
};

/// Load a profile the caller may see
pub(crate) async fn visible_profile(state: &AppState, user: &CurrentUser, id: i64) -> ApiResult<Profile> {
    let profile = state.run(move |store| store.get_profile(id)).await?;
    match profile.school_id {
        _ if profile.id == user.id() => {}
        Some(school_id) => user.require_member(school_id)?,
        None => user.require_super_admin()?,
    }
    Ok(profile)
}

/// Load a profile the caller may manage as admin
async fn managed_profile(state: &AppState, user: &CurrentUser, id: i64) -> ApiResult<Profile> {
    let profile = state.run(move |store| store.get_profile(id)).await?;
    match profile.school_id {
        Some(school_id) => user.require_admin(school_id)?,
        None => user.require_super_admin()?,
    }
    Ok(profile)
}

/// GET /api/v1/schools/:id/profiles
pub async fn list_profiles(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(school_id): Path<i64>,
    Query(params): Query<ProfileListParams>,
) -> ApiResult<Json<ListResponse<Profile>>> {
    user.require_member(school_id)?;
    let profiles = state
        .run(move |store| store.list_profiles(school_id, params.role))
        .await?;
    Ok(Json(profiles.into()))
}

/// POST /api/v1/profiles
///
/// Admins create profiles in their own school; only super admins create
/// other super admins or profiles in another school.
pub async fn create_profile(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<CreateProfileRequest>,
) -> ApiResult<(StatusCode, Json<Profile>)> {
    let school_id = match req.role {
        Role::SuperAdmin => {
            user.require_super_admin()?;
            None
        }
        _ => {
            let school_id = match req.school_id {
                Some(id) => id,
                None => user.school_id()?,
            };
            user.require_admin(school_id)?;
            Some(school_id)
        }
    };

    let new = NewProfile {
        school_id,
        name: req.name,
        email: req.email,
        role: req.role,
        password: req.password,
    };
    let profile = state.run(move |store| store.create_profile(new)).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// GET /api/v1/profiles/:id
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Profile>> {
    Ok(Json(visible_profile(&state, &user, id).await?))
}

/// PUT /api/v1/profiles/:id
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<ProfileUpdate>,
) -> ApiResult<Json<Profile>> {
    managed_profile(&state, &user, id).await?;
    if id == user.id() && req.role.is_some_and(|r| r != user.role()) {
        return Err(ApiError::Validation("Cannot change your own role".to_string()));
    }
    let profile = state.run(move |store| store.update_profile(id, req)).await?;
    Ok(Json(profile))
}

/// DELETE /api/v1/profiles/:id
pub async fn delete_profile(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if id == user.id() {
        return Err(ApiError::Validation("Cannot delete yourself".to_string()));
    }
    managed_profile(&state, &user, id).await?;
    state.run(move |store| store.delete_profile(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/profiles/:id/balance
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<BalanceResponse>> {
    let profile = visible_profile(&state, &user, id).await?;
    user.require_self_or_staff(&profile)?;

    let school_id = profile
        .school_id
        .ok_or_else(|| ApiError::Validation("Profile has no school".to_string()))?;
    let school = state.run(move |store| store.get_school(school_id)).await?;

    Ok(Json(BalanceResponse {
        profile_id: profile.id,
        balance: profile.coin_balance,
        coin_name: school.coin_name,
        coin_symbol: school.coin_symbol,
    }))
}

/// GET /api/v1/profiles/:id/transactions
pub async fn list_profile_transactions(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Query(params): Query<TransactionListParams>,
) -> ApiResult<Json<ListResponse<Transaction>>> {
    let profile = visible_profile(&state, &user, id).await?;
    user.require_self_or_staff(&profile)?;

    let mut filter = build_filter(&params)?;
    filter.profile_id = Some(id);
    let transactions = state
        .run(move |store| store.list_transactions(&filter))
        .await?;
    Ok(Json(transactions.into()))
}

/// GET /api/v1/profiles/:id/achievements
pub async fn list_profile_achievements(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<ListResponse<Achievement>>> {
    visible_profile(&state, &user, id).await?;
    let achievements = state
        .run(move |store| store.list_student_achievements(id))
        .await?;
    Ok(Json(achievements.into()))
}

/// GET /api/v1/profiles/:id/purchases
pub async fn list_profile_purchases(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<ListResponse<MarketplacePurchase>>> {
    let profile = visible_profile(&state, &user, id).await?;
    user.require_self_or_staff(&profile)?;
    let purchases = state.run(move |store| store.list_purchases(id)).await?;
    Ok(Json(purchases.into()))
}

/// GET /api/v1/profiles/:id/offers
pub async fn list_profile_offers(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<ListResponse<ExchangeOffer>>> {
    let profile = visible_profile(&state, &user, id).await?;
    user.require_self_or_staff(&profile)?;
    let offers = state.run(move |store| store.list_buyer_offers(id)).await?;
    Ok(Json(offers.into()))
}

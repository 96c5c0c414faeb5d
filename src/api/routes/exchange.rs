//! Exchange Routes
//!
//! - GET /api/v1/schools/:id/listings - Listings of a school, `?status=open`
//! - POST /api/v1/listings - Open a listing as the caller
//! - GET /api/v1/listings/:id - Get a listing
//! - POST /api/v1/listings/:id/cancel - Cancel (seller or admin)
//! - GET /api/v1/listings/:id/offers - Offers on a listing (seller or staff)
//! - POST /api/v1/listings/:id/offers - Make an offer as the caller
//! - POST /api/v1/offers/:id/accept - Accept and pay (seller)
//! - POST /api/v1/offers/:id/reject - Reject (seller)
//! - POST /api/v1/offers/:id/withdraw - Withdraw (buyer)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::auth::CurrentUser;
use crate::api::dto::{CreateListingRequest, ListResponse, ListingListParams, MakeOfferRequest};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::store::{AcceptedOffer, ExchangeListing, ExchangeOffer, NewListing, NewOffer};

async fn load_listing(state: &AppState, user: &CurrentUser, id: i64) -> ApiResult<ExchangeListing> {
    let listing = state.run(move |store| store.get_listing(id)).await?;
    user.require_member(listing.school_id)?;
    Ok(listing)
}

/// Load an offer together with its listing
async fn load_offer(
    state: &AppState,
    user: &CurrentUser,
    id: i64,
) -> ApiResult<(ExchangeOffer, ExchangeListing)> {
    let offer = state.run(move |store| store.get_offer(id)).await?;
    let listing = load_listing(state, user, offer.listing_id).await?;
    Ok((offer, listing))
}

fn require_seller(user: &CurrentUser, listing: &ExchangeListing) -> ApiResult<()> {
    if listing.seller_id == user.id() {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Only the seller can do this".to_string()))
    }
}

/// GET /api/v1/schools/:id/listings
pub async fn list_listings(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(school_id): Path<i64>,
    Query(params): Query<ListingListParams>,
) -> ApiResult<Json<ListResponse<ExchangeListing>>> {
    user.require_member(school_id)?;
    let listings = state
        .run(move |store| store.list_listings(school_id, params.status))
        .await?;
    Ok(Json(listings.into()))
}

/// POST /api/v1/listings
pub async fn create_listing(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<CreateListingRequest>,
) -> ApiResult<(StatusCode, Json<ExchangeListing>)> {
    let new = NewListing {
        seller_id: user.id(),
        title: req.title,
        description: req.description,
        price: req.price,
    };
    let listing = state.run(move |store| store.create_listing(new)).await?;
    Ok((StatusCode::CREATED, Json(listing)))
}

/// GET /api/v1/listings/:id
pub async fn get_listing(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<ExchangeListing>> {
    Ok(Json(load_listing(&state, &user, id).await?))
}

/// POST /api/v1/listings/:id/cancel
pub async fn cancel_listing(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<ExchangeListing>> {
    let listing = load_listing(&state, &user, id).await?;
    if listing.seller_id != user.id() {
        user.require_admin(listing.school_id)?;
    }
    let cancelled = state.run(move |store| store.cancel_listing(id)).await?;
    Ok(Json(cancelled))
}

/// GET /api/v1/listings/:id/offers
///
/// Sellers and staff see every offer; other members see only their own.
pub async fn list_offers(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<ListResponse<ExchangeOffer>>> {
    let listing = load_listing(&state, &user, id).await?;
    let mut offers = state.run(move |store| store.list_offers(id)).await?;

    let sees_all = listing.seller_id == user.id() || user.require_staff(listing.school_id).is_ok();
    if !sees_all {
        offers.retain(|o| o.buyer_id == user.id());
    }
    Ok(Json(offers.into()))
}

/// POST /api/v1/listings/:id/offers
pub async fn make_offer(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<MakeOfferRequest>,
) -> ApiResult<(StatusCode, Json<ExchangeOffer>)> {
    let new = NewOffer {
        listing_id: id,
        buyer_id: user.id(),
        amount: req.amount,
        message: req.message,
    };
    let offer = state.run(move |store| store.make_offer(new)).await?;
    Ok((StatusCode::CREATED, Json(offer)))
}

/// POST /api/v1/offers/:id/accept
pub async fn accept_offer(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<AcceptedOffer>> {
    let (_, listing) = load_offer(&state, &user, id).await?;
    require_seller(&user, &listing)?;
    let accepted = state.run(move |store| store.accept_offer(id)).await?;
    Ok(Json(accepted))
}

/// POST /api/v1/offers/:id/reject
pub async fn reject_offer(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<ExchangeOffer>> {
    let (_, listing) = load_offer(&state, &user, id).await?;
    require_seller(&user, &listing)?;
    let offer = state.run(move |store| store.reject_offer(id)).await?;
    Ok(Json(offer))
}

/// POST /api/v1/offers/:id/withdraw
pub async fn withdraw_offer(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<ExchangeOffer>> {
    let (offer, _) = load_offer(&state, &user, id).await?;
    if offer.buyer_id != user.id() {
        return Err(ApiError::Forbidden("Only the buyer can withdraw an offer".to_string()));
    }
    let offer = state.run(move |store| store.withdraw_offer(id)).await?;
    Ok(Json(offer))
}

//! Marketplace Routes
//!
//! - GET /api/v1/schools/:id/categories - Categories of a school
//! - POST /api/v1/schools/:id/categories - Create a category (admin)
//! - DELETE /api/v1/categories/:id - Delete a category (admin)
//! - GET /api/v1/schools/:id/items - Items, `?category_id=&active_only=`
//! - POST /api/v1/schools/:id/items - Create an item (admin)
//! - GET /api/v1/items/:id - Get an item
//! - PUT /api/v1/items/:id - Update price, stock or availability (admin)
//! - POST /api/v1/items/:id/purchase - Buy an item

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::auth::CurrentUser;
use crate::api::dto::{CreateCategoryRequest, CreateItemRequest, ListResponse, PurchaseRequest};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::store::{
    ItemFilter, ItemUpdate, MarketplaceCategory, MarketplaceItem, NewItem, PurchaseReceipt, Role,
};

/// GET /api/v1/schools/:id/categories
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(school_id): Path<i64>,
) -> ApiResult<Json<ListResponse<MarketplaceCategory>>> {
    user.require_member(school_id)?;
    let categories = state
        .run(move |store| store.list_categories(school_id))
        .await?;
    Ok(Json(categories.into()))
}

/// POST /api/v1/schools/:id/categories
pub async fn create_category(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(school_id): Path<i64>,
    Json(req): Json<CreateCategoryRequest>,
) -> ApiResult<(StatusCode, Json<MarketplaceCategory>)> {
    user.require_admin(school_id)?;
    let category = state
        .run(move |store| store.create_category(school_id, &req.name))
        .await?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// DELETE /api/v1/categories/:id
pub async fn delete_category(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let category = state.run(move |store| store.get_category(id)).await?;
    user.require_admin(category.school_id)?;
    state.run(move |store| store.delete_category(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/schools/:id/items
///
/// Students only ever see active items.
pub async fn list_items(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(school_id): Path<i64>,
    Query(mut filter): Query<ItemFilter>,
) -> ApiResult<Json<ListResponse<MarketplaceItem>>> {
    user.require_member(school_id)?;
    if user.role() == Role::Student {
        filter.active_only = true;
    }
    let items = state
        .run(move |store| store.list_items(school_id, &filter))
        .await?;
    Ok(Json(items.into()))
}

/// POST /api/v1/schools/:id/items
pub async fn create_item(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(school_id): Path<i64>,
    Json(req): Json<CreateItemRequest>,
) -> ApiResult<(StatusCode, Json<MarketplaceItem>)> {
    user.require_admin(school_id)?;
    let new = NewItem {
        school_id,
        category_id: req.category_id,
        name: req.name,
        description: req.description,
        price: req.price,
        stock: req.stock,
    };
    let item = state.run(move |store| store.create_item(new)).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// GET /api/v1/items/:id
pub async fn get_item(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<MarketplaceItem>> {
    let item = state.run(move |store| store.get_item(id)).await?;
    user.require_member(item.school_id)?;
    if !item.active && user.role() == Role::Student {
        return Err(ApiError::NotFound(format!("Item {}", id)));
    }
    Ok(Json(item))
}

/// PUT /api/v1/items/:id
pub async fn update_item(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<ItemUpdate>,
) -> ApiResult<Json<MarketplaceItem>> {
    let item = state.run(move |store| store.get_item(id)).await?;
    user.require_admin(item.school_id)?;
    let updated = state.run(move |store| store.update_item(id, req)).await?;
    Ok(Json(updated))
}

/// POST /api/v1/items/:id/purchase
///
/// The caller buys for themselves; stock and balance are checked atomically.
pub async fn purchase_item(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<PurchaseRequest>,
) -> ApiResult<(StatusCode, Json<PurchaseReceipt>)> {
    let buyer = user.id();
    let receipt = state
        .run(move |store| store.purchase_item(buyer, id, req.quantity))
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

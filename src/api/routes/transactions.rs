//! Transaction Routes
//!
//! - GET /api/v1/schools/:id/transactions - School ledger (teachers and admins)
//! - GET /api/v1/transactions/:id - One ledger entry
//! - POST /api/v1/transfers - Send coins to another profile
//! - POST /api/v1/schools/:id/adjustments - Mint or retire coins for a profile (admin)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::auth::CurrentUser;
use crate::api::dto::{AdjustmentRequest, ListResponse, TransactionListParams, TransferRequest};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::bulk::parse_time_bound;
use crate::store::{Transaction, TransactionFilter, TransactionType};

/// Turn query parameters into a store filter
pub(crate) fn build_filter(params: &TransactionListParams) -> ApiResult<TransactionFilter> {
    let transaction_type = params
        .transaction_type
        .as_deref()
        .map(str::parse::<TransactionType>)
        .transpose()?;
    let since = params.since.as_deref().map(parse_time_bound).transpose()?;
    let until = params.until.as_deref().map(parse_time_bound).transpose()?;

    if let (Some(since), Some(until)) = (since, until) {
        if since >= until {
            return Err(ApiError::Validation("since must be before until".to_string()));
        }
    }

    Ok(TransactionFilter {
        school_id: None,
        profile_id: params.profile_id,
        transaction_type,
        since,
        until,
        limit: params.limit,
    })
}

/// GET /api/v1/schools/:id/transactions
pub async fn list_school_transactions(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(school_id): Path<i64>,
    Query(params): Query<TransactionListParams>,
) -> ApiResult<Json<ListResponse<Transaction>>> {
    user.require_staff(school_id)?;

    let mut filter = build_filter(&params)?;
    filter.school_id = Some(school_id);
    let transactions = state
        .run(move |store| store.list_transactions(&filter))
        .await?;
    Ok(Json(transactions.into()))
}

/// GET /api/v1/transactions/:id
///
/// Parties to the transaction and staff of the school may read it.
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Transaction>> {
    let transaction = state.run(move |store| store.get_transaction(id)).await?;

    let me = Some(user.id());
    if transaction.sender_id != me && transaction.receiver_id != me {
        user.require_staff(transaction.school_id)?;
    }
    Ok(Json(transaction))
}

/// POST /api/v1/transfers
pub async fn transfer(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<TransferRequest>,
) -> ApiResult<(StatusCode, Json<Transaction>)> {
    let sender_id = user.id();
    let transaction = state
        .run(move |store| store.transfer(sender_id, req.receiver_id, req.amount, req.description))
        .await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

/// POST /api/v1/schools/:id/adjustments
pub async fn adjust_balance(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(school_id): Path<i64>,
    Json(req): Json<AdjustmentRequest>,
) -> ApiResult<(StatusCode, Json<Transaction>)> {
    user.require_admin(school_id)?;

    let description = req
        .description
        .unwrap_or_else(|| format!("Adjustment by {}", user.0.name));
    let transaction = state
        .run(move |store| {
            store.adjust_balance(school_id, req.profile_id, req.delta, Some(description))
        })
        .await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter() {
        let params = TransactionListParams {
            transaction_type: Some("transfer".to_string()),
            since: Some("2024-09-01".to_string()),
            until: Some("2024-10-01".to_string()),
            limit: Some(20),
            ..Default::default()
        };

        let filter = build_filter(&params).unwrap();
        assert_eq!(filter.transaction_type, Some(TransactionType::P2pTransfer));
        assert!(filter.since.is_some());
        assert_eq!(filter.limit, Some(20));
    }

    #[test]
    fn test_build_filter_rejects_bad_input() {
        let backwards = TransactionListParams {
            since: Some("2024-10-01".to_string()),
            until: Some("2024-09-01".to_string()),
            ..Default::default()
        };
        assert!(build_filter(&backwards).is_err());

        let bad_type = TransactionListParams {
            transaction_type: Some("gift".to_string()),
            ..Default::default()
        };
        assert!(build_filter(&bad_type).is_err());
    }
}

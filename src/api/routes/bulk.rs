//! Bulk Routes
//!
//! - POST /api/v1/schools/:id/import - Import users from a CSV body (admin)
//! - GET /api/v1/schools/:id/export/transactions - Ledger as CSV, `?since=&until=`
//! - GET /api/v1/schools/:id/export/balances - Profile balances as CSV

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::api::auth::CurrentUser;
use crate::api::dto::ExportParams;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::bulk::{self, ImportReport, UserImporter};
use crate::store::Role;

/// POST /api/v1/schools/:id/import
///
/// Body is the CSV text. Admins may import up to admin, super admins too.
pub async fn import_users(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(school_id): Path<i64>,
    body: String,
) -> ApiResult<(StatusCode, Json<ImportReport>)> {
    user.require_admin(school_id)?;
    if body.trim().is_empty() {
        return Err(ApiError::Validation("CSV body is empty".to_string()));
    }

    let importer = UserImporter::new(school_id).with_max_role(Role::Admin);
    let report = state
        .run(move |store| importer.import(store, &body))
        .await?;

    tracing::info!(
        school_id,
        actor = user.id(),
        created = report.rows_processed,
        failed = report.rows_failed,
        "Bulk import finished"
    );
    Ok((StatusCode::OK, Json(report)))
}

/// GET /api/v1/schools/:id/export/transactions
pub async fn export_transactions(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(school_id): Path<i64>,
    Query(params): Query<ExportParams>,
) -> ApiResult<Response> {
    user.require_staff(school_id)?;

    let since = params.since.as_deref().map(bulk::parse_time_bound).transpose()?;
    let until = params.until.as_deref().map(bulk::parse_time_bound).transpose()?;
    if let (Some(since), Some(until)) = (since, until) {
        if since >= until {
            return Err(ApiError::Validation("since must be before until".to_string()));
        }
    }

    let csv = state
        .run(move |store| bulk::export_transactions(store, school_id, since, until))
        .await?;
    Ok(csv_attachment(csv, &format!("transactions_{}", school_id)))
}

/// GET /api/v1/schools/:id/export/balances
pub async fn export_balances(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(school_id): Path<i64>,
) -> ApiResult<Response> {
    user.require_staff(school_id)?;
    let csv = state
        .run(move |store| bulk::export_balances(store, school_id))
        .await?;
    Ok(csv_attachment(csv, &format!("balances_{}", school_id)))
}

fn csv_attachment(csv: Vec<u8>, stem: &str) -> Response {
    let filename = format!(
        "schoolcoin_{}_{}.csv",
        stem,
        Utc::now().format("%Y%m%d_%H%M%S")
    );

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        Body::from(csv),
    )
        .into_response()
}

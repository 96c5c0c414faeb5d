//! Achievement Routes
//!
//! - GET /api/v1/schools/:id/achievement-types - Types of a school
//! - POST /api/v1/schools/:id/achievement-types - Create a type (admin)
//! - PUT /api/v1/achievement-types/:id - Update a type (admin)
//! - DELETE /api/v1/achievement-types/:id - Delete an unused type (admin)
//! - POST /api/v1/achievements - Award an achievement (teacher or admin)
//! - GET /api/v1/schools/:id/achievements - Recent awards of a school

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::auth::CurrentUser;
use crate::api::dto::{
    AwardAchievementRequest, AwardResponse, CreateAchievementTypeRequest, LimitParams,
    ListResponse,
};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::store::{
    Achievement, AchievementType, AchievementTypeUpdate, AwardRequest, NewAchievementType, Role,
};

/// GET /api/v1/schools/:id/achievement-types
pub async fn list_types(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(school_id): Path<i64>,
) -> ApiResult<Json<ListResponse<AchievementType>>> {
    user.require_member(school_id)?;
    let types = state
        .run(move |store| store.list_achievement_types(school_id))
        .await?;
    Ok(Json(types.into()))
}

/// POST /api/v1/schools/:id/achievement-types
pub async fn create_type(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(school_id): Path<i64>,
    Json(req): Json<CreateAchievementTypeRequest>,
) -> ApiResult<(StatusCode, Json<AchievementType>)> {
    user.require_admin(school_id)?;
    let new = NewAchievementType {
        school_id,
        name: req.name,
        description: req.description,
        coin_value: req.coin_value,
    };
    let created = state
        .run(move |store| store.create_achievement_type(new))
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// PUT /api/v1/achievement-types/:id
pub async fn update_type(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<AchievementTypeUpdate>,
) -> ApiResult<Json<AchievementType>> {
    let existing = state.run(move |store| store.get_achievement_type(id)).await?;
    user.require_admin(existing.school_id)?;
    let updated = state
        .run(move |store| store.update_achievement_type(id, req))
        .await?;
    Ok(Json(updated))
}

/// DELETE /api/v1/achievement-types/:id
pub async fn delete_type(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let existing = state.run(move |store| store.get_achievement_type(id)).await?;
    user.require_admin(existing.school_id)?;
    state
        .run(move |store| store.delete_achievement_type(id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/achievements
///
/// Teachers award students enrolled in one of their classes; admins award
/// any student of their school.
pub async fn award(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<AwardAchievementRequest>,
) -> ApiResult<(StatusCode, Json<AwardResponse>)> {
    if !user.role().can_award() {
        return Err(ApiError::Forbidden(
            "Only teachers and admins award achievements".to_string(),
        ));
    }

    let teacher_id = user.id();
    let student_id = req.student_id;
    if user.role() == Role::Teacher {
        let teaches = state
            .run(move |store| store.teaches_student(teacher_id, student_id))
            .await?;
        if !teaches {
            return Err(ApiError::Forbidden(format!(
                "Student {} is not in any of your classes",
                student_id
            )));
        }
    }

    let request = AwardRequest {
        teacher_id,
        student_id,
        achievement_type_id: req.achievement_type_id,
        description: req.description,
    };
    let (achievement, transaction) = state
        .run(move |store| store.award_achievement(request))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AwardResponse {
            achievement,
            transaction,
        }),
    ))
}

/// GET /api/v1/schools/:id/achievements?limit=
pub async fn list_school_achievements(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(school_id): Path<i64>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<ListResponse<Achievement>>> {
    user.require_member(school_id)?;
    let achievements = state
        .run(move |store| store.list_school_achievements(school_id, params.limit))
        .await?;
    Ok(Json(achievements.into()))
}

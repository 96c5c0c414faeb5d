//! Authentication extractor and role checks
//!
//! Requests carry `Authorization: Bearer <token>`; the token is resolved
//! against the session table on every request.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::store::{Profile, Role};

/// The authenticated profile behind the request
///
/// ```rust,ignore
/// async fn handler(CurrentUser(user): CurrentUser) -> String {
///     format!("Hello, {}!", user.name)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Profile);

/// Pull the token out of an `Authorization: Bearer` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?
            .to_string();

        let profile = state
            .run(move |store| store.resolve_session(&token))
            .await?
            .ok_or_else(|| ApiError::Unauthorized("Invalid or expired session".to_string()))?;

        Ok(Self(profile))
    }
}

impl CurrentUser {
    pub fn id(&self) -> i64 {
        self.0.id
    }

    pub fn role(&self) -> Role {
        self.0.role
    }

    /// School of the user; super admins have none
    pub fn school_id(&self) -> ApiResult<i64> {
        self.0.school_id.ok_or_else(|| {
            ApiError::Validation("This action needs a school; pass school_id explicitly".to_string())
        })
    }

    pub fn require_super_admin(&self) -> ApiResult<()> {
        if self.0.role == Role::SuperAdmin {
            Ok(())
        } else {
            Err(ApiError::Forbidden("Super admin only".to_string()))
        }
    }

    /// Any profile of the school, or a super admin
    pub fn require_member(&self, school_id: i64) -> ApiResult<()> {
        if self.0.can_access_school(school_id) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!("No access to school {}", school_id)))
        }
    }

    /// Teachers and admins of the school, or a super admin
    pub fn require_staff(&self, school_id: i64) -> ApiResult<()> {
        self.require_member(school_id)?;
        if self.0.role.can_award() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("Teachers and admins only".to_string()))
        }
    }

    /// Admins of the school, or a super admin
    pub fn require_admin(&self, school_id: i64) -> ApiResult<()> {
        self.require_member(school_id)?;
        if self.0.role.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("Admins only".to_string()))
        }
    }

    /// The user themselves, or staff of the profile's school
    pub fn require_self_or_staff(&self, profile: &Profile) -> ApiResult<()> {
        if profile.id == self.0.id {
            return Ok(());
        }
        match profile.school_id {
            Some(school_id) => self.require_staff(school_id),
            None => self.require_super_admin(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use chrono::Utc;

    fn profile(role: Role, school_id: Option<i64>) -> Profile {
        Profile {
            id: 1,
            school_id,
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            role,
            coin_balance: 0,
            password_hash: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_bearer_token() {
        let (parts, _) = Request::builder()
            .header("Authorization", "Bearer abc123")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts.headers), Some("abc123"));

        let (parts, _) = Request::builder()
            .header("Authorization", "Basic abc123")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts.headers), None);
    }

    #[test]
    fn test_role_checks() {
        let student = CurrentUser(profile(Role::Student, Some(1)));
        assert!(student.require_member(1).is_ok());
        assert!(student.require_member(2).is_err());
        assert!(student.require_staff(1).is_err());

        let teacher = CurrentUser(profile(Role::Teacher, Some(1)));
        assert!(teacher.require_staff(1).is_ok());
        assert!(teacher.require_admin(1).is_err());

        let admin = CurrentUser(profile(Role::Admin, Some(1)));
        assert!(admin.require_admin(1).is_ok());
        assert!(admin.require_admin(2).is_err());
        assert!(admin.require_super_admin().is_err());

        let root = CurrentUser(profile(Role::SuperAdmin, None));
        assert!(root.require_admin(42).is_ok());
        assert!(root.school_id().is_err());
    }

    #[test]
    fn test_self_or_staff() {
        let student = CurrentUser(profile(Role::Student, Some(1)));
        let mut other = profile(Role::Student, Some(1));
        assert!(student.require_self_or_staff(&other).is_ok());

        other.id = 2;
        assert!(student.require_self_or_staff(&other).is_err());
    }
}

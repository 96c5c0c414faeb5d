//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.
//! These types are serialized/deserialized to/from JSON. Store input types
//! (`NewSchool`, `NewItem`, ...) are accepted directly where the caller
//! supplies every field; the types here cover the rest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{Achievement, ListingStatus, Profile, Role, StoreStats, Transaction};

// ============================================
// COMMON
// ============================================

/// A list with its length
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub total: usize,
    pub items: Vec<T>,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            total: items.len(),
            items,
        }
    }
}

// ============================================
// AUTH DTOs
// ============================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub profile: Profile,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

// ============================================
// PROFILE DTOs
// ============================================

/// Profile creation; `school_id` defaults to the caller's school
#[derive(Debug, Deserialize)]
pub struct CreateProfileRequest {
    #[serde(default)]
    pub school_id: Option<i64>,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileListParams {
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub profile_id: i64,
    pub balance: i64,
    pub coin_name: String,
    pub coin_symbol: String,
}

// ============================================
// CLASS DTOs
// ============================================

/// Class creation; teachers create their own, admins may name a teacher
#[derive(Debug, Deserialize)]
pub struct CreateClassRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub teacher_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClassListParams {
    #[serde(default)]
    pub teacher_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub student_id: i64,
}

// ============================================
// ACHIEVEMENT DTOs
// ============================================

#[derive(Debug, Deserialize)]
pub struct CreateAchievementTypeRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub coin_value: i64,
}

#[derive(Debug, Deserialize)]
pub struct AwardAchievementRequest {
    pub student_id: i64,
    pub achievement_type_id: i64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AwardResponse {
    pub achievement: Achievement,
    pub transaction: Transaction,
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

// ============================================
// MARKETPLACE DTOs
// ============================================

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateItemRequest {
    #[serde(default)]
    pub category_id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: i64,
    pub stock: i64,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

// ============================================
// EXCHANGE DTOs
// ============================================

#[derive(Debug, Deserialize)]
pub struct CreateListingRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListingListParams {
    #[serde(default)]
    pub status: Option<ListingStatus>,
}

#[derive(Debug, Deserialize)]
pub struct MakeOfferRequest {
    pub amount: i64,
    #[serde(default)]
    pub message: Option<String>,
}

// ============================================
// TRANSACTION DTOs
// ============================================

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub receiver_id: i64,
    pub amount: i64,
    #[serde(default)]
    pub description: Option<String>,
}

/// Mint (positive) or retire (negative) coins for a profile
#[derive(Debug, Deserialize)]
pub struct AdjustmentRequest {
    pub profile_id: i64,
    pub delta: i64,
    #[serde(default)]
    pub description: Option<String>,
}

/// Transaction list filters; times accept `now-7d`, RFC 3339 or `YYYY-MM-DD`
#[derive(Debug, Default, Deserialize)]
pub struct TransactionListParams {
    #[serde(default)]
    pub profile_id: Option<i64>,
    #[serde(default, rename = "type")]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReconcileParams {
    #[serde(default)]
    pub repair: bool,
}

// ============================================
// BULK DTOs
// ============================================

#[derive(Debug, Default, Deserialize)]
pub struct ExportParams {
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health status response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status: healthy, unhealthy
    pub status: String,
    /// Database status
    pub database: String,
    /// Row counts, absent when the database is down
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StoreStats>,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Application version
    pub version: String,
}

//! Core data types for the SchoolCoin store
//!
//! This module defines the rows kept by the store and the enums that
//! classify them:
//! - `School`, `Profile`, `Class`: the people and groups of a school
//! - `AchievementType`, `Achievement`: reward definitions and awards
//! - `MarketplaceItem`, `MarketplacePurchase`: the school shop
//! - `ExchangeListing`, `ExchangeOffer`: peer-to-peer trades
//! - `Transaction`: one ledger entry moving coins

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::store::error::StoreError;

/// Store enums as their lowercase text form in SQLite
macro_rules! text_column {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: StoreError| FromSqlError::Other(Box::new(e)))
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Role of a profile within a school
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Earns, spends and trades coins
    Student,
    /// Runs classes and awards achievements
    Teacher,
    /// Manages one school
    Admin,
    /// Manages every school
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    /// Teachers and above may award achievements
    pub fn can_award(&self) -> bool {
        *self >= Role::Teacher
    }

    /// Admins and super admins manage school settings and catalogues
    pub fn is_admin(&self) -> bool {
        *self >= Role::Admin
    }
}

impl FromStr for Role {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            "super_admin" | "superadmin" => Ok(Role::SuperAdmin),
            other => Err(StoreError::Validation(format!(
                "Invalid role: {}. Use student, teacher, admin, or super_admin",
                other
            ))),
        }
    }
}

text_column!(Role);

/// Kind of coin movement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Coins minted for an achievement
    Reward,
    /// Coins spent in the marketplace
    Purchase,
    /// Coins sent from one profile to another
    P2pTransfer,
    /// Manual mint or burn by an admin
    Adjustment,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Reward => "reward",
            TransactionType::Purchase => "purchase",
            TransactionType::P2pTransfer => "p2p_transfer",
            TransactionType::Adjustment => "adjustment",
        }
    }
}

impl FromStr for TransactionType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reward" => Ok(TransactionType::Reward),
            "purchase" => Ok(TransactionType::Purchase),
            "p2p_transfer" | "transfer" => Ok(TransactionType::P2pTransfer),
            "adjustment" => Ok(TransactionType::Adjustment),
            other => Err(StoreError::Validation(format!(
                "Invalid transaction type: {}. Use reward, purchase, p2p_transfer, or adjustment",
                other
            ))),
        }
    }
}

text_column!(TransactionType);

/// Lifecycle of an exchange listing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Open,
    Closed,
    Cancelled,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Open => "open",
            ListingStatus::Closed => "closed",
            ListingStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for ListingStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ListingStatus::Open),
            "closed" => Ok(ListingStatus::Closed),
            "cancelled" => Ok(ListingStatus::Cancelled),
            other => Err(StoreError::Validation(format!(
                "Invalid listing status: {}",
                other
            ))),
        }
    }
}

text_column!(ListingStatus);

/// Lifecycle of an offer on a listing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
    Withdrawn,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Pending => "pending",
            OfferStatus::Accepted => "accepted",
            OfferStatus::Rejected => "rejected",
            OfferStatus::Withdrawn => "withdrawn",
        }
    }
}

impl FromStr for OfferStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OfferStatus::Pending),
            "accepted" => Ok(OfferStatus::Accepted),
            "rejected" => Ok(OfferStatus::Rejected),
            "withdrawn" => Ok(OfferStatus::Withdrawn),
            other => Err(StoreError::Validation(format!(
                "Invalid offer status: {}",
                other
            ))),
        }
    }
}

text_column!(OfferStatus);

/// A school and its coin
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct School {
    pub id: i64,
    pub name: String,
    /// Display name of the coin (e.g., "Owl Coin")
    pub coin_name: String,
    /// Short symbol (e.g., "OWL")
    pub coin_symbol: String,
    /// Cap on coins in circulation, `None` means unlimited
    pub max_supply: Option<i64>,
    /// Coins currently in circulation
    pub current_supply: i64,
    pub created_at: DateTime<Utc>,
}

/// A user of the system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: i64,
    /// `None` only for super admins
    pub school_id: Option<i64>,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub coin_balance: i64,
    #[serde(skip)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// Whether this profile may act on rows of `school_id`
    pub fn can_access_school(&self, school_id: i64) -> bool {
        self.role == Role::SuperAdmin || self.school_id == Some(school_id)
    }
}

/// A teacher-owned group of students
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Class {
    pub id: i64,
    pub school_id: i64,
    pub teacher_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Membership of a student in a class
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassEnrollment {
    pub id: i64,
    pub class_id: i64,
    pub student_id: i64,
    pub enrolled_at: DateTime<Utc>,
}

/// A kind of achievement and how many coins it grants
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AchievementType {
    pub id: i64,
    pub school_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub coin_value: i64,
    pub created_at: DateTime<Utc>,
}

/// An awarded achievement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Achievement {
    pub id: i64,
    pub student_id: i64,
    pub teacher_id: i64,
    pub achievement_type_id: i64,
    pub description: Option<String>,
    /// Ledger entry that paid out the reward
    pub transaction_id: i64,
    pub awarded_at: DateTime<Utc>,
}

/// Grouping for marketplace items
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketplaceCategory {
    pub id: i64,
    pub school_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Something students can buy with coins
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketplaceItem {
    pub id: i64,
    pub school_id: i64,
    pub category_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub stock: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A completed marketplace purchase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketplacePurchase {
    pub id: i64,
    pub item_id: i64,
    pub student_id: i64,
    pub quantity: i64,
    pub total_price: i64,
    pub transaction_id: i64,
    pub purchased_at: DateTime<Utc>,
}

/// A skill or service offered for coins
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangeListing {
    pub id: i64,
    pub school_id: i64,
    pub seller_id: i64,
    pub title: String,
    pub description: Option<String>,
    /// Asking price
    pub price: i64,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
}

/// A bid on an exchange listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangeOffer {
    pub id: i64,
    pub listing_id: i64,
    pub buyer_id: i64,
    pub amount: i64,
    pub message: Option<String>,
    pub status: OfferStatus,
    /// Set once the offer is accepted and paid
    pub transaction_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// One ledger entry
///
/// A missing sender means the coins were minted, a missing receiver
/// means they were retired from circulation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: i64,
    pub school_id: i64,
    pub sender_id: Option<i64>,
    pub receiver_id: Option<i64>,
    pub amount: i64,
    pub transaction_type: TransactionType,
    /// Id of the row that caused this movement (achievement type, item, listing)
    pub reference_id: Option<i64>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for recording a ledger entry
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub school_id: i64,
    pub sender_id: Option<i64>,
    pub receiver_id: Option<i64>,
    pub amount: i64,
    pub transaction_type: TransactionType,
    pub reference_id: Option<i64>,
    pub description: Option<String>,
}

impl NewTransaction {
    /// Coins entering circulation for `receiver`
    pub fn mint(school_id: i64, receiver_id: i64, amount: i64, kind: TransactionType) -> Self {
        Self {
            school_id,
            sender_id: None,
            receiver_id: Some(receiver_id),
            amount,
            transaction_type: kind,
            reference_id: None,
            description: None,
        }
    }

    /// Coins leaving circulation from `sender`
    pub fn burn(school_id: i64, sender_id: i64, amount: i64, kind: TransactionType) -> Self {
        Self {
            school_id,
            sender_id: Some(sender_id),
            receiver_id: None,
            amount,
            transaction_type: kind,
            reference_id: None,
            description: None,
        }
    }

    /// Coins moving between two profiles
    pub fn transfer(school_id: i64, sender_id: i64, receiver_id: i64, amount: i64) -> Self {
        Self {
            school_id,
            sender_id: Some(sender_id),
            receiver_id: Some(receiver_id),
            amount,
            transaction_type: TransactionType::P2pTransfer,
            reference_id: None,
            description: None,
        }
    }

    /// Builder method: set reference id
    pub fn reference(mut self, reference_id: i64) -> Self {
        self.reference_id = Some(reference_id);
        self
    }

    /// Builder method: set description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Filter for listing transactions
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub school_id: Option<i64>,
    /// Matches either side of the transaction
    pub profile_id: Option<i64>,
    pub transaction_type: Option<TransactionType>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl TransactionFilter {
    pub fn school(school_id: i64) -> Self {
        Self {
            school_id: Some(school_id),
            ..Default::default()
        }
    }

    pub fn profile(profile_id: i64) -> Self {
        Self {
            profile_id: Some(profile_id),
            ..Default::default()
        }
    }
}

/// Difference between stored balance and ledger-derived balance
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BalanceDrift {
    pub profile_id: i64,
    pub stored_balance: i64,
    pub ledger_balance: i64,
}

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReconcileReport {
    pub school_id: i64,
    pub profiles_checked: usize,
    pub drifts: Vec<BalanceDrift>,
    /// `current_supply` as stored on the school
    pub stored_supply: i64,
    /// Minted minus retired, as recorded in the ledger
    pub ledger_supply: i64,
    /// Whether drifting balances were overwritten with the ledger value
    pub repaired: bool,
}

impl ReconcileReport {
    /// Whether balances and supply agree with the ledger
    pub fn is_consistent(&self) -> bool {
        self.drifts.is_empty() && self.stored_supply == self.ledger_supply
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!("Teacher".parse::<Role>().unwrap(), Role::Teacher);
        assert_eq!("super_admin".parse::<Role>().unwrap(), Role::SuperAdmin);
        assert_eq!(Role::SuperAdmin.to_string(), "super_admin");
        assert!("janitor".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_ordering() {
        assert!(!Role::Student.can_award());
        assert!(Role::Teacher.can_award());
        assert!(!Role::Teacher.is_admin());
        assert!(Role::SuperAdmin.is_admin());
    }

    #[test]
    fn test_transaction_type_aliases() {
        assert_eq!(
            "transfer".parse::<TransactionType>().unwrap(),
            TransactionType::P2pTransfer
        );
        assert_eq!(TransactionType::P2pTransfer.to_string(), "p2p_transfer");
    }

    #[test]
    fn test_new_transaction_builders() {
        let tx = NewTransaction::mint(1, 7, 50, TransactionType::Reward)
            .reference(3)
            .description("Science fair");
        assert_eq!(tx.sender_id, None);
        assert_eq!(tx.receiver_id, Some(7));
        assert_eq!(tx.reference_id, Some(3));

        let tx = NewTransaction::transfer(1, 2, 3, 10);
        assert_eq!(tx.transaction_type, TransactionType::P2pTransfer);
    }

    #[test]
    fn test_profile_hides_password_hash() {
        let profile = Profile {
            id: 1,
            school_id: Some(1),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            role: Role::Student,
            coin_balance: 0,
            password_hash: "secret".to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&profile).unwrap();
        assert!(!json.contains("secret"));
        assert!(profile.can_access_school(1));
        assert!(!profile.can_access_school(2));
    }
}

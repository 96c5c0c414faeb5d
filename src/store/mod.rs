//! SchoolCoin Store
//!
//! Relational storage for the token economy on top of SQLite:
//!
//! - **database**: connection handling, transactions, stats
//! - **schema**: versioned migrations
//! - **types**: rows and enums shared across the crate
//! - **ledger**: atomic coin movements and reconciliation
//! - **schools**, **profiles**, **sessions**, **classes**: membership
//! - **achievements**, **marketplace**, **exchange**: the three ways coins move
//! - **error**: error types
//!
//! # Architecture
//!
//! ```text
//! Coin movement:
//!   BEGIN IMMEDIATE → guarded debit / mint → credit / retire
//!                   → ledger row → side rows (purchase, achievement, offer) → COMMIT
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use schoolcoin::store::{NewSchool, Store, StoreConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Store::open(&StoreConfig::new("./data"))?;
//!     let school = store.create_school(NewSchool {
//!         name: "Riverside Elementary".to_string(),
//!         coin_name: "River Coin".to_string(),
//!         coin_symbol: "RVC".to_string(),
//!         max_supply: Some(1_000_000),
//!     })?;
//!
//!     let report = store.reconcile(school.id, false)?;
//!     assert!(report.is_consistent());
//!     Ok(())
//! }
//! ```

pub mod achievements;
pub mod classes;
pub mod database;
pub mod error;
pub mod exchange;
pub mod ledger;
pub mod marketplace;
pub mod profiles;
pub mod schema;
pub mod schools;
pub mod sessions;
pub mod types;

// Re-export commonly used types
pub use achievements::{AchievementTypeUpdate, AwardRequest, NewAchievementType};
pub use classes::NewClass;
pub use database::{Store, StoreConfig, StoreStats};
pub use error::{StoreError, StoreResult};
pub use exchange::{AcceptedOffer, NewListing, NewOffer};
pub use ledger::MAX_TRANSACTION_AMOUNT;
pub use marketplace::{ItemFilter, ItemUpdate, NewItem, PurchaseReceipt};
pub use profiles::{NewProfile, ProfileUpdate};
pub use schools::{NewSchool, SchoolUpdate};
pub use sessions::Session;
pub use types::{
    Achievement, AchievementType, BalanceDrift, Class, ClassEnrollment, ExchangeListing,
    ExchangeOffer, ListingStatus, MarketplaceCategory, MarketplaceItem, MarketplacePurchase,
    NewTransaction, OfferStatus, Profile, ReconcileReport, Role, School, Transaction,
    TransactionFilter, TransactionType,
};

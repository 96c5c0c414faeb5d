//! # SchoolCoin
//!
//! A school token economy: students earn coins for achievements, spend them
//! in a class marketplace and trade skills with each other. Teachers and
//! admins run classes, define achievements and manage coin issuance.
//!
//! ## Features
//!
//! - **Atomic ledger**: every coin movement is one SQLite transaction, so
//!   balances, stock and supply never drift from the transaction log
//! - **Supply control**: rewards mint coins against a per-school cap,
//!   purchases retire them
//! - **Exchange**: peer-to-peer listings with offers settled on acceptance
//! - **Bulk tools**: CSV user import and CSV ledger/balance export
//!
//! ## Modules
//!
//! - [`store`]: SQLite repositories and the ledger
//! - [`auth`]: password hashing and token generation
//! - [`bulk`]: CSV import and export
//! - [`api`]: REST API server with Axum
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use schoolcoin::store::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Store::open(&StoreConfig::new("./data"))?;
//!
//!     let school = store.create_school(NewSchool {
//!         name: "Riverside Elementary".to_string(),
//!         coin_name: "River Coin".to_string(),
//!         coin_symbol: "RVC".to_string(),
//!         max_supply: None,
//!     })?;
//!
//!     let student = store.create_profile(NewProfile {
//!         school_id: Some(school.id),
//!         name: "Ada".to_string(),
//!         email: "ada@riverside.example".to_string(),
//!         role: Role::Student,
//!         password: "reading-club".to_string(),
//!     })?;
//!
//!     // Mint 50 coins as a reward
//!     store.record_transaction(
//!         NewTransaction::mint(school.id, student.id, 50, TransactionType::Reward)
//!             .description("Science fair"),
//!     )?;
//!
//!     println!("Balance: {}", store.get_profile(student.id)?.coin_balance);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod bulk;
pub mod config;
pub mod store;

// Re-export top-level types for convenience
pub use store::{
    NewTransaction, Profile, Role, School, Store, StoreConfig, StoreError, StoreResult,
    Transaction, TransactionType,
};

pub use api::{build_router, serve, ApiConfig, ApiError, AppState};

pub use bulk::{BulkError, ImportReport, UserImporter};

pub use config::{Config, ConfigError, LoggingConfig};

//! API Routes
//!
//! Route handlers organized by functionality.

pub mod achievements;
pub mod auth;
pub mod bulk;
pub mod classes;
pub mod exchange;
pub mod health;
pub mod marketplace;
pub mod profiles;
pub mod schools;
pub mod transactions;

//! CSV Export
//!
//! Writes a school's ledger and its profile balances as plain CSV.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;

use super::BulkError;
use crate::store::{Profile, Store, Transaction, TransactionFilter};

#[derive(Serialize)]
struct TransactionRecord<'a> {
    id: i64,
    created_at: String,
    transaction_type: &'static str,
    sender_id: Option<i64>,
    sender_name: &'a str,
    receiver_id: Option<i64>,
    receiver_name: &'a str,
    amount: i64,
    reference_id: Option<i64>,
    description: &'a str,
}

#[derive(Serialize)]
struct BalanceRecord<'a> {
    id: i64,
    name: &'a str,
    email: &'a str,
    role: &'static str,
    coin_balance: i64,
}

/// Write transactions as CSV, resolving party names from `profiles`
///
/// A missing sender is written as `minted`, a missing receiver as `retired`.
pub fn write_transactions<W: Write>(
    writer: W,
    transactions: &[Transaction],
    profiles: &[Profile],
) -> Result<usize, BulkError> {
    let names: HashMap<i64, &str> = profiles.iter().map(|p| (p.id, p.name.as_str())).collect();
    let name_of = |id: Option<i64>, absent: &'static str| match id {
        Some(id) => names.get(&id).copied().unwrap_or("unknown"),
        None => absent,
    };

    let mut csv = csv::Writer::from_writer(writer);
    for t in transactions {
        csv.serialize(TransactionRecord {
            id: t.id,
            created_at: t.created_at.to_rfc3339(),
            transaction_type: t.transaction_type.as_str(),
            sender_id: t.sender_id,
            sender_name: name_of(t.sender_id, "minted"),
            receiver_id: t.receiver_id,
            receiver_name: name_of(t.receiver_id, "retired"),
            amount: t.amount,
            reference_id: t.reference_id,
            description: t.description.as_deref().unwrap_or(""),
        })?;
    }
    csv.flush()?;
    Ok(transactions.len())
}

/// Write one row per profile with its balance
pub fn write_balances<W: Write>(writer: W, profiles: &[Profile]) -> Result<usize, BulkError> {
    let mut csv = csv::Writer::from_writer(writer);
    for p in profiles {
        csv.serialize(BalanceRecord {
            id: p.id,
            name: &p.name,
            email: &p.email,
            role: p.role.as_str(),
            coin_balance: p.coin_balance,
        })?;
    }
    csv.flush()?;
    Ok(profiles.len())
}

/// Transactions of a school in `[since, until)`, oldest first, as CSV bytes
pub fn export_transactions(
    store: &Store,
    school_id: i64,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> Result<Vec<u8>, BulkError> {
    let filter = TransactionFilter {
        since,
        until,
        ..TransactionFilter::school(school_id)
    };
    let mut transactions = store.list_transactions(&filter)?;
    transactions.reverse();
    let profiles = store.list_profiles(school_id, None)?;

    let mut buf = Vec::new();
    let rows = write_transactions(&mut buf, &transactions, &profiles)?;
    tracing::info!(school_id, rows, "Exported transactions");
    Ok(buf)
}

/// Profile balances of a school as CSV bytes
pub fn export_balances(store: &Store, school_id: i64) -> Result<Vec<u8>, BulkError> {
    let profiles = store.list_profiles(school_id, None)?;

    let mut buf = Vec::new();
    let rows = write_balances(&mut buf, &profiles)?;
    tracing::info!(school_id, rows, "Exported balances");
    Ok(buf)
}

/// Parse an export bound: `now`, `now-<n><h|d|w|m>`, RFC 3339, or `YYYY-MM-DD`
pub fn parse_time_bound(s: &str) -> Result<DateTime<Utc>, BulkError> {
    let s = s.trim();

    if s.starts_with("now") {
        let now = Utc::now();
        if s == "now" {
            return Ok(now);
        }

        let re = Regex::new(r"^now-(\d+)([hdwm])$")
            .map_err(|e| BulkError::InvalidTime(e.to_string()))?;
        let caps = re
            .captures(s)
            .ok_or_else(|| BulkError::InvalidTime(s.to_string()))?;
        let amount: i64 = caps[1]
            .parse()
            .map_err(|_| BulkError::InvalidTime(s.to_string()))?;

        let span = match &caps[2] {
            "h" => Duration::try_hours(amount),
            "d" => Duration::try_days(amount),
            "w" => Duration::try_weeks(amount),
            _ => Duration::try_days(amount.saturating_mul(30)),
        };
        return span
            .and_then(|d| now.checked_sub_signed(d))
            .ok_or_else(|| BulkError::InvalidTime(s.to_string()));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc());
        }
    }

    Err(BulkError::InvalidTime(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::profiles::tests::add_profile;
    use crate::store::schools::tests::new_school;
    use crate::store::Role;

    #[test]
    fn test_export_transactions() {
        let store = Store::open_in_memory().unwrap();
        let school = store.create_school(new_school(None)).unwrap();
        let ada = add_profile(&store, Some(school.id), "Ada", Role::Student);
        let bob = add_profile(&store, Some(school.id), "Bob", Role::Student);
        store
            .adjust_balance(school.id, ada.id, 40, Some("Welcome, class".to_string()))
            .unwrap();
        store.transfer(ada.id, bob.id, 15, None).unwrap();

        let csv = String::from_utf8(export_transactions(&store, school.id, None, None).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("id,created_at,transaction_type,sender_id"));
        assert!(lines[1].contains("adjustment,,minted,"));
        assert!(lines[1].contains("\"Welcome, class\""));
        assert!(lines[2].contains("p2p_transfer"));
        assert!(lines[2].contains(",Ada,"));
        assert!(lines[2].contains(",Bob,15,"));
    }

    #[test]
    fn test_export_time_range() {
        let store = Store::open_in_memory().unwrap();
        let school = store.create_school(new_school(None)).unwrap();
        let ada = add_profile(&store, Some(school.id), "Ada", Role::Student);
        store.adjust_balance(school.id, ada.id, 10, None).unwrap();

        let future = Utc::now() + Duration::hours(1);
        let csv = export_transactions(&store, school.id, Some(future), None).unwrap();
        assert_eq!(String::from_utf8(csv).unwrap().lines().count(), 0);
    }

    #[test]
    fn test_export_balances() {
        let store = Store::open_in_memory().unwrap();
        let school = store.create_school(new_school(None)).unwrap();
        let ada = add_profile(&store, Some(school.id), "Ada", Role::Student);
        store.adjust_balance(school.id, ada.id, 25, None).unwrap();

        let csv = String::from_utf8(export_balances(&store, school.id).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "id,name,email,role,coin_balance");
        assert_eq!(lines[1], format!("{},Ada,ada@example.com,student,25", ada.id));
    }

    #[test]
    fn test_parse_time_bound() {
        let now = Utc::now();
        let week_ago = parse_time_bound("now-7d").unwrap();
        assert!((now - week_ago - Duration::days(7)).num_seconds().abs() < 5);

        let date = parse_time_bound("2024-09-01").unwrap();
        assert_eq!(date.to_rfc3339(), "2024-09-01T00:00:00+00:00");

        assert!(parse_time_bound("2024-09-01T08:30:00Z").is_ok());
        assert!(parse_time_bound("now-3y").is_err());
        assert!(parse_time_bound("yesterday").is_err());
    }
}

//! Schema migrations
//!
//! Each migration is applied once, in order, and recorded in
//! `schema_migrations`. Statements are idempotent so a crash between
//! applying and recording is harmless.

use rusqlite::{params, Connection};

use crate::store::error::StoreResult;

/// Ordered list of (version, SQL) pairs
const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "
        CREATE TABLE IF NOT EXISTS schools (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            coin_name TEXT NOT NULL,
            coin_symbol TEXT NOT NULL,
            max_supply INTEGER CHECK (max_supply IS NULL OR max_supply >= 0),
            current_supply INTEGER NOT NULL DEFAULT 0 CHECK (current_supply >= 0),
            created_at TEXT NOT NULL,
            CHECK (max_supply IS NULL OR current_supply <= max_supply)
        );

        CREATE TABLE IF NOT EXISTS profiles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            school_id INTEGER REFERENCES schools(id),
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE COLLATE NOCASE,
            role TEXT NOT NULL CHECK (role IN ('student', 'teacher', 'admin', 'super_admin')),
            coin_balance INTEGER NOT NULL DEFAULT 0 CHECK (coin_balance >= 0),
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL,
            CHECK (school_id IS NOT NULL OR role = 'super_admin')
        );
        CREATE INDEX IF NOT EXISTS idx_profiles_school ON profiles(school_id, role);

        CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            profile_id INTEGER NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS classes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            school_id INTEGER NOT NULL REFERENCES schools(id),
            teacher_id INTEGER NOT NULL REFERENCES profiles(id),
            name TEXT NOT NULL,
            description TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_classes_teacher ON classes(teacher_id);

        CREATE TABLE IF NOT EXISTS class_enrollments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            class_id INTEGER NOT NULL REFERENCES classes(id) ON DELETE CASCADE,
            student_id INTEGER NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
            enrolled_at TEXT NOT NULL,
            UNIQUE (class_id, student_id)
        );

        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            school_id INTEGER NOT NULL REFERENCES schools(id),
            sender_id INTEGER REFERENCES profiles(id),
            receiver_id INTEGER REFERENCES profiles(id),
            amount INTEGER NOT NULL CHECK (amount > 0),
            transaction_type TEXT NOT NULL,
            reference_id INTEGER,
            description TEXT,
            created_at TEXT NOT NULL,
            CHECK (sender_id IS NOT NULL OR receiver_id IS NOT NULL)
        );
        CREATE INDEX IF NOT EXISTS idx_transactions_school ON transactions(school_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_transactions_sender ON transactions(sender_id);
        CREATE INDEX IF NOT EXISTS idx_transactions_receiver ON transactions(receiver_id);

        CREATE TABLE IF NOT EXISTS achievement_types (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            school_id INTEGER NOT NULL REFERENCES schools(id),
            name TEXT NOT NULL,
            description TEXT,
            coin_value INTEGER NOT NULL CHECK (coin_value > 0),
            created_at TEXT NOT NULL,
            UNIQUE (school_id, name)
        );

        CREATE TABLE IF NOT EXISTS achievements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL REFERENCES profiles(id),
            teacher_id INTEGER NOT NULL REFERENCES profiles(id),
            achievement_type_id INTEGER NOT NULL REFERENCES achievement_types(id),
            description TEXT,
            transaction_id INTEGER NOT NULL REFERENCES transactions(id),
            awarded_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_achievements_student ON achievements(student_id);
        ",
    ),
    (
        2,
        "
        CREATE TABLE IF NOT EXISTS marketplace_categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            school_id INTEGER NOT NULL REFERENCES schools(id),
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (school_id, name)
        );

        CREATE TABLE IF NOT EXISTS marketplace_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            school_id INTEGER NOT NULL REFERENCES schools(id),
            category_id INTEGER REFERENCES marketplace_categories(id) ON DELETE SET NULL,
            name TEXT NOT NULL,
            description TEXT,
            price INTEGER NOT NULL CHECK (price > 0),
            stock INTEGER NOT NULL CHECK (stock >= 0),
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_items_school ON marketplace_items(school_id, active);

        CREATE TABLE IF NOT EXISTS marketplace_purchases (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id INTEGER NOT NULL REFERENCES marketplace_items(id),
            student_id INTEGER NOT NULL REFERENCES profiles(id),
            quantity INTEGER NOT NULL CHECK (quantity > 0),
            total_price INTEGER NOT NULL,
            transaction_id INTEGER NOT NULL REFERENCES transactions(id),
            purchased_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_purchases_student ON marketplace_purchases(student_id);

        CREATE TABLE IF NOT EXISTS exchange_listings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            school_id INTEGER NOT NULL REFERENCES schools(id),
            seller_id INTEGER NOT NULL REFERENCES profiles(id),
            title TEXT NOT NULL,
            description TEXT,
            price INTEGER NOT NULL CHECK (price > 0),
            status TEXT NOT NULL DEFAULT 'open',
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_listings_school ON exchange_listings(school_id, status);

        CREATE TABLE IF NOT EXISTS exchange_offers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            listing_id INTEGER NOT NULL REFERENCES exchange_listings(id),
            buyer_id INTEGER NOT NULL REFERENCES profiles(id),
            amount INTEGER NOT NULL CHECK (amount > 0),
            message TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            transaction_id INTEGER REFERENCES transactions(id),
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_offers_listing ON exchange_offers(listing_id, status);
        ",
    ),
];

/// Latest schema version known to this build
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|(v, _)| *v).unwrap_or(0)
}

/// Apply all pending migrations, returns the number applied
pub fn migrate(conn: &mut Connection) -> StoreResult<usize> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    let mut applied = 0;
    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, chrono::Utc::now()],
        )?;
        tx.commit()?;

        tracing::info!(version, "Applied schema migration");
        applied += 1;
    }

    Ok(applied)
}

/// Version currently recorded in the database
pub fn current_version(conn: &Connection) -> StoreResult<i64> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();

        let first = migrate(&mut conn).unwrap();
        assert_eq!(first, MIGRATIONS.len());

        let second = migrate(&mut conn).unwrap();
        assert_eq!(second, 0);

        assert_eq!(current_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn test_negative_balance_rejected_by_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let result = conn.execute(
            "INSERT INTO profiles (school_id, name, email, role, coin_balance, password_hash, created_at)
             VALUES (NULL, 'root', 'root@example.com', 'super_admin', -1, 'x', '2024-01-01')",
            [],
        );
        assert!(result.is_err());
    }
}

//! Bearer-token sessions

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::auth;
use crate::store::database::Store;
use crate::store::error::StoreResult;
use crate::store::profiles::load_profile;
use crate::store::types::Profile;

/// An issued session token
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Session {
    pub token: String,
    pub profile_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Store {
    /// Issue a new token for `profile_id` valid for `ttl`
    pub fn create_session(&self, profile_id: i64, ttl: Duration) -> StoreResult<Session> {
        let now = Utc::now();
        let session = Session {
            token: auth::generate_token(),
            profile_id,
            created_at: now,
            expires_at: now + ttl,
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (token, profile_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    session.token,
                    session.profile_id,
                    session.created_at,
                    session.expires_at
                ],
            )?;
            Ok(())
        })?;

        Ok(session)
    }

    /// Resolve a token to its profile; expired tokens are deleted and yield `None`
    pub fn resolve_session(&self, token: &str) -> StoreResult<Option<Profile>> {
        self.with_conn(|conn| {
            let found: Option<(i64, DateTime<Utc>)> = conn
                .query_row(
                    "SELECT profile_id, expires_at FROM sessions WHERE token = ?1",
                    params![token],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match found {
                Some((profile_id, expires_at)) if expires_at > Utc::now() => {
                    load_profile(conn, profile_id).map(Some)
                }
                Some(_) => {
                    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
                    Ok(None)
                }
                None => Ok(None),
            }
        })
    }

    /// Revoke one token, returns whether it existed
    pub fn delete_session(&self, token: &str) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
            Ok(changed > 0)
        })
    }

    /// Drop every expired token, returns how many were removed
    pub fn purge_expired_sessions(&self) -> StoreResult<usize> {
        let removed = self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                params![Utc::now()],
            )?;
            Ok(n)
        })?;

        if removed > 0 {
            tracing::debug!(removed, "Purged expired sessions");
        }
        Ok(removed)
    }
}

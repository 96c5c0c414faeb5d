//! Schools and their coin supply

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Deserializer};

use crate::store::database::Store;
use crate::store::error::{StoreError, StoreResult};
use crate::store::types::School;

const SCHOOL_COLUMNS: &str =
    "id, name, coin_name, coin_symbol, max_supply, current_supply, created_at";

/// Maximum length of a coin symbol
const MAX_SYMBOL_LEN: usize = 8;

/// Fields for creating a school
#[derive(Debug, Clone, Deserialize)]
pub struct NewSchool {
    pub name: String,
    pub coin_name: String,
    pub coin_symbol: String,
    #[serde(default)]
    pub max_supply: Option<i64>,
}

/// Fields that may change on a school; `None` keeps the current value
///
/// `max_supply` distinguishes an absent field (keep) from an explicit
/// `null` (`Some(None)`, remove the cap).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchoolUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub coin_name: Option<String>,
    #[serde(default)]
    pub coin_symbol: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub max_supply: Option<Option<i64>>,
}

/// Any value that is present, `null` included, becomes `Some`
fn present<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<i64>::deserialize(deserializer).map(Some)
}

fn school_from_row(row: &Row<'_>) -> rusqlite::Result<School> {
    Ok(School {
        id: row.get("id")?,
        name: row.get("name")?,
        coin_name: row.get("coin_name")?,
        coin_symbol: row.get("coin_symbol")?,
        max_supply: row.get("max_supply")?,
        current_supply: row.get("current_supply")?,
        created_at: row.get("created_at")?,
    })
}

/// Load a school inside an existing connection or transaction
pub(crate) fn load_school(conn: &Connection, id: i64) -> StoreResult<School> {
    conn.query_row(
        &format!("SELECT {} FROM schools WHERE id = ?1", SCHOOL_COLUMNS),
        params![id],
        school_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("School", id))
}

fn validate_coin(coin_name: &str, coin_symbol: &str) -> StoreResult<()> {
    if coin_name.trim().is_empty() {
        return Err(StoreError::Validation("Coin name cannot be empty".to_string()));
    }
    let symbol = coin_symbol.trim();
    if symbol.is_empty() || symbol.len() > MAX_SYMBOL_LEN {
        return Err(StoreError::Validation(format!(
            "Coin symbol must be 1 to {} characters",
            MAX_SYMBOL_LEN
        )));
    }
    Ok(())
}

impl Store {
    /// Create a school with an empty supply
    pub fn create_school(&self, new: NewSchool) -> StoreResult<School> {
        if new.name.trim().is_empty() {
            return Err(StoreError::Validation("School name cannot be empty".to_string()));
        }
        validate_coin(&new.coin_name, &new.coin_symbol)?;
        if matches!(new.max_supply, Some(max) if max < 0) {
            return Err(StoreError::Validation("Max supply cannot be negative".to_string()));
        }

        let school = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO schools (name, coin_name, coin_symbol, max_supply, current_supply, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                params![
                    new.name.trim(),
                    new.coin_name.trim(),
                    new.coin_symbol.trim().to_uppercase(),
                    new.max_supply,
                    Utc::now()
                ],
            )?;
            load_school(conn, conn.last_insert_rowid())
        })?;

        tracing::info!(school_id = school.id, name = %school.name, "Created school");
        Ok(school)
    }

    pub fn get_school(&self, id: i64) -> StoreResult<School> {
        self.with_conn(|conn| load_school(conn, id))
    }

    pub fn list_schools(&self) -> StoreResult<Vec<School>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM schools ORDER BY name",
                SCHOOL_COLUMNS
            ))?;
            let schools = stmt
                .query_map([], school_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(schools)
        })
    }

    /// Apply an update; the supply cap may never drop below what is in circulation
    pub fn update_school(&self, id: i64, update: SchoolUpdate) -> StoreResult<School> {
        self.with_tx(|tx| {
            let mut school = load_school(tx, id)?;

            if let Some(name) = update.name {
                if name.trim().is_empty() {
                    return Err(StoreError::Validation("School name cannot be empty".to_string()));
                }
                school.name = name.trim().to_string();
            }
            if let Some(coin_name) = update.coin_name {
                school.coin_name = coin_name.trim().to_string();
            }
            if let Some(symbol) = update.coin_symbol {
                school.coin_symbol = symbol.trim().to_uppercase();
            }
            validate_coin(&school.coin_name, &school.coin_symbol)?;

            match update.max_supply {
                Some(Some(max)) if max < school.current_supply => {
                    return Err(StoreError::Validation(format!(
                        "Max supply {} is below current supply {}",
                        max, school.current_supply
                    )));
                }
                Some(max) => school.max_supply = max,
                None => {}
            }

            tx.execute(
                "UPDATE schools SET name = ?1, coin_name = ?2, coin_symbol = ?3, max_supply = ?4
                 WHERE id = ?5",
                params![
                    school.name,
                    school.coin_name,
                    school.coin_symbol,
                    school.max_supply,
                    id
                ],
            )?;

            Ok(school)
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::profiles::tests::add_profile;
    use crate::store::types::{NewTransaction, Role, TransactionType};

    pub(crate) fn new_school(max_supply: Option<i64>) -> NewSchool {
        NewSchool {
            name: "Riverside Elementary".to_string(),
            coin_name: "River Coin".to_string(),
            coin_symbol: "rvc".to_string(),
            max_supply,
        }
    }

    #[test]
    fn test_create_and_get_school() {
        let store = Store::open_in_memory().unwrap();
        let school = store.create_school(new_school(Some(1000))).unwrap();

        assert_eq!(school.coin_symbol, "RVC");
        assert_eq!(school.current_supply, 0);

        let loaded = store.get_school(school.id).unwrap();
        assert_eq!(loaded, school);
        assert_eq!(store.list_schools().unwrap().len(), 1);
    }

    #[test]
    fn test_create_school_validation() {
        let store = Store::open_in_memory().unwrap();

        let mut bad = new_school(None);
        bad.coin_symbol = "TOOLONGSYMBOL".to_string();
        assert!(matches!(
            store.create_school(bad),
            Err(StoreError::Validation(_))
        ));

        let mut bad = new_school(None);
        bad.name = "  ".to_string();
        assert!(store.create_school(bad).is_err());
    }

    #[test]
    fn test_missing_school() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.get_school(99),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_update_school() {
        let store = Store::open_in_memory().unwrap();
        let school = store.create_school(new_school(None)).unwrap();

        let updated = store
            .update_school(
                school.id,
                SchoolUpdate {
                    coin_symbol: Some("owl".to_string()),
                    max_supply: Some(Some(500)),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.coin_symbol, "OWL");
        assert_eq!(updated.max_supply, Some(500));
        assert_eq!(updated.name, school.name);
    }

    #[test]
    fn test_max_supply_null_removes_cap() {
        let store = Store::open_in_memory().unwrap();
        let school = store.create_school(new_school(Some(100))).unwrap();

        let keep: SchoolUpdate = serde_json::from_str(r#"{"coin_name": "Owl Coin"}"#).unwrap();
        assert_eq!(keep.max_supply, None);
        let kept = store.update_school(school.id, keep).unwrap();
        assert_eq!(kept.max_supply, Some(100));

        let clear: SchoolUpdate = serde_json::from_str(r#"{"max_supply": null}"#).unwrap();
        assert_eq!(clear.max_supply, Some(None));
        let cleared = store.update_school(school.id, clear).unwrap();
        assert_eq!(cleared.max_supply, None);
        assert_eq!(store.get_school(school.id).unwrap().max_supply, None);
    }

    #[test]
    fn test_max_supply_below_circulation_rejected() {
        let store = Store::open_in_memory().unwrap();
        let school = store.create_school(new_school(Some(100))).unwrap();
        let ada = add_profile(&store, Some(school.id), "Ada", Role::Student);
        store
            .record_transaction(NewTransaction::mint(school.id, ada.id, 60, TransactionType::Reward))
            .unwrap();

        let result = store.update_school(
            school.id,
            SchoolUpdate {
                max_supply: Some(Some(59)),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(StoreError::Validation(_))));
        assert_eq!(store.get_school(school.id).unwrap().max_supply, Some(100));

        let at_circulation = store
            .update_school(
                school.id,
                SchoolUpdate {
                    max_supply: Some(Some(60)),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(at_circulation.max_supply, Some(60));
    }
}

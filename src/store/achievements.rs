//! Achievement types and awards
//!
//! Awarding mints the type's coin value to the student and records the
//! achievement in the same SQLite transaction, so there is never an
//! achievement without its payout or a payout without its achievement.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;

use crate::store::database::Store;
use crate::store::error::{StoreError, StoreResult};
use crate::store::ledger::apply_transaction;
use crate::store::profiles::{load_member, load_profile};
use crate::store::types::{
    Achievement, AchievementType, NewTransaction, Role, Transaction, TransactionType,
};

const TYPE_COLUMNS: &str = "id, school_id, name, description, coin_value, created_at";
const ACHIEVEMENT_COLUMNS: &str =
    "id, student_id, teacher_id, achievement_type_id, description, transaction_id, awarded_at";

/// Fields for creating an achievement type
#[derive(Debug, Clone, Deserialize)]
pub struct NewAchievementType {
    pub school_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub coin_value: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AchievementTypeUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub coin_value: Option<i64>,
}

/// An award request
#[derive(Debug, Clone, Deserialize)]
pub struct AwardRequest {
    pub teacher_id: i64,
    pub student_id: i64,
    pub achievement_type_id: i64,
    #[serde(default)]
    pub description: Option<String>,
}

fn type_from_row(row: &Row<'_>) -> rusqlite::Result<AchievementType> {
    Ok(AchievementType {
        id: row.get("id")?,
        school_id: row.get("school_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        coin_value: row.get("coin_value")?,
        created_at: row.get("created_at")?,
    })
}

fn achievement_from_row(row: &Row<'_>) -> rusqlite::Result<Achievement> {
    Ok(Achievement {
        id: row.get("id")?,
        student_id: row.get("student_id")?,
        teacher_id: row.get("teacher_id")?,
        achievement_type_id: row.get("achievement_type_id")?,
        description: row.get("description")?,
        transaction_id: row.get("transaction_id")?,
        awarded_at: row.get("awarded_at")?,
    })
}

fn load_type(conn: &Connection, id: i64) -> StoreResult<AchievementType> {
    conn.query_row(
        &format!("SELECT {} FROM achievement_types WHERE id = ?1", TYPE_COLUMNS),
        params![id],
        type_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("Achievement type", id))
}

fn load_achievement(conn: &Connection, id: i64) -> StoreResult<Achievement> {
    conn.query_row(
        &format!("SELECT {} FROM achievements WHERE id = ?1", ACHIEVEMENT_COLUMNS),
        params![id],
        achievement_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("Achievement", id))
}

fn validate_coin_value(value: i64) -> StoreResult<()> {
    if value <= 0 {
        return Err(StoreError::Validation(
            "Coin value must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

impl Store {
    pub fn create_achievement_type(&self, new: NewAchievementType) -> StoreResult<AchievementType> {
        if new.name.trim().is_empty() {
            return Err(StoreError::Validation(
                "Achievement name cannot be empty".to_string(),
            ));
        }
        validate_coin_value(new.coin_value)?;

        self.with_conn(|conn| {
            crate::store::schools::load_school(conn, new.school_id)?;
            conn.execute(
                "INSERT INTO achievement_types (school_id, name, description, coin_value, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    new.school_id,
                    new.name.trim(),
                    new.description,
                    new.coin_value,
                    Utc::now()
                ],
            )
            .map_err(|e| {
                StoreError::from_constraint(
                    e,
                    format!("Achievement type '{}' already exists", new.name.trim()),
                )
            })?;
            load_type(conn, conn.last_insert_rowid())
        })
    }

    pub fn get_achievement_type(&self, id: i64) -> StoreResult<AchievementType> {
        self.with_conn(|conn| load_type(conn, id))
    }

    pub fn list_achievement_types(&self, school_id: i64) -> StoreResult<Vec<AchievementType>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM achievement_types WHERE school_id = ?1 ORDER BY name",
                TYPE_COLUMNS
            ))?;
            let types = stmt
                .query_map(params![school_id], type_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(types)
        })
    }

    /// Change a type; past awards keep the value they were paid
    pub fn update_achievement_type(
        &self,
        id: i64,
        update: AchievementTypeUpdate,
    ) -> StoreResult<AchievementType> {
        self.with_tx(|tx| {
            let mut kind = load_type(tx, id)?;
            if let Some(name) = update.name {
                if name.trim().is_empty() {
                    return Err(StoreError::Validation(
                        "Achievement name cannot be empty".to_string(),
                    ));
                }
                kind.name = name.trim().to_string();
            }
            if let Some(description) = update.description {
                kind.description = Some(description);
            }
            if let Some(value) = update.coin_value {
                validate_coin_value(value)?;
                kind.coin_value = value;
            }

            tx.execute(
                "UPDATE achievement_types SET name = ?1, description = ?2, coin_value = ?3
                 WHERE id = ?4",
                params![kind.name, kind.description, kind.coin_value, id],
            )
            .map_err(|e| {
                StoreError::from_constraint(e, format!("Achievement type '{}' already exists", kind.name))
            })?;
            Ok(kind)
        })
    }

    /// Delete a type that has never been awarded
    pub fn delete_achievement_type(&self, id: i64) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn
                .execute("DELETE FROM achievement_types WHERE id = ?1", params![id])
                .map_err(|e| {
                    StoreError::from_constraint(
                        e,
                        format!("Achievement type {} has already been awarded", id),
                    )
                })?;
            if changed == 0 {
                return Err(StoreError::not_found("Achievement type", id));
            }
            Ok(())
        })
    }

    /// Award an achievement: mint its coins to the student and record it
    pub fn award_achievement(&self, request: AwardRequest) -> StoreResult<(Achievement, Transaction)> {
        let (achievement, transaction) = self.with_tx(|tx| {
            let kind = load_type(tx, request.achievement_type_id)?;
            let teacher = load_profile(tx, request.teacher_id)?;
            if teacher.role != Role::SuperAdmin && teacher.school_id != Some(kind.school_id) {
                return Err(StoreError::Validation(format!(
                    "Profile {} does not belong to school {}",
                    teacher.id, kind.school_id
                )));
            }
            if !teacher.role.can_award() {
                return Err(StoreError::Validation(format!(
                    "Profile {} cannot award achievements",
                    teacher.id
                )));
            }
            let student = load_member(tx, request.student_id, kind.school_id)?;
            if student.role != Role::Student {
                return Err(StoreError::Validation(format!(
                    "Profile {} is not a student",
                    student.id
                )));
            }

            let payout = NewTransaction::mint(
                kind.school_id,
                student.id,
                kind.coin_value,
                TransactionType::Reward,
            )
            .reference(kind.id)
            .description(format!("{} (awarded by {})", kind.name, teacher.name));
            let transaction = apply_transaction(tx, &payout)?;

            tx.execute(
                "INSERT INTO achievements
                    (student_id, teacher_id, achievement_type_id, description, transaction_id, awarded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    student.id,
                    teacher.id,
                    kind.id,
                    request.description,
                    transaction.id,
                    Utc::now()
                ],
            )?;
            let achievement = load_achievement(tx, tx.last_insert_rowid())?;

            Ok((achievement, transaction))
        })?;

        tracing::info!(
            achievement_id = achievement.id,
            student_id = achievement.student_id,
            teacher_id = achievement.teacher_id,
            coins = transaction.amount,
            "Awarded achievement"
        );
        Ok((achievement, transaction))
    }

    /// Achievements of one student, newest first
    pub fn list_student_achievements(&self, student_id: i64) -> StoreResult<Vec<Achievement>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM achievements WHERE student_id = ?1 ORDER BY id DESC",
                ACHIEVEMENT_COLUMNS
            ))?;
            let achievements = stmt
                .query_map(params![student_id], achievement_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(achievements)
        })
    }

    /// Achievements awarded in a school, newest first
    pub fn list_school_achievements(&self, school_id: i64, limit: usize) -> StoreResult<Vec<Achievement>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT a.id AS id, a.student_id AS student_id, a.teacher_id AS teacher_id,
                        a.achievement_type_id AS achievement_type_id, a.description AS description,
                        a.transaction_id AS transaction_id, a.awarded_at AS awarded_at
                 FROM achievements a
                 JOIN achievement_types t ON t.id = a.achievement_type_id
                 WHERE t.school_id = ?1
                 ORDER BY a.id DESC
                 LIMIT ?2",
            )?;
            let achievements = stmt
                .query_map(
                    params![school_id, i64::try_from(limit).unwrap_or(i64::MAX)],
                    achievement_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(achievements)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::profiles::tests::add_profile;
    use crate::store::schools::tests::new_school;

    struct Fixture {
        store: Store,
        school_id: i64,
        teacher_id: i64,
        student_id: i64,
        type_id: i64,
    }

    fn fixture(max_supply: Option<i64>) -> Fixture {
        let store = Store::open_in_memory().unwrap();
        let school = store.create_school(new_school(max_supply)).unwrap();
        let teacher = add_profile(&store, Some(school.id), "Mr Kim", Role::Teacher);
        let student = add_profile(&store, Some(school.id), "Ada", Role::Student);
        let kind = store
            .create_achievement_type(NewAchievementType {
                school_id: school.id,
                name: "Perfect attendance".to_string(),
                description: None,
                coin_value: 25,
            })
            .unwrap();

        Fixture {
            store,
            school_id: school.id,
            teacher_id: teacher.id,
            student_id: student.id,
            type_id: kind.id,
        }
    }

    fn award(f: &Fixture) -> StoreResult<(Achievement, Transaction)> {
        f.store.award_achievement(AwardRequest {
            teacher_id: f.teacher_id,
            student_id: f.student_id,
            achievement_type_id: f.type_id,
            description: Some("All of March".to_string()),
        })
    }

    #[test]
    fn test_award_pays_student() {
        let f = fixture(None);
        let (achievement, transaction) = award(&f).unwrap();

        assert_eq!(achievement.transaction_id, transaction.id);
        assert_eq!(transaction.amount, 25);
        assert_eq!(transaction.sender_id, None);
        assert_eq!(transaction.reference_id, Some(f.type_id));
        assert_eq!(f.store.get_profile(f.student_id).unwrap().coin_balance, 25);
        assert_eq!(
            f.store.list_student_achievements(f.student_id).unwrap().len(),
            1
        );
        assert_eq!(
            f.store.list_school_achievements(f.school_id, 10).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_failed_payout_leaves_no_achievement() {
        let f = fixture(Some(30));
        award(&f).unwrap();

        assert!(matches!(award(&f), Err(StoreError::SupplyExceeded { .. })));
        assert_eq!(
            f.store.list_student_achievements(f.student_id).unwrap().len(),
            1
        );
        assert_eq!(f.store.get_profile(f.student_id).unwrap().coin_balance, 25);
    }

    #[test]
    fn test_students_cannot_award() {
        let f = fixture(None);
        let result = f.store.award_achievement(AwardRequest {
            teacher_id: f.student_id,
            student_id: f.student_id,
            achievement_type_id: f.type_id,
            description: None,
        });
        assert!(matches!(result, Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_super_admin_awards_any_school() {
        let f = fixture(None);
        let root = add_profile(&f.store, None, "Root", Role::SuperAdmin);

        let (achievement, transaction) = f
            .store
            .award_achievement(AwardRequest {
                teacher_id: root.id,
                student_id: f.student_id,
                achievement_type_id: f.type_id,
                description: None,
            })
            .unwrap();
        assert_eq!(achievement.teacher_id, root.id);
        assert_eq!(transaction.school_id, f.school_id);
        assert_eq!(f.store.get_profile(f.student_id).unwrap().coin_balance, 25);
    }

    #[test]
    fn test_teacher_of_other_school_cannot_award() {
        let f = fixture(None);
        let other = f.store.create_school(new_school(None)).unwrap();
        let outsider = add_profile(&f.store, Some(other.id), "Ms Lee", Role::Teacher);

        let result = f.store.award_achievement(AwardRequest {
            teacher_id: outsider.id,
            student_id: f.student_id,
            achievement_type_id: f.type_id,
            description: None,
        });
        assert!(matches!(result, Err(StoreError::Validation(_))));
        assert_eq!(f.store.get_profile(f.student_id).unwrap().coin_balance, 0);
    }

    #[test]
    fn test_type_crud() {
        let f = fixture(None);

        let updated = f
            .store
            .update_achievement_type(
                f.type_id,
                AchievementTypeUpdate {
                    coin_value: Some(40),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.coin_value, 40);
        assert!(f
            .store
            .update_achievement_type(
                f.type_id,
                AchievementTypeUpdate {
                    coin_value: Some(0),
                    ..Default::default()
                }
            )
            .is_err());

        award(&f).unwrap();
        assert!(matches!(
            f.store.delete_achievement_type(f.type_id),
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(f.store.list_achievement_types(f.school_id).unwrap().len(), 1);
    }
}

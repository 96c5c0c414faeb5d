//! Profiles: students, teachers and admins

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;

use crate::auth;
use crate::store::database::Store;
use crate::store::error::{StoreError, StoreResult};
use crate::store::schools::load_school;
use crate::store::types::{Profile, Role};

pub(crate) const PROFILE_COLUMNS: &str =
    "id, school_id, name, email, role, coin_balance, password_hash, created_at";

/// Fields for creating a profile
#[derive(Debug, Clone, Deserialize)]
pub struct NewProfile {
    /// Must be `None` for super admins and `Some` for everyone else
    #[serde(default)]
    pub school_id: Option<i64>,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub password: String,
}

/// Fields that may change on a profile
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

pub(crate) fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: row.get("id")?,
        school_id: row.get("school_id")?,
        name: row.get("name")?,
        email: row.get("email")?,
        role: row.get("role")?,
        coin_balance: row.get("coin_balance")?,
        password_hash: row.get("password_hash")?,
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn load_profile(conn: &Connection, id: i64) -> StoreResult<Profile> {
    conn.query_row(
        &format!("SELECT {} FROM profiles WHERE id = ?1", PROFILE_COLUMNS),
        params![id],
        profile_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("Profile", id))
}

/// Load a profile and check it belongs to `school_id`
pub(crate) fn load_member(conn: &Connection, id: i64, school_id: i64) -> StoreResult<Profile> {
    let profile = load_profile(conn, id)?;
    if profile.school_id != Some(school_id) {
        return Err(StoreError::Validation(format!(
            "Profile {} does not belong to school {}",
            id, school_id
        )));
    }
    Ok(profile)
}

/// A role change may not leave classes without a teacher or non-students enrolled
fn check_role_change(conn: &Connection, id: i64, role: Role) -> StoreResult<()> {
    if !role.can_award() {
        let classes: i64 = conn.query_row(
            "SELECT COUNT(*) FROM classes WHERE teacher_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        if classes > 0 {
            return Err(StoreError::Conflict(format!(
                "Profile {} still teaches {} class(es)",
                id, classes
            )));
        }
    }
    if role != Role::Student {
        let enrollments: i64 = conn.query_row(
            "SELECT COUNT(*) FROM class_enrollments WHERE student_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        if enrollments > 0 {
            return Err(StoreError::Conflict(format!(
                "Profile {} is still enrolled in {} class(es)",
                id, enrollments
            )));
        }
    }
    Ok(())
}

fn validate_new_profile(new: &NewProfile) -> StoreResult<()> {
    if new.name.trim().is_empty() {
        return Err(StoreError::Validation("Name cannot be empty".to_string()));
    }
    let email = new.email.trim();
    if email.len() > 254 || !email.contains('@') || email.starts_with('@') || email.ends_with('@')
    {
        return Err(StoreError::Validation(format!("Invalid email: {}", new.email)));
    }
    match (new.role, new.school_id) {
        (Role::SuperAdmin, Some(_)) => Err(StoreError::Validation(
            "Super admins are not attached to a school".to_string(),
        )),
        (Role::SuperAdmin, None) => Ok(()),
        (_, None) => Err(StoreError::Validation(
            "A school is required for this role".to_string(),
        )),
        (_, Some(_)) => Ok(()),
    }
}

/// Insert a profile row with an already hashed password
pub(crate) fn insert_profile(
    conn: &Connection,
    new: &NewProfile,
    password_hash: &str,
) -> StoreResult<Profile> {
    validate_new_profile(new)?;
    if let Some(school_id) = new.school_id {
        load_school(conn, school_id)?;
    }

    let email = new.email.trim().to_lowercase();
    conn.execute(
        "INSERT INTO profiles (school_id, name, email, role, coin_balance, password_hash, created_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
        params![
            new.school_id,
            new.name.trim(),
            email,
            new.role,
            password_hash,
            Utc::now()
        ],
    )
    .map_err(|e| StoreError::from_constraint(e, format!("Email already registered: {}", email)))?;

    load_profile(conn, conn.last_insert_rowid())
}

impl Store {
    /// Create a profile, hashing its password
    pub fn create_profile(&self, new: NewProfile) -> StoreResult<Profile> {
        auth::validate_password(&new.password)?;
        validate_new_profile(&new)?;
        let hash = auth::hash_password(&new.password)?;
        self.create_profile_hashed(&new, &hash)
    }

    /// Create a profile from a precomputed password hash
    pub fn create_profile_hashed(&self, new: &NewProfile, password_hash: &str) -> StoreResult<Profile> {
        let profile = self.with_conn(|conn| insert_profile(conn, new, password_hash))?;
        tracing::info!(
            profile_id = profile.id,
            role = %profile.role,
            school_id = ?profile.school_id,
            "Created profile"
        );
        Ok(profile)
    }

    pub fn get_profile(&self, id: i64) -> StoreResult<Profile> {
        self.with_conn(|conn| load_profile(conn, id))
    }

    pub fn find_profile_by_email(&self, email: &str) -> StoreResult<Option<Profile>> {
        self.with_conn(|conn| {
            let profile = conn
                .query_row(
                    &format!("SELECT {} FROM profiles WHERE email = ?1", PROFILE_COLUMNS),
                    params![email.trim().to_lowercase()],
                    profile_from_row,
                )
                .optional()?;
            Ok(profile)
        })
    }

    /// List profiles of a school, optionally restricted to one role
    pub fn list_profiles(&self, school_id: i64, role: Option<Role>) -> StoreResult<Vec<Profile>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM profiles
                 WHERE school_id = ?1 AND (?2 IS NULL OR role = ?2)
                 ORDER BY name, id",
                PROFILE_COLUMNS
            ))?;
            let profiles = stmt
                .query_map(params![school_id, role], profile_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(profiles)
        })
    }

    /// Rename a profile or change its role within its school
    pub fn update_profile(&self, id: i64, update: ProfileUpdate) -> StoreResult<Profile> {
        self.with_tx(|tx| {
            let mut profile = load_profile(tx, id)?;

            if let Some(name) = update.name {
                if name.trim().is_empty() {
                    return Err(StoreError::Validation("Name cannot be empty".to_string()));
                }
                profile.name = name.trim().to_string();
            }
            if let Some(role) = update.role {
                if (role == Role::SuperAdmin) != (profile.role == Role::SuperAdmin) {
                    return Err(StoreError::Validation(
                        "Cannot move a profile in or out of super admin".to_string(),
                    ));
                }
                if role != profile.role {
                    check_role_change(tx, id, role)?;
                }
                profile.role = role;
            }

            tx.execute(
                "UPDATE profiles SET name = ?1, role = ?2 WHERE id = ?3",
                params![profile.name, profile.role, id],
            )?;
            Ok(profile)
        })
    }

    /// Replace a profile's password and drop its sessions
    pub fn set_password(&self, id: i64, password: &str) -> StoreResult<()> {
        auth::validate_password(password)?;
        let hash = auth::hash_password(password)?;

        self.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE profiles SET password_hash = ?1 WHERE id = ?2",
                params![hash, id],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found("Profile", id));
            }
            tx.execute("DELETE FROM sessions WHERE profile_id = ?1", params![id])?;
            Ok(())
        })
    }

    /// Delete a profile that has no ledger, class or achievement history
    pub fn delete_profile(&self, id: i64) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn
                .execute("DELETE FROM profiles WHERE id = ?1", params![id])
                .map_err(|e| {
                    StoreError::from_constraint(
                        e,
                        format!("Profile {} still has coin, class or achievement history", id),
                    )
                })?;
            if changed == 0 {
                return Err(StoreError::not_found("Profile", id));
            }
            Ok(())
        })?;

        tracing::info!(profile_id = id, "Deleted profile");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::classes::NewClass;
    use crate::store::schools::tests::new_school;

    /// Insert a profile without paying for Argon2 in every test
    pub(crate) fn add_profile(store: &Store, school_id: Option<i64>, name: &str, role: Role) -> Profile {
        let new = NewProfile {
            school_id,
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
            role,
            password: String::new(),
        };
        store.create_profile_hashed(&new, "unused-hash").unwrap()
    }

    #[test]
    fn test_create_profile_with_password() {
        let store = Store::open_in_memory().unwrap();
        let school = store.create_school(new_school(None)).unwrap();

        let profile = store
            .create_profile(NewProfile {
                school_id: Some(school.id),
                name: "Grace".to_string(),
                email: "Grace@Example.com".to_string(),
                role: Role::Teacher,
                password: "hopper1906".to_string(),
            })
            .unwrap();

        assert_eq!(profile.email, "grace@example.com");
        assert_eq!(profile.coin_balance, 0);
        assert!(auth::verify_password("hopper1906", &profile.password_hash));

        let found = store.find_profile_by_email("GRACE@example.com").unwrap();
        assert_eq!(found.map(|p| p.id), Some(profile.id));
    }

    #[test]
    fn test_duplicate_email_conflicts() {
        let store = Store::open_in_memory().unwrap();
        let school = store.create_school(new_school(None)).unwrap();
        add_profile(&store, Some(school.id), "Ada", Role::Student);

        let dup = NewProfile {
            school_id: Some(school.id),
            name: "Other Ada".to_string(),
            email: "ada@example.com".to_string(),
            role: Role::Student,
            password: String::new(),
        };
        assert!(matches!(
            store.create_profile_hashed(&dup, "x"),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn test_role_school_consistency() {
        let store = Store::open_in_memory().unwrap();
        let school = store.create_school(new_school(None)).unwrap();

        let orphan = NewProfile {
            school_id: None,
            name: "Nobody".to_string(),
            email: "nobody@example.com".to_string(),
            role: Role::Student,
            password: String::new(),
        };
        assert!(matches!(
            store.create_profile_hashed(&orphan, "x"),
            Err(StoreError::Validation(_))
        ));

        let root = add_profile(&store, None, "Root", Role::SuperAdmin);
        assert!(root.can_access_school(school.id));
    }

    #[test]
    fn test_list_and_update_profiles() {
        let store = Store::open_in_memory().unwrap();
        let school = store.create_school(new_school(None)).unwrap();
        let ada = add_profile(&store, Some(school.id), "Ada", Role::Student);
        add_profile(&store, Some(school.id), "Bob", Role::Student);
        add_profile(&store, Some(school.id), "Carol", Role::Teacher);

        assert_eq!(store.list_profiles(school.id, None).unwrap().len(), 3);
        assert_eq!(
            store
                .list_profiles(school.id, Some(Role::Student))
                .unwrap()
                .len(),
            2
        );

        let updated = store
            .update_profile(
                ada.id,
                ProfileUpdate {
                    name: Some("Ada L.".to_string()),
                    role: Some(Role::Teacher),
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Ada L.");
        assert_eq!(updated.role, Role::Teacher);

        let promote = ProfileUpdate {
            role: Some(Role::SuperAdmin),
            ..Default::default()
        };
        assert!(store.update_profile(ada.id, promote).is_err());
    }

    #[test]
    fn test_delete_profile() {
        let store = Store::open_in_memory().unwrap();
        let school = store.create_school(new_school(None)).unwrap();
        let ada = add_profile(&store, Some(school.id), "Ada", Role::Student);

        store.delete_profile(ada.id).unwrap();
        assert!(matches!(
            store.get_profile(ada.id),
            Err(StoreError::NotFound { .. })
        ));
        assert!(store.delete_profile(ada.id).is_err());
    }

    #[test]
    fn test_delete_profile_with_history_conflicts() {
        let store = Store::open_in_memory().unwrap();
        let school = store.create_school(new_school(None)).unwrap();
        let ada = add_profile(&store, Some(school.id), "Ada", Role::Student);
        store.adjust_balance(school.id, ada.id, 5, None).unwrap();

        assert!(matches!(
            store.delete_profile(ada.id),
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.get_profile(ada.id).unwrap().coin_balance, 5);
    }

    #[test]
    fn test_role_change_blocked_by_classes() {
        let store = Store::open_in_memory().unwrap();
        let school = store.create_school(new_school(None)).unwrap();
        let teacher = add_profile(&store, Some(school.id), "Mr Kim", Role::Teacher);
        let ada = add_profile(&store, Some(school.id), "Ada", Role::Student);
        let class = store
            .create_class(NewClass {
                school_id: school.id,
                teacher_id: teacher.id,
                name: "Algebra".to_string(),
                description: None,
            })
            .unwrap();
        store.enroll_student(class.id, ada.id).unwrap();

        let to = |role| ProfileUpdate {
            role: Some(role),
            ..Default::default()
        };

        assert!(matches!(
            store.update_profile(teacher.id, to(Role::Student)),
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            store.update_profile(ada.id, to(Role::Teacher)),
            Err(StoreError::Conflict(_))
        ));

        // Owning classes is fine for admins too
        assert_eq!(
            store.update_profile(teacher.id, to(Role::Admin)).unwrap().role,
            Role::Admin
        );

        store.unenroll_student(class.id, ada.id).unwrap();
        assert_eq!(
            store.update_profile(ada.id, to(Role::Teacher)).unwrap().role,
            Role::Teacher
        );
    }
}

//! Classes and enrollments

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;

use crate::store::database::Store;
use crate::store::error::{StoreError, StoreResult};
use crate::store::profiles::{load_member, profile_from_row};
use crate::store::types::{Class, ClassEnrollment, Profile, Role};

const CLASS_COLUMNS: &str = "id, school_id, teacher_id, name, description, created_at";

/// Fields for creating a class
#[derive(Debug, Clone, Deserialize)]
pub struct NewClass {
    pub school_id: i64,
    pub teacher_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn class_from_row(row: &Row<'_>) -> rusqlite::Result<Class> {
    Ok(Class {
        id: row.get("id")?,
        school_id: row.get("school_id")?,
        teacher_id: row.get("teacher_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn load_class(conn: &Connection, id: i64) -> StoreResult<Class> {
    conn.query_row(
        &format!("SELECT {} FROM classes WHERE id = ?1", CLASS_COLUMNS),
        params![id],
        class_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("Class", id))
}

impl Store {
    /// Create a class owned by a teacher (or admin) of the school
    pub fn create_class(&self, new: NewClass) -> StoreResult<Class> {
        if new.name.trim().is_empty() {
            return Err(StoreError::Validation("Class name cannot be empty".to_string()));
        }

        let class = self.with_tx(|tx| {
            let teacher = load_member(tx, new.teacher_id, new.school_id)?;
            if !teacher.role.can_award() {
                return Err(StoreError::Validation(format!(
                    "Profile {} is not a teacher",
                    teacher.id
                )));
            }

            tx.execute(
                "INSERT INTO classes (school_id, teacher_id, name, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    new.school_id,
                    new.teacher_id,
                    new.name.trim(),
                    new.description,
                    Utc::now()
                ],
            )?;
            load_class(tx, tx.last_insert_rowid())
        })?;

        tracing::info!(class_id = class.id, teacher_id = class.teacher_id, "Created class");
        Ok(class)
    }

    pub fn get_class(&self, id: i64) -> StoreResult<Class> {
        self.with_conn(|conn| load_class(conn, id))
    }

    /// Classes of a school, optionally only those taught by `teacher_id`
    pub fn list_classes(&self, school_id: i64, teacher_id: Option<i64>) -> StoreResult<Vec<Class>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM classes
                 WHERE school_id = ?1 AND (?2 IS NULL OR teacher_id = ?2)
                 ORDER BY name, id",
                CLASS_COLUMNS
            ))?;
            let classes = stmt
                .query_map(params![school_id, teacher_id], class_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(classes)
        })
    }

    /// Delete a class and its enrollments
    pub fn delete_class(&self, id: i64) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM classes WHERE id = ?1", params![id])?;
            if changed == 0 {
                return Err(StoreError::not_found("Class", id));
            }
            Ok(())
        })
    }

    /// Add a student of the class's school to the class
    pub fn enroll_student(&self, class_id: i64, student_id: i64) -> StoreResult<ClassEnrollment> {
        self.with_tx(|tx| {
            let class = load_class(tx, class_id)?;
            let student = load_member(tx, student_id, class.school_id)?;
            if student.role != Role::Student {
                return Err(StoreError::Validation(format!(
                    "Profile {} is not a student",
                    student.id
                )));
            }

            tx.execute(
                "INSERT INTO class_enrollments (class_id, student_id, enrolled_at)
                 VALUES (?1, ?2, ?3)",
                params![class_id, student_id, Utc::now()],
            )
            .map_err(|e| {
                StoreError::from_constraint(
                    e,
                    format!("Student {} is already enrolled in class {}", student_id, class_id),
                )
            })?;

            Ok(ClassEnrollment {
                id: tx.last_insert_rowid(),
                class_id,
                student_id,
                enrolled_at: Utc::now(),
            })
        })
    }

    pub fn unenroll_student(&self, class_id: i64, student_id: i64) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM class_enrollments WHERE class_id = ?1 AND student_id = ?2",
                params![class_id, student_id],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found(
                    "Enrollment",
                    format!("class {} student {}", class_id, student_id),
                ));
            }
            Ok(())
        })
    }

    /// Students enrolled in a class
    pub fn class_roster(&self, class_id: i64) -> StoreResult<Vec<Profile>> {
        self.with_conn(|conn| {
            load_class(conn, class_id)?;
            let mut stmt = conn.prepare_cached(
                "SELECT p.id AS id, p.school_id AS school_id, p.name AS name, p.email AS email,
                        p.role AS role, p.coin_balance AS coin_balance,
                        p.password_hash AS password_hash, p.created_at AS created_at
                 FROM class_enrollments e
                 JOIN profiles p ON p.id = e.student_id
                 WHERE e.class_id = ?1
                 ORDER BY p.name, p.id",
            )?;
            let students = stmt
                .query_map(params![class_id], profile_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(students)
        })
    }

    /// Whether `student_id` sits in any class taught by `teacher_id`
    pub fn teaches_student(&self, teacher_id: i64, student_id: i64) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM class_enrollments e
                     JOIN classes c ON c.id = e.class_id
                     WHERE c.teacher_id = ?1 AND e.student_id = ?2
                     LIMIT 1",
                    params![teacher_id, student_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::profiles::tests::add_profile;
    use crate::store::schools::tests::new_school;

    #[test]
    fn test_class_lifecycle() {
        let store = Store::open_in_memory().unwrap();
        let school = store.create_school(new_school(None)).unwrap();
        let teacher = add_profile(&store, Some(school.id), "Mr Kim", Role::Teacher);
        let ada = add_profile(&store, Some(school.id), "Ada", Role::Student);
        let bob = add_profile(&store, Some(school.id), "Bob", Role::Student);

        let class = store
            .create_class(NewClass {
                school_id: school.id,
                teacher_id: teacher.id,
                name: "Algebra".to_string(),
                description: None,
            })
            .unwrap();

        store.enroll_student(class.id, ada.id).unwrap();
        store.enroll_student(class.id, bob.id).unwrap();
        assert!(matches!(
            store.enroll_student(class.id, ada.id),
            Err(StoreError::Conflict(_))
        ));

        let roster = store.class_roster(class.id).unwrap();
        assert_eq!(
            roster.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["Ada", "Bob"]
        );
        assert!(store.teaches_student(teacher.id, ada.id).unwrap());

        store.unenroll_student(class.id, ada.id).unwrap();
        assert!(!store.teaches_student(teacher.id, ada.id).unwrap());
        assert!(store.unenroll_student(class.id, ada.id).is_err());

        assert_eq!(
            store.list_classes(school.id, Some(teacher.id)).unwrap().len(),
            1
        );
        store.delete_class(class.id).unwrap();
        assert!(store.list_classes(school.id, None).unwrap().is_empty());
    }

    #[test]
    fn test_class_requires_teacher_and_students() {
        let store = Store::open_in_memory().unwrap();
        let school = store.create_school(new_school(None)).unwrap();
        let ada = add_profile(&store, Some(school.id), "Ada", Role::Student);
        let teacher = add_profile(&store, Some(school.id), "Ms Li", Role::Teacher);

        let by_student = NewClass {
            school_id: school.id,
            teacher_id: ada.id,
            name: "Art".to_string(),
            description: None,
        };
        assert!(matches!(
            store.create_class(by_student),
            Err(StoreError::Validation(_))
        ));

        let class = store
            .create_class(NewClass {
                school_id: school.id,
                teacher_id: teacher.id,
                name: "Art".to_string(),
                description: Some("Painting".to_string()),
            })
            .unwrap();
        assert!(store.enroll_student(class.id, teacher.id).is_err());
    }
}

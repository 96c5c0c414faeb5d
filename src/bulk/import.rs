//! CSV User Import
//!
//! Imports profiles into one school from a CSV with the header
//! `name,email,role[,password]`. Columns are matched by header name in any
//! order. Rows without a password get a generated one, returned once in the
//! report. Bad rows are reported by line number and skipped.

use serde::Serialize;
use std::collections::HashSet;
use std::io::Read;

use super::{truncate_errors, BulkError};
use crate::auth;
use crate::store::{NewProfile, Profile, Role, Store, StoreResult};

/// Parses and imports user rows for one school
pub struct UserImporter {
    school_id: i64,
    /// Role used when the role cell is blank
    default_role: Role,
    /// Highest role a row may ask for
    max_role: Role,
}

/// A row that passed parsing
#[derive(Debug, Clone)]
pub struct ParsedUser {
    pub line: usize,
    pub profile: NewProfile,
    pub generated_password: bool,
}

/// Result of parsing a CSV
#[derive(Debug, Default)]
pub struct ParsedUsers {
    pub users: Vec<ParsedUser>,
    pub rows_failed: usize,
    pub errors: Vec<String>,
}

/// One created profile
#[derive(Debug, Clone, Serialize)]
pub struct ImportedUser {
    pub line: usize,
    pub profile: Profile,
    /// Only set when the password was generated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_password: Option<String>,
}

/// Result of an import
#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    pub created: Vec<ImportedUser>,
    pub rows_processed: usize,
    pub rows_failed: usize,
    pub errors: Vec<String>,
}

struct Columns {
    name: usize,
    email: usize,
    role: usize,
    password: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, BulkError> {
        let find = |wanted: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(wanted))
        };
        let require = |wanted: &str| {
            find(wanted).ok_or_else(|| {
                BulkError::InvalidHeader(format!(
                    "missing '{}' column, expected name,email,role[,password]",
                    wanted
                ))
            })
        };

        Ok(Self {
            name: require("name")?,
            email: require("email")?,
            role: require("role")?,
            password: find("password"),
        })
    }
}

fn cell<'a>(record: &'a csv::StringRecord, idx: usize) -> &'a str {
    record.get(idx).map(str::trim).unwrap_or("")
}

impl UserImporter {
    pub fn new(school_id: i64) -> Self {
        Self {
            school_id,
            default_role: Role::Student,
            max_role: Role::Admin,
        }
    }

    /// Set the role used for blank role cells
    pub fn with_default_role(mut self, role: Role) -> Self {
        self.default_role = role;
        self
    }

    /// Reject rows asking for a role above `role`
    pub fn with_max_role(mut self, role: Role) -> Self {
        self.max_role = role.min(Role::Admin);
        self
    }

    fn parse_row(
        &self,
        record: &csv::StringRecord,
        columns: &Columns,
        seen: &mut HashSet<String>,
    ) -> Result<(NewProfile, bool), String> {
        let name = cell(record, columns.name);
        if name.is_empty() {
            return Err("name is empty".to_string());
        }

        let email = cell(record, columns.email).to_lowercase();
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(format!("invalid email '{}'", email));
        }
        if !seen.insert(email.clone()) {
            return Err(format!("duplicate email '{}' in file", email));
        }

        let role = match cell(record, columns.role) {
            "" => self.default_role,
            raw => raw.parse::<Role>().map_err(|e| e.to_string())?,
        };
        if role > self.max_role {
            return Err(format!("role '{}' cannot be imported", role));
        }

        let given = columns
            .password
            .map(|idx| cell(record, idx))
            .filter(|p| !p.is_empty());
        let (password, generated) = match given {
            Some(p) => {
                auth::validate_password(p).map_err(|e| e.to_string())?;
                (p.to_string(), false)
            }
            None => (auth::generate_password(), true),
        };

        Ok((
            NewProfile {
                school_id: Some(self.school_id),
                name: name.to_string(),
                email,
                role,
                password,
            },
            generated,
        ))
    }

    /// Parse CSV rows without touching the store
    pub fn parse_reader<R: Read>(&self, reader: R) -> Result<ParsedUsers, BulkError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let columns = Columns::from_headers(reader.headers()?)?;

        let mut parsed = ParsedUsers::default();
        let mut seen = HashSet::new();

        for (index, result) in reader.records().enumerate() {
            // Quoted fields may span lines, so prefer the reader's own position
            let fallback = index + 2;

            let record = match result {
                Ok(r) => r,
                Err(e) => {
                    let line = e.position().map_or(fallback, |p| p.line() as usize);
                    parsed.errors.push(format!("Line {}: {}", line, e));
                    parsed.rows_failed += 1;
                    continue;
                }
            };
            if record.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            let line = record.position().map_or(fallback, |p| p.line() as usize);

            match self.parse_row(&record, &columns, &mut seen) {
                Ok((profile, generated_password)) => parsed.users.push(ParsedUser {
                    line,
                    profile,
                    generated_password,
                }),
                Err(e) => {
                    parsed.errors.push(format!("Line {}: {}", line, e));
                    parsed.rows_failed += 1;
                }
            }
        }

        Ok(parsed)
    }

    pub fn parse_str(&self, csv_data: &str) -> Result<ParsedUsers, BulkError> {
        self.parse_reader(csv_data.as_bytes())
    }

    /// Parse and insert, hashing each password with Argon2
    pub fn import(&self, store: &Store, csv_data: &str) -> Result<ImportReport, BulkError> {
        self.import_with(store, csv_data, auth::hash_password)
    }

    /// Parse and insert with a custom password hasher
    pub fn import_with<H>(&self, store: &Store, csv_data: &str, hash: H) -> Result<ImportReport, BulkError>
    where
        H: Fn(&str) -> StoreResult<String>,
    {
        let parsed = self.parse_str(csv_data)?;
        let mut report = ImportReport {
            rows_failed: parsed.rows_failed,
            errors: parsed.errors,
            ..Default::default()
        };

        for user in parsed.users {
            let result = hash(&user.profile.password)
                .and_then(|h| store.create_profile_hashed(&user.profile, &h));
            match result {
                Ok(profile) => {
                    report.rows_processed += 1;
                    report.created.push(ImportedUser {
                        line: user.line,
                        profile,
                        generated_password: user.generated_password.then_some(user.profile.password),
                    });
                }
                Err(e) => {
                    report.errors.push(format!("Line {}: {}", user.line, e));
                    report.rows_failed += 1;
                }
            }
        }

        // Line order, whichever phase reported the error
        report.errors.sort_by_key(|e| {
            e.strip_prefix("Line ")
                .and_then(|rest| rest.split(':').next())
                .and_then(|n| n.parse::<usize>().ok())
                .unwrap_or(usize::MAX)
        });
        truncate_errors(&mut report.errors);

        tracing::info!(
            school_id = self.school_id,
            created = report.rows_processed,
            failed = report.rows_failed,
            "Imported users"
        );
        Ok(report)
    }
}

/// Parse a user CSV for `school_id` with default settings
pub fn parse_users(school_id: i64, csv_data: &str) -> Result<ParsedUsers, BulkError> {
    UserImporter::new(school_id).parse_str(csv_data)
}

/// Import a user CSV into `school_id` with default settings
pub fn import_users(store: &Store, school_id: i64, csv_data: &str) -> Result<ImportReport, BulkError> {
    UserImporter::new(school_id).import(store, csv_data)
}

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use tracing::info;
use uuid::Uuid;
use whispr_types::api::{Filter, Select};
use whispr_types::models::{User, canonical_timestamp};

use crate::rest::select_in;
use crate::schema::USERS;
use crate::{Database, DbError, Result};

pub const DEFAULT_MOOD: &str = "calm";

pub struct CredentialRow {
    pub user_id: String,
    pub email: String,
    pub password: String,
}

impl Database {
    /// Create a user with a fresh anonymous handle and its login credentials.
    pub fn create_account(&self, email: &str, password_hash: &str, mood: Option<&str>) -> Result<User> {
        let user_id = Uuid::new_v4();
        let anonymous_id = format!("whisper-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let now = canonical_timestamp(&Utc::now());

        let row = self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO users (id, anonymous_id, mood, created_at, last_seen, online)
                 VALUES (?1, ?2, ?3, ?4, ?4, 0)",
                params![user_id.to_string(), anonymous_id, mood.unwrap_or(DEFAULT_MOOD), now],
            )?;
            tx.execute(
                "INSERT INTO credentials (user_id, email, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![user_id.to_string(), email, password_hash, now],
            )?;
            select_in(tx, &USERS, &Select::new().filter(Filter::eq("id", user_id)))?
                .into_iter()
                .next()
                .ok_or(DbError::NotFound("user"))
        })?;

        info!(user_id = %user_id, "account created");
        Ok(serde_json::from_value(row)?)
    }

    pub fn find_credentials(&self, email: &str) -> Result<Option<CredentialRow>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT user_id, email, password FROM credentials WHERE email = ?1",
                    [email],
                    |row| {
                        Ok(CredentialRow {
                            user_id: row.get(0)?,
                            email: row.get(1)?,
                            password: row.get(2)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    pub fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        let rows = self.select_rows(USERS.name, &Select::new().filter(Filter::eq("id", user_id)))?;
        rows.into_iter()
            .next()
            .map(|row| serde_json::from_value(row).map_err(DbError::from))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_account_assigns_anonymous_identity() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_account("a@example.com", "hash", None).unwrap();

        assert!(user.anonymous_id.starts_with("whisper-"));
        assert_eq!(user.mood, DEFAULT_MOOD);
        assert!(!user.online);

        let creds = db.find_credentials("a@example.com").unwrap().unwrap();
        assert_eq!(creds.user_id, user.id.to_string());
        assert_eq!(db.get_user(user.id).unwrap(), Some(user));
    }

    #[test]
    fn duplicate_email_is_a_constraint_violation() {
        let db = Database::open_in_memory().unwrap();
        db.create_account("dup@example.com", "hash", Some("sad")).unwrap();
        let err = db.create_account("dup@example.com", "hash", None).unwrap_err();
        assert_eq!(err.code(), "constraint");
        assert!(db.find_credentials("other@example.com").unwrap().is_none());
    }
}

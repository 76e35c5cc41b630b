//! Persistence layer — one transactional SQLite store behind [`Store`].
//!
//! Every registry lives in the same database so multi-step mutations can run
//! inside a single transaction. Read paths never fall back to defaults; the
//! singletons are seeded explicitly at startup.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::errors::{ApiError, Result};
use crate::models::{AppConfig, GroupLink, Member, ProofMethod, Submission, SubmissionStatus};

const SUBMISSION_COLUMNS: &str = "id, name, email, whatsapp, project, status, proof_method, \
     proof, proof_mime, transaction_id, reject_reason, created_at";

/// Handle to the persistent registries. Cheap to clone; all connections share
/// one pool so the database serialises concurrent writes.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open the database (creating the file if missing) and run pending
    /// migrations.
    pub async fn open(database_url: &str) -> Result<Self> {
        let url = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite:{database_url}")
        };

        // An in-memory database exists per connection, so it must not be
        // spread over a pool.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };

        let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations applied");
        Ok(Store { pool })
    }

    // ─────────────────────────────────────────────────────────
    // Startup seeding
    // ─────────────────────────────────────────────────────────

    /// Insert the config singleton if absent.
    pub async fn seed_config(&self, default_max_places: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO app_config (id, max_places, session_open) VALUES (1, ?1, 1)")
            .bind(default_max_places)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn has_admin_credential(&self) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM admin_credential WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn set_admin_credential(&self, password_hash: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO admin_credential (id, password_hash) VALUES (1, ?1)")
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn admin_password_hash(&self) -> Result<String> {
        let (hash,): (String,) =
            sqlx::query_as("SELECT password_hash FROM admin_credential WHERE id = 1")
                .fetch_one(&self.pool)
                .await?;
        Ok(hash)
    }

    // ─────────────────────────────────────────────────────────
    // Configuration singleton
    // ─────────────────────────────────────────────────────────

    pub async fn config(&self) -> Result<AppConfig> {
        let config = sqlx::query_as::<_, AppConfig>(
            "SELECT max_places, session_open FROM app_config WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(config)
    }

    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        sqlx::query("UPDATE app_config SET max_places = ?1, session_open = ?2 WHERE id = 1")
            .bind(config.max_places)
            .bind(config.session_open)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────
    // Submission registry
    // ─────────────────────────────────────────────────────────

    pub async fn insert_submission(&self, s: &Submission) -> Result<()> {
        sqlx::query(
            "INSERT INTO submissions \
                 (id, name, email, whatsapp, project, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&s.id)
        .bind(&s.name)
        .bind(&s.email)
        .bind(&s.whatsapp)
        .bind(&s.project)
        .bind(s.status)
        .bind(s.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn submission(&self, id: &str) -> Result<Option<Submission>> {
        let row = sqlx::query_as::<_, Submission>(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// The full registry, newest first.
    pub async fn list_submissions(&self) -> Result<Vec<Submission>> {
        let rows = sqlx::query_as::<_, Submission>(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn set_status(&self, id: &str, status: SubmissionStatus) -> Result<()> {
        sqlx::query("UPDATE submissions SET status = ?2 WHERE id = ?1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_status_with_reason(
        &self,
        id: &str,
        status: SubmissionStatus,
        reason: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE submissions SET status = ?2, reject_reason = ?3 WHERE id = ?1")
            .bind(id)
            .bind(status)
            .bind(reason)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a payment proof and move the submission to `status` in one
    /// write. A resubmission overwrites the previous proof.
    pub async fn attach_proof(
        &self,
        id: &str,
        method: ProofMethod,
        proof: Option<String>,
        proof_mime: Option<String>,
        transaction_id: Option<String>,
        status: SubmissionStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE submissions \
             SET proof_method = ?2, proof = ?3, proof_mime = ?4, transaction_id = ?5, status = ?6 \
             WHERE id = ?1",
        )
        .bind(id)
        .bind(method)
        .bind(proof)
        .bind(proof_mime)
        .bind(transaction_id)
        .bind(status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────
    // Member registry
    // ─────────────────────────────────────────────────────────

    pub async fn member_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM members")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn list_members(&self) -> Result<Vec<Member>> {
        let rows = sqlx::query_as::<_, Member>(
            "SELECT id, submission_id, name, email, whatsapp, project, confirmed_at \
             FROM members ORDER BY confirmed_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Approve a pending payment.
    ///
    /// Within a single transaction: re-read the submission, re-check capacity,
    /// copy the contact fields into the member registry, flip the status, and
    /// append the group link when one was supplied. Two concurrent approvals
    /// therefore cannot both commit past `max_places`.
    ///
    /// Returns the approved submission and the member count after the insert.
    pub async fn approve_submission(
        &self,
        id: &str,
        group_link: Option<&str>,
        now: i64,
    ) -> Result<(Submission, i64)> {
        let mut tx = self.pool.begin().await?;

        let Some(submission) = sqlx::query_as::<_, Submission>(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Err(ApiError::NotFound(format!("unknown submission: {id}")));
        };

        if submission.status != SubmissionStatus::Pending {
            return Err(ApiError::InvalidState {
                actual: submission.status.as_str(),
            });
        }

        let (max_places,): (i64,) =
            sqlx::query_as("SELECT max_places FROM app_config WHERE id = 1")
                .fetch_one(&mut *tx)
                .await?;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM members")
            .fetch_one(&mut *tx)
            .await?;
        if count >= max_places {
            return Err(ApiError::CapacityExceeded);
        }

        sqlx::query(
            "INSERT INTO members (submission_id, name, email, whatsapp, project, confirmed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&submission.id)
        .bind(&submission.name)
        .bind(&submission.email)
        .bind(&submission.whatsapp)
        .bind(&submission.project)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE submissions SET status = ?2 WHERE id = ?1")
            .bind(&submission.id)
            .bind(SubmissionStatus::Approved)
            .execute(&mut *tx)
            .await?;

        if let Some(link) = group_link {
            sqlx::query(
                "INSERT INTO group_links (submission_id, name, email, link, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&submission.id)
            .bind(&submission.name)
            .bind(&submission.email)
            .bind(link)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let approved = Submission {
            status: SubmissionStatus::Approved,
            ..submission
        };
        Ok((approved, count + 1))
    }

    /// The append-only log of access links handed out at approval time.
    pub async fn list_group_links(&self) -> Result<Vec<GroupLink>> {
        let rows = sqlx::query_as::<_, GroupLink>(
            "SELECT id, submission_id, name, email, link, created_at \
             FROM group_links ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ─────────────────────────────────────────────────────────
    // Full reset
    // ─────────────────────────────────────────────────────────

    /// Administrative full reset: clear every registry and restore the default
    /// configuration. The admin credential is left untouched (rotation happens
    /// out of band).
    pub async fn reset_all(&self, default_max_places: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM submissions").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM members").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM group_links").execute(&mut *tx).await?;
        sqlx::query("UPDATE app_config SET max_places = ?1, session_open = 1 WHERE id = 1")
            .bind(default_max_places)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!("all registries cleared, configuration restored to defaults");
        Ok(())
    }
}

//! Application configuration loaded from environment variables.

use crate::errors::{ApiError, Result};

/// Development fallback; a warning is logged at startup when it is in use.
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin12346";

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database URL (e.g. sqlite:./enrollment.db)
    pub database_url: String,
    /// Port for the HTTP server
    pub port: u16,
    /// Plaintext admin password, hashed into the credential store on first run
    pub admin_password: String,
    /// Recipient of admin-facing notifications (new submissions, new proofs)
    pub admin_email: Option<String>,
    /// Resend API key; notifications fall back to log-only when absent
    pub resend_api_key: Option<String>,
    /// Sender address for outbound email
    pub email_from: String,
    /// Public name of the program, used in emails and generated documents
    pub program_name: String,
    /// Directory where generated acceptance documents are archived
    pub archive_dir: String,
    /// Capacity seeded into a fresh config row and restored by resets
    pub default_max_places: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let default_max_places: i64 = env_var("DEFAULT_MAX_PLACES")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| ApiError::Config("Invalid DEFAULT_MAX_PLACES".to_string()))?;
        if default_max_places < 1 {
            return Err(ApiError::Config(
                "DEFAULT_MAX_PLACES must be at least 1".to_string(),
            ));
        }

        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./enrollment.db".to_string()),
            port: env_var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| ApiError::Config("Invalid PORT".to_string()))?,
            admin_password: env_var("ADMIN_PASSWORD")
                .unwrap_or_else(|_| DEFAULT_ADMIN_PASSWORD.to_string()),
            admin_email: env_var("ADMIN_EMAIL").ok(),
            resend_api_key: env_var("RESEND_API_KEY").ok(),
            email_from: env_var("EMAIL_FROM")
                .unwrap_or_else(|_| "onboarding@resend.dev".to_string()),
            program_name: env_var("PROGRAM_NAME")
                .unwrap_or_else(|_| "Enrollment Program".to_string()),
            archive_dir: env_var("ARCHIVE_DIR")
                .unwrap_or_else(|_| "./acceptance-archive".to_string()),
            default_max_places,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| ApiError::Config(format!("Missing env var: {key}")))
}

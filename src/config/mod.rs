use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;

/// Application-wide configuration, resolved once from the environment at
/// startup and threaded by value to every component.
#[derive(Debug, Clone)]
pub struct Config {
    pub auth_username: String,
    pub auth_password: String,
    pub auth_cookie_secret: String,

    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub smtp_secure: bool,

    pub imap_host: String,
    pub imap_port: u16,
    pub imap_user: String,
    pub imap_pass: String,
    pub imap_secure: bool,

    pub database_path: PathBuf,
    pub data_dir: PathBuf,
    pub max_attachment_size: u64,
    pub image_proxy_url: Option<String>,
    pub eml_backup_enabled: bool,
    pub default_sender_name: Option<String>,
    pub default_sender_email: Option<String>,
    pub port: u16,
    pub is_production: bool,
}

const DEFAULT_MAX_ATTACHMENT_SIZE: u64 = 20 * 1024 * 1024;

impl Config {
    pub fn load() -> Result<Self> {
        let auth_username = require_env("AUTH_USERNAME")?;
        let auth_password = require_env("AUTH_PASSWORD")?;
        let auth_cookie_secret = require_env("AUTH_COOKIE_SECRET")?;

        let smtp_host = require_env("SMTP_HOST")?;
        let smtp_port = parse_env("SMTP_PORT", 587)?;
        let smtp_user = require_env("SMTP_USER")?;
        let smtp_pass = require_env("SMTP_PASS")?;
        let smtp_secure = parse_bool_env("SMTP_SECURE", true);

        let imap_host = require_env("IMAP_HOST")?;
        let imap_port = parse_env("IMAP_PORT", 993)?;
        let imap_user = require_env("IMAP_USER")?;
        let imap_pass = require_env("IMAP_PASS")?;
        let imap_secure = parse_bool_env("IMAP_SECURE", true);

        let database_path = env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir().join("meremail.db"));

        let data_dir = database_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;

        let max_attachment_size = parse_env("MAX_ATTACHMENT_SIZE", DEFAULT_MAX_ATTACHMENT_SIZE)?;
        let image_proxy_url = env::var("IMAGE_PROXY_URL").ok();
        let eml_backup_enabled = parse_bool_env("EML_BACKUP_ENABLED", true);
        let default_sender_name = env::var("DEFAULT_SENDER_NAME").ok();
        let default_sender_email = env::var("DEFAULT_SENDER_EMAIL").ok();
        let port = parse_env("PORT", 8080u16)?;
        let is_production = env::var("NODE_ENV")
            .map(|v| v == "production")
            .unwrap_or(false);

        Ok(Self {
            auth_username,
            auth_password,
            auth_cookie_secret,
            smtp_host,
            smtp_port,
            smtp_user,
            smtp_pass,
            smtp_secure,
            imap_host,
            imap_port,
            imap_user,
            imap_pass,
            imap_secure,
            database_path,
            data_dir,
            max_attachment_size,
            image_proxy_url,
            eml_backup_enabled,
            default_sender_name,
            default_sender_email,
            port,
            is_production,
        })
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn attachments_dir(&self) -> PathBuf {
        self.data_dir.join("attachments")
    }

    pub fn eml_backup_dir(&self) -> PathBuf {
        self.data_dir.join("eml-backup")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    pub fn ingestion_state_path(&self) -> PathBuf {
        self.data_dir.join(".imap-sync-state.json")
    }

    /// Domain used for locally-constructed Message-IDs, derived from the
    /// configured SMTP username.
    pub fn local_domain(&self) -> String {
        self.smtp_user
            .split('@')
            .nth(1)
            .filter(|d| !d.is_empty())
            .unwrap_or("meremail.local")
            .to_string()
    }
}

fn require_env(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("missing required environment variable {key}"))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| anyhow::anyhow!("invalid value for {key}: {raw}")),
        Err(_) => Ok(default),
    }
}

fn parse_bool_env(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn default_data_dir() -> PathBuf {
    if let Some(home) = dirs::home_dir() {
        return home.join(".meremail");
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("meremail-data")
}

/// Validates presence of required variables without constructing a full
/// Config; used by the CLI's `--check-config` path.
pub fn validate_required() -> Result<()> {
    for key in [
        "AUTH_USERNAME",
        "AUTH_PASSWORD",
        "AUTH_COOKIE_SECRET",
        "SMTP_HOST",
        "SMTP_USER",
        "SMTP_PASS",
        "IMAP_HOST",
        "IMAP_USER",
        "IMAP_PASS",
    ] {
        if env::var(key).is_err() {
            bail!("missing required environment variable {key}");
        }
    }
    Ok(())
}

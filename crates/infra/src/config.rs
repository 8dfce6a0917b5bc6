//! Process configuration loaded from environment variables.

use campus_audit::AuditLogSettings;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: String,
    /// `None` selects the in-memory audit-log store.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub audit: AuditLogSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            database_url: None,
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            audit: AuditLogSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            database_url: get("DATABASE_URL"),
            jwt_secret: get("JWT_SECRET").unwrap_or_else(|| DEFAULT_JWT_SECRET.to_string()),
            audit: AuditLogSettings::from_lookup(&lookup),
        }
    }
}

//! Audit-trail configuration.
//!
//! Malformed values never fail startup; they fall back to defaults.

use serde::Serialize;

pub const DEFAULT_RETENTION_DAYS: u32 = 180;
pub const MAX_RETENTION_DAYS: u32 = 365;
pub const DEFAULT_PRUNE_INTERVAL_MINUTES: u32 = 1440;
pub const MAX_PRUNE_INTERVAL_MINUTES: u32 = 1440;

pub const TRANSPORT_KEY: &str = "AUDIT_LOG_TRANSPORT";
pub const RETENTION_DAYS_KEY: &str = "AUDIT_LOG_RETENTION_DAYS";
pub const PRUNE_ENABLED_KEY: &str = "AUDIT_LOG_PRUNE_ENABLED";
pub const PRUNE_INTERVAL_KEY: &str = "AUDIT_LOG_PRUNE_INTERVAL_MINUTES";
pub const QUEUE_URL_KEYS: [&str; 3] = ["AUDIT_LOG_QUEUE_URL", "VALKEY_URL", "REDIS_URL"];

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Write synchronously through the repository.
    #[default]
    Command,
    Queue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditLogSettings {
    pub transport: TransportMode,
    pub retention_days: u32,
    pub prune_enabled: bool,
    pub prune_interval_minutes: u32,
    pub queue_url: Option<String>,
}

impl Default for AuditLogSettings {
    fn default() -> Self {
        Self {
            transport: TransportMode::Command,
            retention_days: DEFAULT_RETENTION_DAYS,
            prune_enabled: true,
            prune_interval_minutes: DEFAULT_PRUNE_INTERVAL_MINUTES,
            queue_url: None,
        }
    }
}

impl AuditLogSettings {
    /// Resolve settings through `lookup` (usually the process environment).
    /// Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let transport = match get(TRANSPORT_KEY) {
            Some(raw) if raw.eq_ignore_ascii_case("queue") => TransportMode::Queue,
            _ => TransportMode::Command,
        };

        Self {
            transport,
            retention_days: positive_capped(get(RETENTION_DAYS_KEY), DEFAULT_RETENTION_DAYS, MAX_RETENTION_DAYS),
            prune_enabled: get(PRUNE_ENABLED_KEY).is_none_or(|raw| !raw.eq_ignore_ascii_case("false")),
            prune_interval_minutes: positive_capped(
                get(PRUNE_INTERVAL_KEY),
                DEFAULT_PRUNE_INTERVAL_MINUTES,
                MAX_PRUNE_INTERVAL_MINUTES,
            ),
            queue_url: QUEUE_URL_KEYS.iter().find_map(|key| get(*key)),
        }
    }
}

/// Leading integer of `raw` (`"30d"` reads as 30); missing, unparsable or
/// non-positive values yield `default`, larger ones are capped at `max`.
fn positive_capped(raw: Option<String>, default: u32, max: u32) -> u32 {
    let Some(raw) = raw else {
        return default;
    };
    let digits_end = raw
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map_or(raw.len(), |(i, _)| i);

    match raw[..digits_end].parse::<i64>() {
        Ok(n) if n > 0 => u32::try_from(n).map_or(max, |n| n.min(max)),
        _ => default,
    }
}

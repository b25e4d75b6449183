//! Environment-driven configuration.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use scopegate_auth::{AuthzConfig, DeclaredPermission, builtin};
use scopegate_infra::OrgCacheConfig;

const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub jwt_secret: String,
    /// Postgres when set, in-memory store otherwise.
    pub database_url: Option<String>,
    pub authz: AuthzConfig,
    pub org_cache: OrgCacheConfig,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind", &self.bind)
            .field("jwt_secret", &"<redacted>")
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("authz", &self.authz)
            .field("org_cache", &self.org_cache)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind = match get("SCOPEGATE_BIND") {
            Some(raw) => raw.trim().parse().map_err(|e| ConfigError::Invalid {
                key: "SCOPEGATE_BIND",
                reason: format!("{e}"),
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        let jwt_secret = get("JWT_SECRET").unwrap_or_else(|| {
            warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });

        let global_admin = get("SCOPEGATE_GLOBAL_ADMIN_PERMISSION")
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| builtin::GLOBAL_ADMIN.to_string());
        let declared = get("SCOPEGATE_DECLARED_PERMISSIONS")
            .map(|raw| parse_declared(&raw))
            .unwrap_or_default();

        let defaults = OrgCacheConfig::default();
        let ttl = match get("SCOPEGATE_ORG_CACHE_TTL_SECS") {
            Some(raw) => Duration::from_secs(parse_number("SCOPEGATE_ORG_CACHE_TTL_SECS", &raw)?),
            None => defaults.ttl,
        };
        let max_entries = match get("SCOPEGATE_ORG_CACHE_MAX_ENTRIES") {
            Some(raw) => parse_number("SCOPEGATE_ORG_CACHE_MAX_ENTRIES", &raw)? as usize,
            None => defaults.max_entries,
        };

        Ok(Self {
            bind,
            jwt_secret,
            database_url: get("DATABASE_URL"),
            authz: AuthzConfig::new(global_admin).with_declared(declared),
            org_cache: OrgCacheConfig { ttl, max_entries },
        })
    }
}

fn parse_number(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|e| ConfigError::Invalid {
        key,
        reason: format!("{e}"),
    })
}

/// `name[:description]` entries separated by commas.
fn parse_declared(raw: &str) -> Vec<DeclaredPermission> {
    raw.split(',')
        .filter_map(|entry| {
            let (name, description) = entry.split_once(':').unwrap_or((entry, ""));
            let name = name.trim();
            (!name.is_empty()).then(|| DeclaredPermission::new(name, description.trim()))
        })
        .collect()
}

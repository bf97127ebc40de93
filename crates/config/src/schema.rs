//! Config schema types (server, database, auth, logger).

use {
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    serde_json::json,
    tracing::warn,
};

/// Root configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub logger: LoggerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL.
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://chatrelay.db?mode=rwc".into(),
        }
    }
}

/// Token signing settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Secret the token key is derived from. When unset the server signs with
    /// a per-process random key.
    pub token_secret: Option<Secret<String>>,
    /// Token lifetime in hours.
    pub token_ttl_hours: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: None,
            token_ttl_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl RelayConfig {
    /// Apply `CHATRELAY_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` in place of the process environment.
    /// Empty values are ignored; unparsable numbers are logged and ignored.
    pub fn apply_env_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("CHATRELAY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("CHATRELAY_PORT") {
            match port.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(e) => warn!(value = %port, error = %e, "ignoring invalid CHATRELAY_PORT"),
            }
        }
        if let Some(url) = get("CHATRELAY_DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(secret) = get("CHATRELAY_TOKEN_SECRET") {
            self.auth.token_secret = Some(Secret::new(secret));
        }
        if let Some(ttl) = get("CHATRELAY_TOKEN_TTL_HOURS") {
            match ttl.trim().parse() {
                Ok(ttl) => self.auth.token_ttl_hours = ttl,
                Err(e) => {
                    warn!(value = %ttl, error = %e, "ignoring invalid CHATRELAY_TOKEN_TTL_HOURS")
                },
            }
        }
        if let Some(level) = get("CHATRELAY_LOG_LEVEL") {
            self.logger.level = level;
        }
    }

    /// The token secret, if one is configured and non-empty.
    pub fn token_secret(&self) -> Option<&str> {
        self.auth
            .token_secret
            .as_ref()
            .map(|s| s.expose_secret().as_str())
            .filter(|s| !s.is_empty())
    }

    /// Effective config as JSON with the token secret masked.
    pub fn redacted(&self) -> serde_json::Value {
        json!({
            "server": { "host": self.server.host, "port": self.server.port },
            "database": { "url": self.database.url },
            "auth": {
                "token_secret": self.token_secret().map(|_| "[REDACTED]"),
                "token_ttl_hours": self.auth.token_ttl_hours,
            },
            "logger": { "level": self.logger.level },
        })
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::collections::HashMap};

    #[test]
    fn defaults() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.auth.token_ttl_hours, 24);
        assert_eq!(cfg.logger.level, "info");
        assert!(cfg.token_secret().is_none());
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let cfg: RelayConfig = toml::from_str("[server]\nport = 9000\n").unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.database.url, "sqlite://chatrelay.db?mode=rwc");
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CHATRELAY_HOST", "127.0.0.1"),
            ("CHATRELAY_PORT", "9100"),
            ("CHATRELAY_TOKEN_SECRET", "s3cret"),
            ("CHATRELAY_TOKEN_TTL_HOURS", "2"),
            ("CHATRELAY_LOG_LEVEL", "debug"),
            ("CHATRELAY_DATABASE_URL", ""),
        ]);
        let mut cfg = RelayConfig::default();
        cfg.apply_env_overrides_from(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.token_secret(), Some("s3cret"));
        assert_eq!(cfg.auth.token_ttl_hours, 2);
        assert_eq!(cfg.logger.level, "debug");
        // Empty value ignored.
        assert_eq!(cfg.database.url, "sqlite://chatrelay.db?mode=rwc");
    }

    #[test]
    fn invalid_port_is_ignored() {
        let mut cfg = RelayConfig::default();
        cfg.apply_env_overrides_from(|k| (k == "CHATRELAY_PORT").then(|| "http".to_string()));
        assert_eq!(cfg.server.port, 8080);
    }

    #[test]
    fn redacted_hides_secret() {
        let mut cfg = RelayConfig::default();
        cfg.auth.token_secret = Some(Secret::new("do-not-print".into()));
        let shown = cfg.redacted().to_string();
        assert!(!shown.contains("do-not-print"));
        assert_eq!(cfg.redacted()["auth"]["token_secret"], "[REDACTED]");
        assert!(!format!("{cfg:?}").contains("do-not-print"));
    }
}

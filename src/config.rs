use std::net::SocketAddr;

use base64::{engine::general_purpose, Engine as _};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Clone)]
pub enum JwtKeys {
    Rsa { private_pem: Vec<u8>, public_pem: Vec<u8> },
    Hmac(Vec<u8>),
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rsa { .. } => f.write_str("JwtKeys::Rsa(..)"),
            Self::Hmac(..) => f.write_str("JwtKeys::Hmac(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mongodb_uri: String,
    pub database_name: String,
    pub listen_addr: SocketAddr,
    pub jwt: JwtKeys,
    pub otp_ttl: time::Duration,
    pub notification_icon: String,
}

pub const DEFAULT_DATABASE_NAME: &str = "ecommerce";
pub const DEFAULT_OTP_TTL_MINUTES: i64 = 10;
pub const DEFAULT_NOTIFICATION_ICON: &str = "/icons/icon-192x192.png";

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mongodb_uri = lookup("MONGODB_URI").ok_or(ConfigError::Missing("MONGODB_URI"))?;

        let database_name =
            lookup("DATABASE_NAME").unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string());

        let listen_addr = match lookup("LISTEN_ADDR") {
            Some(addr) => addr.parse().map_err(|err: std::net::AddrParseError| {
                ConfigError::Invalid {
                    name: "LISTEN_ADDR",
                    reason: err.to_string(),
                }
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        let otp_ttl = match lookup("OTP_TTL_MINUTES") {
            Some(minutes) => {
                let minutes: i64 = minutes.parse().map_err(|err: std::num::ParseIntError| {
                    ConfigError::Invalid {
                        name: "OTP_TTL_MINUTES",
                        reason: err.to_string(),
                    }
                })?;

                if minutes <= 0 {
                    return Err(ConfigError::Invalid {
                        name: "OTP_TTL_MINUTES",
                        reason: "must be positive".to_string(),
                    });
                }

                time::Duration::minutes(minutes)
            }
            None => time::Duration::minutes(DEFAULT_OTP_TTL_MINUTES),
        };

        let notification_icon = lookup("NOTIFICATION_ICON")
            .unwrap_or_else(|| DEFAULT_NOTIFICATION_ICON.to_string());

        Ok(Self {
            mongodb_uri,
            database_name,
            listen_addr,
            jwt: jwt_keys(&lookup)?,
            otp_ttl,
            notification_icon,
        })
    }
}

fn jwt_keys<F>(lookup: &F) -> Result<JwtKeys, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let decode = |name: &'static str, value: String| {
        general_purpose::STANDARD
            .decode(value)
            .map_err(|err| ConfigError::Invalid {
                name,
                reason: err.to_string(),
            })
    };

    match (lookup("JWT_SECRET_KEY"), lookup("JWT_PUBLIC_KEY")) {
        (Some(private), Some(public)) => Ok(JwtKeys::Rsa {
            private_pem: decode("JWT_SECRET_KEY", private)?,
            public_pem: decode("JWT_PUBLIC_KEY", public)?,
        }),
        (Some(_), None) => Err(ConfigError::Missing("JWT_PUBLIC_KEY")),
        (None, Some(_)) => Err(ConfigError::Missing("JWT_SECRET_KEY")),
        (None, None) => lookup("JWT_HMAC_SECRET")
            .filter(|it| !it.is_empty())
            .map(|it| JwtKeys::Hmac(it.into_bytes()))
            .ok_or(ConfigError::Missing("JWT_SECRET_KEY")),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("MONGODB_URI", "mongodb://localhost:27017"),
            ("JWT_HMAC_SECRET", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.database_name, DEFAULT_DATABASE_NAME);
        assert_eq!(config.listen_addr, SocketAddr::from(([0, 0, 0, 0], 8080)));
        assert_eq!(config.otp_ttl, time::Duration::minutes(10));
        assert_eq!(config.notification_icon, DEFAULT_NOTIFICATION_ICON);
        assert_matches!(config.jwt, JwtKeys::Hmac(secret) if secret == b"secret");
    }

    #[test]
    fn test_missing_mongodb_uri() {
        let err = Config::from_lookup(lookup(&[("JWT_HMAC_SECRET", "secret")])).unwrap_err();
        assert_matches!(err, ConfigError::Missing("MONGODB_URI"));
    }

    #[test]
    fn test_rsa_requires_both_keys() {
        let err = Config::from_lookup(lookup(&[
            ("MONGODB_URI", "mongodb://localhost:27017"),
            ("JWT_SECRET_KEY", "c2VjcmV0"),
        ]))
        .unwrap_err();
        assert_matches!(err, ConfigError::Missing("JWT_PUBLIC_KEY"));

        let config = Config::from_lookup(lookup(&[
            ("MONGODB_URI", "mongodb://localhost:27017"),
            ("JWT_SECRET_KEY", "c2VjcmV0"),
            ("JWT_PUBLIC_KEY", "cHVibGlj"),
        ]))
        .unwrap();
        assert_matches!(
            config.jwt,
            JwtKeys::Rsa { private_pem, public_pem }
                if private_pem == b"secret" && public_pem == b"public"
        );
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::from_lookup(lookup(&[
            ("MONGODB_URI", "mongodb://localhost:27017"),
            ("JWT_HMAC_SECRET", "secret"),
            ("OTP_TTL_MINUTES", "0"),
        ]))
        .unwrap_err();
        assert_matches!(err, ConfigError::Invalid { name: "OTP_TTL_MINUTES", .. });

        let err = Config::from_lookup(lookup(&[
            ("MONGODB_URI", "mongodb://localhost:27017"),
            ("JWT_HMAC_SECRET", "secret"),
            ("LISTEN_ADDR", "not an address"),
        ]))
        .unwrap_err();
        assert_matches!(err, ConfigError::Invalid { name: "LISTEN_ADDR", .. });
    }
}

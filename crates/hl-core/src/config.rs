use anyhow::{anyhow, Context, Result};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub fn required_env(name: &str) -> Result<String> {
    let value = env::var(name).with_context(|| format!("missing env: {name}"))?;
    if value.trim().is_empty() {
        return Err(anyhow!("empty env: {name}"));
    }
    Ok(value)
}

/// Returns the trimmed value, treating blank as unset.
pub fn optional_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn env_or(name: &str, default: &str) -> String {
    optional_env(name).unwrap_or_else(|| default.to_string())
}

pub fn parse_env<T: FromStr>(name: &str, default: T) -> T {
    optional_env(name)
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

pub fn bool_env(name: &str, default: bool) -> bool {
    match optional_env(name).map(|value| value.to_ascii_lowercase()) {
        Some(value) if matches!(value.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(value) if matches!(value.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

pub fn socket_addr_from_env(name: &str, default: &str) -> Result<SocketAddr> {
    let value = env::var(name).unwrap_or_else(|_| default.to_string());
    SocketAddr::from_str(&value).map_err(|err| anyhow!("invalid socket addr for {name}: {err}"))
}

/// Listen address from `addr_var`, with a bare `PORT` overriding only the port.
pub fn listen_addr_from_env(addr_var: &str, default: &str) -> Result<SocketAddr> {
    let mut addr = socket_addr_from_env(addr_var, default)?;
    if let Some(port) = optional_env("PORT") {
        let port = port
            .parse::<u16>()
            .map_err(|err| anyhow!("invalid PORT: {err}"))?;
        if port == 0 {
            return Err(anyhow!("invalid PORT: must be at least 1"));
        }
        addr.set_port(port);
    }
    Ok(addr)
}

/// Parses lifetimes such as `30s`, `15m`, `12h`, `7d` or a bare number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return Err(anyhow!("empty duration"));
    }
    let (digits, unit) = match value.char_indices().find(|(_, ch)| !ch.is_ascii_digit()) {
        Some((idx, _)) => value.split_at(idx),
        None => (value, "s"),
    };
    let amount = digits
        .parse::<u64>()
        .map_err(|err| anyhow!("invalid duration {value}: {err}"))?;
    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        other => return Err(anyhow!("invalid duration unit {other} in {value}")),
    };
    amount
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow!("duration overflow: {value}"))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
    Test,
}

impl AppEnv {
    pub fn from_env() -> Result<Self> {
        match env_or("APP_ENV", "development").as_str() {
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(anyhow!(
                "invalid APP_ENV {other}: expected development, production or test"
            )),
        }
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnvGuard {
        key: &'static str,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            env::remove_var(self.key);
        }
    }

    fn set_env(key: &'static str, value: &str) -> EnvGuard {
        env::set_var(key, value);
        EnvGuard { key }
    }

    #[test]
    fn required_env_reads_value() {
        let _guard = set_env("HL_TEST_REQUIRED_ENV_PRESENT", "value");
        let value = required_env("HL_TEST_REQUIRED_ENV_PRESENT").unwrap();
        assert_eq!(value, "value");
    }

    #[test]
    fn required_env_missing_returns_error() {
        env::remove_var("HL_TEST_REQUIRED_ENV_MISSING");
        assert!(required_env("HL_TEST_REQUIRED_ENV_MISSING").is_err());
    }

    #[test]
    fn required_env_blank_returns_error() {
        let _guard = set_env("HL_TEST_REQUIRED_ENV_BLANK", "   ");
        assert!(required_env("HL_TEST_REQUIRED_ENV_BLANK").is_err());
    }

    #[test]
    fn optional_env_treats_blank_as_unset() {
        let _guard = set_env("HL_TEST_OPTIONAL_BLANK", "  ");
        assert_eq!(optional_env("HL_TEST_OPTIONAL_BLANK"), None);
    }

    #[test]
    fn parse_env_falls_back_on_garbage() {
        let _guard = set_env("HL_TEST_PARSE_GARBAGE", "abc");
        assert_eq!(parse_env("HL_TEST_PARSE_GARBAGE", 7u64), 7);
    }

    #[test]
    fn bool_env_accepts_common_spellings() {
        let _guard = set_env("HL_TEST_BOOL_ON", "Yes");
        assert!(bool_env("HL_TEST_BOOL_ON", false));
        env::remove_var("HL_TEST_BOOL_UNSET");
        assert!(!bool_env("HL_TEST_BOOL_UNSET", false));
    }

    #[test]
    fn socket_addr_from_env_uses_default() {
        env::remove_var("HL_TEST_SOCKET_DEFAULT");
        let addr = socket_addr_from_env("HL_TEST_SOCKET_DEFAULT", "127.0.0.1:1234").unwrap();
        assert_eq!(addr, "127.0.0.1:1234".parse().unwrap());
    }

    #[test]
    fn socket_addr_from_env_parses_override() {
        let _guard = set_env("HL_TEST_SOCKET_OVERRIDE", "0.0.0.0:4321");
        let addr = socket_addr_from_env("HL_TEST_SOCKET_OVERRIDE", "127.0.0.1:1234").unwrap();
        assert_eq!(addr, "0.0.0.0:4321".parse().unwrap());
    }

    #[test]
    fn socket_addr_from_env_invalid_returns_error() {
        let _guard = set_env("HL_TEST_SOCKET_INVALID", "not-a-socket");
        assert!(socket_addr_from_env("HL_TEST_SOCKET_INVALID", "127.0.0.1:1234").is_err());
    }

    #[test]
    fn parse_duration_supports_units() {
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("12h").unwrap(), Duration::from_secs(43_200));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604_800));
        assert!(parse_duration("7w").is_err());
        assert!(parse_duration("").is_err());
    }
}

use std::env;
use std::time::Duration;

/// Runtime configuration, sourced from the environment.
///
/// Duration knobs are expressed in milliseconds on the environment side
/// (`RATE_LIMIT_WINDOW=60000`), matching the client-facing contract.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen port; ignored when `BIND_ADDR` gives a full address.
    pub port: u16,
    pub bind_addr: Option<String>,
    /// Shared API key; when set, every `/api/*` request must present it.
    pub api_key: Option<String>,
    /// Refuse `/api/*` with 503 when no key is configured.
    pub require_api_key: bool,
    pub cors_origin: Option<String>,
    pub rate_limit_enabled: bool,
    /// Only when true is the forwarded-for header trusted for client keys.
    pub trust_proxy: bool,
    /// Production mode gates the Content-Security-Policy header.
    pub production: bool,
    pub max_payload_size: usize,
    pub max_batch_size: usize,
    pub max_single_log_size: usize,
    pub max_channels: usize,
    pub channel_ttl: Duration,
    pub max_queue_size: usize,
    pub rate_limit_window: Duration,
    pub rate_limit_max: u32,
    pub max_connections: usize,
    pub max_per_client: usize,
    pub stale_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            bind_addr: None,
            api_key: None,
            require_api_key: false,
            cors_origin: None,
            rate_limit_enabled: true,
            trust_proxy: false,
            production: false,
            max_payload_size: 1024 * 1024,
            max_batch_size: 1000,
            max_single_log_size: 64 * 1024,
            max_channels: 100,
            channel_ttl: Duration::from_millis(24 * 60 * 60 * 1000),
            max_queue_size: 1000,
            rate_limit_window: Duration::from_millis(60_000),
            rate_limit_max: 1000,
            max_connections: 200,
            max_per_client: 20,
            stale_timeout: Duration::from_millis(60_000),
            shutdown_timeout: Duration::from_millis(30_000),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup.  Tests use a map
    /// here so they never touch process-global environment state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        Self {
            port: parse(&lookup, "PORT", defaults.port),
            bind_addr: lookup("BIND_ADDR").filter(|addr| !addr.is_empty()),
            api_key: lookup("API_KEY").filter(|key| !key.is_empty()),
            require_api_key: flag(&lookup, "REQUIRE_API_KEY"),
            cors_origin: lookup("CORS_ORIGIN").filter(|origin| !origin.is_empty()),
            // On unless explicitly disabled; the other flags are opt-in.
            rate_limit_enabled: lookup("ENABLE_RATE_LIMIT").as_deref() != Some("false"),
            trust_proxy: flag(&lookup, "TRUST_PROXY"),
            production: lookup("APP_ENV").as_deref() == Some("production"),
            max_payload_size: parse(&lookup, "MAX_PAYLOAD_SIZE", defaults.max_payload_size),
            max_batch_size: parse(&lookup, "MAX_BATCH_SIZE", defaults.max_batch_size),
            max_single_log_size: parse(
                &lookup,
                "MAX_SINGLE_LOG_SIZE",
                defaults.max_single_log_size,
            ),
            max_channels: parse(&lookup, "MAX_CHANNELS", defaults.max_channels),
            channel_ttl: millis(&lookup, "CHANNEL_TTL", defaults.channel_ttl),
            max_queue_size: parse(&lookup, "MAX_QUEUE_SIZE", defaults.max_queue_size),
            rate_limit_window: millis(&lookup, "RATE_LIMIT_WINDOW", defaults.rate_limit_window),
            rate_limit_max: parse(&lookup, "RATE_LIMIT_MAX", defaults.rate_limit_max),
            max_connections: parse(&lookup, "MAX_CONNECTIONS", defaults.max_connections),
            max_per_client: parse(
                &lookup,
                "MAX_CONNECTIONS_PER_CLIENT",
                defaults.max_per_client,
            ),
            stale_timeout: millis(&lookup, "STALE_TIMEOUT", defaults.stale_timeout),
            shutdown_timeout: millis(&lookup, "SHUTDOWN_TIMEOUT", defaults.shutdown_timeout),
        }
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> T {
    lookup(name)
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> bool {
    lookup(name).as_deref() == Some("true")
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
) -> Duration {
    lookup(name)
        .and_then(|raw| raw.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_match_contract() {
        let config = config_from(&[]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_payload_size, 1024 * 1024);
        assert_eq!(config.max_batch_size, 1000);
        assert_eq!(config.max_single_log_size, 64 * 1024);
        assert_eq!(config.rate_limit_max, 1000);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.channel_ttl, Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.max_queue_size, 1000);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert!(config.rate_limit_enabled);
        assert!(!config.trust_proxy);
        assert!(!config.require_api_key);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn rate_limit_disabled_only_by_literal_false() {
        assert!(!config_from(&[("ENABLE_RATE_LIMIT", "false")]).rate_limit_enabled);
        assert!(config_from(&[("ENABLE_RATE_LIMIT", "0")]).rate_limit_enabled);
        assert!(config_from(&[("ENABLE_RATE_LIMIT", "true")]).rate_limit_enabled);
    }

    #[test]
    fn trust_proxy_is_strict_opt_in() {
        assert!(config_from(&[("TRUST_PROXY", "true")]).trust_proxy);
        assert!(!config_from(&[("TRUST_PROXY", "1")]).trust_proxy);
        assert!(!config_from(&[("TRUST_PROXY", "yes")]).trust_proxy);
    }

    #[test]
    fn duration_knobs_are_milliseconds() {
        let config = config_from(&[
            ("RATE_LIMIT_WINDOW", "5000"),
            ("CHANNEL_TTL", "1000"),
            ("SHUTDOWN_TIMEOUT", "250"),
        ]);
        assert_eq!(config.rate_limit_window, Duration::from_secs(5));
        assert_eq!(config.channel_ttl, Duration::from_secs(1));
        assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
    }

    #[test]
    fn malformed_values_fall_back_to_defaults() {
        let config = config_from(&[("PORT", "not-a-port"), ("MAX_CHANNELS", "-3")]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_channels, 100);
    }

    #[test]
    fn empty_api_key_counts_as_unset() {
        assert!(config_from(&[("API_KEY", "")]).api_key.is_none());
        assert_eq!(
            config_from(&[("API_KEY", "secret")]).api_key.as_deref(),
            Some("secret")
        );
    }
}

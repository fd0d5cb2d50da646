use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub const DEFAULT_ROOT_SERVER: &str = "whois.iana.org";
pub const DEFAULT_WHOIS_PORT: u16 = 43;
pub const DEFAULT_IANA_BOOTSTRAP_URL: &str = "https://data.iana.org/rdap/";

/// `rdap_bootstrap` value selecting the live IANA registry.
pub const ONLINE_BOOTSTRAP: &str = "online";

/// Conventional proxy variables, read when `WHOIS_PROXY` / `WHOIS_NO_PROXY` are unset.
const ALL_PROXY_VARS: [&str; 2] = ["ALL_PROXY", "all_proxy"];
const NO_PROXY_VARS: [&str; 2] = ["NO_PROXY", "no_proxy"];

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub whois_dial_timeout_seconds: u64,
    pub whois_timeout_seconds: u64,
    pub rdap_timeout_seconds: u64,
    pub whois_follow_referral: bool,
    pub whois_stats: bool,
    pub rdap_follow_referral: bool,
    pub whois_root_server: String,
    pub whois_port: u16,
    pub max_response_size: usize,
    pub rdap_bootstrap: String,
    pub whois_servers: String,
    pub iana_bootstrap_url: String,
    pub bootstrap_timeout_seconds: u64,
    pub user_agent: String,
    /// `socks5://host:port` for WHOIS connections; empty dials directly.
    pub whois_proxy: String,
    pub whois_no_proxy: String,
    pub start_time: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigData {
    pub port: u16,
    pub whois_dial_timeout_seconds: u64,
    pub whois_timeout_seconds: u64,
    pub rdap_timeout_seconds: u64,
    pub whois_follow_referral: bool,
    pub whois_stats: bool,
    pub rdap_follow_referral: bool,
    pub whois_root_server: String,
    pub whois_port: u16,
    pub max_response_size: usize,
    pub rdap_bootstrap: String,
    pub whois_servers: String,
    pub iana_bootstrap_url: String,
    pub bootstrap_timeout_seconds: u64,
    pub user_agent: String,
    pub whois_proxy: String,
    pub whois_no_proxy: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_data(Self::defaults(false))
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let defaults = Self::defaults(Self::is_production_environment());

        let mut settings = config::Config::builder()
            .set_default("port", Self::get_default_port().unwrap_or(defaults.port) as i64)?
            .set_default("whois_dial_timeout_seconds", defaults.whois_dial_timeout_seconds)?
            .set_default("whois_timeout_seconds", defaults.whois_timeout_seconds)?
            .set_default("rdap_timeout_seconds", defaults.rdap_timeout_seconds)?
            .set_default("whois_follow_referral", defaults.whois_follow_referral)?
            .set_default("whois_stats", defaults.whois_stats)?
            .set_default("rdap_follow_referral", defaults.rdap_follow_referral)?
            .set_default("whois_root_server", defaults.whois_root_server.clone())?
            .set_default("whois_port", defaults.whois_port as i64)?
            .set_default("max_response_size", defaults.max_response_size as i64)?
            .set_default("rdap_bootstrap", defaults.rdap_bootstrap.clone())?
            .set_default("whois_servers", defaults.whois_servers.clone())?
            .set_default("iana_bootstrap_url", defaults.iana_bootstrap_url.clone())?
            .set_default("bootstrap_timeout_seconds", defaults.bootstrap_timeout_seconds)?
            .set_default("user_agent", defaults.user_agent.clone())?
            .set_default("whois_proxy", first_set(&ALL_PROXY_VARS, env_var).unwrap_or_else(|| defaults.whois_proxy.clone()))?
            .set_default("whois_no_proxy", first_set(&NO_PROXY_VARS, env_var).unwrap_or_else(|| defaults.whois_no_proxy.clone()))?;

        // Override with environment variables if present
        settings = Self::apply_env_overrides(settings)?;

        let config_data: ConfigData = settings.build()?.try_deserialize()?;

        Ok(Self::from_data(config_data))
    }

    pub fn whois_dial_timeout(&self) -> Duration {
        Duration::from_secs(self.whois_dial_timeout_seconds)
    }

    pub fn whois_timeout(&self) -> Duration {
        Duration::from_secs(self.whois_timeout_seconds)
    }

    pub fn rdap_timeout(&self) -> Duration {
        Duration::from_secs(self.rdap_timeout_seconds)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_seconds)
    }

    fn from_data(data: ConfigData) -> Self {
        Config {
            port: data.port,
            whois_dial_timeout_seconds: data.whois_dial_timeout_seconds,
            whois_timeout_seconds: data.whois_timeout_seconds,
            rdap_timeout_seconds: data.rdap_timeout_seconds,
            whois_follow_referral: data.whois_follow_referral,
            whois_stats: data.whois_stats,
            rdap_follow_referral: data.rdap_follow_referral,
            whois_root_server: data.whois_root_server,
            whois_port: data.whois_port,
            max_response_size: data.max_response_size,
            rdap_bootstrap: data.rdap_bootstrap,
            whois_servers: data.whois_servers,
            iana_bootstrap_url: data.iana_bootstrap_url,
            bootstrap_timeout_seconds: data.bootstrap_timeout_seconds,
            user_agent: data.user_agent,
            whois_proxy: data.whois_proxy,
            whois_no_proxy: data.whois_no_proxy,
            start_time: Instant::now(),
        }
    }

    fn defaults(is_production: bool) -> ConfigData {
        ConfigData {
            port: 8080,
            whois_dial_timeout_seconds: 5,
            whois_timeout_seconds: if is_production { 30 } else { 15 },
            rdap_timeout_seconds: if is_production { 20 } else { 10 },
            whois_follow_referral: true,
            whois_stats: true,
            rdap_follow_referral: false,
            whois_root_server: DEFAULT_ROOT_SERVER.to_string(),
            whois_port: DEFAULT_WHOIS_PORT,
            max_response_size: 1024 * 1024,
            rdap_bootstrap: String::new(),
            whois_servers: String::new(),
            iana_bootstrap_url: DEFAULT_IANA_BOOTSTRAP_URL.to_string(),
            bootstrap_timeout_seconds: 20,
            user_agent: format!("whodat/{} (RDAP client)", env!("CARGO_PKG_VERSION")),
            whois_proxy: String::new(),
            whois_no_proxy: String::new(),
        }
    }

    fn is_production_environment() -> bool {
        std::env::var("ENVIRONMENT")
            .or_else(|_| std::env::var("ENV"))
            .map(|env| env.to_lowercase() == "production" || env.to_lowercase() == "prod")
            .unwrap_or(false)
    }

    fn get_default_port() -> Option<u16> {
        // Check common environment variables for port
        std::env::var("PORT")
            .or_else(|_| std::env::var("HTTP_PORT"))
            .or_else(|_| std::env::var("SERVER_PORT"))
            .ok()
            .and_then(|p| p.parse().ok())
    }

    fn apply_env_overrides(mut settings: config::ConfigBuilder<config::builder::DefaultState>) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
        let env_mappings = [
            ("PORT", "port"),
            ("WHOIS_DIAL_TIMEOUT_SECONDS", "whois_dial_timeout_seconds"),
            ("WHOIS_DIAL_TIMEOUT", "whois_dial_timeout_seconds"),
            ("WHOIS_TIMEOUT_SECONDS", "whois_timeout_seconds"),
            ("WHOIS_TIMEOUT", "whois_timeout_seconds"),
            ("RDAP_TIMEOUT_SECONDS", "rdap_timeout_seconds"),
            ("RDAP_TIMEOUT", "rdap_timeout_seconds"),
            ("WHOIS_FOLLOW_REFERRAL", "whois_follow_referral"),
            ("WHOIS_STATS", "whois_stats"),
            ("RDAP_FOLLOW_REFERRAL", "rdap_follow_referral"),
            ("WHOIS_ROOT_SERVER", "whois_root_server"),
            ("WHOIS_PORT", "whois_port"),
            ("MAX_RESPONSE_SIZE", "max_response_size"),
            ("RDAP_BOOTSTRAP", "rdap_bootstrap"),
            ("WHOIS_SERVERS", "whois_servers"),
            ("IANA_BOOTSTRAP_URL", "iana_bootstrap_url"),
            ("BOOTSTRAP_TIMEOUT_SECONDS", "bootstrap_timeout_seconds"),
            ("BOOTSTRAP_TIMEOUT", "bootstrap_timeout_seconds"),
            ("USER_AGENT", "user_agent"),
            ("WHOIS_PROXY", "whois_proxy"),
            ("WHOIS_NO_PROXY", "whois_no_proxy"),
        ];

        for (env_var, config_key) in env_mappings {
            if let Ok(value) = std::env::var(env_var) {
                settings = settings.set_override(config_key, value)?;
            }
        }

        Ok(settings)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// The first of `names` that `lookup` finds with a non-blank value.
fn first_set(names: &[&str], lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    names
        .iter()
        .filter_map(|name| lookup(name))
        .find(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.whois_root_server, "whois.iana.org");
        assert_eq!(config.whois_port, 43);
        assert!(config.whois_follow_referral);
        assert!(!config.rdap_follow_referral);
        assert!(config.whois_stats);
        assert!(config.rdap_bootstrap.is_empty());
        assert_eq!(config.whois_timeout(), Duration::from_secs(15));
        assert!(config.whois_dial_timeout() <= config.whois_timeout());
    }

    #[test]
    fn test_proxy_variables_fall_back_in_order() {
        use std::collections::HashMap;

        let env = HashMap::from([
            ("all_proxy", "socks5://127.0.0.1:1081"),
            ("NO_PROXY", " "),
            ("no_proxy", "localhost"),
        ]);
        let lookup = |name: &str| env.get(name).map(|v| v.to_string());

        assert_eq!(first_set(&ALL_PROXY_VARS, lookup).as_deref(), Some("socks5://127.0.0.1:1081"));
        assert_eq!(first_set(&NO_PROXY_VARS, lookup).as_deref(), Some("localhost"));
        assert_eq!(first_set(&["WHOIS_PROXY"], lookup), None);

        let config = Config::default();
        assert!(config.whois_proxy.is_empty());
        assert!(config.whois_no_proxy.is_empty());
    }
}

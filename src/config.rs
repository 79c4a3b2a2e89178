use std::env;
use std::str::FromStr;
use tracing::info;

static ENV_NAMESPACE: &str = "SPA_NAMESPACE";
static ENV_NAME: &str = "SPA_NAME";
static ENV_RESYNC_SECONDS: &str = "SPA_RESYNC_SEC";
static ENV_WEBSOCKET_PORT: &str = "SPA_WEBSOCKET_PORT";

static DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_RESYNC_SECONDS: u64 = 30;
const DEFAULT_WEBSOCKET_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace to watch for deployment changes.
    pub namespace: String,
    /// Deployment to watch; empty means every deployment in the namespace.
    pub name: String,
    pub resync_seconds: u64,
    pub websocket_port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        let config = Self::from_lookup(|key| env::var(key).ok());
        info!(
            "Watching namespace {} deployment {:?} with resync interval {}s, websocket port {}",
            config.namespace, config.name, config.resync_seconds, config.websocket_port
        );
        config
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let namespace = get(ENV_NAMESPACE)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        let name = get(ENV_NAME).unwrap_or_default();
        let resync_seconds = parse_or_default(get(ENV_RESYNC_SECONDS), DEFAULT_RESYNC_SECONDS);
        let websocket_port = parse_or_default(get(ENV_WEBSOCKET_PORT), DEFAULT_WEBSOCKET_PORT);

        Self {
            namespace,
            name,
            resync_seconds,
            websocket_port,
        }
    }
}

// Unset and unparseable values silently fall back to the default
fn parse_or_default<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.namespace, "default");
        assert_eq!(config.name, "");
        assert_eq!(config.resync_seconds, 30);
        assert_eq!(config.websocket_port, 8080);
    }

    #[test]
    fn test_values_are_applied() {
        let config = Config::from_lookup(|key| match key {
            "SPA_NAMESPACE" => Some("staging".to_string()),
            "SPA_NAME" => Some("frontend".to_string()),
            "SPA_RESYNC_SEC" => Some("5".to_string()),
            "SPA_WEBSOCKET_PORT" => Some("9090".to_string()),
            _ => None,
        });
        assert_eq!(config.namespace, "staging");
        assert_eq!(config.name, "frontend");
        assert_eq!(config.resync_seconds, 5);
        assert_eq!(config.websocket_port, 9090);
    }

    #[test]
    fn test_unparseable_numbers_fall_back_silently() {
        let config = Config::from_lookup(|key| match key {
            "SPA_RESYNC_SEC" => Some("soon".to_string()),
            "SPA_WEBSOCKET_PORT" => Some("-1".to_string()),
            _ => None,
        });
        assert_eq!(config.resync_seconds, 30);
        assert_eq!(config.websocket_port, 8080);
    }

    #[test]
    fn test_empty_namespace_falls_back() {
        let config = Config::from_lookup(|key| match key {
            "SPA_NAMESPACE" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.namespace, "default");
    }
}

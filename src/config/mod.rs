use std::env;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3000;

/// Server bind settings resolved from the environment.
///
/// `TSUBAKI_ADDRESS` and `TSUBAKI_PORT` override the defaults; explicit
/// listen options override both.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let address =
            env::var("TSUBAKI_ADDRESS").unwrap_or_else(|_| DEFAULT_ADDRESS.to_string());
        let port = env::var("TSUBAKI_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        Self { address, port }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        let config = ServerConfig::default();
        assert_eq!(config.address, "127.0.0.1");
        assert_eq!(config.port, 3000);
    }

    // the only test that touches these variables, so safe alongside the
    // parallel test runner
    #[test]
    fn env_overrides_and_falls_back_on_garbage() {
        std::env::set_var("TSUBAKI_ADDRESS", "0.0.0.0");
        std::env::set_var("TSUBAKI_PORT", "8080");
        let config = ServerConfig::from_env();
        assert_eq!(config.address, "0.0.0.0");
        assert_eq!(config.port, 8080);

        std::env::set_var("TSUBAKI_PORT", "not-a-port");
        let config = ServerConfig::from_env();
        assert_eq!(config.port, DEFAULT_PORT);

        std::env::remove_var("TSUBAKI_ADDRESS");
        std::env::remove_var("TSUBAKI_PORT");
    }
}

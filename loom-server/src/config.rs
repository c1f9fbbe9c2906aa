//! The `loom-server` binary's top level config file, loaded with
//! [`weave::config::load_toml`]. Mirrors `gamecore::config::GameConfig`'s
//! shape: a `[server]` table for listen/thread knobs, a `[log]` table handed
//! straight to `weave::logging::init`.

use serde_derive::{Deserialize, Serialize};
use weave::logging::LogConfig;

pub const DEFAULT_PORT: u16 = 7800;

#[derive(Clone, Serialize, Deserialize)]
pub struct Server {
    pub port: u16,
    pub worker_num: u8,
    pub io_worker_num: u8,
    pub idle_timeout_secs: Option<u64>,
}

impl Default for Server {
    fn default() -> Server {
        Server {
            port: DEFAULT_PORT,
            worker_num: 4,
            io_worker_num: 0,
            idle_timeout_secs: Some(60),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server: Server,
    pub log: LogConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("loom-server-test-{}-{}.toml", std::process::id(), name));
        path
    }

    fn round_trip(config: &ServerConfig, name: &str) -> ServerConfig {
        let rendered = weave::config::to_toml_string(config);
        let path = temp_path(name);
        std::fs::write(&path, rendered).unwrap();
        let reloaded = weave::config::load_toml(&path);
        let _ = std::fs::remove_file(&path);
        reloaded
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let original = ServerConfig::default();
        let reloaded = round_trip(&original, "default");

        assert_eq!(reloaded.server.port, original.server.port);
        assert_eq!(reloaded.server.worker_num, original.server.worker_num);
        assert_eq!(reloaded.server.io_worker_num, original.server.io_worker_num);
        assert_eq!(reloaded.server.idle_timeout_secs, original.server.idle_timeout_secs);
        assert_eq!(reloaded.log.level, original.log.level);
        assert_eq!(reloaded.log.destination, original.log.destination);
        assert_eq!(reloaded.log.path, original.log.path);
    }

    #[test]
    fn port_override_and_disabled_idle_timeout_survive_a_round_trip() {
        let mut original = ServerConfig::default();
        original.server.port = 9001;
        original.server.idle_timeout_secs = None;
        let reloaded = round_trip(&original, "port-override");

        assert_eq!(reloaded.server.port, 9001);
        assert_eq!(reloaded.server.idle_timeout_secs, None);
    }
}

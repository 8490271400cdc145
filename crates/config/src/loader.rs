use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::BackboneConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "backbone.toml",
    "backbone.yaml",
    "backbone.yml",
    "backbone.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<BackboneConfig> {
    let value = load_config_value(path)?;
    Ok(serde_json::from_value(value)?)
}

/// Read, substitute and parse a config file into a format-neutral tree.
pub(crate) fn load_config_value(path: &Path) -> anyhow::Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config_value(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./backbone.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/backbone/backbone.{toml,yaml,yml,json}` (user-global)
///
/// Returns `BackboneConfig::default()` if no config file is found.
pub fn discover_and_load() -> BackboneConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    BackboneConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    find_in(Path::new(".")).or_else(|| config_dir().and_then(|dir| find_in(&dir)))
}

fn find_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/backbone/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "backbone").map(|d| d.config_dir().to_path_buf())
}

fn parse_config_value(raw: &str, path: &Path) -> anyhow::Result<serde_json::Value> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => {
            let v: toml::Value = toml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, backbone_core::PartialConsumerBehavior, std::time::Duration};

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "backbone.toml", r#"
[route]
environment = "dev"
uri = "orders"

[consumer]
group = "billing"
batch_size = 10
ack_timeout_ms = 2000
partial_behavior = "sequential"

[consumer.claiming]
min_idle_ms = 30000

[sqlite]
url = "sqlite://backbone.db"
"#);
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.route.key(), "dev:orders::");
        assert_eq!(cfg.consumer.group.as_deref(), Some("billing"));
        assert_eq!(cfg.consumer.options.batch_size, 10);
        assert_eq!(cfg.consumer.options.ack_timeout, Some(Duration::from_secs(2)));
        assert_eq!(
            cfg.consumer.options.partial_behavior,
            PartialConsumerBehavior::Sequential
        );
        assert_eq!(cfg.consumer.options.claiming.min_idle, Duration::from_secs(30));
        assert_eq!(cfg.consumer.options.claiming.empty_batch_count, 1000);
        assert_eq!(cfg.sqlite.url.as_deref(), Some("sqlite://backbone.db"));
    }

    #[test]
    fn loads_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = write(&dir, "backbone.yaml", "route:\n  uri: orders\nconsumer:\n  batch_size: 3\n");
        let json = write(&dir, "backbone.json", r#"{"route": {"uri": "orders"}, "metrics": {"enabled": true}}"#);
        assert_eq!(load_config(&yaml).unwrap().consumer.options.batch_size, 3);
        assert!(load_config(&json).unwrap().metrics.enabled);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "backbone.ini", "uri=orders");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn find_in_prefers_toml() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir, "backbone.json", "{}");
        write(&dir, "backbone.toml", "");
        assert_eq!(
            find_in(dir.path()).unwrap().file_name().unwrap(),
            "backbone.toml"
        );
    }
}

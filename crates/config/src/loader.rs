use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::MurmurConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["murmur.toml", "murmur.yaml", "murmur.yml", "murmur.json"];

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Restrict config discovery to `path`. Each call replaces the previous override.
pub fn set_config_dir(path: PathBuf) {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = Some(path);
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = None;
}

fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<MurmurConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
        .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. the override directory, if set (nothing else is searched)
/// 2. `./murmur.{toml,yaml,yml,json}`
/// 3. `~/.config/murmur/murmur.{toml,yaml,yml,json}`
///
/// Falls back to `MurmurConfig::default()` when nothing is found or the file
/// does not parse.
pub fn discover_and_load() -> MurmurConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return MurmurConfig::default();
    };
    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            MurmurConfig::default()
        },
    }
}

fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return first_existing(&dir);
    }
    first_existing(Path::new(".")).or_else(|| {
        home_dir()
            .map(|h| h.join(".config").join("murmur"))
            .and_then(|dir| first_existing(&dir))
    })
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the data directory: `~/.murmur/`.
pub fn data_dir() -> PathBuf {
    home_dir()
        .map(|h| h.join(".murmur"))
        .unwrap_or_else(|| PathBuf::from(".murmur"))
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<MurmurConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();

        let yaml = dir.path().join("murmur.yaml");
        std::fs::write(&yaml, "server:\n  port: 7001\n").unwrap();
        assert_eq!(load_config(&yaml).unwrap().server.port, 7001);

        let json = dir.path().join("murmur.json");
        std::fs::write(&json, r#"{"messages":{"max_text_chars":12}}"#).unwrap();
        assert_eq!(load_config(&json).unwrap().messages.max_text_chars, 12);
    }

    #[test]
    fn unsupported_extension_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("murmur.ini");
        std::fs::write(&path, "port=1").unwrap();
        let err = load_config(&path).unwrap_err().to_string();
        assert!(err.contains("unsupported config format"), "{err}");
    }

    #[test]
    fn override_dir_is_searched_exclusively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("murmur.toml"),
            "[users]\nknown = [\"alice\", \"bob\"]\n",
        )
        .unwrap();

        set_config_dir(dir.path().to_path_buf());
        let cfg = discover_and_load();
        let empty = tempfile::tempdir().unwrap();
        set_config_dir(empty.path().to_path_buf());
        let fallback = discover_and_load();
        clear_config_dir();

        assert_eq!(cfg.users.known, vec!["alice", "bob"]);
        assert!(fallback.users.known.is_empty());
    }
}

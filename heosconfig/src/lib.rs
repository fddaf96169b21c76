//! # HEOS control configuration
//!
//! Configuration for the HEOS control core:
//! - an embedded default YAML document
//! - an optional external YAML file merged on top of it
//! - `HEOS_CONFIG__SECTION__KEY=value` environment overrides
//! - typed getters falling back to the built-in defaults
//!
//! ## Usage
//!
//! ```no_run
//! use heosconfig::get_config;
//!
//! let config = get_config();
//! let cache = config.get_cache_path();
//! let timeout = config.get_discovery_timeout();
//! println!("cache at {} (discovery timeout {:?})", cache.display(), timeout);
//! ```

use anyhow::{Result, anyhow};
use dirs::config_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tracing::{info, warn};

// Embedded defaults
const DEFAULT_CONFIG: &str = include_str!("heos.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> = Arc::new(Config::load_or_default());
}

const ENV_CONFIG_FILE: &str = "HEOS_CONFIG";
const ENV_PREFIX: &str = "HEOS_CONFIG__";
const CONFIG_FILE_NAME: &str = "heos.yaml";

/// Registry cache file used when the configuration does not name one.
pub const DEFAULT_CACHE_PATH: &str = ".heos";
const DEFAULT_COMMAND_PORT: u16 = 1255;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 5;
const DEFAULT_SEARCH_TARGET: &str = "urn:schemas-denon-com:device:ACT-Denon:1";
const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 5;
const DEFAULT_DISCOVERY_RETRIES: u64 = 1;
const DEFAULT_DISCOVERY_MX: u64 = 3;

/// Macro to generate getter/setter for unsigned integer values with default
macro_rules! impl_uint_config {
    ($getter:ident, $setter:ident, $ty:ty, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> $ty {
            match self.get_value($path) {
                Ok(Value::Number(n)) => match n.as_u64().and_then(|v| <$ty>::try_from(v).ok()) {
                    Some(v) => v,
                    None => {
                        warn!(
                            path = %$path.join("."),
                            value = %n,
                            "Out of range value, using default"
                        );
                        $default
                    }
                },
                Ok(Value::String(s)) => s.trim().parse::<$ty>().unwrap_or_else(|_| {
                    warn!(path = %$path.join("."), value = %s, "Invalid number, using default");
                    $default
                }),
                _ => $default,
            }
        }

        pub fn $setter(&self, value: $ty) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Macro to generate getter/setter for durations stored as whole seconds
macro_rules! impl_secs_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Duration {
            match self.get_value($path) {
                Ok(Value::Number(n)) => match n.as_u64() {
                    Some(secs) => Duration::from_secs(secs),
                    None => Duration::from_secs($default),
                },
                Ok(Value::String(s)) => Duration::from_secs(s.trim().parse().unwrap_or($default)),
                _ => Duration::from_secs($default),
            }
        }

        pub fn $setter(&self, value: Duration) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value.as_secs())))
        }
    };
}

/// Configuration manager for the HEOS control core
///
/// Values live in a YAML tree. Keys are case-insensitive (stored lower
/// case). When the configuration is backed by a file, [`Config::set_value`]
/// writes the change back to it.
#[derive(Debug)]
pub struct Config {
    path: Option<PathBuf>,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            data: Mutex::new(self.lock().clone()),
        }
    }
}

impl Config {
    /// Locates the external configuration file
    ///
    /// Searched in order:
    /// 1. the `file` argument
    /// 2. the `HEOS_CONFIG` environment variable
    /// 3. `heos.yaml` in the current directory
    /// 4. `heos/config.yaml` in the user's configuration directory
    fn find_config_file(file: Option<&Path>) -> Option<PathBuf> {
        if let Some(file) = file {
            return Some(file.to_path_buf());
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_FILE) {
            info!(env_var = ENV_CONFIG_FILE, path = %env_path, "Using config file from env");
            return Some(PathBuf::from(env_path));
        }

        let local = Path::new(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local.to_path_buf());
        }

        config_dir()
            .map(|dir| dir.join("heos").join("config.yaml"))
            .filter(|path| path.exists())
    }

    /// Loads the configuration
    ///
    /// Steps:
    /// 1. parse the embedded defaults
    /// 2. merge the external file (keys lower-cased) if one is found and exists
    /// 3. apply `HEOS_CONFIG__*` environment overrides
    pub fn load_config(file: Option<&Path>) -> Result<Self> {
        let mut value = lower_keys_value(serde_yaml::from_str(DEFAULT_CONFIG)?);

        let path = Self::find_config_file(file);
        match &path {
            Some(path) if path.exists() => {
                let data = fs::read(path)?;
                let external: Value = serde_yaml::from_slice(&data)?;
                merge_yaml(&mut value, &lower_keys_value(external));
                info!(config_file = %path.display(), "Loaded config file");
            }
            Some(path) => {
                info!(config_file = %path.display(), "Config file not found, using defaults");
            }
            None => info!("No config file, using embedded defaults"),
        }

        apply_env_overrides(&mut value, env::vars());

        Ok(Self {
            path,
            data: Mutex::new(value),
        })
    }

    /// Builds a configuration from a YAML string merged over the defaults.
    ///
    /// Not backed by a file and ignores the environment.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut value = lower_keys_value(serde_yaml::from_str(DEFAULT_CONFIG)?);
        let external: Value = serde_yaml::from_str(yaml)?;
        merge_yaml(&mut value, &lower_keys_value(external));

        Ok(Self {
            path: None,
            data: Mutex::new(value),
        })
    }

    /// Embedded defaults only.
    pub fn defaults() -> Self {
        let value = serde_yaml::from_str(DEFAULT_CONFIG).unwrap_or(Value::Mapping(Mapping::new()));
        Self {
            path: None,
            data: Mutex::new(lower_keys_value(value)),
        }
    }

    fn load_or_default() -> Self {
        Self::load_config(None).unwrap_or_else(|err| {
            warn!("Failed to load HEOS configuration: {}, using defaults", err);
            Self::defaults()
        })
    }

    fn lock(&self) -> MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Saves the current configuration to its file
    pub fn save(&self) -> Result<()> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| anyhow!("Configuration is not backed by a file"))?;
        let yaml = serde_yaml::to_string(&*self.lock())?;
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path
    ///
    /// The change is saved when the configuration is backed by a file.
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys (e.g. `&["command", "port"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.lock();
            set_value_internal(&mut data, path, value)?;
        }
        if self.path.is_some() {
            self.save()?;
        }
        Ok(())
    }

    /// Gets a configuration value at the specified path
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.lock();
        let mut current = &*data;
        for (i, key) in path.iter().enumerate() {
            match current {
                Value::Mapping(map) => match map.get(&Value::String(key.to_lowercase())) {
                    Some(next) => current = next,
                    None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
                },
                _ => return Err(anyhow!("Path {} is not a mapping", path[..i].join("."))),
            }
        }
        Ok(current.clone())
    }

    /// Path of the registry cache file (default `.heos`).
    pub fn get_cache_path(&self) -> PathBuf {
        match self.get_value(&["registry", "cache_path"]) {
            Ok(Value::String(s)) if !s.is_empty() => PathBuf::from(s),
            _ => PathBuf::from(DEFAULT_CACHE_PATH),
        }
    }

    pub fn set_cache_path(&self, path: &Path) -> Result<()> {
        self.set_value(
            &["registry", "cache_path"],
            Value::String(path.to_string_lossy().to_string()),
        )
    }

    /// Device type searched for during discovery.
    pub fn get_search_target(&self) -> String {
        match self.get_value(&["discovery", "search_target"]) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => DEFAULT_SEARCH_TARGET.to_string(),
        }
    }

    impl_uint_config!(
        get_command_port,
        set_command_port,
        u16,
        &["command", "port"],
        DEFAULT_COMMAND_PORT
    );

    impl_secs_config!(
        get_command_timeout,
        set_command_timeout,
        &["command", "timeout_secs"],
        DEFAULT_COMMAND_TIMEOUT_SECS
    );

    impl_secs_config!(
        get_discovery_timeout,
        set_discovery_timeout,
        &["discovery", "timeout_secs"],
        DEFAULT_DISCOVERY_TIMEOUT_SECS
    );

    impl_uint_config!(
        get_discovery_retries,
        set_discovery_retries,
        u32,
        &["discovery", "retries"],
        DEFAULT_DISCOVERY_RETRIES as u32
    );

    impl_uint_config!(
        get_discovery_mx,
        set_discovery_mx,
        u32,
        &["discovery", "mx"],
        DEFAULT_DISCOVERY_MX as u32
    );
}

/// Returns the global configuration instance, loaded on first access.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
    if path.is_empty() {
        *data = value;
        return Ok(());
    }
    if let Value::Mapping(map) = data {
        let key = Value::String(path[0].to_lowercase());
        if path.len() == 1 {
            map.insert(key, value);
        } else {
            let entry = map.entry(key).or_insert(Value::Mapping(Mapping::new()));
            set_value_internal(entry, &path[1..], value)?;
        }
        Ok(())
    } else {
        Err(anyhow!("Current node is not a map"))
    }
}

fn apply_env_overrides<I>(config: &mut Value, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        if let Some(rest) = key.strip_prefix(ENV_PREFIX) {
            let key_path = rest.split("__").collect::<Vec<_>>();
            let yaml_value =
                serde_yaml::from_str::<Value>(&value).unwrap_or(Value::String(value.clone()));
            if let Err(err) = set_value_internal(config, &key_path, yaml_value) {
                warn!(env_var = %key, "Ignoring override: {}", err);
            }
        }
    }
}

fn lower_keys_value(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut new_map = Mapping::new();
            for (k, v) in map {
                let k = match k {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other,
                };
                new_map.insert(k, lower_keys_value(v));
            }
            Value::Mapping(new_map)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys_value).collect()),
        _ => value,
    }
}

/// Merges external YAML configuration into default configuration
///
/// Mappings are merged key by key, scalars and sequences are replaced.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::defaults();
        assert_eq!(config.get_cache_path(), PathBuf::from(".heos"));
        assert_eq!(config.get_command_port(), 1255);
        assert_eq!(config.get_command_timeout(), Duration::from_secs(5));
        assert_eq!(config.get_discovery_timeout(), Duration::from_secs(5));
        assert_eq!(config.get_discovery_retries(), 1);
        assert_eq!(config.get_discovery_mx(), 3);
        assert_eq!(
            config.get_search_target(),
            "urn:schemas-denon-com:device:ACT-Denon:1"
        );
    }

    #[test]
    fn test_external_yaml_is_merged() {
        let config = Config::from_yaml_str(
            "Discovery:\n  Retries: 3\nregistry:\n  cache_path: /tmp/heos-cache\n",
        )
        .unwrap();

        assert_eq!(config.get_discovery_retries(), 3);
        // untouched keys keep their defaults
        assert_eq!(config.get_discovery_mx(), 3);
        assert_eq!(config.get_cache_path(), PathBuf::from("/tmp/heos-cache"));
    }

    #[test]
    fn test_env_overrides() {
        let mut value = lower_keys_value(serde_yaml::from_str(DEFAULT_CONFIG).unwrap());
        let vars = vec![
            ("HEOS_CONFIG__COMMAND__PORT".to_string(), "4321".to_string()),
            ("HEOS_CONFIG__DISCOVERY__SEARCH_TARGET".to_string(), "ssdp:all".to_string()),
            ("UNRELATED".to_string(), "1".to_string()),
        ];
        apply_env_overrides(&mut value, vars);

        let config = Config {
            path: None,
            data: Mutex::new(value),
        };
        assert_eq!(config.get_command_port(), 4321);
        assert_eq!(config.get_search_target(), "ssdp:all");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config =
            Config::from_yaml_str("command:\n  port: 700000\ndiscovery:\n  mx: many\n").unwrap();
        assert_eq!(config.get_command_port(), 1255);
        assert_eq!(config.get_discovery_mx(), 3);
    }

    #[test]
    fn test_set_value_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heos.yaml");

        let config = Config::load_config(Some(&path)).unwrap();
        config.set_discovery_retries(4).unwrap();
        assert!(path.exists());

        let reloaded = Config::load_config(Some(&path)).unwrap();
        assert_eq!(reloaded.get_discovery_retries(), 4);
    }

    #[test]
    fn test_missing_path() {
        let config = Config::defaults();
        assert!(config.get_value(&["nope", "nothing"]).is_err());
        assert!(config.save().is_err());
    }
}

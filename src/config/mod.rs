use std::{
    collections::HashMap,
    env, fs,
    io::{BufRead, BufReader},
    path::PathBuf,
};

use directories::BaseDirs;

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        let mut map = default_map();
        let config_path = default_config_path();

        // Read .pshostrc if exists
        if let Ok(file) = fs::File::open(&config_path) {
            map.extend(parse_rc(BufReader::new(file)));
        }

        // Overlay environment variables (take precedence)
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self { inner: map, config_path }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Engine executable name or path; `auto` lets the engine pick.
    pub fn engine(&self) -> String {
        self.get("PSHOST_ENGINE").unwrap_or_else(|| "auto".into())
    }

    pub fn wait_for_key(&self) -> bool {
        self.get_bool("PSHOST_WAIT_FOR_KEY")
    }

    /// `tracing` filter directive.
    pub fn log_filter(&self) -> String {
        self.get("PSHOST_LOG").unwrap_or_else(|| "warn".into())
    }
}

/// `KEY=VALUE` lines; blank lines and `#` comments are skipped.
fn parse_rc<R: BufRead>(reader: R) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in reader.lines().map_while(Result::ok) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    map
}

fn is_config_key(k: &str) -> bool {
    k.starts_with("PSHOST_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("pshost").join(".pshostrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert("PSHOST_ENGINE".into(), "auto".into());
    m.insert("PSHOST_WAIT_FOR_KEY".into(), "true".into());
    m.insert("PSHOST_LOG".into(), "warn".into());
    m
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HuiyingConfig {
    pub storage: StorageConfig,
    pub onebot: Option<OneBotConfig>,
    /// Business options, kept untyped so [`Settings::parse`] can coerce
    /// sloppy hand-written values instead of rejecting the whole file.
    pub reply: toml::Table,
}

impl HuiyingConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: HuiyingConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if file doesn't exist or is invalid, return defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({:#}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from a variable lookup (the process environment in production).
    fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = var("HUIYING_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = var("ONEBOT_WS_URL") {
            self.onebot = Some(OneBotConfig {
                ws_url: url,
                access_token: var("ONEBOT_ACCESS_TOKEN"),
            });
        }
    }

    pub fn settings(&self) -> Settings {
        Settings::parse(&self.reply)
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Host-provided data directory. When unset, a per-user data dir is used.
    pub data_dir: Option<PathBuf>,
    pub file_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            file_name: "keywords.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OneBotConfig {
    pub ws_url: String,
    pub access_token: Option<String>,
}

// ============================================================================
// Settings
// ============================================================================

/// Runtime matching settings, derived wholesale from the `[reply]` table.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub enable_regex: bool,
    pub case_sensitive: bool,
    /// Always within `[0, 1]`.
    pub reply_probability: f64,
    /// Identities allowed to run commands. Empty = everyone.
    pub whitelist: BTreeSet<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_regex: false,
            case_sensitive: false,
            reply_probability: 1.0,
            whitelist: BTreeSet::new(),
        }
    }
}

impl Settings {
    /// Parse settings from an options table. Never fails: bad values are
    /// logged and replaced with their defaults.
    pub fn parse(options: &toml::Table) -> Self {
        let enable_regex = options
            .get("enable_regex")
            .map_or(false, |v| parse_flag("enable_regex", v));
        let case_sensitive = options
            .get("case_sensitive")
            .map_or(false, |v| parse_flag("case_sensitive", v));
        let reply_probability = options
            .get("reply_probability")
            .map_or(1.0, parse_probability);
        let whitelist = options.get("whitelist").map(parse_whitelist).unwrap_or_default();

        if whitelist.is_empty() {
            tracing::info!("指令白名单为空，所有用户均可使用指令");
        } else {
            tracing::info!("已启用指令白名单，共 {} 个用户", whitelist.len());
        }

        Self {
            enable_regex,
            case_sensitive,
            reply_probability,
            whitelist,
        }
    }
}

fn parse_flag(name: &str, value: &toml::Value) -> bool {
    match value {
        toml::Value::Boolean(b) => *b,
        toml::Value::Integer(n) => *n != 0,
        toml::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => true,
            "false" | "no" | "off" | "0" | "" => false,
            _ => {
                tracing::warn!("配置项 {} 无法解析为布尔值（{:?}），已使用 false", name, s);
                false
            }
        },
        other => {
            tracing::warn!("配置项 {} 类型不正确（{}），已使用 false", name, other.type_str());
            false
        }
    }
}

fn parse_probability(value: &toml::Value) -> f64 {
    let parsed = match value {
        toml::Value::Float(f) => Some(*f),
        toml::Value::Integer(n) => Some(*n as f64),
        toml::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    let Some(p) = parsed.filter(|p| !p.is_nan()) else {
        tracing::warn!("配置项 reply_probability 解析失败，已重置为 1.0");
        return 1.0;
    };

    if (0.0..=1.0).contains(&p) {
        p
    } else {
        let clamped = p.clamp(0.0, 1.0);
        tracing::warn!("配置项 reply_probability = {} 超出范围，已调整为 {}", p, clamped);
        clamped
    }
}

fn parse_whitelist(value: &toml::Value) -> BTreeSet<String> {
    let entries: Vec<String> = match value {
        toml::Value::Array(items) => items.iter().map(value_to_identity).collect(),
        other => vec![value_to_identity(other)],
    };
    entries
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn value_to_identity(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Settings source
// ============================================================================

/// Where settings are (re)derived from on construction and reload.
#[derive(Debug, Clone)]
pub enum SettingsSource {
    Inline(toml::Table),
    /// Re-read the config file every time, so edits apply on reload.
    File(PathBuf),
}

impl SettingsSource {
    pub fn resolve(&self) -> Settings {
        match self {
            SettingsSource::Inline(table) => Settings::parse(table),
            SettingsSource::File(path) => HuiyingConfig::load_or_default(path).settings(),
        }
    }
}

impl Default for SettingsSource {
    fn default() -> Self {
        SettingsSource::Inline(toml::Table::new())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn table(s: &str) -> toml::Table {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn test_default_config() {
        let cfg = HuiyingConfig::default();
        assert_eq!(cfg.storage.file_name, "keywords.json");
        assert!(cfg.storage.data_dir.is_none());
        assert!(cfg.onebot.is_none());
        assert_eq!(cfg.settings(), Settings::default());
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[storage]
data_dir = "/var/lib/huiying"

[onebot]
ws_url = "ws://localhost:8080"
access_token = "secret"

[reply]
enable_regex = true
case_sensitive = true
reply_probability = 0.5
whitelist = ["10001", 10002]
"#;
        let cfg: HuiyingConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.storage.data_dir, Some(PathBuf::from("/var/lib/huiying")));
        assert_eq!(cfg.storage.file_name, "keywords.json");
        let onebot = cfg.onebot.clone().unwrap();
        assert_eq!(onebot.ws_url, "ws://localhost:8080");
        assert_eq!(onebot.access_token, Some("secret".to_string()));

        let settings = cfg.settings();
        assert!(settings.enable_regex);
        assert!(settings.case_sensitive);
        assert_eq!(settings.reply_probability, 0.5);
        assert_eq!(
            settings.whitelist.iter().cloned().collect::<Vec<_>>(),
            ["10001", "10002"]
        );
    }

    #[test]
    fn test_probability_clamped() {
        assert_eq!(Settings::parse(&table("reply_probability = 3.5")).reply_probability, 1.0);
        assert_eq!(Settings::parse(&table("reply_probability = -1")).reply_probability, 0.0);
        assert_eq!(Settings::parse(&table("reply_probability = 0")).reply_probability, 0.0);
    }

    #[test]
    fn test_probability_unparsable_defaults_to_one() {
        assert_eq!(Settings::parse(&table(r#"reply_probability = "often""#)).reply_probability, 1.0);
        assert_eq!(Settings::parse(&table("reply_probability = nan")).reply_probability, 1.0);
        assert_eq!(Settings::parse(&table("reply_probability = [0.5]")).reply_probability, 1.0);
        assert_eq!(Settings::parse(&table(r#"reply_probability = " 0.25 ""#)).reply_probability, 0.25);
    }

    #[test]
    fn test_flags_accept_loose_values() {
        let s = Settings::parse(&table(r#"enable_regex = "yes"
case_sensitive = 1"#));
        assert!(s.enable_regex);
        assert!(s.case_sensitive);

        let s = Settings::parse(&table(r#"enable_regex = "maybe"
case_sensitive = 0"#));
        assert!(!s.enable_regex);
        assert!(!s.case_sensitive);
    }

    #[test]
    fn test_whitelist_string_and_blanks() {
        let s = Settings::parse(&table(r#"whitelist = " admin ""#));
        assert_eq!(s.whitelist.len(), 1);
        assert!(s.whitelist.contains("admin"));

        let s = Settings::parse(&table(r#"whitelist = ["", "  ", "x"]"#));
        assert_eq!(s.whitelist.len(), 1);
    }

    #[test]
    fn test_overrides() {
        let mut cfg = HuiyingConfig::default();
        cfg.apply_overrides(|name| match name {
            "HUIYING_DATA_DIR" => Some("/tmp/hy".to_string()),
            "ONEBOT_WS_URL" => Some("ws://127.0.0.1:3001".to_string()),
            _ => None,
        });
        assert_eq!(cfg.storage.data_dir, Some(PathBuf::from("/tmp/hy")));
        let onebot = cfg.onebot.unwrap();
        assert_eq!(onebot.ws_url, "ws://127.0.0.1:3001");
        assert!(onebot.access_token.is_none());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let cfg = HuiyingConfig::load_or_default("/nonexistent/huiying.toml");
        assert_eq!(cfg.storage.file_name, "keywords.json");
    }

    #[test]
    fn test_settings_source_inline() {
        let source = SettingsSource::Inline(table("enable_regex = true"));
        assert!(source.resolve().enable_regex);
        assert_eq!(SettingsSource::default().resolve(), Settings::default());
    }
}

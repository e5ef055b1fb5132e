//! Layered configuration - built-in defaults, global file, case document, command line
//!
//! Sections hold plain string options. Lookups fall back to the `DEFAULT`
//! section, and values may reference other options as `{key}` (same section)
//! or `{section.key}`.

use crate::core::Context;
use crate::document::CaseDocument;
use crate::error::ConfigError;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Section every lookup falls back to
pub const DEFAULT_SECTION: &str = "DEFAULT";

/// Section holding server, worker and queue settings
pub const GENERAL_SECTION: &str = "general";

/// How many rounds of `{reference}` expansion `get` performs
const MAX_INTERPOLATION_DEPTH: usize = 8;

const BUILTIN_DEFAULTS: &str = r#"
DEFAULT:
  do: true
  log: true
general:
  server_port: 18000
  worker_port: 18001
  poll_interval: 10
  connect_attempts: 20
  connect_delay_ms: 500
  info_timeout_ms: 2000
  worker_command: ""
"#;

/// Ordered sections of a configuration source
pub type Sections = Vec<(String, BTreeMap<String, String>)>;

/// Resolved key/value provider for tasks, jobs and servers
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    sections: Sections,
    case_config: Option<PathBuf>,
}

impl Configuration {
    /// Only the built-in defaults
    pub fn builtin() -> Self {
        let mut config = Self::default();
        // The literal above is part of the binary, it always parses.
        if let Ok(sections) = parse_sections(BUILTIN_DEFAULTS, "<builtin>") {
            config.merge_sections(&sections);
        }
        config
    }

    /// Default location of the global configuration file
    pub fn global_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".caseflow").join("config.yml"))
    }

    /// Built-in defaults, then the global file, then the case document, then
    /// `section.key=value,...` overrides
    pub fn load(case: Option<&CaseDocument>, overrides: Option<&str>) -> Result<Self, ConfigError> {
        Self::load_with_global(case, overrides, Self::global_path().as_deref())
    }

    /// Same as [`Configuration::load`] with an explicit global file
    pub fn load_with_global(
        case: Option<&CaseDocument>,
        overrides: Option<&str>,
        global: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::builtin();

        if let Some(path) = global.filter(|p| p.is_file()) {
            log::debug!("Reading global configuration {}", path.display());
            config.merge_file(path)?;
        }

        if let Some(doc) = case {
            config.merge_sections(&doc.config);
            config.case_config = Some(doc.path.clone());
        }

        if let Some(arg) = overrides {
            config.merge_overrides(arg);
        }

        Ok(config)
    }

    /// Merge a YAML file of `section: {key: value}` mappings
    pub fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let sections = parse_sections(&text, &path.display().to_string())?;
        self.merge_sections(&sections);
        Ok(())
    }

    /// Merge sections, later values win
    pub fn merge_sections(&mut self, sections: &Sections) {
        for (name, options) in sections {
            for (key, value) in options {
                self.set(name, key, value);
            }
        }
    }

    /// Merge `section.key=value,...` from the command line; malformed items are skipped
    pub fn merge_overrides(&mut self, arg: &str) {
        for item in arg.split(',') {
            let Some((path, value)) = item.split_once('=') else {
                continue;
            };
            let Some((section, key)) = path.trim().split_once('.') else {
                continue;
            };
            if section.is_empty() || key.is_empty() {
                continue;
            }
            self.set(section, key, value.trim());
        }
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.sections.iter_mut().find(|(name, _)| name == section) {
            Some((_, options)) => {
                options.insert(key.to_string(), value);
            }
            None => {
                let mut options = BTreeMap::new();
                options.insert(key.to_string(), value);
                self.sections.push((section.to_string(), options));
            }
        }
    }

    /// Path of the case document this configuration was loaded for
    pub fn case_config(&self) -> Option<&Path> {
        self.case_config.as_deref()
    }

    /// Section names in definition order, without `DEFAULT`
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections
            .iter()
            .map(|(name, _)| name.as_str())
            .filter(|name| *name != DEFAULT_SECTION)
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.options(section).is_some()
    }

    /// Options defined directly in a section, without `DEFAULT` fallback
    pub fn options(&self, section: &str) -> Option<&BTreeMap<String, String>> {
        self.sections
            .iter()
            .find(|(name, _)| name == section)
            .map(|(_, options)| options)
    }

    /// Uninterpolated value, falling back to `DEFAULT`
    pub fn raw(&self, section: &str, key: &str) -> Option<&str> {
        self.options(section)
            .and_then(|options| options.get(key))
            .or_else(|| self.options(DEFAULT_SECTION).and_then(|d| d.get(key)))
            .map(String::as_str)
    }

    pub fn has_option(&self, section: &str, key: &str) -> bool {
        self.raw(section, key).is_some()
    }

    /// Interpolated value
    pub fn get(&self, section: &str, key: &str) -> Result<String, ConfigError> {
        let raw = self.raw(section, key).ok_or_else(|| ConfigError::MissingKey {
            section: section.to_string(),
            key: key.to_string(),
        })?;
        Ok(self.expand(section, raw))
    }

    pub fn getint(&self, section: &str, key: &str) -> Result<i64, ConfigError> {
        let value = self.get(section, key)?;
        value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value,
            expected: "integer",
        })
    }

    pub fn getboolean(&self, section: &str, key: &str) -> Result<bool, ConfigError> {
        let value = self.get(section, key)?;
        parse_bool(&value).ok_or(ConfigError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value,
            expected: "boolean",
        })
    }

    /// All options of a section (with `DEFAULT` entries), interpolated.
    /// The `do` option is normalised to `true`/`false`.
    pub fn option_dict(&self, section: &str) -> Result<BTreeMap<String, String>, ConfigError> {
        let mut keys: Vec<&String> = Vec::new();
        if let Some(defaults) = self.options(DEFAULT_SECTION) {
            keys.extend(defaults.keys());
        }
        if let Some(options) = self.options(section) {
            keys.extend(options.keys());
        }

        let mut dict = BTreeMap::new();
        for key in keys {
            dict.insert(key.clone(), self.get(section, key)?);
        }

        if dict.contains_key("do") {
            let active = self.getboolean(section, "do")?;
            dict.insert("do".to_string(), active.to_string());
        }

        Ok(dict)
    }

    fn expand(&self, section: &str, raw: &str) -> String {
        if !raw.contains('{') {
            return raw.to_string();
        }

        let mut scope = Context::new();
        for (name, options) in &self.sections {
            for (key, value) in options {
                scope.set(format!("{}.{}", name, key), value.clone());
            }
        }
        for name in [DEFAULT_SECTION, section] {
            if let Some(options) = self.options(name) {
                for (key, value) in options {
                    scope.set(key.clone(), value.clone());
                }
            }
        }

        let mut value = raw.to_string();
        for _ in 0..MAX_INTERPOLATION_DEPTH {
            let next = scope.interpolate(&value).into_owned();
            if next == value {
                break;
            }
            value = next;
        }
        value
    }
}

/// Parse a boolean option the way configuration files spell them
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a YAML text of `section: {key: scalar}` mappings, keeping section order
pub fn parse_sections(text: &str, origin: &str) -> Result<Sections, ConfigError> {
    let raw: Option<serde_yaml::Mapping> =
        serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
    let value = serde_yaml::Value::Mapping(raw.unwrap_or_default());
    sections_from_value(value).map_err(|source| ConfigError::Parse {
        path: origin.to_string(),
        source,
    })
}

fn sections_from_value(value: serde_yaml::Value) -> Result<Sections, serde_yaml::Error> {
    #[derive(Deserialize)]
    struct Section(#[serde(deserialize_with = "deserialize_scalar_map")] BTreeMap<String, String>);

    let mapping: serde_yaml::Mapping = serde_yaml::from_value(value)?;
    let mut sections = Vec::with_capacity(mapping.len());
    for (name, options) in mapping {
        let name = scalar_string(&name).unwrap_or_default();
        let options = if options.is_null() {
            BTreeMap::new()
        } else {
            serde_yaml::from_value::<Section>(options)?.0
        };
        sections.push((name, options));
    }
    Ok(sections)
}

/// Deserialize `Sections` from a YAML mapping, keeping section order
pub(crate) fn deserialize_sections<'de, D>(deserializer: D) -> Result<Sections, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(Vec::new());
    }
    sections_from_value(value).map_err(serde::de::Error::custom)
}

/// Deserialize a mapping whose values are YAML scalars into strings
pub(crate) fn deserialize_scalar_map<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, serde_yaml::Value>> = Option::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .into_iter()
        .map(|(key, value)| match scalar_string(&value) {
            Some(s) => Ok((key, s)),
            None => Err(serde::de::Error::custom(format!(
                "option `{}` must be a scalar value",
                key
            ))),
        })
        .collect()
}

fn scalar_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Null => Some(String::new()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

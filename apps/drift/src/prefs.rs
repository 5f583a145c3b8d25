//! Read-only preference store. Search attributes and profile fields live in
//! a small TOML file (with env-var overrides); the session controller reads
//! a snapshot at the moment a search starts and never writes anything back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use drift_proto::SearchAttributes;

const ENV_PREFIX: &str = "DRIFT_PREF_";

#[derive(Debug, Clone, Default)]
pub struct PrefStore {
    values: BTreeMap<String, String>,
}

impl PrefStore {
    /// Default profile location (`<config dir>/drift/profile.toml`)
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "drift")
            .map(|dirs| dirs.config_dir().join("profile.toml"))
    }

    /// Load from the given file (or the default location), then apply
    /// `DRIFT_PREF_*` env overrides. A missing file is an empty store, not
    /// an error.
    pub fn load(path: Option<&Path>) -> Self {
        let mut store = Self::default();

        let path = path
            .map(Path::to_path_buf)
            .or_else(Self::default_path);
        if let Some(path) = path {
            match std::fs::read_to_string(&path) {
                Ok(raw) => store.absorb_toml(&raw),
                Err(err) => debug!(path = %path.display(), %err, "no profile file"),
            }
        }

        for (key, value) in std::env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                store
                    .values
                    .insert(stripped.to_ascii_lowercase(), value);
            }
        }

        store
    }

    fn absorb_toml(&mut self, raw: &str) {
        let table: toml::Table = match raw.parse() {
            Ok(t) => t,
            Err(err) => {
                debug!(%err, "unparseable profile file; ignoring");
                return;
            }
        };
        for (key, value) in table {
            let rendered = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(n) => n.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                toml::Value::Array(items) => items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect::<Vec<_>>()
                    .join(","),
                other => other.to_string(),
            };
            self.values.insert(key, rendered);
        }
    }

    /// Apply explicit overrides (e.g. CLI flags) on top of the loaded values
    pub fn with_overrides(
        mut self,
        overrides: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        for (key, value) in overrides {
            self.values.insert(key, value);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Snapshot the search attributes for an outgoing `start-search`
    pub fn search_attributes(&self) -> SearchAttributes {
        SearchAttributes {
            interests: self
                .get("interests")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            gender: self.get("gender").map(str::to_string),
            age: self.get("age").and_then(|raw| raw.trim().parse().ok()),
            country: self.get("country").map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn toml_values_flatten_to_strings() {
        let mut store = PrefStore::default();
        store.absorb_toml(
            r#"
            interests = ["music", "films"]
            gender = "any"
            age = 24
            country = "DE"
            "#,
        );
        let attrs = store.search_attributes();
        assert_eq!(attrs.interests, vec!["music", "films"]);
        assert_eq!(attrs.gender.as_deref(), Some("any"));
        assert_eq!(attrs.age, Some(24));
        assert_eq!(attrs.country.as_deref(), Some("DE"));
    }

    #[test_timeout::timeout]
    fn overrides_win_over_file_values() {
        let mut store = PrefStore::default();
        store.absorb_toml(r#"country = "DE""#);
        let store =
            store.with_overrides([("country".to_string(), "AT".to_string())]);
        assert_eq!(store.get("country"), Some("AT"));
    }

    #[test_timeout::timeout]
    fn missing_keys_mean_empty_attributes() {
        let store = PrefStore::default();
        let attrs = store.search_attributes();
        assert!(attrs.interests.is_empty());
        assert_eq!(attrs.gender, None);
        assert_eq!(attrs.age, None);
        assert_eq!(attrs.country, None);
    }
}

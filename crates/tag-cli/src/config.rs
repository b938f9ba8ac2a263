use std::path::PathBuf;
use tag_core::TaxonomyId;

pub const DATA_DIR_VAR: &str = "TAGSHELF_DATA_DIR";
pub const DEFAULT_TAXONOMY_VAR: &str = "TAGSHELF_DEFAULT_TAXONOMY";

/// Taxonomy used when neither a flag nor the environment names one.
pub const FALLBACK_TAXONOMY: &str = "default";

/// CLI configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding taxonomy files and favorites
    pub data_dir: PathBuf,
    /// Taxonomy used by commands that do not name one
    pub default_taxonomy: TaxonomyId,
}

impl Config {
    /// Load configuration from command-line values and environment variables.
    ///
    /// Each setting comes from the flag when given, else the environment:
    /// - `TAGSHELF_DATA_DIR`: storage directory (supports ~ for home directory),
    ///   defaults to `<platform data dir>/tagshelf`
    /// - `TAGSHELF_DEFAULT_TAXONOMY`: defaults to `default`
    pub fn from_env(data_dir: Option<PathBuf>, taxonomy: Option<String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), data_dir, taxonomy)
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        data_dir: Option<PathBuf>,
        taxonomy: Option<String>,
    ) -> Result<Self, ConfigError> {
        let data_dir = data_dir
            .map(|dir| dir.to_string_lossy().into_owned())
            .or_else(|| lookup(DATA_DIR_VAR))
            .filter(|dir| !dir.trim().is_empty());
        let data_dir = match data_dir {
            Some(dir) => expand_tilde(&dir),
            None => dirs::data_dir()
                .map(|dir| dir.join("tagshelf"))
                .ok_or(ConfigError::NoDataDir)?,
        };
        let default_taxonomy = taxonomy
            .or_else(|| lookup(DEFAULT_TAXONOMY_VAR))
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_TAXONOMY.to_string());

        Ok(Self {
            data_dir,
            default_taxonomy: TaxonomyId::new(default_taxonomy),
        })
    }
}

/// Expand ~ or ~/ prefix to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No data directory: set TAGSHELF_DATA_DIR or pass --data-dir")]
    NoDataDir,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_reads_both_variables() {
        let config = Config::from_lookup(
            lookup(&[(DATA_DIR_VAR, "/tmp/tags"), (DEFAULT_TAXONOMY_VAR, "styles")]),
            None,
            None,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/tags"));
        assert_eq!(config.default_taxonomy, TaxonomyId::new("styles"));
    }

    #[test]
    fn test_default_taxonomy_fallback() {
        let config = Config::from_lookup(lookup(&[(DATA_DIR_VAR, "/tmp/tags")]), None, None).unwrap();
        assert_eq!(config.default_taxonomy.as_str(), FALLBACK_TAXONOMY);
    }

    #[test]
    fn test_tilde_expansion() {
        let config = Config::from_lookup(lookup(&[(DATA_DIR_VAR, "~/tags")]), None, None).unwrap();
        if let Some(home) = dirs::home_dir() {
            assert_eq!(config.data_dir, home.join("tags"));
        }
    }

    #[test]
    fn test_flags_win_over_environment() {
        let config = Config::from_lookup(
            lookup(&[(DATA_DIR_VAR, "/tmp/tags"), (DEFAULT_TAXONOMY_VAR, "styles")]),
            Some(PathBuf::from("/srv/tags")),
            Some("subjects".into()),
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/tags"));
        assert_eq!(config.default_taxonomy.as_str(), "subjects");
    }

    #[test]
    fn test_flag_alone_needs_no_environment() {
        let config = Config::from_lookup(lookup(&[]), Some(PathBuf::from("~/tags")), None).unwrap();
        if let Some(home) = dirs::home_dir() {
            assert_eq!(config.data_dir, home.join("tags"));
        }
        assert_eq!(config.default_taxonomy.as_str(), FALLBACK_TAXONOMY);
    }
}

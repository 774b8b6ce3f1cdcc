use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::audit::DEFAULT_PAGE_SIZE;
use crate::error::{OrgError, Result};
use crate::workbook::SheetNames;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "ORGPLUS_CONFIG";

/// Environment variable overriding the database location
pub const DATABASE_ENV: &str = "ORGPLUS_DB";

/// Host settings, stored as YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database file; the platform data directory is used when unset
    pub database_path: Option<PathBuf>,
    /// Sheet read on import and written first on export
    pub import_sheet: String,
    pub personnel_sheet: String,
    pub units_sheet: String,
    pub history_page_size: u32,
    pub busy_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let sheets = SheetNames::default();
        Self {
            database_path: None,
            import_sheet: sheets.combined,
            personnel_sheet: sheets.personnel,
            units_sheet: sheets.units,
            history_page_size: DEFAULT_PAGE_SIZE,
            busy_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Loads the config at `path`; a missing file yields the defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| OrgError::io(path, e))?;
        serde_yaml::from_str(&content).map_err(|source| OrgError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Renders the settings in the on-disk YAML format
    pub fn to_yaml(&self) -> std::result::Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Writes the config, creating parent directories as needed
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = self.to_yaml().map_err(|source| OrgError::Config {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| OrgError::io(parent, e))?;
        }
        fs::write(path, content).map_err(|e| OrgError::io(path, e))
    }

    pub fn sheet_names(&self) -> SheetNames {
        SheetNames {
            combined: self.import_sheet.clone(),
            personnel: self.personnel_sheet.clone(),
            units: self.units_sheet.clone(),
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Database location: `$ORGPLUS_DB`, then the configured path, then the
    /// platform default
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path_with(std::env::var_os(DATABASE_ENV))
    }

    fn database_path_with(&self, env: Option<OsString>) -> Option<PathBuf> {
        env.filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .or_else(|| self.database_path.clone())
            .or_else(default_database_path)
    }
}

/// Gets the path to the config file
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("orgplus").join("config.yaml"))
}

/// Default database file under the platform data directory
pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("orgplus").join("orgplus.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.import_sheet, "DB_TNS");
        assert_eq!(config.history_page_size, 200);
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "import_sheet: EXPORT\nhistory_page_size: 50\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.import_sheet, "EXPORT");
        assert_eq!(config.history_page_size, 50);
        assert_eq!(config.units_sheet, "TNS Strutture");
        assert_eq!(config.sheet_names().combined, "EXPORT");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let config = Config {
            database_path: Some(PathBuf::from("/tmp/org.db")),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_yaml_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "history_page_size: [not a number").unwrap();
        assert!(matches!(Config::load(&path), Err(OrgError::Config { .. })));
    }

    #[test]
    fn test_database_path_precedence() {
        let config = Config {
            database_path: Some(PathBuf::from("configured.db")),
            ..Default::default()
        };
        assert_eq!(
            config.database_path_with(Some(OsString::from("env.db"))),
            Some(PathBuf::from("env.db"))
        );
        assert_eq!(
            config.database_path_with(Some(OsString::new())),
            Some(PathBuf::from("configured.db"))
        );
        assert_eq!(config.database_path_with(None), Some(PathBuf::from("configured.db")));
    }
}

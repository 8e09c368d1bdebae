//! Where things live on disk.
//!
//! Every component receives an [`AppConfig`] instead of reading module-level
//! constants, so tests and portable installs can point all storage at one
//! directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_APP_NAME: &str = "myInfo";
pub const DEFAULT_APP_AUTHOR: &str = "myInfo";
pub const DEFAULT_APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DEFAULT_SHEET_URL: &str = "https://docs.google.com/spreadsheets/d/1K1De6CBlEXe-S3qB3ywr3TqQpyRtdJW_UV7eubHpCXw/edit?usp=sharing";
pub const USER_DATA_FILE: &str = "userData.json";
pub const CATALOG_FILE: &str = "fields_database.sqlite3";
pub const CREDENTIALS_FILE: &str = "credentials.json";
pub const DEFAULT_OUTPUT_FILENAME: &str = "myInfo.html";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppIdentity {
    pub name: String,
    pub author: String,
    pub version: String,
}

impl Default for AppIdentity {
    fn default() -> Self {
        Self {
            name: DEFAULT_APP_NAME.to_string(),
            author: DEFAULT_APP_AUTHOR.to_string(),
            version: DEFAULT_APP_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub catalog_path: PathBuf,
    pub user_data_path: PathBuf,
    pub credentials_path: PathBuf,
    pub sheet_url: String,
    /// Page template on disk; the built-in template is used when unset.
    pub template_path: Option<PathBuf>,
    /// Export destination override; the platform desktop is used when unset.
    pub desktop_dir: Option<PathBuf>,
    pub output_filename: String,
}

/// Optional overrides read from a YAML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    #[serde(default)]
    pub user_data_path: Option<PathBuf>,
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
    #[serde(default)]
    pub sheet_url: Option<String>,
    #[serde(default)]
    pub template_path: Option<PathBuf>,
    #[serde(default)]
    pub desktop_dir: Option<PathBuf>,
    #[serde(default)]
    pub output_filename: Option<String>,
}

impl AppConfig {
    /// Keep every file directly under `data_dir`.
    #[must_use]
    pub fn rooted_at(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            catalog_path: data_dir.join(CATALOG_FILE),
            user_data_path: data_dir.join(USER_DATA_FILE),
            credentials_path: data_dir.join(CREDENTIALS_FILE),
            data_dir,
            sheet_url: DEFAULT_SHEET_URL.to_string(),
            template_path: None,
            desktop_dir: None,
            output_filename: DEFAULT_OUTPUT_FILENAME.to_string(),
        }
    }

    /// Per-user layout: `{data dir}/{name}/{author}/{version}`.
    ///
    /// # Errors
    /// Returns an error when the platform reports no user data directory.
    pub fn default_for_platform(identity: &AppIdentity) -> Result<Self> {
        let base = dirs::data_dir()
            .ok_or_else(|| anyhow!("no user data directory is available on this platform"))?;
        Ok(Self::rooted_at(
            base.join(&identity.name).join(&identity.author).join(&identity.version),
        ))
    }

    /// Read YAML overrides from `path` and layer them over the defaults.
    ///
    /// A `data_dir` override re-roots every path that is not itself overridden.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or parsed, or when no
    /// default data directory is available and none is configured.
    pub fn load(path: &Path, identity: &AppIdentity) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let file: ConfigFile = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;

        let base = match &file.data_dir {
            Some(data_dir) => Self::rooted_at(data_dir),
            None => Self::default_for_platform(identity)?,
        };
        Ok(base.with_overrides(file))
    }

    #[must_use]
    pub fn with_overrides(mut self, file: ConfigFile) -> Self {
        if let Some(data_dir) = file.data_dir {
            self.data_dir = data_dir;
        }
        if let Some(catalog_path) = file.catalog_path {
            self.catalog_path = catalog_path;
        }
        if let Some(user_data_path) = file.user_data_path {
            self.user_data_path = user_data_path;
        }
        if let Some(credentials_path) = file.credentials_path {
            self.credentials_path = credentials_path;
        }
        if let Some(sheet_url) = file.sheet_url {
            self.sheet_url = sheet_url;
        }
        if file.template_path.is_some() {
            self.template_path = file.template_path;
        }
        if file.desktop_dir.is_some() {
            self.desktop_dir = file.desktop_dir;
        }
        if let Some(output_filename) = file.output_filename {
            self.output_filename = output_filename;
        }
        self
    }

    /// Path of the user data document, with its directory created.
    ///
    /// # Errors
    /// Returns an error when the parent directory cannot be created.
    pub fn resolve_data_path(&self) -> Result<PathBuf> {
        ensure_parent_dir(&self.user_data_path)?;
        Ok(self.user_data_path.clone())
    }

    /// # Errors
    /// Returns an error when neither an override nor a platform desktop exists.
    pub fn resolve_desktop_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.desktop_dir {
            return Ok(dir.clone());
        }
        dirs::desktop_dir().ok_or_else(|| anyhow!("no desktop directory is available on this platform"))
    }
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooted_config_keeps_every_file_under_one_directory() {
        let config = AppConfig::rooted_at("/tmp/myinfo-root");
        assert_eq!(config.catalog_path, Path::new("/tmp/myinfo-root/fields_database.sqlite3"));
        assert_eq!(config.user_data_path, Path::new("/tmp/myinfo-root/userData.json"));
        assert_eq!(config.credentials_path, Path::new("/tmp/myinfo-root/credentials.json"));
        assert_eq!(config.output_filename, DEFAULT_OUTPUT_FILENAME);
        assert!(config.template_path.is_none());
    }

    #[test]
    fn platform_default_nests_identity_components() -> Result<()> {
        let identity = AppIdentity {
            name: "myInfo".to_string(),
            author: "acme".to_string(),
            version: "9.9.9".to_string(),
        };
        let Ok(config) = AppConfig::default_for_platform(&identity) else {
            // Headless platforms without a data dir have nothing to check.
            return Ok(());
        };
        assert!(config.data_dir.ends_with(Path::new("myInfo/acme/9.9.9")));
        assert!(config.user_data_path.ends_with(Path::new("myInfo/acme/9.9.9/userData.json")));
        Ok(())
    }

    #[test]
    fn yaml_overrides_layer_over_rooted_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config_path = dir.path().join("myinfo.yaml");
        let data_dir = dir.path().join("data");
        fs::write(
            &config_path,
            format!(
                "data_dir: {}\noutput_filename: snapshot.html\ndesktop_dir: /tmp/export\n",
                data_dir.display()
            ),
        )?;

        let config = AppConfig::load(&config_path, &AppIdentity::default())?;
        assert_eq!(config.user_data_path, data_dir.join(USER_DATA_FILE));
        assert_eq!(config.output_filename, "snapshot.html");
        assert_eq!(config.desktop_dir, Some(PathBuf::from("/tmp/export")));
        assert_eq!(config.sheet_url, DEFAULT_SHEET_URL);
        Ok(())
    }

    #[test]
    fn unknown_yaml_keys_are_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config_path = dir.path().join("myinfo.yaml");
        fs::write(&config_path, "data_dir: /tmp/x\ncolour: blue\n")?;
        assert!(AppConfig::load(&config_path, &AppIdentity::default()).is_err());
        Ok(())
    }

    #[test]
    fn resolve_data_path_creates_parent_directories() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = AppConfig::rooted_at(dir.path().join("a").join("b"));
        let path = config.resolve_data_path()?;
        assert!(path.parent().is_some_and(Path::is_dir));
        assert!(!path.exists());
        Ok(())
    }
}

use crate::error::{ErrorKind, Result};
use crate::project_dirs;
use chainbak_archive::Compression;
use chainbak_storage::Credentials;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Fully merged configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageSettings,
    /// JSON backup catalog; defaults to `catalog.json` in the platform data
    /// directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<PathBuf>,
    pub filter: FilterSettings,
    /// Entry compression for compressed backups.
    pub compression: String,
    /// Comparison tolerance, in seconds.
    pub tolerance: f64,
    pub artifacts: ArtifactSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage: StorageSettings::default(),
            catalog: None,
            filter: FilterSettings::default(),
            compression: Compression::default().to_string(),
            tolerance: 1.0,
            artifacts: ArtifactSettings::default(),
        }
    }
}

impl Settings {
    pub(crate) fn validate(&self) -> Result<()> {
        self.compression()?;
        self.tolerance()?;
        if let Some(remote) = self.storage.remote()
            && remote.host.trim().is_empty()
        {
            exn::bail!(ErrorKind::InvalidValue("storage.host must not be empty".to_string()));
        }
        for (key, name) in [
            ("artifacts.deleted_files", &self.artifacts.deleted_files),
            ("artifacts.file_structure", &self.artifacts.file_structure),
        ] {
            if name.is_empty() || name.contains(['/', '\\']) {
                exn::bail!(ErrorKind::InvalidValue(format!("{key} must be a plain file name, got {name:?}")));
            }
        }
        Ok(())
    }

    pub fn compression(&self) -> Result<Compression> {
        self.compression.parse().map_err(|_| {
            exn::Exn::from(ErrorKind::InvalidValue(format!("unknown compression {:?}", self.compression)))
        })
    }

    pub fn tolerance(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.tolerance)
            .map_err(|_| exn::Exn::from(ErrorKind::InvalidValue(format!("tolerance {} seconds", self.tolerance))))
    }

    /// The configured catalog path, or the platform default.
    pub fn catalog_path(&self) -> Result<PathBuf> {
        match &self.catalog {
            Some(path) => Ok(path.clone()),
            None => project_dirs()
                .map(|dirs| dirs.data_dir().join("catalog.json"))
                .ok_or_else(|| exn::Exn::from(ErrorKind::NoConfigDirectory)),
        }
    }
}

/// Where backups are stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageSettings {
    /// Local filesystem (including mounted network shares).
    #[default]
    Local,
    #[cfg(feature = "ftp")]
    Ftp(RemoteSettings),
    #[cfg(feature = "sftp")]
    Sftp(RemoteSettings),
    #[cfg(feature = "scp")]
    Scp(RemoteSettings),
}

impl StorageSettings {
    pub fn remote(&self) -> Option<&RemoteSettings> {
        match self {
            Self::Local => None,
            #[cfg(feature = "ftp")]
            Self::Ftp(remote) => Some(remote),
            #[cfg(feature = "sftp")]
            Self::Sftp(remote) => Some(remote),
            #[cfg(feature = "scp")]
            Self::Scp(remote) => Some(remote),
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Local => None,
            #[cfg(feature = "ftp")]
            Self::Ftp(_) => Some(21),
            #[cfg(feature = "sftp")]
            Self::Sftp(_) => Some(22),
            #[cfg(feature = "scp")]
            Self::Scp(_) => Some(22),
        }
    }

    /// Connection details for remote storage, with the default port filled in.
    pub fn credentials(&self) -> Option<Credentials> {
        let remote = self.remote()?;
        let port = remote.port.or(self.default_port())?;
        Some(Credentials::new(&remote.host, port, &remote.username, &remote.password))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSettings {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Default search filters; both are unanchored regular expressions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub files: String,
    pub directories: String,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self { files: ".*".to_string(), directories: ".*".to_string() }
    }
}

/// Names of the metadata files written beside each backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSettings {
    pub deleted_files: String,
    pub file_structure: String,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self { deleted_files: "DeletedFilesInfo".to_string(), file_structure: "FileStructureInfo".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("deflate", true)]
    #[case("stored", true)]
    #[case("bz2", true)]
    #[case("lzma", false)]
    fn test_compression_validation(#[case] value: &str, #[case] valid: bool) {
        let settings = Settings { compression: value.to_string(), ..Settings::default() };
        assert_eq!(settings.validate().is_ok(), valid);
    }

    #[rstest]
    #[case(1.0, true)]
    #[case(0.0, true)]
    #[case(-1.0, false)]
    #[case(f64::NAN, false)]
    fn test_tolerance_validation(#[case] value: f64, #[case] valid: bool) {
        let settings = Settings { tolerance: value, ..Settings::default() };
        assert_eq!(settings.tolerance().is_ok(), valid);
    }

    #[rstest]
    #[case("DeletedFilesInfo", true)]
    #[case("", false)]
    #[case("nested/name", false)]
    fn test_artifact_names(#[case] name: &str, #[case] valid: bool) {
        let settings = Settings {
            artifacts: ArtifactSettings { deleted_files: name.to_string(), ..ArtifactSettings::default() },
            ..Settings::default()
        };
        assert_eq!(settings.validate().is_ok(), valid);
    }

    #[test]
    fn test_explicit_catalog_path() {
        let settings = Settings { catalog: Some(PathBuf::from("/srv/catalog.json")), ..Settings::default() };
        assert_eq!(settings.catalog_path().unwrap(), PathBuf::from("/srv/catalog.json"));
    }

    #[test]
    fn test_local_has_no_credentials() {
        assert!(StorageSettings::Local.credentials().is_none());
    }

    #[cfg(feature = "sftp")]
    #[test]
    fn test_sftp_default_port() {
        let storage = StorageSettings::Sftp(RemoteSettings {
            host: "backup.example.com".to_string(),
            username: "user".to_string(),
            ..RemoteSettings::default()
        });
        let credentials = storage.credentials().unwrap();
        assert_eq!(credentials.address(), "backup.example.com:22");
    }
}

//! Layered configuration for chainbak.
//!
//! Sources, lowest priority first:
//!
//! 1. Built-in defaults ([`Settings::default`])
//! 2. A config file: an explicit path, or `config.toml`, `config.yaml` and
//!    `config.json` in the platform config directory
//! 3. `CHAINBAK_`-prefixed environment variables, with `__` separating
//!    nested keys (`CHAINBAK_STORAGE__HOST=backup.example.com`)

pub mod error;
mod settings;

pub use crate::settings::{ArtifactSettings, FilterSettings, RemoteSettings, Settings, StorageSettings};
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use std::path::Path;

const ENV_PREFIX: &str = "CHAINBAK_";
const DEFAULT_FILES: [&str; 3] = ["config.toml", "config.yaml", "config.json"];

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "chainbak")
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    Ok(match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => exn::bail!(ErrorKind::InvalidValue(format!("unsupported config file type: {}", path.display()))),
    })
}

/// Build the provider stack without extracting it.
pub fn figment(explicit: Option<&Path>) -> Result<Figment> {
    let mut figment = Figment::from(Serialized::defaults(Settings::default()));
    match explicit {
        Some(path) => {
            if !path.is_file() {
                exn::bail!(ErrorKind::InvalidValue(format!("config file not found: {}", path.display())));
            }
            figment = merge_file(figment, path)?;
        },
        None => match project_dirs() {
            Some(dirs) => {
                for name in DEFAULT_FILES {
                    figment = merge_file(figment, &dirs.config_dir().join(name))?;
                }
            },
            None => tracing::debug!("No platform config directory; skipping config files"),
        },
    }
    Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
}

/// Load and validate settings.
pub fn load(explicit: Option<&Path>) -> Result<Settings> {
    extract(figment(explicit)?)
}

/// Extract and validate settings from an already-built provider stack.
pub fn extract(figment: Figment) -> Result<Settings> {
    let settings: Settings = figment.extract().or_raise(|| ErrorKind::Load)?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_explicit_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chainbak.toml");
        fs::write(
            &path,
            r#"
            tolerance = 2.5
            compression = "bzip2"

            [filter]
            files = "\\.txt$"
            "#,
        )
        .unwrap();
        let settings = extract(figment(Some(&path)).unwrap()).unwrap();
        assert_eq!(settings.tolerance, 2.5);
        assert_eq!(settings.compression, "bzip2");
        assert_eq!(settings.filter.files, "\\.txt$");
        assert_eq!(settings.filter.directories, ".*");
        assert_eq!(settings.storage, StorageSettings::Local);
    }

    #[test]
    fn test_explicit_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chainbak.json");
        fs::write(&path, r#"{"artifacts": {"deleted_files": "Deleted.log"}}"#).unwrap();
        let settings = extract(figment(Some(&path)).unwrap()).unwrap();
        assert_eq!(settings.artifacts.deleted_files, "Deleted.log");
        assert_eq!(settings.artifacts.file_structure, "FileStructureInfo");
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = figment(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidValue(_)));
    }

    #[test]
    fn test_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chainbak.ini");
        fs::write(&path, "").unwrap();
        let err = figment(Some(&path)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidValue(_)));
    }

    #[test]
    fn test_later_sources_override() {
        let figment = Figment::from(Serialized::defaults(Settings::default())).merge(("tolerance", 0.5));
        assert_eq!(extract(figment).unwrap().tolerance, 0.5);
    }

    #[test]
    fn test_schema_mismatch_is_load_error() {
        let figment = Figment::from(Serialized::defaults(Settings::default())).merge(("tolerance", "soon"));
        let err = extract(figment).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Load));
    }
}

//! Builds the configured storage access and manages its session.

use crate::error::{ErrorKind, Result};
use chainbak_config::StorageSettings;
use chainbak_storage::{AccessHandle, LocalAccess, RemoteAccess, StorageAccess};
use exn::ResultExt;
use std::sync::Arc;

/// The storage a command runs against.
pub struct Storage {
    handle: AccessHandle,
    remote: Option<Arc<dyn RemoteAccess>>,
}

impl Storage {
    /// Build the backend described by `settings` and connect it when remote.
    pub async fn open(settings: &StorageSettings) -> Result<Self> {
        let remote: Arc<dyn RemoteAccess> = match settings {
            StorageSettings::Local => return Ok(Self { handle: Arc::new(LocalAccess::default()), remote: None }),
            #[cfg(feature = "ftp")]
            StorageSettings::Ftp(_) => Arc::new(chainbak_storage::FtpAccess::new("ftp", credentials(settings)?)),
            #[cfg(feature = "sftp")]
            StorageSettings::Sftp(_) => Arc::new(chainbak_storage::SftpAccess::new("sftp", credentials(settings)?)),
            #[cfg(feature = "scp")]
            StorageSettings::Scp(_) => Arc::new(chainbak_storage::ScpAccess::new("scp", credentials(settings)?)),
        };
        remote.connect().await.or_raise(|| ErrorKind::Storage)?;
        tracing::debug!(access = remote.name(), "Connected");
        Ok(Self { handle: remote.clone(), remote: Some(remote) })
    }

    pub fn handle(&self) -> AccessHandle {
        self.handle.clone()
    }

    /// Disconnect a remote session; a no-op for local storage.
    pub async fn close(self) -> Result<()> {
        if let Some(remote) = self.remote {
            remote.disconnect().await.or_raise(|| ErrorKind::Storage)?;
            tracing::debug!(access = remote.name(), "Disconnected");
        }
        Ok(())
    }
}

#[cfg(any(feature = "ftp", feature = "sftp", feature = "scp"))]
fn credentials(settings: &StorageSettings) -> Result<chainbak_storage::Credentials> {
    settings.credentials().ok_or_else(|| ErrorKind::Config.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_storage_needs_no_session() {
        let storage = Storage::open(&StorageSettings::Local).await.unwrap();
        assert_eq!(storage.handle().name(), "local");
        storage.close().await.unwrap();
    }

    #[cfg(feature = "sftp")]
    #[tokio::test]
    async fn test_unreachable_remote_fails_to_open() {
        let settings = StorageSettings::Sftp(chainbak_config::RemoteSettings {
            host: "127.0.0.1".to_string(),
            port: Some(1),
            username: "user".to_string(),
            password: "secret".to_string(),
        });
        let err = Storage::open(&settings).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::Storage));
    }
}

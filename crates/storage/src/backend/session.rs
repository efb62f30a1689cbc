//! A single blocking protocol session, driven from async code.
//!
//! The FTP and SSH clients are synchronous, so every operation runs on
//! tokio's blocking pool while holding the session lock. Only one logical
//! operation runs at a time anyway; the lock just makes that explicit.

use crate::backend::Credentials;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::sync::Arc;
use tokio::sync::Mutex;

pub(crate) struct Session<C> {
    client: Arc<Mutex<Option<C>>>,
    credentials: Mutex<Credentials>,
}

impl<C: Send + 'static> Session<C> {
    pub(crate) fn new(credentials: Credentials) -> Self {
        Self { client: Arc::new(Mutex::new(None)), credentials: Mutex::new(credentials) }
    }

    pub(crate) async fn credentials(&self) -> Credentials {
        self.credentials.lock().await.clone()
    }

    pub(crate) async fn is_open(&self) -> bool {
        self.client.lock().await.is_some()
    }

    pub(crate) async fn open<F>(&self, connect: F) -> Result<()>
    where
        F: FnOnce(Credentials) -> Result<C> + Send + 'static,
    {
        let mut client = self.client.lock().await;
        if client.is_some() {
            exn::bail!(ErrorKind::AlreadyConnected);
        }
        let credentials = self.credentials().await;
        let address = credentials.address();
        let opened = tokio::task::spawn_blocking(move || connect(credentials))
            .await
            .or_raise(|| ErrorKind::Unknown(format!("connecting to {address}")))??;
        *client = Some(opened);
        tracing::debug!(address = %address, "Session opened");
        Ok(())
    }

    pub(crate) async fn close<F>(&self, shutdown: F) -> Result<()>
    where
        F: FnOnce(C) + Send + 'static,
    {
        let Some(client) = self.client.lock().await.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || shutdown(client))
            .await
            .or_raise(|| ErrorKind::Unknown("closing session".to_string()))?;
        tracing::debug!("Session closed");
        Ok(())
    }

    /// Run `op` against the open client on the blocking pool.
    pub(crate) async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> Result<T> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || {
            let mut guard = client.blocking_lock();
            let active = guard.as_mut().ok_or_else(|| exn::Exn::from(ErrorKind::NotConnected))?;
            op(active)
        })
        .await
        .or_raise(|| ErrorKind::Unknown("session task failed".to_string()))?
    }

    /// Swap credentials, reconnecting when a session is open and they changed.
    pub(crate) async fn set_credentials<F, S>(&self, credentials: Credentials, connect: F, shutdown: S) -> Result<()>
    where
        F: FnOnce(Credentials) -> Result<C> + Send + 'static,
        S: FnOnce(C) + Send + 'static,
    {
        let changed = {
            let mut current = self.credentials.lock().await;
            let changed = *current != credentials;
            *current = credentials;
            changed
        };
        if changed && self.is_open().await {
            self.close(shutdown).await?;
            self.open(connect).await?;
        }
        Ok(())
    }
}

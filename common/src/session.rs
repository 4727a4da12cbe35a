//! Endpoint session: the live remote connection owned by exactly one job.

use async_trait::async_trait;
use tracing::instrument;

use crate::config::{Credentials, EndpointTarget};
use crate::endpoint::{Connector, Endpoint, Entry, Transport};
use crate::error::{Error, OpError};

pub struct Session {
    target: EndpointTarget,
    transport: Option<Box<dyn Transport>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("target", &self.target)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Session {
    #[instrument(skip(connector, credentials))]
    pub async fn open(
        connector: &dyn Connector,
        target: &EndpointTarget,
        credentials: &Credentials,
    ) -> Result<Self, Error> {
        tracing::info!("opening session to {} as {}", target, credentials.user);
        let transport = connector
            .connect(target, credentials)
            .await
            .map_err(|source| Error::Connection {
                target: target.address.clone(),
                source,
            })?;
        Ok(Self {
            target: target.clone(),
            transport: Some(transport),
        })
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    pub fn target(&self) -> &EndpointTarget {
        &self.target
    }

    /// Disconnect. Safe to call any number of times; failures are logged, never returned.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            match transport.disconnect().await {
                Ok(()) => tracing::info!("session to {} closed", self.target),
                Err(error) => {
                    tracing::warn!("closing session to {} failed: {:#}", self.target, error)
                }
            }
        }
    }

    fn transport(&self) -> Result<&dyn Transport, OpError> {
        self.transport
            .as_deref()
            .ok_or_else(|| OpError::Other(anyhow::anyhow!("session to {} is closed", self.target)))
    }

    pub async fn get(
        &self,
        remote_path: &str,
        local_path: &std::path::Path,
        overwrite: bool,
    ) -> Result<u64, OpError> {
        self.transport()?.get(remote_path, local_path, overwrite).await
    }

    pub async fn put(
        &self,
        local_path: &std::path::Path,
        remote_dir: &str,
        overwrite: bool,
    ) -> Result<u64, OpError> {
        self.transport()?.put(local_path, remote_dir, overwrite).await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.transport.is_some() {
            tracing::error!("session to {} dropped without being closed", self.target);
        }
    }
}

#[async_trait]
impl Endpoint for Session {
    fn label(&self) -> &'static str {
        "remote"
    }

    fn join(&self, dir: &str, name: &str) -> String {
        match self.transport.as_deref() {
            Some(transport) => transport.join(dir, name),
            None => crate::endpoint::join_slash(dir, name),
        }
    }

    async fn list_entries(&self, dir: &str) -> Result<Vec<Entry>, OpError> {
        self.transport()?.list_entries(dir).await
    }

    async fn exists(&self, path: &str) -> Result<bool, OpError> {
        self.transport()?.exists(path).await
    }

    async fn rename(&self, path: &str, new_name: &str) -> Result<(), OpError> {
        self.transport()?.rename(path, new_name).await
    }

    async fn remove(&self, path: &str) -> Result<(), OpError> {
        self.transport()?.remove(path).await
    }

    async fn create_dir(&self, path: &str) -> Result<(), OpError> {
        self.transport()?.create_dir(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::MemoryConnector;

    fn credentials() -> Credentials {
        Credentials {
            user: "svc".into(),
            secret: None,
        }
    }

    #[tokio::test]
    async fn close_is_idempotent() -> Result<(), anyhow::Error> {
        let connector = MemoryConnector::default();
        let target = EndpointTarget {
            address: "mem://x".into(),
        };
        let mut session = Session::open(&connector, &target, &credentials()).await?;
        assert!(session.is_open());
        session.close().await;
        session.close().await;
        assert!(!session.is_open());
        assert_eq!(connector.stats().opened, 1);
        assert_eq!(connector.stats().closed, 1);
        let error = session.exists("/a").await.unwrap_err();
        assert!(error.to_string().contains("closed"));
        Ok(())
    }

    #[tokio::test]
    async fn connect_failure_is_connection_error() {
        let connector = MemoryConnector::default();
        connector.fail_connect("no route to host");
        let target = EndpointTarget {
            address: "mem://x".into(),
        };
        let error = Session::open(&connector, &target, &credentials())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Connection { .. }));
        assert!(error.to_string().contains("no route to host"));
    }
}

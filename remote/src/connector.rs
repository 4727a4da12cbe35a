use async_trait::async_trait;

use common::config::{Credentials, EndpointTarget};
use common::endpoint::{Connector, Transport};
use common::share::ShareTransport;

use crate::ssh::SshTransport;

/// Opens the transport matching the endpoint scheme: `file://` shares and `ssh://` hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConnector;

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(
        &self,
        target: &EndpointTarget,
        credentials: &Credentials,
    ) -> anyhow::Result<Box<dyn Transport>> {
        match target.scheme() {
            Some("file") => {
                let root = std::path::Path::new(target.location());
                Ok(Box::new(ShareTransport::connect(root).await?))
            }
            Some("ssh") => Ok(Box::new(SshTransport::connect(target, credentials).await?)),
            other => Err(anyhow::anyhow!(
                "no transport for endpoint {} (scheme {:?})",
                target,
                other
            )),
        }
    }
}

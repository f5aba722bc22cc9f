//! TCP and TLS socket connector.

use std::io;

use futures_util::future::BoxFuture;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use super::{tls, BoxedIo, Connector};
use crate::proxy::target::NormalizedTarget;

/// Connects with tokio TCP sockets, upgrading to TLS for https targets.
#[derive(Clone)]
pub struct TcpConnector {
    tls: TlsConnector,
}

impl TcpConnector {
    pub fn new(accept_invalid_certs: bool) -> Result<Self, rustls::Error> {
        Ok(Self {
            tls: tls::build_tls_connector(accept_invalid_certs)?,
        })
    }
}

impl std::fmt::Debug for TcpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnector").finish_non_exhaustive()
    }
}

impl Connector for TcpConnector {
    fn connect(&self, target: &NormalizedTarget) -> BoxFuture<'static, io::Result<BoxedIo>> {
        let host = target.host().to_string();
        let port = target.port();
        let tls = target.is_https().then(|| self.tls.clone());

        Box::pin(async move {
            let stream = TcpStream::connect((host.as_str(), port)).await?;
            stream.set_nodelay(true)?;

            match tls {
                Some(connector) => {
                    let name = tls::server_name(&host)?;
                    let stream = connector.connect(name, stream).await?;
                    Ok(Box::new(stream) as BoxedIo)
                }
                None => Ok(Box::new(stream) as BoxedIo),
            }
        })
    }
}

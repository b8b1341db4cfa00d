//! TCP reachability probe: the dependency is ready once a connect succeeds.

use std::io;

use readygate_core::{Probe, ProbeError, ProbeFut};
use tokio::net::{TcpStream, lookup_host};

use crate::endpoint::{Endpoint, EndpointError};

#[derive(Debug, Clone)]
pub struct TcpProbe {
    endpoint: Endpoint,
}

impl TcpProbe {
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    /// Accepts anything [`Endpoint::parse`] does.
    pub fn from_url(url: &str) -> Result<Self, EndpointError> {
        Endpoint::parse(url).map(Self::new)
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Probe for TcpProbe {
    fn describe(&self) -> String {
        format!("tcp://{}", self.endpoint)
    }

    fn probe(&self) -> ProbeFut<'_> {
        Box::pin(async move {
            let endpoint = self.endpoint.to_string();
            let addrs = lookup_host((self.endpoint.host(), self.endpoint.port()))
                .await
                .map_err(|source| ProbeError::Unreachable {
                    endpoint: endpoint.clone(),
                    source,
                })?;

            let mut last_error: Option<io::Error> = None;
            for addr in addrs {
                match TcpStream::connect(addr).await {
                    Ok(_stream) => {
                        tracing::debug!(%addr, "TCP connect succeeded");
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::debug!(%addr, "TCP connect failed: {e}");
                        last_error = Some(e);
                    }
                }
            }

            match last_error {
                Some(source) => Err(ProbeError::Unreachable { endpoint, source }),
                None => Err(ProbeError::NoAddress { endpoint }),
            }
        })
    }
}

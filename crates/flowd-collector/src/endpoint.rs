//! ZeroMQ PULL endpoints
//!
//! Flow producers bind PUSH sockets on consecutive ports of one host; the
//! collector opens one PULL connection per port, `base_port + i` for worker
//! `i`. The pool is all-or-nothing: if any connection fails, the sockets
//! opened so far are dropped (which closes them) and startup aborts.
//!
//! A connect-side PULL socket neither reports nor repairs a producer that
//! went away, so each [`Endpoint`] rebuilds its own connection: after a
//! failed receive, and after `idle_timeout` without a message. Every
//! connection attempt is bounded by `connect_timeout`.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info};
use zeromq::{PullSocket, Socket, SocketRecv};

use crate::error::{CollectorError, CollectorResult};

/// Receive-level failure on one endpoint
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("ZeroMQ error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("No producer answered within {0:?}")]
    ConnectTimeout(Duration),
}

/// A source of raw message bodies owned by exactly one worker
#[async_trait]
pub trait FlowSource: Send + 'static {
    /// Address this source pulls from, for diagnostics
    fn address(&self) -> &str;

    /// Wait for the next message body
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError>;
}

/// Connection settings shared by every endpoint of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointOptions {
    /// Bound on one connection attempt, handshake included
    pub connect_timeout: Duration,
    /// Silence after which the connection is rebuilt
    pub idle_timeout: Duration,
}

/// One PULL connection to a producer
pub struct Endpoint {
    address: String,
    options: EndpointOptions,
    /// `None` after a failure, until the next successful reconnect
    socket: Option<PullSocket>,
}

impl Endpoint {
    /// Connect a fresh PULL socket to `address`
    pub async fn connect(
        address: impl Into<String>,
        options: EndpointOptions,
    ) -> Result<Self, TransportError> {
        let address = address.into();
        let socket = open_socket(&address, options.connect_timeout).await?;

        debug!(endpoint = %address, "Endpoint connected");

        Ok(Self {
            address,
            options,
            socket: Some(socket),
        })
    }

    /// Replace the current connection with a new one.
    ///
    /// The old socket stays in place while the new one connects; a failed
    /// attempt drops it so the next receive starts with a reconnect.
    async fn reconnect(&mut self) -> Result<(), TransportError> {
        match open_socket(&self.address, self.options.connect_timeout).await {
            Ok(socket) => {
                self.socket = Some(socket);
                Ok(())
            },
            Err(e) => {
                self.socket = None;
                Err(e)
            },
        }
    }
}

async fn open_socket(address: &str, connect_timeout: Duration) -> Result<PullSocket, TransportError> {
    let mut socket = PullSocket::new();
    timeout(connect_timeout, socket.connect(address))
        .await
        .map_err(|_| TransportError::ConnectTimeout(connect_timeout))??;
    Ok(socket)
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("address", &self.address)
            .field("connected", &self.socket.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl FlowSource for Endpoint {
    fn address(&self) -> &str {
        &self.address
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            let Some(socket) = self.socket.as_mut() else {
                self.reconnect().await?;
                info!(endpoint = %self.address, "Endpoint reconnected");
                continue;
            };

            match timeout(self.options.idle_timeout, socket.recv()).await {
                Ok(Ok(message)) => {
                    // Producers send single-frame messages; extra frames are joined.
                    return Ok(message.into_vec().concat());
                },
                Ok(Err(e)) => {
                    self.socket = None;
                    return Err(e.into());
                },
                Err(_) => {
                    debug!(
                        endpoint = %self.address,
                        idle = ?self.options.idle_timeout,
                        "Endpoint idle, refreshing connection"
                    );
                    self.reconnect().await?;
                },
            }
        }
    }
}

/// Addresses for `count` endpoints on consecutive ports
pub fn endpoint_addresses(
    base_address: &str,
    base_port: u16,
    count: usize,
) -> CollectorResult<Vec<String>> {
    (0..count)
        .map(|offset| {
            u16::try_from(offset)
                .ok()
                .and_then(|offset| base_port.checked_add(offset))
                .map(|port| format!("{}:{}", base_address, port))
                .ok_or_else(|| {
                    CollectorError::config(format!(
                        "{} endpoints starting at port {} exceed the port range",
                        count, base_port
                    ))
                })
        })
        .collect()
}

/// The connected endpoints, in port order
#[derive(Debug)]
pub struct EndpointPool {
    endpoints: Vec<Endpoint>,
}

impl EndpointPool {
    /// Connect every endpoint or none
    pub async fn open(
        base_address: &str,
        base_port: u16,
        count: usize,
        options: EndpointOptions,
    ) -> CollectorResult<Self> {
        let addresses = endpoint_addresses(base_address, base_port, count)?;
        let mut endpoints = Vec::with_capacity(addresses.len());

        for address in addresses {
            let endpoint = Endpoint::connect(address.clone(), options)
                .await
                .map_err(|source| CollectorError::Connect {
                    endpoint: address,
                    source,
                })?;
            endpoints.push(endpoint);
        }

        info!(
            count = endpoints.len(),
            base_address, base_port, "Endpoint pool connected"
        );

        Ok(Self { endpoints })
    }

    pub fn into_endpoints(self) -> Vec<Endpoint> {
        self.endpoints
    }
}

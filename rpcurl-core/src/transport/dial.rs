//! Establishes the connection described by a [`TransportConfig`].
//!
//! Dialing is eager and bounded by the configured dial timeout. Failures are never retried.
use super::{TransportConfig, TransportMode, tls};
use crate::target::ParsedTarget;
use crate::timing::Timing;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

/// Authority used when dialing a Unix domain socket.
const UNIX_SOCKET_AUTHORITY: &str = "localhost";

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Failed to read '{path}': {source}")]
    ReadPem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("No certificates found in '{0}'")]
    EmptyCertificates(PathBuf),
    #[error("No private key found in '{0}'")]
    MissingPrivateKey(PathBuf),
    #[error("Failed to create TLS config: {0}")]
    Tls(#[from] rustls::Error),
    #[error("Invalid TLS server name '{0}'")]
    InvalidServerName(String),
    #[error("Could not open SSLKEYLOGFILE {path}: {source}")]
    KeyLogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid target address '{0}': {1}")]
    InvalidAddress(String, #[source] tonic::transport::Error),
    #[error("Invalid authority '{0}'")]
    InvalidAuthority(String),
    #[error("Failed to dial target host '{0}': {1}")]
    ConnectionFailed(String, #[source] tonic::transport::Error),
    #[error("Timed out after {timeout:?} dialing target host '{target}'")]
    Timeout { target: String, timeout: Duration },
    #[error("Target scheme '{0}' is not supported")]
    UnsupportedScheme(String),
    #[error("ALTS transport security is not available in this build")]
    AltsUnavailable,
}

/// A live connection to the server.
#[derive(Debug, Clone)]
pub struct Transport {
    channel: Channel,
    max_recv_msg_size: Option<usize>,
}

impl Transport {
    /// Returns a handle on the underlying channel. Channels are cheap to clone.
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    pub fn max_recv_msg_size(&self) -> Option<usize> {
        self.max_recv_msg_size
    }
}

enum Socket {
    Tcp(String),
    #[cfg(unix)]
    Unix(PathBuf),
}

/// Dials the target with the negotiated transport.
pub async fn dial(
    config: &TransportConfig,
    target: &ParsedTarget,
    timing: &Timing,
) -> Result<Transport, ConnectError> {
    let dial_timing = timing.child("Dial");
    let result = tokio::time::timeout(config.dial_timeout, connect(config, target, &dial_timing))
        .await
        .map_err(|_| ConnectError::Timeout {
            target: target.address.clone(),
            timeout: config.dial_timeout,
        });
    dial_timing.done();

    let channel = result??;

    Ok(Transport {
        channel,
        max_recv_msg_size: config.max_recv_msg_size,
    })
}

async fn connect(
    config: &TransportConfig,
    target: &ParsedTarget,
    timing: &Timing,
) -> Result<Channel, ConnectError> {
    let socket = socket(target)?;

    let tls = match &config.mode {
        TransportMode::Alts(_) => return Err(ConnectError::AltsUnavailable),
        TransportMode::Plaintext => None,
        TransportMode::Tls(options) => {
            let tls_timing = timing.child("TLS Setup");
            let client_config = tls::client_config(options)?;

            let name = match (&options.server_name, &socket) {
                (Some(name), _) => name.as_str(),
                #[cfg(unix)]
                (None, Socket::Unix(_)) => UNIX_SOCKET_AUTHORITY,
                (None, Socket::Tcp(_)) => target.server_host(),
            };
            let server_name = tls::server_name(name)?;
            tls_timing.done();

            Some((TlsConnector::from(Arc::new(client_config)), server_name))
        }
    };

    let endpoint = endpoint(config, &socket, tls.is_some())?;

    tracing::debug!(
        address = %target.address,
        mode = config.mode.name(),
        "dialing target"
    );

    let blocking_dial = timing.child("BlockingDial");
    let result = match socket {
        Socket::Tcp(address) => {
            connect_with(&endpoint, tls, move || {
                let address = address.clone();
                async move {
                    let stream = TcpStream::connect(address).await?;
                    stream.set_nodelay(true)?;
                    Ok(stream)
                }
            })
            .await
        }
        #[cfg(unix)]
        Socket::Unix(path) => {
            connect_with(&endpoint, tls, move || {
                tokio::net::UnixStream::connect(path.clone())
            })
            .await
        }
    };
    blocking_dial.done();

    result.map_err(|e| ConnectError::ConnectionFailed(target.address.clone(), e))
}

fn socket(target: &ParsedTarget) -> Result<Socket, ConnectError> {
    if let Some(path) = target.unix_socket_path() {
        #[cfg(unix)]
        return Ok(Socket::Unix(PathBuf::from(path)));
        #[cfg(not(unix))]
        return Err(ConnectError::UnsupportedScheme(format!("unix ({path})")));
    }

    if target.address.starts_with("xds:") {
        return Err(ConnectError::UnsupportedScheme("xds".to_string()));
    }

    match &target.scheme {
        Some(scheme) if !target.was_url => Err(ConnectError::UnsupportedScheme(scheme.clone())),
        _ => Ok(Socket::Tcp(target.address.clone())),
    }
}

fn endpoint(
    config: &TransportConfig,
    socket: &Socket,
    use_tls: bool,
) -> Result<Endpoint, ConnectError> {
    let authority = match socket {
        Socket::Tcp(address) => address.as_str(),
        #[cfg(unix)]
        Socket::Unix(_) => UNIX_SOCKET_AUTHORITY,
    };

    // TLS is performed by our own connector, so the dial URI always uses `http`.
    let mut endpoint = Endpoint::from_shared(format!("http://{authority}"))
        .and_then(|endpoint| endpoint.user_agent(config.user_agent.clone()))
        .map_err(|e| ConnectError::InvalidAddress(authority.to_string(), e))?;

    let scheme = if use_tls { "https" } else { "http" };
    let origin_authority = config.authority.as_deref().unwrap_or(authority);
    let origin = format!("{scheme}://{origin_authority}")
        .parse::<Uri>()
        .map_err(|_| ConnectError::InvalidAuthority(origin_authority.to_string()))?;
    endpoint = endpoint.origin(origin);

    if let Some(keepalive) = config.keepalive {
        endpoint = endpoint
            .http2_keep_alive_interval(keepalive)
            .keep_alive_timeout(keepalive);
    }

    Ok(endpoint)
}

async fn connect_with<IO, F, Fut>(
    endpoint: &Endpoint,
    tls: Option<(TlsConnector, rustls_pki_types::ServerName<'static>)>,
    open: F,
) -> Result<Channel, tonic::transport::Error>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = io::Result<IO>> + Send + 'static,
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    match tls {
        Some((connector, server_name)) => {
            endpoint
                .connect_with_connector(service_fn(move |_: Uri| {
                    let socket = open();
                    let connector = connector.clone();
                    let server_name = server_name.clone();
                    async move {
                        let stream = connector.connect(server_name, socket.await?).await?;
                        Ok::<_, io::Error>(TokioIo::new(stream))
                    }
                }))
                .await
        }
        None => {
            endpoint
                .connect_with_connector(service_fn(move |_: Uri| {
                    let socket = open();
                    async move { Ok::<_, io::Error>(TokioIo::new(socket.await?)) }
                }))
                .await
        }
    }
}

// SPDX-License-Identifier: AGPL-3.0-only
//! Connection establishment with ordered fallback across configured daemons.

use crate::error::TacError;
use log::{debug, warn};
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpSocket, TcpStream};

/// One configured daemon; `secret` overrides the shared secret for this server.
#[derive(Clone, PartialEq, Eq)]
pub struct Server {
    pub addr: SocketAddr,
    pub secret: Option<Vec<u8>>,
}

impl Server {
    pub fn new(addr: SocketAddr) -> Self {
        Server { addr, secret: None }
    }

    pub fn with_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.secret = Some(secret.into());
        self
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("addr", &self.addr)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Established stream to the daemon that accepted the connection.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    server_index: usize,
    secret: Option<Vec<u8>>,
}

impl Connection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Position of the accepting daemon in the list given to [`connect`].
    pub fn server_index(&self) -> usize {
        self.server_index
    }

    /// Per-server secret of the accepting daemon, if it has one.
    pub fn secret(&self) -> Option<&[u8]> {
        self.secret.as_deref()
    }

    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("server_index", &self.server_index)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

const DSCP_MAX: u8 = 63;

fn open_socket(addr: SocketAddr, dscp: Option<u8>) -> io::Result<TcpSocket> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    match (dscp, addr) {
        (Some(dscp), _) if dscp > DSCP_MAX => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("dscp {dscp} out of range 0..={DSCP_MAX}"),
            ));
        }
        (Some(dscp), SocketAddr::V4(_)) => {
            // DSCP occupies the upper six bits of the TOS byte
            #[allow(deprecated)]
            socket.set_tos(u32::from(dscp) << 2)?;
        }
        (Some(dscp), SocketAddr::V6(_)) => {
            debug!("dscp {dscp} not applied to IPv6 server {addr}");
        }
        (None, _) => {}
    }
    Ok(socket)
}

/// Run one connection step against `addr` within `timeout`.
async fn bounded<T, F>(addr: SocketAddr, timeout: Duration, step: F) -> Result<T, TacError>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(timeout, step).await {
        Err(_) => Err(TacError::ConnTimeout(addr)),
        Ok(Err(source)) => Err(TacError::Connect {
            addr: addr.to_string(),
            source,
        }),
        Ok(Ok(value)) => Ok(value),
    }
}

async fn attempt(
    server: &Server,
    server_index: usize,
    timeout: Duration,
    dscp: Option<u8>,
) -> Result<Connection, TacError> {
    let addr = server.addr;
    let socket = open_socket(addr, dscp).map_err(|source| TacError::Connect {
        addr: addr.to_string(),
        source,
    })?;
    let stream = bounded(addr, timeout, socket.connect(addr)).await?;
    debug!("connected to TACACS+ server {addr}");
    Ok(Connection {
        stream,
        peer: addr,
        server_index,
        secret: server.secret.clone(),
    })
}

/// Connect to a single daemon within `timeout`.
pub async fn connect_single(
    server: &Server,
    timeout: Duration,
    dscp: Option<u8>,
) -> Result<Connection, TacError> {
    attempt(server, 0, timeout, dscp).await
}

/// Single ordered pass over `servers`; the last failure wins when none succeeds.
async fn first_reachable<T, F, Fut>(servers: &[Server], mut try_server: F) -> Result<T, TacError>
where
    F: FnMut(usize, Server) -> Fut,
    Fut: Future<Output = Result<T, TacError>>,
{
    let mut last_err = TacError::Connect {
        addr: "<none>".to_string(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "no TACACS+ servers configured"),
    };
    for (index, server) in servers.iter().enumerate() {
        match try_server(index, server.clone()).await {
            Ok(found) => return Ok(found),
            Err(err) => {
                warn!("TACACS+ server {} unavailable: {err}", server.addr);
                last_err = err;
            }
        }
    }
    Err(last_err)
}

/// Try each daemon in order, once, and return the first connection that succeeds.
/// When every attempt fails the last attempt's error is returned.
pub async fn connect(
    servers: &[Server],
    timeout: Duration,
    dscp: Option<u8>,
) -> Result<Connection, TacError> {
    first_reachable(servers, move |index, server| async move {
        attempt(&server, index, timeout, dscp).await
    })
    .await
}

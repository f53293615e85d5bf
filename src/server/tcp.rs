// SPDX-FileCopyrightText: Copyright (c) 2024-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus TCP server

use std::{
    collections::HashMap,
    fmt, io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, SystemTime},
};

use bytes::Bytes;
use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use socket2::{Domain, Socket, Type};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::Notify,
};
use tokio_util::{codec::Framed, sync::CancellationToken};

use crate::{
    codec::tcp::ServerCodec,
    error::Result,
    frame::{
        fn_code,
        tcp::{Header, ResponseAdu},
        Exception, ExceptionResponse, Request, ResponsePdu,
    },
    server::{Service, UnitRequest},
};

/// Default read deadline breaking connections to dead peers.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Callback invoked synchronously around connection tracking changes.
pub type ClientCallback = Arc<dyn Fn(&ConnectedClientInfo) + Send + Sync>;

/// Tracking record of one accepted connection.
#[derive(Debug)]
struct ConnectedClient {
    id: u64,
    peer_addr: SocketAddr,
    connected_at: SystemTime,
    rx: AtomicU64,
    tx: AtomicU64,
    function_counts: [AtomicU64; 256],
}

impl ConnectedClient {
    fn new(id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            connected_at: SystemTime::now(),
            rx: AtomicU64::new(0),
            tx: AtomicU64::new(0),
            function_counts: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Value copy of the connection state; counters are loaded
    /// independently.
    fn snapshot(&self) -> ConnectedClientInfo {
        ConnectedClientInfo {
            peer_addr: self.peer_addr,
            connected_at: self.connected_at,
            rx: self.rx.load(Ordering::Relaxed),
            tx: self.tx.load(Ordering::Relaxed),
            function_counts: std::array::from_fn(|code| {
                self.function_counts[code].load(Ordering::Relaxed)
            }),
        }
    }
}

/// Snapshot of one connected client.
#[derive(Debug, Clone)]
pub struct ConnectedClientInfo {
    pub peer_addr: SocketAddr,
    pub connected_at: SystemTime,
    /// Requests received.
    pub rx: u64,
    /// Responses sent.
    pub tx: u64,
    /// Requests received, indexed by the 8 bit function code.
    pub function_counts: [u64; 256],
}

/// A Modbus TCP server.
///
/// Accepts many concurrent connections; each is driven by its own handler
/// task that exclusively owns its socket.
pub struct Server {
    listener: TcpListener,
    read_timeout: Duration,
    on_connect: Option<ClientCallback>,
    on_disconnect: Option<ClientCallback>,
    connections: Arc<Mutex<HashMap<u64, Arc<ConnectedClient>>>>,
    next_connection_id: AtomicU64,
    shutdown: CancellationToken,
    drained: Arc<Notify>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("listener", &self.listener)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl Server {
    #[must_use]
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            read_timeout: DEFAULT_READ_TIMEOUT,
            on_connect: None,
            on_disconnect: None,
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_connection_id: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            drained: Arc::new(Notify::new()),
        }
    }

    /// Bind a listener with `SO_REUSEADDR` set.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = match addr {
            SocketAddr::V4(_) => Socket::new(Domain::IPV4, Type::STREAM, None)?,
            SocketAddr::V6(_) => Socket::new(Domain::IPV6, Type::STREAM, None)?,
        };
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1024)?;
        let listener = TcpListener::from_std(socket.into())?;
        Ok(Self::new(listener))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[must_use]
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    #[must_use]
    pub fn on_connect(
        mut self,
        callback: impl Fn(&ConnectedClientInfo) + Send + Sync + 'static,
    ) -> Self {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_disconnect(
        mut self,
        callback: impl Fn(&ConnectedClientInfo) + Send + Sync + 'static,
    ) -> Self {
        self.on_disconnect = Some(Arc::new(callback));
        self
    }

    /// Snapshot of every tracked connection.
    #[must_use]
    pub fn connected_clients(&self) -> Vec<ConnectedClientInfo> {
        let connections = self
            .connections
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut clients: Vec<_> = connections.values().collect();
        clients.sort_unstable_by_key(|client| client.id);
        clients.iter().map(|client| client.snapshot()).collect()
    }

    /// Accept connections and dispatch their requests to `service` until
    /// [`stop`](Self::stop) is called.
    pub async fn serve<S>(&self, service: S) -> Result<()>
    where
        S: Service + 'static,
    {
        let service = Arc::new(service);
        loop {
            let accepted = tokio::select! {
                () = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            let (stream, peer_addr) = accepted?;
            let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
            let client = Arc::new(ConnectedClient::new(id, peer_addr));
            self.connections
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(id, Arc::clone(&client));
            if let Some(callback) = &self.on_connect {
                callback(&client.snapshot());
            }
            log::debug!("client connected: {peer_addr}");

            let task = ConnectionTask {
                connections: Arc::clone(&self.connections),
                drained: Arc::clone(&self.drained),
                shutdown: self.shutdown.clone(),
                on_disconnect: self.on_disconnect.clone(),
                read_timeout: self.read_timeout,
                service: Arc::clone(&service),
            };
            tokio::spawn(task.run(stream, client));
        }
        self.wait_for_drain().await;
        Ok(())
    }

    /// Stop accepting, break every connection handler out of its read and
    /// wait for the connection map to drain.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.wait_for_drain().await;
    }

    async fn wait_for_drain(&self) {
        loop {
            let notified = self.drained.notified();
            if self
                .connections
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .is_empty()
            {
                break;
            }
            notified.await;
        }
    }
}

struct ConnectionTask<S> {
    connections: Arc<Mutex<HashMap<u64, Arc<ConnectedClient>>>>,
    drained: Arc<Notify>,
    shutdown: CancellationToken,
    on_disconnect: Option<ClientCallback>,
    read_timeout: Duration,
    service: Arc<S>,
}

impl<S: Service> ConnectionTask<S> {
    async fn run(self, stream: TcpStream, client: Arc<ConnectedClient>) {
        let mut framed = Framed::new(stream, ServerCodec::default());
        loop {
            let next = tokio::select! {
                () = self.shutdown.cancelled() => break,
                next = tokio::time::timeout(self.read_timeout, framed.next()) => next,
            };
            let (hdr, pdu_data) = match next {
                Err(_) => {
                    log::debug!("read timeout, dropping {}", client.peer_addr);
                    break;
                }
                Ok(None) => {
                    log::debug!("client disconnected: {}", client.peer_addr);
                    break;
                }
                Ok(Some(Err(err))) => {
                    // The stream alignment can no longer be trusted.
                    log::warn!("closing connection to {}: {err}", client.peer_addr);
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            client.rx.fetch_add(1, Ordering::Relaxed);
            // The framer rejects empty PDUs, so there is a function code.
            let function = pdu_data[0];
            client.function_counts[usize::from(function)].fetch_add(1, Ordering::Relaxed);

            let pdu = tokio::select! {
                () = self.shutdown.cancelled() => break,
                pdu = self.dispatch(hdr, function, pdu_data, &client) => pdu,
            };
            if let Err(err) = framed.send(ResponseAdu { hdr, pdu }).await {
                log::warn!("write to {} failed: {err}", client.peer_addr);
                break;
            }
            client.tx.fetch_add(1, Ordering::Relaxed);
        }

        let removed = self
            .connections
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&client.id);
        if removed.is_some() {
            if let Some(callback) = &self.on_disconnect {
                callback(&client.snapshot());
            }
        }
        if self
            .connections
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_empty()
        {
            self.drained.notify_waiters();
        }
    }

    async fn dispatch(
        &self,
        hdr: Header,
        function: u8,
        pdu_data: Bytes,
        client: &ConnectedClient,
    ) -> ResponsePdu {
        match Request::try_from(pdu_data) {
            Ok(request) => {
                let req = UnitRequest {
                    unit_id: hdr.unit_id,
                    request,
                };
                match self.service.call(req).await {
                    Ok(response) => response.into(),
                    Err(exception) => ExceptionResponse {
                        function: function & !fn_code::EXCEPTION_BIT,
                        exception,
                    }
                    .into(),
                }
            }
            Err(err) => {
                log::debug!("malformed request from {}: {err}", client.peer_addr);
                ExceptionResponse {
                    function: function & !fn_code::EXCEPTION_BIT,
                    exception: Exception::IllegalDataValue,
                }
                .into()
            }
        }
    }
}

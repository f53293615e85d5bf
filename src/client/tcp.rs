// SPDX-FileCopyrightText: Copyright (c) 2024-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCP client transport.
//!
//! Owns one TCP connection and multiplexes many concurrent logical requests
//! over it. A writer task serializes outgoing frames, a reader task routes
//! decoded responses back to their waiting callers by transaction id.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use bytes::Bytes;
use futures_util::{
    sink::SinkExt as _,
    stream::{SplitSink, SplitStream, StreamExt as _},
};
use tokio::{net::TcpStream, sync::mpsc, sync::Notify};
use tokio_util::{codec::Framed, sync::CancellationToken};

use crate::{
    client::{
        transaction::{TransactionPool, DEFAULT_TRANSACTION_TIMEOUT},
        Call, Context, Transport,
    },
    codec::tcp::ClientCodec,
    error::{Error, Result},
    frame::{
        tcp::{Header, TransactionId, UnitId, TCP_DEVICE_UNIT_ID},
        ExceptionResponse, Request, Response, MAX_PDU_SIZE,
    },
};

/// Default overall deadline the client facade applies per call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_WRITE_QUEUE_CAPACITY: usize = 64;

/// Configuration of a [`TcpTransport`] and the [`Context`] built on it.
#[derive(Debug, Clone)]
pub struct TcpClientOptions {
    pub addr: SocketAddr,
    /// Stamped into every request issued through the facade.
    pub unit_id: UnitId,
    /// Age at which the pool times out an unanswered transaction.
    pub transaction_timeout: Duration,
    /// Overall per-call deadline applied by the facade unless the call
    /// carries its own.
    pub call_timeout: Duration,
    /// Deadline for establishing the TCP connection.
    pub connect_timeout: Option<Duration>,
    /// Capacity of the writer queue between `send` and the writer task.
    pub write_queue_capacity: usize,
}

impl TcpClientOptions {
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            unit_id: TCP_DEVICE_UNIT_ID,
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            connect_timeout: None,
            write_queue_capacity: DEFAULT_WRITE_QUEUE_CAPACITY,
        }
    }

    #[must_use]
    pub fn with_unit_id(mut self, unit_id: UnitId) -> Self {
        self.unit_id = unit_id;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// One frame queued for the writer task.
#[derive(Debug)]
struct WriteCommand {
    transaction_id: TransactionId,
    hdr: Header,
    pdu_data: Bytes,
    cancel: CancellationToken,
}

/// Per-connection handles. Replaced wholesale on every reconnect.
#[derive(Debug)]
struct Session {
    writer_tx: mpsc::Sender<WriteCommand>,
    shutdown: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

#[derive(Debug)]
struct StateCell {
    state: ConnectionState,
    session: Option<Session>,
}

#[derive(Debug)]
struct Inner {
    options: TcpClientOptions,
    pool: Arc<TransactionPool>,
    cell: Mutex<StateCell>,
    state_changed: Notify,
    monitor_started: AtomicBool,
}

/// A Modbus TCP transport multiplexing concurrent transactions over one
/// connection.
///
/// Cloning is cheap and clones share the connection.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    inner: Arc<Inner>,
}

impl TcpTransport {
    #[must_use]
    pub fn new(options: TcpClientOptions) -> Self {
        let pool = Arc::new(TransactionPool::new(options.transaction_timeout));
        Self {
            inner: Arc::new(Inner {
                options,
                pool,
                cell: Mutex::new(StateCell {
                    state: ConnectionState::Disconnected,
                    session: None,
                }),
                state_changed: Notify::new(),
                monitor_started: AtomicBool::new(false),
            }),
        }
    }

    /// Establish the connection and spawn the reader and writer tasks.
    ///
    /// Fails with [`Error::AlreadyConnected`] on a connected transport.
    /// While a disconnect is in progress the call waits for it to complete
    /// before dialing.
    pub async fn connect(&self) -> Result<()> {
        loop {
            let notified = self.inner.state_changed.notified();
            {
                let mut cell = self
                    .inner
                    .cell
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                match cell.state {
                    ConnectionState::Connected => return Err(Error::AlreadyConnected),
                    ConnectionState::Connecting | ConnectionState::Disconnecting => (),
                    ConnectionState::Disconnected => {
                        cell.state = ConnectionState::Connecting;
                        break;
                    }
                }
            }
            notified.await;
        }

        let dial = TcpStream::connect(self.inner.options.addr);
        let connected = match self.inner.options.connect_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, dial).await {
                Ok(connected) => connected,
                Err(_) => {
                    self.inner.enter_disconnected();
                    return Err(Error::Timeout);
                }
            },
            None => dial.await,
        };
        let stream = match connected {
            Ok(stream) => stream,
            Err(err) => {
                self.inner.enter_disconnected();
                return Err(err.into());
            }
        };

        // Stale ids of the previous session must not collide with the new
        // one, so the pool is cleared before any request can be submitted.
        self.inner.pool.reset(|| Error::TransportClosing);
        if !self.inner.monitor_started.swap(true, Ordering::SeqCst) {
            self.inner.pool.start_monitor();
        }

        let framed = Framed::new(stream, ClientCodec::default());
        let (sink, frames) = framed.split::<(Header, Bytes)>();
        let shutdown = CancellationToken::new();
        let (writer_tx, writer_rx) = mpsc::channel(self.inner.options.write_queue_capacity);

        let tasks = vec![
            tokio::spawn(writer_task(
                Arc::clone(&self.inner),
                sink,
                writer_rx,
                shutdown.clone(),
            )),
            tokio::spawn(reader_task(
                Arc::clone(&self.inner),
                frames,
                shutdown.clone(),
            )),
        ];

        let mut cell = self
            .inner
            .cell
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        cell.state = ConnectionState::Connected;
        cell.session = Some(Session {
            writer_tx,
            shutdown,
            tasks,
        });
        drop(cell);
        self.inner.state_changed.notify_waiters();
        log::debug!("connected to {}", self.inner.options.addr);
        Ok(())
    }

    /// Close the connection, stop both tasks and terminal-error every
    /// in-flight transaction with [`Error::TransportClosing`].
    pub async fn disconnect(&self) -> Result<()> {
        let session = {
            let mut cell = self
                .inner
                .cell
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if cell.state != ConnectionState::Connected {
                return Err(Error::NotConnected);
            }
            cell.state = ConnectionState::Disconnecting;
            cell.session.take()
        };
        if let Some(session) = session {
            session.shutdown.cancel();
            for task in session.tasks {
                let _ = task.await;
            }
        }
        self.inner.pool.reset(|| Error::TransportClosing);
        self.inner.enter_disconnected();
        log::debug!("disconnected from {}", self.inner.options.addr);
        Ok(())
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        let cell = self
            .inner
            .cell
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        cell.state == ConnectionState::Connected
    }

    /// Submit one request and wait for its correlated response.
    ///
    /// Races the one-shot result slot against the call's cancellation
    /// handle and the transport shutdown signal. On caller cancellation the
    /// transaction stays registered so a late reply is quietly discarded;
    /// the pool's timeout monitor reclaims the id.
    pub async fn send(
        &self,
        unit_id: UnitId,
        request: Request,
        call: &Call,
    ) -> Result<std::result::Result<Response, ExceptionResponse>> {
        let (writer_tx, shutdown) = {
            let cell = self
                .inner
                .cell
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if cell.state != ConnectionState::Connected {
                return Err(Error::NotConnected);
            }
            let session = cell.session.as_ref().ok_or(Error::NotConnected)?;
            (session.writer_tx.clone(), session.shutdown.clone())
        };

        // Argument errors must never reach the wire: encode upfront so the
        // writer task only ever sees well-formed PDUs.
        let pdu_data = Bytes::try_from(request)?;
        if pdu_data.len() > MAX_PDU_SIZE {
            return Err(Error::PduSizeExceeded(pdu_data.len()));
        }

        let placed = self.inner.pool.place(call.deadline)?;
        let transaction_id = placed.transaction_id;
        let command = WriteCommand {
            transaction_id,
            hdr: Header {
                transaction_id,
                unit_id,
            },
            pdu_data,
            cancel: call.cancel.clone(),
        };

        tokio::select! {
            enqueued = writer_tx.send(command) => {
                if enqueued.is_err() {
                    let _ = self.inner.pool.fail(transaction_id, Error::TransportClosing);
                    return Err(Error::TransportClosing);
                }
            }
            () = call.cancel.cancelled() => {
                // Never written; the monitor reclaims the id.
                return Err(Error::ContextCancelled);
            }
            () = shutdown.cancelled() => {
                let _ = self.inner.pool.fail(transaction_id, Error::TransportClosing);
                return Err(Error::TransportClosing);
            }
        }

        let mut rx = placed.rx;
        tokio::select! {
            // A delivered outcome wins over a concurrent teardown signal.
            biased;
            outcome = &mut rx => match outcome {
                Ok(Ok(adu)) => Ok(adu.pdu.into()),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(Error::NoResponse),
            },
            () = call.cancel.cancelled() => Err(Error::ContextCancelled),
            () = shutdown.cancelled() => Err(Error::TransportClosing),
        }
    }
}

impl Inner {
    fn enter_disconnected(&self) {
        let session = {
            let mut cell = self
                .cell
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            cell.state = ConnectionState::Disconnected;
            cell.session.take()
        };
        if let Some(session) = session {
            session.shutdown.cancel();
        }
        self.state_changed.notify_waiters();
    }

    /// Unplanned loss of the connection: stop both tasks, terminal-error
    /// every in-flight transaction and mark the transport disconnected.
    fn teardown(&self) {
        self.enter_disconnected();
        self.pool.reset(|| Error::NoResponse);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(session) = self
            .cell
            .get_mut()
            .map(|cell| cell.session.take())
            .unwrap_or(None)
        {
            session.shutdown.cancel();
        }
        self.pool.close(|| Error::TransportClosing);
    }
}

/// Sole writer on the socket: frames are written back to back, never
/// interleaved.
async fn writer_task(
    inner: Arc<Inner>,
    mut sink: SplitSink<Framed<TcpStream, ClientCodec>, (Header, Bytes)>,
    mut writer_rx: mpsc::Receiver<WriteCommand>,
    shutdown: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            () = shutdown.cancelled() => break,
            command = writer_rx.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };
        let WriteCommand {
            transaction_id,
            hdr,
            pdu_data,
            cancel,
        } = command;
        if cancel.is_cancelled() {
            // The caller gave up while the request was queued.
            let _ = inner.pool.fail(transaction_id, Error::ContextCancelled);
            continue;
        }
        let written = tokio::select! {
            () = shutdown.cancelled() => break,
            written = sink.send((hdr, pdu_data)) => written,
        };
        if let Err(err) = written {
            log::warn!("write failed, closing connection: {err}");
            inner.teardown();
            break;
        }
    }
}

/// Routes decoded responses back to their transactions.
async fn reader_task(
    inner: Arc<Inner>,
    mut frames: SplitStream<Framed<TcpStream, ClientCodec>>,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = shutdown.cancelled() => break,
            frame = frames.next() => frame,
        };
        match frame {
            Some(Ok(adu)) => {
                let transaction_id = adu.hdr.transaction_id;
                if !inner.pool.complete(transaction_id, adu) {
                    log::debug!("discarding response for unknown transaction {transaction_id}");
                }
            }
            Some(Err(err)) => {
                // The stream is no longer trustworthy. Fail the owning
                // transaction when the offending header identifies one,
                // then tear the session down.
                if let Error::InvalidProtocolHeader {
                    transaction_id,
                    protocol_id,
                } = err
                {
                    if !inner.pool.fail(
                        transaction_id,
                        Error::InvalidProtocolHeader {
                            transaction_id,
                            protocol_id,
                        },
                    ) {
                        log::debug!(
                            "invalid protocol header on unknown transaction {transaction_id}"
                        );
                    }
                } else {
                    log::warn!("read failed, closing connection: {err}");
                }
                inner.teardown();
                break;
            }
            None => {
                log::debug!("connection closed by peer");
                inner.teardown();
                break;
            }
        }
    }
}

/// Connect to a Modbus TCP server addressed as a direct device.
pub async fn connect(socket_addr: SocketAddr) -> Result<Context> {
    connect_with(TcpClientOptions::new(socket_addr)).await
}

/// Connect to a Modbus device behind a TCP gateway that forwards messages
/// to/from the addressed unit.
pub async fn connect_unit(socket_addr: SocketAddr, unit_id: UnitId) -> Result<Context> {
    connect_with(TcpClientOptions::new(socket_addr).with_unit_id(unit_id)).await
}

/// Connect with explicit options.
pub async fn connect_with(options: TcpClientOptions) -> Result<Context> {
    let unit_id = options.unit_id;
    let call_timeout = options.call_timeout;
    let transport = TcpTransport::new(options);
    transport.connect().await?;
    Ok(Context::new(Arc::new(transport), unit_id, call_timeout))
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) -> Result<()> {
        TcpTransport::connect(self).await
    }

    async fn disconnect(&self) -> Result<()> {
        TcpTransport::disconnect(self).await
    }

    fn is_connected(&self) -> bool {
        TcpTransport::is_connected(self)
    }

    async fn send(
        &self,
        unit_id: UnitId,
        request: Request,
        call: &Call,
    ) -> Result<std::result::Result<Response, ExceptionResponse>> {
        TcpTransport::send(self, unit_id, request, call).await
    }
}

//! Persistent client connection to the local acquisition daemon.
//!
//! [`AcquisitionClient::connect`] dials the daemon, performs the HELLO
//! exchange, requests a full realtime resend, and spawns two background
//! tasks: a receive loop that parses daemon packets into
//! [`ClientEvent`]s, and a keepalive loop that pings every ten seconds.
//! Inbound traffic arrives on the returned [`EventStream`]; outbound
//! commands go through the cloneable client handle.
//!
//! The receive loop owns the connection's [`NameTable`]: announcements
//! bind indices, values resolve them. A value for an unbound index is
//! logged and dropped without disturbing the stream; a malformed packet
//! is fatal to the connection and ends the stream.

pub mod opcodes;

#[cfg(unix)]
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at, timeout};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec;
use crate::error::{LinkError, Result};
use crate::intern::NameTable;
use crate::types::{StreamName, Variant};

use opcodes::{from_daemon, to_daemon};

/// Keepalive cadence once the link is up.
const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Upper bound on any single length-prefixed payload.
const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Wire value for "flush everything" in a SYSTEM_FLUSH packet.
const FLUSH_ALL: f64 = -1.0;

/// Address of the acquisition daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonAddr {
    /// TCP endpoint, `host:port`.
    Tcp(String),
    /// Unix-domain socket path.
    #[cfg(unix)]
    Unix(PathBuf),
}

impl FromStr for DaemonAddr {
    type Err = LinkError;

    /// Parses `tcp://host:port`, `unix:///path`, or a bare `host:port`.
    fn from_str(s: &str) -> Result<Self> {
        if let Some(endpoint) = s.strip_prefix("tcp://") {
            if endpoint.is_empty() {
                return Err(LinkError::config_error(format!("empty daemon address '{s}'")));
            }
            return Ok(DaemonAddr::Tcp(endpoint.to_string()));
        }
        if let Some(path) = s.strip_prefix("unix://") {
            #[cfg(unix)]
            {
                if path.is_empty() {
                    return Err(LinkError::config_error(format!("empty daemon address '{s}'")));
                }
                return Ok(DaemonAddr::Unix(PathBuf::from(path)));
            }
            #[cfg(not(unix))]
            {
                let _ = path;
                return Err(LinkError::config_error(
                    "unix:// daemon addresses are only supported on Unix platforms",
                ));
            }
        }
        if s.is_empty() {
            return Err(LinkError::config_error("empty daemon address"));
        }
        Ok(DaemonAddr::Tcp(s.to_string()))
    }
}

impl std::fmt::Display for DaemonAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonAddr::Tcp(endpoint) => write!(f, "tcp://{endpoint}"),
            #[cfg(unix)]
            DaemonAddr::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Connection tuning for [`AcquisitionClient::connect`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Bound on establishing the byte stream.
    pub dial_timeout: Duration,
    /// Bound on the daemon answering the opening HELLO.
    pub hello_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self { dial_timeout: Duration::from_secs(30), hello_timeout: Duration::from_secs(30) }
    }
}

/// Inbound traffic surfaced by the receive loop.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A realtime measurement for a previously announced stream.
    Value { name: Arc<StreamName>, value: Variant },
    /// One record from the acquisition system's event log.
    Event(Variant),
    /// Autoprobe subsystem state.
    AutoprobeState(Variant),
    /// Static description of one acquisition interface.
    InterfaceInformation { interface: String, value: Variant },
    /// Dynamic state of one acquisition interface.
    InterfaceState { interface: String, value: Variant },
}

/// Ordered stream of [`ClientEvent`]s for one connection.
///
/// Ends when the connection goes down, cleanly or not; check
/// [`AcquisitionClient::take_failure`] afterwards to tell which.
pub struct EventStream {
    rx: UnboundedReceiverStream<ClientEvent>,
}

impl Stream for EventStream {
    type Item = ClientEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ClientEvent>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

trait DaemonIo: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> DaemonIo for T {}

struct ClientShared {
    writer: Mutex<WriteHalf<Box<dyn DaemonIo>>>,
    cancel: CancellationToken,
    failure: StdMutex<Option<LinkError>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl ClientShared {
    async fn send_frame(&self, frame: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await.map_err(|e| LinkError::io_error("daemon write", e))?;
        writer.flush().await.map_err(|e| LinkError::io_error("daemon write", e))?;
        Ok(())
    }

    /// Stores the first terminal failure and tears the connection down.
    fn record_failure(&self, error: LinkError) {
        let mut slot = lock_unpoisoned(&self.failure);
        if slot.is_none() {
            *slot = Some(error);
        }
        drop(slot);
        self.cancel.cancel();
    }
}

fn lock_unpoisoned<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Command surface and lifecycle handle for one daemon connection.
///
/// Cheap to clone; all clones share the connection.
#[derive(Clone)]
pub struct AcquisitionClient {
    shared: Arc<ClientShared>,
}

impl AcquisitionClient {
    /// Connects to the daemon, completes the opening exchange, and
    /// requests a full realtime resend.
    pub async fn connect(
        addr: &DaemonAddr,
        options: ClientOptions,
    ) -> Result<(Self, EventStream)> {
        info!("Connecting to acquisition daemon at {addr}");
        let io: Box<dyn DaemonIo> = match addr {
            DaemonAddr::Tcp(endpoint) => {
                let stream = timeout(options.dial_timeout, TcpStream::connect(endpoint))
                    .await
                    .map_err(|_| LinkError::timeout("daemon dial", options.dial_timeout))?
                    .map_err(|e| {
                        LinkError::connection_failed_with_source(
                            format!("dialing {endpoint}"),
                            Box::new(e),
                        )
                    })?;
                Box::new(stream)
            }
            #[cfg(unix)]
            DaemonAddr::Unix(path) => {
                let stream = timeout(options.dial_timeout, UnixStream::connect(path))
                    .await
                    .map_err(|_| LinkError::timeout("daemon dial", options.dial_timeout))?
                    .map_err(|e| {
                        LinkError::connection_failed_with_source(
                            format!("dialing {}", path.display()),
                            Box::new(e),
                        )
                    })?;
                Box::new(stream)
            }
        };
        Self::start(io, options).await
    }

    /// Drives the protocol over an already-established byte stream.
    ///
    /// Useful for tests and for transports the crate does not dial
    /// itself.
    pub async fn from_stream<S>(stream: S, options: ClientOptions) -> Result<(Self, EventStream)>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::start(Box::new(stream), options).await
    }

    async fn start(io: Box<dyn DaemonIo>, options: ClientOptions) -> Result<(Self, EventStream)> {
        let (read_half, mut write_half) = tokio::io::split(io);
        let mut reader = BufReader::new(read_half);

        write_half
            .write_all(&[to_daemon::HELLO])
            .await
            .map_err(|e| LinkError::io_error("daemon handshake", e))?;
        write_half.flush().await.map_err(|e| LinkError::io_error("daemon handshake", e))?;

        let mut reply = [0u8; 1];
        timeout(options.hello_timeout, reader.read_exact(&mut reply))
            .await
            .map_err(|_| LinkError::timeout("daemon HELLO", options.hello_timeout))?
            .map_err(|e| {
                LinkError::connection_failed_with_source("reading HELLO reply", Box::new(e))
            })?;
        if reply[0] != from_daemon::HELLO {
            return Err(LinkError::handshake(format!(
                "expected HELLO ({:#04x}), daemon sent {:#04x}",
                from_daemon::HELLO,
                reply[0]
            )));
        }

        write_half
            .write_all(&[to_daemon::RESEND_REALTIME])
            .await
            .map_err(|e| LinkError::io_error("daemon handshake", e))?;
        write_half.flush().await.map_err(|e| LinkError::io_error("daemon handshake", e))?;
        debug!("Daemon link ready, realtime resend requested");

        let cancel = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ClientShared {
            writer: Mutex::new(write_half),
            cancel,
            failure: StdMutex::new(None),
            tasks: StdMutex::new(Vec::new()),
        });

        let receive_shared = Arc::clone(&shared);
        let receive_task = tokio::spawn(async move {
            receive_loop(reader, event_tx, receive_shared).await;
        });
        let ping_shared = Arc::clone(&shared);
        let ping_task = tokio::spawn(async move {
            keepalive_loop(ping_shared).await;
        });
        {
            let mut tasks = lock_unpoisoned(&shared.tasks);
            tasks.push(receive_task);
            tasks.push(ping_task);
        }

        let client = Self { shared };
        let events = EventStream { rx: UnboundedReceiverStream::new(event_rx) };
        Ok((client, events))
    }

    /// Forwards a log record into the acquisition system's message log.
    pub async fn message_log(&self, record: &Variant) -> Result<()> {
        self.shared.send_frame(&framed_variant(to_daemon::MESSAGE_LOG, record)).await
    }

    /// Dispatches a command, optionally addressed to a single interface.
    pub async fn command(&self, target: Option<&str>, payload: &Variant) -> Result<()> {
        self.shared.send_frame(&command_frame(target, payload)).await
    }

    /// Flushes averaged data covering `duration` seconds back;
    /// `None` flushes everything.
    pub async fn system_flush(&self, duration: Option<f64>) -> Result<()> {
        self.shared.send_frame(&system_flush_frame(duration)).await
    }

    /// Changes the averaging interval. `unit` and `align` are
    /// daemon-defined codes.
    pub async fn set_averaging_time(&self, unit: u8, count: i32, align: bool) -> Result<()> {
        self.shared.send_frame(&averaging_frame(unit, count, align)).await
    }

    /// Asks the daemon to push buffered data out to its writers.
    pub async fn data_flush(&self) -> Result<()> {
        self.shared.send_frame(&[to_daemon::DATA_FLUSH]).await
    }

    pub async fn set_bypass_flag(&self, flag: &str) -> Result<()> {
        self.shared.send_frame(&flag_frame(to_daemon::BYPASS_FLAG_SET, flag)).await
    }

    pub async fn clear_bypass_flag(&self, flag: &str) -> Result<()> {
        self.shared.send_frame(&flag_frame(to_daemon::BYPASS_FLAG_CLEAR, flag)).await
    }

    pub async fn clear_all_bypass_flags(&self) -> Result<()> {
        self.shared.send_frame(&[to_daemon::BYPASS_FLAGS_CLEAR_ALL]).await
    }

    pub async fn set_system_flag(&self, flag: &str) -> Result<()> {
        self.shared.send_frame(&flag_frame(to_daemon::SYSTEM_FLAG_SET, flag)).await
    }

    pub async fn clear_system_flag(&self, flag: &str) -> Result<()> {
        self.shared.send_frame(&flag_frame(to_daemon::SYSTEM_FLAG_CLEAR, flag)).await
    }

    pub async fn clear_all_system_flags(&self) -> Result<()> {
        self.shared.send_frame(&[to_daemon::SYSTEM_FLAGS_CLEAR_ALL]).await
    }

    /// Asks the acquisition system to restart itself.
    pub async fn request_restart(&self) -> Result<()> {
        self.shared.send_frame(&[to_daemon::RESTART_REQUEST]).await
    }

    /// The terminal failure that ended the event stream, if any.
    ///
    /// Returns `None` while the connection is healthy or after a clean
    /// shutdown. Takes ownership; a second call returns `None`.
    pub fn take_failure(&self) -> Option<LinkError> {
        lock_unpoisoned(&self.shared.failure).take()
    }

    /// Cancels the connection tasks, waits for them, and closes the
    /// write half.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = lock_unpoisoned(&self.shared.tasks).drain(..).collect();
        for handle in handles {
            if let Err(error) = handle.await {
                if !error.is_cancelled() {
                    warn!("Connection task panicked: {error}");
                }
            }
        }
        let mut writer = self.shared.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

async fn receive_loop(
    mut reader: BufReader<ReadHalf<Box<dyn DaemonIo>>>,
    events: mpsc::UnboundedSender<ClientEvent>,
    shared: Arc<ClientShared>,
) {
    let mut names = NameTable::new();
    loop {
        let packet = tokio::select! {
            _ = shared.cancel.cancelled() => {
                debug!("Receive loop cancelled");
                break;
            }
            packet = read_packet(&mut reader, &mut names) => packet,
        };
        match packet {
            Ok(Some(event)) => {
                if events.send(event).is_err() {
                    debug!("Event receiver dropped, closing daemon link");
                    shared.cancel.cancel();
                    break;
                }
            }
            Ok(None) => {}
            Err(error) => {
                // A read failure during teardown is just the socket closing.
                if shared.cancel.is_cancelled() {
                    break;
                }
                warn!("Daemon link failed: {error}");
                shared.record_failure(error);
                break;
            }
        }
        if events.is_closed() {
            debug!("Event receiver dropped, closing daemon link");
            shared.cancel.cancel();
            break;
        }
    }
}

/// Reads and dispatches one daemon packet.
///
/// `Ok(Some)` surfaces an event, `Ok(None)` means the packet was consumed
/// internally (pong, name announcement, dropped value), `Err` is fatal to
/// the connection.
async fn read_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
    names: &mut NameTable,
) -> Result<Option<ClientEvent>> {
    let opcode = reader
        .read_u8()
        .await
        .map_err(|e| LinkError::io_error("daemon packet type", e))?;
    match opcode {
        from_daemon::PONG => {
            trace!("Pong from daemon");
            Ok(None)
        }
        from_daemon::EVENT => {
            let payload = read_framed(reader, "event payload").await?;
            let (value, _) = codec::decode(&payload)?;
            Ok(Some(ClientEvent::Event(value)))
        }
        from_daemon::AUTOPROBE_STATE => {
            let payload = read_framed(reader, "autoprobe payload").await?;
            let (value, _) = codec::decode(&payload)?;
            Ok(Some(ClientEvent::AutoprobeState(value)))
        }
        from_daemon::INTERFACE_INFORMATION => {
            let interface = read_short_string(reader, "interface name").await?;
            let payload = read_framed(reader, "interface information").await?;
            let (value, _) = codec::decode(&payload)?;
            Ok(Some(ClientEvent::InterfaceInformation { interface, value }))
        }
        from_daemon::INTERFACE_STATE => {
            let interface = read_short_string(reader, "interface name").await?;
            let payload = read_framed(reader, "interface state").await?;
            let (value, _) = codec::decode(&payload)?;
            Ok(Some(ClientEvent::InterfaceState { interface, value }))
        }
        from_daemon::REALTIME_NAME => {
            let payload = read_framed(reader, "realtime name").await?;
            let (name, _) = StreamName::decode(&payload)?;
            let (index, evicted) = names.bind(name);
            if let Some(old) = evicted {
                debug!("Name slot {index} recycled away from {old}");
            }
            trace!("Realtime name bound to index {index}");
            Ok(None)
        }
        from_daemon::REALTIME_VALUE => {
            let index = reader
                .read_u16_le()
                .await
                .map_err(|e| LinkError::io_error("realtime value index", e))?;
            let payload = read_framed(reader, "realtime value").await?;
            match names.resolve(index) {
                Ok(name) => {
                    let (value, _) = codec::decode(&payload)?;
                    Ok(Some(ClientEvent::Value { name: Arc::clone(name), value }))
                }
                Err(error) => {
                    warn!("Dropping realtime value: {error}");
                    Ok(None)
                }
            }
        }
        from_daemon::ARCHIVE_DATA => {
            let chunk = read_framed(reader, "archive data").await?;
            if chunk.is_empty() {
                warn!("Discarding unsolicited archive end marker");
            } else {
                warn!("Discarding {} bytes of unsolicited archive data", chunk.len());
            }
            Ok(None)
        }
        from_daemon::HELLO => {
            Err(LinkError::protocol_violation("daemon packet", "unexpected HELLO after handshake"))
        }
        other => Err(LinkError::protocol_violation(
            "daemon packet",
            format!("unknown packet type {other:#04x}"),
        )),
    }
}

async fn read_framed<R: AsyncRead + Unpin>(reader: &mut R, what: &str) -> Result<Vec<u8>> {
    let len = reader.read_u32_le().await.map_err(|e| LinkError::io_error(what, e))? as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(LinkError::protocol_violation(
            what,
            format!("declared length {len} exceeds the {MAX_PAYLOAD_LEN}-byte cap"),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| LinkError::io_error(what, e))?;
    Ok(payload)
}

async fn read_short_string<R: AsyncRead + Unpin>(reader: &mut R, what: &str) -> Result<String> {
    let len = reader.read_u16_le().await.map_err(|e| LinkError::io_error(what, e))? as usize;
    let mut raw = vec![0u8; len];
    reader.read_exact(&mut raw).await.map_err(|e| LinkError::io_error(what, e))?;
    String::from_utf8(raw).map_err(|_| LinkError::protocol_violation(what, "not valid UTF-8"))
}

async fn keepalive_loop(shared: Arc<ClientShared>) {
    let start = tokio::time::Instant::now() + PING_INTERVAL;
    let mut ticker = interval_at(start, PING_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(error) = shared.send_frame(&[to_daemon::PING]).await {
                    warn!("Keepalive write failed: {error}");
                    shared.record_failure(error);
                    break;
                }
                trace!("Ping sent to daemon");
            }
        }
    }
}

fn framed_variant(opcode: u8, value: &Variant) -> Vec<u8> {
    let payload = codec::encode(value);
    let mut frame = Vec::with_capacity(5 + payload.len());
    frame.push(opcode);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    frame
}

fn command_frame(target: Option<&str>, payload: &Variant) -> Vec<u8> {
    // An absent target goes out as a zero-length string, meaning
    // "whole system".
    let target = target.unwrap_or("");
    debug_assert!(target.len() <= u16::MAX as usize);
    let mut frame = vec![to_daemon::COMMAND];
    frame.extend_from_slice(&(target.len() as u16).to_le_bytes());
    frame.extend_from_slice(target.as_bytes());
    codec::encode_into(&mut frame, payload);
    frame
}

fn flag_frame(opcode: u8, flag: &str) -> Vec<u8> {
    debug_assert!(flag.len() <= u16::MAX as usize);
    let mut frame = vec![opcode];
    frame.extend_from_slice(&(flag.len() as u16).to_le_bytes());
    frame.extend_from_slice(flag.as_bytes());
    frame
}

fn system_flush_frame(duration: Option<f64>) -> Vec<u8> {
    let mut frame = vec![to_daemon::SYSTEM_FLUSH];
    frame.extend_from_slice(&duration.unwrap_or(FLUSH_ALL).to_le_bytes());
    frame
}

fn averaging_frame(unit: u8, count: i32, align: bool) -> Vec<u8> {
    let mut frame = vec![to_daemon::SET_AVERAGING_TIME, unit];
    frame.extend_from_slice(&count.to_le_bytes());
    frame.push(u8::from(align));
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::iter;
    use tokio::io::DuplexStream;

    #[test]
    fn daemon_addr_parsing() {
        assert_eq!(
            "tcp://127.0.0.1:9000".parse::<DaemonAddr>().unwrap(),
            DaemonAddr::Tcp("127.0.0.1:9000".to_string())
        );
        assert_eq!(
            "station-pc:9000".parse::<DaemonAddr>().unwrap(),
            DaemonAddr::Tcp("station-pc:9000".to_string())
        );
        #[cfg(unix)]
        assert_eq!(
            "unix:///var/run/acq.sock".parse::<DaemonAddr>().unwrap(),
            DaemonAddr::Unix(PathBuf::from("/var/run/acq.sock"))
        );

        assert!("".parse::<DaemonAddr>().is_err());
        assert!("tcp://".parse::<DaemonAddr>().is_err());
    }

    #[test]
    fn daemon_addr_display_round_trips() {
        for text in ["tcp://127.0.0.1:9000", "unix:///var/run/acq.sock"] {
            #[cfg(not(unix))]
            if text.starts_with("unix://") {
                continue;
            }
            let addr: DaemonAddr = text.parse().unwrap();
            assert_eq!(addr.to_string(), text);
        }
    }

    #[test]
    fn command_frame_layout() {
        let frame = command_frame(Some("neph0"), &Variant::Integer(2));
        assert_eq!(frame[0], to_daemon::COMMAND);
        assert_eq!(&frame[1..3], &5u16.to_le_bytes());
        assert_eq!(&frame[3..8], b"neph0");
        assert_eq!(frame[8], codec::tags::INTEGER);

        // No target serializes as a zero-length string.
        let broadcast = command_frame(None, &Variant::Empty);
        assert_eq!(broadcast, vec![to_daemon::COMMAND, 0, 0, codec::tags::EMPTY]);
    }

    #[test]
    fn system_flush_frame_encodes_flush_all() {
        let mut expected = vec![to_daemon::SYSTEM_FLUSH];
        expected.extend_from_slice(&(-1.0f64).to_le_bytes());
        assert_eq!(system_flush_frame(None), expected);

        let mut expected = vec![to_daemon::SYSTEM_FLUSH];
        expected.extend_from_slice(&300.0f64.to_le_bytes());
        assert_eq!(system_flush_frame(Some(300.0)), expected);
    }

    #[test]
    fn averaging_frame_layout() {
        let frame = averaging_frame(2, 300, true);
        assert_eq!(frame[0], to_daemon::SET_AVERAGING_TIME);
        assert_eq!(frame[1], 2);
        assert_eq!(&frame[2..6], &300i32.to_le_bytes());
        assert_eq!(frame[6], 1);
    }

    #[test]
    fn flag_frame_layout() {
        let frame = flag_frame(to_daemon::SYSTEM_FLAG_SET, "maintenance");
        assert_eq!(frame[0], to_daemon::SYSTEM_FLAG_SET);
        assert_eq!(&frame[1..3], &11u16.to_le_bytes());
        assert_eq!(&frame[3..], b"maintenance");
    }

    // Daemon-side helpers for the async tests.

    async fn accept_handshake(daemon: &mut DuplexStream) {
        let mut byte = [0u8; 1];
        daemon.read_exact(&mut byte).await.unwrap();
        assert_eq!(byte[0], to_daemon::HELLO);
        daemon.write_all(&[from_daemon::HELLO]).await.unwrap();
        daemon.read_exact(&mut byte).await.unwrap();
        assert_eq!(byte[0], to_daemon::RESEND_REALTIME);
    }

    async fn connected_pair() -> (AcquisitionClient, EventStream, DuplexStream) {
        let (client_io, mut daemon) = tokio::io::duplex(4096);
        let (_, connected) = tokio::join!(
            accept_handshake(&mut daemon),
            AcquisitionClient::from_stream(client_io, ClientOptions::default()),
        );
        let (client, events) = connected.unwrap();
        (client, events, daemon)
    }

    fn name_frame(name: &StreamName) -> Vec<u8> {
        let mut payload = Vec::new();
        name.encode_into(&mut payload);
        let mut frame = vec![from_daemon::REALTIME_NAME];
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        frame
    }

    fn value_frame(index: u16, value: &Variant) -> Vec<u8> {
        let payload = codec::encode(value);
        let mut frame = vec![from_daemon::REALTIME_VALUE];
        frame.extend_from_slice(&index.to_le_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        frame
    }

    fn payload_frame(opcode: u8, value: &Variant) -> Vec<u8> {
        let payload = codec::encode(value);
        let mut frame = vec![opcode];
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        frame
    }

    fn interface_frame(opcode: u8, interface: &str, value: &Variant) -> Vec<u8> {
        let mut frame = vec![opcode];
        frame.extend_from_slice(&(interface.len() as u16).to_le_bytes());
        frame.extend_from_slice(interface.as_bytes());
        let payload = codec::encode(value);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        frame
    }

    async fn next_event(events: &mut EventStream) -> ClientEvent {
        timeout(Duration::from_secs(5), events.next()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn wrong_hello_byte_fails_the_connection() {
        let (client_io, mut daemon) = tokio::io::duplex(4096);
        let daemon_side = async {
            let mut byte = [0u8; 1];
            daemon.read_exact(&mut byte).await.unwrap();
            daemon.write_all(&[0x42]).await.unwrap();
        };
        let (_, connected) = tokio::join!(
            daemon_side,
            AcquisitionClient::from_stream(client_io, ClientOptions::default()),
        );
        match connected {
            Err(LinkError::Handshake { details }) => assert!(details.contains("0x42")),
            Err(other) => panic!("expected handshake failure, got {other:?}"),
            Ok(_) => panic!("handshake should not succeed against a 0x42 greeting"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hello_timeout_is_enforced() {
        let (client_io, daemon) = tokio::io::duplex(4096);
        // Never answer; the silent daemon holds its end open.
        let result = AcquisitionClient::from_stream(
            client_io,
            ClientOptions {
                dial_timeout: Duration::from_secs(1),
                hello_timeout: Duration::from_secs(10),
            },
        )
        .await;
        drop(daemon);
        assert!(matches!(result, Err(LinkError::Timeout { .. })));
    }

    #[tokio::test]
    async fn values_resolve_through_announcements_in_order() {
        let (client, mut events, mut daemon) = connected_pair().await;
        let name = StreamName::new("nil", "raw", "BsG_S11", iter::empty::<&str>());

        daemon.write_all(&name_frame(&name)).await.unwrap();
        daemon.write_all(&value_frame(0, &Variant::Real(1.0))).await.unwrap();
        daemon.write_all(&value_frame(0, &Variant::Real(3.0))).await.unwrap();

        for expected in [1.0, 3.0] {
            match next_event(&mut events).await {
                ClientEvent::Value { name: got, value } => {
                    assert_eq!(got.as_ref(), &name);
                    assert_eq!(value, Variant::Real(expected));
                }
                other => panic!("expected value, got {other:?}"),
            }
        }
        client.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_index_is_dropped_without_killing_the_stream() {
        let (client, mut events, mut daemon) = connected_pair().await;
        let name = StreamName::new("nil", "raw", "Temp", iter::empty::<&str>());

        daemon.write_all(&value_frame(41, &Variant::Real(9.0))).await.unwrap();
        daemon.write_all(&name_frame(&name)).await.unwrap();
        daemon.write_all(&value_frame(0, &Variant::Real(21.5))).await.unwrap();

        match next_event(&mut events).await {
            ClientEvent::Value { value, .. } => assert_eq!(value, Variant::Real(21.5)),
            other => panic!("expected the index-0 value, got {other:?}"),
        }
        assert!(client.take_failure().is_none());
        client.shutdown().await;
    }

    #[tokio::test]
    async fn event_and_interface_packets_dispatch() {
        let (client, mut events, mut daemon) = connected_pair().await;

        daemon
            .write_all(&payload_frame(from_daemon::EVENT, &Variant::Text("powerup".to_string())))
            .await
            .unwrap();
        daemon
            .write_all(&payload_frame(from_daemon::AUTOPROBE_STATE, &Variant::Boolean(true)))
            .await
            .unwrap();
        daemon
            .write_all(&interface_frame(
                from_daemon::INTERFACE_STATE,
                "neph0",
                &Variant::Integer(3),
            ))
            .await
            .unwrap();

        assert!(matches!(next_event(&mut events).await, ClientEvent::Event(Variant::Text(t)) if t == "powerup"));
        assert!(matches!(
            next_event(&mut events).await,
            ClientEvent::AutoprobeState(Variant::Boolean(true))
        ));
        match next_event(&mut events).await {
            ClientEvent::InterfaceState { interface, value } => {
                assert_eq!(interface, "neph0");
                assert_eq!(value, Variant::Integer(3));
            }
            other => panic!("expected interface state, got {other:?}"),
        }
        client.shutdown().await;
    }

    #[tokio::test]
    async fn archive_chunks_are_discarded() {
        let (client, mut events, mut daemon) = connected_pair().await;

        let mut chunk = vec![from_daemon::ARCHIVE_DATA];
        chunk.extend_from_slice(&4u32.to_le_bytes());
        chunk.extend_from_slice(&[1, 2, 3, 4]);
        daemon.write_all(&chunk).await.unwrap();
        // Zero-length end marker.
        let mut marker = vec![from_daemon::ARCHIVE_DATA];
        marker.extend_from_slice(&0u32.to_le_bytes());
        daemon.write_all(&marker).await.unwrap();
        // The stream keeps delivering afterwards.
        daemon
            .write_all(&payload_frame(from_daemon::EVENT, &Variant::Empty))
            .await
            .unwrap();

        assert!(matches!(next_event(&mut events).await, ClientEvent::Event(Variant::Empty)));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_packet_ends_the_stream_with_a_failure() {
        let (client, mut events, mut daemon) = connected_pair().await;

        daemon.write_all(&[0x63]).await.unwrap();

        assert!(timeout(Duration::from_secs(5), events.next()).await.unwrap().is_none());
        match client.take_failure() {
            Some(LinkError::Protocol { details, .. }) => assert!(details.contains("0x63")),
            other => panic!("expected protocol failure, got {other:?}"),
        }
        client.shutdown().await;
    }

    #[tokio::test]
    async fn oversized_payload_declaration_is_fatal() {
        let (client, mut events, mut daemon) = connected_pair().await;

        let mut frame = vec![from_daemon::EVENT];
        frame.extend_from_slice(&u32::MAX.to_le_bytes());
        daemon.write_all(&frame).await.unwrap();

        assert!(timeout(Duration::from_secs(5), events.next()).await.unwrap().is_none());
        assert!(matches!(client.take_failure(), Some(LinkError::Protocol { .. })));
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_pings_every_ten_seconds() {
        let (client, _events, mut daemon) = connected_pair().await;

        let mut byte = [0u8; 1];
        timeout(Duration::from_secs(11), daemon.read_exact(&mut byte)).await.unwrap().unwrap();
        assert_eq!(byte[0], to_daemon::PING);

        daemon.write_all(&[from_daemon::PONG]).await.unwrap();

        timeout(Duration::from_secs(11), daemon.read_exact(&mut byte)).await.unwrap().unwrap();
        assert_eq!(byte[0], to_daemon::PING);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn outbound_commands_reach_the_wire() {
        let (client, _events, mut daemon) = connected_pair().await;

        client.system_flush(None).await.unwrap();
        let mut frame = [0u8; 9];
        daemon.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame[0], to_daemon::SYSTEM_FLUSH);
        assert_eq!(f64::from_le_bytes(frame[1..9].try_into().unwrap()), -1.0);

        client.set_bypass_flag("dusty").await.unwrap();
        let mut frame = [0u8; 8];
        daemon.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame[0], to_daemon::BYPASS_FLAG_SET);
        assert_eq!(&frame[3..8], b"dusty");

        client.request_restart().await.unwrap();
        let mut frame = [0u8; 1];
        daemon.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame[0], to_daemon::RESTART_REQUEST);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_the_write_half() {
        let (client, _events, mut daemon) = connected_pair().await;
        client.shutdown().await;

        let mut sink = Vec::new();
        let read = daemon.read_to_end(&mut sink).await.unwrap();
        assert_eq!(read, 0);
    }
}

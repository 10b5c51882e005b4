//! Supervised bridge from the acquisition daemon to a remote collector.
//!
//! [`UplinkRelay::spawn`] starts a supervisor task that dials the
//! collector websocket, authenticates, connects the local daemon, and
//! runs a session that forwards traffic under policy: realtime values
//! batch behind a one-second deferred flush, state snapshots coalesce
//! per key, and events pass through a twenty-per-second cap. When
//! either leg fails both are torn down and the whole attempt repeats
//! after a fixed sixty-second delay, forever.

mod auth;
mod framing;
mod limiter;
pub mod opcodes;
mod pending;
mod uplink;

pub use auth::{Authenticator, NoAuth, PresharedKey};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, sleep};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{AcquisitionClient, ClientEvent, ClientOptions, DaemonAddr, EventStream};
use crate::codec;
use crate::config::RelayConfig;
use crate::error::{LinkError, Result};
use crate::stream::RelayStreamExt;
use crate::types::Variant;

use framing::BlockBuilder;
use limiter::{CoalescingLimiters, LimitKey};
use opcodes::to_collector;
use pending::PendingValues;
use uplink::{ControlMessage, Inbound, Uplink, UplinkReader};

/// Fixed delay between relay attempts. No backoff growth, no cap.
const RETRY_DELAY: Duration = Duration::from_secs(60);
/// Delay between the first queued value and the batch flush.
const FLUSH_DELAY: Duration = Duration::from_secs(1);
/// Coalescing cycle for autoprobe and interface snapshots.
const LIMITER_CYCLE: Duration = Duration::from_secs(1);
/// Window and budget for event forwarding.
const EVENT_WINDOW: Duration = Duration::from_secs(1);
const EVENT_CAP: usize = 20;
/// Connection bounds for the relay's daemon-facing client.
const DAEMON_DIAL_TIMEOUT: Duration = Duration::from_secs(11);
const DAEMON_READY_TIMEOUT: Duration = Duration::from_secs(10);
const COLLECTOR_DIAL_TIMEOUT: Duration = Duration::from_secs(30);
/// Version byte appended to the collector handshake.
const UPLINK_PROTOCOL_VERSION: u8 = 1;

/// Handle to a running relay.
pub struct UplinkRelay {
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
}

impl UplinkRelay {
    /// Validates the configuration and starts the supervisor task.
    ///
    /// Configuration problems are the only fatal startup errors; from
    /// here on every failure is retried.
    pub fn spawn(config: RelayConfig, authenticator: Arc<dyn Authenticator>) -> Result<Self> {
        config.validate()?;
        let cancel = CancellationToken::new();
        let supervisor_cancel = cancel.clone();
        let supervisor = tokio::spawn(async move {
            supervise(config, authenticator, supervisor_cancel).await;
        });
        Ok(Self { cancel, supervisor })
    }

    /// Stops the relay and waits for the supervisor to finish tearing
    /// down both legs.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(error) = self.supervisor.await {
            if !error.is_cancelled() {
                warn!("Relay supervisor panicked: {error}");
            }
        }
    }
}

async fn supervise(
    config: RelayConfig,
    authenticator: Arc<dyn Authenticator>,
    cancel: CancellationToken,
) {
    info!("Relay supervisor started for {}", config.collector.url);
    loop {
        match run_attempt(&config, authenticator.as_ref(), &cancel).await {
            Ok(()) => break,
            Err(error) => {
                // Transient failures are routine; anything else still
                // retries but deserves a louder log line.
                if error.is_transient() {
                    info!("Relay session lost: {error}; retrying in {RETRY_DELAY:?}");
                } else {
                    warn!("Relay session failed: {error}; retrying in {RETRY_DELAY:?}");
                }
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(RETRY_DELAY) => {}
        }
    }
    info!("Relay supervisor stopped");
}

/// One complete relay attempt: dial both legs, run the session, tear
/// both legs down. Returns `Ok` only when cancelled.
async fn run_attempt(
    config: &RelayConfig,
    authenticator: &dyn Authenticator,
    cancel: &CancellationToken,
) -> Result<()> {
    let (uplink, mut downlink) = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        connected = uplink::connect(&config.collector.url, COLLECTOR_DIAL_TIMEOUT) => connected?,
    };
    let uplink = Arc::new(uplink);

    let mut hello = authenticator.credentials().await?;
    hello.push(UPLINK_PROTOCOL_VERSION);
    hello.push(u8::from(config.include_instant));
    if let Err(error) = uplink.send(Bytes::from(hello)).await {
        uplink.close().await;
        return Err(error);
    }

    let daemon_addr: DaemonAddr = config.daemon.address.parse()?;
    let options = ClientOptions {
        dial_timeout: DAEMON_DIAL_TIMEOUT,
        hello_timeout: DAEMON_READY_TIMEOUT,
    };
    // The downlink stays live while the daemon leg comes up: a control
    // read in this window has no daemon to go to and is dropped, never
    // deferred. Pings are still answered.
    let connect = AcquisitionClient::connect(&daemon_addr, options);
    tokio::pin!(connect);
    let connected = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                uplink.close().await;
                return Ok(());
            }
            connected = &mut connect => break connected,
            inbound = downlink.next() => match inbound {
                Ok(Inbound::Control(message)) => {
                    debug!("Dropping control sent before daemon readiness: {message:?}");
                }
                Ok(Inbound::Ping(payload)) => {
                    if let Err(error) = uplink.send_pong(payload).await {
                        uplink.close().await;
                        return Err(error);
                    }
                }
                Ok(Inbound::Closed) => {
                    uplink.close().await;
                    return Err(LinkError::connection_failed(
                        "collector closed before the daemon link was ready",
                    ));
                }
                Err(error) => {
                    uplink.close().await;
                    return Err(error);
                }
            },
        }
    };
    let (client, events) = match connected {
        Ok(pair) => pair,
        Err(error) => {
            uplink.close().await;
            return Err(error);
        }
    };

    let result = run_session(config, &client, events, Arc::clone(&uplink), downlink, cancel).await;

    client.shutdown().await;
    uplink.close().await;
    result
}

async fn run_session(
    config: &RelayConfig,
    client: &AcquisitionClient,
    mut events: EventStream,
    uplink: Arc<Uplink>,
    mut downlink: UplinkReader,
    cancel: &CancellationToken,
) -> Result<()> {
    let session_cancel = cancel.child_token();
    let mut tasks = JoinSet::new();

    // Events get their own capped lane so a burst can never stall the
    // daemon socket.
    let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel::<Variant>();
    {
        let uplink = Arc::clone(&uplink);
        let cancel = session_cancel.clone();
        tasks.spawn(async move {
            let mut capped =
                UnboundedReceiverStream::new(event_rx).cap_per_window(EVENT_CAP, EVENT_WINDOW);
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = capped.next() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                if let Err(error) = uplink.send(event_frame(&event)).await {
                    warn!("Event forward failed: {error}");
                    break;
                }
            }
        });
    }

    let limiters = CoalescingLimiters::new(LIMITER_CYCLE);
    let mut pending = PendingValues::new(config.include_instant);
    let mut builder = BlockBuilder::new();

    let flush_timer = sleep(FLUSH_DELAY);
    tokio::pin!(flush_timer);
    let mut flush_armed = false;

    let result = loop {
        tokio::select! {
            _ = session_cancel.cancelled() => break Ok(()),
            event = events.next() => match event {
                Some(ClientEvent::Value { name, value }) => {
                    if pending.queue(name, value) && !flush_armed {
                        flush_armed = true;
                        flush_timer.as_mut().reset(Instant::now() + FLUSH_DELAY);
                    }
                }
                Some(ClientEvent::Event(value)) => {
                    if event_tx.send(value).is_err() {
                        break Err(LinkError::connection_failed("event forwarder stopped"));
                    }
                }
                Some(ClientEvent::AutoprobeState(value)) => {
                    limiters.submit(
                        LimitKey::Autoprobe,
                        autoprobe_frame(&value),
                        &uplink,
                        &session_cancel,
                        &mut tasks,
                    );
                }
                Some(ClientEvent::InterfaceInformation { interface, value }) => {
                    let frame =
                        interface_frame(to_collector::INTERFACE_INFORMATION, &interface, &value);
                    limiters.submit(
                        LimitKey::InterfaceInformation(interface),
                        frame,
                        &uplink,
                        &session_cancel,
                        &mut tasks,
                    );
                }
                Some(ClientEvent::InterfaceState { interface, value }) => {
                    let frame = interface_frame(to_collector::INTERFACE_STATE, &interface, &value);
                    limiters.submit(
                        LimitKey::InterfaceState(interface),
                        frame,
                        &uplink,
                        &session_cancel,
                        &mut tasks,
                    );
                }
                None => {
                    break Err(client.take_failure().unwrap_or_else(|| {
                        LinkError::connection_failed("daemon event stream ended")
                    }));
                }
            },
            inbound = downlink.next() => match inbound {
                Ok(Inbound::Control(message)) => {
                    // A failed daemon write surfaces through the event
                    // stream ending; here it only warrants a warning.
                    if let Err(error) = dispatch_control(client, message).await {
                        warn!("Control dispatch failed: {error}");
                    }
                }
                Ok(Inbound::Ping(payload)) => {
                    if let Err(error) = uplink.send_pong(payload).await {
                        break Err(error);
                    }
                }
                Ok(Inbound::Closed) => {
                    break Err(LinkError::connection_failed("collector closed the session"));
                }
                Err(error) => break Err(error),
            },
            _ = &mut flush_timer, if flush_armed => {
                flush_armed = false;
                let frames = build_flush(&mut pending, &mut builder);
                if let Err(error) = uplink.send_all(frames).await {
                    break Err(error);
                }
            }
        }
    };

    session_cancel.cancel();
    while let Some(joined) = tasks.join_next().await {
        if let Err(error) = joined {
            if !error.is_cancelled() {
                warn!("Relay task panicked: {error}");
            }
        }
    }
    result
}

/// Re-issues one collector control message on the daemon link.
async fn dispatch_control(client: &AcquisitionClient, message: ControlMessage) -> Result<()> {
    match message {
        ControlMessage::MessageLog(record) => client.message_log(&record).await,
        ControlMessage::Command { target, payload } => {
            client.command(target.as_deref(), &payload).await
        }
        ControlMessage::BypassFlagSet(flag) => client.set_bypass_flag(&flag).await,
        ControlMessage::BypassFlagClear(flag) => client.clear_bypass_flag(&flag).await,
        ControlMessage::BypassFlagsClearAll => client.clear_all_bypass_flags().await,
        ControlMessage::SystemFlagSet(flag) => client.set_system_flag(&flag).await,
        ControlMessage::SystemFlagClear(flag) => client.clear_system_flag(&flag).await,
        ControlMessage::SystemFlagsClearAll => client.clear_all_system_flags().await,
        ControlMessage::SystemFlush(duration) => {
            client.system_flush((duration >= 0.0).then_some(duration)).await
        }
        ControlMessage::RestartAcquisition => client.request_restart().await,
    }
}

fn build_flush(pending: &mut PendingValues, builder: &mut BlockBuilder) -> Vec<Bytes> {
    let mut frames = Vec::new();
    for (name, value) in pending.take_batch() {
        builder.push(&name, &value, &mut frames);
    }
    builder.finish(&mut frames);
    frames
}

fn event_frame(value: &Variant) -> Bytes {
    let mut frame = vec![to_collector::EVENT];
    codec::encode_into(&mut frame, value);
    Bytes::from(frame)
}

fn autoprobe_frame(value: &Variant) -> Bytes {
    let mut frame = vec![to_collector::AUTOPROBE_STATE];
    codec::encode_into(&mut frame, value);
    Bytes::from(frame)
}

fn interface_frame(opcode: u8, interface: &str, value: &Variant) -> Bytes {
    debug_assert!(interface.len() <= u16::MAX as usize);
    let mut frame = vec![opcode];
    frame.extend_from_slice(&(interface.len() as u16).to_le_bytes());
    frame.extend_from_slice(interface.as_bytes());
    codec::encode_into(&mut frame, value);
    Bytes::from(frame)
}

//! Websocket transport to the collector.
//!
//! [`connect`] dials the collector and splits the socket into an
//! [`Uplink`] shared by every sender task and an [`UplinkReader`]
//! owned by the session loop. Control traffic from the collector is
//! parsed here into [`ControlMessage`]s; the session decides what to
//! do with them.

use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use tracing::{debug, trace};

use crate::codec::{ByteCursor, decode_value};
use crate::error::{LinkError, Result};
use crate::types::Variant;

use super::opcodes::from_collector;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on any single websocket message, both directions.
const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Dials the collector and completes the websocket handshake.
pub(crate) async fn connect(url: &str, dial_timeout: Duration) -> Result<(Uplink, UplinkReader)> {
    let config = WebSocketConfig::default().max_message_size(Some(MAX_MESSAGE_LEN));
    let (ws, _response) = timeout(dial_timeout, connect_async_with_config(url, Some(config), false))
        .await
        .map_err(|_| LinkError::timeout("collector dial", dial_timeout))??;
    debug!("Collector websocket open at {url}");
    let (sink, stream) = ws.split();
    Ok((Uplink { sink: Mutex::new(sink) }, UplinkReader { stream }))
}

/// Write half of the collector socket.
///
/// The sink lock serializes frames from the flush, limiter, and event
/// tasks without imposing any ordering between them.
pub(crate) struct Uplink {
    sink: Mutex<SplitSink<WsStream, Message>>,
}

impl Uplink {
    pub(crate) async fn send(&self, frame: Bytes) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Binary(frame)).await?;
        Ok(())
    }

    /// Sends a batch under one lock so no other sender can interleave.
    pub(crate) async fn send_all(&self, frames: Vec<Bytes>) -> Result<()> {
        if frames.is_empty() {
            return Ok(());
        }
        let mut sink = self.sink.lock().await;
        for frame in frames {
            sink.feed(Message::Binary(frame)).await?;
        }
        sink.flush().await?;
        Ok(())
    }

    pub(crate) async fn send_pong(&self, payload: Bytes) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Pong(payload)).await?;
        Ok(())
    }

    /// Best-effort close notification; errors are ignored because the
    /// peer may already be gone.
    pub(crate) async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.close().await;
    }
}

/// Read half of the collector socket.
pub(crate) struct UplinkReader {
    stream: SplitStream<WsStream>,
}

/// One inbound item the session loop must act on.
#[derive(Debug)]
pub(crate) enum Inbound {
    Control(ControlMessage),
    Ping(Bytes),
    Closed,
}

impl UplinkReader {
    /// Waits for the next actionable inbound item.
    ///
    /// A malformed control message is an error: the collector and relay
    /// no longer agree on the protocol, so the session must end rather
    /// than guess.
    pub(crate) async fn next(&mut self) -> Result<Inbound> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(bytes))) => {
                    return ControlMessage::decode(&bytes).map(Inbound::Control);
                }
                Some(Ok(Message::Ping(payload))) => return Ok(Inbound::Ping(payload)),
                Some(Ok(Message::Pong(_))) => {
                    trace!("Pong from collector");
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Collector closed the session: {frame:?}");
                    return Ok(Inbound::Closed);
                }
                None => return Ok(Inbound::Closed),
                Some(Ok(Message::Text(_))) => {
                    return Err(LinkError::protocol_violation(
                        "collector message",
                        "unexpected text frame",
                    ));
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(error)) => return Err(error.into()),
            }
        }
    }
}

/// Control traffic the collector sends down to the relay.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ControlMessage {
    MessageLog(Variant),
    Command { target: Option<String>, payload: Variant },
    BypassFlagSet(String),
    BypassFlagClear(String),
    BypassFlagsClearAll,
    SystemFlagSet(String),
    SystemFlagClear(String),
    SystemFlagsClearAll,
    /// Seconds of averaged data to flush; negative means everything.
    SystemFlush(f64),
    RestartAcquisition,
}

impl ControlMessage {
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(bytes);
        let opcode = cursor.read_u8("control message type")?;
        match opcode {
            from_collector::MESSAGE_LOG => Ok(Self::MessageLog(decode_value(&mut cursor)?)),
            from_collector::COMMAND => {
                let len = cursor.read_u16_le("command target length")? as usize;
                let target = cursor.read_utf8(len, "command target")?;
                let payload = decode_value(&mut cursor)?;
                // A zero-length target means "whole system".
                let target = if target.is_empty() { None } else { Some(target) };
                Ok(Self::Command { target, payload })
            }
            from_collector::BYPASS_FLAG_SET => {
                Ok(Self::BypassFlagSet(cursor.read_remaining_utf8("bypass flag")?))
            }
            from_collector::BYPASS_FLAG_CLEAR => {
                Ok(Self::BypassFlagClear(cursor.read_remaining_utf8("bypass flag")?))
            }
            from_collector::BYPASS_FLAGS_CLEAR_ALL => Ok(Self::BypassFlagsClearAll),
            from_collector::SYSTEM_FLAG_SET => {
                Ok(Self::SystemFlagSet(cursor.read_remaining_utf8("system flag")?))
            }
            from_collector::SYSTEM_FLAG_CLEAR => {
                Ok(Self::SystemFlagClear(cursor.read_remaining_utf8("system flag")?))
            }
            from_collector::SYSTEM_FLAGS_CLEAR_ALL => Ok(Self::SystemFlagsClearAll),
            from_collector::SYSTEM_FLUSH => {
                Ok(Self::SystemFlush(cursor.read_f64_le("flush duration")?))
            }
            from_collector::RESTART_ACQUISITION => Ok(Self::RestartAcquisition),
            other => Err(LinkError::protocol_violation(
                "collector control message",
                format!("unknown control type {other:#04x}"),
            )),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::Role;

    /// A connected uplink and the collector-side socket it talks to,
    /// over real loopback TCP with no HTTP handshake.
    pub(crate) async fn pair_for_tests() -> (Uplink, UplinkReader, WebSocketStream<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), async {
            listener.accept().await.unwrap().0
        });
        let client =
            WebSocketStream::from_raw_socket(MaybeTlsStream::Plain(client.unwrap()), Role::Client, None)
                .await;
        let collector = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
        let (sink, stream) = client.split();
        (Uplink { sink: Mutex::new(sink) }, UplinkReader { stream }, collector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use test_support::pair_for_tests;

    fn control_frame(opcode: u8, tail: &[u8]) -> Vec<u8> {
        let mut frame = vec![opcode];
        frame.extend_from_slice(tail);
        frame
    }

    #[test]
    fn decodes_message_log() {
        let frame = control_frame(
            from_collector::MESSAGE_LOG,
            &codec::encode(&Variant::Text("filter change".to_string())),
        );
        assert_eq!(
            ControlMessage::decode(&frame).unwrap(),
            ControlMessage::MessageLog(Variant::Text("filter change".to_string()))
        );
    }

    #[test]
    fn decodes_targeted_and_broadcast_commands() {
        let mut tail = Vec::new();
        tail.extend_from_slice(&5u16.to_le_bytes());
        tail.extend_from_slice(b"neph0");
        tail.extend_from_slice(&codec::encode(&Variant::Integer(2)));
        let frame = control_frame(from_collector::COMMAND, &tail);
        assert_eq!(
            ControlMessage::decode(&frame).unwrap(),
            ControlMessage::Command { target: Some("neph0".to_string()), payload: Variant::Integer(2) }
        );

        let mut tail = Vec::new();
        tail.extend_from_slice(&0u16.to_le_bytes());
        tail.extend_from_slice(&codec::encode(&Variant::Empty));
        let frame = control_frame(from_collector::COMMAND, &tail);
        assert_eq!(
            ControlMessage::decode(&frame).unwrap(),
            ControlMessage::Command { target: None, payload: Variant::Empty }
        );
    }

    #[test]
    fn decodes_flag_operations() {
        let frame = control_frame(from_collector::BYPASS_FLAG_SET, b"dusty");
        assert_eq!(
            ControlMessage::decode(&frame).unwrap(),
            ControlMessage::BypassFlagSet("dusty".to_string())
        );

        let frame = control_frame(from_collector::SYSTEM_FLAGS_CLEAR_ALL, b"");
        assert_eq!(ControlMessage::decode(&frame).unwrap(), ControlMessage::SystemFlagsClearAll);
    }

    #[test]
    fn decodes_system_flush_duration() {
        let frame = control_frame(from_collector::SYSTEM_FLUSH, &3600.0f64.to_le_bytes());
        assert_eq!(
            ControlMessage::decode(&frame).unwrap(),
            ControlMessage::SystemFlush(3600.0)
        );
    }

    #[test]
    fn unknown_control_type_is_rejected() {
        let error = ControlMessage::decode(&[0xAA]).unwrap_err();
        assert!(matches!(error, LinkError::Protocol { .. }));
        assert!(error.to_string().contains("0xaa"));
    }

    #[test]
    fn empty_message_is_rejected() {
        assert!(ControlMessage::decode(&[]).is_err());
    }

    #[tokio::test]
    async fn frames_cross_the_socket_intact() {
        let (uplink, _reader, mut collector) = pair_for_tests().await;

        uplink.send(Bytes::from_static(&[2, 0xAB, 0xCD])).await.unwrap();
        match collector.next().await.unwrap().unwrap() {
            Message::Binary(bytes) => assert_eq!(bytes.as_ref(), &[2, 0xAB, 0xCD]),
            other => panic!("expected binary frame, got {other:?}"),
        }

        uplink
            .send_all(vec![Bytes::from_static(&[1]), Bytes::from_static(&[0])])
            .await
            .unwrap();
        for expected in [&[1u8][..], &[0u8][..]] {
            match collector.next().await.unwrap().unwrap() {
                Message::Binary(bytes) => assert_eq!(bytes.as_ref(), expected),
                other => panic!("expected binary frame, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn control_and_ping_traffic_surfaces() {
        let (uplink, mut reader, mut collector) = pair_for_tests().await;

        let frame = control_frame(from_collector::RESTART_ACQUISITION, b"");
        collector.send(Message::Binary(frame.into())).await.unwrap();
        match reader.next().await.unwrap() {
            Inbound::Control(ControlMessage::RestartAcquisition) => {}
            other => panic!("expected restart, got {other:?}"),
        }

        collector.send(Message::Ping(Bytes::from_static(b"hb"))).await.unwrap();
        match reader.next().await.unwrap() {
            Inbound::Ping(payload) => assert_eq!(payload.as_ref(), b"hb"),
            other => panic!("expected ping, got {other:?}"),
        }

        uplink.send_pong(Bytes::from_static(b"hb")).await.unwrap();
        match collector.next().await.unwrap().unwrap() {
            Message::Pong(payload) => assert_eq!(payload.as_ref(), b"hb"),
            other => panic!("expected pong, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn collector_close_surfaces_as_closed() {
        let (_uplink, mut reader, mut collector) = pair_for_tests().await;
        collector.close(None).await.unwrap();
        assert!(matches!(reader.next().await.unwrap(), Inbound::Closed));
    }

    #[tokio::test]
    async fn text_frames_are_a_protocol_violation() {
        let (_uplink, mut reader, mut collector) = pair_for_tests().await;
        collector.send(Message::Text("hello".into())).await.unwrap();
        assert!(matches!(reader.next().await, Err(LinkError::Protocol { .. })));
    }
}

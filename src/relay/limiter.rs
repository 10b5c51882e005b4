//! Per-key coalescing of state snapshot frames.
//!
//! Autoprobe and interface snapshots describe current state, so only
//! the newest one per key matters. Each key gets a slot: the first
//! submit in a cycle arms a timer, later submits just replace the
//! pending frame, and when the timer fires the newest frame goes out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::uplink::Uplink;

/// Identity of one rate-limited snapshot source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum LimitKey {
    Autoprobe,
    InterfaceInformation(String),
    InterfaceState(String),
}

#[derive(Default)]
struct Slot {
    pending: Option<Bytes>,
    armed: bool,
}

pub(crate) struct CoalescingLimiters {
    cycle: Duration,
    slots: StdMutex<HashMap<LimitKey, Arc<StdMutex<Slot>>>>,
}

impl CoalescingLimiters {
    pub(crate) fn new(cycle: Duration) -> Self {
        Self { cycle, slots: StdMutex::new(HashMap::new()) }
    }

    /// Queues `frame` as the newest snapshot for `key`.
    ///
    /// At most one frame per key leaves per cycle; frames superseded
    /// before their cycle ends are never sent.
    pub(crate) fn submit(
        &self,
        key: LimitKey,
        frame: Bytes,
        uplink: &Arc<Uplink>,
        cancel: &CancellationToken,
        tasks: &mut JoinSet<()>,
    ) {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key).or_default())
        };
        {
            let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            guard.pending = Some(frame);
            if guard.armed {
                return;
            }
            guard.armed = true;
        }

        let uplink = Arc::clone(uplink);
        let cancel = cancel.clone();
        let cycle = self.cycle;
        tasks.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(cycle) => {}
            }
            let frame = {
                let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
                guard.armed = false;
                guard.pending.take()
            };
            if let Some(frame) = frame {
                if let Err(error) = uplink.send(frame).await {
                    warn!("Deferred snapshot send failed: {error}");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::uplink::test_support::pair_for_tests;
    use futures_util::StreamExt;
    use tokio::net::TcpStream;
    use tokio::time::{advance, timeout};
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::Message;

    async fn next_binary(collector: &mut WebSocketStream<TcpStream>) -> Vec<u8> {
        let message = timeout(Duration::from_secs(3), collector.next())
            .await
            .expect("frame within the window")
            .unwrap()
            .unwrap();
        match message {
            Message::Binary(bytes) => bytes.to_vec(),
            other => panic!("expected binary frame, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn a_cycle_sends_only_the_newest_snapshot() {
        let (uplink, _reader, mut collector) = pair_for_tests().await;
        let uplink = Arc::new(uplink);
        let limiters = CoalescingLimiters::new(Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        limiters.submit(LimitKey::Autoprobe, Bytes::from_static(&[3, 1]), &uplink, &cancel, &mut tasks);
        advance(Duration::from_millis(100)).await;
        limiters.submit(LimitKey::Autoprobe, Bytes::from_static(&[3, 2]), &uplink, &cancel, &mut tasks);
        advance(Duration::from_millis(100)).await;
        limiters.submit(LimitKey::Autoprobe, Bytes::from_static(&[3, 3]), &uplink, &cancel, &mut tasks);

        assert_eq!(next_binary(&mut collector).await, vec![3, 3]);
        // Superseded frames are gone, not queued behind the first.
        assert!(timeout(Duration::from_millis(1500), collector.next()).await.is_err());

        cancel.cancel();
        while tasks.join_next().await.is_some() {}
    }

    #[tokio::test(start_paused = true)]
    async fn a_new_cycle_starts_after_the_send() {
        let (uplink, _reader, mut collector) = pair_for_tests().await;
        let uplink = Arc::new(uplink);
        let limiters = CoalescingLimiters::new(Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        limiters.submit(LimitKey::Autoprobe, Bytes::from_static(&[3, 1]), &uplink, &cancel, &mut tasks);
        assert_eq!(next_binary(&mut collector).await, vec![3, 1]);

        limiters.submit(LimitKey::Autoprobe, Bytes::from_static(&[3, 2]), &uplink, &cancel, &mut tasks);
        assert_eq!(next_binary(&mut collector).await, vec![3, 2]);

        cancel.cancel();
        while tasks.join_next().await.is_some() {}
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_have_independent_slots() {
        let (uplink, _reader, mut collector) = pair_for_tests().await;
        let uplink = Arc::new(uplink);
        let limiters = CoalescingLimiters::new(Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        limiters.submit(LimitKey::Autoprobe, Bytes::from_static(&[3, 7]), &uplink, &cancel, &mut tasks);
        limiters.submit(
            LimitKey::InterfaceState("neph0".to_string()),
            Bytes::from_static(&[5, 7]),
            &uplink,
            &cancel,
            &mut tasks,
        );

        let mut frames = vec![next_binary(&mut collector).await, next_binary(&mut collector).await];
        frames.sort();
        assert_eq!(frames, vec![vec![3, 7], vec![5, 7]]);

        cancel.cancel();
        while tasks.join_next().await.is_some() {}
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_drops_pending_snapshots() {
        let (uplink, _reader, mut collector) = pair_for_tests().await;
        let uplink = Arc::new(uplink);
        let limiters = CoalescingLimiters::new(Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        limiters.submit(LimitKey::Autoprobe, Bytes::from_static(&[3, 1]), &uplink, &cancel, &mut tasks);
        cancel.cancel();
        while tasks.join_next().await.is_some() {}

        assert!(timeout(Duration::from_secs(2), collector.next()).await.is_err());
    }
}

//! Outbound queue toward the game chat hub.
//!
//! Producers enqueue without ever touching the network. A single drain
//! loop sends at most one message per tick while the hub is connected.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::common::error::HubResult;
use crate::common::{ConnectionState, OutboundGameMessage};

/// Default drain cadence.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_millis(350);

/// Where drained messages go.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    fn state(&self) -> ConnectionState;

    async fn deliver(&self, message: &OutboundGameMessage) -> HubResult<()>;
}

/// Producer handle. Cheap to clone.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<OutboundGameMessage>,
}

impl OutboundQueue {
    /// Append a message. Never blocks.
    pub fn enqueue(&self, message: OutboundGameMessage) {
        if self.tx.send(message).is_err() {
            warn!("Outbound drain loop is gone, dropping message");
        }
    }
}

/// Consumer side, run once per process.
pub struct OutboundDrain {
    rx: mpsc::UnboundedReceiver<OutboundGameMessage>,
    interval: Duration,
}

/// Create a connected queue/drain pair.
pub fn outbound_queue(interval: Duration) -> (OutboundQueue, OutboundDrain) {
    let (tx, rx) = mpsc::unbounded_channel();
    (OutboundQueue { tx }, OutboundDrain { rx, interval })
}

impl OutboundDrain {
    /// Drain until every producer handle is dropped.
    pub async fn run(mut self, sink: Arc<dyn OutboundSink>) {
        let idle = self.interval * 2;

        loop {
            if sink.state() != ConnectionState::Connected {
                sleep(idle).await;
                continue;
            }

            match self.rx.try_recv() {
                Ok(message) => {
                    drain_one(sink.as_ref(), message).await;
                    sleep(self.interval).await;
                }
                Err(TryRecvError::Empty) => sleep(idle).await,
                Err(TryRecvError::Disconnected) => break,
            }
        }

        info!("Outbound drain loop stopped");
    }
}

/// Send one message. Failures drop the message.
async fn drain_one(sink: &dyn OutboundSink, message: OutboundGameMessage) {
    match AssertUnwindSafe(sink.deliver(&message)).catch_unwind().await {
        Ok(Ok(())) => debug!(player = %message.player_name, "Delivered message to hub"),
        Ok(Err(e)) => error!(
            player = %message.player_name,
            "Dropping message after failed hub send: {}", e
        ),
        Err(_) => error!(
            player = %message.player_name,
            "Hub send panicked, dropping message"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    use crate::common::error::HubError;

    const TICK: Duration = Duration::from_millis(10);

    #[derive(Default)]
    struct FakeSink {
        connected: AtomicBool,
        delivered: Mutex<Vec<(String, Instant)>>,
    }

    #[async_trait]
    impl OutboundSink for FakeSink {
        fn state(&self) -> ConnectionState {
            if self.connected.load(Ordering::SeqCst) {
                ConnectionState::Connected
            } else {
                ConnectionState::Reconnecting
            }
        }

        async fn deliver(&self, message: &OutboundGameMessage) -> HubResult<()> {
            match message.text.as_str() {
                "fail" => Err(HubError::NotConnected),
                "panic" => panic!("sink exploded"),
                text => {
                    self.delivered
                        .lock()
                        .unwrap()
                        .push((text.to_string(), Instant::now()));
                    Ok(())
                }
            }
        }
    }

    fn message(text: &str) -> OutboundGameMessage {
        OutboundGameMessage {
            player_id: "1".to_string(),
            text: text.to_string(),
            player_name: "Bob".to_string(),
        }
    }

    fn delivered(sink: &FakeSink) -> Vec<String> {
        sink.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(text, _)| text.clone())
            .collect()
    }

    async fn wait_for_deliveries(sink: &FakeSink, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while sink.delivered.lock().unwrap().len() < count {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("deliveries did not arrive");
    }

    #[tokio::test]
    async fn test_fifo_drain_after_connect() {
        let sink = Arc::new(FakeSink::default());
        let (queue, drain) = outbound_queue(TICK);
        queue.enqueue(message("A"));
        queue.enqueue(message("B"));
        queue.enqueue(message("C"));

        tokio::spawn(drain.run(sink.clone()));
        sleep(TICK * 5).await;
        assert!(delivered(&sink).is_empty());

        sink.connected.store(true, Ordering::SeqCst);
        wait_for_deliveries(&sink, 3).await;

        assert_eq!(delivered(&sink), vec!["A", "B", "C"]);
        let times: Vec<Instant> = sink.delivered.lock().unwrap().iter().map(|(_, t)| *t).collect();
        // One message per tick.
        assert!(times.windows(2).all(|w| w[1] - w[0] >= TICK));
    }

    #[tokio::test]
    async fn test_failed_and_panicking_sends_are_dropped() {
        let sink = Arc::new(FakeSink::default());
        sink.connected.store(true, Ordering::SeqCst);
        let (queue, drain) = outbound_queue(TICK);

        let task = tokio::spawn(drain.run(sink.clone()));
        queue.enqueue(message("fail"));
        queue.enqueue(message("panic"));
        queue.enqueue(message("after"));

        wait_for_deliveries(&sink, 1).await;
        assert_eq!(delivered(&sink), vec!["after"]);
        assert!(!task.is_finished());
    }

    #[tokio::test]
    async fn test_drain_stops_when_producers_drop() {
        let sink = Arc::new(FakeSink::default());
        sink.connected.store(true, Ordering::SeqCst);
        let (queue, drain) = outbound_queue(TICK);
        drop(queue);

        tokio::time::timeout(Duration::from_secs(1), drain.run(sink))
            .await
            .expect("drain loop did not stop");
    }
}

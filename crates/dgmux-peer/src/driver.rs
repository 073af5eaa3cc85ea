//! Tokio driver for tick-based endpoints.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_core::Stream;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::Result;
use crate::event::MuxEvent;
use crate::node::MuxEndpoint;

/// Poll `endpoint` every `period` and forward its events to `events`.
///
/// Stops when `cancel` fires or the receiving side of `events` is dropped,
/// then shuts the endpoint down and hands it back. Events produced by the
/// shutdown itself are forwarded if the receiver is still alive.
pub async fn run_ticker<E: MuxEndpoint>(
    mut endpoint: E,
    period: Duration,
    events: mpsc::Sender<MuxEvent>,
    cancel: CancellationToken,
) -> Result<E> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(period_ms = period.as_millis() as u64, "ticker started");

    'ticks: loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                endpoint.poll_once()?;
                while let Some(event) = endpoint.next_event() {
                    if events.send(event).await.is_err() {
                        debug!("event receiver dropped, stopping ticker");
                        break 'ticks;
                    }
                }
            }
        }
    }

    endpoint.shutdown()?;
    while let Some(event) = endpoint.next_event() {
        if events.try_send(event).is_err() {
            break;
        }
    }
    info!("ticker stopped");
    Ok(endpoint)
}

/// [`Stream`] of events fed by [`run_ticker`].
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<MuxEvent>,
}

impl EventStream {
    pub fn new(rx: mpsc::Receiver<MuxEvent>) -> Self {
        Self { rx }
    }

    /// Channel pair sized for `capacity` undelivered events.
    pub fn channel(capacity: usize) -> (mpsc::Sender<MuxEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(rx))
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<MuxEvent> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = MuxEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Client, MuxConfig, Server};
    use dgmux_transport::MemoryNetwork;

    #[tokio::test]
    async fn test_ticker_forwards_events_and_shuts_down() {
        let net = MemoryNetwork::new();
        let server = Server::new(net.endpoint("host"), MuxConfig::default()).unwrap();
        let mut client = Client::new(net.endpoint("guest"), MuxConfig::default()).unwrap();
        client.connect("host", "guest-1").unwrap();

        let (tx, mut stream) = EventStream::channel(16);
        let cancel = CancellationToken::new();
        let ticker = tokio::spawn(run_ticker(
            server,
            Duration::from_millis(1),
            tx,
            cancel.clone(),
        ));

        let event = stream.recv().await.unwrap();
        assert!(matches!(event, MuxEvent::Connected { .. }));

        cancel.cancel();
        let server = ticker.await.unwrap().unwrap();
        assert!(server.is_shut_down());

        let event = stream.recv().await.unwrap();
        assert!(matches!(
            event,
            MuxEvent::Disconnected {
                reason: crate::DisconnectReason::Shutdown,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_stream_ends_when_sender_dropped() {
        let (tx, mut stream) = EventStream::channel(1);
        drop(tx);
        assert!(stream.recv().await.is_none());
    }
}

//! Replay-buffered relay between one upstream completion and its subscriber.
//!
//! The producer task drains the upstream delta sequence into an append-only
//! log. Subscribers replay the log from the start and then follow it live, so a
//! subscriber that attaches late still sees every event in order.
//!
//! The log accepts exactly one terminal event. Whatever reaches the log first,
//! natural completion, an upstream error or an abort, wins; later terminal
//! appends are rejected, which is what makes `abort` idempotent.

use futures::stream::{ self, BoxStream, StreamExt };
use log::{ debug, error, info };
use std::sync::Arc;
use tokio::sync::watch;

use crate::llm::chat::{ CancelHandle, CompletionStream };
use crate::models::stream::StreamEvent;

#[derive(Debug, Default)]
struct EventLog {
    events: Vec<StreamEvent>,
    closed: bool,
}

#[derive(Clone)]
pub struct StreamBridge {
    log: Arc<watch::Sender<EventLog>>,
    cancel: CancelHandle,
}

impl StreamBridge {
    /// Starts draining `completion` immediately, independent of any subscriber.
    pub fn spawn(completion: CompletionStream) -> Self {
        let CompletionStream { mut deltas, cancel } = completion;
        let bridge = Self::with_cancel(cancel.clone());
        let producer = bridge.clone();

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        producer.append(StreamEvent::Aborted);
                        break;
                    }
                    next = deltas.next() => next,
                };

                match next {
                    Some(Ok(delta)) => {
                        debug!("Received delta: {:?}", delta);
                        if !producer.append(StreamEvent::Delta(delta)) {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!("Upstream completion failed: {}", e);
                        producer.append(StreamEvent::Error(e.to_string()));
                        break;
                    }
                    None => {
                        producer.append(StreamEvent::Done);
                        break;
                    }
                }
            }
            debug!("Bridge producer finished after {} events", producer.len());
        });

        bridge
    }

    /// A bridge that never had an upstream and already holds its terminal event.
    pub fn closed_with(event: StreamEvent) -> Self {
        let bridge = Self::with_cancel(CancelHandle::new());
        bridge.append(event);
        bridge
    }

    fn with_cancel(cancel: CancelHandle) -> Self {
        let (tx, _) = watch::channel(EventLog::default());
        Self { log: Arc::new(tx), cancel }
    }

    /// Appends to the log unless it is already closed. Returns whether the
    /// event was accepted.
    fn append(&self, event: StreamEvent) -> bool {
        self.log.send_if_modified(move |log| {
            if log.closed {
                return false;
            }
            log.closed = event.is_terminal();
            log.events.push(event);
            true
        })
    }

    /// Closes the log with `Aborted` and releases the upstream call.
    ///
    /// Returns `false`, doing nothing, when the log already reached a terminal
    /// event.
    pub fn abort(&self) -> bool {
        if !self.append(StreamEvent::Aborted) {
            return false;
        }
        info!("Stream aborted, cancelling upstream completion");
        self.cancel.cancel();
        true
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.log.borrow().closed
    }

    pub fn terminal(&self) -> Option<StreamEvent> {
        let log = self.log.borrow();
        if log.closed { log.events.last().cloned() } else { None }
    }

    fn len(&self) -> usize {
        self.log.borrow().events.len()
    }

    #[cfg(test)]
    fn snapshot(&self) -> Vec<StreamEvent> {
        self.log.borrow().events.clone()
    }

    /// Waits until the log is closed and returns its terminal event.
    pub async fn wait_terminal(&self) -> StreamEvent {
        let mut rx = self.log.subscribe();
        let terminal = match rx.wait_for(|log| log.closed).await {
            Ok(log) => log.events.last().cloned(),
            Err(_) => None,
        };
        terminal.unwrap_or(StreamEvent::Aborted)
    }

    /// Replays every logged event in order, then follows live appends. The
    /// stream ends right after the terminal event.
    pub fn subscribe(&self) -> BoxStream<'static, StreamEvent> {
        let rx = self.log.subscribe();
        stream
            ::unfold((rx, 0usize, false), |(mut rx, cursor, finished)| async move {
                if finished {
                    return None;
                }
                loop {
                    let next = rx.borrow_and_update().events.get(cursor).cloned();
                    if let Some(event) = next {
                        let finished = event.is_terminal();
                        return Some((event, (rx, cursor + 1, finished)));
                    }
                    if rx.changed().await.is_err() {
                        return None;
                    }
                }
            })
            .boxed()
    }
}

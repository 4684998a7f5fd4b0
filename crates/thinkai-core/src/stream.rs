//! Streaming response channel between AI clients and the chat controller.
//!
//! A streaming client produces zero or more [`StreamEvent::Chunk`]s followed by
//! exactly one terminal event ([`StreamEvent::Done`] or [`StreamEvent::Error`]).
//! The controller is the single reader of the resulting [`ChatEventStream`].

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::state::{ChatSettings, Message};

pub const STREAM_CLOSED_MESSAGE: &str = "response stream closed before completion";

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk(String),
    Done,
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Chunk(_))
    }
}

/// What a streaming client needs to produce a reply
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub messages: Vec<Message>,
    pub settings: ChatSettings,
}

/// Producer half handed to streaming workers
#[derive(Debug, Clone)]
pub struct StreamSender {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl StreamSender {
    /// Returns false once the reader has gone away
    pub fn chunk(&self, text: impl Into<String>) -> bool {
        self.tx.send(StreamEvent::Chunk(text.into())).is_ok()
    }

    pub fn done(&self) -> bool {
        self.tx.send(StreamEvent::Done).is_ok()
    }

    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.tx.send(StreamEvent::Error(message.into())).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Reader half. Always ends with a terminal event, even if the producer
/// disappears without sending one.
#[derive(Debug)]
pub struct ChatEventStream {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    finished: bool,
}

impl ChatEventStream {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        let event = self.events.recv().await;
        self.settle(event)
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        match self.events.try_recv() {
            Ok(event) => self.settle(Some(event)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => self.settle(None),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn settle(&mut self, event: Option<StreamEvent>) -> Option<StreamEvent> {
        match event {
            Some(event) => {
                if event.is_terminal() {
                    self.finished = true;
                    self.events.close();
                }
                Some(event)
            }
            None => {
                self.finished = true;
                Some(StreamEvent::Error(STREAM_CLOSED_MESSAGE.to_string()))
            }
        }
    }
}

pub fn event_channel() -> (StreamSender, ChatEventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        StreamSender { tx },
        ChatEventStream {
            events: rx,
            finished: false,
        },
    )
}

/// A capability that turns a conversation into a stream of reply events.
///
/// Implementations must not block: network work belongs on a spawned task
/// that writes into the returned stream. Failures, including configuration
/// problems, are reported as [`StreamEvent::Error`] rather than returned.
pub trait ChatStreamer: Send + Sync {
    fn stream(&self, request: StreamRequest) -> ChatEventStream;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (tx, mut rx) = event_channel();
        tx.chunk("Hel");
        tx.chunk("lo");
        tx.done();

        assert_eq!(rx.recv().await, Some(StreamEvent::Chunk("Hel".into())));
        assert_eq!(rx.recv().await, Some(StreamEvent::Chunk("lo".into())));
        assert_eq!(rx.recv().await, Some(StreamEvent::Done));
        assert_eq!(rx.recv().await, None);
        assert!(rx.is_finished());
    }

    #[tokio::test]
    async fn test_nothing_after_terminal_event() {
        let (tx, mut rx) = event_channel();
        tx.fail("boom");
        assert_eq!(rx.recv().await, Some(StreamEvent::Error("boom".into())));
        assert!(!tx.chunk("late"));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_dropped_producer_yields_synthetic_error() {
        let (tx, mut rx) = event_channel();
        tx.chunk("partial");
        drop(tx);

        assert_eq!(rx.recv().await, Some(StreamEvent::Chunk("partial".into())));
        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Error(STREAM_CLOSED_MESSAGE.to_string()))
        );
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_try_recv_empty_then_ready() {
        let (tx, mut rx) = event_channel();
        assert_eq!(rx.try_recv(), None);
        assert!(!rx.is_finished());
        tx.done();
        assert_eq!(rx.try_recv(), Some(StreamEvent::Done));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_sender_notices_dropped_reader() {
        let (tx, rx) = event_channel();
        assert!(!tx.is_closed());
        drop(rx);
        assert!(tx.is_closed());
        assert!(!tx.chunk("nobody listening"));
    }
}

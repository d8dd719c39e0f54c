//! Fragment streaming from a blocking decode loop to an async consumer.
//!
//! The decode loop runs on a blocking thread and pushes with
//! [`FragmentSender::blocking_send`]; the consumer awaits
//! [`FragmentStream::next`]. The channel is bounded, so a slow consumer
//! stalls the producer between steps, never inside one.

use thiserror::Error;
use tokio::sync::mpsc;

use super::output::FinishReason;

/// One item on the fragment channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Fragment(String),
    Finished(FinishReason),
}

/// Async stream of generated fragments.
pub struct FragmentStream {
    receiver: mpsc::Receiver<StreamEvent>,
}

impl FragmentStream {
    /// Create a new fragment stream with sender/receiver pair.
    pub fn new(buffer_size: usize) -> (FragmentSender, Self) {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        (FragmentSender { sender }, Self { receiver })
    }

    /// Receive the next event, if available.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.receiver.recv().await
    }

    /// Collect all remaining text and the finish reason, if one was sent.
    pub async fn collect(mut self) -> (String, Option<FinishReason>) {
        let mut text = String::new();
        while let Some(event) = self.next().await {
            match event {
                StreamEvent::Fragment(fragment) => text.push_str(&fragment),
                StreamEvent::Finished(reason) => return (text, Some(reason)),
            }
        }
        (text, None)
    }
}

/// Sender half for pushing fragments to a stream.
#[derive(Clone)]
pub struct FragmentSender {
    sender: mpsc::Sender<StreamEvent>,
}

impl FragmentSender {
    /// Send from async code.
    pub async fn send(&self, event: StreamEvent) -> Result<(), StreamSendError> {
        self.sender.send(event).await.map_err(|_| StreamSendError::Closed)
    }

    /// Send from a blocking thread. Must not be called from inside an async task.
    pub fn blocking_send(&self, event: StreamEvent) -> Result<(), StreamSendError> {
        self.sender.blocking_send(event).map_err(|_| StreamSendError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Close the stream by dropping the sender.
    pub fn close(self) {
        drop(self.sender);
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamSendError {
    #[error("stream closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_stops_at_finish() {
        let (tx, stream) = FragmentStream::new(8);
        tx.send(StreamEvent::Fragment("Hel".into())).await.unwrap();
        tx.send(StreamEvent::Fragment("lo".into())).await.unwrap();
        tx.send(StreamEvent::Finished(FinishReason::Stop)).await.unwrap();
        let (text, reason) = stream.collect().await;
        assert_eq!(text, "Hello");
        assert_eq!(reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn test_collect_without_finish_on_close() {
        let (tx, stream) = FragmentStream::new(2);
        tx.send(StreamEvent::Fragment("x".into())).await.unwrap();
        tx.close();
        assert_eq!(stream.collect().await, ("x".to_string(), None));
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped_fails() {
        let (tx, stream) = FragmentStream::new(1);
        drop(stream);
        assert!(tx.is_closed());
        let err = tx.send(StreamEvent::Fragment("late".into())).await.unwrap_err();
        assert_eq!(err, StreamSendError::Closed);
    }

    #[tokio::test]
    async fn test_blocking_send_from_worker_thread() {
        let (tx, stream) = FragmentStream::new(4);
        let worker = std::thread::spawn(move || {
            tx.blocking_send(StreamEvent::Fragment("a".into())).unwrap();
            tx.blocking_send(StreamEvent::Finished(FinishReason::MaxTokens)).unwrap();
        });
        let (text, reason) = stream.collect().await;
        worker.join().unwrap();
        assert_eq!(text, "a");
        assert_eq!(reason, Some(FinishReason::MaxTokens));
    }
}

//! Streaming event broker.
//!
//! Multiplexes typed events from many producers (agents and engines within
//! one request) to the single SSE consumer. Bounded but large; producers
//! await under backpressure. `close()` delivers the terminal sentinel exactly
//! once; after the sentinel the consumer sees end-of-stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

const BROKER_CAPACITY: usize = 1024;

/// SSE event types delivered to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Status,
    FinalChunk,
    QueryResultDeviceChunk,
    ChainCategoryChunk,
    TurnComplete,
    Error,
}

/// One typed event on the stream.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

impl Event {
    pub fn status(agent: &str, content: &str) -> Self {
        Self {
            kind: EventKind::Status,
            data: json!({
                "agent": agent,
                "content": content,
                "timestamp": now_iso(),
            }),
        }
    }

    pub fn final_chunk(agent: &str, delta: &str) -> Self {
        Self {
            kind: EventKind::FinalChunk,
            data: json!({
                "agent": agent,
                "content": delta,
                "timestamp": now_iso(),
            }),
        }
    }

    pub fn device_chunk(
        kind: EventKind,
        agent: &str,
        devices: &[Value],
        chunk_number: usize,
        total_devices: usize,
        is_final_chunk: bool,
    ) -> Self {
        Self {
            kind,
            data: json!({
                "agent": agent,
                "devices": devices,
                "chunk_info": {
                    "chunk_number": chunk_number,
                    "chunk_size": devices.len(),
                    "total_devices": total_devices,
                    "is_final_chunk": is_final_chunk,
                },
                "timestamp": now_iso(),
            }),
        }
    }

    pub fn turn_complete(turn_index: usize, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            kind: EventKind::TurnComplete,
            data: json!({
                "turn_index": turn_index,
                "token_usage": {
                    "input_tokens": input_tokens,
                    "output_tokens": output_tokens,
                },
                "timestamp": now_iso(),
            }),
        }
    }

    pub fn error(message: &str, traceback: Option<&str>) -> Self {
        let mut data = json!({
            "error": message,
            "timestamp": now_iso(),
        });
        if let Some(trace) = traceback {
            data["traceback"] = json!(trace);
        }
        Self {
            kind: EventKind::Error,
            data,
        }
    }
}

enum StreamItem {
    Event(Box<Event>),
    Eof,
}

/// Producer handle. Cheap to clone; every non-consumer reference is a producer.
#[derive(Clone)]
pub struct StreamingBroker {
    tx: mpsc::Sender<StreamItem>,
    closed: Arc<AtomicBool>,
}

/// Consumer side, held by the SSE writer.
pub struct EventStream {
    rx: mpsc::Receiver<StreamItem>,
    done: bool,
}

impl StreamingBroker {
    pub fn channel() -> (Self, EventStream) {
        let (tx, rx) = mpsc::channel(BROKER_CAPACITY);
        (
            Self {
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            EventStream { rx, done: false },
        )
    }

    /// Enqueue an event. Returns an error once the consumer has gone away;
    /// producers should stop work promptly when that happens.
    pub async fn put(&self, event: Event) -> anyhow::Result<()> {
        self.tx
            .send(StreamItem::Event(Box::new(event)))
            .await
            .map_err(|_| anyhow::anyhow!("broker closed: consumer disconnected"))
    }

    /// Send the terminal sentinel. Idempotent.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(StreamItem::Eof).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl EventStream {
    /// Yield the next event, or `None` once the sentinel has been consumed.
    /// Never blocks after the sentinel.
    pub async fn next(&mut self) -> Option<Event> {
        if self.done {
            return None;
        }
        match self.rx.recv().await {
            Some(StreamItem::Event(event)) => Some(*event),
            Some(StreamItem::Eof) | None => {
                self.done = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_delivered_in_order_until_close() {
        let (broker, mut stream) = StreamingBroker::channel();

        broker.put(Event::status("a", "one")).await.unwrap();
        broker.put(Event::status("a", "two")).await.unwrap();
        broker.put(Event::final_chunk("out", "hi")).await.unwrap();
        broker.close().await;

        let mut received = Vec::new();
        while let Some(event) = stream.next().await {
            received.push(event);
        }
        // Event count delivered equals event count put before close.
        assert_eq!(received.len(), 3);
        assert_eq!(received[0].data["content"], "one");
        assert_eq!(received[1].data["content"], "two");
        assert_eq!(received[2].kind, EventKind::FinalChunk);

        // After the sentinel the consumer must not block.
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (broker, mut stream) = StreamingBroker::channel();
        broker.put(Event::status("a", "x")).await.unwrap();
        broker.close().await;
        broker.close().await;
        broker.close().await;

        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_put_fails_after_consumer_drop() {
        let (broker, stream) = StreamingBroker::channel();
        drop(stream);
        let result = broker.put(Event::status("a", "x")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_multi_producer_fifo_per_producer() {
        let (broker, mut stream) = StreamingBroker::channel();

        let b1 = broker.clone();
        let t1 = tokio::spawn(async move {
            for i in 0..10 {
                b1.put(Event::status("p1", &format!("{i}"))).await.unwrap();
            }
        });
        let b2 = broker.clone();
        let t2 = tokio::spawn(async move {
            for i in 0..10 {
                b2.put(Event::status("p2", &format!("{i}"))).await.unwrap();
            }
        });
        t1.await.unwrap();
        t2.await.unwrap();
        broker.close().await;

        let mut p1_seen = Vec::new();
        let mut p2_seen = Vec::new();
        while let Some(event) = stream.next().await {
            let agent = event.data["agent"].as_str().unwrap().to_string();
            let content: usize = event.data["content"].as_str().unwrap().parse().unwrap();
            if agent == "p1" {
                p1_seen.push(content);
            } else {
                p2_seen.push(content);
            }
        }
        // Program order within each producer.
        assert_eq!(p1_seen, (0..10).collect::<Vec<_>>());
        assert_eq!(p2_seen, (0..10).collect::<Vec<_>>());
    }
}

use bytes::Bytes;
use serde_json::value::RawValue;
use serde_json::Deserializer;

/// A persisted build log, classified before any of it is replayed.
#[derive(Debug)]
pub enum Backlog {
    /// Every stored value decoded cleanly, in append order.
    Structured(Vec<Box<RawValue>>),
    /// Bytes that are not a clean sequence of JSON values (pre-structured logs).
    Legacy(Bytes),
}

impl Backlog {
    /// Decode the whole log up front. Any error short of a clean end of input
    /// classifies the entire log as legacy, so a viewer never gets a mix of
    /// structured messages and legacy frames.
    pub fn decode(log: Bytes) -> Self {
        let mut messages = Vec::new();
        for value in Deserializer::from_slice(&log).into_iter::<Box<RawValue>>() {
            match value {
                Ok(msg) => messages.push(msg),
                Err(_) => return Backlog::Legacy(log),
            }
        }
        Backlog::Structured(messages)
    }
}

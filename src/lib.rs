// src/lib.rs
pub mod build_id;
pub mod cli;
pub mod fanout;
pub mod native;
pub mod registry;
pub mod sink;
pub mod store;

pub use build_id::BuildId;
pub use fanout::{FanoutConfig, FanoutError, LogFanout};
pub use native::build_router;
pub use registry::FanoutRegistry;
pub use sink::{Sink, SinkError, WebSocketSink};
pub use store::{FileLogStore, LogStore, MemoryLogStore, StoreError};

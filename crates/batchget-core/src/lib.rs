//! Concurrency core of the batchget download manager: per-job worker pools,
//! a shared bandwidth cap, and a journal that batches progress into one store
//! write per job per tick.

pub mod config;
pub mod cycle;
pub mod engine;
pub mod events;
pub mod journal;
pub mod logging;
pub mod manager;
pub mod model;
pub mod naming;
pub mod queue;
pub mod rate_limit;
pub mod retry;
pub mod store;
pub mod transfer;

pub use config::BatchgetConfig;
pub use events::{UiEvent, UiSink};
pub use manager::{JobManager, OpResult};
pub use store::{MemoryStore, SqliteStore, Store};
pub use transfer::CurlTransfer;

//! Offline asset cache.
//!
//! Generation-scoped request/response store with an install / activate /
//! fetch lifecycle. Storage and network are traits so the worker can run
//! against memory and fakes in tests and against disk and HTTP in the CLI.

mod network;
mod storage;
mod types;
mod worker;

pub use network::{HttpNetwork, Network};
pub use storage::{CacheEntry, CacheStorage, FsStorage, MemoryStorage};
pub use types::{Method, Request, RequestMode, Response, ResponseType};
pub use worker::{
    AssetWorker, ClientId, ClientRegistry, FetchOutcome, ServedFrom, WorkerState,
};

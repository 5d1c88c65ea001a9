//! 🧵 Workers: the ones who actually do the work while the coordinator takes all the
//! credit in the sprint retro.
//!
//! 🚀 Every worker is the same worker: pull `(index, object)` off the shared queue, run it
//! through the pipeline, push `(index, result)` back. Repeat until the queue is empty or
//! somebody pulls the fire alarm. 🦆

use anyhow::Result;
use tokio::task::JoinHandle;

mod ingest_worker;
pub(crate) use ingest_worker::IngestWorker;

/// 🏗️ A background worker, that does work. duh.
///
/// "What's the DEAL with lifetime annotations? You borrow something,
///  you give it back. It's not that hard, Jerry!" (Seinfeld, on Rust)
pub(crate) trait Worker {
    /// 🚀 Start the worker. Returns a JoinHandle because we trust
    /// but verify. Mostly verify.
    fn start(self) -> JoinHandle<Result<()>>;
}

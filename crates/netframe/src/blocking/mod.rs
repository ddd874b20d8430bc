//! Classic thread-per-connection model: every socket is owned by exactly one
//! OS thread, all reads and writes block that thread until they complete.

mod client;
mod pool;
mod server;
mod worker;

pub use client::BlockingClient;
pub use server::ThreadPoolServer;
pub use worker::{BlockingWorker, HalfClose};

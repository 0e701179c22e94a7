//! reqlens server library entry.
//!
//! Wires the request instrumentation middleware, the data-plane listener
//! with graceful shutdown, and the administrative listener (metrics export,
//! liveness, profiling) into one process. Consumed by the binary
//! (`main.rs`) and by integration tests.

pub mod admin;
pub mod app_state;
pub mod config;
pub mod middleware;
pub mod obs;
pub mod ops;
pub mod router;
pub mod server;
pub mod shutdown;

//! reqlens core: the metric registry and the error surface shared by the
//! server crate and its tests.
//!
//! This crate carries no transport or runtime dependencies. Everything HTTP
//! specific (label vocabularies, middleware, listeners) lives in
//! `reqlens-server`; this crate only knows about instruments, label sets and
//! the text export consumed by pull-based collectors.
//!
//! # Panic policy
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! Recording paths run inside request handling, so every fallible path must
//! surface as `ReqlensError`/`Result` instead of unwinding.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod metrics;

/// Shared result type.
pub use error::{ErrorCode, ReqlensError, Result};

//! Top-level facade crate for reqlens.
//!
//! Re-exports the core registry and the server library so users can depend on a single crate.

pub mod core {
    pub use reqlens_core::*;
}

pub mod server {
    pub use reqlens_server::*;
}

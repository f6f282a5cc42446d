//! Request handler module
//!
//! Dispatches requests to health probes or the pull-through handler.

pub mod router;

// Re-export main entry point
pub use router::handle_request;

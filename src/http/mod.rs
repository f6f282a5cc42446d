//! HTTP protocol layer module
//!
//! Response builders and content sniffing, decoupled from the pull-through
//! pipeline.

pub mod mime;
pub mod response;

// Re-export commonly used items
pub use mime::sniff_content_type;
pub use response::{
    build_405_response, build_artifact_response, build_health_response, build_options_response,
    build_text_response,
};

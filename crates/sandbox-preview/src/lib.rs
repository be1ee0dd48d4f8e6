//! Preview registry for the sandbox session runtime.
//!
//! Provides `PreviewRegistry`: the forwarding HTTP listener for the
//! sandboxed app and the set of peers subscribed to reload notifications.

pub mod registry;

pub use registry::{PreviewError, PreviewRegistry};

//! Value types shared across the subscription layer.
//!
//! ## Organization
//!
//! - [`state`]: Connection state machine values and the observable status
//! - [`topic`]: Topic declarations and their cache-write discipline
//! - [`envelope`]: Decoded server pushes and event bus notifications
//!
//! All types are re-exported at the module root.

pub mod envelope;
pub mod state;
pub mod topic;

pub use envelope::*;
pub use state::*;
pub use topic::*;

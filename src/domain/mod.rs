//! Domain layer types and invariants.

pub mod entry;
pub mod etag;
pub mod media;

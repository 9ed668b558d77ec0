//! Cache access protocol: routing, negotiation, conditional evaluation and
//! the handlers that sequence them around store calls.

pub mod coordinator;
pub mod error;
pub mod exchange;
pub mod metadata;
pub mod negotiation;
pub mod preconditions;
pub mod privileged;
pub mod resource;
pub mod router;
pub mod store;

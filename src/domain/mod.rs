//! Domain layer: negotiated parameters, the failure taxonomy, verified peer
//! identity and the shared credential store. No wire or socket knowledge.

pub mod credential;
pub mod errors;
pub mod identity;
pub mod params;

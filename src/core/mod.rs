//! Concrete crypto infrastructure. No protocol-flow knowledge lives here;
//! the state machines in `application` drive these primitives.

pub mod crypto;

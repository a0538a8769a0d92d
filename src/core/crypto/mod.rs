pub mod challenge;
pub mod delegation;
pub mod dh;
pub mod session;
pub mod x509;

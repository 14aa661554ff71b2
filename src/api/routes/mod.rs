//! API route modules.

pub mod inspector;
pub mod presence;
pub mod session;

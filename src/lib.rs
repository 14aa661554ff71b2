//! Remi core: real-time audio uplink and meeting-presence detection.
//!
//! Two cooperating subsystems:
//! - [`uplink`] streams live audio chunks to the transcription backend
//!   over a persistent WebSocket, with lazy reconnection and drop-oldest
//!   backpressure while the connection is down.
//! - [`presence`] polls the native process-inspection helper (via
//!   [`inspector`]) and fuses noisy window/process/tab evidence into a
//!   stable in-meeting boolean with change-only notifications.
//!
//! [`session`] ties them to the capture sources in [`audio`]; [`api`]
//! exposes a local control surface.

pub mod api;
pub mod app;
pub mod audio;
pub mod config;
pub mod global;
pub mod inspector;
pub mod presence;
pub mod session;
pub mod uplink;

// src/lib.rs
//
// OTA firmware update coordinator. Devices ping to report liveness and poll
// for a pending update; operators arm updates by uploading an image or
// linking a remote one.

pub mod artifact;
pub mod config;
pub mod error;
pub mod handlers;
pub mod liveness;
pub mod registry;
pub mod server;
pub mod slots;
pub mod state;
pub mod types;

//! Actiongate - ask whether an action would be authorized before invoking it.
//!
//! The library exposes the probe engine, the KDL policy loader and the HTTP
//! surface used by the `actiongate` binary.

pub mod links;
pub mod probe;
pub mod settings;

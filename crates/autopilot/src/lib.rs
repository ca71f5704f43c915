//! Autopilot service: configuration, component wiring and the HTTP
//! control surface. The binary in `main.rs` is a thin shell over this.

pub mod api;
pub mod app;
pub mod config;

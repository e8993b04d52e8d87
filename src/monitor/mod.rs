//! Multi-camera monitor
//!
//! Glue between discovery, feeds and settings.

pub mod coordinator;

pub use coordinator::MonitorCoordinator;

//! # Datawatch Library
//!
//! Core functionality for the datawatch data-quality automation service:
//! the automation core (schedule manager, orchestrator, task executors),
//! metadata and validation subsystems, persistence gateway, and the HTTP
//! surface.

pub mod auth;
pub mod automation;
pub mod config;
pub mod connectors;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod history;
pub mod metadata;
pub mod models;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub mod validations;
pub use migration;

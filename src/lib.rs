//! Veilshell - privacy-hardening core for an anonymous browsing shell.
//!
//! Supervises a Tor circuit, compiles per-persona fingerprint guard
//! directives, routes traffic through the active SOCKS endpoint,
//! persists sessions, and coordinates emergency teardown.

pub mod cli;
pub mod config;
pub mod events;
pub mod guards;
pub mod models;
pub mod panic;
pub mod personas;
pub mod proxy;
pub mod repository;
pub mod schema;
pub mod tor;

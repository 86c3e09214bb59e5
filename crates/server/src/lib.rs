#![allow(clippy::collapsible_if)]
pub mod config;
pub mod error;
pub mod observer;
pub mod routes;
pub mod state;

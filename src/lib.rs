#![forbid(unsafe_code)]

//! Consumer for staged, server-pushed document generation streams.
//!
//! A [`SessionController`](session::controller::SessionController) opens one
//! push channel per attempt, applies every event to an in-memory section
//! model, watches for silence, and exposes a read-only progress view.

pub mod config;
pub mod errors;
pub mod models;
pub mod session;
pub mod stream;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};

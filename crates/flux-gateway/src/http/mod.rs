//! Administrative HTTP API.

pub mod auth;
pub mod error;
pub mod health;
pub mod scripts;
pub mod secrets;

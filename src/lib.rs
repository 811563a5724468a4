//! EPS device dashboard backend.
//!
//! Users sign up and log in, claim devices an administrator registered,
//! and share or hand over those devices to other users. Shares and
//! transfers are consent-based: the recipient gets a notification and the
//! device only changes once they accept. All state lives in one JSON
//! document ([`store::Store`]) served over an axum HTTP API ([`gateway`]).

pub mod auth;
pub mod config;
pub mod devices;
pub mod error;
pub mod gateway;
pub mod sharing;
pub mod store;

pub use config::Config;
pub use error::{DashboardError, DashboardResult, ErrorKind};

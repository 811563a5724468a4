//! User identity for the dashboard.
//!
//! Provides:
//! - Signup / login against the JSON store
//! - Profile lookup and partial profile updates
//! - A user directory for share/transfer pickers
//! - Admin roster operations (delete with device cascade, role change)
//!
//! Identity is carried by the client-supplied email; there are no sessions
//! and passwords are compared verbatim.

pub mod store;

pub use store::{AuthStore, DirectoryEntry, ProfileUpdate, UserProfile};

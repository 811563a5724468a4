//! Device registry and per-device access control.

pub mod access;
pub mod registry;

pub use access::AccessLevel;
pub use registry::{AdminData, DeviceRegistry, Removal, VisibleDevice};

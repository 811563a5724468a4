//! Share and ownership-transfer requests that need recipient consent.

pub mod workflow;

pub use workflow::SharingWorkflow;

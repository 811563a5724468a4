//! Per-device authorization.
//!
//! Every decision is a pure function of the device record and the actor's
//! email. Admin status only matters for whole-device deletion; it never
//! grants view, rename or share rights on someone else's device.

use crate::store::{Device, Permission};
use serde::{Deserialize, Serialize};

/// Effective access level of a viewer on a device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Owner,
    Manage,
    View,
}

impl From<Permission> for AccessLevel {
    fn from(p: Permission) -> Self {
        match p {
            Permission::View => Self::View,
            Permission::Manage => Self::Manage,
        }
    }
}

/// `None` means the device is invisible to `email`.
pub fn effective_permission(device: &Device, email: &str) -> Option<AccessLevel> {
    if device.is_owned_by(email) {
        return Some(AccessLevel::Owner);
    }
    device.grant_for(email).map(|g| g.permission.into())
}

pub fn can_share(device: &Device, email: &str) -> bool {
    device.is_owned_by(email)
}

pub fn can_transfer(device: &Device, email: &str) -> bool {
    device.is_owned_by(email)
}

pub fn can_manage(device: &Device, email: &str) -> bool {
    matches!(
        effective_permission(device, email),
        Some(AccessLevel::Owner | AccessLevel::Manage)
    )
}

pub fn can_delete_entirely(device: &Device, email: &str, is_admin: bool) -> bool {
    is_admin || device.is_owned_by(email)
}

pub fn can_revoke_own_access(device: &Device, email: &str) -> bool {
    !device.is_owned_by(email) && device.grant_for(email).is_some()
}

//! Store-backed user accounts.

use crate::error::{require_field, DashboardError, DashboardResult};
use crate::store::{Role, Store, User};
use serde::Serialize;
use std::sync::Arc;

/// A user without the password.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserProfile {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub organization: String,
}

impl From<&User> for UserProfile {
    fn from(u: &User) -> Self {
        Self {
            name: u.name.clone(),
            email: u.email.clone(),
            role: u.role,
            organization: u.organization.clone(),
        }
    }
}

/// Entry of the share/transfer picker.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub email: String,
    pub name: String,
    pub organization: String,
}

/// Partial profile update. Empty name/password are ignored; an organization
/// is applied whenever present, so `Some("")` clears it.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub password: Option<String>,
    pub organization: Option<String>,
}

pub struct AuthStore {
    store: Arc<Store>,
    root_admin: String,
}

impl AuthStore {
    pub fn new(store: Arc<Store>, root_admin: impl Into<String>) -> Self {
        Self {
            store,
            root_admin: root_admin.into(),
        }
    }

    pub fn root_admin(&self) -> &str {
        &self.root_admin
    }

    // ── Accounts ────────────────────────────────────────────────────

    /// Register a new `user`-role account.
    pub fn signup(
        &self,
        name: &str,
        email: &str,
        password: &str,
        organization: Option<&str>,
    ) -> DashboardResult<()> {
        require_field("name", name)?;
        require_field("email", email)?;
        require_field("password", password)?;

        self.store.mutate(|db| {
            if db.has_user(email) {
                return Err(DashboardError::DuplicateEmail(email.to_string()));
            }
            db.users.push(User {
                email: email.to_string(),
                password: password.to_string(),
                name: name.to_string(),
                role: Role::User,
                organization: organization.unwrap_or_default().to_string(),
            });
            Ok(())
        })?;

        tracing::info!(email = %email, "User signed up");
        Ok(())
    }

    /// Verbatim credential check. Unknown email and wrong password fail the
    /// same way.
    pub fn login(&self, email: &str, password: &str) -> DashboardResult<UserProfile> {
        self.store.read(|db| {
            db.users
                .iter()
                .find(|u| u.email == email && u.password == password)
                .map(UserProfile::from)
                .ok_or(DashboardError::InvalidCredentials)
        })
    }

    pub fn get_user(&self, email: &str) -> DashboardResult<UserProfile> {
        self.store.read(|db| {
            db.user(email)
                .map(UserProfile::from)
                .ok_or_else(|| DashboardError::UserNotFound(email.to_string()))
        })
    }

    pub fn update_profile(&self, email: &str, update: ProfileUpdate) -> DashboardResult<()> {
        self.store.mutate(|db| {
            let user = db
                .user_mut(email)
                .ok_or_else(|| DashboardError::UserNotFound(email.to_string()))?;
            if let Some(name) = update.name.filter(|n| !n.is_empty()) {
                user.name = name;
            }
            if let Some(password) = update.password.filter(|p| !p.is_empty()) {
                user.password = password;
            }
            if let Some(org) = update.organization {
                user.organization = org;
            }
            Ok(())
        })?;
        tracing::info!(email = %email, "Profile updated");
        Ok(())
    }

    /// Every user except `exclude`.
    pub fn directory(&self, exclude: Option<&str>) -> Vec<DirectoryEntry> {
        self.store.read(|db| {
            db.users
                .iter()
                .filter(|u| Some(u.email.as_str()) != exclude)
                .map(|u| DirectoryEntry {
                    email: u.email.clone(),
                    name: u.name.clone(),
                    organization: u.organization.clone(),
                })
                .collect()
        })
    }

    pub fn user_count(&self) -> usize {
        self.store.read(|db| db.users.len())
    }

    // ── Admin roster ────────────────────────────────────────────────

    /// Delete a user and every device they own. Grants the user holds on
    /// other devices stay in place.
    pub fn admin_delete_user(&self, email: &str) -> DashboardResult<usize> {
        if email == self.root_admin {
            return Err(DashboardError::Forbidden("Cannot delete Root Admin.".into()));
        }
        let removed_devices = self.store.mutate(|db| {
            let before = db.users.len();
            db.users.retain(|u| u.email != email);
            if db.users.len() == before {
                return Err(DashboardError::UserNotFound(email.to_string()));
            }
            let devices_before = db.devices.len();
            db.devices.retain(|d| !d.is_owned_by(email));
            Ok(devices_before - db.devices.len())
        })?;
        tracing::info!(email = %email, removed_devices, "User deleted");
        Ok(removed_devices)
    }

    pub fn admin_set_role(&self, email: &str, role: &str) -> DashboardResult<Role> {
        if email == self.root_admin {
            return Err(DashboardError::Forbidden(
                "Cannot change Root Admin role.".into(),
            ));
        }
        let role = Role::parse(role)
            .ok_or_else(|| DashboardError::InvalidInput(format!("unknown role: {role}")))?;
        self.store.mutate(|db| {
            let user = db
                .user_mut(email)
                .ok_or_else(|| DashboardError::UserNotFound(email.to_string()))?;
            user.role = role;
            Ok(())
        })?;
        tracing::info!(email = %email, role = role.as_str(), "User role updated");
        Ok(role)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

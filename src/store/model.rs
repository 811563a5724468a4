use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Email of the seeded root administrator.
pub const DEFAULT_ROOT_ADMIN: &str = "admin@eps.com";

// ── Users ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }

    /// Parse a role name, `None` for anything but `admin` / `user`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "user" => Some(Self::User),
            _ => None,
        }
    }
}

/// A registered account. The password is stored and compared verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub organization: String,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// ── Devices ─────────────────────────────────────────────────────

/// Access level carried by a share grant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    View,
    Manage,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Manage => "manage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "view" => Some(Self::View),
            "manage" => Some(Self::Manage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShareGrant {
    pub email: String,
    pub permission: Permission,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    /// `None` while the device is registered but not yet assigned.
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub shared_with: Vec<ShareGrant>,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>, owner: Option<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            owner,
            shared_with: Vec::new(),
        }
    }

    pub fn is_owned_by(&self, email: &str) -> bool {
        self.owner.as_deref() == Some(email)
    }

    pub fn grant_for(&self, email: &str) -> Option<&ShareGrant> {
        self.shared_with.iter().find(|g| g.email == email)
    }

    /// Insert a grant or update its permission in place.
    pub fn upsert_grant(&mut self, email: &str, permission: Permission) {
        match self.shared_with.iter_mut().find(|g| g.email == email) {
            Some(existing) => existing.permission = permission,
            None => self.shared_with.push(ShareGrant {
                email: email.to_string(),
                permission,
            }),
        }
    }

    /// Remove the grant for `email`, returning whether one existed.
    pub fn remove_grant(&mut self, email: &str) -> bool {
        let before = self.shared_with.len();
        self.shared_with.retain(|g| g.email != email);
        self.shared_with.len() != before
    }

    /// Hand the device to `new_owner`, dropping any grant held by either
    /// the outgoing or the incoming owner.
    pub fn reassign(&mut self, new_owner: &str) {
        if let Some(old) = self.owner.take() {
            self.remove_grant(&old);
        }
        self.remove_grant(new_owner);
        self.owner = Some(new_owner.to_string());
    }
}

// ── Notifications ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Share,
    Transfer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub from_email: String,
    pub to_email: String,
    pub device_id: String,
    /// Device name at the time the request was made.
    pub device_name: String,
    #[serde(default)]
    pub permission: Option<Permission>,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub responded_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn is_pending(&self) -> bool {
        self.status == NotificationStatus::Pending
    }
}

// ── Document ────────────────────────────────────────────────────

/// The whole persisted state, loaded and saved as one JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Database {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
}

impl Database {
    /// Document used when no readable store file exists.
    pub fn seed() -> Self {
        Self {
            users: vec![User {
                email: DEFAULT_ROOT_ADMIN.to_string(),
                password: "admin123".to_string(),
                name: "System Admin".to_string(),
                role: Role::Admin,
                organization: "EPS HQ".to_string(),
            }],
            devices: vec![Device::new(
                "3175602",
                "Main System",
                Some(DEFAULT_ROOT_ADMIN.to_string()),
            )],
            notifications: Vec::new(),
        }
    }

    pub fn user(&self, email: &str) -> Option<&User> {
        self.users.iter().find(|u| u.email == email)
    }

    pub fn user_mut(&mut self, email: &str) -> Option<&mut User> {
        self.users.iter_mut().find(|u| u.email == email)
    }

    pub fn has_user(&self, email: &str) -> bool {
        self.user(email).is_some()
    }

    pub fn is_admin(&self, email: &str) -> bool {
        self.user(email).is_some_and(User::is_admin)
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn device_mut(&mut self, id: &str) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.id == id)
    }

    pub fn notification_mut(&mut self, id: &str) -> Option<&mut Notification> {
        self.notifications.iter_mut().find(|n| n.id == id)
    }

    /// Next notification id: `now_ms`, bumped past the largest existing id so
    /// ids stay strictly increasing even when the clock stalls or steps back.
    pub fn next_notification_id(&self, now_ms: i64) -> String {
        let last = self
            .notifications
            .iter()
            .filter_map(|n| n.id.parse::<i64>().ok())
            .max();
        match last {
            Some(last) if last >= now_ms => match last.checked_add(1) {
                Some(next) => next.to_string(),
                // Only reachable with a hand-edited store.
                None => self.first_free_id(now_ms).to_string(),
            },
            _ => now_ms.to_string(),
        }
    }

    fn first_free_id(&self, from: i64) -> i64 {
        (from..)
            .find(|candidate| {
                let candidate = candidate.to_string();
                !self.notifications.iter().any(|n| n.id == candidate)
            })
            .unwrap_or(from)
    }
}

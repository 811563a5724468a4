use super::access::{self, AccessLevel};
use crate::auth::UserProfile;
use crate::error::{require_field, DashboardError, DashboardResult};
use crate::store::{Device, Permission, Role, ShareGrant, Store};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// A device as seen by one user, annotated with that user's access level.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VisibleDevice {
    pub id: String,
    pub name: String,
    pub owner: Option<String>,
    /// Only disclosed to the owner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_with: Option<Vec<ShareGrant>>,
    pub permission: AccessLevel,
    pub is_shared: bool,
}

/// What a delete request actually removed.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Removal {
    /// The device itself, with every grant on it.
    Device,
    /// Only the requester's own grant.
    Grant,
}

/// Unfiltered roster for the admin console.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminData {
    pub users: Vec<UserProfile>,
    pub devices: Vec<Device>,
    pub total_devices: usize,
    /// Non-admin accounts only.
    pub total_users: usize,
}

/// Device CRUD, direct sharing and the admin roster.
pub struct DeviceRegistry {
    store: Arc<Store>,
}

impl DeviceRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Devices owned by `email`, then devices shared with `email`.
    ///
    /// Admins get no special treatment here; the admin roster is a separate
    /// query ([`Self::admin_data`]).
    pub fn list_visible(&self, email: &str) -> Vec<VisibleDevice> {
        debug!(email = %email, "Listing visible devices");
        self.store.read(|db| {
            let owned = db
                .devices
                .iter()
                .filter(|d| d.is_owned_by(email))
                .map(|d| VisibleDevice {
                    id: d.id.clone(),
                    name: d.name.clone(),
                    owner: d.owner.clone(),
                    shared_with: Some(d.shared_with.clone()),
                    permission: AccessLevel::Owner,
                    is_shared: false,
                });
            let shared = db
                .devices
                .iter()
                .filter(|d| !d.is_owned_by(email))
                .filter_map(|d| {
                    d.grant_for(email).map(|g| VisibleDevice {
                        id: d.id.clone(),
                        name: d.name.clone(),
                        owner: d.owner.clone(),
                        shared_with: None,
                        permission: g.permission.into(),
                        is_shared: true,
                    })
                });
            owned.chain(shared).collect()
        })
    }

    /// Admin registration. Upserts: an existing id gets the new name/owner.
    pub fn register(&self, id: &str, name: &str, owner: Option<&str>) -> DashboardResult<Device> {
        require_field("id", id)?;
        require_field("name", name)?;
        let owner = owner.map(str::trim).filter(|o| !o.is_empty());

        let device = self.store.mutate(|db| {
            if let Some(owner) = owner {
                if !db.has_user(owner) {
                    return Err(DashboardError::UnknownUser(owner.to_string()));
                }
            }
            match db.device_mut(id) {
                Some(existing) => {
                    existing.name = name.to_string();
                    match owner {
                        Some(owner) => existing.reassign(owner),
                        None => existing.owner = None,
                    }
                    Ok(existing.clone())
                }
                None => {
                    let device = Device::new(id, name, owner.map(str::to_string));
                    db.devices.push(device.clone());
                    Ok(device)
                }
            }
        })?;

        info!(device_id = %id, owner = ?device.owner, "Device registered");
        Ok(device)
    }

    /// User-initiated "add device". Only registered, unassigned devices can
    /// be claimed; anything else goes through sharing or transfer.
    pub fn claim(&self, id: &str, name: &str, owner: &str) -> DashboardResult<Device> {
        require_field("id", id)?;
        require_field("owner", owner)?;

        let device = self.store.mutate(|db| {
            let device = db
                .device_mut(id)
                .ok_or_else(|| DashboardError::NotRegistered(id.to_string()))?;
            match device.owner.as_deref() {
                Some(current) if current == owner => {
                    Err(DashboardError::AlreadyOwned(id.to_string()))
                }
                Some(_) => Err(DashboardError::OwnedByOther(id.to_string())),
                None => {
                    if !name.trim().is_empty() {
                        device.name = name.to_string();
                    }
                    device.reassign(owner);
                    Ok(device.clone())
                }
            }
        })?;

        info!(device_id = %id, owner = %owner, "Device claimed");
        Ok(device)
    }

    /// Owner or admin: delete the device. Grantee: drop their own grant.
    pub fn delete(&self, id: &str, requester: &str) -> DashboardResult<Removal> {
        let removal = self.store.mutate(|db| {
            let is_admin = db.is_admin(requester);
            let device = db
                .device(id)
                .ok_or_else(|| DashboardError::DeviceNotFound(id.to_string()))?;

            if access::can_delete_entirely(device, requester, is_admin) {
                db.devices.retain(|d| d.id != id);
                return Ok(Removal::Device);
            }
            if access::can_revoke_own_access(device, requester) {
                if let Some(device) = db.device_mut(id) {
                    device.remove_grant(requester);
                }
                return Ok(Removal::Grant);
            }
            Err(DashboardError::Forbidden(format!(
                "{requester} has no access to device {id}"
            )))
        })?;

        info!(device_id = %id, requester = %requester, removed = ?removal, "Device delete handled");
        Ok(removal)
    }

    pub fn rename(&self, id: &str, requester: &str, new_name: &str) -> DashboardResult<()> {
        require_field("name", new_name)?;
        self.store.mutate(|db| {
            let device = db
                .device_mut(id)
                .ok_or_else(|| DashboardError::DeviceNotFound(id.to_string()))?;
            if !access::can_manage(device, requester) {
                return Err(DashboardError::Forbidden(format!(
                    "{requester} cannot rename device {id}"
                )));
            }
            device.name = new_name.to_string();
            Ok(())
        })?;
        info!(device_id = %id, requester = %requester, "Device renamed");
        Ok(())
    }

    /// Grant access immediately, without recipient consent.
    pub fn share_direct(
        &self,
        device_id: &str,
        owner: &str,
        target: &str,
        permission: Permission,
    ) -> DashboardResult<()> {
        self.store.mutate(|db| {
            let target_known = db.has_user(target);
            let device = db
                .device_mut(device_id)
                .ok_or_else(|| DashboardError::DeviceNotFound(device_id.to_string()))?;
            if !access::can_share(device, owner) {
                return Err(DashboardError::Forbidden(
                    "Only the owner can share this device".into(),
                ));
            }
            if target == owner {
                return Err(DashboardError::SelfShare);
            }
            if !target_known {
                return Err(DashboardError::UnknownUser(target.to_string()));
            }
            device.upsert_grant(target, permission);
            Ok(())
        })?;
        info!(
            device_id = %device_id,
            target = %target,
            permission = permission.as_str(),
            "Device shared directly"
        );
        Ok(())
    }

    /// Owner-initiated revocation; takes effect immediately.
    pub fn revoke_share(&self, device_id: &str, owner: &str, target: &str) -> DashboardResult<()> {
        self.store.mutate(|db| {
            let device = db
                .device_mut(device_id)
                .ok_or_else(|| DashboardError::DeviceNotFound(device_id.to_string()))?;
            if !access::can_share(device, owner) {
                return Err(DashboardError::Forbidden(
                    "Only the owner can revoke access".into(),
                ));
            }
            if !device.remove_grant(target) {
                return Err(DashboardError::GrantNotFound {
                    device_id: device_id.to_string(),
                    email: target.to_string(),
                });
            }
            Ok(())
        })?;
        info!(device_id = %device_id, target = %target, "Share revoked");
        Ok(())
    }

    /// Hand ownership over immediately, without recipient consent.
    pub fn transfer_direct(
        &self,
        device_id: &str,
        current_owner: &str,
        new_owner: &str,
    ) -> DashboardResult<()> {
        self.store.mutate(|db| {
            let target_known = db.has_user(new_owner);
            let device = db
                .device_mut(device_id)
                .ok_or_else(|| DashboardError::DeviceNotFound(device_id.to_string()))?;
            if !access::can_transfer(device, current_owner) {
                return Err(DashboardError::Forbidden(
                    "Only the owner can transfer this device".into(),
                ));
            }
            if new_owner == current_owner {
                return Err(DashboardError::SelfShare);
            }
            if !target_known {
                return Err(DashboardError::UnknownUser(new_owner.to_string()));
            }
            device.reassign(new_owner);
            Ok(())
        })?;
        info!(device_id = %device_id, from = %current_owner, to = %new_owner, "Device transferred directly");
        Ok(())
    }

    pub fn admin_data(&self) -> AdminData {
        self.store.read(|db| AdminData {
            users: db.users.iter().map(UserProfile::from).collect(),
            devices: db.devices.clone(),
            total_devices: db.devices.len(),
            total_users: db.users.iter().filter(|u| u.role != Role::Admin).count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::{Database, User};

    fn user(email: &str, role: Role) -> User {
        User {
            email: email.into(),
            password: "pw".into(),
            name: email.into(),
            role,
            organization: String::new(),
        }
    }

    fn registry() -> (Arc<Store>, DeviceRegistry) {
        let mut db = Database::default();
        db.users.push(user("root@x.com", Role::Admin));
        db.users.push(user("a@x.com", Role::User));
        db.users.push(user("b@x.com", Role::User));
        db.users.push(user("c@x.com", Role::User));
        let mut d1 = Device::new("D1", "Sensor", Some("a@x.com".into()));
        d1.upsert_grant("b@x.com", Permission::View);
        db.devices.push(d1);
        db.devices.push(Device::new("D2", "Spare", None));
        db.devices.push(Device::new("D3", "Gateway", Some("root@x.com".into())));
        let store = Arc::new(Store::in_memory(db));
        (store.clone(), DeviceRegistry::new(store))
    }

    fn assert_owner_not_shared(store: &Store) {
        store.read(|db| {
            for d in &db.devices {
                if let Some(owner) = d.owner.as_deref() {
                    assert!(d.grant_for(owner).is_none(), "owner granted on {}", d.id);
                }
            }
        });
    }

    #[test]
    fn list_visible_tags_owned_and_shared() {
        let (_, reg) = registry();

        let a = reg.list_visible("a@x.com");
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].permission, AccessLevel::Owner);
        assert!(!a[0].is_shared);
        assert_eq!(a[0].shared_with.as_ref().unwrap().len(), 1);

        let b = reg.list_visible("b@x.com");
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].permission, AccessLevel::View);
        assert!(b[0].is_shared);
        assert!(b[0].shared_with.is_none());
    }

    #[test]
    fn list_visible_does_not_widen_for_admins() {
        let (_, reg) = registry();
        let root = reg.list_visible("root@x.com");
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].id, "D3");
    }

    #[test]
    fn register_upserts_existing_id() {
        let (store, reg) = registry();
        reg.register("D9", "New", None).unwrap();
        reg.register("D9", "Renamed", Some("c@x.com")).unwrap();
        let d = store.read(|db| db.device("D9").cloned()).unwrap();
        assert_eq!(d.name, "Renamed");
        assert!(d.is_owned_by("c@x.com"));
        assert_eq!(store.snapshot().devices.len(), 4);
    }

    #[test]
    fn register_to_grantee_drops_their_grant() {
        let (store, reg) = registry();
        reg.register("D1", "Sensor", Some("b@x.com")).unwrap();
        assert_owner_not_shared(&store);
    }

    #[test]
    fn register_rejects_unknown_owner_and_empty_fields() {
        let (_, reg) = registry();
        assert!(matches!(
            reg.register("D9", "X", Some("ghost@x.com")),
            Err(DashboardError::UnknownUser(_))
        ));
        assert_eq!(
            reg.register("", "X", None).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn claim_outcomes() {
        let (store, reg) = registry();
        assert!(matches!(
            reg.claim("NOPE", "x", "a@x.com"),
            Err(DashboardError::NotRegistered(_))
        ));
        assert!(matches!(
            reg.claim("D1", "x", "a@x.com"),
            Err(DashboardError::AlreadyOwned(_))
        ));
        assert!(matches!(
            reg.claim("D1", "x", "c@x.com"),
            Err(DashboardError::OwnedByOther(_))
        ));

        let claimed = reg.claim("D2", "Kitchen", "c@x.com").unwrap();
        assert!(claimed.is_owned_by("c@x.com"));
        assert_eq!(claimed.name, "Kitchen");
        assert_eq!(store.snapshot().devices.len(), 3);
    }

    #[test]
    fn claim_drops_claimants_own_grant() {
        let (store, reg) = registry();
        store
            .mutate(|db| {
                if let Some(spare) = db.device_mut("D2") {
                    spare.upsert_grant("c@x.com", Permission::View);
                    spare.upsert_grant("b@x.com", Permission::Manage);
                }
                Ok(())
            })
            .unwrap();

        reg.claim("D2", "", "c@x.com").unwrap();
        assert_owner_not_shared(&store);
        let d = store.read(|db| db.device("D2").cloned()).unwrap();
        assert!(d.is_owned_by("c@x.com"));
        assert!(d.grant_for("c@x.com").is_none());
        assert!(d.grant_for("b@x.com").is_some());
        assert_eq!(d.name, "Spare");
    }

    #[test]
    fn owner_delete_removes_device_for_everyone() {
        let (_, reg) = registry();
        assert_eq!(reg.delete("D1", "a@x.com").unwrap(), Removal::Device);
        assert!(reg.list_visible("a@x.com").is_empty());
        assert!(reg.list_visible("b@x.com").is_empty());
    }

    #[test]
    fn admin_delete_removes_any_device() {
        let (store, reg) = registry();
        assert_eq!(reg.delete("D1", "root@x.com").unwrap(), Removal::Device);
        assert!(store.read(|db| db.device("D1").is_none()));
    }

    #[test]
    fn grantee_delete_only_drops_own_grant() {
        let (store, reg) = registry();
        assert_eq!(reg.delete("D1", "b@x.com").unwrap(), Removal::Grant);
        let d = store.read(|db| db.device("D1").cloned()).unwrap();
        assert!(d.is_owned_by("a@x.com"));
        assert!(d.shared_with.is_empty());
    }

    #[test]
    fn stranger_delete_is_forbidden() {
        let (store, reg) = registry();
        assert_eq!(
            reg.delete("D1", "c@x.com").unwrap_err().kind(),
            ErrorKind::Forbidden
        );
        assert!(store.read(|db| db.device("D1").is_some()));
        assert_eq!(
            reg.delete("NOPE", "a@x.com").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn rename_requires_manage() {
        let (store, reg) = registry();
        assert_eq!(
            reg.rename("D1", "b@x.com", "Mine").unwrap_err().kind(),
            ErrorKind::Forbidden
        );
        reg.share_direct("D1", "a@x.com", "b@x.com", Permission::Manage)
            .unwrap();
        reg.rename("D1", "b@x.com", "Lab").unwrap();
        assert_eq!(store.read(|db| db.device("D1").unwrap().name.clone()), "Lab");
    }

    #[test]
    fn share_direct_checks() {
        let (store, reg) = registry();
        assert_eq!(
            reg.share_direct("D1", "b@x.com", "c@x.com", Permission::View)
                .unwrap_err()
                .kind(),
            ErrorKind::Forbidden
        );
        assert!(matches!(
            reg.share_direct("D1", "a@x.com", "a@x.com", Permission::View),
            Err(DashboardError::SelfShare)
        ));
        assert!(matches!(
            reg.share_direct("D1", "a@x.com", "ghost@x.com", Permission::View),
            Err(DashboardError::UnknownUser(_))
        ));
        reg.share_direct("D1", "a@x.com", "b@x.com", Permission::Manage)
            .unwrap();
        let d = store.read(|db| db.device("D1").cloned()).unwrap();
        assert_eq!(d.shared_with.len(), 1);
        assert_eq!(d.shared_with[0].permission, Permission::Manage);
    }

    #[test]
    fn revoke_share_is_owner_only_and_immediate() {
        let (_, reg) = registry();
        assert_eq!(
            reg.revoke_share("D1", "b@x.com", "b@x.com")
                .unwrap_err()
                .kind(),
            ErrorKind::Forbidden
        );
        reg.revoke_share("D1", "a@x.com", "b@x.com").unwrap();
        assert!(reg.list_visible("b@x.com").is_empty());
        assert!(matches!(
            reg.revoke_share("D1", "a@x.com", "b@x.com"),
            Err(DashboardError::GrantNotFound { .. })
        ));
    }

    #[test]
    fn transfer_direct_moves_ownership() {
        let (store, reg) = registry();
        reg.transfer_direct("D1", "a@x.com", "b@x.com").unwrap();
        let d = store.read(|db| db.device("D1").cloned()).unwrap();
        assert!(d.is_owned_by("b@x.com"));
        assert!(d.shared_with.is_empty());
        assert!(reg.list_visible("a@x.com").is_empty());
        assert_owner_not_shared(&store);

        assert_eq!(
            reg.transfer_direct("D1", "a@x.com", "c@x.com")
                .unwrap_err()
                .kind(),
            ErrorKind::Forbidden
        );
    }

    #[test]
    fn admin_data_is_unfiltered() {
        let (_, reg) = registry();
        let data = reg.admin_data();
        assert_eq!(data.total_devices, 3);
        assert_eq!(data.devices.len(), 3);
        assert_eq!(data.users.len(), 4);
        assert_eq!(data.total_users, 3);
        let json = serde_json::to_value(&data).unwrap();
        assert!(json["users"][0].get("password").is_none());
        assert_eq!(json["totalDevices"], 3);
    }
}

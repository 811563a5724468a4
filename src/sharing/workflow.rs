//! Consent-based share and transfer requests.
//!
//! A request creates a `pending` notification addressed to the recipient.
//! Nothing about the device changes until the recipient accepts; rejecting
//! only closes the notification. `accepted` and `rejected` are terminal.

use crate::devices::access;
use crate::error::{DashboardError, DashboardResult};
use crate::store::{
    Database, Notification, NotificationKind, NotificationStatus, Permission, Store,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct SharingWorkflow {
    store: Arc<Store>,
}

impl SharingWorkflow {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Ask `to` to accept `permission` on a device owned by `from`.
    pub fn request_share(
        &self,
        device_id: &str,
        from: &str,
        to: &str,
        permission: Permission,
    ) -> DashboardResult<Notification> {
        self.request(NotificationKind::Share, device_id, from, to, Some(permission))
    }

    /// Ask `to` to take ownership of a device owned by `from`.
    pub fn request_transfer(
        &self,
        device_id: &str,
        from: &str,
        to: &str,
    ) -> DashboardResult<Notification> {
        self.request(NotificationKind::Transfer, device_id, from, to, None)
    }

    fn request(
        &self,
        kind: NotificationKind,
        device_id: &str,
        from: &str,
        to: &str,
        permission: Option<Permission>,
    ) -> DashboardResult<Notification> {
        let notification = self.store.mutate(|db| {
            let device = db
                .device(device_id)
                .ok_or_else(|| DashboardError::DeviceNotFound(device_id.to_string()))?;
            let allowed = match kind {
                NotificationKind::Share => access::can_share(device, from),
                NotificationKind::Transfer => access::can_transfer(device, from),
            };
            if !allowed {
                return Err(DashboardError::Forbidden(format!(
                    "{from} does not own device {device_id}"
                )));
            }
            if to == from {
                return Err(DashboardError::SelfShare);
            }
            if !db.has_user(to) {
                return Err(DashboardError::UnknownUser(to.to_string()));
            }
            let duplicate = db.notifications.iter().any(|n| {
                n.is_pending()
                    && n.kind == kind
                    && n.from_email == from
                    && n.to_email == to
                    && n.device_id == device_id
            });
            if duplicate {
                return Err(DashboardError::DuplicateRequest);
            }

            let now = Utc::now();
            let notification = Notification {
                id: db.next_notification_id(now.timestamp_millis()),
                kind,
                from_email: from.to_string(),
                to_email: to.to_string(),
                device_id: device_id.to_string(),
                device_name: device.name.clone(),
                permission,
                status: NotificationStatus::Pending,
                created_at: now,
                responded_at: None,
            };
            db.notifications.push(notification.clone());
            Ok(notification)
        })?;

        info!(
            notification_id = %notification.id,
            kind = ?kind,
            device_id = %device_id,
            from = %from,
            to = %to,
            "Request created"
        );
        Ok(notification)
    }

    /// Accept a pending request addressed to `acting`, applying its effect.
    ///
    /// On any error the notification stays pending and the device is
    /// untouched.
    pub fn accept(&self, notification_id: &str, acting: &str) -> DashboardResult<Notification> {
        let result = self.store.mutate(|db| {
            let notification = pending_for(db, notification_id, acting)?.clone();
            apply(db, &notification, acting)?;
            close(db, notification_id, NotificationStatus::Accepted)
        });
        match &result {
            Ok(n) => info!(
                notification_id = %notification_id,
                device_id = %n.device_id,
                acting = %acting,
                "Request accepted"
            ),
            Err(e) => warn!(notification_id = %notification_id, acting = %acting, error = %e, "Accept refused"),
        }
        result
    }

    pub fn reject(&self, notification_id: &str, acting: &str) -> DashboardResult<Notification> {
        let notification = self.store.mutate(|db| {
            pending_for(db, notification_id, acting)?;
            close(db, notification_id, NotificationStatus::Rejected)
        })?;
        info!(notification_id = %notification_id, acting = %acting, "Request rejected");
        Ok(notification)
    }

    /// Pending requests for `to`, newest first.
    pub fn list_pending(&self, to: &str) -> Vec<Notification> {
        debug!(email = %to, "Listing pending notifications");
        self.store.read(|db| {
            // Reverse first so the stable sort breaks createdAt ties
            // in favour of the later entry.
            let mut pending: Vec<Notification> = db
                .notifications
                .iter()
                .rev()
                .filter(|n| n.is_pending() && n.to_email == to)
                .cloned()
                .collect();
            pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            pending
        })
    }
}

fn pending_for<'a>(
    db: &'a Database,
    notification_id: &str,
    acting: &str,
) -> DashboardResult<&'a Notification> {
    let notification = db
        .notifications
        .iter()
        .find(|n| n.id == notification_id && n.is_pending())
        .ok_or_else(|| DashboardError::NotificationNotFound(notification_id.to_string()))?;
    if notification.to_email != acting {
        return Err(DashboardError::Forbidden(
            "This request is addressed to another user".into(),
        ));
    }
    Ok(notification)
}

fn apply(db: &mut Database, notification: &Notification, acting: &str) -> DashboardResult<()> {
    let device = db
        .device_mut(&notification.device_id)
        .ok_or_else(|| DashboardError::DeviceNotFound(notification.device_id.clone()))?;

    if !device.is_owned_by(&notification.from_email) {
        return Err(DashboardError::Stale(format!(
            "device {} changed owner since the request was made",
            device.id
        )));
    }

    match notification.kind {
        NotificationKind::Share => {
            let permission = notification.permission.ok_or_else(|| {
                DashboardError::InvalidInput("share request carries no permission".into())
            })?;
            device.upsert_grant(acting, permission);
        }
        NotificationKind::Transfer => device.reassign(acting),
    }
    Ok(())
}

fn close(
    db: &mut Database,
    notification_id: &str,
    status: NotificationStatus,
) -> DashboardResult<Notification> {
    let notification = db
        .notification_mut(notification_id)
        .ok_or_else(|| DashboardError::NotificationNotFound(notification_id.to_string()))?;
    notification.status = status;
    notification.responded_at = Some(Utc::now());
    Ok(notification.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::access::AccessLevel;
    use crate::devices::DeviceRegistry;
    use crate::error::ErrorKind;
    use crate::store::{Device, Role, User};

    fn user(email: &str) -> User {
        User {
            email: email.into(),
            password: "pw".into(),
            name: email.into(),
            role: Role::User,
            organization: String::new(),
        }
    }

    fn setup() -> (Arc<Store>, SharingWorkflow, DeviceRegistry) {
        let mut db = Database::default();
        for email in ["a@x.com", "b@x.com", "c@x.com"] {
            db.users.push(user(email));
        }
        db.devices
            .push(Device::new("D1", "Sensor", Some("a@x.com".into())));
        let store = Arc::new(Store::in_memory(db));
        (
            store.clone(),
            SharingWorkflow::new(store.clone()),
            DeviceRegistry::new(store),
        )
    }

    #[test]
    fn share_is_invisible_until_accepted() {
        let (_, wf, reg) = setup();
        let n = wf
            .request_share("D1", "a@x.com", "b@x.com", Permission::View)
            .unwrap();
        assert!(n.is_pending());
        assert!(reg.list_visible("b@x.com").is_empty());

        let accepted = wf.accept(&n.id, "b@x.com").unwrap();
        assert_eq!(accepted.status, NotificationStatus::Accepted);
        assert!(accepted.responded_at.is_some());

        let b = reg.list_visible("b@x.com");
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].permission, AccessLevel::View);
        assert!(b[0].is_shared);

        let a = reg.list_visible("a@x.com");
        assert_eq!(a[0].permission, AccessLevel::Owner);
        let grants = a[0].shared_with.as_ref().unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].email, "b@x.com");
        assert_eq!(grants[0].permission, Permission::View);
    }

    #[test]
    fn repeated_share_acceptance_keeps_one_grant_with_latest_permission() {
        let (store, wf, _) = setup();
        let first = wf
            .request_share("D1", "a@x.com", "b@x.com", Permission::View)
            .unwrap();
        wf.accept(&first.id, "b@x.com").unwrap();
        let second = wf
            .request_share("D1", "a@x.com", "b@x.com", Permission::Manage)
            .unwrap();
        wf.accept(&second.id, "b@x.com").unwrap();

        let device = store.read(|db| db.device("D1").cloned()).unwrap();
        assert_eq!(device.shared_with.len(), 1);
        assert_eq!(device.shared_with[0].permission, Permission::Manage);
    }

    #[test]
    fn accepting_twice_fails_the_second_time() {
        let (_, wf, _) = setup();
        let n = wf
            .request_share("D1", "a@x.com", "b@x.com", Permission::View)
            .unwrap();
        wf.accept(&n.id, "b@x.com").unwrap();
        assert_eq!(
            wf.accept(&n.id, "b@x.com").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn request_checks() {
        let (_, wf, _) = setup();
        assert_eq!(
            wf.request_share("D1", "b@x.com", "c@x.com", Permission::View)
                .unwrap_err()
                .kind(),
            ErrorKind::Forbidden
        );
        assert!(matches!(
            wf.request_share("D1", "a@x.com", "a@x.com", Permission::View),
            Err(DashboardError::SelfShare)
        ));
        assert!(matches!(
            wf.request_transfer("D1", "a@x.com", "ghost@x.com"),
            Err(DashboardError::UnknownUser(_))
        ));
        assert!(matches!(
            wf.request_transfer("NOPE", "a@x.com", "b@x.com"),
            Err(DashboardError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn duplicate_pending_request_is_refused() {
        let (store, wf, _) = setup();
        wf.request_transfer("D1", "a@x.com", "b@x.com").unwrap();
        assert!(matches!(
            wf.request_transfer("D1", "a@x.com", "b@x.com"),
            Err(DashboardError::DuplicateRequest)
        ));
        // A different kind is not a duplicate.
        wf.request_share("D1", "a@x.com", "b@x.com", Permission::View)
            .unwrap();
        assert_eq!(store.snapshot().notifications.len(), 2);
    }

    #[test]
    fn transfer_moves_ownership_and_drops_old_owner() {
        let (store, wf, reg) = setup();
        let share = wf
            .request_share("D1", "a@x.com", "c@x.com", Permission::View)
            .unwrap();
        wf.accept(&share.id, "c@x.com").unwrap();

        let n = wf.request_transfer("D1", "a@x.com", "c@x.com").unwrap();
        wf.accept(&n.id, "c@x.com").unwrap();

        let device = store.read(|db| db.device("D1").cloned()).unwrap();
        assert!(device.is_owned_by("c@x.com"));
        assert!(device.grant_for("c@x.com").is_none());
        assert!(device.grant_for("a@x.com").is_none());
        assert!(reg.list_visible("a@x.com").is_empty());
    }

    #[test]
    fn stale_transfer_is_refused_without_mutation() {
        let (store, wf, reg) = setup();
        let to_b = wf.request_transfer("D1", "a@x.com", "b@x.com").unwrap();
        let to_c = wf.request_transfer("D1", "a@x.com", "c@x.com").unwrap();
        wf.accept(&to_b.id, "b@x.com").unwrap();

        let before = store.snapshot();
        let err = wf.accept(&to_c.id, "c@x.com").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Stale);
        assert_eq!(store.snapshot(), before);
        assert!(reg.list_visible("c@x.com").is_empty());
        assert_eq!(wf.list_pending("c@x.com").len(), 1);
    }

    #[test]
    fn transfer_of_deleted_device_is_not_found_and_not_recreated() {
        let (store, wf, reg) = setup();
        let n = wf.request_transfer("D1", "a@x.com", "c@x.com").unwrap();
        reg.delete("D1", "a@x.com").unwrap();

        let err = wf.accept(&n.id, "c@x.com").unwrap_err();
        assert!(matches!(err, DashboardError::DeviceNotFound(_)));
        assert!(store.read(|db| db.device("D1").is_none()));
    }

    #[test]
    fn share_from_former_owner_is_stale() {
        let (_, wf, reg) = setup();
        let share = wf
            .request_share("D1", "a@x.com", "c@x.com", Permission::Manage)
            .unwrap();
        reg.transfer_direct("D1", "a@x.com", "b@x.com").unwrap();
        assert_eq!(
            wf.accept(&share.id, "c@x.com").unwrap_err().kind(),
            ErrorKind::Stale
        );
    }

    #[test]
    fn only_recipient_may_respond() {
        let (_, wf, _) = setup();
        let n = wf
            .request_share("D1", "a@x.com", "b@x.com", Permission::View)
            .unwrap();
        assert_eq!(
            wf.accept(&n.id, "c@x.com").unwrap_err().kind(),
            ErrorKind::Forbidden
        );
        assert_eq!(
            wf.reject(&n.id, "a@x.com").unwrap_err().kind(),
            ErrorKind::Forbidden
        );
        let pending = wf.list_pending("b@x.com");
        assert_eq!(pending.len(), 1);
        assert!(pending[0].is_pending());
    }

    #[test]
    fn reject_closes_without_device_change() {
        let (store, wf, _) = setup();
        let n = wf.request_transfer("D1", "a@x.com", "b@x.com").unwrap();
        let rejected = wf.reject(&n.id, "b@x.com").unwrap();
        assert_eq!(rejected.status, NotificationStatus::Rejected);
        assert!(store.read(|db| db.device("D1").unwrap().is_owned_by("a@x.com")));
        assert!(wf.list_pending("b@x.com").is_empty());
        assert_eq!(
            wf.accept(&n.id, "b@x.com").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn list_pending_is_newest_first_and_scoped() {
        let (_, wf, _) = setup();
        let first = wf
            .request_share("D1", "a@x.com", "b@x.com", Permission::View)
            .unwrap();
        let second = wf.request_transfer("D1", "a@x.com", "b@x.com").unwrap();
        wf.request_share("D1", "a@x.com", "c@x.com", Permission::View)
            .unwrap();

        let pending = wf.list_pending("b@x.com");
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, second.id);
        assert_eq!(pending[1].id, first.id);
        assert!(second.id.parse::<i64>().unwrap() > first.id.parse::<i64>().unwrap());
    }

    #[test]
    fn notification_snapshots_device_name() {
        let (_, wf, reg) = setup();
        let n = wf
            .request_share("D1", "a@x.com", "b@x.com", Permission::View)
            .unwrap();
        reg.rename("D1", "a@x.com", "Renamed").unwrap();
        assert_eq!(n.device_name, "Sensor");
        assert_eq!(wf.list_pending("b@x.com")[0].device_name, "Sensor");
    }
}

use thiserror::Error;

/// Coarse classification used by the gateway to pick an HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Duplicate,
    InvalidInput,
    Unauthorized,
    Stale,
    Storage,
}

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Notification not found or already handled: {0}")]
    NotificationNotFound(String),

    #[error("{email} has no access grant on device {device_id}")]
    GrantNotFound { device_id: String, email: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Email already registered.")]
    DuplicateEmail(String),

    #[error("An identical request is already pending.")]
    DuplicateRequest,

    #[error("Device already added: {0}")]
    AlreadyOwned(String),

    #[error("Device {0} is not registered. Ask an administrator to register it first.")]
    NotRegistered(String),

    #[error("Device {0} belongs to another user. Ask the owner to share or transfer it.")]
    OwnedByOther(String),

    #[error("You cannot share or transfer a device to yourself.")]
    SelfShare,

    #[error("No registered user with email {0}")]
    UnknownUser(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid email or password.")]
    InvalidCredentials,

    #[error("Request is stale: {0}")]
    Stale(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl DashboardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UserNotFound(_)
            | Self::DeviceNotFound(_)
            | Self::NotificationNotFound(_)
            | Self::GrantNotFound { .. } => ErrorKind::NotFound,
            Self::Forbidden(_) | Self::NotRegistered(_) | Self::OwnedByOther(_) => {
                ErrorKind::Forbidden
            }
            Self::DuplicateEmail(_) | Self::DuplicateRequest | Self::AlreadyOwned(_) => {
                ErrorKind::Duplicate
            }
            Self::SelfShare | Self::UnknownUser(_) | Self::InvalidInput(_) => {
                ErrorKind::InvalidInput
            }
            Self::InvalidCredentials => ErrorKind::Unauthorized,
            Self::Stale(_) => ErrorKind::Stale,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

pub type DashboardResult<T> = Result<T, DashboardError>;

/// Reject a required field that is empty or whitespace.
pub(crate) fn require_field(field: &str, value: &str) -> DashboardResult<()> {
    if value.trim().is_empty() {
        return Err(DashboardError::InvalidInput(format!("{field} is required")));
    }
    Ok(())
}

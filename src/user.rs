//! User records, roles and the user store interface.
//!
//! Users are owned by an external repository; this crate only reads them and
//! writes the last-login timestamp.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};

/// Account status. Anything other than `active` blocks login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AccountStatus {
    Active,
    Disabled,
    Other(String),
}

impl AccountStatus {
    pub fn as_str(&self) -> &str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Disabled => "disabled",
            AccountStatus::Other(s) => s,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AccountStatus::Active)
    }
}

impl From<String> for AccountStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "active" => AccountStatus::Active,
            "disabled" => AccountStatus::Disabled,
            _ => AccountStatus::Other(s),
        }
    }
}

impl From<AccountStatus> for String {
    fn from(status: AccountStatus) -> Self {
        status.as_str().to_string()
    }
}

/// A user as stored by the user repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    /// bcrypt hash, never serialized into responses (see [`UserInfo`])
    pub password_hash: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub role: String,
    pub status: AccountStatus,
    /// Unix seconds
    pub created_at: i64,
    #[serde(default)]
    pub last_login_at: Option<i64>,
}

impl User {
    /// Parsed role, `None` for roles this crate does not know.
    pub fn role(&self) -> Option<Role> {
        self.role.parse().ok()
    }

    pub fn info(&self) -> UserInfo {
        UserInfo::from(self)
    }
}

/// Public view of a user, safe to hand back to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub status: String,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: user.role.clone(),
            status: user.status.as_str().to_string(),
        }
    }
}

/// User roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Applicant,
    JuniorReviewer,
    SeniorReviewer,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Applicant => "applicant",
            Role::JuniorReviewer => "junior_reviewer",
            Role::SeniorReviewer => "senior_reviewer",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }

    /// Permissions granted to this role.
    pub fn permissions(&self) -> &'static [Permission] {
        use Permission::*;
        match self {
            Role::Applicant => &[
                ViewProfile,
                EditProfile,
                UploadDocuments,
                CreateApplication,
                ViewApplication,
                EditApplication,
                SubmitApplication,
            ],
            Role::JuniorReviewer => &[ViewProfile, ViewDecisions, MakeDecision, ViewQueue],
            Role::SeniorReviewer => &[
                ViewProfile,
                ViewDecisions,
                MakeDecision,
                ViewQueue,
                ViewApplication,
            ],
            Role::Manager => &[
                ViewProfile,
                ViewDecisions,
                MakeDecision,
                ViewQueue,
                ViewApplication,
                ViewAudit,
                ManageRules,
            ],
            Role::Admin => &[
                ViewProfile,
                EditProfile,
                ViewDecisions,
                MakeDecision,
                ViewQueue,
                ViewApplication,
                ViewAudit,
                ManageRules,
                ManageUsers,
            ],
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applicant" => Ok(Role::Applicant),
            "junior_reviewer" => Ok(Role::JuniorReviewer),
            "senior_reviewer" => Ok(Role::SeniorReviewer),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            other => Err(AuthError::InvalidRequest(format!("unknown role '{}'", other))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained permissions checked by outer handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "user:view_profile")]
    ViewProfile,
    #[serde(rename = "user:edit_profile")]
    EditProfile,
    #[serde(rename = "user:upload_documents")]
    UploadDocuments,
    #[serde(rename = "application:create")]
    CreateApplication,
    #[serde(rename = "application:view")]
    ViewApplication,
    #[serde(rename = "application:edit")]
    EditApplication,
    #[serde(rename = "application:submit")]
    SubmitApplication,
    #[serde(rename = "decision:view")]
    ViewDecisions,
    #[serde(rename = "decision:make")]
    MakeDecision,
    #[serde(rename = "decision:view_queue")]
    ViewQueue,
    #[serde(rename = "admin:manage_users")]
    ManageUsers,
    #[serde(rename = "admin:view_audit")]
    ViewAudit,
    #[serde(rename = "admin:manage_rules")]
    ManageRules,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ViewProfile => "user:view_profile",
            Permission::EditProfile => "user:edit_profile",
            Permission::UploadDocuments => "user:upload_documents",
            Permission::CreateApplication => "application:create",
            Permission::ViewApplication => "application:view",
            Permission::EditApplication => "application:edit",
            Permission::SubmitApplication => "application:submit",
            Permission::ViewDecisions => "decision:view",
            Permission::MakeDecision => "decision:make",
            Permission::ViewQueue => "decision:view_queue",
            Permission::ManageUsers => "admin:manage_users",
            Permission::ViewAudit => "admin:view_audit",
            Permission::ManageRules => "admin:manage_rules",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read access to users plus the last-login write.
pub trait UserStore: Send + Sync {
    fn get_by_id(&self, id: &str) -> AuthResult<Option<User>>;

    fn get_by_email(&self, email: &str) -> AuthResult<Option<User>>;

    /// Record a successful login at `at` (Unix seconds).
    fn update_last_login(&self, user_id: &str, at: i64) -> AuthResult<()>;
}

/// In-process [`UserStore`]. Email lookups ignore ASCII case.
#[derive(Debug, Clone, Default)]
pub struct MemoryUserStore {
    users: Arc<RwLock<HashMap<String, User>>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user.
    pub fn insert(&self, user: User) -> AuthResult<()> {
        self.users
            .write()
            .map_err(|_| AuthError::StorageUnavailable("user store lock poisoned".to_string()))?
            .insert(user.id.clone(), user);
        Ok(())
    }

    fn read(&self) -> AuthResult<std::sync::RwLockReadGuard<'_, HashMap<String, User>>> {
        self.users
            .read()
            .map_err(|_| AuthError::StorageUnavailable("user store lock poisoned".to_string()))
    }
}

impl UserStore for MemoryUserStore {
    fn get_by_id(&self, id: &str) -> AuthResult<Option<User>> {
        Ok(self.read()?.get(id).cloned())
    }

    fn get_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        Ok(self
            .read()?
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    fn update_last_login(&self, user_id: &str, at: i64) -> AuthResult<()> {
        let mut users = self
            .users
            .write()
            .map_err(|_| AuthError::StorageUnavailable("user store lock poisoned".to_string()))?;
        match users.get_mut(user_id) {
            Some(user) => {
                user.last_login_at = Some(at);
                Ok(())
            }
            None => Err(AuthError::UserNotFound),
        }
    }
}

//! User account service.

use std::sync::Arc;

use tracing::warn;

use parley_core::{Role, User, password};
use parley_db::{QueryResult, UserStore, subcode};

use crate::result::{ErrorCode, ServiceResult};

/// Outcome of a successful login.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginData {
    pub user: User,
    pub is_admin: bool,
}

pub struct UserService {
    users: Arc<dyn UserStore>,
}

impl UserService {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Register a new normal-role account.
    ///
    /// The password is hashed here; the store never sees plaintext on
    /// this path.
    pub async fn register(&self, email: &str, pw: &str, name: &str) -> ServiceResult<User> {
        if email.is_empty() || pw.is_empty() || name.is_empty() {
            return ServiceResult::fail(ErrorCode::BadRequest, "all fields are required");
        }
        if !is_plausible_email(email) {
            return ServiceResult::fail(ErrorCode::BadRequest, "invalid email format");
        }

        let hash = password::hash_password(pw);
        match self.users.create_user(name, email, &hash, Role::Normal).await {
            QueryResult::Success(user) => ServiceResult::ok(user, "registration successful"),
            QueryResult::NotFound(Some(sub)) if sub == subcode::EMAIL_TAKEN => {
                ServiceResult::fail(ErrorCode::Conflict, "email already in use")
            }
            QueryResult::NotFound(Some(sub)) if sub == subcode::NAME_EXHAUSTED => {
                ServiceResult::fail(ErrorCode::Conflict, "name not available")
            }
            other => internal(other, "register"),
        }
    }

    pub async fn login(&self, email: &str, pw: &str) -> ServiceResult<LoginData> {
        if email.is_empty() || pw.is_empty() {
            return ServiceResult::fail(ErrorCode::BadRequest, "email and password are required");
        }

        match self.users.authenticate(email, pw).await {
            QueryResult::Success(user) => {
                let is_admin = user.role.is_admin();
                ServiceResult::ok(LoginData { user, is_admin }, "login successful")
            }
            QueryResult::NotFound(Some(sub)) if sub == subcode::WRONG_PASSWORD => {
                ServiceResult::fail(ErrorCode::Unauthorized, "wrong password")
            }
            QueryResult::NotFound(_) => {
                ServiceResult::fail(ErrorCode::NotFound, "user does not exist")
            }
            other => internal(other, "login"),
        }
    }

    pub async fn change_password(
        &self,
        email: &str,
        old_pw: &str,
        new_pw: &str,
    ) -> ServiceResult<()> {
        if email.is_empty() || old_pw.is_empty() || new_pw.is_empty() {
            return ServiceResult::fail(ErrorCode::BadRequest, "all fields are required");
        }

        match self.users.change_password(email, old_pw, new_pw).await {
            QueryResult::Success(()) => ServiceResult::ok_empty("password changed"),
            QueryResult::NotFound(Some(sub)) if sub == subcode::WRONG_PASSWORD => {
                ServiceResult::fail(ErrorCode::Unauthorized, "wrong password")
            }
            QueryResult::NotFound(_) => {
                ServiceResult::fail(ErrorCode::NotFound, "user does not exist")
            }
            other => internal(other, "change_password"),
        }
    }

    pub async fn change_display_name(&self, user_id: i64, name: &str) -> ServiceResult<()> {
        if name.is_empty() {
            return ServiceResult::fail(ErrorCode::BadRequest, "display name is required");
        }

        match self.users.change_display_name(user_id, name).await {
            QueryResult::Success(()) => ServiceResult::ok_empty("display name changed"),
            QueryResult::NotFound(Some(sub)) if sub == subcode::NAME_EXHAUSTED => {
                ServiceResult::fail(ErrorCode::Conflict, "name not available")
            }
            QueryResult::NotFound(_) => {
                ServiceResult::fail(ErrorCode::NotFound, "user does not exist")
            }
            other => internal(other, "change_display_name"),
        }
    }

    pub async fn get_user_info(&self, user_id: i64) -> ServiceResult<User> {
        match self.users.user_by_id(user_id).await {
            QueryResult::Success(user) => ServiceResult::ok(user, "user found"),
            QueryResult::NotFound(_) => {
                ServiceResult::fail(ErrorCode::NotFound, "user does not exist")
            }
            other => internal(other, "get_user_info"),
        }
    }
}

/// Shape check only — real validation is the unique index on `email`.
fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty(),
        None => false,
    }
}

/// Collapse connection/internal store errors into `INTERNAL_ERROR`,
/// keeping driver text out of responses.
pub(crate) fn internal<T, U>(result: QueryResult<T>, op: &str) -> ServiceResult<U> {
    if let QueryResult::ConnectionError(error) | QueryResult::InternalError(error) = &result {
        warn!(op, error = %error, "store operation failed");
    }
    ServiceResult::fail(ErrorCode::InternalError, "internal error")
}

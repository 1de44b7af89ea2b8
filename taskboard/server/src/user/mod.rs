use std::collections::HashSet;

use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use sea_orm::*;

use crate::entities::*;

/// The role of a user, checked by the assignment and deletion rules.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Normal,
}

impl Role {
    /// Returns the role as stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Normal => "normal",
        }
    }
}

/// Error raised when a stored role string is not part of the closed role set.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("Unknown role '{0}'")]
pub struct UnknownRoleError(String);

impl std::str::FromStr for Role {
    type Err = UnknownRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "normal" => Ok(Role::Normal),
            other => Err(UnknownRoleError(other.to_string())),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Eq, Hash)]
pub struct User {
    id: i32,
    username: String,
    fullname: String,
    role: Role,
}

impl User {
    pub fn new(id: i32, username: String, fullname: String, role: Role) -> Self {
        Self {
            id,
            username,
            fullname,
            role,
        }
    }

    /// Returns the ID of the user.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Returns the unique username used to log in.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the display name of the user.
    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    /// Returns the role of the user.
    pub fn role(&self) -> Role {
        self.role
    }
}

impl TryFrom<user::Model> for User {
    type Error = UnknownRoleError;

    fn try_from(model: user::Model) -> Result<Self, Self::Error> {
        let role = model.role.parse()?;
        Ok(User::new(model.id, model.username, model.fullname, role))
    }
}

/// Error type for UserService operations.
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Represents a duplicate username error (usernames are unique).
    #[error("User with username '{0}' already exists")]
    DuplicateUsername(String),
    /// Represents a user not found error.
    #[error("User with ID {0} not found")]
    UserNotFound(i32),
    /// Represents a failed login attempt (unknown username or wrong password).
    #[error("Invalid username or password")]
    InvalidCredentials,
    /// Represents a password hashing failure.
    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
    /// Represents a stored role outside the closed role set.
    #[error(transparent)]
    UnknownRole(#[from] UnknownRoleError),
    /// Represents a database error.
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

pub struct UserService<'a> {
    db: &'a sea_orm::DatabaseConnection,
}

impl UserService<'_> {
    pub fn new(db: &sea_orm::DatabaseConnection) -> UserService {
        UserService { db }
    }

    /// Creates a new user with a hashed password.
    ///
    /// # Arguments
    ///
    /// * `username` - The unique username used to log in.
    /// * `fullname` - The display name of the user.
    /// * `password` - The plaintext password; only its argon2 hash is stored.
    /// * `role` - The role of the user.
    ///
    /// # Returns
    ///
    /// A `Result` containing the created `User` if successful, or an error otherwise.
    #[tracing::instrument(skip(self, password))]
    pub async fn create_user(
        &self,
        username: String,
        fullname: String,
        password: &str,
        role: Role,
    ) -> Result<User, UserServiceError> {
        if self.username_exists(&username).await? {
            return Err(UserServiceError::DuplicateUsername(username));
        }

        let password_hash = hash_password(password)?;
        let active_model = user::ActiveModel {
            username: ActiveValue::Set(username),
            fullname: ActiveValue::Set(fullname),
            password_hash: ActiveValue::Set(password_hash),
            role: ActiveValue::Set(role.as_str().to_string()),
            ..Default::default()
        };
        let created_model = active_model.insert(self.db).await?;
        Ok(User::try_from(created_model)?)
    }

    /// Verifies a username/password pair against the stored hash.
    ///
    /// # Returns
    ///
    /// A `Result` containing the authenticated `User`, or
    /// `UserServiceError::InvalidCredentials` when either the username is
    /// unknown or the password does not match.
    #[tracing::instrument(skip(self, password))]
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<User, UserServiceError> {
        let model = user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(self.db)
            .await?
            .ok_or(UserServiceError::InvalidCredentials)?;

        if !verify_password(password, &model.password_hash) {
            return Err(UserServiceError::InvalidCredentials);
        }
        Ok(User::try_from(model)?)
    }

    /// Retrieves a user by their ID.
    #[tracing::instrument(skip(self))]
    pub async fn get_user_by_id(&self, id: i32) -> Result<User, UserServiceError> {
        let model = user::Entity::find_by_id(id)
            .one(self.db)
            .await?
            .ok_or(UserServiceError::UserNotFound(id))?;
        Ok(User::try_from(model)?)
    }

    /// Retrieves a user by their username.
    #[tracing::instrument(skip(self))]
    pub async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<User>, UserServiceError> {
        let model = user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(self.db)
            .await?;
        model
            .map(|m| User::try_from(m).map_err(UserServiceError::from))
            .transpose()
    }

    /// Returns the subset of `ids` that exist in the user directory.
    /// Used by the assignment rules to detect unknown assignees.
    #[tracing::instrument(skip(self))]
    pub async fn find_existing_ids(&self, ids: &[i32]) -> Result<HashSet<i32>, UserServiceError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let existing = user::Entity::find()
            .filter(user::Column::Id.is_in(ids.to_vec()))
            .all(self.db)
            .await?
            .into_iter()
            .map(|model| model.id)
            .collect();
        Ok(existing)
    }

    /// Checks if a username is already taken.
    #[tracing::instrument(skip(self))]
    async fn username_exists(&self, username: &str) -> Result<bool, UserServiceError> {
        let existing = user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(self.db)
            .await?;
        Ok(existing.is_some())
    }
}

/// Hashes a plaintext password with argon2id and a fresh salt.
fn hash_password(password: &str) -> Result<String, UserServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| UserServiceError::PasswordHash(err.to_string()))?;
    Ok(hash.to_string())
}

/// Verifies a plaintext password against a stored argon2 hash.
/// A malformed stored hash counts as a failed verification.
fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

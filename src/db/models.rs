//! Database Models - structs representing database tables (used by sqlx/serde).
//!
//! The API serializes these directly, so field names double as the JSON
//! contract shared with [`crate::client`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use sqlx::FromRow;

use crate::canvas::Grip;

/// User model
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// New user for insertion
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub password_hash: String,
}

/// Public view of a user, never carries the password hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
        }
    }
}

/// Refresh token model. Only the SHA-256 hash of the token is stored.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl RefreshToken {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}

/// New refresh token for insertion
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

/// Component catalog entry
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Component {
    pub id: i64,
    pub s_no: String,
    pub parent: String,
    pub name: String,
    pub legend: String,
    pub suffix: String,
    pub object: String,
    pub svg: Option<String>,
    pub png: Option<String>,
    pub grips: Value,
    pub created_at: DateTime<Utc>,
}

impl Component {
    /// Grip points declared for this component, or the default left/right
    /// pair when none are declared or the metadata is not a grip list.
    pub fn grip_points(&self) -> Vec<Grip> {
        match serde_json::from_value::<Vec<Grip>>(self.grips.clone()) {
            Ok(grips) if !grips.is_empty() => grips,
            _ => Grip::default_pair(),
        }
    }
}

/// New component for insertion
#[derive(Debug, Clone, Default)]
pub struct NewComponent {
    pub s_no: String,
    pub parent: String,
    pub name: String,
    pub legend: String,
    pub suffix: String,
    pub object: String,
    pub svg: Option<String>,
    pub png: Option<String>,
    pub grips: Value,
}

/// Project metadata, everything but the canvas document
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Full project: metadata plus the opaque canvas state document.
///
/// The canvas is held as raw JSON text so it is returned exactly as it was
/// saved, number spelling included.
#[derive(Debug, Clone)]
pub struct Project {
    pub summary: ProjectSummary,
    pub canvas_state: Box<RawValue>,
}

/// New project for insertion
#[derive(Debug, Clone)]
pub struct NewProject {
    pub user_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    pub canvas_state: Box<RawValue>,
}

/// Project update; `None` leaves the stored value untouched
#[derive(Debug, Clone, Default)]
pub struct ProjectChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    pub canvas_state: Option<Box<RawValue>>,
}

impl ProjectChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.thumbnail.is_none()
            && self.canvas_state.is_none()
    }
}

//! Storage trait implemented by the Postgres and in-memory backends.

use std::time::Duration;

use super::error::StoreError;
use super::models::{
    Component, NewComponent, NewProject, NewRefreshToken, NewUser, Project, ProjectChanges,
    ProjectSummary, RefreshToken, User,
};

/// Project lookups are always scoped to the owning user: a project that
/// belongs to someone else is indistinguishable from a missing one.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Round-trip to the backend, returning its latency
    async fn ping(&self) -> Result<Duration, StoreError>;

    /// Fails with [`StoreError::Conflict`] when the username is taken
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn find_user(&self, id: i64) -> Result<Option<User>, StoreError>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn insert_refresh_token(&self, token: NewRefreshToken) -> Result<(), StoreError>;

    async fn find_refresh_token(&self, token_hash: &str)
        -> Result<Option<RefreshToken>, StoreError>;

    /// Revoke a token that is still usable. Returns `false` when it is
    /// unknown, already revoked or expired, so of two concurrent callers
    /// presenting the same token only one sees `true`.
    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<bool, StoreError>;

    async fn revoke_user_refresh_tokens(&self, user_id: i64) -> Result<(), StoreError>;

    /// Delete revoked and expired refresh tokens, returning how many went
    async fn purge_refresh_tokens(&self) -> Result<u64, StoreError>;

    /// Ordered by serial number, then id
    async fn list_components(&self) -> Result<Vec<Component>, StoreError>;

    async fn get_component(&self, id: i64) -> Result<Option<Component>, StoreError>;

    async fn create_component(&self, component: NewComponent) -> Result<Component, StoreError>;

    /// Most recently updated first
    async fn list_projects(&self, user_id: i64) -> Result<Vec<ProjectSummary>, StoreError>;

    async fn create_project(&self, project: NewProject) -> Result<Project, StoreError>;

    async fn get_project(&self, user_id: i64, id: i64) -> Result<Option<Project>, StoreError>;

    /// Overwrites the fields present in `changes` and bumps `updated_at`.
    /// Returns `None` when the project does not exist for this user.
    async fn update_project(
        &self,
        user_id: i64,
        id: i64,
        changes: ProjectChanges,
    ) -> Result<Option<Project>, StoreError>;

    /// Returns `false` when nothing was deleted
    async fn delete_project(&self, user_id: i64, id: i64) -> Result<bool, StoreError>;
}

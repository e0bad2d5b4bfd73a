//! PostgreSQL store backed by a shared `sqlx` pool.
//!
//! Canvas state lives in a TEXT column holding the exact JSON text the client
//! sent. It goes in and comes out as a `RawValue`, never through `Value`, so
//! whitespace, key order and number spelling are all returned unchanged.

use serde_json::value::RawValue;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::StoreError;
use super::models::{
    Component, NewComponent, NewProject, NewRefreshToken, NewUser, Project, ProjectChanges,
    ProjectSummary, RefreshToken, User,
};
use super::store::Store;

const PROJECT_COLUMNS: &str =
    "id, name, description, thumbnail, user_id, created_at, updated_at, canvas_state";

const COMPONENT_COLUMNS: &str =
    "id, s_no, parent, name, legend, suffix, object, svg, png, grips, created_at";

#[derive(FromRow)]
struct ProjectRow {
    #[sqlx(flatten)]
    summary: ProjectSummary,
    canvas_state: String,
}

impl TryFrom<ProjectRow> for Project {
    type Error = StoreError;

    fn try_from(row: ProjectRow) -> Result<Self, Self::Error> {
        Ok(Project {
            summary: row.summary,
            canvas_state: RawValue::from_string(row.canvas_state)?,
        })
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<Duration, StoreError> {
        let start = Instant::now();
        sqlx::query("SELECT 1").execute(self.pool.as_ref()).await?;
        Ok(start.elapsed())
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash, created_at)
            VALUES ($1, $2, $3, now())
            RETURNING id, username, email, password_hash, created_at
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(row)
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(row)
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(row)
    }

    async fn insert_refresh_token(&self, token: NewRefreshToken) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, StoreError> {
        let row = sqlx::query_as::<_, RefreshToken>(
            r#"
            SELECT user_id, token_hash, expires_at, revoked
            FROM refresh_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(row)
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = true
            WHERE token_hash = $1 AND revoked = false AND expires_at > now()
            "#,
        )
        .bind(token_hash)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn purge_refresh_tokens(&self) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM refresh_tokens WHERE revoked = true OR expires_at <= now()")
                .execute(self.pool.as_ref())
                .await?;
        Ok(result.rows_affected())
    }

    async fn revoke_user_refresh_tokens(&self, user_id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE refresh_tokens SET revoked = true WHERE user_id = $1")
            .bind(user_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    async fn list_components(&self) -> Result<Vec<Component>, StoreError> {
        let rows = sqlx::query_as::<_, Component>(&format!(
            "SELECT {} FROM components ORDER BY s_no, id",
            COMPONENT_COLUMNS
        ))
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows)
    }

    async fn get_component(&self, id: i64) -> Result<Option<Component>, StoreError> {
        let row = sqlx::query_as::<_, Component>(&format!(
            "SELECT {} FROM components WHERE id = $1",
            COMPONENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(row)
    }

    async fn create_component(&self, component: NewComponent) -> Result<Component, StoreError> {
        let row = sqlx::query_as::<_, Component>(&format!(
            r#"
            INSERT INTO components (s_no, parent, name, legend, suffix, object, svg, png, grips, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
            RETURNING {}
            "#,
            COMPONENT_COLUMNS
        ))
        .bind(&component.s_no)
        .bind(&component.parent)
        .bind(&component.name)
        .bind(&component.legend)
        .bind(&component.suffix)
        .bind(&component.object)
        .bind(&component.svg)
        .bind(&component.png)
        .bind(&component.grips)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(row)
    }

    async fn list_projects(&self, user_id: i64) -> Result<Vec<ProjectSummary>, StoreError> {
        let rows = sqlx::query_as::<_, ProjectSummary>(
            r#"
            SELECT id, name, description, thumbnail, user_id, created_at, updated_at
            FROM projects
            WHERE user_id = $1
            ORDER BY updated_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows)
    }

    async fn create_project(&self, project: NewProject) -> Result<Project, StoreError> {
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            r#"
            INSERT INTO projects (user_id, name, description, thumbnail, canvas_state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, now(), now())
            RETURNING {}
            "#,
            PROJECT_COLUMNS
        ))
        .bind(project.user_id)
        .bind(&project.name)
        .bind(&project.description)
        .bind(&project.thumbnail)
        .bind(project.canvas_state.get())
        .fetch_one(self.pool.as_ref())
        .await?;
        row.try_into()
    }

    async fn get_project(&self, user_id: i64, id: i64) -> Result<Option<Project>, StoreError> {
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {} FROM projects WHERE id = $1 AND user_id = $2",
            PROJECT_COLUMNS
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;
        row.map(Project::try_from).transpose()
    }

    async fn update_project(
        &self,
        user_id: i64,
        id: i64,
        changes: ProjectChanges,
    ) -> Result<Option<Project>, StoreError> {
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            r#"
            UPDATE projects
            SET name = COALESCE($3, name),
                description = COALESCE($4, description),
                thumbnail = COALESCE($5, thumbnail),
                canvas_state = COALESCE($6, canvas_state),
                updated_at = now()
            WHERE id = $1 AND user_id = $2
            RETURNING {}
            "#,
            PROJECT_COLUMNS
        ))
        .bind(id)
        .bind(user_id)
        .bind(&changes.name)
        .bind(&changes.description)
        .bind(&changes.thumbnail)
        .bind(changes.canvas_state.as_deref().map(RawValue::get))
        .fetch_optional(self.pool.as_ref())
        .await?;
        row.map(Project::try_from).transpose()
    }

    async fn delete_project(&self, user_id: i64, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM projects WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

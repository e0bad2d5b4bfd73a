//! In-memory store, used when no `DATABASE_URL` is configured and by tests.
//! Contents are lost on restart.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::error::StoreError;
use super::models::{
    Component, NewComponent, NewProject, NewRefreshToken, NewUser, Project, ProjectChanges,
    ProjectSummary, RefreshToken, User,
};
use super::store::Store;

#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    refresh_tokens: HashMap<String, RefreshToken>,
    components: BTreeMap<i64, Component>,
    projects: BTreeMap<i64, Project>,
    last_user_id: i64,
    last_component_id: i64,
    last_project_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<Duration, StoreError> {
        let start = Instant::now();
        let _tables = self.tables.read().await;
        Ok(start.elapsed())
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict(format!(
                "username '{}' already exists",
                user.username
            )));
        }
        tables.last_user_id += 1;
        let row = User {
            id: tables.last_user_id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            created_at: Utc::now(),
        };
        tables.users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn insert_refresh_token(&self, token: NewRefreshToken) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.refresh_tokens.contains_key(&token.token_hash) {
            return Err(StoreError::Conflict("refresh token already exists".into()));
        }
        tables.refresh_tokens.insert(
            token.token_hash.clone(),
            RefreshToken {
                user_id: token.user_id,
                token_hash: token.token_hash,
                expires_at: token.expires_at,
                revoked: false,
            },
        );
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.refresh_tokens.get(token_hash).cloned())
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.refresh_tokens.get_mut(token_hash) {
            Some(token) if token.is_usable(Utc::now()) => {
                token.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_user_refresh_tokens(&self, user_id: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        for token in tables.refresh_tokens.values_mut() {
            if token.user_id == user_id {
                token.revoked = true;
            }
        }
        Ok(())
    }

    async fn purge_refresh_tokens(&self) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let before = tables.refresh_tokens.len();
        tables.refresh_tokens.retain(|_, token| token.is_usable(now));
        Ok((before - tables.refresh_tokens.len()) as u64)
    }

    async fn list_components(&self) -> Result<Vec<Component>, StoreError> {
        let tables = self.tables.read().await;
        let mut components: Vec<Component> = tables.components.values().cloned().collect();
        components.sort_by(|a, b| a.s_no.cmp(&b.s_no).then(a.id.cmp(&b.id)));
        Ok(components)
    }

    async fn get_component(&self, id: i64) -> Result<Option<Component>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.components.get(&id).cloned())
    }

    async fn create_component(&self, component: NewComponent) -> Result<Component, StoreError> {
        let mut tables = self.tables.write().await;
        tables.last_component_id += 1;
        let row = Component {
            id: tables.last_component_id,
            s_no: component.s_no,
            parent: component.parent,
            name: component.name,
            legend: component.legend,
            suffix: component.suffix,
            object: component.object,
            svg: component.svg,
            png: component.png,
            grips: component.grips,
            created_at: Utc::now(),
        };
        tables.components.insert(row.id, row.clone());
        Ok(row)
    }

    async fn list_projects(&self, user_id: i64) -> Result<Vec<ProjectSummary>, StoreError> {
        let tables = self.tables.read().await;
        let mut projects: Vec<ProjectSummary> = tables
            .projects
            .values()
            .filter(|p| p.summary.user_id == user_id)
            .map(|p| p.summary.clone())
            .collect();
        projects.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(projects)
    }

    async fn create_project(&self, project: NewProject) -> Result<Project, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&project.user_id) {
            return Err(StoreError::NotFound {
                entity: "User",
                id: project.user_id.to_string(),
            });
        }
        tables.last_project_id += 1;
        let now = Utc::now();
        let row = Project {
            summary: ProjectSummary {
                id: tables.last_project_id,
                name: project.name,
                description: project.description,
                thumbnail: project.thumbnail,
                user_id: project.user_id,
                created_at: now,
                updated_at: now,
            },
            canvas_state: project.canvas_state,
        };
        tables.projects.insert(row.summary.id, row.clone());
        Ok(row)
    }

    async fn get_project(&self, user_id: i64, id: i64) -> Result<Option<Project>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .projects
            .get(&id)
            .filter(|p| p.summary.user_id == user_id)
            .cloned())
    }

    async fn update_project(
        &self,
        user_id: i64,
        id: i64,
        changes: ProjectChanges,
    ) -> Result<Option<Project>, StoreError> {
        let mut tables = self.tables.write().await;
        let project = match tables.projects.get_mut(&id) {
            Some(p) if p.summary.user_id == user_id => p,
            _ => return Ok(None),
        };
        if let Some(name) = changes.name {
            project.summary.name = name;
        }
        if let Some(description) = changes.description {
            project.summary.description = Some(description);
        }
        if let Some(thumbnail) = changes.thumbnail {
            project.summary.thumbnail = Some(thumbnail);
        }
        if let Some(canvas_state) = changes.canvas_state {
            project.canvas_state = canvas_state;
        }
        project.summary.updated_at = Utc::now();
        Ok(Some(project.clone()))
    }

    async fn delete_project(&self, user_id: i64, id: i64) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let owned = tables
            .projects
            .get(&id)
            .is_some_and(|p| p.summary.user_id == user_id);
        if owned {
            tables.projects.remove(&id);
        }
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serde_json::value::RawValue;

    async fn store_with_user(username: &str) -> (MemoryStore, User) {
        let store = MemoryStore::new();
        let user = store
            .create_user(NewUser {
                username: username.to_string(),
                email: None,
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap();
        (store, user)
    }

    fn new_project(user_id: i64, name: &str) -> NewProject {
        NewProject {
            user_id,
            name: name.to_string(),
            description: None,
            thumbnail: None,
            canvas_state: serde_json::value::to_raw_value(&crate::canvas::default_canvas_state())
                .unwrap(),
        }
    }

    async fn insert_token(store: &MemoryStore, user_id: i64, hash: &str, days: i64) {
        store
            .insert_refresh_token(NewRefreshToken {
                user_id,
                token_hash: hash.to_string(),
                expires_at: Utc::now() + chrono::Duration::days(days),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let (store, _) = store_with_user("alice").await;
        let err = store
            .create_user(NewUser {
                username: "alice".to_string(),
                email: None,
                password_hash: "other".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_projects_are_scoped_to_owner() {
        let (store, alice) = store_with_user("alice").await;
        let bob = store
            .create_user(NewUser {
                username: "bob".to_string(),
                email: None,
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap();

        let project = store.create_project(new_project(alice.id, "Plant")).await.unwrap();
        let id = project.summary.id;

        assert!(store.get_project(bob.id, id).await.unwrap().is_none());
        assert!(store.list_projects(bob.id).await.unwrap().is_empty());
        assert!(!store.delete_project(bob.id, id).await.unwrap());
        assert!(store
            .update_project(bob.id, id, ProjectChanges::default())
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.list_projects(alice.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_overwrites_only_present_fields() {
        let (store, alice) = store_with_user("alice").await;
        let mut new = new_project(alice.id, "Plant");
        new.description = Some("first".to_string());
        let project = store.create_project(new).await.unwrap();

        let canvas = r#"{"items": [], "connections": [], "sequence_counter": 9, "zoom": 1.50}"#;
        let updated = store
            .update_project(
                alice.id,
                project.summary.id,
                ProjectChanges {
                    canvas_state: Some(RawValue::from_string(canvas.to_string()).unwrap()),
                    ..ProjectChanges::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.summary.name, "Plant");
        assert_eq!(updated.summary.description.as_deref(), Some("first"));
        assert_eq!(updated.canvas_state.get(), canvas);
        assert!(updated.summary.updated_at >= project.summary.updated_at);
    }

    #[tokio::test]
    async fn test_revoke_user_refresh_tokens() {
        let (store, alice) = store_with_user("alice").await;
        for hash in ["a", "b"] {
            insert_token(&store, alice.id, hash, 1).await;
        }
        store.revoke_user_refresh_tokens(alice.id).await.unwrap();
        let token = store.find_refresh_token("b").await.unwrap().unwrap();
        assert!(token.revoked);
        assert!(!token.is_usable(Utc::now()));
    }

    #[tokio::test]
    async fn test_refresh_token_can_only_be_revoked_once() {
        let (store, alice) = store_with_user("alice").await;
        insert_token(&store, alice.id, "live", 1).await;
        insert_token(&store, alice.id, "stale", -1).await;

        assert!(store.revoke_refresh_token("live").await.unwrap());
        assert!(!store.revoke_refresh_token("live").await.unwrap());
        assert!(!store.revoke_refresh_token("stale").await.unwrap());
        assert!(!store.revoke_refresh_token("unknown").await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_drops_revoked_and_expired_tokens() {
        let (store, alice) = store_with_user("alice").await;
        insert_token(&store, alice.id, "live", 1).await;
        insert_token(&store, alice.id, "used", 1).await;
        insert_token(&store, alice.id, "stale", -1).await;
        store.revoke_refresh_token("used").await.unwrap();

        assert_eq!(store.purge_refresh_tokens().await.unwrap(), 2);
        assert!(store.find_refresh_token("live").await.unwrap().is_some());
        assert!(store.find_refresh_token("used").await.unwrap().is_none());
        assert!(store.find_refresh_token("stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_components_sorted_by_serial_number() {
        let store = MemoryStore::new();
        for s_no in ["2", "1"] {
            store
                .create_component(NewComponent {
                    s_no: s_no.to_string(),
                    name: format!("C{}", s_no),
                    grips: json!([]),
                    ..NewComponent::default()
                })
                .await
                .unwrap();
        }
        let names: Vec<String> = store
            .list_components()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["C1", "C2"]);
    }
}

//! HTTP client for the PFD API.
//!
//! Wraps a `reqwest::Client` plus the session tokens obtained at login. Every
//! call is a single request with no retries; any non-2xx response becomes
//! [`ClientError::Api`].

pub mod error;

pub use error::ClientError;

use reqwest::{multipart, Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::{to_raw_value, RawValue};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::canvas::CanvasState;
use crate::db::models::{Component, ProjectSummary, UserInfo};
use crate::export::{DiagramExport, EquipmentRow};
use crate::routes::auth::TokenPair;
use crate::routes::projects::{
    CreateProjectRequest, EquipmentListResponse, UpdateProjectRequest,
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Whole-request timeout; reqwest's defaults apply when `None`
    pub timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: None,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Session {
    access: Option<String>,
    refresh: Option<String>,
}

/// Project metadata plus its canvas state document, as returned by detail,
/// update and patch calls. The canvas is the exact text the server stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDetail {
    pub project: ProjectSummary,
    pub canvas_state: Box<RawValue>,
}

impl ProjectDetail {
    /// Typed view of the canvas state
    pub fn canvas(&self) -> Result<CanvasState, serde_json::Error> {
        serde_json::from_str(self.canvas_state.get())
    }

    pub fn canvas_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(self.canvas_state.get())
    }
}

/// Component form for [`ApiClient::upload_component`]
#[derive(Debug, Clone, Default)]
pub struct NewComponentUpload {
    pub s_no: String,
    pub parent: String,
    pub name: String,
    pub legend: String,
    pub suffix: String,
    pub object: String,
    pub grips: Value,
    pub svg: Option<Vec<u8>>,
    pub png: Option<Vec<u8>>,
}

impl NewComponentUpload {
    fn into_form(self) -> Result<multipart::Form, ClientError> {
        let grips = if self.grips.is_null() {
            "[]".to_string()
        } else {
            serde_json::to_string(&self.grips)?
        };

        let mut form = multipart::Form::new()
            .text("s_no", self.s_no)
            .text("parent", self.parent)
            .text("name", self.name)
            .text("legend", self.legend)
            .text("suffix", self.suffix)
            .text("object", self.object)
            .text("grips", grips);

        if let Some(bytes) = self.svg {
            let part = multipart::Part::bytes(bytes)
                .file_name("component.svg")
                .mime_str("image/svg+xml")?;
            form = form.part("svg", part);
        }
        if let Some(bytes) = self.png {
            let part = multipart::Part::bytes(bytes)
                .file_name("component.png")
                .mime_str("image/png")?;
            form = form.part("png", part);
        }
        Ok(form)
    }
}

#[derive(Deserialize)]
struct UserEnvelope {
    user: UserInfo,
}

#[derive(Deserialize)]
struct ComponentsEnvelope {
    components: Vec<Component>,
}

#[derive(Deserialize)]
struct ComponentEnvelope {
    component: Component,
}

#[derive(Deserialize)]
struct ProjectEnvelope {
    project: ProjectSummary,
}

pub struct ApiClient {
    http: Client,
    base_url: String,
    session: RwLock<Session>,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session: RwLock::new(Session::default()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn access_token(&self) -> Option<String> {
        self.session.read().await.access.clone()
    }

    /// Use an access token obtained elsewhere, e.g. restored from disk
    pub async fn set_access_token(&self, token: impl Into<String>) {
        self.session.write().await.access = Some(token.into());
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{}", self.base_url, path))
    }

    /// Attach the bearer token when one is held, send, and return the body of
    /// a successful response.
    async fn send(&self, request: RequestBuilder) -> Result<String, ClientError> {
        let request = match self.access_token().await {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::debug!(status = %status, "API request failed: {}", body);
            return Err(ClientError::from_response(status, &body));
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let body = self.send(request).await?;
        serde_json::from_str(&body).map_err(|e| {
            tracing::error!("Failed to parse response as JSON: {}", e);
            ClientError::Decode(e)
        })
    }

    async fn store_tokens(&self, tokens: &TokenPair) {
        let mut session = self.session.write().await;
        session.access = Some(tokens.access.clone());
        session.refresh = Some(tokens.refresh.clone());
    }

    // ------------------------------------------------------------------
    // Auth
    // ------------------------------------------------------------------

    pub async fn register(
        &self,
        username: &str,
        email: Option<&str>,
        password: &str,
    ) -> Result<UserInfo, ClientError> {
        let request = self
            .request(Method::POST, "/api/auth/register/")
            .json(&json!({"username": username, "email": email, "password": password}));
        let envelope: UserEnvelope = self.send_json(request).await?;
        Ok(envelope.user)
    }

    /// Log in and keep both tokens for subsequent calls
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair, ClientError> {
        let request = self
            .request(Method::POST, "/api/auth/login/")
            .json(&json!({"username": username, "password": password}));
        let tokens: TokenPair = self.send_json(request).await?;
        self.store_tokens(&tokens).await;
        tracing::info!("Logged in as {}", username);
        Ok(tokens)
    }

    /// Exchange the held refresh token for a new pair
    pub async fn refresh(&self) -> Result<TokenPair, ClientError> {
        let refresh = self
            .session
            .read()
            .await
            .refresh
            .clone()
            .ok_or(ClientError::NotAuthenticated("no refresh token held"))?;

        let request = self
            .request(Method::POST, "/api/auth/refresh/")
            .json(&json!({ "refresh": refresh }));
        let tokens: TokenPair = self.send_json(request).await?;
        self.store_tokens(&tokens).await;
        Ok(tokens)
    }

    /// Ask the server to revoke the session, then forget the tokens locally
    /// whatever the outcome.
    pub async fn logout(&self) {
        let refresh = self.session.read().await.refresh.clone();
        let request = self
            .request(Method::POST, "/api/auth/logout/")
            .json(&json!({ "refresh": refresh }));
        if let Err(e) = self.send(request).await {
            tracing::warn!("Server-side logout failed: {}", e);
        }
        *self.session.write().await = Session::default();
    }

    // ------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------

    pub async fn fetch_components(&self) -> Result<Vec<Component>, ClientError> {
        let envelope: ComponentsEnvelope = self
            .send_json(self.request(Method::GET, "/api/components/"))
            .await?;
        Ok(envelope.components)
    }

    pub async fn upload_component(
        &self,
        component: NewComponentUpload,
    ) -> Result<Component, ClientError> {
        let request = self
            .request(Method::POST, "/api/components/")
            .multipart(component.into_form()?);
        let envelope: ComponentEnvelope = self.send_json(request).await?;
        Ok(envelope.component)
    }

    // ------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------

    /// List the caller's projects. A body that is not an object carrying a
    /// `projects` array is logged and treated as an empty list.
    pub async fn fetch_projects(&self) -> Result<Vec<ProjectSummary>, ClientError> {
        let body = self.send(self.request(Method::GET, "/api/project/")).await?;
        Ok(parse_project_list(&body))
    }

    pub async fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<ProjectSummary, ClientError> {
        let payload = CreateProjectRequest {
            name: name.to_string(),
            description: description.map(str::to_string),
            thumbnail: None,
            canvas_state: None,
        };
        let request = self.request(Method::POST, "/api/project/").json(&payload);
        let envelope: ProjectEnvelope = self.send_json(request).await?;
        Ok(envelope.project)
    }

    pub async fn get_project(&self, id: i64) -> Result<ProjectDetail, ClientError> {
        self.send_json(self.request(Method::GET, &project_path(id)))
            .await
    }

    /// Overwrite project metadata (PUT). `None` fields are left unchanged.
    pub async fn update_project_meta(
        &self,
        id: i64,
        name: Option<&str>,
        description: Option<&str>,
        thumbnail: Option<&str>,
    ) -> Result<ProjectDetail, ClientError> {
        let payload = UpdateProjectRequest {
            name: name.map(str::to_string),
            description: description.map(str::to_string),
            thumbnail: thumbnail.map(str::to_string),
            canvas_state: None,
        };
        let request = self.request(Method::PUT, &project_path(id)).json(&payload);
        self.send_json(request).await
    }

    /// Replace the stored canvas state (PATCH); the last save wins. Pass a
    /// `RawValue` to have the exact text stored.
    pub async fn save_canvas_state<T>(
        &self,
        id: i64,
        canvas_state: &T,
    ) -> Result<ProjectDetail, ClientError>
    where
        T: Serialize + ?Sized,
    {
        let payload = UpdateProjectRequest {
            canvas_state: Some(to_raw_value(canvas_state)?),
            ..UpdateProjectRequest::default()
        };
        let request = self.request(Method::PATCH, &project_path(id)).json(&payload);
        self.send_json(request).await
    }

    /// The project's diagram as a `.pfd` document
    pub async fn export_project(&self, id: i64) -> Result<DiagramExport, ClientError> {
        let path = format!("{}export/", project_path(id));
        self.send_json(self.request(Method::GET, &path)).await
    }

    pub async fn equipment_list(&self, id: i64) -> Result<Vec<EquipmentRow>, ClientError> {
        let path = format!("{}equipment/", project_path(id));
        let envelope: EquipmentListResponse = self.send_json(self.request(Method::GET, &path)).await?;
        Ok(envelope.equipment)
    }

    /// Create a project from the text of a `.pfd` file, current or legacy
    /// layout. `name` defaults to the project name recorded in the file.
    pub async fn import_project(
        &self,
        pfd: &str,
        name: Option<&str>,
    ) -> Result<ProjectSummary, ClientError> {
        let export = DiagramExport::from_json(pfd)?;
        let name = name
            .map(str::to_string)
            .or_else(|| export.project.as_ref().map(|p| p.name.clone()))
            .filter(|n| !n.trim().is_empty())
            .ok_or(ClientError::Import("diagram file names no project"))?;

        let payload = CreateProjectRequest {
            name,
            description: None,
            thumbnail: None,
            canvas_state: Some(to_raw_value(&export.into_canvas_state())?),
        };
        let request = self.request(Method::POST, "/api/project/").json(&payload);
        let envelope: ProjectEnvelope = self.send_json(request).await?;
        tracing::info!(project_id = envelope.project.id, "Project imported");
        Ok(envelope.project)
    }

    pub async fn delete_project(&self, id: i64) -> Result<(), ClientError> {
        self.send(self.request(Method::DELETE, &project_path(id)))
            .await?;
        tracing::info!(project_id = id, "Project deleted");
        Ok(())
    }
}

fn project_path(id: i64) -> String {
    format!("/api/project/{}/", id)
}

fn parse_project_list(body: &str) -> Vec<ProjectSummary> {
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Project list response is not JSON ({}); treating as empty", e);
            return Vec::new();
        }
    };

    match value.get("projects").filter(|p| p.is_array()) {
        Some(projects) => match serde_json::from_value(projects.clone()) {
            Ok(projects) => projects,
            Err(e) => {
                tracing::warn!("Malformed project entries ({}); treating as empty", e);
                Vec::new()
            }
        },
        None => {
            tracing::warn!("Unexpected project list shape: {}", value);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_app;
    use crate::test_utils::test_state;
    use axum::{routing::get, Json, Router};
    use tempfile::TempDir;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn spawn_server() -> (ApiClient, TempDir) {
        let (state, media) = test_state();
        let base_url = serve(create_app(state)).await;
        let client = ApiClient::new(ClientConfig {
            base_url,
            timeout: Some(Duration::from_secs(10)),
        })
        .unwrap();
        (client, media)
    }

    async fn logged_in_client() -> (ApiClient, TempDir) {
        let (client, media) = spawn_server().await;
        client
            .register("operator", Some("operator@example.com"), "operator-pass")
            .await
            .unwrap();
        client.login("operator", "operator-pass").await.unwrap();
        (client, media)
    }

    #[test]
    fn test_parse_project_list_degrades_to_empty() {
        assert!(parse_project_list("not json").is_empty());
        assert!(parse_project_list(r#"{"foo": 1}"#).is_empty());
        assert!(parse_project_list(r#"{"projects": "nope"}"#).is_empty());
        assert!(parse_project_list(r#"[]"#).is_empty());
    }

    #[tokio::test]
    async fn test_fetch_projects_malformed_shape_returns_empty() {
        let app = Router::new().route(
            "/api/project/",
            get(|| async { Json(json!({"foo": 1})) }),
        );
        let client = ApiClient::new(ClientConfig::new(serve(app).await)).unwrap();
        assert!(client.fetch_projects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_projects_without_login_is_api_error() {
        let (client, _media) = spawn_server().await;
        let err = client.fetch_projects().await.unwrap_err();
        assert_eq!(err.status(), Some(401));
    }

    #[tokio::test]
    async fn test_project_lifecycle() {
        let (client, _media) = logged_in_client().await;

        let created = client
            .create_project("Distillation", Some("Column train"))
            .await
            .unwrap();
        let listed = client.fetch_projects().await.unwrap();
        assert_eq!(listed, vec![created.clone()]);

        let detail = client.get_project(created.id).await.unwrap();
        assert_eq!(detail.project.name, "Distillation");
        assert_eq!(detail.canvas().unwrap(), CanvasState::default());

        let renamed = client
            .update_project_meta(created.id, Some("Distillation v2"), None, None)
            .await
            .unwrap();
        assert_eq!(renamed.project.name, "Distillation v2");
        assert_eq!(renamed.project.description.as_deref(), Some("Column train"));

        let canvas = json!({
            "items": [{"id": 1, "component": {"id": 3}, "label": "T-100", "x": 10, "y": 20}],
            "connections": [],
            "sequence_counter": 1
        });
        client.save_canvas_state(created.id, &canvas).await.unwrap();
        let saved = client.get_project(created.id).await.unwrap();
        assert_eq!(saved.canvas_value().unwrap(), canvas);
        assert_eq!(saved.canvas().unwrap().items[0].label, "T-100");

        client.delete_project(created.id).await.unwrap();
        let err = client.get_project(created.id).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, ClientError::Api { ref message, .. } if message == "Project not found"));
    }

    #[tokio::test]
    async fn test_raw_canvas_text_is_stored_verbatim() {
        let (client, _media) = logged_in_client().await;
        let created = client.create_project("Exact", None).await.unwrap();

        let text = r#"{"items":[],"connections":[],"sequence_counter":0,"scale":1.50}"#;
        let raw = RawValue::from_string(text.to_string()).unwrap();
        let saved = client.save_canvas_state(created.id, &raw).await.unwrap();
        assert_eq!(saved.canvas_state.get(), text);
        assert_eq!(client.get_project(created.id).await.unwrap().canvas_state.get(), text);
    }

    #[tokio::test]
    async fn test_export_import_and_equipment_list() {
        let (client, _media) = logged_in_client().await;
        let created = client.create_project("Pump Loop", None).await.unwrap();
        let canvas = json!({
            "items": [
                {"id": 1, "label": "P-101", "component": {"id": 1, "name": "Pump"}},
                {"id": 2, "label": "E-101", "component": {"id": 2, "name": "Heat Exchanger"}}
            ],
            "connections": [{
                "id": 1, "sourceItemId": 1, "sourceGripIndex": 1,
                "targetItemId": 2, "targetGripIndex": 0
            }],
            "sequence_counter": 2
        });
        client.save_canvas_state(created.id, &canvas).await.unwrap();

        let rows = client.equipment_list(created.id).await.unwrap();
        let tags: Vec<&str> = rows.iter().map(|r| r.tag_number.as_str()).collect();
        assert_eq!(tags, vec!["E-101", "P-101"]);

        let export = client.export_project(created.id).await.unwrap();
        let pfd = export.to_json_pretty().unwrap();
        let imported = client.import_project(&pfd, None).await.unwrap();
        assert_eq!(imported.name, "Pump Loop");
        assert_ne!(imported.id, created.id);

        let copy = client.get_project(imported.id).await.unwrap().canvas().unwrap();
        let original = client.get_project(created.id).await.unwrap().canvas().unwrap();
        assert_eq!(copy, original);

        let legacy = r#"{"components": [{"id": 0, "config": {"default_label": "T-1"}}]}"#;
        assert!(matches!(
            client.import_project(legacy, None).await,
            Err(ClientError::Import(_))
        ));
        let tank = client.import_project(legacy, Some("Tank")).await.unwrap();
        assert_eq!(tank.name, "Tank");
    }

    #[tokio::test]
    async fn test_refresh_and_logout() {
        let (client, _media) = logged_in_client().await;
        let before = client.access_token().await.unwrap();

        let rotated = client.refresh().await.unwrap();
        assert_eq!(client.access_token().await, Some(rotated.access));
        assert!(!before.is_empty());

        client.set_access_token("restored-token").await;
        assert_eq!(client.access_token().await.as_deref(), Some("restored-token"));

        client.logout().await;
        assert!(client.access_token().await.is_none());
        assert!(matches!(
            client.refresh().await,
            Err(ClientError::NotAuthenticated(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_and_fetch_components() {
        let (client, _media) = logged_in_client().await;

        let component = client
            .upload_component(NewComponentUpload {
                s_no: "7".to_string(),
                parent: "Vessels".to_string(),
                name: "Drum".to_string(),
                legend: "D".to_string(),
                grips: json!([{"x": 50, "y": 0, "side": "top"}]),
                svg: Some(br#"<svg xmlns="http://www.w3.org/2000/svg"/>"#.to_vec()),
                ..NewComponentUpload::default()
            })
            .await
            .unwrap();
        assert_eq!(component.name, "Drum");
        assert_eq!(component.grip_points().len(), 1);

        let svg_url = component.svg.clone().unwrap();
        let served = reqwest::get(format!("{}{}", client.base_url(), svg_url))
            .await
            .unwrap();
        assert!(served.status().is_success());

        let components = client.fetch_components().await.unwrap();
        assert_eq!(components, vec![component]);
    }

    #[tokio::test]
    async fn test_register_duplicate_reports_server_message() {
        let (client, _media) = logged_in_client().await;
        let err = client
            .register("operator", None, "operator-pass")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(409));
    }
}

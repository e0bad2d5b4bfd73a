/**
 * Project Routes
 * Per-user CRUD over projects and their canvas state document
 */
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::value::{to_raw_value, RawValue};

use crate::canvas::{default_canvas_state, CanvasState};
use crate::db::error::StoreError;
use crate::db::models::{NewProject, Project, ProjectChanges, ProjectSummary};
use crate::error::ApiError;
use crate::export::{DiagramExport, EquipmentRow, ExportedProject, Viewport};
use crate::routes::auth::AuthUser;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub canvas_state: Option<Box<RawValue>>,
}

/// Body for both PUT and PATCH. Absent or null fields are left unchanged.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct UpdateProjectRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canvas_state: Option<Box<RawValue>>,
}

impl From<UpdateProjectRequest> for ProjectChanges {
    fn from(req: UpdateProjectRequest) -> Self {
        Self {
            name: req.name,
            description: req.description,
            thumbnail: req.thumbnail,
            // JSON null deserializes to None, so a present canvas is never Null
            canvas_state: req.canvas_state,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ProjectListResponse {
    pub projects: Vec<ProjectSummary>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ProjectResponse {
    pub project: ProjectSummary,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ProjectDetailResponse {
    pub project: ProjectSummary,
    pub canvas_state: Box<RawValue>,
}

impl From<Project> for ProjectDetailResponse {
    fn from(project: Project) -> Self {
        Self {
            project: project.summary,
            canvas_state: project.canvas_state,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DeleteResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EquipmentListResponse {
    pub equipment: Vec<EquipmentRow>,
}

fn validate_name(name: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::BadRequest("Project name is required".to_string()));
    }
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/project/
pub async fn list_projects(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ProjectListResponse>, ApiError> {
    let projects = state.store.list_projects(user.id).await?;
    Ok(Json(ProjectListResponse { projects }))
}

/// POST /api/project/
pub async fn create_project(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_name(&payload.name)?;
    let canvas_state = match payload.canvas_state {
        Some(canvas_state) => canvas_state,
        None => to_raw_value(&default_canvas_state()).map_err(StoreError::from)?,
    };

    let project = state
        .store
        .create_project(NewProject {
            user_id: user.id,
            name: payload.name,
            description: payload.description,
            thumbnail: payload.thumbnail,
            canvas_state,
        })
        .await?;

    tracing::info!(
        user_id = user.id,
        project_id = project.summary.id,
        "Project created: {}",
        project.summary.name
    );

    Ok((
        StatusCode::CREATED,
        Json(ProjectResponse {
            project: project.summary,
        }),
    ))
}

/// GET /api/project/{id}/
pub async fn get_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ProjectDetailResponse>, ApiError> {
    let project = state
        .store
        .get_project(user.id, id)
        .await?
        .ok_or_else(ApiError::project_not_found)?;
    Ok(Json(project.into()))
}

/// PUT / PATCH /api/project/{id}/
/// Overwrites every field present in the body; the last write wins.
pub async fn update_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateProjectRequest>,
) -> Result<Json<ProjectDetailResponse>, ApiError> {
    if let Some(name) = &payload.name {
        validate_name(name)?;
    }
    let changes = ProjectChanges::from(payload);
    let touches_canvas = changes.canvas_state.is_some();

    // Nothing to write: answer with the current state and keep updated_at
    let updated = if changes.is_empty() {
        state.store.get_project(user.id, id).await?
    } else {
        state.store.update_project(user.id, id, changes).await?
    };
    let project = updated.ok_or_else(ApiError::project_not_found)?;

    tracing::debug!(
        user_id = user.id,
        project_id = id,
        canvas = touches_canvas,
        "Project updated"
    );

    Ok(Json(project.into()))
}

/// Load an owned project and parse its canvas as a diagram
async fn load_diagram(
    state: &AppState,
    user: &AuthUser,
    id: i64,
) -> Result<(Project, CanvasState), ApiError> {
    let project = state
        .store
        .get_project(user.id, id)
        .await?
        .ok_or_else(ApiError::project_not_found)?;
    let canvas = serde_json::from_str::<CanvasState>(project.canvas_state.get()).map_err(|e| {
        tracing::debug!(project_id = id, "Canvas state is not a diagram: {}", e);
        ApiError::BadRequest("Canvas state is not a valid diagram".to_string())
    })?;
    Ok((project, canvas))
}

/// GET /api/project/{id}/export/
/// The project's diagram as a `.pfd` document.
pub async fn export_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<DiagramExport>, ApiError> {
    let (project, canvas) = load_diagram(&state, &user, id).await?;
    let export = canvas.to_export(ExportedProject::from(&project.summary), Viewport::default());
    tracing::info!(user_id = user.id, project_id = id, "Project exported");
    Ok(Json(export))
}

/// GET /api/project/{id}/equipment/
pub async fn equipment_list(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<EquipmentListResponse>, ApiError> {
    let (_, canvas) = load_diagram(&state, &user, id).await?;
    Ok(Json(EquipmentListResponse {
        equipment: canvas.equipment_list(),
    }))
}

/// DELETE /api/project/{id}/
pub async fn delete_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<DeleteResponse>, ApiError> {
    if !state.store.delete_project(user.id, id).await? {
        return Err(ApiError::project_not_found());
    }

    tracing::info!(user_id = user.id, project_id = id, "Project deleted");

    Ok(Json(DeleteResponse {
        status: "success".to_string(),
        message: "Project deleted successfully".to_string(),
    }))
}

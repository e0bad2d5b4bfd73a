/**
 * Component Routes
 * Catalog of diagram symbols; listing is public, uploads require a login.
 */
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::models::{Component, NewComponent};
use crate::error::ApiError;
use crate::media::{self, MediaKind};
use crate::routes::auth::AuthUser;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentListResponse {
    pub components: Vec<Component>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentResponse {
    pub component: Component,
}

/// Fields collected from the multipart form before anything is written.
#[derive(Default)]
struct ComponentForm {
    component: NewComponent,
    grips: Option<String>,
    svg: Option<Vec<u8>>,
    png: Option<Vec<u8>>,
}

impl ComponentForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = ComponentForm::default();

        while let Some(field) = multipart.next_field().await.map_err(|e| {
            tracing::debug!("Multipart error: {}", e);
            ApiError::BadRequest("Invalid multipart data".to_string())
        })? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "svg" | "png" => {
                    let bytes = field.bytes().await.map_err(|e| {
                        tracing::debug!("Failed to read upload bytes: {}", e);
                        ApiError::BadRequest("Failed to read file data".to_string())
                    })?;
                    // An empty file part means "no file"
                    if bytes.is_empty() {
                        continue;
                    }
                    if name == "svg" {
                        form.svg = Some(bytes.to_vec());
                    } else {
                        form.png = Some(bytes.to_vec());
                    }
                }
                _ => {
                    let text = field.text().await.map_err(|_| {
                        ApiError::BadRequest(format!("Invalid value for field '{}'", name))
                    })?;
                    let c = &mut form.component;
                    match name.as_str() {
                        "s_no" => c.s_no = text,
                        "parent" => c.parent = text,
                        "name" => c.name = text,
                        "legend" => c.legend = text,
                        "suffix" => c.suffix = text,
                        "object" => c.object = text,
                        "grips" => form.grips = Some(text),
                        other => tracing::debug!("Ignoring unknown component field '{}'", other),
                    }
                }
            }
        }

        Ok(form)
    }
}

fn parse_grips(raw: Option<&str>) -> Result<Value, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(Value::Array(Vec::new())),
        Some(text) => serde_json::from_str(text)
            .map_err(|_| ApiError::BadRequest("grips must be valid JSON".to_string())),
    }
}

/// Remove files written for a component that was never recorded
async fn discard_media(media_dir: &std::path::Path, urls: &[String]) {
    for url in urls {
        if let Err(e) = media::remove_component_file(media_dir, url).await {
            tracing::warn!("Failed to remove orphaned media {}: {}", url, e);
        }
    }
}

/// GET /api/components/
pub async fn list_components(
    State(state): State<AppState>,
) -> Result<Json<ComponentListResponse>, ApiError> {
    let components = state.store.list_components().await?;
    Ok(Json(ComponentListResponse { components }))
}

/// GET /api/components/{id}/
pub async fn get_component(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ComponentResponse>, ApiError> {
    let component = state
        .store
        .get_component(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Component not found".to_string()))?;
    Ok(Json(ComponentResponse { component }))
}

/// POST /api/components/
pub async fn create_component(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = ComponentForm::read(multipart).await?;
    let mut component = form.component;

    if component.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Component name is required".to_string()));
    }
    component.grips = parse_grips(form.grips.as_deref())?;

    // Validate both files before writing either
    if let Some(bytes) = &form.svg {
        media::validate(MediaKind::Svg, bytes)?;
    }
    if let Some(bytes) = &form.png {
        media::validate(MediaKind::Png, bytes)?;
    }

    let (svg, png) = (form.svg, form.png);
    let media_dir = &state.config.media_dir;
    let mut written = Vec::new();
    let created = async {
        if let Some(bytes) = &svg {
            let url = media::save_component_file(media_dir, MediaKind::Svg, bytes).await?;
            written.push(url.clone());
            component.svg = Some(url);
        }
        if let Some(bytes) = &png {
            let url = media::save_component_file(media_dir, MediaKind::Png, bytes).await?;
            written.push(url.clone());
            component.png = Some(url);
        }
        Ok::<_, ApiError>(state.store.create_component(component).await?)
    }
    .await;

    let component = match created {
        Ok(component) => component,
        Err(e) => {
            discard_media(media_dir, &written).await;
            return Err(e);
        }
    };
    tracing::info!(
        user_id = user.id,
        component_id = component.id,
        "Component created: {}",
        component.name
    );

    Ok((StatusCode::CREATED, Json(ComponentResponse { component })))
}

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use bytes::Bytes;
use serde_json::json;
use uuid::Uuid;

use crate::controller::{Controller, StateView};
use crate::error::{AppError, AppResult, ControllerError};
use crate::history::Step;
use crate::models::{
    AnimateRequest, ArtifactSummary, EnhanceRequest, ImagesRequest, MediaPayload, ReorderRequest,
    SavePresetRequest, Settings, Upload, WeightRequest,
};
use crate::presets::{PresetStore, PresetSummary};

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    pub presets: Arc<PresetStore>,
    pub max_upload_bytes: usize,
}

pub fn router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/session/reset", post(reset_session))
        .route("/api/plan", put(set_plan).delete(clear_plan))
        .route("/api/styles", post(add_styles))
        .route("/api/styles/reorder", post(reorder_style))
        .route("/api/styles/:index", delete(remove_style))
        .route("/api/styles/:index/weight", put(set_style_weight))
        .route("/api/settings", get(get_settings).put(put_settings))
        .route("/api/render", post(render).delete(discard_render))
        .route("/api/enhance", post(enhance))
        .route("/api/undo", post(undo))
        .route("/api/redo", post(redo))
        .route("/api/error", delete(dismiss_error))
        .route("/api/batch", post(add_to_batch).delete(clear_batch))
        .route("/api/batch/start", post(start_batch))
        .route("/api/batch/:id", delete(remove_from_batch))
        .route("/api/presets", get(list_presets).post(save_preset))
        .route("/api/presets/:name", delete(delete_preset))
        .route("/api/presets/:name/load", post(load_preset))
        .route("/api/images", post(generate_images))
        .route("/api/animate/image", put(set_animate_image))
        .route("/api/animate", post(animate))
        .route("/api/artifacts/:id", get(get_artifact))
        .route("/api/previews/:id", get(get_preview))
        .layer(body_limit)
        .with_state(state)
}

/// Runs a generation on its own task so a dropped connection does not cancel it.
async fn detached<T, F>(work: F) -> AppResult<T>
where
    F: Future<Output = Result<T, ControllerError>> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::spawn(work).await??)
}

pub async fn get_state(State(state): State<AppState>) -> Json<StateView> {
    Json(state.controller.snapshot())
}

pub async fn reset_session(State(state): State<AppState>) -> Json<StateView> {
    state.controller.reset_session();
    Json(state.controller.snapshot())
}

// --- Workspace ---

pub async fn set_plan(State(state): State<AppState>, Json(upload): Json<Upload>) -> AppResult<Json<StateView>> {
    state.controller.set_plan(upload)?;
    Ok(Json(state.controller.snapshot()))
}

pub async fn clear_plan(State(state): State<AppState>) -> Json<StateView> {
    state.controller.clear_plan();
    Json(state.controller.snapshot())
}

pub async fn add_styles(State(state): State<AppState>, Json(uploads): Json<Vec<Upload>>) -> AppResult<Json<StateView>> {
    let count = uploads.len();
    let total = state.controller.add_styles(uploads)?;
    tracing::info!("🎨 Added {} style reference(s), {} in total", count, total);
    Ok(Json(state.controller.snapshot()))
}

pub async fn remove_style(Path(index): Path<usize>, State(state): State<AppState>) -> AppResult<Json<StateView>> {
    state.controller.remove_style(index)?;
    Ok(Json(state.controller.snapshot()))
}

pub async fn set_style_weight(
    Path(index): Path<usize>,
    State(state): State<AppState>,
    Json(body): Json<WeightRequest>,
) -> AppResult<Json<StateView>> {
    state.controller.set_style_weight(index, body.weight)?;
    Ok(Json(state.controller.snapshot()))
}

pub async fn reorder_style(State(state): State<AppState>, Json(body): Json<ReorderRequest>) -> AppResult<Json<StateView>> {
    state.controller.reorder_style(body.from, body.to)?;
    Ok(Json(state.controller.snapshot()))
}

pub async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.controller.settings())
}

pub async fn put_settings(State(state): State<AppState>, Json(settings): Json<Settings>) -> Json<Settings> {
    Json(state.controller.set_settings(settings))
}

pub async fn set_animate_image(State(state): State<AppState>, Json(upload): Json<Upload>) -> AppResult<Json<StateView>> {
    state.controller.set_animate_image(upload)?;
    Ok(Json(state.controller.snapshot()))
}

// --- Generation ---

pub async fn render(State(state): State<AppState>) -> AppResult<Json<ArtifactSummary>> {
    let controller = state.controller.clone();
    let artifact = detached(async move { controller.render().await }).await?;
    Ok(Json(artifact))
}

pub async fn enhance(State(state): State<AppState>, Json(body): Json<EnhanceRequest>) -> AppResult<Json<ArtifactSummary>> {
    let controller = state.controller.clone();
    let artifact = detached(async move { controller.enhance(&body.prompt).await }).await?;
    Ok(Json(artifact))
}

pub async fn undo(State(state): State<AppState>) -> AppResult<Json<StateView>> {
    if let Step::NothingToUndo = state.controller.undo()? {
        tracing::debug!("↩️ Nothing to undo");
    }
    Ok(Json(state.controller.snapshot()))
}

pub async fn redo(State(state): State<AppState>) -> AppResult<Json<StateView>> {
    if let Step::NothingToRedo = state.controller.redo()? {
        tracing::debug!("↪️ Nothing to redo");
    }
    Ok(Json(state.controller.snapshot()))
}

pub async fn discard_render(State(state): State<AppState>) -> Json<StateView> {
    state.controller.discard_render();
    Json(state.controller.snapshot())
}

pub async fn dismiss_error(State(state): State<AppState>) -> StatusCode {
    state.controller.dismiss_error();
    StatusCode::NO_CONTENT
}

pub async fn generate_images(
    State(state): State<AppState>,
    Json(body): Json<ImagesRequest>,
) -> AppResult<Json<Vec<ArtifactSummary>>> {
    let controller = state.controller.clone();
    let images =
        detached(async move { controller.generate_images(&body.prompt, body.count, body.aspect_ratio).await }).await?;
    Ok(Json(images))
}

pub async fn animate(State(state): State<AppState>, Json(body): Json<AnimateRequest>) -> AppResult<Json<ArtifactSummary>> {
    let controller = state.controller.clone();
    let video = detached(async move { controller.animate(body.prompt.as_deref(), body.aspect_ratio).await }).await?;
    Ok(Json(video))
}

// --- Batch ---

pub async fn add_to_batch(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let id = state.controller.add_to_batch();
    (StatusCode::CREATED, Json(json!({ "id": id })))
}

pub async fn remove_from_batch(Path(id): Path<String>, State(state): State<AppState>) -> AppResult<StatusCode> {
    state.controller.remove_from_batch(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_batch(State(state): State<AppState>) -> AppResult<StatusCode> {
    state.controller.clear_batch()?;
    Ok(StatusCode::NO_CONTENT)
}

/// Kicks off the run and returns immediately; progress is read from `/api/state`.
pub async fn start_batch(State(state): State<AppState>) -> AppResult<(StatusCode, Json<StateView>)> {
    state.controller.start_batch()?;
    Ok((StatusCode::ACCEPTED, Json(state.controller.snapshot())))
}

// --- Presets ---

pub async fn list_presets(State(state): State<AppState>) -> Json<Vec<PresetSummary>> {
    Json(state.presets.list())
}

pub async fn save_preset(
    State(state): State<AppState>,
    Json(body): Json<SavePresetRequest>,
) -> AppResult<(StatusCode, Json<Vec<PresetSummary>>)> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ControllerError::MissingInput("preset name").into());
    }
    let (settings, styles) = state.controller.preset_inputs();
    state.presets.save(name, settings, &styles)?;
    tracing::info!("💾 Saved preset {:?} with {} style(s)", name, styles.len());
    Ok((StatusCode::CREATED, Json(state.presets.list())))
}

pub async fn load_preset(Path(name): Path<String>, State(state): State<AppState>) -> AppResult<Json<StateView>> {
    let preset = state.presets.get(&name).ok_or(ControllerError::NotFound("preset"))?;
    state.controller.apply_preset(&preset);
    tracing::info!("🎛️ Loaded preset {:?}", name);
    Ok(Json(state.controller.snapshot()))
}

pub async fn delete_preset(Path(name): Path<String>, State(state): State<AppState>) -> AppResult<StatusCode> {
    if state.presets.delete(&name)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ControllerError::NotFound("preset").into())
    }
}

// --- Media ---

pub async fn get_artifact(Path(id): Path<Uuid>, State(state): State<AppState>) -> Response {
    match state.controller.artifact(id) {
        Some(artifact) => media_response(artifact.media),
        None => AppError::from(ControllerError::NotFound("artifact")).into_response(),
    }
}

pub async fn get_preview(Path(id): Path<Uuid>, State(state): State<AppState>) -> Response {
    match state.controller.preview(id) {
        Some(media) => media_response(media),
        None => AppError::from(ControllerError::NotFound("preview")).into_response(),
    }
}

fn media_response(media: MediaPayload) -> Response {
    let content_type = HeaderValue::from_str(&media.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let body: Bytes = media.data;
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

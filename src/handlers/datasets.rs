//! Datasets handlers

use axum::{extract::{State, Path}, http::StatusCode, Json};
use serde_json::Value;

use crate::{AppState, AppResult, AppError};
use crate::extract::ApiJson;
use crate::middleware::auth::UserContext;
use crate::models::{DatasetChanges, DatasetOrdering};
use crate::serializers::{self, DatasetRepresentation};

fn not_found() -> AppError {
    AppError::NotFound("Dataset not found".to_string())
}

/// Unparseable ids can't name a record, so they are simply not found
fn parse_id(raw: &str) -> AppResult<i64> {
    raw.parse().map_err(|_| not_found())
}

/// List all datasets, most recently modified first
pub async fn list(
    State(state): State<AppState>,
    _user: UserContext,
) -> AppResult<Json<Vec<DatasetRepresentation>>> {
    let datasets = state.store.list_datasets(DatasetOrdering::ModifiedOnDesc).await?;
    Ok(Json(datasets.into_iter().map(Into::into).collect()))
}

/// Get single dataset
pub async fn retrieve(
    State(state): State<AppState>,
    _user: UserContext,
    Path(id): Path<String>,
) -> AppResult<Json<DatasetRepresentation>> {
    let dataset = state.store
        .find_dataset(parse_id(&id)?)
        .await?
        .ok_or_else(not_found)?;

    Ok(Json(dataset.into()))
}

/// Create new dataset, recorded as modified by the caller
pub async fn create(
    State(state): State<AppState>,
    user: UserContext,
    ApiJson(body): ApiJson<Value>,
) -> AppResult<(StatusCode, Json<DatasetRepresentation>)> {
    let new = serializers::validate_full(&body).map_err(AppError::InvalidFields)?;
    let dataset = state.store.create_dataset(new, user.user_id).await?;

    tracing::info!("Dataset {} created: {} (by {})", dataset.id, dataset, user.username);

    Ok((StatusCode::CREATED, Json(dataset.into())))
}

/// Replace every writable field
pub async fn update(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<Value>,
) -> AppResult<Json<DatasetRepresentation>> {
    let id = parse_id(&id)?;
    ensure_exists(&state, id).await?;

    let changes: DatasetChanges = serializers::validate_full(&body)
        .map_err(AppError::InvalidFields)?
        .into();

    save(&state, &user, id, changes).await
}

/// Change only the supplied fields
pub async fn partial_update(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<Value>,
) -> AppResult<Json<DatasetRepresentation>> {
    let id = parse_id(&id)?;
    ensure_exists(&state, id).await?;

    let changes = serializers::validate_partial(&body).map_err(AppError::InvalidFields)?;

    save(&state, &user, id, changes).await
}

/// Delete dataset
pub async fn destroy(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let id = parse_id(&id)?;

    if !state.store.delete_dataset(id).await? {
        return Err(not_found());
    }

    tracing::info!("Dataset {} deleted (by {})", id, user.username);

    Ok(StatusCode::NO_CONTENT)
}

async fn ensure_exists(state: &AppState, id: i64) -> AppResult<()> {
    state.store
        .find_dataset(id)
        .await?
        .map(|_| ())
        .ok_or_else(not_found)
}

/// Persist changes with the caller as the new modifier
async fn save(
    state: &AppState,
    user: &UserContext,
    id: i64,
    changes: DatasetChanges,
) -> AppResult<Json<DatasetRepresentation>> {
    let dataset = state.store
        .update_dataset(id, changes, user.user_id)
        .await?
        .ok_or_else(not_found)?;

    tracing::info!("Dataset {} updated: {} (by {})", dataset.id, dataset, user.username);

    Ok(Json(dataset.into()))
}

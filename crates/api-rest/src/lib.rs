//! # API REST
//!
//! Public HTTP boundary of seqvault.
//!
//! Handles:
//! - anonymous file downloads: `GET /{dataset|sample}-file/{name}/{filename}`
//! - the public files listing and its download links export
//! - health checks and the OpenAPI document
//!
//! Storage semantics live in `seqvault-core`; this crate only maps them onto HTTP.

#![warn(rust_2018_idioms)]

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::NaiveDate;
use seqvault_core::{EntityKind, PublicFile, PublicFileFilter, StorageService};
use serde::{Deserialize, Serialize};
use std::ops::Bound;
use tower_http::cors::CorsLayer;
use utoipa::{IntoParams, OpenApi, ToSchema};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// One entry of the public files listing.
#[derive(Serialize, Deserialize, ToSchema)]
pub struct PublicFileRes {
    pub kind: String,
    pub entity_name: String,
    pub path: String,
    pub owner_email: Option<String>,
    pub owner_name: Option<String>,
    pub expiry_date: NaiveDate,
    pub url: String,
}

/// Filter of the public files listing. Text criteria are case-insensitive substrings.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PublicFilesQuery {
    pub filename: Option<String>,
    pub name: Option<String>,
    /// Matches the owner's email or name.
    pub owner: Option<String>,
    /// Inclusive lower bound of the expiry date.
    pub expiry_from: Option<NaiveDate>,
    /// Inclusive upper bound of the expiry date.
    pub expiry_to: Option<NaiveDate>,
}

impl From<PublicFilesQuery> for PublicFileFilter {
    fn from(query: PublicFilesQuery) -> Self {
        let bound = |date: Option<NaiveDate>| date.map_or(Bound::Unbounded, Bound::Included);
        PublicFileFilter {
            filename_contains: query.filename,
            entity_name_contains: query.name,
            owner_contains: query.owner,
            expiry_range: (bound(query.expiry_from), bound(query.expiry_to)),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(health, dataset_file, sample_file, list_public_files, download_links),
    components(schemas(HealthRes, PublicFileRes))
)]
pub struct ApiDoc;

/// Builds the router serving every public endpoint.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/dataset-file/:name/:filename", get(dataset_file))
        .route("/sample-file/:name/:filename", get(sample_file))
        .route("/public-files", get(list_public_files))
        .route("/public-files/links", get(download_links))
        .route("/api-docs/openapi.json", get(openapi))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint.
async fn health() -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "seqvault is alive".into(),
    })
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    get,
    path = "/dataset-file/{name}/{filename}",
    params(
        ("name" = String, Path, description = "Dataset name"),
        ("filename" = String, Path, description = "File in the dataset folder")
    ),
    responses(
        (status = 200, description = "File content"),
        (status = 400, description = "Filename is not a plain filename"),
        (status = 404, description = "No active grant or no such file")
    )
)]
/// Downloads a publicly shared file of a dataset.
async fn dataset_file(
    State(state): State<AppState>,
    Path((name, filename)): Path<(String, String)>,
) -> Response {
    public_file(&state, EntityKind::Dataset, &name, &filename).await
}

#[utoipa::path(
    get,
    path = "/sample-file/{name}/{filename}",
    params(
        ("name" = String, Path, description = "Sample name"),
        ("filename" = String, Path, description = "File in the sample folder")
    ),
    responses(
        (status = 200, description = "File content"),
        (status = 400, description = "Filename is not a plain filename"),
        (status = 404, description = "No active grant or no such file")
    )
)]
/// Downloads a publicly shared file of a sample.
async fn sample_file(
    State(state): State<AppState>,
    Path((name, filename)): Path<(String, String)>,
) -> Response {
    public_file(&state, EntityKind::Sample, &name, &filename).await
}

async fn public_file(state: &AppState, kind: EntityKind, name: &str, filename: &str) -> Response {
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return (StatusCode::BAD_REQUEST, "Invalid filename").into_response();
    }

    let Some(path) = state.storage.public_file(kind, name, filename) else {
        tracing::debug!("no public {} file {}/{}", kind, name, filename);
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            tracing::info!("serving public file {}", path.display());
            (
                [
                    (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", filename.replace('"', "")),
                    ),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => {
            tracing::warn!("cannot read public file {}: {}", path.display(), e);
            (StatusCode::NOT_FOUND, "Not found").into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/public-files",
    params(PublicFilesQuery),
    responses(
        (status = 200, description = "Granted files, active and expired", body = [PublicFileRes]),
        (status = 500, description = "Internal server error")
    )
)]
/// Lists every granted file accepted by the filter.
async fn list_public_files(
    State(state): State<AppState>,
    Query(query): Query<PublicFilesQuery>,
) -> Result<Json<Vec<PublicFileRes>>, (StatusCode, &'static str)> {
    let filter = PublicFileFilter::from(query);
    let files = state.storage.public_files().map_err(|e| {
        tracing::error!("List public files error: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
    })?;
    let cfg = state.storage.config();
    Ok(Json(
        filter
            .apply(files)
            .into_iter()
            .map(|file| to_res(&file, cfg.url(&file.url_path())))
            .collect(),
    ))
}

#[utoipa::path(
    get,
    path = "/public-files/links",
    params(PublicFilesQuery),
    responses(
        (status = 200, description = "One public URL per line", body = String),
        (status = 500, description = "Internal server error")
    )
)]
/// Exports download links of the filtered public files.
async fn download_links(
    State(state): State<AppState>,
    Query(query): Query<PublicFilesQuery>,
) -> Result<Response, (StatusCode, &'static str)> {
    let links = state
        .storage
        .download_links(&PublicFileFilter::from(query))
        .map_err(|e| {
            tracing::error!("Download links error: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        })?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"public-files.txt\"",
            ),
        ],
        links,
    )
        .into_response())
}

fn to_res(file: &PublicFile, url: String) -> PublicFileRes {
    PublicFileRes {
        kind: file.entity_kind.resource().to_string(),
        entity_name: file.entity_name.clone(),
        path: file.path.clone(),
        owner_email: file.owner.as_ref().map(|o| o.email.clone()),
        owner_name: file.owner.as_ref().map(|o| o.name.clone()),
        expiry_date: file.expiry_date,
        url,
    }
}

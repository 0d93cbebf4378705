//! Reference note server.
//!
//! Keeps notes in memory and serves them over the JSON API that
//! [`HttpNoteClient`](crate::sync::HttpNoteClient) speaks. The server stores
//! whatever version a client sends; conflict resolution happens on clients.
//!
//! # Endpoints
//!
//! - `GET /health`: Health check
//! - `GET /notes/{title}`: Fetch a note (404 if absent)
//! - `PUT /notes/{title}`: Store `{"content", "version"}` under `title`
//! - `DELETE /notes/{title}`: Remove a note

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::Note;

/// Shared in-memory note table.
#[derive(Debug, Clone, Default)]
pub struct NoteServerState {
    notes: Arc<RwLock<HashMap<String, Note>>>,
}

impl NoteServerState {
    pub async fn get(&self, title: &str) -> Option<Note> {
        self.notes.read().await.get(title).cloned()
    }

    pub async fn insert(&self, note: Note) {
        self.notes.write().await.insert(note.title.clone(), note);
    }

    pub async fn len(&self) -> usize {
        self.notes.read().await.len()
    }
}

/// Body of a PUT request.
#[derive(Debug, Deserialize)]
pub struct PutNoteRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub version: u64,
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Builds the note API router.
pub fn router(state: NoteServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/notes/{title}",
            get(get_note).put(put_note).delete(delete_note),
        )
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn get_note(
    State(state): State<NoteServerState>,
    Path(title): Path<String>,
) -> Result<Json<Note>, StatusCode> {
    state.get(&title).await.map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn put_note(
    State(state): State<NoteServerState>,
    Path(title): Path<String>,
    Json(request): Json<PutNoteRequest>,
) -> Json<Note> {
    let note = Note {
        title,
        content: request.content,
        version: request.version,
        updated_at: Utc::now(),
    };

    tracing::debug!("Stored '{}' at version {}", note.title, note.version);
    state.insert(note.clone()).await;
    Json(note)
}

async fn delete_note(
    State(state): State<NoteServerState>,
    Path(title): Path<String>,
) -> StatusCode {
    match state.notes.write().await.remove(&title) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

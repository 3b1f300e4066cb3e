//! HTTP route handlers for the upload API.

use std::path::{Path, PathBuf};

use axum::Router;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde_json::json;
use tracing::{info, warn};

use solver::core::types::Category;
use solver::dispatch::{classify, dispatch};
use solver::io::config::SolverConfig;
use solver::io::executor::IsolatedExecutor;
use solver::io::generator::ConfiguredGenerator;
use solver::io::installer::CommandInstaller;
use solver::io::manifest::Manifest;
use solver::io::prompt::PromptBuilder;
use solver::io::reconcile::Reconciler;
use solver::retry::{Orchestrator, RetryPolicy};

use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/api", post(solve_upload))
        .route("/api/", post(solve_upload))
        .route("/api/health", get(health))
}

async fn health() -> &'static str {
    "ok"
}

/// Error body in the `{"detail": "..."}` shape clients expect.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

/// One saved upload.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SavedFile {
    name: String,
    path: PathBuf,
    /// UTF-8 text, or a placeholder naming where the binary was saved.
    content: String,
}

/// POST /api - save uploads, classify the question and answer it.
async fn solve_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<String>, ApiError> {
    let mut saved = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(format!("Invalid multipart body: {err}")))?
    {
        let Some(raw_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let Some(name) = sanitize_file_name(&raw_name) else {
            warn!(raw_name = %raw_name, "skipping upload with unusable file name");
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::bad_request(format!("Invalid upload {name}: {err}")))?;
        let file = save_upload(&state.save_dir, name, &bytes).await?;
        info!(name = %file.name, path = %file.path.display(), bytes = bytes.len(), "saved upload");
        saved.push(file);
    }

    if saved.is_empty() {
        return Err(ApiError::bad_request("No files uploaded"));
    }
    let task = question_text(&saved)?;
    info!(files = saved.len(), task_len = task.len(), "received task");

    let config = state.config.clone();
    tokio::task::spawn_blocking(move || answer_task(&config, &task))
        .await
        .map_err(|err| ApiError::internal(format!("Worker failed: {err}")))?
        .map(Json)
}

/// Final path component of an uploaded name, or `None` if nothing usable is left.
fn sanitize_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

fn is_question_file(name: &str) -> bool {
    name.eq_ignore_ascii_case("questions.txt") || name.eq_ignore_ascii_case("question.txt")
}

fn describe_content(bytes: &[u8], path: &Path) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary file saved at {}>", path.display()),
    }
}

async fn save_upload(dir: &Path, name: String, bytes: &[u8]) -> Result<SavedFile, ApiError> {
    let path = dir.join(&name);
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|err| ApiError::internal(format!("Could not save {name}: {err}")))?;
    let content = describe_content(bytes, &path);
    Ok(SavedFile {
        name,
        path,
        content,
    })
}

/// The task text from the first question file.
fn question_text(files: &[SavedFile]) -> Result<String, ApiError> {
    let question = files
        .iter()
        .find(|file| is_question_file(&file.name))
        .ok_or_else(|| ApiError::bad_request("Missing required questions.txt file"))?;
    if question.content.trim().is_empty() {
        return Err(ApiError::bad_request("questions.txt is empty"));
    }
    Ok(question.content.clone())
}

/// Classify and dispatch on the current blocking thread with fresh backends.
fn answer_task(config: &SolverConfig, task: &str) -> Result<String, ApiError> {
    let classification_failed = |err: anyhow::Error| {
        ApiError::internal(format!("Classification failed: {err:#}"))
    };
    let prompts =
        PromptBuilder::with_overrides(config.prompts_dir.as_deref()).map_err(classification_failed)?;
    let classifier =
        ConfiguredGenerator::from_config(config.classifier()).map_err(classification_failed)?;
    let category = classify(&classifier, &prompts, task).map_err(classification_failed)?;

    run_category(config, &prompts, &category, task).map_err(|err| {
        ApiError::internal(format!(
            "Error handling category '{}': {err:#}",
            category.label()
        ))
    })
}

fn run_category(
    config: &SolverConfig,
    prompts: &PromptBuilder,
    category: &Category,
    task: &str,
) -> anyhow::Result<String> {
    let generator = ConfiguredGenerator::from_config(&config.generator)?;
    let runner = IsolatedExecutor::from_config(&config.execution);
    let reconciler = Reconciler::new(
        Manifest::new(&config.dependencies.manifest_path),
        CommandInstaller::from_config(&config.dependencies),
    );
    let orchestrator = Orchestrator::new(
        &generator,
        &runner,
        &reconciler,
        prompts,
        RetryPolicy::from_config(config),
    );
    let answer = dispatch(&orchestrator, category, task, |report| {
        info!(
            trial = report.trial,
            max_trials = report.max_trials,
            success = report.result.success,
            error_kind = %report.result.error_kind,
            "trial finished"
        );
    })?;
    info!(category = category.label(), "task answered");
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saved(name: &str, content: &str) -> SavedFile {
        SavedFile {
            name: name.to_string(),
            path: PathBuf::from("/tmp").join(name),
            content: content.to_string(),
        }
    }

    #[test]
    fn file_names_keep_only_final_component() {
        assert_eq!(sanitize_file_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_file_name("C:\\data\\sales.csv").as_deref(), Some("sales.csv"));
        assert_eq!(sanitize_file_name("questions.txt").as_deref(), Some("questions.txt"));
        assert_eq!(sanitize_file_name("dir/"), None);
        assert_eq!(sanitize_file_name(".."), None);
    }

    #[test]
    fn question_file_match_ignores_case() {
        assert!(is_question_file("Questions.TXT"));
        assert!(is_question_file("question.txt"));
        assert!(!is_question_file("questions.md"));
    }

    #[test]
    fn binary_content_is_described_by_path() {
        let path = PathBuf::from("/srv/uploads/image.png");
        assert_eq!(describe_content(b"a,b\n1,2\n", &path), "a,b\n1,2\n");
        assert_eq!(
            describe_content(&[0xff, 0xfe, 0x00], &path),
            "<binary file saved at /srv/uploads/image.png>"
        );
    }

    #[test]
    fn question_text_requires_present_non_blank_file() {
        let err = question_text(&[saved("data.csv", "a,b")]).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.detail, "Missing required questions.txt file");

        let err = question_text(&[saved("questions.txt", "  \n")]).unwrap_err();
        assert_eq!(err.detail, "questions.txt is empty");

        let task = question_text(&[saved("data.csv", "a,b"), saved("QUESTION.txt", "sum a")])
            .expect("question");
        assert_eq!(task, "sum a");
    }

    #[tokio::test]
    async fn uploads_are_written_to_save_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = save_upload(temp.path(), "notes.txt".to_string(), b"hello")
            .await
            .expect("save");
        assert_eq!(file.path, temp.path().join("notes.txt"));
        assert_eq!(file.content, "hello");
        assert_eq!(std::fs::read(&file.path).expect("read"), b"hello");
    }
}

//! HTTP handlers for the upload page.

use std::path::{Path, PathBuf};

use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, Multipart, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Redirect, Response},
};
use tracing::{error, info, warn};

use crate::{
    pipeline::{self, TrackOutcome, TrackReport},
    web::{
        flash,
        page::upload_page,
        upload::{allowed_file, secure_filename},
        AppState,
    },
};

struct UploadedFile {
    file_name: String,
    bytes: Bytes,
}

/// First multipart field named `file`, if any.
async fn read_file_part(multipart: &mut Multipart) -> Result<Option<UploadedFile>, MultipartError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await?;
        return Ok(Some(UploadedFile { file_name, bytes }));
    }
    Ok(None)
}

/// Renders the form and any pending messages, then clears them.
fn render(messages: &[String], clear_cookie: bool) -> Response {
    let mut resp = upload_page(messages).into_response();
    if clear_cookie {
        resp.headers_mut()
            .append(header::SET_COOKIE, flash::clear_cookie());
    }
    resp
}

/// 303 back to the form with `messages` queued for the next render.
fn redirect_with(state: &AppState, messages: &[String]) -> Response {
    let mut resp = Redirect::to("/").into_response();
    if let Some(cookie) = flash::set_cookie(&state.flash_key, messages) {
        resp.headers_mut().append(header::SET_COOKIE, cookie);
    }
    resp
}

fn report_messages(reports: &[TrackReport], output_dir: &Path) -> Vec<String> {
    let mut messages = Vec::new();
    for report in reports {
        match &report.outcome {
            TrackOutcome::Separated { stems, .. } => {
                for stem in stems {
                    messages.push(format!(
                        "Separated {} saved as {}",
                        stem.name,
                        stem.path.display()
                    ));
                }
            }
            TrackOutcome::LoadFailed(reason) => {
                messages.push(format!("Error loading audio file: {reason}"));
            }
        }
    }
    if reports.iter().any(TrackReport::is_separated) {
        messages.push(format!("Output files saved in: {}", output_dir.display()));
    }
    messages
}

async fn save_upload(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, bytes).await
}

/// `GET /`
pub async fn upload_form(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (messages, had_cookie) = flash::take(&headers, &state.flash_key);
    render(&messages, had_cookie)
}

/// `POST /`
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let (mut messages, had_cookie) = flash::take(&headers, &state.flash_key);

    let upload = match read_file_part(&mut multipart).await {
        Ok(upload) => upload,
        Err(e) => {
            warn!(error = %e, "malformed upload");
            return e.into_response();
        }
    };

    let Some(upload) = upload else {
        messages.push("No file part".to_string());
        return redirect_with(&state, &messages);
    };
    if upload.file_name.is_empty() {
        messages.push("No selected file".to_string());
        return redirect_with(&state, &messages);
    }
    if !allowed_file(&upload.file_name) {
        warn!(file = %upload.file_name, "rejected upload with a disallowed extension");
        return render(&messages, had_cookie);
    }

    let file_name = secure_filename(&upload.file_name);
    if file_name.is_empty() {
        messages.push("No selected file".to_string());
        return redirect_with(&state, &messages);
    }

    let input_path: PathBuf = state.input_dir.join(&file_name);
    if let Err(e) = save_upload(&input_path, &upload.bytes).await {
        error!(path = %input_path.display(), error = %e, "could not store upload");
        messages.push(format!("Error saving uploaded file: {e}"));
        return redirect_with(&state, &messages);
    }
    info!(path = %input_path.display(), bytes = upload.bytes.len(), "upload stored");
    messages.push(format!("Uploaded file saved as: {}", input_path.display()));

    let gateway = state.gateway.clone();
    let output_dir = state.output_dir.clone();
    let options = state.options.clone();
    let tracks = vec![input_path];
    let result = tokio::task::spawn_blocking(move || {
        pipeline::process(&gateway, &tracks, &output_dir, &options)
    })
    .await;

    match result {
        Ok(Ok(reports)) => messages.extend(report_messages(&reports, &state.output_dir)),
        Ok(Err(e)) => {
            error!(error = %e, "separation failed");
            messages.push(format!("Error processing file: {e}"));
        }
        Err(e) => {
            error!(error = %e, "separation worker panicked");
            messages.push(format!("Error processing file: {e}"));
        }
    }
    redirect_with(&state, &messages)
}

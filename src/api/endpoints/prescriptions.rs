//! Prescription upload and analysis.

use std::path::Path;

use axum::extract::{Multipart, State};
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, ACCEPTED_EXTENSIONS};
use crate::pipeline::analyzer::AnalysisReport;

/// `POST /api/prescriptions/analyze`, multipart with the image in `file`.
///
/// Upload problems are rejected with an error body. Once the image is
/// accepted the response is always a report, whatever its status.
pub async fn analyze(
    State(ctx): State<ApiContext>,
    mut multipart: Multipart,
) -> Result<Json<AnalysisReport>, ApiError> {
    let limit = ctx.max_upload_bytes;
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::from_multipart(e, limit))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        validate_filename(&filename)?;

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::from_multipart(e, limit))?;
        upload = Some((filename, bytes.to_vec()));
        break;
    }

    let (filename, bytes) = upload.ok_or(ApiError::MissingFile)?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("The uploaded file is empty".into()));
    }
    if bytes.len() > limit {
        return Err(ApiError::PayloadTooLarge { limit });
    }

    tracing::info!(filename = %filename, bytes = bytes.len(), "Prescription upload accepted");
    let report = ctx.analyzer.analyze(bytes, Some(&filename)).await;
    Ok(Json(report))
}

/// Extension must be an accepted image type and its guessed MIME type `image/*`.
pub fn validate_filename(filename: &str) -> Result<(), ApiError> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| ApiError::UnsupportedMediaType(format!("'{filename}' has no file extension")))?;

    if !ACCEPTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ApiError::UnsupportedMediaType(format!(
            "'.{extension}' files are not accepted"
        )));
    }

    let mime = mime_guess::from_path(filename).first_or_octet_stream();
    if mime.type_() != mime_guess::mime::IMAGE {
        return Err(ApiError::UnsupportedMediaType(format!("'{mime}' is not an image type")));
    }
    Ok(())
}

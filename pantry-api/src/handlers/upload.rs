use std::time::Instant;

use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use crate::ingest::{check_file_type, check_size, ingest, parse_rows, IngestReport, UploadError};

use super::{error_response, internal_error, AppState, HandlerError};

/// Multipart field the CSV file is uploaded under.
pub const CSV_FIELD: &str = "csvFile";

fn multipart_error(err: MultipartError) -> HandlerError {
    error_response(err.status(), err.body_text())
}

fn upload_error(err: UploadError) -> HandlerError {
    error_response(StatusCode::BAD_REQUEST, err.to_string())
}

/// Read the CSV field, refusing non-CSV files before reading them and
/// oversized files as soon as they cross the limit.
async fn read_csv_field(multipart: &mut Multipart, limit: usize) -> Result<Vec<u8>, HandlerError> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(CSV_FIELD) {
            continue;
        }

        check_file_type(field.file_name(), field.content_type()).map_err(upload_error)?;

        let mut buffer = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            check_size(buffer.len() + chunk.len(), limit).map_err(upload_error)?;
            buffer.extend_from_slice(&chunk);
        }
        return Ok(buffer);
    }

    Err(error_response(StatusCode::BAD_REQUEST, "no file uploaded"))
}

pub async fn post_csv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestReport>, HandlerError> {
    let bytes = read_csv_field(&mut multipart, state.max_upload_bytes).await?;

    state.store.ensure_connected().await.map_err(internal_error)?;

    let start_time = Instant::now();
    let report = ingest(&*state.store, parse_rows(&bytes))
        .await
        .map_err(|err| error_response(StatusCode::BAD_REQUEST, err.to_string()))?;

    metrics::histogram!("csv_ingest_duration_seconds").record(start_time.elapsed().as_secs_f64());
    info!(
        "ingested CSV upload: total={} successful={} errors={} skipped={}",
        report.total,
        report.successful.count,
        report.errors.len(),
        report.skipped.len()
    );

    Ok(Json(report))
}

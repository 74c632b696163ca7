// crates/server/src/routes/downloads.rs
//! Result artifact downloads.
//!
//! - GET /download?type=N&folderid=ID - artifact as an attachment
//! - GET /preview?type=N&folderid=ID  - PDF artifact inline
//!
//! Types: 1 = zip of the folder's CSV files, 2 = full report PDF,
//! 3 = anomaly report PDF, 4 = submitted FASTA.

use std::io::{Cursor, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

use crate::error::{ApiError, ApiResult};
use crate::intake::INPUTS_FILE;
use crate::state::AppState;

const FULL_REPORT_FILE: &str = "BLAST_Full_Report.pdf";
const ANOMALY_REPORT_FILE: &str = "anomaly_output.pdf";

#[derive(Debug, Deserialize)]
pub struct ArtifactQuery {
    #[serde(rename = "type")]
    pub kind: u8,
    pub folderid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Artifact {
    CsvBundle,
    FullReport,
    AnomalyReport,
    Inputs,
}

impl Artifact {
    fn from_code(code: u8) -> ApiResult<Self> {
        match code {
            1 => Ok(Self::CsvBundle),
            2 => Ok(Self::FullReport),
            3 => Ok(Self::AnomalyReport),
            4 => Ok(Self::Inputs),
            other => Err(ApiError::BadRequest(format!("Unknown artifact type: {other}"))),
        }
    }

    /// Source file inside the results folder; the CSV bundle is generated.
    fn source(self) -> Option<&'static str> {
        match self {
            Self::CsvBundle => None,
            Self::FullReport => Some(FULL_REPORT_FILE),
            Self::AnomalyReport => Some(ANOMALY_REPORT_FILE),
            Self::Inputs => Some(INPUTS_FILE),
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            Self::CsvBundle => "application/x-zip-compressed",
            Self::FullReport | Self::AnomalyReport => "application/pdf",
            Self::Inputs => "chemical/seq-na-fasta",
        }
    }

    fn file_name(self, label: &str) -> String {
        match self {
            Self::CsvBundle => format!("{label}_csv_bundle.zip"),
            Self::FullReport => format!("{label}_full_report.pdf"),
            Self::AnomalyReport => format!("{label}_anomaly_report.pdf"),
            Self::Inputs => format!("{label}_inputs.fasta"),
        }
    }
}

/// Resolve a client folder id against the results directory.
///
/// Only relative ids made of plain segments are accepted.
pub fn resolve_folder(results_dir: &Path, folder_id: &str) -> ApiResult<PathBuf> {
    let relative = Path::new(folder_id);
    let plain = !folder_id.trim().is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !plain {
        return Err(ApiError::BadRequest(format!(
            "Invalid folder path: {folder_id}"
        )));
    }
    Ok(results_dir.join(relative))
}

fn folder_label(folder: &Path) -> String {
    folder
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| folder.display().to_string())
}

/// Zip every `*.csv` file directly inside `folder`, sorted by name.
fn build_csv_bundle(folder: &Path) -> std::io::Result<Vec<u8>> {
    let mut csv_paths: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    csv_paths.sort();

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for path in csv_paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        zip.start_file(name, options)?;
        zip.write_all(&std::fs::read(&path)?)?;
    }
    Ok(zip.finish()?.into_inner())
}

async fn read_artifact(folder: &Path, artifact: Artifact) -> ApiResult<Vec<u8>> {
    if !tokio::fs::try_exists(folder).await.unwrap_or(false) {
        return Err(ApiError::NotFound(format!("Folder {}", folder_label(folder))));
    }
    let Some(file) = artifact.source() else {
        let folder = folder.to_path_buf();
        return tokio::task::spawn_blocking(move || build_csv_bundle(&folder))
            .await
            .map_err(|e| ApiError::Internal(format!("csv bundle task failed: {e}")))?
            .map_err(ApiError::from);
    };
    match tokio::fs::read(folder.join(file)).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ApiError::NotFound(format!(
            "{}/{file}",
            folder_label(folder)
        ))),
        Err(e) => Err(e.into()),
    }
}

async fn serve_artifact(
    state: &AppState,
    query: &ArtifactQuery,
    artifact: Artifact,
    disposition: &str,
) -> ApiResult<Response> {
    let folder = resolve_folder(&state.results_dir, &query.folderid)?;
    let bytes = read_artifact(&folder, artifact).await?;
    let file_name = artifact.file_name(&folder_label(&folder));
    tracing::debug!(folder = %query.folderid, file = %file_name, bytes = bytes.len(), "serving artifact");

    Ok((
        [
            (header::CONTENT_TYPE, artifact.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("{disposition}; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// GET /download
pub async fn download(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ArtifactQuery>,
) -> ApiResult<Response> {
    let artifact = Artifact::from_code(query.kind)?;
    serve_artifact(&state, &query, artifact, "attachment").await
}

/// GET /preview - reports only.
pub async fn preview(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ArtifactQuery>,
) -> ApiResult<Response> {
    let artifact = match Artifact::from_code(query.kind)? {
        a @ (Artifact::FullReport | Artifact::AnomalyReport) => a,
        _ => {
            return Err(ApiError::BadRequest(format!(
                "Artifact type {} cannot be previewed",
                query.kind
            )))
        }
    };
    serve_artifact(&state, &query, artifact, "inline").await
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/download", get(download))
        .route("/preview", get(preview))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::io::Read;
    use tower::ServiceExt;

    struct Fixture {
        _dir: tempfile::TempDir,
        app: Router,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("results").join("run-1");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("inputs.fasta"), ">a\nACGT\n").unwrap();
        std::fs::write(folder.join("sequences.csv"), "index,header\n0,a\n").unwrap();
        std::fs::write(folder.join("hits.csv"), "id\n1\n").unwrap();
        std::fs::write(folder.join("notes.txt"), "skip me").unwrap();
        std::fs::write(folder.join(FULL_REPORT_FILE), b"%PDF-1.4 full").unwrap();
        let app = crate::create_app(AppState::in_dir(dir.path()), None);
        Fixture { _dir: dir, app }
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body.to_vec())
    }

    #[test]
    fn test_resolve_folder_rejects_escapes() {
        let root = Path::new("/srv/results");
        assert_eq!(
            resolve_folder(root, "run-1").unwrap(),
            PathBuf::from("/srv/results/run-1")
        );
        for bad in ["", "../etc", "run-1/../../x", "/etc/passwd", "./run-1"] {
            assert!(
                matches!(resolve_folder(root, bad), Err(ApiError::BadRequest(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_download_inputs_as_attachment() {
        let f = fixture();
        let (status, headers, body) = get(f.app, "/download?type=4&folderid=run-1").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b">a\nACGT\n");
        assert_eq!(headers[header::CONTENT_TYPE], "chemical/seq-na-fasta");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"run-1_inputs.fasta\""
        );
    }

    #[tokio::test]
    async fn test_download_csv_bundle_contains_only_csv() {
        let f = fixture();
        let (status, headers, body) = get(f.app, "/download?type=1&folderid=run-1").await;

        assert_eq!(status, StatusCode::OK);
        assert!(headers[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("run-1_csv_bundle.zip"));

        let mut archive = zip::ZipArchive::new(Cursor::new(body)).unwrap();
        let names: Vec<String> = archive.file_names().map(str::to_string).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["hits.csv", "sequences.csv"]);

        let mut contents = String::new();
        archive
            .by_name("sequences.csv")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "index,header\n0,a\n");
    }

    #[tokio::test]
    async fn test_preview_is_inline() {
        let f = fixture();
        let (status, headers, body) = get(f.app, "/preview?type=2&folderid=run-1").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"%PDF-1.4 full");
        assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
        assert!(headers[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .starts_with("inline;"));
    }

    #[tokio::test]
    async fn test_missing_artifact_is_404() {
        let f = fixture();
        let (status, _, _) = get(f.app.clone(), "/download?type=3&folderid=run-1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = get(f.app, "/download?type=4&folderid=run-2").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let f = fixture();
        let (status, _, _) = get(f.app.clone(), "/download?type=9&folderid=run-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = get(f.app.clone(), "/preview?type=4&folderid=run-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = get(f.app, "/download?type=4&folderid=..%2F..%2Fetc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

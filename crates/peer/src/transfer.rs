//! HTTP(S) pull transfer (spec.md §4.9 "Transfer"): resumable ranged
//! download of a model artifact from a peer's `http_addr`, with optional
//! SHA-256 verification and an atomic rename into the models directory.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use gateway_progress::ProgressRegistry;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::error::{PeerError, Result};

/// Convention this workspace uses for the artifact-serving endpoint exposed
/// by a peer's own HTTP front door (gateway-server wires a handler at this
/// path backed by the same models directory the registry scans).
fn artifact_url(http_addr: &str, filename: &str) -> String {
    format!("http://{http_addr}/internal/artifacts/{filename}")
}

/// Rejects anything that isn't a bare filename: no path separators, no
/// leading dot-dot, nothing absolute. Spec.md §4.9: "not an absolute path,
/// no path separators — validate and reject otherwise."
fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename == "."
        || filename == ".."
        || Path::new(filename).is_absolute()
    {
        return Err(PeerError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}

/// Pulls `filename` from `peer_http_addr` into `dest_dir`, resuming from any
/// partial `.part` file already on disk. `operation_id` keys progress in
/// `progress` for the duration of the call.
pub async fn pull_artifact(
    client: &reqwest::Client,
    peer_http_addr: &str,
    filename: &str,
    dest_dir: &Path,
    expected_sha256: Option<&str>,
    progress: &ProgressRegistry,
    operation_id: &str,
) -> Result<PathBuf> {
    validate_filename(filename)?;

    let part_path = dest_dir.join(format!("{filename}.part"));
    let final_path = dest_dir.join(filename);

    let resume_from = tokio::fs::metadata(&part_path).await.map(|m| m.len()).unwrap_or(0);

    let url = artifact_url(peer_http_addr, filename);
    let mut request = client.get(&url);
    if resume_from > 0 {
        request = request.header(reqwest::header::RANGE, format!("bytes={resume_from}-"));
    }

    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            progress.fail(operation_id, e.to_string());
            return Err(PeerError::Http(e));
        }
    };

    let response = match response.error_for_status() {
        Ok(r) => r,
        Err(e) => {
            progress.fail(operation_id, e.to_string());
            return Err(PeerError::Http(e));
        }
    };

    let content_length = response.content_length().unwrap_or(0);
    let total_bytes = resume_from + content_length;
    progress.register(operation_id, total_bytes);
    if resume_from > 0 {
        progress.advance(operation_id, resume_from);
    }

    let append = resume_from > 0;
    let mut file = match tokio::fs::OpenOptions::new().create(true).write(true).append(append).truncate(!append).open(&part_path).await {
        Ok(f) => f,
        Err(e) => {
            progress.fail(operation_id, e.to_string());
            return Err(PeerError::Io(e));
        }
    };

    let mut received = resume_from;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                progress.fail(operation_id, e.to_string());
                return Err(PeerError::Http(e));
            }
        };
        if let Err(e) = file.write_all(&chunk).await {
            progress.fail(operation_id, e.to_string());
            return Err(PeerError::Io(e));
        }
        received += chunk.len() as u64;
        progress.advance(operation_id, received);
    }
    file.flush().await?;
    drop(file);

    if total_bytes > 0 && received < total_bytes {
        let err = PeerError::Truncated { got: received, expected: total_bytes };
        progress.fail(operation_id, err.to_string());
        return Err(err);
    }

    if let Some(expected) = expected_sha256 {
        let actual = hash_file(&part_path).await?;
        if !actual.eq_ignore_ascii_case(expected) {
            let err = PeerError::HashMismatch { expected: expected.to_string(), actual };
            progress.fail(operation_id, err.to_string());
            return Err(err);
        }
    }

    tokio::fs::rename(&part_path, &final_path).await?;
    progress.complete(operation_id);
    Ok(final_path)
}

async fn hash_file(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

//! Downloading and unpacking url toolchain sources.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tar::Archive;
use tracing::{debug, info};

use super::ToolchainError;

/// Download `url` into `downloads`, verifying its SHA-256.
///
/// `file://` urls are read from disk, which keeps mirrors and tests offline.
pub async fn fetch_verified(url: &str, expected_sha256: &str, downloads: &Path) -> Result<PathBuf, ToolchainError> {
  info!(url = %url, "fetching toolchain");

  let fetch_err = |message: String| ToolchainError::Fetch {
    url: url.to_string(),
    message,
  };

  let bytes: Vec<u8> = if let Some(local) = url.strip_prefix("file://") {
    tokio::fs::read(local).await.map_err(|e| fetch_err(e.to_string()))?
  } else {
    let response = reqwest::get(url).await.map_err(|e| fetch_err(e.to_string()))?;
    if !response.status().is_success() {
      return Err(fetch_err(format!("HTTP {}", response.status())));
    }
    response.bytes().await.map_err(|e| fetch_err(e.to_string()))?.to_vec()
  };

  let actual = {
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
  };
  if !actual.eq_ignore_ascii_case(expected_sha256) {
    return Err(ToolchainError::HashMismatch {
      url: url.to_string(),
      expected: expected_sha256.to_string(),
      actual,
    });
  }

  tokio::fs::create_dir_all(downloads).await?;
  let dest = downloads.join(url_to_filename(url));
  tokio::fs::write(&dest, &bytes).await?;

  info!(path = %dest.display(), size = bytes.len(), "download complete");
  Ok(dest)
}

/// Whether a downloaded file is an archive we unpack.
pub fn is_archive(path: &Path) -> bool {
  let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
  name.ends_with(".tar.gz") || name.ends_with(".tgz") || name.ends_with(".tar")
}

/// Unpack a `.tar`, `.tar.gz` or `.tgz` into `dest`, dropping the archive's
/// top-level directory.
pub fn unpack_archive(archive_path: &Path, dest: &Path) -> Result<(), ToolchainError> {
  let name = archive_path.to_string_lossy();
  let file = File::open(archive_path)?;
  fs::create_dir_all(dest)?;

  if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
    unpack_entries(Archive::new(GzDecoder::new(BufReader::new(file))), dest)
  } else if name.ends_with(".tar") {
    unpack_entries(Archive::new(BufReader::new(file)), dest)
  } else {
    Err(ToolchainError::Unpack {
      message: format!("unsupported archive format: {}", name),
    })
  }
}

fn unpack_entries<R: Read>(mut archive: Archive<R>, dest: &Path) -> Result<(), ToolchainError> {
  let unpack_err = |e: std::io::Error| ToolchainError::Unpack { message: e.to_string() };

  for entry in archive.entries().map_err(unpack_err)? {
    let mut entry = entry.map_err(unpack_err)?;
    let path = entry.path().map_err(unpack_err)?.into_owned();

    let stripped: PathBuf = path.components().skip(1).collect();
    if stripped.as_os_str().is_empty() {
      continue;
    }
    if stripped.components().any(|c| !matches!(c, Component::Normal(_))) {
      return Err(ToolchainError::Unpack {
        message: format!("archive entry escapes destination: {}", path.display()),
      });
    }

    let dest_path = dest.join(&stripped);
    if let Some(parent) = dest_path.parent() {
      fs::create_dir_all(parent)?;
    }
    entry.unpack(&dest_path).map_err(unpack_err)?;
  }

  debug!(dest = %dest.display(), "unpacked archive");
  Ok(())
}

/// Last path segment of a url, sanitized for use as a file name.
fn url_to_filename(url: &str) -> String {
  let last = url.rsplit('/').next().unwrap_or_default();
  let last = last.split('?').next().unwrap_or(last);

  let sanitized: String = last
    .chars()
    .map(|c| {
      if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
        c
      } else {
        '_'
      }
    })
    .collect();

  if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(&hasher.finalize()[..8])
  } else {
    sanitized
  }
}

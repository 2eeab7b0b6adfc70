//! Archive download and extraction for one component.
//!
//! Each selected component is fetched by its own task (see
//! [`crate::pipeline`]), so everything here only touches paths derived from
//! that component's descriptor.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::component::ComponentDescriptor;
use crate::consts::DOWNLOAD_TIMEOUT;

/// Errors that can occur while fetching a component.
#[derive(Debug, Error)]
pub enum FetchError {
  /// The HTTP client could not be built.
  #[error("failed to create HTTP client: {0}")]
  Client(#[source] reqwest::Error),

  /// The request failed or the body could not be read.
  #[error("download failed for {url}: {source}")]
  Network {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  /// The server answered with a non-success status.
  #[error("download failed for {url}: HTTP {status}")]
  Status { url: String, status: reqwest::StatusCode },

  /// Writing or renaming the archive failed.
  #[error("i/o error on {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The archive could not be unpacked.
  #[error("failed to extract {}: {source}", .archive.display())]
  Extract {
    archive: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// What [`fetch_and_extract`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
  /// The source directory already existed; nothing was touched.
  AlreadyPresent,
  /// The archive was unpacked, after downloading it if `downloaded`.
  Extracted { downloaded: bool },
}

/// HTTP client shared by all fetch tasks of a run.
pub fn http_client() -> Result<reqwest::Client, FetchError> {
  reqwest::Client::builder()
    .timeout(DOWNLOAD_TIMEOUT)
    .build()
    .map_err(FetchError::Client)
}

/// Make `work_dir/<name>-<version>` exist by downloading and unpacking the archive.
///
/// Idempotent: an existing source directory short-circuits everything, and an
/// existing archive skips the download. The archive is streamed into
/// `<archive>.download` and renamed into place only once complete, so a
/// partially written archive is never mistaken for a finished one.
pub async fn fetch_and_extract(
  descriptor: &ComponentDescriptor,
  work_dir: &Path,
  client: &reqwest::Client,
) -> Result<FetchOutcome, FetchError> {
  let source_dir = work_dir.join(descriptor.source_path());
  if source_dir.exists() {
    info!(path = %source_dir.display(), "already exists, skipping download and extraction");
    return Ok(FetchOutcome::AlreadyPresent);
  }

  let archive = work_dir.join(descriptor.archive_path());
  let downloaded = if archive.exists() {
    info!(path = %archive.display(), "archive already exists, skipping download");
    false
  } else {
    let url = descriptor.download_url();
    info!(component = %descriptor, url = %url, "downloading");
    download(client, &url, &archive).await?;
    true
  };

  info!(path = %archive.display(), "extracting");
  let (archive_path, dest) = (archive.clone(), work_dir.to_path_buf());
  tokio::task::spawn_blocking(move || unpack_tar_gz(&archive_path, &dest))
    .await
    .map_err(|e| FetchError::Extract {
      archive: archive.clone(),
      source: std::io::Error::other(e),
    })?
    .map_err(|e| FetchError::Extract {
      archive: archive.clone(),
      source: e,
    })?;

  info!(path = %source_dir.display(), "extracted");
  Ok(FetchOutcome::Extracted { downloaded })
}

async fn download(client: &reqwest::Client, url: &str, dest: &Path) -> Result<(), FetchError> {
  let mut response = client.get(url).send().await.map_err(|e| FetchError::Network {
    url: url.to_string(),
    source: e,
  })?;

  if !response.status().is_success() {
    return Err(FetchError::Status {
      url: url.to_string(),
      status: response.status(),
    });
  }

  let tmp = temp_path(dest);
  let result = write_body(&mut response, url, &tmp).await;
  if result.is_err() {
    let _ = tokio::fs::remove_file(&tmp).await;
    return result;
  }

  tokio::fs::rename(&tmp, dest).await.map_err(|e| FetchError::Io {
    path: dest.to_path_buf(),
    source: e,
  })?;

  debug!(path = %dest.display(), "download complete");
  Ok(())
}

async fn write_body(response: &mut reqwest::Response, url: &str, tmp: &Path) -> Result<(), FetchError> {
  let io_err = |e: std::io::Error| FetchError::Io {
    path: tmp.to_path_buf(),
    source: e,
  };

  let mut file = tokio::fs::File::create(tmp).await.map_err(io_err)?;
  let mut size = 0usize;
  while let Some(chunk) = response.chunk().await.map_err(|e| FetchError::Network {
    url: url.to_string(),
    source: e,
  })? {
    size += chunk.len();
    file.write_all(&chunk).await.map_err(io_err)?;
  }
  file.flush().await.map_err(io_err)?;
  file.sync_all().await.map_err(io_err)?;

  debug!(path = %tmp.display(), size, "wrote archive body");
  Ok(())
}

/// Sibling path the archive is streamed into before the final rename.
fn temp_path(dest: &Path) -> PathBuf {
  let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(".download");
  dest.with_file_name(name)
}

fn unpack_tar_gz(archive_path: &Path, dest: &Path) -> std::io::Result<()> {
  let file = File::open(archive_path)?;
  let decoder = GzDecoder::new(BufReader::new(file));
  let mut archive = Archive::new(decoder);
  archive.unpack(dest)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::component::ComponentKind;
  use flate2::Compression;
  use flate2::write::GzEncoder;
  use tempfile::TempDir;

  /// A gzip'd tarball containing `<root>/configure`.
  fn tarball(root: &str) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let body = b"#!/bin/sh\necho configured\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(body.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder
      .append_data(&mut header, format!("{root}/configure"), &body[..])
      .unwrap();

    builder.into_inner().unwrap().finish().unwrap()
  }

  /// Points at a closed port so any network access fails loudly.
  fn offline_nginx() -> ComponentDescriptor {
    ComponentDescriptor::new(ComponentKind::Nginx, "1.25.0", false).with_download_prefix("http://127.0.0.1:1")
  }

  #[test]
  fn temp_path_is_sibling() {
    assert_eq!(
      temp_path(Path::new("/work/nginx-1.25.0.tar.gz")),
      PathBuf::from("/work/nginx-1.25.0.tar.gz.download")
    );
  }

  #[tokio::test]
  async fn existing_source_dir_skips_everything() {
    let temp_dir = TempDir::new().unwrap();
    let nginx = offline_nginx();
    std::fs::create_dir(temp_dir.path().join(nginx.source_path())).unwrap();

    let client = http_client().unwrap();
    let outcome = fetch_and_extract(&nginx, temp_dir.path(), &client).await.unwrap();

    assert_eq!(outcome, FetchOutcome::AlreadyPresent);
    assert!(!temp_dir.path().join(nginx.archive_path()).exists());
  }

  #[tokio::test]
  async fn existing_archive_is_extracted_without_download() {
    let temp_dir = TempDir::new().unwrap();
    let nginx = offline_nginx();
    std::fs::write(temp_dir.path().join(nginx.archive_path()), tarball(&nginx.source_path())).unwrap();

    let client = http_client().unwrap();
    let outcome = fetch_and_extract(&nginx, temp_dir.path(), &client).await.unwrap();

    assert_eq!(outcome, FetchOutcome::Extracted { downloaded: false });
    assert!(temp_dir.path().join("nginx-1.25.0/configure").is_file());
  }

  #[tokio::test]
  async fn downloads_then_extracts_once() {
    let temp_dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", "/zlib-1.3.1.tar.gz")
      .with_status(200)
      .with_body(tarball("zlib-1.3.1"))
      .expect(1)
      .create_async()
      .await;

    let zlib = ComponentDescriptor::new(ComponentKind::Zlib, "1.3.1", true).with_download_prefix(server.url());
    let client = http_client().unwrap();

    let first = fetch_and_extract(&zlib, temp_dir.path(), &client).await.unwrap();
    assert_eq!(first, FetchOutcome::Extracted { downloaded: true });
    assert!(temp_dir.path().join("zlib-1.3.1.tar.gz").is_file());
    assert!(!temp_dir.path().join("zlib-1.3.1.tar.gz.download").exists());
    assert!(temp_dir.path().join("zlib-1.3.1/configure").is_file());

    let second = fetch_and_extract(&zlib, temp_dir.path(), &client).await.unwrap();
    assert_eq!(second, FetchOutcome::AlreadyPresent);

    mock.assert_async().await;
  }

  #[tokio::test]
  async fn http_error_leaves_no_archive() {
    let temp_dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new_async().await;
    let _mock = server
      .mock("GET", "/pcre2-10.42/pcre2-10.42.tar.gz")
      .with_status(404)
      .create_async()
      .await;

    let pcre = ComponentDescriptor::new(ComponentKind::Pcre, "10.42", true).with_download_prefix(server.url());
    let client = http_client().unwrap();

    let result = fetch_and_extract(&pcre, temp_dir.path(), &client).await;

    assert!(matches!(result, Err(FetchError::Status { status, .. }) if status.as_u16() == 404));
    assert!(!temp_dir.path().join(pcre.archive_path()).exists());
    assert!(!temp_dir.path().join("pcre2-10.42.tar.gz.download").exists());
  }

  #[tokio::test]
  async fn corrupt_archive_is_an_extract_error() {
    let temp_dir = TempDir::new().unwrap();
    let nginx = offline_nginx();
    std::fs::write(temp_dir.path().join(nginx.archive_path()), b"not a tarball").unwrap();

    let client = http_client().unwrap();
    let result = fetch_and_extract(&nginx, temp_dir.path(), &client).await;

    assert!(matches!(result, Err(FetchError::Extract { .. })));
  }
}

//! Dataset fetcher: downloads the MovieLens archive and extracts the CSVs.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::config::DatasetConfig;

/// Files extracted from the archive root into the raw directory.
pub const DATASET_MEMBERS: [&str; 2] = ["movies.csv", "ratings.csv"];

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is not a readable zip archive: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("{} has no member '{member}'", path.display())]
    MissingMember { path: PathBuf, member: String },

    #[error("extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl DownloadError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Transport errors and server-side statuses may succeed on a later run.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { source, .. } => source.is_timeout() || source.is_connect(),
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// What a fetch did.
#[derive(Debug, Clone, Serialize)]
pub struct FetchReport {
    pub archive: PathBuf,
    /// False when an existing archive was reused.
    pub downloaded: bool,
    /// Bytes written by the download, if one happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    pub extracted: Vec<PathBuf>,
    /// Previously extracted files left untouched.
    pub kept: Vec<PathBuf>,
}

/// Downloads and unpacks the dataset archive.
#[derive(Debug, Clone)]
pub struct DatasetFetcher {
    client: Arc<reqwest::Client>,
}

impl DatasetFetcher {
    pub fn new() -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(concat!("reelhouse/", env!("CARGO_PKG_VERSION")))
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    /// Make sure `movies.csv` and `ratings.csv` exist in `raw_dir`.
    ///
    /// An existing archive is reused and existing CSV files are kept. When
    /// both CSV files are already present nothing is downloaded at all.
    /// `force` re-downloads the archive and overwrites the CSV files.
    pub async fn fetch(
        &self,
        dataset: &DatasetConfig,
        raw_dir: &Path,
        force: bool,
    ) -> Result<FetchReport, DownloadError> {
        tokio::fs::create_dir_all(raw_dir)
            .await
            .map_err(|error| DownloadError::io(raw_dir, error))?;
        let archive = raw_dir.join(dataset.archive_file_name());

        let members_present = DATASET_MEMBERS
            .iter()
            .all(|member| raw_dir.join(member).is_file());
        if members_present && !force {
            tracing::info!(raw_dir = %raw_dir.display(), "dataset already extracted, skipping download");
            return Ok(FetchReport {
                archive,
                downloaded: false,
                bytes: None,
                extracted: Vec::new(),
                kept: DATASET_MEMBERS.iter().map(|member| raw_dir.join(member)).collect(),
            });
        }

        let bytes = if archive.is_file() && !force {
            tracing::info!(archive = %archive.display(), "archive already downloaded");
            None
        } else {
            Some(self.download(dataset.url.as_str(), &archive).await?)
        };

        let archive_path = archive.clone();
        let root = dataset.archive_root.clone();
        let target = raw_dir.to_path_buf();
        let (extracted, kept) = tokio::task::spawn_blocking(move || {
            extract_members(&archive_path, root.as_str(), &target, force)
        })
        .await??;

        Ok(FetchReport {
            archive,
            downloaded: bytes.is_some(),
            bytes,
            extracted,
            kept,
        })
    }

    /// Stream `url` into `<archive>.part`, renaming it once complete.
    async fn download(&self, url: &str, archive: &Path) -> Result<u64, DownloadError> {
        tracing::info!(url, archive = %archive.display(), "downloading dataset");
        let http_error = |source| DownloadError::Http {
            url: url.to_string(),
            source,
        };

        let mut response = self.client.get(url).send().await.map_err(http_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let partial = partial_path(archive);
        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|error| DownloadError::io(&partial, error))?;
        let mut written = 0_u64;
        while let Some(chunk) = response.chunk().await.map_err(http_error)? {
            file.write_all(&chunk)
                .await
                .map_err(|error| DownloadError::io(&partial, error))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|error| DownloadError::io(&partial, error))?;
        drop(file);

        tokio::fs::rename(&partial, archive)
            .await
            .map_err(|error| DownloadError::io(archive, error))?;
        tracing::info!(bytes = written, "download complete");
        Ok(written)
    }
}

impl Default for DatasetFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract [`DATASET_MEMBERS`] from `<root>/` into `raw_dir`.
///
/// Returns the extracted and the kept paths.
fn extract_members(
    archive: &Path,
    root: &str,
    raw_dir: &Path,
    force: bool,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>), DownloadError> {
    let file = File::open(archive).map_err(|error| DownloadError::io(archive, error))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|source| DownloadError::Archive {
        path: archive.to_path_buf(),
        source,
    })?;

    let mut extracted = Vec::new();
    let mut kept = Vec::new();
    for member in DATASET_MEMBERS {
        let target = raw_dir.join(member);
        if target.is_file() && !force {
            kept.push(target);
            continue;
        }

        let name = match root.trim_matches('/') {
            "" => member.to_string(),
            root => format!("{root}/{member}"),
        };
        let mut entry = match zip.by_name(name.as_str()) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(DownloadError::MissingMember {
                    path: archive.to_path_buf(),
                    member: name,
                })
            }
            Err(source) => {
                return Err(DownloadError::Archive {
                    path: archive.to_path_buf(),
                    source,
                })
            }
        };

        let partial = partial_path(&target);
        let mut output = File::create(&partial).map_err(|error| DownloadError::io(&partial, error))?;
        let bytes = io::copy(&mut entry, &mut output).map_err(|error| DownloadError::io(&partial, error))?;
        drop(output);
        fs::rename(&partial, &target).map_err(|error| DownloadError::io(&target, error))?;

        tracing::debug!(member = name.as_str(), bytes, "extracted");
        extracted.push(target);
    }

    Ok((extracted, kept))
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use zip::write::SimpleFileOptions;

    fn write_archive(path: &Path, members: &[(&str, &str)]) {
        let file = File::create(path).expect("create archive");
        let mut zip = zip::ZipWriter::new(file);
        for (name, contents) in members {
            zip.start_file(*name, SimpleFileOptions::default())
                .expect("start member");
            zip.write_all(contents.as_bytes()).expect("write member");
        }
        zip.finish().expect("finish archive");
    }

    /// Answer exactly one HTTP request with `status` and `body`.
    async fn serve_once(status: &'static str, body: Vec<u8>) -> DatasetConfig {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local address");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut buffer = [0_u8; 1024];
            while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                let read = socket.read(&mut buffer).await.expect("read request");
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buffer[..read]);
            }
            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.expect("write head");
            socket.write_all(&body).await.expect("write body");
            let _ = socket.shutdown().await;
        });

        DatasetConfig {
            url: format!("http://{address}/ml-test.zip"),
            archive_root: String::from("ml-test"),
        }
    }

    fn local_fetcher() -> DatasetFetcher {
        DatasetFetcher::with_client(
            reqwest::Client::builder()
                .no_proxy()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("client"),
        )
    }

    fn offline_dataset() -> DatasetConfig {
        DatasetConfig {
            url: String::from("http://127.0.0.1:9/ml-test.zip"),
            archive_root: String::from("ml-test"),
        }
    }

    #[tokio::test]
    async fn reuses_existing_archive_and_extracts_members() {
        let temp = tempdir().expect("tempdir");
        write_archive(
            &temp.path().join("ml-test.zip"),
            &[
                ("ml-test/movies.csv", "movieId,title,genres\n1,A,Comedy\n"),
                ("ml-test/ratings.csv", "userId,movieId,rating,timestamp\n1,1,4.0,1\n"),
                ("ml-test/tags.csv", "userId,movieId,tag,timestamp\n"),
            ],
        );

        let report = DatasetFetcher::new()
            .fetch(&offline_dataset(), temp.path(), false)
            .await
            .expect("fetch");

        assert!(!report.downloaded);
        assert_eq!(report.extracted.len(), 2);
        assert!(!temp.path().join("tags.csv").exists());
        let movies = fs::read_to_string(temp.path().join("movies.csv")).expect("movies");
        assert!(movies.starts_with("movieId,title,genres"));
    }

    #[tokio::test]
    async fn keeps_extracted_files_unless_forced() {
        let temp = tempdir().expect("tempdir");
        write_archive(
            &temp.path().join("ml-test.zip"),
            &[
                ("ml-test/movies.csv", "from archive\n"),
                ("ml-test/ratings.csv", "from archive\n"),
            ],
        );
        fs::write(temp.path().join("movies.csv"), "local copy\n").expect("local movies");

        let report = DatasetFetcher::new()
            .fetch(&offline_dataset(), temp.path(), false)
            .await
            .expect("fetch");
        assert_eq!(report.kept, vec![temp.path().join("movies.csv")]);
        assert_eq!(report.extracted, vec![temp.path().join("ratings.csv")]);
        assert_eq!(
            fs::read_to_string(temp.path().join("movies.csv")).expect("movies"),
            "local copy\n"
        );
    }

    #[tokio::test]
    async fn skips_everything_when_csvs_exist() {
        let temp = tempdir().expect("tempdir");
        for member in DATASET_MEMBERS {
            fs::write(temp.path().join(member), "present\n").expect("write");
        }

        let report = DatasetFetcher::new()
            .fetch(&offline_dataset(), temp.path(), false)
            .await
            .expect("no archive needed");
        assert!(!report.downloaded);
        assert!(report.extracted.is_empty());
        assert_eq!(report.kept.len(), 2);
    }

    #[tokio::test]
    async fn reports_missing_member() {
        let temp = tempdir().expect("tempdir");
        write_archive(
            &temp.path().join("ml-test.zip"),
            &[("ml-test/movies.csv", "movieId,title,genres\n")],
        );

        let error = DatasetFetcher::new()
            .fetch(&offline_dataset(), temp.path(), false)
            .await
            .expect_err("ratings.csv is missing");
        match error {
            DownloadError::MissingMember { member, .. } => assert_eq!(member, "ml-test/ratings.csv"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn rejects_corrupt_archive() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("ml-test.zip"), "not a zip").expect("write");

        let error = DatasetFetcher::new()
            .fetch(&offline_dataset(), temp.path(), false)
            .await
            .expect_err("corrupt archive");
        assert!(matches!(error, DownloadError::Archive { .. }));
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn downloads_archive_then_extracts() {
        let temp = tempdir().expect("tempdir");
        let source = temp.path().join("source.zip");
        write_archive(
            &source,
            &[
                ("ml-test/movies.csv", "movieId,title,genres\n1,A,Comedy\n"),
                ("ml-test/ratings.csv", "userId,movieId,rating,timestamp\n1,1,4.0,1\n"),
            ],
        );
        let body = fs::read(&source).expect("archive bytes");
        let size = body.len() as u64;
        let raw_dir = temp.path().join("raw");
        let dataset = serve_once("200 OK", body).await;

        let report = local_fetcher()
            .fetch(&dataset, &raw_dir, false)
            .await
            .expect("fetch");

        assert!(report.downloaded);
        assert_eq!(report.bytes, Some(size));
        assert_eq!(report.archive, raw_dir.join("ml-test.zip"));
        assert!(report.archive.is_file());
        assert!(!partial_path(&report.archive).exists());
        assert_eq!(report.extracted.len(), 2);
    }

    #[tokio::test]
    async fn server_errors_are_retryable_and_leave_nothing_behind() {
        let temp = tempdir().expect("tempdir");
        let dataset = serve_once("503 Service Unavailable", Vec::new()).await;

        let error = local_fetcher()
            .fetch(&dataset, temp.path(), false)
            .await
            .expect_err("server error");

        assert!(matches!(error, DownloadError::Status { status: 503, .. }));
        assert!(error.is_retryable());
        let archive = temp.path().join("ml-test.zip");
        assert!(!archive.exists());
        assert!(!partial_path(&archive).exists());
    }

    #[tokio::test]
    async fn missing_dataset_is_not_retryable() {
        let temp = tempdir().expect("tempdir");
        let dataset = serve_once("404 Not Found", Vec::new()).await;

        let error = local_fetcher()
            .fetch(&dataset, temp.path(), false)
            .await
            .expect_err("not found");

        assert!(matches!(error, DownloadError::Status { status: 404, .. }));
        assert!(!error.is_retryable());
        assert!(!temp.path().join("ml-test.zip").exists());
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/data/raw/ml-32m.zip")),
            PathBuf::from("/data/raw/ml-32m.zip.part")
        );
    }
}

// src/artifact.rs
//
// Artifacts are written to a hidden, uniquely named file next to their
// final path and renamed into place only once the whole body is on disk.
// The served path therefore only ever holds a complete image.

use std::path::{Path, PathBuf};

use axum::body::Bytes;
use futures::{stream::BoxStream, Stream, StreamExt, TryStreamExt};
use reqwest::Url;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::OtaError;
use crate::registry::ArtifactRef;
use crate::types::DeviceId;

const FILE_PREFIX: &str = "firmware_";
const FILE_SUFFIX: &str = ".bin";
const TEMP_SUFFIX: &str = ".part";

pub enum ArtifactSource<'a> {
    Upload(BoxStream<'a, Result<Bytes, OtaError>>),
    Remote(Url),
}

/// A fully written artifact waiting to be renamed into place.
///
/// Error paths remove the temporary file with [`StagedArtifact::discard`].
/// `Drop` only covers a staging future that was cancelled mid-write.
#[derive(Debug)]
pub struct StagedArtifact {
    temp: PathBuf,
    target: PathBuf,
    file_name: String,
    source_url: Option<String>,
    bytes: u64,
    settled: bool,
}

impl StagedArtifact {
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> u64 {
        self.bytes
    }

    #[cfg(test)]
    pub(crate) fn temp_path(&self) -> &Path {
        &self.temp
    }

    async fn discard(mut self) {
        self.settled = true;
        if let Err(e) = fs::remove_file(&self.temp).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("could not remove {}: {e}", self.temp.display());
            }
        }
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        if !self.settled {
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}

pub struct ArtifactStore {
    dir: PathBuf,
    client: reqwest::Client,
    max_bytes: u64,
}

impl ArtifactStore {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.firmware_dir)?;
        sweep_temp_files(&config.firmware_dir)?;
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()?;
        Ok(Self {
            dir: config.firmware_dir.clone(),
            client,
            max_bytes: config.max_artifact_bytes,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `firmware_<deviceId>.bin`. Ids that would escape the directory are
    /// rejected.
    pub fn file_name(device: &DeviceId) -> Result<String, OtaError> {
        let id = device.as_str();
        if id.contains(['/', '\\', '\0']) {
            return Err(OtaError::invalid(format!("device id {id:?} is not storable")));
        }
        Ok(format!("{FILE_PREFIX}{id}{FILE_SUFFIX}"))
    }

    /// Inverse of [`ArtifactStore::file_name`].
    pub fn device_for_file(file_name: &str) -> Option<DeviceId> {
        let id = file_name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
        DeviceId::parse(id).ok()
    }

    pub fn path_for(&self, device: &DeviceId) -> Result<PathBuf, OtaError> {
        Ok(self.dir.join(Self::file_name(device)?))
    }

    /// Writes the whole artifact to a temporary file. Nothing at the served
    /// path changes.
    pub async fn stage(
        &self,
        device: &DeviceId,
        source: ArtifactSource<'_>,
    ) -> Result<StagedArtifact, OtaError> {
        let file_name = Self::file_name(device)?;
        let mut staged = StagedArtifact {
            temp: self
                .dir
                .join(format!(".{file_name}.{}{TEMP_SUFFIX}", Uuid::new_v4())),
            target: self.dir.join(&file_name),
            file_name,
            source_url: None,
            bytes: 0,
            settled: false,
        };

        let written = match source {
            ArtifactSource::Upload(stream) => self
                .write_stream(&mut staged, stream, OtaError::InvalidArgument)
                .await
                .and_then(|()| {
                    if staged.is_empty() {
                        Err(OtaError::invalid("No file uploaded"))
                    } else {
                        Ok(())
                    }
                }),
            ArtifactSource::Remote(url) => {
                staged.source_url = Some(url.to_string());
                let fetched = self.fetch_into(&mut staged, url).await;
                if let Err(e) = &fetched {
                    warn!("fetch for {device} failed: {e}");
                }
                fetched
            }
        };

        match written {
            Ok(()) => Ok(staged),
            Err(e) => {
                staged.discard().await;
                Err(e)
            }
        }
    }

    /// Renames a staged artifact over the served path.
    pub async fn publish(&self, mut staged: StagedArtifact) -> Result<ArtifactRef, OtaError> {
        if let Err(e) = fs::rename(&staged.temp, &staged.target).await {
            staged.discard().await;
            return Err(e.into());
        }
        staged.settled = true;
        info!(
            "published {} ({} bytes)",
            staged.target.display(),
            staged.bytes
        );
        Ok(ArtifactRef::Stored {
            file_name: staged.file_name.clone(),
            source_url: staged.source_url.clone(),
        })
    }

    async fn fetch_into(&self, staged: &mut StagedArtifact, url: Url) -> Result<(), OtaError> {
        let res = self.client.get(url.clone()).send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(OtaError::upstream(format!("{url} returned {status}")));
        }

        let expected = res.content_length();
        if let Some(len) = expected {
            if len > self.max_bytes {
                return Err(OtaError::upstream(format!(
                    "artifact is {len} bytes, limit is {}",
                    self.max_bytes
                )));
            }
        }

        let stream = res.bytes_stream().map_err(OtaError::from);
        self.write_stream(staged, stream, OtaError::UpstreamFetchFailed).await?;

        if let Some(len) = expected {
            if staged.bytes != len {
                return Err(OtaError::upstream(format!(
                    "body ended after {} of {len} bytes",
                    staged.bytes
                )));
            }
        }
        if staged.is_empty() {
            return Err(OtaError::upstream(format!("{url} returned an empty body")));
        }
        Ok(())
    }

    async fn write_stream<S>(
        &self,
        staged: &mut StagedArtifact,
        stream: S,
        reject: fn(String) -> OtaError,
    ) -> Result<(), OtaError>
    where
        S: Stream<Item = Result<Bytes, OtaError>>,
    {
        let mut stream = std::pin::pin!(stream);
        let mut file = fs::File::create(&staged.temp).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            staged.bytes += chunk.len() as u64;
            if staged.bytes > self.max_bytes {
                return Err(reject(format!(
                    "artifact exceeds the {} byte limit",
                    self.max_bytes
                )));
            }
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;
        Ok(())
    }
}

/// Removes staging files left behind by a previous process.
fn sweep_temp_files(dir: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) && entry.file_type()?.is_file() {
            warn!("removing stale staging file {name}");
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

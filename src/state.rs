// src/state.rs
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::artifact::{ArtifactSource, ArtifactStore};
use crate::config::Config;
use crate::error::OtaError;
use crate::liveness::LivenessTracker;
use crate::registry::{ArtifactRef, UpdateRegistry};
use crate::slots::Slots;
use crate::types::DeviceId;

pub struct AppState {
    pub config: Config,
    pub liveness: LivenessTracker,
    pub registry: UpdateRegistry,
    pub artifacts: ArtifactStore,
    publish_locks: Slots<Arc<Mutex<()>>>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let artifacts = ArtifactStore::new(&config)?;
        Ok(Arc::new(Self {
            liveness: LivenessTracker::new(config.freshness_window),
            registry: UpdateRegistry::new(),
            artifacts,
            publish_locks: Slots::new(),
            config,
        }))
    }

    /// Materializes an artifact for `device` and arms it. On any failure the
    /// served file and the registry are left as they were.
    pub async fn acquire_artifact(
        &self,
        device: &DeviceId,
        source: ArtifactSource<'_>,
    ) -> Result<ArtifactRef, OtaError> {
        let staged = self.artifacts.stage(device, source).await?;

        // rename and arm as one step per device, so concurrent acquires
        // cannot arm a ref to a file a later publish already replaced
        let lock = self.publish_lock(device);
        let _guard = lock.lock().await;
        let artifact = self.artifacts.publish(staged).await?;
        self.registry.arm(device, artifact.clone())?;
        Ok(artifact)
    }

    /// Arms a remote URL without fetching it. The URL is handed to the
    /// device exactly as given.
    pub fn arm_link(&self, device: &DeviceId, url: &str) -> Result<ArtifactRef, OtaError> {
        let artifact = ArtifactRef::Remote { url: url.to_string() };
        self.registry.arm(device, artifact.clone())?;
        Ok(artifact)
    }

    fn publish_lock(&self, device: &DeviceId) -> Arc<Mutex<()>> {
        self.publish_locks.upsert(device.as_str(), |slot| {
            slot.get_or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::{stream, StreamExt};
    use reqwest::Url;

    use super::*;

    fn state(dir: &std::path::Path) -> Arc<AppState> {
        AppState::new(Config {
            firmware_dir: dir.to_path_buf(),
            ..Config::default()
        })
        .unwrap()
    }

    fn upload(body: &'static [u8]) -> ArtifactSource<'static> {
        let chunk = Ok(axum::body::Bytes::from_static(body));
        ArtifactSource::Upload(stream::iter(vec![chunk]).boxed())
    }

    #[tokio::test]
    async fn acquire_arms_the_published_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let a = DeviceId::parse("A").unwrap();

        let artifact = state.acquire_artifact(&a, upload(b"v1")).await.unwrap();
        assert_eq!(state.registry.consume_if_pending(&a), Some(artifact));
        assert_eq!(state.registry.consume_if_pending(&a), None);
    }

    #[tokio::test]
    async fn failed_acquire_keeps_prior_pending_update() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let a = DeviceId::parse("A").unwrap();

        let first = state.acquire_artifact(&a, upload(b"v1")).await.unwrap();
        let bad: Url = "http://127.0.0.1:1/fw.bin".parse().unwrap();
        assert!(state
            .acquire_artifact(&a, ArtifactSource::Remote(bad))
            .await
            .is_err());

        assert_eq!(state.registry.consume_if_pending(&a), Some(first));
        let served = std::fs::read(state.artifacts.path_for(&a).unwrap()).unwrap();
        assert_eq!(served, b"v1");
    }

    #[tokio::test]
    async fn failed_acquire_on_fresh_device_arms_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let a = DeviceId::parse("A").unwrap();

        let bad: Url = "http://127.0.0.1:1/fw.bin".parse().unwrap();
        assert!(state
            .acquire_artifact(&a, ArtifactSource::Remote(bad))
            .await
            .is_err());
        assert!(state.registry.get(&a).is_none());
        assert!(!state.artifacts.path_for(&a).unwrap().exists());
    }

    #[tokio::test]
    async fn link_mode_arms_the_url_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let a = DeviceId::parse("A").unwrap();
        for url in [
            "HTTPS://Raw.Example.com/fw.bin",
            "https://raw.example.com",
            "https://raw.example.com/a b.bin",
        ] {
            state.arm_link(&a, url).unwrap();
            let got = state.registry.consume_if_pending(&a).unwrap();
            assert_eq!(got.location(Some("http://ignored")), url);
        }
    }
}

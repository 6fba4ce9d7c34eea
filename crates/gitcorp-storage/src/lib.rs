//! Durable local state: the row-marker checkpoint file and the mirror
//! cache snapshot, both written atomically via temp-file rename.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use gitcorp_core::CacheEntry;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub const CRATE_NAME: &str = "gitcorp-storage";

/// In-memory mirror of the sink's login → (company, fingerprint) state.
pub type MirrorMap = HashMap<String, CacheEntry>;

async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
    }

    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    drop(file);

    fs::rename(&temp_path, path).await.with_context(|| {
        format!(
            "atomically renaming {} -> {}",
            temp_path.display(),
            path.display()
        )
    })
}

/// Durable single-integer checkpoint: how many source rows have already
/// been consumed. The persisted value is a lower bound on true progress;
/// re-processing a row is always safe.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last durably recorded offset, or 0 when no file exists yet.
    pub async fn read(&self) -> anyhow::Result<u64> {
        match fs::read_to_string(&self.path).await {
            Ok(text) => text
                .trim()
                .parse::<u64>()
                .with_context(|| format!("parsing checkpoint file {}", self.path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(err) => {
                Err(err).with_context(|| format!("reading checkpoint file {}", self.path.display()))
            }
        }
    }

    /// Overwrite the stored offset. Atomic with respect to a crash: either
    /// the write lands fully or the prior value remains.
    pub async fn write(&self, offset: u64) -> anyhow::Result<()> {
        write_atomic(&self.path, format!("{offset}\n").as_bytes()).await?;
        debug!(offset, path = %self.path.display(), "checkpoint persisted");
        Ok(())
    }
}

/// The mirror cache snapshot file. On-disk shape is a JSON object mapping
/// each login to a two-element `[company, fingerprint]` array.
#[derive(Debug, Clone)]
pub struct MirrorCacheFile {
    path: PathBuf,
}

impl MirrorCacheFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot, or an empty map when the file does not exist.
    pub async fn load(&self) -> anyhow::Result<MirrorMap> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(MirrorMap::new());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading cache file {}", self.path.display()));
            }
        };
        let raw: HashMap<String, (String, String)> = serde_json::from_str(&text)
            .with_context(|| format!("parsing cache file {}", self.path.display()))?;
        Ok(raw
            .into_iter()
            .map(|(login, (company, fingerprint))| {
                (
                    login,
                    CacheEntry {
                        company,
                        fingerprint,
                    },
                )
            })
            .collect())
    }

    /// Rewrite the snapshot atomically.
    pub async fn persist(&self, map: &MirrorMap) -> anyhow::Result<()> {
        let raw: HashMap<&str, (&str, &str)> = map
            .iter()
            .map(|(login, entry)| {
                (
                    login.as_str(),
                    (entry.company.as_str(), entry.fingerprint.as_str()),
                )
            })
            .collect();
        let bytes = serde_json::to_vec(&raw).context("serializing mirror cache")?;
        write_atomic(&self.path, &bytes).await?;
        debug!(entries = map.len(), path = %self.path.display(), "mirror cache persisted");
        Ok(())
    }
}

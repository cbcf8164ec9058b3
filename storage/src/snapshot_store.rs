//! The snapshot store: full state-machine dumps, atomically finalized (write-temp-then-rename)
//! so a crash mid-write never leaves a partial snapshot visible to a restarting node.

use std::path::PathBuf;

use raft::storage::SnapshotMeta;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::error::StoreError;

const TMP_PREFIX: &str = "tmp-";
const META_SUFFIX: &str = ".meta.json";
const DATA_SUFFIX: &str = ".data";

/// Durable storage for snapshots, retaining a bounded number of the most recent ones.
pub struct SnapshotStore {
    dir: PathBuf,
    retain: usize,
}

impl SnapshotStore {
    /// Open the snapshot directory, discarding any partial (temp-named) snapshot left behind by
    /// a crash mid-write.
    pub async fn open(dir: impl Into<PathBuf>, retain: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(TMP_PREFIX) {
                let _ = fs::remove_file(entry.path()).await;
            }
        }

        Ok(Self { dir, retain })
    }

    /// Begin writing a new snapshot. Returns a handle writing to a temp file; call `finalize`
    /// with the same id once all data has been written.
    pub async fn create(&self) -> Result<(String, fs::File)> {
        let id = format!("snap-{}", snapshot_id_suffix());
        let tmp_path = self.tmp_data_path(&id);
        let file = fs::File::create(&tmp_path).await?;
        Ok((id, file))
    }

    /// Atomically publish the snapshot written via `create`, then prune old snapshots beyond the
    /// retention count.
    pub async fn finalize(&self, id: &str, meta: &SnapshotMeta) -> Result<()> {
        let tmp_path = self.tmp_data_path(id);
        let data_path = self.data_path(id);
        fs::rename(&tmp_path, &data_path).await?;

        let meta_bytes = serde_json::to_vec(meta)?;
        let tmp_meta_path = self.dir.join(format!("{}{}{}", TMP_PREFIX, id, META_SUFFIX));
        fs::write(&tmp_meta_path, &meta_bytes).await?;
        fs::rename(&tmp_meta_path, self.meta_path(id)).await?;

        self.prune().await?;
        Ok(())
    }

    /// All snapshot metadata, sorted newest-first by the log id they cover.
    pub async fn list(&self) -> Result<Vec<(String, SnapshotMeta)>> {
        let mut out = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_suffix(META_SUFFIX) {
                if id.starts_with(TMP_PREFIX) {
                    continue;
                }
                let bytes = fs::read(entry.path()).await?;
                let meta: SnapshotMeta = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::CorruptState(format!("snapshot meta {}: {}", id, e)))?;
                out.push((id.to_string(), meta));
            }
        }
        out.sort_by(|a, b| b.1.last_log_id.cmp(&a.1.last_log_id));
        Ok(out)
    }

    /// The most recent snapshot, if any.
    pub async fn latest(&self) -> Result<Option<(String, SnapshotMeta)>> {
        Ok(self.list().await?.into_iter().next())
    }

    /// Open a reader for the given snapshot's data.
    pub async fn open_reader(&self, id: &str) -> Result<fs::File> {
        Ok(fs::File::open(self.data_path(id)).await?)
    }

    async fn prune(&self) -> Result<()> {
        let all = self.list().await?;
        for (id, _) in all.into_iter().skip(self.retain) {
            let _ = fs::remove_file(self.data_path(&id)).await;
            let _ = fs::remove_file(self.meta_path(&id)).await;
        }
        Ok(())
    }

    fn tmp_data_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}{}{}", TMP_PREFIX, id, DATA_SUFFIX))
    }

    fn data_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}{}", id, DATA_SUFFIX))
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}{}", id, META_SUFFIX))
    }
}

/// A cheap per-process-unique suffix; snapshot ids only need to be unique within a single node's
/// directory, not globally.
fn snapshot_id_suffix() -> u128 {
    use std::time::SystemTime;
    use std::time::UNIX_EPOCH;
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0)
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::CorruptState(e.to_string())
    }
}

//! File-backed collaborators
//!
//! Snapshots and baselines are read from JSON documents; proposals are
//! written into a directory that a version-control working tree picks up.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{async_trait, BaselineSource, ProposalSink, SnapshotProvider};
use crate::models::{ClusterSnapshot, CostBaseline, SNAPSHOT_SCHEMA_VERSION};
use crate::observability::EngineMetrics;
use crate::proposal::ChangeProposal;

/// Decode each array element on its own, dropping the ones that fail
fn lenient_records<T: DeserializeOwned>(document: &Value, field: &str, skipped: &mut u64) -> Vec<T> {
    let Some(items) = document.get(field).and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value::<T>(item.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(field, index, error = %e, "Skipping malformed snapshot record");
                *skipped += 1;
                None
            }
        })
        .collect()
}

/// Parse a snapshot document, skipping malformed records
///
/// Returns the snapshot and the number of records that were skipped. A
/// missing header or an unsupported schema version fails the whole load.
pub fn parse_snapshot(raw: &str) -> Result<(ClusterSnapshot, u64)> {
    let document: Value = serde_json::from_str(raw).context("Snapshot is not valid JSON")?;

    let schema_version = document
        .get("schema_version")
        .and_then(Value::as_u64)
        .context("Snapshot has no schema_version")?;
    if schema_version != SNAPSHOT_SCHEMA_VERSION as u64 {
        bail!(
            "Unsupported snapshot schema version {} (expected {})",
            schema_version,
            SNAPSHOT_SCHEMA_VERSION
        );
    }

    let snapshot_id = document
        .get("snapshot_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .context("Snapshot has no snapshot_id")?;
    let cluster = document
        .get("cluster")
        .and_then(Value::as_str)
        .context("Snapshot has no cluster")?;
    let taken_at = document
        .get("taken_at")
        .cloned()
        .context("Snapshot has no taken_at")
        .and_then(|v| serde_json::from_value(v).context("Invalid taken_at"))?;

    let mut skipped = 0;
    let mut snapshot = ClusterSnapshot::empty(snapshot_id, cluster, taken_at);
    snapshot.workloads = lenient_records(&document, "workloads", &mut skipped);
    snapshot.nodes = lenient_records(&document, "nodes", &mut skipped);
    snapshot.volumes = lenient_records(&document, "volumes", &mut skipped);
    snapshot.autoscalers = lenient_records(&document, "autoscalers", &mut skipped);
    Ok((snapshot, skipped))
}

/// Reads the latest snapshot from a JSON file on every fetch
pub struct FileSnapshotProvider {
    path: PathBuf,
    metrics: EngineMetrics,
}

impl FileSnapshotProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            metrics: EngineMetrics::new(),
        }
    }
}

#[async_trait]
impl SnapshotProvider for FileSnapshotProvider {
    async fn fetch(&self) -> Result<ClusterSnapshot> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read snapshot {}", self.path.display()))?;
        let (snapshot, skipped) = parse_snapshot(&raw)?;
        if skipped > 0 {
            self.metrics.add_skipped_records(skipped);
        }
        debug!(
            snapshot_id = %snapshot.snapshot_id,
            workloads = snapshot.workloads.len(),
            nodes = snapshot.nodes.len(),
            skipped,
            "Snapshot loaded"
        );
        Ok(snapshot)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// Serves whatever snapshot was last pushed to it
///
/// Used when snapshots arrive over the command surface instead of a file.
#[derive(Default)]
pub struct StaticSnapshotProvider {
    current: RwLock<Option<ClusterSnapshot>>,
}

impl StaticSnapshotProvider {
    pub fn new(snapshot: Option<ClusterSnapshot>) -> Self {
        Self {
            current: RwLock::new(snapshot),
        }
    }

    pub async fn replace(&self, snapshot: ClusterSnapshot) {
        *self.current.write().await = Some(snapshot);
    }
}

#[async_trait]
impl SnapshotProvider for StaticSnapshotProvider {
    async fn fetch(&self) -> Result<ClusterSnapshot> {
        self.current
            .read()
            .await
            .clone()
            .context("No snapshot has been provided yet")
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

/// Reads cost baselines from a JSON array file
///
/// A missing file yields no baselines; savings then fall back to zero.
pub struct FileBaselineSource {
    path: PathBuf,
}

impl FileBaselineSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl BaselineSource for FileBaselineSource {
    async fn fetch(&self) -> Result<Vec<CostBaseline>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No baseline file");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read baselines {}", self.path.display()))
            }
        };
        let document: Value = serde_json::from_str(&raw).context("Baselines are not valid JSON")?;
        let wrapped = serde_json::json!({ "baselines": document });
        let mut skipped = 0;
        let baselines: Vec<CostBaseline> = lenient_records(&wrapped, "baselines", &mut skipped);
        if skipped > 0 {
            warn!(path = %self.path.display(), skipped, "Skipped malformed cost baselines");
        }
        Ok(baselines)
    }
}

/// Writes each proposal's rationale, full record, and rendered change files to a directory
pub struct DirectoryProposalSink {
    dir: PathBuf,
}

impl DirectoryProposalSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write_atomic(&self, relative: &Path, contents: &[u8]) -> Result<PathBuf> {
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("Refusing to write outside the proposal directory: {}", relative.display());
        }
        let target = self.dir.join(relative);
        let parent = target.parent().unwrap_or(&self.dir);
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = parent.join(format!(".{}.tmp", file_name));
        tokio::fs::write(&temp, contents)
            .await
            .with_context(|| format!("Failed to write {}", temp.display()))?;
        tokio::fs::rename(&temp, &target)
            .await
            .with_context(|| format!("Failed to move proposal into {}", target.display()))?;
        Ok(target)
    }
}

#[async_trait]
impl ProposalSink for DirectoryProposalSink {
    /// Writes `<id>.json`, `<id>.md`, and the rendered change files under `<id>/`
    async fn submit(&self, proposal: &ChangeProposal) -> Result<String> {
        let json = serde_json::to_vec_pretty(proposal).context("Failed to encode proposal")?;
        self.write_atomic(Path::new(&format!("{}.json", proposal.id)), &json)
            .await?;

        let files = proposal.files();
        for (path, content) in &files {
            let relative = Path::new(&proposal.id).join(path);
            self.write_atomic(&relative, content.as_bytes()).await?;
        }

        let markdown = self
            .write_atomic(Path::new(&format!("{}.md", proposal.id)), proposal.rationale.as_bytes())
            .await?;

        info!(
            proposal_id = %proposal.id,
            path = %markdown.display(),
            files = files.len(),
            "Proposal written"
        );
        Ok(markdown.display().to_string())
    }

    fn name(&self) -> &'static str {
        "directory"
    }
}

//! On-disk layout:
//!
//! ```text
//! <dir>/rewardgraph.rgs          graph state (chunked, LZ4)
//! <dir>/current_policy           version key of the active policy
//! <dir>/policies/<version>.json  one immutable file per trained policy
//! ```

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{LoopError, Result};
use crate::graph::InteractionGraph;
use crate::policy::Policy;
use crate::state_image;

#[derive(Debug, Clone)]
pub struct LoopStore {
    dir: PathBuf,
}

impl LoopStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(dir.join("policies"))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_file(&self) -> PathBuf {
        self.dir.join("rewardgraph.rgs")
    }

    pub fn current_policy_file(&self) -> PathBuf {
        self.dir.join("current_policy")
    }

    pub fn policy_file(&self, version: u64) -> PathBuf {
        self.dir.join("policies").join(format!("{version}.json"))
    }

    pub fn save_graph(&self, graph: &InteractionGraph, saved_at: f64) -> Result<()> {
        let bytes = state_image::encode_state(graph, saved_at)?;
        self.write_state(&bytes)
    }

    /// Write an already-encoded state image (see [`state_image::encode_state`]).
    pub fn write_state(&self, bytes: &[u8]) -> Result<()> {
        let path = self.state_file();
        write_atomically(&path, |w| w.write_all(bytes))?;
        info!(bytes = bytes.len(), "graph saved to {:?}", path);
        Ok(())
    }

    /// `Ok(None)` when no state has been saved yet.
    pub fn load_graph(&self) -> Result<Option<InteractionGraph>> {
        let path = self.state_file();
        if !path.exists() {
            return Ok(None);
        }
        let mut r = BufReader::new(File::open(&path)?);
        let loaded = state_image::load_state_from(&mut r)?;
        if let Some(meta) = &loaded.meta {
            if meta.node_count != loaded.graph.node_count() {
                warn!(
                    expected = meta.node_count,
                    actual = loaded.graph.node_count(),
                    "state file node count mismatch"
                );
            }
        }
        Ok(Some(loaded.graph))
    }

    pub fn save_policy(&self, policy: &Policy) -> Result<()> {
        let path = self.policy_file(policy.version);
        write_atomically(&path, |w| {
            serde_json::to_writer_pretty(&mut *w, policy)?;
            Ok(())
        })?;
        Ok(())
    }

    pub fn load_policy(&self, version: u64) -> Result<Policy> {
        let path = self.policy_file(version);
        if !path.exists() {
            return Err(LoopError::UnknownPolicy(version));
        }
        let r = BufReader::new(File::open(&path)?);
        Ok(serde_json::from_reader(r)?)
    }

    /// All persisted versions, oldest first.
    pub fn policy_versions(&self) -> Result<Vec<u64>> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(self.dir.join("policies"))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(v) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                versions.push(v);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    pub fn set_current_policy(&self, version: u64) -> Result<()> {
        write_atomically(&self.current_policy_file(), |w| {
            w.write_all(version.to_string().as_bytes())
        })?;
        Ok(())
    }

    pub fn current_policy_version(&self) -> Result<Option<u64>> {
        let path = self.current_policy_file();
        if !path.exists() {
            return Ok(None);
        }
        let s = fs::read_to_string(&path)?;
        s.trim().parse::<u64>().map(Some).map_err(|e| {
            LoopError::Storage(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad current_policy file: {e}"),
            ))
        })
    }
}

// Write to a sibling temp file then rename, so readers never see a torn file.
fn write_atomically<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut w = BufWriter::new(File::create(&tmp)?);
        write(&mut w)?;
        w.flush()?;
        w.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyWeights;

    fn policy(version: u64) -> Policy {
        Policy {
            version,
            weights: PolicyWeights::default(),
            episodes: 3,
            iterations: 2,
            parent_version: None,
        }
    }

    #[test]
    fn policies_are_keyed_by_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = LoopStore::open(dir.path()).unwrap();

        store.save_policy(&policy(20)).unwrap();
        store.save_policy(&policy(10)).unwrap();
        assert_eq!(store.policy_versions().unwrap(), vec![10, 20]);
        assert_eq!(store.load_policy(20).unwrap(), policy(20));
        assert!(matches!(
            store.load_policy(30),
            Err(LoopError::UnknownPolicy(30))
        ));
    }

    #[test]
    fn current_pointer_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LoopStore::open(dir.path()).unwrap();
        assert_eq!(store.current_policy_version().unwrap(), None);
        store.set_current_policy(42).unwrap();
        assert_eq!(store.current_policy_version().unwrap(), Some(42));
    }

    #[test]
    fn missing_graph_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = LoopStore::open(dir.path()).unwrap();
        assert!(store.load_graph().unwrap().is_none());

        store.save_graph(&InteractionGraph::new(), 1.0).unwrap();
        let g = store.load_graph().unwrap().unwrap();
        assert_eq!(g.node_count(), 0);
    }
}

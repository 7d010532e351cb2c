//! The on-disk layout of one workspace at one epoch.

use camino::{Utf8Path, Utf8PathBuf};
use weft_primitives::{Epoch, WorkspaceId};

/// Path arithmetic for the persisted layout. Purely computational; no
/// filesystem access happens here.
#[derive(Clone, Debug)]
pub struct Layout {
    workspace_dir: Utf8PathBuf,
    epoch_dir: Utf8PathBuf,
}

impl Layout {
    #[must_use]
    pub fn new(root: &Utf8Path, workspace_id: &WorkspaceId, epoch: Epoch) -> Self {
        let workspace_dir = root.join(workspace_id.as_str());
        let epoch_dir = workspace_dir.join(epoch.to_string());
        Self {
            workspace_dir,
            epoch_dir,
        }
    }

    #[must_use]
    pub fn workspace_dir(&self) -> &Utf8Path {
        &self.workspace_dir
    }

    #[must_use]
    pub fn epoch_dir(&self) -> &Utf8Path {
        &self.epoch_dir
    }

    /// Binary head state: identity and per-client epoch counters.
    #[must_use]
    pub fn head_binary(&self) -> Utf8PathBuf {
        self.workspace_dir.join("head.yjs")
    }

    /// Human-readable mirror of the head document.
    #[must_use]
    pub fn head_json(&self) -> Utf8PathBuf {
        self.workspace_dir.join("head.json")
    }

    /// Binary data at this epoch; the source of truth.
    #[must_use]
    pub fn data_binary(&self) -> Utf8PathBuf {
        self.epoch_dir.join("workspace.yjs")
    }

    /// Debounced JSON mirror of the data document.
    #[must_use]
    pub fn data_json(&self) -> Utf8PathBuf {
        self.epoch_dir.join("workspace.json")
    }

    /// Pretty-printed table and KV definitions.
    #[must_use]
    pub fn definition(&self) -> Utf8PathBuf {
        self.epoch_dir.join("definition.json")
    }

    #[must_use]
    pub fn revisions_dir(&self) -> Utf8PathBuf {
        self.epoch_dir.join("revisions")
    }

    #[must_use]
    pub fn revision_snapshot(&self, version: u64) -> Utf8PathBuf {
        self.revisions_dir().join(format!("{version}.snap"))
    }

    #[must_use]
    pub fn revision_index(&self) -> Utf8PathBuf {
        self.revisions_dir().join("index.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_epoch_partitioned() {
        let layout = Layout::new(
            Utf8Path::new("/data"),
            &"w1".parse().unwrap(),
            Epoch::new(2),
        );

        assert_eq!(layout.head_binary(), Utf8PathBuf::from("/data/w1/head.yjs"));
        assert_eq!(
            layout.data_binary(),
            Utf8PathBuf::from("/data/w1/2/workspace.yjs")
        );
        assert_eq!(
            layout.revision_snapshot(7),
            Utf8PathBuf::from("/data/w1/2/revisions/7.snap")
        );
    }
}

//! The revision extension.
//!
//! Keeps numbered full-state snapshots of a workspace under
//! `revisions/<n>.snap`, with an `index.json` describing them. Versions
//! are allocated densely from 0 and never re-compacted, so eviction
//! leaves gaps. Restoring applies a snapshot as an update to the live
//! document; the CRDT's merge decides conflicts.

use core::any::Any;
use core::num::NonZeroUsize;
use core::time::Duration;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use camino::Utf8PathBuf;
use eyre::{eyre, Result as EyreResult, WrapErr};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, warn};
use weft_store::Clock;
use weft_workspace::{Extension, ExtensionContext, SyncFlag};
use yrs::updates::decoder::Decode;
use yrs::{Doc, ReadTxn, StateVector, Subscription, Transact, Update};

use crate::fs_util::{ensure_dir, write_best_effort};
use crate::layout::Layout;

/// Configuration of the revision extension.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct RevisionConfig {
    pub root_dir: Utf8PathBuf,
    /// Retention bound; `None` keeps every snapshot.
    pub max_versions: Option<NonZeroUsize>,
    /// Quiet period for automatic snapshots after document updates;
    /// `None` disables automatic snapshots entirely.
    pub debounce: Option<Duration>,
}

impl RevisionConfig {
    #[must_use]
    pub fn new(root_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            max_versions: None,
            debounce: None,
        }
    }

    #[must_use]
    pub fn with_max_versions(mut self, max_versions: NonZeroUsize) -> Self {
        self.max_versions = Some(max_versions);
        self
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = Some(debounce);
        self
    }
}

/// One row of the revision index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// UNIX milliseconds at snapshot time.
    pub timestamp: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RevisionIndex {
    revisions: Vec<RevisionRecord>,
}

/// Factory for the revision extension, for use with
/// `ExtensionSet::with`.
pub fn revisions(
    config: RevisionConfig,
) -> impl FnOnce(&ExtensionContext) -> EyreResult<Box<dyn Extension>> + Send + 'static {
    move |ctx| {
        let layout = Layout::new(&config.root_dir, &ctx.workspace_id, ctx.epoch);
        let sync = SyncFlag::new();

        let inner = Arc::new(RevisionInner {
            doc: ctx.doc.clone(),
            clock: Arc::clone(&ctx.clock),
            layout,
            max_versions: config.max_versions,
            index: Mutex::new(Vec::new()),
            sync: sync.clone(),
        });

        // Automatic snapshots only when a debounce is configured.
        let (subscription, debounce_tx, auto_task) = match config.debounce {
            Some(debounce) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let subscription = ctx
                    .doc
                    .observe_update_v1({
                        let tx = tx.clone();
                        move |_txn, _event| {
                            let _ = tx.send(());
                        }
                    })
                    .map_err(|err| eyre!("failed to observe document updates: {err}"))?;

                let task_inner = Arc::clone(&inner);
                let auto_task = tokio::spawn(auto_snapshot_loop(task_inner, rx, debounce));
                (Some(subscription), Some(tx), Some(auto_task))
            }
            None => (None, None, None),
        };

        let load_inner = Arc::clone(&inner);
        let task = tokio::spawn(async move {
            load_inner.load().await;
            load_inner.sync.mark_synced();
        });

        Ok(Box::new(RevisionExtension {
            inner,
            sync,
            subscription: StdMutex::new(subscription),
            debounce_tx: StdMutex::new(debounce_tx),
            task: StdMutex::new(Some(task)),
            auto_task: StdMutex::new(auto_task),
        }))
    }
}

/// Public surface of the revision extension.
pub struct RevisionExtension {
    inner: Arc<RevisionInner>,
    sync: SyncFlag,
    subscription: StdMutex<Option<Subscription>>,
    debounce_tx: StdMutex<Option<mpsc::UnboundedSender<()>>>,
    task: StdMutex<Option<JoinHandle<()>>>,
    auto_task: StdMutex<Option<JoinHandle<()>>>,
}

impl RevisionExtension {
    /// Takes a snapshot now, bypassing any debounce, and returns its
    /// version number.
    pub async fn save(&self, label: Option<&str>) -> EyreResult<u64> {
        self.inner.snapshot(label.map(str::to_owned)).await
    }

    /// The ordered revision records.
    pub async fn list(&self) -> EyreResult<Vec<RevisionRecord>> {
        self.inner.sync.wait().await?;
        Ok(self.inner.index.lock().await.clone())
    }

    /// Reconstructs snapshot `version` into a read-only document.
    pub async fn view(&self, version: u64) -> EyreResult<Doc> {
        self.inner.sync.wait().await?;

        let path = self.inner.layout.revision_snapshot(version);
        let bytes = tokio::fs::read(&path)
            .await
            .wrap_err_with(|| format!("failed to read snapshot {version} at {path}"))?;

        let update =
            Update::decode_v1(&bytes).map_err(|err| eyre!("snapshot {version} is unreadable: {err}"))?;

        let doc = Doc::new();
        doc.transact_mut()
            .apply_update(update)
            .map_err(|err| eyre!("snapshot {version} failed to apply: {err}"))?;
        Ok(doc)
    }

    /// Applies snapshot `version` onto the live document.
    ///
    /// This is additive: state written since the snapshot survives
    /// wherever the merge allows it.
    pub async fn restore(&self, version: u64) -> EyreResult<()> {
        self.inner.sync.wait().await?;

        let path = self.inner.layout.revision_snapshot(version);
        let bytes = tokio::fs::read(&path)
            .await
            .wrap_err_with(|| format!("failed to read snapshot {version} at {path}"))?;

        let update =
            Update::decode_v1(&bytes).map_err(|err| eyre!("snapshot {version} is unreadable: {err}"))?;

        self.inner
            .doc
            .transact_mut()
            .apply_update(update)
            .map_err(|err| eyre!("snapshot {version} failed to apply: {err}"))?;
        Ok(())
    }
}

#[async_trait]
impl Extension for RevisionExtension {
    async fn when_synced(&self) -> EyreResult<()> {
        self.sync.wait().await?;
        Ok(())
    }

    async fn destroy(&self) -> EyreResult<()> {
        self.sync.mark_destroyed();

        let subscription = {
            let mut guard = self
                .subscription
                .lock()
                .unwrap_or_else(|err| err.into_inner());
            guard.take()
        };
        drop(subscription);

        // Closing the channel stops the auto-snapshot loop.
        let debounce_tx = {
            let mut guard = self
                .debounce_tx
                .lock()
                .unwrap_or_else(|err| err.into_inner());
            guard.take()
        };
        drop(debounce_tx);

        let tasks = {
            let mut load = self.task.lock().unwrap_or_else(|err| err.into_inner());
            let mut auto = self.auto_task.lock().unwrap_or_else(|err| err.into_inner());
            [load.take(), auto.take()]
        };
        for task in tasks.into_iter().flatten() {
            if let Err(err) = task.await {
                warn!("revision task ended abnormally: {err}");
            }
        }

        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl core::fmt::Debug for RevisionExtension {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RevisionExtension")
            .field("layout", &self.inner.layout)
            .finish_non_exhaustive()
    }
}

struct RevisionInner {
    doc: Doc,
    clock: Arc<dyn Clock>,
    layout: Layout,
    max_versions: Option<NonZeroUsize>,
    index: Mutex<Vec<RevisionRecord>>,
    sync: SyncFlag,
}

impl RevisionInner {
    async fn load(&self) {
        ensure_dir(&self.layout.revisions_dir()).await;

        let path = self.layout.revision_index();
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<RevisionIndex>(&bytes) {
                Ok(index) => {
                    let mut revisions = index.revisions;
                    revisions.sort_by_key(|record| record.version);
                    *self.index.lock().await = revisions;
                }
                Err(err) => {
                    warn!(%path, "revision index is unreadable, starting empty: {err}");
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                error!(%path, "failed to read revision index, starting empty: {err}");
            }
        }
    }

    async fn snapshot(&self, label: Option<String>) -> EyreResult<u64> {
        self.sync.wait().await?;

        let bytes = {
            let txn = self.doc.transact();
            txn.encode_state_as_update_v1(&StateVector::default())
        };

        let mut index = self.index.lock().await;
        let version = index.last().map_or(0, |record| record.version + 1);

        ensure_dir(&self.layout.revisions_dir()).await;
        let path = self.layout.revision_snapshot(version);
        tokio::fs::write(&path, &bytes)
            .await
            .wrap_err_with(|| format!("failed to write snapshot {version} at {path}"))?;

        index.push(RevisionRecord {
            version,
            label,
            timestamp: self.clock.now_millis(),
        });

        if let Some(max_versions) = self.max_versions {
            while index.len() > max_versions.get() {
                let evicted = index.remove(0);
                let path = self.layout.revision_snapshot(evicted.version);
                if let Err(err) = tokio::fs::remove_file(&path).await {
                    warn!(%path, "failed to remove evicted snapshot: {err}");
                }
            }
        }

        self.write_index(&index).await;
        Ok(version)
    }

    async fn write_index(&self, index: &[RevisionRecord]) {
        let payload = RevisionIndex {
            revisions: index.to_vec(),
        };
        match serde_json::to_vec_pretty(&payload) {
            Ok(bytes) => write_best_effort(&self.layout.revision_index(), &bytes).await,
            Err(err) => error!("failed to render revision index: {err}"),
        }
    }
}

async fn auto_snapshot_loop(
    inner: Arc<RevisionInner>,
    mut rx: mpsc::UnboundedReceiver<()>,
    debounce: Duration,
) {
    while rx.recv().await.is_some() {
        // Absorb further updates until the document goes quiet.
        loop {
            tokio::select! {
                () = tokio::time::sleep(debounce) => break,
                more = rx.recv() => {
                    if more.is_none() {
                        return;
                    }
                }
            }
        }

        if let Err(err) = inner.snapshot(None).await {
            error!("automatic snapshot failed: {err:#}");
        }
    }
}

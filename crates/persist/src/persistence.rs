//! The persistence extension.
//!
//! Binds a workspace document to its epoch directory. Loading happens
//! once at attach time on a background task; afterwards every document
//! update triggers an immediate binary save and schedules a debounced
//! JSON mirror write. All save-path failures are logged and swallowed:
//! persistence degrades, the workspace keeps working.

use core::any::Any;
use core::time::Duration;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use camino::Utf8PathBuf;
use eyre::{eyre, Result as EyreResult};
use serde_json::{Map as JsonMap, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use weft_workspace::{Extension, ExtensionContext, SyncFlag, WorkspaceDescriptor};
use yrs::updates::decoder::Decode;
use yrs::{Doc, Map, ReadTxn, StateVector, Subscription, Transact, Update};

use crate::fs_util::{ensure_dir, write_best_effort};
use crate::layout::Layout;
use crate::project::{out_to_json, workspace_json};

/// Default quiet period before the JSON mirror is rewritten.
pub const DEFAULT_JSON_DEBOUNCE: Duration = Duration::from_millis(500);

/// Configuration of the persistence extension.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct PersistenceConfig {
    /// Directory that holds every workspace's folder.
    pub root_dir: Utf8PathBuf,
    /// Quiet period before the JSON mirror is rewritten.
    pub json_debounce: Duration,
}

impl PersistenceConfig {
    #[must_use]
    pub fn new(root_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            json_debounce: DEFAULT_JSON_DEBOUNCE,
        }
    }

    #[must_use]
    pub fn with_json_debounce(mut self, json_debounce: Duration) -> Self {
        self.json_debounce = json_debounce;
        self
    }
}

enum WriterMessage {
    /// The document changed; save binary now, schedule the mirror.
    Dirty,
    /// Teardown: flush a pending mirror write and stop.
    Flush,
}

/// Factory for the persistence extension, for use with
/// `ExtensionSet::with`.
///
/// Must be attached from within a tokio runtime: loading and saving run
/// on a spawned writer task.
pub fn persistence(
    config: PersistenceConfig,
) -> impl FnOnce(&ExtensionContext) -> EyreResult<Box<dyn Extension>> + Send + 'static {
    move |ctx| {
        let layout = Layout::new(&config.root_dir, &ctx.workspace_id, ctx.epoch);
        let sync = SyncFlag::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let subscription = ctx
            .doc
            .observe_update_v1({
                let tx = tx.clone();
                move |_txn, _event| {
                    let _ = tx.send(WriterMessage::Dirty);
                }
            })
            .map_err(|err| eyre!("failed to observe document updates: {err}"))?;

        let writer = Writer {
            doc: ctx.doc.clone(),
            descriptor: ctx.descriptor.clone(),
            layout: layout.clone(),
            json_debounce: config.json_debounce,
            epoch: ctx.epoch.get(),
            client_id: ctx.doc.client_id(),
            sync: sync.clone(),
        };
        let task = tokio::spawn(writer.run(rx));

        Ok(Box::new(PersistenceExtension {
            layout,
            sync,
            tx,
            subscription: StdMutex::new(Some(subscription)),
            task: StdMutex::new(Some(task)),
        }))
    }
}

/// Public surface of the persistence extension.
pub struct PersistenceExtension {
    layout: Layout,
    sync: SyncFlag,
    tx: mpsc::UnboundedSender<WriterMessage>,
    subscription: StdMutex<Option<Subscription>>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl PersistenceExtension {
    /// Where this workspace's files live.
    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }
}

#[async_trait]
impl Extension for PersistenceExtension {
    async fn when_synced(&self) -> EyreResult<()> {
        self.sync.wait().await?;
        Ok(())
    }

    async fn destroy(&self) -> EyreResult<()> {
        self.sync.mark_destroyed();

        // Detach first so late transactions no longer queue work.
        let subscription = {
            let mut guard = self.subscription.lock().unwrap_or_else(|err| err.into_inner());
            guard.take()
        };
        drop(subscription);

        let _ = self.tx.send(WriterMessage::Flush);

        let task = {
            let mut guard = self.task.lock().unwrap_or_else(|err| err.into_inner());
            guard.take()
        };
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!("persistence writer task ended abnormally: {err}");
            }
        }

        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl core::fmt::Debug for PersistenceExtension {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PersistenceExtension")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

/// State owned by the writer task.
struct Writer {
    doc: Doc,
    descriptor: WorkspaceDescriptor,
    layout: Layout,
    json_debounce: Duration,
    epoch: u64,
    client_id: u64,
    sync: SyncFlag,
}

impl Writer {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<WriterMessage>) {
        self.load().await;
        self.sync.mark_synced();

        let mut json_deadline: Option<Instant> = None;

        loop {
            // A far-future placeholder keeps the select arm inert while
            // no mirror write is scheduled.
            let deadline = json_deadline
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

            tokio::select! {
                message = rx.recv() => match message {
                    Some(WriterMessage::Dirty) => {
                        self.save_binary().await;
                        json_deadline = Some(Instant::now() + self.json_debounce);
                    }
                    Some(WriterMessage::Flush) | None => break,
                },
                () = tokio::time::sleep_until(deadline), if json_deadline.is_some() => {
                    self.save_json().await;
                    json_deadline = None;
                }
            }
        }

        // Best-effort flush of a pending mirror write on teardown.
        if json_deadline.is_some() {
            self.save_json().await;
        }
    }

    /// Load-or-initialize: runs once before the extension reports
    /// synced.
    async fn load(&self) {
        ensure_dir(self.layout.epoch_dir()).await;

        match tokio::fs::read(self.layout.data_binary()).await {
            Ok(bytes) => match Update::decode_v1(&bytes) {
                Ok(update) => {
                    let applied = self.doc.transact_mut().apply_update(update);
                    if let Err(err) = applied {
                        error!(
                            path = %self.layout.data_binary(),
                            "failed to apply persisted state, starting fresh: {err}"
                        );
                    }
                }
                Err(err) => {
                    error!(
                        path = %self.layout.data_binary(),
                        "persisted state is unreadable, starting fresh: {err}"
                    );
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.layout.data_binary(), "no persisted state, new file");
            }
            Err(err) => {
                error!(
                    path = %self.layout.data_binary(),
                    "failed to read persisted state, treating as new: {err}"
                );
            }
        }

        // Write the current full state (initializes new files and heals
        // partially written ones), the mirror, and the definitions.
        self.save_binary().await;
        self.save_json().await;
        self.save_definition().await;
        self.update_head().await;
    }

    async fn save_binary(&self) {
        let bytes = {
            let txn = self.doc.transact();
            txn.encode_state_as_update_v1(&StateVector::default())
        };
        write_best_effort(&self.layout.data_binary(), &bytes).await;
    }

    async fn save_json(&self) {
        let projected = workspace_json(&self.doc, &self.descriptor);
        match serde_json::to_vec_pretty(&projected) {
            Ok(bytes) => write_best_effort(&self.layout.data_json(), &bytes).await,
            Err(err) => error!("failed to render workspace mirror: {err}"),
        }
    }

    async fn save_definition(&self) {
        let definition = serde_json::json!({
            "id": self.descriptor.id,
            "name": self.descriptor.name,
            "tables": self.descriptor.tables,
            "kv": self.descriptor.kv,
        });
        match serde_json::to_vec_pretty(&definition) {
            Ok(bytes) => write_best_effort(&self.layout.definition(), &bytes).await,
            Err(err) => error!("failed to render definition file: {err}"),
        }
    }

    /// Loads the head document, records identity and this client's
    /// epoch, and rewrites both head files.
    async fn update_head(&self) {
        let head = Doc::new();

        match tokio::fs::read(self.layout.head_binary()).await {
            Ok(bytes) => match Update::decode_v1(&bytes) {
                Ok(update) => {
                    if let Err(err) = head.transact_mut().apply_update(update) {
                        error!(
                            path = %self.layout.head_binary(),
                            "failed to apply head state, rebuilding: {err}"
                        );
                    }
                }
                Err(err) => {
                    error!(
                        path = %self.layout.head_binary(),
                        "head state is unreadable, rebuilding: {err}"
                    );
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                error!(
                    path = %self.layout.head_binary(),
                    "failed to read head state, rebuilding: {err}"
                );
            }
        }

        let meta = head.get_or_insert_map("meta");
        let epochs = head.get_or_insert_map("epochs");
        {
            let mut txn = head.transact_mut();
            if let Some(name) = &self.descriptor.name {
                let _ = meta.insert(&mut txn, "name", name.as_str());
            }
            if let Some(icon) = &self.descriptor.icon {
                let _ = meta.insert(&mut txn, "icon", icon.as_str());
            }
            if let Some(description) = &self.descriptor.description {
                let _ = meta.insert(&mut txn, "description", description.as_str());
            }

            let epoch = i64::try_from(self.epoch).unwrap_or(i64::MAX);
            let _ = epochs.insert(&mut txn, self.client_id.to_string(), epoch);
        }

        let bytes = {
            let txn = head.transact();
            txn.encode_state_as_update_v1(&StateVector::default())
        };
        write_best_effort(&self.layout.head_binary(), &bytes).await;

        // The head mirror flattens `meta` into top-level keys and keeps
        // `epochs` nested.
        let mut mirror = JsonMap::new();
        {
            let txn = head.transact();
            for (key, value) in meta.iter(&txn) {
                let key: &str = key.as_ref();
                let _ = mirror.insert(key.to_owned(), out_to_json(&value));
            }

            let mut epoch_map = JsonMap::new();
            for (key, value) in epochs.iter(&txn) {
                let key: &str = key.as_ref();
                let _ = epoch_map.insert(key.to_owned(), out_to_json(&value));
            }
            let _ = mirror.insert("epochs".to_owned(), Value::Object(epoch_map));
        }

        match serde_json::to_vec_pretty(&Value::Object(mirror)) {
            Ok(bytes) => write_best_effort(&self.layout.head_json(), &bytes).await,
            Err(err) => error!("failed to render head mirror: {err}"),
        }
    }
}

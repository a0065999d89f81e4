// src/store/file.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value;
use tokio::task;
use tracing::{debug, info, warn};

use crate::descriptor::Document;
use crate::errors::{RelayError, Result};

use super::{DescriptorStore, NotificationSender, StoreNotification, Subscription};

/// Descriptor store backed by a single JSON file.
///
/// Writes go through a temporary sibling file and a rename, so readers (and
/// the watcher) never observe a half-written document.
#[derive(Debug, Clone)]
pub struct FileDescriptorStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileDescriptorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "descriptor".to_string());
        self.path.with_file_name(format!(".{name}.tmp"))
    }

    fn watch_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

impl DescriptorStore for FileDescriptorStore {
    fn fetch(&self) -> BoxFuture<'_, Result<Document>> {
        let path = self.path.clone();
        Box::pin(async move {
            task::spawn_blocking(move || read_document(&path))
                .await
                .map_err(|err| RelayError::Store(format!("descriptor read task failed: {err}")))?
        })
    }

    fn update(&self, fields: Document) -> BoxFuture<'_, Result<()>> {
        let path = self.path.clone();
        let tmp = self.temp_path();
        let write_lock = Arc::clone(&self.write_lock);
        Box::pin(async move {
            task::spawn_blocking(move || {
                let _guard = write_lock.lock().unwrap_or_else(PoisonError::into_inner);
                write_document(&path, &tmp, fields)
            })
            .await
            .map_err(|err| RelayError::Store(format!("descriptor write task failed: {err}")))?
        })
    }

    fn subscribe(&self, tx: NotificationSender) -> Result<Subscription> {
        let path = self.path.clone();
        let file_name = path.file_name().map(|n| n.to_os_string());

        // Called synchronously on notify's own thread.
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let notification = match res {
                    Ok(event) => {
                        if !is_relevant(&event, file_name.as_deref()) {
                            return;
                        }
                        match read_document(&path) {
                            Ok(doc) => StoreNotification::Changed(doc),
                            Err(err) => StoreNotification::Failed(err.to_string()),
                        }
                    }
                    Err(err) => StoreNotification::Failed(format!("file watch error: {err}")),
                };
                if tx.send(notification).is_err() {
                    debug!("notification receiver dropped; discarding file event");
                }
            },
            Config::default(),
        )?;

        let dir = self.watch_dir();
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(path = ?self.path, "watching descriptor document");

        Ok(Subscription::new(watcher))
    }
}

fn is_relevant(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    let Some(file_name) = file_name else {
        return false;
    };
    event
        .paths
        .iter()
        .any(|p| p.file_name() == Some(file_name))
}

fn write_document(path: &Path, tmp: &Path, fields: Document) -> Result<()> {
    let mut doc = read_document(path)?;
    doc.extend(fields);

    let contents = serde_json::to_string_pretty(&Value::Object(doc))?;
    fs::write(tmp, contents)?;
    fs::rename(tmp, path)?;

    debug!(path = ?path, "descriptor document updated");
    Ok(())
}

fn read_document(path: &Path) -> Result<Document> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = ?path, "descriptor document does not exist; treating as empty");
            return Ok(Document::new());
        }
        Err(err) => return Err(err.into()),
    };

    if contents.trim().is_empty() {
        return Ok(Document::new());
    }

    match serde_json::from_str::<Value>(&contents)? {
        Value::Object(map) => Ok(map),
        other => Err(RelayError::Store(format!(
            "descriptor document root must be an object, found {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

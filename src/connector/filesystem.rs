//! Built-in `filesystem` connector type
//!
//! Traverses the regular files below a `root` directory in lexical order of
//! their root-relative paths. The checkpoint is the last path delivered.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::plugin::{ConnectorFactory, ConnectorType, Properties, ValidationOutcome};
use super::{
    Connector, ConnectorError, ConnectorLifecycle, ConnectorResult, Document, Session,
    TraversalBatch, TraversalManager,
};
use crate::scheduler::{BatchSize, DelayPolicy};
use crate::storage::StoredConfiguration;

/// Registered type name
pub const TYPE_NAME: &str = "filesystem";

/// Property naming the directory to traverse
pub const ROOT_PROPERTY: &str = "root";

/// The `filesystem` connector type
#[derive(Debug, Default, Clone, Copy)]
pub struct FilesystemType;

impl ConnectorType for FilesystemType {
    fn type_name(&self) -> &str {
        TYPE_NAME
    }

    fn validate_config(
        &self,
        properties: &Properties,
        _locale: &str,
        factory: &dyn ConnectorFactory,
    ) -> ConnectorResult<ValidationOutcome> {
        let root = match properties.get(ROOT_PROPERTY).map(|r| r.trim()) {
            Some(root) if !root.is_empty() => root,
            _ => {
                return Ok(ValidationOutcome::reject(format!(
                    "The '{ROOT_PROPERTY}' property is required"
                )))
            }
        };

        if !Path::new(root).is_dir() {
            return Ok(ValidationOutcome::reject(format!(
                "'{root}' is not a readable directory"
            )));
        }

        // Trial instance, discarded
        factory.make_connector(properties)?;

        Ok(ValidationOutcome::Accepted(properties.clone()))
    }

    fn instantiate(
        &self,
        name: &str,
        config: &StoredConfiguration,
    ) -> ConnectorResult<Arc<dyn Connector>> {
        let root = config
            .properties
            .get(ROOT_PROPERTY)
            .ok_or_else(|| ConnectorError::instantiation(TYPE_NAME, "missing 'root' property"))?;

        Ok(Arc::new(FilesystemConnector {
            name: name.to_string(),
            root: PathBuf::from(root),
        }))
    }
}

struct FilesystemConnector {
    name: String,
    root: PathBuf,
}

#[async_trait]
impl Connector for FilesystemConnector {
    async fn login(&self) -> ConnectorResult<Box<dyn Session>> {
        let metadata = tokio::fs::metadata(&self.root).await?;
        if !metadata.is_dir() {
            return Err(ConnectorError::traversal(format!(
                "{} is no longer a directory",
                self.root.display()
            )));
        }

        Ok(Box::new(FilesystemSession {
            root: self.root.clone(),
        }))
    }

    fn lifecycle(&self) -> Option<&dyn ConnectorLifecycle> {
        Some(self)
    }
}

#[async_trait]
impl ConnectorLifecycle for FilesystemConnector {
    async fn shutdown(&self) -> ConnectorResult<()> {
        tracing::info!(
            connector = %self.name,
            root = %self.root.display(),
            "Filesystem connector shut down"
        );
        Ok(())
    }

    async fn delete(&self) -> ConnectorResult<()> {
        tracing::info!(
            connector = %self.name,
            root = %self.root.display(),
            "Filesystem connector deleted"
        );
        Ok(())
    }
}

struct FilesystemSession {
    root: PathBuf,
}

#[async_trait]
impl Session for FilesystemSession {
    async fn traversal_manager(&self) -> ConnectorResult<Box<dyn TraversalManager>> {
        Ok(Box::new(FilesystemTraversal {
            root: self.root.clone(),
            position: None,
        }))
    }
}

struct FilesystemTraversal {
    root: PathBuf,
    position: Option<String>,
}

#[async_trait]
impl TraversalManager for FilesystemTraversal {
    async fn resume_from(&mut self, checkpoint: Option<&str>) -> ConnectorResult<()> {
        self.position = checkpoint.map(str::to_string);
        Ok(())
    }

    async fn traverse(&mut self, batch: BatchSize) -> ConnectorResult<TraversalBatch> {
        let root = self.root.clone();
        let files = tokio::task::spawn_blocking(move || list_files(&root))
            .await
            .map_err(|e| ConnectorError::traversal(e.to_string()))??;

        let pending: Vec<FileEntry> = files
            .into_iter()
            .filter(|f| match &self.position {
                Some(position) => f.relative.as_str() > position.as_str(),
                None => true,
            })
            .collect();

        let limit = usize::try_from(batch.maximum).unwrap_or(usize::MAX);
        let reached_end = pending.len() <= limit;

        let documents: Vec<Document> = pending
            .into_iter()
            .take(limit)
            .map(FileEntry::into_document)
            .collect();

        let checkpoint = documents.last().map(|d| d.id.clone());
        if checkpoint.is_some() {
            self.position = checkpoint.clone();
        }

        let policy = if reached_end {
            DelayPolicy::Poll
        } else {
            DelayPolicy::Immediate
        };

        Ok(TraversalBatch::new(documents, checkpoint, policy))
    }
}

struct FileEntry {
    relative: String,
    size: u64,
    modified: Option<DateTime<Utc>>,
}

impl FileEntry {
    fn into_document(self) -> Document {
        let mut document =
            Document::new(self.relative).with_metadata("size", self.size.to_string());
        if let Some(modified) = self.modified {
            document = document.with_metadata("modified", modified.to_rfc3339());
        }
        document
    }
}

/// Regular files below `root`, sorted by relative path
fn list_files(root: &Path) -> std::io::Result<Vec<FileEntry>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();

            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let metadata = entry.metadata()?;
                files.push(FileEntry {
                    relative: relative_path(root, &path),
                    size: metadata.len(),
                    modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                });
            }
        }
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

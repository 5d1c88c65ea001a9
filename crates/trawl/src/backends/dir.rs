//! 📁 DirectoryObjectSource: a local folder cosplaying as a bucket.
//!
//! Somebody synced the `.snz` files down with the CLI last Tuesday and now wants to replay
//! them without paying for egress twice. Fair. Keys are paths relative to the root, with
//! `/` separators, sorted, so a directory lists exactly like the bucket it came from.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::s3::default_key_suffix;
use super::{FetchedObject, ObjectSource};
use crate::common::SourceObject;
use crate::errors::ObjectFailure;

/// 🔧 Where the local objects live.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DirectorySourceConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub prefix: String,
    /// 🏷️ Only files ending in this get listed. Empty lists everything.
    #[serde(default = "default_key_suffix")]
    pub key_suffix: String,
}

#[derive(Debug, Clone)]
pub struct DirectoryObjectSource {
    root: PathBuf,
    key_suffix: String,
}

impl DirectoryObjectSource {
    /// 📁 Every regular file under `root` is fair game until [`Self::with_key_suffix`] says otherwise.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            key_suffix: String::new(),
        }
    }

    pub fn with_key_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.key_suffix = suffix.into();
        self
    }

    fn container(&self) -> String {
        self.root.display().to_string()
    }
}

/// 🚶 Depth-first walk, collecting `(relative key, size)` for every regular file.
fn walk(root: &Path, dir: &Path, out: &mut Vec<(String, u64)>) -> io::Result<()> {
    for the_entry in std::fs::read_dir(dir)? {
        let the_entry = the_entry?;
        let the_type = the_entry.file_type()?;
        let the_path = the_entry.path();
        if the_type.is_dir() {
            walk(root, &the_path, out)?;
        } else if the_type.is_file() {
            let Ok(the_relative) = the_path.strip_prefix(root) else {
                continue;
            };
            let the_key = the_relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push((the_key, the_entry.metadata()?.len()));
        }
    }
    Ok(())
}

#[async_trait]
impl ObjectSource for DirectoryObjectSource {
    async fn list(&self, prefix: &str, max_count: usize) -> Result<Vec<SourceObject>> {
        let the_root = self.root.clone();
        let mut the_files = tokio::task::spawn_blocking(move || {
            let mut the_files = Vec::new();
            walk(&the_root, &the_root, &mut the_files).map(|()| the_files)
        })
        .await
        .context("💀 the directory walk task fell over before it finished")?
        .with_context(|| {
            format!(
                "💀 could not list '{}'. the directory exists in our hearts, but apparently not on disk",
                self.root.display()
            )
        })?;
        the_files.sort();

        let the_container = self.container();
        let the_objects: Vec<SourceObject> = the_files
            .into_iter()
            .filter(|(key, _)| key.starts_with(prefix) && key.ends_with(&self.key_suffix))
            .take(max_count)
            .map(|(key, size)| SourceObject::new(&the_container, key, size))
            .collect();
        debug!(root = %the_container, count = the_objects.len(), "📁 directory listed");
        Ok(the_objects)
    }

    async fn fetch(&self, object: &SourceObject) -> Result<FetchedObject, ObjectFailure> {
        let the_path = self.root.join(&object.key);
        let the_file = tokio::fs::File::open(&the_path)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => ObjectFailure::NotFound(the_path.display().to_string()),
                _ => ObjectFailure::Transport(format!("{}: {e}", the_path.display())),
            })?;
        let the_size = the_file
            .metadata()
            .await
            .map(|m| m.len())
            .unwrap_or(object.size_bytes);
        Ok(FetchedObject::new(Box::new(the_file), the_size))
    }
}

//! Output writers.
//!
//! Records are buffered until the engine calls `finish`, which happens once
//! after every worker has written. A job that fails never reaches `finish`,
//! so no partial output is published.

use crate::DoubleGraph;
use async_trait::async_trait;
use bsp_core::{BspError, Result, VertexOutputWriter};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Line format of [`TextWriter`].
pub fn format_record(id: u64, value: f64) -> String {
    format!("{}\t{}\n", id, value)
}

#[derive(Debug)]
enum Destination {
    File(PathBuf),
    Memory(Mutex<Option<String>>),
}

/// One `"{id}\t{value}\n"` line per vertex, ordered by id.
#[derive(Debug)]
pub struct TextWriter {
    lines: Mutex<BTreeMap<u64, String>>,
    destination: Destination,
}

impl TextWriter {
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            lines: Mutex::new(BTreeMap::new()),
            destination: Destination::File(path.into()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            lines: Mutex::new(BTreeMap::new()),
            destination: Destination::Memory(Mutex::new(None)),
        }
    }

    /// Published text of an in-memory writer, once finished.
    pub fn contents(&self) -> Option<String> {
        match &self.destination {
            Destination::Memory(text) => text.lock().clone(),
            Destination::File(_) => None,
        }
    }

    fn render(&self) -> String {
        self.lines.lock().values().map(String::as_str).collect()
    }
}

#[async_trait]
impl VertexOutputWriter<DoubleGraph> for TextWriter {
    async fn write(&self, id: &u64, value: &f64) -> Result<()> {
        self.lines.lock().insert(*id, format_record(*id, *value));
        Ok(())
    }

    async fn finish(&self) -> Result<()> {
        let text = self.render();
        match &self.destination {
            Destination::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        BspError::Output(format!("Failed to create {}: {}", parent.display(), e))
                    })?;
                }
                tokio::fs::write(path, text.as_bytes()).await.map_err(|e| {
                    BspError::Output(format!("Failed to write {}: {}", path.display(), e))
                })?;
                tracing::info!(path = %path.display(), bytes = text.len(), "Text output written");
            }
            Destination::Memory(published) => {
                *published.lock() = Some(text);
            }
        }
        Ok(())
    }
}

/// Keeps final values in a map.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    values: Mutex<BTreeMap<u64, f64>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values(&self) -> BTreeMap<u64, f64> {
        self.values.lock().clone()
    }

    pub fn get(&self, id: u64) -> Option<f64> {
        self.values.lock().get(&id).copied()
    }
}

#[async_trait]
impl VertexOutputWriter<DoubleGraph> for MemoryWriter {
    async fn write(&self, id: &u64, value: &f64) -> Result<()> {
        self.values.lock().insert(*id, *value);
        Ok(())
    }
}

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{GraphDocument, GraphPersistence, validate_document};
use crate::error::PersistError;

/// Graph document stored as pretty-printed JSON. Saves write a sibling
/// temp file and rename it over the target.
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "graph.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl GraphPersistence for JsonFile {
    fn save(&self, doc: &GraphDocument) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.temp_path();
        {
            let mut file = std::fs::File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, doc)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        debug!(
            path = %self.path.display(),
            nodes = doc.nodes.len(),
            edges = doc.edges.len(),
            "Saved graph to JSON"
        );
        Ok(())
    }

    fn load(&self) -> Result<GraphDocument, PersistError> {
        let text = std::fs::read_to_string(&self.path)?;
        let doc: GraphDocument = serde_json::from_str(&text)
            .map_err(|e| PersistError::Corrupt(format!("{}: {e}", self.path.display())))?;
        validate_document(&doc)?;
        Ok(doc)
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }
}

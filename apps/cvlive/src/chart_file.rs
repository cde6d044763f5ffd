//! # Chart File I/O
//!
//! Reads and writes chart files. The format itself lives in
//! `cvlive_core::formats`; this module only touches the filesystem.

use cvlive_core::primitives::MAX_CHART_FILE_SIZE;
use cvlive_core::{CvliveError, Graph, chart_from_json, chart_to_json};
use std::path::Path;

/// Load a chart, or an empty one if the file does not exist yet.
pub fn load_or_empty(path: &Path) -> Result<Graph, CvliveError> {
    if path.exists() {
        load(path)
    } else {
        tracing::info!(path = %path.display(), "no chart file, starting empty");
        Ok(Graph::new())
    }
}

/// Load a chart file, checking its size before reading it.
pub fn load(path: &Path) -> Result<Graph, CvliveError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        CvliveError::IoError(format!("Cannot read chart '{}': {}", path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(CvliveError::IoError(format!(
            "Chart path '{}' is not a regular file",
            path.display()
        )));
    }
    if metadata.len() > MAX_CHART_FILE_SIZE {
        return Err(CvliveError::SerializationError(format!(
            "Chart file size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_CHART_FILE_SIZE
        )));
    }
    let text = std::fs::read_to_string(path).map_err(|e| {
        CvliveError::IoError(format!("Cannot read chart '{}': {}", path.display(), e))
    })?;
    chart_from_json(&text)
}

/// Write a chart file through a sibling temp file and rename it into place.
pub fn save(path: &Path, graph: &Graph) -> Result<(), CvliveError> {
    let json = chart_to_json(graph)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| {
        CvliveError::IoError(format!("Cannot write chart '{}': {}", tmp.display(), e))
    })?;
    std::fs::rename(&tmp, path).map_err(|e| {
        CvliveError::IoError(format!("Cannot replace chart '{}': {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvlive_core::{Locator, NodeKind, SourcePayload};

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chart.json");

        let mut graph = Graph::new();
        graph.add_node(
            "img",
            NodeKind::Source(SourcePayload::Image {
                locator: Locator::new("uploads/a.png"),
            }),
        );
        save(&path, &graph).expect("save");

        let loaded = load(&path).expect("load");
        assert_eq!(loaded.len(), 1);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_file_is_empty_chart() {
        let dir = tempfile::tempdir().expect("tempdir");
        let graph = load_or_empty(&dir.path().join("none.json")).expect("load");
        assert!(graph.is_empty());
    }

    #[test]
    fn directory_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load(dir.path()).is_err());
    }
}

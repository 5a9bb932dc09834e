use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use image::{DynamicImage, GrayImage};
use serde::Serialize;

use crate::{CursorPosition, ResultSet, ScreenPoint, WordObservation};

/// Writes captures and lookups to a directory for offline inspection.
///
/// Disabled when constructed without a directory. Write failures are logged
/// and never reach the caller.
#[derive(Debug, Clone, Default)]
pub struct DebugSink {
    dir: Option<PathBuf>,
    queries: Arc<AtomicUsize>,
}

#[derive(Serialize)]
struct QueryRecord<'a> {
    generation: u64,
    query: &'a str,
    anchor: ScreenPoint,
    position: CursorPosition,
    location: Option<ScreenPoint>,
    observations: &'a [WordObservation],
}

impl DebugSink {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            queries: Arc::default(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    fn prepare(&self) -> Option<&Path> {
        let dir = self.dir.as_deref()?;
        if let Err(e) = fs::create_dir_all(dir) {
            log::warn!("Failed to create debug directory {}: {e}", dir.display());
            return None;
        }
        Some(dir)
    }

    pub fn save_capture(&self, generation: u64, captured: &DynamicImage, preprocessed: &GrayImage) {
        let Some(dir) = self.prepare() else {
            return;
        };
        let captured_path = dir.join(format!("{generation}-captured.png"));
        if let Err(e) = captured.save(&captured_path) {
            log::warn!("Failed to save {}: {e}", captured_path.display());
        }
        let preprocessed_path = dir.join(format!("{generation}-preprocessed.png"));
        if let Err(e) = preprocessed.save(&preprocessed_path) {
            log::warn!("Failed to save {}: {e}", preprocessed_path.display());
        }
    }

    /// Saves an intermediate image as `stage-<name>.png`.
    pub fn save_stage(&self, name: &str, image: &GrayImage) {
        let Some(dir) = self.prepare() else {
            return;
        };
        let path = dir.join(format!("stage-{name}.png"));
        if let Err(e) = image.save(&path) {
            log::warn!("Failed to save {}: {e}", path.display());
        }
    }

    pub fn save_query(
        &self,
        result_set: &ResultSet,
        query: &str,
        anchor: ScreenPoint,
        position: CursorPosition,
        location: Option<ScreenPoint>,
    ) {
        let Some(dir) = self.prepare() else {
            return;
        };
        let record = QueryRecord {
            generation: result_set.generation(),
            query,
            anchor,
            position,
            location,
            observations: result_set.observations(),
        };
        let index = self.queries.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("{}-query-{index}.json", result_set.generation()));
        let written = serde_json::to_vec_pretty(&record)
            .map_err(|e| e.to_string())
            .and_then(|json| fs::write(&path, json).map_err(|e| e.to_string()));
        if let Err(e) = written {
            log::warn!("Failed to save {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoundingBox;

    #[test]
    fn disabled_sink_writes_nothing() {
        let sink = DebugSink::disabled();
        assert!(!sink.is_enabled());
        sink.save_capture(1, &DynamicImage::new_rgb8(2, 2), &GrayImage::new(2, 2));
    }

    #[test]
    fn records_captures_and_queries() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DebugSink::new(Some(dir.path().join("ocr")));
        assert_eq!(sink.dir(), Some(dir.path().join("ocr").as_path()));
        sink.save_capture(7, &DynamicImage::new_rgb8(4, 4), &GrayImage::new(8, 8));

        let observations = vec![WordObservation {
            text: "Submit".into(),
            bounding_box: BoundingBox::new(480, 490, 50, 20),
        }];
        let results = ResultSet::new(
            7,
            observations,
            DynamicImage::new_rgb8(1, 1),
            BoundingBox::new(400, 400, 200, 200),
        );
        sink.save_query(
            &results,
            "submit",
            ScreenPoint::new(500, 500),
            CursorPosition::After,
            Some(ScreenPoint::new(530, 500)),
        );

        let ocr_dir = dir.path().join("ocr");
        assert!(ocr_dir.join("7-captured.png").is_file());
        assert!(ocr_dir.join("7-preprocessed.png").is_file());
        sink.save_stage("gray-threshold", &GrayImage::new(8, 8));
        assert!(ocr_dir.join("stage-gray-threshold.png").is_file());
        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(ocr_dir.join("7-query-0.json")).unwrap()).unwrap();
        assert_eq!(json["query"], "submit");
        assert_eq!(json["position"], "after");
        assert_eq!(json["location"]["x"], 530);
        assert_eq!(json["observations"][0]["text"], "Submit");
    }
}

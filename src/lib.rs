//! Locate words on screen by OCR so a voice command can click or select them.
//!
//! A host calls [`RequestCoordinator::begin`] as soon as a spoken command
//! starts, then [`RequestCoordinator::await_result`] from any action that needs
//! a location, and finally [`locate_word`] against the returned [`ResultSet`].
//! A `None` location or an error means the action should stop without moving
//! the pointer.

use std::path::PathBuf;

mod capture;
mod config;
mod coordinator;
mod debug;
mod error;
mod matcher;
pub mod ocr;
pub mod preprocess;
mod result;
mod tesseract;
pub mod util;

#[cfg(feature = "xcap")]
pub use capture::XcapCapture;
pub use capture::{capture_region, ImageCapture, ScreenCapture};
pub use config::{CaptureConfig, Config};
pub use coordinator::{PendingRequest, RequestCoordinator, RequestStatus};
pub use debug::DebugSink;
pub use error::*;
pub use matcher::{locate, locate_word, resolve, select_range};
pub use ocr::{OcrEngine, RawWord};
pub use preprocess::{PreprocessOptions, PreprocessedImage, Preprocessor};
pub use result::*;
pub use tesseract::{OcrConfig, TesseractEngine};

use tracing::instrument;

pub struct ScreenReaderBuilder {
    radius: u32,
    options: PreprocessOptions,
    ocr_config: OcrConfig,
    capture: Option<Box<dyn ScreenCapture>>,
    engine: Option<Box<dyn OcrEngine>>,
    debug_dir: Option<PathBuf>,
}

impl ScreenReaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            radius: config.capture.radius,
            options: config.preprocess,
            ocr_config: config.ocr.clone(),
            debug_dir: config.debug_dir.clone(),
            ..Self::default()
        }
    }

    pub fn radius(mut self, radius: u32) -> Self {
        self.radius = radius;
        self
    }

    pub fn preprocess_options(mut self, options: PreprocessOptions) -> Self {
        self.options = options;
        self
    }

    pub fn resize_factor(mut self, factor: u32) -> Self {
        self.options.resize_factor = factor;
        self
    }

    pub fn correction_window(mut self, size: u32) -> Self {
        self.options.correction_window = size;
        self
    }

    pub fn margin(mut self, margin: u32) -> Self {
        self.options.margin = margin;
        self
    }

    pub fn ocr_config(mut self, config: OcrConfig) -> Self {
        self.ocr_config = config;
        self
    }

    pub fn capture(mut self, capture: impl ScreenCapture + 'static) -> Self {
        self.capture = Some(Box::new(capture));
        self
    }

    /// Replaces the Tesseract engine built from the OCR config.
    pub fn ocr_engine(mut self, engine: impl OcrEngine + 'static) -> Self {
        self.engine = Some(Box::new(engine));
        self
    }

    pub fn debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dir = Some(dir.into());
        self
    }

    fn default_capture() -> Result<Box<dyn ScreenCapture>, ConfigError> {
        #[cfg(feature = "xcap")]
        return Ok(Box::new(XcapCapture));
        #[cfg(not(feature = "xcap"))]
        Err(ConfigError::Invalid(
            "no screen capture backend configured; enable the `xcap` feature or supply one"
                .into(),
        ))
    }

    #[instrument(skip(self))]
    pub fn build(self) -> Result<ScreenReader, ConfigError> {
        config::validate_settings(self.radius, &self.options)?;

        let capture = match self.capture {
            Some(capture) => capture,
            None => Self::default_capture()?,
        };
        let engine = match self.engine {
            Some(engine) => engine,
            None => Box::new(
                TesseractEngine::new(self.ocr_config)
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?,
            ),
        };
        let debug = DebugSink::new(self.debug_dir);
        Ok(ScreenReader {
            radius: self.radius,
            preprocessor: Preprocessor::with_debug_sink(self.options, debug.clone()),
            capture,
            engine,
            debug,
        })
    }
}

impl Default for ScreenReaderBuilder {
    fn default() -> Self {
        Self {
            radius: CaptureConfig::default().radius,
            options: PreprocessOptions::default(),
            ocr_config: OcrConfig::default(),
            capture: None,
            engine: None,
            debug_dir: None,
        }
    }
}

/// The capture → preprocess → OCR pipeline for a single anchor.
pub struct ScreenReader {
    radius: u32,
    preprocessor: Preprocessor,
    capture: Box<dyn ScreenCapture>,
    engine: Box<dyn OcrEngine>,
    debug: DebugSink,
}

impl ScreenReader {
    pub fn builder() -> ScreenReaderBuilder {
        ScreenReaderBuilder::new()
    }

    pub fn debug_sink(&self) -> &DebugSink {
        &self.debug
    }

    /// Reads the words around `anchor` into a result set tagged with
    /// `generation`.
    #[instrument(skip(self))]
    pub fn read_nearby(
        &self,
        anchor: ScreenPoint,
        generation: u64,
    ) -> Result<ResultSet, LocateError> {
        let screen = self.capture.screen_bounds()?;
        let region = capture_region(anchor, self.radius, screen)?;
        let captured = self.capture.capture(region)?;

        let preprocessed = self.preprocessor.preprocess(&captured);
        self.debug
            .save_capture(generation, &captured, &preprocessed.image);
        let raw_words = self.engine.recognize(&preprocessed.image)?;

        let observations = raw_words
            .iter()
            .map(|word| word.to_observation(&preprocessed, region))
            .collect::<Vec<_>>();
        log::debug!(
            "Request {generation} found {} words in {region:?}",
            observations.len()
        );
        Ok(ResultSet::new(generation, observations, captured, region))
    }
}

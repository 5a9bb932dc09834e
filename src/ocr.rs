use image::GrayImage;

use crate::{preprocess::PreprocessedImage, BoundingBox, OcrError, WordObservation};

/// A recognized word in the pixel space of the image handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawWord {
    pub text: String,
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl RawWord {
    /// Undoes the margin and resize applied by preprocessing, then moves the
    /// word into screen space relative to the captured region.
    pub fn to_observation(
        &self,
        preprocessed: &PreprocessedImage,
        capture_bounds: BoundingBox,
    ) -> WordObservation {
        let margin = preprocessed.margin as i32;
        let factor = preprocessed.resize_factor.max(1) as i32;
        WordObservation {
            text: self.text.clone(),
            bounding_box: BoundingBox {
                left: (self.left - margin).div_euclid(factor) + capture_bounds.left,
                top: (self.top - margin).div_euclid(factor) + capture_bounds.top,
                width: self.width / factor,
                height: self.height / factor,
            },
        }
    }
}

/// Anything that can turn a preprocessed image into located words.
pub trait OcrEngine: Send {
    fn recognize(&self, image: &GrayImage) -> Result<Vec<RawWord>, OcrError>;
}

const WORD_LEVEL: i32 = 5;
const TEXT_COLUMN: usize = 11;

/// Parses Tesseract's TSV output, keeping word rows with visible text.
///
/// Numeric columns must parse; anything in the text column is taken as-is,
/// including tokens that happen to look like numbers.
pub fn parse_tsv(output: &str) -> Result<Vec<RawWord>, OcrError> {
    let mut lines = output.lines().enumerate().peekable();
    if lines.peek().is_none() {
        return Err(OcrError::MalformedOutput {
            line: 0,
            reason: "empty output".into(),
        });
    }
    lines.next_if(|(_, line)| line.starts_with("level"));

    let mut words = Vec::new();
    for (index, line) in lines {
        let line_number = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        let columns: Vec<&str> = line.splitn(TEXT_COLUMN + 1, '\t').collect();
        if columns.len() < TEXT_COLUMN {
            return Err(OcrError::MalformedOutput {
                line: line_number,
                reason: format!("expected at least {TEXT_COLUMN} columns, got {}", columns.len()),
            });
        }
        let number = |column: usize| -> Result<i32, OcrError> {
            columns[column]
                .trim()
                .parse()
                .map_err(|e| OcrError::MalformedOutput {
                    line: line_number,
                    reason: format!("column {column} `{}`: {e}", columns[column]),
                })
        };
        if number(0)? != WORD_LEVEL {
            continue;
        }
        let text = columns.get(TEXT_COLUMN).map_or("", |it| it.trim());
        if text.is_empty() {
            continue;
        }
        words.push(RawWord {
            text: text.to_string(),
            left: number(6)?,
            top: number(7)?,
            width: number(8)?,
            height: number(9)?,
        });
    }
    log::trace!("Parsed {} words from OCR output", words.len());
    Ok(words)
}

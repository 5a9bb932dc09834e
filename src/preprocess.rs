use image::{DynamicImage, GrayImage};
use imageproc::contrast::otsu_level;
use ndarray::{Array2, Zip};
use serde::Deserialize;
use tracing::instrument;

use crate::{
    util::{
        integral_image, pad_with_margin, shift_channels, split_channel, to_luma_image, to_mask,
        upscale_nearest, window_sums,
    },
    DebugSink,
};

/// Largest accepted `resize_factor`.
pub const MAX_RESIZE_FACTOR: u32 = 8;
/// Largest accepted `correction_window`.
pub const MAX_CORRECTION_WINDOW: u32 = 1001;
/// Largest accepted `margin`.
pub const MAX_MARGIN: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PreprocessOptions {
    /// Integer upscaling factor applied before binarization.
    pub resize_factor: u32,
    /// Side length of the square window used to decide the local background.
    pub correction_window: u32,
    /// Width of the white band added around the image.
    pub margin: u32,
    pub shift_channels: bool,
    pub convert_grayscale: bool,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            resize_factor: 2,
            correction_window: 41,
            margin: 50,
            shift_channels: true,
            convert_grayscale: true,
        }
    }
}

/// A binarized capture ready for OCR, along with what is needed to map OCR
/// coordinates back onto the capture.
#[derive(Debug, Clone)]
pub struct PreprocessedImage {
    pub image: GrayImage,
    pub margin: u32,
    pub resize_factor: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    options: PreprocessOptions,
    debug: DebugSink,
}

impl Preprocessor {
    pub fn new(options: PreprocessOptions) -> Self {
        Self::with_debug_sink(options, DebugSink::disabled())
    }

    /// With the `debug` feature, intermediate masks of every run are written
    /// to `debug`, overwriting those of the previous run.
    pub fn with_debug_sink(options: PreprocessOptions, debug: DebugSink) -> Self {
        Self { options, debug }
    }

    pub fn options(&self) -> &PreprocessOptions {
        &self.options
    }

    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn preprocess(&self, image: &DynamicImage) -> PreprocessedImage {
        let PreprocessOptions {
            resize_factor,
            correction_window,
            margin,
            shift_channels: shift,
            convert_grayscale,
        } = self.options;
        // Out of range values are clamped; `config::validate_settings`
        // rejects them before they get here.
        let resize_factor = resize_factor.clamp(1, MAX_RESIZE_FACTOR);
        let radius = (correction_window.clamp(1, MAX_CORRECTION_WINDOW) as usize - 1) / 2;
        let margin = margin.min(MAX_MARGIN);

        let mut rgb = upscale_nearest(image, resize_factor);
        if shift {
            rgb = shift_channels(&rgb);
        }

        let background = if convert_grayscale {
            let gray = DynamicImage::ImageRgb8(rgb).to_luma8();
            binarize_channel(&gray, radius, "gray", &self.debug)
        } else {
            // Background only where every channel agrees it is background.
            let binarize = |channel: usize| {
                binarize_channel(
                    &split_channel(&rgb, channel),
                    radius,
                    CHANNEL_NAMES[channel],
                    &self.debug,
                )
            };
            let mut combined = binarize(0);
            for channel in 1..3 {
                let mask = binarize(channel);
                Zip::from(&mut combined)
                    .and(&mask)
                    .for_each(|acc, &value| *acc &= value);
            }
            combined
        };

        let binary = to_luma_image(background.view());
        log::debug!(
            "Binarized {}x{} capture at {resize_factor}x, padding by {margin}px",
            image.width(),
            image.height()
        );
        PreprocessedImage {
            image: pad_with_margin(&binary, margin),
            margin,
            resize_factor,
        }
    }
}

const CHANNEL_NAMES: [&str; 3] = ["red", "green", "blue"];

/// Thresholds `channel` globally, then flips every pixel so the dominant
/// color of its neighbourhood becomes the background. Returns `true` for
/// background pixels.
#[instrument(level = "debug", skip(channel, debug))]
fn binarize_channel(
    channel: &GrayImage,
    radius: usize,
    name: &str,
    debug: &DebugSink,
) -> Array2<bool> {
    let threshold = otsu_level(channel);
    log::trace!("Otsu threshold for {name} channel is {threshold}");
    let bright = to_mask(channel, threshold);

    let bright_sums = window_sums(integral_image(bright.view()).view(), radius);
    let dark = bright.mapv(|it| !it);
    let dark_sums = window_sums(integral_image(dark.view()).view(), radius);

    let background = Zip::from(&bright)
        .and(&bright_sums)
        .and(&dark_sums)
        .map_collect(|&is_bright, &bright_count, &dark_count| {
            is_bright == (bright_count > dark_count)
        });

    if cfg!(feature = "debug") && debug.is_enabled() {
        debug.save_stage(&format!("{name}-threshold"), &to_luma_image(bright.view()));
        debug.save_stage(&format!("{name}-corrected"), &to_luma_image(background.view()));
    }

    background
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};

    fn dark_text_on(background: Rgb<u8>, text: Rgb<u8>) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(60, 40, |x, y| {
            if (20..40).contains(&x) && (18..22).contains(&y) {
                text
            } else {
                background
            }
        }))
    }

    fn dark_pixels(image: &GrayImage) -> Vec<(u32, u32)> {
        image
            .enumerate_pixels()
            .filter(|(_, _, p)| p[0] == 0)
            .map(|(x, y, _)| (x, y))
            .collect()
    }

    #[test]
    fn output_is_resized_and_padded() {
        let preprocessor = Preprocessor::new(PreprocessOptions {
            margin: 7,
            ..Default::default()
        });
        let result = preprocessor.preprocess(&dark_text_on(Rgb([255; 3]), Rgb([0; 3])));
        assert_eq!(result.resize_factor, 2);
        assert_eq!(result.margin, 7);
        assert_eq!(result.image.dimensions(), (60 * 2 + 14, 40 * 2 + 14));
        assert_eq!(result.image.get_pixel(3, 3), &Luma([255]));
    }

    #[test]
    fn light_text_on_dark_background_becomes_dark_on_white() {
        let preprocessor = Preprocessor::new(PreprocessOptions {
            margin: 0,
            shift_channels: false,
            ..Default::default()
        });
        let normal = preprocessor.preprocess(&dark_text_on(Rgb([240; 3]), Rgb([20; 3])));
        let inverted = preprocessor.preprocess(&dark_text_on(Rgb([20; 3]), Rgb([240; 3])));
        let expected: Vec<_> = (36..44)
            .flat_map(|y| (40..80).map(move |x| (x, y)))
            .collect();
        let mut normal_dark = dark_pixels(&normal.image);
        let mut inverted_dark = dark_pixels(&inverted.image);
        normal_dark.sort_by_key(|&(x, y)| (y, x));
        inverted_dark.sort_by_key(|&(x, y)| (y, x));
        assert_eq!(normal_dark, expected);
        assert_eq!(inverted_dark, expected);
    }

    #[test]
    fn per_channel_binarization_keeps_text() {
        let preprocessor = Preprocessor::new(PreprocessOptions {
            margin: 0,
            convert_grayscale: false,
            ..Default::default()
        });
        let result = preprocessor.preprocess(&dark_text_on(Rgb([250, 250, 250]), Rgb([10, 10, 10])));
        let dark = dark_pixels(&result.image);
        assert!(!dark.is_empty());
        assert!(dark
            .iter()
            .all(|&(x, y)| (38..82).contains(&x) && (36..44).contains(&y)));
    }

    #[test]
    fn oversized_options_are_clamped() {
        let preprocessor = Preprocessor::new(PreprocessOptions {
            resize_factor: u32::MAX,
            margin: u32::MAX / 2,
            ..Default::default()
        });
        assert_eq!(preprocessor.options().margin, u32::MAX / 2);
        let result = preprocessor.preprocess(&DynamicImage::new_rgb8(4, 3));
        assert_eq!(result.resize_factor, MAX_RESIZE_FACTOR);
        assert_eq!(result.margin, MAX_MARGIN);
        assert_eq!(
            result.image.dimensions(),
            (4 * MAX_RESIZE_FACTOR + 2 * MAX_MARGIN, 3 * MAX_RESIZE_FACTOR + 2 * MAX_MARGIN)
        );
    }

    #[test]
    #[cfg(feature = "debug")]
    fn stage_masks_go_to_the_debug_directory() {
        let dir = tempfile::tempdir().unwrap();
        let preprocessor = Preprocessor::with_debug_sink(
            PreprocessOptions {
                convert_grayscale: false,
                ..Default::default()
            },
            DebugSink::new(Some(dir.path().to_path_buf())),
        );
        preprocessor.preprocess(&dark_text_on(Rgb([250; 3]), Rgb([10; 3])));
        for channel in CHANNEL_NAMES {
            assert!(dir.path().join(format!("stage-{channel}-threshold.png")).is_file());
            assert!(dir.path().join(format!("stage-{channel}-corrected.png")).is_file());
        }
    }
}

use image::{imageops, imageops::FilterType, DynamicImage, GrayImage, Luma, RgbImage};
use ndarray::{s, Array2, ArrayView2, Axis};
use tracing::instrument;

pub(crate) const WHITE: Luma<u8> = Luma([255]);

#[instrument(level = "debug", skip(image))]
pub(crate) fn upscale_nearest(image: &DynamicImage, factor: u32) -> RgbImage {
    image
        .resize_exact(
            image.width().saturating_mul(factor),
            image.height().saturating_mul(factor),
            FilterType::Nearest,
        )
        .to_rgb8()
}

/// Moves each color channel to where its subpixel sits on a typical RGB
/// panel: red one pixel left, blue one pixel right. The column that would
/// wrap around is filled by duplicating the edge column instead.
#[instrument(level = "debug", skip(image))]
pub fn shift_channels(image: &RgbImage) -> RgbImage {
    let max_x = image.width().saturating_sub(1) as i64;
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let mut pixel = [0u8; 3];
        for (channel, value) in pixel.iter_mut().enumerate() {
            let shift = channel as i64 - 1;
            let source_x = (x as i64 - shift).clamp(0, max_x) as u32;
            *value = image.get_pixel(source_x, y)[channel];
        }
        image::Rgb(pixel)
    })
}

pub(crate) fn split_channel(image: &RgbImage, channel: usize) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([image.get_pixel(x, y)[channel]])
    })
}

/// Boolean mask of the pixels brighter than `threshold`, indexed `[y, x]`.
pub(crate) fn to_mask(image: &GrayImage, threshold: u8) -> Array2<bool> {
    Array2::from_shape_fn(
        (image.height() as usize, image.width() as usize),
        |(y, x)| image.get_pixel(x as u32, y as u32)[0] > threshold,
    )
}

pub(crate) fn to_luma_image(mask: ArrayView2<bool>) -> GrayImage {
    let (height, width) = mask.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        if mask[[y as usize, x as usize]] {
            WHITE
        } else {
            Luma([0])
        }
    })
}

/// Summed-area table of `mask` with a leading row and column of zeros, so
/// `integral[[y, x]]` is the number of set pixels above and left of `(x, y)`.
pub fn integral_image(mask: ArrayView2<bool>) -> Array2<u32> {
    let (height, width) = mask.dim();
    let mut integral = Array2::<u32>::zeros((height + 1, width + 1));
    integral
        .slice_mut(s![1.., 1..])
        .assign(&mask.mapv(u32::from));
    integral.accumulate_axis_inplace(Axis(0), |&prev, curr| *curr += prev);
    integral.accumulate_axis_inplace(Axis(1), |&prev, curr| *curr += prev);
    integral
}

/// For every pixel, the number of set pixels in the square window of the
/// given radius centred on it. Windows are clipped at the image border.
pub fn window_sums(integral: ArrayView2<u32>, radius: usize) -> Array2<u32> {
    let (rows, cols) = integral.dim();
    let height = rows.saturating_sub(1);
    let width = cols.saturating_sub(1);
    Array2::from_shape_fn((height, width), |(y, x)| {
        let top = y.saturating_sub(radius);
        let left = x.saturating_sub(radius);
        let bottom = (y + radius + 1).min(height);
        let right = (x + radius + 1).min(width);
        integral[[bottom, right]] + integral[[top, left]]
            - integral[[top, right]]
            - integral[[bottom, left]]
    })
}

/// Surrounds `image` with a solid white band `margin` pixels wide.
pub(crate) fn pad_with_margin(image: &GrayImage, margin: u32) -> GrayImage {
    let mut padded = GrayImage::from_pixel(
        image.width().saturating_add(margin.saturating_mul(2)),
        image.height().saturating_add(margin.saturating_mul(2)),
        WHITE,
    );
    imageops::replace(&mut padded, image, margin as i64, margin as i64);
    padded
}

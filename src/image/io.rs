//! Decoding, cropping and saving rasters via the `image` crate.

use crate::image::{ImageView, Rect};
use crate::util::{LocateError, LocateResult};
use image::{GrayImage, RgbImage};
use std::path::Path;

/// Decodes raw screen bytes (PNG or JPEG) into an RGB raster.
pub fn decode_rgb(bytes: &[u8]) -> LocateResult<RgbImage> {
    let img = image::load_from_memory(bytes).map_err(LocateError::image)?;
    Ok(img.to_rgb8())
}

/// Loads an image from disk as RGB.
pub fn load_rgb<P: AsRef<Path>>(path: P) -> LocateResult<RgbImage> {
    let img = image::open(path.as_ref()).map_err(LocateError::image)?;
    Ok(img.to_rgb8())
}

/// Encodes an RGB raster as PNG bytes.
pub fn encode_png(img: &RgbImage) -> LocateResult<Vec<u8>> {
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .map_err(LocateError::image)?;
    Ok(out.into_inner())
}

/// Writes an RGB raster to `path` as PNG, creating parent directories.
pub fn save_png<P: AsRef<Path>>(img: &RgbImage, path: P) -> LocateResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| LocateError::io(parent, err))?;
    }
    img.save_with_format(path, image::ImageFormat::Png)
        .map_err(LocateError::image)
}

/// Copies the part of `img` covered by `region`, clipped to the image.
pub fn crop(img: &RgbImage, region: Rect) -> LocateResult<RgbImage> {
    let clipped =
        region
            .clamp_to(img.width(), img.height())
            .ok_or(LocateError::RoiOutOfBounds {
                x: region.x.max(0) as usize,
                y: region.y.max(0) as usize,
                width: region.width as usize,
                height: region.height as usize,
                img_width: img.width() as usize,
                img_height: img.height() as usize,
            })?;
    Ok(image::imageops::crop_imm(
        img,
        clipped.x as u32,
        clipped.y as u32,
        clipped.width,
        clipped.height,
    )
    .to_image())
}

/// Creates a borrowed view from a grayscale image buffer.
pub fn view_from_gray(img: &GrayImage) -> LocateResult<ImageView<'_, u8>> {
    ImageView::from_slice(img.as_raw(), img.width() as usize, img.height() as usize)
}

#[cfg(test)]
mod tests {
    use super::{crop, decode_rgb, encode_png};
    use crate::image::Rect;
    use image::{Rgb, RgbImage};

    #[test]
    fn png_bytes_decode_to_identical_pixels() {
        let img = RgbImage::from_fn(7, 5, |x, y| Rgb([(x * 30) as u8, (y * 40) as u8, 9]));
        let bytes = encode_png(&img).unwrap();
        let back = decode_rgb(&bytes).unwrap();
        assert_eq!(back, img);
    }

    #[test]
    fn crop_clips_to_image_bounds() {
        let img = RgbImage::from_fn(10, 10, |x, y| Rgb([x as u8, y as u8, 0]));
        let part = crop(&img, Rect::new(8, 7, 5, 5)).unwrap();
        assert_eq!(part.dimensions(), (2, 3));
        assert_eq!(part.get_pixel(0, 0), &Rgb([8, 7, 0]));
        assert!(crop(&img, Rect::new(20, 20, 5, 5)).is_err());
    }
}

//! Match box overlay for returned frames

use godseye_common::{BoundingBox, Result};
use godseye_decoder::{encode_jpeg, DEFAULT_JPEG_QUALITY};
use image::{Rgb, RgbImage};

/// Outline color of a matched face
pub const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Outline width in pixels, centered on the box edge
pub const BOX_THICKNESS: u32 = 6;

/// Fill the pixels with `x0 <= x <= x1` and `y0 <= y <= y1`, clipped to the image
fn fill_rect(image: &mut RgbImage, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    let x_start = x0.max(0);
    let y_start = y0.max(0);
    let x_end = x1.min(i64::from(width) - 1);
    let y_end = y1.min(i64::from(height) - 1);

    for y in y_start..=y_end {
        for x in x_start..=x_end {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

/// Draw `bbox` as a hollow rectangle. Parts outside the image are clipped.
pub fn draw_box(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    if thickness == 0 {
        return;
    }
    let before = i64::from(thickness / 2);
    let after = i64::from(thickness) - before - 1;

    let left = bbox.x1.min(bbox.x2) as i64;
    let right = bbox.x1.max(bbox.x2) as i64;
    let top = bbox.y1.min(bbox.y2) as i64;
    let bottom = bbox.y1.max(bbox.y2) as i64;

    let (outer_left, outer_right) = (left - before, right + after);
    fill_rect(image, outer_left, top - before, outer_right, top + after, color);
    fill_rect(image, outer_left, bottom - before, outer_right, bottom + after, color);
    fill_rect(image, left - before, top - before, left + after, bottom + after, color);
    fill_rect(image, right - before, top - before, right + after, bottom + after, color);
}

/// Decode an encoded frame, outline `bbox` on it and re-encode as JPEG
///
/// # Errors
///
/// Returns `ImageError` if the frame cannot be decoded or encoded
pub fn annotate_frame(encoded: &[u8], bbox: &BoundingBox) -> Result<Vec<u8>> {
    let mut rgb = image::load_from_memory(encoded)?.to_rgb8();
    draw_box(&mut rgb, bbox, BOX_COLOR, BOX_THICKNESS);
    let (width, height) = rgb.dimensions();
    encode_jpeg(width, height, rgb.into_raw(), DEFAULT_JPEG_QUALITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAY: Rgb<u8> = Rgb([128, 128, 128]);

    fn painted(image: &RgbImage) -> Vec<(u32, u32)> {
        image
            .enumerate_pixels()
            .filter(|(_, _, p)| **p == BOX_COLOR)
            .map(|(x, y, _)| (x, y))
            .collect()
    }

    #[test]
    fn test_outline_is_hollow() {
        let mut image = RgbImage::from_pixel(40, 40, GRAY);
        draw_box(&mut image, &BoundingBox::new(10.0, 10.0, 30.0, 30.0), BOX_COLOR, 2);

        // Band covers edge - 1 ..= edge
        assert_eq!(*image.get_pixel(9, 20), BOX_COLOR);
        assert_eq!(*image.get_pixel(10, 20), BOX_COLOR);
        assert_eq!(*image.get_pixel(11, 20), GRAY);
        assert_eq!(*image.get_pixel(20, 29), BOX_COLOR);
        assert_eq!(*image.get_pixel(30, 30), BOX_COLOR);
        assert_eq!(*image.get_pixel(31, 31), GRAY);

        assert_eq!(*image.get_pixel(20, 20), GRAY);
        assert_eq!(*image.get_pixel(5, 5), GRAY);
    }

    #[test]
    fn test_outline_is_clipped_to_image() {
        let mut image = RgbImage::from_pixel(16, 16, GRAY);
        draw_box(&mut image, &BoundingBox::new(-8.0, -8.0, 40.0, 40.0), BOX_COLOR, 6);
        assert!(painted(&image).is_empty());

        draw_box(&mut image, &BoundingBox::new(0.0, 0.0, 8.0, 8.0), BOX_COLOR, 6);
        assert_eq!(*image.get_pixel(0, 0), BOX_COLOR);
        assert_eq!(*image.get_pixel(10, 4), BOX_COLOR);
        assert_eq!(*image.get_pixel(15, 15), GRAY);
    }

    #[test]
    fn test_zero_thickness_draws_nothing() {
        let mut image = RgbImage::from_pixel(8, 8, GRAY);
        draw_box(&mut image, &BoundingBox::new(1.0, 1.0, 6.0, 6.0), BOX_COLOR, 0);
        assert!(painted(&image).is_empty());
    }

    #[test]
    fn test_annotate_frame_reencodes_jpeg() {
        let frame = RgbImage::from_pixel(32, 32, GRAY);
        let jpeg = encode_jpeg(32, 32, frame.into_raw(), DEFAULT_JPEG_QUALITY).unwrap();

        let annotated = annotate_frame(&jpeg, &BoundingBox::new(4.0, 4.0, 20.0, 20.0)).unwrap();
        assert_eq!(&annotated[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&annotated).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (32, 32));
        let Rgb([r, g, _]) = *decoded.get_pixel(4, 12);
        assert!(r > 200 && g < 80, "border pixel {:?}", decoded.get_pixel(4, 12));
    }

    #[test]
    fn test_annotate_frame_rejects_garbage() {
        assert!(annotate_frame(b"not an image", &BoundingBox::new(0.0, 0.0, 1.0, 1.0)).is_err());
    }
}

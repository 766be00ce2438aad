//! Minimal embedded 8x12 bitmap font for on-frame labels, so placeholder and
//! annotation text needs no font assets. Uppercase letters, digits, and the
//! few punctuation marks the labels use; anything else renders as a blank.

use image::{Rgb, RgbImage};

pub const GLYPH_WIDTH: u32 = 8;
pub const GLYPH_HEIGHT: u32 = 12;

fn glyph(c: char) -> [u8; 12] {
    match c.to_ascii_uppercase() {
        'A' => [0x00, 0x18, 0x24, 0x42, 0x42, 0x7E, 0x42, 0x42, 0x42, 0x42, 0x00, 0x00],
        'B' => [0x00, 0x7C, 0x42, 0x42, 0x7C, 0x42, 0x42, 0x42, 0x42, 0x7C, 0x00, 0x00],
        'C' => [0x00, 0x3C, 0x42, 0x40, 0x40, 0x40, 0x40, 0x40, 0x42, 0x3C, 0x00, 0x00],
        'D' => [0x00, 0x78, 0x44, 0x42, 0x42, 0x42, 0x42, 0x42, 0x44, 0x78, 0x00, 0x00],
        'E' => [0x00, 0x7E, 0x40, 0x40, 0x40, 0x7C, 0x40, 0x40, 0x40, 0x7E, 0x00, 0x00],
        'F' => [0x00, 0x7E, 0x40, 0x40, 0x40, 0x7C, 0x40, 0x40, 0x40, 0x40, 0x00, 0x00],
        'G' => [0x00, 0x3C, 0x42, 0x40, 0x40, 0x4E, 0x42, 0x42, 0x46, 0x3A, 0x00, 0x00],
        'H' => [0x00, 0x42, 0x42, 0x42, 0x42, 0x7E, 0x42, 0x42, 0x42, 0x42, 0x00, 0x00],
        'I' => [0x00, 0x3E, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x3E, 0x00, 0x00],
        'L' => [0x00, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x7E, 0x00, 0x00],
        'M' => [0x00, 0x42, 0x66, 0x5A, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x00, 0x00],
        'N' => [0x00, 0x42, 0x62, 0x52, 0x4A, 0x46, 0x42, 0x42, 0x42, 0x42, 0x00, 0x00],
        'O' => [0x00, 0x3C, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x3C, 0x00, 0x00],
        'P' => [0x00, 0x7C, 0x42, 0x42, 0x42, 0x7C, 0x40, 0x40, 0x40, 0x40, 0x00, 0x00],
        'R' => [0x00, 0x7C, 0x42, 0x42, 0x42, 0x7C, 0x48, 0x44, 0x42, 0x42, 0x00, 0x00],
        'S' => [0x00, 0x3C, 0x42, 0x40, 0x30, 0x0C, 0x02, 0x42, 0x42, 0x3C, 0x00, 0x00],
        'T' => [0x00, 0x7F, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x00, 0x00],
        'U' => [0x00, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42, 0x3C, 0x00, 0x00],
        'Y' => [0x00, 0x41, 0x22, 0x14, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x00, 0x00],
        '0' => [0x00, 0x3C, 0x42, 0x46, 0x4A, 0x52, 0x62, 0x42, 0x42, 0x3C, 0x00, 0x00],
        '1' => [0x00, 0x08, 0x18, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x3E, 0x00, 0x00],
        '2' => [0x00, 0x3C, 0x42, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x7E, 0x00, 0x00],
        '3' => [0x00, 0x3C, 0x42, 0x02, 0x1C, 0x02, 0x02, 0x02, 0x42, 0x3C, 0x00, 0x00],
        '4' => [0x00, 0x04, 0x0C, 0x14, 0x24, 0x44, 0x7E, 0x04, 0x04, 0x04, 0x00, 0x00],
        '5' => [0x00, 0x7E, 0x40, 0x40, 0x7C, 0x02, 0x02, 0x02, 0x42, 0x3C, 0x00, 0x00],
        '6' => [0x00, 0x1C, 0x20, 0x40, 0x7C, 0x42, 0x42, 0x42, 0x42, 0x3C, 0x00, 0x00],
        '7' => [0x00, 0x7E, 0x02, 0x04, 0x08, 0x08, 0x10, 0x10, 0x20, 0x20, 0x00, 0x00],
        '8' => [0x00, 0x3C, 0x42, 0x42, 0x3C, 0x42, 0x42, 0x42, 0x42, 0x3C, 0x00, 0x00],
        '9' => [0x00, 0x3C, 0x42, 0x42, 0x42, 0x3E, 0x02, 0x04, 0x08, 0x70, 0x00, 0x00],
        ':' => [0x00, 0x00, 0x00, 0x18, 0x18, 0x00, 0x00, 0x18, 0x18, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x18, 0x18, 0x00, 0x00],
        '%' => [0x00, 0x62, 0x64, 0x08, 0x10, 0x10, 0x20, 0x26, 0x46, 0x00, 0x00, 0x00],
        _ => [0x00; 12],
    }
}

/// Pixel width of `text` at the given integer scale.
pub fn text_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * GLYPH_WIDTH * scale
}

fn put_pixel_checked(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

/// Render `text` with its top-left corner at (x, y). Out-of-bounds pixels
/// are clipped, never panicked on.
pub fn draw_text(img: &mut RgbImage, text: &str, x: i64, y: i64, scale: u32, color: Rgb<u8>) {
    let scale = scale.max(1) as i64;
    let mut pen_x = x;
    for c in text.chars() {
        let pattern = glyph(c);
        for (row, bits) in pattern.iter().enumerate() {
            for col in 0..GLYPH_WIDTH as usize {
                if bits & (0x80 >> col) != 0 {
                    for dy in 0..scale {
                        for dx in 0..scale {
                            put_pixel_checked(
                                img,
                                pen_x + col as i64 * scale + dx,
                                y + row as i64 * scale + dy,
                                color,
                            );
                        }
                    }
                }
            }
        }
        pen_x += GLYPH_WIDTH as i64 * scale;
    }
}

/// Rectangle outline with the given edge thickness, clipped to the image.
pub fn draw_rect(img: &mut RgbImage, x1: i64, y1: i64, x2: i64, y2: i64, thickness: u32, color: Rgb<u8>) {
    let t = thickness.max(1) as i64;
    let (x1, x2) = (x1.min(x2), x1.max(x2));
    let (y1, y2) = (y1.min(y2), y1.max(y2));
    for i in 0..t {
        for x in x1..=x2 {
            put_pixel_checked(img, x, y1 + i, color);
            put_pixel_checked(img, x, y2 - i, color);
        }
        for y in y1..=y2 {
            put_pixel_checked(img, x1 + i, y, color);
            put_pixel_checked(img, x2 - i, y, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_text_marks_pixels() {
        let mut img = RgbImage::new(120, 20);
        draw_text(&mut img, "CAM 0", 2, 2, 1, Rgb([255, 255, 255]));
        let lit = img.pixels().filter(|p| p.0 == [255, 255, 255]).count();
        assert!(lit > 20, "expected glyph pixels, got {}", lit);
    }

    #[test]
    fn draw_text_clips_at_edges() {
        let mut img = RgbImage::new(10, 10);
        // Mostly off-canvas in every direction; must not panic.
        draw_text(&mut img, "NO SIGNAL", -20, -5, 2, Rgb([255, 0, 0]));
        draw_text(&mut img, "NO SIGNAL", 8, 8, 3, Rgb([255, 0, 0]));
    }

    #[test]
    fn rect_outline_leaves_interior_untouched() {
        let mut img = RgbImage::new(30, 30);
        draw_rect(&mut img, 5, 5, 24, 24, 2, Rgb([0, 255, 0]));
        assert_eq!(img.get_pixel(5, 5).0, [0, 255, 0]);
        assert_eq!(img.get_pixel(24, 24).0, [0, 255, 0]);
        assert_eq!(img.get_pixel(15, 15).0, [0, 0, 0]);
    }

    #[test]
    fn text_width_scales() {
        assert_eq!(text_width("CAM 1", 1), 5 * GLYPH_WIDTH);
        assert_eq!(text_width("CAM 1", 2), 10 * GLYPH_WIDTH);
    }
}

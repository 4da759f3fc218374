//! 3×5 bitmap glyphs for the thermal overlay text.
//!
//! Covers exactly the characters the overlay prints: digits, `.`, `-`,
//! `C`, the letters of `max`/`min`, and space. Unknown characters render as
//! blanks.

use image::{Rgb, RgbImage};

pub const GLYPH_WIDTH: u32 = 3;
pub const GLYPH_HEIGHT: u32 = 5;

/// Rows top to bottom; bit 2 is the leftmost column.
fn glyph(c: char) -> [u8; 5] {
    match c {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        'C' => [0b111, 0b100, 0b100, 0b100, 0b111],
        'm' => [0b000, 0b111, 0b111, 0b101, 0b101],
        'a' => [0b000, 0b011, 0b101, 0b101, 0b011],
        'x' => [0b000, 0b101, 0b010, 0b010, 0b101],
        'i' => [0b010, 0b000, 0b010, 0b010, 0b010],
        'n' => [0b000, 0b110, 0b101, 0b101, 0b101],
        _ => [0; 5],
    }
}

/// Draw `text` with its top-left corner at `(x, y)`, each font pixel
/// becoming a `scale`×`scale` block. Pixels outside the image are clipped.
pub fn draw_text(image: &mut RgbImage, x: u32, y: u32, scale: u32, text: &str, color: Rgb<u8>) {
    let scale = scale.max(1);
    let advance = (GLYPH_WIDTH + 1) * scale;
    for (index, c) in text.chars().enumerate() {
        let origin_x = x + index as u32 * advance;
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                let px = origin_x + col * scale;
                let py = y + row as u32 * scale;
                fill(image, px, py, scale, color);
            }
        }
    }
}

/// Width in pixels that `text` occupies at `scale`.
pub fn text_width(text: &str, scale: u32) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        return 0;
    }
    n * (GLYPH_WIDTH + 1) * scale.max(1) - scale.max(1)
}

fn fill(image: &mut RgbImage, x: u32, y: u32, size: u32, color: Rgb<u8>) {
    let (w, h) = image.dimensions();
    for py in y..(y + size).min(h) {
        for px in x..(x + size).min(w) {
            image.put_pixel(px, py, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

    #[test]
    fn draws_lit_pixels_only() {
        let mut img = RgbImage::new(8, 8);
        draw_text(&mut img, 0, 0, 1, "-", WHITE);
        assert_eq!(img.get_pixel(1, 2), &WHITE);
        assert_eq!(img.get_pixel(1, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn clips_at_image_edge() {
        let mut img = RgbImage::new(5, 5);
        draw_text(&mut img, 3, 3, 2, "88", WHITE);
        assert_eq!(img.get_pixel(4, 4), &WHITE);
    }

    #[test]
    fn width_accounts_for_spacing() {
        assert_eq!(text_width("", 2), 0);
        assert_eq!(text_width("1", 2), 6);
        assert_eq!(text_width("12", 1), 7);
    }

    #[test]
    fn overlay_alphabet_is_covered() {
        for c in "max 0123456789.-C min".chars().filter(|c| *c != ' ') {
            assert_ne!(glyph(c), [0; 5], "missing glyph {c}");
        }
    }
}

//! Annotation drawing on RGB frames: rectangle outlines and a 5×7 bitmap font.

use crate::types::Rect;
use drowsy_hw::Frame;

pub const GREEN: [u8; 3] = [0, 255, 0];
pub const RED: [u8; 3] = [255, 0, 0];
pub const BLUE: [u8; 3] = [0, 0, 255];
pub const WHITE: [u8; 3] = [255, 255, 255];

const GLYPH_WIDTH: i64 = 5;
const GLYPH_HEIGHT: i64 = 7;
/// Horizontal advance per character, in unscaled pixels.
const GLYPH_ADVANCE: i64 = 6;

/// Draw a rectangle outline `thickness` pixels wide, growing inward.
///
/// Parts outside the frame are clipped.
pub fn draw_rect(frame: &mut Frame, rect: Rect, color: [u8; 3], thickness: u32) {
    if rect.is_empty() {
        return;
    }
    for k in 0..thickness as i64 {
        let x1 = rect.x as i64 + k;
        let y1 = rect.y as i64 + k;
        let x2 = rect.right() as i64 - 1 - k;
        let y2 = rect.bottom() as i64 - 1 - k;
        if x1 > x2 || y1 > y2 {
            break;
        }
        for x in x1..=x2 {
            frame.put_pixel(x, y1, color);
            frame.put_pixel(x, y2, color);
        }
        for y in y1..=y2 {
            frame.put_pixel(x1, y, color);
            frame.put_pixel(x2, y, color);
        }
    }
}

/// Render `text` with its baseline-left corner at `(x, y)`.
///
/// Lowercase letters are drawn as uppercase; unknown characters as `?`.
/// Each font pixel becomes a `scale`×`scale` block.
pub fn put_text(frame: &mut Frame, text: &str, x: i32, y: i32, scale: u32, color: [u8; 3]) {
    let scale = scale.max(1) as i64;
    let top = y as i64 - GLYPH_HEIGHT * scale;
    let mut pen_x = x as i64;

    for ch in text.chars() {
        let rows = glyph(ch.to_ascii_uppercase());
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                let px = pen_x + col * scale;
                let py = top + row as i64 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        frame.put_pixel(px + dx, py + dy, color);
                    }
                }
            }
        }
        pen_x += GLYPH_ADVANCE * scale;
    }
}

#[rustfmt::skip]
fn glyph(ch: char) -> [u8; 7] {
    match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ' ' => [0x00; 7],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_color(frame: &Frame, color: [u8; 3]) -> usize {
        frame.data.chunks_exact(3).filter(|p| *p == color).count()
    }

    #[test]
    fn test_rect_outline_single_pixel() {
        let mut frame = Frame::filled(10, 10, [0, 0, 0]);
        draw_rect(&mut frame, Rect::new(2, 2, 4, 4), GREEN, 1);
        // Perimeter of a 4x4 box is 12 pixels; the interior is untouched.
        assert_eq!(count_color(&frame, GREEN), 12);
        assert_eq!(frame.pixel(3, 3), Some([0, 0, 0]));
        assert_eq!(frame.pixel(2, 2), Some(GREEN));
        assert_eq!(frame.pixel(5, 5), Some(GREEN));
    }

    #[test]
    fn test_rect_thickness_two() {
        let mut frame = Frame::filled(10, 10, [0, 0, 0]);
        draw_rect(&mut frame, Rect::new(0, 0, 6, 6), BLUE, 2);
        // Outer ring 20 + inner ring 12
        assert_eq!(count_color(&frame, BLUE), 32);
        assert_eq!(frame.pixel(2, 2), Some([0, 0, 0]));
    }

    #[test]
    fn test_rect_clipped_at_border() {
        let mut frame = Frame::filled(8, 8, [0, 0, 0]);
        draw_rect(&mut frame, Rect::new(-4, -4, 8, 8), RED, 1);
        // Only the right and bottom edges are visible.
        assert_eq!(frame.pixel(3, 0), Some(RED));
        assert_eq!(frame.pixel(0, 3), Some(RED));
        assert_eq!(frame.pixel(4, 4), Some([0, 0, 0]));
    }

    #[test]
    fn test_put_text_lands_above_baseline() {
        let mut frame = Frame::filled(40, 20, [0, 0, 0]);
        put_text(&mut frame, "I", 0, 10, 1, WHITE);
        // Top bar of 'I' is on row 3 (baseline 10 minus 7 rows).
        assert_eq!(frame.pixel(1, 3), Some(WHITE));
        assert_eq!(frame.pixel(2, 9), Some(WHITE));
        assert!((10..20).all(|y| (0..40).all(|x| frame.pixel(x, y) == Some([0, 0, 0]))));
    }

    #[test]
    fn test_put_text_case_insensitive() {
        let mut lower = Frame::filled(40, 10, [0, 0, 0]);
        let mut upper = Frame::filled(40, 10, [0, 0, 0]);
        put_text(&mut lower, "face", 0, 8, 1, GREEN);
        put_text(&mut upper, "FACE", 0, 8, 1, GREEN);
        assert_eq!(lower.data, upper.data);
        assert!(count_color(&lower, GREEN) > 0);
    }

    #[test]
    fn test_put_text_scaled_block() {
        let mut frame = Frame::filled(20, 20, [0, 0, 0]);
        put_text(&mut frame, ".", 0, 14, 2, WHITE);
        // '.' is a 2x2 dot; at scale 2 it becomes 4x4.
        assert_eq!(count_color(&frame, WHITE), 16);
    }

    #[test]
    fn test_put_text_off_frame_is_clipped() {
        let mut frame = Frame::filled(10, 10, [0, 0, 0]);
        put_text(&mut frame, "NO FACE", 5, -20, 3, RED);
        assert_eq!(count_color(&frame, RED), 0);
    }
}

//! Metadata overlay burned into every frame
//!
//! The overlay is drawn before a frame is published or recorded, so recorded
//! chunks always carry the label, resolution and frame rate.

use super::traits::Frame;
use font8x8::{UnicodeFonts, BASIC_FONTS, LATIN_FONTS};

/// Frame rate shown when the device does not report one
pub const DEFAULT_FPS: u32 = 30;

const ORIGIN_X: u32 = 8;
const ORIGIN_Y: u32 = 6;
const SCALE: u32 = 2;
const GLYPH_SIZE: u32 = 8;
const TEXT_COLOR: [u8; 3] = [255, 255, 255];
const SHADOW_COLOR: [u8; 3] = [0, 0, 0];

/// `"{label} | {width}x{height} | {fps}FPS"`
pub fn overlay_text(label: &str, width: u32, height: u32, fps: u32) -> String {
    format!("{label} | {width}x{height} | {fps}FPS")
}

/// Draw `text` at the top-left corner of the frame. Glyphs that run off the
/// right or bottom edge are clipped.
pub fn burn_in(frame: &mut Frame, text: &str) {
    // shadow first so the text stays readable on bright scenes
    draw_text(frame, text, ORIGIN_X + 1, ORIGIN_Y + 1, SHADOW_COLOR);
    draw_text(frame, text, ORIGIN_X, ORIGIN_Y, TEXT_COLOR);
}

fn draw_text(frame: &mut Frame, text: &str, x: u32, y: u32, color: [u8; 3]) {
    let advance = GLYPH_SIZE * SCALE;

    for (i, ch) in text.chars().enumerate() {
        let left = x + i as u32 * advance;
        if left >= frame.width {
            break;
        }
        draw_glyph(frame, glyph(ch), left, y, color);
    }
}

fn draw_glyph(frame: &mut Frame, rows: [u8; 8], left: u32, top: u32, color: [u8; 3]) {
    for (row, bits) in rows.iter().enumerate() {
        for col in 0..GLYPH_SIZE {
            if (*bits >> col) & 1 == 0 {
                continue;
            }
            let px = left + col * SCALE;
            let py = top + row as u32 * SCALE;
            for dy in 0..SCALE {
                for dx in 0..SCALE {
                    frame.put_pixel(px + dx, py + dy, color);
                }
            }
        }
    }
}

fn glyph(ch: char) -> [u8; 8] {
    BASIC_FONTS
        .get(ch)
        .or_else(|| LATIN_FONTS.get(ch))
        .or_else(|| BASIC_FONTS.get('?'))
        .unwrap_or([0; 8])
}

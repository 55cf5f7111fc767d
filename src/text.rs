/// Bitmap text for tick labels, axis labels and region text.
/// Uses a 5x7 font; lowercase letters are drawn as capitals.
use image::{Rgba, RgbaImage};

/// Glyph cell width in font pixels, including one column of spacing
pub const CHAR_ADVANCE: u32 = 6;
/// Glyph height in font pixels
pub const CHAR_HEIGHT: u32 = 7;

/// Simple 5x7 bitmap font patterns
fn get_char_pattern(c: char) -> Option<[u8; 7]> {
    let pattern = match c.to_ascii_uppercase() {
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        '+' => [0b00000, 0b00100, 0b00100, 0b11111, 0b00100, 0b00100, 0b00000],
        '/' => [0b00001, 0b00010, 0b00010, 0b00100, 0b01000, 0b01000, 0b10000],
        '_' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b11111],
        '\'' => [0b00100, 0b00100, 0b01000, 0b00000, 0b00000, 0b00000, 0b00000],
        '"' => [0b01010, 0b01010, 0b10100, 0b00000, 0b00000, 0b00000, 0b00000],
        '#' => [0b01010, 0b01010, 0b11111, 0b01010, 0b11111, 0b01010, 0b01010],
        '(' => [0b00010, 0b00100, 0b01000, 0b01000, 0b01000, 0b00100, 0b00010],
        ')' => [0b01000, 0b00100, 0b00010, 0b00010, 0b00010, 0b00100, 0b01000],
        ',' => [0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b00100, 0b01000],
        '=' => [0b00000, 0b00000, 0b11111, 0b00000, 0b11111, 0b00000, 0b00000],
        ' ' => [0b00000; 7],
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01110],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01110, 0b10001, 0b10000, 0b01110, 0b00001, 0b10001, 0b01110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b11011, 0b10001],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        _ => return None,
    };
    Some(pattern)
}

/// Width in output pixels of `text` drawn at `scale`
pub fn text_width(text: &str, scale: u32) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        0
    } else {
        n * CHAR_ADVANCE * scale - scale
    }
}

/// Height in output pixels of one line drawn at `scale`
pub fn text_height(scale: u32) -> u32 {
    CHAR_HEIGHT * scale
}

/// Font scale for a point size at a resolution: glyph height tracks the cap
/// height of a font of that size
pub fn scale_for_points(points: f64, dpi: f64) -> u32 {
    let cap_px = points * dpi / 72.0 * 0.7;
    ((cap_px / CHAR_HEIGHT as f64).round() as u32).max(1)
}

/// Draw a single character with its top-left corner at `(x, y)`; parts
/// outside the image are clipped
pub fn draw_char(img: &mut RgbaImage, x: i32, y: i32, c: char, color: Rgba<u8>, scale: u32) {
    let Some(pattern) = get_char_pattern(c) else {
        return;
    };
    let scale = scale as i32;
    for (row_idx, &row) in pattern.iter().enumerate() {
        for col in 0..5 {
            if row & (1 << (4 - col)) == 0 {
                continue;
            }
            for dy in 0..scale {
                for dx in 0..scale {
                    let px = x + col * scale + dx;
                    let py = y + row_idx as i32 * scale + dy;
                    if px >= 0 && py >= 0 && (px as u32) < img.width() && (py as u32) < img.height() {
                        img.put_pixel(px as u32, py as u32, color);
                    }
                }
            }
        }
    }
}

/// Draw a string with its top-left corner at `(x, y)`
pub fn draw_text(img: &mut RgbaImage, x: i32, y: i32, text: &str, color: Rgba<u8>, scale: u32) {
    let char_width = (CHAR_ADVANCE * scale) as i32;
    let mut current_x = x;

    for c in text.chars() {
        draw_char(img, current_x, y, c, color, scale);
        current_x += char_width;
    }
}

/// Draw a string centred on `(cx, cy)`
pub fn draw_text_centered(
    img: &mut RgbaImage,
    cx: i32,
    cy: i32,
    text: &str,
    color: Rgba<u8>,
    scale: u32,
) {
    let x = cx - text_width(text, scale) as i32 / 2;
    let y = cy - text_height(scale) as i32 / 2;
    draw_text(img, x, y, text, color, scale);
}

/// Draw a string rotated a quarter turn counter-clockwise, reading bottom to
/// top, centred on `(cx, cy)`
pub fn draw_text_vertical(
    img: &mut RgbaImage,
    cx: i32,
    cy: i32,
    text: &str,
    color: Rgba<u8>,
    scale: u32,
) {
    let w = text_width(text, scale);
    let h = text_height(scale);
    if w == 0 {
        return;
    }
    let mut horizontal = RgbaImage::new(w, h);
    draw_text(&mut horizontal, 0, 0, text, color, scale);
    let rotated = image::imageops::rotate270(&horizontal);

    let x0 = cx - rotated.width() as i32 / 2;
    let y0 = cy - rotated.height() as i32 / 2;
    for (x, y, p) in rotated.enumerate_pixels() {
        if p[3] == 0 {
            continue;
        }
        let px = x0 + x as i32;
        let py = y0 + y as i32;
        if px >= 0 && py >= 0 && (px as u32) < img.width() && (py as u32) < img.height() {
            img.put_pixel(px as u32, py as u32, *p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn count_colored(img: &RgbaImage) -> usize {
        img.pixels().filter(|p| p[3] != 0).count()
    }

    #[test]
    fn test_text_width() {
        assert_eq!(text_width("", 1), 0);
        assert_eq!(text_width("A", 1), 5);
        assert_eq!(text_width("AB", 2), 22);
    }

    #[test]
    fn test_lowercase_matches_uppercase() {
        let mut lower = RgbaImage::new(10, 10);
        let mut upper = RgbaImage::new(10, 10);
        draw_char(&mut lower, 0, 0, 'r', RED, 1);
        draw_char(&mut upper, 0, 0, 'R', RED, 1);
        assert_eq!(lower, upper);
        assert!(count_colored(&upper) > 0);
    }

    #[test]
    fn test_sexagesimal_characters_present() {
        for c in ['0', ':', '-', '+', '.', '\'', '"'] {
            assert!(get_char_pattern(c).is_some(), "missing glyph {:?}", c);
        }
    }

    #[test]
    fn test_clipping_at_negative_offsets() {
        let mut img = RgbaImage::new(4, 4);
        draw_text(&mut img, -3, -3, "8", RED, 1);
        // Partially visible and no panic
        assert!(count_colored(&img) > 0);
    }

    #[test]
    fn test_vertical_text_is_tall() {
        let mut img = RgbaImage::new(40, 40);
        draw_text_vertical(&mut img, 20, 20, "DEC", RED, 1);
        let painted: Vec<(u32, u32)> = img
            .enumerate_pixels()
            .filter(|(_, _, p)| p[3] != 0)
            .map(|(x, y, _)| (x, y))
            .collect();
        let min_y = painted.iter().map(|p| p.1).min().unwrap();
        let max_y = painted.iter().map(|p| p.1).max().unwrap();
        let min_x = painted.iter().map(|p| p.0).min().unwrap();
        let max_x = painted.iter().map(|p| p.0).max().unwrap();
        assert!(max_y - min_y > max_x - min_x);
    }

    #[test]
    fn test_scale_for_points() {
        assert_eq!(scale_for_points(12.0, 100.0), 2);
        assert_eq!(scale_for_points(1.0, 10.0), 1);
    }
}

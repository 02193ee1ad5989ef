//! Sub-cell pixel raster over the terminal character grid.
//!
//! Every terminal cell packs 2x4 pixels into one braille glyph
//! (`U+2800 + bitmask`) with an independent 256-palette foreground and
//! background per cell. [`BrailleBuffer::frame`] serializes the grid into a
//! single string with state-compressed SGR escapes.

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

pub const SGR_RESET: &str = "\x1b[39;49m";

/// Braille dot bit for a pixel at `(x mod 2, y mod 4)`.
const PIXEL_MASKS: [[u8; 2]; 4] = [
    [0x01, 0x08],
    [0x02, 0x10],
    [0x04, 0x20],
    [0x40, 0x80],
];

/// Block glyph candidates for the ASCII fallback, ordered by dot count so
/// popcount ties resolve to the sparser glyph.
const BLOCK_GLYPHS: [(char, u8); 16] = [
    (' ', 0x00),
    ('\u{2598}', 0x03), // ▘
    ('\u{259d}', 0x18), // ▝
    ('\u{2596}', 0x44), // ▖
    ('\u{2597}', 0xa0), // ▗
    ('\u{2580}', 0x1b), // ▀
    ('\u{2584}', 0xe4), // ▄
    ('\u{258c}', 0x47), // ▌
    ('\u{2590}', 0xb8), // ▐
    ('\u{259a}', 0xa3), // ▚
    ('\u{259e}', 0x5c), // ▞
    ('\u{2599}', 0xe7), // ▙
    ('\u{259b}', 0x5f), // ▛
    ('\u{259c}', 0xbb), // ▜
    ('\u{259f}', 0xfc), // ▟
    ('\u{2588}', 0xff), // █
];

pub struct BrailleBuffer {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
    fg: Vec<Option<u8>>,
    bg: Vec<Option<u8>>,
    chars: Vec<Option<char>>,
    global_bg: Option<u8>,
    use_braille: bool,
    delimiter: String,
    block_map: Vec<char>,
}

impl BrailleBuffer {
    /// `width` must be even and `height` a multiple of four; anything else
    /// would leave pixels that belong to no terminal cell.
    pub fn new(width: usize, height: usize, use_braille: bool, delimiter: &str) -> Self {
        assert!(width % 2 == 0, "width must be even");
        assert!(height % 4 == 0, "height must be a multiple of 4");
        let cells = width * height / 8;

        Self {
            width,
            height,
            pixels: vec![0; cells],
            fg: vec![None; cells],
            bg: vec![None; cells],
            chars: vec![None; cells],
            global_bg: None,
            use_braille,
            delimiter: delimiter.to_string(),
            block_map: Self::build_block_map(),
        }
    }

    /// For each of the 256 dot masks, the block glyph sharing the most set
    /// dots with it. Ties keep the earlier table entry, so sparse masks map
    /// to sparse glyphs.
    fn build_block_map() -> Vec<char> {
        (0u16..256)
            .map(|mask| {
                let mask = mask as u8;
                let mut best = ' ';
                let mut best_count = 0;
                for &(ch, glyph_mask) in BLOCK_GLYPHS.iter() {
                    let count = (mask & glyph_mask).count_ones();
                    if count > best_count {
                        best_count = count;
                        best = ch;
                    }
                }
                best
            })
            .collect()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn set_braille(&mut self, use_braille: bool) {
        self.use_braille = use_braille;
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
        self.fg.fill(None);
        self.bg.fill(None);
        self.chars.fill(None);
    }

    fn cell_index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        let (x, y) = (x as usize, y as usize);
        Some((x >> 1) + (self.width >> 1) * (y >> 2))
    }

    pub fn set_pixel(&mut self, x: i32, y: i32, color: u8) {
        if let Some(i) = self.cell_index(x, y) {
            self.pixels[i] |= PIXEL_MASKS[(y & 3) as usize][(x & 1) as usize];
            self.fg[i] = Some(color);
        }
    }

    pub fn unset_pixel(&mut self, x: i32, y: i32) {
        if let Some(i) = self.cell_index(x, y) {
            self.pixels[i] &= !PIXEL_MASKS[(y & 3) as usize][(x & 1) as usize];
        }
    }

    #[cfg(test)]
    pub fn pixel_mask(&self, x: i32, y: i32) -> u8 {
        self.cell_index(x, y).map(|i| self.pixels[i]).unwrap_or(0)
    }

    pub fn set_background(&mut self, x: i32, y: i32, color: u8) {
        if let Some(i) = self.cell_index(x, y) {
            self.bg[i] = Some(color);
        }
    }

    pub fn set_global_background(&mut self, color: u8) {
        self.global_bg = Some(color);
    }

    /// Store an override character; the cell renders it instead of its
    /// braille glyph, hiding as many following cells as the char is wide.
    pub fn set_char(&mut self, ch: char, x: i32, y: i32, color: u8) {
        if let Some(i) = self.cell_index(x, y) {
            self.chars[i] = Some(ch);
            self.fg[i] = Some(color);
        }
    }

    /// Place a string one cell per column width starting at `(x, y)`,
    /// optionally centered on `x`. Width is measured in display cells, so
    /// CJK and emoji shift by two.
    pub fn write_text(&mut self, text: &str, x: i32, y: i32, color: u8, center: bool) {
        let mut x = x;
        if center {
            x -= UnicodeWidthStr::width(text) as i32;
        }

        for ch in text.chars() {
            let w = UnicodeWidthChar::width(ch).unwrap_or(0);
            if w == 0 {
                continue;
            }
            self.set_char(ch, x, y, color);
            x += 2 * w as i32;
        }
    }

    fn sgr(&self, fg: Option<u8>, bg: Option<u8>) -> String {
        match (fg, bg) {
            (Some(f), Some(b)) => format!("\x1b[38;5;{f};48;5;{b}m"),
            (Some(f), None) => format!("\x1b[49;38;5;{f}m"),
            (None, Some(b)) => format!("\x1b[39;48;5;{b}m"),
            (None, None) => SGR_RESET.to_string(),
        }
    }

    /// Serialize the grid. An SGR sequence is emitted only when it differs
    /// from the previously emitted one; the frame opens and closes with the
    /// fg/bg reset so it composes with whatever state the terminal is in.
    pub fn frame(&self) -> String {
        let cells_per_row = self.width / 2;
        let mut out = String::with_capacity(self.pixels.len() * 4);
        out.push_str(SGR_RESET);
        let mut current = SGR_RESET.to_string();
        let mut skip = 0usize;

        for row in 0..self.height / 4 {
            for col in 0..cells_per_row {
                let i = row * cells_per_row + col;

                let sgr = self.sgr(self.fg[i], self.bg[i].or(self.global_bg));
                if sgr != current {
                    out.push_str(&sgr);
                    current = sgr;
                }

                if let Some(ch) = self.chars[i] {
                    out.push(ch);
                    skip = UnicodeWidthChar::width(ch).unwrap_or(1).saturating_sub(1);
                } else if skip > 0 {
                    skip -= 1;
                } else if self.use_braille {
                    // Safety net: 0x2800..=0x28ff are all valid scalars.
                    out.push(char::from_u32(0x2800 + self.pixels[i] as u32).unwrap_or(' '));
                } else {
                    out.push(self.block_map[self.pixels[i] as usize]);
                }
            }
            skip = 0;
            out.push_str(&self.delimiter);
        }

        out.push_str(SGR_RESET);
        out.push_str(&self.delimiter);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(w: usize, h: usize) -> BrailleBuffer {
        BrailleBuffer::new(w, h, true, "\n\r")
    }

    /// Strip SGR escapes, returning the glyphs and the escapes separately.
    fn split_frame(frame: &str) -> (String, Vec<String>) {
        let mut glyphs = String::new();
        let mut escapes = Vec::new();
        let mut rest = frame;
        while let Some(start) = rest.find('\x1b') {
            glyphs.push_str(&rest[..start]);
            let end = rest[start..].find('m').expect("unterminated escape") + start;
            escapes.push(rest[start..=end].to_string());
            rest = &rest[end + 1..];
        }
        glyphs.push_str(rest);
        (glyphs, escapes)
    }

    #[test]
    fn single_pixel_sets_one_dot() {
        let mut buf = buffer(4, 4);
        buf.set_pixel(0, 0, 0);
        let frame = buf.frame();
        assert!(frame.starts_with(SGR_RESET));
        assert!(frame.contains('\u{2801}'));
        assert!(frame.ends_with(&format!("{SGR_RESET}\n\r")));
    }

    #[test]
    fn every_pixel_lands_in_its_own_dot() {
        for y in 0..8 {
            for x in 0..4 {
                let mut buf = buffer(4, 8);
                buf.set_pixel(x, y, 7);
                let expected = PIXEL_MASKS[(y & 3) as usize][(x & 1) as usize];
                assert_eq!(buf.pixel_mask(x, y), expected, "pixel ({x},{y})");
                let (glyphs, _) = split_frame(&buf.frame());
                let lit: Vec<char> = glyphs.chars().filter(|&c| c != '\u{2800}' && c != '\n' && c != '\r').collect();
                assert_eq!(lit, vec![char::from_u32(0x2800 + expected as u32).unwrap()]);
            }
        }
    }

    #[test]
    fn unset_restores_prior_mask() {
        let mut buf = buffer(4, 4);
        buf.set_pixel(0, 0, 1);
        let before = buf.pixel_mask(0, 0);
        buf.set_pixel(1, 1, 1);
        buf.unset_pixel(1, 1);
        assert_eq!(buf.pixel_mask(0, 0), before);
    }

    #[test]
    fn out_of_range_writes_are_ignored() {
        let mut buf = buffer(4, 4);
        buf.set_pixel(-1, 0, 1);
        buf.set_pixel(0, -1, 1);
        buf.set_pixel(4, 0, 1);
        buf.set_pixel(0, 4, 1);
        let (glyphs, _) = split_frame(&buf.frame());
        assert!(glyphs.chars().all(|c| c == '\u{2800}' || c == '\n' || c == '\r'));
    }

    #[test]
    fn cleared_frame_is_blank_and_reset() {
        let mut buf = buffer(8, 8);
        buf.set_pixel(3, 3, 100);
        buf.set_background(5, 5, 20);
        buf.clear();
        let (glyphs, escapes) = split_frame(&buf.frame());
        assert!(glyphs.chars().all(|c| c == '\u{2800}' || c == '\n' || c == '\r'));
        assert!(escapes.iter().all(|e| e == SGR_RESET));
    }

    #[test]
    fn consecutive_sgr_sequences_differ() {
        let mut buf = buffer(8, 8);
        buf.set_pixel(0, 0, 196);
        buf.set_pixel(2, 0, 196);
        buf.set_pixel(4, 0, 34);
        buf.set_background(0, 4, 17);
        let frame = buf.frame();

        // The emission rule: an escape may repeat within a frame, but never
        // immediately after an identical one.
        let mut prev: Option<String> = None;
        let mut rest = frame.as_str();
        while let Some(start) = rest.find('\x1b') {
            let end = rest[start..].find('m').unwrap() + start;
            let esc = rest[start..=end].to_string();
            if start == 0 {
                assert_ne!(prev.as_deref(), Some(esc.as_str()), "repeated SGR back to back");
            }
            prev = Some(esc);
            rest = &rest[end + 1..];
        }
    }

    #[test]
    fn same_color_cells_share_one_escape() {
        let mut buf = buffer(8, 4);
        for x in 0..8 {
            buf.set_pixel(x, 0, 196);
        }
        let (_, escapes) = split_frame(&buf.frame());
        // opening reset, one color change, closing reset
        assert_eq!(escapes.len(), 3);
        assert_eq!(escapes[1], "\x1b[49;38;5;196m");
    }

    #[test]
    fn cell_background_beats_global_background() {
        let mut buf = buffer(4, 4);
        buf.set_global_background(17);
        buf.set_background(0, 0, 42);
        let (_, escapes) = split_frame(&buf.frame());
        assert_eq!(escapes[1], "\x1b[39;48;5;42m");
        assert_eq!(escapes[2], "\x1b[39;48;5;17m");
    }

    #[test]
    fn wide_char_hides_following_cell() {
        let mut buf = buffer(8, 4);
        buf.set_pixel(2, 0, 7);
        buf.set_pixel(3, 0, 7);
        buf.set_char('\u{4e16}', 0, 0, 15); // 世
        let (glyphs, _) = split_frame(&buf.frame());
        let row: Vec<char> = glyphs.chars().take_while(|&c| c != '\n').collect();
        // cell 1 is swallowed by the wide glyph; cells 2 and 3 untouched
        assert_eq!(row, vec!['\u{4e16}', '\u{2800}', '\u{2800}']);
    }

    #[test]
    fn text_is_centered_by_display_width() {
        let mut ascii = buffer(24, 4);
        ascii.write_text("abcd", 12, 0, 7, true);
        let (glyphs, _) = split_frame(&ascii.frame());
        let row: String = glyphs.chars().take_while(|&c| c != '\n').collect();
        assert_eq!(row.trim_matches('\u{2800}'), "abcd");
        assert_eq!(row.find('a'), Some("\u{2800}".len() * 4));

        let mut wide = buffer(24, 4);
        wide.write_text("\u{4e16}\u{754c}", 12, 0, 7, true); // 世界
        let (glyphs, _) = split_frame(&wide.frame());
        let row: String = glyphs.chars().take_while(|&c| c != '\n').collect();
        assert_eq!(row.trim_matches('\u{2800}'), "\u{4e16}\u{754c}");
    }

    #[test]
    fn ascii_fallback_picks_overlapping_blocks() {
        let mut buf = BrailleBuffer::new(4, 4, false, "\n\r");
        buf.set_pixel(0, 0, 7);
        buf.set_pixel(0, 1, 7);
        let (glyphs, _) = split_frame(&buf.frame());
        assert_eq!(glyphs.chars().next(), Some('\u{2598}'));

        let mut full = BrailleBuffer::new(2, 4, false, "\n\r");
        for y in 0..4 {
            for x in 0..2 {
                full.set_pixel(x, y, 7);
            }
        }
        let (glyphs, _) = split_frame(&full.frame());
        assert_eq!(glyphs.chars().next(), Some('\u{2588}'));
    }
}

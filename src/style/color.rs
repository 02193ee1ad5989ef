//! CSS color literals as they appear in style documents: `#rgb`,
//! `#rrggbb`, `rgb()`, `rgba()`, `hsl()` and `hsla()`.

use std::str::FromStr;

use crate::utils;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    /// Nearest xterm-256 palette index; the alpha channel has no terminal
    /// counterpart and is ignored.
    pub fn to_term(self) -> u8 {
        let channel = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        utils::nearest_term_color(channel(self.r), channel(self.g), channel(self.b))
    }

    /// CSS hue-to-channel form: each channel samples the same piecewise
    /// ramp a third of a turn apart.
    fn from_hsl(h: f32, s: f32, l: f32, a: f32) -> Self {
        let hue = h.rem_euclid(360.0) / 360.0;
        let s = s.clamp(0.0, 1.0);
        let l = l.clamp(0.0, 1.0);

        let high = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
        let low = 2.0 * l - high;

        let ramp = |turn: f32| {
            let turn = turn.rem_euclid(1.0);
            if turn < 1.0 / 6.0 {
                low + (high - low) * 6.0 * turn
            } else if turn < 1.0 / 2.0 {
                high
            } else if turn < 2.0 / 3.0 {
                low + (high - low) * (2.0 / 3.0 - turn) * 6.0
            } else {
                low
            }
        };

        Color {
            r: ramp(hue + 1.0 / 3.0),
            g: ramp(hue),
            b: ramp(hue - 1.0 / 3.0),
            a,
        }
    }
}

fn hex_nibble(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => 0,
    }
}

/// Lenient numeric parse for the comma-separated function forms: units and
/// whitespace (`50%`, ` 120deg`) are stripped, whatever digits remain go
/// through the normal float parser.
fn number(s: &str) -> f32 {
    let digits: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse().unwrap_or(0.0)
}

fn parts(s: &str, prefix: &str) -> Option<Vec<f32>> {
    let rest = s.strip_prefix(prefix)?;
    let (inner, _) = rest.split_once(')')?;
    Some(inner.split(',').map(number).collect())
}

impl FromStr for Color {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let color = if s.starts_with('#') && s.len() == 4 {
            let c = s.as_bytes();
            Color {
                r: (hex_nibble(c[1]) * 0x11) as f32 / 255.0,
                g: (hex_nibble(c[2]) * 0x11) as f32 / 255.0,
                b: (hex_nibble(c[3]) * 0x11) as f32 / 255.0,
                a: 1.0,
            }
        } else if s.starts_with('#') && s.len() == 7 {
            let c = s.as_bytes();
            Color {
                r: (hex_nibble(c[1]) << 4 | hex_nibble(c[2])) as f32 / 255.0,
                g: (hex_nibble(c[3]) << 4 | hex_nibble(c[4])) as f32 / 255.0,
                b: (hex_nibble(c[5]) << 4 | hex_nibble(c[6])) as f32 / 255.0,
                a: 1.0,
            }
        } else if let Some(p) = parts(s, "rgba(") {
            Color {
                r: p.first().copied().unwrap_or_default() / 255.0,
                g: p.get(1).copied().unwrap_or_default() / 255.0,
                b: p.get(2).copied().unwrap_or_default() / 255.0,
                a: p.get(3).copied().unwrap_or(1.0),
            }
        } else if let Some(p) = parts(s, "rgb(") {
            Color {
                r: p.first().copied().unwrap_or_default() / 255.0,
                g: p.get(1).copied().unwrap_or_default() / 255.0,
                b: p.get(2).copied().unwrap_or_default() / 255.0,
                a: 1.0,
            }
        } else if let Some(p) = parts(s, "hsla(") {
            Color::from_hsl(
                p.first().copied().unwrap_or_default(),
                p.get(1).copied().unwrap_or_default() / 100.0,
                p.get(2).copied().unwrap_or_default() / 100.0,
                p.get(3).copied().unwrap_or(1.0),
            )
        } else if let Some(p) = parts(s, "hsl(") {
            Color::from_hsl(
                p.first().copied().unwrap_or_default(),
                p.get(1).copied().unwrap_or_default() / 100.0,
                p.get(2).copied().unwrap_or_default() / 100.0,
                1.0,
            )
        } else {
            return Err("invalid color");
        };

        Ok(color)
    }
}

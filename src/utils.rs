//! Web-Mercator projection math, coordinate wrapping and the 256-color
//! palette quantizer.

use std::f64::consts::PI;

/// The Mercator projection is undefined at the poles; tiled maps cut off
/// where the world square closes.
pub const MERCATOR_LAT_LIMIT: f64 = 85.0511;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

impl LonLat {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }.normalized()
    }

    pub fn normalized(self) -> Self {
        Self {
            lon: wrap_lon(self.lon),
            lat: clamp_lat(self.lat),
        }
    }
}

/// Wrap a longitude into `[-180, 180)`.
pub fn wrap_lon(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == 180.0 { -180.0 } else { wrapped }
}

pub fn clamp_lat(lat: f64) -> f64 {
    lat.clamp(-MERCATOR_LAT_LIMIT, MERCATOR_LAT_LIMIT)
}

/// Fractional tile coordinates of a lon/lat at an integer zoom.
pub fn ll2tile(lon: f64, lat: f64, zoom: u32) -> (f64, f64) {
    let n = (1u32 << zoom) as f64;
    let lat = clamp_lat(lat).to_radians();
    let x = (lon + 180.0) / 360.0 * n;
    let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * n;
    (x, y)
}

/// Inverse of [`ll2tile`].
pub fn tile2ll(x: f64, y: f64, zoom: u32) -> LonLat {
    let n = (1u32 << zoom) as f64;
    let lon = x / n * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees();
    LonLat { lon, lat }
}

/// Integer zoom level the tile pyramid is sampled at.
pub fn base_zoom(zoom: f64, max_zoom: f64) -> u32 {
    zoom.clamp(0.0, max_zoom).floor() as u32
}

/// Canvas-pixel edge length of one tile at a fractional zoom. Between
/// integer zooms the same tile is simply scaled up.
pub fn tilesize_at_zoom(zoom: f64, project_size: u32) -> f64 {
    project_size as f64 * 2f64.powf(zoom - zoom.floor())
}

/// Nearest xterm-256 palette index for an RGB triple. Searches the
/// 6x6x6 color cube (16..231) and the gray ramp (232..255); the 16
/// system colors are skipped because their RGB values vary by terminal.
pub fn nearest_term_color(r: u8, g: u8, b: u8) -> u8 {
    const CUBE: [i32; 6] = [0, 95, 135, 175, 215, 255];

    let mut best = 16u8;
    let mut best_dist = i32::MAX;

    let mut consider = |idx: u8, cr: i32, cg: i32, cb: i32| {
        let dr = cr - r as i32;
        let dg = cg - g as i32;
        let db = cb - b as i32;
        let dist = dr * dr + dg * dg + db * db;
        if dist < best_dist {
            best_dist = dist;
            best = idx;
        }
    };

    for (ri, &cr) in CUBE.iter().enumerate() {
        for (gi, &cg) in CUBE.iter().enumerate() {
            for (bi, &cb) in CUBE.iter().enumerate() {
                let idx = 16 + 36 * ri + 6 * gi + bi;
                consider(idx as u8, cr, cg, cb);
            }
        }
    }

    for i in 0..24 {
        let level = 8 + 10 * i;
        consider((232 + i) as u8, level, level, level);
    }

    best
}

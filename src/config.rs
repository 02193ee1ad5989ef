use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Immutable runtime configuration. Built once at startup from the config
/// file plus command line overrides and passed by reference from there on.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// Preferred label language, tried as `name_<language>`.
    pub language: Option<String>,
    /// Tile origin: an http(s) URL prefix or a path to an `.mbtiles` archive.
    pub source: String,
    /// Mapbox GL style document to render with.
    pub style_file: PathBuf,

    pub initial_lat: f64,
    pub initial_lon: f64,
    pub initial_zoom: f64,
    pub max_zoom: f64,
    pub zoom_step: f64,

    /// Braille glyphs when true, ASCII block glyphs otherwise.
    pub use_braille: bool,
    pub persist_downloaded_tiles: bool,
    /// Reference tile edge length in canvas pixels at integer zoom.
    pub project_size: u32,
    /// Decoded tiles kept in memory.
    pub cache_size: usize,

    /// Default label collision margin, in terminal cells.
    pub label_margin: i32,
    /// Per-source-layer overrides.
    pub layers: HashMap<String, LayerOptions>,

    /// Row separator of the emitted frame.
    pub delimiter: String,
    /// Glyph for point symbols without a usable label.
    pub poi_marker: char,
    /// Render a single frame to stdout and exit; no terminal takeover.
    pub headless: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LayerOptions {
    pub margin: Option<i32>,
    pub cluster: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            language: None,
            source: "http://mapscii.me/".into(),
            style_file: PathBuf::from("style.json"),
            initial_lat: 52.51298,
            initial_lon: 13.42012,
            initial_zoom: 3.0,
            max_zoom: 18.0,
            zoom_step: 0.2,
            use_braille: true,
            persist_downloaded_tiles: true,
            project_size: 256,
            cache_size: 16,
            label_margin: 5,
            layers: [
                ("housenum_label".into(), LayerOptions { margin: Some(3), cluster: false }),
                ("poi_label".into(), LayerOptions { margin: Some(5), cluster: true }),
                ("place_label".into(), LayerOptions::default()),
                ("state_label".into(), LayerOptions::default()),
            ]
            .into_iter()
            .collect(),
            delimiter: "\n\r".into(),
            poi_marker: '\u{25c9}',
            headless: false,
        }
    }
}

impl Config {
    pub fn label_margin_for(&self, source_layer: &str) -> i32 {
        self.layers
            .get(source_layer)
            .and_then(|l| l.margin)
            .unwrap_or(self.label_margin)
    }
}

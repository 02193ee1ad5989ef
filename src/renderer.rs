//! Frame compositor: pick the tiles covering the viewport, project their
//! features into canvas space and paint them in style order. A frame either
//! completes as one string or fails without touching the screen.

use std::rc::Rc;

use log::{debug, warn};
use rstar::AABB;

use crate::canvas::Canvas;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::labels::{LabelBuffer, LabelTag};
use crate::style::{LayerType, Styler};
use crate::tile::{Feature, Tile, TileLayer};
use crate::tile_source::{TileId, TileSource};
use crate::utils::{self, LonLat};

pub struct Renderer {
    canvas: Canvas,
    labels: LabelBuffer,
    drawing: bool,
}

/// A fetched tile with its top-left corner in canvas pixels.
struct PlacedTile {
    tile: Rc<Tile>,
    x: f64,
    y: f64,
    size: f64,
}

impl Renderer {
    /// `width`/`height` are in canvas pixels: terminal columns times two,
    /// rows times four.
    pub fn new(width: usize, height: usize, config: &Config) -> Self {
        Self {
            canvas: Canvas::new(width, height, config.use_braille, &config.delimiter),
            labels: LabelBuffer::new(),
            drawing: false,
        }
    }

    pub fn set_braille(&mut self, use_braille: bool) {
        self.canvas.set_braille(use_braille);
    }

    pub fn width(&self) -> usize {
        self.canvas.width()
    }

    pub fn height(&self) -> usize {
        self.canvas.height()
    }

    /// Placed labels of the last frame, for cursor queries.
    pub fn labels(&self) -> &LabelBuffer {
        &self.labels
    }

    /// Produce one frame. Re-entrant calls are rejected; a failed tile
    /// fetch aborts the frame and leaves the previous one on screen.
    pub fn draw(
        &mut self,
        source: &mut TileSource,
        styler: &Styler,
        config: &Config,
        center: LonLat,
        zoom: f64,
    ) -> Result<String> {
        if self.drawing {
            return Err(Error::RendererBusy);
        }

        self.drawing = true;
        let frame = self.draw_frame(source, styler, config, center, zoom);
        self.drawing = false;
        frame
    }

    fn draw_frame(
        &mut self,
        source: &mut TileSource,
        styler: &Styler,
        config: &Config,
        center: LonLat,
        zoom: f64,
    ) -> Result<String> {
        self.canvas.clear();
        self.labels.clear();
        if let Some(background) = styler.background_color() {
            self.canvas.set_global_background(background);
        }

        let placed = self.visible_tiles(source, styler, config, center, zoom)?;

        for layer in styler.layers() {
            if matches!(layer.kind, LayerType::Background | LayerType::Unsupported) {
                continue;
            }
            if !layer.in_zoom(zoom) {
                continue;
            }
            let Some(source_layer) = layer.source_layer.as_deref() else {
                continue;
            };

            for tile in &placed {
                if let Some(tile_layer) = tile.tile.layers.get(source_layer) {
                    self.draw_layer(layer.index, source_layer, tile_layer, tile, config);
                }
            }
        }

        Ok(self.canvas.frame())
    }

    /// Fetch every tile whose square intersects the canvas. All tiles are
    /// resolved before any painting starts, so a fetch failure costs
    /// nothing but the frame.
    fn visible_tiles(
        &mut self,
        source: &mut TileSource,
        styler: &Styler,
        config: &Config,
        center: LonLat,
        zoom: f64,
    ) -> Result<Vec<PlacedTile>> {
        let z = utils::base_zoom(zoom, config.max_zoom);
        let grid = 1i64 << z;
        let size = utils::tilesize_at_zoom(zoom, config.project_size);
        let (cx, cy) = utils::ll2tile(center.lon, center.lat, z);

        let width = self.canvas.width() as f64;
        let height = self.canvas.height() as f64;
        let reach_x = width / (2.0 * size);
        let reach_y = height / (2.0 * size);

        let mut placed = Vec::new();
        for ty in (cy - reach_y).floor() as i64..=(cy + reach_y).floor() as i64 {
            if ty < 0 || ty >= grid {
                continue;
            }
            for tx in (cx - reach_x).floor() as i64..=(cx + reach_x).floor() as i64 {
                let x = width / 2.0 - (cx - tx as f64) * size;
                let y = height / 2.0 - (cy - ty as f64) * size;
                if x + size < 0.0 || y + size < 0.0 || x >= width || y >= height {
                    continue;
                }

                let id = TileId::new(z, tx.rem_euclid(grid) as u32, ty as u32);
                debug!("tile {id} at canvas ({x:.1}, {y:.1})");
                // a corrupt tile only loses its own square; fetch errors
                // abort the frame
                let tile = match source.get_tile(id, styler, config) {
                    Ok(tile) => tile,
                    Err(Error::TileDecode(reason)) => {
                        warn!("skipping undecodable tile {id}: {reason}");
                        continue;
                    }
                    Err(err) => return Err(err),
                };
                placed.push(PlacedTile { tile, x, y, size });
            }
        }

        Ok(placed)
    }

    fn draw_layer(
        &mut self,
        style_index: usize,
        source_layer: &str,
        layer: &TileLayer,
        tile: &PlacedTile,
        config: &Config,
    ) {
        let scale = tile.size / layer.extent as f64;

        // viewport rectangle in this tile's extent coordinates
        let min = [
            ((-tile.x) / scale).floor() as i32,
            ((-tile.y) / scale).floor() as i32,
        ];
        let max = [
            ((self.canvas.width() as f64 - tile.x) / scale).ceil() as i32,
            ((self.canvas.height() as f64 - tile.y) / scale).ceil() as i32,
        ];
        let viewport = AABB::from_corners(min, max);

        let mut features: Vec<&Feature> = layer
            .tree
            .locate_in_envelope_intersecting(&viewport)
            .filter(|feature| feature.style_index == style_index)
            .collect();
        features.sort_by_key(|feature| feature.sort);

        for feature in features {
            self.draw_feature(feature, source_layer, tile, scale, config);
        }
    }

    fn draw_feature(
        &mut self,
        feature: &Feature,
        source_layer: &str,
        tile: &PlacedTile,
        scale: f64,
        config: &Config,
    ) {
        let project = |&(px, py): &(i32, i32)| -> (i32, i32) {
            (
                (tile.x + px as f64 * scale).round() as i32,
                (tile.y + py as f64 * scale).round() as i32,
            )
        };

        match feature.kind {
            LayerType::Fill => {
                let rings: Vec<Vec<(i32, i32)>> = feature
                    .geometry
                    .iter()
                    .map(|ring| ring.iter().map(project).collect())
                    .collect();
                if !self.canvas.polygon(&rings, feature.color) {
                    debug!("skipping degenerate polygon in {source_layer}");
                }
            }
            LayerType::Line => {
                let width = feature.width.round().max(1.0) as u16;
                for path in &feature.geometry {
                    let points: Vec<(i32, i32)> = path.iter().map(project).collect();
                    self.canvas.polyline(&points, feature.color, width);
                }
            }
            LayerType::Symbol => {
                let Some((x, y)) = centroid(&feature.geometry, project) else {
                    return;
                };

                let marker = config.poi_marker.to_string();
                let text: &str = feature.label.as_deref().unwrap_or(&marker);
                let tag = LabelTag {
                    source_layer: source_layer.to_string(),
                    name: text.to_string(),
                };

                let margin = config.label_margin_for(source_layer);
                if self.labels.write_if_possible(text, x, y, tag, margin) {
                    if feature.label.is_some() {
                        self.canvas.text(text, x, y, feature.color, false);
                    } else {
                        self.canvas.set_char(config.poi_marker, x, y, feature.color);
                    }
                }
            }
            LayerType::Background | LayerType::Unsupported => {}
        }
    }
}

fn centroid<F: Fn(&(i32, i32)) -> (i32, i32)>(
    geometry: &[Vec<(i32, i32)>],
    project: F,
) -> Option<(i32, i32)> {
    let mut count = 0i64;
    let mut sum = (0i64, 0i64);
    for point in geometry.iter().flatten() {
        let (x, y) = project(point);
        sum = (sum.0 + x as i64, sum.1 + y as i64);
        count += 1;
    }

    if count == 0 {
        None
    } else {
        Some(((sum.0 / count) as i32, (sum.1 / count) as i32))
    }
}

//! Decoding a vector tile byte blob into styled, spatially indexed
//! features. A tile is populated once and immutable afterwards.

use std::io::Read;

use ahash::AHashMap;
use bstr::BString;
use prost::Message;
use rstar::{RTree, RTreeObject, AABB};
use smallvec::{smallvec, SmallVec};
use smartstring::alias::String as SmartString;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::proto;
use crate::style::{LayerType, Styler};

/// A decoded tag value. Strings stay as raw bytes; tiles in the wild carry
/// the occasional non-UTF-8 name.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Str(BString),
    Num(f64),
    Bool(bool),
}

impl PropValue {
    pub fn as_num(&self) -> Option<f64> {
        match self {
            PropValue::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            PropValue::Str(s) => Some(String::from_utf8_lossy(s).into_owned()),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            PropValue::Str(s) => !s.is_empty(),
            PropValue::Num(n) => *n != 0.0,
            PropValue::Bool(b) => *b,
        }
    }

    fn from_proto(value: &proto::Value) -> Option<Self> {
        if let Some(s) = value.string_value.as_ref() {
            Some(PropValue::Str(BString::from(s.as_slice())))
        } else if let Some(n) = value.float_value {
            Some(PropValue::Num(n as f64))
        } else if let Some(n) = value.double_value {
            Some(PropValue::Num(n))
        } else if let Some(n) = value.int_value {
            Some(PropValue::Num(n as f64))
        } else if let Some(n) = value.uint_value {
            Some(PropValue::Num(n as f64))
        } else if let Some(n) = value.sint_value {
            Some(PropValue::Num(n as f64))
        } else {
            value.bool_value.map(PropValue::Bool)
        }
    }
}

/// Feature tag map, including the synthetic `$type` key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    entries: AHashMap<String, PropValue>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: PropValue) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&PropValue> {
        self.entries.get(key)
    }
}

/// Point paths of one record; polygons are the only multi-path case.
pub type Geometry = SmallVec<[Vec<(i32, i32)>; 1]>;

/// One drawable record: a full ring list for polygons, a single line
/// string or point otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub style_index: usize,
    pub kind: LayerType,
    pub color: u8,
    pub width: f32,
    pub label: Option<SmartString>,
    pub sort: i32,
    pub geometry: Geometry,
    min: [i32; 2],
    max: [i32; 2],
}

impl RTreeObject for Feature {
    type Envelope = AABB<[i32; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

/// Wider nodes than the rstar default; tile queries are broad rectangles
/// over a few hundred entries.
pub struct FeatureTreeParams;

impl rstar::RTreeParams for FeatureTreeParams {
    const MIN_SIZE: usize = 6;
    const MAX_SIZE: usize = 18;
    const REINSERTION_COUNT: usize = 3;
    type DefaultInsertionStrategy = rstar::RStarInsertionStrategy;
}

pub type FeatureTree = RTree<Feature, FeatureTreeParams>;

pub struct TileLayer {
    pub extent: u32,
    pub tree: FeatureTree,
}

pub struct Tile {
    pub layers: AHashMap<String, TileLayer>,
}

impl Tile {
    /// Decode a (possibly gzip-wrapped) vector tile blob, apply the style
    /// and index the surviving features.
    pub fn decode(bytes: &[u8], styler: &Styler, config: &Config) -> Result<Tile> {
        let raw;
        let bytes = if bytes.starts_with(&[0x1f, 0x8b]) {
            let mut decoder = libflate::gzip::Decoder::new(bytes)
                .map_err(|e| Error::TileDecode(format!("invalid gzip: {e}")))?;
            let mut buf = Vec::new();
            decoder
                .read_to_end(&mut buf)
                .map_err(|e| Error::TileDecode(format!("invalid gzip: {e}")))?;
            raw = buf;
            raw.as_slice()
        } else {
            bytes
        };

        let tile = proto::Tile::decode(bytes)?;

        let mut layers = AHashMap::with_capacity(tile.layers.len());
        for layer in &tile.layers {
            let mut features = Vec::new();
            for feature in &layer.features {
                collect_features(layer, feature, styler, config, &mut features);
            }

            layers.insert(
                layer.name.clone(),
                TileLayer {
                    extent: layer.extent(),
                    tree: FeatureTree::bulk_load_with_params(features),
                },
            );
        }

        Ok(Tile { layers })
    }
}

fn collect_features(
    layer: &proto::Layer,
    feature: &proto::Feature,
    styler: &Styler,
    config: &Config,
    out: &mut Vec<Feature>,
) {
    let geom_type = feature.geom_type();
    let props = feature_properties(layer, feature, geom_type);

    let Some(style) = styler.style_for(&layer.name, &props) else {
        return;
    };

    let color = style.paint.feature_color().unwrap_or(7);
    let sort = props
        .get("localrank")
        .or_else(|| props.get("scalerank"))
        .and_then(PropValue::as_num)
        .unwrap_or(0.0) as i32;

    let label = match style.kind {
        LayerType::Symbol => label_text(&props, config),
        _ => None,
    };

    let paths = decode_paths(&feature.geometry);
    if paths.is_empty() {
        return;
    }

    let mut push = |geometry: Geometry| {
        let Some((min, max)) = bounding_box(&geometry) else {
            return;
        };
        out.push(Feature {
            style_index: style.index,
            kind: style.kind,
            color,
            width: style.paint.line_width,
            label: label.clone(),
            sort,
            geometry,
            min,
            max,
        });
    };

    if geom_type == proto::GeomType::Polygon {
        // all rings (outer and holes) belong to one record
        push(Geometry::from_vec(paths));
    } else {
        for path in paths {
            push(smallvec![path]);
        }
    }
}

fn feature_properties(
    layer: &proto::Layer,
    feature: &proto::Feature,
    geom_type: proto::GeomType,
) -> Properties {
    let mut props = Properties::new();

    let type_name = match geom_type {
        proto::GeomType::Point => "Point",
        proto::GeomType::Linestring => "LineString",
        proto::GeomType::Polygon => "Polygon",
        proto::GeomType::Unknown => "Unknown",
    };
    props.insert("$type", PropValue::Str(type_name.into()));

    for tag in feature.tags.chunks(2) {
        let [key_idx, value_idx] = *tag else {
            continue;
        };
        let key = layer.keys.get(key_idx as usize);
        let value = layer
            .values
            .get(value_idx as usize)
            .and_then(PropValue::from_proto);

        if let (Some(key), Some(value)) = (key, value) {
            props.insert(String::from_utf8_lossy(key).into_owned(), value);
        }
    }

    props
}

fn label_text(props: &Properties, config: &Config) -> Option<SmartString> {
    let localized = config.language.as_ref().map(|l| format!("name_{l}"));

    let result = localized
        .as_deref()
        .into_iter()
        .chain(["name_en", "name", "house_num"])
        .find_map(|key| props.get(key))
        .and_then(PropValue::as_text)
        .map(SmartString::from);
    result
}

/// Walk the command-encoded geometry stream into point paths. Deltas are
/// zigzag-encoded and relative to the previous point, across path breaks
/// too.
fn decode_paths(geometry: &[u32]) -> Vec<Vec<(i32, i32)>> {
    const MOVE_TO: u32 = 1;
    const LINE_TO: u32 = 2;
    const CLOSE_PATH: u32 = 7;

    let mut paths = Vec::new();
    let mut path: Vec<(i32, i32)> = Vec::new();
    let mut x = 0i64;
    let mut y = 0i64;

    let mut iter = geometry.iter().copied();
    while let Some(command) = iter.next() {
        let op = command & 7;
        let count = command >> 3;

        for _ in 0..count {
            match op {
                MOVE_TO | LINE_TO => {
                    let (Some(dx), Some(dy)) = (iter.next(), iter.next()) else {
                        // truncated stream; keep what decoded so far
                        if !path.is_empty() {
                            paths.push(std::mem::take(&mut path));
                        }
                        return paths;
                    };

                    x += zigzag(dx);
                    y += zigzag(dy);

                    if op == MOVE_TO && !path.is_empty() {
                        paths.push(std::mem::take(&mut path));
                    }
                    path.push((x as i32, y as i32));
                }
                CLOSE_PATH => {
                    if !path.is_empty() {
                        paths.push(std::mem::take(&mut path));
                    }
                }
                _ => {}
            }
        }
    }

    if !path.is_empty() {
        paths.push(path);
    }
    paths
}

fn zigzag(value: u32) -> i64 {
    let value = value as i64;
    (value >> 1) ^ -(value & 1)
}

fn bounding_box(geometry: &[Vec<(i32, i32)>]) -> Option<([i32; 2], [i32; 2])> {
    let mut points = geometry.iter().flatten();
    let &(x, y) = points.next()?;
    let mut min = [x, y];
    let mut max = [x, y];
    for &(x, y) in points {
        min = [min[0].min(x), min[1].min(y)];
        max = [max[0].max(x), max[1].max(y)];
    }
    Some((min, max))
}

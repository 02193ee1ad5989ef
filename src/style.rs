//! Compiled Mapbox GL style. The document is loaded once: constants are
//! substituted, `ref` layers resolved, filters compiled and paint colors
//! quantized into the terminal palette. Lookup is by declaration order, so
//! the first accepting layer styles a feature.

use std::collections::HashMap;
use std::str::FromStr;

use log::warn;
use serde::Deserialize;
use serde_json::Value as JsonValue;

pub mod color;
mod filter;

use color::Color;
pub use filter::Filter;

use crate::tile::Properties;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LayerType {
    Fill,
    Line,
    Symbol,
    Background,
    /// Present in the document but not drawable on this canvas.
    Unsupported,
}

impl LayerType {
    fn from_name(name: Option<&str>) -> Self {
        match name {
            Some("fill") => LayerType::Fill,
            Some("line") => LayerType::Line,
            Some("symbol") => LayerType::Symbol,
            Some("background") => LayerType::Background,
            _ => LayerType::Unsupported,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Paint {
    pub fill_color: Option<u8>,
    pub line_color: Option<u8>,
    pub text_color: Option<u8>,
    pub background_color: Option<u8>,
    pub line_width: f32,
}

impl Default for Paint {
    fn default() -> Self {
        Self {
            fill_color: None,
            line_color: None,
            text_color: None,
            background_color: None,
            line_width: 1.0,
        }
    }
}

impl Paint {
    fn from_document(map: &serde_json::Map<String, JsonValue>) -> Self {
        Self {
            fill_color: color_value(map.get("fill-color")),
            line_color: color_value(map.get("line-color")),
            text_color: color_value(map.get("text-color")),
            background_color: color_value(map.get("background-color")),
            line_width: number_value(map.get("line-width")).unwrap_or(1.0),
        }
    }

    /// The color a feature styled by this layer draws with.
    pub fn feature_color(&self) -> Option<u8> {
        self.line_color.or(self.fill_color).or(self.text_color)
    }
}

/// A paint entry is either a literal or a `{stops: [[zoom, value], ...]}`
/// record; only the first stop is honored.
fn first_stop(value: &JsonValue) -> Option<&JsonValue> {
    value
        .get("stops")?
        .as_array()?
        .first()?
        .as_array()?
        .get(1)
}

fn color_value(value: Option<&JsonValue>) -> Option<u8> {
    let value = value?;
    match value {
        JsonValue::String(s) => match Color::from_str(s) {
            Ok(color) => Some(color.to_term()),
            Err(_) => {
                warn!("unparseable color {s:?}");
                None
            }
        },
        _ => first_stop(value).and_then(|v| color_value(Some(v))),
    }
}

fn number_value(value: Option<&JsonValue>) -> Option<f32> {
    let value = value?;
    match value {
        JsonValue::Number(n) => n.as_f64().map(|n| n as f32),
        _ => first_stop(value).and_then(|v| number_value(Some(v))),
    }
}

#[derive(Debug, Clone)]
pub struct StyleLayer {
    pub id: String,
    pub index: usize,
    pub kind: LayerType,
    pub source_layer: Option<String>,
    pub minzoom: Option<f64>,
    pub maxzoom: Option<f64>,
    pub paint: Paint,
    filter: Filter,
}

impl StyleLayer {
    pub fn applies(&self, props: &Properties) -> bool {
        self.filter.eval(props)
    }

    pub fn in_zoom(&self, zoom: f64) -> bool {
        self.minzoom.map_or(true, |z| zoom >= z) && self.maxzoom.map_or(true, |z| zoom <= z)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawLayer {
    id: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "ref")]
    reference: Option<String>,
    source_layer: Option<String>,
    minzoom: Option<f64>,
    maxzoom: Option<f64>,
    filter: Option<JsonValue>,
    #[serde(default)]
    paint: serde_json::Map<String, JsonValue>,
}

#[derive(Default)]
pub struct Styler {
    layers: Vec<StyleLayer>,
    by_id: HashMap<String, usize>,
    by_source_layer: HashMap<String, Vec<usize>>,
}

impl Styler {
    pub fn load<R: std::io::Read>(reader: R) -> Result<Self, serde_json::Error> {
        let doc: JsonValue = serde_json::from_reader(reader)?;
        Ok(Self::from_document(doc))
    }

    pub fn from_document(mut doc: JsonValue) -> Self {
        let constants = doc
            .get("constants")
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default();

        if let Some(layers) = doc.get_mut("layers") {
            substitute_constants(layers, &constants);
        }

        let mut raw_layers: Vec<RawLayer> = Vec::new();
        for entry in doc
            .get("layers")
            .and_then(JsonValue::as_array)
            .into_iter()
            .flatten()
        {
            match serde_json::from_value::<RawLayer>(entry.clone()) {
                Ok(raw) => raw_layers.push(raw),
                Err(err) => warn!("skipping unreadable style layer: {err}"),
            }
        }

        let mut styler = Styler::default();
        for (i, mut raw) in raw_layers.clone().into_iter().enumerate() {
            if let Some(reference) = raw.reference.take() {
                // refs may only point backwards in declaration order
                match raw_layers[..i].iter().find(|r| r.id == reference) {
                    Some(parent) => inherit(&mut raw, parent),
                    None => warn!("layer {} refs unknown layer {reference}", raw.id),
                }
            }

            let index = styler.layers.len();
            let layer = StyleLayer {
                index,
                kind: LayerType::from_name(raw.kind.as_deref()),
                source_layer: raw.source_layer.clone(),
                minzoom: raw.minzoom,
                maxzoom: raw.maxzoom,
                paint: Paint::from_document(&raw.paint),
                filter: raw
                    .filter
                    .as_ref()
                    .map(Filter::compile)
                    .unwrap_or(Filter::True),
                id: raw.id,
            };

            styler.by_id.insert(layer.id.clone(), index);
            if let Some(source_layer) = layer.source_layer.clone() {
                styler
                    .by_source_layer
                    .entry(source_layer)
                    .or_default()
                    .push(index);
            }
            styler.layers.push(layer);
        }

        styler
    }

    pub fn layers(&self) -> &[StyleLayer] {
        &self.layers
    }

    pub fn layer_by_id(&self, id: &str) -> Option<&StyleLayer> {
        self.by_id.get(id).map(|&i| &self.layers[i])
    }

    /// First declared layer over `source_layer` that accepts the feature,
    /// or nothing, meaning the feature is not drawn.
    pub fn style_for(&self, source_layer: &str, props: &Properties) -> Option<&StyleLayer> {
        self.by_source_layer
            .get(source_layer)?
            .iter()
            .map(|&i| &self.layers[i])
            .find(|layer| layer.kind != LayerType::Unsupported && layer.applies(props))
    }

    pub fn background_color(&self) -> Option<u8> {
        self.layers
            .iter()
            .find(|l| l.kind == LayerType::Background)
            .and_then(|l| l.paint.background_color)
    }
}

fn inherit(layer: &mut RawLayer, parent: &RawLayer) {
    if layer.kind.is_none() {
        layer.kind = parent.kind.clone();
    }
    if layer.source_layer.is_none() {
        layer.source_layer = parent.source_layer.clone();
    }
    if layer.minzoom.is_none() {
        layer.minzoom = parent.minzoom;
    }
    if layer.maxzoom.is_none() {
        layer.maxzoom = parent.maxzoom;
    }
    if layer.filter.is_none() {
        layer.filter = parent.filter.clone();
    }
}

/// Replace every string starting with `@` by the constant of that name,
/// recursively.
fn substitute_constants(value: &mut JsonValue, constants: &serde_json::Map<String, JsonValue>) {
    match value {
        JsonValue::String(s) if s.starts_with('@') => {
            if let Some(replacement) = constants.get(s.as_str()) {
                *value = replacement.clone();
            } else {
                warn!("unknown style constant {s}");
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                substitute_constants(item, constants);
            }
        }
        JsonValue::Object(map) => {
            for (_, item) in map.iter_mut() {
                substitute_constants(item, constants);
            }
        }
        _ => {}
    }
}

//! End-to-end checks over the public surface: raster output scenarios and
//! a full fetch-decode-render pass against an in-memory tile.

use prost::Message;
use serde_json::json;

use tilescope::braille::{BrailleBuffer, SGR_RESET};
use tilescope::canvas::Canvas;
use tilescope::config::Config;
use tilescope::error::Result;
use tilescope::labels::{LabelBuffer, LabelTag};
use tilescope::proto;
use tilescope::renderer::Renderer;
use tilescope::style::Styler;
use tilescope::tile::{Properties, PropValue};
use tilescope::tile_source::{TileFetcher, TileId, TileSource};
use tilescope::utils;

#[test]
fn single_pixel_frame() {
    let mut buffer = BrailleBuffer::new(4, 4, true, "\n\r");
    buffer.set_pixel(0, 0, 0);
    let frame = buffer.frame();

    assert!(frame.starts_with(SGR_RESET));
    assert!(frame.contains('\u{2801}'));
    assert!(frame.ends_with(&format!("{SGR_RESET}\n\r")));
}

#[test]
fn colored_horizontal_line() {
    let mut canvas = Canvas::new(8, 4, true, "\n\r");
    canvas.line((0, 0), (7, 0), 196, 1);
    let frame = canvas.frame();

    assert!(frame.contains("\x1b[49;38;5;196m"));
    // every cell in the row carries the top-row pair of dots
    let glyphs: Vec<char> = frame
        .chars()
        .filter(|c| ('\u{2800}'..='\u{28ff}').contains(c))
        .collect();
    assert_eq!(glyphs.len(), 4);
    for glyph in glyphs {
        let mask = glyph as u32 - 0x2800;
        assert_eq!(mask & 0x09, 0x09, "both row-0 dots set in {glyph:?}");
    }
}

#[test]
fn triangle_fill_area() {
    let mut canvas = Canvas::new(16, 16, true, "\n\r");
    assert!(canvas.polygon(&[vec![(0, 0), (8, 0), (0, 8)]], 34));
    let frame = canvas.frame();

    let dots: u32 = frame
        .chars()
        .filter(|c| ('\u{2800}'..='\u{28ff}').contains(c))
        .map(|c| (c as u32 - 0x2800).count_ones())
        .sum();
    assert!(dots >= 28, "triangle fill too sparse: {dots} dots");
}

#[test]
fn label_collision_is_greedy() {
    let mut labels = LabelBuffer::new();
    let tag = LabelTag {
        source_layer: "place_label".into(),
        name: "Paris".into(),
    };

    assert!(labels.write_if_possible("Paris", 10, 10, tag.clone(), 5));
    assert!(!labels.write_if_possible("Paris", 12, 10, tag.clone(), 5));
    assert!(labels.write_if_possible("Paris", 80, 80, tag, 5));
}

#[test]
fn filter_compilation() {
    let styler = Styler::from_document(json!({
        "layers": [
            {"id": "motorway", "type": "line", "source-layer": "road",
             "filter": ["==", "class", "motorway"],
             "paint": {"line-color": "#fc8"}},
            {"id": "minor", "type": "line", "source-layer": "road",
             "filter": ["in", "class", "a", "b"],
             "paint": {"line-color": "#ccc"}}
        ]
    }));

    let mut props = Properties::new();
    props.insert("class", PropValue::Str("motorway".into()));
    assert_eq!(styler.style_for("road", &props).unwrap().id, "motorway");

    let mut props = Properties::new();
    props.insert("class", PropValue::Str("primary".into()));
    assert!(styler.style_for("road", &props).is_none());

    let mut props = Properties::new();
    props.insert("class", PropValue::Str("b".into()));
    assert_eq!(styler.style_for("road", &props).unwrap().id, "minor");
}

#[test]
fn tile_coordinate_round_trip() {
    let (x, y) = utils::ll2tile(13.42012, 52.51298, 10);
    assert_eq!((x.floor(), y.floor()), (550.0, 335.0));

    let back = utils::tile2ll(x, y, 10);
    assert!((back.lon - 13.42012).abs() < 1e-9);
    assert!((back.lat - 52.51298).abs() < 1e-9);
}

// ---- full pipeline over an in-memory tile ----

fn command(op: u32, count: u32) -> u32 {
    op | (count << 3)
}

fn zig(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

fn value(s: &str) -> proto::Value {
    proto::Value {
        string_value: Some(s.as_bytes().to_vec()),
        ..Default::default()
    }
}

fn fixture_tile() -> Vec<u8> {
    let water = proto::Layer {
        version: 2,
        name: "water".into(),
        keys: vec![],
        values: vec![],
        extent_field: Some(4096),
        features: vec![proto::Feature {
            id: Some(1),
            tags: vec![],
            kind: Some(proto::GeomType::Polygon as i32),
            geometry: vec![
                command(1, 1),
                zig(50),
                zig(50),
                command(2, 3),
                zig(400),
                zig(0),
                zig(0),
                zig(400),
                zig(-400),
                zig(0),
                command(7, 1),
            ],
        }],
    };

    let place = proto::Layer {
        version: 2,
        name: "place_label".into(),
        keys: vec![b"name".to_vec()],
        values: vec![value("Atlantis")],
        extent_field: Some(4096),
        features: vec![proto::Feature {
            id: Some(2),
            tags: vec![0, 0],
            kind: Some(proto::GeomType::Point as i32),
            geometry: vec![command(1, 1), zig(250), zig(250)],
        }],
    };

    proto::Tile {
        layers: vec![water, place],
    }
    .encode_to_vec()
}

struct FixtureFetcher;

impl TileFetcher for FixtureFetcher {
    fn fetch(&mut self, _tile: TileId) -> Result<Vec<u8>> {
        Ok(fixture_tile())
    }
}

#[test]
fn full_frame_from_bytes_to_braille() {
    let config = Config::default();
    let styler = Styler::from_document(json!({
        "constants": {"@water": "#0af"},
        "layers": [
            {"id": "background", "type": "background",
             "paint": {"background-color": "#111111"}},
            {"id": "water", "type": "fill", "source-layer": "water",
             "paint": {"fill-color": "@water"}},
            {"id": "place", "type": "symbol", "source-layer": "place_label",
             "paint": {"text-color": "#ffffff"}}
        ]
    }));

    let mut source = TileSource::with_fetcher(Box::new(FixtureFetcher), 16, None);
    let mut renderer = Renderer::new(80, 40, &config);

    // aim the viewport at the fixture geometry on tile 0/0/0
    let center = utils::tile2ll(0.05, 0.05, 0);
    let frame = renderer
        .draw(&mut source, &styler, &config, center, 0.0)
        .unwrap();

    // the water polygon got filled
    let dots: u32 = frame
        .chars()
        .filter(|c| ('\u{2800}'..='\u{28ff}').contains(c))
        .map(|c| (c as u32 - 0x2800).count_ones())
        .sum();
    assert!(dots > 50, "water fill missing, {dots} dots");

    // the label survived collision placement
    for ch in "Atlantis".chars() {
        assert!(frame.contains(ch), "label glyph {ch:?} missing");
    }

    // drawing the same view again yields the same frame
    let again = renderer
        .draw(&mut source, &styler, &config, center, 0.0)
        .unwrap();
    assert_eq!(frame, again);
}

//! Vector tile slippy map for the terminal: tiles are fetched, styled and
//! rasterized into colorized braille; the binary adds the interactive
//! event loop on top.

pub mod braille;
pub mod canvas;
pub mod config;
pub mod error;
pub mod labels;
pub mod proto;
pub mod renderer;
pub mod style;
pub mod tile;
pub mod tile_source;
pub mod utils;

//! Decoded-tile cache in front of a byte fetcher. The fetcher is picked
//! from the source string: an http(s) prefix means a tile server, an
//! `.mbtiles` suffix a local archive. Eviction is FIFO over an explicit
//! insertion-order queue.

use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::rc::Rc;

use ahash::AHashMap;
use log::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::style::Styler;
use crate::tile::Tile;

#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct TileId {
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

impl TileId {
    pub fn new(z: u32, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.z, self.x, self.y)
    }
}

/// The byte contract: hand back the raw (possibly gzipped) blob for a tile
/// or a fetch error. Implementations do no caching of their own.
pub trait TileFetcher {
    fn fetch(&mut self, tile: TileId) -> Result<Vec<u8>>;
}

pub struct HttpFetcher {
    agent: ureq::Agent,
    base: String,
}

impl HttpFetcher {
    fn new(base: &str) -> Self {
        Self {
            agent: ureq::Agent::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }
}

impl TileFetcher for HttpFetcher {
    fn fetch(&mut self, tile: TileId) -> Result<Vec<u8>> {
        let url = format!("{}/{}/{}/{}.pbf", self.base, tile.z, tile.x, tile.y);
        debug!("fetching {url}");
        let response = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| Error::TileFetch(format!("{url}: {e}")))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| Error::TileFetch(format!("{url}: {e}")))?;
        Ok(bytes)
    }
}

#[cfg(feature = "mbtiles")]
pub struct MbTilesFetcher {
    connection: rusqlite::Connection,
}

#[cfg(feature = "mbtiles")]
impl MbTilesFetcher {
    fn open(path: &str) -> Result<Self> {
        let connection = rusqlite::Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        )
        .map_err(|e| Error::SourceConfig(format!("{path}: {e}")))?;

        Ok(Self { connection })
    }
}

#[cfg(feature = "mbtiles")]
impl TileFetcher for MbTilesFetcher {
    fn fetch(&mut self, tile: TileId) -> Result<Vec<u8>> {
        // mbtiles rows are TMS, origin bottom left
        let row = (1u32 << tile.z) - 1 - tile.y;

        let mut query = self
            .connection
            .prepare_cached(
                "SELECT tile_data FROM tiles \
                 WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
            )
            .map_err(|e| Error::TileFetch(e.to_string()))?;

        let bytes: Option<Vec<u8>> = query
            .query_row((tile.z, tile.x, row), |r| r.get(0))
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(Error::TileFetch(other.to_string())),
            })?;

        bytes.ok_or_else(|| Error::TileFetch(format!("tile {tile} not in archive")))
    }
}

pub struct TileSource {
    fetcher: Box<dyn TileFetcher>,
    cache: AHashMap<TileId, Rc<Tile>>,
    order: VecDeque<TileId>,
    cache_size: usize,
    persist_dir: Option<PathBuf>,
}

impl TileSource {
    pub fn new(config: &Config) -> Result<Self> {
        let fetcher: Box<dyn TileFetcher> = if config.source.starts_with("http") {
            Box::new(HttpFetcher::new(&config.source))
        } else if config.source.ends_with(".mbtiles") {
            #[cfg(feature = "mbtiles")]
            {
                Box::new(MbTilesFetcher::open(&config.source)?)
            }
            #[cfg(not(feature = "mbtiles"))]
            {
                return Err(Error::SourceConfig(format!(
                    "{} (this build has no mbtiles support; rebuild with --features mbtiles)",
                    config.source
                )));
            }
        } else {
            return Err(Error::SourceConfig(config.source.clone()));
        };

        let persist_dir = config
            .persist_downloaded_tiles
            .then(|| dirs::cache_dir().map(|dir| dir.join("tilescope")))
            .flatten();

        Ok(Self::with_fetcher(fetcher, config.cache_size, persist_dir))
    }

    /// Seam for plugging in any byte fetcher.
    pub fn with_fetcher(
        fetcher: Box<dyn TileFetcher>,
        cache_size: usize,
        persist_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            cache: AHashMap::new(),
            order: VecDeque::new(),
            cache_size,
            persist_dir,
        }
    }

    /// Cached tile or fetch-and-decode. Repeated requests for the same
    /// coordinate share one decoded tile until it is evicted.
    pub fn get_tile(&mut self, tile: TileId, styler: &Styler, config: &Config) -> Result<Rc<Tile>> {
        if let Some(cached) = self.cache.get(&tile) {
            return Ok(cached.clone());
        }

        while self.cache.len() > self.cache_size {
            match self.order.pop_front() {
                Some(oldest) => {
                    debug!("evicting tile {oldest}");
                    self.cache.remove(&oldest);
                }
                None => break,
            }
        }

        let bytes = self.tile_bytes(tile)?;
        let decoded = Rc::new(Tile::decode(&bytes, styler, config)?);
        self.order.push_back(tile);
        self.cache.insert(tile, decoded.clone());
        Ok(decoded)
    }

    fn tile_bytes(&mut self, tile: TileId) -> Result<Vec<u8>> {
        // disk reads never raise; a bad cache file just means refetching
        if let Some(path) = self.persist_path(tile) {
            if let Ok(bytes) = fs::read(&path) {
                debug!("tile {tile} from disk cache");
                return Ok(bytes);
            }
        }

        let bytes = self.fetcher.fetch(tile)?;
        self.persist(tile, &bytes);
        Ok(bytes)
    }

    fn persist(&mut self, tile: TileId, bytes: &[u8]) {
        let Some(path) = self.persist_path(tile) else {
            return;
        };

        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, bytes)
        };

        if let Err(err) = write() {
            warn!("disabling tile persistence: {err}");
            self.persist_dir = None;
        }
    }

    fn persist_path(&self, tile: TileId) -> Option<PathBuf> {
        self.persist_dir
            .as_ref()
            .map(|dir| dir.join(tile.z.to_string()).join(format!("{}-{}.pbf", tile.x, tile.y)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::tests::{test_styler, test_tile_bytes};
    use std::cell::RefCell;

    struct CountingFetcher {
        calls: Rc<RefCell<Vec<TileId>>>,
        fail: bool,
    }

    impl TileFetcher for CountingFetcher {
        fn fetch(&mut self, tile: TileId) -> Result<Vec<u8>> {
            self.calls.borrow_mut().push(tile);
            if self.fail {
                Err(Error::TileFetch("unreachable host".into()))
            } else {
                Ok(test_tile_bytes())
            }
        }
    }

    fn source(cache_size: usize, fail: bool) -> (TileSource, Rc<RefCell<Vec<TileId>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let fetcher = CountingFetcher {
            calls: calls.clone(),
            fail,
        };
        (
            TileSource::with_fetcher(Box::new(fetcher), cache_size, None),
            calls,
        )
    }

    #[test]
    fn repeated_requests_share_one_fetch() {
        let config = Config::default();
        let styler = test_styler();
        let (mut source, calls) = source(4, false);

        let tile = TileId::new(10, 550, 335);
        let a = source.get_tile(tile, &styler, &config).unwrap();
        let b = source.get_tile(tile, &styler, &config).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn eviction_is_fifo_by_insertion_order() {
        let config = Config::default();
        let styler = test_styler();
        let (mut source, calls) = source(2, false);

        for x in 0..4 {
            source
                .get_tile(TileId::new(5, x, 0), &styler, &config)
                .unwrap();
        }
        // the first tile was evicted, refetching it costs a new call
        let before = calls.borrow().len();
        source
            .get_tile(TileId::new(5, 0, 0), &styler, &config)
            .unwrap();
        assert_eq!(calls.borrow().len(), before + 1);
        // the most recent tile is still cached
        source
            .get_tile(TileId::new(5, 3, 0), &styler, &config)
            .unwrap();
        assert_eq!(calls.borrow().len(), before + 1);
    }

    #[test]
    fn fetch_errors_bubble_to_the_caller() {
        let config = Config::default();
        let styler = test_styler();
        let (mut source, _) = source(4, true);

        assert!(matches!(
            source.get_tile(TileId::new(1, 0, 0), &styler, &config),
            Err(Error::TileFetch(_))
        ));
    }

    #[test]
    fn unknown_scheme_fails_fast() {
        let mut config = Config::default();
        config.source = "gopher://tiles.example".into();
        assert!(matches!(TileSource::new(&config), Err(Error::SourceConfig(_))));
    }

    #[test]
    fn http_scheme_is_accepted() {
        let mut config = Config::default();
        config.source = "https://tiles.example/v3".into();
        config.persist_downloaded_tiles = false;
        assert!(TileSource::new(&config).is_ok());
    }

    #[test]
    fn tile_id_formats_as_cache_key() {
        assert_eq!(TileId::new(10, 550, 335).to_string(), "10-550-335");
    }
}

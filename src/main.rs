use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    cursor,
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers,
        MouseButton, MouseEventKind,
    },
    execute, queue,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::warn;

use tilescope::config::Config;
use tilescope::renderer::Renderer;
use tilescope::style::Styler;
use tilescope::tile_source::TileSource;
use tilescope::utils::{self, LonLat};

/// Browse vector tile maps without leaving the terminal
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON config file; command line flags override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Tile server URL or path to an .mbtiles archive
    #[arg(long)]
    source: Option<String>,
    /// Mapbox GL style document
    #[arg(long)]
    style: Option<PathBuf>,
    #[arg(long)]
    lat: Option<f64>,
    #[arg(long)]
    lon: Option<f64>,
    #[arg(long)]
    zoom: Option<f64>,
    /// Render a single frame to stdout and exit
    #[arg(long)]
    headless: bool,
    /// ASCII block glyphs instead of braille
    #[arg(long)]
    ascii: bool,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("opening config {}", path.display()))?;
            serde_json::from_reader(file)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => Config::default(),
    };

    if let Some(source) = &args.source {
        config.source = source.clone();
    }
    if let Some(style) = &args.style {
        config.style_file = style.clone();
    }
    if let Some(lat) = args.lat {
        config.initial_lat = lat;
    }
    if let Some(lon) = args.lon {
        config.initial_lon = lon;
    }
    if let Some(zoom) = args.zoom {
        config.initial_zoom = zoom;
    }
    if args.headless {
        config.headless = true;
    }
    if args.ascii {
        config.use_braille = false;
    }

    Ok(config)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = load_config(&args)?;

    let style_file = File::open(&config.style_file)
        .with_context(|| format!("opening style {}", config.style_file.display()))?;
    let styler = Styler::load(style_file).context("parsing style document")?;
    let source = TileSource::new(&config)?;

    let mut viewer = Viewer::new(config, styler, source);

    if viewer.config.headless {
        let (cols, rows) = terminal::size().unwrap_or((80, 24));
        viewer.resize(cols, rows);
        let frame = viewer.renderer.draw(
            &mut viewer.source,
            &viewer.styler,
            &viewer.config,
            viewer.center,
            viewer.zoom,
        )?;
        io::stdout().write_all(frame.as_bytes())?;
        return Ok(());
    }

    let result = run_interactive(&mut viewer);
    restore_terminal();
    result
}

fn run_interactive(viewer: &mut Viewer) -> Result<()> {
    let mut out = io::stdout();
    terminal::enable_raw_mode()?;
    execute!(out, EnterAlternateScreen, EnableMouseCapture, cursor::Hide)?;

    let (cols, rows) = terminal::size()?;
    viewer.resize(cols, rows);
    viewer.render(&mut out)?;

    loop {
        match event::read()? {
            Event::Key(key) if key.kind != KeyEventKind::Release => {
                let step_x = viewer.renderer.width() as f64 / 8.0;
                let step_y = viewer.renderer.height() as f64 / 8.0;
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => break,
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
                    KeyCode::Left => viewer.pan(-step_x, 0.0),
                    KeyCode::Right => viewer.pan(step_x, 0.0),
                    KeyCode::Up => viewer.pan(0.0, -step_y),
                    KeyCode::Down => viewer.pan(0.0, step_y),
                    KeyCode::Char('a') | KeyCode::Char('+') | KeyCode::Char('=') => {
                        viewer.zoom_by(viewer.config.zoom_step, None)
                    }
                    KeyCode::Char('z') | KeyCode::Char('-') => {
                        viewer.zoom_by(-viewer.config.zoom_step, None)
                    }
                    KeyCode::Char('c') => viewer.toggle_braille(),
                    _ => continue,
                }
                viewer.render(&mut out)?;
            }
            Event::Mouse(mouse) => {
                let handled = match mouse.kind {
                    MouseEventKind::ScrollUp => {
                        viewer.zoom_by(viewer.config.zoom_step, Some((mouse.column, mouse.row)));
                        true
                    }
                    MouseEventKind::ScrollDown => {
                        viewer.zoom_by(-viewer.config.zoom_step, Some((mouse.column, mouse.row)));
                        true
                    }
                    MouseEventKind::Down(MouseButton::Left) => {
                        viewer.drag_from = Some((mouse.column, mouse.row));
                        false
                    }
                    MouseEventKind::Drag(MouseButton::Left) => {
                        viewer.drag_to(mouse.column, mouse.row)
                    }
                    MouseEventKind::Up(MouseButton::Left) => {
                        viewer.drag_from = None;
                        false
                    }
                    MouseEventKind::Down(MouseButton::Right) => {
                        viewer.inspect(mouse.column, mouse.row);
                        true
                    }
                    _ => false,
                };
                if handled {
                    viewer.render(&mut out)?;
                }
            }
            Event::Resize(cols, rows) => {
                viewer.resize(cols, rows);
                viewer.render(&mut out)?;
            }
            _ => {}
        }
    }

    Ok(())
}

fn restore_terminal() {
    let mut out = io::stdout();
    if let Err(err) = execute!(out, LeaveAlternateScreen, DisableMouseCapture, cursor::Show) {
        warn!("failed to restore terminal: {err}");
    }
    if let Err(err) = terminal::disable_raw_mode() {
        warn!("failed to restore terminal: {err}");
    }
}

struct Viewer {
    config: Config,
    styler: Styler,
    source: TileSource,
    renderer: Renderer,
    center: LonLat,
    zoom: f64,
    rows: u16,
    use_braille: bool,
    notice: Option<String>,
    drag_from: Option<(u16, u16)>,
}

impl Viewer {
    fn new(config: Config, styler: Styler, source: TileSource) -> Self {
        let center = LonLat::new(config.initial_lon, config.initial_lat);
        let zoom = config.initial_zoom.clamp(0.0, config.max_zoom);
        let renderer = Renderer::new(2, 4, &config);
        let use_braille = config.use_braille;

        Self {
            config,
            styler,
            source,
            renderer,
            center,
            zoom,
            rows: 1,
            use_braille,
            notice: None,
            drag_from: None,
        }
    }

    /// One terminal cell is 2x4 canvas pixels; the last row is the status
    /// line.
    fn resize(&mut self, cols: u16, rows: u16) {
        self.rows = rows;
        let width = (cols.max(1) as usize) * 2;
        let height = (rows.saturating_sub(1).max(1) as usize) * 4;
        self.renderer = Renderer::new(width, height, &self.config);
        self.renderer.set_braille(self.use_braille);
    }

    fn render(&mut self, out: &mut impl Write) -> Result<()> {
        match self.renderer.draw(
            &mut self.source,
            &self.styler,
            &self.config,
            self.center,
            self.zoom,
        ) {
            Ok(frame) => {
                queue!(out, cursor::MoveTo(0, 0))?;
                out.write_all(frame.as_bytes())?;
            }
            Err(err) => self.notice = Some(err.to_string()),
        }

        let status = format!(
            " {:.5} {:.5} z{:.2}  {}",
            self.center.lat,
            self.center.lon,
            self.zoom,
            self.notice.take().unwrap_or_default()
        );
        queue!(
            out,
            cursor::MoveTo(0, self.rows.saturating_sub(1)),
            terminal::Clear(terminal::ClearType::CurrentLine)
        )?;
        out.write_all(status.as_bytes())?;
        out.flush()?;
        Ok(())
    }

    /// Pan by canvas pixels.
    fn pan(&mut self, dx: f64, dy: f64) {
        let z = utils::base_zoom(self.zoom, self.config.max_zoom);
        let size = utils::tilesize_at_zoom(self.zoom, self.config.project_size);
        let (mut cx, mut cy) = utils::ll2tile(self.center.lon, self.center.lat, z);
        cx += dx / size;
        cy += dy / size;
        self.center = utils::tile2ll(cx, cy, z).normalized();
    }

    /// Zoom, keeping the focus point (mouse cell) fixed when given.
    fn zoom_by(&mut self, delta: f64, focus: Option<(u16, u16)>) {
        let target = (self.zoom + delta).clamp(0.0, self.config.max_zoom);

        if let Some((col, row)) = focus {
            let dx = col as f64 * 2.0 - self.renderer.width() as f64 / 2.0;
            let dy = row as f64 * 4.0 - self.renderer.height() as f64 / 2.0;
            self.pan(dx, dy);
            self.zoom = target;
            self.pan(-dx, -dy);
        } else {
            self.zoom = target;
        }
    }

    fn drag_to(&mut self, col: u16, row: u16) -> bool {
        let Some((from_col, from_row)) = self.drag_from else {
            return false;
        };
        let dx = (from_col as f64 - col as f64) * 2.0;
        let dy = (from_row as f64 - row as f64) * 4.0;
        self.drag_from = Some((col, row));
        if dx == 0.0 && dy == 0.0 {
            return false;
        }
        self.pan(dx, dy);
        true
    }

    /// What is under the cursor, from the label index of the last frame.
    fn inspect(&mut self, col: u16, row: u16) {
        let found: Vec<String> = self
            .renderer
            .labels()
            .features_at(col as i32, row as i32)
            .map(|label| format!("{} ({})", label.tag.name, label.tag.source_layer))
            .collect();

        self.notice = if found.is_empty() {
            Some("nothing here".to_string())
        } else {
            Some(found.join(", "))
        };
    }

    fn toggle_braille(&mut self) {
        self.use_braille = !self.use_braille;
        self.renderer.set_braille(self.use_braille);
    }
}

use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};

use resvg::{tiny_skia, usvg};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grid::LifeGrid;

const CELL: f32 = 10.0;
const LEFT_PADDING: f32 = 60.0;
const TOP_PADDING: f32 = 50.0;
const RIGHT_PADDING: f32 = 20.0;
const BOTTOM_PADDING: f32 = 20.0;
const TICK_LEN: f32 = 4.0;
const WEEK_TICKS: [usize; 11] = [1, 5, 10, 15, 20, 25, 30, 35, 40, 45, 50];
const AGE_TICK_STEP: usize = 5;
const RASTER_SCALE: f32 = 2.0;

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("chart SVG did not parse: {0}")]
    Parse(#[from] usvg::Error),
    #[error("cannot allocate a {width}x{height} canvas")]
    Canvas { width: u32, height: u32 },
    #[error("PNG encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Dark,
    #[default]
    Light,
}

pub struct ThemeColors {
    pub bg: &'static str,
    pub text: &'static str,
    pub lived: &'static str,
    pub left: &'static str,
    pub border: &'static str,
}

impl Theme {
    pub fn colors(self) -> ThemeColors {
        match self {
            Theme::Dark => ThemeColors {
                bg: "#161b22",
                text: "#c9d1d9",
                lived: "#f85149",
                left: "#21262d",
                border: "#616e7f",
            },
            Theme::Light => ThemeColors {
                bg: "#ffffff",
                text: "#24292f",
                lived: "#f08080",
                left: "#f5f5f5",
                border: "#c0c0c0",
            },
        }
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn build_cells(grid: &LifeGrid) -> String {
    let mut out = String::new();

    for (row, weeks) in grid.iter_rows().enumerate() {
        let y = TOP_PADDING + row as f32 * CELL;
        for (col, lived) in weeks.iter().enumerate() {
            let x = LEFT_PADDING + col as f32 * CELL;
            let class = if *lived { "lived" } else { "left" };
            let _ = writeln!(
                out,
                r#"<rect x="{x}" y="{y}" width="{CELL}" height="{CELL}" class="{class}"/>"#
            );
        }
    }

    out
}

// Week ticks label the 1-based week at the centre of its column; age ticks
// sit on the row boundary, like an axis that starts at 0.
fn build_axes(grid: &LifeGrid) -> String {
    let mut out = String::new();
    let axis_y = TOP_PADDING - TICK_LEN;

    for week in WEEK_TICKS.iter().copied().filter(|w| *w <= grid.columns()) {
        let x = LEFT_PADDING + (week as f32 - 0.5) * CELL;
        let _ = writeln!(
            out,
            r#"<line x1="{x}" y1="{axis_y}" x2="{x}" y2="{TOP_PADDING}" class="tick"/>
<text x="{x}" y="{}" text-anchor="middle">{week}</text>"#,
            axis_y - 3.0
        );
    }

    let axis_x = LEFT_PADDING - TICK_LEN;
    for age in (0..=grid.rows()).step_by(AGE_TICK_STEP) {
        let y = TOP_PADDING + age as f32 * CELL;
        let _ = writeln!(
            out,
            r#"<line x1="{axis_x}" y1="{y}" x2="{LEFT_PADDING}" y2="{y}" class="tick"/>
<text x="{}" y="{}" text-anchor="end">{age}</text>"#,
            axis_x - 3.0,
            y + 3.5
        );
    }

    out
}

/// Renders the grid as a standalone SVG document.
pub fn generate_life_chart(grid: &LifeGrid, title: &str, theme: Theme) -> String {
    let colors = theme.colors();

    let grid_w = grid.columns() as f32 * CELL;
    let grid_h = grid.rows() as f32 * CELL;
    let w = LEFT_PADDING + grid_w + RIGHT_PADDING;
    let h = TOP_PADDING + grid_h + BOTTOM_PADDING;

    let weeks_label_x = LEFT_PADDING + grid_w / 2.0;
    let age_label_y = TOP_PADDING + grid_h / 2.0;

    format!(
        r#"<?xml version='1.0' encoding='UTF-8'?>
<svg xmlns="http://www.w3.org/2000/svg"
     width="{w}px" height="{h}px"
     font-family="Helvetica,Arial,sans-serif"
     font-size="9px">

<style>
.lived {{ fill: {lived}; stroke: {border}; stroke-width: 0.5; }}
.left  {{ fill: {left}; stroke: {border}; stroke-width: 0.5; }}
.tick  {{ stroke: {text}; stroke-width: 0.8; }}
text   {{ fill: {text}; }}
</style>

<rect width="{w}px" height="{h}px" fill="{bg}"/>

<text x="{weeks_label_x}" y="14" font-size="12px" text-anchor="middle">{title}</text>
<text x="{weeks_label_x}" y="28" font-size="10px" text-anchor="middle">Weeks</text>
<text x="14" y="{age_label_y}" font-size="10px" text-anchor="middle" transform="rotate(-90 14 {age_label_y})">Age</text>

<!-- AXES -->
{axes}
<!-- GRID -->
{cells}
</svg>
"#,
        w = w,
        h = h,
        bg = colors.bg,
        text = colors.text,
        lived = colors.lived,
        left = colors.left,
        border = colors.border,
        title = escape_xml(title),
        axes = build_axes(grid),
        cells = build_cells(grid),
    )
}

// System fonts are scanned once per process.
fn font_database() -> Arc<usvg::fontdb::Database> {
    static FONTS: OnceLock<Arc<usvg::fontdb::Database>> = OnceLock::new();
    FONTS
        .get_or_init(|| {
            let mut db = usvg::fontdb::Database::new();
            db.load_system_fonts();
            Arc::new(db)
        })
        .clone()
}

/// Rasterizes an SVG document to PNG bytes at twice its nominal size.
pub fn rasterize(svg: &str) -> Result<Vec<u8>, ChartError> {
    let options = usvg::Options {
        fontdb: font_database(),
        ..Default::default()
    };
    let tree = usvg::Tree::from_str(svg, &options)?;

    let size = tree.size().to_int_size();
    let width = (size.width() as f32 * RASTER_SCALE).ceil() as u32;
    let height = (size.height() as f32 * RASTER_SCALE).ceil() as u32;
    let mut pixmap =
        tiny_skia::Pixmap::new(width, height).ok_or(ChartError::Canvas { width, height })?;

    resvg::render(
        &tree,
        tiny_skia::Transform::from_scale(RASTER_SCALE, RASTER_SCALE),
        &mut pixmap.as_mut(),
    );

    pixmap
        .encode_png()
        .map_err(|e| ChartError::Encode(e.to_string()))
}

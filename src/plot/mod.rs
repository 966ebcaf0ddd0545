//! Scatter plot of a 2D embedding, one color per cluster, drawn with
//! plotters and saved as PNG.
//!
//! Text (title, axis ticks, legend) needs a TrueType font. The first render
//! registers `PlotOptions::font_path` or the first common system sans-serif
//! font found; without one the points are still drawn, unlabelled.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::{register_font, FontStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ClusterError, Result};

/// Ten-color categorical palette, cycled when there are more clusters.
pub const TAB10: [RGBColor; 10] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
    RGBColor(188, 189, 34),
    RGBColor(23, 190, 207),
];

pub const POINT_ALPHA: f64 = 0.85;

/// Smallest accepted canvas side, in pixels.
pub const MIN_SIDE: u32 = 200;

const FONT_FAMILY: &str = "sans-serif";

const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotOptions {
    pub width: u32,
    pub height: u32,
    pub point_radius: u32,
    /// TrueType font for labels; system fonts are tried when unset.
    pub font_path: Option<PathBuf>,
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self {
            width: 1350,
            height: 1050,
            point_radius: 5,
            font_path: None,
        }
    }
}

impl PlotOptions {
    pub fn validate(&self) -> Result<()> {
        if self.width < MIN_SIDE || self.height < MIN_SIDE {
            return Err(ClusterError::InvalidParameter(format!(
                "plot size {}x{} is below the {MIN_SIDE}x{MIN_SIDE} minimum",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

pub fn palette_color(rank: usize) -> RGBColor {
    TAB10[rank % TAB10.len()]
}

pub fn legend_label(label: usize) -> String {
    format!("Cluster {label}")
}

pub fn title(k: usize) -> String {
    format!("t-SNE plot (k={k})")
}

/// Register a sans-serif font with plotters once per process. Returns
/// whether text can be drawn.
fn fonts_ready(opts: &PlotOptions) -> bool {
    static REGISTERED: OnceLock<Option<PathBuf>> = OnceLock::new();
    let registered = REGISTERED.get_or_init(|| {
        let candidates = opts
            .font_path
            .iter()
            .cloned()
            .chain(SYSTEM_FONTS.iter().map(PathBuf::from));
        for path in candidates {
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            // plotters keeps registered fonts for the life of the process.
            let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
            if register_font(FONT_FAMILY, FontStyle::Normal, bytes).is_ok() {
                debug!(font = %path.display(), "registered plot font");
                return Some(path);
            }
        }
        warn!("no usable TrueType font found; plots are drawn without text");
        None
    });
    registered.is_some()
}

/// Axis range covering `values` with a 5% margin.
fn padded_range(values: impl Iterator<Item = f64>) -> Range<f64> {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !min.is_finite() || !max.is_finite() {
        return -1.0..1.0;
    }
    let span = max - min;
    if span <= f64::EPSILON {
        return (min - 1.0)..(max + 1.0);
    }
    let pad = span * 0.05;
    (min - pad)..(max + pad)
}

/// Distinct labels in ascending order; colors follow this rank.
fn ranked_labels(labels: &[usize]) -> Vec<usize> {
    let mut unique = labels.to_vec();
    unique.sort_unstable();
    unique.dedup();
    unique
}

fn draw_scatter<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    points: &[[f64; 2]],
    labels: &[usize],
    k: usize,
    opts: &PlotOptions,
    with_text: bool,
) -> std::result::Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
    root.fill(&WHITE)?;

    let x_range = padded_range(points.iter().map(|p| p[0]));
    let y_range = padded_range(points.iter().map(|p| p[1]));

    let mut builder = ChartBuilder::on(root);
    builder.margin(20);
    if with_text {
        builder
            .caption(title(k), (FONT_FAMILY, 32))
            .x_label_area_size(40)
            .y_label_area_size(60);
    }
    let mut chart = builder.build_cartesian_2d(x_range, y_range)?;

    if with_text {
        chart.configure_mesh().disable_mesh().draw()?;
    }

    let radius = opts.point_radius;
    for (rank, &label) in ranked_labels(labels).iter().enumerate() {
        let color = palette_color(rank);
        let style = color.mix(POINT_ALPHA).filled();
        let series = points
            .iter()
            .zip(labels)
            .filter(|(_, l)| **l == label)
            .map(move |(p, _)| Circle::new((p[0], p[1]), radius, style));
        chart
            .draw_series(series)?
            .label(legend_label(label))
            .legend(move |(x, y)| Circle::new((x + 8, y), radius, style));
    }

    if with_text && !labels.is_empty() {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(&WHITE.mix(0.9))
            .border_style(&RGBColor(204, 204, 204))
            .label_font((FONT_FAMILY, 18))
            .draw()?;
    }

    root.present()?;
    Ok(())
}

/// Render into an RGB buffer of `width * height * 3` bytes.
pub fn render_scatter(
    points: &[[f64; 2]],
    labels: &[usize],
    k: usize,
    opts: &PlotOptions,
) -> Result<Vec<u8>> {
    opts.validate()?;
    let with_text = fonts_ready(opts);
    let mut buffer = vec![0u8; opts.width as usize * opts.height as usize * 3];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (opts.width, opts.height))
            .into_drawing_area();
        draw_scatter(&root, points, labels, k, opts, with_text)
            .map_err(|e| ClusterError::Plot(e.to_string()))?;
    }
    Ok(buffer)
}

/// Render and write a PNG to `path`.
pub fn save_scatter(
    points: &[[f64; 2]],
    labels: &[usize],
    k: usize,
    opts: &PlotOptions,
    path: &Path,
) -> Result<()> {
    opts.validate()?;
    let with_text = fonts_ready(opts);
    let root = BitMapBackend::new(path, (opts.width, opts.height)).into_drawing_area();
    draw_scatter(&root, points, labels, k, opts, with_text)
        .map_err(|e| ClusterError::Plot(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> PlotOptions {
        PlotOptions {
            width: 400,
            height: 300,
            point_radius: 4,
            font_path: None,
        }
    }

    fn near(a: RGBColor, b: (u8, u8, u8)) -> bool {
        let close = |x: u8, y: u8| (x as i16 - y as i16).abs() <= 3;
        close(a.0, b.0) && close(a.1, b.1) && close(a.2, b.2)
    }

    #[test]
    fn palette_cycles_after_ten() {
        assert_eq!(palette_color(0), palette_color(10));
        assert_ne!(palette_color(0), palette_color(1));
    }

    #[test]
    fn labels_and_title() {
        assert_eq!(legend_label(3), "Cluster 3");
        assert_eq!(title(4), "t-SNE plot (k=4)");
    }

    #[test]
    fn padded_range_handles_degenerate_input() {
        assert_eq!(padded_range([2.0, 2.0].into_iter()), 1.0..3.0);
        assert_eq!(padded_range(std::iter::empty()), -1.0..1.0);
        let r = padded_range([0.0, 10.0].into_iter());
        assert!(r.start < 0.0 && r.end > 10.0);
    }

    #[test]
    fn ranked_labels_sorted_unique() {
        assert_eq!(ranked_labels(&[3, 1, 3, 0]), vec![0, 1, 3]);
    }

    #[test]
    fn renders_cluster_colors_over_white() {
        let points = vec![[0.0, 0.0], [1.0, 1.0], [0.5, -2.0]];
        let labels = vec![0, 1, 1];
        let opts = small();
        let buf = render_scatter(&points, &labels, 2, &opts).unwrap();
        assert_eq!(buf.len(), 400 * 300 * 3);

        let pixels: Vec<(u8, u8, u8)> = buf.chunks(3).map(|c| (c[0], c[1], c[2])).collect();
        assert!(pixels.iter().any(|&p| p == (255, 255, 255)));
        for rank in 0..2 {
            let c = palette_color(rank);
            let mix = |ch: u8| (ch as f64 * POINT_ALPHA + 255.0 * (1.0 - POINT_ALPHA)).round() as u8;
            let expected = RGBColor(mix(c.0), mix(c.1), mix(c.2));
            assert!(
                pixels.iter().any(|&p| near(expected, p)),
                "no pixel close to cluster {rank} color"
            );
        }
    }

    #[test]
    fn degenerate_points_render() {
        let points = vec![[1.0, 1.0]; 3];
        let buf = render_scatter(&points, &[0, 0, 0], 1, &PlotOptions::default()).unwrap();
        assert_eq!(buf.len(), 1350 * 1050 * 3);
    }

    #[test]
    fn rejects_tiny_canvas() {
        let opts = PlotOptions {
            width: 0,
            height: 0,
            ..small()
        };
        assert!(matches!(
            render_scatter(&[[0.0, 0.0], [1.0, 1.0]], &[0, 1], 2, &opts),
            Err(ClusterError::InvalidParameter(_))
        ));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plot.png");
        assert!(save_scatter(&[[0.0, 0.0]], &[0], 1, &opts, &path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn saves_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plot.png");
        save_scatter(&[[0.0, 0.0], [1.0, 0.0]], &[0, 1], 2, &small(), &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }
}

//! Renderer contract and the default SVG renderer
//!
//! A refresh pass hands the renderer the shared time vector and every trace it
//! could fetch. The renderer returns an opaque [`Artifact`]; the widget only
//! stores it and raises its "updated" flag.

use neugraph_storage::{Direction, NodeId, Series, VariableName};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fmt::Write as _;

/// Media type of artifacts produced by [`SvgRenderer`]
pub const SVG_MEDIA_TYPE: &str = "image/svg+xml";

const PALETTE: [&str; 10] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
    "#bcbd22", "#17becf",
];

/// One fetched series
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    /// Node the series belongs to
    pub node: NodeId,
    /// Variable the series was read from
    pub variable: VariableName,
    /// Input or output file
    pub direction: Direction,
    /// Samples, one per time step
    pub series: Series,
}

/// Rendered summary of a refresh pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Encoded image
    pub bytes: Vec<u8>,
    /// MIME type of `bytes`
    pub media_type: String,
}

impl Artifact {
    /// Wrap encoded bytes
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            bytes,
            media_type: media_type.into(),
        }
    }
}

/// Errors raised by renderers
#[derive(Error, Debug)]
pub enum RenderError {
    /// A series does not line up with the time vector
    #[error("Series {direction}.{variable}[{node}] has {found} samples, time vector has {expected}")]
    LengthMismatch {
        /// Node of the offending series
        node: String,
        /// Direction of the offending series
        direction: String,
        /// Variable of the offending series
        variable: String,
        /// Time vector length
        expected: usize,
        /// Series length
        found: usize,
    },

    /// Writing the output failed
    #[error("Formatting error: {source}")]
    Format {
        #[from]
        /// Source formatting error
        source: std::fmt::Error,
    },

    /// Renderer-specific failure
    #[error("Render failed: {reason}")]
    Failed {
        /// Reason for failure
        reason: String,
    },
}

impl RenderError {
    /// Create a generic render failure
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// Turns fetched traces into an artifact
pub trait Renderer {
    /// Render `traces` against the shared `time` vector. Called with an empty
    /// slice when a pass found no usable series.
    fn render(&mut self, time: &[f64], traces: &[Trace]) -> Result<Artifact, RenderError>;
}

impl<F> Renderer for F
where
    F: FnMut(&[f64], &[Trace]) -> Result<Artifact, RenderError>,
{
    fn render(&mut self, time: &[f64], traces: &[Trace]) -> Result<Artifact, RenderError> {
        self(time, traces)
    }
}

/// Figure geometry for [`SvgRenderer`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Total width in pixels
    pub width: u32,
    /// Height of one variable panel in pixels
    pub panel_height: u32,
    /// Outer margin in pixels
    pub margin: u32,
    /// Line width of traces
    pub stroke_width: f64,
    /// Font size for titles and labels
    pub font_size: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 960,
            panel_height: 180,
            margin: 48,
            stroke_width: 1.5,
            font_size: 12,
        }
    }
}

struct Panel<'a> {
    variable: &'a VariableName,
    traces: Vec<&'a Trace>,
}

/// Two-column line plot: inputs on the left, outputs on the right, one panel
/// per variable, one line per node.
#[derive(Debug, Clone, Default)]
pub struct SvgRenderer {
    config: RenderConfig,
}

impl SvgRenderer {
    /// Renderer with the given geometry
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    /// Geometry in use
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }
}

impl Renderer for SvgRenderer {
    fn render(&mut self, time: &[f64], traces: &[Trace]) -> Result<Artifact, RenderError> {
        if let Some(bad) = traces.iter().find(|t| t.series.len() != time.len()) {
            return Err(RenderError::LengthMismatch {
                node: bad.node.to_string(),
                direction: bad.direction.to_string(),
                variable: bad.variable.to_string(),
                expected: time.len(),
                found: bad.series.len(),
            });
        }

        let cfg = &self.config;
        let columns = group_panels(traces);
        let nodes = node_order(traces);

        let rows = columns.iter().map(Vec::len).max().unwrap_or(0).max(1) as u32;
        let legend_height = if traces.is_empty() { 0 } else { cfg.font_size * 2 };
        let width = cfg.width.max(4 * cfg.margin + 2);
        let height = 2 * cfg.margin + rows * cfg.panel_height + legend_height;
        let font = cfg.font_size;

        let mut svg = String::new();
        writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif" font-size="{font}">"#,
            w = width,
            h = height,
            font = font
        )?;
        writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#)?;

        if traces.is_empty() {
            writeln!(
                svg,
                r##"<text x="{}" y="{}" text-anchor="middle" fill="#888">no data</text>"##,
                width / 2,
                height / 2
            )?;
            svg.push_str("</svg>\n");
            return Ok(Artifact::new(svg.into_bytes(), SVG_MEDIA_TYPE));
        }

        let (t_lo, t_hi) = time_range(time);
        let column_width = f64::from(width / 2);
        let margin = f64::from(cfg.margin);
        let panel_height = f64::from(cfg.panel_height);
        let plot_height = (panel_height - 1.5 * f64::from(font)).max(1.0);

        for (ci, (direction, panels)) in Direction::ALL.iter().zip(columns.iter()).enumerate() {
            let x0 = ci as f64 * column_width + margin;
            let plot_width = (column_width - 2.0 * margin).max(1.0);
            let title = match direction {
                Direction::Input => "Inputs",
                Direction::Output => "Outputs",
            };
            writeln!(
                svg,
                r#"<text x="{:.1}" y="{:.1}" font-weight="bold">{}</text>"#,
                x0,
                margin / 2.0,
                title
            )?;

            for (ri, panel) in panels.iter().enumerate() {
                let y0 = margin + ri as f64 * panel_height + f64::from(font);
                write_panel(
                    &mut svg,
                    panel,
                    &nodes,
                    time,
                    (t_lo, t_hi),
                    (x0, y0, plot_width, plot_height),
                    cfg,
                )?;
            }
        }

        let legend_y = f64::from(height - legend_height) + f64::from(font);
        let mut x = margin;
        for (i, node) in nodes.iter().enumerate() {
            let color = PALETTE[i % PALETTE.len()];
            writeln!(
                svg,
                r#"<line x1="{x:.1}" y1="{y:.1}" x2="{x2:.1}" y2="{y:.1}" stroke="{color}" stroke-width="3"/>"#,
                x = x,
                x2 = x + 16.0,
                y = legend_y - f64::from(font) / 3.0,
                color = color
            )?;
            writeln!(
                svg,
                r#"<text x="{:.1}" y="{:.1}">{}</text>"#,
                x + 20.0,
                legend_y,
                escape(node.as_str())
            )?;
            x += 28.0 + 0.6 * f64::from(font) * node.as_str().chars().count() as f64;
        }

        svg.push_str("</svg>\n");
        Ok(Artifact::new(svg.into_bytes(), SVG_MEDIA_TYPE))
    }
}

fn write_panel(
    svg: &mut String,
    panel: &Panel<'_>,
    nodes: &[&NodeId],
    time: &[f64],
    t_range: (f64, f64),
    rect: (f64, f64, f64, f64),
    cfg: &RenderConfig,
) -> Result<(), RenderError> {
    let (x0, y0, w, h) = rect;
    let (v_lo, v_hi) = value_range(panel.traces.iter().flat_map(|t| t.series.iter().copied()));

    writeln!(
        svg,
        r##"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="none" stroke="#444"/>"##,
        x0, y0, w, h
    )?;
    writeln!(
        svg,
        r#"<text x="{:.1}" y="{:.1}">{}</text>"#,
        x0,
        y0 - 4.0,
        escape(panel.variable.as_str())
    )?;
    writeln!(
        svg,
        r#"<text x="{:.1}" y="{:.1}" text-anchor="end">{}</text>"#,
        x0 - 4.0,
        y0 + f64::from(cfg.font_size),
        fmt_num(v_hi)
    )?;
    writeln!(
        svg,
        r#"<text x="{:.1}" y="{:.1}" text-anchor="end">{}</text>"#,
        x0 - 4.0,
        y0 + h,
        fmt_num(v_lo)
    )?;
    writeln!(
        svg,
        r#"<text x="{:.1}" y="{:.1}" text-anchor="end">t={}</text>"#,
        x0 + w,
        y0 + h + f64::from(cfg.font_size),
        fmt_num(t_range.1)
    )?;

    for trace in &panel.traces {
        let color_index = nodes.iter().position(|n| **n == trace.node).unwrap_or(0);
        let color = PALETTE[color_index % PALETTE.len()];
        for segment in segments(time, &trace.series) {
            let points: Vec<String> = segment
                .iter()
                .map(|&(t, v)| {
                    format!(
                        "{:.1},{:.1}",
                        scale(t, t_range, (x0, x0 + w)),
                        scale(v, (v_lo, v_hi), (y0 + h, y0))
                    )
                })
                .collect();
            writeln!(
                svg,
                r#"<polyline fill="none" stroke="{}" stroke-width="{}" points="{}"/>"#,
                color,
                cfg.stroke_width,
                points.join(" ")
            )?;
        }
    }
    Ok(())
}

/// Panels per direction (inputs, outputs), variables in order of first use
fn group_panels(traces: &[Trace]) -> [Vec<Panel<'_>>; 2] {
    let mut columns: [Vec<Panel<'_>>; 2] = [Vec::new(), Vec::new()];
    for trace in traces {
        let column = match trace.direction {
            Direction::Input => &mut columns[0],
            Direction::Output => &mut columns[1],
        };
        match column.iter_mut().find(|p| *p.variable == trace.variable) {
            Some(panel) => panel.traces.push(trace),
            None => column.push(Panel {
                variable: &trace.variable,
                traces: vec![trace],
            }),
        }
    }
    columns
}

fn node_order(traces: &[Trace]) -> Vec<&NodeId> {
    let mut nodes: Vec<&NodeId> = Vec::new();
    for trace in traces {
        if !nodes.contains(&&trace.node) {
            nodes.push(&trace.node);
        }
    }
    nodes
}

/// Runs of finite samples; non-finite samples break the line
fn segments(time: &[f64], series: &[f64]) -> Vec<Vec<(f64, f64)>> {
    let mut out = Vec::new();
    let mut current = Vec::new();
    for (&t, &v) in time.iter().zip(series) {
        if v.is_finite() {
            current.push((t, v));
        } else if !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn time_range(time: &[f64]) -> (f64, f64) {
    match (time.first(), time.last()) {
        (Some(&lo), Some(&hi)) if hi > lo => (lo, hi),
        (Some(&lo), _) => (lo, lo + 1.0),
        _ => (0.0, 1.0),
    }
}

fn value_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        (0.0, 1.0)
    } else if hi > lo {
        (lo, hi)
    } else {
        (lo - 1.0, hi + 1.0)
    }
}

fn scale(v: f64, from: (f64, f64), to: (f64, f64)) -> f64 {
    to.0 + (v - from.0) / (from.1 - from.0) * (to.1 - to.0)
}

fn fmt_num(v: f64) -> String {
    let s = format!("{:.3}", v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn trace(node: &str, direction: Direction, variable: &str, values: &[f64]) -> Trace {
        Trace {
            node: NodeId::new(node),
            variable: VariableName::new(variable),
            direction,
            series: Arc::from(values.to_vec()),
        }
    }

    fn render(traces: &[Trace]) -> String {
        let time = [0.0, 0.5, 1.0, 1.5];
        let artifact = SvgRenderer::default().render(&time, traces).unwrap();
        assert_eq!(artifact.media_type, SVG_MEDIA_TYPE);
        String::from_utf8(artifact.bytes).unwrap()
    }

    #[test]
    fn test_blank_figure() {
        let svg = render(&[]);
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("no data"));
        assert!(svg.trim_end().ends_with("</svg>"));
    }

    #[test]
    fn test_panels_and_lines() {
        let svg = render(&[
            trace("a", Direction::Input, "I", &[0.0, 1.0, 1.0, 0.0]),
            trace("a", Direction::Output, "V", &[1.0, 3.0, 5.0, 7.0]),
            trace("b", Direction::Output, "V", &[2.0, 4.0, 6.0, 8.0]),
        ]);
        assert!(svg.contains("Inputs"));
        assert!(svg.contains("Outputs"));
        assert_eq!(svg.matches("<polyline").count(), 3);
        assert!(svg.contains(">I</text>"));
        assert!(svg.contains(">V</text>"));
        // Same node, same color in both columns
        assert_eq!(svg.matches(PALETTE[0]).count(), 3);
    }

    #[test]
    fn test_non_finite_samples_split_lines() {
        let svg = render(&[trace("a", Direction::Output, "V", &[1.0, f64::NAN, 2.0, 3.0])]);
        assert_eq!(svg.matches("<polyline").count(), 2);
    }

    #[test]
    fn test_length_mismatch() {
        let err = SvgRenderer::default()
            .render(&[0.0, 1.0], &[trace("a", Direction::Output, "V", &[1.0])])
            .unwrap_err();
        assert!(matches!(err, RenderError::LengthMismatch { expected: 2, found: 1, .. }));
    }

    #[test]
    fn test_labels_are_escaped() {
        let svg = render(&[trace("<a&b>", Direction::Output, "V", &[1.0, 1.0, 1.0, 1.0])]);
        assert!(svg.contains("&lt;a&amp;b&gt;"));
        assert!(!svg.contains("<a&b>"));
    }

    #[test]
    fn test_ranges() {
        assert_eq!(value_range([2.0, 2.0].into_iter()), (1.0, 3.0));
        assert_eq!(value_range([f64::NAN].into_iter()), (0.0, 1.0));
        assert_eq!(time_range(&[]), (0.0, 1.0));
        assert_eq!(time_range(&[0.0]), (0.0, 1.0));
        assert_eq!(fmt_num(1.5), "1.5");
        assert_eq!(fmt_num(2.0), "2");
    }

    #[test]
    fn test_closure_renderer() {
        let mut calls = 0;
        let mut renderer = |_: &[f64], traces: &[Trace]| {
            calls += 1;
            Ok::<_, RenderError>(Artifact::new(
                vec![traces.len() as u8],
                "application/octet-stream",
            ))
        };
        let artifact = renderer.render(&[], &[]).unwrap();
        assert_eq!(artifact.bytes, vec![0]);
        assert_eq!(calls, 1);
    }
}

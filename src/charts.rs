// 🖼️ Chart Renderer - static SVG figures
//
// Hand-built SVG strings with a fixed palette. Every renderer returns an
// empty string when there is nothing to draw.

use crate::aggregation::TemporalEvolution;
use crate::error::{PipelineError, PipelineResult};
use crate::scores::{MechanismKind, MechanismSummary, RegulatoryMechanismScore};
use rust_decimal::prelude::ToPrimitive;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const WIDTH: i32 = 640;
const HEIGHT: i32 = 400;
const PADDING: f64 = 48.0;

const CHINA_COLOR: &str = "#d62728";
const US_COLOR: &str = "#1f77b4";
const EUROPE_COLOR: &str = "#2ca02c";
const OTHER_COLOR: &str = "#8c8c8c";

const DIRECTIVE_COLOR: &str = "#d62728";
const MARKET_COLOR: &str = "#1f77b4";
const HYBRID_COLOR: &str = "#ff9933";

const GLOBAL_COLOR: &str = "#348dc1";
const REST_OF_WORLD_COLOR: &str = "#95a5a6";

const FOSSIL_COLOR: &str = "#8b0000";
const GREEN_COLOR: &str = "#228b22";

/// One bank on the portfolio-paradox scatter
#[derive(Debug, Clone, PartialEq)]
pub struct ScatterPoint {
    pub label: String,
    pub country: String,
    /// Framework adoption, 0-1
    pub adoption: f64,
    /// Green portfolio in billions
    pub green_bn: f64,
}

/// One bank on the fossil-versus-green comparison, both in billions
#[derive(Debug, Clone, PartialEq)]
pub struct FossilGreenBar {
    pub label: String,
    pub fossil_bn: f64,
    pub green_bn: f64,
}

fn region_color(country: &str) -> &'static str {
    match country {
        "CN" => CHINA_COLOR,
        "US" => US_COLOR,
        "GB" | "FR" | "DE" | "NL" | "ES" | "IT" | "CH" => EUROPE_COLOR,
        _ => OTHER_COLOR,
    }
}

fn kind_color(kind: MechanismKind) -> &'static str {
    match kind {
        MechanismKind::Directive => DIRECTIVE_COLOR,
        MechanismKind::MarketBased => MARKET_COLOR,
        MechanismKind::Hybrid => HYBRID_COLOR,
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ============================================================================
// SVG PRIMITIVES
// ============================================================================

fn svg_header(title: &str) -> String {
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}"><style>text{{font-family:Arial,sans-serif;font-size:11px;fill:#444}}</style><rect width="100%" height="100%" fill="white" /><text x="{cx}" y="24" text-anchor="middle" font-size="14">{title}</text>"#,
        w = WIDTH,
        h = HEIGHT,
        cx = WIDTH / 2,
        title = escape(title)
    )
}

fn svg_footer() -> &'static str {
    "</svg>"
}

/// Value range with flat ranges widened so scaling never divides by zero
fn extent(values: impl Iterator<Item = f64>, include_zero: bool) -> Option<(f64, f64)> {
    let (mut min_v, mut max_v) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if !min_v.is_finite() || !max_v.is_finite() {
        return None;
    }
    if include_zero {
        min_v = min_v.min(0.0);
        max_v = max_v.max(0.0);
    }
    if min_v == max_v {
        let adjust = if min_v == 0.0 { 1.0 } else { min_v.abs() * 0.1 };
        min_v -= adjust;
        max_v += adjust;
    }
    Some((min_v, max_v))
}

fn scale_x(value: f64, min_v: f64, max_v: f64) -> f64 {
    let inner = WIDTH as f64 - 2.0 * PADDING;
    PADDING + (value - min_v) / (max_v - min_v) * inner
}

fn scale_y(value: f64, min_v: f64, max_v: f64) -> f64 {
    let inner = HEIGHT as f64 - 2.0 * PADDING;
    PADDING + (1.0 - (value - min_v) / (max_v - min_v)) * inner
}

fn axes(svg: &mut String, x_label: &str, y_label: &str) {
    let bottom = HEIGHT as f64 - PADDING;
    let right = WIDTH as f64 - PADDING;
    svg.push_str(&format!(
        r##"<line x1="{p:.2}" y1="{b:.2}" x2="{r:.2}" y2="{b:.2}" stroke="#444" /><line x1="{p:.2}" y1="{p:.2}" x2="{p:.2}" y2="{b:.2}" stroke="#444" />"##,
        p = PADDING,
        b = bottom,
        r = right
    ));
    svg.push_str(&format!(
        r#"<text x="{x:.2}" y="{y:.2}" text-anchor="middle">{label}</text>"#,
        x = WIDTH as f64 / 2.0,
        y = HEIGHT as f64 - 12.0,
        label = escape(x_label)
    ));
    svg.push_str(&format!(
        r#"<text x="14" y="{y:.2}" text-anchor="middle" transform="rotate(-90 14 {y:.2})">{label}</text>"#,
        y = HEIGHT as f64 / 2.0,
        label = escape(y_label)
    ));
}

fn y_ticks(svg: &mut String, min_v: f64, max_v: f64) {
    for i in 0..=4 {
        let value = min_v + (max_v - min_v) * f64::from(i) / 4.0;
        let y = scale_y(value, min_v, max_v);
        svg.push_str(&format!(
            r#"<text x="{x:.2}" y="{y:.2}" text-anchor="end">{value:.1}</text>"#,
            x = PADDING - 6.0,
            y = y + 3.0,
            value = value
        ));
    }
}

fn rect(svg: &mut String, x: f64, top: f64, width: f64, bottom: f64, color: &str) {
    svg.push_str(&format!(
        r#"<rect x="{x:.2}" y="{y:.2}" width="{w:.2}" height="{h:.2}" fill="{color}" />"#,
        x = x,
        y = top,
        w = width,
        h = (bottom - top).max(0.0),
        color = color
    ));
}

fn x_label(svg: &mut String, cx: f64, text: &str) {
    svg.push_str(&format!(
        r#"<text x="{cx:.2}" y="{y:.2}" text-anchor="middle">{text}</text>"#,
        cx = cx,
        y = HEIGHT as f64 - PADDING + 14.0,
        text = escape(text)
    ));
}

fn polyline(points: &[(f64, f64)], stroke: &str) -> String {
    if points.is_empty() {
        return String::new();
    }
    let coords = points
        .iter()
        .map(|(x, y)| format!("{:.2},{:.2}", x, y))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        r#"<polyline fill="none" stroke="{stroke}" stroke-width="2" points="{coords}" />"#,
        stroke = stroke,
        coords = coords
    )
}

fn legend(svg: &mut String, entries: &[(&str, &str, bool)]) {
    let x = WIDTH as f64 - PADDING - 130.0;
    let mut y = PADDING + 10.0;
    for (label, color, dash) in entries {
        let dash = if *dash { "5 4" } else { "0" };
        svg.push_str(&format!(
            r##"<line x1="{x1:.2}" y1="{y:.2}" x2="{x2:.2}" y2="{y:.2}" stroke="{color}" stroke-width="2" stroke-dasharray="{dash}" /><text x="{tx:.2}" y="{ty:.2}">{label}</text>"##,
            x1 = x,
            x2 = x + 20.0,
            y = y,
            color = color,
            dash = dash,
            tx = x + 26.0,
            ty = y + 4.0,
            label = escape(label)
        ));
        y += 16.0;
    }
}

// ============================================================================
// FIGURES
// ============================================================================

/// Framework adoption against green portfolio size, coloured by region
pub fn paradox_scatter(points: &[ScatterPoint]) -> String {
    let points: Vec<&ScatterPoint> = points
        .iter()
        .filter(|p| p.adoption.is_finite() && p.green_bn.is_finite())
        .collect();
    if points.is_empty() {
        return String::new();
    }
    let Some((y_min, y_max)) = extent(points.iter().map(|p| p.green_bn), true) else {
        return String::new();
    };
    // Adoption is always plotted on its full 0-1 range, with a margin
    let (x_min, x_max) = (-0.05, 1.05);

    let mut svg = svg_header("Portfolio Paradox: Framework Adoption vs Green Portfolio");
    axes(&mut svg, "Framework adoption score", "Green portfolio (bn)");
    y_ticks(&mut svg, y_min, y_max);

    for point in &points {
        let cx = scale_x(point.adoption, x_min, x_max);
        let cy = scale_y(point.green_bn, y_min, y_max);
        svg.push_str(&format!(
            r#"<circle cx="{cx:.2}" cy="{cy:.2}" r="6" fill="{color}" fill-opacity="0.8" /><text x="{tx:.2}" y="{ty:.2}">{label}</text>"#,
            cx = cx,
            cy = cy,
            color = region_color(&point.country),
            tx = cx + 8.0,
            ty = cy - 6.0,
            label = escape(&point.label)
        ));
    }

    legend(
        &mut svg,
        &[
            ("China", CHINA_COLOR, false),
            ("United States", US_COLOR, false),
            ("Europe", EUROPE_COLOR, false),
        ],
    );
    svg.push_str(svg_footer());
    svg
}

/// Mechanism effectiveness bars with dashed directive and market-based means
pub fn mechanism_bars(mechanisms: &[RegulatoryMechanismScore], summary: &MechanismSummary) -> String {
    let bars: Vec<&RegulatoryMechanismScore> =
        mechanisms.iter().filter(|m| m.validate().is_ok()).collect();
    if bars.is_empty() {
        return String::new();
    }
    let (y_min, y_max) = (0.0, 100.0);

    let mut svg = svg_header("Implementation Effectiveness by Regulatory Mechanism");
    axes(&mut svg, "Jurisdiction", "Effectiveness (%)");
    y_ticks(&mut svg, y_min, y_max);

    let band = (WIDTH as f64 - 2.0 * PADDING) / bars.len() as f64;
    let bar_width = band * 0.7;
    let bottom = scale_y(0.0, y_min, y_max);
    for (i, bar) in bars.iter().enumerate() {
        let x = PADDING + band * i as f64 + (band - bar_width) / 2.0;
        let top = scale_y(bar.effectiveness, y_min, y_max);
        svg.push_str(&format!(
            r#"<rect x="{x:.2}" y="{y:.2}" width="{w:.2}" height="{h:.2}" fill="{color}" /><text x="{cx:.2}" y="{ly:.2}" text-anchor="middle">{label}</text><text x="{cx:.2}" y="{vy:.2}" text-anchor="middle">{value:.1}</text>"#,
            x = x,
            y = top,
            w = bar_width,
            h = bottom - top,
            color = kind_color(bar.kind),
            cx = x + bar_width / 2.0,
            ly = bottom + 14.0,
            label = escape(&bar.mechanism),
            vy = top - 4.0,
            value = bar.effectiveness
        ));
    }

    let mut entries = vec![
        ("Directive", DIRECTIVE_COLOR, false),
        ("Market-based", MARKET_COLOR, false),
        ("Hybrid", HYBRID_COLOR, false),
    ];
    let guides = [
        (summary.directive_mean, DIRECTIVE_COLOR, "Directive mean"),
        (summary.market_based_mean, MARKET_COLOR, "Market-based mean"),
    ];
    for (mean, color, label) in guides {
        let Some(mean) = mean else { continue };
        let y = scale_y(mean, y_min, y_max);
        svg.push_str(&format!(
            r#"<line x1="{x1:.2}" y1="{y:.2}" x2="{x2:.2}" y2="{y:.2}" stroke="{color}" stroke-width="1.5" stroke-dasharray="6 4" />"#,
            x1 = PADDING,
            x2 = WIDTH as f64 - PADDING,
            y = y,
            color = color
        ));
        entries.push((label, color, true));
    }

    legend(&mut svg, &entries);
    svg.push_str(svg_footer());
    svg
}

/// Global and Chinese green-finance volume by year
pub fn temporal_lines(evolution: &TemporalEvolution) -> String {
    let rows: Vec<(i32, f64, f64)> = evolution
        .points
        .iter()
        .filter_map(|p| {
            Some((p.year, p.global_volume.to_f64()?, p.china_volume.to_f64()?))
        })
        .collect();
    if rows.len() < 2 {
        return String::new();
    }
    let Some((y_min, y_max)) = extent(rows.iter().flat_map(|r| [r.1, r.2]), true) else {
        return String::new();
    };
    let x_min = f64::from(rows[0].0);
    let x_max = f64::from(rows[rows.len() - 1].0);

    let mut svg = svg_header("Temporal Evolution of Green Finance");
    axes(&mut svg, "Year", "Volume (bn)");
    y_ticks(&mut svg, y_min, y_max);

    let bottom = HEIGHT as f64 - PADDING;
    for (year, _, _) in &rows {
        svg.push_str(&format!(
            r#"<text x="{x:.2}" y="{y:.2}" text-anchor="middle">{year}</text>"#,
            x = scale_x(f64::from(*year), x_min, x_max),
            y = bottom + 14.0,
            year = year
        ));
    }

    let global: Vec<(f64, f64)> = rows
        .iter()
        .map(|(year, g, _)| (scale_x(f64::from(*year), x_min, x_max), scale_y(*g, y_min, y_max)))
        .collect();
    let china: Vec<(f64, f64)> = rows
        .iter()
        .map(|(year, _, c)| (scale_x(f64::from(*year), x_min, x_max), scale_y(*c, y_min, y_max)))
        .collect();
    svg.push_str(&polyline(&global, GLOBAL_COLOR));
    svg.push_str(&polyline(&china, CHINA_COLOR));

    legend(
        &mut svg,
        &[("Global", GLOBAL_COLOR, false), ("China", CHINA_COLOR, false)],
    );
    svg.push_str(svg_footer());
    svg
}

/// Reported fossil financing next to green portfolio, one bar pair per bank
pub fn fossil_green_bars(bars: &[FossilGreenBar]) -> String {
    let bars: Vec<&FossilGreenBar> = bars
        .iter()
        .filter(|b| b.fossil_bn.is_finite() && b.green_bn.is_finite())
        .collect();
    if bars.is_empty() {
        return String::new();
    }
    let Some((y_min, y_max)) = extent(bars.iter().flat_map(|b| [b.fossil_bn, b.green_bn]), true)
    else {
        return String::new();
    };

    let mut svg = svg_header("NZBA Members: Fossil vs Green Finance");
    axes(&mut svg, "NZBA member banks", "Finance volume (bn)");
    y_ticks(&mut svg, y_min, y_max);

    let band = (WIDTH as f64 - 2.0 * PADDING) / bars.len() as f64;
    let bar_width = band * 0.35;
    let bottom = scale_y(0.0, y_min, y_max);
    for (i, bar) in bars.iter().enumerate() {
        let center = PADDING + band * (i as f64 + 0.5);
        rect(&mut svg, center - bar_width, scale_y(bar.fossil_bn, y_min, y_max), bar_width, bottom, FOSSIL_COLOR);
        rect(&mut svg, center, scale_y(bar.green_bn, y_min, y_max), bar_width, bottom, GREEN_COLOR);
        x_label(&mut svg, center, &bar.label);
    }

    legend(
        &mut svg,
        &[("Fossil finance", FOSSIL_COLOR, false), ("Green finance", GREEN_COLOR, false)],
    );
    svg.push_str(svg_footer());
    svg
}

/// Stacked yearly bars: Chinese issuance under the rest of the world
pub fn china_share_bars(evolution: &TemporalEvolution) -> String {
    let rows: Vec<(i32, f64, f64)> = evolution
        .points
        .iter()
        .filter_map(|p| {
            let global = p.global_volume.to_f64()?;
            let china = p.china_volume.to_f64()?.min(global);
            Some((p.year, china, global))
        })
        .collect();
    if rows.iter().all(|(_, _, global)| *global <= 0.0) {
        return String::new();
    }
    let Some((y_min, y_max)) = extent(rows.iter().map(|r| r.2), true) else {
        return String::new();
    };

    let mut svg = svg_header("China's Share of Global Green Finance");
    axes(&mut svg, "Year", "Volume (bn)");
    y_ticks(&mut svg, y_min, y_max);

    let band = (WIDTH as f64 - 2.0 * PADDING) / rows.len() as f64;
    let bar_width = band * 0.7;
    let bottom = scale_y(0.0, y_min, y_max);
    for (i, (year, china, global)) in rows.iter().enumerate() {
        let x = PADDING + band * i as f64 + (band - bar_width) / 2.0;
        let china_top = scale_y(*china, y_min, y_max);
        rect(&mut svg, x, china_top, bar_width, bottom, CHINA_COLOR);
        rect(&mut svg, x, scale_y(*global, y_min, y_max), bar_width, china_top, REST_OF_WORLD_COLOR);
        x_label(&mut svg, x + bar_width / 2.0, &year.to_string());
    }

    legend(
        &mut svg,
        &[("China", CHINA_COLOR, false), ("Rest of world", REST_OF_WORLD_COLOR, false)],
    );
    svg.push_str(svg_footer());
    svg
}

/// Write `svg` to `dir/name.svg`; an empty chart is skipped
pub fn write_chart(dir: &Path, name: &str, svg: &str) -> PipelineResult<Option<PathBuf>> {
    if svg.is_empty() {
        debug!("Chart {} has nothing to draw, skipped", name);
        return Ok(None);
    }
    fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
    let path = dir.join(format!("{}.svg", name));
    fs::write(&path, svg).map_err(|e| PipelineError::io(&path, e))?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::TemporalPoint;
    use crate::scores::summarize_mechanisms;
    use rust_decimal_macros::dec;

    fn point(label: &str, country: &str, adoption: f64, green_bn: f64) -> ScatterPoint {
        ScatterPoint {
            label: label.to_string(),
            country: country.to_string(),
            adoption,
            green_bn,
        }
    }

    #[test]
    fn test_scatter_colours_by_region() {
        let svg = paradox_scatter(&[
            point("ICBC", "CN", 0.25, 167.5),
            point("JPMorgan", "US", 1.0, 553.0),
            point("A&B", "FR", 1.0, 19.3),
        ]);
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert_eq!(svg.matches("<circle").count(), 3);
        assert!(svg.contains(CHINA_COLOR));
        assert!(svg.contains(US_COLOR));
        assert!(svg.contains("A&amp;B"));
    }

    #[test]
    fn test_empty_inputs_render_nothing() {
        assert_eq!(paradox_scatter(&[]), "");
        assert_eq!(mechanism_bars(&[], &MechanismSummary::default()), "");
        assert_eq!(temporal_lines(&TemporalEvolution::default()), "");
        assert_eq!(fossil_green_bars(&[]), "");
        assert_eq!(china_share_bars(&TemporalEvolution::default()), "");
    }

    #[test]
    fn test_fossil_green_bars() {
        let bars = vec![
            FossilGreenBar { label: "JPMorgan".into(), fossil_bn: 40.8, green_bn: 12.0 },
            FossilGreenBar { label: "Wells Fargo".into(), fossil_bn: 24.5, green_bn: 0.0 },
        ];
        let svg = fossil_green_bars(&bars);
        // Two bars per bank plus the background
        assert_eq!(svg.matches("<rect x=").count(), 4);
        assert_eq!(svg.matches(FOSSIL_COLOR).count(), 3);
        assert!(svg.contains(">Wells Fargo<"));
    }

    #[test]
    fn test_china_share_bars_stack() {
        let evolution = TemporalEvolution {
            points: vec![
                TemporalPoint { year: 2020, global_volume: dec!(100.0), china_volume: dec!(25.0), count: 4 },
                TemporalPoint { year: 2021, global_volume: dec!(0), china_volume: dec!(0), count: 0 },
            ],
            excluded: 0,
        };
        let svg = china_share_bars(&evolution);
        assert_eq!(svg.matches("<rect x=").count(), 4);
        assert!(svg.contains(">2021<"));

        let quiet = TemporalEvolution {
            points: vec![TemporalPoint { year: 2020, global_volume: dec!(0), china_volume: dec!(0), count: 0 }],
            excluded: 0,
        };
        assert_eq!(china_share_bars(&quiet), "");
    }

    #[test]
    fn test_mechanism_bars_have_guides() {
        let mechanisms = vec![
            RegulatoryMechanismScore::new("China", MechanismKind::Directive, 82.5),
            RegulatoryMechanismScore::new("US", MechanismKind::MarketBased, 52.4),
            RegulatoryMechanismScore::new("Bad", MechanismKind::Hybrid, -3.0),
        ];
        let summary = summarize_mechanisms(&mechanisms);
        let svg = mechanism_bars(&mechanisms, &summary);

        assert_eq!(svg.matches("<rect x=").count(), 2);
        assert_eq!(svg.matches("stroke-dasharray=\"6 4\"").count(), 2);
        assert!(!svg.contains(">Bad<"));
    }

    #[test]
    fn test_temporal_lines() {
        let evolution = TemporalEvolution {
            points: (2014..=2016)
                .map(|year| TemporalPoint {
                    year,
                    global_volume: dec!(10.0),
                    china_volume: dec!(2.5),
                    count: 1,
                })
                .collect(),
            excluded: 0,
        };
        let svg = temporal_lines(&evolution);
        assert_eq!(svg.matches("<polyline").count(), 2);
        assert!(svg.contains(">2015<"));
    }

    #[test]
    fn test_write_chart_skips_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(write_chart(dir.path(), "empty", "").unwrap(), None);

        let path = write_chart(dir.path(), "figure", "<svg></svg>").unwrap().unwrap();
        assert_eq!(path.file_name().unwrap(), "figure.svg");
        assert_eq!(fs::read_to_string(path).unwrap(), "<svg></svg>");
    }
}

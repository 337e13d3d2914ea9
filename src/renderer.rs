//! # Terminal Rendering
//!
//! Text rendering of a prediction response for the CLI: a list of high and low
//! water events followed by an ASCII tide curve of the day's graph points.
//! Answers computed without a tile are flagged as estimates, which is the
//! distinction presentation layers are expected to make from `data_source`.

use crate::service::PredictionResponse;
use crate::{DataSource, ExtremeKind, GraphPoint};
use chrono::FixedOffset;
use std::fmt::Write as _;

const ROWS: usize = 16;
const Y_AXIS_WIDTH: usize = 6; // Space for Y-axis labels

/// Format a level in metres with two decimals, e.g. "2.41 m".
pub fn format_level(level: f64) -> String {
    format!("{level:.2} m")
}

/// Lowest and highest level of a series.
fn level_bounds(points: &[GraphPoint]) -> (f64, f64) {
    points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), p| {
            (min.min(p.level), max.max(p.level))
        })
}

/// Render extremes, moon phase and (when present) the tide curve.
pub fn render_text(response: &PredictionResponse, offset: FixedOffset) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{} ({:.4}, {:.4}) on {}",
        response.location.name, response.location.lat, response.location.lon, response.date
    );
    if response.data_source == DataSource::Harmonic {
        let _ = writeln!(out, "⚠ ESTIMATED (harmonic model, no tile)");
    } else if let Some(tile_id) = &response.tile_id {
        let _ = writeln!(
            out,
            "Tile {tile_id}{}",
            if response.from_cache { " (cached)" } else { "" }
        );
    }
    let _ = writeln!(
        out,
        "Moon: {} ({:.0}% lit)\n",
        response.moon_phase.name,
        response.moon_phase.illumination * 100.0
    );

    for extreme in &response.extremes {
        let label = match extreme.kind {
            ExtremeKind::High => "High",
            ExtremeKind::Low => "Low ",
        };
        let _ = writeln!(
            out,
            "  {label}  {}  {:>8}  ({}%)",
            extreme.time.with_timezone(&offset).format("%H:%M"),
            format_level(extreme.level),
            extreme.confidence
        );
    }

    if let Some(graph) = response.graph.as_deref() {
        if !graph.is_empty() {
            out.push('\n');
            out.push_str(&render_curve(graph, offset));
        }
    }
    out
}

/// ASCII plot of a series, one column per point.
pub fn render_curve(points: &[GraphPoint], offset: FixedOffset) -> String {
    if points.is_empty() {
        return String::new();
    }
    let (min_level, max_level) = level_bounds(points);
    let span = (max_level - min_level).max(1e-6);

    let level_to_row = |level: f64| {
        let normalized = (level - min_level) / span;
        ((1.0 - normalized) * (ROWS as f64 - 1.0)).round() as usize
    };

    let mut grid = vec![vec![' '; points.len() + Y_AXIS_WIDTH]; ROWS];

    // Y-axis labels every half metre
    let step = if span > 2.0 { 1.0 } else { 0.5 };
    let mut label_level = (min_level / step).ceil() * step;
    while label_level <= max_level {
        let row = level_to_row(label_level);
        let label = format!("{:<width$.1}", label_level, width = Y_AXIS_WIDTH - 1);
        for (i, ch) in label.chars().take(Y_AXIS_WIDTH - 1).enumerate() {
            grid[row][i] = ch;
        }
        grid[row][Y_AXIS_WIDTH - 1] = '│';
        label_level += step;
    }

    for (column, point) in points.iter().enumerate() {
        grid[level_to_row(point.level)][column + Y_AXIS_WIDTH] = '•';
    }

    let mut out = String::new();
    for row in grid {
        let _ = writeln!(out, "{}", row.into_iter().collect::<String>().trim_end());
    }

    // Time labels under the first and last column
    let padding = " ".repeat(Y_AXIS_WIDTH);
    let first = points[0].time.with_timezone(&offset).format("%H:%M").to_string();
    let last = points[points.len() - 1]
        .time
        .with_timezone(&offset)
        .format("%H:%M")
        .to_string();
    let gap = points.len().saturating_sub(first.len() + last.len()).max(1);
    let _ = writeln!(out, "{padding}{first}{}{last}", " ".repeat(gap));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lunar::MoonPhaseResolver;
    use crate::{LocationData, TideExtreme};
    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    fn test_points() -> Vec<GraphPoint> {
        let start = Utc.with_ymd_and_hms(2025, 3, 13, 17, 0, 0).unwrap();
        (0..48)
            .map(|i| GraphPoint {
                time: start + Duration::minutes(30 * i),
                level: 1.85 + 1.2 * (i as f64 * std::f64::consts::PI / 12.0).sin(),
            })
            .collect()
    }

    fn test_response(data_source: DataSource) -> PredictionResponse {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        PredictionResponse {
            location: LocationData::new(13.7563, 100.5018, "Bangkok"),
            date,
            extremes: vec![TideExtreme {
                time: Utc.with_ymd_and_hms(2025, 3, 14, 2, 30, 0).unwrap(),
                level: 3.05,
                kind: ExtremeKind::High,
                confidence: 85,
            }],
            graph: Some(test_points()),
            data_source,
            tile_id: Some("cell_13_100".to_string()),
            from_cache: true,
            confidence: 85,
            response_time_ms: 1.0,
            epoch_julian_day: 2_460_749.0,
            moon_phase: MoonPhaseResolver::computed_only().resolve(date),
        }
    }

    #[test]
    fn test_format_level() {
        assert_eq!(format_level(2.414), "2.41 m");
        assert_eq!(format_level(-0.1), "-0.10 m");
    }

    #[test]
    fn test_curve_has_one_mark_per_point() {
        let points = test_points();
        let curve = render_curve(&points, offset());
        assert_eq!(curve.matches('•').count(), points.len());
        assert_eq!(curve.lines().count(), ROWS + 1);
        assert!(curve.lines().last().unwrap().contains("00:00"));
    }

    #[test]
    fn test_flat_curve_does_not_divide_by_zero() {
        let start = Utc.with_ymd_and_hms(2025, 3, 13, 17, 0, 0).unwrap();
        let flat: Vec<_> = (0..4)
            .map(|i| GraphPoint {
                time: start + Duration::hours(i),
                level: 1.0,
            })
            .collect();
        assert_eq!(render_curve(&flat, offset()).matches('•').count(), 4);
    }

    #[test]
    fn test_empty_curve_renders_nothing() {
        assert!(render_curve(&[], offset()).is_empty());
    }

    #[test]
    fn test_estimate_indicator() {
        let text = render_text(&test_response(DataSource::Harmonic), offset());
        assert!(text.contains("ESTIMATED"));
        assert!(text.contains("High  09:30"));

        let text = render_text(&test_response(DataSource::Tile), offset());
        assert!(!text.contains("ESTIMATED"));
        assert!(text.contains("Tile cell_13_100 (cached)"));
    }
}

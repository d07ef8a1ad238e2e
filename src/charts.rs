// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chart model and rendering for repository activity.

use crate::aggregate::{self, next_month};
use crate::error::AggregateError;
use anyhow::{Context, Result};
use camino::Utf8Path;
use chrono::NaiveDate;
use plotters::coord::types::RangedCoordi64;
use plotters::prelude::*;
use serde::Serialize;

const CHART_WIDTH: u32 = 1200;
const CHART_HEIGHT: u32 = 700;

// Typography - Inter font family
const FONT_FAMILY: &str = "Inter";
const TITLE_SIZE: i32 = 24;
const LABEL_SIZE: i32 = 16;
const AXIS_SIZE: i32 = 14;

// Colors - Modern, minimal palette
const BACKGROUND: RGBColor = RGBColor(250, 250, 252); // Off-white
const TEXT_PRIMARY: RGBColor = RGBColor(15, 23, 42); // Slate 900
const TEXT_SECONDARY: RGBColor = RGBColor(100, 116, 139); // Slate 500
const GRID_COLOR: RGBColor = RGBColor(226, 232, 240); // Slate 200
const PALETTE: [RGBColor; 4] = [
    RGBColor(59, 130, 246), // Blue 500
    RGBColor(34, 197, 94),  // Green 500
    RGBColor(251, 146, 60), // Orange 400
    RGBColor(236, 72, 153), // Pink 500
];

/// One named line on a chart, with a value per month tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Series {
    pub name: String,
    pub values: Vec<u64>,
}

impl Series {
    pub fn new(name: impl Into<String>, values: Vec<u64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// A monthly time-series chart.
#[derive(Debug, Clone, Serialize)]
pub struct Chart {
    /// Artifact name, used for file names.
    pub slug: &'static str,
    pub title: String,
    /// First day of every month shown, without gaps.
    pub ticks: Vec<NaiveDate>,
    pub series: Vec<Series>,
    pub y_range: (u64, u64),
}

impl Chart {
    pub fn new(
        slug: &'static str,
        title: impl Into<String>,
        ticks: Vec<NaiveDate>,
        series: Vec<Series>,
    ) -> Result<Self, AggregateError> {
        let values: Vec<&[u64]> = series.iter().map(|s| s.values.as_slice()).collect();
        let y_range = aggregate::y_axis_range(&values)?;
        Ok(Self {
            slug,
            title: title.into(),
            ticks,
            series,
            y_range,
        })
    }
}

/// Turns a chart into a file.
pub trait ChartRenderer {
    /// File extension of rendered charts, without the dot.
    fn extension(&self) -> &'static str;

    fn render(&self, chart: &Chart, output_path: &Utf8Path) -> Result<()>;
}

/// Renders PNG line charts with plotters.
#[derive(Debug, Default, Clone, Copy)]
pub struct BitmapRenderer;

impl ChartRenderer for BitmapRenderer {
    fn extension(&self) -> &'static str {
        "png"
    }

    fn render(&self, chart: &Chart, output_path: &Utf8Path) -> Result<()> {
        draw_line_chart(chart, output_path)
            .with_context(|| format!("failed to render chart '{}' to {}", chart.slug, output_path))
    }
}

/// Create a styled drawing area with background.
fn create_drawing_area(
    output_path: &Utf8Path,
) -> Result<DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>> {
    let root = BitMapBackend::new(output_path.as_std_path(), (CHART_WIDTH, CHART_HEIGHT))
        .into_drawing_area();
    root.fill(&BACKGROUND)?;
    Ok(root)
}

/// Configure common mesh styling for month-based charts.
fn configure_month_mesh<DB: DrawingBackend>(
    chart: &mut ChartContext<DB, Cartesian2d<RangedDate<NaiveDate>, RangedCoordi64>>,
    month_count: usize,
) -> Result<()>
where
    <DB as DrawingBackend>::ErrorType: 'static,
{
    chart
        .configure_mesh()
        .bold_line_style(&GRID_COLOR.mix(0.3))
        .light_line_style(&TRANSPARENT)
        .x_labels(month_count.clamp(2, 12))
        .y_labels(6)
        .x_label_style((FONT_FAMILY, AXIS_SIZE).into_font().color(&TEXT_SECONDARY))
        .y_label_style((FONT_FAMILY, AXIS_SIZE).into_font().color(&TEXT_SECONDARY))
        .x_label_formatter(&|date| date.format("%Y-%m").to_string())
        .y_desc("Count")
        .disable_x_mesh()
        .draw()?;
    Ok(())
}

fn draw_line_chart(chart: &Chart, output_path: &Utf8Path) -> Result<()> {
    let (Some(&first), Some(&last)) = (chart.ticks.first(), chart.ticks.last()) else {
        anyhow::bail!("chart '{}' has no months to draw", chart.slug);
    };

    let root = create_drawing_area(output_path)?;

    // An all-zero chart still needs a non-empty value axis.
    let y_max = chart.y_range.1.max(1) as i64;

    let mut ctx = ChartBuilder::on(&root)
        .caption(
            &chart.title,
            (FONT_FAMILY, TITLE_SIZE).into_font().color(&TEXT_PRIMARY),
        )
        .margin(40)
        .x_label_area_size(60)
        .y_label_area_size(80)
        .build_cartesian_2d(first..next_month(last), 0i64..y_max)?;

    configure_month_mesh(&mut ctx, chart.ticks.len())?;

    for (idx, series) in chart.series.iter().enumerate() {
        let color = PALETTE[idx % PALETTE.len()];
        let points: Vec<(NaiveDate, i64)> = chart
            .ticks
            .iter()
            .zip(&series.values)
            .map(|(d, v)| (*d, *v as i64))
            .collect();

        ctx.draw_series(LineSeries::new(
            points.iter().copied(),
            ShapeStyle {
                color: color.to_rgba(),
                filled: true,
                stroke_width: 3,
            },
        ))?
        .label(series.name.as_str())
        .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 15, y + 5)], color.filled()));

        ctx.draw_series(
            points
                .iter()
                .map(|point| Circle::new(*point, 4, color.filled())),
        )?;
    }

    if chart.series.len() > 1 {
        ctx.configure_series_labels()
            .label_font((FONT_FAMILY, LABEL_SIZE).into_font().color(&TEXT_PRIMARY))
            .background_style(&BACKGROUND)
            .border_style(&GRID_COLOR)
            .margin(15)
            .draw()?;
    }

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    #[test]
    fn test_chart_y_range_covers_all_series() {
        let chart = Chart::new(
            "issues",
            "Issues",
            vec![date(2023, 1), date(2023, 2), date(2023, 3)],
            vec![
                Series::new("Opened", vec![1, 2, 8]),
                Series::new("Closed", vec![0, 3, 4]),
            ],
        )
        .unwrap();

        assert_eq!(chart.y_range, (0, 9));
    }

    #[test]
    fn test_chart_without_values_fails() {
        let err = Chart::new("empty", "Empty", Vec::new(), vec![Series::new("x", Vec::new())])
            .unwrap_err();
        assert!(matches!(err, AggregateError::EmptyInput { .. }));
    }
}

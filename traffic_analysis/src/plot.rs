//! SVG figure rendering for the analysis engines
//!
//! Every render draws into its own in-memory SVG canvas that is dropped
//! before the file is written, so no drawing state outlives a call.

use crate::error::{AnalysisError, Result};
use chrono::{Duration, NaiveDate};
use plotters::coord::Shift;
use plotters::prelude::*;
use std::fs;
use std::ops::Range;
use std::path::Path;

type DrawResult = std::result::Result<(), Box<dyn std::error::Error>>;

const CAPTION_FONT: (&str, u32) = ("sans-serif", 22);
const LABEL_FONT: (&str, u32) = ("sans-serif", 13);

/// One forecast period: date, mean and interval bounds
pub type ForecastPoint = (NaiveDate, f64, f64, f64);

/// Renders engine figures to SVG files
#[derive(Debug, Clone, Copy)]
pub struct FigureRenderer {
    width: u32,
    height: u32,
}

impl Default for FigureRenderer {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 600,
        }
    }
}

impl FigureRenderer {
    /// Create a renderer producing figures of the given size
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Observed series with peak markers and alternating date labels
    pub fn render_peaks(
        &self,
        path: &Path,
        title: &str,
        series: &[(NaiveDate, f64)],
        peaks: &[(NaiveDate, f64)],
    ) -> Result<()> {
        let axis = DateAxis::spanning(series.iter().map(|(d, _)| *d))?;
        let y_range = padded(series.iter().map(|(_, v)| *v));

        self.render_svg(path, |root| {
            let mut chart = ChartBuilder::on(root)
                .caption(title, CAPTION_FONT)
                .margin(16)
                .x_label_area_size(40)
                .y_label_area_size(60)
                .build_cartesian_2d(axis.range(), y_range)?;
            chart
                .configure_mesh()
                .x_labels(8)
                .x_label_formatter(&|x| axis.label(*x))
                .x_desc("Date")
                .y_desc("Normalized views")
                .draw()?;

            chart
                .draw_series(LineSeries::new(
                    series.iter().map(|(d, v)| (axis.x(*d), *v)),
                    &BLUE,
                ))?
                .label("Smoothed views")
                .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

            // Alternate label offsets so neighbouring dates do not overlap
            chart
                .draw_series(peaks.iter().enumerate().map(|(i, (d, v))| {
                    let offset = if i % 2 == 0 { -22 } else { 10 };
                    EmptyElement::at((axis.x(*d), *v))
                        + Circle::new((0, 0), 4, RED.filled())
                        + Text::new(d.format("%Y-%m-%d").to_string(), (-30, offset), LABEL_FONT)
                }))?
                .label("Peaks")
                .legend(|(x, y)| Circle::new((x + 10, y), 4, RED.filled()));

            chart
                .configure_series_labels()
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()?;
            root.present()?;
            Ok(())
        })
    }

    /// Autocorrelation stems by lag
    pub fn render_correlogram(&self, path: &Path, title: &str, acf: &[f64]) -> Result<()> {
        let x_max = acf.len().max(2) as f64;
        let y_low = acf.iter().copied().fold(0.0f64, f64::min).min(-0.1) - 0.05;

        self.render_svg(path, |root| {
            let mut chart = ChartBuilder::on(root)
                .caption(title, CAPTION_FONT)
                .margin(16)
                .x_label_area_size(40)
                .y_label_area_size(60)
                .build_cartesian_2d(-0.5f64..x_max, y_low..1.05f64)?;
            chart
                .configure_mesh()
                .x_desc("Lag")
                .y_desc("Auto-correlation")
                .draw()?;

            chart.draw_series(acf.iter().enumerate().map(|(lag, r)| {
                PathElement::new(vec![(lag as f64, 0.0), (lag as f64, *r)], BLUE.stroke_width(2))
            }))?;
            chart.draw_series(
                acf.iter()
                    .enumerate()
                    .map(|(lag, r)| Circle::new((lag as f64, *r), 3, BLUE.filled())),
            )?;
            chart.draw_series(LineSeries::new(vec![(-0.5, 0.0), (x_max, 0.0)], &BLACK))?;

            root.present()?;
            Ok(())
        })
    }

    /// Two pages of one subject on a shared date axis
    pub fn render_pair(
        &self,
        path: &Path,
        title: &str,
        first: (&str, &[(NaiveDate, f64)]),
        second: (&str, &[(NaiveDate, f64)]),
    ) -> Result<()> {
        let axis = DateAxis::spanning(first.1.iter().chain(second.1).map(|(d, _)| *d))?;
        let y_range = padded(first.1.iter().chain(second.1).map(|(_, v)| *v));

        self.render_svg(path, |root| {
            let mut chart = ChartBuilder::on(root)
                .caption(title, CAPTION_FONT)
                .margin(16)
                .x_label_area_size(40)
                .y_label_area_size(60)
                .build_cartesian_2d(axis.range(), y_range)?;
            chart
                .configure_mesh()
                .x_labels(8)
                .x_label_formatter(&|x| axis.label(*x))
                .x_desc("Date")
                .y_desc("Standardized views")
                .draw()?;

            for ((label, points), color) in [first, second].into_iter().zip([BLUE, RED]) {
                chart
                    .draw_series(LineSeries::new(
                        points.iter().map(|(d, v)| (axis.x(*d), *v)),
                        &color,
                    ))?
                    .label(label)
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
            }

            chart
                .configure_series_labels()
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()?;
            root.present()?;
            Ok(())
        })
    }

    /// Observed history, forecast mean and shaded confidence band
    pub fn render_forecast(
        &self,
        path: &Path,
        title: &str,
        observed: &[(NaiveDate, f64)],
        forecast: &[ForecastPoint],
        annotation: &str,
    ) -> Result<()> {
        let axis = DateAxis::spanning(
            observed
                .iter()
                .map(|(d, _)| *d)
                .chain(forecast.iter().map(|p| p.0)),
        )?;
        let y_range = padded(
            observed
                .iter()
                .map(|(_, v)| *v)
                .chain(forecast.iter().flat_map(|p| [p.2, p.3])),
        );

        self.render_svg(path, |root| {
            let mut chart = ChartBuilder::on(root)
                .caption(title, CAPTION_FONT)
                .margin(16)
                .x_label_area_size(40)
                .y_label_area_size(70)
                .build_cartesian_2d(axis.range(), y_range)?;
            chart
                .configure_mesh()
                .x_labels(8)
                .x_label_formatter(&|x| axis.label(*x))
                .x_desc("Date")
                .y_desc("Views")
                .draw()?;

            chart
                .draw_series(LineSeries::new(
                    observed.iter().map(|(d, v)| (axis.x(*d), *v)),
                    &BLUE,
                ))?
                .label("Observed")
                .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

            // Confidence band as one closed polygon
            let band: Vec<(f64, f64)> = forecast
                .iter()
                .map(|p| (axis.x(p.0), p.3))
                .chain(forecast.iter().rev().map(|p| (axis.x(p.0), p.2)))
                .collect();
            chart.draw_series(std::iter::once(Polygon::new(band, RED.mix(0.15).filled())))?;

            chart
                .draw_series(LineSeries::new(
                    forecast.iter().map(|p| (axis.x(p.0), p.1)),
                    &RED,
                ))?
                .label("Forecast")
                .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));

            chart
                .configure_series_labels()
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()?;
            draw_annotation(root, annotation)?;
            root.present()?;
            Ok(())
        })
    }

    /// Train, test and rolling forecast series with the split marked
    pub fn render_rolling(
        &self,
        path: &Path,
        title: &str,
        train: &[(NaiveDate, f64)],
        test: &[(NaiveDate, f64)],
        forecast: &[(NaiveDate, f64)],
        annotation: &str,
    ) -> Result<()> {
        let all = || train.iter().chain(test).chain(forecast);
        let axis = DateAxis::spanning(all().map(|(d, _)| *d))?;
        let y_range = padded(all().map(|(_, v)| *v));

        self.render_svg(path, |root| {
            let mut chart = ChartBuilder::on(root)
                .caption(title, CAPTION_FONT)
                .margin(16)
                .x_label_area_size(40)
                .y_label_area_size(70)
                .build_cartesian_2d(axis.range(), y_range.clone())?;
            chart
                .configure_mesh()
                .x_labels(8)
                .x_label_formatter(&|x| axis.label(*x))
                .x_desc("Date")
                .y_desc("Views")
                .draw()?;

            let layers = [
                ("Train", train, BLUE),
                ("Test", test, GREEN),
                ("Forecast", forecast, RED),
            ];
            for (label, points, color) in layers {
                chart
                    .draw_series(LineSeries::new(
                        points.iter().map(|(d, v)| (axis.x(*d), *v)),
                        &color,
                    ))?
                    .label(label)
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
            }

            // Vertical marker at the train/test boundary
            if let Some((boundary, _)) = test.first() {
                let x = axis.x(*boundary);
                chart.draw_series(std::iter::once(PathElement::new(
                    vec![(x, y_range.start), (x, y_range.end)],
                    BLACK.stroke_width(1),
                )))?;
            }

            chart
                .configure_series_labels()
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()?;
            draw_annotation(root, annotation)?;
            root.present()?;
            Ok(())
        })
    }

    fn render_svg<F>(&self, path: &Path, draw: F) -> Result<()>
    where
        F: FnOnce(&DrawingArea<SVGBackend<'_>, Shift>) -> DrawResult,
    {
        let mut svg = String::new();
        {
            let root = SVGBackend::with_string(&mut svg, (self.width, self.height))
                .into_drawing_area();
            root.fill(&WHITE)
                .map_err(|e| AnalysisError::Plot(e.to_string()))?;
            draw(&root).map_err(|e| AnalysisError::Plot(e.to_string()))?;
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| AnalysisError::persistence(parent, e))?;
        }
        fs::write(path, svg).map_err(|e| AnalysisError::persistence(path, e))
    }
}

fn draw_annotation(root: &DrawingArea<SVGBackend<'_>, Shift>, annotation: &str) -> DrawResult {
    for (i, line) in annotation.lines().enumerate() {
        root.draw(&Text::new(
            line.to_string(),
            (90, 50 + 16 * i as i32),
            LABEL_FONT,
        ))?;
    }
    Ok(())
}

/// Maps dates to day offsets from the earliest date
struct DateAxis {
    origin: NaiveDate,
    span: f64,
}

impl DateAxis {
    fn spanning(dates: impl Iterator<Item = NaiveDate>) -> Result<Self> {
        let (min, max) = dates.fold((None, None), |(lo, hi): (Option<NaiveDate>, Option<NaiveDate>), d| {
            (
                Some(lo.map_or(d, |lo| lo.min(d))),
                Some(hi.map_or(d, |hi| hi.max(d))),
            )
        });
        match (min, max) {
            (Some(origin), Some(last)) => Ok(Self {
                origin,
                span: (last - origin).num_days() as f64,
            }),
            _ => Err(AnalysisError::Plot("Nothing to plot".to_string())),
        }
    }

    fn x(&self, date: NaiveDate) -> f64 {
        (date - self.origin).num_days() as f64
    }

    fn range(&self) -> Range<f64> {
        0.0..self.span.max(1.0)
    }

    fn label(&self, x: f64) -> String {
        let date = self.origin + Duration::days(x.round() as i64);
        date.format("%Y-%m-%d").to_string()
    }
}

/// Value range with a little headroom; never degenerate
fn padded(values: impl Iterator<Item = f64>) -> Range<f64> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if !lo.is_finite() || !hi.is_finite() {
        return 0.0..1.0;
    }
    let pad = ((hi - lo) * 0.05).max(1e-6);
    if hi - lo < 1e-9 {
        return (lo - 1.0)..(hi + 1.0);
    }
    (lo - pad)..(hi + pad)
}

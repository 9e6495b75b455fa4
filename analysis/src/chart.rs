use crate::{stats::QueryGroups, ReportError};
use plotters::prelude::*;
use std::{fs, path::Path};
use svg2pdf::usvg;

const CHART_SIZE: (u32, u32) = (1200, 720);

/// Render one box per query group into a PDF document at `path`
pub fn render_boxplot(
    path: &Path,
    title: &str,
    subtitle: &str,
    groups: &QueryGroups,
) -> Result<(), ReportError> {
    if groups.is_empty() {
        return Err(ReportError::EmptyRun);
    }

    let mut svg = String::new();
    draw_boxplot(&mut svg, title, subtitle, groups)?;

    let pdf = svg_to_pdf(&svg)?;
    fs::write(path, pdf)?;

    Ok(())
}

fn draw_boxplot(
    buffer: &mut String,
    title: &str,
    subtitle: &str,
    groups: &QueryGroups,
) -> Result<(), ReportError> {
    let labels = groups
        .keys()
        .map(|query_num| format!("Query {}", query_num + 1))
        .collect::<Vec<_>>();
    let quartiles = groups
        .values()
        .map(|durations| Quartiles::new(durations.as_slice()))
        .collect::<Vec<_>>();

    let highest = groups
        .values()
        .flatten()
        .copied()
        .fold(0f64, f64::max) as f32;
    // leave some headroom above the highest whisker
    let upper = if highest > 0.0 { highest * 1.1 } else { 1.0 };

    let root = SVGBackend::with_string(buffer, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(render_error)?;
    let area = root.titled(title, ("sans-serif", 24)).map_err(render_error)?;

    let mut chart = ChartBuilder::on(&area)
        .caption(subtitle, ("sans-serif", 16))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(labels[..].into_segmented(), 0f32..upper)
        .map_err(render_error)?;

    chart
        .configure_mesh()
        .x_label_formatter(&|value| match value {
            SegmentValue::CenterOf(label) | SegmentValue::Exact(label) => label.to_string(),
            SegmentValue::Last => String::new(),
        })
        .y_desc("Duration (ms)")
        .draw()
        .map_err(render_error)?;

    chart
        .draw_series(
            labels
                .iter()
                .zip(quartiles.iter())
                .map(|(label, quartiles)| {
                    Boxplot::new_vertical(SegmentValue::CenterOf(label), quartiles)
                }),
        )
        .map_err(render_error)?;

    root.present().map_err(render_error)?;

    Ok(())
}

/// Text is laid out with the fonts installed on the host
fn svg_to_pdf(svg: &str) -> Result<Vec<u8>, ReportError> {
    let mut options = usvg::Options::default();
    options.fontdb_mut().load_system_fonts();

    let tree = usvg::Tree::from_str(svg, &options).map_err(render_error)?;

    svg2pdf::to_pdf(
        &tree,
        svg2pdf::ConversionOptions::default(),
        svg2pdf::PageOptions::default(),
    )
    .map_err(|e| ReportError::Render(format!("{e:?}")))
}

fn render_error<E: std::fmt::Display>(error: E) -> ReportError {
    ReportError::Render(error.to_string())
}

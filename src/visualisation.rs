use anyhow::{Context, Result};
use colorgrad::Gradient;
use ndarray::Array2;
use plotters::prelude::*;
use tracing::debug;

/// Renders displacement grids to PNG frames with a diverging colour map over a
/// fixed value window, so frame brightness is comparable across the run.
pub struct FieldVisualiser {
    output_dir: String,
    width: u32,
    height: u32,
    value_range: f64,
    gradient: Box<dyn Gradient>,
}

impl FieldVisualiser {
    pub fn new(output_dir: &str, width: u32, height: u32, value_range: f64) -> Result<Self> {
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("failed to create output directory '{}'", output_dir))?;

        let gradient = Box::new(colorgrad::preset::rd_bu());

        Ok(Self {
            output_dir: output_dir.to_string(),
            width,
            height,
            value_range,
            gradient,
        })
    }

    pub fn plot_field(&self, data: &Array2<f64>, timestep: usize, time: f64) -> Result<()> {
        let filename = format!("{}/wave_{:06}.png", self.output_dir, timestep);
        let root = BitMapBackend::new(&filename, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE)?;

        let (nx, ny) = data.dim();
        let title = format!("displacement at t={:.3}s (step {})", time, timestep);
        let mut chart = ChartBuilder::on(&root)
            .caption(&title, ("sans-serif", 30))
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(40)
            .build_cartesian_2d(0..nx, 0..ny)?;

        chart
            .configure_mesh()
            .x_desc("x (grid points)")
            .y_desc("y (grid points)")
            .draw()?;

        chart.draw_series(
            (0..nx)
                .flat_map(|i| (0..ny).map(move |j| (i, j)))
                .map(|(i, j)| {
                    let color = self.value_to_color(data[[i, j]]);
                    Rectangle::new([(i, j), (i + 1, j + 1)], color.filled())
                }),
        )?;

        root.present()?;
        debug!(%filename, "saved frame");
        Ok(())
    }

    fn value_to_color(&self, value: f64) -> RGBColor {
        let normalized = ((value + self.value_range) / (2.0 * self.value_range)).clamp(0.0, 1.0);
        // rd_bu runs warm to cool; flip it so negative displacement reads blue
        let rgba = self.gradient.at(1.0 - normalized as f32).to_rgba8();
        RGBColor(rgba[0], rgba[1], rgba[2])
    }
}

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use acoustic_wave_sim::config::Config;
use acoustic_wave_sim::simulation::Simulation;
use acoustic_wave_sim::visualisation::FieldVisualiser;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)?,
        None => Config::default(),
    };
    config.log_summary();

    let mut sim = Simulation::new(
        config.grid.grid(),
        config.simulation.params(),
        config.source_sets(),
        config.drive.frequency,
        config.drive.phase,
        &config.drive.active_set,
    )?;

    let vis = &config.visualisation;
    let visualiser = FieldVisualiser::new(&vis.output_dir, vis.image_width, vis.image_height, vis.value_range)?;

    let nt = config.simulation.nt();
    sim.run_with_visualisation(
        nt,
        config.simulation.report_period,
        vis.frame_interval(nt),
        &visualiser,
    );

    info!(dir = %vis.output_dir, "frames saved");
    Ok(())
}

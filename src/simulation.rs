use crate::grid::Grid;
use crate::sources::{Drive, SourceSet};
use crate::visualisation::FieldVisualiser;
use crate::wavefield::Wavefield;
use anyhow::{anyhow, Result};
use ndarray::Array2;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SimulationParams {
    pub wave_speed: f64,       // c (m/s)
    pub dt: f64,               // Time step (seconds)
    pub amplitude: f64,        // Drive amplitude, fixed for the run
    pub damping_region: usize, // Width of the border damping band (cells)
    pub damping_factor: f64,   // Multiplicative attenuation per step, in (0, 1]
}

impl SimulationParams {
    /// Courant number `c·dt/dx`. Values above 1 make the scheme unstable.
    pub fn cfl_number(&self, dx: f64) -> f64 {
        self.wave_speed * self.dt / dx
    }

    /// Propagation coefficient `r = (c·dt/dx)²` used by the stencil.
    pub fn propagation_coefficient(&self, dx: f64) -> f64 {
        self.cfl_number(dx).powi(2)
    }
}

#[derive(Debug, Clone, Copy)]
struct ControlState {
    frequency: f64,
    phase: f64,
    active_set: usize,
}

/// Handle for mutating the drive frequency, phase and the active source set
/// while the simulation runs. Clones share state; [`Simulation::step`] reads a
/// single snapshot per call, so writes from another thread land between steps.
#[derive(Clone)]
pub struct Controls {
    state: Arc<Mutex<ControlState>>,
    set_names: Arc<Vec<String>>,
}

impl Controls {
    fn new(frequency: f64, phase: f64, active_set: usize, set_names: Vec<String>) -> Self {
        Controls {
            state: Arc::new(Mutex::new(ControlState {
                frequency,
                phase,
                active_set,
            })),
            set_names: Arc::new(set_names),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().expect("control state lock poisoned")
    }

    fn snapshot(&self) -> ControlState {
        *self.lock()
    }

    pub fn frequency(&self) -> f64 {
        self.lock().frequency
    }

    pub fn phase(&self) -> f64 {
        self.lock().phase
    }

    pub fn active_set_name(&self) -> &str {
        let idx = self.lock().active_set;
        &self.set_names[idx]
    }

    pub fn set_frequency(&self, hertz: f64) {
        self.lock().frequency = hertz;
    }

    pub fn set_phase(&self, radians: f64) {
        self.lock().phase = radians;
    }

    /// Switch the active source set. An unknown name is an error and leaves
    /// the current selection in place.
    pub fn select_set(&self, name: &str) -> Result<()> {
        let idx = self
            .set_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| anyhow!("unknown source set '{}'", name))?;
        self.lock().active_set = idx;
        Ok(())
    }
}

pub struct Simulation {
    grid: Grid,
    params: SimulationParams,
    r: f64,
    source_sets: Vec<SourceSet>,
    controls: Controls,
    field: Wavefield,
    timestep: usize,
}

impl Simulation {
    pub fn new(
        grid: Grid,
        params: SimulationParams,
        source_sets: Vec<SourceSet>,
        frequency: f64,
        phase: f64,
        initial_set: &str,
    ) -> Result<Self> {
        if grid.nx < 3 || grid.ny < 3 {
            return Err(anyhow!(
                "grid must be at least 3x3 for the boundary stencils (nx={}, ny={})",
                grid.nx,
                grid.ny
            ));
        }
        if !(grid.dx > 0.0) || !(grid.dy > 0.0) {
            return Err(anyhow!(
                "grid spacing must be positive (dx={}, dy={})",
                grid.dx,
                grid.dy
            ));
        }
        if !(params.dt > 0.0) {
            return Err(anyhow!("time step must be positive, got {}", params.dt));
        }
        if !params.amplitude.is_finite() {
            return Err(anyhow!("amplitude must be finite, got {}", params.amplitude));
        }
        if !(params.damping_factor > 0.0 && params.damping_factor <= 1.0) {
            return Err(anyhow!(
                "damping factor must be in (0, 1], got {}",
                params.damping_factor
            ));
        }
        if source_sets.is_empty() {
            return Err(anyhow!("at least one source set must be defined"));
        }
        for (idx, set) in source_sets.iter().enumerate() {
            if set.points.is_empty() {
                return Err(anyhow!("source set '{}' has no points", set.name));
            }
            if source_sets[..idx].iter().any(|s| s.name == set.name) {
                return Err(anyhow!("duplicate source set name '{}'", set.name));
            }
            for p in &set.points {
                if !grid.in_bounds(p.x, p.y) {
                    return Err(anyhow!(
                        "source at ({}, {}) in set '{}' is outside grid bounds ({}, {})",
                        p.x,
                        p.y,
                        set.name,
                        grid.nx,
                        grid.ny
                    ));
                }
            }
        }
        let active = source_sets
            .iter()
            .position(|s| s.name == initial_set)
            .ok_or_else(|| anyhow!("unknown initial source set '{}'", initial_set))?;

        let r = params.propagation_coefficient(grid.dx);
        if r > 1.0 {
            // Known gap: an unstable coefficient grows without bound, but the
            // run is allowed to proceed.
            warn!(
                cfl = params.cfl_number(grid.dx),
                r, "propagation coefficient exceeds 1; scheme is unstable"
            );
        }

        let mut field = Wavefield::new(grid.nx, grid.ny);
        let drive = Drive {
            amplitude: params.amplitude,
            frequency,
            phase,
        };
        let initial_value = drive.sample(0.0);
        for p in &source_sets[active].points {
            field.curr[[p.x, p.y]] = initial_value;
        }

        let set_names = source_sets.iter().map(|s| s.name.clone()).collect();
        let controls = Controls::new(frequency, phase, active, set_names);

        Ok(Self {
            grid,
            params,
            r,
            source_sets,
            controls,
            field,
            timestep: 0,
        })
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    /// Shared handle for runtime parameter changes.
    pub fn controls(&self) -> Controls {
        self.controls.clone()
    }

    pub fn timestep(&self) -> usize {
        self.timestep
    }

    pub fn current_time(&self) -> f64 {
        self.timestep as f64 * self.params.dt
    }

    /// Read-only view of the current displacement grid, valid between steps.
    pub fn displacement(&self) -> &Array2<f64> {
        &self.field.curr
    }

    /// Advance the field by one time step: interior stencil, source forcing,
    /// edge damping, edge smoothing, buffer rotation, in that order.
    pub fn step(&mut self) {
        let ctl = self.controls.snapshot();
        let t = self.current_time();
        let drive = Drive {
            amplitude: self.params.amplitude,
            frequency: ctl.frequency,
            phase: ctl.phase,
        };

        let field = &mut self.field;
        Self::update_interior(&field.prev, &field.curr, &mut field.next, self.r);
        Self::apply_sources(&mut field.next, &self.source_sets[ctl.active_set], &drive, t);
        Self::apply_damping(
            &mut field.next,
            self.params.damping_region,
            self.params.damping_factor,
        );
        Self::smooth_edges(&mut field.next);
        field.rotate();
        self.timestep += 1;
    }

    // next = 2·curr − prev + r·(curr[i+1,j] + curr[i−1,j] + curr[i,j+1] +
    // curr[i,j−1] − 4·curr[i,j]), interior cells only. Border lines are left
    // for the smoothing pass.
    fn update_interior(prev: &Array2<f64>, curr: &Array2<f64>, next: &mut Array2<f64>, r: f64) {
        let (nx, ny) = curr.dim();
        for i in 1..nx - 1 {
            for j in 1..ny - 1 {
                next[[i, j]] = 2.0 * curr[[i, j]] - prev[[i, j]]
                    + r * (curr[[i + 1, j]] + curr[[i - 1, j]] + curr[[i, j + 1]]
                        + curr[[i, j - 1]]
                        - 4.0 * curr[[i, j]]);
            }
        }
    }

    fn apply_sources(next: &mut Array2<f64>, set: &SourceSet, drive: &Drive, t: f64) {
        let value = drive.sample(t);
        for p in &set.points {
            next[[p.x, p.y]] = value;
        }
    }

    // Blanket attenuation of the border band. Runs after forcing, so a source
    // sitting inside the band is damped like any other cell.
    fn apply_damping(next: &mut Array2<f64>, region: usize, factor: f64) {
        let (nx, ny) = next.dim();
        for i in 0..nx {
            for j in 0..ny {
                if i < region || i + region >= nx || j < region || j + region >= ny {
                    next[[i, j]] *= factor;
                }
            }
        }
    }

    // Overwrite the four border lines with 2-point averages of their interior
    // neighbours, in place and in a fixed order. The column passes read rows
    // already smoothed above them, so the corners reflect the smoothed rows
    // rather than raw neighbour averages; the ordering is part of the output
    // contract and must not be rearranged.
    fn smooth_edges(next: &mut Array2<f64>) {
        let (nx, ny) = next.dim();
        for j in 0..ny {
            next[[0, j]] = (next[[1, j]] + next[[2, j]]) / 2.0;
        }
        for j in 0..ny {
            next[[nx - 1, j]] = (next[[nx - 2, j]] + next[[nx - 3, j]]) / 2.0;
        }
        for i in 0..nx {
            next[[i, 0]] = (next[[i, 1]] + next[[i, 2]]) / 2.0;
        }
        for i in 0..nx {
            next[[i, ny - 1]] = (next[[i, ny - 2]] + next[[i, ny - 3]]) / 2.0;
        }
    }

    pub fn run(&mut self, nt: usize, report_period: usize) {
        info!(
            nx = self.grid.nx,
            ny = self.grid.ny,
            dt = self.params.dt,
            nt,
            "starting simulation"
        );
        let stride = (nt / report_period.max(1)).max(1);
        while self.timestep < nt {
            self.step();
            if self.timestep % stride == 0 {
                info!(
                    step = self.timestep,
                    total = nt,
                    time = self.current_time(),
                    "progress"
                );
            }
        }
        info!("simulation complete");
    }

    pub fn run_with_visualisation(
        &mut self,
        nt: usize,
        report_period: usize,
        frame_interval: usize,
        visualiser: &FieldVisualiser,
    ) {
        info!(
            nx = self.grid.nx,
            ny = self.grid.ny,
            dt = self.params.dt,
            nt,
            frame_interval,
            "starting simulation with visualisation"
        );
        self.render_frame(visualiser);
        let stride = (nt / report_period.max(1)).max(1);
        let frame_interval = frame_interval.max(1);
        while self.timestep < nt {
            self.step();
            if self.timestep % frame_interval == 0 {
                self.render_frame(visualiser);
            }
            if self.timestep % stride == 0 {
                info!(
                    step = self.timestep,
                    total = nt,
                    time = self.current_time(),
                    "progress"
                );
            }
        }
        info!("simulation complete");
    }

    fn render_frame(&self, visualiser: &FieldVisualiser) {
        if let Err(e) = visualiser.plot_field(&self.field.curr, self.timestep, self.current_time())
        {
            warn!(step = self.timestep, error = %e, "failed to render frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourcePoint;
    use std::f64::consts::FRAC_PI_2;

    fn params(
        wave_speed: f64,
        dt: f64,
        amplitude: f64,
        damping_region: usize,
        damping_factor: f64,
    ) -> SimulationParams {
        SimulationParams {
            wave_speed,
            dt,
            amplitude,
            damping_region,
            damping_factor,
        }
    }

    fn single_source_sim(
        n: usize,
        sx: usize,
        sy: usize,
        p: SimulationParams,
        frequency: f64,
        phase: f64,
    ) -> Simulation {
        let grid = Grid::new(n, n, 1.0, 1.0);
        let sets = vec![SourceSet::new("main", vec![SourcePoint { x: sx, y: sy }])];
        Simulation::new(grid, p, sets, frequency, phase, "main").unwrap()
    }

    #[test]
    fn zero_amplitude_field_stays_exactly_zero() {
        let mut sim = single_source_sim(16, 8, 8, params(1.0, 0.5, 0.0, 3, 0.9), 440.0, 0.7);
        for _ in 0..50 {
            sim.step();
        }
        assert!(sim.displacement().iter().all(|&v| v == 0.0));
        assert!(sim.field.prev.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn replay_is_bit_identical() {
        let build = || {
            let grid = Grid::new(24, 24, 1.0, 1.0);
            let sets = vec![SourceSet::new("main", vec![SourcePoint { x: 12, y: 7 }])];
            Simulation::new(grid, params(1.0, 0.4, 1.5, 4, 0.9), sets, 3.0, 0.4, "main").unwrap()
        };
        let mut a = build();
        let mut b = build();
        for _ in 0..40 {
            a.step();
            b.step();
        }
        assert_eq!(a.displacement(), b.displacement());
        assert_eq!(a.field.prev, b.field.prev);
    }

    #[test]
    fn damping_band_decays_toward_zero() {
        let mut buf = Array2::from_elem((10, 10), 1.0);
        let mut last = 1.0_f64;
        for k in 1..=5 {
            Simulation::apply_damping(&mut buf, 3, 0.9);
            let v = buf[[0, 0]];
            assert!(v.abs() < last.abs());
            assert!((buf[[2, 5]] - 0.9_f64.powi(k)).abs() < 1e-15);
            last = v;
        }
        // cells outside the band are untouched
        assert_eq!(buf[[5, 5]], 1.0);
        assert_eq!(buf[[3, 3]], 1.0);
        assert_eq!(buf[[6, 4]], 1.0);
    }

    #[test]
    fn centered_source_field_is_symmetric() {
        // r = 0.25; after four steps the wavefront is still well inside the
        // border, so smoothing only rewrites zeros. Mirroring in x swaps the
        // first two stencil operands, a single commutative addition, so that
        // reflection is bit-exact; mirroring in y reassociates the sum and is
        // only exact up to rounding.
        let n = 21;
        let mut sim = single_source_sim(n, 10, 10, params(0.5, 1.0, 1.5, 0, 0.9), 2.0, 0.3);
        for _ in 0..4 {
            sim.step();
        }
        let u = sim.displacement();
        for i in 0..n {
            for j in 0..n {
                assert_eq!(u[[i, j]], u[[n - 1 - i, j]]);
                assert!((u[[i, j]] - u[[i, n - 1 - j]]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn edge_smoothing_order_fixes_the_corners() {
        let mut buf = Array2::from_shape_fn((5, 5), |(i, j)| (5 * i + j) as f64);
        Simulation::smooth_edges(&mut buf);

        // row passes first: row0[j] = 7.5 + j, row4[j] = 12.5 + j
        assert_eq!(buf[[0, 2]], 9.5);
        assert_eq!(buf[[4, 2]], 14.5);
        // column passes read the already-smoothed rows
        assert_eq!(buf[[0, 0]], 9.0);
        assert_eq!(buf[[4, 0]], 14.0);
        assert_eq!(buf[[0, 4]], 10.0);
        assert_eq!(buf[[2, 0]], 11.5);
        assert_eq!(buf[[2, 4]], 12.5);
        // bottom-right corner averages the bottom-row-smoothed columns; the
        // raw neighbour average would give 22.5
        assert_eq!(buf[[4, 4]], 15.0);
    }

    #[test]
    fn zero_drive_baseline_stays_inert() {
        // 5x5, r = 1, constant zero forcing: the Laplacian of a zero field and
        // the drive are both zero, so one step changes nothing.
        let mut sim = single_source_sim(5, 2, 2, params(1.0, 1.0, 1.0, 0, 0.9), 0.0, 0.0);
        sim.step();
        assert!(sim.displacement().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn switching_source_sets_moves_the_forcing() {
        let grid = Grid::new(9, 9, 1.0, 1.0);
        let sets = vec![
            SourceSet::new("piezo", vec![SourcePoint { x: 4, y: 4 }]),
            SourceSet::new("speaker", vec![SourcePoint { x: 6, y: 6 }]),
        ];
        // f = 0 with phase π/2 gives a constant drive value
        let p = params(0.5, 1.0, 1.0, 0, 0.9); // r = 0.25
        let mut sim = Simulation::new(grid, p, sets, 0.0, FRAC_PI_2, "piezo").unwrap();
        let forced = FRAC_PI_2.sin();

        sim.step();
        assert_eq!(sim.displacement()[[4, 4]], forced);

        sim.controls().select_set("speaker").unwrap();
        sim.step();
        let u = sim.displacement();
        // the new set is forced from this step onward
        assert_eq!(u[[6, 6]], forced);
        // the old location reverts to the stencil value: each neighbour holds
        // r·v, so 2v − v + r·(4·r·v − 4v) = 0.25·v
        assert!((u[[4, 4]] - 0.25 * forced).abs() < 1e-12);
    }

    #[test]
    fn clock_advances_one_step_per_call() {
        let mut sim = single_source_sim(8, 4, 4, params(1.0, 0.5, 1.0, 0, 0.9), 10.0, 0.0);
        assert_eq!(sim.current_time(), 0.0);
        sim.step();
        sim.step();
        sim.step();
        assert_eq!(sim.timestep(), 3);
        assert_eq!(sim.current_time(), 1.5);
    }

    #[test]
    fn rotation_keeps_the_previous_time_level() {
        let mut sim = single_source_sim(12, 6, 6, params(1.0, 0.5, 1.5, 2, 0.9), 5.0, 0.1);
        sim.step();
        let after_one = sim.displacement().clone();
        sim.step();
        assert_eq!(sim.field.prev, after_one);
    }

    #[test]
    fn initial_condition_forces_active_set_at_t_zero() {
        let grid = Grid::new(12, 12, 1.0, 1.0);
        let sets = vec![SourceSet::new(
            "pair",
            vec![SourcePoint { x: 3, y: 4 }, SourcePoint { x: 3, y: 8 }],
        )];
        let sim = Simulation::new(
            grid,
            params(1.0, 0.5, 1.5, 0, 0.9),
            sets,
            100.0,
            FRAC_PI_2,
            "pair",
        )
        .unwrap();
        let expected = 1.5 * FRAC_PI_2.sin();
        assert_eq!(sim.displacement()[[3, 4]], expected);
        assert_eq!(sim.displacement()[[3, 8]], expected);
        assert_eq!(sim.displacement()[[0, 0]], 0.0);
    }

    #[test]
    fn runtime_control_changes_take_effect_next_step() {
        let mut sim = single_source_sim(15, 7, 7, params(1.0, 0.5, 1.0, 0, 0.9), 0.0, 0.0);
        let controls = sim.controls();
        sim.step();
        assert_eq!(sim.displacement()[[7, 7]], 0.0);

        controls.set_phase(FRAC_PI_2);
        sim.step();
        assert_eq!(sim.displacement()[[7, 7]], FRAC_PI_2.sin());

        assert_eq!(controls.phase(), FRAC_PI_2);
        assert_eq!(controls.frequency(), 0.0);
        assert_eq!(controls.active_set_name(), "main");
        assert!(controls.select_set("nonexistent").is_err());
        assert_eq!(controls.active_set_name(), "main");
    }

    #[test]
    fn construction_rejects_bad_parameters() {
        let ok = params(1.0, 1.0, 1.0, 0, 0.9);
        let set = vec![SourceSet::new("main", vec![SourcePoint { x: 2, y: 2 }])];

        // grid too small for the boundary stencils
        let r = Simulation::new(
            Grid::new(2, 5, 1.0, 1.0),
            ok.clone(),
            set.clone(),
            1.0,
            0.0,
            "main",
        );
        assert!(r.is_err());

        // non-positive time step
        let r = Simulation::new(
            Grid::new(5, 5, 1.0, 1.0),
            params(1.0, 0.0, 1.0, 0, 0.9),
            set.clone(),
            1.0,
            0.0,
            "main",
        );
        assert!(r.is_err());

        // empty source set list
        let r = Simulation::new(
            Grid::new(5, 5, 1.0, 1.0),
            ok.clone(),
            vec![],
            1.0,
            0.0,
            "main",
        );
        assert!(r.is_err());

        // set with no points
        let r = Simulation::new(
            Grid::new(5, 5, 1.0, 1.0),
            ok.clone(),
            vec![SourceSet::new("main", vec![])],
            1.0,
            0.0,
            "main",
        );
        assert!(r.is_err());

        // source outside the grid
        let r = Simulation::new(
            Grid::new(5, 5, 1.0, 1.0),
            ok.clone(),
            vec![SourceSet::new("main", vec![SourcePoint { x: 9, y: 9 }])],
            1.0,
            0.0,
            "main",
        );
        assert!(r.is_err());

        // unknown initial set
        let r = Simulation::new(
            Grid::new(5, 5, 1.0, 1.0),
            ok.clone(),
            set.clone(),
            1.0,
            0.0,
            "other",
        );
        assert!(r.is_err());

        // damping factor outside (0, 1]
        let r = Simulation::new(
            Grid::new(5, 5, 1.0, 1.0),
            params(1.0, 1.0, 1.0, 2, 0.0),
            set.clone(),
            1.0,
            0.0,
            "main",
        );
        assert!(r.is_err());

        // duplicate set names
        let r = Simulation::new(
            Grid::new(5, 5, 1.0, 1.0),
            ok,
            vec![
                SourceSet::new("main", vec![SourcePoint { x: 2, y: 2 }]),
                SourceSet::new("main", vec![SourcePoint { x: 3, y: 3 }]),
            ],
            1.0,
            0.0,
            "main",
        );
        assert!(r.is_err());
    }

    #[test]
    fn run_advances_to_the_requested_step() {
        let mut sim = single_source_sim(8, 4, 4, params(1.0, 0.5, 1.0, 2, 0.9), 10.0, 0.0);
        sim.run(10, 5);
        assert_eq!(sim.timestep(), 10);
        assert_eq!(sim.current_time(), 5.0);
    }

    #[test]
    fn cfl_helpers() {
        let p = params(343.0, 0.002, 1.5, 5, 0.9);
        let cfl = p.cfl_number(1.0);
        assert!((cfl - 0.686).abs() < 1e-12);
        assert!((p.propagation_coefficient(1.0) - cfl * cfl).abs() < 1e-15);
    }
}

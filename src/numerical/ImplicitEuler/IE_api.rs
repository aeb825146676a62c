//! Solver control framework: runs an integrator over the time frame of a model, writes outputs on a
//! schedule, keeps statistics and restart records.
//!
//! # Example
//! ```no_run
//! use RustedSolverFramework::Examples::ie_examples::DecayModel;
//! use RustedSolverFramework::numerical::ImplicitEuler::IE_api::SolverControlFramework;
//! use RustedSolverFramework::numerical::ImplicitEuler::IE_config::SolverConfig;
//!
//! let model = DecayModel::new(1.0, 1.0, 5.0);
//! let mut solver = SolverControlFramework::new(Box::new(model), SolverConfig::default());
//! solver.run().unwrap();
//! println!("y(5) = {:?}", solver.y());
//! ```
use log::info;
use std::fs::{File, OpenOptions, create_dir_all};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::numerical::ImplicitEuler::ADI_solver::IntegratorADI;
use crate::numerical::ImplicitEuler::IE_config::{RestartMode, SolverConfig};
use crate::numerical::ImplicitEuler::IE_errors::IntegratorError;
use crate::numerical::ImplicitEuler::IE_solver::{IntegratorImplicitEuler, IntegratorKind};
use crate::numerical::ImplicitEuler::model_interface::ModelInterface;

/// Output times are compared with this tolerance to catch outputs at the end of a step.
const OUTPUT_TIME_EPS: f64 = 1e-8;
pub const RESTART_FILE: &str = "restart.bin";

/// Decides at which times the driver writes outputs.
pub trait OutputScheduler {
    /// First output time after `t`, must be larger than `t`.
    fn next_output_time(&mut self, t: f64) -> f64;
}

/// Outputs at multiples of `interval` and at `t_end`. An interval of 0 gives outputs at `t_end` only.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedIntervalOutputScheduler {
    pub interval: f64,
    pub t_end: f64,
}

impl FixedIntervalOutputScheduler {
    pub fn new(interval: f64) -> Self {
        FixedIntervalOutputScheduler { interval, t_end: f64::INFINITY }
    }

    pub fn with_end(mut self, t_end: f64) -> Self {
        self.t_end = t_end;
        self
    }
}

impl OutputScheduler for FixedIntervalOutputScheduler {
    fn next_output_time(&mut self, t: f64) -> f64 {
        if !(self.interval > 0.0) {
            return if t < self.t_end { self.t_end } else { f64::INFINITY };
        }
        let next = ((t / self.interval + 1e-9).floor() + 1.0) * self.interval;
        if t < self.t_end && next > self.t_end { self.t_end } else { next }
    }
}

/// The integrators the driver can run.
pub enum Integrator {
    ImplicitEuler(IntegratorImplicitEuler),
    ADI(IntegratorADI),
}

macro_rules! with_integrator {
    ($self:expr, $i:ident => $body:expr) => {
        match $self {
            Integrator::ImplicitEuler($i) => $body,
            Integrator::ADI($i) => $body,
        }
    };
}

impl Integrator {
    pub fn new(config: &SolverConfig) -> Self {
        match config.integrator {
            IntegratorKind::ImplicitEuler => {
                Integrator::ImplicitEuler(IntegratorImplicitEuler::new(config.settings.clone()))
            }
            IntegratorKind::ADI => Integrator::ADI(IntegratorADI::new(config.settings.clone())),
        }
    }

    pub fn kind(&self) -> IntegratorKind {
        match self {
            Integrator::ImplicitEuler(_) => IntegratorKind::ImplicitEuler,
            Integrator::ADI(_) => IntegratorKind::ADI,
        }
    }

    /// Builds linear solver, preconditioner and Jacobian from `config` and initializes the integrator.
    pub fn init(
        &mut self,
        model: &mut dyn ModelInterface,
        t0: f64,
        y0: &[f64],
        config: &SolverConfig,
    ) -> Result<(), IntegratorError> {
        let les = config.build_les(model)?;
        let jacobian = config.build_jacobian(model)?;
        let precond = config.build_preconditioner();
        with_integrator!(self, i => i.init(model, t0, y0, les, precond, jacobian))
    }

    pub fn step(&mut self, model: &mut dyn ModelInterface) -> Result<(), IntegratorError> {
        with_integrator!(self, i => i.step(model))
    }

    pub fn t(&self) -> f64 {
        with_integrator!(self, i => i.t())
    }

    pub fn dt(&self) -> f64 {
        with_integrator!(self, i => i.dt())
    }

    pub fn y(&self) -> &[f64] {
        with_integrator!(self, i => i.y())
    }

    pub fn y_out(&mut self, t_out: f64) -> &[f64] {
        with_integrator!(self, i => i.y_out(t_out))
    }

    pub fn n_steps(&self) -> usize {
        with_integrator!(self, i => i.n_steps())
    }

    pub fn write_statistics_header(&mut self, dir: &Path, restart: bool) -> Result<(), IntegratorError> {
        with_integrator!(self, i => i.write_statistics_header(dir, restart))
    }

    pub fn write_statistics(&mut self) -> Result<(), IntegratorError> {
        with_integrator!(self, i => i.write_statistics())
    }

    pub fn write_metrics(&self, sim_time: f64) -> Vec<String> {
        with_integrator!(self, i => i.write_metrics(sim_time))
    }

    pub fn serialize(&self) -> Vec<u8> {
        with_integrator!(self, i => i.serialize())
    }

    pub fn deserialize(&mut self, data: &[u8]) -> Result<(), IntegratorError> {
        with_integrator!(self, i => i.deserialize(data))
    }
}

/// Appends one restart record: t, n, y (little endian).
pub fn append_restart_record(path: &Path, t: f64, y: &[f64]) -> Result<(), IntegratorError> {
    if let Some(dir) = path.parent() {
        create_dir_all(dir)?;
    }
    let mut record = Vec::with_capacity(16 + 8 * y.len());
    record.extend_from_slice(&t.to_le_bytes());
    record.extend_from_slice(&(y.len() as u64).to_le_bytes());
    for v in y {
        record.extend_from_slice(&v.to_le_bytes());
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&record)?;
    Ok(())
}

/// Reads the last restart record of a model with `n` unknowns.
pub fn read_last_restart_record(path: &Path, n: usize) -> Result<(f64, Vec<f64>), IntegratorError> {
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;
    let record_size = 16 + 8 * n;
    if data.is_empty() || data.len() % record_size != 0 {
        return Err(IntegratorError::Restart(format!(
            "restart file '{}' has {} bytes, which is no multiple of the record size {} for n = {}",
            path.display(),
            data.len(),
            record_size,
            n
        )));
    }
    let last = &data[data.len() - record_size..];
    let word = |k: usize| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&last[8 * k..8 * k + 8]);
        b
    };
    let t = f64::from_le_bytes(word(0));
    let stored_n = u64::from_le_bytes(word(1)) as usize;
    if stored_n != n {
        return Err(IntegratorError::Restart(format!("restart record of size {} for a model of size {}", stored_n, n)));
    }
    let y = (0..n).map(|k| f64::from_le_bytes(word(k + 2))).collect();
    Ok((t, y))
}

pub struct SolverControlFramework {
    model: Option<Box<dyn ModelInterface>>,
    pub config: SolverConfig,
    integrator: Option<Integrator>,
    scheduler: Option<Box<dyn OutputScheduler>>,
    restart_file: Option<PathBuf>,
    metrics: Vec<String>,
}

impl SolverControlFramework {
    pub fn new(model: Box<dyn ModelInterface>, config: SolverConfig) -> Self {
        let mut s = Self::empty(config);
        s.model = Some(model);
        s
    }

    /// framework without a model, `run` fails until `set_model` is called
    pub fn empty(config: SolverConfig) -> Self {
        let restart_file = config.output.log_dir.as_ref().map(|d| d.join(RESTART_FILE));
        SolverControlFramework { model: None, config, integrator: None, scheduler: None, restart_file, metrics: Vec::new() }
    }

    pub fn set_model(&mut self, model: Box<dyn ModelInterface>) {
        self.model = Some(model);
    }

    pub fn set_output_scheduler(&mut self, scheduler: Box<dyn OutputScheduler>) {
        self.scheduler = Some(scheduler);
    }

    pub fn set_restart_file(&mut self, path: Option<PathBuf>) {
        self.restart_file = path;
    }

    pub fn model(&self) -> Option<&dyn ModelInterface> {
        self.model.as_deref()
    }

    pub fn integrator(&self) -> Option<&Integrator> {
        self.integrator.as_ref()
    }

    pub fn t(&self) -> f64 {
        self.integrator.as_ref().map_or(f64::NAN, |i| i.t())
    }

    /// solution at the current time
    pub fn y(&self) -> Option<&[f64]> {
        self.integrator.as_ref().map(|i| i.y())
    }

    /// `key=value` metric lines of the last run
    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    /// Integrates from the initial state of the model to its end time.
    pub fn run(&mut self) -> Result<(), IntegratorError> {
        let model = self
            .model
            .as_deref_mut()
            .ok_or_else(|| IntegratorError::Config("no model given".to_string()))?;
        let (t0, y0) = (model.t0(), model.y0());
        if let Some(path) = &self.restart_file {
            if let Some(dir) = path.parent() {
                create_dir_all(dir)?;
            }
            File::create(path)?;
        }
        self.run_from(t0, &y0, false)
    }

    /// Continues from the last record of a restart file.
    pub fn restart_from(&mut self, path: &Path) -> Result<(), IntegratorError> {
        let model = self
            .model
            .as_deref()
            .ok_or_else(|| IntegratorError::Config("no model given".to_string()))?;
        let (t, y) = read_last_restart_record(path, model.n())?;
        info!("restarting from t = {} ({})", t, path.display());
        self.restart_file = Some(path.to_path_buf());
        self.run_from(t, &y, true)
    }

    fn run_from(&mut self, t_start: f64, y_start: &[f64], restarting: bool) -> Result<(), IntegratorError> {
        let SolverControlFramework { model, config, integrator, scheduler, restart_file, metrics } = self;
        let model = model
            .as_deref_mut()
            .ok_or_else(|| IntegratorError::Config("no model given".to_string()))?;
        let t_end = model.t_end();
        let scheduler = scheduler.get_or_insert_with(|| {
            Box::new(FixedIntervalOutputScheduler::new(config.output.interval).with_end(t_end)) as Box<dyn OutputScheduler>
        });
        let integrator = integrator.insert(Integrator::new(config));
        integrator.init(model, t_start, y_start, config)?;
        info!("running {} integrator from t = {} to t = {}", integrator.kind(), t_start, t_end);
        let watch = Instant::now();

        let mut t = t_start;
        let mut t_out = scheduler.next_output_time(t);
        model.step_completed(t, integrator.y_out(t));
        if !restarting {
            model.write_outputs(t, y_start);
        }
        if let Some(dir) = &config.output.log_dir {
            integrator.write_statistics_header(dir, restarting)?;
        }
        let restart_mode = config.output.restart;

        let mut had_final_restart = false;
        while t < t_end {
            integrator.step(model)?;
            t = integrator.t();
            model.step_completed(t, integrator.y_out(t));

            let mut had_output = false;
            while t_out <= t + OUTPUT_TIME_EPS {
                let y_out = integrator.y_out(t_out);
                model.write_outputs(t_out, y_out);
                if t_out + OUTPUT_TIME_EPS > t_end {
                    if let Some(path) = restart_file.as_deref() {
                        append_restart_record(path, t_end, y_out)?;
                    }
                    had_final_restart = true;
                }
                had_output = true;
                let t_next = scheduler.next_output_time(t_out);
                if t_next <= t_out {
                    return Err(IntegratorError::Config(format!(
                        "output scheduler returned output time {}, which is <= last output time {}",
                        t_next, t_out
                    )));
                }
                t_out = t_next;
                if t_next > t_end + OUTPUT_TIME_EPS {
                    break;
                }
            }

            if had_output || config.output.step_statistics {
                integrator.write_statistics()?;
            }
            if !had_final_restart && (had_output || t >= t_end) {
                if let Some(path) = restart_file.as_deref() {
                    if t >= t_end {
                        append_restart_record(path, t_end, integrator.y_out(t_end))?;
                    } else if restart_mode != RestartMode::EndOnly {
                        append_restart_record(path, t, integrator.y_out(t))?;
                    }
                }
            }
        }

        model.write_final_outputs();
        *metrics = integrator.write_metrics(t);
        info!("integration finished after {} steps, wall clock time {:.3} s", integrator.n_steps(), watch.elapsed().as_secs_f64());
        Ok(())
    }
}

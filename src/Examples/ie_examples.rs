// Copyright (c)  by Gleb E. Zaslavkiy
//MIT License
//! Example models for the implicit Euler and ADI integrators and runnable example cases.
#![allow(non_snake_case)]
use log::info;
use nalgebra::{DMatrix, DVector};
use std::path::Path;

use crate::Utils::logger::LoggerSettings;
use crate::numerical::ImplicitEuler::IE_api::{FixedIntervalOutputScheduler, SolverControlFramework};
use crate::numerical::ImplicitEuler::IE_config::{JacobianType, LESType, PrecondType, SolverConfig};
use crate::numerical::ImplicitEuler::IE_solver::IntegratorKind;
use crate::numerical::ImplicitEuler::model_interface::{
    CalculationResult, FluxDirection, ModelInterface, ModelInterfaceADI,
};

/// y' = -k*y
#[derive(Debug, Clone)]
pub struct DecayModel {
    pub k: f64,
    pub y_start: f64,
    pub t_end: f64,
    pub dt0: f64,
    y: f64,
}

impl DecayModel {
    pub fn new(k: f64, y_start: f64, t_end: f64) -> Self {
        DecayModel { k, y_start, t_end, dt0: 1e-3, y: y_start }
    }

    pub fn with_dt0(mut self, dt0: f64) -> Self {
        self.dt0 = dt0;
        self
    }

    pub fn exact(&self, t: f64) -> f64 {
        self.y_start * (-self.k * t).exp()
    }
}

impl ModelInterface for DecayModel {
    fn n(&self) -> usize {
        1
    }
    fn y0(&self) -> Vec<f64> {
        vec![self.y_start]
    }
    fn t0(&self) -> f64 {
        0.0
    }
    fn dt0(&self) -> f64 {
        self.dt0
    }
    fn t_end(&self) -> f64 {
        self.t_end
    }
    fn set_time(&mut self, _t: f64) -> CalculationResult {
        CalculationResult::Success
    }
    fn set_y(&mut self, y: &[f64]) -> CalculationResult {
        self.y = y[0];
        CalculationResult::Success
    }
    fn ydot(&mut self, ydot: &mut [f64]) -> CalculationResult {
        ydot[0] = -self.k * self.y;
        CalculationResult::Success
    }
}

/// y' = A*y
#[derive(Debug, Clone)]
pub struct LinearModel {
    pub a: DMatrix<f64>,
    y_start: Vec<f64>,
    t0: f64,
    dt0: f64,
    t_end: f64,
    y: DVector<f64>,
}

impl LinearModel {
    pub fn new(a: DMatrix<f64>, y_start: Vec<f64>) -> Self {
        let y = DVector::from_vec(y_start.clone());
        LinearModel { a, y_start, t0: 0.0, dt0: 1e-3, t_end: 1.0, y }
    }

    pub fn with_time_frame(mut self, t0: f64, dt0: f64, t_end: f64) -> Self {
        self.t0 = t0;
        self.dt0 = dt0;
        self.t_end = t_end;
        self
    }

    /// tridiagonal matrix of 1D diffusion with zero-flux ends
    pub fn diffusion_1d(n: usize, d: f64) -> DMatrix<f64> {
        DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                let neighbours = (i > 0) as usize + (i + 1 < n) as usize;
                -d * neighbours as f64
            } else if i.abs_diff(j) == 1 {
                d
            } else {
                0.0
            }
        })
    }
}

impl ModelInterface for LinearModel {
    fn n(&self) -> usize {
        self.y_start.len()
    }
    fn y0(&self) -> Vec<f64> {
        self.y_start.clone()
    }
    fn t0(&self) -> f64 {
        self.t0
    }
    fn dt0(&self) -> f64 {
        self.dt0
    }
    fn t_end(&self) -> f64 {
        self.t_end
    }
    fn set_time(&mut self, _t: f64) -> CalculationResult {
        CalculationResult::Success
    }
    fn set_y(&mut self, y: &[f64]) -> CalculationResult {
        self.y.as_mut_slice().copy_from_slice(y);
        CalculationResult::Success
    }
    fn ydot(&mut self, ydot: &mut [f64]) -> CalculationResult {
        let f = &self.a * &self.y;
        ydot.copy_from_slice(f.as_slice());
        CalculationResult::Success
    }
    fn jacobian_pattern(&self) -> Option<Vec<Vec<usize>>> {
        let n = self.n();
        Some(
            (0..n)
                .map(|i| (0..n).filter(|&j| i == j || self.a[(i, j)] != 0.0).collect())
                .collect(),
        )
    }
}

/// y' = k*(target - y); `ydot` refuses states above `limit`.
#[derive(Debug, Clone)]
pub struct BoundedModel {
    pub k: f64,
    pub target: f64,
    pub limit: f64,
    pub y_start: f64,
    pub dt0: f64,
    pub t_end: f64,
    /// number of refused evaluations
    pub n_refused: usize,
    /// largest state passed to `step_completed`
    pub max_accepted: f64,
    y: f64,
}

impl BoundedModel {
    pub fn new(k: f64, target: f64, limit: f64, y_start: f64, dt0: f64, t_end: f64) -> Self {
        BoundedModel { k, target, limit, y_start, dt0, t_end, n_refused: 0, max_accepted: y_start, y: y_start }
    }
}

impl ModelInterface for BoundedModel {
    fn n(&self) -> usize {
        1
    }
    fn y0(&self) -> Vec<f64> {
        vec![self.y_start]
    }
    fn t0(&self) -> f64 {
        0.0
    }
    fn dt0(&self) -> f64 {
        self.dt0
    }
    fn t_end(&self) -> f64 {
        self.t_end
    }
    fn set_time(&mut self, _t: f64) -> CalculationResult {
        CalculationResult::Success
    }
    fn set_y(&mut self, y: &[f64]) -> CalculationResult {
        self.y = y[0];
        CalculationResult::Success
    }
    fn ydot(&mut self, ydot: &mut [f64]) -> CalculationResult {
        if self.y > self.limit {
            self.n_refused += 1;
            return CalculationResult::RecoverableError;
        }
        ydot[0] = self.k * (self.target - self.y);
        CalculationResult::Success
    }
    fn step_completed(&mut self, _t: f64, y: &[f64]) {
        self.max_accepted = self.max_accepted.max(y[0]);
    }
}

/// Two species on an nx x ny grid: diffusion with zero-flux boundaries and a reaction
/// `u + u <-> v` that is split in halves between the two directions.
///
/// Element `e = i + j*nx` holds `u` at `2e` and `v` at `2e + 1`.
#[derive(Debug, Clone)]
pub struct DiffusionGridModel {
    pub nx: usize,
    pub ny: usize,
    pub kx: f64,
    pub ky: f64,
    /// forward and backward reaction rates
    pub kf: f64,
    pub kb: f64,
    pub t_end: f64,
    pub dt0: f64,
    direction: FluxDirection,
    indices_x: Vec<usize>,
    indices_y: Vec<usize>,
    y: Vec<f64>,
}

impl DiffusionGridModel {
    const N_EQN: usize = 2;

    pub fn new(nx: usize, ny: usize, kx: f64, ky: f64) -> Self {
        let indices_x = (0..nx * ny).collect();
        let indices_y = (0..nx).flat_map(|i| (0..ny).map(move |j| i + j * nx)).collect();
        DiffusionGridModel {
            nx,
            ny,
            kx,
            ky,
            kf: 0.5,
            kb: 0.2,
            t_end: 1.0,
            dt0: 1e-3,
            direction: FluxDirection::All,
            indices_x,
            indices_y,
            y: vec![0.0; Self::N_EQN * nx * ny],
        }
    }

    pub fn with_reaction(mut self, kf: f64, kb: f64) -> Self {
        self.kf = kf;
        self.kb = kb;
        self
    }

    pub fn with_t_end(mut self, t_end: f64) -> Self {
        self.t_end = t_end;
        self
    }

    /// adds k*(y of neighbour - y of e) for both species
    fn diffusion(&self, e: usize, neighbour: usize, k: f64, ydot: &mut [f64]) {
        for q in 0..Self::N_EQN {
            ydot[Self::N_EQN * e + q] += k * (self.y[Self::N_EQN * neighbour + q] - self.y[Self::N_EQN * e + q]);
        }
    }

    fn x_fluxes(&self, ydot: &mut [f64]) {
        for j in 0..self.ny {
            for i in 0..self.nx {
                let e = i + j * self.nx;
                if i > 0 {
                    self.diffusion(e, e - 1, self.kx, ydot);
                }
                if i + 1 < self.nx {
                    self.diffusion(e, e + 1, self.kx, ydot);
                }
            }
        }
    }

    fn y_fluxes(&self, ydot: &mut [f64]) {
        for j in 0..self.ny {
            for i in 0..self.nx {
                let e = i + j * self.nx;
                if j > 0 {
                    self.diffusion(e, e - self.nx, self.ky, ydot);
                }
                if j + 1 < self.ny {
                    self.diffusion(e, e + self.nx, self.ky, ydot);
                }
            }
        }
    }

    fn reaction(&self, share: f64, ydot: &mut [f64]) {
        for e in 0..self.nx * self.ny {
            let u = self.y[Self::N_EQN * e];
            let v = self.y[Self::N_EQN * e + 1];
            let rate = share * (self.kf * u * u - self.kb * v);
            ydot[Self::N_EQN * e] -= 2.0 * rate;
            ydot[Self::N_EQN * e + 1] += rate;
        }
    }
}

impl ModelInterface for DiffusionGridModel {
    fn n(&self) -> usize {
        Self::N_EQN * self.nx * self.ny
    }

    /// Gaussian bump of u in the lower left corner, constant v.
    fn y0(&self) -> Vec<f64> {
        let mut y = vec![0.0; self.n()];
        for j in 0..self.ny {
            for i in 0..self.nx {
                let e = i + j * self.nx;
                let r2 = (i as f64).powi(2) + (j as f64).powi(2);
                y[Self::N_EQN * e] = 1.0 + (-0.5 * r2).exp();
                y[Self::N_EQN * e + 1] = 0.5;
            }
        }
        y
    }

    fn t0(&self) -> f64 {
        0.0
    }
    fn dt0(&self) -> f64 {
        self.dt0
    }
    fn t_end(&self) -> f64 {
        self.t_end
    }

    fn set_time(&mut self, _t: f64) -> CalculationResult {
        CalculationResult::Success
    }

    fn set_y(&mut self, y: &[f64]) -> CalculationResult {
        if y.iter().any(|v| !v.is_finite()) {
            return CalculationResult::RecoverableError;
        }
        self.y.copy_from_slice(y);
        CalculationResult::Success
    }

    fn ydot(&mut self, ydot: &mut [f64]) -> CalculationResult {
        ydot.iter_mut().for_each(|v| *v = 0.0);
        match self.direction {
            FluxDirection::X => {
                self.x_fluxes(ydot);
                self.reaction(0.5, ydot);
            }
            FluxDirection::Y => {
                self.y_fluxes(ydot);
                self.reaction(0.5, ydot);
            }
            FluxDirection::All => {
                self.x_fluxes(ydot);
                self.y_fluxes(ydot);
                self.reaction(1.0, ydot);
            }
        }
        CalculationResult::Success
    }

    fn jacobian_pattern(&self) -> Option<Vec<Vec<usize>>> {
        let q = Self::N_EQN;
        let mut rows = Vec::with_capacity(self.n());
        for j in 0..self.ny {
            for i in 0..self.nx {
                let e = i + j * self.nx;
                let mut neighbours = vec![e];
                if i > 0 {
                    neighbours.push(e - 1);
                }
                if i + 1 < self.nx {
                    neighbours.push(e + 1);
                }
                if j > 0 {
                    neighbours.push(e - self.nx);
                }
                if j + 1 < self.ny {
                    neighbours.push(e + self.nx);
                }
                for eq in 0..q {
                    let mut cols: Vec<usize> = neighbours.iter().map(|&nb| q * nb + eq).collect();
                    // reaction couples the species of the element
                    cols.push(q * e + (1 - eq));
                    cols.sort_unstable();
                    rows.push(cols);
                }
            }
        }
        Some(rows)
    }

    fn as_adi(&self) -> Option<&dyn ModelInterfaceADI> {
        Some(self)
    }

    fn as_adi_mut(&mut self) -> Option<&mut dyn ModelInterfaceADI> {
        Some(self)
    }
}

impl ModelInterfaceADI for DiffusionGridModel {
    fn set_active_flux_direction(&mut self, direction: FluxDirection) {
        self.direction = direction;
    }
    fn active_flux_direction(&self) -> FluxDirection {
        self.direction
    }
    fn indices_x(&self) -> &[usize] {
        &self.indices_x
    }
    fn indices_y(&self) -> &[usize] {
        &self.indices_y
    }
    fn n_elements(&self) -> usize {
        self.nx * self.ny
    }
    fn n_equations(&self) -> usize {
        Self::N_EQN
    }
}

/// Runs one of the example cases; the cases write statistics into `log_dir` when given.
pub fn ie_examples(example: usize, log_dir: Option<&Path>) {
    let mut logger = LoggerSettings::default();
    logger.init_logger();
    let output = |cfg: &mut SolverConfig, interval: f64| {
        cfg.output.interval = interval;
        cfg.output.log_dir = log_dir.map(Path::to_path_buf);
    };
    let result = match example {
        0 => {
            // exponential decay with the dense solver
            let model = DecayModel::new(1.0, 1.0, 5.0);
            let mut cfg = SolverConfig::default();
            output(&mut cfg, 1.0);
            let mut solver = SolverControlFramework::new(Box::new(model), cfg);
            solver.run().map(|_| solver.t())
        }
        1 => {
            // 1D diffusion with the band solver
            let n = 50;
            let y0 = (0..n).map(|i| if i < n / 2 { 1.0 } else { 0.0 }).collect();
            let model = LinearModel::new(LinearModel::diffusion_1d(n, 10.0), y0).with_time_frame(0.0, 1e-4, 10.0);
            let mut cfg = SolverConfig { les: LESType::Band, ml: 1, mu: 1, ..Default::default() };
            output(&mut cfg, 2.0);
            let mut solver = SolverControlFramework::new(Box::new(model), cfg);
            solver.run().map(|_| solver.t())
        }
        2 => {
            // 2D diffusion-reaction with the ADI integrator
            let model = DiffusionGridModel::new(20, 15, 1.0, 0.5).with_t_end(5.0);
            let mut cfg = SolverConfig::for_integrator(IntegratorKind::ADI);
            output(&mut cfg, 1.0);
            let mut solver = SolverControlFramework::new(Box::new(model), cfg);
            solver.run().map(|_| solver.t())
        }
        3 => {
            // the same grid with the implicit Euler integrator, BiCGStab and an ILU preconditioner
            let model = DiffusionGridModel::new(20, 15, 1.0, 0.5).with_t_end(5.0);
            let mut cfg = SolverConfig {
                les: LESType::BiCGStab,
                jacobian: Some(JacobianType::SparseCSR),
                precond: Some(PrecondType::ILU),
                ..Default::default()
            };
            output(&mut cfg, 1.0);
            let mut solver = SolverControlFramework::new(Box::new(model), cfg);
            solver.run().map(|_| solver.t())
        }
        4 => {
            // configuration from TOML, block-tridiagonal solver and an explicit output scheduler
            let text = r#"
                [integrator]
                kind = "ImplicitEuler"
                rel_tol = 1e-6
                [les]
                kind = "BTridiag"
                [newton]
                strategy = "OnceEveryStep"
            "#;
            match SolverConfig::from_toml_str(text) {
                Ok(mut cfg) => {
                    output(&mut cfg, 0.0);
                    let model = DiffusionGridModel::new(1, 30, 0.0, 2.0).with_t_end(2.0);
                    let mut solver = SolverControlFramework::new(Box::new(model), cfg);
                    solver.set_output_scheduler(Box::new(FixedIntervalOutputScheduler::new(0.25)));
                    solver.run().map(|_| solver.t())
                }
                Err(e) => Err(e),
            }
        }
        _ => {
            info!("no example with number {}", example);
            return;
        }
    };
    match result {
        Ok(t) => info!("example {} finished at t = {}", example, t),
        Err(e) => log::error!("example {} failed: {}", example, e),
    }
}

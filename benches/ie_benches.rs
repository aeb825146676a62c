use RustedSolverFramework::Examples::ie_examples::{DiffusionGridModel, LinearModel};
use RustedSolverFramework::numerical::ImplicitEuler::IE_api::SolverControlFramework;
use RustedSolverFramework::numerical::ImplicitEuler::IE_config::{JacobianType, LESType, PrecondType, SolverConfig};
use RustedSolverFramework::numerical::ImplicitEuler::IE_solver::IntegratorKind;
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

fn run(model: Box<dyn RustedSolverFramework::numerical::ImplicitEuler::model_interface::ModelInterface>, cfg: SolverConfig) {
    let mut solver = SolverControlFramework::new(model, cfg);
    solver.run().unwrap();
    black_box(solver.t());
}

fn bench_band_diffusion(c: &mut Criterion) {
    c.bench_function("IE band 1D diffusion", |b| {
        b.iter(|| {
            let n = 200;
            let y0 = (0..n).map(|i| if i < n / 2 { 1.0 } else { 0.0 }).collect();
            let model = LinearModel::new(LinearModel::diffusion_1d(n, 10.0), y0).with_time_frame(0.0, 1e-4, 1.0);
            let cfg = SolverConfig { les: LESType::Band, ml: 1, mu: 1, ..Default::default() };
            run(Box::new(model), cfg)
        })
    });
}

fn bench_grid(c: &mut Criterion) {
    let mut group = c.benchmark_group("diffusion-reaction grid 20x15");
    group.sample_size(10);
    group.bench_function("ADI integrator", |b| {
        b.iter(|| {
            let model = DiffusionGridModel::new(20, 15, 1.0, 0.5).with_t_end(1.0);
            run(Box::new(model), SolverConfig::for_integrator(IntegratorKind::ADI))
        })
    });
    group.bench_function("IE BiCGStab + ILU", |b| {
        b.iter(|| {
            let model = DiffusionGridModel::new(20, 15, 1.0, 0.5).with_t_end(1.0);
            let cfg = SolverConfig {
                les: LESType::BiCGStab,
                jacobian: Some(JacobianType::SparseCSR),
                precond: Some(PrecondType::ILU),
                ..Default::default()
            };
            run(Box::new(model), cfg)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_band_diffusion, bench_grid);
criterion_main!(benches);

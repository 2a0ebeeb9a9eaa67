//! Benchmarks for metric operations.

use criterion::{criterion_group, criterion_main, Criterion};
use flatiron::energy::{generate_energy, EnergyChoice, EnergyFunctor};
use flatiron::mesh::{build_from_triangles, Connectivity};
use flatiron::metric::{ConeMetric, MetricMode};
use flatiron::optimize::{project_to_constraint, vertex_constraint, ProjectionParameters};
use std::f64::consts::PI;

/// A closed octahedron-like sphere with mildly irregular edge lengths.
fn octahedron_metric() -> ConeMetric {
    let faces = vec![
        [0, 1, 2],
        [0, 2, 3],
        [0, 3, 4],
        [0, 4, 1],
        [5, 2, 1],
        [5, 3, 2],
        [5, 4, 3],
        [5, 1, 4],
    ];
    let mesh: Connectivity = build_from_triangles(&faces, 6).unwrap();
    let lengths: Vec<f64> = (0..mesh.num_edges())
        .map(|e| 1.0 + 0.1 * ((e as f64) * 0.6).sin())
        .collect();
    let targets = vec![4.0 * PI / 3.0; 6];
    ConeMetric::from_lengths(mesh, &lengths, targets, &[], MetricMode::Penner).unwrap()
}

fn bench_angle_sums(c: &mut Criterion) {
    let metric = octahedron_metric();
    c.bench_function("vertex_angle_sums", |b| {
        b.iter(|| metric.vertex_angle_sums().unwrap());
    });
}

fn bench_constraint_jacobian(c: &mut Criterion) {
    let metric = octahedron_metric();
    c.bench_function("constraint_with_jacobian", |b| {
        b.iter(|| vertex_constraint(&metric, true).unwrap());
    });
}

fn bench_projection(c: &mut Criterion) {
    let metric = octahedron_metric();
    let params = ProjectionParameters::default();
    c.bench_function("project_to_constraint", |b| {
        b.iter(|| project_to_constraint(&metric, &params).unwrap());
    });
}

fn bench_energy_gradient(c: &mut Criterion) {
    let metric = octahedron_metric();
    let energy = generate_energy(&metric, EnergyChoice::SymDirichlet).unwrap();
    c.bench_function("sym_dirichlet_gradient", |b| {
        b.iter(|| energy.gradient(&metric).unwrap());
    });
}

criterion_group!(
    benches,
    bench_angle_sums,
    bench_constraint_jacobian,
    bench_projection,
    bench_energy_gradient
);
criterion_main!(benches);

#[macro_use]
extern crate criterion;

use beamline_rs::elements::{Drift, Quadrupole};
use beamline_rs::space_charge::SpaceChargeKick;
use beamline_rs::{Beam, BeamElement, BeamParameters, ParticleBeam, Segment};
use criterion::{black_box, Criterion};
use rand::prelude::*;

fn beam(num_particles: usize) -> Beam {
    let params = BeamParameters::default()
        .num_particles(num_particles)
        .energy(1e8)
        .total_charge(1e-10)
        .sigma_x(1e-4)
        .sigma_y(1e-4)
        .sigma_tau(1e-5);
    let mut rng = StdRng::seed_from_u64(0);
    Beam::Particle(ParticleBeam::from_parameters_with_rng(&params, &mut rng).unwrap())
}

fn fodo() -> Segment {
    Segment::new(vec![
        Quadrupole::new(0.2, 4.2).into(),
        Drift::new(1.0).into(),
        Quadrupole::new(0.2, -4.2).into(),
        Drift::new(1.0).into(),
    ])
}

fn criterion_benchmark(c: &mut Criterion) {
    let incoming = beam(100_000);
    let mut lattice = fodo().split_segment(0.1);
    c.bench_function("fodo 100k particles", |b| {
        b.iter(|| lattice.track(black_box(&incoming)).unwrap())
    });

    let incoming = beam(10_000);
    let mut kick = SpaceChargeKick::new(1.0).grid_shape([16, 16, 16]);
    c.bench_function("space charge kick 16^3", |b| {
        b.iter(|| kick.track(black_box(&incoming)).unwrap())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

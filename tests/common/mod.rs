#![allow(dead_code)]
use beamline_rs::elements::{Drift, Quadrupole};
use beamline_rs::{BeamParameters, Float, ParameterBeam, ParticleBeam, Segment};
use ndarray::ArrayD;
use rand::prelude::*;

pub const E_TOL: Float = 1E-10;

// This is a small beam with some correlation in every plane so that
// mixing terms show up in tests.
pub fn beam_parameters() -> BeamParameters {
    BeamParameters::default()
        .num_particles(10_000)
        .energy(1e8)
        .total_charge(1e-12)
        .mu_x(1e-5)
        .mu_py(-2e-6)
        .sigma_x(1e-4)
        .sigma_px(2e-5)
        .sigma_y(2e-4)
        .sigma_py(1e-5)
        .cor_x(5e-10)
        .cor_y(-1e-9)
}

pub fn particle_beam(seed: u64) -> ParticleBeam {
    let mut rng = StdRng::seed_from_u64(seed);
    ParticleBeam::from_parameters_with_rng(&beam_parameters(), &mut rng).unwrap()
}

pub fn parameter_beam() -> ParameterBeam {
    ParameterBeam::from_parameters(&beam_parameters()).unwrap()
}

pub fn fodo() -> Segment {
    Segment::new(vec![
        Quadrupole::new(0.2, 4.2).with_name("qf").into(),
        Drift::new(1.0).into(),
        Quadrupole::new(0.2, -4.2).with_name("qd").into(),
        Drift::new(1.0).into(),
    ])
}

pub fn max_abs_diff(a: &ArrayD<Float>, b: &ArrayD<Float>) -> Float {
    assert_eq!(a.shape(), b.shape());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, Float::max)
}

pub fn assert_relative_eq(a: Float, b: Float, tol: Float) {
    let scale = a.abs().max(b.abs());
    assert!(
        (a - b).abs() <= tol * scale,
        "{} and {} differ by more than {} relative",
        a,
        b,
        tol
    );
}

/// The single entry of an unbatched array.
pub fn scalar<T: Copy>(array: &ArrayD<T>) -> T {
    assert_eq!(array.len(), 1);
    *array.first().unwrap()
}

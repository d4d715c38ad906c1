mod common;

use beamline_rs::elements::Drift;
use beamline_rs::space_charge::SpaceChargeKick;
use beamline_rs::{
    Beam, BeamElement, BeamMoments, EllipsoidParameters, Float, ParticleBeam, Segment,
};
use common::scalar;
use ndarray::{concatenate, Axis};
use rand::prelude::*;

/// Uniform ellipsoid together with its mirror image through the centroid.
fn point_symmetric_beam() -> ParticleBeam {
    let params = EllipsoidParameters::new()
        .num_particles(5_000)
        .radius_x(2e-4)
        .radius_y(1e-4)
        .radius_tau(5e-5)
        .energy(2e7)
        .total_charge(1e-9);
    let mut rng = StdRng::seed_from_u64(21);
    let half = ParticleBeam::uniform_3d_ellipsoid_with_rng(&params, &mut rng).unwrap();
    let mut mirrored = half.particles().clone();
    for mut row in mirrored.rows_mut() {
        for k in 0..6 {
            row[k] = -row[k];
        }
    }
    let particles = concatenate(Axis(0), &[half.particles().view(), mirrored.view()]).unwrap();
    let charges = concatenate(
        Axis(0),
        &[half.particle_charges().view(), half.particle_charges().view()],
    )
    .unwrap();
    ParticleBeam::new(particles, half.energy().clone(), Some(charges), None).unwrap()
}

#[test]
fn symmetric_beam_feels_no_net_force() {
    let beam = point_symmetric_beam();
    let mut kick = SpaceChargeKick::new(0.5).grid_shape([16, 16, 16]);
    let out = kick.track(&Beam::Particle(beam.clone())).unwrap();
    let out = out.as_particle().unwrap();

    for index in [1, 3] {
        let before = beam.coordinate(index);
        let after = out.coordinate(index);
        let kicks: Vec<Float> = after.iter().zip(before.iter()).map(|(a, b)| a - b).collect();
        let net: Float = kicks.iter().sum();
        let total: Float = kicks.iter().map(|k| k.abs()).sum();
        assert!(total > 0.0);
        assert!(net.abs() < 1e-6 * total, "net kick {} of {}", net, total);
    }
    // the centroid stays put
    assert!(scalar(&out.mu_px()).abs() < 1e-6 * scalar(&out.sigma_px()));
}

#[test]
fn fully_lost_beam_is_left_alone() {
    let beam = point_symmetric_beam();
    let n = beam.num_particles();
    let lost = ParticleBeam::new(
        beam.particles().clone(),
        beam.energy().clone(),
        Some(beam.particle_charges().clone()),
        Some(ndarray::ArrayD::zeros(ndarray::IxDyn(&[n]))),
    )
    .unwrap();
    let mut kick = SpaceChargeKick::new(1.0);
    let out = kick.track(&Beam::Particle(lost.clone())).unwrap();
    assert_eq!(out.as_particle().unwrap().particles(), lost.particles());
}

#[test]
fn empty_batch_is_a_no_op() {
    let particles = ndarray::ArrayD::<Float>::zeros(ndarray::IxDyn(&[0, 4, 7]));
    let beam = ParticleBeam::new(particles, beamline_rs::param(1e8), None, None).unwrap();
    let mut kick = SpaceChargeKick::new(1.0);
    let out = kick.track(&Beam::Particle(beam)).unwrap();
    assert_eq!(out.as_particle().unwrap().batch_shape(), &[0]);
}

#[test]
fn kicks_inside_a_segment_break_the_merged_runs() {
    let beam = Beam::Particle(point_symmetric_beam());
    let mut with_kick = Segment::new(vec![
        Drift::new(0.5).into(),
        SpaceChargeKick::new(0.5).grid_shape([8, 8, 8]).into(),
        Drift::new(0.5).into(),
    ]);
    let mut drift_only = Segment::new(vec![Drift::new(1.0).into()]);
    let a = with_kick.track(&beam).unwrap();
    let b = drift_only.track(&beam).unwrap();
    let growth = scalar(&a.as_particle().unwrap().sigma_x()) / scalar(&b.as_particle().unwrap().sigma_x());
    assert!(growth > 1.0);
    assert!(!with_kick.is_linear());

    // a switched off kick disappears from the lattice
    let mut off = Segment::new(vec![
        Drift::new(0.5).into(),
        SpaceChargeKick::new(0.0).into(),
        Drift::new(0.5).into(),
    ]);
    assert!(off.is_linear());
    let c = off.track(&beam).unwrap();
    assert!(
        common::max_abs_diff(c.as_particle().unwrap().particles(), b.as_particle().unwrap().particles())
            < 1e-15
    );
}

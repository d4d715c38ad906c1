mod common;

use beamline_rs::elements::{
    Aperture, Bpm, Cavity, Corrector, Dipole, Drift, Marker, Quadrupole, Solenoid,
};
use beamline_rs::{
    param, Beam, BeamElement, BeamMoments, BeamParameters, Element, Float, MapArray, ParticleBeam,
    Segment, Vector7,
};
use common::{assert_relative_eq, max_abs_diff, scalar, E_TOL};
use rand::prelude::*;

fn map_diff(a: &MapArray, b: &MapArray) -> Float {
    assert_eq!(a.shape(), b.shape());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs().max())
        .fold(0.0, Float::max)
}

fn assert_split_equivalent(element: Element, resolution: Float) {
    let energy = param(vec![5e7, 1e9]);
    let pieces = element.split(resolution);
    assert!(pieces.len() > 1, "{} did not split", element.kind());
    let split = Segment::new(pieces);
    let diff = map_diff(
        &split.transfer_map(&energy).unwrap(),
        &element.transfer_map(&energy).unwrap(),
    );
    assert!(diff < 1e-9, "{} split differs by {}", element.kind(), diff);
}

#[test]
fn zero_length_drift_is_the_identity() {
    let mut drift = Drift::new(0.0);
    let beam = common::particle_beam(1);
    let out = drift.track(&Beam::Particle(beam.clone())).unwrap();
    assert!(max_abs_diff(out.as_particle().unwrap().particles(), beam.particles()) < 1e-15);

    let beam = common::parameter_beam();
    let out = drift.track(&Beam::Parameter(beam.clone())).unwrap();
    let out = out.as_parameter().unwrap();
    assert_eq!(out.mean(), beam.mean());
    assert_eq!(out.cov(), beam.cov());
}

#[test]
fn quadrupole_without_focusing_is_a_drift() {
    let beams = [
        Beam::Particle(common::particle_beam(2)),
        Beam::Parameter(common::parameter_beam()),
    ];
    for beam in &beams {
        let a = Quadrupole::new(0.7, 0.0).track(beam).unwrap();
        let b = Drift::new(0.7).track(beam).unwrap();
        match (&a, &b) {
            (Beam::Particle(a), Beam::Particle(b)) => {
                assert!(max_abs_diff(a.particles(), b.particles()) < E_TOL)
            }
            (Beam::Parameter(a), Beam::Parameter(b)) => {
                assert!(max_abs_diff(&a.sigma_x(), &b.sigma_x()) < E_TOL);
                assert!(max_abs_diff(&a.mu_px(), &b.mu_px()) < E_TOL);
            }
            _ => panic!("tracking changed the beam type"),
        }
    }
}

#[test]
fn segment_map_is_the_product() {
    let energy = param(1e8);
    let a: Element = Quadrupole::new(0.3, 2.0).tilt(0.1).into();
    let b: Element = Dipole::new(1.0, 0.05).e1(0.02).into();
    let segment = Segment::new(vec![a.clone(), b.clone()]);
    let expected = scalar(&b.transfer_map(&energy).unwrap()) * scalar(&a.transfer_map(&energy).unwrap());
    let got = segment.transfer_map(&energy).unwrap();
    assert!((scalar(&got) - expected).abs().max() < E_TOL);
}

#[test]
fn tracking_a_parameter_beam_matches_the_map() {
    let beam = common::parameter_beam();
    let mut segment = common::fodo();
    let maps = segment.transfer_map(beam.energy()).unwrap();
    let out = segment.track(&Beam::Parameter(beam.clone())).unwrap();
    let out = out.as_parameter().unwrap();

    let mean = scalar(beam.mean());
    let initial = Vector7::from_iterator(mean.iter().copied().chain(std::iter::once(1.0)));
    let expected = scalar(&maps) * initial;
    for i in 0..6 {
        assert!((scalar(out.mean())[i] - expected[i]).abs() < E_TOL);
    }
}

#[test]
fn quadrupole_and_drift_match_a_long_drift() {
    let params = BeamParameters::default()
        .num_particles(1_000_000)
        .sigma_x(1.75e-7)
        .energy(1e8);
    let mut rng = StdRng::seed_from_u64(11);
    let beam = Beam::Particle(ParticleBeam::from_parameters_with_rng(&params, &mut rng).unwrap());

    let mut short = Segment::new(vec![Quadrupole::new(1.0, 0.0).into(), Drift::new(1.0).into()]);
    let mut long = Segment::new(vec![Drift::new(2.0).into()]);
    let a = short.track(&beam).unwrap();
    let b = long.track(&beam).unwrap();
    let a = scalar(&a.as_particle().unwrap().sigma_x());
    let b = scalar(&b.as_particle().unwrap().sigma_x());
    assert_relative_eq(a, b, 1e-3);
}

#[test]
fn split_elements_compose_to_the_whole() {
    assert_split_equivalent(Drift::new(1.3).into(), 0.25);
    assert_split_equivalent(Quadrupole::new(0.5, vec![3.0, -2.0]).tilt(0.2).into(), 0.1);
    assert_split_equivalent(
        Dipole::new(1.2, 0.1)
            .e1(0.04)
            .e2(-0.03)
            .fringe_integral(0.5)
            .gap(0.02)
            .into(),
        0.3,
    );
    assert_split_equivalent(Corrector::horizontal(0.5, 1e-3).into(), 0.2);
    assert_split_equivalent(Corrector::vertical(0.5, -2e-3).into(), 0.2);
    assert_split_equivalent(Solenoid::new(0.8, 1.5).into(), 0.2);
}

#[test]
fn solenoid_without_field_is_a_drift() {
    let energy = param(2e8);
    let diff = map_diff(
        &Solenoid::new(0.6, 0.0).transfer_map(&energy).unwrap(),
        &Drift::new(0.6).transfer_map(&energy).unwrap(),
    );
    assert!(diff < E_TOL);
}

#[test]
fn cavity_raises_the_reference_energy() {
    let mut cavity = Cavity::new(1.0, 1e7, 0.0, 1.3e9);
    let beam = common::parameter_beam();
    let out = cavity.track(&Beam::Parameter(beam)).unwrap();
    assert_relative_eq(scalar(out.energy().unwrap()), 1.1e8, 1e-12);

    // off-crest at 60 degrees the gain halves
    let cavity = Cavity::new(1.0, 1e7, 60.0, 1.3e9);
    let energy = cavity.output_energy(&param(1e8)).unwrap();
    assert_relative_eq(scalar(&energy), 1.05e8, 1e-9);
}

#[test]
fn merged_lattice_tracks_like_the_original() {
    let mut lattice = common::fodo().elements;
    lattice.insert(2, Bpm::new(true).with_name("bpm").into());
    lattice.push(Cavity::new(0.5, 5e6, 10.0, 1.3e9).into());
    lattice.push(Marker::new().into());
    let mut original = Segment::new(lattice);
    let beam = Beam::Particle(common::particle_beam(3));

    let mut merged = original.transfer_maps_merged(&beam).unwrap();
    assert_eq!(merged.elements.len(), 3);
    let a = original.track(&beam).unwrap();
    let b = merged.track(&beam).unwrap();
    let (a, b) = (a.as_particle().unwrap(), b.as_particle().unwrap());
    assert!(max_abs_diff(a.particles(), b.particles()) < 1e-12);
    assert!(max_abs_diff(a.energy(), b.energy()) < 1e-6);
}

#[test]
fn wider_aperture_never_loses_more() {
    let beam = Beam::Particle(common::particle_beam(4));
    let narrow = Aperture::new(1e-4, 2e-4).track(&beam).unwrap();
    let wide = Aperture::new(2e-4, 3e-4).track(&beam).unwrap();
    let n_narrow = scalar(&narrow.as_particle().unwrap().num_particles_survived());
    let n_wide = scalar(&wide.as_particle().unwrap().num_particles_survived());
    assert!(n_wide >= n_narrow);
    assert!(n_narrow < 10_000.0);

    let both = Aperture::new(2e-4, 3e-4).track(&narrow).unwrap();
    assert_eq!(scalar(&both.as_particle().unwrap().num_particles_survived()), n_narrow);
    // lost particles still carry their coordinates
    assert_eq!(
        narrow.as_particle().unwrap().particles(),
        beam.as_particle().unwrap().particles()
    );
}

#[test]
fn batched_tilt_and_misalignment_broadcast_with_the_beam() {
    let mut quad = Quadrupole::new(0.2, vec![1.0, 2.0, 3.0])
        .tilt(ndarray::arr2(&[[0.0], [0.1]]))
        .misalignment(ndarray::Array3::<Float>::zeros((1, 3, 2)));
    let maps = quad.transfer_map(&param(1e8)).unwrap();
    assert_eq!(maps.shape(), &[2, 3]);

    let out = quad.track(&Beam::Particle(common::particle_beam(5))).unwrap();
    let out = out.as_particle().unwrap();
    assert_eq!(out.batch_shape(), &[2, 3]);
    assert_eq!(out.particles().shape(), &[2, 3, 10_000, 7]);
    assert_eq!(out.sigma_x().shape(), &[2, 3]);
}

#[test]
fn bpm_reads_the_centroid_inside_a_segment() {
    let mut segment = Segment::new(vec![
        Corrector::horizontal(0.0, 1e-3).into(),
        Drift::new(2.0).into(),
        Bpm::new(true).with_name("bpm").into(),
    ]);
    let beam = common::parameter_beam();
    segment.track(&Beam::Parameter(beam)).unwrap();
    match segment.element("bpm") {
        Some(Element::Bpm(bpm)) => {
            let reading = bpm.reading.as_ref().unwrap();
            assert_eq!(reading.shape(), &[2]);
            assert!((reading[[0]] - (1e-5 + 2e-3)).abs() < 1e-9);
        }
        _ => panic!("bpm missing"),
    }
}

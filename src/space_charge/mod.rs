//! Space-charge kick computed with a particle-in-cell solver on a 3-D grid
//! with open boundaries.
mod fft_3d;
mod green;
mod grid;
mod poisson;

pub use fft_3d::Fft3D;
pub use poisson::PoissonSolver;

use crate::batch::{all_zero, broadcast_shapes, broadcast_view, param, IntoParam};
use crate::beam::{from_xyz_pxpypz_row, to_xyz_pxpypz_row, Beam, BeamMoments, ParticleBeam};
use crate::elements::{unique_name, BeamElement, Element};
use crate::error::{shape, Error, Result};
use crate::{relativistic_factors, Float, ELEMENTARY_CHARGE, SPEED_OF_LIGHT};
use grid::Grid;
use itertools::izip;
use ndarray::{Array2, Array3, ArrayD, ArrayView1, ArrayViewMut2, Axis, IxDyn};
use rayon::prelude::*;
use tracing::{debug, warn};

/// Applies the momentum change the beam's own field causes over
/// `effective_length`. The element itself has no optics.
#[derive(Debug, Clone)]
pub struct SpaceChargeKick {
    pub effective_length: ArrayD<Float>,
    pub length: ArrayD<Float>,
    pub grid_shape: [usize; 3],
    pub grid_extend: [Float; 3],
    pub name: String,
}

impl SpaceChargeKick {
    pub fn new(effective_length: impl IntoParam) -> SpaceChargeKick {
        SpaceChargeKick {
            effective_length: param(effective_length),
            length: param(0.0),
            grid_shape: [32, 32, 32],
            grid_extend: [3.0, 3.0, 3.0],
            name: unique_name(),
        }
    }

    pub fn with_length(mut self, length: impl IntoParam) -> Self {
        self.length = param(length);
        self
    }

    pub fn grid_shape(mut self, grid_shape: [usize; 3]) -> Self {
        self.grid_shape = grid_shape;
        self
    }

    /// Half width of the grid in units of the beam sigma, per axis.
    pub fn grid_extend(mut self, grid_extend: [Float; 3]) -> Self {
        self.grid_extend = grid_extend;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Kicks the particles of a single batch entry in place.
    fn kick(
        &self,
        solver: &PoissonSolver,
        mut particles: ArrayViewMut2<Float>,
        charges: ArrayView1<Float>,
        survival: ArrayView1<Float>,
        energy: Float,
        effective_length: Float,
    ) {
        if effective_length == 0.0 {
            return;
        }
        let sources: Vec<Float> = izip!(charges.iter(), survival.iter())
            .map(|(q, s)| q * s)
            .collect();
        if sources.iter().all(|&q| q == 0.0) {
            debug!(element = %self.name, "beam carries no charge, skipping kick");
            return;
        }
        let (gamma, igamma2, beta) = relativistic_factors(energy);
        if !(beta > 0.0) {
            warn!(element = %self.name, energy, "beam at rest, skipping space-charge kick");
            return;
        }

        let moments: Vec<[Float; 6]> = particles
            .outer_iter()
            .map(|row| {
                let row: [Float; 7] = std::array::from_fn(|k| row[k]);
                to_xyz_pxpypz_row(&row, gamma, beta)
            })
            .collect();
        let positions: Vec<[Float; 3]> = moments.iter().map(|m| [m[0], m[2], m[4]]).collect();
        let weights = survival.to_vec();
        let grid = match Grid::around(&positions, &weights, self.grid_shape, self.grid_extend) {
            Some(grid) => grid,
            None => {
                warn!(
                    element = %self.name,
                    "beam has no extent along some axis, skipping space-charge kick"
                );
                return;
            }
        };

        let rho = grid.deposit(&positions, &sources);
        // solve in the rest frame, where the bunch is longer by gamma
        let rest_frame_cell = [grid.cell[0], grid.cell[1], grid.cell[2] * gamma];
        let phi = solver.potential(&rho, rest_frame_cell);
        let efield = poisson::field(&phi, grid.cell, igamma2);
        let forces = grid.interpolate(&efield, &positions);

        let dt = effective_length / (SPEED_OF_LIGHT * beta);
        for (mut row, m, f) in izip!(particles.outer_iter_mut(), moments, forces) {
            let mut m = m;
            m[1] += f[0] * ELEMENTARY_CHARGE * dt;
            m[3] += f[1] * ELEMENTARY_CHARGE * dt;
            m[5] += f[2] * ELEMENTARY_CHARGE * dt;
            let kicked = from_xyz_pxpypz_row(&m, gamma, beta);
            for (r, k) in row.iter_mut().zip(kicked.iter()) {
                *r = *k;
            }
        }
    }
}

impl BeamElement for SpaceChargeKick {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> Result<ArrayD<Float>> {
        Ok(self.length.clone())
    }

    fn track(&mut self, incoming: &Beam) -> Result<Beam> {
        let beam = match incoming {
            Beam::Empty => return Ok(Beam::Empty),
            Beam::Parameter(_) => {
                return Err(Error::InvalidType {
                    element: "SpaceChargeKick",
                    beam: incoming.kind(),
                })
            }
            Beam::Particle(beam) => beam,
        };
        let batch = broadcast_shapes(&[self.effective_length.shape(), beam.batch_shape()])?;
        let beam = beam.broadcast_batch(&batch)?;
        let nb: usize = batch.iter().product();
        if nb == 0 {
            return Ok(Beam::Particle(beam));
        }
        let n = beam.num_particles();

        let lengths: Vec<Float> = broadcast_view(&self.effective_length, &batch)?
            .iter()
            .copied()
            .collect();
        let energies: Vec<Float> = beam.energy().iter().copied().collect();
        let charges = Array2::from_shape_vec((nb, n), beam.particle_charges().iter().copied().collect())
            .map_err(|e| shape(e.to_string()))?;
        let survival = Array2::from_shape_vec(
            (nb, n),
            beam.survival_probabilities().iter().copied().collect(),
        )
        .map_err(|e| shape(e.to_string()))?;
        let mut particles = Array3::from_shape_vec((nb, n, 7), beam.particles().iter().copied().collect())
            .map_err(|e| shape(e.to_string()))?;

        let solver = PoissonSolver::new(self.grid_shape);
        particles
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(b, item)| {
                self.kick(
                    &solver,
                    item,
                    charges.row(b),
                    survival.row(b),
                    energies[b],
                    lengths[b],
                )
            });

        let mut full = batch.clone();
        full.extend_from_slice(&[n, 7]);
        let particles = particles
            .into_shape_with_order(IxDyn(&full))
            .map_err(|e| shape(e.to_string()))?;
        let kicked = ParticleBeam::new(
            particles,
            beam.energy().clone(),
            Some(beam.particle_charges().clone()),
            Some(beam.survival_probabilities().clone()),
        )?;
        Ok(Beam::Particle(kicked))
    }

    fn split(&self, _resolution: Float) -> Vec<Element> {
        vec![self.clone().into()]
    }

    fn broadcast(&self, shape: &[usize]) -> Result<Element> {
        Ok(SpaceChargeKick {
            effective_length: broadcast_view(&self.effective_length, shape)?.to_owned(),
            length: broadcast_view(&self.length, shape)?.to_owned(),
            ..self.clone()
        }
        .into())
    }

    fn is_skippable(&self) -> bool {
        all_zero(&self.effective_length)
    }

    fn is_linear(&self) -> bool {
        false
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::beam::{BeamParameters, ParameterBeam};
    use rand::prelude::*;

    fn charged_beam(total_charge: Float) -> ParticleBeam {
        let params = BeamParameters::default()
            .num_particles(5_000)
            .energy(10e6)
            .total_charge(total_charge)
            .sigma_x(1e-4)
            .sigma_y(1e-4)
            .sigma_tau(1e-4);
        let mut rng = StdRng::seed_from_u64(3);
        ParticleBeam::from_parameters_with_rng(&params, &mut rng).unwrap()
    }

    #[test]
    fn uncharged_beam_is_not_kicked() {
        let beam = charged_beam(0.0);
        let mut kick = SpaceChargeKick::new(1.0).grid_shape([16, 16, 16]);
        let out = kick.track(&Beam::Particle(beam.clone())).unwrap();
        assert_eq!(out.as_particle().unwrap().particles(), beam.particles());
    }

    #[test]
    fn charged_beam_gains_divergence() {
        let beam = charged_beam(1e-9);
        let mut kick = SpaceChargeKick::new(1.0).grid_shape([16, 16, 16]);
        let out = kick.track(&Beam::Particle(beam.clone())).unwrap();
        let out = out.as_particle().unwrap();
        let before = beam.sigma_px().sum();
        let after = out.sigma_px().sum();
        assert!(after > 1.1 * before);
        // positions are not touched by a kick
        assert_eq!(out.x(), beam.x());
    }

    #[test]
    fn parameter_beams_are_rejected() {
        let beam = ParameterBeam::from_parameters(&BeamParameters::default()).unwrap();
        let mut kick = SpaceChargeKick::new(1.0);
        assert!(matches!(
            kick.track(&Beam::Parameter(beam)),
            Err(Error::InvalidType { .. })
        ));
        assert!(matches!(kick.track(&Beam::Empty), Ok(Beam::Empty)));
    }

    #[test]
    fn zero_effective_length_is_skippable() {
        assert!(SpaceChargeKick::new(0.0).is_skippable());
        assert!(!SpaceChargeKick::new(vec![0.0, 1.0]).is_skippable());
        assert!(!SpaceChargeKick::new(1.0).is_linear());
        // a zero length is only skippable, a kick of any length is never linear
        let off = SpaceChargeKick::new(vec![0.0, 0.0]).with_length(0.3);
        assert!(off.is_skippable());
        assert!(!off.is_linear());
        assert!(!SpaceChargeKick::new(1e-9).is_skippable());
    }

    #[test]
    fn mirrored_charges_feel_opposite_forces() {
        let mut rng = StdRng::seed_from_u64(17);
        let radii: [Float; 3] = [2e-4, 1e-4, 5e-5];
        let mut half = Vec::new();
        while half.len() < 2_000 {
            let u: [Float; 3] = std::array::from_fn(|_| rng.gen_range(-1.0..1.0));
            if u.iter().map(|v| v * v).sum::<Float>() <= 1.0 {
                half.push([u[0] * radii[0], u[1] * radii[1], u[2] * radii[2]]);
            }
        }
        let n = half.len();
        let mut positions = half.clone();
        positions.extend(half.iter().map(|p| [-p[0], -p[1], -p[2]]));
        let charges = vec![1e-15; 2 * n];
        let weights = vec![1.0; 2 * n];

        let shape = [16, 16, 16];
        let gamma: Float = 5.0;
        let grid = Grid::around(&positions, &weights, shape, [4.0, 4.0, 4.0]).unwrap();
        let rho = grid.deposit(&positions, &charges);
        let solver = PoissonSolver::new(shape);
        let phi = solver.potential(&rho, [grid.cell[0], grid.cell[1], grid.cell[2] * gamma]);
        let efield = poisson::field(&phi, grid.cell, gamma.powi(-2));
        let forces = grid.interpolate(&efield, &positions);

        for d in 0..3 {
            let total: Float = forces.iter().map(|f| f[d].abs()).sum();
            let net: Float = forces.iter().map(|f| f[d]).sum();
            let largest = forces.iter().map(|f| f[d].abs()).fold(0.0, Float::max);
            assert!(total > 0.0);
            assert!(net.abs() < 1e-9 * total, "axis {}: net {} of {}", d, net, total);
            for i in 0..n {
                let (a, b) = (forces[i][d], forces[i + n][d]);
                assert!((a + b).abs() < 1e-9 * largest, "axis {} particle {}", d, i);
            }
            // like charges push each other outwards
            let outward: Float = izip!(&positions, &forces).map(|(p, f)| p[d] * f[d]).sum();
            assert!(outward > 0.0, "axis {} points inwards", d);
        }
    }

    #[test]
    fn batched_lengths_kick_independently() {
        let beam = charged_beam(1e-9);
        let mut kick = SpaceChargeKick::new(vec![0.0, 1.0]).grid_shape([8, 8, 8]);
        let out = kick.track(&Beam::Particle(beam.clone())).unwrap();
        let out = out.as_particle().unwrap();
        assert_eq!(out.batch_shape(), &[2]);
        let sigma = out.sigma_px();
        assert!((sigma[[0]] - beam.sigma_px().sum()).abs() < 1e-15);
        assert!(sigma[[1]] > sigma[[0]]);
    }
}

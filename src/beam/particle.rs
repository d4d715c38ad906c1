use super::parameter::ParameterBeam;
use super::parameters::{BeamParameters, EllipsoidParameters, TwissParameters};
use super::stats::{weighted_covariance, weighted_mean, weighted_std};
use super::{check_energy, BeamMoments};
use crate::batch::{
    broadcast_owned, broadcast_shapes, broadcast_view, map_batch, MapArray, Matrix6, Vector6,
    Vector7,
};
use crate::error::{parameter, shape, Result};
use crate::{relativistic_factors, Float, ELECTRON_MASS, PI, SPEED_OF_LIGHT};
use ndarray::{Array1, ArrayD, ArrayViewD, Axis, IxDyn, Zip};
use rand::prelude::*;
use rand_distr::StandardNormal;

/// Macroparticle representation of a beam.
///
/// `particles` has shape `(*batch, n, 7)` with rows `(x, px, y, py, tau, p, 1)`,
/// `energy` has shape `*batch` and the per-particle charges and survival
/// probabilities have shape `(*batch, n)`. All four always share the same
/// batch shape.
#[derive(Debug, Clone)]
pub struct ParticleBeam {
    particles: ArrayD<Float>,
    energy: ArrayD<Float>,
    particle_charges: ArrayD<Float>,
    survival_probabilities: ArrayD<Float>,
}

/// Lower triangle `(l11, l21, l22)` of the Cholesky factor of the 2x2
/// covariance `[[s1^2, c], [c, s2^2]]`, allowing for zero sigmas.
fn cholesky_2x2(s1: Float, s2: Float, c: Float) -> Option<(Float, Float, Float)> {
    let s1 = s1.abs();
    let s2 = s2.abs();
    if s1 == 0.0 {
        return if c == 0.0 { Some((0.0, 0.0, s2)) } else { None };
    }
    let l21 = c / s1;
    let rest = s2 * s2 - l21 * l21;
    if rest < -1e-9 * s2 * s2 {
        return None;
    }
    Some((s1, l21, rest.max(0.0).sqrt()))
}

fn correlated_pair<R: Rng + ?Sized>(rng: &mut R, l: (Float, Float, Float)) -> (Float, Float) {
    let z1: Float = rng.sample(StandardNormal);
    let z2: Float = rng.sample(StandardNormal);
    (l.0 * z1, l.1 * z1 + l.2 * z2)
}

/// Phase space row to SI `(x, px, y, py, z, pz)` for a reference particle
/// with the given gamma and beta.
pub(crate) fn to_xyz_pxpypz_row(row: &[Float; 7], gamma: Float, beta: Float) -> [Float; 6] {
    let p0 = gamma * beta * ELECTRON_MASS * SPEED_OF_LIGHT;
    let gamma_i = gamma * (1.0 + row[5] * beta);
    let beta_i = (1.0 - gamma_i.powi(-2)).sqrt();
    let momentum = gamma_i * ELECTRON_MASS * beta_i * SPEED_OF_LIGHT;
    let px = row[1] * p0;
    let py = row[3] * p0;
    let pz = (momentum * momentum - px * px - py * py).max(0.0).sqrt();
    [row[0], px, row[2], py, -beta * row[4], pz]
}

/// Inverse of [`to_xyz_pxpypz_row`].
pub(crate) fn from_xyz_pxpypz_row(moments: &[Float; 6], gamma: Float, beta: Float) -> [Float; 7] {
    let p0 = gamma * beta * ELECTRON_MASS * SPEED_OF_LIGHT;
    let momentum2 = moments[1].powi(2) + moments[3].powi(2) + moments[5].powi(2);
    let gamma_i = (1.0 + momentum2 / (ELECTRON_MASS * SPEED_OF_LIGHT).powi(2)).sqrt();
    [
        moments[0],
        moments[1] / p0,
        moments[2],
        moments[3] / p0,
        -moments[4] / beta,
        (gamma_i - gamma) / (beta * gamma),
        1.0,
    ]
}

/// `(gamma, beta)` of the reference particle of every batch entry, in
/// iteration order.
fn reference_factors(energy: &ArrayD<Float>) -> Vec<(Float, Float)> {
    energy
        .iter()
        .map(|&e| {
            let (gamma, _, beta) = relativistic_factors(e);
            (gamma, beta)
        })
        .collect()
}

impl ParticleBeam {
    /// Builds a beam from its particles. Charges default to zero and
    /// survival probabilities to one; both may have a trailing particle axis
    /// of length `n` or 1 and are broadcast together with the particles.
    pub fn new(
        particles: ArrayD<Float>,
        energy: ArrayD<Float>,
        particle_charges: Option<ArrayD<Float>>,
        survival_probabilities: Option<ArrayD<Float>>,
    ) -> Result<ParticleBeam> {
        let nd = particles.ndim();
        if nd < 2 || particles.shape()[nd - 1] != 7 {
            return Err(shape(format!(
                "particles must have shape (*batch, n, 7), got {:?}",
                particles.shape()
            )));
        }
        let n = particles.shape()[nd - 2];
        if n == 0 {
            return Err(shape("a particle beam needs at least one particle"));
        }
        check_energy(&energy)?;
        let charges = particle_charges.unwrap_or_else(|| ArrayD::zeros(IxDyn(&[n])));
        let survival = survival_probabilities.unwrap_or_else(|| ArrayD::ones(IxDyn(&[n])));
        for (what, a) in [("particle charges", &charges), ("survival probabilities", &survival)] {
            let last = a.shape().last().copied();
            if last != Some(n) && last != Some(1) {
                return Err(shape(format!(
                    "{} must have shape (*batch, {}), got {:?}",
                    what,
                    n,
                    a.shape()
                )));
            }
        }

        let batch = broadcast_shapes(&[
            &particles.shape()[..nd - 2],
            energy.shape(),
            &charges.shape()[..charges.ndim() - 1],
            &survival.shape()[..survival.ndim() - 1],
        ])?;
        let mut per_particle = batch.clone();
        per_particle.push(n);
        let mut full = per_particle.clone();
        full.push(7);

        Ok(ParticleBeam {
            particles: broadcast_owned(particles, &full)?,
            energy: broadcast_owned(energy, &batch)?,
            particle_charges: broadcast_owned(charges, &per_particle)?,
            survival_probabilities: broadcast_owned(survival, &per_particle)?,
        })
    }

    pub fn from_parameters(parameters: &BeamParameters) -> Result<ParticleBeam> {
        Self::from_parameters_with_rng(parameters, &mut thread_rng())
    }

    /// Samples a 6-D Gaussian with the requested moments. The covariance is
    /// block diagonal in (x, px), (y, py) and (tau, p).
    pub fn from_parameters_with_rng<R: Rng + ?Sized>(
        parameters: &BeamParameters,
        rng: &mut R,
    ) -> Result<ParticleBeam> {
        let p = parameters.resolved();
        let n = p.num_particles;
        if n == 0 {
            return Err(shape("a particle beam needs at least one particle"));
        }
        let [mu_x, mu_px, mu_y, mu_py] = &p.means;
        let [s_x, s_px, s_y, s_py, s_tau, s_p] = &p.sigmas;
        let [c_x, c_y, c_tau] = &p.correlations;
        let rows = map_batch(
            [mu_x, mu_px, mu_y, mu_py, s_x, s_px, s_y, s_py, s_tau, s_p, c_x, c_y, c_tau],
            |v| v,
        )?;

        let mut data = Vec::with_capacity(rows.len() * n * 7);
        for row in rows.iter() {
            let [mx, mpx, my, mpy, sx, spx, sy, spy, stau, sp, cx, cy, ctau] = *row;
            let not_psd = |name: &str| {
                parameter(
                    "ParticleBeam",
                    name,
                    "the requested covariance is not positive semi-definite",
                )
            };
            let lx = cholesky_2x2(sx, spx, cx).ok_or_else(|| not_psd("cor_x"))?;
            let ly = cholesky_2x2(sy, spy, cy).ok_or_else(|| not_psd("cor_y"))?;
            let ltau = cholesky_2x2(stau, sp, ctau).ok_or_else(|| not_psd("cor_tau"))?;
            for _ in 0..n {
                let (x, px) = correlated_pair(rng, lx);
                let (y, py) = correlated_pair(rng, ly);
                let (tau, dp) = correlated_pair(rng, ltau);
                data.extend_from_slice(&[mx + x, mpx + px, my + y, mpy + py, tau, dp, 1.0]);
            }
        }

        let mut full = rows.shape().to_vec();
        full.extend([n, 7]);
        let particles = ArrayD::from_shape_vec(IxDyn(&full), data).map_err(|e| shape(e.to_string()))?;
        let charges = p
            .total_charge
            .mapv(|q| q / n as Float)
            .insert_axis(Axis(p.total_charge.ndim()));
        ParticleBeam::new(particles, p.energy, Some(charges), None)
    }

    pub fn from_twiss(parameters: &TwissParameters) -> Result<ParticleBeam> {
        Self::from_twiss_with_rng(parameters, &mut thread_rng())
    }

    pub fn from_twiss_with_rng<R: Rng + ?Sized>(
        parameters: &TwissParameters,
        rng: &mut R,
    ) -> Result<ParticleBeam> {
        Self::from_parameters_with_rng(&parameters.to_beam_parameters()?, rng)
    }

    pub fn uniform_3d_ellipsoid(parameters: &EllipsoidParameters) -> Result<ParticleBeam> {
        Self::uniform_3d_ellipsoid_with_rng(parameters, &mut thread_rng())
    }

    /// Positions uniform inside the ellipsoid with semi-axes
    /// `(radius_x, radius_y, radius_tau)`, momenta Gaussian. The momentum
    /// sigmas of the result match the requested ones exactly.
    pub fn uniform_3d_ellipsoid_with_rng<R: Rng + ?Sized>(
        parameters: &EllipsoidParameters,
        rng: &mut R,
    ) -> Result<ParticleBeam> {
        let gaussian = parameters.gaussian_parameters();
        let mut beam = Self::from_parameters_with_rng(&gaussian, rng)?;
        let batch = beam.batch_shape().to_vec();
        let n = beam.num_particles();

        let [radius_x, radius_y, radius_tau] = parameters.radii();
        let radii = map_batch([&radius_x, &radius_y, &radius_tau], |v| v)?;
        let radii = broadcast_view(&radii, &batch)?;

        let nb: usize = batch.iter().product();
        let mut particles = beam
            .particles
            .into_shape_with_order((nb, n, 7))
            .map_err(|e| shape(e.to_string()))?;
        for (mut rows, [rx, ry, rtau]) in particles.outer_iter_mut().zip(radii.iter()) {
            for mut row in rows.outer_iter_mut() {
                let r = rng.gen::<Float>().cbrt();
                let theta = (2.0 * rng.gen::<Float>() - 1.0).acos();
                let phi = 2.0 * PI * rng.gen::<Float>();
                let (sin_theta, cos_theta) = theta.sin_cos();
                row[0] = rx * r * sin_theta * phi.cos();
                row[2] = ry * r * sin_theta * phi.sin();
                row[4] = rtau * r * cos_theta;
            }
        }
        let mut full = batch.clone();
        full.extend([n, 7]);
        beam.particles = particles
            .into_shape_with_order(IxDyn(&full))
            .map_err(|e| shape(e.to_string()))?;

        let resolved = gaussian.resolved();
        let zero = ArrayD::zeros(IxDyn(&batch));
        for (index, sigma) in [(1, &resolved.sigmas[1]), (3, &resolved.sigmas[3]), (5, &resolved.sigmas[5])] {
            let sigma = broadcast_view(sigma, &batch)?.to_owned();
            beam.rescale_coordinate(index, &zero, &sigma);
        }
        Ok(beam)
    }

    /// Every coordinate linearly spaced between `mu - sigma` and
    /// `mu + sigma`. Deterministic, which is handy for tests.
    pub fn make_linspaced(parameters: &BeamParameters) -> Result<ParticleBeam> {
        let p = parameters.resolved();
        let n = p.num_particles;
        if n == 0 {
            return Err(shape("a particle beam needs at least one particle"));
        }
        let zero = ArrayD::<Float>::zeros(IxDyn(&[]));
        let [mu_x, mu_px, mu_y, mu_py] = &p.means;
        let [s_x, s_px, s_y, s_py, s_tau, s_p] = &p.sigmas;
        let rows = map_batch(
            [mu_x, s_x, mu_px, s_px, mu_y, s_y, mu_py, s_py, &zero, s_tau, &zero, s_p],
            |v| v,
        )?;
        let mut data = Vec::with_capacity(rows.len() * n * 7);
        for row in rows.iter() {
            let columns: Vec<Array1<Float>> = row
                .chunks(2)
                .map(|ms| Array1::linspace(ms[0] - ms[1], ms[0] + ms[1], n))
                .collect();
            for i in 0..n {
                data.extend(columns.iter().map(|c| c[i]));
                data.push(1.0);
            }
        }
        let mut full = rows.shape().to_vec();
        full.extend([n, 7]);
        let particles = ArrayD::from_shape_vec(IxDyn(&full), data).map_err(|e| shape(e.to_string()))?;
        let charges = p
            .total_charge
            .mapv(|q| q / n as Float)
            .insert_axis(Axis(p.total_charge.ndim()));
        ParticleBeam::new(particles, p.energy, Some(charges), None)
    }

    /// Linspaced beam with the same moments, energy and charge as this one.
    pub fn linspaced(&self, num_particles: usize) -> Result<ParticleBeam> {
        Self::make_linspaced(
            &BeamParameters::new()
                .num_particles(num_particles)
                .mu_x(self.mu_x())
                .mu_px(self.mu_px())
                .mu_y(self.mu_y())
                .mu_py(self.mu_py())
                .sigma_x(self.sigma_x())
                .sigma_px(self.sigma_px())
                .sigma_y(self.sigma_y())
                .sigma_py(self.sigma_py())
                .sigma_tau(self.sigma_tau())
                .sigma_p(self.sigma_p())
                .energy(self.energy.clone())
                .total_charge(self.total_charge()),
        )
    }

    /// Builds a beam from SI coordinates `(*batch, n, 6)` as produced by
    /// [`ParticleBeam::to_xyz_pxpypz`].
    pub fn from_xyz_pxpypz(
        moments: &ArrayD<Float>,
        energy: ArrayD<Float>,
        particle_charges: Option<ArrayD<Float>>,
        survival_probabilities: Option<ArrayD<Float>>,
    ) -> Result<ParticleBeam> {
        let nd = moments.ndim();
        if nd < 2 || moments.shape()[nd - 1] != 6 {
            return Err(shape(format!(
                "moments must have shape (*batch, n, 6), got {:?}",
                moments.shape()
            )));
        }
        let batch = broadcast_shapes(&[&moments.shape()[..nd - 2], energy.shape()])?;
        let n = moments.shape()[nd - 2];
        let mut full = batch.clone();
        full.extend([n, 6]);
        let moments = broadcast_view(moments, &full)?;
        let energy = broadcast_owned(energy, &batch)?;
        let factors = reference_factors(&energy);
        let last = full.len() - 1;
        let mut rows = Vec::with_capacity(moments.len() / 6 * 7);
        for (i, lane) in moments.lanes(Axis(last)).into_iter().enumerate() {
            let (gamma, beta) = factors[i / n];
            let m: [Float; 6] = std::array::from_fn(|k| lane[k]);
            rows.extend_from_slice(&from_xyz_pxpypz_row(&m, gamma, beta));
        }
        full[last] = 7;
        let particles = ArrayD::from_shape_vec(IxDyn(&full), rows).map_err(|e| shape(e.to_string()))?;
        ParticleBeam::new(particles, energy, particle_charges, survival_probabilities)
    }

    /// SI coordinates `(x, px, y, py, z, pz)` of every particle, in metres
    /// and kg m/s.
    pub fn to_xyz_pxpypz(&self) -> Result<ArrayD<Float>> {
        let n = self.num_particles();
        let mut full = self.particles.shape().to_vec();
        let last = full.len() - 1;
        full[last] = 6;
        let factors = reference_factors(&self.energy);
        let mut out = Vec::with_capacity(self.particles.len() / 7 * 6);
        for (i, lane) in self.particles.lanes(Axis(last)).into_iter().enumerate() {
            let (gamma, beta) = factors[i / n];
            let row: [Float; 7] = std::array::from_fn(|k| lane[k]);
            out.extend_from_slice(&to_xyz_pxpypz_row(&row, gamma, beta));
        }
        ArrayD::from_shape_vec(IxDyn(&full), out).map_err(|e| shape(e.to_string()))
    }

    pub fn particles(&self) -> &ArrayD<Float> {
        &self.particles
    }

    pub fn particle_charges(&self) -> &ArrayD<Float> {
        &self.particle_charges
    }

    pub fn survival_probabilities(&self) -> &ArrayD<Float> {
        &self.survival_probabilities
    }

    pub fn batch_shape(&self) -> &[usize] {
        let s = self.particles.shape();
        &s[..s.len() - 2]
    }

    pub fn num_particles(&self) -> usize {
        let s = self.particles.shape();
        s[s.len() - 2]
    }

    /// Expected number of particles that are still alive.
    pub fn num_particles_survived(&self) -> ArrayD<Float> {
        self.survival_probabilities
            .sum_axis(Axis(self.survival_probabilities.ndim() - 1))
    }

    /// One phase-space coordinate of every particle, shape `(*batch, n)`.
    pub fn coordinate(&self, index: usize) -> ArrayViewD<'_, Float> {
        self.particles.index_axis(Axis(self.particles.ndim() - 1), index)
    }

    pub fn x(&self) -> ArrayViewD<'_, Float> {
        self.coordinate(0)
    }

    pub fn px(&self) -> ArrayViewD<'_, Float> {
        self.coordinate(1)
    }

    pub fn y(&self) -> ArrayViewD<'_, Float> {
        self.coordinate(2)
    }

    pub fn py(&self) -> ArrayViewD<'_, Float> {
        self.coordinate(3)
    }

    pub fn tau(&self) -> ArrayViewD<'_, Float> {
        self.coordinate(4)
    }

    pub fn p(&self) -> ArrayViewD<'_, Float> {
        self.coordinate(5)
    }

    /// The same beam repeated over a larger batch.
    pub fn broadcast_batch(&self, batch: &[usize]) -> Result<ParticleBeam> {
        if self.batch_shape() == batch {
            return Ok(self.clone());
        }
        let n = self.num_particles();
        let mut per_particle = batch.to_vec();
        per_particle.push(n);
        let mut full = per_particle.clone();
        full.push(7);
        Ok(ParticleBeam {
            particles: broadcast_view(&self.particles, &full)?.to_owned(),
            energy: broadcast_view(&self.energy, batch)?.to_owned(),
            particle_charges: broadcast_view(&self.particle_charges, &per_particle)?.to_owned(),
            survival_probabilities: broadcast_view(&self.survival_probabilities, &per_particle)?
                .to_owned(),
        })
    }

    pub(crate) fn with_survival_probabilities(mut self, survival: ArrayD<Float>) -> ParticleBeam {
        self.survival_probabilities = survival;
        self
    }

    /// Applies one transfer map per batch entry to every particle.
    pub(crate) fn transformed_by(&self, maps: &MapArray, energy: &ArrayD<Float>) -> Result<ParticleBeam> {
        let batch = broadcast_shapes(&[maps.shape(), self.batch_shape(), energy.shape()])?;
        let beam = self.broadcast_batch(&batch)?;
        let maps = broadcast_view(maps, &batch)?.insert_axis(Axis(batch.len()));
        let mut particles = beam.particles;
        let last = particles.ndim() - 1;

        Zip::from(particles.lanes_mut(Axis(last)))
            .and_broadcast(&maps)
            .par_for_each(|mut lane, m| {
                let v = Vector7::from_fn(|i, _| lane[i]);
                let out = m * v;
                for (dst, src) in lane.iter_mut().zip(out.iter()) {
                    *dst = *src;
                }
            });

        Ok(ParticleBeam {
            particles,
            energy: broadcast_owned(energy.clone(), &batch)?,
            particle_charges: beam.particle_charges,
            survival_probabilities: beam.survival_probabilities,
        })
    }

    /// Moves coordinate `index` so that its weighted mean and sigma become
    /// `mu` and `sigma` (both of batch shape). A coordinate without spread
    /// collapses onto `mu`.
    fn rescale_coordinate(&mut self, index: usize, mu: &ArrayD<Float>, sigma: &ArrayD<Float>) {
        let (old_mu, old_sigma) = {
            let column = self.coordinate(index);
            let weights = self.survival_probabilities.view();
            (weighted_mean(&column, &weights), weighted_std(&column, &weights))
        };
        let scale = Zip::from(&old_sigma)
            .and(sigma)
            .map_collect(|&old, &new| if old > 0.0 && old.is_finite() { new / old } else { 0.0 });
        let axis = Axis(old_mu.ndim());
        let old_mu = old_mu.insert_axis(axis);
        let scale = scale.insert_axis(axis);
        let mu = mu.view().insert_axis(axis);

        let last = self.particles.ndim() - 1;
        let mut column = self.particles.index_axis_mut(Axis(last), index);
        Zip::from(&mut column)
            .and_broadcast(&old_mu)
            .and_broadcast(&scale)
            .and_broadcast(&mu)
            .for_each(|v, &m0, &s, &m1| *v = (*v - m0) * s + m1);
    }

    /// Affine reshaping of every coordinate so that the requested means and
    /// sigmas are met exactly. Only the fields set in `target` change. The
    /// longitudinal means are kept.
    pub fn transformed_to(&self, target: &BeamParameters) -> Result<ParticleBeam> {
        let mut shapes = target.set_shapes();
        shapes.push(self.batch_shape());
        let batch = broadcast_shapes(&shapes)?;
        let mut beam = self.broadcast_batch(&batch)?;

        let requests = [
            (0, target.mu_x.as_ref(), target.sigma_x.as_ref()),
            (1, target.mu_px.as_ref(), target.sigma_px.as_ref()),
            (2, target.mu_y.as_ref(), target.sigma_y.as_ref()),
            (3, target.mu_py.as_ref(), target.sigma_py.as_ref()),
            (4, None, target.sigma_tau.as_ref()),
            (5, None, target.sigma_p.as_ref()),
        ];
        for (index, mu, sigma) in requests {
            if mu.is_none() && sigma.is_none() {
                continue;
            }
            let mu = match mu {
                Some(m) => broadcast_view(m, &batch)?.to_owned(),
                None => beam.mu(index),
            };
            let sigma = match sigma {
                Some(s) => broadcast_view(s, &batch)?.to_owned(),
                None => beam.covariance(index, index).mapv(Float::sqrt),
            };
            beam.rescale_coordinate(index, &mu, &sigma);
        }

        if let Some(energy) = &target.energy {
            beam.energy = broadcast_view(energy, &batch)?.to_owned();
        }
        if let Some(total) = &target.total_charge {
            let total = broadcast_view(total, &batch)?;
            let old_total = beam.total_charge();
            let survived = beam.num_particles_survived();
            let n = beam.num_particles() as Float;
            // q' = q * scale + offset, uniform charges when there was none
            let scale = Zip::from(&total)
                .and(&old_total)
                .map_collect(|&new, &old| if old != 0.0 { new / old } else { 0.0 });
            let offset = Zip::from(&total)
                .and(&old_total)
                .and(&survived)
                .map_collect(|&new, &old, &alive| match (old != 0.0, alive > 0.0) {
                    (true, _) => 0.0,
                    (false, true) => new / alive,
                    (false, false) => new / n,
                });
            let axis = Axis(batch.len());
            let scale = scale.insert_axis(axis);
            let offset = offset.insert_axis(axis);
            Zip::from(&mut beam.particle_charges)
                .and_broadcast(&scale)
                .and_broadcast(&offset)
                .for_each(|q, &a, &b| *q = *q * a + b);
        }
        Ok(beam)
    }

    /// Collapses the ensemble to its weighted mean and covariance.
    pub fn as_parameter_beam(&self) -> Result<ParameterBeam> {
        let batch = self.batch_shape().to_vec();
        let means: Vec<Vec<Float>> = (0..6)
            .map(|i| self.mu(i).iter().copied().collect())
            .collect();
        let mut covariances = vec![Vec::new(); 36];
        for i in 0..6 {
            for j in i..6 {
                covariances[i * 6 + j] = self.covariance(i, j).iter().copied().collect();
            }
        }
        let size: usize = batch.iter().product();
        let mean: Vec<Vector6> = (0..size)
            .map(|k| Vector6::from_fn(|i, _| means[i][k]))
            .collect();
        let cov: Vec<Matrix6> = (0..size)
            .map(|k| Matrix6::from_fn(|i, j| covariances[i.min(j) * 6 + i.max(j)][k]))
            .collect();
        ParameterBeam::new(
            ArrayD::from_shape_vec(IxDyn(&batch), mean).map_err(|e| shape(e.to_string()))?,
            ArrayD::from_shape_vec(IxDyn(&batch), cov).map_err(|e| shape(e.to_string()))?,
            self.energy.clone(),
            self.total_charge(),
        )
    }
}

impl BeamMoments for ParticleBeam {
    fn energy(&self) -> &ArrayD<Float> {
        &self.energy
    }

    /// Charge of the particles that survived, `Σ q_i s_i`.
    fn total_charge(&self) -> ArrayD<Float> {
        (&self.particle_charges * &self.survival_probabilities)
            .sum_axis(Axis(self.particle_charges.ndim() - 1))
    }

    fn mu(&self, index: usize) -> ArrayD<Float> {
        weighted_mean(&self.coordinate(index), &self.survival_probabilities.view())
    }

    fn covariance(&self, i: usize, j: usize) -> ArrayD<Float> {
        weighted_covariance(
            &self.coordinate(i),
            &self.coordinate(j),
            &self.survival_probabilities.view(),
        )
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::batch::param;
    use crate::E_TOL;
    use ndarray::array;

    fn seeded() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn constructor_rejects_bad_shapes() {
        let energy = param(1e8);
        assert!(ParticleBeam::new(ArrayD::zeros(IxDyn(&[10, 6])), energy.clone(), None, None).is_err());
        assert!(ParticleBeam::new(ArrayD::zeros(IxDyn(&[0, 7])), energy.clone(), None, None).is_err());
        assert!(ParticleBeam::new(ArrayD::zeros(IxDyn(&[7])), energy.clone(), None, None).is_err());
        let beam = ParticleBeam::new(
            ArrayD::zeros(IxDyn(&[3, 10, 7])),
            energy,
            Some(param(vec![1e-12; 10])),
            None,
        )
        .unwrap();
        assert_eq!(beam.batch_shape(), &[3]);
        assert_eq!(beam.particle_charges().shape(), &[3, 10]);
        assert_eq!(beam.energy().shape(), &[3]);
    }

    #[test]
    fn energy_below_rest_is_rejected() {
        let particles = ArrayD::zeros(IxDyn(&[10, 7]));
        let err = ParticleBeam::new(particles.clone(), param(vec![1e8, 1e5]), None, None).unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidParameter { .. }));
        assert!(ParticleBeam::new(particles.clone(), param(Float::NAN), None, None).is_err());
        let params = BeamParameters::default().num_particles(10).energy(0.0);
        assert!(ParticleBeam::from_parameters_with_rng(&params, &mut seeded()).is_err());
        assert!(ParameterBeam::from_parameters(&params).is_err());
        // exactly at rest is still a beam
        assert!(ParticleBeam::new(particles, param(crate::ELECTRON_MASS_EV), None, None).is_ok());
    }

    #[test]
    fn cholesky_handles_zero_sigma() {
        assert_eq!(cholesky_2x2(0.0, 2.0, 0.0), Some((0.0, 0.0, 2.0)));
        assert!(cholesky_2x2(0.0, 2.0, 1.0).is_none());
        let (l11, l21, l22) = cholesky_2x2(2.0, 3.0, 1.5).unwrap();
        assert!((l11 * l11 - 4.0).abs() < E_TOL);
        assert!((l11 * l21 - 1.5).abs() < E_TOL);
        assert!((l21 * l21 + l22 * l22 - 9.0).abs() < E_TOL);
    }

    #[test]
    fn from_parameters_batches_over_parameters() {
        let params = BeamParameters::new()
            .num_particles(1000)
            .sigma_x(vec![1e-6, 2e-6])
            .energy(array![[1e8], [2e8], [3e8]]);
        let beam = ParticleBeam::from_parameters_with_rng(&params, &mut seeded()).unwrap();
        assert_eq!(beam.batch_shape(), &[3, 2]);
        assert_eq!(beam.particles().shape(), &[3, 2, 1000, 7]);
        assert!(beam.particles().index_axis(Axis(3), 6).iter().all(|&v| v == 1.0));
    }

    #[test]
    fn total_charge_ignores_lost_particles() {
        let beam = ParticleBeam::new(
            ArrayD::zeros(IxDyn(&[4, 7])),
            param(1e8),
            Some(param(vec![1.0, 1.0, 1.0, 1.0])),
            Some(param(vec![1.0, 0.5, 0.0, 1.0])),
        )
        .unwrap();
        assert!((beam.total_charge().sum() - 2.5).abs() < E_TOL);
        assert!((beam.num_particles_survived().sum() - 2.5).abs() < E_TOL);
    }

    #[test]
    fn si_coordinates_round_trip() {
        let params = BeamParameters::new()
            .num_particles(100)
            .sigma_p(1e-3)
            .sigma_tau(1e-4)
            .sigma_px(1e-4);
        let beam = ParticleBeam::from_parameters_with_rng(&params, &mut seeded()).unwrap();
        let moments = beam.to_xyz_pxpypz().unwrap();
        assert_eq!(moments.shape(), &[100, 6]);
        let back = ParticleBeam::from_xyz_pxpypz(&moments, beam.energy().clone(), None, None).unwrap();
        for (a, b) in beam.particles().iter().zip(back.particles().iter()) {
            assert!((a - b).abs() < 1e-9 * (1.0 + a.abs()), "{} != {}", a, b);
        }
    }

    #[test]
    fn linspaced_beam_spans_one_sigma() {
        let params = BeamParameters::new().num_particles(5).mu_x(1.0).sigma_x(0.5);
        let beam = ParticleBeam::make_linspaced(&params).unwrap();
        let x = beam.x();
        assert!((x[[0]] - 0.5).abs() < E_TOL);
        assert!((x[[4]] - 1.5).abs() < E_TOL);
    }
}

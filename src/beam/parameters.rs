use crate::batch::{map_batch, param, IntoParam};
use crate::error::Result;
use crate::Float;
use ndarray::ArrayD;

pub(crate) const DEFAULT_NUM_PARTICLES: usize = 100_000;
pub(crate) const DEFAULT_SIGMA_X: Float = 175e-9;
pub(crate) const DEFAULT_SIGMA_PX: Float = 2e-7;
pub(crate) const DEFAULT_SIGMA_Y: Float = 175e-9;
pub(crate) const DEFAULT_SIGMA_PY: Float = 2e-7;
pub(crate) const DEFAULT_SIGMA_TAU: Float = 1e-6;
pub(crate) const DEFAULT_SIGMA_P: Float = 1e-6;
pub(crate) const DEFAULT_ENERGY: Float = 1e8;
pub(crate) const DEFAULT_EMITTANCE: Float = 7.1971891e-13;
pub(crate) const DEFAULT_RADIUS: Float = 1e-3;

macro_rules! setters {
    ($($field:ident),* $(,)?) => {
        $(
            pub fn $field(mut self, value: impl IntoParam) -> Self {
                self.$field = Some(value.into_param());
                self
            }
        )*
    };
}

fn or_default(value: &Option<ArrayD<Float>>, default: Float) -> ArrayD<Float> {
    value.clone().unwrap_or_else(|| param(default))
}

/// Requested first and second moments of a beam. Unset fields take the
/// defaults of a low emittance electron beam. Every field may be batched.
///
/// `transformed_to` reads the same struct but only honours the fields that
/// are set, leaving everything else as it is.
#[derive(Debug, Clone, Default)]
pub struct BeamParameters {
    pub num_particles: Option<usize>,
    pub mu_x: Option<ArrayD<Float>>,
    pub mu_px: Option<ArrayD<Float>>,
    pub mu_y: Option<ArrayD<Float>>,
    pub mu_py: Option<ArrayD<Float>>,
    pub sigma_x: Option<ArrayD<Float>>,
    pub sigma_px: Option<ArrayD<Float>>,
    pub sigma_y: Option<ArrayD<Float>>,
    pub sigma_py: Option<ArrayD<Float>>,
    pub sigma_tau: Option<ArrayD<Float>>,
    pub sigma_p: Option<ArrayD<Float>>,
    pub cor_x: Option<ArrayD<Float>>,
    pub cor_y: Option<ArrayD<Float>>,
    pub cor_tau: Option<ArrayD<Float>>,
    pub energy: Option<ArrayD<Float>>,
    pub total_charge: Option<ArrayD<Float>>,
}

/// `BeamParameters` with every default filled in.
pub(crate) struct ResolvedParameters {
    pub num_particles: usize,
    /// mu_x, mu_px, mu_y, mu_py
    pub means: [ArrayD<Float>; 4],
    /// x, px, y, py, tau, p
    pub sigmas: [ArrayD<Float>; 6],
    /// x-px, y-py, tau-p
    pub correlations: [ArrayD<Float>; 3],
    pub energy: ArrayD<Float>,
    pub total_charge: ArrayD<Float>,
}

impl BeamParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_particles(mut self, num_particles: usize) -> Self {
        self.num_particles = Some(num_particles);
        self
    }

    setters!(
        mu_x,
        mu_px,
        mu_y,
        mu_py,
        sigma_x,
        sigma_px,
        sigma_y,
        sigma_py,
        sigma_tau,
        sigma_p,
        cor_x,
        cor_y,
        cor_tau,
        energy,
        total_charge,
    );

    pub(crate) fn resolved(&self) -> ResolvedParameters {
        ResolvedParameters {
            num_particles: self.num_particles.unwrap_or(DEFAULT_NUM_PARTICLES),
            means: [
                or_default(&self.mu_x, 0.0),
                or_default(&self.mu_px, 0.0),
                or_default(&self.mu_y, 0.0),
                or_default(&self.mu_py, 0.0),
            ],
            sigmas: [
                or_default(&self.sigma_x, DEFAULT_SIGMA_X),
                or_default(&self.sigma_px, DEFAULT_SIGMA_PX),
                or_default(&self.sigma_y, DEFAULT_SIGMA_Y),
                or_default(&self.sigma_py, DEFAULT_SIGMA_PY),
                or_default(&self.sigma_tau, DEFAULT_SIGMA_TAU),
                or_default(&self.sigma_p, DEFAULT_SIGMA_P),
            ],
            correlations: [
                or_default(&self.cor_x, 0.0),
                or_default(&self.cor_y, 0.0),
                or_default(&self.cor_tau, 0.0),
            ],
            energy: or_default(&self.energy, DEFAULT_ENERGY),
            total_charge: or_default(&self.total_charge, 0.0),
        }
    }

    /// Shapes of every field that is set.
    pub(crate) fn set_shapes(&self) -> Vec<&[usize]> {
        [
            &self.mu_x,
            &self.mu_px,
            &self.mu_y,
            &self.mu_py,
            &self.sigma_x,
            &self.sigma_px,
            &self.sigma_y,
            &self.sigma_py,
            &self.sigma_tau,
            &self.sigma_p,
            &self.energy,
            &self.total_charge,
        ]
        .into_iter()
        .flatten()
        .map(|a| a.shape())
        .collect()
    }
}

/// Beam described by Twiss parameters in both transverse planes.
#[derive(Debug, Clone, Default)]
pub struct TwissParameters {
    pub num_particles: Option<usize>,
    pub beta_x: Option<ArrayD<Float>>,
    pub alpha_x: Option<ArrayD<Float>>,
    pub emittance_x: Option<ArrayD<Float>>,
    pub beta_y: Option<ArrayD<Float>>,
    pub alpha_y: Option<ArrayD<Float>>,
    pub emittance_y: Option<ArrayD<Float>>,
    pub sigma_tau: Option<ArrayD<Float>>,
    pub sigma_p: Option<ArrayD<Float>>,
    pub cor_tau: Option<ArrayD<Float>>,
    pub energy: Option<ArrayD<Float>>,
    pub total_charge: Option<ArrayD<Float>>,
}

impl TwissParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_particles(mut self, num_particles: usize) -> Self {
        self.num_particles = Some(num_particles);
        self
    }

    setters!(
        beta_x,
        alpha_x,
        emittance_x,
        beta_y,
        alpha_y,
        emittance_y,
        sigma_tau,
        sigma_p,
        cor_tau,
        energy,
        total_charge,
    );

    /// sigma = sqrt(beta eps), sigma' = sqrt(eps (1 + alpha^2) / beta) and
    /// cor = -eps alpha in each transverse plane.
    pub fn to_beam_parameters(&self) -> Result<BeamParameters> {
        let beta_x = or_default(&self.beta_x, 1.0);
        let alpha_x = or_default(&self.alpha_x, 0.0);
        let emittance_x = or_default(&self.emittance_x, DEFAULT_EMITTANCE);
        let beta_y = or_default(&self.beta_y, 1.0);
        let alpha_y = or_default(&self.alpha_y, 0.0);
        let emittance_y = or_default(&self.emittance_y, DEFAULT_EMITTANCE);

        let sigma = |beta: &ArrayD<Float>, emittance: &ArrayD<Float>| {
            map_batch([beta, emittance], |[b, e]| (b * e).sqrt())
        };
        let sigma_prime = |beta: &ArrayD<Float>, alpha: &ArrayD<Float>, emittance: &ArrayD<Float>| {
            map_batch([beta, alpha, emittance], |[b, a, e]| (e * (1.0 + a * a) / b).sqrt())
        };
        let correlation = |alpha: &ArrayD<Float>, emittance: &ArrayD<Float>| {
            map_batch([alpha, emittance], |[a, e]| -e * a)
        };

        Ok(BeamParameters {
            num_particles: self.num_particles,
            sigma_x: Some(sigma(&beta_x, &emittance_x)?),
            sigma_px: Some(sigma_prime(&beta_x, &alpha_x, &emittance_x)?),
            cor_x: Some(correlation(&alpha_x, &emittance_x)?),
            sigma_y: Some(sigma(&beta_y, &emittance_y)?),
            sigma_py: Some(sigma_prime(&beta_y, &alpha_y, &emittance_y)?),
            cor_y: Some(correlation(&alpha_y, &emittance_y)?),
            sigma_tau: self.sigma_tau.clone(),
            sigma_p: self.sigma_p.clone(),
            cor_tau: self.cor_tau.clone(),
            energy: self.energy.clone(),
            total_charge: self.total_charge.clone(),
            ..BeamParameters::default()
        })
    }
}

/// Particles uniformly distributed in a position ellipsoid with Gaussian
/// momenta.
#[derive(Debug, Clone, Default)]
pub struct EllipsoidParameters {
    pub num_particles: Option<usize>,
    pub radius_x: Option<ArrayD<Float>>,
    pub radius_y: Option<ArrayD<Float>>,
    pub radius_tau: Option<ArrayD<Float>>,
    pub sigma_px: Option<ArrayD<Float>>,
    pub sigma_py: Option<ArrayD<Float>>,
    pub sigma_p: Option<ArrayD<Float>>,
    pub energy: Option<ArrayD<Float>>,
    pub total_charge: Option<ArrayD<Float>>,
}

impl EllipsoidParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_particles(mut self, num_particles: usize) -> Self {
        self.num_particles = Some(num_particles);
        self
    }

    setters!(
        radius_x,
        radius_y,
        radius_tau,
        sigma_px,
        sigma_py,
        sigma_p,
        energy,
        total_charge,
    );

    pub(crate) fn radii(&self) -> [ArrayD<Float>; 3] {
        [
            or_default(&self.radius_x, DEFAULT_RADIUS),
            or_default(&self.radius_y, DEFAULT_RADIUS),
            or_default(&self.radius_tau, DEFAULT_RADIUS),
        ]
    }

    /// Gaussian beam the ellipsoid is carved from. The radii stand in for
    /// the position sigmas so that the batch shape already accounts for them.
    pub(crate) fn gaussian_parameters(&self) -> BeamParameters {
        let [radius_x, radius_y, radius_tau] = self.radii();
        BeamParameters {
            num_particles: self.num_particles,
            sigma_x: Some(radius_x),
            sigma_y: Some(radius_y),
            sigma_tau: Some(radius_tau),
            sigma_px: self.sigma_px.clone(),
            sigma_py: self.sigma_py.clone(),
            sigma_p: self.sigma_p.clone(),
            energy: self.energy.clone(),
            total_charge: self.total_charge.clone(),
            ..BeamParameters::default()
        }
    }
}

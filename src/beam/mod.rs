pub mod interchange;
mod parameter;
mod parameters;
mod particle;
pub(crate) mod stats;

pub use parameter::ParameterBeam;
pub use parameters::{BeamParameters, EllipsoidParameters, TwissParameters};
pub use particle::ParticleBeam;
pub(crate) use particle::{from_xyz_pxpypz_row, to_xyz_pxpypz_row};

use crate::batch::MapArray;
use crate::error::{parameter, Result};
use crate::{relativistic_factors, Float, ELECTRON_MASS_EV};
use ndarray::ArrayD;

/// The beam handed from element to element. `Empty` is what an element
/// receives when nothing is left to track and it passes through unchanged.
#[derive(Debug, Clone)]
pub enum Beam {
    Empty,
    Parameter(ParameterBeam),
    Particle(ParticleBeam),
}

impl From<ParameterBeam> for Beam {
    fn from(beam: ParameterBeam) -> Self {
        Beam::Parameter(beam)
    }
}

impl From<ParticleBeam> for Beam {
    fn from(beam: ParticleBeam) -> Self {
        Beam::Particle(beam)
    }
}

impl Beam {
    /// Name of the representation, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Beam::Empty => "EmptyBeam",
            Beam::Parameter(_) => "ParameterBeam",
            Beam::Particle(_) => "ParticleBeam",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Beam::Empty)
    }

    pub fn energy(&self) -> Option<&ArrayD<Float>> {
        match self {
            Beam::Empty => None,
            Beam::Parameter(b) => Some(b.energy()),
            Beam::Particle(b) => Some(b.energy()),
        }
    }

    pub fn batch_shape(&self) -> &[usize] {
        match self {
            Beam::Empty => &[],
            Beam::Parameter(b) => b.batch_shape(),
            Beam::Particle(b) => b.batch_shape(),
        }
    }

    pub fn as_particle(&self) -> Option<&ParticleBeam> {
        match self {
            Beam::Particle(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_parameter(&self) -> Option<&ParameterBeam> {
        match self {
            Beam::Parameter(b) => Some(b),
            _ => None,
        }
    }

    pub fn mu_x(&self) -> Option<ArrayD<Float>> {
        match self {
            Beam::Empty => None,
            Beam::Parameter(b) => Some(b.mu_x()),
            Beam::Particle(b) => Some(b.mu_x()),
        }
    }

    pub fn mu_y(&self) -> Option<ArrayD<Float>> {
        match self {
            Beam::Empty => None,
            Beam::Parameter(b) => Some(b.mu_y()),
            Beam::Particle(b) => Some(b.mu_y()),
        }
    }

    /// Applies a batch of transfer maps and sets the outgoing reference
    /// energy. An empty beam stays empty.
    pub fn transformed_by(&self, maps: &MapArray, energy: &ArrayD<Float>) -> Result<Beam> {
        Ok(match self {
            Beam::Empty => Beam::Empty,
            Beam::Parameter(b) => Beam::Parameter(b.transformed_by(maps, energy)?),
            Beam::Particle(b) => Beam::Particle(b.transformed_by(maps, energy)?),
        })
    }
}

/// Total energies below the electron rest energy describe no physical beam.
pub(crate) fn check_energy(energy: &ArrayD<Float>) -> Result<()> {
    match energy.iter().find(|&&e| !(e >= ELECTRON_MASS_EV)) {
        Some(e) => Err(parameter(
            "beam",
            "energy",
            format!("{} eV is below the electron rest energy", e),
        )),
        None => Ok(()),
    }
}

/// Statistics shared by both beam representations. Index `i` runs over
/// `(x, px, y, py, tau, p)`. Every method returns one value per batch entry.
pub trait BeamMoments {
    fn energy(&self) -> &ArrayD<Float>;
    fn total_charge(&self) -> ArrayD<Float>;
    fn mu(&self, index: usize) -> ArrayD<Float>;
    fn covariance(&self, i: usize, j: usize) -> ArrayD<Float>;

    fn mu_x(&self) -> ArrayD<Float> {
        self.mu(0)
    }

    fn mu_px(&self) -> ArrayD<Float> {
        self.mu(1)
    }

    fn mu_y(&self) -> ArrayD<Float> {
        self.mu(2)
    }

    fn mu_py(&self) -> ArrayD<Float> {
        self.mu(3)
    }

    fn mu_tau(&self) -> ArrayD<Float> {
        self.mu(4)
    }

    fn mu_p(&self) -> ArrayD<Float> {
        self.mu(5)
    }

    fn sigma(&self, index: usize) -> ArrayD<Float> {
        self.covariance(index, index).mapv(|v| v.max(0.0).sqrt())
    }

    fn sigma_x(&self) -> ArrayD<Float> {
        self.sigma(0)
    }

    fn sigma_px(&self) -> ArrayD<Float> {
        self.sigma(1)
    }

    fn sigma_y(&self) -> ArrayD<Float> {
        self.sigma(2)
    }

    fn sigma_py(&self) -> ArrayD<Float> {
        self.sigma(3)
    }

    fn sigma_tau(&self) -> ArrayD<Float> {
        self.sigma(4)
    }

    fn sigma_p(&self) -> ArrayD<Float> {
        self.sigma(5)
    }

    fn sigma_xpx(&self) -> ArrayD<Float> {
        self.covariance(0, 1)
    }

    fn sigma_ypy(&self) -> ArrayD<Float> {
        self.covariance(2, 3)
    }

    fn sigma_taup(&self) -> ArrayD<Float> {
        self.covariance(4, 5)
    }

    fn relativistic_gamma(&self) -> ArrayD<Float> {
        self.energy().mapv(|e| relativistic_factors(e).0)
    }

    fn relativistic_beta(&self) -> ArrayD<Float> {
        self.energy().mapv(|e| relativistic_factors(e).2)
    }

    /// Reference momentum times c, in eV.
    fn p0c(&self) -> ArrayD<Float> {
        self.energy().mapv(|e| {
            let (gamma, _, beta) = relativistic_factors(e);
            gamma * beta * ELECTRON_MASS_EV
        })
    }

    /// Geometric rms emittance of the plane starting at coordinate `index`.
    fn emittance(&self, index: usize) -> ArrayD<Float> {
        let xx = self.covariance(index, index);
        let pp = self.covariance(index + 1, index + 1);
        let xp = self.covariance(index, index + 1);
        let mut out = xx * &pp;
        out.zip_mut_with(&xp, |v, c| *v = (*v - c * c).max(0.0).sqrt());
        out
    }

    fn emittance_x(&self) -> ArrayD<Float> {
        self.emittance(0)
    }

    fn emittance_y(&self) -> ArrayD<Float> {
        self.emittance(2)
    }

    fn normalized_emittance_x(&self) -> ArrayD<Float> {
        self.emittance_x() * &self.relativistic_gamma() * &self.relativistic_beta()
    }

    fn normalized_emittance_y(&self) -> ArrayD<Float> {
        self.emittance_y() * &self.relativistic_gamma() * &self.relativistic_beta()
    }

    fn beta_x(&self) -> ArrayD<Float> {
        self.covariance(0, 0) / &self.emittance_x()
    }

    fn beta_y(&self) -> ArrayD<Float> {
        self.covariance(2, 2) / &self.emittance_y()
    }

    fn alpha_x(&self) -> ArrayD<Float> {
        -self.covariance(0, 1) / &self.emittance_x()
    }

    fn alpha_y(&self) -> ArrayD<Float> {
        -self.covariance(2, 3) / &self.emittance_y()
    }
}

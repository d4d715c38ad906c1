use rand::prelude::*;
use serde::Deserialize;
use std::fs;

use anyhow::{Context, Result};
use tracing::info;

pub mod batch;
pub mod beam;
pub mod elements;
pub mod error;
pub mod lattice;
pub mod save;
pub mod space_charge;

pub use batch::{param, IntoParam, MapArray, Matrix6, Matrix7, Vector6, Vector7};
pub use beam::{
    Beam, BeamMoments, BeamParameters, EllipsoidParameters, ParameterBeam, ParticleBeam,
    TwissParameters,
};
pub use elements::{BeamElement, Element, Segment};
pub use error::Error;
pub use lattice::{ElementDescriptor, ParamValue};

// We use a type alias for f64/Float to easily support
// double and single precision.
#[cfg(feature = "dprec")]
pub type Float = f64;

#[cfg(not(feature = "dprec"))]
pub type Float = f32;

pub const PI: Float = std::f64::consts::PI as Float;

pub const SPEED_OF_LIGHT: Float = 299_792_458.0;
pub const ELEMENTARY_CHARGE: Float = 1.602_176_634e-19;
pub const EPSILON_0: Float = 8.854_187_812_8e-12;
pub const ELECTRON_MASS: Float = 9.109_383_701_5e-31;
/// Electron rest energy in eV.
pub const ELECTRON_MASS_EV: Float = 510_998.950_00;

/// Particles handed to a single rayon task.
pub const PARTICLE_CHUNK_SIZE: usize = 4096;

#[cfg(test)]
pub(crate) const E_TOL: Float = 1E-10;

/// Lorentz factor, 1/gamma^2 and beta of the reference particle. A zero
/// energy has no 1/gamma^2 term, and beta is 0 at or below the rest energy.
pub(crate) fn relativistic_factors(energy: Float) -> (Float, Float, Float) {
    let gamma = energy / ELECTRON_MASS_EV;
    let igamma2 = if gamma == 0.0 { 0.0 } else { gamma.powi(-2) };
    let beta = if gamma > 1.0 { (1.0 - igamma2).sqrt() } else { 0.0 };
    (gamma, igamma2, beta)
}

#[derive(Deserialize)]
pub struct Config {
    pub beam: BeamConfig,
    #[serde(default)]
    pub lattice: Vec<ElementDescriptor>,
    #[serde(default)]
    pub tracking: Tracking,
    pub output: Output,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    Gaussian,
    Twiss,
    Ellipsoid,
}

#[derive(Deserialize, Default)]
pub struct BeamConfig {
    pub distribution: Option<Distribution>,
    pub num_particles: Option<usize>,
    /// Track first and second moments only instead of macroparticles.
    #[serde(default)]
    pub parameter_beam: bool,
    pub seed: Option<u64>,
    pub energy: Option<Float>,
    pub total_charge: Option<Float>,
    pub mu_x: Option<Float>,
    pub mu_px: Option<Float>,
    pub mu_y: Option<Float>,
    pub mu_py: Option<Float>,
    pub sigma_x: Option<Float>,
    pub sigma_px: Option<Float>,
    pub sigma_y: Option<Float>,
    pub sigma_py: Option<Float>,
    pub sigma_tau: Option<Float>,
    pub sigma_p: Option<Float>,
    pub cor_x: Option<Float>,
    pub cor_y: Option<Float>,
    pub cor_tau: Option<Float>,
    pub beta_x: Option<Float>,
    pub alpha_x: Option<Float>,
    pub emittance_x: Option<Float>,
    pub beta_y: Option<Float>,
    pub alpha_y: Option<Float>,
    pub emittance_y: Option<Float>,
    pub radius_x: Option<Float>,
    pub radius_y: Option<Float>,
    pub radius_tau: Option<Float>,
}

#[derive(Deserialize, Default)]
pub struct Tracking {
    pub split_resolution: Option<Float>,
}

#[derive(Deserialize)]
pub struct Output {
    pub write_output: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Save every `stride`-th particle.
    #[serde(default = "default_stride")]
    pub stride: usize,
    /// Save the beam after every element instead of only at the end.
    #[serde(default)]
    pub every_element: bool,
}

fn default_output_dir() -> String {
    "output".to_string()
}

fn default_stride() -> usize {
    1
}

impl Config {
    pub fn new() -> Result<Config> {
        let contents =
            fs::read_to_string("config.toml").context("Could not open the config.toml file")?;
        Config::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Config> {
        toml::from_str(contents).with_context(|| "Could not parse Config file")
    }
}

impl BeamConfig {
    fn parameters(&self) -> BeamParameters {
        let mut params = BeamParameters::default();
        if let Some(n) = self.num_particles {
            params = params.num_particles(n);
        }
        macro_rules! copy_fields {
            ($($field:ident),*) => {
                $(if let Some(v) = self.$field {
                    params = params.$field(v);
                })*
            };
        }
        copy_fields!(
            energy, total_charge, mu_x, mu_px, mu_y, mu_py, sigma_x, sigma_px, sigma_y, sigma_py,
            sigma_tau, sigma_p, cor_x, cor_y, cor_tau
        );
        params
    }

    fn twiss(&self) -> TwissParameters {
        let mut params = TwissParameters::default();
        if let Some(n) = self.num_particles {
            params = params.num_particles(n);
        }
        macro_rules! copy_fields {
            ($($field:ident),*) => {
                $(if let Some(v) = self.$field {
                    params = params.$field(v);
                })*
            };
        }
        copy_fields!(
            energy,
            total_charge,
            beta_x,
            alpha_x,
            emittance_x,
            beta_y,
            alpha_y,
            emittance_y,
            sigma_tau,
            sigma_p,
            cor_tau
        );
        params
    }

    fn ellipsoid(&self) -> EllipsoidParameters {
        let mut params = EllipsoidParameters::default();
        if let Some(n) = self.num_particles {
            params = params.num_particles(n);
        }
        macro_rules! copy_fields {
            ($($field:ident),*) => {
                $(if let Some(v) = self.$field {
                    params = params.$field(v);
                })*
            };
        }
        copy_fields!(
            energy,
            total_charge,
            radius_x,
            radius_y,
            radius_tau,
            sigma_px,
            sigma_py,
            sigma_p
        );
        params
    }

    pub fn build<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Beam> {
        let distribution = self.distribution.unwrap_or(Distribution::Gaussian);
        let beam = match (distribution, self.parameter_beam) {
            (Distribution::Gaussian, false) => {
                Beam::Particle(ParticleBeam::from_parameters_with_rng(&self.parameters(), rng)?)
            }
            (Distribution::Gaussian, true) => {
                Beam::Parameter(ParameterBeam::from_parameters(&self.parameters())?)
            }
            (Distribution::Twiss, false) => {
                Beam::Particle(ParticleBeam::from_twiss_with_rng(&self.twiss(), rng)?)
            }
            (Distribution::Twiss, true) => Beam::Parameter(ParameterBeam::from_twiss(&self.twiss())?),
            (Distribution::Ellipsoid, false) => Beam::Particle(
                ParticleBeam::uniform_3d_ellipsoid_with_rng(&self.ellipsoid(), rng)?,
            ),
            (Distribution::Ellipsoid, true) => {
                return Err(anyhow::Error::msg(
                    "An ellipsoidal distribution needs macroparticles, set parameter_beam = false",
                ))
            }
        };
        Ok(beam)
    }
}

fn log_beam(label: &str, beam: &Beam) {
    match beam {
        Beam::Empty => info!(label, "empty beam"),
        Beam::Parameter(b) => info!(
            label,
            mu_x = ?b.mu_x(),
            sigma_x = ?b.sigma_x(),
            sigma_y = ?b.sigma_y(),
            energy = ?b.energy(),
            "parameter beam"
        ),
        Beam::Particle(b) => info!(
            label,
            mu_x = ?b.mu_x(),
            sigma_x = ?b.sigma_x(),
            sigma_y = ?b.sigma_y(),
            survived = ?b.num_particles_survived(),
            "particle beam"
        ),
    }
}

pub fn run(cfg: Config) -> Result<()> {
    if cfg.output.stride == 0 {
        return Err(anyhow::Error::msg("Output stride must be at least 1"));
    }
    let mut rng = match cfg.beam.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    info!("initializing beam");
    let incoming = cfg
        .beam
        .build(&mut rng)
        .context("Could not build the incoming beam")?;
    log_beam("incoming", &incoming);

    let mut segment =
        Segment::from_descriptors(&cfg.lattice).context("Could not build the lattice")?;
    if let Some(resolution) = cfg.tracking.split_resolution {
        segment = segment.split_segment(resolution);
    }
    info!(elements = segment.elements.len(), "tracking through lattice");

    if cfg.output.every_element {
        let states = segment
            .track_each(&incoming)
            .context("Tracking through the lattice failed")?;
        for (i, (name, beam)) in states.iter().enumerate() {
            log_beam(name, beam);
            if cfg.output.write_output {
                let prefix = format!("{}/dat_{:05}_{}", cfg.output.output_dir, i, name);
                save::save_beam(beam, &prefix, cfg.output.stride)?;
            }
        }
    } else {
        let outgoing = segment
            .track(&incoming)
            .context("Tracking through the lattice failed")?;
        log_beam("outgoing", &outgoing);
        if cfg.output.write_output {
            save::save_beam(&outgoing, &format!("{}/final", cfg.output.output_dir), cfg.output.stride)?;
        }
    }

    if cfg.output.write_output {
        save::save_bpm_readings(&segment, &cfg.output.output_dir)?;
    }
    info!("done");
    Ok(())
}

//! Exchange of particle distributions with other codes.
//!
//! A [`ParticleGroup`] stores one particle per entry in lab units (metres,
//! eV/c, seconds, eV). Reading and writing actual files is left to a
//! [`ParticleGroupAdapter`] supplied by the caller.
use super::{BeamMoments, ParticleBeam};
use crate::error::{shape, Error, Result};
use crate::{Float, ELECTRON_MASS_EV, SPEED_OF_LIGHT};
use ndarray::{Array1, Array2, Axis};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticleGroup {
    pub x: Vec<Float>,
    pub px: Vec<Float>,
    pub y: Vec<Float>,
    pub py: Vec<Float>,
    pub pz: Vec<Float>,
    pub t: Vec<Float>,
    pub energy: Vec<Float>,
    pub weight: Vec<Float>,
    pub status: Vec<bool>,
}

impl ParticleGroup {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Converts to a beam with the given reference energy in eV.
    pub fn to_particle_beam(&self, energy: Float) -> Result<ParticleBeam> {
        let n = self.len();
        let columns = [&self.px, &self.y, &self.py, &self.t, &self.energy, &self.weight];
        if columns.iter().any(|c| c.len() != n) || self.status.len() != n {
            return Err(shape("every column of a particle group needs the same length"));
        }
        let p0c = (energy * energy - ELECTRON_MASS_EV * ELECTRON_MASS_EV).sqrt();

        let mut particles = Array2::<Float>::zeros((n, 7));
        for (i, mut row) in particles.axis_iter_mut(Axis(0)).enumerate() {
            row[0] = self.x[i];
            row[1] = self.px[i] / p0c;
            row[2] = self.y[i];
            row[3] = self.py[i] / p0c;
            row[4] = self.t[i] * SPEED_OF_LIGHT;
            row[5] = (self.energy[i] - energy) / p0c;
            row[6] = 1.0;
        }
        let charges = Array1::from(self.weight.clone());
        let survival: Array1<Float> = self.status.iter().map(|&alive| Float::from(alive as u8)).collect();
        ParticleBeam::new(
            particles.into_dyn(),
            crate::batch::param(energy),
            Some(charges.into_dyn()),
            Some(survival.into_dyn()),
        )
    }

    /// Only non-batched beams can be exported. Particles with a survival
    /// probability above one half count as alive.
    pub fn from_particle_beam(beam: &ParticleBeam) -> Result<ParticleGroup> {
        if !beam.batch_shape().is_empty() {
            return Err(shape(format!(
                "only non-batched beams can be exported, got batch shape {:?}",
                beam.batch_shape()
            )));
        }
        let energy = beam.energy().sum();
        let p0c = beam.p0c().sum();
        let mut group = ParticleGroup::default();
        for (row, (&q, &s)) in beam
            .particles()
            .axis_iter(Axis(0))
            .zip(beam.particle_charges().iter().zip(beam.survival_probabilities().iter()))
        {
            let px = row[1] * p0c;
            let py = row[3] * p0c;
            let particle_energy = row[5] * p0c + energy;
            let p_total2 = particle_energy * particle_energy - ELECTRON_MASS_EV * ELECTRON_MASS_EV;
            group.x.push(row[0]);
            group.px.push(px);
            group.y.push(row[2]);
            group.py.push(py);
            group.pz.push((p_total2 - px * px - py * py).max(0.0).sqrt());
            group.t.push(row[4] / SPEED_OF_LIGHT);
            group.energy.push(particle_energy);
            group.weight.push(q);
            group.status.push(s > 0.5);
        }
        Ok(group)
    }
}

/// Reads and writes particle groups in some external file format.
pub trait ParticleGroupAdapter: Send + Sync {
    fn read(&self, path: &Path) -> anyhow::Result<ParticleGroup>;
    fn write(&self, group: &ParticleGroup, path: &Path) -> anyhow::Result<()>;
}

/// File access for particle beams through an optional adapter.
#[derive(Default)]
pub struct BeamInterchange {
    adapter: Option<Box<dyn ParticleGroupAdapter>>,
}

impl BeamInterchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter(adapter: Box<dyn ParticleGroupAdapter>) -> Self {
        BeamInterchange {
            adapter: Some(adapter),
        }
    }

    fn adapter(&self, operation: &str) -> Result<&dyn ParticleGroupAdapter> {
        self.adapter
            .as_deref()
            .ok_or_else(|| Error::MissingOptionalDependency(operation.to_string()))
    }

    pub fn load(&self, path: &Path, energy: Float) -> anyhow::Result<ParticleBeam> {
        let group = self.adapter("loading a particle group")?.read(path)?;
        Ok(group.to_particle_beam(energy)?)
    }

    pub fn store(&self, beam: &ParticleBeam, path: &Path) -> anyhow::Result<()> {
        let adapter = self.adapter("storing a particle group")?;
        adapter.write(&ParticleGroup::from_particle_beam(beam)?, path)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::beam::BeamParameters;
    use crate::E_TOL;
    use std::sync::Mutex;

    struct InMemory(Mutex<Option<ParticleGroup>>);

    impl ParticleGroupAdapter for InMemory {
        fn read(&self, _path: &Path) -> anyhow::Result<ParticleGroup> {
            self.0
                .lock()
                .map_err(|_| anyhow::anyhow!("poisoned"))?
                .clone()
                .ok_or_else(|| anyhow::anyhow!("nothing stored"))
        }

        fn write(&self, group: &ParticleGroup, _path: &Path) -> anyhow::Result<()> {
            *self.0.lock().map_err(|_| anyhow::anyhow!("poisoned"))? = Some(group.clone());
            Ok(())
        }
    }

    #[test]
    fn missing_adapter_is_reported() {
        let interchange = BeamInterchange::new();
        let err = interchange.load(Path::new("beam.h5"), 1e8).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::MissingOptionalDependency(_))
        ));
    }

    #[test]
    fn adapter_round_trip_keeps_the_particles() {
        let beam = ParticleBeam::make_linspaced(
            &BeamParameters::new()
                .num_particles(10)
                .sigma_p(1e-3)
                .sigma_tau(1e-5)
                .total_charge(1e-9),
        )
        .unwrap();
        let interchange = BeamInterchange::with_adapter(Box::new(InMemory(Mutex::new(None))));
        interchange.store(&beam, Path::new("beam.h5")).unwrap();
        let back = interchange.load(Path::new("beam.h5"), 1e8).unwrap();
        for (a, b) in beam.particles().iter().zip(back.particles().iter()) {
            assert!((a - b).abs() < 1e-9 * (1.0 + a.abs()));
        }
        assert!((back.total_charge().sum() - 1e-9).abs() < E_TOL);
    }

    #[test]
    fn batched_beams_cannot_be_exported() {
        let beam = ParticleBeam::make_linspaced(
            &BeamParameters::new().num_particles(4).energy(vec![1e8, 2e8]),
        )
        .unwrap();
        assert!(ParticleGroup::from_particle_beam(&beam).is_err());
    }
}

use crate::batch::{Matrix6, Vector6};
use crate::beam::{Beam, BeamMoments, ParameterBeam, ParticleBeam};
use crate::elements::{Element, Segment};
use crate::Float;
use anyhow::{Context, Result};
use ndarray::{ArrayD, Axis, IxDyn, Slice};
use npy::NpyData;
use std::fs;
use tracing::{debug, info};

fn write_npy<I>(path: &str, data: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: npy::Serializable,
{
    npy::to_file(path, data).with_context(|| format!("Could not save data to {}", path))
}

fn read_npy<T: npy::Serializable>(path: &str) -> Result<Vec<T>> {
    let bytes = fs::read(path).with_context(|| format!("Could not open {}", path))?;
    let data: NpyData<T> =
        NpyData::from_bytes(&bytes).with_context(|| format!("Could not parse {}", path))?;
    Ok(data.to_vec())
}

fn read_array(path: &str, shape: &[usize]) -> Result<ArrayD<Float>> {
    ArrayD::from_shape_vec(IxDyn(shape), read_npy::<Float>(path)?)
        .with_context(|| format!("{} does not match the saved shape {:?}", path, shape))
}

fn shape_of(shape: &[usize]) -> Vec<u64> {
    shape.iter().map(|&n| n as u64).collect()
}

/// Saves a beam as a directory of `.npy` files. For particle beams only
/// every `stride`-th particle is kept. Arrays are flattened in row-major
/// order and `shape.npy` holds the batch shape, followed by the particle
/// count for particle beams.
pub fn save_beam(beam: &Beam, prefix: &str, stride: usize) -> Result<()> {
    let stride = stride.max(1);
    match beam {
        Beam::Empty => {
            info!(prefix, "beam is empty, nothing to save");
            return Ok(());
        }
        Beam::Particle(b) => {
            fs::create_dir_all(prefix).context("Unable to create output directory")?;
            let step = Slice::new(0, None, stride as isize);
            let nd = b.particles().ndim();
            let particles = b.particles().slice_axis(Axis(nd - 2), step);
            let charges = b.particle_charges().slice_axis(Axis(nd - 2), step);
            let survival = b.survival_probabilities().slice_axis(Axis(nd - 2), step);

            write_npy(&format!("{}/particles.npy", prefix), particles.iter().copied())?;
            write_npy(&format!("{}/energy.npy", prefix), b.energy().iter().copied())?;
            write_npy(&format!("{}/particle_charges.npy", prefix), charges.iter().copied())?;
            write_npy(
                &format!("{}/survival_probabilities.npy", prefix),
                survival.iter().copied(),
            )?;
            write_npy(&format!("{}/shape.npy", prefix), shape_of(charges.shape()))?;
        }
        Beam::Parameter(b) => {
            fs::create_dir_all(prefix).context("Unable to create output directory")?;
            let mean: Vec<Float> = b.mean().iter().flat_map(|m| m.iter().copied()).collect();
            // nalgebra is column-major, save row-major like everything else
            let cov: Vec<Float> = b
                .cov()
                .iter()
                .flat_map(|c| c.transpose().iter().copied().collect::<Vec<_>>())
                .collect();
            write_npy(&format!("{}/mean.npy", prefix), mean)?;
            write_npy(&format!("{}/cov.npy", prefix), cov)?;
            write_npy(&format!("{}/energy.npy", prefix), b.energy().iter().copied())?;
            write_npy(
                &format!("{}/total_charge.npy", prefix),
                b.total_charge().iter().copied(),
            )?;
            write_npy(&format!("{}/shape.npy", prefix), shape_of(b.batch_shape()))?;
        }
    }
    debug!(prefix, kind = beam.kind(), "saved beam");
    Ok(())
}

fn read_shape(prefix: &str) -> Result<Vec<usize>> {
    Ok(read_npy::<u64>(&format!("{}/shape.npy", prefix))?
        .into_iter()
        .map(|n| n as usize)
        .collect())
}

/// Reads a particle beam written by [`save_beam`].
pub fn load_particle_beam(prefix: &str) -> Result<ParticleBeam> {
    let per_particle = read_shape(prefix)?;
    let batch = per_particle
        .split_last()
        .map(|(_, batch)| batch.to_vec())
        .context("shape.npy of a particle beam needs at least the particle count")?;
    let mut full = per_particle.clone();
    full.push(7);

    let particles = read_array(&format!("{}/particles.npy", prefix), &full)?;
    let energy = read_array(&format!("{}/energy.npy", prefix), &batch)?;
    let charges = read_array(&format!("{}/particle_charges.npy", prefix), &per_particle)?;
    let survival = read_array(&format!("{}/survival_probabilities.npy", prefix), &per_particle)?;
    ParticleBeam::new(particles, energy, Some(charges), Some(survival))
        .with_context(|| format!("Saved beam in {} is inconsistent", prefix))
}

/// Reads a parameter beam written by [`save_beam`].
pub fn load_parameter_beam(prefix: &str) -> Result<ParameterBeam> {
    let batch = read_shape(prefix)?;
    let n: usize = batch.iter().product();
    let mean = read_npy::<Float>(&format!("{}/mean.npy", prefix))?;
    let cov = read_npy::<Float>(&format!("{}/cov.npy", prefix))?;
    if mean.len() != 6 * n || cov.len() != 36 * n {
        anyhow::bail!("Saved moments in {} do not match the batch shape {:?}", prefix, batch);
    }
    let mean: Vec<Vector6> = mean.chunks(6).map(Vector6::from_row_slice).collect();
    let cov: Vec<Matrix6> = cov.chunks(36).map(Matrix6::from_row_slice).collect();
    ParameterBeam::new(
        ArrayD::from_shape_vec(IxDyn(&batch), mean)?,
        ArrayD::from_shape_vec(IxDyn(&batch), cov)?,
        read_array(&format!("{}/energy.npy", prefix), &batch)?,
        read_array(&format!("{}/total_charge.npy", prefix), &batch)?,
    )
    .with_context(|| format!("Saved beam in {} is inconsistent", prefix))
}

fn collect_readings<'a>(elements: &'a [Element], out: &mut Vec<(&'a str, &'a ArrayD<Float>)>) {
    for element in elements {
        match element {
            Element::Bpm(bpm) => {
                if let Some(reading) = &bpm.reading {
                    out.push((bpm.name.as_str(), reading));
                }
            }
            Element::Segment(inner) => collect_readings(&inner.elements, out),
            _ => {}
        }
    }
}

/// Writes the last reading of every BPM in the lattice to
/// `dir/bpm/<name>.npy`, flattened from shape `(*batch, 2)`.
pub fn save_bpm_readings(segment: &Segment, dir: &str) -> Result<()> {
    let mut readings = Vec::new();
    collect_readings(&segment.elements, &mut readings);
    if readings.is_empty() {
        return Ok(());
    }
    let bpm_dir = format!("{}/bpm", dir);
    fs::create_dir_all(&bpm_dir).context("Unable to create output directory")?;
    for (name, reading) in readings {
        write_npy(&format!("{}/{}.npy", bpm_dir, name), reading.iter().copied())?;
    }
    Ok(())
}

use super::parameters::{BeamParameters, TwissParameters};
use super::{check_energy, BeamMoments};
use crate::batch::{
    broadcast_owned, broadcast_shapes, broadcast_view, map_batch, MapArray, Matrix6, Matrix7,
    Vector6, Vector7,
};
use crate::error::Result;
use crate::Float;
use ndarray::{ArrayD, Zip};

/// Beam described only by its first and second moments, tracked through
/// linear maps as `mean' = R mean` and `cov' = R cov Rᵀ`.
#[derive(Debug, Clone)]
pub struct ParameterBeam {
    mean: ArrayD<Vector6>,
    cov: ArrayD<Matrix6>,
    energy: ArrayD<Float>,
    total_charge: ArrayD<Float>,
}

/// Upper-left 6x6 block of `m · [[cov, 0], [0, 0]] · mᵀ` with the affine
/// column of `m` acting on the mean only.
fn propagate(m: &Matrix7, mean: &Vector6, cov: &Matrix6) -> (Vector6, Matrix6) {
    let augmented = Vector7::from_fn(|i, _| if i < 6 { mean[i] } else { 1.0 });
    let mean = (m * augmented).fixed_rows::<6>(0).into_owned();
    let r = m.fixed_view::<6, 6>(0, 0).into_owned();
    (mean, r * cov * r.transpose())
}

impl ParameterBeam {
    /// All four arrays are broadcast to their common batch shape.
    pub fn new(
        mean: ArrayD<Vector6>,
        cov: ArrayD<Matrix6>,
        energy: ArrayD<Float>,
        total_charge: ArrayD<Float>,
    ) -> Result<ParameterBeam> {
        check_energy(&energy)?;
        let batch = broadcast_shapes(&[
            mean.shape(),
            cov.shape(),
            energy.shape(),
            total_charge.shape(),
        ])?;
        Ok(ParameterBeam {
            mean: broadcast_owned(mean, &batch)?,
            cov: broadcast_owned(cov, &batch)?,
            energy: broadcast_owned(energy, &batch)?,
            total_charge: broadcast_owned(total_charge, &batch)?,
        })
    }

    pub fn from_parameters(parameters: &BeamParameters) -> Result<ParameterBeam> {
        let p = parameters.resolved();
        let [mu_x, mu_px, mu_y, mu_py] = &p.means;
        let [s_x, s_px, s_y, s_py, s_tau, s_p] = &p.sigmas;
        let [c_x, c_y, c_tau] = &p.correlations;

        let mean = map_batch([mu_x, mu_px, mu_y, mu_py], |[x, px, y, py]| {
            Vector6::new(x, px, y, py, 0.0, 0.0)
        })?;
        let cov = map_batch(
            [s_x, s_px, s_y, s_py, s_tau, s_p, c_x, c_y, c_tau],
            |[sx, spx, sy, spy, stau, sp, cx, cy, ctau]| {
                let mut cov = Matrix6::zeros();
                cov[(0, 0)] = sx * sx;
                cov[(0, 1)] = cx;
                cov[(1, 0)] = cx;
                cov[(1, 1)] = spx * spx;
                cov[(2, 2)] = sy * sy;
                cov[(2, 3)] = cy;
                cov[(3, 2)] = cy;
                cov[(3, 3)] = spy * spy;
                cov[(4, 4)] = stau * stau;
                cov[(4, 5)] = ctau;
                cov[(5, 4)] = ctau;
                cov[(5, 5)] = sp * sp;
                cov
            },
        )?;
        ParameterBeam::new(mean, cov, p.energy, p.total_charge)
    }

    pub fn from_twiss(parameters: &TwissParameters) -> Result<ParameterBeam> {
        Self::from_parameters(&parameters.to_beam_parameters()?)
    }

    pub fn mean(&self) -> &ArrayD<Vector6> {
        &self.mean
    }

    pub fn cov(&self) -> &ArrayD<Matrix6> {
        &self.cov
    }

    pub fn batch_shape(&self) -> &[usize] {
        self.energy.shape()
    }

    pub fn broadcast_batch(&self, batch: &[usize]) -> Result<ParameterBeam> {
        ParameterBeam::new(
            broadcast_view(&self.mean, batch)?.to_owned(),
            broadcast_view(&self.cov, batch)?.to_owned(),
            broadcast_view(&self.energy, batch)?.to_owned(),
            broadcast_view(&self.total_charge, batch)?.to_owned(),
        )
    }

    pub(crate) fn transformed_by(&self, maps: &MapArray, energy: &ArrayD<Float>) -> Result<ParameterBeam> {
        let batch = broadcast_shapes(&[maps.shape(), self.batch_shape(), energy.shape()])?;
        let maps = broadcast_view(maps, &batch)?;
        let mean = broadcast_view(&self.mean, &batch)?;
        let cov = broadcast_view(&self.cov, &batch)?;
        let propagated = Zip::from(&maps)
            .and(&mean)
            .and(&cov)
            .map_collect(|m, mean, cov| propagate(m, mean, cov));
        ParameterBeam::new(
            propagated.mapv(|(mean, _)| mean),
            propagated.mapv(|(_, cov)| cov),
            energy.clone(),
            self.total_charge.clone(),
        )
    }

    /// Moves the requested means and scales the covariance so that the
    /// requested sigmas are met. Correlation coefficients are kept.
    pub fn transformed_to(&self, target: &BeamParameters) -> Result<ParameterBeam> {
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
            if let Some(mu) = mu {
                let mu = broadcast_view(mu, &batch)?;
                Zip::from(&mut beam.mean)
                    .and(&mu)
                    .for_each(|mean, &m| mean[index] = m);
            }
            if let Some(sigma) = sigma {
                let sigma = broadcast_view(sigma, &batch)?;
                Zip::from(&mut beam.cov).and(&sigma).for_each(|cov, &s| {
                    let old = cov[(index, index)].max(0.0).sqrt();
                    if old > 0.0 {
                        let r = s / old;
                        for k in 0..6 {
                            cov[(index, k)] *= r;
                            cov[(k, index)] *= r;
                        }
                    } else {
                        cov[(index, index)] = s * s;
                    }
                });
            }
        }

        if let Some(energy) = &target.energy {
            beam.energy = broadcast_view(energy, &batch)?.to_owned();
        }
        if let Some(total) = &target.total_charge {
            beam.total_charge = broadcast_view(total, &batch)?.to_owned();
        }
        Ok(beam)
    }
}

impl BeamMoments for ParameterBeam {
    fn energy(&self) -> &ArrayD<Float> {
        &self.energy
    }

    fn total_charge(&self) -> ArrayD<Float> {
        self.total_charge.clone()
    }

    fn mu(&self, index: usize) -> ArrayD<Float> {
        self.mean.mapv(|m| m[index])
    }

    fn covariance(&self, i: usize, j: usize) -> ArrayD<Float> {
        self.cov.mapv(|c| c[(i, j)])
    }
}

use super::{unique_name, BeamElement, Element};
use crate::batch::{broadcast_shapes, broadcast_view, identity_maps, param, IntoParam, MapArray};
use crate::beam::Beam;
use crate::error::{Error, Result};
use crate::Float;
use ndarray::{ArrayD, Axis, Zip};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApertureShape {
    Rectangular,
    Elliptical,
}

/// Physical aperture. Particles outside lose their survival probability but
/// keep their coordinates.
#[derive(Debug, Clone)]
pub struct Aperture {
    pub x_max: ArrayD<Float>,
    pub y_max: ArrayD<Float>,
    pub shape: ApertureShape,
    pub is_active: bool,
    pub name: String,
}

impl Aperture {
    pub fn new(x_max: impl IntoParam, y_max: impl IntoParam) -> Aperture {
        Aperture {
            x_max: param(x_max),
            y_max: param(y_max),
            shape: ApertureShape::Rectangular,
            is_active: true,
            name: unique_name(),
        }
    }

    pub fn elliptical(mut self) -> Self {
        self.shape = ApertureShape::Elliptical;
        self
    }

    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl BeamElement for Aperture {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> Result<ArrayD<Float>> {
        Ok(param(0.0))
    }

    fn transfer_map(&self, energy: &ArrayD<Float>) -> Result<MapArray> {
        if self.is_active {
            return Err(Error::NotLinear(self.name.clone()));
        }
        Ok(identity_maps(energy.shape()))
    }

    fn track(&mut self, incoming: &Beam) -> Result<Beam> {
        let beam = match incoming {
            Beam::Empty => return Ok(Beam::Empty),
            Beam::Parameter(_) => {
                return Err(Error::InvalidType {
                    element: "Aperture",
                    beam: incoming.kind(),
                })
            }
            Beam::Particle(beam) => beam,
        };
        if !self.is_active {
            return Ok(incoming.clone());
        }

        let batch = broadcast_shapes(&[self.x_max.shape(), self.y_max.shape(), beam.batch_shape()])?;
        let beam = beam.broadcast_batch(&batch)?;
        let axis = Axis(batch.len());
        let x_max = broadcast_view(&self.x_max, &batch)?.insert_axis(axis);
        let y_max = broadcast_view(&self.y_max, &batch)?.insert_axis(axis);

        let mut survival = beam.survival_probabilities().clone();
        let shape = self.shape;
        Zip::from(&mut survival)
            .and(&beam.x())
            .and(&beam.y())
            .and_broadcast(&x_max)
            .and_broadcast(&y_max)
            .for_each(|s, &x, &y, &xm, &ym| {
                let inside = match shape {
                    ApertureShape::Rectangular => x.abs() < xm && y.abs() < ym,
                    ApertureShape::Elliptical => (x / xm).powi(2) + (y / ym).powi(2) <= 1.0,
                };
                if !inside {
                    *s = 0.0;
                }
            });
        debug!(
            aperture = %self.name,
            survived = survival.sum(),
            "applied aperture"
        );
        Ok(Beam::Particle(beam.with_survival_probabilities(survival)))
    }

    fn split(&self, _resolution: Float) -> Vec<Element> {
        vec![self.clone().into()]
    }

    fn broadcast(&self, shape: &[usize]) -> Result<Element> {
        Ok(Aperture {
            x_max: broadcast_view(&self.x_max, shape)?.to_owned(),
            y_max: broadcast_view(&self.y_max, shape)?.to_owned(),
            ..self.clone()
        }
        .into())
    }

    fn is_skippable(&self) -> bool {
        !self.is_active
    }

    fn is_linear(&self) -> bool {
        !self.is_active
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::beam::{ParameterBeam, ParticleBeam};
    use crate::BeamParameters;
    use ndarray::{array, IxDyn};

    fn two_particles() -> Beam {
        let particles = array![
            [1e-3, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
            [3e-3, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]
        ];
        ParticleBeam::new(particles.into_dyn(), param(1e8), None, None)
            .unwrap()
            .into()
    }

    #[test]
    fn particles_outside_are_lost() {
        let mut aperture = Aperture::new(2e-3, 2e-3);
        let out = aperture.track(&two_particles()).unwrap();
        let out = out.as_particle().unwrap();
        assert_eq!(
            out.survival_probabilities().iter().copied().collect::<Vec<_>>(),
            vec![1.0, 0.0]
        );
        // coordinates are untouched
        assert_eq!(out.x()[[1]], 3e-3);
    }

    #[test]
    fn batched_limits_batch_the_survival() {
        let mut aperture = Aperture::new(vec![2e-3, 4e-3], 1.0).elliptical();
        let out = aperture.track(&two_particles()).unwrap();
        let survival = out.as_particle().unwrap().survival_probabilities();
        assert_eq!(survival.shape(), &[2, 2]);
        assert_eq!(survival[IxDyn(&[1, 1])], 1.0);
        assert_eq!(survival[IxDyn(&[0, 1])], 0.0);
    }

    #[test]
    fn parameter_beams_are_rejected() {
        let beam: Beam = ParameterBeam::from_parameters(&BeamParameters::new())
            .unwrap()
            .into();
        let mut aperture = Aperture::new(1e-3, 1e-3);
        assert!(matches!(
            aperture.track(&beam),
            Err(Error::InvalidType { .. })
        ));
        let mut inactive = Aperture::new(1e-3, 1e-3).active(false);
        assert!(inactive.is_skippable());
        assert!(inactive.track(&Beam::Empty).unwrap().is_empty());
    }
}

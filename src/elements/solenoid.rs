use super::maps::{misaligned, solenoid_matrix};
use super::{num_pieces, unique_name, BeamElement, Element};
use crate::batch::{all_zero, broadcast_view, map_batch, param, unstack_pair, IntoParam, MapArray};
use crate::error::Result;
use crate::Float;
use ndarray::{ArrayD, IxDyn};

/// Solenoid magnet. `k` is half the field over the magnetic rigidity,
/// `B / (2 Bρ)`.
#[derive(Debug, Clone)]
pub struct Solenoid {
    pub length: ArrayD<Float>,
    pub k: ArrayD<Float>,
    pub misalignment: ArrayD<Float>,
    pub name: String,
}

impl Solenoid {
    pub fn new(length: impl IntoParam, k: impl IntoParam) -> Solenoid {
        Solenoid {
            length: param(length),
            k: param(k),
            misalignment: ArrayD::zeros(IxDyn(&[2])),
            name: unique_name(),
        }
    }

    pub fn misalignment(mut self, misalignment: impl IntoParam) -> Self {
        self.misalignment = param(misalignment);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl BeamElement for Solenoid {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> Result<ArrayD<Float>> {
        Ok(self.length.clone())
    }

    fn transfer_map(&self, energy: &ArrayD<Float>) -> Result<MapArray> {
        let (dx, dy) = unstack_pair(&self.misalignment, "misalignment")?;
        map_batch([&self.length, &self.k, &dx, &dy, energy], |[l, k, dx, dy, e]| {
            misaligned(solenoid_matrix(l, k, e), dx, dy)
        })
    }

    fn split(&self, resolution: Float) -> Vec<Element> {
        if resolution <= 0.0 {
            return vec![self.clone().into()];
        }
        let n = num_pieces(&self.length, resolution);
        let piece = Solenoid {
            length: &self.length / n as Float,
            ..self.clone()
        };
        vec![piece.into(); n]
    }

    fn broadcast(&self, shape: &[usize]) -> Result<Element> {
        let mut pair = shape.to_vec();
        pair.push(2);
        Ok(Solenoid {
            length: broadcast_view(&self.length, shape)?.to_owned(),
            k: broadcast_view(&self.k, shape)?.to_owned(),
            misalignment: broadcast_view(&self.misalignment, &pair)?.to_owned(),
            name: self.name.clone(),
        }
        .into())
    }

    fn is_skippable(&self) -> bool {
        all_zero(&self.length)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::E_TOL;

    #[test]
    fn solenoid_couples_the_planes() {
        let maps = Solenoid::new(0.5, 2.0).transfer_map(&param(1e8)).unwrap();
        let tm = maps.first().unwrap();
        let (s, c) = (1.0 as Float).sin_cos();
        assert!((tm[(0, 2)] - s * c).abs() < E_TOL);
        assert!((tm[(2, 0)] + s * c).abs() < E_TOL);
    }
}

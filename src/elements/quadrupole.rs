use super::maps::{base_rmatrix, misaligned};
use super::{num_pieces, unique_name, BeamElement, Element};
use crate::batch::{
    broadcast_shapes, broadcast_view, map_batch, pair_batch, param, unstack_pair, IntoParam,
    MapArray,
};
use crate::error::Result;
use crate::Float;
use ndarray::{ArrayD, IxDyn};

/// Thick quadrupole magnet.
#[derive(Debug, Clone)]
pub struct Quadrupole {
    pub length: ArrayD<Float>,
    /// Focusing strength in 1/m^2, positive focuses in x.
    pub k1: ArrayD<Float>,
    /// `(dx, dy)` in metres, shape `(*batch, 2)`.
    pub misalignment: ArrayD<Float>,
    pub tilt: ArrayD<Float>,
    pub name: String,
}

impl Quadrupole {
    pub fn new(length: impl IntoParam, k1: impl IntoParam) -> Quadrupole {
        Quadrupole {
            length: param(length),
            k1: param(k1),
            misalignment: ArrayD::zeros(IxDyn(&[2])),
            tilt: param(0.0),
            name: unique_name(),
        }
    }

    pub fn misalignment(mut self, misalignment: impl IntoParam) -> Self {
        self.misalignment = param(misalignment);
        self
    }

    pub fn tilt(mut self, tilt: impl IntoParam) -> Self {
        self.tilt = param(tilt);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Batch shape of the magnet's own parameters.
    pub fn batch_shape(&self) -> Result<Vec<usize>> {
        broadcast_shapes(&[
            self.length.shape(),
            self.k1.shape(),
            self.tilt.shape(),
            pair_batch(&self.misalignment),
        ])
    }
}

impl BeamElement for Quadrupole {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> Result<ArrayD<Float>> {
        Ok(self.length.clone())
    }

    fn transfer_map(&self, energy: &ArrayD<Float>) -> Result<MapArray> {
        let (dx, dy) = unstack_pair(&self.misalignment, "misalignment")?;
        map_batch(
            [&self.length, &self.k1, &self.tilt, &dx, &dy, energy],
            |[l, k1, tilt, dx, dy, e]| misaligned(base_rmatrix(l, k1, 0.0, tilt, e), dx, dy),
        )
    }

    fn split(&self, resolution: Float) -> Vec<Element> {
        if resolution <= 0.0 {
            return vec![self.clone().into()];
        }
        let n = num_pieces(&self.length, resolution);
        let piece = Quadrupole {
            length: &self.length / n as Float,
            ..self.clone()
        };
        vec![piece.into(); n]
    }

    fn broadcast(&self, shape: &[usize]) -> Result<Element> {
        let mut pair = shape.to_vec();
        pair.push(2);
        Ok(Quadrupole {
            length: broadcast_view(&self.length, shape)?.to_owned(),
            k1: broadcast_view(&self.k1, shape)?.to_owned(),
            misalignment: broadcast_view(&self.misalignment, &pair)?.to_owned(),
            tilt: broadcast_view(&self.tilt, shape)?.to_owned(),
            name: self.name.clone(),
        }
        .into())
    }

    fn is_skippable(&self) -> bool {
        false
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::elements::maps::drift_matrix;
    use crate::E_TOL;
    use ndarray::array;

    #[test]
    fn zero_k1_is_a_drift() {
        let maps = Quadrupole::new(0.7, 0.0).transfer_map(&param(1e8)).unwrap();
        let drift = drift_matrix(0.7, 1e8);
        for (a, b) in maps.first().unwrap().iter().zip(drift.iter()) {
            assert!((a - b).abs() < E_TOL);
        }
    }

    #[test]
    fn batched_tilt_and_misalignment() {
        let quad = Quadrupole::new(0.2, 4.2)
            .tilt(vec![0.0, 0.1, 0.2])
            .misalignment(array![[[1e-4, 0.0]], [[0.0, 1e-4]]]);
        assert_eq!(quad.batch_shape().unwrap(), vec![2, 3]);
        let maps = quad.transfer_map(&param(1e8)).unwrap();
        assert_eq!(maps.shape(), &[2, 3]);
        let broadcast = quad.broadcast(&[4, 2, 3]).unwrap();
        match broadcast {
            Element::Quadrupole(q) => assert_eq!(q.misalignment.shape(), &[4, 2, 3, 2]),
            other => panic!("unexpected {:?}", other.kind()),
        }
    }
}

use super::maps::drift_matrix;
use super::{num_pieces, unique_name, BeamElement, Element};
use crate::batch::{all_zero, broadcast_view, map_batch, param, IntoParam, MapArray};
use crate::error::Result;
use crate::Float;
use ndarray::ArrayD;

/// Field free space.
#[derive(Debug, Clone)]
pub struct Drift {
    pub length: ArrayD<Float>,
    pub name: String,
}

impl Drift {
    pub fn new(length: impl IntoParam) -> Drift {
        Drift {
            length: param(length),
            name: unique_name(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl BeamElement for Drift {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> Result<ArrayD<Float>> {
        Ok(self.length.clone())
    }

    fn transfer_map(&self, energy: &ArrayD<Float>) -> Result<MapArray> {
        map_batch([&self.length, energy], |[l, e]| drift_matrix(l, e))
    }

    fn split(&self, resolution: Float) -> Vec<Element> {
        if resolution <= 0.0 {
            return vec![self.clone().into()];
        }
        let n = num_pieces(&self.length, resolution);
        (0..n)
            .map(|_| {
                Drift {
                    length: &self.length / n as Float,
                    name: self.name.clone(),
                }
                .into()
            })
            .collect()
    }

    fn broadcast(&self, shape: &[usize]) -> Result<Element> {
        Ok(Drift {
            length: broadcast_view(&self.length, shape)?.to_owned(),
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
    fn batched_length_gives_batched_maps() {
        let drift = Drift::new(vec![0.5, 1.0, 2.0]);
        let maps = drift.transfer_map(&param(1e8)).unwrap();
        assert_eq!(maps.shape(), &[3]);
        assert!((maps[[2]][(0, 1)] - 2.0).abs() < E_TOL);
    }

    #[test]
    fn zero_length_is_skippable() {
        assert!(Drift::new(0.0).is_skippable());
        assert!(!Drift::new(vec![0.0, 0.1]).is_skippable());
    }
}

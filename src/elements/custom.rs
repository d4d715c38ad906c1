use super::segment::{compose_run, total_length};
use super::{unique_name, BeamElement, Element};
use crate::batch::{broadcast_shapes, broadcast_view, param, zip_batch, IntoParam, MapArray, Matrix7};
use crate::error::{shape, Result};
use crate::Float;
use ndarray::{ArrayD, Axis, IxDyn};

/// Element defined directly by its transfer map. Built from user supplied
/// matrices or by merging a run of linear elements, in which case it also
/// carries the run's energy gain.
#[derive(Debug, Clone)]
pub struct CustomTransferMap {
    pub map: MapArray,
    pub length: ArrayD<Float>,
    pub energy_gain: ArrayD<Float>,
    pub name: String,
}

impl CustomTransferMap {
    pub fn new(map: MapArray) -> CustomTransferMap {
        CustomTransferMap {
            map,
            length: param(0.0),
            energy_gain: param(0.0),
            name: unique_name(),
        }
    }

    /// Builds the maps from an array of shape `(*batch, 7, 7)`.
    pub fn from_array(array: &ArrayD<Float>) -> Result<CustomTransferMap> {
        let nd = array.ndim();
        if nd < 2 || array.shape()[nd - 2..] != [7, 7] {
            return Err(shape(format!(
                "a transfer map needs shape (*batch, 7, 7), got {:?}",
                array.shape()
            )));
        }
        let batch = &array.shape()[..nd - 2];
        let data: Vec<Matrix7> = array
            .lanes(Axis(nd - 1))
            .into_iter()
            .collect::<Vec<_>>()
            .chunks(7)
            .map(|rows| Matrix7::from_fn(|i, j| rows[i][j]))
            .collect();
        let map = ArrayD::from_shape_vec(IxDyn(batch), data).map_err(|e| shape(e.to_string()))?;
        Ok(CustomTransferMap::new(map))
    }

    /// Combines `elements` into a single map for the given incoming
    /// reference energy.
    pub fn from_merging_elements(elements: &[Element], energy: &ArrayD<Float>) -> Result<CustomTransferMap> {
        let (map, outgoing) = compose_run(elements, energy)?;
        let energy_gain = zip_batch(&outgoing, energy, |out, e| out - e)?;
        let name = elements
            .iter()
            .map(|e| e.name())
            .collect::<Vec<_>>()
            .join("_");
        Ok(CustomTransferMap {
            map,
            length: total_length(elements)?,
            energy_gain,
            name: if name.is_empty() { unique_name() } else { name },
        })
    }

    pub fn with_length(mut self, length: impl IntoParam) -> Self {
        self.length = param(length);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl BeamElement for CustomTransferMap {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> Result<ArrayD<Float>> {
        Ok(self.length.clone())
    }

    fn transfer_map(&self, energy: &ArrayD<Float>) -> Result<MapArray> {
        let batch = broadcast_shapes(&[self.map.shape(), energy.shape()])?;
        Ok(broadcast_view(&self.map, &batch)?.to_owned())
    }

    fn output_energy(&self, energy: &ArrayD<Float>) -> Result<ArrayD<Float>> {
        zip_batch(energy, &self.energy_gain, |e, gain| e + gain)
    }

    fn split(&self, _resolution: Float) -> Vec<Element> {
        vec![self.clone().into()]
    }

    fn broadcast(&self, shape: &[usize]) -> Result<Element> {
        Ok(CustomTransferMap {
            map: broadcast_view(&self.map, shape)?.to_owned(),
            length: broadcast_view(&self.length, shape)?.to_owned(),
            energy_gain: broadcast_view(&self.energy_gain, shape)?.to_owned(),
            name: self.name.clone(),
        }
        .into())
    }

    fn is_skippable(&self) -> bool {
        self.map.iter().all(|m| *m == Matrix7::identity()) && self.energy_gain.iter().all(|&g| g == 0.0)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::elements::{Drift, Quadrupole};
    use crate::E_TOL;

    #[test]
    fn from_array_reads_row_major_matrices() {
        let mut array = ArrayD::<Float>::zeros(IxDyn(&[2, 7, 7]));
        for b in 0..2 {
            for i in 0..7 {
                array[[b, i, i]] = 1.0;
            }
        }
        array[[1, 0, 1]] = 3.0;
        let custom = CustomTransferMap::from_array(&array).unwrap();
        assert_eq!(custom.map.shape(), &[2]);
        assert_eq!(custom.map[[1]][(0, 1)], 3.0);
        assert_eq!(custom.map[[1]][(1, 0)], 0.0);
        assert!(CustomTransferMap::from_array(&ArrayD::zeros(IxDyn(&[6, 7]))).is_err());
    }

    #[test]
    fn merging_matches_the_product() {
        let energy = param(1e8);
        let elements: Vec<Element> = vec![
            Drift::new(0.5).into(),
            Quadrupole::new(0.2, 3.0).into(),
            Drift::new(0.5).into(),
        ];
        let merged = CustomTransferMap::from_merging_elements(&elements, &energy).unwrap();
        let map = |i: usize| *elements[i].transfer_map(&energy).unwrap().first().unwrap();
        let expected = map(2) * map(1) * map(0);
        let got = merged.transfer_map(&energy).unwrap();
        for (a, b) in got.first().unwrap().iter().zip(expected.iter()) {
            assert!((a - b).abs() < E_TOL);
        }
        assert!((merged.length.sum() - 1.2).abs() < E_TOL);
    }
}

use super::maps::drift_matrix;
use super::{num_pieces, unique_name, BeamElement, Drift, Element};
use crate::batch::{all_zero, broadcast_view, map_batch, param, IntoParam, MapArray};
use crate::error::Result;
use crate::Float;
use ndarray::ArrayD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectorPlane {
    Horizontal,
    Vertical,
}

/// Steering magnet: a drift followed by a dipole kick of `angle` in one
/// plane.
#[derive(Debug, Clone)]
pub struct Corrector {
    pub length: ArrayD<Float>,
    pub angle: ArrayD<Float>,
    pub plane: CorrectorPlane,
    pub name: String,
}

impl Corrector {
    pub fn horizontal(length: impl IntoParam, angle: impl IntoParam) -> Corrector {
        Corrector {
            length: param(length),
            angle: param(angle),
            plane: CorrectorPlane::Horizontal,
            name: unique_name(),
        }
    }

    pub fn vertical(length: impl IntoParam, angle: impl IntoParam) -> Corrector {
        Corrector {
            plane: CorrectorPlane::Vertical,
            ..Corrector::horizontal(length, angle)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self.plane {
            CorrectorPlane::Horizontal => "HorizontalCorrector",
            CorrectorPlane::Vertical => "VerticalCorrector",
        }
    }
}

impl BeamElement for Corrector {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> Result<ArrayD<Float>> {
        Ok(self.length.clone())
    }

    fn transfer_map(&self, energy: &ArrayD<Float>) -> Result<MapArray> {
        let row = match self.plane {
            CorrectorPlane::Horizontal => 1,
            CorrectorPlane::Vertical => 3,
        };
        map_batch([&self.length, &self.angle, energy], |[l, angle, e]| {
            let mut tm = drift_matrix(l, e);
            tm[(row, 6)] = angle;
            tm
        })
    }

    /// Drifts for all but the last slice, which carries the whole kick.
    fn split(&self, resolution: Float) -> Vec<Element> {
        if resolution <= 0.0 {
            return vec![self.clone().into()];
        }
        let n = num_pieces(&self.length, resolution);
        let length = &self.length / n as Float;
        let mut pieces: Vec<Element> = (1..n)
            .map(|_| {
                Drift {
                    length: length.clone(),
                    name: self.name.clone(),
                }
                .into()
            })
            .collect();
        pieces.push(
            Corrector {
                length,
                ..self.clone()
            }
            .into(),
        );
        pieces
    }

    fn broadcast(&self, shape: &[usize]) -> Result<Element> {
        Ok(Corrector {
            length: broadcast_view(&self.length, shape)?.to_owned(),
            angle: broadcast_view(&self.angle, shape)?.to_owned(),
            ..self.clone()
        }
        .into())
    }

    fn is_skippable(&self) -> bool {
        all_zero(&self.length) && all_zero(&self.angle)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::E_TOL;

    #[test]
    fn kick_lands_in_the_right_plane() {
        let h = Corrector::horizontal(0.1, 1e-3).transfer_map(&param(1e8)).unwrap();
        let v = Corrector::vertical(0.1, 1e-3).transfer_map(&param(1e8)).unwrap();
        assert!((h.first().unwrap()[(1, 6)] - 1e-3).abs() < E_TOL);
        assert!(h.first().unwrap()[(3, 6)].abs() < E_TOL);
        assert!((v.first().unwrap()[(3, 6)] - 1e-3).abs() < E_TOL);
    }

    #[test]
    fn split_ends_with_the_kick() {
        let pieces = Corrector::vertical(1.0, 1e-3).split(0.3);
        assert_eq!(pieces.len(), 4);
        assert!(matches!(pieces[0], Element::Drift(_)));
        assert_eq!(pieces[3].kind(), "VerticalCorrector");
    }
}

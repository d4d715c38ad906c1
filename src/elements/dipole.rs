use super::maps::{base_rmatrix, dipole_edge, tilted};
use super::{num_pieces, unique_name, BeamElement, Element};
use crate::batch::{broadcast_view, map_batch, param, IntoParam, MapArray};
use crate::error::Result;
use crate::Float;
use ndarray::ArrayD;

/// Sector bending magnet with optional quadrupole component and thin edge
/// focusing at both pole faces.
#[derive(Debug, Clone)]
pub struct Dipole {
    pub length: ArrayD<Float>,
    /// Bending angle in rad.
    pub angle: ArrayD<Float>,
    pub k1: ArrayD<Float>,
    /// Entry and exit edge angles in rad.
    pub e1: ArrayD<Float>,
    pub e2: ArrayD<Float>,
    pub tilt: ArrayD<Float>,
    pub fringe_integral: ArrayD<Float>,
    pub fringe_integral_exit: ArrayD<Float>,
    /// Full magnet gap in metres.
    pub gap: ArrayD<Float>,
    pub name: String,
}

macro_rules! dipole_setters {
    ($($field:ident),*) => {
        $(
            pub fn $field(mut self, value: impl IntoParam) -> Self {
                self.$field = param(value);
                self
            }
        )*
    };
}

impl Dipole {
    pub fn new(length: impl IntoParam, angle: impl IntoParam) -> Dipole {
        Dipole {
            length: param(length),
            angle: param(angle),
            k1: param(0.0),
            e1: param(0.0),
            e2: param(0.0),
            tilt: param(0.0),
            fringe_integral: param(0.0),
            fringe_integral_exit: param(0.0),
            gap: param(0.0),
            name: unique_name(),
        }
    }

    /// Rectangular bend: a sector magnet with half the bending angle added
    /// to both edge angles.
    pub fn rectangular(length: impl IntoParam, angle: impl IntoParam) -> Dipole {
        let dipole = Dipole::new(length, angle);
        let half = &dipole.angle / 2.0;
        Dipole {
            e1: half.clone(),
            e2: half,
            ..dipole
        }
    }

    dipole_setters!(k1, e1, e2, tilt, fringe_integral, fringe_integral_exit, gap);

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl BeamElement for Dipole {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> Result<ArrayD<Float>> {
        Ok(self.length.clone())
    }

    fn transfer_map(&self, energy: &ArrayD<Float>) -> Result<MapArray> {
        map_batch(
            [
                &self.length,
                &self.angle,
                &self.k1,
                &self.e1,
                &self.e2,
                &self.tilt,
                &self.fringe_integral,
                &self.fringe_integral_exit,
                &self.gap,
                energy,
            ],
            |[l, angle, k1, e1, e2, tilt, fint, fint_exit, gap, e]| {
                let hx = if l != 0.0 { angle / l } else { 0.0 };
                let entry = dipole_edge(hx, e1, fint, gap);
                let body = base_rmatrix(l, k1, hx, 0.0, e);
                let exit = dipole_edge(hx, e2, fint_exit, gap);
                tilted(exit * body * entry, tilt)
            },
        )
    }

    /// The entry edge stays on the first slice and the exit edge on the
    /// last one.
    fn split(&self, resolution: Float) -> Vec<Element> {
        if resolution <= 0.0 {
            return vec![self.clone().into()];
        }
        let n = num_pieces(&self.length, resolution);
        let zero = param(0.0);
        (0..n)
            .map(|i| {
                let first = i == 0;
                let last = i == n - 1;
                Dipole {
                    length: &self.length / n as Float,
                    angle: &self.angle / n as Float,
                    e1: if first { self.e1.clone() } else { zero.clone() },
                    fringe_integral: if first {
                        self.fringe_integral.clone()
                    } else {
                        zero.clone()
                    },
                    e2: if last { self.e2.clone() } else { zero.clone() },
                    fringe_integral_exit: if last {
                        self.fringe_integral_exit.clone()
                    } else {
                        zero.clone()
                    },
                    ..self.clone()
                }
                .into()
            })
            .collect()
    }

    fn broadcast(&self, shape: &[usize]) -> Result<Element> {
        let expand = |a: &ArrayD<Float>| broadcast_view(a, shape).map(|v| v.to_owned());
        Ok(Dipole {
            length: expand(&self.length)?,
            angle: expand(&self.angle)?,
            k1: expand(&self.k1)?,
            e1: expand(&self.e1)?,
            e2: expand(&self.e2)?,
            tilt: expand(&self.tilt)?,
            fringe_integral: expand(&self.fringe_integral)?,
            fringe_integral_exit: expand(&self.fringe_integral_exit)?,
            gap: expand(&self.gap)?,
            name: self.name.clone(),
        }
        .into())
    }

    fn is_skippable(&self) -> bool {
        false
    }
}

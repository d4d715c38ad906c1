use super::maps::{cavity_energy_gain, cavity_matrix};
use super::{unique_name, BeamElement, Element};
use crate::batch::{all_zero, broadcast_view, param, try_map_batch, IntoParam, MapArray};
use crate::error::{parameter, Result};
use crate::Float;
use ndarray::ArrayD;

/// Standing-wave accelerating cavity.
#[derive(Debug, Clone)]
pub struct Cavity {
    pub length: ArrayD<Float>,
    /// Peak voltage in V.
    pub voltage: ArrayD<Float>,
    /// Phase in degrees, 0 is on crest.
    pub phase: ArrayD<Float>,
    /// RF frequency in Hz.
    pub frequency: ArrayD<Float>,
    pub name: String,
}

impl Cavity {
    pub fn new(
        length: impl IntoParam,
        voltage: impl IntoParam,
        phase: impl IntoParam,
        frequency: impl IntoParam,
    ) -> Cavity {
        Cavity {
            length: param(length),
            voltage: param(voltage),
            phase: param(phase),
            frequency: param(frequency),
            name: unique_name(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn energy_after(&self, energy: Float, voltage: Float, phase: Float) -> Result<Float> {
        let out = energy + cavity_energy_gain(voltage, phase);
        if out <= 0.0 {
            return Err(parameter(
                self.name.clone(),
                "voltage",
                format!("decelerates the beam to a non-positive energy of {} eV", out),
            ));
        }
        Ok(out)
    }
}

impl BeamElement for Cavity {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> Result<ArrayD<Float>> {
        Ok(self.length.clone())
    }

    fn transfer_map(&self, energy: &ArrayD<Float>) -> Result<MapArray> {
        try_map_batch(
            [&self.length, &self.voltage, &self.phase, &self.frequency, energy],
            |[l, v, phase, f, e]| {
                self.energy_after(e, v, phase)?;
                Ok(cavity_matrix(l, v, phase, f, e))
            },
        )
    }

    fn output_energy(&self, energy: &ArrayD<Float>) -> Result<ArrayD<Float>> {
        try_map_batch([energy, &self.voltage, &self.phase], |[e, v, phase]| {
            self.energy_after(e, v, phase)
        })
    }

    fn split(&self, _resolution: Float) -> Vec<Element> {
        vec![self.clone().into()]
    }

    fn broadcast(&self, shape: &[usize]) -> Result<Element> {
        Ok(Cavity {
            length: broadcast_view(&self.length, shape)?.to_owned(),
            voltage: broadcast_view(&self.voltage, shape)?.to_owned(),
            phase: broadcast_view(&self.phase, shape)?.to_owned(),
            frequency: broadcast_view(&self.frequency, shape)?.to_owned(),
            name: self.name.clone(),
        }
        .into())
    }

    fn is_skippable(&self) -> bool {
        all_zero(&self.length) && self.voltage.iter().all(|&v| v <= 0.0)
    }
}

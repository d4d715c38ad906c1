use std::sync::atomic::{AtomicUsize, Ordering};

use crate::batch::{max_abs, MapArray};
use crate::beam::Beam;
use crate::error::{Error, Result};
use crate::space_charge::SpaceChargeKick;
use crate::Float;
use ndarray::ArrayD;

mod aperture;
mod bpm;
mod cavity;
mod corrector;
mod custom;
mod dipole;
mod drift;
pub(crate) mod maps;
mod marker;
mod quadrupole;
mod segment;
mod solenoid;
mod undulator;

pub use aperture::{Aperture, ApertureShape};
pub use bpm::Bpm;
pub use cavity::Cavity;
pub use corrector::{Corrector, CorrectorPlane};
pub use custom::CustomTransferMap;
pub use dipole::Dipole;
pub use drift::Drift;
pub use marker::Marker;
pub use quadrupole::Quadrupole;
pub use segment::Segment;
pub use solenoid::Solenoid;
pub use undulator::Undulator;

static ELEMENT_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Default name for elements built without one.
pub(crate) fn unique_name() -> String {
    format!(
        "unnamed_element_{}",
        ELEMENT_COUNT.fetch_add(1, Ordering::Relaxed)
    )
}

/// Number of equal slices needed so that none is longer than `resolution`.
pub(crate) fn num_pieces(length: &ArrayD<Float>, resolution: Float) -> usize {
    ((max_abs(length) / resolution).ceil() as usize).max(1)
}

/// What every beamline element can do. Elements with a first-order map
/// only implement `transfer_map`; the default `track` applies it.
pub trait BeamElement {
    fn name(&self) -> &str;

    fn length(&self) -> Result<ArrayD<Float>>;

    /// One 7x7 map per entry of the broadcast of the element's parameter
    /// batch with the batch of `energy`.
    fn transfer_map(&self, _energy: &ArrayD<Float>) -> Result<MapArray> {
        Err(Error::NotLinear(self.name().to_string()))
    }

    /// Reference energy behind the element.
    fn output_energy(&self, energy: &ArrayD<Float>) -> Result<ArrayD<Float>> {
        Ok(energy.clone())
    }

    fn track(&mut self, incoming: &Beam) -> Result<Beam> {
        track_linear(&*self, incoming)
    }

    /// Slices no longer than `resolution`. Elements that cannot be sliced
    /// return themselves.
    fn split(&self, resolution: Float) -> Vec<Element>;

    /// Copy of the element with every parameter expanded to `shape`.
    fn broadcast(&self, shape: &[usize]) -> Result<Element>;

    /// True when the element is currently the identity.
    fn is_skippable(&self) -> bool;

    /// True when the element can be merged with its neighbours into a single
    /// transfer map.
    fn is_linear(&self) -> bool {
        true
    }
}

pub(crate) fn track_linear<E: BeamElement + ?Sized>(element: &E, incoming: &Beam) -> Result<Beam> {
    match incoming.energy() {
        None => Ok(Beam::Empty),
        Some(energy) => {
            let maps = element.transfer_map(energy)?;
            let outgoing = element.output_energy(energy)?;
            incoming.transformed_by(&maps, &outgoing)
        }
    }
}

/// All element kinds a beamline can hold.
#[derive(Debug, Clone)]
pub enum Element {
    Drift(Drift),
    Quadrupole(Quadrupole),
    Dipole(Dipole),
    Cavity(Cavity),
    Solenoid(Solenoid),
    Corrector(Corrector),
    Aperture(Aperture),
    Bpm(Bpm),
    Marker(Marker),
    Undulator(Undulator),
    CustomTransferMap(CustomTransferMap),
    SpaceChargeKick(SpaceChargeKick),
    Segment(Segment),
}

macro_rules! dispatch {
    ($value:expr, $e:ident => $body:expr) => {
        match $value {
            Element::Drift($e) => $body,
            Element::Quadrupole($e) => $body,
            Element::Dipole($e) => $body,
            Element::Cavity($e) => $body,
            Element::Solenoid($e) => $body,
            Element::Corrector($e) => $body,
            Element::Aperture($e) => $body,
            Element::Bpm($e) => $body,
            Element::Marker($e) => $body,
            Element::Undulator($e) => $body,
            Element::CustomTransferMap($e) => $body,
            Element::SpaceChargeKick($e) => $body,
            Element::Segment($e) => $body,
        }
    };
}

macro_rules! from_variants {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Element {
                fn from(element: $variant) -> Self {
                    Element::$variant(element)
                }
            }
        )*
    };
}

from_variants!(
    Drift,
    Quadrupole,
    Dipole,
    Cavity,
    Solenoid,
    Corrector,
    Aperture,
    Bpm,
    Marker,
    Undulator,
    CustomTransferMap,
    SpaceChargeKick,
    Segment
);

impl Element {
    pub fn kind(&self) -> &'static str {
        match self {
            Element::Drift(_) => "Drift",
            Element::Quadrupole(_) => "Quadrupole",
            Element::Dipole(_) => "Dipole",
            Element::Cavity(_) => "Cavity",
            Element::Solenoid(_) => "Solenoid",
            Element::Corrector(c) => c.kind(),
            Element::Aperture(_) => "Aperture",
            Element::Bpm(_) => "BPM",
            Element::Marker(_) => "Marker",
            Element::Undulator(_) => "Undulator",
            Element::CustomTransferMap(_) => "CustomTransferMap",
            Element::SpaceChargeKick(_) => "SpaceChargeKick",
            Element::Segment(_) => "Segment",
        }
    }
}

impl BeamElement for Element {
    fn name(&self) -> &str {
        dispatch!(self, e => e.name())
    }

    fn length(&self) -> Result<ArrayD<Float>> {
        dispatch!(self, e => e.length())
    }

    fn transfer_map(&self, energy: &ArrayD<Float>) -> Result<MapArray> {
        dispatch!(self, e => e.transfer_map(energy))
    }

    fn output_energy(&self, energy: &ArrayD<Float>) -> Result<ArrayD<Float>> {
        dispatch!(self, e => e.output_energy(energy))
    }

    fn track(&mut self, incoming: &Beam) -> Result<Beam> {
        dispatch!(self, e => e.track(incoming))
    }

    fn split(&self, resolution: Float) -> Vec<Element> {
        dispatch!(self, e => e.split(resolution))
    }

    fn broadcast(&self, shape: &[usize]) -> Result<Element> {
        dispatch!(self, e => e.broadcast(shape))
    }

    fn is_skippable(&self) -> bool {
        dispatch!(self, e => e.is_skippable())
    }

    fn is_linear(&self) -> bool {
        dispatch!(self, e => e.is_linear())
    }
}

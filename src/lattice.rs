//! Building lattices from plain descriptors, e.g. `[[lattice]]` tables in
//! `config.toml`.
use crate::batch::{param, zip_batch};
use crate::elements::{
    Aperture, Bpm, Cavity, Corrector, CustomTransferMap, Dipole, Drift, Element, Marker,
    Quadrupole, Segment, Solenoid, Undulator,
};
use crate::error::{parameter, Error, Result};
use crate::space_charge::SpaceChargeKick;
use crate::Float;
use ndarray::{ArrayD, IxDyn};
use serde::Deserialize;
use std::collections::BTreeMap;

/// A single parameter value. Numbers may be batched by giving a list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Flag(bool),
    Number(Float),
    Numbers(Vec<Float>),
    Text(String),
}

impl From<Float> for ParamValue {
    fn from(v: Float) -> Self {
        ParamValue::Number(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Flag(v)
    }
}

impl From<Vec<Float>> for ParamValue {
    fn from(v: Vec<Float>) -> Self {
        ParamValue::Numbers(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

/// Element kind, optional name and named parameters. Parameters that are
/// not given take the element's defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ElementDescriptor {
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub params: BTreeMap<String, ParamValue>,
}

impl ElementDescriptor {
    pub fn new(kind: impl Into<String>) -> ElementDescriptor {
        ElementDescriptor {
            kind: kind.into(),
            name: None,
            params: BTreeMap::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Typed lookups into a descriptor's parameters.
struct Params<'a> {
    descriptor: &'a ElementDescriptor,
}

impl<'a> Params<'a> {
    fn invalid(&self, key: &str, reason: impl Into<String>) -> Error {
        parameter(self.descriptor.kind.as_str(), key, reason)
    }

    fn number(&self, key: &str, default: Float) -> Result<ArrayD<Float>> {
        match self.descriptor.params.get(key) {
            None => Ok(param(default)),
            Some(ParamValue::Number(v)) => Ok(param(*v)),
            Some(ParamValue::Numbers(v)) => Ok(param(v.clone())),
            Some(other) => Err(self.invalid(key, format!("expected a number, got {:?}", other))),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.descriptor.params.get(key) {
            None => Ok(default),
            Some(ParamValue::Flag(v)) => Ok(*v),
            Some(other) => Err(self.invalid(key, format!("expected true or false, got {:?}", other))),
        }
    }

    fn text(&self, key: &str) -> Result<Option<&'a str>> {
        match self.descriptor.params.get(key) {
            None => Ok(None),
            Some(ParamValue::Text(v)) => Ok(Some(v.as_str())),
            Some(other) => Err(self.invalid(key, format!("expected a string, got {:?}", other))),
        }
    }

    /// A list of exactly `N` numbers.
    fn fixed<const N: usize>(&self, key: &str, default: [Float; N]) -> Result<[Float; N]> {
        match self.descriptor.params.get(key) {
            None => Ok(default),
            Some(ParamValue::Numbers(v)) if v.len() == N => {
                let mut out = default;
                out.copy_from_slice(v);
                Ok(out)
            }
            Some(other) => Err(self.invalid(key, format!("expected {} numbers, got {:?}", N, other))),
        }
    }
}

macro_rules! named {
    ($descriptor:expr, $element:expr) => {{
        let element = $element;
        match &$descriptor.name {
            Some(name) => element.with_name(name.clone()).into(),
            None => element.into(),
        }
    }};
}

impl Element {
    /// Builds the element a descriptor describes. Kinds are matched
    /// case-insensitively.
    pub fn from_descriptor(descriptor: &ElementDescriptor) -> Result<Element> {
        let p = Params { descriptor };
        let kind = descriptor.kind.to_ascii_lowercase();
        let element: Element = match kind.as_str() {
            "drift" => named!(descriptor, Drift::new(p.number("length", 0.0)?)),
            "quadrupole" => named!(
                descriptor,
                Quadrupole::new(p.number("length", 0.0)?, p.number("k1", 0.0)?)
                    .misalignment(misalignment(&p)?)
                    .tilt(p.number("tilt", 0.0)?)
            ),
            "dipole" | "sbend" | "rbend" => {
                let length = p.number("length", 0.0)?;
                let angle = p.number("angle", 0.0)?;
                let mut e1 = p.number("e1", 0.0)?;
                let mut e2 = p.number("e2", 0.0)?;
                if kind == "rbend" {
                    e1 = zip_batch(&e1, &angle, |e, a| e + a / 2.0)?;
                    e2 = zip_batch(&e2, &angle, |e, a| e + a / 2.0)?;
                }
                named!(
                    descriptor,
                    Dipole::new(length, angle)
                        .k1(p.number("k1", 0.0)?)
                        .e1(e1)
                        .e2(e2)
                        .tilt(p.number("tilt", 0.0)?)
                        .fringe_integral(p.number("fringe_integral", 0.0)?)
                        .fringe_integral_exit(p.number("fringe_integral_exit", 0.0)?)
                        .gap(p.number("gap", 0.0)?)
                )
            }
            "cavity" => named!(
                descriptor,
                Cavity::new(
                    p.number("length", 0.0)?,
                    p.number("voltage", 0.0)?,
                    p.number("phase", 0.0)?,
                    p.number("frequency", 0.0)?,
                )
            ),
            "solenoid" => named!(
                descriptor,
                Solenoid::new(p.number("length", 0.0)?, p.number("k", 0.0)?)
                    .misalignment(misalignment(&p)?)
            ),
            "horizontal_corrector" | "hcor" => named!(
                descriptor,
                Corrector::horizontal(p.number("length", 0.0)?, p.number("angle", 0.0)?)
            ),
            "vertical_corrector" | "vcor" => named!(
                descriptor,
                Corrector::vertical(p.number("length", 0.0)?, p.number("angle", 0.0)?)
            ),
            "aperture" => {
                let aperture = Aperture::new(
                    p.number("x_max", Float::INFINITY)?,
                    p.number("y_max", Float::INFINITY)?,
                )
                .active(p.flag("is_active", true)?);
                let aperture = match p.text("shape")? {
                    None | Some("rectangular") => aperture,
                    Some("elliptical") => aperture.elliptical(),
                    Some(other) => {
                        return Err(p.invalid(
                            "shape",
                            format!("expected `rectangular` or `elliptical`, got `{}`", other),
                        ))
                    }
                };
                named!(descriptor, aperture)
            }
            "bpm" | "monitor" => named!(descriptor, Bpm::new(p.flag("is_active", false)?)),
            "marker" => named!(descriptor, Marker::new()),
            "undulator" => named!(
                descriptor,
                Undulator::new(p.number("length", 0.0)?, p.flag("is_active", false)?)
            ),
            "custom_transfer_map" => {
                let flat = p.fixed::<49>("map", identity_entries())?;
                let map = ArrayD::from_shape_vec(IxDyn(&[7, 7]), flat.to_vec())
                    .map_err(|e| p.invalid("map", e.to_string()))?;
                named!(
                    descriptor,
                    CustomTransferMap::from_array(&map)?.with_length(p.number("length", 0.0)?)
                )
            }
            "space_charge_kick" => {
                let shape = p.fixed("grid_shape", [32.0, 32.0, 32.0])?;
                if shape.iter().any(|&n| n < 1.0 || n.fract() != 0.0) {
                    return Err(p.invalid("grid_shape", "expected three positive integers"));
                }
                named!(
                    descriptor,
                    SpaceChargeKick::new(p.number("effective_length", 0.0)?)
                        .with_length(p.number("length", 0.0)?)
                        .grid_shape(shape.map(|n| n as usize))
                        .grid_extend(p.fixed("grid_extend", [3.0, 3.0, 3.0])?)
                )
            }
            _ => return Err(Error::UnsupportedElement(descriptor.kind.clone())),
        };
        Ok(element)
    }
}

fn misalignment(p: &Params) -> Result<ArrayD<Float>> {
    Ok(param(p.fixed("misalignment", [0.0, 0.0])?.to_vec()))
}

fn identity_entries() -> [Float; 49] {
    let mut entries = [0.0; 49];
    for i in 0..7 {
        entries[i * 7 + i] = 1.0;
    }
    entries
}

impl Segment {
    pub fn from_descriptors(descriptors: &[ElementDescriptor]) -> Result<Segment> {
        let elements = descriptors
            .iter()
            .map(Element::from_descriptor)
            .collect::<Result<Vec<_>>>()?;
        Ok(Segment::new(elements))
    }
}

use super::{unique_name, BeamElement, CustomTransferMap, Element};
use crate::batch::{broadcast_shapes, compose, identity_maps, param, zip_batch, MapArray};
use crate::beam::Beam;
use crate::error::Result;
use crate::Float;
use ndarray::ArrayD;
use tracing::trace;

/// Ordered sequence of elements, itself an element. The beam passes the
/// children in order.
#[derive(Debug, Clone)]
pub struct Segment {
    pub elements: Vec<Element>,
    pub name: String,
}

/// Elements that can be folded into a combined transfer map.
fn mergeable(element: &Element) -> bool {
    element.is_skippable() || element.is_linear()
}

/// Product `M_k ... M_1` of the maps of `elements` and the reference energy
/// behind the last one. Skippable elements are the identity and are left
/// out.
pub(crate) fn compose_run(elements: &[Element], energy: &ArrayD<Float>) -> Result<(MapArray, ArrayD<Float>)> {
    let mut maps = identity_maps(&[]);
    let mut energy = energy.clone();
    for element in elements.iter().filter(|e| !e.is_skippable()) {
        let map = element.transfer_map(&energy)?;
        maps = compose(&map, &maps)?;
        energy = element.output_energy(&energy)?;
    }
    // the product has to cover the energy batch even if every map was scalar
    let batch = broadcast_shapes(&[maps.shape(), energy.shape()])?;
    if maps.shape() != batch.as_slice() {
        maps = compose(&maps, &identity_maps(&batch))?;
    }
    Ok((maps, energy))
}

pub(crate) fn total_length(elements: &[Element]) -> Result<ArrayD<Float>> {
    elements.iter().try_fold(param(0.0), |sum, e| {
        zip_batch(&sum, &e.length()?, |a, b| a + b)
    })
}

/// Start and end indices of the maximal runs of mergeable elements and the
/// single non-mergeable elements between them, in order.
fn runs(elements: &[Element]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < elements.len() {
        let start = i;
        if mergeable(&elements[i]) {
            while i < elements.len() && mergeable(&elements[i]) {
                i += 1;
            }
        } else {
            i += 1;
        }
        out.push((start, i));
    }
    out
}

impl Segment {
    pub fn new(elements: Vec<Element>) -> Segment {
        Segment {
            elements,
            name: unique_name(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Same lattice with every nested segment inlined.
    pub fn flattened(&self) -> Segment {
        let mut elements = Vec::with_capacity(self.elements.len());
        for element in &self.elements {
            match element {
                Element::Segment(inner) => elements.extend(inner.flattened().elements),
                other => elements.push(other.clone()),
            }
        }
        Segment {
            elements,
            name: self.name.clone(),
        }
    }

    pub fn without_skippable_elements(&self) -> Segment {
        Segment {
            elements: self
                .elements
                .iter()
                .filter(|e| !e.is_skippable())
                .map(|e| match e {
                    Element::Segment(inner) => Element::Segment(inner.without_skippable_elements()),
                    other => other.clone(),
                })
                .collect(),
            name: self.name.clone(),
        }
    }

    /// Same lattice with every element sliced to at most `resolution`.
    pub fn split_segment(&self, resolution: Float) -> Segment {
        Segment {
            elements: self.split(resolution),
            name: self.name.clone(),
        }
    }

    /// Replaces each run of mergeable elements by one `CustomTransferMap`
    /// computed for the energy of `incoming` at that point of the lattice.
    pub fn transfer_maps_merged(&self, incoming: &Beam) -> Result<Segment> {
        let mut energy = match incoming.energy() {
            Some(energy) => energy.clone(),
            None => return Ok(self.clone()),
        };
        let mut elements = Vec::new();
        for (start, end) in runs(&self.elements) {
            let run = &self.elements[start..end];
            if mergeable(&run[0]) {
                if run.iter().all(|e| e.is_skippable()) {
                    continue;
                }
                let merged = CustomTransferMap::from_merging_elements(run, &energy)?;
                energy = merged.output_energy(&energy)?;
                elements.push(merged.into());
            } else {
                energy = run[0].output_energy(&energy)?;
                elements.push(run[0].clone());
            }
        }
        Ok(Segment {
            elements,
            name: self.name.clone(),
        })
    }

    /// Tracks element by element and returns the beam behind every child
    /// together with the child's name.
    pub fn track_each(&mut self, incoming: &Beam) -> Result<Vec<(String, Beam)>> {
        let mut beam = incoming.clone();
        let mut out = Vec::with_capacity(self.elements.len());
        for element in self.elements.iter_mut() {
            beam = element.track(&beam)?;
            out.push((element.name().to_string(), beam.clone()));
        }
        Ok(out)
    }

    /// First element called `name`, searching nested segments too.
    pub fn element(&self, name: &str) -> Option<&Element> {
        for element in &self.elements {
            if element.name() == name {
                return Some(element);
            }
            if let Element::Segment(inner) = element {
                if let Some(found) = inner.element(name) {
                    return Some(found);
                }
            }
        }
        None
    }

    pub fn element_mut(&mut self, name: &str) -> Option<&mut Element> {
        for element in self.elements.iter_mut() {
            if element.name() == name {
                return Some(element);
            }
            if let Element::Segment(inner) = element {
                if let Some(found) = inner.element_mut(name) {
                    return Some(found);
                }
            }
        }
        None
    }
}

impl BeamElement for Segment {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> Result<ArrayD<Float>> {
        total_length(&self.elements)
    }

    fn transfer_map(&self, energy: &ArrayD<Float>) -> Result<MapArray> {
        compose_run(&self.elements, energy).map(|(maps, _)| maps)
    }

    fn output_energy(&self, energy: &ArrayD<Float>) -> Result<ArrayD<Float>> {
        self.elements
            .iter()
            .try_fold(energy.clone(), |e, element| element.output_energy(&e))
    }

    /// Runs of mergeable elements are applied as one combined map, every
    /// other element on its own.
    fn track(&mut self, incoming: &Beam) -> Result<Beam> {
        let mut beam = incoming.clone();
        for (start, end) in runs(&self.elements) {
            let run = &mut self.elements[start..end];
            if !mergeable(&run[0]) {
                beam = run[0].track(&beam)?;
                continue;
            }
            if run.iter().all(|e| e.is_skippable()) {
                continue;
            }
            let energy = match beam.energy() {
                Some(energy) => energy.clone(),
                None => continue,
            };
            let (maps, outgoing) = compose_run(run, &energy)?;
            trace!(
                segment = %self.name,
                first = run[0].name(),
                elements = end - start,
                "applying merged transfer map"
            );
            beam = beam.transformed_by(&maps, &outgoing)?;
        }
        Ok(beam)
    }

    fn split(&self, resolution: Float) -> Vec<Element> {
        self.elements
            .iter()
            .flat_map(|e| e.split(resolution))
            .collect()
    }

    fn broadcast(&self, shape: &[usize]) -> Result<Element> {
        Ok(Segment {
            elements: self
                .elements
                .iter()
                .map(|e| e.broadcast(shape))
                .collect::<Result<Vec<_>>>()?,
            name: self.name.clone(),
        }
        .into())
    }

    fn is_skippable(&self) -> bool {
        self.elements.iter().all(|e| e.is_skippable())
    }

    fn is_linear(&self) -> bool {
        self.elements.iter().all(mergeable)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::elements::{Bpm, Drift, Marker, Quadrupole};
    use crate::E_TOL;

    fn fodo() -> Segment {
        Segment::new(vec![
            Quadrupole::new(0.2, 4.2).with_name("qf").into(),
            Drift::new(1.0).into(),
            Marker::new().into(),
            Quadrupole::new(0.2, -4.2).with_name("qd").into(),
            Drift::new(1.0).into(),
        ])
    }

    #[test]
    fn active_bpm_breaks_the_run() {
        let mut elements = fodo().elements;
        elements.insert(2, Bpm::new(true).with_name("bpm").into());
        assert_eq!(runs(&elements), vec![(0, 2), (2, 3), (3, 6)]);
    }

    #[test]
    fn length_is_the_sum() {
        assert!((fodo().length().unwrap().sum() - 2.4).abs() < E_TOL);
    }

    #[test]
    fn nested_segments_flatten_in_order() {
        let inner = Segment::new(vec![Drift::new(1.0).with_name("d").into()]);
        let outer = Segment::new(vec![inner.into(), Marker::new().with_name("m").into()]);
        let flat = outer.flattened();
        assert_eq!(flat.elements.len(), 2);
        assert_eq!(flat.elements[0].name(), "d");
        assert!(outer.element("d").is_some());
        assert!(outer.without_skippable_elements().element("m").is_none());
    }

    #[test]
    fn scalar_maps_cover_the_energy_batch() {
        let (maps, energy) = compose_run(&fodo().elements, &param(vec![1e8, 2e8])).unwrap();
        assert_eq!(maps.shape(), &[2]);
        assert_eq!(energy.shape(), &[2]);
    }
}

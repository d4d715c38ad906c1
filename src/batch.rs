//! Batch bookkeeping shared by beams and elements.
//!
//! Every physical parameter is an `ArrayD<Float>` whose shape is its batch
//! shape, and a batch of transfer maps is an `ArrayD<Matrix7>`. Batches
//! combine with numpy broadcasting rules.
use crate::error::{shape, Error, Result};
use crate::Float;
use nalgebra::{SMatrix, SVector};
use ndarray::{arr0, Array, Array1, ArrayD, ArrayViewD, Axis, Dimension, IxDyn, Zip};

pub type Matrix7 = SMatrix<Float, 7, 7>;
pub type Vector7 = SVector<Float, 7>;
pub type Matrix6 = SMatrix<Float, 6, 6>;
pub type Vector6 = SVector<Float, 6>;

/// A batch of 7x7 transfer maps, one per batch entry.
pub type MapArray = ArrayD<Matrix7>;

/// Anything that can be turned into a (possibly batched) element or beam
/// parameter.
pub trait IntoParam {
    fn into_param(self) -> ArrayD<Float>;
}

impl IntoParam for Float {
    fn into_param(self) -> ArrayD<Float> {
        arr0(self).into_dyn()
    }
}

impl IntoParam for Vec<Float> {
    fn into_param(self) -> ArrayD<Float> {
        Array1::from(self).into_dyn()
    }
}

impl<const N: usize> IntoParam for [Float; N] {
    fn into_param(self) -> ArrayD<Float> {
        Array1::from(self.to_vec()).into_dyn()
    }
}

impl<D: Dimension> IntoParam for Array<Float, D> {
    fn into_param(self) -> ArrayD<Float> {
        self.into_dyn()
    }
}

impl IntoParam for &ArrayD<Float> {
    fn into_param(self) -> ArrayD<Float> {
        self.clone()
    }
}

pub fn param(value: impl IntoParam) -> ArrayD<Float> {
    value.into_param()
}

/// Numpy broadcasting of several shapes into one.
pub fn broadcast_shapes(shapes: &[&[usize]]) -> Result<Vec<usize>> {
    let ndim = shapes.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut out = vec![1; ndim];
    for s in shapes {
        let offset = ndim - s.len();
        for (i, &d) in s.iter().enumerate() {
            let o = &mut out[offset + i];
            if *o == 1 {
                *o = d;
            } else if d != 1 && d != *o {
                return Err(Error::IncompatibleBatch(
                    shapes.iter().map(|s| s.to_vec()).collect(),
                ));
            }
        }
    }
    Ok(out)
}

pub fn broadcast_view<'a, A>(array: &'a ArrayD<A>, to: &[usize]) -> Result<ArrayViewD<'a, A>> {
    array
        .broadcast(IxDyn(to))
        .ok_or_else(|| Error::IncompatibleBatch(vec![array.shape().to_vec(), to.to_vec()]))
}

/// Broadcasts an owned array, only copying when the shape actually changes.
pub fn broadcast_owned<A: Clone>(array: ArrayD<A>, to: &[usize]) -> Result<ArrayD<A>> {
    if array.shape() == to {
        return Ok(array);
    }
    broadcast_view(&array, to).map(|v| v.to_owned())
}

/// Evaluates `f` on every entry of the common batch of `params`.
pub fn try_map_batch<T, F, const N: usize>(params: [&ArrayD<Float>; N], mut f: F) -> Result<ArrayD<T>>
where
    F: FnMut([Float; N]) -> Result<T>,
{
    let shapes: Vec<&[usize]> = params.iter().map(|p| p.shape()).collect();
    let batch = broadcast_shapes(&shapes)?;
    let columns = params
        .iter()
        .map(|p| broadcast_view(*p, &batch).map(|v| v.iter().copied().collect::<Vec<_>>()))
        .collect::<Result<Vec<_>>>()?;
    let size: usize = batch.iter().product();
    let data = (0..size)
        .map(|i| f(std::array::from_fn(|k| columns[k][i])))
        .collect::<Result<Vec<T>>>()?;
    ArrayD::from_shape_vec(IxDyn(&batch), data).map_err(|e| shape(e.to_string()))
}

pub fn map_batch<T, F, const N: usize>(params: [&ArrayD<Float>; N], mut f: F) -> Result<ArrayD<T>>
where
    F: FnMut([Float; N]) -> T,
{
    try_map_batch(params, |v| Ok(f(v)))
}

/// Elementwise combination of two batches after broadcasting them together.
pub fn zip_batch<A, B, C, F>(a: &ArrayD<A>, b: &ArrayD<B>, f: F) -> Result<ArrayD<C>>
where
    F: Fn(&A, &B) -> C,
{
    let batch = broadcast_shapes(&[a.shape(), b.shape()])?;
    let a = broadcast_view(a, &batch)?;
    let b = broadcast_view(b, &batch)?;
    Ok(Zip::from(&a).and(&b).map_collect(|x, y| f(x, y)))
}

/// `after · before`, i.e. `before` acts on the beam first.
pub fn compose(after: &MapArray, before: &MapArray) -> Result<MapArray> {
    zip_batch(after, before, |a, b| a * b)
}

pub fn identity_maps(batch: &[usize]) -> MapArray {
    ArrayD::from_elem(IxDyn(batch), Matrix7::identity())
}

/// Splits an array with a trailing axis of length 2 into its two halves.
pub fn unstack_pair(array: &ArrayD<Float>, what: &str) -> Result<(ArrayD<Float>, ArrayD<Float>)> {
    let last = array
        .ndim()
        .checked_sub(1)
        .filter(|&l| array.shape()[l] == 2)
        .ok_or_else(|| {
            shape(format!(
                "{} needs a trailing dimension of 2, got {:?}",
                what,
                array.shape()
            ))
        })?;
    Ok((
        array.index_axis(Axis(last), 0).to_owned(),
        array.index_axis(Axis(last), 1).to_owned(),
    ))
}

/// Shape of the batch part of a `(*batch, 2)` array.
pub(crate) fn pair_batch(array: &ArrayD<Float>) -> &[usize] {
    let s = array.shape();
    &s[..s.len().saturating_sub(1)]
}

pub fn max_abs(array: &ArrayD<Float>) -> Float {
    array.iter().fold(0.0, |m: Float, v| m.max(v.abs()))
}

pub fn all_zero(array: &ArrayD<Float>) -> bool {
    array.iter().all(|&v| v == 0.0)
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn broadcasting_follows_numpy() {
        assert_eq!(broadcast_shapes(&[&[3, 1], &[4]]).unwrap(), vec![3, 4]);
        assert_eq!(broadcast_shapes(&[&[], &[2, 5]]).unwrap(), vec![2, 5]);
        assert_eq!(broadcast_shapes(&[&[0], &[1]]).unwrap(), vec![0]);
        assert!(matches!(
            broadcast_shapes(&[&[3], &[4]]),
            Err(Error::IncompatibleBatch(_))
        ));
    }

    #[test]
    fn map_batch_broadcasts_its_inputs() {
        let a = param(vec![1.0, 2.0, 3.0]);
        let b = param(10.0);
        let out = map_batch([&a, &b], |[x, y]| x * y).unwrap();
        assert_eq!(out.shape(), &[3]);
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn unstack_pair_needs_a_trailing_two() {
        let mis = param(array![[0.1, 0.2], [0.3, 0.4], [0.5, 0.6]]);
        let (dx, dy) = unstack_pair(&mis, "misalignment").unwrap();
        assert_eq!(dx.shape(), &[3]);
        assert_eq!(dy[[2]], 0.6);
        assert!(unstack_pair(&param(vec![0.1, 0.2, 0.3]), "misalignment").is_err());
    }
}

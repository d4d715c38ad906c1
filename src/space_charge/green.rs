//! Integrated Green's function of the free-space Poisson equation.
use crate::Float;
use ndarray::Array3;

/// Antiderivative of `1/r` integrated over the box `[0,x]×[0,y]×[0,s]`.
fn integrated_potential(x: Float, y: Float, s: Float) -> Float {
    let r = (x * x + y * y + s * s).sqrt();
    -0.5 * s * s * (x * y / (s * r)).atan() - 0.5 * y * y * (x * s / (y * r)).atan()
        - 0.5 * x * x * (y * s / (x * r)).atan()
        + y * s * (x / (y * y + s * s).sqrt()).asinh()
        + x * s * (y / (x * x + s * s).sqrt()).asinh()
        + x * y * (s / (x * x + y * y).sqrt()).asinh()
}

/// Potential of a unit-density cell at offset `(x, y, s)` from the source,
/// the alternating sum of [`integrated_potential`] over the cell corners.
fn cell_potential(x: Float, y: Float, s: Float, cell: [Float; 3]) -> Float {
    let [hx, hy, hs] = [cell[0] / 2.0, cell[1] / 2.0, cell[2] / 2.0];
    let mut sum = 0.0;
    for &sx in &[1.0, -1.0] {
        for &sy in &[1.0, -1.0] {
            for &ss in &[1.0, -1.0] {
                let sign: Float = sx * sy * ss;
                sum += sign * integrated_potential(x + sx * hx, y + sy * hy, s + ss * hs);
            }
        }
    }
    sum
}

/// Source index seen from the padded index `i` on a grid of `2n` points.
fn mirrored(i: usize, n: usize) -> Option<usize> {
    use std::cmp::Ordering::*;
    match i.cmp(&n) {
        Less => Some(i),
        Equal => None,
        Greater => Some(2 * n - i),
    }
}

/// Green's function on the doubled grid used for the open boundary
/// convolution. `cell` is already scaled to the beam rest frame.
pub(crate) fn padded_green_function(shape: [usize; 3], cell: [Float; 3]) -> Array3<Float> {
    let [nx, ny, nz] = shape;
    let base = Array3::from_shape_fn((nx, ny, nz), |(i, j, k)| {
        cell_potential(
            i as Float * cell[0],
            j as Float * cell[1],
            k as Float * cell[2],
            cell,
        )
    });
    Array3::from_shape_fn((2 * nx, 2 * ny, 2 * nz), |(i, j, k)| {
        match (mirrored(i, nx), mirrored(j, ny), mirrored(k, nz)) {
            (Some(a), Some(b), Some(c)) => base[[a, b, c]],
            _ => 0.0,
        }
    })
}

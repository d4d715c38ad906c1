//! Cloud-in-cell deposition onto and interpolation from a regular 3-D grid.
use crate::{Float, PARTICLE_CHUNK_SIZE};
use itertools::izip;
use ndarray::Array3;
use rayon::prelude::*;

/// The 8 vertices of a cell relative to its lower corner.
const OFFSETS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [0, 0, 1],
    [0, 1, 0],
    [0, 1, 1],
    [1, 0, 0],
    [1, 0, 1],
    [1, 1, 0],
    [1, 1, 1],
];

/// Vertices `lower + i * cell` for `i` in `0..shape` along each axis.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Grid {
    pub shape: [usize; 3],
    pub lower: [Float; 3],
    pub cell: [Float; 3],
}

impl Grid {
    /// Grid spanning `centroid ± extend * sigma` of the weighted particle
    /// positions. `None` if the beam has no extent along some axis.
    pub fn around(
        positions: &[[Float; 3]],
        weights: &[Float],
        shape: [usize; 3],
        extend: [Float; 3],
    ) -> Option<Grid> {
        let w_sum: Float = weights.iter().sum();
        let w2_sum: Float = weights.iter().map(|w| w * w).sum();
        let mut lower = [0.0; 3];
        let mut cell = [0.0; 3];
        for d in 0..3 {
            let mean = izip!(positions, weights).map(|(p, w)| w * p[d]).sum::<Float>() / w_sum;
            let var = izip!(positions, weights)
                .map(|(p, w)| w * (p[d] - mean).powi(2))
                .sum::<Float>()
                / (w_sum - w2_sum / w_sum);
            let half_width = extend[d] * var.sqrt();
            cell[d] = 2.0 * half_width / shape[d] as Float;
            lower[d] = mean - half_width;
            if !(cell[d] > 0.0 && cell[d].is_finite()) {
                return None;
            }
        }
        Some(Grid { shape, lower, cell })
    }

    pub fn cell_volume(&self) -> Float {
        self.cell.iter().product()
    }

    /// Grid index and weight of the 8 vertices around `position`. Vertices
    /// outside the grid come back as `None`.
    fn stencil(&self, position: &[Float; 3]) -> [(Option<[usize; 3]>, Float); 8] {
        let mut base = [0_i64; 3];
        let mut frac = [0.0; 3];
        for d in 0..3 {
            let u = (position[d] - self.lower[d]) / self.cell[d];
            let f = u.floor();
            base[d] = f as i64;
            frac[d] = u - f;
        }
        let mut out = [(None, 0.0); 8];
        for (slot, offset) in out.iter_mut().zip(OFFSETS.iter()) {
            let mut index = [0_usize; 3];
            let mut weight = 1.0;
            let mut inside = true;
            for d in 0..3 {
                let i = base[d] + offset[d] as i64;
                inside &= i >= 0 && (i as usize) < self.shape[d];
                index[d] = i.max(0) as usize;
                weight *= if offset[d] == 0 { 1.0 - frac[d] } else { frac[d] };
            }
            *slot = (if inside { Some(index) } else { None }, weight);
        }
        out
    }

    /// Charge density in C/m^3.
    pub fn deposit(&self, positions: &[[Float; 3]], charges: &[Float]) -> Array3<Float> {
        let [nx, ny, nz] = self.shape;
        let mut rho = Array3::<Float>::zeros((nx, ny, nz));
        for (position, &q) in izip!(positions, charges) {
            if q == 0.0 {
                continue;
            }
            for (index, weight) in self.stencil(position) {
                if let Some([i, j, k]) = index {
                    rho[[i, j, k]] += q * weight;
                }
            }
        }
        let volume = self.cell_volume();
        rho.mapv_inplace(|v| v / volume);
        rho
    }

    /// Trilinear interpolation of a vector field given by its three
    /// components, one value per particle.
    pub fn interpolate(&self, field: &[Array3<Float>; 3], positions: &[[Float; 3]]) -> Vec<[Float; 3]> {
        if !cfg!(feature = "unchecked") {
            for component in field {
                assert_eq!(component.shape(), &self.shape[..]);
            }
        }
        positions
            .par_iter()
            .with_min_len(PARTICLE_CHUNK_SIZE)
            .map(|position| {
                let mut value = [0.0; 3];
                for (index, weight) in self.stencil(position) {
                    if let Some([i, j, k]) = index {
                        for d in 0..3 {
                            value[d] += weight * field[d][[i, j, k]];
                        }
                    }
                }
                value
            })
            .collect()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::E_TOL;

    fn cube() -> Grid {
        Grid {
            shape: [4, 4, 4],
            lower: [-2.0, -2.0, -2.0],
            cell: [1.0, 1.0, 1.0],
        }
    }

    #[test]
    fn deposition_conserves_charge_inside_the_grid() {
        let grid = cube();
        let positions = [[0.3, -0.2, 0.1], [-1.5, 0.7, 0.0], [0.0, 0.0, 0.0]];
        let charges = [1.0, 2.0, 0.5];
        let rho = grid.deposit(&positions, &charges);
        assert!((rho.sum() * grid.cell_volume() - 3.5).abs() < E_TOL);
    }

    #[test]
    fn charge_beyond_the_grid_is_dropped() {
        let grid = cube();
        let rho = grid.deposit(&[[10.0, 0.0, 0.0]], &[1.0]);
        assert_eq!(rho.sum(), 0.0);
    }

    #[test]
    fn interpolation_reproduces_linear_fields() {
        let grid = cube();
        let ramp = Array3::from_shape_fn((4, 4, 4), |(i, _, _)| i as Float);
        let zero = Array3::zeros((4, 4, 4));
        let field = [ramp, zero.clone(), zero];
        let values = grid.interpolate(&field, &[[-0.75, 0.0, 0.0]]);
        // x = -0.75 sits at 1.25 cells from the lower edge
        assert!((values[0][0] - 1.25).abs() < E_TOL);
    }

    #[test]
    fn flat_beams_have_no_grid() {
        let positions = [[0.0, 1.0, 2.0], [0.0, 2.0, 3.0]];
        assert!(Grid::around(&positions, &[1.0, 1.0], [8, 8, 8], [3.0, 3.0, 3.0]).is_none());
        let positions = [[1.0, 1.0, 2.0], [0.0, 2.0, 3.0]];
        let grid = Grid::around(&positions, &[1.0, 1.0], [8, 8, 8], [3.0, 3.0, 3.0]).unwrap();
        assert!((grid.lower[0] - (0.5 - 3.0 * (0.5 as Float).sqrt())).abs() < E_TOL);
    }
}

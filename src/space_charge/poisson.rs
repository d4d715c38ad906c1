use super::fft_3d::Fft3D;
use super::green::padded_green_function;
use crate::{Float, EPSILON_0, PI};
use ndarray::{s, Array3, Axis, Slice};
use rustfft::num_complex::Complex;

/// Open-boundary Poisson solver for a fixed grid shape. Holds the FFT plans
/// for the zero-padded grid; the Green's function depends on the cell size
/// and is rebuilt per call.
pub struct PoissonSolver {
    shape: [usize; 3],
    fft: Fft3D,
}

impl PoissonSolver {
    pub fn new(shape: [usize; 3]) -> PoissonSolver {
        PoissonSolver {
            shape,
            fft: Fft3D::new([2 * shape[0], 2 * shape[1], 2 * shape[2]]),
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// Electrostatic potential in V of the charge density `rho` (C/m^3).
    /// `cell` holds the cell size in the frame the field is solved in.
    pub fn potential(&self, rho: &Array3<Float>, cell: [Float; 3]) -> Array3<Float> {
        let [nx, ny, nz] = self.shape;
        if !cfg!(feature = "unchecked") {
            assert_eq!(rho.shape(), &self.shape[..]);
        }
        let padded = self.fft.shape();
        let mut charge = Array3::<Complex<Float>>::zeros((padded[0], padded[1], padded[2]));
        charge
            .slice_mut(s![..nx, ..ny, ..nz])
            .zip_mut_with(rho, |c, &r| *c = Complex::new(r, 0.0));
        let mut green = padded_green_function(self.shape, cell).mapv(|g| Complex::new(g, 0.0));

        self.fft.fft(&mut charge);
        self.fft.fft(&mut green);
        charge.zip_mut_with(&green, |c, g| *c *= g);
        self.fft.inv_fft(&mut charge);

        let scale = 1.0 / (4.0 * PI * EPSILON_0);
        charge.slice(s![..nx, ..ny, ..nz]).mapv(|c| c.re * scale)
    }
}

/// `-factor * grad(phi)` by central differences with the lab-frame cell
/// sizes. The outermost layer along each axis is left at zero.
pub(crate) fn field(phi: &Array3<Float>, cell: [Float; 3], factor: Float) -> [Array3<Float>; 3] {
    let component = |d: usize| {
        let n = phi.len_of(Axis(d));
        let mut grad = Array3::<Float>::zeros(phi.raw_dim());
        if n >= 3 {
            let ahead = phi.slice_axis(Axis(d), Slice::from(2..));
            let behind = phi.slice_axis(Axis(d), Slice::from(..n - 2));
            let scale = -factor / (2.0 * cell[d]);
            grad.slice_axis_mut(Axis(d), Slice::from(1..n - 1))
                .assign(&((&ahead - &behind) * scale));
        }
        grad
    };
    [component(0), component(1), component(2)]
}

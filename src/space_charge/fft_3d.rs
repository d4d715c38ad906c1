use crate::Float;
use ndarray::{Array3, Axis};
use num_traits::Zero;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// 3-D FFT on a fixed grid shape, done as 1-D transforms along each axis.
/// The plans are shared read-only, so one `Fft3D` can serve many threads.
pub struct Fft3D {
    shape: [usize; 3],
    forward: [Arc<dyn Fft<Float>>; 3],
    inverse: [Arc<dyn Fft<Float>>; 3],
}

impl Fft3D {
    pub fn new(shape: [usize; 3]) -> Fft3D {
        let mut planner = FftPlanner::new();
        let forward = [
            planner.plan_fft_forward(shape[0]),
            planner.plan_fft_forward(shape[1]),
            planner.plan_fft_forward(shape[2]),
        ];
        let inverse = [
            planner.plan_fft_inverse(shape[0]),
            planner.plan_fft_inverse(shape[1]),
            planner.plan_fft_inverse(shape[2]),
        ];
        Fft3D {
            shape,
            forward,
            inverse,
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    fn along_axes(plans: &[Arc<dyn Fft<Float>>; 3], data: &mut Array3<Complex<Float>>) {
        for (axis, plan) in plans.iter().enumerate() {
            let mut buffer = vec![Complex::zero(); plan.len()];
            let mut scratch = vec![Complex::zero(); plan.get_inplace_scratch_len()];
            for mut lane in data.lanes_mut(Axis(axis)) {
                for (b, v) in buffer.iter_mut().zip(lane.iter()) {
                    *b = *v;
                }
                plan.process_with_scratch(&mut buffer, &mut scratch);
                for (v, b) in lane.iter_mut().zip(buffer.iter()) {
                    *v = *b;
                }
            }
        }
    }

    pub fn fft(&self, data: &mut Array3<Complex<Float>>) {
        if !cfg!(feature = "unchecked") {
            assert_eq!(data.shape(), &self.shape[..]);
        }
        Fft3D::along_axes(&self.forward, data);
    }

    /// Normalized inverse, `inv_fft(fft(a)) == a`.
    pub fn inv_fft(&self, data: &mut Array3<Complex<Float>>) {
        if !cfg!(feature = "unchecked") {
            assert_eq!(data.shape(), &self.shape[..]);
        }
        Fft3D::along_axes(&self.inverse, data);
        let norm = 1.0 / (self.shape.iter().product::<usize>() as Float);
        data.mapv_inplace(|v| v * norm);
    }
}

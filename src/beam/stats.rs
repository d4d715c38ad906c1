//! Survival-weighted estimators over the particle axis (the last axis of
//! every argument).
use crate::Float;
use ndarray::{ArrayD, ArrayViewD, Axis, Zip};

pub(crate) fn weighted_mean(values: &ArrayViewD<Float>, weights: &ArrayViewD<Float>) -> ArrayD<Float> {
    let axis = Axis(values.ndim() - 1);
    (values * weights).sum_axis(axis) / weights.sum_axis(axis)
}

/// Unbiased weighted covariance `Σw(a-ā)(b-b̄) / (Σw - Σw²/Σw)`.
pub(crate) fn weighted_covariance(
    a: &ArrayViewD<Float>,
    b: &ArrayViewD<Float>,
    weights: &ArrayViewD<Float>,
) -> ArrayD<Float> {
    let axis = Axis(weights.ndim() - 1);
    let w_sum = weights.sum_axis(axis);
    let w2_sum = (weights * weights).sum_axis(axis);
    let mean_a = weighted_mean(a, weights).insert_axis(axis);
    let mean_b = weighted_mean(b, weights).insert_axis(axis);

    let mut centered = a.to_owned();
    Zip::from(&mut centered)
        .and(b)
        .and(weights)
        .and_broadcast(&mean_a)
        .and_broadcast(&mean_b)
        .for_each(|c, &b, &w, &ma, &mb| *c = w * (*c - ma) * (b - mb));

    let denominator = Zip::from(&w_sum)
        .and(&w2_sum)
        .map_collect(|&w, &w2| w - w2 / w);
    centered.sum_axis(axis) / denominator
}

pub(crate) fn weighted_std(values: &ArrayViewD<Float>, weights: &ArrayViewD<Float>) -> ArrayD<Float> {
    weighted_covariance(values, values, weights).mapv(Float::sqrt)
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::E_TOL;
    use ndarray::array;

    #[test]
    fn unit_weights_give_the_sample_estimators() {
        let values = array![[1.0, 2.0, 3.0, 4.0], [0.0, 0.0, 2.0, 2.0]].into_dyn();
        let weights = ArrayD::<Float>::ones(values.raw_dim());
        let mean = weighted_mean(&values.view(), &weights.view());
        assert!((mean[[0]] - 2.5).abs() < E_TOL);
        assert!((mean[[1]] - 1.0).abs() < E_TOL);
        let var = weighted_covariance(&values.view(), &values.view(), &weights.view());
        // numpy.var(ddof=1)
        assert!((var[[0]] - 5.0 / 3.0).abs() < E_TOL);
        assert!((var[[1]] - 4.0 / 3.0).abs() < E_TOL);
    }

    #[test]
    fn lost_particles_do_not_count() {
        let values = array![1.0, 2.0, 3.0, 100.0].into_dyn();
        let weights = array![1.0, 1.0, 1.0, 0.0].into_dyn();
        let mean = weighted_mean(&values.view(), &weights.view());
        assert!((mean.sum() - 2.0).abs() < E_TOL);
        let std = weighted_std(&values.view(), &weights.view());
        assert!((std.sum() - 1.0).abs() < E_TOL);
    }
}

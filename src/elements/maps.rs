//! Single-entry first-order transfer matrices. The element types lift these
//! over their batch dimensions with `batch::map_batch`.
use crate::batch::Matrix7;
use crate::{relativistic_factors, Float, ELECTRON_MASS_EV, PI, SPEED_OF_LIGHT};

/// `(cos(k L), sin(k L) / k)` for a focusing strength `k2 = k^2` of either
/// sign, with the `k -> 0` limit taken analytically.
fn focusing_terms(k2: Float, length: Float) -> (Float, Float) {
    if k2 > 0.0 {
        let k = k2.sqrt();
        ((k * length).cos(), (k * length).sin() / k)
    } else if k2 < 0.0 {
        let k = (-k2).sqrt();
        ((k * length).cosh(), (k * length).sinh() / k)
    } else {
        (1.0, length)
    }
}

pub(crate) fn drift_matrix(length: Float, energy: Float) -> Matrix7 {
    let (_, igamma2, beta) = relativistic_factors(energy);
    let mut tm = Matrix7::identity();
    tm[(0, 1)] = length;
    tm[(2, 3)] = length;
    if beta > 0.0 {
        tm[(4, 5)] = -length / beta.powi(2) * igamma2;
    }
    tm
}

/// Rotation of the transverse plane by `angle` about the beam axis.
pub(crate) fn rotation_matrix(angle: Float) -> Matrix7 {
    let (sn, cs) = angle.sin_cos();
    let mut tm = Matrix7::identity();
    tm[(0, 0)] = cs;
    tm[(0, 2)] = sn;
    tm[(1, 1)] = cs;
    tm[(1, 3)] = sn;
    tm[(2, 0)] = -sn;
    tm[(2, 2)] = cs;
    tm[(3, 1)] = -sn;
    tm[(3, 3)] = cs;
    tm
}

/// `R(-tilt) · tm · R(tilt)`
pub(crate) fn tilted(tm: Matrix7, tilt: Float) -> Matrix7 {
    if tilt == 0.0 {
        return tm;
    }
    rotation_matrix(-tilt) * tm * rotation_matrix(tilt)
}

/// Applies `tm` about an origin shifted by `(dx, dy)`: move into the element
/// frame, apply the map and move back out.
pub(crate) fn misaligned(tm: Matrix7, dx: Float, dy: Float) -> Matrix7 {
    if dx == 0.0 && dy == 0.0 {
        return tm;
    }
    let mut entry = Matrix7::identity();
    entry[(0, 6)] = -dx;
    entry[(2, 6)] = -dy;
    let mut exit = Matrix7::identity();
    exit[(0, 6)] = dx;
    exit[(2, 6)] = dy;
    exit * tm * entry
}

/// Thick combined-function magnet: quadrupole strength `k1`, bending
/// curvature `hx` and a tilt of the whole magnet.
pub(crate) fn base_rmatrix(length: Float, k1: Float, hx: Float, tilt: Float, energy: Float) -> Matrix7 {
    let (_, igamma2, beta) = relativistic_factors(energy);
    // a reference particle at rest has no path-length terms
    let ibeta = if beta > 0.0 { 1.0 / beta } else { 0.0 };
    let ibeta2 = ibeta * ibeta;

    let kx2 = k1 + hx * hx;
    let ky2 = -k1;
    let (cx, sx) = focusing_terms(kx2, length);
    let (cy, sy) = focusing_terms(ky2, length);

    let (dx, r56) = if kx2 != 0.0 {
        (
            hx / kx2 * (1.0 - cx),
            hx * hx * (length - sx) / kx2 * ibeta2,
        )
    } else {
        (
            hx * length * length / 2.0,
            hx * hx * length.powi(3) / 6.0 * ibeta2,
        )
    };
    let r56 = r56 - length * ibeta2 * igamma2;

    let mut tm = Matrix7::identity();
    tm[(0, 0)] = cx;
    tm[(0, 1)] = sx;
    tm[(0, 5)] = dx * ibeta;
    tm[(1, 0)] = -kx2 * sx;
    tm[(1, 1)] = cx;
    tm[(1, 5)] = sx * hx * ibeta;
    tm[(2, 2)] = cy;
    tm[(2, 3)] = sy;
    tm[(3, 2)] = -ky2 * sy;
    tm[(3, 3)] = cy;
    tm[(4, 0)] = -hx * sx * ibeta;
    tm[(4, 1)] = -dx * ibeta;
    tm[(4, 5)] = r56;

    tilted(tm, tilt)
}

/// Thin edge focusing of a sector magnet's pole face, including the fringe
/// field correction of the vertical plane.
pub(crate) fn dipole_edge(hx: Float, edge_angle: Float, fringe_integral: Float, gap: Float) -> Matrix7 {
    let sec_e = 1.0 / edge_angle.cos();
    let phi = fringe_integral * hx * gap * sec_e * (1.0 + edge_angle.sin().powi(2));
    let mut tm = Matrix7::identity();
    tm[(1, 0)] = hx * edge_angle.tan();
    tm[(3, 2)] = -hx * (edge_angle - phi).tan();
    tm
}

pub(crate) fn solenoid_matrix(length: Float, k: Float, energy: Float) -> Matrix7 {
    let (_, igamma2, beta) = relativistic_factors(energy);
    let (s, c) = (k * length).sin_cos();
    let s_k = if k == 0.0 { length } else { s / k };
    let r56 = if beta != 0.0 {
        -length / beta.powi(2) * igamma2
    } else {
        0.0
    };

    let mut tm = Matrix7::identity();
    tm[(0, 0)] = c * c;
    tm[(0, 1)] = c * s_k;
    tm[(0, 2)] = s * c;
    tm[(0, 3)] = s * s_k;
    tm[(1, 0)] = -k * s * c;
    tm[(1, 1)] = c * c;
    tm[(1, 2)] = -k * s * s;
    tm[(1, 3)] = s * c;
    tm[(2, 0)] = -s * c;
    tm[(2, 1)] = -s * s_k;
    tm[(2, 2)] = c * c;
    tm[(2, 3)] = c * s_k;
    tm[(3, 0)] = k * s * s;
    tm[(3, 1)] = -s * c;
    tm[(3, 2)] = -k * s * c;
    tm[(3, 3)] = c * c;
    tm[(4, 5)] = r56;
    tm
}

/// Energy gain of a cavity on the given reference energy. A cavity with
/// no positive voltage is switched off and leaves the energy alone.
pub(crate) fn cavity_energy_gain(voltage: Float, phase_deg: Float) -> Float {
    if voltage <= 0.0 {
        return 0.0;
    }
    voltage * (phase_deg * PI / 180.0).cos()
}

/// Rosenzweig-Serafini matrix of a standing-wave cavity with the
/// longitudinal terms of a sinusoidal RF field. Falls back to a drift when
/// the cavity is switched off.
pub(crate) fn cavity_matrix(
    length: Float,
    voltage: Float,
    phase_deg: Float,
    frequency: Float,
    energy: Float,
) -> Matrix7 {
    if voltage <= 0.0 {
        return base_rmatrix(length, 0.0, 0.0, 0.0, energy);
    }

    let eta: Float = 1.0;
    let phi = phase_deg * PI / 180.0;
    let (sin_phi, cos_phi) = phi.sin_cos();
    let delta_energy = voltage * cos_phi;

    let ei = energy / ELECTRON_MASS_EV;
    let ef = (energy + delta_energy) / ELECTRON_MASS_EV;
    let beta0 = (1.0 - ei.powi(-2)).sqrt();
    let beta1 = (1.0 - ef.powi(-2)).sqrt();

    let (r11, r12, r21, r22) = if length == 0.0 {
        (1.0, 0.0, 0.0, ei / ef)
    } else {
        let ep = (ef - ei) / length;
        // alpha is finite on the zero crossing, take the cos(phi) -> 0 limit
        let alpha = if cos_phi.abs() > 1e-12 {
            (eta / 8.0).sqrt() / cos_phi * (ef / ei).ln()
        } else {
            (eta / 8.0).sqrt() * voltage / ELECTRON_MASS_EV / ei
        };
        let (sin_a, cos_a) = alpha.sin_cos();

        let r11 = cos_a - (2.0 / eta).sqrt() * cos_phi * sin_a;
        let r12 = if ep.abs() > 1e-10 {
            (8.0 / eta).sqrt() * ei / ep * cos_phi * sin_a
        } else {
            length
        };
        let r21 = if cos_phi.abs() > 1e-12 {
            -ep / ef * (cos_phi / (2.0 * eta).sqrt() + (eta / 8.0).sqrt() / cos_phi) * sin_a
        } else {
            0.0
        };
        let r22 = ei / ef * (cos_a + (2.0 / eta).sqrt() * cos_phi * sin_a);
        (r11, r12, r21, r22)
    };

    let r56 = -length / (ef * ef * ei * beta1) * (ef + ei) / (beta1 + beta0);
    let k = 2.0 * PI * frequency / SPEED_OF_LIGHT;
    let g0 = ei;
    let g1 = ef;
    let r55_cor = if (g0 - g1).abs() > Float::EPSILON {
        k * length * beta0 * voltage / ELECTRON_MASS_EV
            * sin_phi
            * (g0 * g1 * (beta0 * beta1 - 1.0) + 1.0)
            / (beta1 * g1 * (g0 - g1).powi(2))
    } else {
        0.0
    };
    let r66 = ei / ef * beta0 / beta1;
    let r65 = k * sin_phi * voltage / (ef * beta1 * ELECTRON_MASS_EV);

    let mut tm = Matrix7::identity();
    tm[(0, 0)] = r11;
    tm[(0, 1)] = r12;
    tm[(1, 0)] = r21;
    tm[(1, 1)] = r22;
    tm[(2, 2)] = r11;
    tm[(2, 3)] = r12;
    tm[(3, 2)] = r21;
    tm[(3, 3)] = r22;
    tm[(4, 4)] = 1.0 + r55_cor;
    tm[(4, 5)] = r56;
    tm[(5, 4)] = r65;
    tm[(5, 5)] = r66;
    tm
}

//! Rotation and compatibility primitives for 4-RoSy fields.
//!
//! A cross (4-RoSy) direction at a vertex is stored as one representative
//! tangent vector; the other three members of the cross are obtained by
//! quarter-turn rotations about the vertex normal. The functions here pick,
//! for a pair of adjacent vertices, the representatives (and for position
//! fields, the lattice translations) that best agree across the edge.

use nalgebra::{Point3, Vector2, Vector3};

/// Rotate an integer 2-vector by `amount` quarter turns counter-clockwise.
#[inline]
pub fn rshift90(v: Vector2<i32>, amount: i32) -> Vector2<i32> {
    let mut v = v;
    if amount & 1 != 0 {
        v = Vector2::new(-v.y, v.x);
    }
    if amount % 4 >= 2 {
        v = -v;
    }
    v
}

/// Rotate a tangent vector by `amount` quarter turns about the normal `n`.
#[inline]
pub fn rotate90_by(q: &Vector3<f64>, n: &Vector3<f64>, amount: i32) -> Vector3<f64> {
    let r = if amount & 1 != 0 { n.cross(q) } else { *q };
    if amount % 4 >= 2 {
        -r
    } else {
        r
    }
}

/// Positive modulo.
#[inline]
pub fn modulo(a: i32, b: i32) -> i32 {
    ((a % b) + b) % b
}

/// Polynomial approximation of `acos` with absolute error below 1e-3.
///
/// Only suitable where angles act as weights (smooth-normal accumulation);
/// the approximation is not monotone at the last ulp.
#[inline]
pub fn fast_acos(x: f64) -> f64 {
    let negate = if x < 0.0 { 1.0 } else { 0.0 };
    let x = x.abs();
    let mut ret = -0.018_729_3_f64;
    ret *= x;
    ret += 0.074_261_0;
    ret *= x;
    ret -= 0.212_114_4;
    ret *= x;
    ret += 1.570_728_8;
    ret *= (1.0 - x).max(0.0).sqrt();
    ret -= 2.0 * negate * ret;
    negate * std::f64::consts::PI + ret
}

/// Best-aligned cross representatives for two adjacent vertices.
///
/// Returns the member of `q0`'s cross and the member of `q1`'s cross with
/// the largest mutual dot product (sign-corrected so the pair points the
/// same way).
pub fn compat_orientation_extrinsic_4(
    q0: &Vector3<f64>,
    n0: &Vector3<f64>,
    q1: &Vector3<f64>,
    n1: &Vector3<f64>,
) -> (Vector3<f64>, Vector3<f64>) {
    let a = [*q0, n0.cross(q0)];
    let b = [*q1, n1.cross(q1)];
    let mut best_score = f64::NEG_INFINITY;
    let (mut best_a, mut best_b) = (0, 0);
    for (i, ai) in a.iter().enumerate() {
        for (j, bj) in b.iter().enumerate() {
            let score = ai.dot(bj).abs();
            if score > best_score {
                best_a = i;
                best_b = j;
                best_score = score;
            }
        }
    }
    let dp = a[best_a].dot(&b[best_b]);
    (a[best_a], b[best_b] * dp.signum())
}

/// Like [`compat_orientation_extrinsic_4`], but returns quarter-turn
/// indices instead of vectors: `q0` rotated by `.0` turns matches `q1`
/// rotated by `.1` turns.
pub fn compat_orientation_extrinsic_index_4(
    q0: &Vector3<f64>,
    n0: &Vector3<f64>,
    q1: &Vector3<f64>,
    n1: &Vector3<f64>,
) -> (i32, i32) {
    let a = [*q0, n0.cross(q0)];
    let b = [*q1, n1.cross(q1)];
    let mut best_score = f64::NEG_INFINITY;
    let (mut best_a, mut best_b) = (0i32, 0i32);
    for (i, ai) in a.iter().enumerate() {
        for (j, bj) in b.iter().enumerate() {
            let score = ai.dot(bj).abs();
            if score > best_score {
                best_a = i as i32;
                best_b = j as i32;
                best_score = score;
            }
        }
    }
    if a[best_a as usize].dot(&b[best_b as usize]) < 0.0 {
        best_b += 2;
    }
    (best_a, best_b)
}

/// Point equidistant from the tangent planes of two vertices.
///
/// Used as the shared origin when comparing lattice coordinates across an
/// edge, so that both endpoints round the same geometric location.
pub fn middle_point(
    p0: &Point3<f64>,
    n0: &Vector3<f64>,
    p1: &Point3<f64>,
    n1: &Vector3<f64>,
) -> Point3<f64> {
    let n0p0 = n0.dot(&p0.coords);
    let n0p1 = n0.dot(&p1.coords);
    let n1p0 = n1.dot(&p0.coords);
    let n1p1 = n1.dot(&p1.coords);
    let n0n1 = n0.dot(n1);
    let denom = 1.0 / (1.0 - n0n1 * n0n1 + 1e-4);
    let lambda_0 = 2.0 * (n0p1 - n0p0 - n0n1 * (n1p0 - n1p1)) * denom;
    let lambda_1 = 2.0 * (n1p0 - n1p1 - n0n1 * (n0p1 - n0p0)) * denom;
    Point3::from(0.5 * (p0.coords + p1.coords) - 0.25 * (n0 * lambda_0 + n1 * lambda_1))
}

/// Lattice point of `o`'s grid at or below `p`, in the frame `(q, t)`.
pub fn position_floor_4(
    o: &Point3<f64>,
    q: &Vector3<f64>,
    t: &Vector3<f64>,
    p: &Point3<f64>,
    scale_x: f64,
    scale_y: f64,
    inv_scale_x: f64,
    inv_scale_y: f64,
) -> Point3<f64> {
    let d = p - o;
    o + q * ((q.dot(&d) * inv_scale_x).floor() * scale_x)
        + t * ((t.dot(&d) * inv_scale_y).floor() * scale_y)
}

/// Lattice point of `o`'s grid nearest to `p`, in the frame `(q, t)`.
pub fn position_round_4(
    o: &Point3<f64>,
    q: &Vector3<f64>,
    t: &Vector3<f64>,
    p: &Point3<f64>,
    scale_x: f64,
    scale_y: f64,
    inv_scale_x: f64,
    inv_scale_y: f64,
) -> Point3<f64> {
    let d = p - o;
    o + q * ((q.dot(&d) * inv_scale_x).round() * scale_x)
        + t * ((t.dot(&d) * inv_scale_y).round() * scale_y)
}

/// Per-endpoint scale factors for position compatibility.
///
/// The unscaled pipeline passes the global grid length for all four
/// values; the adaptive-scale path stretches x/y independently.
#[derive(Debug, Clone, Copy)]
pub struct PosScale {
    /// Grid length along the cross representative.
    pub x: f64,
    /// Grid length along the rotated representative.
    pub y: f64,
}

impl PosScale {
    /// Uniform scale in both directions.
    #[inline]
    pub fn uniform(s: f64) -> Self {
        PosScale { x: s, y: s }
    }

    /// Swap the two directions (odd cross rotation).
    #[inline]
    pub fn swapped(self) -> Self {
        PosScale {
            x: self.y,
            y: self.x,
        }
    }
}

/// Best-matching lattice translations of two adjacent position samples.
///
/// Both samples are snapped to the lattice cell containing the edge's
/// [`middle_point`]; the 4x4 candidate corner pairs are scored by distance
/// and the winning pair returned as integer offsets of each sample's grid.
#[allow(clippy::too_many_arguments)]
pub fn compat_position_extrinsic_index_4(
    p0: &Point3<f64>,
    n0: &Vector3<f64>,
    q0: &Vector3<f64>,
    o0: &Point3<f64>,
    p1: &Point3<f64>,
    n1: &Vector3<f64>,
    q1: &Vector3<f64>,
    o1: &Point3<f64>,
    s0: PosScale,
    s1: PosScale,
) -> (Vector2<i32>, Vector2<i32>) {
    let t0 = n0.cross(q0);
    let t1 = n1.cross(q1);
    let middle = middle_point(p0, n0, p1, n1);
    let o0p = position_floor_4(o0, q0, &t0, &middle, s0.x, s0.y, 1.0 / s0.x, 1.0 / s0.y);
    let o1p = position_floor_4(o1, q1, &t1, &middle, s1.x, s1.y, 1.0 / s1.x, 1.0 / s1.y);
    let mut best_cost = f64::INFINITY;
    let (mut best_i, mut best_j) = (0i32, 0i32);
    for i in 0..4i32 {
        let o0t = o0p + q0 * ((i & 1) as f64 * s0.x) + t0 * (((i >> 1) & 1) as f64 * s0.y);
        for j in 0..4i32 {
            let o1t = o1p + q1 * ((j & 1) as f64 * s1.x) + t1 * (((j >> 1) & 1) as f64 * s1.y);
            let cost = (o0t - o1t).norm_squared();
            if cost < best_cost {
                best_i = i;
                best_j = j;
                best_cost = cost;
            }
        }
    }
    let d0 = middle - o0;
    let d1 = middle - o1;
    (
        Vector2::new(
            (q0.dot(&d0) / s0.x).floor() as i32 + (best_i & 1),
            (t0.dot(&d0) / s0.y).floor() as i32 + ((best_i >> 1) & 1),
        ),
        Vector2::new(
            (q1.dot(&d1) / s1.x).floor() as i32 + (best_j & 1),
            (t1.dot(&d1) / s1.y).floor() as i32 + ((best_j >> 1) & 1),
        ),
    )
}

/// Best-matching lattice-snapped positions of two adjacent samples.
///
/// The vector analogue of [`compat_position_extrinsic_index_4`]: returns
/// the translated sample positions instead of their integer offsets.
#[allow(clippy::too_many_arguments)]
pub fn compat_position_extrinsic_4(
    p0: &Point3<f64>,
    n0: &Vector3<f64>,
    q0: &Vector3<f64>,
    o0: &Point3<f64>,
    p1: &Point3<f64>,
    n1: &Vector3<f64>,
    q1: &Vector3<f64>,
    o1: &Point3<f64>,
    s0: PosScale,
    s1: PosScale,
) -> (Point3<f64>, Point3<f64>) {
    let t0 = n0.cross(q0);
    let t1 = n1.cross(q1);
    let middle = middle_point(p0, n0, p1, n1);
    let o0p = position_floor_4(o0, q0, &t0, &middle, s0.x, s0.y, 1.0 / s0.x, 1.0 / s0.y);
    let o1p = position_floor_4(o1, q1, &t1, &middle, s1.x, s1.y, 1.0 / s1.x, 1.0 / s1.y);
    let mut best = (o0p, o1p);
    let mut best_cost = f64::INFINITY;
    for i in 0..4i32 {
        let o0t = o0p + q0 * ((i & 1) as f64 * s0.x) + t0 * (((i >> 1) & 1) as f64 * s0.y);
        for j in 0..4i32 {
            let o1t = o1p + q1 * ((j & 1) as f64 * s1.x) + t1 * (((j >> 1) & 1) as f64 * s1.y);
            let cost = (o0t - o1t).norm_squared();
            if cost < best_cost {
                best = (o0t, o1t);
                best_cost = cost;
            }
        }
    }
    best
}

/// Project `v` into the tangent plane of `n` and normalize.
///
/// Falls back to an arbitrary tangent when the projection degenerates.
pub fn project_tangent(v: &Vector3<f64>, n: &Vector3<f64>) -> Vector3<f64> {
    let p = v - n * n.dot(v);
    let norm = p.norm();
    if norm > 1e-20 {
        p / norm
    } else {
        any_tangent(n)
    }
}

/// An arbitrary unit tangent orthogonal to `n`.
pub fn any_tangent(n: &Vector3<f64>) -> Vector3<f64> {
    let axis = if n.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    n.cross(&axis).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rshift90_cycle() {
        let v = Vector2::new(1, 2);
        assert_eq!(rshift90(v, 0), v);
        assert_eq!(rshift90(v, 1), Vector2::new(-2, 1));
        assert_eq!(rshift90(v, 2), Vector2::new(-1, -2));
        assert_eq!(rshift90(v, 3), Vector2::new(2, -1));
        // Four quarter turns compose to the identity.
        let mut w = v;
        for _ in 0..4 {
            w = rshift90(w, 1);
        }
        assert_eq!(w, v);
    }

    #[test]
    fn test_rshift90_composes() {
        let v = Vector2::new(3, -1);
        for a in 0..4 {
            for b in 0..4 {
                assert_eq!(rshift90(rshift90(v, a), b), rshift90(v, (a + b) % 4));
            }
        }
    }

    #[test]
    fn test_rotate90_matches_rshift() {
        // Rotating the tangent basis and rotating integer coordinates agree.
        let n = Vector3::z();
        let q = Vector3::x();
        for r in 0..4 {
            let rq = rotate90_by(&q, &n, r);
            let iv = rshift90(Vector2::new(1, 0), r);
            assert_relative_eq!(rq.x, iv.x as f64, epsilon = 1e-12);
            assert_relative_eq!(rq.y, iv.y as f64, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_fast_acos_error_bound() {
        let mut x = -1.0;
        while x <= 1.0 {
            assert!((fast_acos(x) - x.acos()).abs() < 1e-3, "x = {x}");
            x += 1e-3;
        }
    }

    #[test]
    fn test_compat_orientation_picks_aligned() {
        let n = Vector3::z();
        let q0 = Vector3::x();
        // 100 degrees away: the closest cross member is the +y axis.
        let q1 = Vector3::new((100f64).to_radians().cos(), (100f64).to_radians().sin(), 0.0);
        let (a, b) = compat_orientation_extrinsic_4(&q0, &n, &q1, &n);
        assert!(a.dot(&b) > 0.5);
        let (i, j) = compat_orientation_extrinsic_index_4(&q0, &n, &q1, &n);
        let ra = rotate90_by(&q0, &n, i);
        let rb = rotate90_by(&q1, &n, j);
        assert!(ra.dot(&rb) > 0.5);
    }

    #[test]
    fn test_compat_position_unit_grid() {
        // Two samples on the z=0 plane, one lattice step apart in x.
        let n = Vector3::z();
        let q = Vector3::x();
        let p0 = Point3::new(0.0, 0.0, 0.0);
        let p1 = Point3::new(1.0, 0.0, 0.0);
        let s = PosScale::uniform(1.0);
        let (d0, d1) = compat_position_extrinsic_index_4(&p0, &n, &q, &p0, &p1, &n, &q, &p1, s, s);
        // Both endpoints agree on the middle cell; the index difference is
        // the lattice translation across the edge.
        assert_eq!(d0 - d1, Vector2::new(1, 0));
    }

    #[test]
    fn test_middle_point_symmetric() {
        let p0 = Point3::new(0.0, 0.0, 0.0);
        let p1 = Point3::new(1.0, 0.0, 0.0);
        let n = Vector3::z();
        let m = middle_point(&p0, &n, &p1, &n);
        assert_relative_eq!(m.x, 0.5, epsilon = 1e-9);
        let m2 = middle_point(&p1, &n, &p0, &n);
        assert_relative_eq!((m - m2).norm(), 0.0, epsilon = 1e-9);
    }
}

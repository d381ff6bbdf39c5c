//! RNG helpers shared by the camera, the emitter grid, and the tracers.

use rand::RngCore;
use strata_math::DVec3;

/// Generate a random f64 in [0, 1) from an RngCore.
///
/// Mirrors rand's Standard distribution for f64; kept as a free function so
/// it works through `dyn RngCore`.
#[inline]
pub fn gen_f64(rng: &mut dyn RngCore) -> f64 {
    let bits = rng.next_u64();
    (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

/// Generate a random unit vector on the unit sphere (rejection sampling).
pub fn random_unit_vector(rng: &mut dyn RngCore) -> DVec3 {
    loop {
        let v = DVec3::new(
            gen_f64(rng) * 2.0 - 1.0,
            gen_f64(rng) * 2.0 - 1.0,
            gen_f64(rng) * 2.0 - 1.0,
        );
        let len_sq = v.length_squared();
        if len_sq > 1e-12 && len_sq <= 1.0 {
            return v / len_sq.sqrt();
        }
    }
}

/// Sample a random point in the unit disk (z = 0).
pub fn random_in_unit_disk(rng: &mut dyn RngCore) -> DVec3 {
    loop {
        let p = DVec3::new(gen_f64(rng) * 2.0 - 1.0, gen_f64(rng) * 2.0 - 1.0, 0.0);
        if p.length_squared() < 1.0 {
            return p;
        }
    }
}

/// Cosine-weighted random direction in the hemisphere around a normal.
///
/// Malley's method: sample the unit disk, project to the hemisphere.
/// PDF = cos(theta) / PI.
pub fn cosine_weighted_hemisphere(normal: DVec3, rng: &mut dyn RngCore) -> DVec3 {
    let r1 = gen_f64(rng);
    let r2 = gen_f64(rng);

    let sqrt_r1 = r1.sqrt();
    let theta = 2.0 * std::f64::consts::PI * r2;
    let x = sqrt_r1 * theta.cos();
    let y = sqrt_r1 * theta.sin();
    let z = (1.0 - r1).sqrt();

    let (tangent, bitangent) = build_tangent_basis(normal);
    x * tangent + y * bitangent + z * normal
}

/// Build an orthonormal tangent/bitangent from a normal.
pub fn build_tangent_basis(n: DVec3) -> (DVec3, DVec3) {
    let sign = if n.z >= 0.0 { 1.0 } else { -1.0 };
    let a = -1.0 / (sign + n.z);
    let b = n.x * n.y * a;

    let tangent = DVec3::new(1.0 + sign * n.x * n.x * a, sign * b, -sign * n.x);
    let bitangent = DVec3::new(b, sign + n.y * n.y * a, -n.y);

    (tangent, bitangent)
}

/// Reflect a vector about a normal.
#[inline]
pub fn reflect(v: DVec3, n: DVec3) -> DVec3 {
    v - 2.0 * v.dot(n) * n
}

/// Refract a vector through a surface; `None` on total internal reflection.
pub fn refract(uv: DVec3, n: DVec3, etai_over_etat: f64) -> Option<DVec3> {
    let cos_theta = (-uv).dot(n).min(1.0);
    let sin2 = (1.0 - cos_theta * cos_theta) * etai_over_etat * etai_over_etat;
    if sin2 > 1.0 {
        return None;
    }
    let r_out_perp = etai_over_etat * (uv + cos_theta * n);
    let r_out_parallel = -(1.0 - r_out_perp.length_squared()).abs().sqrt() * n;
    Some(r_out_perp + r_out_parallel)
}

/// Schlick's approximation for reflectance.
#[inline]
pub fn schlick_reflectance(cosine: f64, ior: f64) -> f64 {
    let r0 = ((1.0 - ior) / (1.0 + ior)).powi(2);
    r0 + (1.0 - r0) * (1.0 - cosine).powi(5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_gen_f64_in_range() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..1000 {
            let x = gen_f64(&mut rng);
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn test_unit_vector_is_unit() {
        let mut rng = StdRng::seed_from_u64(12);
        for _ in 0..100 {
            let v = random_unit_vector(&mut rng);
            assert!((v.length() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_cosine_hemisphere_above_surface() {
        let mut rng = StdRng::seed_from_u64(13);
        let n = DVec3::new(0.3, -0.8, 0.5).normalize();
        for _ in 0..200 {
            let d = cosine_weighted_hemisphere(n, &mut rng);
            assert!(d.dot(n) >= -1e-9);
            assert!((d.length() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_refract_total_internal_reflection() {
        // Shallow angle from dense to thin medium.
        let uv = DVec3::new(0.99, -0.14, 0.0).normalize();
        let n = DVec3::Y;
        assert!(refract(uv, n, 1.5).is_none());
        // Straight-on refraction always passes.
        assert!(refract(DVec3::NEG_Y, n, 1.5).is_some());
    }

    #[test]
    fn test_reflect() {
        let v = DVec3::new(1.0, -1.0, 0.0).normalize();
        let r = reflect(v, DVec3::Y);
        assert!((r - DVec3::new(1.0, 1.0, 0.0).normalize()).length() < 1e-9);
    }
}

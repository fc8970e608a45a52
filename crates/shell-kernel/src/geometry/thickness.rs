use super::vector::Vec3;

fn triangle_area(a: Vec3, b: Vec3, c: Vec3) -> f64 {
    (b - a).cross(&(c - a)).length() / 2.0
}

/// Signed volume contribution of one outward-facing triangle.
fn signed_volume(a: Vec3, b: Vec3, c: Vec3) -> f64 {
    let n = (b - a).cross(&(c - a));
    let Some(normal) = n.normalized() else {
        return 0.0;
    };
    let midpoint = (a + b + c) / 3.0;
    normal.dot(&midpoint) * (n.length() / 2.0) / 3.0
}

/// Average thickness of the prism between a top triangle and the matching
/// bottom triangle: its volume divided by the mean face area. Never negative.
pub fn prism_thickness(top: [Vec3; 3], bottom: [Vec3; 3]) -> f64 {
    let [ta, tb, tc] = top;
    let [ba, bb, bc] = bottom;
    let faces = [
        (ta, tb, tc),
        (bc, bb, ba),
        (ta, ba, bb),
        (ta, bb, tb),
        (tb, bb, bc),
        (tb, bc, tc),
        (tc, bc, ba),
        (tc, ba, ta),
    ];
    let volume: f64 = faces.iter().map(|&(a, b, c)| signed_volume(a, b, c)).sum();
    let avg_area = (triangle_area(ta, tb, tc) + triangle_area(ba, bb, bc)) / 2.0;
    if avg_area <= 0.0 {
        return 0.0;
    }
    (volume / avg_area).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri(z: f64) -> [Vec3; 3] {
        [
            Vec3::new(0.0, 0.0, z),
            Vec3::new(4.0, 0.0, z),
            Vec3::new(0.0, 4.0, z),
        ]
    }

    #[test]
    fn test_flat_prism_thickness() {
        let t = prism_thickness(tri(0.0), tri(-3.0));
        assert!((t - 3.0).abs() < 1e-9, "got {t}");
    }

    #[test]
    fn test_inverted_prism_is_zero() {
        let t = prism_thickness(tri(-3.0), tri(0.0));
        assert!(t.abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_prism_is_zero() {
        let line = [Vec3::ZERO, Vec3::X, Vec3::X * 2.0];
        assert_eq!(prism_thickness(line, line), 0.0);
    }
}

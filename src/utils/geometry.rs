// src/utils/geometry.rs

type Point3 = [f64; 3];

/// Calculates distance between two points (Angstroms)
pub fn calculate_distance(p1: Point3, p2: Point3) -> f64 {
    len(sub(p1, p2))
}

/// Calculates angle P1-P2-P3 in degrees
pub fn calculate_angle(p1: Point3, center: Point3, p3: Point3) -> f64 {
    let v1 = sub(p1, center);
    let v2 = sub(p3, center);
    let n = len(v1) * len(v2);
    if n == 0.0 {
        return 0.0;
    }
    (dot(v1, v2) / n).clamp(-1.0, 1.0).acos().to_degrees()
}

fn sub(a: Point3, b: Point3) -> Point3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: Point3, b: Point3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn len(a: Point3) -> f64 {
    dot(a, a).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_and_angle() {
        assert!((calculate_distance([0.0; 3], [3.0, 4.0, 0.0]) - 5.0).abs() < 1e-12);
        let a = calculate_angle([1.0, 0.0, 0.0], [0.0; 3], [0.0, 2.0, 0.0]);
        assert!((a - 90.0).abs() < 1e-9);
        assert_eq!(calculate_angle([0.0; 3], [0.0; 3], [1.0, 0.0, 0.0]), 0.0);
    }
}

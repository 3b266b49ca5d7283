// src/model/unit_cell.rs

use super::structure::AdpKind;
use crate::utils::linalg::{
    frac_to_cart, lattice_from_parameters, lattice_matrix, matrix_rows, reciprocal_vectors,
};
use nalgebra::{Matrix3, Vector3};
use serde::Serialize;
use std::f64::consts::PI;

/// A periodic frame: lattice vectors plus an optional fractional origin
/// shift (only set by `_atom_sites_fract_tran_vector_*`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitCell {
    /// a, b, c in Å; alpha, beta, gamma in degrees.
    pub parameters: [f64; 6],
    /// Lattice vectors as rows.
    pub vectors: [[f64; 3]; 3],
    pub offset: [f64; 3],
    #[serde(skip)]
    to_fractional: Matrix3<f64>,
}

impl UnitCell {
    pub fn from_parameters(parameters: [f64; 6]) -> Option<Self> {
        let vectors = lattice_from_parameters(parameters)?;
        Self::build(parameters, vectors, [0.0; 3])
    }

    pub fn from_vectors(vectors: [[f64; 3]; 3]) -> Option<Self> {
        let v: Vec<Vector3<f64>> = vectors.iter().map(|r| Vector3::from(*r)).collect();
        let angle = |p: &Vector3<f64>, q: &Vector3<f64>| {
            (p.dot(q) / (p.norm() * q.norm())).clamp(-1.0, 1.0).acos().to_degrees()
        };
        let parameters = [
            v[0].norm(),
            v[1].norm(),
            v[2].norm(),
            angle(&v[1], &v[2]),
            angle(&v[0], &v[2]),
            angle(&v[0], &v[1]),
        ];
        Self::build(parameters, vectors, [0.0; 3])
    }

    /// From a Cartesian-to-fractional matrix given row-major with the
    /// translation as the fourth column: `frac = M·cart + t`.
    pub fn from_fract_matrix(m: [f64; 12]) -> Option<Self> {
        let fract = Matrix3::new(m[0], m[1], m[2], m[4], m[5], m[6], m[8], m[9], m[10]);
        // columns of M⁻¹ are the lattice vectors
        let inv = fract.try_inverse()?;
        let mut cell = Self::from_vectors(matrix_rows(&inv.transpose()))?;
        cell.offset = [m[3], m[7], m[11]];
        Some(cell)
    }

    fn build(parameters: [f64; 6], vectors: [[f64; 3]; 3], offset: [f64; 3]) -> Option<Self> {
        let to_fractional = lattice_matrix(vectors).transpose().try_inverse()?;
        Some(Self {
            parameters,
            vectors,
            offset,
            to_fractional,
        })
    }

    pub fn volume(&self) -> f64 {
        lattice_matrix(self.vectors).determinant().abs()
    }

    pub fn to_cartesian(&self, frac: &Vector3<f64>) -> Vector3<f64> {
        let shifted = frac - Vector3::from(self.offset);
        Vector3::from(frac_to_cart([shifted.x, shifted.y, shifted.z], self.vectors))
    }

    pub fn to_fractional(&self, cart: &Vector3<f64>) -> Vector3<f64> {
        self.to_fractional * cart + Vector3::from(self.offset)
    }

    /// Reciprocal vectors (rows), no 2π.
    pub fn reciprocal_vectors(&self) -> [[f64; 3]; 3] {
        // the inverse already exists, so the cell cannot be singular
        reciprocal_vectors(self.vectors).unwrap_or([[0.0; 3]; 3])
    }

    /// Cartesian form of a fractional rotation: `A·R·A⁻¹`, `A` holding the
    /// lattice vectors as columns.
    pub fn cartesian_rotation(&self, rot: &Matrix3<f64>) -> Matrix3<f64> {
        lattice_matrix(self.vectors).transpose() * rot * self.to_fractional
    }

    /// Searches lattice translations of `f2` for a Cartesian distance from
    /// `f1` that matches `distance`. Offsets are tried 0, +1, -1, +2, -2...
    /// per axis out to `range`.
    ///
    /// With `dx > 0` the test is `|d - distance| <= dx`; otherwise it is
    /// `0.1 < d <= distance`. Returns the accepted offset.
    pub fn check_distance(
        &self,
        f1: &Vector3<f64>,
        f2: &Vector3<f64>,
        distance: f64,
        dx: f64,
        range: i32,
    ) -> Option<Vector3<f64>> {
        let p1 = self.to_cartesian(f1);
        let steps = search_order(range);
        for &i in &steps {
            for &j in &steps {
                for &k in &steps {
                    let offset = Vector3::new(i as f64, j as f64, k as f64);
                    let d = (self.to_cartesian(&(f2 + offset)) - p1).norm();
                    let hit = if dx > 0.0 {
                        (d - distance).abs() <= dx
                    } else {
                        d <= distance && d > 0.1
                    };
                    if hit {
                        return Some(offset);
                    }
                }
            }
        }
        None
    }

    /// Cartesian U tensor from CIF displacement parameters
    /// `[11, 22, 33, 12, 13, 23]`, optionally carried through a fractional
    /// rotation first.
    ///
    /// ```text
    /// U   : U_cart = A·N·U·N·Aᵀ      N = diag(|a*|, |b*|, |c*|)
    /// B   : U = B / 8π²
    /// beta: U_cart = A·(β / 2π²)·Aᵀ
    /// ```
    pub fn cartesian_adp(
        &self,
        kind: AdpKind,
        values: &[f64; 6],
        rotation: Option<&Matrix3<f64>>,
    ) -> [[f64; 3]; 3] {
        let [u11, u22, u33, u12, u13, u23] = *values;
        let sym = Matrix3::new(u11, u12, u13, u12, u22, u23, u13, u23, u33);
        let a = lattice_matrix(self.vectors).transpose();
        let rec = self.reciprocal_vectors();
        let n = Matrix3::from_diagonal(&Vector3::new(
            Vector3::from(rec[0]).norm(),
            Vector3::from(rec[1]).norm(),
            Vector3::from(rec[2]).norm(),
        ));
        let inner = match kind {
            AdpKind::U => n * sym * n,
            AdpKind::B => n * (sym / (8.0 * PI * PI)) * n,
            AdpKind::Beta => sym / (2.0 * PI * PI),
        };
        let mut u = a * inner * a.transpose();
        if let Some(r) = rotation {
            let rc = self.cartesian_rotation(r);
            u = rc * u * rc.transpose();
        }
        matrix_rows(&u)
    }
}

fn search_order(range: i32) -> Vec<i32> {
    let mut steps = vec![0];
    for r in 1..=range.max(0) {
        steps.push(r);
        steps.push(-r);
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cubic(a: f64) -> UnitCell {
        UnitCell::from_parameters([a, a, a, 90.0, 90.0, 90.0]).unwrap()
    }

    #[test]
    fn test_round_trip_triclinic() {
        let cell = UnitCell::from_parameters([4.1, 5.2, 6.3, 81.0, 97.0, 112.0]).unwrap();
        let f = Vector3::new(0.12, 0.7, 0.33);
        let back = cell.to_fractional(&cell.to_cartesian(&f));
        assert!((back - f).norm() < 1e-10);
        let p = UnitCell::from_vectors(cell.vectors).unwrap().parameters;
        for i in 0..6 {
            assert!((p[i] - cell.parameters[i]).abs() < 1e-8);
        }
    }

    #[test]
    fn test_fract_matrix_cell() {
        let m = [0.25, 0.0, 0.0, 0.5, 0.0, 0.2, 0.0, 0.0, 0.0, 0.0, 0.1, 0.0];
        let cell = UnitCell::from_fract_matrix(m).unwrap();
        assert!((cell.parameters[0] - 4.0).abs() < 1e-10);
        assert!((cell.parameters[2] - 10.0).abs() < 1e-10);
        let f = cell.to_fractional(&Vector3::new(2.0, 0.0, 0.0));
        assert!((f.x - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_check_distance_finds_image() {
        let cell = cubic(2.0);
        let origin = Vector3::zeros();
        let off = cell.check_distance(&origin, &origin, 2.0, 0.1, 1).unwrap();
        assert_eq!(off, Vector3::new(0.0, 0.0, 1.0));
        // same point, no translation allowed: only d = 0, which never bonds
        assert!(cell.check_distance(&origin, &origin, 2.0, 0.1, 0).is_none());
    }

    #[test]
    fn test_check_distance_without_tolerance() {
        let cell = cubic(5.0);
        let a = Vector3::new(0.05, 0.0, 0.0);
        let b = Vector3::new(0.95, 0.0, 0.0);
        let off = cell.check_distance(&a, &b, 1.0, 0.0, 1).unwrap();
        assert_eq!(off, Vector3::new(-1.0, 0.0, 0.0));
        assert!(cell.check_distance(&a, &b, 0.4, 0.0, 1).is_none());
    }

    #[test]
    fn test_isotropic_u_is_diagonal() {
        let cell = UnitCell::from_parameters([4.0, 5.0, 6.0, 90.0, 90.0, 90.0]).unwrap();
        let u = cell.cartesian_adp(AdpKind::U, &[0.01, 0.01, 0.01, 0.0, 0.0, 0.0], None);
        assert!((u[0][0] - 0.01).abs() < 1e-12);
        assert!((u[1][1] - 0.01).abs() < 1e-12);
        assert!(u[0][1].abs() < 1e-12);
        let b = cell.cartesian_adp(AdpKind::B, &[1.0, 1.0, 1.0, 0.0, 0.0, 0.0], None);
        assert!((b[2][2] - 1.0 / (8.0 * PI * PI)).abs() < 1e-12);
    }

    #[test]
    fn test_adp_rotation_swaps_axes() {
        let cell = cubic(5.0);
        let r = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        let u = cell.cartesian_adp(AdpKind::U, &[0.02, 0.01, 0.03, 0.0, 0.0, 0.0], Some(&r));
        assert!((u[0][0] - 0.01).abs() < 1e-12);
        assert!((u[1][1] - 0.02).abs() < 1e-12);
    }
}

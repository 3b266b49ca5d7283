// src/utils/linalg.rs

use nalgebra::{DMatrix, Matrix3, Vector3};

/// Convert fractional coordinates to Cartesian using lattice matrix
///
/// # Arguments
/// * `frac` - Fractional coordinates [x, y, z]
/// * `lattice` - Lattice vectors as row matrix [[ax, ay, az], [bx, by, bz], [cx, cy, cz]]
///
/// # Formula
/// ```text
/// Cartesian = Lattice^T × Fractional
/// ```
pub fn frac_to_cart(frac: [f64; 3], lattice: [[f64; 3]; 3]) -> [f64; 3] {
  let cart_vec = lattice_matrix(lattice).transpose() * Vector3::from(frac);
  [cart_vec.x, cart_vec.y, cart_vec.z]
}

/// Lattice vectors (rows) from the six cell parameters, `a` along x and
/// `b` in the xy plane.
///
/// # Returns
/// None for non-positive lengths or angles that cannot close a cell
///
/// # Formula
/// ```text
/// a = [a, 0, 0]
/// b = [b cos(gamma), b sin(gamma), 0]
/// c = [c cos(beta), c (cos(alpha) - cos(beta) cos(gamma)) / sin(gamma), c v / sin(gamma)]
/// v = sqrt(1 - cos²(alpha) - cos²(beta) - cos²(gamma) + 2 cos(alpha) cos(beta) cos(gamma))
/// ```
pub fn lattice_from_parameters(params: [f64; 6]) -> Option<[[f64; 3]; 3]> {
  let [a, b, c, alpha, beta, gamma] = params;
  if !(a > 0.0 && b > 0.0 && c > 0.0) {
    return None;
  }
  let (ca, cb, cg) = (
    alpha.to_radians().cos(),
    beta.to_radians().cos(),
    gamma.to_radians().cos(),
  );
  let sg = gamma.to_radians().sin();
  let v2 = 1.0 - ca * ca - cb * cb - cg * cg + 2.0 * ca * cb * cg;
  if v2 <= 0.0 || sg.abs() < 1e-12 {
    return None;
  }
  Some([
    [a, 0.0, 0.0],
    [b * cg, b * sg, 0.0],
    [c * cb, c * (ca - cb * cg) / sg, c * v2.sqrt() / sg],
  ])
}

/// Reciprocal lattice vectors without the 2π factor
///
/// # Formula
/// ```text
/// a*_i = (a_j × a_k) / (a_i · (a_j × a_k))
/// ```
pub fn reciprocal_vectors(lattice: [[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
  let v: Vec<Vector3<f64>> = lattice.iter().map(|r| Vector3::from(*r)).collect();
  let volume = v[0].dot(&v[1].cross(&v[2]));
  if volume.abs() < 1e-12 {
    return None;
  }
  let mut out = [[0.0; 3]; 3];
  for i in 0..3 {
    let r = v[(i + 1) % 3].cross(&v[(i + 2) % 3]) / volume;
    out[i] = [r.x, r.y, r.z];
  }
  Some(out)
}

/// Row-major 3×3 matrix from an array of rows.
pub fn lattice_matrix(rows: [[f64; 3]; 3]) -> Matrix3<f64> {
  Matrix3::from_fn(|i, j| rows[i][j])
}

pub fn matrix_rows(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
  let mut rows = [[0.0; 3]; 3];
  for (i, row) in rows.iter_mut().enumerate() {
    for (j, v) in row.iter_mut().enumerate() {
      *v = m[(i, j)];
    }
  }
  rows
}

/// Copy of the `nr × nc` block of `m` starting at `(r0, c0)`.
pub fn block(m: &DMatrix<f64>, r0: usize, c0: usize, nr: usize, nc: usize) -> DMatrix<f64> {
  DMatrix::from_fn(nr, nc, |i, j| m[(r0 + i, c0 + j)])
}

/// Snaps a fractional translation to the nearest twelfth when it is
/// within rounding noise of one.
pub fn round_to_twelfths(v: f64) -> f64 {
  let n = (v * 12.0).round();
  if (v * 12.0 - n).abs() < 1e-3 {
    n / 12.0
  } else {
    v
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cubic_lattice() {
    let lattice = [[5.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 5.0]];
    let cart = frac_to_cart([0.5, 0.5, 0.5], lattice);

    assert!((cart[0] - 2.5).abs() < 1e-10);
    assert!((cart[1] - 2.5).abs() < 1e-10);
    assert!((cart[2] - 2.5).abs() < 1e-10);
  }

  #[test]
  fn test_oblique_lattice() {
    let lattice = [[4.0, 0.0, 0.0], [2.0, 3.46, 0.0], [0.0, 0.0, 5.0]];
    let cart = frac_to_cart([0.5, 0.5, 0.2], lattice);

    assert!((cart[0] - 3.0).abs() < 1e-10);
    assert!((cart[1] - 1.73).abs() < 1e-10);
    assert!((cart[2] - 1.0).abs() < 1e-10);
  }

  #[test]
  fn test_hexagonal_parameters() {
    let lat = lattice_from_parameters([3.0, 3.0, 5.0, 90.0, 90.0, 120.0]).unwrap();
    assert!((lat[1][0] + 1.5).abs() < 1e-10);
    assert!((lat[1][1] - 3.0 * 3f64.sqrt() / 2.0).abs() < 1e-10);
    assert!((lat[2][2] - 5.0).abs() < 1e-10);
    assert!(lattice_from_parameters([0.0, 1.0, 1.0, 90.0, 90.0, 90.0]).is_none());
    assert!(lattice_from_parameters([1.0, 1.0, 1.0, 0.0, 0.0, 0.0]).is_none());
  }

  #[test]
  fn test_reciprocal_orthogonality() {
    let lat = lattice_from_parameters([4.0, 5.0, 6.0, 80.0, 95.0, 110.0]).unwrap();
    let rec = reciprocal_vectors(lat).unwrap();
    for i in 0..3 {
      for j in 0..3 {
        let d: f64 = (0..3).map(|k| lat[i][k] * rec[j][k]).sum();
        let expect = if i == j { 1.0 } else { 0.0 };
        assert!((d - expect).abs() < 1e-10);
      }
    }
  }

  #[test]
  fn test_block_copy() {
    let m = DMatrix::from_fn(4, 4, |i, j| (i * 4 + j) as f64);
    let b = block(&m, 3, 0, 1, 3);
    assert_eq!(b.nrows(), 1);
    assert_eq!(b[(0, 2)], 14.0);
  }

  #[test]
  fn test_twelfths() {
    assert!((round_to_twelfths(0.33333) - 1.0 / 3.0).abs() < 1e-12);
    assert!((round_to_twelfths(0.1) - 0.1).abs() < 1e-12);
  }
}

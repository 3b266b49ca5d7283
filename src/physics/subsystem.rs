// src/physics/subsystem.rs
//
// Composite crystals: each subsystem sees the host superspace group
// through its own (3+d)×(3+d) matrix W.

use crate::model::symmetry::SymmetryOperator;
use crate::model::unit_cell::UnitCell;
use crate::utils::linalg::{block, reciprocal_vectors};
use nalgebra::DMatrix;
use std::cell::OnceCell;

/// Everything derived from W, computed once.
#[derive(Debug, Clone)]
pub struct SubsystemFrame {
    /// d×3 wave-vector matrix in the subsystem basis.
    pub sigma_nu: DMatrix<f64>,
    /// d×d translation factor.
    pub t_factor: DMatrix<f64>,
    pub cell: UnitCell,
    pub operators: Vec<SymmetryOperator>,
}

#[derive(Debug)]
pub struct Subsystem {
    pub code: String,
    pub w: DMatrix<f64>,
    derived: OnceCell<Option<SubsystemFrame>>,
}

impl Subsystem {
    pub fn new(code: &str, w: DMatrix<f64>) -> Self {
        Self {
            code: code.to_string(),
            w,
            derived: OnceCell::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.w.nrows().saturating_sub(3)
    }

    /// Derives (on first call) and returns the subsystem frame. Later calls
    /// return the cached result whatever arguments they pass. `None` means W
    /// or one of its blocks was singular.
    pub fn frame(
        &self,
        sigma: &DMatrix<f64>,
        host_cell: &UnitCell,
        host_ops: &[SymmetryOperator],
    ) -> Option<&SubsystemFrame> {
        self.derived
            .get_or_init(|| {
                let frame = derive(&self.w, sigma, host_cell, host_ops);
                match &frame {
                    Some(f) => log::debug!(
                        "subsystem {}: cell {:?}, {} operators",
                        self.code,
                        f.cell.parameters,
                        f.operators.len()
                    ),
                    None => log::warn!("subsystem {}: matrix W is singular", self.code),
                }
                frame
            })
            .as_ref()
    }
}

/// ```text
/// σ_ν     = (Wdd·σ + Wd3)·(W3d·σ + W33)⁻¹
/// tFactor = Wdd − σ_ν·W3d
/// R'      = W·R·W⁻¹,  v' = W·v
/// ```
/// The cell comes from the top three rows of `W·[a*; b*; c*; σ·[a*; b*; c*]]`
/// taken back to direct space.
fn derive(
    w: &DMatrix<f64>,
    sigma: &DMatrix<f64>,
    host_cell: &UnitCell,
    host_ops: &[SymmetryOperator],
) -> Option<SubsystemFrame> {
    let n = w.nrows();
    if n <= 3 || w.ncols() != n {
        return None;
    }
    let d = n - 3;
    if sigma.nrows() != d || sigma.ncols() != 3 {
        return None;
    }
    let w_inv = w.clone().try_inverse()?;
    let w33 = block(w, 0, 0, 3, 3);
    let wd3 = block(w, 3, 0, d, 3);
    let w3d = block(w, 0, 3, 3, d);
    let wdd = block(w, 3, 3, d, d);

    let sigma_nu = (&wdd * sigma + &wd3) * (&w3d * sigma + &w33).try_inverse()?;
    let t_factor = &wdd - &sigma_nu * &w3d;

    let rec = host_cell.reciprocal_vectors();
    let mar3 = DMatrix::from_fn(3, 3, |i, j| rec[i][j]);
    let sigma_rec = sigma * &mar3;
    let mard3 = DMatrix::from_fn(n, 3, |i, j| {
        if i < 3 {
            mar3[(i, j)]
        } else {
            sigma_rec[(i - 3, j)]
        }
    });
    let sub_rec = w * mard3;
    let mut rows = [[0.0; 3]; 3];
    for (i, row) in rows.iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = sub_rec[(i, j)];
        }
    }
    let cell = UnitCell::from_vectors(reciprocal_vectors(rows)?)?;

    let operators = host_ops
        .iter()
        .filter(|op| op.rank() == n)
        .map(|op| {
            let r = w * op.rotation_block() * &w_inv;
            let v = w * op.translation_block();
            SymmetryOperator::from_parts(&r, &v, d)
        })
        .collect();

    Some(SubsystemFrame {
        sigma_nu,
        t_factor,
        cell,
        operators,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> (UnitCell, Vec<SymmetryOperator>) {
        let cell = UnitCell::from_parameters([5.0, 6.0, 7.0, 90.0, 90.0, 90.0]).unwrap();
        let ops = vec![
            SymmetryOperator::identity(1),
            SymmetryOperator::parse("-x1,x2,-x3,-x4+1/2", 1).unwrap(),
        ];
        (cell, ops)
    }

    #[test]
    fn test_identity_w_reproduces_host() {
        let (cell, ops) = host();
        let sigma = DMatrix::from_row_slice(1, 3, &[0.3, 0.0, 0.0]);
        let sub = Subsystem::new("1", DMatrix::identity(4, 4));
        let f = sub.frame(&sigma, &cell, &ops).unwrap();
        assert!((&f.sigma_nu - &sigma).norm() < 1e-12);
        assert!((&f.t_factor - DMatrix::identity(1, 1)).norm() < 1e-12);
        for i in 0..6 {
            assert!((f.cell.parameters[i] - cell.parameters[i]).abs() < 1e-9);
        }
        assert_eq!(f.operators[1].rsvs(), ops[1].rsvs());
    }

    #[test]
    fn test_swapped_axis_doubles_cell() {
        let (cell, ops) = host();
        let sigma = DMatrix::from_row_slice(1, 3, &[0.5, 0.0, 0.0]);
        let w = DMatrix::from_row_slice(
            4,
            4,
            &[
                0.0, 0.0, 0.0, 1.0, //
                0.0, 1.0, 0.0, 0.0, //
                0.0, 0.0, 1.0, 0.0, //
                1.0, 0.0, 0.0, 0.0,
            ],
        );
        let sub = Subsystem::new("2", w);
        let f = sub.frame(&sigma, &cell, &ops).unwrap();
        assert!((f.cell.parameters[0] - 10.0).abs() < 1e-9);
        assert!((f.cell.parameters[1] - 6.0).abs() < 1e-9);
        assert!((f.sigma_nu[(0, 0)] - 2.0).abs() < 1e-12);
        assert!((f.t_factor[(0, 0)] + 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_derivation_is_cached() {
        let (cell, ops) = host();
        let sigma = DMatrix::from_row_slice(1, 3, &[0.3, 0.1, 0.0]);
        let w = DMatrix::from_row_slice(
            4,
            4,
            &[
                1.0, 0.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, 0.0, //
                0.0, 0.0, 1.0, 1.0, //
                0.0, 0.0, 0.0, 1.0,
            ],
        );
        let sub = Subsystem::new("1", w);
        let first = sub.frame(&sigma, &cell, &ops).unwrap().clone();
        let other_sigma = DMatrix::from_row_slice(1, 3, &[0.9, 0.9, 0.9]);
        let second = sub.frame(&other_sigma, &cell, &ops).unwrap();
        assert_eq!(first.sigma_nu, second.sigma_nu);
        assert_eq!(first.t_factor, second.t_factor);
        for (a, b) in first.operators.iter().zip(&second.operators) {
            assert_eq!(a.rsvs(), b.rsvs());
        }
        assert!(std::ptr::eq(
            sub.frame(&sigma, &cell, &ops).unwrap(),
            sub.frame(&sigma, &cell, &ops).unwrap()
        ));
    }

    #[test]
    fn test_singular_w() {
        let (cell, ops) = host();
        let sigma = DMatrix::from_row_slice(1, 3, &[0.3, 0.0, 0.0]);
        let sub = Subsystem::new("x", DMatrix::zeros(4, 4));
        assert!(sub.frame(&sigma, &cell, &ops).is_none());
        assert_eq!(sub.dimension(), 1);
    }
}

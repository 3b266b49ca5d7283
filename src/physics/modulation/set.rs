// src/physics/modulation/set.rs

use super::wave::Modulation;
use crate::utils::linalg::block;
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use std::collections::BTreeMap;

/// The summed effect of an atom's waves at one point of internal space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModulationSet {
    /// Fractional displacement after rotation into the atom's frame.
    pub displacement: Vector3<f64>,
    /// Occupancy change, `None` when no occupancy wave contributed.
    pub occupancy: Option<f64>,
    /// Set by a crenel: `occupancy` is the occupancy itself, not a delta.
    pub occupancy_absolute: bool,
    /// ADP changes keyed by `U11`..`U23` / `UISO`.
    pub uij: BTreeMap<String, f64>,
}

/// The superspace setting an atom is evaluated in.
pub struct SuperspaceFrame<'a> {
    /// d×3 wave-vector matrix (σ, or σ_ν for a subsystem).
    pub sigma: &'a DMatrix<f64>,
    /// Subsystem translation factor; `None` for the host.
    pub t_factor: Option<&'a DMatrix<f64>>,
    /// Augmented matrix of the atom's governing operator.
    pub rsvs: &'a DMatrix<f64>,
    /// 3×3 rotation applied to the displacement.
    pub gamma_e: Matrix3<f64>,
}

impl ModulationSet {
    /// Evaluates `mods` for an atom at fractional `r`:
    ///
    /// ```text
    /// tau = ΓI⁻¹·(σ·r − sI)
    /// x   = ΓI⁻¹·t + tau
    /// ```
    /// with `ΓI`/`sI` the internal blocks of the operator and `t` the time
    /// offset (scaled by tFactor⁻¹ for a subsystem). Waves are applied last
    /// to first. Returns `None` if `ΓI` or tFactor is singular.
    pub fn calculate(
        mods: &[Modulation],
        r: &Vector3<f64>,
        frame: &SuperspaceFrame,
        t_offset: Option<f64>,
    ) -> Option<Self> {
        let d = frame.sigma.nrows();
        let gamma_i_inv = block(frame.rsvs, 3, 3, d, d).try_inverse()?;
        let s_i = DVector::from_fn(d, |i, _| frame.rsvs[(3 + i, 3 + d)]);
        let r = DVector::from_column_slice(r.as_slice());
        let tau = &gamma_i_inv * (frame.sigma * r - s_i);

        let mut t = DVector::from_element(d, t_offset.unwrap_or(0.0));
        if let (Some(tf), Some(_)) = (frame.t_factor, t_offset) {
            t = tf.clone().try_inverse()? * t;
        }
        let x = &gamma_i_inv * t + tau;

        let mut set = ModulationSet::default();
        for m in mods.iter().rev() {
            m.apply(&mut set, &x);
        }
        set.displacement = frame.gamma_e * set.displacement;
        Some(set)
    }
}

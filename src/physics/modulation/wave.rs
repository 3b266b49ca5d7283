// src/physics/modulation/wave.rs

use super::set::ModulationSet;
use nalgebra::DVector;
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveKind {
    DisplacementFourier,
    Sawtooth,
    OccupancyFourier,
    Crenel,
    AdpFourier,
}

/// One wave term attached to an atom. `axis` is `x`/`y`/`z` for
/// displacement, `U` for an ADP component and anything else for occupancy.
#[derive(Debug, Clone, PartialEq)]
pub struct Modulation {
    pub axis: char,
    pub kind: WaveKind,
    /// Integer combination of the cell wave vectors this wave runs along.
    pub q_coefs: Vec<f64>,
    pub params: [f64; 3],
    /// `U11`..`U23` or `UISO` for ADP waves.
    pub utens: Option<String>,
    a1: f64,
    a2: f64,
    center: f64,
    left: f64,
    right: f64,
}

impl Modulation {
    pub fn new(
        axis: char,
        kind: WaveKind,
        params: [f64; 3],
        utens: Option<String>,
        q_coefs: Vec<f64>,
    ) -> Self {
        let mut m = Self {
            axis,
            kind,
            q_coefs,
            params,
            utens,
            a1: 0.0,
            a2: 0.0,
            center: 0.0,
            left: 0.0,
            right: 0.0,
        };
        match kind {
            WaveKind::Sawtooth | WaveKind::Crenel => {
                m.center = params[0];
                let width = params[1].min(1.0);
                m.left = m.center - width / 2.0;
                m.right = m.center + width / 2.0;
                if m.left < 0.0 {
                    m.left += 1.0;
                }
                if m.right > 1.0 {
                    m.right -= 1.0;
                }
                if m.left >= m.right && m.left - m.right < 0.01 {
                    m.left = m.right + 0.01;
                }
                m.a1 = if params[1] != 0.0 { 2.0 * params[2] / params[1] } else { 0.0 };
            }
            _ => {
                m.a1 = params[0];
                m.a2 = params[1];
            }
        }
        m
    }

    /// Window test on `[left, right]`, wrapping through 0 when `left > right`.
    fn in_range(&self, x: f64) -> bool {
        if self.left < self.right {
            self.left <= x && x <= self.right
        } else {
            self.left <= x || x <= self.right
        }
    }

    /// Evaluates the wave at internal coordinate `x` (one entry per
    /// modulation dimension) and accumulates into `set`.
    pub fn apply(&self, set: &mut ModulationSet, x: &DVector<f64>) {
        let mut nt: f64 = self
            .q_coefs
            .iter()
            .zip(x.iter())
            .map(|(q, xi)| q * xi)
            .sum();
        let v = match self.kind {
            WaveKind::Crenel => {
                nt -= nt.floor();
                set.occupancy = Some(if self.in_range(nt) { 1.0 } else { 0.0 });
                set.occupancy_absolute = true;
                return;
            }
            WaveKind::Sawtooth => {
                nt -= nt.floor();
                if !self.in_range(nt) {
                    return;
                }
                // bring nt onto the same side of the window as the center
                if self.left > self.right {
                    if nt < self.left && self.left < self.center {
                        nt += 1.0;
                    } else if nt > self.right && self.right > self.center {
                        nt -= 1.0;
                    }
                }
                self.a1 * (nt - self.center)
            }
            _ => {
                let theta = 2.0 * PI * nt;
                let mut v = 0.0;
                if self.a1 != 0.0 {
                    v += self.a1 * theta.cos();
                }
                if self.a2 != 0.0 {
                    v += self.a2 * theta.sin();
                }
                v
            }
        };
        match self.axis {
            'x' => set.displacement.x += v,
            'y' => set.displacement.y += v,
            'z' => set.displacement.z += v,
            'U' => {
                let key = self.utens.clone().unwrap_or_default();
                *set.uij.entry(key).or_insert(0.0) += v;
            }
            _ => *set.occupancy.get_or_insert(0.0) += v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f64) -> DVector<f64> {
        DVector::from_element(1, x)
    }

    #[test]
    fn test_fourier_cos_and_sin() {
        let m = Modulation::new('x', WaveKind::DisplacementFourier, [0.1, 0.2, 0.0], None, vec![1.0]);
        let mut s = ModulationSet::default();
        m.apply(&mut s, &at(0.25));
        assert!((s.displacement.x - 0.2).abs() < 1e-12);
        assert_eq!(s.occupancy, None);
    }

    #[test]
    fn test_occupancy_accumulates() {
        let m = Modulation::new('0', WaveKind::OccupancyFourier, [0.1, 0.0, 0.0], None, vec![1.0]);
        let mut s = ModulationSet::default();
        m.apply(&mut s, &at(0.0));
        m.apply(&mut s, &at(0.5));
        assert!(s.occupancy.unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_crenel_window_wraps() {
        // center 0.9, width 0.4: open on [0.7, 1) and [0, 0.1]
        let m = Modulation::new('0', WaveKind::Crenel, [0.9, 0.4, 0.0], None, vec![1.0]);
        for (x, expect) in [(0.95, 1.0), (1.05, 1.0), (0.5, 0.0), (0.2, 0.0)] {
            let mut s = ModulationSet::default();
            m.apply(&mut s, &at(x));
            assert_eq!(s.occupancy, Some(expect), "x = {}", x);
            assert!(s.occupancy_absolute);
        }
    }

    #[test]
    fn test_sawtooth_is_linear_in_window() {
        let m = Modulation::new('y', WaveKind::Sawtooth, [0.5, 0.5, 0.1], None, vec![1.0]);
        let mut s = ModulationSet::default();
        m.apply(&mut s, &at(0.75));
        // a1 = 2·0.1/0.5 = 0.4, offset 0.25 from the center
        assert!((s.displacement.y - 0.1).abs() < 1e-12);
        let mut outside = ModulationSet::default();
        m.apply(&mut outside, &at(0.1));
        assert_eq!(outside.displacement.y, 0.0);
    }

    #[test]
    fn test_adp_wave_keys_by_component() {
        let m = Modulation::new(
            'U',
            WaveKind::AdpFourier,
            [0.01, 0.0, 0.0],
            Some("U22".into()),
            vec![1.0],
        );
        let mut s = ModulationSet::default();
        m.apply(&mut s, &at(0.0));
        m.apply(&mut s, &at(0.0));
        assert!((s.uij["U22"] - 0.02).abs() < 1e-12);
    }
}

// src/physics/modulation/mod.rs
//
// Incommensurate modulation. Wave records are collected while the file is
// read, keyed `type_id#axis;atom@model`, then resolved in two passes once
// the average structure of a model is complete.

pub mod set;
pub mod wave;

use crate::io::error::{DiagnosticKind, Diagnostics};
use crate::model::structure::Model;
use crate::model::unit_cell::UnitCell;
use crate::model::symmetry::SymmetryOperator;
use crate::physics::expansion::{governing_operator, FrameSet};
use crate::physics::subsystem::{Subsystem, SubsystemFrame};
use nalgebra::{DMatrix, Vector3};
use std::collections::{BTreeMap, HashMap};
use std::f64::consts::PI;

pub use set::{ModulationSet, SuperspaceFrame};
pub use wave::{Modulation, WaveKind};

const U_LIST: &str = "U11U22U33U12U13U23UISO";

/// Filter switches the engine honors (`MOD*` filter keywords).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModulationOptions {
    /// Read only the average structure.
    pub average: bool,
    /// Displacement axes to keep, e.g. `"xz"`.
    pub axes: Option<String>,
    /// Wave types to keep among `O`, `D`, `U`.
    pub types: Option<String>,
    /// Subsystem whose cell is reported and used for trimming.
    pub cell: Option<String>,
    /// Keep only this harmonic (1-based); `None` or 0 keeps all.
    pub selected: Option<usize>,
    /// Evaluate with the last recorded operator instead of the first.
    pub last: bool,
    /// Suppress packing of composite structures.
    pub no_pack: bool,
    /// Fixed internal coordinate `t`.
    pub t: Option<f64>,
}

impl ModulationOptions {
    fn selected(&self) -> usize {
        self.selected.unwrap_or(0)
    }
}

#[derive(Debug, Default)]
pub struct ModulationEngine {
    options: ModulationOptions,
    dimension: usize,
    waves: BTreeMap<String, Vec<f64>>,
    subsystems: BTreeMap<String, Subsystem>,
    sigma: Option<DMatrix<f64>>,
    q1_norm: Vector3<f64>,
    atom_mods: HashMap<String, Vec<Modulation>>,
    have_atom_mods: bool,
    have_occupancy: bool,
    mod_count: usize,
}

impl ModulationEngine {
    pub fn new(options: ModulationOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    pub fn options(&self) -> &ModulationOptions {
        &self.options
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn is_active(&self) -> bool {
        self.dimension > 0
    }

    /// Accepts `_cell_modulation_dimension`. Returns the dimension actually
    /// used, 0 when only the average structure will be read.
    pub fn set_dimension(&mut self, d: usize, model: &mut Model) -> usize {
        if self.options.average {
            return 0;
        }
        if d > 3 {
            model.note(format!(
                "Too high modulation dimension ({}) -- reading average structure",
                d
            ));
            self.options.average = true;
            self.dimension = 0;
        } else {
            model.note(format!("Modulation dimension = {}", d));
            self.dimension = d;
        }
        self.dimension
    }

    fn key(id: &str, model: usize) -> String {
        format!("{}@{}", id, model)
    }

    fn get(&self, id: &str, model: usize) -> Option<&Vec<f64>> {
        self.waves.get(&Self::key(id, model))
    }

    /// Stores one wave record. Records filtered out by `MODTYPE=` or the
    /// harmonic selection, and all-zero records, are dropped.
    pub fn add(&mut self, id: &str, mut pt: Vec<f64>, model: usize) -> bool {
        let selected = self.options.selected();
        let kind = id.chars().next().unwrap_or(' ');
        if matches!(kind, 'O' | 'D' | 'U') {
            if let Some(types) = &self.options.types {
                if !types.contains(kind) {
                    return false;
                }
            }
            if selected > 0 && selected != 1 {
                return false;
            }
        }
        let is_coefs = id.contains("_coefs_");
        let mut nonzero = false;
        for i in (0..pt.len()).rev() {
            if selected > 0 && i + 1 != selected && is_coefs {
                pt[i] = 0.0;
            } else if pt[i] != 0.0 {
                nonzero = true;
                break;
            }
        }
        if !nonzero {
            return false;
        }
        log::debug!("modulation {} = {:?}", id, pt);
        self.waves.insert(Self::key(id, model), pt);
        true
    }

    pub fn add_subsystem(&mut self, code: &str, w: DMatrix<f64>, model: &mut Model) {
        model.note(format!("subsystem {}\n{}", code, w));
        self.subsystems
            .insert(code.to_string(), Subsystem::new(code, w));
    }

    pub fn has_subsystems(&self) -> bool {
        !self.subsystems.is_empty()
    }

    pub fn subsystem_codes(&self) -> impl Iterator<Item = &str> {
        self.subsystems.keys().map(String::as_str)
    }

    /// Cell wave-vector matrix of the last prepared model.
    pub fn sigma(&self) -> Option<&DMatrix<f64>> {
        self.sigma.as_ref()
    }

    pub fn subsystem_frame(
        &self,
        code: &str,
        host_cell: &UnitCell,
        host_ops: &[SymmetryOperator],
    ) -> Option<&SubsystemFrame> {
        let sigma = self.sigma.as_ref()?;
        self.subsystems.get(code)?.frame(sigma, host_cell, host_ops)
    }

    /// Wave records of one model with the `@model` suffix stripped.
    pub fn model_waves(&self, model: usize) -> Vec<(String, Vec<f64>)> {
        let suffix = format!("@{}", model);
        self.waves
            .iter()
            .filter_map(|(k, v)| k.strip_suffix(&suffix).map(|id| (id.to_string(), v.clone())))
            .filter(|(id, _)| !id.contains("*;*"))
            .collect()
    }

    /// First pass: builds σ, converts modulus/phase records, resolves atom
    /// wave vectors into cell wave-vector coefficients, and groups the
    /// waves by atom label.
    pub fn prepare(&mut self, model_index: usize, model: &mut Model, diagnostics: &mut Diagnostics) {
        let d = self.dimension;
        if d == 0 {
            return;
        }
        self.atom_mods.clear();
        self.mod_count = 0;
        self.have_atom_mods = false;
        let mut sigma = DMatrix::zeros(d, 3);
        for i in 0..d {
            let id = format!("W_{}", i + 1);
            let Some(w) = self.get(&id, model_index).cloned() else {
                log::info!("Not enough cell wave vectors for d={}", d);
                self.sigma = None;
                return;
            };
            model.note(format!("{} = {:?}", id, w));
            for j in 0..3 {
                sigma[(i, j)] = w.get(j).copied().unwrap_or(0.0);
            }
        }
        let q1 = Vector3::new(sigma[(0, 0)], sigma[(0, 1)], sigma[(0, 2)]);
        self.q1_norm = q1.map(|v| if v == 0.0 { 0.0 } else { 1.0 });
        self.sigma = Some(sigma);

        let mut added: Vec<(String, Vec<f64>)> = Vec::new();
        for (id, pt) in self.model_waves(model_index) {
            let kind = id.chars().next().unwrap_or(' ');
            match kind {
                'O' | 'U' | 'D' => {
                    if kind == 'O' {
                        self.have_occupancy = true;
                    }
                    let is_polar = pt.get(2) == Some(&1.0) && id.chars().nth(2) != Some('S');
                    if !is_polar {
                        continue;
                    }
                    if let Some(q) = id.find('?') {
                        let lookup = format!("{}{}#*;*", &id[..2.min(q)], &id[q + 1..]);
                        if let Some(p) = self.get(&lookup, model_index) {
                            let p = if p.get(2) == Some(&1.0) {
                                polar_to_cartesian(p)
                            } else {
                                p.clone()
                            };
                            added.push((id[..q].to_string(), p));
                        }
                    } else {
                        let p = polar_to_cartesian(&pt);
                        self.waves.insert(Self::key(&id, model_index), p);
                    }
                }
                'W' | 'F' => {
                    if kind == 'W' && d > 1 {
                        continue;
                    }
                    if id.contains("_coefs_") {
                        model.note(format!("Wave vector {} = {:?}", id, pt));
                        continue;
                    }
                    match self.q_coefs(&pt) {
                        None => {
                            let msg = format!("Cannot match atom wave vector {} {:?} to cell wave vectors", id, pt);
                            diagnostics.report(DiagnosticKind::ModulationVectorMismatch, 0, msg.clone());
                            model.note(msg);
                        }
                        Some(coefs) => {
                            let coefs_id = format!("{}_coefs_", id);
                            if self.get(&coefs_id, model_index).is_none() {
                                if kind == 'F' {
                                    model.note(format!(
                                        "atom wave vector {} = {:?} fn = {:?}",
                                        id, pt, coefs
                                    ));
                                }
                                added.push((coefs_id, coefs));
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        for (id, pt) in added {
            self.add(&id, pt, model_index);
        }

        self.have_atom_mods = self.has_subsystems();
        for (id, params) in self.model_waves(model_index) {
            if id.contains('?') {
                continue;
            }
            let kind = id.chars().next().unwrap_or(' ');
            if !matches!(kind, 'O' | 'D' | 'U') {
                continue;
            }
            let (Some(hash), Some(semi)) = (id.find('#'), id.find(';')) else {
                continue;
            };
            if semi < hash {
                continue;
            }
            let atom = id[semi + 1..].to_string();
            let code = id.chars().nth(2).unwrap_or(' ');
            let axis = id[hash + 1..].chars().next().unwrap_or('0');
            let (wave_kind, utens) = match (code, kind) {
                ('S', _) => (WaveKind::Sawtooth, None),
                ('0', _) => (WaveKind::Crenel, None),
                (_, 'O') => (WaveKind::OccupancyFourier, None),
                (_, 'U') => (WaveKind::AdpFourier, Some(id[hash + 1..semi].to_string())),
                _ => (WaveKind::DisplacementFourier, None),
            };
            let harmonic = if code == 'S' { 0 } else { leading_int(&id[2..]) };
            let q_coefs = if harmonic == 0 {
                let mut q = vec![0.0; d];
                q[0] = 1.0;
                q
            } else if let Some(q) = self.get(&format!("F_{}_coefs_", harmonic), model_index) {
                q.clone()
            } else if d == 1 {
                vec![harmonic as f64]
            } else if harmonic <= d {
                let mut q = vec![0.0; d];
                q[harmonic - 1] = 1.0;
                q
            } else {
                model.note(format!("No wave vector for harmonic {} of {}", harmonic, id));
                continue;
            };
            let p = [
                params.first().copied().unwrap_or(0.0),
                params.get(1).copied().unwrap_or(0.0),
                params.get(2).copied().unwrap_or(0.0),
            ];
            self.atom_mods
                .entry(atom)
                .or_default()
                .push(Modulation::new(axis, wave_kind, p, utens, q_coefs));
            self.mod_count += 1;
            self.have_atom_mods = true;
        }
    }

    /// Integer coefficients `c` such that `pt = Σ c_i·q_i`, first trying a
    /// multiple of a single cell wave vector, then every combination with
    /// coefficients in `-3..=3`.
    pub fn q_coefs(&self, pt: &[f64]) -> Option<Vec<f64>> {
        let sigma = self.sigma.as_ref()?;
        let d = sigma.nrows();
        let p = Vector3::new(
            pt.first().copied().unwrap_or(0.0),
            pt.get(1).copied().unwrap_or(0.0),
            pt.get(2).copied().unwrap_or(0.0),
        );
        let qs: Vec<Vector3<f64>> = (0..d)
            .map(|i| Vector3::new(sigma[(i, 0)], sigma[(i, 1)], sigma[(i, 2)]))
            .collect();
        for (i, q) in qs.iter().enumerate() {
            let qq = q.dot(q);
            if qq == 0.0 {
                continue;
            }
            let f = p.dot(q) / qq;
            let n = f.round();
            if (f - n).abs() < 0.001 && (p - q * n).norm_squared() < 0.0001 {
                let mut c = vec![0.0; d];
                c[i] = n;
                return Some(c);
            }
        }
        let span = |dim: usize| if d > dim { -3..=3 } else { 0..=0 };
        for i in -3i32..=3 {
            for j in span(1) {
                for k in span(2) {
                    let mut v = qs[0] * i as f64;
                    if d > 1 {
                        v += qs[1] * j as f64;
                    }
                    if d > 2 {
                        v += qs[2] * k as f64;
                    }
                    if (v - p).norm_squared() < 0.0001 {
                        let c = [i as f64, j as f64, k as f64];
                        return Some(c[..d].to_vec());
                    }
                }
            }
        }
        None
    }

    /// Second pass: evaluates every atom's waves and applies occupancy, ADP
    /// and displacement changes. Runs once per model.
    pub fn modulate(&mut self, model_index: usize, model: &mut Model, frames: &FrameSet) {
        let marker = Self::key("X_", model_index);
        if self.waves.contains_key(&marker) {
            return;
        }
        self.waves.insert(marker, Vec::new());
        if !self.have_atom_mods {
            return;
        }
        let Some(sigma) = self.sigma.clone() else {
            return;
        };
        let host = frames.host();
        let n_ops = host.operators.len().max(1);
        let empty: Vec<Modulation> = Vec::new();
        let mut modt = String::new();
        for atom in model.atoms.iter_mut() {
            let in_subsystem = atom.subsystem.is_some() || atom.alt_loc.is_some();
            let mods = match self.atom_mods.get(&atom.label) {
                Some(m) => m,
                None if in_subsystem && self.has_subsystems() => &empty,
                None => continue,
            };
            if atom.symmetry.is_empty() {
                continue;
            }
            let mut iop = governing_operator(atom);
            if self.options.last {
                let last = atom.symmetry.iter().next_back().copied().unwrap_or(0);
                iop = (last % n_ops).max(iop);
            }
            let frame = frames.frame_of(atom);
            let gamma_e = host.rotation(iop);
            let Some(op) = frame.operators.get(iop).or_else(|| host.operators.get(iop)) else {
                continue;
            };
            let ss = SuperspaceFrame {
                sigma: frame.sigma.as_ref().unwrap_or(&sigma),
                t_factor: frame.t_factor.as_ref(),
                rsvs: op.rsvs(),
                gamma_e,
            };
            let r = Vector3::from(atom.position);
            let Some(ms) = ModulationSet::calculate(mods, &r, &ss, self.options.t) else {
                log::warn!("{}: singular superspace operator {}", atom.label, op.xyz);
                continue;
            };

            if self.have_occupancy {
                if let Some(v) = ms.occupancy {
                    let occ = if ms.occupancy_absolute {
                        v
                    } else if self.get(&format!("J_O#0;{}", atom.label), model_index).is_none() {
                        atom.occupancy + v
                    } else {
                        let pt = self
                            .get(&format!("J_O#0;{}", atom.label), model_index)
                            .cloned()
                            .unwrap_or_default();
                        let p0 = pt.first().copied().unwrap_or(0.0);
                        let p1 = pt.get(1).copied().unwrap_or(1.0);
                        match atom.site_multiplicity {
                            Some(mult) if p1 != 0.0 => {
                                let o_site = atom.occupancy * mult as f64 / n_ops as f64 / p1;
                                o_site * (p1 + v)
                            }
                            _ => p0 * (p1 + v),
                        }
                    };
                    atom.occupancy = occ.clamp(0.0, 1.0);
                }
            }

            for (id, v) in &ms.uij {
                match U_LIST.find(id.as_str()).map(|p| p / 3) {
                    Some(6) => atom.u_iso = Some(atom.u_iso.unwrap_or(0.0) + v),
                    Some(i) if i < 6 => match atom.adp.as_mut() {
                        Some(adp) => adp.values[i] += v,
                        None => log::error!("Cannot modulate nonexistent ADP of {}", atom.label),
                    },
                    _ => {}
                }
            }

            let d = ms.displacement.map(|v| if v.is_nan() { 0.0 } else { v });
            atom.displacement = Some([d.x, d.y, d.z]);

            if atom.occupancy != 0.0 {
                let mut t = self.q1_norm.dot(&r);
                if (t - t.trunc()).abs() > 0.001 {
                    t = t.floor();
                }
                modt.push_str(&format!("{}\n", t as i64));
            }
        }
        model.note(format!(
            "{} modulations for {} atoms",
            self.mod_count,
            self.atom_mods.len()
        ));
        model.modt = Some(modt);
    }
}

/// Modulus/phase `(a, φ, 1)` to cosine/sine amplitudes `(a·cos 2πφ, a·sin(−2πφ), 0)`.
fn polar_to_cartesian(p: &[f64]) -> Vec<f64> {
    let a = p.first().copied().unwrap_or(0.0);
    let phase = 2.0 * PI * p.get(1).copied().unwrap_or(0.0);
    vec![a * phase.cos(), a * (-phase).sin(), 0.0]
}

fn leading_int(s: &str) -> usize {
    s.chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::structure::AtomRecord;
    use crate::model::symmetry::SpaceGroup;
    use crate::physics::expansion::Frame;
    use std::collections::BTreeSet;

    fn one_dim() -> (ModulationEngine, Model) {
        let mut model = Model::new("t");
        let mut e = ModulationEngine::new(ModulationOptions::default());
        e.set_dimension(1, &mut model);
        e.add("W_1", vec![0.3, 0.0, 0.0], 0);
        (e, model)
    }

    fn host_frames(d: usize) -> FrameSet {
        let cell = UnitCell::from_parameters([5.0, 5.0, 5.0, 90.0, 90.0, 90.0]).unwrap();
        let group = SpaceGroup::new(d);
        FrameSet::new(Frame::host(cell, group.operators().to_vec(), 1))
    }

    fn placed(label: &str, p: [f64; 3]) -> AtomRecord {
        let mut a = AtomRecord::new(label);
        a.position = p;
        a.symmetry = BTreeSet::from([0]);
        a
    }

    #[test]
    fn test_dimension_limit() {
        let mut model = Model::new("t");
        let mut e = ModulationEngine::new(ModulationOptions::default());
        assert_eq!(e.set_dimension(4, &mut model), 0);
        assert!(model.notes[0].starts_with("Too high modulation dimension (4)"));
        assert!(e.options().average);
        assert_eq!(e.set_dimension(1, &mut model), 0);
    }

    #[test]
    fn test_add_filters() {
        let mut e = ModulationEngine::new(ModulationOptions {
            types: Some("O".into()),
            ..Default::default()
        });
        assert!(!e.add("D_1#x;C1", vec![0.1, 0.0, 0.0], 0));
        assert!(e.add("O_1#0;C1", vec![0.1, 0.0, 0.0], 0));
        assert!(!e.add("O_2#0;C1", vec![0.0, 0.0, 0.0], 0));
    }

    #[test]
    fn test_q_coefs() {
        let mut model = Model::new("t");
        let mut diags = Diagnostics::new();
        let mut e = ModulationEngine::new(ModulationOptions::default());
        e.set_dimension(2, &mut model);
        e.add("W_1", vec![0.3, 0.0, 0.0], 0);
        e.add("W_2", vec![0.0, 0.2, 0.0], 0);
        e.prepare(0, &mut model, &mut diags);
        assert_eq!(e.q_coefs(&[0.6, 0.0, 0.0]), Some(vec![2.0, 0.0]));
        assert_eq!(e.q_coefs(&[0.3, -0.4, 0.0]), Some(vec![1.0, -2.0]));
        assert_eq!(e.q_coefs(&[0.11, 0.0, 0.0]), None);
    }

    #[test]
    fn test_unmatched_wave_vector_is_reported() {
        let (mut e, mut model) = one_dim();
        let mut diags = Diagnostics::new();
        e.add("F_1", vec![0.17, 0.0, 0.0], 0);
        e.prepare(0, &mut model, &mut diags);
        assert_eq!(diags.count(DiagnosticKind::ModulationVectorMismatch), 1);
    }

    #[test]
    fn test_polar_record_converted() {
        let (mut e, mut model) = one_dim();
        let mut diags = Diagnostics::new();
        e.add("D_1#x;C1", vec![0.1, 0.25, 1.0], 0);
        e.prepare(0, &mut model, &mut diags);
        let p = e.get("D_1#x;C1", 0).unwrap();
        assert!(p[0].abs() < 1e-12);
        assert!((p[1] + 0.1).abs() < 1e-12);
        assert_eq!(p[2], 0.0);
    }

    #[test]
    fn test_occupancy_clamped() {
        let (mut e, mut model) = one_dim();
        let mut diags = Diagnostics::new();
        e.add("O_1#0;Fe1", vec![0.5, 0.0, 0.0], 0);
        model.atoms.push(placed("Fe1", [0.0, 0.0, 0.0]));
        e.prepare(0, &mut model, &mut diags);
        e.modulate(0, &mut model, &host_frames(1));
        // 1.0 + 0.5·cos(0) clamps to full occupancy
        assert_eq!(model.atoms[0].occupancy, 1.0);
        assert_eq!(model.modt.as_deref(), Some("0\n"));
        assert!(model.notes.iter().any(|n| n == "1 modulations for 1 atoms"));
    }

    #[test]
    fn test_displacement_and_single_pass() {
        let (mut e, mut model) = one_dim();
        let mut diags = Diagnostics::new();
        e.add("D_1#x;C1", vec![0.0, 0.02, 0.0], 0);
        model.atoms.push(placed("C1", [0.8333333333333334, 0.0, 0.0]));
        e.prepare(0, &mut model, &mut diags);
        let frames = host_frames(1);
        e.modulate(0, &mut model, &frames);
        // x4 = 0.3 · 5/6 = 0.25
        let d = model.atoms[0].displacement.unwrap();
        assert!((d[0] - 0.02).abs() < 1e-9);
        model.atoms[0].displacement = None;
        e.modulate(0, &mut model, &frames);
        assert!(model.atoms[0].displacement.is_none());
    }

    #[test]
    fn test_missing_wave_vector_skips_modulation() {
        let mut model = Model::new("t");
        let mut diags = Diagnostics::new();
        let mut e = ModulationEngine::new(ModulationOptions::default());
        e.set_dimension(2, &mut model);
        e.add("W_1", vec![0.3, 0.0, 0.0], 0);
        e.add("D_1#x;C1", vec![0.0, 0.02, 0.0], 0);
        e.prepare(0, &mut model, &mut diags);
        assert!(e.sigma().is_none());
        model.atoms.push(placed("C1", [0.5, 0.0, 0.0]));
        e.modulate(0, &mut model, &host_frames(2));
        assert!(model.atoms[0].displacement.is_none());
    }
}

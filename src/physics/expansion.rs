// src/physics/expansion.rs
//
// Symmetry expansion of the asymmetric unit. Works on fractional
// coordinates; each atom is expanded in its own frame (the host cell or a
// subsystem cell) with that frame's operators.

use crate::model::structure::AtomRecord;
use crate::model::symmetry::SymmetryOperator;
use crate::model::unit_cell::UnitCell;
use nalgebra::{DMatrix, Matrix3, Vector3};
use std::collections::{BTreeSet, HashMap};

/// Two positions closer than this (Å²) are one special position.
const SPECIAL_TOLERANCE2: f64 = 0.0001;
const PACK_SLOP: f64 = 0.001;

/// Inclusive range of lattice offsets to generate, per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatticeRange {
    pub min: [i32; 3],
    pub max: [i32; 3],
}

impl LatticeRange {
    /// `n` cells along each axis starting at the origin cell.
    pub fn cells(n: i32) -> Self {
        let n = n.max(1);
        Self {
            min: [0; 3],
            max: [n - 1; 3],
        }
    }

    pub fn contains(&self, o: [i32; 3]) -> bool {
        (0..3).all(|i| self.min[i] <= o[i] && o[i] <= self.max[i])
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut r = *self;
        for i in 0..3 {
            r.min[i] = r.min[i].min(other.min[i]);
            r.max[i] = r.max[i].max(other.max[i]);
        }
        r
    }

    /// All offsets, origin cell first.
    pub fn offsets(&self) -> Vec<[i32; 3]> {
        let mut out = Vec::new();
        if self.contains([0; 3]) {
            out.push([0; 3]);
        }
        for i in self.min[0]..=self.max[0] {
            for j in self.min[1]..=self.max[1] {
                for k in self.min[2]..=self.max[2] {
                    if [i, j, k] != [0; 3] {
                        out.push([i, j, k]);
                    }
                }
            }
        }
        out
    }

    /// Widens `cells(n)` so that the box `[0, n]³` of `display` is covered
    /// when seen in the fractional coordinates of `cell`.
    pub fn covering(display: &UnitCell, n: i32, cell: &UnitCell) -> Self {
        let n = n.max(1);
        let mut lo = [0i32; 3];
        let mut hi = [n; 3];
        let slop = 0.0001;
        for corner in 0..8 {
            let f = Vector3::new(
                if corner & 1 == 0 { 0.0 } else { n as f64 },
                if corner & 2 == 0 { 0.0 } else { n as f64 },
                if corner & 4 == 0 { 0.0 } else { n as f64 },
            );
            let p = cell.to_fractional(&display.to_cartesian(&f));
            for i in 0..3 {
                if (lo[i] as f64) > p[i] + slop {
                    lo[i] = p[i].floor() as i32 - 1;
                }
                if (hi[i] as f64) < p[i] - slop {
                    hi[i] = p[i].ceil() as i32 + 1;
                }
            }
        }
        Self {
            min: lo,
            max: [hi[0] - 1, hi[1] - 1, hi[2] - 1],
        }
    }
}

/// A cell, its operators and (when modulated) its superspace matrices.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Subsystem code; `None` for the host.
    pub code: Option<String>,
    pub cell: UnitCell,
    pub operators: Vec<SymmetryOperator>,
    pub sigma: Option<DMatrix<f64>>,
    pub t_factor: Option<DMatrix<f64>>,
    pub range: LatticeRange,
}

impl Frame {
    pub fn host(cell: UnitCell, operators: Vec<SymmetryOperator>, cells: i32) -> Self {
        Self {
            code: None,
            cell,
            operators,
            sigma: None,
            t_factor: None,
            range: LatticeRange::cells(cells),
        }
    }

    /// Rotation of operator `iop`, identity if out of range.
    pub fn rotation(&self, iop: usize) -> Matrix3<f64> {
        self.operators
            .get(iop)
            .map_or_else(Matrix3::identity, SymmetryOperator::rotation)
    }
}

/// The host frame (index 0) plus one frame per subsystem.
#[derive(Debug, Clone)]
pub struct FrameSet {
    pub frames: Vec<Frame>,
    /// Frame whose cell bounds the displayed region.
    pub display: usize,
}

impl FrameSet {
    pub fn new(host: Frame) -> Self {
        Self {
            frames: vec![host],
            display: 0,
        }
    }

    pub fn push(&mut self, frame: Frame) -> usize {
        self.frames.push(frame);
        self.frames.len() - 1
    }

    pub fn host(&self) -> &Frame {
        &self.frames[0]
    }

    pub fn has_subsystems(&self) -> bool {
        self.frames.len() > 1
    }

    /// Subsystem frame chosen by the atom's subsystem code, else its
    /// alternate-location code, else the host.
    pub fn frame_index(&self, atom: &AtomRecord) -> usize {
        if !self.has_subsystems() {
            return 0;
        }
        let code = atom
            .subsystem
            .clone()
            .or_else(|| atom.alt_loc.map(String::from));
        code.and_then(|c| {
            self.frames
                .iter()
                .position(|f| f.code.as_deref() == Some(c.as_str()))
        })
        .unwrap_or(0)
    }

    pub fn frame_of(&self, atom: &AtomRecord) -> &Frame {
        &self.frames[self.frame_index(atom)]
    }

    /// Extends every frame's range so the display box is fully generated.
    pub fn cover_display(&mut self, cells: i32) {
        let display = self.frames[self.display].cell.clone();
        for f in &mut self.frames {
            f.range = LatticeRange::covering(&display, cells, &f.cell);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExpansionOptions {
    pub check_special: bool,
    pub packed: bool,
}

/// The operator that governs an atom: the lowest recorded operator index.
pub fn governing_operator(atom: &AtomRecord) -> usize {
    atom.symmetry.iter().next().copied().unwrap_or(0)
}

fn wrap(p: Vector3<f64>) -> Vector3<f64> {
    p.map(|v| {
        let f = v - v.floor();
        if 1.0 - f < 1e-10 {
            0.0
        } else {
            f
        }
    })
}

fn packed_images(p: Vector3<f64>) -> Vec<Vector3<f64>> {
    let mut out = vec![p];
    for axis in 0..3 {
        if p[axis] < PACK_SLOP {
            let extra: Vec<Vector3<f64>> = out
                .iter()
                .map(|q| {
                    let mut q = *q;
                    q[axis] += 1.0;
                    q
                })
                .collect();
            out.extend(extra);
        }
    }
    out
}

/// Generates every image of `asym` over all cells and operators, cell-major
/// then operator then atom. Images of one site that land on the same spot
/// are merged, with the merging operator recorded in `symmetry`.
pub fn expand(asym: &[AtomRecord], frames: &FrameSet, opts: &ExpansionOptions) -> Vec<AtomRecord> {
    let frame_of: Vec<usize> = asym.iter().map(|a| frames.frame_index(a)).collect();
    let range = frames
        .frames
        .iter()
        .skip(1)
        .fold(frames.host().range, |r, f| r.union(&f.range));
    let max_ops = frames.frames.iter().map(|f| f.operators.len()).max().unwrap_or(1);

    let mut out: Vec<AtomRecord> = Vec::new();
    let mut by_site: HashMap<usize, Vec<usize>> = HashMap::new();
    for (ci, offset) in range.offsets().into_iter().enumerate() {
        let shift = Vector3::new(offset[0] as f64, offset[1] as f64, offset[2] as f64);
        for iop in 0..max_ops {
            for (site, atom) in asym.iter().enumerate() {
                if atom.ignore_symmetry || !atom.has_position() {
                    if ci == 0 && iop == 0 {
                        let mut a = atom.clone();
                        a.site = site;
                        a.symmetry = BTreeSet::from([0]);
                        out.push(a);
                    }
                    continue;
                }
                let frame = &frames.frames[frame_of[site]];
                let Some(op) = frame.operators.get(iop) else {
                    continue;
                };
                if !frame.range.contains(offset) {
                    continue;
                }
                let n_ops = frame.operators.len();
                let base = wrap(op.apply(&Vector3::from(atom.position), frame.sigma.as_ref()));
                let images = if opts.packed {
                    packed_images(base)
                } else {
                    vec![base]
                };
                for p in images {
                    let p = p + shift;
                    let bit = ci * n_ops + iop;
                    let sites = by_site.entry(site).or_default();
                    if opts.check_special {
                        let c = frame.cell.to_cartesian(&p);
                        let twin = sites.iter().copied().find(|&j| {
                            let q = frame.cell.to_cartesian(&Vector3::from(out[j].position));
                            (q - c).norm_squared() < SPECIAL_TOLERANCE2
                        });
                        if let Some(j) = twin {
                            out[j].symmetry.insert(bit);
                            out[j].symmetry.insert(iop);
                            continue;
                        }
                    }
                    let mut a = atom.clone();
                    a.position = [p.x, p.y, p.z];
                    a.site = site;
                    a.symmetry = BTreeSet::from([bit, iop]);
                    sites.push(out.len());
                    out.push(a);
                }
            }
        }
    }
    log::debug!(
        "expanded {} asymmetric atoms to {} over {} operators",
        asym.len(),
        out.len(),
        max_ops
    );
    out
}

/// Drops (keep = false) atoms whose modulated position falls outside the
/// display box `[0, cells]³`.
pub fn trim_outside(atoms: &mut [AtomRecord], frames: &FrameSet, cells: i32) {
    let display = &frames.frames[frames.display].cell;
    let hi = cells.max(1) as f64;
    for a in atoms.iter_mut() {
        let frame = frames.frame_of(a);
        let mut p = Vector3::from(a.position);
        if let Some(d) = a.displacement {
            p += Vector3::from(d);
        }
        let f = display.to_fractional(&frame.cell.to_cartesian(&p));
        let inside = (0..3).all(|i| f[i] > -PACK_SLOP && f[i] < hi + PACK_SLOP);
        if !inside {
            a.keep = false;
        }
    }
}

/// Fills in Cartesian ADP tensors, rotated by each atom's governing operator.
pub fn rotate_tensors(atoms: &mut [AtomRecord], frames: &FrameSet) {
    for i in 0..atoms.len() {
        let Some(adp) = atoms[i].adp.clone() else {
            continue;
        };
        let frame = frames.frame_of(&atoms[i]);
        let rot = frame.rotation(governing_operator(&atoms[i]));
        atoms[i].tensor = Some(frame.cell.cartesian_adp(adp.kind, &adp.values, Some(&rot)));
    }
}

/// Re-expresses subsystem atoms (position and displacement) in the host
/// cell's fractional coordinates.
pub fn to_host_frame(atoms: &mut [AtomRecord], frames: &FrameSet) {
    if !frames.has_subsystems() {
        return;
    }
    let host = &frames.host().cell;
    for a in atoms.iter_mut() {
        let idx = frames.frame_index(a);
        if idx == 0 {
            continue;
        }
        let cell = &frames.frames[idx].cell;
        let p = host.to_fractional(&cell.to_cartesian(&Vector3::from(a.position)));
        a.position = [p.x, p.y, p.z];
        if let Some(d) = a.displacement {
            let v = cell.to_cartesian(&Vector3::from(d)) - cell.to_cartesian(&Vector3::zeros());
            let f = host.to_fractional(&v) - host.to_fractional(&Vector3::zeros());
            a.displacement = Some([f.x, f.y, f.z]);
        }
    }
}

/// Final conversion to Cartesian, keeping the fractional coordinates.
pub fn to_cartesian(atoms: &mut [AtomRecord], cell: &UnitCell) {
    let origin = cell.to_cartesian(&Vector3::zeros());
    for a in atoms.iter_mut() {
        let f = Vector3::from(a.position);
        let c = cell.to_cartesian(&f);
        a.fractional = Some(a.position);
        a.position = [c.x, c.y, c.z];
        if let Some(d) = a.displacement {
            let v = cell.to_cartesian(&Vector3::from(d)) - origin;
            a.displacement = Some([v.x, v.y, v.z]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::symmetry::SpaceGroup;

    fn atom(label: &str, p: [f64; 3]) -> AtomRecord {
        let mut a = AtomRecord::new(label);
        a.element = "C".into();
        a.position = p;
        a
    }

    fn frames(ops: &[&str], cells: i32) -> FrameSet {
        let cell = UnitCell::from_parameters([5.0, 5.0, 5.0, 90.0, 90.0, 90.0]).unwrap();
        let strings: Vec<String> = ops.iter().map(|s| s.to_string()).collect();
        let (group, _) = SpaceGroup::from_strings(0, &strings);
        FrameSet::new(Frame::host(cell, group.operators().to_vec(), cells))
    }

    const STRICT: ExpansionOptions = ExpansionOptions {
        check_special: true,
        packed: false,
    };

    #[test]
    fn test_general_position_doubles() {
        let fs = frames(&["x,y,z", "-x,-y,-z"], 1);
        let out = expand(&[atom("C1", [0.1, 0.2, 0.3])], &fs, &STRICT);
        assert_eq!(out.len(), 2);
        assert!((out[1].position[0] - 0.9).abs() < 1e-12);
        assert_eq!(out[1].site, 0);
        assert!(out[1].symmetry.contains(&1));
    }

    #[test]
    fn test_special_position_collapses() {
        let fs = frames(&["x,y,z", "-x,-y,-z"], 1);
        let out = expand(&[atom("C1", [0.5, 0.0, 0.5])], &fs, &STRICT);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].symmetry, BTreeSet::from([0, 1]));

        let loose = ExpansionOptions {
            check_special: false,
            packed: false,
        };
        assert_eq!(expand(&[atom("C1", [0.5, 0.0, 0.5])], &fs, &loose).len(), 2);
    }

    #[test]
    fn test_cells_multiply_images() {
        let fs = frames(&["x,y,z"], 2);
        let out = expand(&[atom("C1", [0.25, 0.25, 0.25])], &fs, &STRICT);
        assert_eq!(out.len(), 8);
        assert_eq!(out[0].position, [0.25, 0.25, 0.25]);
        // origin cell holds bit 0; the last cell is the 8th block of one op
        assert!(out[7].symmetry.contains(&7));
        assert_eq!(governing_operator(&out[7]), 0);
    }

    #[test]
    fn test_packing_adds_face_copies() {
        let fs = frames(&["x,y,z"], 1);
        let packed = ExpansionOptions {
            check_special: true,
            packed: true,
        };
        let out = expand(&[atom("Na1", [0.0, 0.5, 0.5])], &fs, &packed);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].position[0], 1.0);
    }

    #[test]
    fn test_ignore_symmetry_atoms_stay_single() {
        let fs = frames(&["x,y,z", "-x,-y,-z"], 1);
        let mut a = atom("O9", [1.2, 0.1, 0.1]);
        a.ignore_symmetry = true;
        let out = expand(&[a], &fs, &STRICT);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].position[0], 1.2);
    }

    #[test]
    fn test_range_offsets_origin_first() {
        let r = LatticeRange {
            min: [-1, 0, 0],
            max: [1, 0, 0],
        };
        assert_eq!(r.offsets(), vec![[0, 0, 0], [-1, 0, 0], [1, 0, 0]]);
        let cell = UnitCell::from_parameters([5.0, 5.0, 5.0, 90.0, 90.0, 90.0]).unwrap();
        let wide = UnitCell::from_parameters([2.5, 5.0, 5.0, 90.0, 90.0, 90.0]).unwrap();
        let cover = LatticeRange::covering(&cell, 1, &wide);
        assert!(cover.max[0] >= 1);
        assert_eq!(cover.min, [0, 0, 0]);
    }

    #[test]
    fn test_cartesian_keeps_fractional() {
        let cell = UnitCell::from_parameters([4.0, 4.0, 4.0, 90.0, 90.0, 90.0]).unwrap();
        let mut atoms = vec![atom("C1", [0.5, 0.25, 0.0])];
        atoms[0].displacement = Some([0.01, 0.0, 0.0]);
        to_cartesian(&mut atoms, &cell);
        assert_eq!(atoms[0].fractional, Some([0.5, 0.25, 0.0]));
        assert!((atoms[0].position[1] - 1.0).abs() < 1e-12);
        assert!((atoms[0].displacement.unwrap()[0] - 0.04).abs() < 1e-12);
    }
}

// src/physics/bonding.rs
//
// Bonds from explicit bond records and hydrogen proximity, and (in
// molecular mode) growth of whole molecules across cell boundaries.
// Positions are fractional throughout.

use crate::model::elements::covalent_radius;
use crate::model::structure::{AtomRecord, Bond, BondHint, BondOrder};
use crate::model::unit_cell::UnitCell;
use nalgebra::Vector3;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Lattice search radius for molecule growth, in cells.
const GROWTH_RANGE: i32 = 2;
const MAX_H_BOND: f64 = 1.1;
const COINCIDENT: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
pub struct BondingOptions {
    pub molecular: bool,
    /// Added to the sum of covalent radii when growing molecules.
    pub tolerance: f64,
}

struct Resolver<'a> {
    atoms: &'a mut Vec<AtomRecord>,
    cell: &'a UnitCell,
    molecular: bool,
    tolerance: f64,
    /// Atom indices per site label.
    sets: HashMap<String, Vec<usize>>,
    radii: Vec<f64>,
    connected: Vec<BTreeSet<usize>>,
    bonds: Vec<Bond>,
    seen: HashSet<(usize, usize)>,
    molecule: BTreeSet<usize>,
    excluded: HashSet<usize>,
    /// Atoms below this index already had their hydrogen bond looked up.
    h_checked: usize,
}

/// Resolves bonds for one model and returns them. In molecular mode the
/// atoms not belonging to the grown molecule get `keep = false`, and only
/// bonds between kept atoms are returned.
pub fn resolve(
    atoms: &mut Vec<AtomRecord>,
    hints: &[BondHint],
    cell: &UnitCell,
    opts: &BondingOptions,
) -> Vec<Bond> {
    let mut r = Resolver::new(atoms, cell, opts);
    log::info!(
        "creating bonds{}",
        if hints.is_empty() { "" } else { " using bond records" }
    );

    let mut first = true;
    let mut passes = 0;
    while r.create_bonds(hints, first) {
        first = false;
        passes += 1;
    }

    if r.molecular {
        for (i, a) in r.atoms.iter_mut().enumerate() {
            a.keep = a.keep && r.molecule.contains(&i) && !r.excluded.contains(&i);
        }
        let atoms = &*r.atoms;
        r.bonds.retain(|b| atoms[b.a].keep && atoms[b.b].keep);
        log::debug!(
            "molecule grown in {} passes: {} atoms, {} excluded",
            passes,
            r.molecule.len(),
            r.excluded.len()
        );
    }
    r.bonds
}

impl<'a> Resolver<'a> {
    fn new(atoms: &'a mut Vec<AtomRecord>, cell: &'a UnitCell, opts: &BondingOptions) -> Self {
        let mut sets: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, a) in atoms.iter().enumerate() {
            sets.entry(a.label.clone()).or_default().push(i);
        }
        let radii = atoms
            .iter()
            .map(|a| covalent_radius(&a.element).unwrap_or(0.0))
            .collect();
        let n = atoms.len();
        Self {
            atoms,
            cell,
            molecular: opts.molecular,
            tolerance: opts.tolerance,
            sets,
            radii,
            connected: vec![BTreeSet::new(); n],
            bonds: Vec::new(),
            seen: HashSet::new(),
            molecule: BTreeSet::new(),
            excluded: HashSet::new(),
            h_checked: 0,
        }
    }
}

impl Resolver<'_> {
    fn frac(&self, i: usize) -> Vector3<f64> {
        Vector3::from(self.atoms[i].position)
    }

    fn cart(&self, i: usize) -> Vector3<f64> {
        self.cell.to_cartesian(&self.frac(i))
    }

    fn add_bond(&mut self, i: usize, j: usize, order: BondOrder) {
        let bond = Bond::new(i, j, order);
        if self.seen.insert((bond.a, bond.b)) {
            self.bonds.push(bond);
        }
        self.connected[i].insert(j);
        self.connected[j].insert(i);
    }

    /// Index of the image of atom `k` shifted by `offset`, reusing a
    /// same-site atom already there.
    fn image_of(&mut self, k: usize, offset: Vector3<f64>) -> usize {
        let target = self.frac(k) + offset;
        let tc = self.cell.to_cartesian(&target);
        let label = self.atoms[k].label.clone();
        let existing = self.sets.get(&label).and_then(|set| {
            set.iter()
                .copied()
                .find(|&ii| (self.cart(ii) - tc).norm() < COINCIDENT)
        });
        if let Some(ii) = existing {
            return ii;
        }
        let mut image = self.atoms[k].clone();
        image.position = [target.x, target.y, target.z];
        let idx = self.atoms.len();
        self.atoms.push(image);
        self.radii.push(self.radii[k]);
        self.connected.push(BTreeSet::new());
        self.sets.entry(label).or_default().push(idx);
        idx
    }

    /// All atoms reachable from `start`, skipping those in `stop`.
    fn flood(&self, start: usize, stop: &BTreeSet<usize>) -> BTreeSet<usize> {
        let mut found = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            if !found.insert(i) {
                continue;
            }
            for &j in &self.connected[i] {
                if !found.contains(&j) && !stop.contains(&j) {
                    stack.push(j);
                }
            }
        }
        found
    }

    fn apply_hints(&mut self, hints: &[BondHint], first: bool) {
        let range = if self.molecular && first { 1 } else { 0 };
        for hint in hints.iter().rev() {
            let (Some(s1), Some(s2)) = (
                self.sets.get(&hint.label_a).cloned(),
                self.sets.get(&hint.label_b).cloned(),
            ) else {
                continue;
            };
            for &j in &s1 {
                for &k in &s2 {
                    if self.molecular && self.connected[j].contains(&k) {
                        continue;
                    }
                    let Some(offset) = self.cell.check_distance(
                        &self.frac(j),
                        &self.frac(k),
                        hint.distance,
                        hint.tolerance,
                        range,
                    ) else {
                        continue;
                    };
                    let k2 = if offset == Vector3::zeros() {
                        k
                    } else {
                        self.image_of(k, offset)
                    };
                    if j != k2 && !self.connected[j].contains(&k2) {
                        self.add_bond(j, k2, hint.order);
                    }
                }
            }
        }
    }

    /// Each hydrogen bonds to its nearest heavy atom within 1.1 Å. Only
    /// atoms added since the previous call are looked at.
    fn bond_hydrogens(&mut self) {
        let start = self.h_checked;
        self.h_checked = self.atoms.len();
        for i in start..self.atoms.len() {
            if !self.atoms[i].is_hydrogen() {
                continue;
            }
            let alt = self.atoms[i].alt_loc;
            let ci = self.cart(i);
            let nearest = (0..self.atoms.len())
                .filter(|&k| k != i && !self.atoms[k].is_hydrogen())
                .filter(|&k| {
                    alt.is_none() || self.atoms[k].alt_loc.is_none() || self.atoms[k].alt_loc == alt
                })
                .map(|k| (k, (self.cart(k) - ci).norm()))
                .filter(|&(_, d)| d > COINCIDENT && d <= MAX_H_BOND)
                .min_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((k, _)) = nearest {
                if !self.connected[i].contains(&k) {
                    self.add_bond(i, k, BondOrder::Single);
                }
            }
        }
    }

    /// One pass. Returns true while the molecule is still growing.
    fn create_bonds(&mut self, hints: &[BondHint], first: bool) -> bool {
        self.apply_hints(hints, first);
        if !hints.is_empty() {
            self.bond_hydrogens();
        }
        if !self.molecular {
            return false;
        }

        if first {
            let mut seen_sites = HashSet::new();
            for i in 0..self.atoms.len() {
                if seen_sites.insert(self.atoms[i].site) && !self.molecule.contains(&i) {
                    let part = self.flood(i, &BTreeSet::new());
                    self.molecule.extend(part);
                }
            }
        }

        for i in 0..self.atoms.len() {
            if self.molecule.contains(&i) || self.excluded.contains(&i) {
                continue;
            }
            let fi = self.frac(i);
            let hit = self.molecule.iter().find_map(|&j| {
                let cutoff = self.radii[i] + self.radii[j] + self.tolerance;
                self.cell
                    .check_distance(&self.frac(j), &fi, cutoff, 0.0, GROWTH_RANGE)
            });
            let Some(offset) = hit else {
                continue;
            };
            let branch = self.flood(i, &self.molecule);
            for &k in &branch {
                let p = self.frac(k) + offset;
                self.atoms[k].position = [p.x, p.y, p.z];
            }
            for &k in &branch {
                let ck = self.cart(k);
                let label = &self.atoms[k].label;
                let clash = self.sets.get(label).is_some_and(|set| {
                    set.iter().any(|&ii| {
                        ii != k
                            && self.molecule.contains(&ii)
                            && !self.excluded.contains(&ii)
                            && (self.cart(ii) - ck).norm() < COINCIDENT
                    })
                });
                if clash {
                    self.excluded.insert(k);
                }
                self.molecule.insert(k);
            }
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(label: &str, element: &str, site: usize, p: [f64; 3]) -> AtomRecord {
        let mut a = AtomRecord::new(label);
        a.element = element.into();
        a.site = site;
        a.position = p;
        a
    }

    fn cubic(a: f64) -> UnitCell {
        UnitCell::from_parameters([a, a, a, 90.0, 90.0, 90.0]).unwrap()
    }

    fn hint(a: &str, b: &str, d: f64) -> BondHint {
        BondHint {
            label_a: a.into(),
            label_b: b.into(),
            distance: d,
            tolerance: 0.1,
            order: BondOrder::Single,
        }
    }

    #[test]
    fn test_self_bond_through_image_makes_dimer() {
        let cell = cubic(2.0);
        let mut atoms = vec![atom("C1", "C", 0, [0.0; 3])];
        let opts = BondingOptions {
            molecular: true,
            tolerance: 0.45,
        };
        let bonds = resolve(&mut atoms, &[hint("C1", "C1", 2.0)], &cell, &opts);
        assert_eq!(atoms.len(), 2);
        assert!(atoms.iter().all(|a| a.keep));
        assert_eq!(bonds, vec![Bond::new(0, 1, BondOrder::Single)]);
        let d = (cell.to_cartesian(&Vector3::from(atoms[1].position))).norm();
        assert!((d - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_crystal_mode_only_same_cell() {
        let cell = cubic(10.0);
        let mut atoms = vec![
            atom("C1", "C", 0, [0.0, 0.0, 0.0]),
            atom("O1", "O", 1, [0.12, 0.0, 0.0]),
            atom("O1", "O", 1, [0.95, 0.0, 0.0]),
        ];
        let opts = BondingOptions {
            molecular: false,
            tolerance: 0.45,
        };
        let bonds = resolve(&mut atoms, &[hint("C1", "O1", 1.2)], &cell, &opts);
        assert_eq!(bonds, vec![Bond::new(0, 1, BondOrder::Single)]);
        assert_eq!(atoms.len(), 3);
    }

    #[test]
    fn test_hydrogen_takes_nearest_heavy_atom() {
        let cell = cubic(10.0);
        let mut atoms = vec![
            atom("C1", "C", 0, [0.0, 0.0, 0.0]),
            atom("N1", "N", 1, [0.2, 0.0, 0.0]),
            atom("H1", "H", 2, [0.105, 0.0, 0.0]),
            atom("O1", "O", 3, [0.5, 0.5, 0.5]),
        ];
        let opts = BondingOptions {
            molecular: false,
            tolerance: 0.45,
        };
        let bonds = resolve(&mut atoms, &[hint("C1", "O1", 5.0)], &cell, &opts);
        assert!(bonds.contains(&Bond::new(2, 1, BondOrder::Single)));
        assert!(!bonds.contains(&Bond::new(2, 0, BondOrder::Single)));
    }

    #[test]
    fn test_growth_pulls_neighbor_across_boundary() {
        let cell = cubic(5.0);
        let mut atoms = vec![
            atom("C1", "C", 0, [0.05, 0.5, 0.5]),
            atom("C2", "C", 1, [0.95, 0.5, 0.5]),
        ];
        let opts = BondingOptions {
            molecular: true,
            tolerance: 0.45,
        };
        resolve(&mut atoms, &[], &cell, &opts);
        // C2 is its own site representative, so both start in the molecule
        assert!(atoms.iter().all(|a| a.keep));
    }

    #[test]
    fn test_growth_translates_nearby_image() {
        let cell = cubic(5.0);
        let mut atoms = vec![
            atom("C1", "C", 0, [0.05, 0.5, 0.5]),
            atom("C1", "C", 0, [0.95, 0.5, 0.5]),
            atom("C1", "C", 0, [0.5, 0.5, 0.5]),
        ];
        let opts = BondingOptions {
            molecular: true,
            tolerance: 0.45,
        };
        resolve(&mut atoms, &[], &cell, &opts);
        // the image at 0.95 is pulled to -0.05, 0.5 Å from C1; the one at
        // 0.5 stays out of reach
        assert!(atoms[1].keep);
        assert!((atoms[1].position[0] + 0.05).abs() < 1e-12);
        assert!(!atoms[2].keep);
    }

    #[test]
    fn test_chain_grows_one_link_per_pass() {
        let cell = cubic(5.0);
        let mut atoms = vec![
            atom("C1", "C", 0, [0.05, 0.5, 0.5]),
            atom("C1", "C", 0, [0.9, 0.5, 0.5]),
            atom("C1", "C", 0, [0.6, 0.5, 0.5]),
        ];
        let opts = BondingOptions {
            molecular: true,
            tolerance: 0.45,
        };
        resolve(&mut atoms, &[], &cell, &opts);
        // 0.6 only reaches the chain after 0.9 has moved to -0.1
        assert!(atoms.iter().all(|a| a.keep));
        assert!((atoms[1].position[0] + 0.1).abs() < 1e-12);
        assert!((atoms[2].position[0] + 0.4).abs() < 1e-12);
        assert_eq!(atoms.len(), 3);
    }

    #[test]
    fn test_hydrogens_are_scanned_once() {
        let cell = cubic(10.0);
        let mut atoms = vec![
            atom("C1", "C", 0, [0.0, 0.0, 0.0]),
            atom("H1", "H", 1, [0.1, 0.0, 0.0]),
            atom("O1", "O", 2, [0.5, 0.5, 0.5]),
        ];
        let opts = BondingOptions {
            molecular: false,
            tolerance: 0.45,
        };
        let mut r = Resolver::new(&mut atoms, &cell, &opts);
        r.bond_hydrogens();
        assert_eq!(r.bonds, vec![Bond::new(0, 1, BondOrder::Single)]);

        // a second pass over the same atoms adds nothing
        r.atoms[1].position = [0.5, 0.5, 0.4];
        r.bond_hydrogens();
        assert_eq!(r.bonds.len(), 1);

        // a hydrogen added later is still bonded
        r.atoms.push(atom("H2", "H", 3, [0.5, 0.5, 0.6]));
        r.connected.push(BTreeSet::new());
        r.bond_hydrogens();
        assert_eq!(r.bonds.len(), 2);
        assert!(r.bonds.contains(&Bond::new(2, 3, BondOrder::Single)));
    }
}

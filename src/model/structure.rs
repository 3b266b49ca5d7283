// src/model/structure.rs

use super::unit_cell::UnitCell;
use serde::Serialize;
use std::collections::BTreeSet;

/// Which displacement convention an anisotropic tensor was written in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AdpKind {
    U,
    B,
    Beta,
}

/// Anisotropic displacement components in file order `11 22 33 12 13 23`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Adp {
    pub kind: AdpKind,
    pub values: [f64; 6],
}

impl Adp {
    pub fn new(kind: AdpKind) -> Self {
        Self {
            kind,
            values: [0.0; 6],
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct AtomRecord {
    pub element: String,
    pub label: String,
    pub formal_charge: Option<i32>,
    /// Fractional while the model still has a cell to expand against,
    /// Cartesian once the model is finalized.
    pub position: [f64; 3],
    /// Fractional coordinates kept after finalization, when a cell exists.
    pub fractional: Option<[f64; 3]>,
    pub occupancy: f64,
    pub b_iso: Option<f64>,
    pub u_iso: Option<f64>,
    pub adp: Option<Adp>,
    /// Cartesian U tensor, filled in when the model is finalized.
    pub tensor: Option<[[f64; 3]; 3]>,
    pub alt_loc: Option<char>,
    pub disorder_assembly: Option<String>,
    pub chain_id: Option<String>,
    pub residue: Option<String>,
    pub sequence_number: Option<i32>,
    pub insertion_code: Option<char>,
    pub is_hetero: bool,
    pub ignore_symmetry: bool,
    pub site_multiplicity: Option<i32>,
    pub subsystem: Option<String>,
    /// Index of the asymmetric-unit atom this one was generated from.
    pub site: usize,
    /// Operator indices that produced this atom or map onto it. Holds both
    /// `cell * n_ops + op` and the bare `op`.
    pub symmetry: BTreeSet<usize>,
    /// Modulation displacement (Å, Cartesian after finalization).
    pub displacement: Option<[f64; 3]>,
    pub keep: bool,
}

impl AtomRecord {
    pub fn new(label: &str) -> Self {
        Self {
            element: String::new(),
            label: label.to_string(),
            formal_charge: None,
            position: [f64::NAN; 3],
            fractional: None,
            occupancy: 1.0,
            b_iso: None,
            u_iso: None,
            adp: None,
            tensor: None,
            alt_loc: None,
            disorder_assembly: None,
            chain_id: None,
            residue: None,
            sequence_number: None,
            insertion_code: None,
            is_hetero: false,
            ignore_symmetry: false,
            site_multiplicity: None,
            subsystem: None,
            site: 0,
            symmetry: BTreeSet::new(),
            displacement: None,
            keep: true,
        }
    }

    pub fn has_position(&self) -> bool {
        self.position.iter().all(|v| v.is_finite())
    }

    pub fn is_hydrogen(&self) -> bool {
        matches!(self.element.as_str(), "H" | "D" | "T")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum BondOrder {
    Single,
    Double,
    Triple,
    Aromatic,
}

impl BondOrder {
    /// CCDC bond-type code: `S`, `D`, `T`, `A`. Anything else is `None`.
    pub fn from_ccdc(code: &str) -> Option<Self> {
        match code.to_ascii_uppercase().as_str() {
            "S" => Some(BondOrder::Single),
            "D" => Some(BondOrder::Double),
            "T" => Some(BondOrder::Triple),
            "A" => Some(BondOrder::Aromatic),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Bond {
    pub a: usize,
    pub b: usize,
    pub order: BondOrder,
}

impl Bond {
    /// Stores the pair with `a <= b` so bonds compare independently of
    /// direction.
    pub fn new(i: usize, j: usize, order: BondOrder) -> Self {
        let (a, b) = if i <= j { (i, j) } else { (j, i) };
        Self { a, b, order }
    }
}

/// An explicit bond-loop record, resolved against atom labels during
/// bonding and then dropped.
#[derive(Clone, Debug, PartialEq)]
pub struct BondHint {
    pub label_a: String,
    pub label_b: String,
    pub distance: f64,
    pub tolerance: f64,
    pub order: BondOrder,
}

/// One reconstructed model, usually one `data_` block.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Model {
    pub name: String,
    pub atoms: Vec<AtomRecord>,
    pub bonds: Vec<Bond>,
    pub unit_cell: Option<UnitCell>,
    /// Cell reported for display when a subsystem was selected with `MODCELL=`.
    pub display_cell: Option<UnitCell>,
    pub operators: Vec<String>,
    pub space_group: Option<String>,
    pub chemical_name: Option<String>,
    pub formula: Option<String>,
    pub structural_formula: Option<String>,
    pub modulation_dimension: usize,
    pub is_modulated: bool,
    /// One `floor(q1·r)` line per atom with nonzero occupancy.
    pub modt: Option<String>,
    pub notes: Vec<String>,
}

impl Model {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn kept_atoms(&self) -> impl Iterator<Item = &AtomRecord> {
        self.atoms.iter().filter(|a| a.keep)
    }

    pub fn note(&mut self, text: impl Into<String>) {
        let text = text.into();
        log::info!("{}: {}", self.name, text);
        self.notes.push(text);
    }

    /// Last atom carrying `label`, as a later row with the same label
    /// shadows an earlier one.
    pub fn atom_index(&self, label: &str) -> Option<usize> {
        self.atoms.iter().rposition(|a| a.label == label)
    }
}

/// Everything one reader invocation produced.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AtomSetCollection {
    pub models: Vec<Model>,
    pub notes: Vec<String>,
    pub diagnostics: Vec<crate::io::error::Diagnostic>,
}

impl AtomSetCollection {
    pub fn atom_count(&self) -> usize {
        self.models.iter().map(|m| m.kept_atoms().count()).sum()
    }
}

// src/utils/report.rs

use crate::model::structure::{AtomSetCollection, Model};
use crate::utils::geometry;
use std::collections::BTreeMap;

const MAX_ROWS: usize = 20;

/// Element counts of the kept atoms, alphabetical, e.g. `C2 H6 O1`.
pub fn formula(model: &Model) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for atom in model.kept_atoms() {
        *counts.entry(atom.element.as_str()).or_insert(0) += 1;
    }
    counts
        .iter()
        .map(|(el, n)| format!("{}{}", el, n))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text summary of one model: header lines, then an atom table.
pub fn model_summary(model: &Model, filename: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("File: {}\n", filename));
    out.push_str(&format!("Model: {}\n", model.name));
    out.push_str(&format!("Formula: {}\n", formula(model)));
    if let Some(sg) = &model.space_group {
        out.push_str(&format!("Space group: {}\n", sg));
    }
    if let Some(cell) = &model.unit_cell {
        let p = cell.parameters;
        out.push_str(&format!(
            "Cell: {:.4} {:.4} {:.4}  {:.2} {:.2} {:.2}\n",
            p[0], p[1], p[2], p[3], p[4], p[5]
        ));
    }
    if model.is_modulated {
        out.push_str(&format!("Modulation dimension: {}\n", model.modulation_dimension));
    }
    out.push_str(&format!("Operators: {}\n", model.operators.len()));
    out.push_str("------------------------------------------------------------------\n");
    out.push_str(&format!(
        "{:<8} {:<8} {:<8} {:<10} {:<10} {:<10} {:<6}\n",
        "Index", "Label", "Element", "X", "Y", "Z", "Occ"
    ));
    out.push_str("------------------------------------------------------------------\n");

    let kept: Vec<_> = model.kept_atoms().collect();
    for (i, atom) in kept.iter().take(MAX_ROWS).enumerate() {
        out.push_str(&format!(
            "{:<8} {:<8} {:<8} {:<10.4} {:<10.4} {:<10.4} {:<6.3}\n",
            i,
            atom.label,
            atom.element,
            atom.position[0],
            atom.position[1],
            atom.position[2],
            atom.occupancy
        ));
    }
    if kept.len() > MAX_ROWS {
        out.push_str(&format!("... and {} more atoms.\n", kept.len() - MAX_ROWS));
    }
    out
}

/// Bond lengths, then the angles between bonds that share an atom.
pub fn bond_geometry(model: &Model) -> String {
    if model.bonds.is_empty() {
        return "No bonds.\n".to_string();
    }
    let mut out = String::new();
    let mut by_atom: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for bond in model.bonds.iter().take(MAX_ROWS) {
        let a = &model.atoms[bond.a];
        let b = &model.atoms[bond.b];
        let d = geometry::calculate_distance(a.position, b.position);
        out.push_str(&format!(
            "{:<6}-{:<6} {:>8.4} Å  {:?}\n",
            a.label, b.label, d, bond.order
        ));
        by_atom.entry(bond.a).or_default().push(bond.b);
        by_atom.entry(bond.b).or_default().push(bond.a);
    }
    if model.bonds.len() > MAX_ROWS {
        out.push_str(&format!("... and {} more bonds.\n", model.bonds.len() - MAX_ROWS));
    }
    for (center, nbrs) in &by_atom {
        let c = &model.atoms[*center];
        for (i, &p) in nbrs.iter().enumerate() {
            for &q in &nbrs[i + 1..] {
                let angle = geometry::calculate_angle(
                    model.atoms[p].position,
                    c.position,
                    model.atoms[q].position,
                );
                out.push_str(&format!(
                    "{}-{}-{}: {:.2}°\n",
                    model.atoms[p].label, c.label, model.atoms[q].label, angle
                ));
            }
        }
    }
    out
}

/// Every model, then notes and diagnostics.
pub fn collection_summary(collection: &AtomSetCollection, filename: &str) -> String {
    let mut out = String::new();
    for model in &collection.models {
        out.push_str(&model_summary(model, filename));
        if !model.bonds.is_empty() {
            out.push_str(&bond_geometry(model));
        }
        for note in &model.notes {
            out.push_str(&format!("  {}\n", note));
        }
        out.push('\n');
    }
    for note in &collection.notes {
        out.push_str(&format!("{}\n", note));
    }
    if !collection.diagnostics.is_empty() {
        out.push_str(&format!("{} diagnostics:\n", collection.diagnostics.len()));
        for d in &collection.diagnostics {
            out.push_str(&format!("  {}\n", d));
        }
    }
    out
}

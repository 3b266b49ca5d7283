// src/io/mod.rs
pub mod atom_site;
pub mod cif;
pub mod error;
pub mod fields;
pub mod loop_reader;
pub mod mscif;
pub mod tokenizer;

use crate::config::ReaderOptions;
use crate::model::structure::AtomSetCollection;
use error::CifError;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufReader, BufWriter};

/// Reads CIF text already in memory.
pub fn parse_str(text: &str, opts: &ReaderOptions) -> Result<AtomSetCollection, CifError> {
    cif::read(text.as_bytes(), opts)
}

/// Reads one file. The format is detected from content, so `.cif`,
/// `.mcif` and extension-less files all go through the same reader.
pub fn load_structure(path: &str, opts: &ReaderOptions) -> Result<AtomSetCollection, CifError> {
    let file = File::open(path)?;
    log::info!("reading {}", path);
    cif::read(BufReader::new(file), opts)
}

/// Reads several files in parallel; results come back in input order.
pub fn load_batch(
    paths: &[String],
    opts: &ReaderOptions,
) -> Vec<(String, Result<AtomSetCollection, CifError>)> {
    paths
        .par_iter()
        .map(|p| (p.clone(), load_structure(p, opts)))
        .collect()
}

pub fn save_json(path: &str, collection: &AtomSetCollection) -> Result<(), CifError> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, collection)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::error::DiagnosticKind;
    use nalgebra::Vector3;

    fn parse(text: &str, filter: &str) -> AtomSetCollection {
        parse_str(text, &ReaderOptions::from_filter(filter)).unwrap()
    }

    #[test]
    fn test_molecule_through_bond_record() {
        // a = 2.0 so the (1,0,0) image sits exactly at the 2.0 Å bond distance
        let text = "data_dimer\n\
            _cell_length_a 2.0\n_cell_length_b 2.0\n_cell_length_c 2.0\n\
            _cell_angle_alpha 90\n_cell_angle_beta 90\n_cell_angle_gamma 90\n\
            loop_\n_symmetry_equiv_pos_as_xyz\nx,y,z\n\
            loop_\n_atom_site_label\n_atom_site_fract_x\n_atom_site_fract_y\n_atom_site_fract_z\n\
            C1 0 0 0\n\
            loop_\n_geom_bond_atom_site_label_1\n_geom_bond_atom_site_label_2\n_geom_bond_distance\n\
            C1 C1 2.0(1)\n";
        let c = parse(text, "MOLECUL");
        let m = &c.models[0];
        assert!(m.unit_cell.is_none());
        let kept: Vec<_> = m.kept_atoms().collect();
        assert_eq!(kept.len(), 2);
        assert_eq!(m.bonds.len(), 1);
        let b = m.bonds[0];
        let p = Vector3::from(m.atoms[b.a].position);
        let q = Vector3::from(m.atoms[b.b].position);
        assert!(((p - q).norm() - 2.0).abs() < 1e-9);
        assert!(kept.iter().all(|a| a.fractional.is_none()));
    }

    #[test]
    fn test_occupancy_wave_is_clamped() {
        let text = "data_mod\n\
            _cell_length_a 5\n_cell_length_b 5\n_cell_length_c 5\n\
            _cell_modulation_dimension 1\n\
            loop_\n_cell_wave_vector_seq_id\n_cell_wave_vector_x\n_cell_wave_vector_y\n_cell_wave_vector_z\n\
            1 0.3 0 0\n\
            loop_\n_space_group_symop_ssg_operation_algebraic\nx1,x2,x3,x4\n\
            loop_\n_atom_site_label\n_atom_site_type_symbol\n_atom_site_fract_x\n_atom_site_fract_y\n_atom_site_fract_z\n_atom_site_occupancy\n\
            C1 C 0 0 0 1.0\n\
            loop_\n_atom_site_occ_Fourier_atom_site_label\n_atom_site_occ_Fourier_wave_vector_seq_id\n_atom_site_occ_Fourier_param_cos\n_atom_site_occ_Fourier_param_sin\n\
            C1 1 0.1 0\n";
        let c = parse(text, "");
        let m = &c.models[0];
        assert!(m.is_modulated);
        assert_eq!(m.modulation_dimension, 1);
        assert_eq!(m.atoms.len(), 1);
        assert_eq!(m.atoms[0].occupancy, 1.0);
        assert!(m.notes.iter().any(|n| n == "1 modulations for 1 atoms"));

        // the average structure ignores the wave entirely
        let avg = parse(text, "MODAVE");
        assert!(!avg.models[0].is_modulated);
        assert!(avg.models[0].notes.iter().all(|n| !n.contains("modulations")));
    }

    #[test]
    fn test_cartesian_wins_over_fractional() {
        let text = "data_c\n_cell_length_a 10\n_cell_length_b 10\n_cell_length_c 10\n\
            loop_\n_atom_site_label\n_atom_site_fract_x\n_atom_site_fract_y\n_atom_site_fract_z\n\
            _atom_site_Cartn_x\n_atom_site_Cartn_y\n_atom_site_Cartn_z\n\
            N1 0.9 0.9 0.9 1.0 2.0 3.0\n";
        let c = parse(text, "");
        let a = &c.models[0].atoms[0];
        assert!((a.position[0] - 1.0).abs() < 1e-9);
        assert!((a.position[2] - 3.0).abs() < 1e-9);
        let f = a.fractional.unwrap();
        assert!((f[1] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_mmcif_models_and_no_expansion() {
        let text = "data_1ABC\n\
            _cell.length_a 20\n_cell.length_b 20\n_cell.length_c 20\n\
            loop_\n_symmetry_equiv_pos_as_xyz\nx,y,z\n-x,-y,-z\n\
            loop_\n_atom_site.group_PDB\n_atom_site.label_atom_id\n_atom_site.auth_atom_id\n\
            _atom_site.auth_comp_id\n_atom_site.auth_asym_id\n_atom_site.auth_seq_id\n\
            _atom_site.Cartn_x\n_atom_site.Cartn_y\n_atom_site.Cartn_z\n_atom_site.type_symbol\n\
            _atom_site.pdbx_PDB_model_num\n\
            ATOM N N ALA A 1 1.0 1.0 1.0 N 1\n\
            HETATM O O HOH B 2 3.0 1.0 1.0 O 1\n\
            ATOM N N ALA A 1 1.1 1.0 1.0 N 2\n";
        let c = parse(text, "");
        assert_eq!(c.models.len(), 2);
        assert_eq!(c.models[0].name, "1ABC.1");
        assert_eq!(c.models[1].name, "1ABC.2");
        let first = &c.models[0];
        // no symmetry expansion without an explicit CELLS=
        assert_eq!(first.atoms.len(), 2);
        assert!(first.atoms[1].is_hetero);
        assert_eq!(first.atoms[0].residue.as_deref(), Some("ALA"));
        assert_eq!(first.atoms[0].chain_id.as_deref(), Some("A"));
        assert_eq!(first.atoms[0].sequence_number, Some(1));
        assert!((first.atoms[0].position[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_diagnostics_do_not_stop_the_parse() {
        let text = "data_d\n_cell_length_a 6\n_cell_length_b 6\n_cell_length_c 6\n\
            loop_\n_symmetry_equiv_pos_as_xyz\nx,y,z\nnonsense\n\
            loop_\n_atom_site_label\n_atom_site_fract_x\n_atom_site_fract_y\n_atom_site_fract_z\n\
            C1 0.1 0.1 0.1\nC2 0.2 ? 0.2\n";
        let c = parse(text, "");
        assert_eq!(c.models[0].atoms.len(), 1);
        let kinds: Vec<DiagnosticKind> = c.diagnostics.iter().map(|d| d.kind).collect();
        assert!(kinds.contains(&DiagnosticKind::IncompleteRecord));
        assert!(kinds.contains(&DiagnosticKind::SymmetryOperatorParse));
    }

    #[test]
    fn test_non_utf8_name_still_reads_atoms() {
        let bytes: &[u8] = b"data_l1\n_chemical_name_common 'caf\xe9'\n\
            _cell_length_a 4\n_cell_length_b 4\n_cell_length_c 4\n\
            loop_\n_atom_site_label\n_atom_site_fract_x\n_atom_site_fract_y\n_atom_site_fract_z\n\
            Fe1 0 0 0\n";
        let c = cif::read(bytes, &ReaderOptions::default()).unwrap();
        assert_eq!(c.atom_count(), 1);
        assert_eq!(c.models[0].chemical_name.as_deref(), Some("caf\u{fffd}"));
        assert_eq!(c.diagnostics[0].kind, DiagnosticKind::GrammarWarning);
    }

    #[test]
    fn test_batch_keeps_order_and_reports_missing_files() {
        let dir = std::env::temp_dir();
        let good = dir.join("cview_mscif_batch_good.cif");
        std::fs::write(
            &good,
            "data_g\n_cell_length_a 3\n_cell_length_b 3\n_cell_length_c 3\nloop_\n_atom_site_label\n_atom_site_fract_x\n_atom_site_fract_y\n_atom_site_fract_z\nAr1 0 0 0\n",
        )
        .unwrap();
        let paths = vec![
            good.to_string_lossy().into_owned(),
            dir.join("cview_mscif_missing.cif").to_string_lossy().into_owned(),
        ];
        let results = load_batch(&paths, &ReaderOptions::default());
        assert_eq!(results[0].0, paths[0]);
        assert_eq!(results[0].1.as_ref().unwrap().atom_count(), 1);
        assert!(matches!(results[1].1, Err(CifError::Io { .. })));
        let _ = std::fs::remove_file(good);
    }
}

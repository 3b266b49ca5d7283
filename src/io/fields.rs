// src/io/fields.rs
//
// Canonical loop schemas and the key/loop routing tables. All of this is
// read-only after first use, so one copy is shared by every reader thread.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Normalizes a key so that mmCIF (`_atom_site.Cartn_x`) and classic CIF
/// (`_atom_site_Cartn_x`) spellings compare equal.
pub fn fix_key(key: &str) -> String {
    key.replace('.', "_").to_lowercase()
}

/// An ordered list of canonical field names with a lazily built name index.
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [&'static str],
    index: OnceLock<HashMap<&'static str, usize>>,
}

impl Schema {
    pub const fn new(name: &'static str, fields: &'static [&'static str]) -> Self {
        Self {
            name,
            fields,
            index: OnceLock::new(),
        }
    }

    /// Schema index of an already normalized key.
    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.index
            .get_or_init(|| self.fields.iter().enumerate().map(|(i, f)| (*f, i)).collect())
            .get(key)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// --- 1. ATOM SITE ---

pub mod atom_site {
    pub const TYPE_SYMBOL: usize = 0;
    pub const LABEL: usize = 1;
    pub const AUTH_ATOM: usize = 2;
    pub const FRACT_X: usize = 3;
    pub const FRACT_Y: usize = 4;
    pub const FRACT_Z: usize = 5;
    pub const CARTN_X: usize = 6;
    pub const CARTN_Y: usize = 7;
    pub const CARTN_Z: usize = 8;
    pub const OCCUPANCY: usize = 9;
    pub const B_ISO: usize = 10;
    pub const COMP_ID: usize = 11;
    pub const AUTH_ASYM_ID: usize = 12;
    pub const SEQ_ID: usize = 13;
    pub const INS_CODE: usize = 14;
    pub const ALT_ID: usize = 15;
    pub const GROUP_PDB: usize = 16;
    pub const MODEL_NO: usize = 17;
    pub const CALC_FLAG: usize = 18;
    pub const DISORDER_GROUP: usize = 19;
    pub const ANISO_LABEL: usize = 20;
    pub const ANISO_MMCIF_ID: usize = 21;
    pub const ANISO_U11: usize = 22;
    pub const ANISO_U23: usize = 27;
    pub const ANISO_MMCIF_U11: usize = 28;
    pub const ANISO_MMCIF_U23: usize = 33;
    pub const U_ISO_OR_EQUIV: usize = 34;
    pub const ANISO_B11: usize = 35;
    pub const ANISO_B23: usize = 40;
    pub const ANISO_BETA_11: usize = 41;
    pub const ANISO_BETA_23: usize = 46;
    pub const ADP_TYPE: usize = 47;
    pub const CHEM_COMP_AC_ID: usize = 48;
    pub const CHEM_COMP_AC_NAME: usize = 49;
    pub const CHEM_COMP_AC_SYM: usize = 50;
    pub const CHEM_COMP_AC_CHARGE: usize = 51;
    pub const CHEM_COMP_AC_X: usize = 52;
    pub const CHEM_COMP_AC_Y: usize = 53;
    pub const CHEM_COMP_AC_Z: usize = 54;
    pub const CHEM_COMP_AC_X_IDEAL: usize = 55;
    pub const CHEM_COMP_AC_Y_IDEAL: usize = 56;
    pub const CHEM_COMP_AC_Z_IDEAL: usize = 57;
    pub const DISORDER_ASSEMBLY: usize = 58;
    pub const ASYM_ID: usize = 59;
    pub const SUBSYS_ID: usize = 60;
    pub const SITE_MULT: usize = 61;
    pub const THERMAL_TYPE: usize = 62;
}

pub static ATOM_SITE: Schema = Schema::new(
    "atom_site",
    &[
        "_atom_site_type_symbol",
        "_atom_site_label",
        "_atom_site_auth_atom_id",
        "_atom_site_fract_x",
        "_atom_site_fract_y",
        "_atom_site_fract_z",
        "_atom_site_cartn_x",
        "_atom_site_cartn_y",
        "_atom_site_cartn_z",
        "_atom_site_occupancy",
        "_atom_site_b_iso_or_equiv",
        "_atom_site_auth_comp_id",
        "_atom_site_auth_asym_id",
        "_atom_site_auth_seq_id",
        "_atom_site_pdbx_pdb_ins_code",
        "_atom_site_label_alt_id",
        "_atom_site_group_pdb",
        "_atom_site_pdbx_pdb_model_num",
        "_atom_site_calc_flag",
        "_atom_site_disorder_group",
        "_atom_site_aniso_label",
        "_atom_site_anisotrop_id",
        "_atom_site_aniso_u_11",
        "_atom_site_aniso_u_22",
        "_atom_site_aniso_u_33",
        "_atom_site_aniso_u_12",
        "_atom_site_aniso_u_13",
        "_atom_site_aniso_u_23",
        "_atom_site_anisotrop_u[1][1]",
        "_atom_site_anisotrop_u[2][2]",
        "_atom_site_anisotrop_u[3][3]",
        "_atom_site_anisotrop_u[1][2]",
        "_atom_site_anisotrop_u[1][3]",
        "_atom_site_anisotrop_u[2][3]",
        "_atom_site_u_iso_or_equiv",
        "_atom_site_aniso_b_11",
        "_atom_site_aniso_b_22",
        "_atom_site_aniso_b_33",
        "_atom_site_aniso_b_12",
        "_atom_site_aniso_b_13",
        "_atom_site_aniso_b_23",
        "_atom_site_aniso_beta_11",
        "_atom_site_aniso_beta_22",
        "_atom_site_aniso_beta_33",
        "_atom_site_aniso_beta_12",
        "_atom_site_aniso_beta_13",
        "_atom_site_aniso_beta_23",
        "_atom_site_adp_type",
        "_chem_comp_atom_comp_id",
        "_chem_comp_atom_atom_id",
        "_chem_comp_atom_type_symbol",
        "_chem_comp_atom_charge",
        "_chem_comp_atom_model_cartn_x",
        "_chem_comp_atom_model_cartn_y",
        "_chem_comp_atom_model_cartn_z",
        "_chem_comp_atom_pdbx_model_cartn_x_ideal",
        "_chem_comp_atom_pdbx_model_cartn_y_ideal",
        "_chem_comp_atom_pdbx_model_cartn_z_ideal",
        "_atom_site_disorder_assembly",
        "_atom_site_label_asym_id",
        "_atom_site_subsystem_code",
        "_atom_site_symmetry_multiplicity",
        "_atom_site_thermal_displace_type",
    ],
);

// --- 2. SMALL LOOPS ---

pub mod atom_type {
    pub const SYMBOL: usize = 0;
    pub const OXIDATION_NUMBER: usize = 1;
}

pub static ATOM_TYPE: Schema = Schema::new(
    "atom_type",
    &["_atom_type_symbol", "_atom_type_oxidation_number"],
);

pub mod symop {
    pub const OPERATION_XYZ: usize = 0;
    pub const EQUIV_POS_XYZ: usize = 1;
    pub const SSG_EQUIV_XYZ: usize = 2;
    pub const SSG_OPERATION: usize = 3;
}

pub static SYMMETRY_OPERATORS: Schema = Schema::new(
    "symmetry_operators",
    &[
        "_space_group_symop_operation_xyz",
        "_symmetry_equiv_pos_as_xyz",
        "_symmetry_ssg_equiv_pos_as_xyz",
        "_space_group_symop_ssg_operation_algebraic",
    ],
);

pub mod geom_bond {
    pub const LABEL_1: usize = 0;
    pub const LABEL_2: usize = 1;
    pub const DISTANCE: usize = 2;
    pub const CCDC_TYPE: usize = 3;
}

pub static GEOM_BOND: Schema = Schema::new(
    "geom_bond",
    &[
        "_geom_bond_atom_site_label_1",
        "_geom_bond_atom_site_label_2",
        "_geom_bond_distance",
        "_ccdc_geom_bond_type",
    ],
);

pub mod citation {
    pub const ID: usize = 0;
    pub const TITLE: usize = 1;
}

pub static CITATION: Schema = Schema::new("citation", &["_citation_id", "_citation_title"]);

// --- 3. MODULATION ---

pub mod modulation {
    pub const WV_ID: usize = 0;
    pub const WV_X: usize = 1;
    pub const WV_Y: usize = 2;
    pub const WV_Z: usize = 3;
    pub const FWV_ID: usize = 4;
    pub const FWV_X: usize = 5;
    pub const FWV_Y: usize = 6;
    pub const FWV_Z: usize = 7;
    pub const FWV_Q1_COEF: usize = 8;
    pub const FWV_Q2_COEF: usize = 9;
    pub const FWV_Q3_COEF: usize = 10;
    pub const DISP_LABEL: usize = 11;
    pub const DISP_AXIS: usize = 12;
    pub const DISP_SEQ_ID: usize = 13;
    pub const DISP_COS: usize = 14;
    pub const DISP_SIN: usize = 15;
    pub const DISP_MODULUS: usize = 16;
    pub const DISP_PHASE: usize = 17;
    pub const OCC_LABEL: usize = 18;
    pub const OCC_SEQ_ID: usize = 19;
    pub const OCC_COS: usize = 20;
    pub const OCC_SIN: usize = 21;
    pub const OCC_MODULUS: usize = 22;
    pub const OCC_PHASE: usize = 23;
    pub const SAW_LABEL: usize = 24;
    pub const SAW_AX: usize = 25;
    pub const SAW_AY: usize = 26;
    pub const SAW_AZ: usize = 27;
    pub const SAW_C: usize = 28;
    pub const SAW_W: usize = 29;
    pub const CRENEL_LABEL: usize = 30;
    pub const CRENEL_C: usize = 31;
    pub const CRENEL_W: usize = 32;
    pub const U_LABEL: usize = 33;
    pub const U_TENS: usize = 34;
    pub const U_SEQ_ID: usize = 35;
    pub const U_COS: usize = 36;
    pub const U_SIN: usize = 37;
    pub const U_MODULUS: usize = 38;
    pub const U_PHASE: usize = 39;
    pub const FD_ID: usize = 40;
    pub const FO_ID: usize = 41;
    pub const FU_ID: usize = 42;
    pub const FDP_ID: usize = 43;
    pub const FOP_ID: usize = 44;
    pub const FUP_ID: usize = 45;
    pub const JANA_OCC_ABS_LABEL: usize = 46;
    pub const JANA_OCC_ABS_O_0: usize = 47;
    pub const DEPR_FD_COS: usize = 48;
    pub const DEPR_FD_SIN: usize = 49;
    pub const DEPR_FO_COS: usize = 50;
    pub const DEPR_FO_SIN: usize = 51;
    pub const DEPR_FU_COS: usize = 52;
    pub const DEPR_FU_SIN: usize = 53;
}

pub static MODULATION: Schema = Schema::new(
    "modulation",
    &[
        "_cell_wave_vector_seq_id",
        "_cell_wave_vector_x",
        "_cell_wave_vector_y",
        "_cell_wave_vector_z",
        "_atom_site_fourier_wave_vector_seq_id",
        "_atom_site_fourier_wave_vector_x",
        "_atom_site_fourier_wave_vector_y",
        "_atom_site_fourier_wave_vector_z",
        "_jana_atom_site_fourier_wave_vector_q1_coeff",
        "_jana_atom_site_fourier_wave_vector_q2_coeff",
        "_jana_atom_site_fourier_wave_vector_q3_coeff",
        "_atom_site_displace_fourier_atom_site_label",
        "_atom_site_displace_fourier_axis",
        "_atom_site_displace_fourier_wave_vector_seq_id",
        "_atom_site_displace_fourier_param_cos",
        "_atom_site_displace_fourier_param_sin",
        "_atom_site_displace_fourier_param_modulus",
        "_atom_site_displace_fourier_param_phase",
        "_atom_site_occ_fourier_atom_site_label",
        "_atom_site_occ_fourier_wave_vector_seq_id",
        "_atom_site_occ_fourier_param_cos",
        "_atom_site_occ_fourier_param_sin",
        "_atom_site_occ_fourier_param_modulus",
        "_atom_site_occ_fourier_param_phase",
        "_atom_site_displace_special_func_atom_site_label",
        "_atom_site_displace_special_func_sawtooth_ax",
        "_atom_site_displace_special_func_sawtooth_ay",
        "_atom_site_displace_special_func_sawtooth_az",
        "_atom_site_displace_special_func_sawtooth_c",
        "_atom_site_displace_special_func_sawtooth_w",
        "_atom_site_occ_special_func_atom_site_label",
        "_atom_site_occ_special_func_crenel_c",
        "_atom_site_occ_special_func_crenel_w",
        "_atom_site_u_fourier_atom_site_label",
        "_atom_site_u_fourier_tens_elem",
        "_atom_site_u_fourier_wave_vector_seq_id",
        "_atom_site_u_fourier_param_cos",
        "_atom_site_u_fourier_param_sin",
        "_atom_site_u_fourier_param_modulus",
        "_atom_site_u_fourier_param_phase",
        "_atom_site_displace_fourier_id",
        "_atom_site_occ_fourier_id",
        "_atom_site_u_fourier_id",
        "_atom_site_displace_fourier_param_id",
        "_atom_site_occ_fourier_param_id",
        "_atom_site_u_fourier_param_id",
        "_jana_atom_site_occ_fourier_absolute_site_label",
        "_jana_atom_site_occ_fourier_absolute",
        "_atom_site_displace_fourier_cos",
        "_atom_site_displace_fourier_sin",
        "_atom_site_occ_fourier_cos",
        "_atom_site_occ_fourier_sin",
        "_atom_site_u_fourier_cos",
        "_atom_site_u_fourier_sin",
    ],
);

pub const CELL_PARAMETERS: [&str; 6] = [
    "_cell_length_a",
    "_cell_length_b",
    "_cell_length_c",
    "_cell_angle_alpha",
    "_cell_angle_beta",
    "_cell_angle_gamma",
];

/// Cartesian-to-fractional matrix items, row-major with the translation
/// as the fourth column.
pub const FRACT_TRANSFORM: [&str; 12] = [
    "x[1][1]", "x[1][2]", "x[1][3]", "r[1]", "x[2][1]", "x[2][2]", "x[2][3]", "r[2]", "x[3][1]",
    "x[3][2]", "x[3][3]", "r[3]",
];

// --- 4. ROUTING ---

#[derive(Debug, Clone, Copy)]
enum KeyMatch {
    Prefix(&'static str),
    Exact(&'static str),
    Contains(&'static str),
}

impl KeyMatch {
    fn matches(&self, key: &str) -> bool {
        match self {
            KeyMatch::Prefix(p) => key.starts_with(p),
            KeyMatch::Exact(p) => key == *p,
            KeyMatch::Contains(p) => key.contains(p),
        }
    }
}

/// Handler selected for a `loop_` by its first (normalized) field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Modulation,
    AtomSite,
    ChemCompAtom,
    SymmetryOperators,
    Citation,
    AtomType,
    Subsystem,
    GeomBond,
    /// mmCIF polymer/assembly tables; recognized but not assembled.
    Polymer,
}

struct LoopRoute {
    matcher: KeyMatch,
    kind: LoopKind,
    modulated_only: bool,
}

const fn route(matcher: KeyMatch, kind: LoopKind, modulated_only: bool) -> LoopRoute {
    LoopRoute {
        matcher,
        kind,
        modulated_only,
    }
}

// First match wins: the modulation routes must come before `_atom_site_`.
static LOOP_ROUTES: &[LoopRoute] = &[
    route(KeyMatch::Prefix("_cell_wave"), LoopKind::Modulation, true),
    route(KeyMatch::Contains("fourier"), LoopKind::Modulation, true),
    route(KeyMatch::Contains("_special_func"), LoopKind::Modulation, true),
    route(KeyMatch::Prefix("_atom_site_"), LoopKind::AtomSite, false),
    route(KeyMatch::Exact("_chem_comp_atom_comp_id"), LoopKind::ChemCompAtom, false),
    route(KeyMatch::Prefix("_symmetry_equiv_pos"), LoopKind::SymmetryOperators, false),
    route(KeyMatch::Prefix("_space_group_symop"), LoopKind::SymmetryOperators, false),
    route(KeyMatch::Prefix("_symmetry_ssg_equiv"), LoopKind::SymmetryOperators, false),
    route(KeyMatch::Prefix("_citation"), LoopKind::Citation, false),
    route(KeyMatch::Prefix("_struct_"), LoopKind::Polymer, false),
    route(KeyMatch::Prefix("_pdbx_"), LoopKind::Polymer, false),
    route(KeyMatch::Prefix("_atom_type"), LoopKind::AtomType, false),
    route(KeyMatch::Exact("_cell_subsystem_code"), LoopKind::Subsystem, true),
    route(KeyMatch::Prefix("_geom_bond"), LoopKind::GeomBond, false),
];

pub fn route_loop(first_key: &str, modulated: bool) -> Option<LoopKind> {
    LOOP_ROUTES
        .iter()
        .filter(|r| modulated || !r.modulated_only)
        .find(|r| r.matcher.matches(first_key))
        .map(|r| r.kind)
}

/// Handler selected for a singleton `_key value` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    ChemicalName,
    StructuralFormula,
    Formula,
    ModulationDimension,
    CitationTitle,
    CellParameter,
    SpaceGroupName,
    FractTransform,
}

static KEY_ROUTES: &[(KeyMatch, KeyKind)] = &[
    (KeyMatch::Prefix("_chemical_name"), KeyKind::ChemicalName),
    (KeyMatch::Exact("_chem_comp_name"), KeyKind::ChemicalName),
    (KeyMatch::Prefix("_chemical_formula_structural"), KeyKind::StructuralFormula),
    (KeyMatch::Prefix("_chemical_formula_moiety"), KeyKind::StructuralFormula),
    (KeyMatch::Prefix("_chemical_formula_sum"), KeyKind::Formula),
    (KeyMatch::Exact("_chem_comp_formula"), KeyKind::Formula),
    (KeyMatch::Exact("_cell_modulation_dimension"), KeyKind::ModulationDimension),
    (KeyMatch::Exact("_citation_title"), KeyKind::CitationTitle),
    (KeyMatch::Prefix("_cell_"), KeyKind::CellParameter),
    (KeyMatch::Prefix("_symmetry_space_group_name_h-m"), KeyKind::SpaceGroupName),
    (KeyMatch::Prefix("_space_group_name_h-m"), KeyKind::SpaceGroupName),
    (KeyMatch::Prefix("_symmetry_space_group_name_hall"), KeyKind::SpaceGroupName),
    (KeyMatch::Prefix("_space_group_name_hall"), KeyKind::SpaceGroupName),
    (KeyMatch::Contains("_ssg_name"), KeyKind::SpaceGroupName),
    (KeyMatch::Prefix("_atom_sites_fract_tran"), KeyKind::FractTransform),
];

pub fn route_key(key: &str) -> Option<KeyKind> {
    KEY_ROUTES
        .iter()
        .find(|(m, _)| m.matches(key))
        .map(|(_, k)| *k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_key() {
        assert_eq!(fix_key("_atom_site.Cartn_x"), "_atom_site_cartn_x");
        assert_eq!(fix_key("_Cell_Length_A"), "_cell_length_a");
    }

    #[test]
    fn test_schema_index_matches_constants() {
        assert_eq!(ATOM_SITE.len(), 63);
        assert_eq!(ATOM_SITE.index_of("_atom_site_fract_x"), Some(atom_site::FRACT_X));
        assert_eq!(
            ATOM_SITE.index_of("_atom_site_thermal_displace_type"),
            Some(atom_site::THERMAL_TYPE)
        );
        assert_eq!(ATOM_SITE.index_of("_atom_site_aniso_u_23"), Some(atom_site::ANISO_U23));
        assert_eq!(ATOM_SITE.index_of("_atom_site_not_a_field"), None);
        assert_eq!(MODULATION.len(), 54);
        assert_eq!(
            MODULATION.index_of("_jana_atom_site_occ_fourier_absolute"),
            Some(modulation::JANA_OCC_ABS_O_0)
        );
    }

    #[test]
    fn test_schema_index_shared_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| GEOM_BOND.index_of("_geom_bond_distance")))
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), Some(geom_bond::DISTANCE));
        }
    }

    #[test]
    fn test_loop_routes() {
        assert_eq!(route_loop("_atom_site_label", false), Some(LoopKind::AtomSite));
        assert_eq!(
            route_loop("_atom_site_displace_fourier_id", true),
            Some(LoopKind::Modulation)
        );
        // without modulation the same loop is just another atom_site table
        assert_eq!(
            route_loop("_atom_site_displace_fourier_id", false),
            Some(LoopKind::AtomSite)
        );
        assert_eq!(
            route_loop("_space_group_symop_operation_xyz", false),
            Some(LoopKind::SymmetryOperators)
        );
        assert_eq!(route_loop("_cell_subsystem_code", false), None);
        assert_eq!(route_loop("_cell_subsystem_code", true), Some(LoopKind::Subsystem));
        assert_eq!(route_loop("_struct_conf_type_id", false), Some(LoopKind::Polymer));
        assert_eq!(route_loop("_refln_index_h", false), None);
    }

    #[test]
    fn test_key_routes() {
        assert_eq!(route_key("_cell_length_a"), Some(KeyKind::CellParameter));
        assert_eq!(
            route_key("_cell_modulation_dimension"),
            Some(KeyKind::ModulationDimension)
        );
        assert_eq!(
            route_key("_symmetry_space_group_name_h-m"),
            Some(KeyKind::SpaceGroupName)
        );
        assert_eq!(route_key("_space_group_ssg_name"), Some(KeyKind::SpaceGroupName));
        assert_eq!(
            route_key("_atom_sites_fract_tran_matrix_11"),
            Some(KeyKind::FractTransform)
        );
        assert_eq!(route_key("_journal_year"), None);
    }
}

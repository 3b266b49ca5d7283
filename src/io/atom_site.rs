// src/io/atom_site.rs
//
// Loop handlers that fill the asymmetric unit: atom sites (with their
// anisotropic rows), atom types, symmetry operators, explicit bonds and
// citations.

use super::cif::{CifReader, Dialect};
use super::error::{CifError, DiagnosticKind};
use super::fields::{
    atom_site as a, atom_type, citation, geom_bond, symop, ATOM_SITE, ATOM_TYPE, CITATION,
    GEOM_BOND, SYMMETRY_OPERATORS,
};
use super::loop_reader::{LoopReader, LoopRow};
use super::tokenizer::{parse_esd, parse_float, parse_int, Tokenizer};
use crate::model::elements::{is_valid_symbol, is_valid_symbol2};
use crate::model::structure::{Adp, AdpKind, AtomRecord, BondHint, BondOrder, Model};
use std::io::BufRead;

const DEFAULT_BOND_ESD: f64 = 0.015;

/// How the rows of an atom-site loop are to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SiteSource {
    Cartesian,
    Fractional,
    /// Anisotropic rows matched to earlier atoms by label.
    AnisoByLabel,
    /// Anisotropic rows matched to earlier atoms by row order.
    AnisoBySequence,
}

/// Element from a type symbol such as `Fe3+` or `OH`: one letter, or two
/// when they spell an element.
fn element_from_type_symbol(symbol: &str) -> String {
    let mut chars = symbol.chars();
    let (Some(first), Some(second)) = (chars.next(), chars.next()) else {
        return symbol.to_string();
    };
    if is_valid_symbol2(first, second) {
        format!("{}{}", first, second.to_ascii_lowercase())
    } else {
        first.to_string()
    }
}

/// Element guessed from the leading letters of a site label.
fn element_from_label(label: &str) -> String {
    let letters: String = label.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    match letters.len() {
        1 => letters.to_ascii_uppercase(),
        2 => {
            let mut c = letters.chars();
            let first = c.next().unwrap_or('X').to_ascii_uppercase();
            let second = c.next().unwrap_or('x').to_ascii_lowercase();
            let pair = format!("{}{}", first, second);
            if is_valid_symbol(&pair) {
                pair
            } else {
                first.to_string()
            }
        }
        _ => "Xx".to_string(),
    }
}

/// Stores one anisotropic component; the convention follows the column.
fn set_adp(atom: &mut AtomRecord, prop: usize, field: &str) {
    let (kind, base) = match prop {
        a::ANISO_U11..=a::ANISO_U23 => (AdpKind::U, a::ANISO_U11),
        a::ANISO_MMCIF_U11..=a::ANISO_MMCIF_U23 => (AdpKind::U, a::ANISO_MMCIF_U11),
        a::ANISO_B11..=a::ANISO_B23 => (AdpKind::B, a::ANISO_B11),
        a::ANISO_BETA_11..=a::ANISO_BETA_23 => (AdpKind::Beta, a::ANISO_BETA_11),
        _ => return,
    };
    let Some(v) = parse_float(field) else {
        return;
    };
    let adp = atom.adp.get_or_insert_with(|| Adp::new(kind));
    adp.kind = kind;
    adp.values[(prop - base) % 6] = v;
}

impl CifReader<'_> {
    pub(super) fn read_atom_site_loop<R: BufRead>(
        &mut self,
        tok: &mut Tokenizer<R>,
    ) -> Result<(), CifError> {
        let line = tok.line_number();
        let mut lr = LoopReader::start(tok, &ATOM_SITE)?;
        let source = if lr.has_field(a::CHEM_COMP_AC_X_IDEAL) {
            for f in [a::FRACT_X, a::FRACT_Y, a::FRACT_Z, a::CARTN_X, a::CARTN_Y, a::CARTN_Z] {
                lr.disable_field(f);
            }
            SiteSource::Cartesian
        } else if lr.has_field(a::CARTN_X) || lr.has_field(a::CHEM_COMP_AC_X) {
            for f in [a::FRACT_X, a::FRACT_Y, a::FRACT_Z] {
                lr.disable_field(f);
            }
            SiteSource::Cartesian
        } else if lr.has_field(a::FRACT_X) {
            for f in [a::CARTN_X, a::CARTN_Y, a::CARTN_Z] {
                lr.disable_field(f);
            }
            SiteSource::Fractional
        } else if lr.has_field(a::ANISO_LABEL) {
            SiteSource::AnisoByLabel
        } else if lr.has_field(a::ANISO_MMCIF_ID) {
            SiteSource::AnisoBySequence
        } else {
            tok.diagnostics_mut().report(
                DiagnosticKind::UnsupportedLoopShape,
                line,
                "atom_site loop has neither coordinates nor anisotropic labels; skipped",
            );
            return skip_rest(tok, &lr);
        };

        if matches!(source, SiteSource::AnisoByLabel | SiteSource::AnisoBySequence) {
            return self.read_aniso_rows(tok, &lr, source);
        }
        if source == SiteSource::Cartesian {
            self.block.cartesian = true;
        }
        if lr.has_field(a::GROUP_PDB) || lr.has_field(a::MODEL_NO) {
            if self.dialect == Dialect::Cif {
                self.dialect = Dialect::MmCif;
            }
        }

        let mut added = 0;
        while let Some(row) = lr.next_row(tok)? {
            if let Some(n) = row.int(a::MODEL_NO) {
                self.switch_pdb_model(n);
            }
            let Some(atom) = self.atom_from_row(&row, tok) else {
                continue;
            };
            if !self.accept_conformation(&atom) {
                log::debug!("ignoring {} (alternate location {:?})", atom.label, atom.alt_loc);
                continue;
            }
            self.model_mut().atoms.push(atom);
            added += 1;
        }
        log::debug!("{} atom sites read", added);
        Ok(())
    }

    /// Starts a new model when an mmCIF model number changes mid-loop.
    fn switch_pdb_model(&mut self, n: i32) {
        match self.block.pdb_model {
            Some(current) if current == n => {}
            Some(_) => {
                self.finish_model();
                let name = format!("{}.{}", self.block_name, n);
                self.model = Some(Model::new(&name));
                self.block.pdb_model = Some(n);
            }
            None => {
                let name = format!("{}.{}", self.block_name, n);
                self.model_mut().name = name;
                self.block.pdb_model = Some(n);
            }
        }
    }

    fn atom_from_row<R: BufRead>(
        &mut self,
        row: &LoopRow<'_>,
        tok: &mut Tokenizer<R>,
    ) -> Option<AtomRecord> {
        let mut atom = AtomRecord::new("");
        let mut ideal = [None; 3];
        let mut dummy = false;
        for (prop, field) in row.fields() {
            match prop {
                a::TYPE_SYMBOL | a::CHEM_COMP_AC_SYM => {
                    atom.element = element_from_type_symbol(field);
                    if let Some(ox) = self.block.atom_types.get(field) {
                        atom.formal_charge = Some(ox.round() as i32);
                    }
                }
                a::LABEL | a::AUTH_ATOM | a::CHEM_COMP_AC_NAME => atom.label = field.to_string(),
                a::FRACT_X | a::CARTN_X | a::CHEM_COMP_AC_X => {
                    atom.position[0] = parse_float(field).unwrap_or(f64::NAN)
                }
                a::FRACT_Y | a::CARTN_Y | a::CHEM_COMP_AC_Y => {
                    atom.position[1] = parse_float(field).unwrap_or(f64::NAN)
                }
                a::FRACT_Z | a::CARTN_Z | a::CHEM_COMP_AC_Z => {
                    atom.position[2] = parse_float(field).unwrap_or(f64::NAN)
                }
                a::CHEM_COMP_AC_X_IDEAL => ideal[0] = parse_float(field),
                a::CHEM_COMP_AC_Y_IDEAL => ideal[1] = parse_float(field),
                a::CHEM_COMP_AC_Z_IDEAL => ideal[2] = parse_float(field),
                a::CHEM_COMP_AC_CHARGE => atom.formal_charge = parse_int(field),
                a::OCCUPANCY => {
                    if let Some(v) = parse_float(field) {
                        atom.occupancy = v;
                    }
                }
                a::B_ISO => atom.b_iso = parse_float(field),
                a::COMP_ID | a::CHEM_COMP_AC_ID => atom.residue = Some(field.to_string()),
                a::AUTH_ASYM_ID => atom.chain_id = Some(field.to_string()),
                a::SEQ_ID => atom.sequence_number = parse_int(field),
                a::INS_CODE => atom.insertion_code = field.chars().next(),
                a::ALT_ID => atom.alt_loc = field.chars().next(),
                a::SUBSYS_ID => {
                    atom.alt_loc = field.chars().next();
                    atom.subsystem = Some(field.to_string());
                }
                a::DISORDER_ASSEMBLY => {
                    self.block.disorder_assembly = field.to_string();
                    atom.disorder_assembly = Some(field.to_string());
                }
                a::DISORDER_GROUP => {
                    let mut chars = field.chars();
                    match (chars.next(), chars.next()) {
                        (Some('-'), Some(c)) => {
                            atom.alt_loc = Some(c);
                            atom.ignore_symmetry = true;
                        }
                        (first, _) => atom.alt_loc = first,
                    }
                }
                a::GROUP_PDB => atom.is_hetero = field == "HETATM",
                a::CALC_FLAG => dummy |= field == "dum",
                a::ADP_TYPE | a::THERMAL_TYPE => {
                    if field.eq_ignore_ascii_case("Uiso") {
                        atom.u_iso = row.float(a::U_ISO_OR_EQUIV);
                    }
                }
                a::SITE_MULT => {
                    if self.dialect.is_modulated() {
                        atom.site_multiplicity = parse_int(field);
                    }
                }
                _ => set_adp(&mut atom, prop, field),
            }
        }
        if dummy {
            log::debug!("dummy atom {} skipped", atom.label);
            return None;
        }
        if !self.opts.no_ideal {
            for (p, v) in atom.position.iter_mut().zip(ideal) {
                if let Some(v) = v {
                    *p = v;
                }
            }
        }
        if !atom.has_position() {
            tok.diagnostics_mut().report(
                DiagnosticKind::IncompleteRecord,
                row.line(),
                format!("atom {} has invalid/unknown coordinates", atom.label),
            );
            return None;
        }
        if atom.element.is_empty() {
            atom.element = element_from_label(&atom.label);
        }
        Some(atom)
    }

    /// `CONF n`: within each disorder assembly, keeps the n-th alternate
    /// location; atoms without one always stay.
    fn accept_conformation(&mut self, atom: &AtomRecord) -> bool {
        let Some(conf) = self.opts.configuration else {
            return true;
        };
        let block = &mut self.block;
        if block.last_disorder_assembly.as_deref() != Some(block.disorder_assembly.as_str()) {
            block.last_disorder_assembly = Some(block.disorder_assembly.clone());
            block.last_alt_loc = None;
            block.conformation_countdown = conf as i64;
        }
        let Some(alt) = atom.alt_loc else {
            return true;
        };
        if block.conformation_countdown >= 0 && block.last_alt_loc != Some(alt) {
            block.last_alt_loc = Some(alt);
            block.conformation_countdown -= 1;
        }
        block.conformation_countdown == 0
    }

    fn read_aniso_rows<R: BufRead>(
        &mut self,
        tok: &mut Tokenizer<R>,
        lr: &LoopReader,
        source: SiteSource,
    ) -> Result<(), CifError> {
        let mut sequence = 0;
        let mut matched = 0;
        while let Some(row) = lr.next_row(tok)? {
            let model = self.model_mut();
            let target = if source == SiteSource::AnisoByLabel {
                row.text(a::ANISO_LABEL).and_then(|l| model.atom_index(l))
            } else {
                sequence += 1;
                Some(sequence - 1).filter(|i| *i < model.atoms.len())
            };
            let Some(i) = target else {
                continue;
            };
            for (prop, field) in row.fields() {
                set_adp(&mut model.atoms[i], prop, field);
            }
            matched += 1;
        }
        log::debug!("{} anisotropic rows matched", matched);
        Ok(())
    }

    pub(super) fn read_atom_type_loop<R: BufRead>(
        &mut self,
        tok: &mut Tokenizer<R>,
    ) -> Result<(), CifError> {
        let lr = LoopReader::start(tok, &ATOM_TYPE)?;
        if !lr.has_field(atom_type::SYMBOL) || !lr.has_field(atom_type::OXIDATION_NUMBER) {
            return skip_rest(tok, &lr);
        }
        while let Some(row) = lr.next_row(tok)? {
            if let (Some(sym), Some(ox)) = (
                row.text(atom_type::SYMBOL),
                row.float(atom_type::OXIDATION_NUMBER),
            ) {
                self.block.atom_types.insert(sym.to_string(), ox);
            }
        }
        Ok(())
    }

    pub(super) fn read_symop_loop<R: BufRead>(
        &mut self,
        tok: &mut Tokenizer<R>,
    ) -> Result<(), CifError> {
        let line = tok.line_number();
        let lr = LoopReader::start(tok, &SYMMETRY_OPERATORS)?;
        let present: Vec<usize> = [
            symop::OPERATION_XYZ,
            symop::EQUIV_POS_XYZ,
            symop::SSG_EQUIV_XYZ,
            symop::SSG_OPERATION,
        ]
        .into_iter()
        .filter(|f| lr.has_field(*f))
        .collect();
        let [field] = present[..] else {
            tok.diagnostics_mut().report(
                DiagnosticKind::UnsupportedLoopShape,
                line,
                format!(
                    "symmetry loop needs exactly one operator column, found {}",
                    present.len()
                ),
            );
            return skip_rest(tok, &lr);
        };
        let superspace = matches!(field, symop::SSG_EQUIV_XYZ | symop::SSG_OPERATION);
        if superspace {
            self.dialect = Dialect::Modulated;
        }
        let keep = !self.dialect.is_modulated() || superspace;
        let mut n = 0;
        while let Some(row) = lr.next_row(tok)? {
            let Some(xyz) = row.text(field) else {
                continue;
            };
            n += 1;
            if !keep || (self.opts.no_symmetry && n > 1) {
                continue;
            }
            let xyz = if superspace {
                xyz.replace('~', "")
            } else {
                xyz.to_string()
            };
            self.block.symops.push(xyz);
        }
        log::debug!("{} symmetry operators read", self.block.symops.len());
        Ok(())
    }

    pub(super) fn read_geom_bond_loop<R: BufRead>(
        &mut self,
        tok: &mut Tokenizer<R>,
    ) -> Result<(), CifError> {
        let line = tok.line_number();
        let lr = LoopReader::start(tok, &GEOM_BOND)?;
        let required = [geom_bond::LABEL_1, geom_bond::LABEL_2, geom_bond::DISTANCE];
        if !required.iter().all(|f| lr.has_field(*f)) {
            tok.diagnostics_mut().report(
                DiagnosticKind::UnsupportedLoopShape,
                line,
                "geom_bond loop needs both labels and a distance; skipped",
            );
            return skip_rest(tok, &lr);
        }
        while let Some(row) = lr.next_row(tok)? {
            let (Some(l1), Some(l2)) = (row.text(geom_bond::LABEL_1), row.text(geom_bond::LABEL_2))
            else {
                continue;
            };
            let model = self.model_mut();
            if model.atom_index(l1).is_none() || model.atom_index(l2).is_none() {
                continue;
            }
            let Some(text) = row.text(geom_bond::DISTANCE) else {
                continue;
            };
            let distance = parse_float(text).unwrap_or(0.0);
            if distance == 0.0 {
                continue;
            }
            let tolerance = parse_esd(text).unwrap_or(DEFAULT_BOND_ESD);
            let order = match row.text(geom_bond::CCDC_TYPE) {
                None => BondOrder::Single,
                Some(code) => BondOrder::from_ccdc(code).unwrap_or_else(|| {
                    log::warn!("unknown CCDC bond type {}; using single", code);
                    BondOrder::Single
                }),
            };
            self.block.hints.push(BondHint {
                label_a: l1.to_string(),
                label_b: l2.to_string(),
                distance,
                tolerance,
                order,
            });
        }
        log::info!("{} bonds read", self.block.hints.len());
        Ok(())
    }

    pub(super) fn read_citation_loop<R: BufRead>(
        &mut self,
        tok: &mut Tokenizer<R>,
    ) -> Result<(), CifError> {
        let lr = LoopReader::start(tok, &CITATION)?;
        if !lr.has_field(citation::TITLE) {
            return skip_rest(tok, &lr);
        }
        while let Some(row) = lr.next_row(tok)? {
            let primary = row
                .text(citation::ID)
                .map_or(true, |id| id.eq_ignore_ascii_case("primary") || id == "1");
            if let (true, Some(title)) = (primary, row.text(citation::TITLE)) {
                let note = format!("TITLE: {}", title.trim());
                self.model_mut().note(note);
            }
        }
        Ok(())
    }
}

fn skip_rest<R: BufRead>(tok: &mut Tokenizer<R>, lr: &LoopReader) -> Result<(), CifError> {
    while lr.next_row(tok)?.is_some() {}
    Ok(())
}

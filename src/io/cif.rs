// src/io/cif.rs
//
// Structure assembler. Walks the token stream block by block, routes
// singleton keys and loops to their handlers, and finalizes every model:
// symmetry expansion, modulation, bonding, then Cartesian output.

use super::error::{CifError, DiagnosticKind, Diagnostics};
use super::fields::{
    fix_key, route_key, route_loop, KeyKind, LoopKind, CELL_PARAMETERS, FRACT_TRANSFORM,
};
use super::loop_reader::skip_loop;
use super::mscif;
use super::tokenizer::{parse_float, parse_int, CifValue, Token, Tokenizer};
use crate::config::ReaderOptions;
use crate::model::structure::{AtomSetCollection, BondHint, Model};
use crate::model::symmetry::SpaceGroup;
use crate::model::unit_cell::UnitCell;
use crate::physics::bonding::{self, BondingOptions};
use crate::physics::expansion::{self, ExpansionOptions, Frame, FrameSet, LatticeRange};
use crate::physics::modulation::ModulationEngine;
use nalgebra::Vector3;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::BufRead;

/// File flavor, decided while reading. A file starts as plain CIF and is
/// promoted when mmCIF or superspace content shows up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Cif,
    MmCif,
    Modulated,
}

impl Dialect {
    pub fn is_modulated(self) -> bool {
        self == Dialect::Modulated
    }

    /// Macromolecular files are neither merged at special positions nor
    /// expanded unless a cell count was asked for.
    pub fn is_macromolecular(self) -> bool {
        self == Dialect::MmCif
    }
}

/// Per-block accumulators, reset at every `data_` header.
#[derive(Debug)]
pub(super) struct BlockState {
    pub(super) cell: [Option<f64>; 6],
    pub(super) fract: [Option<f64>; 12],
    pub(super) symops: Vec<String>,
    pub(super) space_group: Option<String>,
    /// Oxidation number per `_atom_type_symbol`.
    pub(super) atom_types: HashMap<String, f64>,
    pub(super) hints: Vec<BondHint>,
    /// Coordinates were read as Cartesian and still need the cell.
    pub(super) cartesian: bool,
    pub(super) disorder_assembly: String,
    pub(super) last_disorder_assembly: Option<String>,
    pub(super) last_alt_loc: Option<char>,
    pub(super) conformation_countdown: i64,
    pub(super) pdb_model: Option<i32>,
}

impl BlockState {
    fn new() -> Self {
        Self {
            cell: [None; 6],
            fract: [None; 12],
            symops: Vec::new(),
            space_group: None,
            atom_types: HashMap::new(),
            hints: Vec::new(),
            cartesian: false,
            disorder_assembly: ".".to_string(),
            last_disorder_assembly: None,
            last_alt_loc: None,
            conformation_countdown: 0,
            pdb_model: None,
        }
    }

    /// The fractionalization matrix wins over cell parameters when both are
    /// complete; its translation column defaults to zero.
    fn unit_cell(&self) -> Option<UnitCell> {
        let has_matrix = (0..12).filter(|i| i % 4 != 3).all(|i| self.fract[i].is_some());
        if has_matrix {
            let mut m = [0.0; 12];
            for (slot, v) in m.iter_mut().zip(self.fract.iter()) {
                *slot = v.unwrap_or(0.0);
            }
            return UnitCell::from_fract_matrix(m);
        }
        match self.cell {
            [Some(a), Some(b), Some(c), alpha, beta, gamma] => UnitCell::from_parameters([
                a,
                b,
                c,
                alpha.unwrap_or(90.0),
                beta.unwrap_or(90.0),
                gamma.unwrap_or(90.0),
            ]),
            _ => None,
        }
    }
}

/// Reader state for one invocation.
pub struct CifReader<'o> {
    pub(super) opts: &'o ReaderOptions,
    pub(super) dialect: Dialect,
    pub(super) engine: ModulationEngine,
    pub(super) block: BlockState,
    pub(super) model: Option<Model>,
    pub(super) block_name: String,
    /// 1-based count of `data_` blocks seen, used for `MODEL=` and as the
    /// key of the block's modulation records.
    pub(super) model_number: usize,
    skipping: bool,
    have_desired_model: bool,
    collection: AtomSetCollection,
    diagnostics: Diagnostics,
}

/// Reads every selected block of a CIF/mmCIF/msCIF stream.
pub fn read<R: BufRead>(reader: R, opts: &ReaderOptions) -> Result<AtomSetCollection, CifError> {
    let mut tok = Tokenizer::new(reader);
    let mut cif = CifReader::new(opts);
    cif.read_all(&mut tok)?;
    Ok(cif.finish(&mut tok))
}

impl<'o> CifReader<'o> {
    pub fn new(opts: &'o ReaderOptions) -> Self {
        Self {
            opts,
            dialect: Dialect::Cif,
            engine: ModulationEngine::new(opts.modulation.clone()),
            block: BlockState::new(),
            model: None,
            block_name: String::new(),
            model_number: 0,
            skipping: false,
            have_desired_model: false,
            collection: AtomSetCollection::default(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// The model being filled; content before any `data_` header goes to
    /// an unnamed one.
    pub(super) fn model_mut(&mut self) -> &mut Model {
        let name = &self.block_name;
        self.model.get_or_insert_with(|| Model::new(name))
    }

    pub fn read_all<R: BufRead>(&mut self, tok: &mut Tokenizer<R>) -> Result<(), CifError> {
        while let Some(token) = tok.next_token()? {
            if token.is_data_block() {
                if self.have_desired_model {
                    break;
                }
                self.new_block(token.text.get(5..).unwrap_or(""));
            } else if token.is_save_frame() {
                skip_save_frame(tok, &token)?;
            } else if token.is_global() {
                continue;
            } else if token.is_loop() {
                if self.skipping {
                    skip_loop(tok)?;
                } else {
                    self.read_loop(tok)?;
                }
            } else if token.is_key() {
                let missing = match tok.peek()? {
                    None => true,
                    Some(next) => next.is_structural(),
                };
                if missing {
                    tok.diagnostics_mut().report(
                        DiagnosticKind::IncompleteRecord,
                        token.line,
                        format!("no value for {}", token.text),
                    );
                    continue;
                }
                if let Some(value) = tok.consume_value()? {
                    if !self.skipping {
                        self.read_key(&token.text, value);
                    }
                }
            } else {
                tok.diagnostics_mut().report(
                    DiagnosticKind::GrammarWarning,
                    token.line,
                    format!("CIF ERROR ? should be an underscore: {}", token.text),
                );
            }
        }
        Ok(())
    }

    fn new_block(&mut self, name: &str) {
        self.finish_model();
        self.model_number += 1;
        self.block = BlockState::new();
        self.block_name = name.to_string();
        // dimension, subsystems and the MODAVE fallback belong to one block
        self.engine = ModulationEngine::new(self.opts.modulation.clone());
        self.dialect = Dialect::Cif;
        self.skipping = !self.opts.wants_model(self.model_number);
        if self.skipping {
            log::debug!("skipping data_{}", name);
            return;
        }
        self.model = Some(Model::new(name));
        self.have_desired_model = self
            .opts
            .last_model()
            .is_some_and(|last| self.model_number >= last);
    }

    // --- Singletons ---

    fn read_key(&mut self, raw: &str, value: CifValue) {
        if self.dialect == Dialect::Cif && raw.to_lowercase().contains(".pdb") {
            self.dialect = Dialect::MmCif;
        }
        let key = fix_key(raw);
        let Some(text) = value.as_str().map(str::trim) else {
            return;
        };
        let Some(kind) = route_key(&key) else {
            return;
        };
        match kind {
            KeyKind::ChemicalName => self.model_mut().chemical_name = Some(text.to_string()),
            KeyKind::StructuralFormula => {
                self.model_mut().structural_formula = Some(text.to_string())
            }
            KeyKind::Formula => self.model_mut().formula = Some(text.to_string()),
            KeyKind::ModulationDimension => {
                if let Some(d) = parse_int(text).filter(|d| *d >= 0) {
                    self.set_modulation_dimension(d as usize);
                }
            }
            KeyKind::CitationTitle => self.model_mut().note(format!("TITLE: {}", text)),
            KeyKind::CellParameter => {
                if let Some(i) = CELL_PARAMETERS.iter().position(|k| *k == key) {
                    self.block.cell[i] = parse_float(text);
                }
            }
            KeyKind::SpaceGroupName => self.set_space_group_name(&key, text),
            KeyKind::FractTransform => {
                if let Some(i) = fract_index(&key) {
                    self.block.fract[i] = parse_float(text);
                }
            }
        }
    }

    fn set_modulation_dimension(&mut self, d: usize) {
        let name = &self.block_name;
        let model = self.model.get_or_insert_with(|| Model::new(name));
        let used = self.engine.set_dimension(d, model);
        if used > 0 {
            self.dialect = Dialect::Modulated;
            model.is_modulated = true;
            model.modulation_dimension = used;
        }
    }

    fn set_space_group_name(&mut self, key: &str, text: &str) {
        if key.contains("_ssg_name") {
            self.dialect = Dialect::Modulated;
        } else if self.dialect.is_modulated() {
            return;
        }
        let prefix = if key.contains("h-m") {
            "HM:"
        } else if self.dialect.is_modulated() {
            "SSG:"
        } else {
            "Hall:"
        };
        self.block.space_group = Some(format!("{}{}", prefix, text));
    }

    // --- Loops ---

    fn read_loop<R: BufRead>(&mut self, tok: &mut Tokenizer<R>) -> Result<(), CifError> {
        let first = match tok.peek()? {
            Some(t) if t.is_key() => fix_key(&t.text),
            Some(t) => {
                let line = t.line;
                tok.diagnostics_mut().report(
                    DiagnosticKind::GrammarWarning,
                    line,
                    "loop_ without field names",
                );
                return Ok(());
            }
            None => return Ok(()),
        };
        if self.dialect == Dialect::Cif && first.contains("_pdb") {
            self.dialect = Dialect::MmCif;
        }
        match route_loop(&first, self.dialect.is_modulated()) {
            Some(LoopKind::Modulation) => {
                if self.engine.options().average {
                    skip_loop(tok)?;
                } else {
                    let known: HashSet<String> = self
                        .model
                        .iter()
                        .flat_map(|m| m.atoms.iter().map(|a| a.label.clone()))
                        .collect();
                    let n = mscif::read_modulation_loop(
                        tok,
                        &mut self.engine,
                        self.model_number,
                        &known,
                    )?;
                    log::debug!("{} modulation rows read", n);
                }
            }
            Some(LoopKind::Subsystem) => {
                let name = &self.block_name;
                let model = self.model.get_or_insert_with(|| Model::new(name));
                mscif::read_subsystem_loop(tok, &mut self.engine, model)?;
            }
            Some(LoopKind::AtomSite) | Some(LoopKind::ChemCompAtom) => {
                self.read_atom_site_loop(tok)?
            }
            Some(LoopKind::SymmetryOperators) => self.read_symop_loop(tok)?,
            Some(LoopKind::Citation) => self.read_citation_loop(tok)?,
            Some(LoopKind::AtomType) => self.read_atom_type_loop(tok)?,
            Some(LoopKind::GeomBond) => self.read_geom_bond_loop(tok)?,
            Some(LoopKind::Polymer) => {
                self.model_mut().note(format!("{} loop not assembled", first));
                skip_loop(tok)?;
            }
            None => skip_loop(tok)?,
        }
        Ok(())
    }

    // --- Finalization ---

    /// Closes the current model: finalizes it when it holds atoms and
    /// drops it otherwise.
    pub(super) fn finish_model(&mut self) {
        let Some(mut model) = self.model.take() else {
            return;
        };
        if model.atoms.is_empty() {
            log::debug!("block {} has no atoms; discarded", model.name);
            return;
        }
        self.finalize(&mut model);
        log::info!(
            "{}: {} atoms, {} bonds",
            model.name,
            model.kept_atoms().count(),
            model.bonds.len()
        );
        self.collection.models.push(model);
    }

    fn finalize(&mut self, model: &mut Model) {
        let opts = self.opts;
        let cells = opts.lattice_cells();
        let modulated = self.dialect.is_modulated() && self.engine.is_active();
        let d = if modulated { self.engine.dimension() } else { 0 };

        let (mut group, errors) = SpaceGroup::from_strings(d, &self.block.symops);
        for e in errors {
            self.diagnostics
                .report(DiagnosticKind::SymmetryOperatorParse, 0, e);
        }
        group.name = self.block.space_group.clone();
        model.operators = group.operators().iter().map(|op| op.xyz.clone()).collect();
        model.space_group = group.name.clone();
        model.is_modulated = modulated;
        model.modulation_dimension = d;

        let Some(cell) = self.block.unit_cell() else {
            for (i, a) in model.atoms.iter_mut().enumerate() {
                a.site = i;
                a.symmetry = BTreeSet::from([0]);
            }
            if !self.block.cartesian {
                model.note("no unit cell; coordinates left as read");
            }
            return;
        };

        if self.block.cartesian {
            for a in model.atoms.iter_mut() {
                let f = cell.to_fractional(&Vector3::from(a.position));
                a.position = [f.x, f.y, f.z];
            }
        }
        if modulated {
            self.engine
                .prepare(self.model_number, model, &mut self.diagnostics);
        }

        let host = Frame {
            sigma: self.engine.sigma().cloned().filter(|_| modulated),
            ..Frame::host(cell.clone(), group.operators().to_vec(), cells)
        };
        let mut frames = FrameSet::new(host);
        if modulated && self.engine.has_subsystems() {
            let codes: Vec<String> = self.engine.subsystem_codes().map(str::to_string).collect();
            for code in codes {
                let Some(sub) = self.engine.subsystem_frame(&code, &cell, group.operators()) else {
                    model.note(format!("subsystem {} has a singular matrix; ignored", code));
                    continue;
                };
                let frame = Frame {
                    code: Some(code.clone()),
                    cell: sub.cell.clone(),
                    operators: sub.operators.clone(),
                    sigma: Some(sub.sigma_nu.clone()),
                    t_factor: Some(sub.t_factor.clone()),
                    range: LatticeRange::cells(cells),
                };
                let display = opts.modulation.cell.as_deref() == Some(code.as_str());
                let cell = frame.cell.clone();
                let idx = frames.push(frame);
                if display {
                    frames.display = idx;
                    model.display_cell = Some(cell);
                }
            }
            if frames.has_subsystems() {
                frames.cover_display(cells);
            }
        }

        let macromolecular = self.dialect.is_macromolecular();
        if macromolecular && opts.cells.is_none() {
            for (i, a) in model.atoms.iter_mut().enumerate() {
                a.site = i;
                a.symmetry = BTreeSet::from([0]);
            }
        } else {
            let eo = ExpansionOptions {
                check_special: !opts.no_special && !macromolecular,
                packed: opts.packed || (frames.has_subsystems() && !opts.modulation.no_pack),
            };
            model.atoms = expansion::expand(&model.atoms, &frames, &eo);
        }

        if modulated {
            self.engine.modulate(self.model_number, model, &frames);
        }
        if frames.has_subsystems() {
            expansion::trim_outside(&mut model.atoms, &frames, cells);
        }
        expansion::rotate_tensors(&mut model.atoms, &frames);
        expansion::to_host_frame(&mut model.atoms, &frames);

        if opts.molecular || !self.block.hints.is_empty() {
            let bo = BondingOptions {
                molecular: opts.molecular,
                tolerance: opts.bond_tolerance,
            };
            model.bonds = bonding::resolve(&mut model.atoms, &self.block.hints, &cell, &bo);
        }

        expansion::to_cartesian(&mut model.atoms, &cell);
        if opts.molecular {
            for a in model.atoms.iter_mut() {
                a.fractional = None;
            }
            model.unit_cell = None;
        } else {
            model.unit_cell = Some(cell);
        }
    }

    pub fn finish<R: BufRead>(mut self, tok: &mut Tokenizer<R>) -> AtomSetCollection {
        self.finish_model();
        let mut diagnostics = tok.take_diagnostics().into_vec();
        diagnostics.extend(self.diagnostics.into_vec());
        self.collection.diagnostics = diagnostics;
        if self.collection.models.is_empty() {
            log::warn!("no atoms found");
        }
        self.collection
    }
}

/// Index into the 3×4 fractionalization matrix for a transform key, in
/// either the mmCIF (`matrix[i][j]`, `vector[i]`) or the classic
/// (`matrix_ij`, `vector_i`) spelling.
fn fract_index(key: &str) -> Option<usize> {
    if let Some(i) = FRACT_TRANSFORM.iter().position(|s| key.contains(s)) {
        return Some(i);
    }
    let tail = key.rsplit('_').next()?;
    let digits: Vec<usize> = tail
        .chars()
        .map(|c| c.to_digit(10).map(|d| d as usize))
        .collect::<Option<_>>()?;
    match digits.as_slice() {
        [i, j] if key.contains("_matrix_") && (1..=3).contains(i) && (1..=3).contains(j) => {
            Some((i - 1) * 4 + (j - 1))
        }
        [i] if key.contains("_vector_") && (1..=3).contains(i) => Some((i - 1) * 4 + 3),
        _ => None,
    }
}

/// Skips a `save_name ... save_` frame. A bare closing `save_` on its own
/// is ignored.
fn skip_save_frame<R: BufRead>(tok: &mut Tokenizer<R>, open: &Token) -> Result<(), CifError> {
    if open.text.len() <= 5 {
        return Ok(());
    }
    while let Some(t) = tok.next_token()? {
        if t.is_save_frame() && t.text.len() == 5 {
            return Ok(());
        }
    }
    tok.diagnostics_mut().report(
        DiagnosticKind::GrammarWarning,
        open.line,
        format!("{} is never closed", open.text),
    );
    Ok(())
}

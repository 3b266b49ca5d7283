// src/io/mscif.rs
//
// Superspace loops: wave vectors, Fourier and special-function wave
// records, and composite subsystem matrices. Rows are turned into keyed
// records for the modulation engine; nothing is evaluated here.

use super::error::CifError;
use super::fields::{modulation as m, MODULATION};
use super::loop_reader::LoopReader;
use super::tokenizer::{parse_float, CifValue, Tokenizer};
use crate::model::structure::Model;
use crate::physics::modulation::ModulationEngine;
use nalgebra::DMatrix;
use std::collections::HashSet;
use std::io::BufRead;

/// Values above this are treated as garbage rather than amplitudes.
const MAX_WAVE_VALUE: f64 = 1e10;

/// Per-row accumulator. `pt` starts out undefined so a row that never
/// supplies its values is rejected.
struct WaveRow {
    id: Option<String>,
    label: Option<String>,
    axis: Option<String>,
    /// `?id` suffix of a record whose values live in a parameter loop.
    fid: String,
    pt: Vec<f64>,
    c: f64,
    w: f64,
    ignored: bool,
}

impl WaveRow {
    fn new() -> Self {
        Self {
            id: None,
            label: None,
            axis: None,
            fid: String::new(),
            pt: vec![f64::NAN; 3],
            c: f64::NAN,
            w: f64::NAN,
            ignored: false,
        }
    }

    fn set(&mut self, i: usize, v: f64) {
        if let Some(slot) = self.pt.get_mut(i) {
            *slot = v;
        }
    }

    fn reset_values(&mut self) {
        self.pt = vec![0.0; 3];
    }

    fn read(&mut self, prop: usize, field: &str, axes: Option<&str>, dimension: usize) {
        let value = || parse_float(field).unwrap_or(f64::NAN);
        match prop {
            m::WV_ID | m::FWV_ID | m::FD_ID | m::FO_ID | m::FU_ID => {
                self.reset_values();
                match prop {
                    m::WV_ID => self.id = Some(format!("W_{}", field)),
                    m::FWV_ID => self.id = Some(format!("F_{}", field)),
                    _ => {
                        self.fid = format!("?{}", field);
                        self.pt[2] = 1.0;
                    }
                }
            }
            m::FDP_ID | m::FOP_ID | m::FUP_ID => {
                let kind = match prop {
                    m::FDP_ID => 'D',
                    m::FOP_ID => 'O',
                    _ => 'U',
                };
                self.label = Some("*".into());
                self.axis = Some("*".into());
                self.id = Some(format!("{}_{}", kind, field));
            }
            m::DISP_SEQ_ID => self.id = Some(format!("D_{}", field)),
            m::OCC_SEQ_ID => self.id = Some(format!("O_{}", field)),
            m::U_SEQ_ID => self.id = Some(format!("U_{}", field)),
            m::JANA_OCC_ABS_LABEL => {
                self.id = Some("J_O".into());
                self.set(0, 1.0);
                self.set(2, 1.0);
                self.axis = Some("0".into());
                self.label = Some(field.to_string());
            }
            m::SAW_LABEL => {
                self.id = Some("D_S".into());
                self.axis = Some("0".into());
                self.label = Some(field.to_string());
            }
            m::CRENEL_LABEL => {
                self.id = Some("O_0".into());
                self.axis = Some("0".into());
                self.label = Some(field.to_string());
            }
            m::DISP_LABEL | m::OCC_LABEL | m::U_LABEL => self.label = Some(field.to_string()),
            m::DISP_AXIS => {
                if let Some(axes) = axes {
                    if !axes.contains(&field.to_lowercase()) {
                        self.ignored = true;
                    }
                }
                self.axis = Some(field.to_string());
            }
            m::U_TENS => self.axis = Some(field.to_uppercase()),
            m::DISP_COS | m::OCC_COS | m::U_COS | m::DEPR_FD_COS | m::DEPR_FO_COS
            | m::DEPR_FU_COS | m::CRENEL_C => {
                self.set(2, 0.0);
                self.set(0, value());
            }
            m::WV_X | m::FWV_X | m::SAW_AX => self.set(0, value()),
            m::FWV_Q1_COEF => {
                if let Some(id) = self.id.as_mut() {
                    id.push_str("_coefs_");
                }
                self.pt = vec![0.0; dimension.max(1)];
                self.pt[0] = value();
            }
            m::DISP_MODULUS | m::OCC_MODULUS | m::U_MODULUS => {
                self.set(0, value());
                self.set(2, 1.0);
            }
            m::OCC_SIN | m::DEPR_FO_SIN => {
                self.axis = Some("0".into());
                self.set(1, value());
            }
            m::WV_Y | m::FWV_Y | m::FWV_Q2_COEF | m::DISP_SIN | m::U_SIN | m::DEPR_FD_SIN
            | m::DEPR_FU_SIN | m::DISP_PHASE | m::OCC_PHASE | m::U_PHASE | m::CRENEL_W
            | m::SAW_AY | m::JANA_OCC_ABS_O_0 => self.set(1, value()),
            m::WV_Z | m::FWV_Z | m::FWV_Q3_COEF | m::SAW_AZ => self.set(2, value()),
            m::SAW_C => self.c = value(),
            m::SAW_W => self.w = value(),
            _ => {}
        }
    }

    /// Hands the finished row to the engine. Occupancy records carry axis
    /// `0` even when only a cosine term was given.
    fn commit(self, engine: &mut ModulationEngine, model: usize, known: &HashSet<String>) {
        if self.ignored {
            return;
        }
        let Some(mut id) = self.id else {
            return;
        };
        let sum: f64 = self.pt.iter().sum();
        if sum.is_nan() || sum > MAX_WAVE_VALUE || sum == 0.0 {
            return;
        }
        let kind = id.chars().next().unwrap_or(' ');
        if matches!(kind, 'D' | 'O' | 'U' | 'J') {
            let axis = match (self.axis, kind) {
                (Some(a), _) => a,
                (None, 'O') => "0".to_string(),
                (None, _) => return,
            };
            let Some(label) = self.label else {
                return;
            };
            if !known.is_empty() && label != "*" && !known.contains(&label) {
                log::debug!("modulation {} for unknown atom {} dropped", id, label);
                return;
            }
            if id == "D_S" {
                if self.c.is_nan() || self.w.is_nan() {
                    return;
                }
                for (ax, v) in ['x', 'y', 'z'].into_iter().zip(self.pt.iter()) {
                    if *v != 0.0 {
                        let key = format!("D_S#{};{}{}", ax, label, self.fid);
                        engine.add(&key, vec![self.c, self.w, *v], model);
                    }
                }
                return;
            }
            id = format!("{}#{};{}", id, axis, label);
        }
        id.push_str(&self.fid);
        engine.add(&id, self.pt, model);
    }
}

/// Reads one wave-vector or wave-parameter loop (`loop_` already consumed).
/// Atom records naming a label outside `known` are dropped; an empty
/// `known` accepts every label.
pub fn read_modulation_loop<R: BufRead>(
    tok: &mut Tokenizer<R>,
    engine: &mut ModulationEngine,
    model: usize,
    known: &HashSet<String>,
) -> Result<usize, CifError> {
    let lr = LoopReader::start(tok, &MODULATION)?;
    let axes = engine.options().axes.clone();
    let dimension = engine.dimension();
    let mut n = 0;
    while let Some(row) = lr.next_row(tok)? {
        let mut wave = WaveRow::new();
        for (prop, field) in row.fields() {
            wave.read(prop, field, axes.as_deref(), dimension);
        }
        wave.commit(engine, model, known);
        n += 1;
    }
    Ok(n)
}

/// Reads `_cell_subsystem_*` rows: a code followed by `W` matrix elements
/// named `..._w_<row>_<col>` (1-based).
pub fn read_subsystem_loop<R: BufRead>(
    tok: &mut Tokenizer<R>,
    engine: &mut ModulationEngine,
    model: &mut Model,
) -> Result<(), CifError> {
    let lr = LoopReader::start_open(tok)?;
    let n = 3 + engine.dimension();
    let elements: Vec<(usize, usize, usize)> = (1..lr.field_count())
        .filter_map(|pos| {
            let name = lr.field_name(pos)?;
            if !name.contains("_w_") {
                return None;
            }
            let mut parts = name.rsplit('_');
            let c: usize = parts.next()?.parse().ok()?;
            let r: usize = parts.next()?.parse().ok()?;
            (r >= 1 && c >= 1 && r <= n && c <= n).then_some((pos, r - 1, c - 1))
        })
        .collect();
    while let Some(row) = lr.next_row(tok)? {
        if engine.dimension() == 0 {
            continue;
        }
        let Some(code) = row.at(0).and_then(CifValue::as_str) else {
            continue;
        };
        let mut w = DMatrix::zeros(n, n);
        for &(pos, r, c) in &elements {
            if let Some(v) = row.at(pos).and_then(CifValue::as_f64) {
                w[(r, c)] = v;
            }
        }
        engine.add_subsystem(code, w, model);
    }
    Ok(())
}

// src/io/loop_reader.rs

use super::error::{CifError, DiagnosticKind};
use super::fields::{fix_key, Schema};
use super::tokenizer::{CifValue, Tokenizer};
use std::io::BufRead;

/// Column bookkeeping for one `loop_` block.
///
/// `field_of[schema_index]` gives the column holding that field and
/// `property_of[column]` gives the schema index a column feeds. Unknown
/// columns map to `None` and are read but ignored.
#[derive(Debug, Clone)]
pub struct LoopReader {
    names: Vec<String>,
    field_of: Vec<Option<usize>>,
    property_of: Vec<Option<usize>>,
}

impl LoopReader {
    /// Reads the run of `_field` names following `loop_` (already consumed)
    /// and maps them onto `schema`.
    pub fn start<R: BufRead>(tok: &mut Tokenizer<R>, schema: &Schema) -> Result<Self, CifError> {
        let names = read_header(tok)?;
        let mut field_of = vec![None; schema.len()];
        let mut property_of = vec![None; names.len()];
        for (pos, name) in names.iter().enumerate() {
            let Some(i) = schema.index_of(name) else {
                continue;
            };
            if field_of[i].is_some() {
                let line = tok.line_number();
                tok.diagnostics_mut().report(
                    DiagnosticKind::GrammarWarning,
                    line,
                    format!("duplicate loop field {} ignored", name),
                );
                continue;
            }
            field_of[i] = Some(pos);
            property_of[pos] = Some(i);
        }
        Ok(Self {
            names,
            field_of,
            property_of,
        })
    }

    /// Maps every column onto itself, for loops whose columns are
    /// interpreted by name (e.g. matrix elements).
    pub fn start_open<R: BufRead>(tok: &mut Tokenizer<R>) -> Result<Self, CifError> {
        let names = read_header(tok)?;
        let identity: Vec<Option<usize>> = (0..names.len()).map(Some).collect();
        Ok(Self {
            field_of: identity.clone(),
            property_of: identity,
            names,
        })
    }

    pub fn field_count(&self) -> usize {
        self.names.len()
    }

    pub fn field_name(&self, pos: usize) -> Option<&str> {
        self.names.get(pos).map(String::as_str)
    }

    pub fn field_of(&self, schema_index: usize) -> Option<usize> {
        self.field_of.get(schema_index).copied().flatten()
    }

    pub fn property_of(&self, pos: usize) -> Option<usize> {
        self.property_of.get(pos).copied().flatten()
    }

    /// True if the field is present and still enabled.
    pub fn has_field(&self, schema_index: usize) -> bool {
        self.field_of(schema_index)
            .map_or(false, |pos| self.property_of(pos) == Some(schema_index))
    }

    /// Stops a column from feeding its property; used to switch off the
    /// coordinate source that lost out.
    pub fn disable_field(&mut self, schema_index: usize) {
        if let Some(pos) = self.field_of(schema_index) {
            self.property_of[pos] = None;
        }
    }

    /// Reads one row. Returns `None` once the next token is not row data.
    /// A short row is reported and dropped.
    pub fn next_row<'a, R: BufRead>(
        &'a self,
        tok: &mut Tokenizer<R>,
    ) -> Result<Option<LoopRow<'a>>, CifError> {
        let line = match tok.peek()? {
            Some(t) if !t.is_structural() => t.line,
            _ => return Ok(None),
        };
        if self.names.is_empty() {
            skip_rows(tok)?;
            return Ok(None);
        }
        let mut values = Vec::with_capacity(self.names.len());
        while values.len() < self.names.len() {
            if !matches!(tok.peek()?, Some(t) if !t.is_structural()) {
                break;
            }
            if let Some(t) = tok.next_token()? {
                values.push(t.into_value());
            }
        }
        if values.len() < self.names.len() {
            tok.diagnostics_mut().report(
                DiagnosticKind::IncompleteRecord,
                line,
                format!(
                    "loop row has {} of {} values; row skipped",
                    values.len(),
                    self.names.len()
                ),
            );
            return Ok(None);
        }
        Ok(Some(LoopRow {
            reader: self,
            values,
            line,
        }))
    }
}

/// One data row, aligned to column order.
#[derive(Debug)]
pub struct LoopRow<'a> {
    reader: &'a LoopReader,
    values: Vec<CifValue>,
    line: usize,
}

impl<'a> LoopRow<'a> {
    pub fn line(&self) -> usize {
        self.line
    }

    /// Value of an enabled schema field, including `.`/`?` sentinels.
    pub fn get(&self, schema_index: usize) -> Option<&CifValue> {
        if !self.reader.has_field(schema_index) {
            return None;
        }
        self.reader
            .field_of(schema_index)
            .and_then(|pos| self.values.get(pos))
    }

    /// Non-null text of a field.
    pub fn text(&self, schema_index: usize) -> Option<&str> {
        self.get(schema_index).and_then(CifValue::as_str)
    }

    pub fn float(&self, schema_index: usize) -> Option<f64> {
        self.get(schema_index).and_then(CifValue::as_f64)
    }

    pub fn int(&self, schema_index: usize) -> Option<i32> {
        self.get(schema_index).and_then(CifValue::as_i32)
    }

    /// Raw access by column position, ignoring the schema.
    pub fn at(&self, pos: usize) -> Option<&CifValue> {
        self.values.get(pos)
    }

    /// Enabled, non-null fields in column order as `(schema_index, text)`.
    pub fn fields(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        self.values.iter().enumerate().filter_map(move |(pos, v)| {
            let prop = self.reader.property_of(pos)?;
            v.as_str().map(|s| (prop, s))
        })
    }
}

fn read_header<R: BufRead>(tok: &mut Tokenizer<R>) -> Result<Vec<String>, CifError> {
    let mut names = Vec::new();
    while matches!(tok.peek()?, Some(t) if t.is_key()) {
        if let Some(t) = tok.next_token()? {
            names.push(fix_key(&t.text));
        }
    }
    Ok(names)
}

fn skip_rows<R: BufRead>(tok: &mut Tokenizer<R>) -> Result<usize, CifError> {
    let mut n = 0;
    while matches!(tok.peek()?, Some(t) if !t.is_structural()) {
        tok.next_token()?;
        n += 1;
    }
    Ok(n)
}

/// Discards a loop's header and all of its rows. `loop_` must already be
/// consumed. Only the field names are buffered.
pub fn skip_loop<R: BufRead>(tok: &mut Tokenizer<R>) -> Result<(), CifError> {
    read_header(tok)?;
    skip_rows(tok)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::fields::{atom_site, ATOM_SITE, GEOM_BOND};

    fn after_loop(text: &str) -> Tokenizer<&[u8]> {
        let mut t = Tokenizer::from_text(text);
        let first = t.next_token().unwrap().unwrap();
        assert!(first.is_loop());
        t
    }

    #[test]
    fn test_field_maps_invert_for_permuted_header() {
        let mut t = after_loop(
            "loop_\n_atom_site_fract_z\n_atom_site_unknown_column\n_atom_site_label\n_atom_site_fract_x\n_atom_site_fract_y\n",
        );
        let lr = LoopReader::start(&mut t, &ATOM_SITE).unwrap();
        for i in 0..ATOM_SITE.len() {
            if let Some(pos) = lr.field_of(i) {
                assert_eq!(lr.property_of(pos), Some(i));
            }
        }
        assert_eq!(lr.field_of(atom_site::FRACT_Z), Some(0));
        assert_eq!(lr.property_of(1), None);
        assert_eq!(lr.field_of(atom_site::LABEL), Some(2));
        assert!(!lr.has_field(atom_site::CARTN_X));
    }

    #[test]
    fn test_rows_skip_unknown_columns() {
        let mut t = after_loop(
            "loop_\n_atom_site.label\n_atom_site.extra\n_atom_site.fract_x\nC1 junk 0.25\nO1 ? 0.5\n_cell_length_a 5\n",
        );
        let lr = LoopReader::start(&mut t, &ATOM_SITE).unwrap();
        let r1 = lr.next_row(&mut t).unwrap().unwrap();
        assert_eq!(r1.text(atom_site::LABEL), Some("C1"));
        assert!((r1.float(atom_site::FRACT_X).unwrap() - 0.25).abs() < 1e-12);
        let fields: Vec<usize> = r1.fields().map(|(p, _)| p).collect();
        assert_eq!(fields, vec![atom_site::LABEL, atom_site::FRACT_X]);
        let r2 = lr.next_row(&mut t).unwrap().unwrap();
        assert_eq!(r2.text(atom_site::LABEL), Some("O1"));
        assert!(lr.next_row(&mut t).unwrap().is_none());
        assert_eq!(t.next_token().unwrap().unwrap().text, "_cell_length_a");
    }

    #[test]
    fn test_disabled_field_is_invisible() {
        let mut t = after_loop("loop_\n_atom_site_label\n_atom_site_fract_x\n_atom_site_cartn_x\nC1 0.5 2.5\n");
        let mut lr = LoopReader::start(&mut t, &ATOM_SITE).unwrap();
        lr.disable_field(atom_site::FRACT_X);
        assert!(!lr.has_field(atom_site::FRACT_X));
        let row = lr.next_row(&mut t).unwrap().unwrap();
        assert!(row.get(atom_site::FRACT_X).is_none());
        assert!((row.float(atom_site::CARTN_X).unwrap() - 2.5).abs() < 1e-12);
        assert!(row.fields().all(|(p, _)| p != atom_site::FRACT_X));
    }

    #[test]
    fn test_short_row_is_reported_and_dropped() {
        let mut t = after_loop(
            "loop_\n_geom_bond_atom_site_label_1\n_geom_bond_atom_site_label_2\n_geom_bond_distance\nC1 C2\nloop_\n",
        );
        let lr = LoopReader::start(&mut t, &GEOM_BOND).unwrap();
        assert!(lr.next_row(&mut t).unwrap().is_none());
        assert_eq!(t.take_diagnostics().count(DiagnosticKind::IncompleteRecord), 1);
        assert!(t.peek().unwrap().unwrap().is_loop());
    }

    #[test]
    fn test_skip_loop_stops_at_next_key() {
        let mut t = after_loop("loop_\n_refln_index_h\n_refln_index_k\n1 0\n0 1\n2 2\n_cell_length_b 6\n");
        skip_loop(&mut t).unwrap();
        assert_eq!(t.next_token().unwrap().unwrap().text, "_cell_length_b");
    }

    #[test]
    fn test_open_loop_keeps_names() {
        let mut t = after_loop("loop_\n_cell_subsystem_code\n_cell_subsystem_matrix_W_1_1\n1 1\n");
        let lr = LoopReader::start_open(&mut t).unwrap();
        assert_eq!(lr.field_name(1), Some("_cell_subsystem_matrix_w_1_1"));
        let row = lr.next_row(&mut t).unwrap().unwrap();
        assert_eq!(row.at(0).and_then(CifValue::as_str), Some("1"));
    }

    #[test]
    fn test_sentinels_are_present_but_null() {
        let mut t = after_loop("loop_\n_atom_site_label\n_atom_site_occupancy\nC1 .\n");
        let lr = LoopReader::start(&mut t, &ATOM_SITE).unwrap();
        let row = lr.next_row(&mut t).unwrap().unwrap();
        assert_eq!(row.get(atom_site::OCCUPANCY), Some(&CifValue::Inapplicable));
        assert!(row.float(atom_site::OCCUPANCY).is_none());
    }
}

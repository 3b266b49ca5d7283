// src/model/symmetry.rs

use crate::utils::linalg::{block, round_to_twelfths};
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

/// One (super)space-group operator as an augmented `(n+1)×(n+1)` matrix,
/// `n = 3 + d`, translation in the last column.
#[derive(Debug, Clone, PartialEq)]
pub struct SymmetryOperator {
    pub xyz: String,
    pub dimension: usize,
    matrix: DMatrix<f64>,
}

impl SymmetryOperator {
    pub fn identity(dimension: usize) -> Self {
        let n = 3 + dimension;
        let matrix = DMatrix::identity(n + 1, n + 1);
        Self {
            xyz: axis_names(n).join(","),
            dimension,
            matrix,
        }
    }

    /// Parses `x,y,z` style text. Superspace operators use `x1..x6` (or the
    /// letters `a..h` for axes 4 and up). The row count must equal `3 + d`.
    pub fn parse(xyz: &str, dimension: usize) -> Result<Self, String> {
        let n = 3 + dimension;
        let text: String = xyz
            .to_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '\'' && *c != '"')
            .collect();
        let rows: Vec<&str> = text.split(',').collect();
        if rows.len() != n {
            return Err(format!(
                "'{}' has {} rows, expected {}",
                xyz,
                rows.len(),
                n
            ));
        }
        let mut matrix = DMatrix::zeros(n + 1, n + 1);
        matrix[(n, n)] = 1.0;
        for (i, row) in rows.iter().enumerate() {
            let (coefs, shift) = parse_row(row, n).map_err(|e| format!("'{}': {}", xyz, e))?;
            for (j, c) in coefs.iter().enumerate() {
                matrix[(i, j)] = *c;
            }
            matrix[(i, n)] = round_to_twelfths(shift);
        }
        Ok(Self {
            xyz: xyz.trim().to_string(),
            dimension,
            matrix,
        })
    }

    /// Builds an operator from a rotation block and translation; the text
    /// form is regenerated from the numbers.
    pub fn from_parts(rotation: &DMatrix<f64>, translation: &DVector<f64>, dimension: usize) -> Self {
        let n = 3 + dimension;
        let mut matrix = DMatrix::zeros(n + 1, n + 1);
        for i in 0..n {
            for j in 0..n {
                matrix[(i, j)] = rotation[(i, j)];
            }
            matrix[(i, n)] = round_to_twelfths(translation[i]);
        }
        matrix[(n, n)] = 1.0;
        Self {
            xyz: to_xyz(&matrix, n),
            dimension,
            matrix,
        }
    }

    pub fn rank(&self) -> usize {
        3 + self.dimension
    }

    /// The full augmented matrix.
    pub fn rsvs(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// The `n×n` rotation block.
    pub fn rotation_block(&self) -> DMatrix<f64> {
        let n = self.rank();
        block(&self.matrix, 0, 0, n, n)
    }

    pub fn translation_block(&self) -> DVector<f64> {
        let n = self.rank();
        DVector::from_fn(n, |i, _| self.matrix[(i, n)])
    }

    pub fn rotation(&self) -> Matrix3<f64> {
        Matrix3::from_fn(|i, j| self.matrix[(i, j)])
    }

    pub fn translation(&self) -> Vector3<f64> {
        let n = self.rank();
        Vector3::new(self.matrix[(0, n)], self.matrix[(1, n)], self.matrix[(2, n)])
    }

    /// Maps a fractional position. `sigma` (d×3) adds the `R3d·σ·r` term
    /// that operators derived for a subsystem can carry.
    pub fn apply(&self, frac: &Vector3<f64>, sigma: Option<&DMatrix<f64>>) -> Vector3<f64> {
        let mut p = self.rotation() * frac + self.translation();
        if let Some(sigma) = sigma.filter(|_| self.dimension > 0) {
            let r3d = block(&self.matrix, 0, 3, 3, self.dimension);
            if r3d.iter().any(|v| *v != 0.0) {
                let r = DVector::from_column_slice(frac.as_slice());
                let extra = r3d * (sigma * r);
                p += Vector3::new(extra[0], extra[1], extra[2]);
            }
        }
        p
    }

    pub fn is_identity(&self) -> bool {
        let n = self.rank();
        self.matrix == DMatrix::identity(n + 1, n + 1)
    }
}

fn axis_names(n: usize) -> Vec<String> {
    if n == 3 {
        vec!["x".into(), "y".into(), "z".into()]
    } else {
        (1..=n).map(|i| format!("x{}", i)).collect()
    }
}

fn parse_row(row: &str, n: usize) -> Result<(Vec<f64>, f64), String> {
    let chars: Vec<char> = row.chars().collect();
    let mut coefs = vec![0.0; n];
    let mut shift = 0.0;
    let mut i = 0;
    if chars.is_empty() {
        return Err("empty row".into());
    }
    while i < chars.len() {
        let mut sign = 1.0;
        match chars[i] {
            '+' => i += 1,
            '-' => {
                sign = -1.0;
                i += 1;
            }
            _ => {}
        }
        let (number, next) = read_number(&chars, i)?;
        i = next;
        if i < chars.len() && chars[i] == '*' {
            i += 1;
        }
        match read_axis(&chars, i)? {
            Some((axis, next)) => {
                if axis >= n {
                    return Err(format!("axis {} beyond dimension {}", axis + 1, n));
                }
                coefs[axis] += sign * number.unwrap_or(1.0);
                i = next;
            }
            None => match number {
                Some(v) => shift += sign * v,
                None => return Err(format!("unexpected '{}'", chars[i.min(chars.len() - 1)])),
            },
        }
    }
    Ok((coefs, shift))
}

/// Reads `12`, `0.5` or `1/2` starting at `i`.
fn read_number(chars: &[char], mut i: usize) -> Result<(Option<f64>, usize), String> {
    let start = i;
    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
        i += 1;
    }
    if i == start {
        return Ok((None, i));
    }
    let text: String = chars[start..i].iter().collect();
    let mut value: f64 = text.parse().map_err(|_| format!("bad number '{}'", text))?;
    if i < chars.len() && chars[i] == '/' {
        let d0 = i + 1;
        i = d0;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        let den: String = chars[d0..i].iter().collect();
        let den: f64 = den.parse().map_err(|_| "bad fraction".to_string())?;
        if den == 0.0 {
            return Err("zero denominator".into());
        }
        value /= den;
    }
    Ok((Some(value), i))
}

fn read_axis(chars: &[char], i: usize) -> Result<Option<(usize, usize)>, String> {
    let Some(&c) = chars.get(i) else {
        return Ok(None);
    };
    let axis = match c {
        'x' => match chars.get(i + 1).and_then(|d| d.to_digit(10)) {
            Some(d @ 1..=6) => return Ok(Some((d as usize - 1, i + 2))),
            _ => 0,
        },
        'y' => 1,
        'z' => 2,
        'a'..='h' => 3 + (c as usize - 'a' as usize),
        _ if c.is_ascii_digit() || c == '+' || c == '-' => return Ok(None),
        _ => return Err(format!("unexpected '{}'", c)),
    };
    Ok(Some((axis, i + 1)))
}

fn to_xyz(m: &DMatrix<f64>, n: usize) -> String {
    let names = axis_names(n);
    let mut rows = Vec::with_capacity(n);
    for i in 0..n {
        let mut s = String::new();
        for (j, name) in names.iter().enumerate() {
            let c = m[(i, j)];
            if c == 0.0 {
                continue;
            }
            s.push(if c < 0.0 { '-' } else { '+' });
            if (c.abs() - 1.0).abs() > 1e-9 {
                s.push_str(&format_number(c.abs()));
            }
            s.push_str(name);
        }
        let t = m[(i, n)];
        if t != 0.0 {
            s.push(if t < 0.0 { '-' } else { '+' });
            s.push_str(&format_number(t.abs()));
        }
        if s.is_empty() {
            s.push('0');
        }
        rows.push(s.trim_start_matches('+').to_string());
    }
    rows.join(",")
}

fn format_number(v: f64) -> String {
    let twelfths = v * 12.0;
    if (twelfths - twelfths.round()).abs() < 1e-6 && v.fract() != 0.0 {
        let mut num = twelfths.round() as i64;
        let mut den = 12;
        for p in [2, 2, 3] {
            if num % p == 0 && den % p == 0 {
                num /= p;
                den /= p;
            }
        }
        format!("{}/{}", num, den)
    } else {
        format!("{}", v)
    }
}

/// The operators in force for one model. Operator 0 is always the identity.
#[derive(Debug, Clone)]
pub struct SpaceGroup {
    pub name: Option<String>,
    pub dimension: usize,
    operators: Vec<SymmetryOperator>,
}

impl SpaceGroup {
    pub fn new(dimension: usize) -> Self {
        Self {
            name: None,
            dimension,
            operators: vec![SymmetryOperator::identity(dimension)],
        }
    }

    /// Adds every string that parses; an explicit identity is folded into
    /// operator 0. Failures come back as messages for the caller to report.
    pub fn from_strings(dimension: usize, ops: &[String]) -> (Self, Vec<String>) {
        let mut group = Self::new(dimension);
        let mut errors = Vec::new();
        for xyz in ops {
            match SymmetryOperator::parse(xyz, dimension) {
                Ok(op) if op.is_identity() => {}
                Ok(op) => group.operators.push(op),
                Err(e) => errors.push(e),
            }
        }
        (group, errors)
    }

    pub fn push(&mut self, op: SymmetryOperator) {
        self.operators.push(op);
    }

    pub fn operators(&self) -> &[SymmetryOperator] {
        &self.operators
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&SymmetryOperator> {
        self.operators.get(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_operator() {
        let op = SymmetryOperator::parse("-x+1/2, y, -z+0.5", 0).unwrap();
        let r = op.rotation();
        assert_eq!(r[(0, 0)], -1.0);
        assert_eq!(r[(1, 1)], 1.0);
        assert_eq!(r[(2, 2)], -1.0);
        let p = op.apply(&Vector3::new(0.1, 0.2, 0.3), None);
        assert!((p - Vector3::new(0.4, 0.2, 0.2)).norm() < 1e-12);
    }

    #[test]
    fn test_parse_mixed_terms() {
        let op = SymmetryOperator::parse("x-y,x,z+1/3", 0).unwrap();
        let r = op.rotation();
        assert_eq!(r[(0, 1)], -1.0);
        assert_eq!(r[(1, 0)], 1.0);
        assert!((op.translation().z - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_parse_superspace() {
        let op = SymmetryOperator::parse("x1,-x2,x3,x1-x4+1/2", 1).unwrap();
        let m = op.rsvs();
        assert_eq!(m.nrows(), 5);
        assert_eq!(m[(3, 0)], 1.0);
        assert_eq!(m[(3, 3)], -1.0);
        assert_eq!(m[(3, 4)], 0.5);
        let letters = SymmetryOperator::parse("x,y,z,a", 1).unwrap();
        assert!(letters.is_identity());
    }

    #[test]
    fn test_row_count_must_match_dimension() {
        assert!(SymmetryOperator::parse("x,y,z", 1).is_err());
        assert!(SymmetryOperator::parse("x1,x2,x3,x4", 0).is_err());
        assert!(SymmetryOperator::parse("x,y,q", 0).is_err());
    }

    #[test]
    fn test_identity_first_and_failures_returned() {
        let ops = vec!["x,y,z".to_string(), "-x,-y,-z".to_string(), "x,y".to_string()];
        let (g, errors) = SpaceGroup::from_strings(0, &ops);
        assert_eq!(g.len(), 2);
        assert!(g.operators()[0].is_identity());
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_text_regenerated_from_parts() {
        let rot = DMatrix::from_row_slice(3, 3, &[0.0, -1.0, 0.0, 1.0, -1.0, 0.0, 0.0, 0.0, 1.0]);
        let t = DVector::from_column_slice(&[0.0, 0.0, 1.0 / 3.0]);
        let op = SymmetryOperator::from_parts(&rot, &t, 0);
        assert_eq!(op.xyz, "-y,x-y,z+1/3");
        let again = SymmetryOperator::parse(&op.xyz, 0).unwrap();
        assert_eq!(again.rsvs(), op.rsvs());
    }
}

// src/model/elements.rs

/// (symbol, covalent radius in Å), indexed by Z - 1.
/// Radii are covalent (single-bond) radii; `0.0` where no value is tabulated.
const ELEMENTS: [(&str, f64); 109] = [
    // --- Period 1 ---
    ("H", 0.37), ("He", 0.32),
    // --- Period 2 ---
    ("Li", 1.34), ("Be", 0.90), ("B", 0.82), ("C", 0.77), ("N", 0.75), ("O", 0.73),
    ("F", 0.71), ("Ne", 0.69),
    // --- Period 3 ---
    ("Na", 1.54), ("Mg", 1.30), ("Al", 1.18), ("Si", 1.11), ("P", 1.06), ("S", 1.02),
    ("Cl", 0.99), ("Ar", 0.97),
    // --- Period 4 ---
    ("K", 1.96), ("Ca", 1.74), ("Sc", 1.44), ("Ti", 1.36), ("V", 1.25), ("Cr", 1.27),
    ("Mn", 1.39), ("Fe", 1.25), ("Co", 1.26), ("Ni", 1.21), ("Cu", 1.38), ("Zn", 1.31),
    ("Ga", 1.26), ("Ge", 1.22), ("As", 1.19), ("Se", 1.16), ("Br", 1.14), ("Kr", 1.10),
    // --- Period 5 ---
    ("Rb", 2.11), ("Sr", 1.92), ("Y", 1.62), ("Zr", 1.48), ("Nb", 1.37), ("Mo", 1.45),
    ("Tc", 1.56), ("Ru", 1.26), ("Rh", 1.35), ("Pd", 1.31), ("Ag", 1.53), ("Cd", 1.48),
    ("In", 1.44), ("Sn", 1.41), ("Sb", 1.38), ("Te", 1.35), ("I", 1.33), ("Xe", 1.30),
    // --- Period 6 ---
    ("Cs", 2.25), ("Ba", 1.98), ("La", 1.69), ("Ce", 1.65), ("Pr", 1.65), ("Nd", 1.64),
    ("Pm", 1.63), ("Sm", 1.62), ("Eu", 1.85), ("Gd", 1.61), ("Tb", 1.59), ("Dy", 1.59),
    ("Ho", 1.58), ("Er", 1.57), ("Tm", 1.56), ("Yb", 1.74), ("Lu", 1.56), ("Hf", 1.44),
    ("Ta", 1.34), ("W", 1.30), ("Re", 1.28), ("Os", 1.26), ("Ir", 1.27), ("Pt", 1.30),
    ("Au", 1.44), ("Hg", 1.49), ("Tl", 1.48), ("Pb", 1.47), ("Bi", 1.46), ("Po", 1.46),
    ("At", 1.45), ("Rn", 1.45),
    // --- Period 7 ---
    ("Fr", 2.60), ("Ra", 2.21), ("Ac", 2.15), ("Th", 2.06), ("Pa", 2.00), ("U", 1.96),
    ("Np", 1.90), ("Pu", 1.87), ("Am", 1.80), ("Cm", 1.69), ("Bk", 0.0), ("Cf", 0.0),
    ("Es", 0.0), ("Fm", 0.0), ("Md", 0.0), ("No", 0.0), ("Lr", 0.0), ("Rf", 0.0),
    ("Db", 0.0), ("Sg", 0.0), ("Bh", 0.0), ("Hs", 0.0), ("Mt", 0.0),
];

/// Returns the Atomic Number (Z) for a given element symbol, 0 if unknown.
/// Deuterium and tritium count as hydrogen.
pub fn get_atomic_number(element: &str) -> i32 {
    match element {
        "D" | "T" => 1,
        _ => ELEMENTS
            .iter()
            .position(|(s, _)| *s == element)
            .map_or(0, |i| i as i32 + 1),
    }
}

pub fn is_valid_symbol(element: &str) -> bool {
    get_atomic_number(element) > 0
}

/// True if `first` + `second` spell a two-letter element, e.g. `F`+`e`.
pub fn is_valid_symbol2(first: char, second: char) -> bool {
    let mut s = String::with_capacity(2);
    s.push(first.to_ascii_uppercase());
    s.push(second.to_ascii_lowercase());
    is_valid_symbol(&s)
}

/// Covalent radius used for bonding, `None` for unknown symbols or
/// elements without a tabulated value.
pub fn covalent_radius(element: &str) -> Option<f64> {
    let z = get_atomic_number(element);
    if z <= 0 {
        return None;
    }
    ELEMENTS
        .get(z as usize - 1)
        .map(|(_, r)| *r)
        .filter(|r| *r > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_numbers() {
        assert_eq!(get_atomic_number("H"), 1);
        assert_eq!(get_atomic_number("Fe"), 26);
        assert_eq!(get_atomic_number("Au"), 79);
        assert_eq!(get_atomic_number("Mt"), 109);
        assert_eq!(get_atomic_number("D"), 1);
        assert_eq!(get_atomic_number("Xx"), 0);
    }

    #[test]
    fn test_two_letter_symbols() {
        assert!(is_valid_symbol2('F', 'E'));
        assert!(is_valid_symbol2('c', 'l'));
        assert!(!is_valid_symbol2('O', '2'));
        assert!(is_valid_symbol2('C', 'A'));
    }

    #[test]
    fn test_radii() {
        assert_eq!(covalent_radius("C"), Some(0.77));
        assert_eq!(covalent_radius("D"), Some(0.37));
        assert_eq!(covalent_radius("Cf"), None);
        assert_eq!(covalent_radius("Q"), None);
    }
}

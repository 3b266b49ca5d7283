//! Reconstructs crystal structures from CIF, mmCIF and modulated (msCIF)
//! files: symmetry expansion, incommensurate modulation, composite
//! subsystems and bonding, with the result in Cartesian coordinates.
//!
//! ```no_run
//! use cview_mscif::config::ReaderOptions;
//!
//! let opts = ReaderOptions::from_filter("PACKED;MODT=0.25");
//! let atoms = cview_mscif::io::load_structure("sample.cif", &opts).unwrap();
//! println!("{} atoms", atoms.atom_count());
//! ```

pub mod config;
pub mod io;
pub mod model;
pub mod physics;
pub mod utils;

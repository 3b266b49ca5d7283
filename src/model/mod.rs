//src/model/mod.rs
pub mod elements;
pub mod structure;
pub mod symmetry;
pub mod unit_cell;

// Re-exports for cleaner imports
pub use structure::{AtomRecord, AtomSetCollection, Bond, BondOrder, Model};
pub use symmetry::{SpaceGroup, SymmetryOperator};
pub use unit_cell::UnitCell;

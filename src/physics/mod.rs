// src/physics/mod.rs
pub mod bonding;
pub mod expansion;
pub mod modulation;
pub mod subsystem;

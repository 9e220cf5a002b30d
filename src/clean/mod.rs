// src/clean/mod.rs
//
// Stages 3 and 4: map combined tables onto typed, de-duplicated records.

pub mod deskcount;
pub mod occupancy;

pub use deskcount::{clean_deskcount, CleanDeskcount};
pub use occupancy::{clean_occupancy, CleanOccupancy};

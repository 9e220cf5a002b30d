// src/dims/mod.rs
//
// Stages 5-7: dimension tables.

pub mod date;
pub mod lob;
pub mod location;

pub use date::{create_dim_date, DimDate};
pub use lob::{create_dim_line_of_business, DimLineOfBusiness};
pub use location::{create_dim_location, DimLocation};

pub mod clean;
pub mod combine;
pub mod config;
pub mod convert;
pub mod dims;
pub mod facts;
pub mod period;
pub mod pipeline;
pub mod publish;
pub mod report;
pub mod table;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_util;

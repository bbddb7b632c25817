//! Building blocks shared by the stores and the pipeline.

pub mod identifier;
pub mod value;

pub use identifier::{qualify_pg, quote_mysql, quote_pg, validate_identifier};
pub use value::{Record, SqlValue};

pub mod archive;
pub mod pickler;

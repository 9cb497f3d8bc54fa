//! Reading and writing visibility rows as text

pub mod csv;

pub use self::csv::{output_writer, write_output_rows, CsvRowSource};

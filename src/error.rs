//! Errors that can occur while averaging

use thiserror::Error;

use crate::key::AveragingKey;

#[derive(Error, Debug)]
/// All the errors that can occur while averaging a visibility stream
pub enum AveragingError {
    /// Invalid averaging parameters, or data that can't be averaged under them.
    #[error("Invalid averaging configuration {option}. Expected {expected}, received {received}")]
    Configuration {
        /// The offending parameter
        option: String,
        /// Description of what was expected
        expected: String,
        /// The value received
        received: String,
    },

    /// A row disagrees with the shape established for its key in this chunk,
    /// or with the column set its key's accumulator was opened with.
    #[error("Row for {key} has {received}, but {key} was established with {expected}")]
    ShapeMismatch {
        /// The key of the offending row
        key: AveragingKey,
        /// The established shape or column set
        expected: String,
        /// The shape or column set of the row
        received: String,
    },

    /// A row which is inconsistent with itself.
    #[error("Malformed row at time {time}: {reason}")]
    MalformedRow {
        /// The time of the offending row
        time: f64,
        /// What is wrong with it
        reason: String,
    },

    /// The source delivered a row earlier than the start of the open
    /// accumulator for its key.
    #[error("Row for {key} at time {time} precedes the open accumulator's interval start {interval_start}")]
    OutOfOrderInput {
        /// The key of the offending row
        key: AveragingKey,
        /// The time of the offending row
        time: f64,
        /// The start of the open accumulator
        interval_start: f64,
    },

    #[error(transparent)]
    /// Error derived from [`SourceError`]
    Source(#[from] SourceError),

    #[cfg(feature = "cli")]
    #[error(transparent)]
    /// Error derived from [`CLIError`]
    CLIError(#[from] CLIError),

    #[cfg(feature = "cli")]
    #[error(transparent)]
    /// Error derived from [`clap::Error`]
    ClapError(#[from] clap::Error),

    #[cfg(feature = "cli")]
    #[error("Dry run")]
    /// Not an error, just a signal that no averaging should be done.
    DryRun {},
}

#[derive(Error, Debug, PartialEq, Eq)]
/// Errors from [`crate::AccumulatorTable`]
pub enum TableError {
    /// There is no open accumulator for the key.
    #[error("No open accumulator for {key}")]
    NoSuchKey {
        /// The requested key
        key: AveragingKey,
    },
}

#[derive(Error, Debug)]
/// Errors raised by a [`crate::RowSource`]
pub enum SourceError {
    /// `next_row` was called when the current chunk had no more rows.
    #[error("No more rows in the current chunk")]
    NoRowAvailable,

    #[error(transparent)]
    /// Error derived from [`std::io::Error`]
    Io(#[from] std::io::Error),

    #[cfg(feature = "cli")]
    #[error(transparent)]
    /// Error derived from [`csv::Error`]
    Csv(#[from] csv::Error),

    /// A field of a text record could not be parsed.
    #[error("Line {line}: could not parse {field} from {value:?}")]
    Parse {
        /// Line in the input
        line: u64,
        /// The field being parsed
        field: String,
        /// The text that was found
        value: String,
    },
}

#[cfg(feature = "cli")]
#[derive(Error, Debug)]
/// Errors relating to command line arguments
pub enum CLIError {
    /// A command line argument is invalid
    #[error("Invalid command line argument {option}. Expected {expected}, received {received}")]
    InvalidCommandLineArgument {
        /// The option
        option: String,
        /// The expected value
        expected: String,
        /// The received value
        received: String,
    },
}

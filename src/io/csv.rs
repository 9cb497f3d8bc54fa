//! Visibility rows as comma separated text.
//!
//! Each record is one row:
//!
//! `chunk, time, interval, exposure, antenna1, antenna2, data_desc_id,
//! array_id, observation_id, field_id, scan_number, state_id, u, v, w,
//! flag_row, num_chans, num_pols`
//!
//! followed by `num_chans * num_pols` cells in channel-major order, each as
//! `re, im, weight, flag`. A new chunk starts whenever `chunk` changes. Output
//! files use the same layout, so they can be averaged again.

use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
    str::FromStr,
};

use ::csv::{Reader, ReaderBuilder, StringRecord, Trim, Writer, WriterBuilder};
use itertools::izip;
use log::trace;

use crate::{
    error::{AveragingError, SourceError},
    ndarray::Array2,
    source::RowSource,
    types::{InputRow, OutputRow, RowIds, Uvw, Weights},
    Complex,
};

/// Names of the leading fields of every record
pub const ROW_FIELDS: [&str; 18] = [
    "chunk",
    "time",
    "interval",
    "exposure",
    "antenna1",
    "antenna2",
    "data_desc_id",
    "array_id",
    "observation_id",
    "field_id",
    "scan_number",
    "state_id",
    "u",
    "v",
    "w",
    "flag_row",
    "num_chans",
    "num_pols",
];

/// Names of the fields of every cell
pub const CELL_FIELDS: [&str; 4] = ["re", "im", "weight", "flag"];

fn parse_field<T: FromStr>(record: &StringRecord, idx: usize, name: &str) -> Result<T, SourceError> {
    let value = record.get(idx).unwrap_or_default();
    value.parse().map_err(|_| SourceError::Parse {
        line: record.position().map_or(0, |pos| pos.line()),
        field: name.into(),
        value: value.into(),
    })
}

fn parse_flag(record: &StringRecord, idx: usize, name: &str) -> Result<bool, SourceError> {
    match record.get(idx).unwrap_or_default() {
        "0" | "false" => Ok(false),
        "1" | "true" => Ok(true),
        value => Err(SourceError::Parse {
            line: record.position().map_or(0, |pos| pos.line()),
            field: name.into(),
            value: value.into(),
        }),
    }
}

/// Parse one record into its chunk label and row.
///
/// # Errors
///
/// [`SourceError::Parse`] naming the first field which can't be parsed, or
/// `cells` if the number of cell fields disagrees with the shape.
pub fn parse_record(record: &StringRecord) -> Result<(u64, InputRow), SourceError> {
    let chunk = parse_field(record, 0, ROW_FIELDS[0])?;
    let num_chans: usize = parse_field(record, 16, ROW_FIELDS[16])?;
    let num_pols: usize = parse_field(record, 17, ROW_FIELDS[17])?;
    let expected_len = num_chans
        .checked_mul(num_pols)
        .and_then(|num_cells| num_cells.checked_mul(CELL_FIELDS.len()))
        .and_then(|num_cell_fields| num_cell_fields.checked_add(ROW_FIELDS.len()));
    if expected_len != Some(record.len()) {
        return Err(SourceError::Parse {
            line: record.position().map_or(0, |pos| pos.line()),
            field: "cells".into(),
            value: format!(
                "{} fields for {} x {} cells",
                record.len() - ROW_FIELDS.len().min(record.len()),
                num_chans,
                num_pols
            ),
        });
    }

    let mut data = Array2::zeros((num_chans, num_pols));
    let mut weights = Array2::zeros((num_chans, num_pols));
    let mut flags = Array2::from_elem((num_chans, num_pols), false);
    for (cell_idx, (value, weight, flag)) in
        izip!(data.iter_mut(), weights.iter_mut(), flags.iter_mut()).enumerate()
    {
        let offset = ROW_FIELDS.len() + CELL_FIELDS.len() * cell_idx;
        *value = Complex::new(
            parse_field(record, offset, CELL_FIELDS[0])?,
            parse_field(record, offset + 1, CELL_FIELDS[1])?,
        );
        *weight = parse_field(record, offset + 2, CELL_FIELDS[2])?;
        *flag = parse_flag(record, offset + 3, CELL_FIELDS[3])?;
    }

    let row = InputRow {
        time: parse_field(record, 1, ROW_FIELDS[1])?,
        interval: parse_field(record, 2, ROW_FIELDS[2])?,
        exposure: parse_field(record, 3, ROW_FIELDS[3])?,
        antenna1: parse_field(record, 4, ROW_FIELDS[4])?,
        antenna2: parse_field(record, 5, ROW_FIELDS[5])?,
        data_desc_id: parse_field(record, 6, ROW_FIELDS[6])?,
        ids: RowIds {
            array_id: parse_field(record, 7, ROW_FIELDS[7])?,
            observation_id: parse_field(record, 8, ROW_FIELDS[8])?,
            field_id: parse_field(record, 9, ROW_FIELDS[9])?,
            scan_number: parse_field(record, 10, ROW_FIELDS[10])?,
            state_id: parse_field(record, 11, ROW_FIELDS[11])?,
        },
        uvw: Uvw::new(
            parse_field(record, 12, ROW_FIELDS[12])?,
            parse_field(record, 13, ROW_FIELDS[13])?,
            parse_field(record, 14, ROW_FIELDS[14])?,
        ),
        data,
        corrected: None,
        model: None,
        flags,
        weights: Weights::Spectrum(weights),
        flag_row: parse_flag(record, 15, ROW_FIELDS[15])?,
    };
    Ok((chunk, row))
}

/// A [`RowSource`] reading CSV records.
///
/// Records are read one ahead, so the end of a chunk is only known once the
/// first record of the next chunk has been parsed.
pub struct CsvRowSource<R: Read> {
    reader: Reader<R>,
    record: StringRecord,
    peeked: Option<(u64, InputRow)>,
    current_chunk: Option<u64>,
    exhausted: bool,
    rows_read: usize,
}

impl<R: Read> CsvRowSource<R> {
    /// Read records from `reader`. The first line is a header.
    pub fn new(reader: R) -> Self {
        Self::from_csv_reader(
            ReaderBuilder::new()
                .has_headers(true)
                .flexible(true)
                .trim(Trim::All)
                .from_reader(reader),
        )
    }

    fn from_csv_reader(reader: Reader<R>) -> Self {
        Self {
            reader,
            record: StringRecord::new(),
            peeked: None,
            current_chunk: None,
            exhausted: false,
            rows_read: 0,
        }
    }

    /// Number of rows parsed so far
    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    fn fill(&mut self) -> Result<(), SourceError> {
        if self.peeked.is_some() || self.exhausted {
            return Ok(());
        }
        if self.reader.read_record(&mut self.record)? {
            self.peeked = Some(parse_record(&self.record)?);
            self.rows_read += 1;
        } else {
            self.exhausted = true;
        }
        Ok(())
    }

    fn in_current_chunk(&self) -> bool {
        matches!(
            (&self.peeked, self.current_chunk),
            (Some((chunk, _)), Some(current)) if *chunk == current
        )
    }
}

impl CsvRowSource<File> {
    /// Read records from the file at `path`.
    ///
    /// # Errors
    ///
    /// [`SourceError::Csv`] if the file can't be opened.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_path(path)?;
        Ok(Self::from_csv_reader(reader))
    }
}

impl<R: Read> RowSource for CsvRowSource<R> {
    fn next_chunk(&mut self) -> Result<bool, AveragingError> {
        // skip whatever is left of the current chunk
        self.fill()?;
        while self.in_current_chunk() {
            self.peeked = None;
            self.fill()?;
        }
        self.current_chunk = self.peeked.as_ref().map(|(chunk, _)| *chunk);
        if let Some(chunk) = self.current_chunk {
            trace!("csv chunk {} starts at row {}", chunk, self.rows_read);
        }
        Ok(self.current_chunk.is_some())
    }

    fn more_rows_in_chunk(&mut self) -> Result<bool, AveragingError> {
        self.fill()?;
        Ok(self.in_current_chunk())
    }

    fn next_row(&mut self) -> Result<InputRow, AveragingError> {
        if !self.more_rows_in_chunk()? {
            return Err(SourceError::NoRowAvailable.into());
        }
        match self.peeked.take() {
            Some((_, row)) => Ok(row),
            None => Err(SourceError::NoRowAvailable.into()),
        }
    }
}

/// A writer for [`write_output_rows`], with the header already written.
///
/// # Errors
///
/// [`SourceError::Csv`] if the header can't be written.
pub fn output_writer<W: Write>(writer: W) -> Result<Writer<W>, SourceError> {
    let mut writer = WriterBuilder::new().flexible(true).from_writer(writer);
    writer.write_record(ROW_FIELDS.iter().chain(CELL_FIELDS.iter()))?;
    Ok(writer)
}

fn flag_field(flag: bool) -> String {
    String::from(if flag { "1" } else { "0" })
}

/// Write averaged rows as CSV records. Only the observed column is written.
///
/// # Errors
///
/// [`SourceError::Csv`] if a record can't be written.
pub fn write_output_rows<W: Write>(
    writer: &mut Writer<W>,
    rows: &[OutputRow],
) -> Result<(), SourceError> {
    for row in rows {
        let (num_chans, num_pols) = row.shape();
        let mut fields: Vec<String> = vec![
            row.chunk_index.to_string(),
            row.time.to_string(),
            row.interval.to_string(),
            row.exposure.to_string(),
            row.antenna1.to_string(),
            row.antenna2.to_string(),
            row.data_desc_id.to_string(),
            row.ids.array_id.to_string(),
            row.ids.observation_id.to_string(),
            row.ids.field_id.to_string(),
            row.ids.scan_number.to_string(),
            row.ids.state_id.to_string(),
            row.uvw.u.to_string(),
            row.uvw.v.to_string(),
            row.uvw.w.to_string(),
            flag_field(row.flag_row),
            num_chans.to_string(),
            num_pols.to_string(),
        ];
        for (value, weight, &flag) in izip!(&row.data, &row.weights, &row.flags) {
            fields.push(value.re.to_string());
            fields.push(value.im.to_string());
            fields.push(weight.to_string());
            fields.push(flag_field(flag));
        }
        writer.write_record(&fields)?;
    }
    Ok(())
}

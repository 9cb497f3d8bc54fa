use csv::StringRecord;
use std::path::Path;

/// One averaged row read back from a visavg output file.
#[derive(Debug)]
pub struct AveragedRecord {
    pub chunk: usize,
    pub time: f64,
    pub interval: f64,
    pub antennas: (u32, u32),
    pub scan_number: i32,
    pub u: f64,
    pub flag_row: bool,
    /// `(re, im, weight, flag)` for each cell, channel-major
    pub cells: Vec<(f32, f32, f32, bool)>,
}

fn field<T: std::str::FromStr>(record: &StringRecord, idx: usize) -> T {
    let value = &record[idx];
    value
        .parse()
        .unwrap_or_else(|_| panic!("unable to parse field {} -> {}", idx, value))
}

pub fn read_output<P: AsRef<Path>>(path: P) -> Vec<AveragedRecord> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .unwrap();
    reader
        .records()
        .map(|result| {
            let record = result.unwrap();
            let num_cells: usize = field::<usize>(&record, 16) * field::<usize>(&record, 17);
            let cells = (0..num_cells)
                .map(|cell_idx| {
                    let offset = 18 + 4 * cell_idx;
                    (
                        field(&record, offset),
                        field(&record, offset + 1),
                        field(&record, offset + 2),
                        &record[offset + 3] == "1",
                    )
                })
                .collect();
            AveragedRecord {
                chunk: field(&record, 0),
                time: field(&record, 1),
                interval: field(&record, 2),
                antennas: (field(&record, 4), field(&record, 5)),
                scan_number: field(&record, 10),
                u: field(&record, 12),
                flag_row: &record[15] == "1",
                cells,
            }
        })
        .collect()
}

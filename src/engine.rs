//! The averaging state machine, pulling rows from a [`RowSource`] and yielding
//! averaged [`OutputRow`]s.
//!
//! The engine is single threaded and does no work until output is pulled from
//! it. Within a chunk, rows closed early by the [`BoundaryPolicy`] come out
//! first; the remaining accumulators follow when the chunk is exhausted, in the
//! order they were opened.

use std::{
    collections::VecDeque,
    fmt::{Display, Formatter},
};

use log::{debug, trace};

use crate::{
    accumulator::AccumulatorTable,
    boundary::{BoundaryPolicy, CloseReason},
    config::AveragingConfig,
    error::{AveragingError, SourceError},
    key::KeyMapper,
    source::RowSource,
    types::{InputRow, OutputRow},
};

/// Where an [`AveragingEngine`] is in its walk over the source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// Between chunks
    Idle,
    /// Pulling rows from the current chunk
    AccumulatingChunk,
    /// The current chunk is exhausted; every open accumulator is about to close
    FlushingChunk,
    /// The source has no more chunks
    Done,
    /// An error was raised; no more output will be produced
    Failed,
}

/// Running totals of an [`AveragingEngine`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Chunks started
    pub chunks: usize,
    /// Rows folded into an accumulator
    pub rows_in: usize,
    /// Averaged rows produced
    pub rows_out: usize,
}

impl Display for EngineStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} rows averaged into {} rows over {} chunks",
            self.rows_in, self.rows_out, self.chunks
        )
    }
}

/// Averages the rows of a [`RowSource`] over time.
///
/// # Examples
///
/// ```rust
/// use visavg::{
///     ndarray::Array2, AveragingConfig, AveragingEngine, ChunkedRows, Complex, InputRow, Uvw,
/// };
///
/// let rows = [0.0, 1.0, 2.5]
///     .into_iter()
///     .zip([1.0, 3.0, 5.0])
///     .map(|(time, value)| {
///         let data = Array2::from_elem((1, 1), Complex::new(value, 0.0));
///         InputRow::new(time, 1.0, 1, 2, 0, Uvw::default(), data)
///     })
///     .collect();
/// let source = ChunkedRows::new(vec![rows]);
/// let engine = AveragingEngine::new(source, AveragingConfig::new(2.0)).unwrap();
///
/// let averaged: Vec<_> = engine.map(Result::unwrap).collect();
/// assert_eq!(averaged.len(), 2);
/// assert_eq!(averaged[0].data[[0, 0]], Complex::new(2.0, 0.0));
/// assert_eq!(averaged[1].data[[0, 0]], Complex::new(5.0, 0.0));
/// ```
#[derive(Debug)]
pub struct AveragingEngine<S: RowSource> {
    source: S,
    config: AveragingConfig,
    keys: KeyMapper,
    policy: BoundaryPolicy,
    table: AccumulatorTable,
    state: EngineState,
    pending: VecDeque<OutputRow>,
    chunk_index: usize,
    completed_chunks: usize,
    stats: EngineStats,
}

impl<S: RowSource> AveragingEngine<S> {
    /// Create an engine over `source`. The source is not touched until output
    /// is requested.
    ///
    /// # Errors
    ///
    /// [`AveragingError::Configuration`] if `config` does not validate.
    pub fn new(source: S, config: AveragingConfig) -> Result<Self, AveragingError> {
        let policy = BoundaryPolicy::new(&config)?;
        debug!("averaging engine: {}", config.as_comment());
        Ok(Self {
            source,
            keys: KeyMapper::new(config.average_across_baselines),
            table: AccumulatorTable::new(config.column_plan()),
            config,
            policy,
            state: EngineState::Idle,
            pending: VecDeque::new(),
            chunk_index: 0,
            completed_chunks: 0,
            stats: EngineStats::default(),
        })
    }

    /// Current state
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Running totals
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// The configuration this engine was built with
    pub fn config(&self) -> &AveragingConfig {
        &self.config
    }

    /// The open accumulators. After a failure they are left as they were when
    /// the error was raised.
    pub fn table(&self) -> &AccumulatorTable {
        &self.table
    }

    /// The upstream source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Whether [`Self::next_output`] will yield another row.
    ///
    /// # Errors
    ///
    /// Any error raised while pulling rows. The engine is then [`EngineState::Failed`].
    pub fn more_output(&mut self) -> Result<bool, AveragingError> {
        loop {
            if !self.pending.is_empty() {
                return Ok(true);
            }
            if self.is_finished() {
                return Ok(false);
            }
            self.advance()?;
        }
    }

    /// The next averaged row, or `None` once the source is exhausted or after a
    /// failure has been reported.
    ///
    /// # Errors
    ///
    /// Any error raised while pulling rows, reported exactly once. The engine
    /// is then [`EngineState::Failed`].
    pub fn next_output(&mut self) -> Result<Option<OutputRow>, AveragingError> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            if self.is_finished() {
                return Ok(None);
            }
            self.advance()?;
        }
    }

    /// Every averaged row of the next upstream chunk, in output order. An
    /// empty upstream chunk gives an empty `Vec`. Rows of a chunk already
    /// partly taken with [`Self::next_output`] are returned without the rows
    /// already taken.
    ///
    /// # Errors
    ///
    /// Any error raised while pulling rows. Rows already closed in the failing
    /// chunk are discarded.
    pub fn next_output_chunk(&mut self) -> Result<Option<Vec<OutputRow>>, AveragingError> {
        loop {
            match self.state {
                EngineState::Idle | EngineState::Done if !self.pending.is_empty() => {
                    return Ok(Some(self.pending.drain(..).collect()));
                }
                EngineState::Done | EngineState::Failed => return Ok(None),
                _ => {
                    let completed = self.completed_chunks;
                    self.advance()?;
                    if self.completed_chunks > completed {
                        return Ok(Some(self.pending.drain(..).collect()));
                    }
                }
            }
        }
    }

    /// Stop averaging, dropping every open accumulator and any output not yet
    /// taken, and hand back the source.
    pub fn abandon(mut self) -> S {
        debug!(
            "abandoning averaging with {} open accumulators and {} rows not taken",
            self.table.len(),
            self.pending.len()
        );
        self.table.discard();
        self.pending.clear();
        self.source
    }

    /// Present this engine's output as the input of a further averaging
    /// stage. Each upstream chunk becomes one output chunk.
    pub fn into_row_source(self) -> AveragedRows<S> {
        AveragedRows {
            engine: self,
            current: VecDeque::new(),
        }
    }

    fn is_finished(&self) -> bool {
        matches!(self.state, EngineState::Done | EngineState::Failed)
    }

    fn advance(&mut self) -> Result<(), AveragingError> {
        self.step().map_err(|err| {
            debug!("averaging failed in chunk {}: {}", self.chunk_index, err);
            self.state = EngineState::Failed;
            self.pending.clear();
            err
        })
    }

    /// Make one transition, or process one row.
    fn step(&mut self) -> Result<(), AveragingError> {
        match self.state {
            EngineState::Idle => {
                if self.source.next_chunk()? {
                    self.chunk_index = self.stats.chunks;
                    self.stats.chunks += 1;
                    debug!("chunk {} started", self.chunk_index);
                    self.state = EngineState::AccumulatingChunk;
                } else {
                    debug!("source exhausted, {}", self.stats);
                    self.state = EngineState::Done;
                }
            }
            EngineState::AccumulatingChunk => {
                let exhausted = !self.source.more_rows_in_chunk()?;
                if BoundaryPolicy::must_close_for_chunk_boundary(exhausted) {
                    self.state = EngineState::FlushingChunk;
                } else {
                    let row = self.source.next_row()?;
                    self.process_row(row)?;
                }
            }
            EngineState::FlushingChunk => {
                let flushed = self.table.flush_all();
                trace!(
                    "closed {} accumulators: {}",
                    flushed.len(),
                    CloseReason::ChunkBoundary
                );
                debug!(
                    "chunk {} done, {} rows still to be taken",
                    self.chunk_index,
                    self.pending.len() + flushed.len()
                );
                self.stats.rows_out += flushed.len();
                self.pending.extend(flushed);
                self.completed_chunks += 1;
                self.state = EngineState::Idle;
            }
            EngineState::Done | EngineState::Failed => {}
        }
        Ok(())
    }

    fn process_row(&mut self, row: InputRow) -> Result<(), AveragingError> {
        row.validate()?;
        let key = self.keys.key_of(&row);
        let policy = &self.policy;
        let closed = self.table.flush_when(&key, |acc| {
            if row.time < acc.interval_start() {
                return Err(AveragingError::OutOfOrderInput {
                    key,
                    time: row.time,
                    interval_start: acc.interval_start(),
                });
            }
            Ok(policy.close_reason(acc, &row))
        })?;
        if let Some((reason, out)) = closed {
            trace!("closed {} before {}: {}", key, row.time, reason);
            self.stats.rows_out += 1;
            self.pending.push_back(out);
        }
        self.table.fold_valid(key, &row, self.chunk_index)?;
        self.stats.rows_in += 1;
        Ok(())
    }
}

impl<S: RowSource> Iterator for AveragingEngine<S> {
    type Item = Result<OutputRow, AveragingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_output().transpose()
    }
}

/// The output of an [`AveragingEngine`] as a [`RowSource`].
#[derive(Debug)]
pub struct AveragedRows<S: RowSource> {
    engine: AveragingEngine<S>,
    current: VecDeque<InputRow>,
}

impl<S: RowSource> AveragedRows<S> {
    /// The engine producing the rows
    pub fn engine(&self) -> &AveragingEngine<S> {
        &self.engine
    }

    /// Give back the engine, dropping any rows of the current chunk not yet
    /// taken.
    pub fn into_engine(self) -> AveragingEngine<S> {
        self.engine
    }
}

impl<S: RowSource> RowSource for AveragedRows<S> {
    fn next_chunk(&mut self) -> Result<bool, AveragingError> {
        match self.engine.next_output_chunk()? {
            Some(rows) => {
                self.current = rows.into_iter().map(OutputRow::into_input_row).collect();
                Ok(true)
            }
            None => {
                self.current.clear();
                Ok(false)
            }
        }
    }

    fn more_rows_in_chunk(&mut self) -> Result<bool, AveragingError> {
        Ok(!self.current.is_empty())
    }

    fn next_row(&mut self) -> Result<InputRow, AveragingError> {
        self.current
            .pop_front()
            .ok_or_else(|| SourceError::NoRowAvailable.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AveragingConfigBuilder,
        ndarray::array,
        source::ChunkedRows,
        test_common::{c32, synthetic_chunks, unit_row, CountingSource},
        types::Weights,
    };
    use approx::assert_abs_diff_eq;
    use std::collections::HashMap;

    fn engine(chunks: Vec<Vec<InputRow>>, interval: f64) -> AveragingEngine<ChunkedRows> {
        AveragingEngine::new(ChunkedRows::new(chunks), AveragingConfig::new(interval)).unwrap()
    }

    fn collect(engine: AveragingEngine<impl RowSource>) -> Vec<OutputRow> {
        engine.map(Result::unwrap).collect()
    }

    #[test]
    fn test_time_threshold_scenario() {
        let rows = vec![
            unit_row(0.0, 1, 2, 0, 1.0),
            unit_row(1.0, 1, 2, 0, 3.0),
            unit_row(2.5, 1, 2, 0, 5.0),
        ];
        let mut engine = engine(vec![rows], 2.0);

        let first = engine.next_output().unwrap().unwrap();
        // the early close comes out before the chunk is finished
        assert_eq!(engine.state(), EngineState::AccumulatingChunk);
        assert_abs_diff_eq!(first.data[[0, 0]], c32(2.0, 0.0));
        assert_abs_diff_eq!(first.weights[[0, 0]], 2.0);
        assert_abs_diff_eq!(first.time, 0.5);
        assert_eq!(first.sample_count, 2);
        assert_eq!(first.generation, 0);

        let second = engine.next_output().unwrap().unwrap();
        assert_abs_diff_eq!(second.data[[0, 0]], c32(5.0, 0.0));
        assert_abs_diff_eq!(second.weights[[0, 0]], 1.0);
        assert_abs_diff_eq!(second.time, 2.5);
        assert_eq!(second.generation, 1);

        assert!(engine.next_output().unwrap().is_none());
        assert_eq!(engine.state(), EngineState::Done);
        assert_eq!(
            *engine.stats(),
            EngineStats {
                chunks: 1,
                rows_in: 3,
                rows_out: 2
            }
        );
    }

    #[test]
    fn test_fully_flagged_row_scenario() {
        let mut row = unit_row(0.0, 1, 2, 0, 4.0);
        row.flags[[0, 0]] = true;
        let out = collect(engine(vec![vec![row]], 100.0));
        assert_eq!(out.len(), 1);
        assert!(out[0].flags[[0, 0]]);
        assert_abs_diff_eq!(out[0].weights[[0, 0]], 0.0);
        assert_abs_diff_eq!(out[0].data[[0, 0]], c32(0.0, 0.0));
    }

    #[test]
    fn test_first_seen_order_scenario() {
        let rows = vec![
            unit_row(0.0, 5, 6, 0, 1.0),
            unit_row(0.0, 1, 2, 0, 1.0),
            unit_row(1.0, 1, 2, 0, 1.0),
            unit_row(1.0, 5, 6, 0, 1.0),
        ];
        let out = collect(engine(vec![rows], 10.0));
        let baselines: Vec<_> = out.iter().map(|row| row.key.baseline).collect();
        assert_eq!(baselines, vec![Some((5, 6)), Some((1, 2))]);
    }

    #[test]
    fn test_out_of_order_scenario() {
        let rows = vec![
            unit_row(5.0, 1, 2, 0, 1.0),
            unit_row(6.0, 1, 2, 0, 3.0),
            unit_row(4.0, 1, 2, 0, 100.0),
            unit_row(7.0, 1, 2, 0, 1.0),
        ];
        let mut engine = engine(vec![rows], 10.0);
        let key = KeyMapper::default().key_of(&unit_row(0.0, 1, 2, 0, 1.0));

        assert!(matches!(
            engine.next_output(),
            Err(AveragingError::OutOfOrderInput { time, interval_start, .. })
                if time == 4.0 && interval_start == 5.0
        ));
        assert_eq!(engine.state(), EngineState::Failed);

        // the open accumulator is left as it was before the bad row
        let acc = engine.table().get(&key).unwrap();
        assert_eq!(acc.sample_count(), 2);
        assert_abs_diff_eq!(acc.weight_sum()[[0, 0]], 2.0);
        assert_abs_diff_eq!(acc.interval_start(), 5.0);

        // the error is reported once
        assert!(engine.next_output().unwrap().is_none());
        assert!(!engine.more_output().unwrap());
        assert!(engine.next_output_chunk().unwrap().is_none());
    }

    #[test]
    fn test_invalid_config_never_touches_source() {
        let source = CountingSource::new(ChunkedRows::new(vec![vec![unit_row(
            0.0, 1, 2, 0, 1.0,
        )]]));
        let calls = source.calls();
        let result = AveragingEngine::new(source, AveragingConfig::new(-1.0));
        assert!(matches!(
            result,
            Err(AveragingError::Configuration { .. })
        ));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_construction_is_lazy() {
        let source = CountingSource::new(ChunkedRows::new(vec![vec![unit_row(
            0.0, 1, 2, 0, 1.0,
        )]]));
        let calls = source.calls();
        let mut engine = AveragingEngine::new(source, AveragingConfig::new(1.0)).unwrap();
        assert_eq!(calls.get(), 0);
        assert!(engine.more_output().unwrap());
        assert!(calls.get() > 0);
    }

    #[test]
    fn test_chunk_boundary_always_flushes() {
        // well within the interval, but split across chunks
        let chunks = vec![
            vec![unit_row(0.0, 1, 2, 0, 1.0), unit_row(1.0, 1, 2, 0, 3.0)],
            vec![unit_row(2.0, 1, 2, 0, 5.0), unit_row(3.0, 1, 2, 0, 7.0)],
        ];
        let out = collect(engine(chunks, f64::INFINITY));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chunk_index, 0);
        assert_abs_diff_eq!(out[0].data[[0, 0]], c32(2.0, 0.0));
        assert_eq!(out[1].chunk_index, 1);
        assert_abs_diff_eq!(out[1].data[[0, 0]], c32(6.0, 0.0));
        assert_eq!(out[1].generation, 1);
    }

    #[test]
    fn test_conservation_and_flag_invariant() {
        let chunks = synthetic_chunks(3, 4, 20, 0.5);
        let rows_in: usize = chunks.iter().map(Vec::len).sum();
        let mut per_key: HashMap<_, usize> = HashMap::new();
        for row in chunks.iter().flatten() {
            *per_key
                .entry(KeyMapper::default().key_of(row))
                .or_default() += 1;
        }

        let out = collect(engine(chunks, 3.0));
        assert_eq!(out.iter().map(|row| row.sample_count).sum::<usize>(), rows_in);
        for (key, count) in per_key {
            let folded: usize = out
                .iter()
                .filter(|row| row.key == key)
                .map(|row| row.sample_count)
                .sum();
            assert_eq!(folded, count);
        }
        for row in &out {
            for (&weight, &flag) in row.weights.iter().zip(row.flags.iter()) {
                assert_eq!(weight == 0.0, flag);
            }
        }
    }

    #[test]
    fn test_generations_count_up_per_key() {
        let out = collect(engine(synthetic_chunks(2, 2, 10, 1.0), 2.0));
        let mut expected: HashMap<_, u64> = HashMap::new();
        for row in &out {
            let generation = expected.entry(row.key).or_insert(0);
            assert_eq!(row.generation, *generation);
            *generation += 1;
        }
    }

    #[test]
    fn test_deterministic() {
        let a = collect(engine(synthetic_chunks(2, 3, 15, 0.5), 2.0));
        let b = collect(engine(synthetic_chunks(2, 3, 15, 0.5), 2.0));
        assert_eq!(a, b);
    }

    #[test]
    fn test_order_preserved_across_keys() {
        // baseline 1-2 closes at t=3, baseline 3-4 at t=4
        let rows = vec![
            unit_row(0.0, 3, 4, 0, 1.0),
            unit_row(0.5, 1, 2, 0, 1.0),
            unit_row(3.0, 1, 2, 0, 1.0),
            unit_row(4.0, 3, 4, 0, 1.0),
        ];
        let out = collect(engine(vec![rows], 2.0));
        let order: Vec<_> = out
            .iter()
            .map(|row| (row.key.baseline, row.interval_start))
            .collect();
        assert_eq!(
            order,
            vec![
                (Some((1, 2)), 0.5),
                (Some((3, 4)), 0.0),
                (Some((1, 2)), 3.0),
                (Some((3, 4)), 4.0),
            ]
        );
    }

    #[test]
    fn test_across_baselines() {
        let config = AveragingConfigBuilder::default()
            .averaging_interval_seconds(10.0)
            .average_across_baselines(true)
            .build()
            .unwrap();
        let rows = vec![
            unit_row(0.0, 1, 2, 0, 1.0),
            unit_row(0.0, 3, 4, 0, 3.0),
            unit_row(0.0, 3, 4, 1, 7.0),
        ];
        let engine = AveragingEngine::new(ChunkedRows::new(vec![rows]), config).unwrap();
        let out = collect(engine);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].key.baseline, None);
        assert_abs_diff_eq!(out[0].data[[0, 0]], c32(2.0, 0.0));
        // antennas come from the first row
        assert_eq!((out[0].antenna1, out[0].antenna2), (1, 2));
        assert_eq!(out[1].data_desc_id, 1);
    }

    #[test]
    fn test_scan_break() {
        let config = AveragingConfigBuilder::default()
            .averaging_interval_seconds(10.0)
            .break_on_scan(true)
            .build()
            .unwrap();
        let mut rows = vec![
            unit_row(0.0, 1, 2, 0, 1.0),
            unit_row(1.0, 1, 2, 0, 1.0),
            unit_row(2.0, 1, 2, 0, 1.0),
        ];
        rows[2].ids.scan_number = 1;
        let engine = AveragingEngine::new(ChunkedRows::new(vec![rows]), config).unwrap();
        let out = collect(engine);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].sample_count, 2);
        assert_eq!(out[1].ids.scan_number, 1);
    }

    #[test]
    fn test_geometry_break() {
        let config = AveragingConfigBuilder::default()
            .averaging_interval_seconds(10.0)
            .max_uvw_distance(1.0)
            .build()
            .unwrap();
        let mut rows = vec![unit_row(0.0, 1, 2, 0, 1.0), unit_row(1.0, 1, 2, 0, 1.0)];
        rows[1].uvw.u = 2.0;
        let engine = AveragingEngine::new(ChunkedRows::new(vec![rows]), config).unwrap();
        assert_eq!(collect(engine).len(), 2);
    }

    #[test]
    fn test_shape_mismatch_fails() {
        let rows = vec![
            unit_row(0.0, 1, 2, 0, 1.0),
            InputRow::new(
                1.0,
                1.0,
                1,
                2,
                0,
                Default::default(),
                array![[c32(1.0, 0.0), c32(1.0, 0.0)]],
            ),
        ];
        let mut engine = engine(vec![rows], 10.0);
        assert!(matches!(
            engine.next_output(),
            Err(AveragingError::ShapeMismatch { .. })
        ));
        assert_eq!(engine.state(), EngineState::Failed);
        assert!(engine.next().is_none());
    }

    #[test]
    fn test_shape_mismatch_after_time_close_fails() {
        let wide = |time| {
            InputRow::new(
                time,
                1.0,
                1,
                2,
                0,
                Default::default(),
                array![[c32(1.0, 0.0)], [c32(1.0, 0.0)]],
            )
        };
        // the second row closes the first accumulator on time, but the key's
        // shape stays (1, 1) for the rest of the chunk
        let mut eng = engine(vec![vec![unit_row(0.0, 1, 2, 0, 1.0), wide(3.0)]], 2.0);
        assert!(matches!(
            eng.next_output(),
            Err(AveragingError::ShapeMismatch { .. })
        ));
        assert_eq!(eng.state(), EngineState::Failed);
        assert!(eng.next().is_none());

        // a new chunk may change the shape
        let chunks = vec![vec![unit_row(0.0, 1, 2, 0, 1.0)], vec![wide(3.0)]];
        let shapes: Vec<_> = collect(engine(chunks, 2.0)).iter().map(OutputRow::shape).collect();
        assert_eq!(shapes, vec![(1, 1), (2, 1)]);
    }

    #[test]
    fn test_malformed_row_fails() {
        let mut bad = unit_row(1.0, 1, 2, 0, 1.0);
        bad.weights = Weights::PerPol(array![f32::NAN]);
        let mut engine = engine(vec![vec![unit_row(0.0, 1, 2, 0, 1.0), bad]], 10.0);
        assert!(matches!(
            engine.next_output(),
            Err(AveragingError::MalformedRow { .. })
        ));
        assert_eq!(engine.stats().rows_in, 1);
    }

    #[test]
    fn test_next_output_chunk() {
        let chunks = vec![
            vec![
                unit_row(0.0, 1, 2, 0, 1.0),
                unit_row(3.0, 1, 2, 0, 1.0),
                unit_row(3.0, 3, 4, 0, 1.0),
            ],
            vec![],
            vec![unit_row(9.0, 1, 2, 0, 1.0)],
        ];
        let mut engine = engine(chunks, 2.0);
        assert_eq!(engine.next_output_chunk().unwrap().unwrap().len(), 3);
        assert_eq!(engine.next_output_chunk().unwrap().unwrap().len(), 0);
        let last = engine.next_output_chunk().unwrap().unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].chunk_index, 2);
        assert!(engine.next_output_chunk().unwrap().is_none());
        assert_eq!(engine.stats().chunks, 3);
    }

    #[test]
    fn test_next_output_chunk_after_partial_take() {
        let chunks = vec![
            vec![unit_row(0.0, 1, 2, 0, 1.0), unit_row(0.0, 3, 4, 0, 1.0)],
            vec![unit_row(5.0, 1, 2, 0, 1.0)],
        ];
        let mut engine = engine(chunks, 2.0);
        let first = engine.next_output().unwrap().unwrap();
        assert_eq!(first.key.baseline, Some((1, 2)));
        let rest = engine.next_output_chunk().unwrap().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].key.baseline, Some((3, 4)));
        assert_eq!(engine.next_output_chunk().unwrap().unwrap()[0].chunk_index, 1);
    }

    #[test]
    fn test_abandon_mid_chunk() {
        let chunks = vec![
            vec![
                unit_row(0.0, 1, 2, 0, 1.0),
                unit_row(5.0, 1, 2, 0, 1.0),
                unit_row(6.0, 1, 2, 0, 1.0),
            ],
            vec![unit_row(9.0, 1, 2, 0, 1.0)],
        ];
        let mut engine = engine(chunks, 2.0);
        assert!(engine.next_output().unwrap().is_some());
        assert_eq!(engine.table().len(), 1);
        let mut source = engine.abandon();
        // the rest of the stream is untouched
        assert!(source.more_rows_in_chunk().unwrap());
        assert_eq!(source.next_row().unwrap().time, 6.0);
        assert_eq!(source.chunks_remaining(), 1);
    }

    #[test]
    fn test_chained_stages() {
        let chunks = vec![
            (0..8)
                .map(|t| unit_row(t as f64, 1, 2, 0, t as f32))
                .collect::<Vec<_>>(),
            vec![],
        ];
        let first = engine(chunks, 1.0);
        let mut second =
            AveragingEngine::new(first.into_row_source(), AveragingConfig::new(3.0)).unwrap();

        let chunk = second.next_output_chunk().unwrap().unwrap();
        // pairs (0, 1), (2, 3) .. average to 0.5, 2.5, 4.5, 6.5 at times 0.5, 2.5 ..
        // which the second stage groups as (0.5, 2.5) and (4.5, 6.5)
        assert_eq!(chunk.len(), 2);
        assert_abs_diff_eq!(chunk[0].data[[0, 0]], c32(1.5, 0.0));
        assert_abs_diff_eq!(chunk[0].weights[[0, 0]], 4.0);
        assert_eq!(chunk[0].sample_count, 2);
        assert_abs_diff_eq!(chunk[0].time, 1.5);
        assert_abs_diff_eq!(chunk[1].data[[0, 0]], c32(5.5, 0.0));
        // upstream chunk structure survives, including empty chunks
        assert_eq!(second.next_output_chunk().unwrap().unwrap().len(), 0);
        assert!(second.next_output_chunk().unwrap().is_none());
    }
}

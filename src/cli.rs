//! Command Line Interface helpers for visavg

use crate::{
    error::{
        AveragingError::{self, DryRun},
        CLIError::InvalidCommandLineArgument,
        SourceError,
    },
    io::{output_writer, write_output_rows, CsvRowSource},
    AveragingConfig, AveragingEngine, AveragingKey, ColumnWeighting, EngineStats,
};
use clap::{
    arg, command,
    ErrorKind::{ArgumentNotFound, DisplayHelp, DisplayVersion},
    ValueHint::FilePath,
};
use indexmap::IndexMap;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, trace, warn};
use prettytable::{cell, format as prettyformat, row, table};
use std::{
    ffi::OsString,
    fmt::{Debug, Display},
    fs::File,
    time::Duration,
};

/// Args for averaging a CSV file of visibility rows.
#[derive(Debug)]
pub struct VisavgContext {
    /// The command line, quoted
    pub invocation: String,
    /// Path to the input rows
    pub input: String,
    /// Optional path for the averaged rows
    pub output: Option<String>,
    /// Averaging parameters
    pub config: AveragingConfig,
    /// Whether to draw a progress spinner
    pub draw_progress: bool,
    /// Whether to log a table of averaged rows per key
    pub show_summary: bool,
}

// Add build-time information from the "built" crate.
include!(concat!(env!("OUT_DIR"), "/built.rs"));

/// Write how this executable was compiled.
///
/// # Errors
///
/// propagates writeln! fails
pub fn fmt_build_info(f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match GIT_HEAD_REF {
        Some(hr) => {
            let dirty = GIT_DIRTY.unwrap_or(false);
            writeln!(
                f,
                "Compiled on git commit hash: {}{}",
                GIT_COMMIT_HASH.unwrap_or("<unknown>"),
                if dirty { " (dirty)" } else { "" }
            )?;
            writeln!(f, "            git head ref: {hr}")?;
        }
        None => writeln!(f, "Compiled on git commit hash: <no git info>")?,
    }
    writeln!(f, "            {BUILT_TIME_UTC}")?;
    writeln!(f, "         with compiler {RUSTC_VERSION}")?;
    writeln!(f)?;
    Ok(())
}

impl Display for VisavgContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} version {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
        )?;

        fmt_build_info(f)?;

        writeln!(f, "invoked as:           {}", self.invocation)?;
        writeln!(f, "input rows:           {}", self.input)?;
        match &self.output {
            Some(path) => writeln!(f, "averaged rows:        {path}")?,
            None => writeln!(f, "Will not write averaged rows.")?,
        }
        write!(f, "{}", self.config)
    }
}

impl VisavgContext {
    fn get_matches<I, T>(args: I) -> Result<clap::ArgMatches, AveragingError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        let app = command!()
            .arg_required_else_help(true)
            .next_line_help(false)
            .about("Average chunked streams of radio interferometric visibility rows over time.")
            .args(&[
                // input options
                arg!(input: <INPUT> "CSV file of visibility rows")
                    .value_hint(FilePath)
                    .help_heading("INPUT"),
                // averaging options
                arg!(-i --interval <SECONDS> "Averaging interval [s]")
                    .help_heading("AVERAGING"),
                arg!(--"max-uvw" <METRES> "Close an average when uvw moves further than <METRES>")
                    .help_heading("AVERAGING")
                    .required(false),
                arg!(--"across-baselines" "Average all baselines together")
                    .help_heading("AVERAGING"),
                arg!(--"break-on-scan" "Close averages when the scan number changes")
                    .help_heading("AVERAGING"),
                arg!(--"break-on-field" "Close averages when the field changes")
                    .help_heading("AVERAGING"),
                arg!(--unweighted "Ignore visibility weights when averaging the data")
                    .help_heading("AVERAGING"),
                // output options
                arg!(-o --output <PATH> "Path for CSV output")
                    .value_hint(FilePath)
                    .help_heading("OUTPUT")
                    .required(false),
                arg!(--"no-summary" "Do not log a summary of the averaged rows")
                    .help_heading("OUTPUT"),
                // misc
                arg!(--"dry-run" "Just print the summary and exit"),
                arg!(--"no-draw-progress" "do not show progress bars"),
            ]);
        let matches = app.try_get_matches_from(args)?;
        Ok(matches)
    }

    fn parse_config_matches(matches: &clap::ArgMatches) -> Result<AveragingConfig, AveragingError> {
        let mut config = AveragingConfig::new(matches.value_of_t("interval")?);
        match matches.value_of_t::<f64>("max-uvw") {
            Ok(distance) => {
                if distance == 0.0 {
                    warn!("--max-uvw 0 disables the uvw distance check");
                }
                config.max_uvw_distance = Some(distance);
            }
            Err(err) => match err.kind() {
                ArgumentNotFound { .. } => {}
                _ => return Err(err.into()),
            },
        }
        config.average_across_baselines = matches.is_present("across-baselines");
        config.break_on_scan = matches.is_present("break-on-scan");
        config.break_on_field = matches.is_present("break-on-field");
        if matches.is_present("unweighted") {
            config.observed_weighting = ColumnWeighting::Unity;
        }
        // only the observed column travels through csv
        config.average_corrected = false;
        config.average_model = false;

        config.validate().map_err(|err| match err {
            AveragingError::Configuration {
                option,
                expected,
                received,
            } => AveragingError::CLIError(InvalidCommandLineArgument {
                option: match option.as_str() {
                    "averaging_interval_seconds" => "--interval <SECONDS>".into(),
                    "max_uvw_distance" => "--max-uvw <METRES>".into(),
                    _ => option,
                },
                expected,
                received,
            }),
            err => err,
        })?;
        Ok(config)
    }

    /// Parse an iterator of arguments, `args` into a `VisavgContext`.
    ///
    /// # Errors
    ///
    /// Can raise:
    /// - `clap::Error` if clap cannot parse `args`
    /// - `AveragingError::CLIError` if the arguments are invalid.
    /// - `AveragingError::DryRun` if `--dry-run` was given.
    pub fn from_args<I, T>(args: I) -> Result<Self, AveragingError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        debug!("args:\n{:?}", &args);
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let words: Vec<String> = args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        let invocation = shlex::try_join(words.iter().map(String::as_str))
            .unwrap_or_else(|_| words.join(" "));

        let matches = Self::get_matches(args)?;
        trace!("arg matches:\n{:?}", &matches);

        let config = Self::parse_config_matches(&matches)?;
        let result = Self {
            invocation,
            input: match matches.value_of_t("input") {
                Ok(path) => path,
                _ => unreachable!("<INPUT> is required, enforced by clap"),
            },
            output: matches.value_of("output").map(Into::into),
            config,
            draw_progress: !matches.is_present("no-draw-progress"),
            show_summary: !matches.is_present("no-summary"),
        };

        info!("{}", &result);

        if matches.is_present("dry-run") {
            return Err(DryRun {});
        }

        Ok(result)
    }

    /// Read, average and write visibility rows, one chunk at a time.
    ///
    /// # Errors
    ///
    /// can raise:
    /// - `AveragingError::Source` if the input can't be read or parsed, or the
    ///   output can't be written
    /// - any averaging error raised by the rows themselves
    pub fn run(self) -> Result<EngineStats, AveragingError> {
        let source = CsvRowSource::from_path(&self.input)?;
        let mut engine = AveragingEngine::new(source, self.config)?;
        let mut writer = match &self.output {
            Some(path) => Some(output_writer(File::create(path).map_err(SourceError::from)?)?),
            None => None,
        };

        let draw_target = if self.draw_progress {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let progress = ProgressBar::with_draw_target(None, draw_target);
        if let Ok(style) =
            ProgressStyle::default_spinner().template("{spinner} [{elapsed_precise}] {wide_msg}")
        {
            progress.set_style(style);
        }
        progress.set_message("averaging");
        progress.enable_steady_tick(Duration::from_millis(100));

        // averaged rows and input rows per key
        let mut summary: IndexMap<AveragingKey, (usize, usize)> = IndexMap::new();
        while let Some(rows) = engine.next_output_chunk()? {
            for row in &rows {
                let (num_rows, num_samples) = summary.entry(row.key).or_default();
                *num_rows += 1;
                *num_samples += row.sample_count;
            }
            if let Some(writer) = writer.as_mut() {
                write_output_rows(writer, &rows)?;
            }
            progress.set_message(format!(
                "averaging ({} rows read)",
                engine.source().rows_read()
            ));
        }
        if let Some(writer) = writer.as_mut() {
            writer.flush().map_err(SourceError::from)?;
        }
        progress.finish_and_clear();

        let stats = *engine.stats();
        if self.show_summary {
            let mut summary_table = table!(["key", "averaged rows", "input rows"]);
            summary_table.set_format(*prettyformat::consts::FORMAT_CLEAN);
            for (key, (num_rows, num_samples)) in &summary {
                summary_table.add_row(row![key.to_string(), num_rows, num_samples]);
            }
            info!("averaged rows per key:\n{}", summary_table);
        }
        Ok(stats)
    }
}

/// Parse `args`, average, and return a process exit code.
pub fn main_with_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T> + Debug,
    T: Into<OsString> + Clone,
{
    let visavg_ctx = match VisavgContext::from_args(args) {
        Ok(visavg_ctx) => visavg_ctx,
        Err(DryRun {}) => {
            info!("Dry run. No files will be written.");
            return 0;
        }
        Err(AveragingError::ClapError(inner)) => {
            // Swallow broken pipe errors
            trace!("clap error: {:?}", inner.kind());
            let _ = inner.print();
            match inner.kind() {
                DisplayHelp | DisplayVersion => return 0,
                _ => return 1,
            }
        }
        Err(e) => {
            eprintln!("error parsing args: {e}");
            return 1;
        }
    };

    match visavg_ctx.run() {
        Ok(stats) => {
            info!("{}", stats);
            0
        }
        Err(e) => {
            eprintln!("averaging error: {e}");
            1
        }
    }
}

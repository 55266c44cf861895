use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{error, Level};

use tripcol::collocation::{CollocationFile, Format};
use tripcol::config::{Config, SigmaTest};
use tripcol::report::{self, Summary};
use tripcol::tripcol::run;

/// Triple collocation: calibration and error variances of three collocated measurement systems
#[derive(Debug, Parser)]
#[command(name = "tripcol", version)]
struct Cli {
    /// Read collocations from file INPUT, three numbers per line. Files ending in `.csv` are read
    /// as comma separated unless --format says otherwise
    #[arg(short, long)]
    input: PathBuf,

    /// Layout of the input file [default: from the file extension]
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Sigma test factor [default: 4.0]
    #[arg(short = 'f', long = "f_sigma")]
    f_sigma: Option<f64>,

    /// Maximum number of iterations [default: 20]
    #[arg(short = 'm', long = "maxiter")]
    max_iterations: Option<usize>,

    /// Representativeness error variance [default: 0.0]
    #[arg(short = 'r', long = "reprerr")]
    representativeness_error: Option<f64>,

    /// Precision of the calibration increments [default: 0.00001]
    #[arg(short, long)]
    precision: Option<f64>,

    /// The higher, the more output [default: 1]
    #[arg(short, long)]
    verbosity: Option<u8>,

    /// Read settings from a TOML file, flags given on the command line take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// How the sigma test bound is estimated
    #[arg(long, value_enum)]
    sigma_test: Option<SigmaTestArg>,

    /// Skip malformed collocations instead of aborting
    #[arg(long)]
    skip_malformed: bool,

    /// Write the estimates of every iteration to this CSV file
    #[arg(long)]
    history: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SigmaTestArg {
    MeanSquaredDistance,
    ResidualVariance,
}

impl From<SigmaTestArg> for SigmaTest {
    fn from(value: SigmaTestArg) -> Self {
        match value {
            SigmaTestArg::MeanSquaredDistance => Self::MeanSquaredDistance,
            SigmaTestArg::ResidualVariance => Self::ResidualVariance,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Whitespace,
    Csv,
}

impl From<FormatArg> for Format {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Whitespace => Self::Whitespace,
            FormatArg::Csv => Self::Csv,
        }
    }
}

impl Cli {
    fn config(&self) -> tripcol::Result<Config<f64>> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(f_sigma) = self.f_sigma {
            config.f_sigma = f_sigma;
        }
        if let Some(max_iterations) = self.max_iterations {
            config.max_iterations = max_iterations;
        }
        if let Some(representativeness_error) = self.representativeness_error {
            config.representativeness_error = representativeness_error;
        }
        if let Some(precision) = self.precision {
            config.precision = precision;
        }
        if let Some(verbosity) = self.verbosity {
            config.verbosity = verbosity;
        }
        if let Some(sigma_test) = self.sigma_test {
            config.sigma_test = sigma_test.into();
        }
        if self.skip_malformed {
            config.skip_malformed = true;
        }

        config.validate()?;
        Ok(config)
    }
}

const fn max_level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 | 3 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn execute(cli: &Cli, config: &Config<f64>) -> tripcol::Result<()> {
    let mut source = CollocationFile::open(&cli.input)?.skip_malformed(config.skip_malformed);
    if let Some(format) = cli.format {
        source = source.with_format(format.into());
    }
    let outcome = run(&source, config)?;

    if let Some(path) = &cli.history {
        report::write_history_file(&outcome.history, path)?;
    }
    if config.verbosity > 0 {
        println!("{}", Summary(&outcome));
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = cli.config();

    let verbosity = config
        .as_ref()
        .map_or_else(|_| cli.verbosity.unwrap_or(1), |config| config.verbosity);
    tracing_subscriber::fmt()
        .with_max_level(max_level(verbosity))
        .with_target(false)
        .init();

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("invalid settings: {e}");
            return ExitCode::FAILURE;
        }
    };

    match execute(&cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("triple collocation aborted: {e}");
            ExitCode::FAILURE
        }
    }
}

//! ToyStat CLI

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use ts_core::FitMode;
use ts_hist::{Binning, HistogramSource, HistogramStore};
use ts_inference::consistency::DEFAULT_ALPHA;
use ts_inference::profile::{DEFAULT_N_SIGMAS, DEFAULT_SCAN_POINTS};
use ts_inference::toys::fill_gaussian;
use ts_inference::{
    consistency_test_against_fit, profile_contour, GaussianFitter, ModeEnsemble,
    SeededGaussianSampler, SeedPolicy, ToyConfig, ToyExperimentRunner,
};

#[derive(Parser)]
#[command(name = "toystat")]
#[command(about = "ToyStat - toy experiments and profile scans for binned Gaussian fits")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run toy experiments and record the fit statistics of every trial
    Toys(ToysArgs),

    /// Test a stored histogram against toys drawn from its own likelihood fit
    Consistency {
        /// Histogram container (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Histogram name inside the container
        #[arg(long, default_value = "randomHist1")]
        histogram: String,

        /// Number of pseudo-experiments
        #[arg(long, default_value = "1000")]
        trials: usize,

        /// Base seed (0 = system entropy)
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto).
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Fit stored histograms and scan the statistic around the best-fit mean
    Contour {
        /// Histogram container (JSON); repeat to process several containers
        #[arg(short, long, required = true)]
        input: Vec<PathBuf>,

        /// Histogram name inside each container
        #[arg(long, default_value = "randomHist1")]
        histogram: String,

        /// Fit mode; the scan uses the matching statistic
        #[arg(long, value_enum, default_value = "likelihood")]
        mode: FitModeArg,

        /// Number of grid points
        #[arg(long, default_value_t = DEFAULT_SCAN_POINTS)]
        points: usize,

        /// Grid half-width in units of the fitted mean error
        #[arg(long, default_value_t = DEFAULT_N_SIGMAS)]
        n_sigmas: f64,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Sample a Gaussian histogram and store it in a container
    Generate {
        /// Number of samples
        #[arg(long, default_value = "1000")]
        entries: usize,

        /// Mean of the generating Gaussian
        #[arg(long, default_value = "50.0")]
        mean: f64,

        /// Sigma of the generating Gaussian
        #[arg(long, default_value = "10.0")]
        sigma: f64,

        /// Number of bins
        #[arg(long, default_value = "100")]
        bins: usize,

        /// Lower edge of the histogram range
        #[arg(long, default_value = "0.0")]
        x_min: f64,

        /// Upper edge of the histogram range
        #[arg(long, default_value = "100.0")]
        x_max: f64,

        /// Seed (0 = system entropy)
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Name to store the histogram under (replaces an existing entry)
        #[arg(long, default_value = "randomHist1")]
        name: String,

        /// Container to write; created if missing, updated otherwise
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print version information
    Version,
}

#[derive(Args)]
struct ToysArgs {
    /// Toy configuration (JSON); flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Samples per trial
    #[arg(long)]
    entries: Option<usize>,

    /// Number of trials
    #[arg(long)]
    trials: Option<usize>,

    /// Mean of the generating Gaussian
    #[arg(long)]
    mean: Option<f64>,

    /// Sigma of the generating Gaussian
    #[arg(long)]
    sigma: Option<f64>,

    /// Number of bins
    #[arg(long)]
    bins: Option<usize>,

    /// Lower edge of the histogram range
    #[arg(long)]
    x_min: Option<f64>,

    /// Upper edge of the histogram range
    #[arg(long)]
    x_max: Option<f64>,

    /// Base seed (0 = system entropy)
    #[arg(long)]
    seed: Option<u64>,

    /// Fit mode(s) applied to each trial
    #[arg(long, value_enum)]
    mode: Option<ToyModeArg>,

    /// Include every per-trial record in the output
    #[arg(long)]
    records: bool,

    /// Output file for results (pretty JSON). Defaults to stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Threads (0 = auto).
    #[arg(long, default_value = "0")]
    threads: usize,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FitModeArg {
    LeastSquares,
    Likelihood,
}

impl From<FitModeArg> for FitMode {
    fn from(arg: FitModeArg) -> Self {
        match arg {
            FitModeArg::LeastSquares => FitMode::LeastSquares,
            FitModeArg::Likelihood => FitMode::Likelihood,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ToyModeArg {
    LeastSquares,
    Likelihood,
    /// Least squares and likelihood on the same toys
    Compare,
}

impl ToyModeArg {
    fn modes(self) -> Vec<FitMode> {
        match self {
            ToyModeArg::LeastSquares => vec![FitMode::LeastSquares],
            ToyModeArg::Likelihood => vec![FitMode::Likelihood],
            ToyModeArg::Compare => vec![FitMode::LeastSquares, FitMode::Likelihood],
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Toys(args) => cmd_toys(args),
        Commands::Consistency { input, histogram, trials, seed, output, threads } => {
            cmd_consistency(&input, &histogram, trials, seed, output.as_ref(), threads)
        }
        Commands::Contour { input, histogram, mode, points, n_sigmas, output } => {
            cmd_contour(&input, &histogram, mode.into(), points, n_sigmas, output.as_ref())
        }
        Commands::Generate { entries, mean, sigma, bins, x_min, x_max, seed, name, output } => {
            let binning = Binning { n_bins: bins, x_min, x_max };
            cmd_generate(entries, mean, sigma, binning, seed, &name, &output)
        }
        Commands::Version => cmd_version(),
    }
}

fn cmd_version() -> Result<()> {
    write_json(None, serde_json::json!({ "toystat": ts_core::VERSION }))
}

fn load_toy_config(args: &ToysArgs) -> Result<ToyConfig> {
    let mut config = match &args.config {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading toy configuration");
            serde_json::from_str(&std::fs::read_to_string(path)?)?
        }
        None => ToyConfig::default(),
    };
    if let Some(entries) = args.entries {
        config.entries = entries;
    }
    if let Some(trials) = args.trials {
        config.n_trials = trials;
    }
    if let Some(mean) = args.mean {
        config.generator.mean = mean;
    }
    if let Some(sigma) = args.sigma {
        config.generator.sigma = sigma;
    }
    if let Some(bins) = args.bins {
        config.binning.n_bins = bins;
    }
    if let Some(x_min) = args.x_min {
        config.binning.x_min = x_min;
    }
    if let Some(x_max) = args.x_max {
        config.binning.x_max = x_max;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(mode) = args.mode {
        config.modes = mode.modes();
    }
    Ok(config)
}

fn ensemble_json(ensemble: &ModeEnsemble, with_records: bool) -> serde_json::Value {
    let mut value = serde_json::json!({
        "mode": ensemble.mode,
        "n_converged": ensemble.len(),
        "n_nonconverged": ensemble.n_nonconverged,
        "n_error": ensemble.n_error,
        "summary": ensemble.summary(),
        "series": {
            "trial": ensemble.records.iter().map(|r| r.trial).collect::<Vec<_>>(),
            "reduced_chi2": ensemble.reduced_chi2_values(),
            "probability": ensemble.probability_values(),
            "fitted_mean": ensemble.fitted_mean_values(),
            "mean_error": ensemble.mean_error_values(),
            "nll": ensemble.nll_values(),
        },
    });
    if with_records {
        value["records"] = serde_json::json!(ensemble.records);
    }
    value
}

fn cmd_toys(args: ToysArgs) -> Result<()> {
    configure_threads(args.threads);
    let config = load_toy_config(&args)?;

    let fitter = GaussianFitter::new();
    let runner = ToyExperimentRunner::new(&fitter, config)?;
    let result = runner.run()?;
    for e in &result.ensembles {
        tracing::info!(
            mode = %e.mode,
            converged = e.len(),
            nonconverged = e.n_nonconverged,
            errors = e.n_error,
            "toy ensemble complete"
        );
    }

    let ensembles: Vec<serde_json::Value> =
        result.ensembles.iter().map(|e| ensemble_json(e, args.records)).collect();
    let output_json = serde_json::json!({
        "config": result.config,
        "base_seed": result.base_seed,
        "n_trials_requested": result.n_trials_requested,
        "n_trials_completed": result.n_trials_completed,
        "theoretical_mean_error": result.theoretical_mean_error(),
        "ensembles": ensembles,
    });
    write_json(args.output.as_ref(), output_json)
}

fn cmd_consistency(
    input: &PathBuf,
    histogram: &str,
    trials: usize,
    seed: u64,
    output: Option<&PathBuf>,
    threads: usize,
) -> Result<()> {
    configure_threads(threads);
    let store = open_container(input)?;
    let parent = store.load_histogram(histogram)?;
    tracing::info!(
        histogram,
        entries = parent.entries(),
        bins = parent.n_bins(),
        "parent histogram loaded"
    );

    let out = consistency_test_against_fit(&GaussianFitter::new(), &parent, trials, seed)?;
    let r = &out.result;
    tracing::info!(p_value = r.p_value, n_ge = r.n_greater_or_equal, "consistency test complete");

    let output_json = serde_json::json!({
        "container": input.display().to_string(),
        "histogram": histogram,
        "entries": parent.entries(),
        "fit": {
            "params": out.fit.params,
            "param_errors": out.fit.param_errors,
            "nll": out.fit.nll,
            "covariance": out.fit.covariance,
            "correlation": out.fit.correlation_matrix(),
            "converged": out.fit.converged,
        },
        "base_seed": out.base_seed,
        "n_trials": r.toy_statistics.len(),
        "observed_nll": r.observed_statistic,
        "n_greater_or_equal": r.n_greater_or_equal,
        "p_value": r.p_value,
        "alpha": DEFAULT_ALPHA,
        "consistent": r.is_consistent(DEFAULT_ALPHA),
        "toy_summary": r.toy_summary,
        "toy_nll": r.toy_statistics,
    });
    write_json(output, output_json)
}

fn contour_entry(
    input: &PathBuf,
    histogram: &str,
    mode: FitMode,
    points: usize,
    n_sigmas: f64,
) -> Result<serde_json::Value> {
    let store = open_container(input)?;
    let hist = store.load_histogram(histogram)?;
    let analysis = profile_contour(&GaussianFitter::new(), &hist, mode, n_sigmas, points)?;
    let scan = &analysis.scan;
    tracing::info!(
        histogram,
        mode = %mode,
        best_mean = analysis.fit.params.mean,
        grid_min = scan.minimum.parameter_value,
        "contour complete"
    );

    Ok(serde_json::json!({
        "input": input.display().to_string(),
        "histogram": histogram,
        "mode": mode,
        "fit": {
            "params": analysis.fit.params,
            "param_errors": analysis.fit.param_errors,
            "chi2": analysis.fit.chi2,
            "ndf": analysis.fit.ndf,
            "probability": analysis.fit.probability,
            "nll": analysis.fit.nll,
            "covariance": analysis.fit.covariance,
            "correlation": analysis.fit.correlation_matrix(),
        },
        "statistic": scan.statistic,
        "statistic_at_best_fit": analysis.statistic_at_best_fit,
        "best_fit_value": scan.best_fit_value,
        "minimum": scan.minimum,
        "interval_68": scan.interval(1.0),
        "interval_95": scan.interval(4.0),
        "points": scan.points,
    }))
}

fn cmd_contour(
    inputs: &[PathBuf],
    histogram: &str,
    mode: FitMode,
    points: usize,
    n_sigmas: f64,
    output: Option<&PathBuf>,
) -> Result<()> {
    let mut results = Vec::with_capacity(inputs.len());
    for input in inputs {
        match contour_entry(input, histogram, mode, points, n_sigmas) {
            Ok(v) => results.push(v),
            Err(e) => {
                // Abort this input only; the rest are still processed.
                tracing::error!(input = %input.display(), error = %e, "contour failed");
                results.push(serde_json::json!({
                    "input": input.display().to_string(),
                    "histogram": histogram,
                    "error": e.to_string(),
                }));
            }
        }
    }
    write_json(output, serde_json::json!({ "contours": results }))
}

fn cmd_generate(
    entries: usize,
    mean: f64,
    sigma: f64,
    binning: Binning,
    seed: u64,
    name: &str,
    output: &PathBuf,
) -> Result<()> {
    if entries < 1 {
        anyhow::bail!("entries must be >= 1");
    }
    if !(mean.is_finite() && sigma.is_finite() && sigma > 0.0) {
        anyhow::bail!("generator needs a finite mean and sigma > 0, got mean={mean} sigma={sigma}");
    }
    let mut hist = binning.histogram(name)?;
    let base_seed = SeedPolicy::from_seed(seed).resolve();
    let mut sampler = SeededGaussianSampler::from_seed(base_seed);
    fill_gaussian(&mut hist, &mut sampler, mean, sigma, entries);
    let hist = hist.with_title(format!("Gaussian(mean={mean}, sigma={sigma}), {entries} entries"));

    let mut store = if output.exists() { open_container(output)? } else { HistogramStore::new() };
    store.insert(&hist);
    store.save(output)?;
    tracing::info!(path = %output.display(), name, "histogram stored");

    write_json(
        None,
        serde_json::json!({
            "container": output.display().to_string(),
            "histogram": name,
            "entries": hist.entries(),
            "in_range": hist.integral(),
            "underflow": hist.underflow(),
            "overflow": hist.overflow(),
            "base_seed": base_seed,
            "histograms": store.names(),
        }),
    )
}

fn open_container(path: &PathBuf) -> Result<HistogramStore> {
    tracing::info!(path = %path.display(), "loading histogram container");
    let store = HistogramStore::open(path)?;
    tracing::info!(histograms = store.len(), "container loaded");
    Ok(store)
}

fn configure_threads(threads: usize) {
    if threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

//! CLI for refgate: phase-gated falsification of causal hypotheses.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "refgate")]
#[command(about = "refgate: put causal hypotheses in front of a panel of referees")]
#[command(version = refgate_core::VERSION)]
struct Cli {
    /// JSON config file (engine, calibration, stability and referee settings)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log lifecycle events at info level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a referee battery phase by phase on one data file.
    /// Use --batch to validate many hypotheses concurrently.
    Validate {
        /// Data file: {"x": [...], "y": [...]}
        #[arg(long, required_unless_present = "batch", conflicts_with = "batch")]
        input: Option<PathBuf>,

        /// Batch file: [{"hypothesis_id": ..., "x": [...], "y": [...], "referees": [...]}]
        #[arg(long)]
        batch: Option<PathBuf>,

        /// Comma-separated referee names or aliases (default: every registered referee)
        #[arg(long)]
        referees: Option<String>,

        #[arg(long, default_value = "hypothesis")]
        hypothesis_id: String,

        /// Session id (default: random UUID)
        #[arg(long)]
        session_id: Option<String>,

        /// Hypotheses generated so far in the workspace, for the multiple-testing threshold
        #[arg(long, default_value = "0")]
        hypotheses_generated: usize,

        /// Fraction of the workspace alpha budget already spent
        #[arg(long, default_value = "0.0")]
        alpha_spent: f64,

        /// Write the validation summary as JSON
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Rerun referees on random subsamples and report which pass consistently
    Stability {
        /// Data file: {"x": [...], "y": [...]}
        #[arg(long)]
        input: PathBuf,

        /// Comma-separated referee names or aliases (default: every registered referee)
        #[arg(long)]
        referees: Option<String>,

        /// Override the number of subsamples
        #[arg(long)]
        subsamples: Option<usize>,

        /// Override the subsample size as a fraction of the input
        #[arg(long)]
        fraction: Option<f64>,

        /// Override the pass rate a referee needs to count as stable
        #[arg(long)]
        threshold: Option<f64>,

        /// Fixed RNG seed for reproducible subsamples
        #[arg(long)]
        seed: Option<u64>,

        /// Write the stability report as JSON
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run three referees from distinct categories; all three must pass
    TriGate {
        /// Data file: {"x": [...], "y": [...]}
        #[arg(long)]
        input: PathBuf,

        /// Exactly three comma-separated referee names or aliases
        #[arg(long)]
        referees: String,

        /// Write the gate result as JSON
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List registered referees with their phase, cost and timeout
    Referees {
        /// Print descriptors as JSON
        #[arg(long)]
        json: bool,
    },

    /// Convert a p-value (or FDR q-value) to a calibrated E-value
    Calibrate {
        #[arg(long)]
        p: f64,

        /// Test family, e.g. correlation_pearson, permutation_test, chow_test
        #[arg(long, default_value = "correlation_pearson")]
        test_type: String,

        /// Treat the p-value as one-tailed
        #[arg(long)]
        one_tailed: bool,

        /// FDR q-value; switches to q-value conversion
        #[arg(long)]
        q: Option<f64>,

        /// Sample size behind the q-value, used for its bounds
        #[arg(long, default_value = "0")]
        sample_size: usize,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let settings =
        commands::load_settings(cli.config.as_deref()).unwrap_or_else(|e| commands::fail(e));

    match cli.command {
        Commands::Validate {
            input,
            batch,
            referees,
            hypothesis_id,
            session_id,
            hypotheses_generated,
            alpha_spent,
            output,
        } => commands::validate::run(
            &commands::runtime(),
            &settings,
            commands::validate::ValidateCommandConfig {
                input: input.as_deref(),
                batch: batch.as_deref(),
                referees: referees.as_deref(),
                hypothesis_id: &hypothesis_id,
                session_id: session_id.as_deref(),
                hypotheses_generated,
                alpha_spent,
                output_path: output.as_deref(),
            },
        ),
        Commands::Stability {
            input,
            referees,
            subsamples,
            fraction,
            threshold,
            seed,
            output,
        } => commands::stability::run(
            &commands::runtime(),
            &settings,
            commands::stability::StabilityCommandConfig {
                input: &input,
                referees: referees.as_deref(),
                subsamples,
                fraction,
                threshold,
                seed,
                output_path: output.as_deref(),
            },
        ),
        Commands::TriGate {
            input,
            referees,
            output,
        } => commands::trigate::run(
            &commands::runtime(),
            &settings,
            commands::trigate::TriGateCommandConfig {
                input: &input,
                referees: &referees,
                output_path: output.as_deref(),
            },
        ),
        Commands::Referees { json } => commands::referees::run(&settings, json),
        Commands::Calibrate {
            p,
            test_type,
            one_tailed,
            q,
            sample_size,
        } => commands::calibrate::run(
            &settings,
            commands::calibrate::CalibrateCommandConfig {
                p,
                test_type: &test_type,
                two_tailed: !one_tailed,
                q,
                sample_size,
            },
        ),
    }
}

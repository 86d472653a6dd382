use clap::{Parser, Subcommand};
use ordinal_tsf::data::MackeyGlassParams;
use ordinal_tsf::pipeline::{describe_best, generate_mackey_glass};
use ordinal_tsf::{run_search, ExperimentConfig};
use std::error::Error;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "ordinal-tsf")]
#[command(about = "Grid search for ordinal recurrent time-series forecasters")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search Mordred hyperparameters on validation data and re-test the winners
    Search {
        /// TOML experiment configuration. Defaults reproduce the Mackey-Glass study.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Input CSV with a header row
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Column to read; the first numeric column when omitted
        #[arg(long)]
        column: Option<String>,

        /// Session name
        #[arg(long)]
        dataset: Option<String>,

        /// Results directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto)
        #[arg(long)]
        threads: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        epochs: Option<usize>,

        /// Reuse stored candidate results instead of retraining
        #[arg(long)]
        reuse_results: bool,

        /// Skip SVG plots
        #[arg(long)]
        no_plots: bool,
    },

    /// Write a Mackey-Glass series to CSV
    Generate {
        #[arg(short, long)]
        output: PathBuf,

        #[arg(short = 'n', long, default_value = "30000")]
        length: usize,

        #[arg(long, default_value = "0")]
        seed: u64,

        /// Delay of the Mackey-Glass equation
        #[arg(long, default_value = "17")]
        tau: f64,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Search {
            config,
            data,
            column,
            dataset,
            output,
            threads,
            seed,
            epochs,
            reuse_results,
            no_plots,
        } => {
            let mut experiment = match config {
                Some(path) => ExperimentConfig::from_toml(&path)?,
                None => ExperimentConfig::default(),
            }
            .with_env_overrides()?;

            if data.is_some() {
                experiment.data_path = data;
            }
            if column.is_some() {
                experiment.column = column;
            }
            if let Some(dataset) = dataset {
                experiment.dataset = dataset;
            }
            if let Some(output) = output {
                experiment.output_dir = output;
            }
            if let Some(threads) = threads {
                experiment.threads = threads;
            }
            if let Some(seed) = seed {
                experiment.seed = seed;
            }
            if let Some(epochs) = epochs {
                experiment.train.epochs = epochs;
            }
            experiment.reuse_results |= reuse_results;
            experiment.plots &= !no_plots;

            let report = run_search(&experiment)?;

            println!("\nBest models on the validation split:");
            for line in describe_best(&report.validation.best) {
                println!("  {}", line);
            }
            for (metric, result) in &report.test {
                println!("\nTest result for model with best {} performance", metric);
                for (name, score) in &result.scores {
                    println!("  {:<28}{:.6}", name.to_string(), score);
                }
            }
            info!("Best models written to {}", report.best_models_path.display());
        }
        Commands::Generate {
            output,
            length,
            seed,
            tau,
        } => {
            let params = MackeyGlassParams {
                tau,
                ..MackeyGlassParams::default()
            };
            generate_mackey_glass(&output, length, &params, seed)?;
        }
    }

    Ok(())
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use ser_svm::config::Config;
use ser_svm::features::FeatureExtractor;
use ser_svm::labels::Emotion;
use ser_svm::pipeline::{self, PredictSource};

/// Speech emotion recognition with a nested cross-validated SVM
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a JSON config file (default: ~/.ser-svm/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run nested cross-validation, then fit and save the final model
    Train {
        /// Dataset description JSON
        #[arg(short, long)]
        dataset: Option<PathBuf>,

        /// Output model path
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Tracking URI (http://host:port for MLflow, file:<dir> for local runs)
        #[arg(long)]
        tracking_uri: Option<String>,

        /// Experiment name
        #[arg(long)]
        experiment: Option<String>,

        /// Emotion left out of training ("none" keeps every class)
        #[arg(long)]
        exclude: Option<String>,

        /// Seed for fold assignment and the search
        #[arg(long)]
        seed: Option<u64>,

        /// Search evaluations per fit
        #[arg(long)]
        n_iter: Option<usize>,

        /// Worker threads (0 = all cores)
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// Predict the emotion of one clip with a saved model
    Predict {
        /// Saved model path
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Classify this audio file
        #[arg(short, long, conflicts_with = "dataset")]
        audio: Option<PathBuf>,

        /// Pick a random sample from this dataset description
        #[arg(short, long)]
        dataset: Option<PathBuf>,

        /// Seed for the random pick
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print the named feature vector of one clip
    Features {
        /// Audio file
        #[arg(short, long)]
        audio: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    let mut config = Config::load(&config_path)?;

    match args.command {
        Command::Train {
            dataset,
            model,
            tracking_uri,
            experiment,
            exclude,
            seed,
            n_iter,
            jobs,
        } => {
            if let Some(dataset) = dataset {
                config.dataset_path = dataset;
            }
            if let Some(model) = model {
                config.model_path = model;
            }
            if let Some(uri) = tracking_uri {
                config.tracking_uri = uri;
            }
            if let Some(experiment) = experiment {
                config.experiment_name = experiment;
            }
            if let Some(exclude) = exclude {
                config.excluded_emotion = parse_exclusion(&exclude)?;
            }
            if let Some(seed) = seed {
                config.cv.search.seed = seed;
            }
            if let Some(n_iter) = n_iter {
                config.cv.search.n_iter = n_iter;
            }
            if let Some(jobs) = jobs {
                config.set_jobs(jobs);
            }
            run_train(&config)
        }
        Command::Predict {
            model,
            audio,
            dataset,
            seed,
        } => {
            let model_path = model.unwrap_or_else(|| config.model_path.clone());
            let source = match audio {
                Some(audio) => PredictSource::Audio(audio),
                None => PredictSource::Dataset {
                    path: dataset.unwrap_or_else(|| config.dataset_path.clone()),
                    seed,
                },
            };
            run_predict(&model_path, &source)
        }
        Command::Features { audio } => {
            let extractor = FeatureExtractor::new(config.features.clone());
            let features = extractor
                .extract_file(&audio)
                .with_context(|| format!("Failed to extract features from {:?}", audio))?;
            for (name, value) in features.named() {
                println!("{:<48} {:>14.6}", name, value);
            }
            Ok(())
        }
    }
}

fn parse_exclusion(value: &str) -> Result<Option<Emotion>> {
    if value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let emotion = value
        .parse::<Emotion>()
        .with_context(|| format!("Invalid --exclude value: {}", value))?;
    Ok(Some(emotion))
}

fn run_train(config: &Config) -> Result<()> {
    info!("Training starting...");
    info!("Dataset: {:?}", config.dataset_path);
    info!("Tracking: {} ({})", config.tracking_uri, config.experiment_name);

    let summary = pipeline::train(config)?;

    info!(
        "Final model: C={}, gamma={}, saved to {:?}",
        summary.final_params.c, summary.final_params.gamma, summary.model_path
    );

    println!("____________________ Support Vector Machine ____________________");
    println!("Weighted Accuracy: {:.2}", summary.weighted_accuracy * 100.0);
    println!("Unweighted Accuracy: {:.2}", summary.unweighted_accuracy * 100.0);
    Ok(())
}

fn run_predict(model_path: &std::path::Path, source: &PredictSource) -> Result<()> {
    let prediction = pipeline::predict(model_path, source)?;

    info!("Classified {:?}", prediction.audio);
    if let Some(truth) = prediction.true_emotion {
        println!("True emotion: {}", truth);
    }
    println!("Predicted emotion: {}", prediction.predicted);
    Ok(())
}

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use nail_classifier::cli::{Cli, Commands, SplitArgs, TrainArgs};
use nail_classifier::dataset::split_dataset;
use nail_classifier::model::{load_metadata, print_metadata_info, AppConfig, DeviceType};
use nail_classifier::server::{self, AppState};
use nail_classifier::{observability, Classifier};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, source) = AppConfig::load_or_default(cli.config.as_deref())?;
    cli.apply_logging(&mut config);
    observability::init(&config.logging)?;
    source.log();

    match cli.command {
        Commands::Serve(args) => {
            args.apply(&mut config);
            config.log_summary();
            run_serve(&config)
        }
        Commands::Train(args) => {
            args.apply(&mut config);
            config.log_summary();
            run_train(&config, &args)
        }
        Commands::Split(args) => run_split(&args),
        Commands::Inspect { model_path } => {
            let path = model_path.unwrap_or_else(|| config.model.model_path.clone());
            let metadata = load_metadata(&path)
                .with_context(|| format!("Failed to read model artifact: {:?}", path))?;
            println!("モデル: {}", path.display());
            print_metadata_info(&metadata);
            Ok(())
        }
    }
}

fn run_serve(config: &AppConfig) -> anyhow::Result<()> {
    // モデルは起動時に一度だけ読み込む
    let classifier = load_classifier(&config.model.model_path, config.device_type)?;
    let state = AppState::from_classifier(classifier, &config.server)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server::serve(state, &config.server))?;
    Ok(())
}

#[cfg(feature = "ml")]
fn load_classifier(path: &Path, device: DeviceType) -> anyhow::Result<Arc<dyn Classifier>> {
    nail_classifier::ml::load_classifier(path, device)
        .with_context(|| format!("Failed to load model: {:?}", path))
}

#[cfg(not(feature = "ml"))]
fn load_classifier(_path: &Path, _device: DeviceType) -> anyhow::Result<Arc<dyn Classifier>> {
    anyhow::bail!("ML feature is not enabled. Rebuild with --features ml")
}

#[cfg(feature = "ml")]
fn run_train(config: &AppConfig, args: &TrainArgs) -> anyhow::Result<()> {
    use nail_classifier::ml::{train_model, TrainRequest};

    let request = TrainRequest::from_config(config, args.data_dir.clone());
    let summary = train_model(&request)?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(not(feature = "ml"))]
fn run_train(_config: &AppConfig, _args: &TrainArgs) -> anyhow::Result<()> {
    anyhow::bail!("ML feature is not enabled. Rebuild with --features ml")
}

fn run_split(args: &SplitArgs) -> anyhow::Result<()> {
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let report = split_dataset(&args.source, &args.train_dir, &args.val_dir, args.val_ratio, &mut rng)?;
    for class in &report.classes {
        info!(class = %class.class_name, train = class.train, val = class.val, "分割結果");
    }
    info!(
        train = report.total_train(),
        val = report.total_val(),
        "データセットの分割が完了しました"
    );
    Ok(())
}

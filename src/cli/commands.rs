//! CLI command definitions and dispatch.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};

use crate::cli::config::{
    load_yaml, resolve_task_specs, GlobalConfig, ModelConfig, TaskConfigFile,
};
use crate::model::{ModelClient, OpenAiClient};
use crate::pipeline::config::sanitize_model;
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::task;

/// Default configuration file locations.
const DEFAULT_TASK_CONFIG: &str = "./config/task_config.yaml";
const DEFAULT_MODEL_CONFIG: &str = "./config/model_config.yaml";
const DEFAULT_GLOBAL_CONFIG: &str = "./config/global_config.yaml";

/// Resumable LLM benchmark pipeline.
#[derive(Parser)]
#[command(name = "eval-forge")]
#[command(about = "Drive benchmark samples through generate, infer, evaluate and analyze")]
#[command(version)]
#[command(
    long_about = "eval-forge drives sets of benchmark samples through four sequential stages \
                  against a model backend, checkpointing every completed item so an interrupted \
                  run resumes exactly where it left off.\n\nExample usage:\n  \
                  eval-forge run --global-config ./config/global_config.yaml"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the full pipeline: generate, infer, evaluate, analyze.
    Run(StageArgs),

    /// Generate prompts and write the initial record store.
    #[command(alias = "gen")]
    Generate(StageArgs),

    /// Run inference for all records still needing an answer.
    Infer(StageArgs),

    /// Evaluate all validly answered records.
    #[command(alias = "eval")]
    Evaluate(StageArgs),

    /// Aggregate hierarchical metrics into a report.
    Analyze(StageArgs),
}

/// Configuration arguments shared by every subcommand.
#[derive(Parser, Debug)]
pub struct StageArgs {
    /// Per-task-type default argument tables.
    #[arg(long, default_value = DEFAULT_TASK_CONFIG)]
    pub task_config: PathBuf,

    /// Backend, model and sampling parameters.
    #[arg(long, default_value = DEFAULT_MODEL_CONFIG)]
    pub model_config: PathBuf,

    /// Selected tasks, worker counts and retry policy.
    #[arg(long, default_value = DEFAULT_GLOBAL_CONFIG)]
    pub global_config: PathBuf,

    /// Override the worker count for both stages.
    #[arg(long)]
    pub workers: Option<usize>,
}

/// Parses CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parses CLI arguments and runs the selected command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Runs the selected command with pre-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => {
            let pipeline = build_pipeline(&args)?;
            pipeline.run_all().await?;
        }
        Commands::Generate(args) => {
            let pipeline = build_pipeline(&args)?;
            let count = pipeline.generate()?;
            info!(count, "generate finished");
        }
        Commands::Infer(args) => {
            let pipeline = build_pipeline(&args)?;
            let outcome = pipeline.infer().await?;
            if outcome.interrupted {
                warn!("inference interrupted; re-run `eval-forge infer` to resume");
            }
        }
        Commands::Evaluate(args) => {
            let pipeline = build_pipeline(&args)?;
            let outcome = pipeline.evaluate().await?;
            if outcome.interrupted {
                warn!("evaluation interrupted; re-run `eval-forge evaluate` to resume");
            }
        }
        Commands::Analyze(args) => {
            let pipeline = build_pipeline(&args)?;
            pipeline.analyze()?;
        }
    }
    Ok(())
}

/// Loads configuration, assembles the pipeline, and wires Ctrl-C handling.
fn build_pipeline(args: &StageArgs) -> anyhow::Result<Pipeline> {
    let global: GlobalConfig = load_yaml(&args.global_config)
        .with_context(|| format!("loading {}", args.global_config.display()))?;
    let tasks: TaskConfigFile = load_yaml(&args.task_config)
        .with_context(|| format!("loading {}", args.task_config.display()))?;
    let model_config: ModelConfig = load_yaml(&args.model_config)
        .with_context(|| format!("loading {}", args.model_config.display()))?;

    if global.selected_tasks.is_empty() {
        bail!(
            "no tasks selected in {}; add entries under selected_tasks",
            args.global_config.display()
        );
    }

    let specs = resolve_task_specs(&global, &tasks);
    let registry = Arc::new(task::builtin_registry());
    let model = build_model_client(&model_config)?;

    let model_dir = sanitize_model(&model_config.model);
    let output_file = global
        .output_dir
        .join(&model_dir)
        .join(format!("{model_dir}.jsonl"));

    let mut config = PipelineConfig::new(output_file, model_config.model.clone())
        .with_sampling(model_config.params.clone())
        .with_infer_workers(global.threading_config.inference_workers)
        .with_eval_workers(global.threading_config.evaluation_workers)
        .with_retry_infer_errors(global.retry_config.retry_infer_errors)
        .with_retry_eval_errors(global.retry_config.retry_eval_errors);
    if let Some(workers) = args.workers {
        config = config.with_infer_workers(workers).with_eval_workers(workers);
    }

    let pipeline = Pipeline::new(specs, registry, model, config)?;

    let cancel = pipeline.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; letting in-flight items finish, then stopping");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    Ok(pipeline)
}

/// Builds the model client named by the model configuration.
fn build_model_client(config: &ModelConfig) -> anyhow::Result<Arc<dyn ModelClient>> {
    match config.backend.as_str() {
        "openai" | "openai-compatible" | "litellm" => {
            let api_key = match &config.api_key_env {
                Some(var) => std::env::var(var).ok(),
                None => std::env::var(crate::model::openai::API_KEY_ENV).ok(),
            };
            let client = match &config.api_base {
                Some(base) => OpenAiClient::new(base, api_key, &config.model),
                None => OpenAiClient::from_env(&config.model)?,
            };
            Ok(Arc::new(client))
        }
        other => bail!("unsupported model backend '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["eval-forge", "run"]).unwrap();
        assert!(matches!(cli.command, Commands::Run(_)));
        assert_eq!(cli.log_level, "info");

        let cli = Cli::try_parse_from(["eval-forge", "gen", "--workers", "2"]).unwrap();
        match cli.command {
            Commands::Generate(args) => assert_eq!(args.workers, Some(2)),
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn test_cli_default_config_paths() {
        let cli = Cli::try_parse_from(["eval-forge", "infer"]).unwrap();
        match cli.command {
            Commands::Infer(args) => {
                assert_eq!(args.task_config, PathBuf::from(DEFAULT_TASK_CONFIG));
                assert_eq!(args.model_config, PathBuf::from(DEFAULT_MODEL_CONFIG));
                assert_eq!(args.global_config, PathBuf::from(DEFAULT_GLOBAL_CONFIG));
            }
            _ => panic!("expected infer"),
        }
    }

    #[test]
    fn test_cli_global_log_level() {
        let cli = Cli::try_parse_from(["eval-forge", "analyze", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.log_level, "debug");
    }

    #[test]
    fn test_unsupported_backend_rejected() {
        let config = ModelConfig {
            backend: "bedrock".to_string(),
            model: "m".to_string(),
            api_base: None,
            api_key_env: None,
            params: Default::default(),
        };
        assert!(build_model_client(&config).is_err());
    }
}

use anyhow::{Context, Result};
use lazypipe::cli::commands::{HistoryCommand, ListCommand, PlanCommand, RunCommand, ValidateCommand};
use lazypipe::cli::output::*;
use lazypipe::cli::{Cli, Command};
use lazypipe::core::config::PipelineConfig;
use lazypipe::core::settings::EngineSettings;
use lazypipe::core::state::RunStatus;
use lazypipe::execution::{ExecutionEngine, RunReport};
use lazypipe::persistence::{InMemoryPersistence, PersistenceBackend, RunSummary};
use lazypipe::{FsArtifactStore, SubprocessExecutor};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let settings = EngineSettings::load(cli.config.as_deref()).context("Failed to load settings")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, &settings).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Plan(cmd) => plan_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd, &settings).await?,
        Command::History(cmd) => show_history(cmd, &settings).await?,
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_history(settings: &EngineSettings) -> Result<Arc<dyn PersistenceBackend>> {
    let store = lazypipe::persistence::SqliteRunStore::new(&settings.history_db_path()).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_history(_settings: &EngineSettings) -> Result<Arc<dyn PersistenceBackend>> {
    tracing::warn!("Built without sqlite support; history is not kept between invocations");
    Ok(Arc::new(InMemoryPersistence::new()))
}

async fn run_pipeline(cmd: &RunCommand, settings: &EngineSettings) -> Result<()> {
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;

    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());

    let resolver = settings.image_resolver();
    let graph = config
        .to_graph(&resolver, &settings.region)
        .context("Invalid pipeline definition")?;

    // Apply parameter overrides
    let mut bindings = BTreeMap::new();
    for (key, raw) in &cmd.params {
        let value = graph
            .parameters()
            .parse_value(key, raw)
            .with_context(|| format!("Invalid value for parameter '{}'", key))?;
        println!(
            "{} Parameter override: {} = {}",
            INFO,
            style(key).cyan(),
            style(raw).dim()
        );
        bindings.insert(key.clone(), value);
    }

    let store: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        open_history(settings).await?
    };

    let mut engine = ExecutionEngine::from_settings(
        settings,
        Arc::new(SubprocessExecutor::new(&settings.artifact_root)),
        Arc::new(FsArtifactStore::new(&settings.artifact_root)),
    )
    .with_persistence(store);
    if let Some(arg) = cmd.strategy {
        engine = engine.with_strategy(arg.to_strategy(settings));
    }

    // Console output
    let progress = create_progress_bar(graph.len());
    let bar = progress.clone();
    engine
        .add_event_handler(move |event| {
            bar.println(format_execution_event(&event));
            if is_step_terminal_event(&event) {
                bar.inc(1);
            }
        })
        .await;

    let graph = engine.upsert_pipeline(graph).await;
    let run_id = engine.submit_named(graph.name(), bindings).await?;
    engine.start(run_id).await?;

    let status = tokio::select! {
        status = engine.wait(run_id) => status?,
        _ = tokio::signal::ctrl_c() => {
            progress.println(format!("{} Interrupted, cancelling run", WARN));
            engine.cancel(run_id).await?;
            engine.wait(run_id).await?
        }
    };
    progress.finish_and_clear();

    let report = engine.status(run_id).await?;
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !cmd.no_history {
        println!(
            "\n{} Run saved to history (ID: {})",
            INFO,
            style(&run_id.to_string()[..8]).dim()
        );
    }

    match status {
        RunStatus::Succeeded => {
            println!(
                "\n{} {} completed {}",
                CHECK,
                style(graph.name()).bold(),
                style("successfully").green()
            );
            Ok(())
        }
        other => {
            println!(
                "\n{} {} {}",
                CROSS,
                style(graph.name()).bold(),
                format_status(other)
            );
            error!(run_id = %run_id, "Run ended {:?}", other);
            std::process::exit(1);
        }
    }
}

fn print_report(report: &RunReport) {
    println!("\n{} Step states:", INFO);
    for step in &report.steps {
        println!("  {:<24} {}", style(&step.name).bold(), format_step_state(&step.state));
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    let config = PipelineConfig::from_file(&cmd.file)?;
    match config.validate() {
        Ok(graph) => {
            println!("{} Pipeline definition is valid!", CHECK);
            println!("  Name: {}", style(graph.name()).bold());
            println!("  Steps: {}", style(graph.len()).cyan());
            println!("  Parameters: {}", style(graph.parameters().len()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}

fn plan_pipeline(cmd: &PlanCommand) -> Result<()> {
    let config = PipelineConfig::from_file(&cmd.file)?;
    let graph = config.validate().context("Invalid pipeline definition")?;
    let plan = graph.to_execution_plan(&graph.new_run());

    if cmd.json {
        let data = serde_json::json!({ "pipeline": graph.name(), "batches": plan });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Execution plan for {}:", INFO, style(graph.name()).bold());
    for (index, batch) in plan.iter().enumerate() {
        let steps: Vec<String> = batch
            .iter()
            .map(|name| match graph.step(name) {
                Some(step) if step.is_conditional() => format!("{} {}", BRANCH, name),
                _ => name.clone(),
            })
            .collect();
        println!("  {} {}", style(format!("[{}]", index)).dim(), steps.join(", "));
    }

    Ok(())
}

async fn list_pipelines(cmd: &ListCommand, settings: &EngineSettings) -> Result<()> {
    let store = open_history(settings).await?;
    let pipelines = store.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(());
    }

    if cmd.json {
        let mut json_data = Vec::new();
        for pipeline in &pipelines {
            let runs = store.list_runs(pipeline).await?;
            json_data.push(serde_json::json!({
                "name": pipeline,
                "run_count": runs.len()
            }));
        }
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Pipelines in history:", INFO);
    for pipeline_name in &pipelines {
        if cmd.with_counts {
            let runs = store.list_runs(pipeline_name).await?;
            let count = |status: RunStatus| runs.iter().filter(|r| r.status == status).count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed, {} cancelled)",
                style(pipeline_name).bold(),
                style(runs.len()).cyan(),
                style(count(RunStatus::Succeeded)).green(),
                style(count(RunStatus::Failed)).red(),
                style(count(RunStatus::Cancelled)).yellow()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand, settings: &EngineSettings) -> Result<()> {
    let store = open_history(settings).await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) => print_run_details(&summary, cmd.verbose)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let mut runs = match &cmd.pipeline {
        Some(pipeline_name) => store.list_runs(pipeline_name).await?,
        None => {
            let mut all_runs = Vec::new();
            for pipeline in store.list_pipelines().await? {
                all_runs.extend(store.list_runs(&pipeline).await?);
            }
            all_runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all_runs
        }
    };
    runs.truncate(cmd.limit);

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, cmd.limit);
        for summary in &runs {
            println!("  {}", format_run_summary(summary));
        }
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary, verbose: bool) -> Result<()> {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Steps: {} succeeded, {} failed, {} skipped, {} cancelled of {}",
        style(summary.succeeded_steps).green(),
        style(summary.failed_steps).red(),
        style(summary.skipped_steps).dim(),
        style(summary.cancelled_steps).yellow(),
        summary.total_steps
    );

    if verbose {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}

mod settings;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use catalog_engine::{Pipeline, RunState};
use engine_logging::{engine_info, engine_warn};

use settings::{Settings, DEFAULT_SETTINGS_FILE};

fn main() -> ExitCode {
    match run() {
        Ok(state) => exit_code(state),
        Err(err) => {
            eprintln!("catalog_app: {err:#}");
            ExitCode::from(2)
        }
    }
}

/// Usage: `catalog_app [settings.ron]`. Prints the run status as JSON.
fn run() -> anyhow::Result<RunState> {
    let settings_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
    let loaded = Settings::load(&settings_path)?;
    let from_file = loaded.is_some();
    let settings = loaded.unwrap_or_default();
    engine_logging::initialize(
        &settings.logging.destination(),
        settings.logging.level_filter()?,
    );
    if !from_file {
        engine_info!("No settings file at {:?}, using defaults", settings_path);
    }

    let config = settings
        .to_pipeline_config(&|key| std::env::var(key).ok())
        .with_context(|| format!("invalid settings in {:?}", settings_path))?;
    engine_info!(
        "Harvesting {} sources into {:?}",
        config.sources.len(),
        config.output_dir
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let status = runtime.block_on(async move {
        let pipeline = Pipeline::new(config)?;
        let cancel = pipeline.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                engine_warn!("Interrupt received, cancelling run");
                cancel.cancel();
            }
        });
        anyhow::Ok(pipeline.run().await)
    })?;

    println!("{}", status.to_json());
    Ok(status.state)
}

fn exit_code(state: RunState) -> ExitCode {
    match state {
        RunState::Completed => ExitCode::SUCCESS,
        RunState::Error => ExitCode::from(1),
        // EX_TEMPFAIL: try again once the other run is done.
        RunState::AlreadyRunning => ExitCode::from(75),
        RunState::Cancelled => ExitCode::from(130),
    }
}

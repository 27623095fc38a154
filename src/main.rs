//! gis-engine CLI - geo-spatial simulation core for network emulation.

use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use tokio::signal;
use tracing::{info, warn};

use gis_engine::api::{ApiServer, BASE_PATH};
use gis_engine::automation::AutomationType;
use gis_engine::cli::*;
use gis_engine::config::{init_logging, Config, LoggingConfig};
use gis_engine::engine::{Engine, NodeType, Scenario};
use gis_engine::error::Result;
use gis_engine::VERSION;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config if specified
    let config = if let Some(ref path) = cli.config {
        Config::load(path)?
    } else if Config::default_path().exists() {
        Config::load(Config::default_path())?
    } else {
        Config::default()
    };

    // Command line flags win over the config file
    let log_config = LoggingConfig {
        level: cli.log_level.clone(),
        color: !cli.no_color && config.logging.color,
        ..config.logging.clone()
    };
    init_logging(&log_config)?;

    if cli.no_color {
        colored::control::set_override(false);
    }

    match cli.command {
        Commands::Serve(args) => run_serve(args, config).await,
        Commands::Validate(args) => run_validate(&args, cli.format),
        Commands::Config(args) => run_config(&args),
    }
}

/// Run the engine until interrupted.
async fn run_serve(args: ServeArgs, mut config: Config) -> Result<()> {
    if let Some(bind) = args.bind {
        config.api.bind_addr = bind;
    }
    if args.db.is_some() {
        config.store.path = args.db.clone();
    }
    config.automation.start.extend(args.automation.iter().cloned());
    config.validate()?;

    println!("{}", format!("gis-engine {VERSION}").bright_cyan().bold());
    println!();

    let engine = Engine::new(&config)?;

    if let Some(ref path) = args.scenario {
        let scenario = Scenario::load(path)?;
        let name = scenario.name.clone();
        let nodes = scenario.nodes.len();
        engine.activate(scenario)?;
        println!(
            "{} Activated scenario {} ({} nodes)",
            "✓".green(),
            name.bright_white(),
            nodes
        );
    } else {
        println!("{} No scenario loaded", "⚠".yellow());
    }

    let mut enabled = Vec::new();
    for kind in config.startup_automation()? {
        if enabled.contains(&kind) {
            continue;
        }
        engine.set_automation(kind, true)?;
        enabled.push(kind);
    }
    if !enabled.is_empty() {
        let names: Vec<_> = enabled.iter().copied().map(AutomationType::as_str).collect();
        println!("{} Automation: {}", "✓".green(), names.join(", "));
    }

    let server = if config.api.enabled && !args.no_api {
        let server = Arc::new(ApiServer::new(config.api.clone(), engine.clone()));
        println!(
            "  {} http://{}{}",
            "→".cyan(),
            config.api.bind_addr,
            BASE_PATH
        );
        let running = server.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = running.start().await {
                warn!("API server error: {}", e);
            }
        });
        Some((server, handle))
    } else {
        None
    };

    println!();
    println!("{} Engine running. Press Ctrl+C to stop.", "●".green());

    let _ = signal::ctrl_c().await;
    println!();
    info!("Shutting down");

    if let Some((server, handle)) = server {
        server.stop();
        if tokio::time::timeout(config.api.shutdown_timeout, handle)
            .await
            .is_err()
        {
            warn!(
                "API server did not stop within {:?}",
                config.api.shutdown_timeout
            );
        }
    }

    engine.shutdown();
    if engine.scenario_name().is_some() {
        engine.terminate()?;
    }

    println!("{} Stopped.", "✓".green());
    Ok(())
}

/// Parse and check a scenario file.
fn run_validate(args: &ValidateArgs, format: OutputFormat) -> Result<()> {
    let scenario = Scenario::load(&args.scenario)?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&scenario)?);
        return Ok(());
    }

    println!(
        "{} {} is valid",
        "✓".green(),
        args.scenario.display().to_string().bright_white()
    );
    println!("  {} {}", "Scenario:".bright_white(), scenario.name);

    let count = |pred: fn(&NodeType) -> bool| {
        scenario
            .nodes
            .iter()
            .filter(|n| n.geo_data.is_some() && pred(&n.node_type))
            .count()
    };
    println!(
        "  {} {}",
        "Terminals:".bright_white(),
        count(|t| matches!(t, NodeType::Ue))
    );
    println!(
        "  {} {}",
        "Points of attachment:".bright_white(),
        count(|t| matches!(t, NodeType::Poa(_)))
    );
    println!(
        "  {} {}",
        "Compute:".bright_white(),
        count(|t| matches!(t, NodeType::Compute(_)))
    );

    let without_geo = scenario.nodes.iter().filter(|n| n.geo_data.is_none()).count();
    if without_geo > 0 {
        println!(
            "  {} {} nodes without geo data are not allocated",
            "⚠".yellow(),
            without_geo
        );
    }
    Ok(())
}

/// Print or save an example configuration.
fn run_config(args: &ConfigArgs) -> Result<()> {
    let config = Config::example();

    if let Some(ref output) = args.output {
        config.save(output)?;
        println!("{} Saved to {}", "✓".green(), output.display());
    } else {
        let content = toml::to_string_pretty(&config)
            .map_err(|e| gis_engine::Error::Config(format!("Failed to serialize config: {e}")))?;
        println!("{content}");
    }
    Ok(())
}

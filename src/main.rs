//! XCP Memory-Access Gateway - Main Entry Point

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use xcp_gateway::config::Args;
use xcp_gateway::polling::PollingScheduler;
use xcp_gateway::protocol::master::{ControllerWorker, ProtocolTimings};
use xcp_gateway::symbols::SymbolStore;
use xcp_gateway::transport::open_link;
use xcp_gateway::{Config, GatewayContext, GatewayServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    // Handle special flags first
    if args.generate_config {
        let config = Config::default();
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    // Initialize logging
    init_logging(&args)?;

    info!("Starting XCP Gateway v{}", env!("CARGO_PKG_VERSION"));
    debug!("Command line args: {:?}", args);

    // Load configuration
    let mut config = Config::load(args.config.as_ref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    // Merge command line arguments into configuration
    config.merge_args(&args);

    if args.validate_config {
        config.validate()?;
        println!("Configuration is valid");
        return Ok(());
    }

    if args.show_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    // Validate final configuration
    config.validate().map_err(|e| {
        error!("Configuration validation failed: {}", e);
        e
    })?;

    info!("Configuration loaded and validated successfully");

    // Load firmware symbol tables
    let symbols = SymbolStore::new();
    for (name, controller) in &config.controllers {
        if let Some(firmware) = &controller.firmware {
            let count = symbols.load(name, firmware).map_err(|e| {
                error!("Failed to load firmware for {}: {}", name, e);
                e
            })?;
            info!(controller = %name, symbols = count, "symbol table ready");
        } else {
            warn!(controller = %name, "no firmware configured, symbolic access disabled");
        }
    }

    // Spawn one protocol worker per controller
    let timings = ProtocolTimings::from_config(&config.protocol);
    let mut controllers = HashMap::new();
    for (name, controller) in &config.controllers {
        let link = open_link(&controller.link).await.map_err(|e| {
            error!("Failed to open link for {}: {}", name, e);
            e
        })?;
        let handle = ControllerWorker::spawn(name.clone(), link, timings.clone());
        controllers.insert(name.clone(), handle);
    }
    info!(count = controllers.len(), "controller workers started");

    let scheduler = Arc::new(PollingScheduler::new(
        config.polling.sample_capacity,
        Duration::from_millis(config.polling.default_interval_ms),
    ));

    // Install subscriptions configured to start with the gateway
    for startup in &config.polling.startup {
        let Some(handle) = controllers.get(&startup.controller) else {
            warn!(
                controller = %startup.controller,
                "startup subscription names an unknown controller, skipping"
            );
            continue;
        };
        match symbols.resolve(&startup.controller, &startup.parameter) {
            Ok(location) => scheduler.subscribe(
                handle.clone(),
                &startup.parameter,
                location,
                startup.interval_ms.map(Duration::from_millis),
            ),
            Err(e) => warn!(
                controller = %startup.controller,
                parameter = %startup.parameter,
                error = %e,
                "startup subscription failed to resolve, skipping"
            ),
        }
    }

    let ctx = Arc::new(GatewayContext {
        controllers,
        symbols,
        scheduler,
        max_upload_bytes: config.protocol.max_upload_bytes,
    });

    let server = GatewayServer::bind(&config.server.bind, ctx).await?;
    info!("XCP Gateway started successfully");
    server.run().await?;

    Ok(())
}

/// Initialize logging system
fn init_logging(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false);

    // Configure output destination
    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;

        subscriber.with_writer(file).init();

        println!("Logging to file: {}", log_file.display());
    } else {
        subscriber.with_writer(std::io::stderr).init();
    }

    debug!("Logging initialized with level: {}", args.log_level);
    Ok(())
}

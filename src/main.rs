use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use conduit::{
    adapters::{InMemoryQueue, SqsQueue, rest},
    config::{GatewayConfig, GatewayConfigValidator, TransportKind, loader::load_config},
    core::Bridge,
    ports::MessageQueue,
    tracing_setup,
    utils::graceful_shutdown::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the gateway server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config).await,
        None => serve(&args.config).await,
    }
}

fn create_transport(config: &GatewayConfig) -> Result<Arc<dyn MessageQueue>> {
    match config.transport.kind {
        TransportKind::Memory => {
            tracing::warn!(
                "Using the in-memory transport; requests time out unless a worker shares this process"
            );
            Ok(Arc::new(InMemoryQueue::new()))
        }
        TransportKind::Sqs => {
            let endpoint = config
                .transport
                .endpoint
                .clone()
                .ok_or_else(|| eyre!("transport.endpoint is required for the sqs transport"))?;
            let queue = SqsQueue::new(
                endpoint,
                Some(config.queues.response_queue.clone()),
                Duration::from_secs(config.transport.http_timeout_secs),
            )?;
            Ok(Arc::new(queue))
        }
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let config = load_config(config_path)
        .await
        .wrap_err_with(|| format!("Failed to load configuration from {config_path}"))?;

    tracing_setup::init_tracing(&config.logging)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    GatewayConfigValidator::validate(&config)
        .map_err(|e| eyre!("Invalid configuration in {}: {}", config_path, e))?;

    tracing::info!("Loaded configuration from {config_path}");

    let transport = create_transport(&config)?;
    let bridge = Arc::new(Bridge::new(&config, transport));
    bridge.start().await;

    let app = rest::router(bridge.clone(), &config.api_prefix);

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .wrap_err_with(|| format!("Invalid listen address: {}", config.listen_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    let mut domains: Vec<_> = config.queues.domains.iter().collect();
    domains.sort();
    for (domain, queue) in domains {
        tracing::info!("Configured domain: {} -> {}", domain, queue);
    }
    tracing::info!("Conduit API Gateway listening on {}", addr);

    let graceful_shutdown = Arc::new(GracefulShutdown::new());

    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let mut server_token = graceful_shutdown.shutdown_token();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                server_token.wait_for_shutdown().await;
            })
            .await
    });

    let mut shutdown_token = graceful_shutdown.shutdown_token();
    let server_result = tokio::select! {
        result = &mut server => {
            bridge.shutdown().await;
            result
                .context("Server task panicked")?
                .context("Server error")
        }
        reason = shutdown_token.wait_for_shutdown() => {
            tracing::info!("Shutdown signal received: {:?}", reason);

            // Settle in-flight requests first so their connections can close.
            bridge.shutdown().await;

            let drained = graceful_shutdown
                .drain(async {
                    match server.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::error!("Server error during shutdown: {}", e),
                        Err(e) => tracing::error!("Server task failed during shutdown: {}", e),
                    }
                })
                .await;
            if drained {
                tracing::info!("Graceful shutdown completed");
            }
            Ok(())
        }
    };

    server_result
}

async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match GatewayConfigValidator::validate(&config) {
        Ok(()) => {
            let mut domains: Vec<_> = config.queues.domains.keys().cloned().collect();
            domains.sort();

            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • Transport: {:?}", config.transport.kind);
            println!("   • Response Queue: {}", config.queues.response_queue);
            println!("   • Domains: {}", domains.join(", "));
            println!("   • Request Timeout: {}ms", config.request.timeout_ms);
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • With the sqs transport, every queue must be a full http(s) queue URL");
            println!("   • Give each domain its own work queue, separate from the response queue");
            println!("   • Verify listen address format (e.g., '127.0.0.1:3000')");
            println!("   • Keep pump.max_messages within 1..=10 and pump.wait_time_secs within 1..=20");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Conduit API Gateway Configuration

# The address to listen on
listen_addr = "0.0.0.0:3000"
api_prefix = "/api"

[queues]
# Every worker replies on this queue
response_queue = "http://localhost:9324/000000000000/gateway-responses"

[queues.domains]
users = "http://localhost:9324/000000000000/users-queue"
orders = "http://localhost:9324/000000000000/orders-queue"

[transport]
# "sqs" talks to an SQS-compatible endpoint, "memory" keeps queues in-process
kind = "sqs"
endpoint = "http://localhost:9324"
http_timeout_secs = 10

[pump]
max_messages = 10
wait_time_secs = 20
error_backoff_secs = 5

[request]
timeout_ms = 30000

[logging]
level = "info"
json = true
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'conduit serve --config {config_path}' to start the gateway");
    Ok(())
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use maxstream::client::ClientDriver;
use maxstream::config::{discovery_url_for, DriverConfig, ServerConfig, DEFAULT_PORT};
use maxstream::server::MaxServer;

#[derive(Parser)]
#[command(
    name = "maxstream",
    version,
    about = "Streaming running-maximum gRPC service with connection-gated discovery registration",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the math.Math stream and advertise to discovery
    Serve {
        /// gRPC listen port (overrides MAXSTREAM_PORT)
        #[arg(long)]
        port: Option<u16>,

        /// IP advertised to discovery (overrides MY_IP)
        #[arg(long)]
        ip: Option<String>,

        /// Discovery service host (overrides EDS_SERVER)
        #[arg(long)]
        eds_server: Option<String>,

        /// Advertise while fewer than this many connections are open
        #[arg(long)]
        threshold: Option<usize>,

        /// Admin server address, or "off" to disable
        #[arg(long)]
        admin_addr: Option<String>,
    },

    /// Stream random observations to a server and print max updates
    Client {
        /// Server host
        #[arg(short = 'H', long, default_value = "localhost")]
        host: String,

        /// Server port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Number of observations to send
        #[arg(long, default_value = "20000000")]
        count: u64,

        /// Delay between observations in milliseconds
        #[arg(long, default_value = "1000")]
        pace_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging
    setup_tracing(&cli.log_format, cli.verbose)?;

    match cli.command {
        Commands::Serve {
            port,
            ip,
            eds_server,
            threshold,
            admin_addr,
        } => {
            tracing::info!(
                port = ?port,
                ip = ?ip,
                eds_server = ?eds_server,
                threshold = ?threshold,
                "Starting serve command"
            );
            serve(port, ip, eds_server, threshold, admin_addr).await?;
        }

        Commands::Client {
            host,
            port,
            count,
            pace_ms,
        } => {
            tracing::info!(
                host = %host,
                port = %port,
                count = %count,
                pace_ms = %pace_ms,
                "Starting client command"
            );
            client(host, port, count, pace_ms).await?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("maxstream=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("maxstream=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

async fn serve(
    port: Option<u16>,
    ip: Option<String>,
    eds_server: Option<String>,
    threshold: Option<usize>,
    admin_addr: Option<String>,
) -> Result<()> {
    // CLI flags fill in for missing environment variables
    let lookup = |key: &str| -> Option<String> {
        let flag = match key {
            "MY_IP" => ip.clone(),
            "EDS_SERVER" => eds_server.clone(),
            "MAXSTREAM_PORT" => port.map(|p| p.to_string()),
            "MAXSTREAM_THRESHOLD" => threshold.map(|t| t.to_string()),
            "MAXSTREAM_ADMIN_ADDR" => admin_addr.clone(),
            _ => None,
        };
        flag.or_else(|| std::env::var(key).ok())
    };

    let mut config =
        ServerConfig::from_lookup(lookup).context("Failed to load server configuration")?;

    // An explicit --eds-server wins over an EDS_URL from the environment
    if let Some(server) = &eds_server {
        config.discovery_url = discovery_url_for(server);
    }

    println!("{}", config.display());

    let server = MaxServer::new(config).context("Failed to create server")?;
    server
        .run(shutdown_signal())
        .await
        .context("Server failed")?;

    Ok(())
}

async fn client(host: String, port: u16, count: u64, pace_ms: u64) -> Result<()> {
    let config = DriverConfig::new(host, port)
        .with_observations(count)
        .with_pace_ms(pace_ms);

    let report = ClientDriver::new(config)
        .run_until(shutdown_signal())
        .await
        .context("Client driver failed")?;

    println!(
        "sent {} observations, received {} updates, final max {}",
        report.sent,
        report.updates,
        report
            .max
            .map(|m| m.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received ctrl-c, shutting down");
}

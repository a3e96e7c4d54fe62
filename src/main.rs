use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use qpy_broker::config::{BrokerConfig, ProbeConfig};
use qpy_broker::daemon::BrokerDaemon;
use qpy_broker::protocol::{BrokerClient, Request, Response};
use qpy_broker::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "qpy-broker")]
#[command(version)]
#[command(about = "Multiuser core broker: shares the cores of a cluster among job masters")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the broker
    Server(ServerArgs),

    /// Show users and nodes
    Status(ClientArgs),

    /// Show every internal counter and job
    Variables(ClientArgs),

    /// Re-read the node list
    ReloadNodes(ClientArgs),

    /// Re-read the distribution rules and allowed users and redistribute
    Redistribute(ClientArgs),

    /// Turn logging of every request and response on or off
    SaveMessages {
        #[command(flatten)]
        client: ClientArgs,

        state: Toggle,
    },

    /// Stop the broker
    Finish(ClientArgs),
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(long, short = 'p', default_value = "9999")]
    port: u16,

    /// Key every request must carry
    #[arg(long, env = "QPY_BROKER_KEY", hide_env_values = true)]
    conn_key: String,

    /// Directory holding the nodes, distribution_rules and allowed_users files
    /// (default: ~/.qpy-broker)
    #[arg(long, env = "QPY_BROKER_DIR")]
    config_dir: Option<PathBuf>,

    /// Let any user register, ignoring the allowed_users file
    #[arg(long)]
    no_allowed_users: bool,

    /// Seconds between two node liveness checks
    #[arg(long, default_value = "300")]
    check_interval: u64,

    /// Program used to reach the nodes
    #[arg(long, default_value = "ssh")]
    ssh_program: String,

    /// Processes whose command line contains this are jobs, not outsiders
    #[arg(long, default_value = "qpy")]
    job_marker: String,

    /// CPU percentage above which a foreign process counts as using a core
    #[arg(long, default_value = "50")]
    busy_threshold: f64,
}

// =============================================================================
// Client Arguments (shared by the admin commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Broker address
    #[arg(long, short = 'a', default_value = "127.0.0.1:9999")]
    addr: String,

    /// Key every request must carry
    #[arg(long, env = "QPY_BROKER_KEY", hide_env_values = true)]
    conn_key: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "text")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

// =============================================================================
// Server Implementation
// =============================================================================

fn default_config_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".qpy-broker"),
        None => PathBuf::from("."),
    }
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let config_dir = args.config_dir.unwrap_or_else(default_config_dir);

    let probe = ProbeConfig {
        ssh_program: args.ssh_program,
        job_marker: args.job_marker,
        busy_threshold: args.busy_threshold,
        ..ProbeConfig::default()
    };

    let mut config = BrokerConfig::new(listen_addr, args.conn_key)
        .with_config_dir(&config_dir)
        .with_check_interval(Duration::from_secs(args.check_interval))
        .with_probe(probe);
    if args.no_allowed_users {
        config = config.without_allowed_users();
    }

    tracing::info!(
        addr = %listen_addr,
        config_dir = %config_dir.display(),
        check_interval_secs = args.check_interval,
        "Starting broker"
    );

    let shutdown = install_shutdown_handler();
    BrokerDaemon::new(config).run(shutdown).await?;
    Ok(())
}

// =============================================================================
// Admin Commands
// =============================================================================

async fn send_admin(client: ClientArgs, request: Request) -> Result<(), Box<dyn std::error::Error>> {
    let response = BrokerClient::new(client.addr, client.conn_key)
        .send(request)
        .await?;
    print_response(&response, &client.output)?;

    if !response.status.is_ok() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_response(response: &Response, output: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(response)?),
        OutputFormat::Text if response.status.is_ok() => println!("{}", response.message),
        OutputFormat::Text => eprintln!("Error ({}): {}", response.status, response.message),
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Status(client) => send_admin(client, Request::ShowStatus).await?,
        Commands::Variables(client) => send_admin(client, Request::ShowVariables).await?,
        Commands::ReloadNodes(client) => send_admin(client, Request::ReloadNodes).await?,
        Commands::Redistribute(client) => send_admin(client, Request::Redistribute).await?,
        Commands::SaveMessages { client, state } => {
            let on = matches!(state, Toggle::On);
            send_admin(client, Request::SaveMessages(on)).await?;
        }
        Commands::Finish(client) => send_admin(client, Request::Finish).await?,
    }

    Ok(())
}

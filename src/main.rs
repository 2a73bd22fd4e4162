//! fleetd: Fleet management daemon for VPN-connected robots
//!
//! This is the main entry point for the production daemon.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! sudo ./fleetd
//!
//! # Run with custom configuration
//! sudo ./fleetd -c /path/to/config.json
//!
//! # Run with environment overrides
//! FLEETD_LOG_LEVEL=debug sudo ./fleetd
//! ```

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use fleetd::config::{load_config_with_env, Config};
use fleetd::dns::{DnsManager, DnsmasqService};
use fleetd::firewall::{FirewallManager, IptablesBackend};
use fleetd::provision::Provisioner;
use fleetd::reconcile::Reconciler;
use fleetd::runtime::LxcRuntime;
use fleetd::store::Store;
use fleetd::vpn::watcher::{dirty_channel, spawn_watcher};

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
    /// Run provisioning workers only, no reconciler
    provision_only: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/fleetd/config.json");
        let mut generate_config = false;
        let mut check_config = false;
        let mut provision_only = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "--provision-only" => {
                    provision_only = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("fleetd v{}", fleetd::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
            provision_only,
        }
    }
}

fn print_help() {
    println!(
        r"fleetd v{}

Fleet management daemon for VPN-connected robot containers.

USAGE:
    fleetd [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/fleetd/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    --provision-only        Run provisioning workers without the reconciler
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    FLEETD_NODE_NAME     Override node name
    FLEETD_LOG_LEVEL     Override log level (trace, debug, info, warn, error)
    FLEETD_STATUS_FILE   Override VPN status file path
    FLEETD_STORE_PATH    Override datastore path
    FLEETD_WORKERS       Override provision worker count

REQUIREMENTS:
    - iptables and the LXC tools on PATH
    - Write access to the hosts file and container directories
    - A VPN daemon writing its status file (status-version 3)
",
        fleetd::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("sqlx=warn".parse().expect("static directive"))
        .add_directive("tokio=warn".parse().expect("static directive"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target)
        .with_span_events(FmtSpan::CLOSE);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Resolve this node's name from config or the OS
fn node_name(config: &Config) -> String {
    if let Some(ref name) = config.node.name {
        return name.clone();
    }
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|h| h.trim().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}

/// Resolve this node's address from config or the default route
fn node_address(config: &Config) -> Ipv4Addr {
    if let Some(address) = config.node.address {
        return address;
    }

    // Connecting a UDP socket picks the source address of the default
    // route without sending a packet
    let detected = std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:53")?;
            socket.local_addr()
        })
        .ok()
        .and_then(|addr| match addr.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            std::net::IpAddr::V6(_) => None,
        });

    detected.unwrap_or_else(|| {
        warn!("Could not autodetect node address; falling back to loopback");
        Ipv4Addr::LOCALHOST
    })
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let args = Args::parse();

    if args.generate_config {
        fleetd::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    let config = load_config_with_env(&args.config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration from {:?}: {}",
            args.config_path,
            e
        )
    })?;

    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config);

    info!("fleetd v{}", fleetd::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    // Open the datastore and register this node
    if let Some(parent) = config.store.path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Store::connect(&config.store.path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open datastore: {}", e))?;
    store.migrate().await?;

    let name = node_name(&config);
    let address = node_address(&config);
    let node = store.register_node(&name, address).await?;

    // Wire up the managers against the production backends
    let firewall = Arc::new(FirewallManager::new(
        Arc::new(IptablesBackend::new()),
        store.clone(),
        config.firewall.clone(),
    ));
    let dns = Arc::new(DnsManager::new(
        store.clone(),
        Arc::new(DnsmasqService::new(config.dns.restart_command.clone())),
        config.dns.hosts_file.clone(),
    ));
    let runtime = Arc::new(LxcRuntime::new());

    // Reconciler plus its status file watcher
    let mut reconcile_tasks = Vec::new();
    if args.provision_only {
        info!("Provision-only mode; reconciler disabled");
    } else {
        let reconciler = Reconciler::new(
            node.id,
            store.clone(),
            Arc::clone(&firewall),
            Arc::clone(&dns),
            runtime,
            config.vpn.status_file.clone(),
            config.vpn.leases_file.clone(),
        );
        reconciler
            .startup()
            .await
            .map_err(|e| anyhow::anyhow!("Reconciler startup failed: {}", e))?;

        let (tx, rx) = dirty_channel();
        reconcile_tasks.push(spawn_watcher(
            config.vpn.status_file.clone(),
            config.vpn.poll_interval(),
            tx,
        ));
        reconcile_tasks.push(tokio::spawn(reconciler.run(rx)));
    }

    // Provisioning workers
    let mut worker_tasks = Vec::new();
    for worker in 0..config.provision.workers {
        let provisioner = Provisioner::new(
            store.clone(),
            node.id,
            config.containers.root.clone(),
            config.containers.template.clone(),
            config.provision.base_delay(),
        );
        worker_tasks.push(tokio::spawn(async move {
            info!(worker = worker, "Provisioning worker started");
            provisioner.run().await;
        }));
    }

    info!(
        node = %node.name,
        address = %node.address,
        workers = config.provision.workers,
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
        }
        _ = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    info!("Shutting down...");
    for task in reconcile_tasks.into_iter().chain(worker_tasks) {
        task.abort();
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // On non-Unix platforms, just wait forever
    std::future::pending::<()>().await
}

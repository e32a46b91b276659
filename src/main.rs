use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use monitorctl::client::{ChannelSink, ConnectionManager, SinkMessage};
use monitorctl::discovery::DiscoveryService;
use monitorctl::domain::{ConnectionState, DEFAULT_PORT, Endpoint, ProtocolEvent};
use monitorctl::monitor::controller::{DIM, LEVEL, MONO, MUTE};
use monitorctl::monitor::{Fanout, HostBook, MonitorController, MonitorState, SnapshotStore};
use monitorctl::protocol::CommandValue;

mod cli;
mod config;

use cli::Cli;
use cli::commands::{Commands, HostsCommands, VolumeCommands};
use config::Config;

/// How long a one-shot action waits for the engine to echo the change.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("monitorctl")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("monitorctl.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None | Some(Commands::Watch) => handle_watch(cli, config).await,
        Some(Commands::Discover { timeout }) => handle_discover(*timeout, config).await,
        Some(Commands::Get { path, wait }) => handle_get(cli, config, path, *wait).await,
        Some(Commands::Set { path, value }) => handle_set(cli, config, path, value).await,
        Some(Commands::Subscribe { path }) => handle_subscribe(cli, config, path).await,
        Some(Commands::Volume { command }) => handle_volume(cli, config, command).await,
        Some(Commands::Mute) => run_action(cli, config, MUTE, |c| c.toggle_mute().map(drop)).await,
        Some(Commands::Dim) => run_action(cli, config, DIM, |c| c.toggle_dim().map(drop)).await,
        Some(Commands::Mono) => run_action(cli, config, MONO, |c| c.toggle_mono().map(drop)).await,
        Some(Commands::Hosts { command }) => handle_hosts(cli, config, command),
    }
}

fn open_store(config: &Config) -> Result<Arc<SnapshotStore>> {
    let store = SnapshotStore::open(&config.storage.snapshot_path)
        .context(format!("Failed to open {}", config.storage.snapshot_path.display()))?;
    Ok(Arc::new(store))
}

/// `--host` wins, then the selected host, then the config file.
fn target_endpoint(cli: &Cli, config: &Config, store: &Arc<SnapshotStore>) -> Result<Endpoint> {
    if cli.host.is_some() {
        return Ok(config.endpoint(cli.host.as_deref(), cli.port));
    }
    let book = HostBook::load(store.clone()).context("Failed to load known hosts")?;
    Ok(match book.selection() {
        Some(selected) => Endpoint::new(selected.address.as_str(), cli.port.unwrap_or(selected.port)),
        None => config.endpoint(None, cli.port),
    })
}

async fn handle_discover(timeout: Option<u64>, config: &Config) -> Result<()> {
    let mut discovery = config.discovery_config();
    if let Some(secs) = timeout {
        discovery = discovery.with_scan_timeout(Duration::from_secs(secs));
    }
    info!("Discovering {} for {:?}", discovery.service_type, discovery.scan_timeout);
    println!(
        "{} {} ({}s)",
        "Scanning for".cyan(),
        discovery.service_type,
        discovery.scan_timeout.as_secs()
    );

    let service = DiscoveryService::mdns(discovery).context("Failed to start discovery")?;
    let hosts = service.scan().await;

    if hosts.is_empty() {
        println!("{}", "No hosts found".yellow());
    }
    for host in &hosts {
        println!("  {} {}", host.display_name.green(), host.endpoint.to_string().dimmed());
    }
    Ok(())
}

/// Connect a raw client and wait for the first outcome.
async fn open_client(cli: &Cli, config: &Config) -> Result<(ConnectionManager, mpsc::UnboundedReceiver<SinkMessage>)> {
    let store = open_store(config)?;
    let endpoint = target_endpoint(cli, config, &store)?;
    let (sink, mut rx) = ChannelSink::new();
    let manager = ConnectionManager::new(config.client_config(), Arc::new(sink));
    manager.connect(endpoint);

    while let Some(message) = rx.recv().await {
        let SinkMessage::Status(status) = message else {
            continue;
        };
        if cli.is_verbose() {
            println!("{}", status.message.dimmed());
        }
        match status.state {
            ConnectionState::Connected => return Ok((manager, rx)),
            ConnectionState::Disconnected => {
                manager.shutdown();
                return Err(eyre!(status.message));
            }
            _ => {}
        }
    }
    Err(eyre!("Connection closed"))
}

fn print_event(event: &ProtocolEvent) {
    match event {
        ProtocolEvent::NumericValue { path, property, value } => {
            println!("{} {} = {}", path.dimmed(), property.cyan(), value)
        }
        ProtocolEvent::BoolValue { path, property, value } => {
            println!("{} {} = {}", path.dimmed(), property.cyan(), value)
        }
        ProtocolEvent::StringValue { path, property, value } => {
            println!("{} {} = {:?}", path.dimmed(), property.cyan(), value)
        }
        ProtocolEvent::ChildList { path, ids } => println!("{} [{}]", path.dimmed(), ids.join(", ")),
    }
}

async fn handle_get(cli: &Cli, config: &Config, path: &str, wait: u64) -> Result<()> {
    info!("Getting {}", path);
    let (manager, mut rx) = open_client(cli, config).await?;
    manager.get(path)?;

    let deadline = tokio::time::sleep(Duration::from_secs(wait));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            message = rx.recv() => match message {
                Some(SinkMessage::Event(event)) => print_event(&event),
                Some(SinkMessage::Status(status)) if !status.is_connected() => {
                    println!("{}", status.message.yellow());
                    break;
                }
                Some(_) => {}
                None => break,
            },
        }
    }
    manager.shutdown();
    Ok(())
}

async fn handle_set(cli: &Cli, config: &Config, path: &str, value: &str) -> Result<()> {
    let value = CommandValue::from_str(value)?;
    info!("Setting {} to {}", path, value);
    let (manager, mut rx) = open_client(cli, config).await?;
    manager.set(path, value)?;
    // The reply to a follow-up read confirms the write went out
    manager.get(path)?;

    let confirmed = tokio::time::timeout(SETTLE_TIMEOUT, async {
        while let Some(message) = rx.recv().await {
            if let SinkMessage::Event(event) = message
                && event.path().starts_with(path)
            {
                return Some(event);
            }
        }
        None
    })
    .await;

    match confirmed {
        Ok(Some(event)) => print_event(&event),
        _ => println!("{} {} = {}", "Sent:".green(), path, value),
    }
    manager.shutdown();
    Ok(())
}

async fn handle_subscribe(cli: &Cli, config: &Config, path: &str) -> Result<()> {
    info!("Subscribing to {}", path);
    let (manager, mut rx) = open_client(cli, config).await?;
    manager.subscribe(path)?;
    println!("{} {} (Ctrl-C to stop)", "Subscribed to".cyan(), path);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            message = rx.recv() => match message {
                Some(SinkMessage::Event(event)) => print_event(&event),
                Some(SinkMessage::Status(status)) => {
                    println!("{}", status.message.yellow());
                    // Subscriptions do not survive a reconnect
                    if status.state == ConnectionState::Connected {
                        manager.subscribe(path)?;
                    }
                }
                Some(SinkMessage::Disconnected) => {}
                None => break,
            },
        }
    }
    manager.shutdown();
    Ok(())
}

fn print_state(state: &MonitorState) {
    let connection = if state.is_connected() {
        state.connection.to_string().green()
    } else {
        state.connection.to_string().yellow()
    };
    let flag = |on: bool, label: &str| {
        if on {
            label.red().bold().to_string()
        } else {
            label.dimmed().to_string()
        }
    };
    println!(
        "[{}] {} dB  {} {} {}  {}",
        connection,
        state.volume_display(),
        flag(state.muted, "MUTE"),
        flag(state.dimmed, "DIM"),
        flag(state.mono, "MONO"),
        state.status_message.dimmed()
    );
}

fn open_controller(
    cli: &Cli,
    config: &Config,
) -> Result<(Arc<MonitorController>, ConnectionManager, watch::Receiver<MonitorState>)> {
    let store = open_store(config)?;
    let endpoint = target_endpoint(cli, config, &store)?;
    let (tx, rx) = watch::channel(MonitorState::default());
    let sink = Fanout::new().with(store).with(Arc::new(tx));

    let controller = MonitorController::new(config.monitor_config(), Arc::new(sink));
    let manager = controller.attach(config.client_config());
    controller.connect_to(endpoint)?;
    Ok((controller, manager, rx))
}

async fn handle_watch(cli: &Cli, config: &Config) -> Result<()> {
    let (controller, _manager, mut rx) = open_controller(cli, config)?;
    println!("{}", "Watching monitor (Ctrl-C to stop)".cyan());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = rx.borrow_and_update().clone();
                print_state(&state);
            }
        }
    }
    controller.shutdown();
    Ok(())
}

/// Connect, wait until the engine has reported every monitor property,
/// apply `action`, then wait for the engine to answer a read of `property`.
async fn run_action<F>(cli: &Cli, config: &Config, property: &str, action: F) -> Result<()>
where
    F: FnOnce(&MonitorController) -> monitorctl::Result<()>,
{
    let (controller, manager, mut rx) = open_controller(cli, config)?;
    let limit = config.client_config().connect_timeout + SETTLE_TIMEOUT;
    // Either fully synced or enumeration ended without an output
    let settled = |s: &MonitorState| {
        s.is_synced() || (s.connection == ConnectionState::Connected && s.output.is_none())
    };

    let ready = match tokio::time::timeout(limit, rx.wait_for(settled)).await {
        Ok(Ok(state)) => Some((state.output_path(), state.status_message.clone())),
        Ok(Err(_)) => return Err(eyre!("Monitor controller stopped")),
        Err(_) => None,
    };
    let output = match ready {
        Some((Some(output), _)) => output,
        Some((None, message)) => {
            controller.shutdown();
            return Err(eyre!(message));
        }
        None => {
            let state = rx.borrow().clone();
            controller.shutdown();
            if state.output.is_some() {
                return Err(eyre!("Engine did not report the current monitor values"));
            }
            return Err(eyre!(state.status_message));
        }
    };

    action(controller.as_ref())?;
    rx.borrow_and_update();
    manager.get(&format!("{}/{}", output, property))?;
    let _ = tokio::time::timeout(SETTLE_TIMEOUT, rx.changed()).await;

    print_state(&controller.state());
    controller.shutdown();
    Ok(())
}

async fn handle_volume(cli: &Cli, config: &Config, command: &VolumeCommands) -> Result<()> {
    info!("Volume command: {:?}", command);
    match command {
        VolumeCommands::Up => run_action(cli, config, LEVEL, |c| c.increase_volume()).await,
        VolumeCommands::Down => run_action(cli, config, LEVEL, |c| c.decrease_volume()).await,
        VolumeCommands::Set { volume } => {
            let volume = *volume;
            run_action(cli, config, LEVEL, move |c| c.set_volume(volume)).await
        }
        VolumeCommands::Db { db } => {
            let db = *db;
            run_action(cli, config, LEVEL, move |c| c.set_level_db(db)).await
        }
    }
}

fn handle_hosts(cli: &Cli, config: &Config, command: &HostsCommands) -> Result<()> {
    info!("Hosts command: {:?}", command);
    let store = open_store(config)?;
    let mut book = HostBook::load(store).context("Failed to load known hosts")?;

    match command {
        HostsCommands::List => {
            let selected = book.selected();
            for host in book.merged(&[]) {
                let marker = if host.endpoint == selected { "*".green() } else { " ".normal() };
                println!("{} {} {}", marker, host.display_name, host.endpoint.to_string().dimmed());
            }
        }
        HostsCommands::Add { address, name } => {
            let host = book.add(address, cli.port.unwrap_or(DEFAULT_PORT), name.as_deref())?;
            println!("{} {} ({})", "Added:".green(), host.display_name, host.endpoint);
        }
        HostsCommands::Remove { address } => {
            if book.remove(address)? {
                println!("{} {}", "Removed:".red(), address);
            } else {
                println!("{} {}", "Not found:".yellow(), address);
            }
        }
        HostsCommands::Select { address } => {
            let known = book
                .merged(&[])
                .into_iter()
                .find(|h| h.address() == address)
                .map(|h| h.endpoint.port);
            let port = cli.port.or(known).unwrap_or(DEFAULT_PORT);
            let endpoint = Endpoint::new(address.as_str(), port);
            book.select(endpoint.clone())?;
            println!("{} {}", "Selected:".green(), endpoint);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}

//! serialws-bridge: share a USB serial device over WebSocket.
//!
//! Every chunk the device sends is broadcast to all connected WebSocket
//! clients as a text frame; every text frame a client sends is written to the
//! device.
//!
//! # Usage
//!
//! ```text
//! serialws-bridge [OPTIONS]
//!
//! Options:
//!   --config <FILE>          TOML config file (flags override it)
//!   --local-only[=BOOL]      Bind to 127.0.0.1 instead of 0.0.0.0
//!   --port <PORT>            WebSocket port [default: 8080]
//!   --port-index <N>         Port on a multi-port adapter [default: 0]
//!   --baud-rate <BAUD>       [default: 115200]
//!   --data-bits <5..8>       [default: 8]
//!   --stop-bits <1|1.5|2>    [default: 1]
//!   --parity <none|odd|even|mark|space>  [default: none]
//!   --keep-newline[=BOOL]    Do not strip the trailing newline from chunks
//!   --wait                   Keep retrying while no device/permission
//!   --restart                Start again after the device is unplugged
//!   --retry-interval <SECS>  [default: 2]
//!   --list-devices           Print recognised adapters and exit
//!   --print-config           Print the resolved config as TOML and exit
//!   --save-config <FILE>     Write the resolved config to FILE and exit
//! ```
//!
//! # Environment variable overrides
//!
//! Every option above also reads `SERIALWS_<NAME>` (for example
//! `SERIALWS_BAUD_RATE`).  Command-line flags take precedence.
//!
//! # Precedence
//!
//! flags / environment  >  `--config` file  >  built-in defaults

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use serialws_bridge::application::{BridgeListener, BridgeOrchestrator, DeviceDiscovery, StartError};
use serialws_bridge::infrastructure::{load_config, render_config, save_config, SystemDevices};
use serialws_core::{BridgeConfig, DataBits, Parity, StopBits};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// USB serial to WebSocket bridge.
#[derive(Debug, Parser)]
#[command(
    name = "serialws-bridge",
    about = "Shares a USB serial device with WebSocket clients",
    version
)]
struct Cli {
    /// TOML configuration file.  Flags given on the command line override it.
    #[arg(long, env = "SERIALWS_CONFIG")]
    config: Option<PathBuf>,

    /// Accept connections from this machine only (bind 127.0.0.1).
    /// `--local-only=false` overrides a config file that sets it.
    #[arg(
        long,
        env = "SERIALWS_LOCAL_ONLY",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_name = "BOOL"
    )]
    local_only: Option<bool>,

    /// TCP port for the WebSocket server.
    #[arg(long, env = "SERIALWS_PORT")]
    port: Option<u16>,

    /// Which port of a multi-port adapter to open.
    #[arg(long, env = "SERIALWS_PORT_INDEX")]
    port_index: Option<usize>,

    #[arg(long, env = "SERIALWS_BAUD_RATE")]
    baud_rate: Option<u32>,

    #[arg(long, env = "SERIALWS_DATA_BITS")]
    data_bits: Option<DataBits>,

    #[arg(long, env = "SERIALWS_STOP_BITS")]
    stop_bits: Option<StopBits>,

    #[arg(long, env = "SERIALWS_PARITY")]
    parity: Option<Parity>,

    /// Forward serial chunks to clients with their trailing newline intact.
    /// `--keep-newline=false` restores stripping.
    #[arg(
        long,
        env = "SERIALWS_KEEP_NEWLINE",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_name = "BOOL"
    )]
    keep_newline: Option<bool>,

    /// Retry start while no device is attached or permission is missing.
    #[arg(long, env = "SERIALWS_WAIT")]
    wait: bool,

    /// After the device goes away, wait for it and start a new session.
    /// Only Ctrl+C ends the process.
    #[arg(long, env = "SERIALWS_RESTART")]
    restart: bool,

    /// Seconds between start attempts with `--wait`.
    #[arg(long, default_value_t = 2, env = "SERIALWS_RETRY_INTERVAL")]
    retry_interval: u64,

    /// Print recognised adapters and the start status, then exit.
    #[arg(long)]
    list_devices: bool,

    /// Print the resolved configuration as TOML, then exit.
    #[arg(long)]
    print_config: bool,

    /// Write the resolved configuration to FILE, then exit.
    #[arg(long, value_name = "FILE")]
    save_config: Option<PathBuf>,
}

impl Cli {
    /// Builds the effective [`BridgeConfig`]: defaults, then the config file,
    /// then flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if the
    /// result fails validation.
    fn resolve_config(&self) -> anyhow::Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => BridgeConfig::default(),
        };

        if let Some(local_only) = self.local_only {
            config.local_only = local_only;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(port_index) = self.port_index {
            config.port_index = port_index;
        }
        if let Some(baud_rate) = self.baud_rate {
            config.baud_rate = baud_rate;
        }
        if let Some(data_bits) = self.data_bits {
            config.data_bits = data_bits;
        }
        if let Some(stop_bits) = self.stop_bits {
            config.stop_bits = stop_bits;
        }
        if let Some(parity) = self.parity {
            config.parity = parity;
        }
        if let Some(keep_newline) = self.keep_newline {
            config.strip_newline = !keep_newline;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval.max(1))
    }

    fn run_options(&self) -> RunOptions {
        RunOptions {
            wait: self.wait,
            restart: self.restart,
            retry_interval: self.retry_interval(),
        }
    }
}

/// How the bridge reacts to start failures and unplanned stops.
#[derive(Debug, Clone, Copy)]
struct RunOptions {
    wait: bool,
    restart: bool,
    retry_interval: Duration,
}

// ── Lifecycle notifications ───────────────────────────────────────────────────

/// Wakes `main` when the session ends on its own.
struct ExitOnStop {
    stopped: Arc<Notify>,
}

impl BridgeListener for ExitOnStop {
    fn started(&self) {
        info!("bridge started");
    }

    fn stopped(&self) {
        info!("bridge stopped");
        self.stopped.notify_one();
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn list_devices(discovery: &DeviceDiscovery) {
    let candidates = discovery.list_candidates();
    if candidates.is_empty() {
        println!("no supported USB serial devices found");
    }
    for (i, candidate) in candidates.iter().enumerate() {
        let marker = if i == 0 { "*" } else { " " };
        println!("{marker} {candidate}");
    }
    println!("status: {}", serialws_core::DeviceStatus::from_candidates(&candidates));
}

/// Where clients can reach a hub bound to `bound`.
///
/// A wildcard bind is listed once per non-loopback IPv4 interface address,
/// falling back to loopback when there is none.
fn client_urls(bound: SocketAddr, interfaces: &[IpAddr]) -> Vec<String> {
    let port = bound.port();
    if !bound.ip().is_unspecified() {
        return vec![format!("ws://{bound}")];
    }

    let mut urls: Vec<String> = interfaces
        .iter()
        .filter(|ip| ip.is_ipv4() && !ip.is_loopback())
        .map(|ip| format!("ws://{ip}:{port}"))
        .collect();
    if urls.is_empty() {
        urls.push(format!("ws://{}:{port}", Ipv4Addr::LOCALHOST));
    }
    urls
}

fn interface_addresses() -> Vec<IpAddr> {
    match get_if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces.iter().map(|iface| iface.ip()).collect(),
        Err(e) => {
            warn!("failed to list network interfaces: {e}");
            Vec::new()
        }
    }
}

fn announce(orchestrator: &BridgeOrchestrator) {
    let Some(bound) = orchestrator.local_addr() else {
        return;
    };
    for url in client_urls(bound, &interface_addresses()) {
        info!("clients can connect to {url}");
    }
}

/// Starts the bridge, retrying while `wait` is set and the failure may clear
/// on its own.  With `after_unplug`, a device that is still listed but
/// refuses to open is retried as well.
async fn start_with_retry(
    orchestrator: &BridgeOrchestrator,
    config: &BridgeConfig,
    wait: bool,
    after_unplug: bool,
    retry_interval: Duration,
) -> anyhow::Result<()> {
    loop {
        match orchestrator.start(config.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) if wait && (e.is_retryable() || (after_unplug && matches!(e, StartError::Setup(_)))) => {
                info!("{e}; retrying in {}s", retry_interval.as_secs());
                tokio::time::sleep(retry_interval).await;
            }
            Err(e) => return Err(e).context("failed to start bridge"),
        }
    }
}

/// Runs sessions until `shutdown` resolves.
///
/// Without `restart`, a session that ends on its own ends the run.  With it,
/// the bridge waits for the device and starts again.
async fn run_until_shutdown(
    orchestrator: &BridgeOrchestrator,
    config: &BridgeConfig,
    options: RunOptions,
    stopped: &Notify,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    tokio::pin!(shutdown);
    let mut after_unplug = false;

    loop {
        let wait = options.wait || after_unplug;
        tokio::select! {
            started = start_with_retry(orchestrator, config, wait, after_unplug, options.retry_interval) => started?,
            _ = &mut shutdown => {
                info!("interrupted before the bridge started");
                return Ok(());
            }
        }

        announce(orchestrator);

        tokio::select! {
            _ = &mut shutdown => {
                info!("shutting down");
                orchestrator.stop().await;
                return Ok(());
            }
            _ = stopped.notified() => {
                if !options.restart {
                    warn!("bridge session ended");
                    return Ok(());
                }
                warn!("bridge session ended; waiting for the device to return");
                after_unplug = true;
            }
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `RUST_LOG` controls verbosity; `trace` shows every byte in hex.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    if cli.print_config {
        print!("{}", render_config(&config)?);
        return Ok(());
    }

    if let Some(path) = &cli.save_config {
        save_config(path, &config)
            .with_context(|| format!("failed to save config to {}", path.display()))?;
        info!("config written to {}", path.display());
        return Ok(());
    }

    let discovery = DeviceDiscovery::new(Arc::new(SystemDevices));

    if cli.list_devices {
        list_devices(&discovery);
        return Ok(());
    }

    info!(
        "serialws-bridge starting: ws={}, {} baud, {} data bits, {} parity, {} stop bits",
        config.bind_addr(),
        config.baud_rate,
        config.data_bits,
        config.parity,
        config.stop_bits,
    );

    let stopped = Arc::new(Notify::new());
    let orchestrator = BridgeOrchestrator::new(
        discovery,
        Arc::new(ExitOnStop {
            stopped: Arc::clone(&stopped),
        }),
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {e}");
        }
    };

    run_until_shutdown(&orchestrator, &config, cli.run_options(), &stopped, shutdown).await
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serialws_bridge::application::BridgeState;
    use serialws_bridge::infrastructure::VirtualDevices;
    use tokio::sync::oneshot;

    #[test]
    fn test_cli_defaults_resolve_to_builtin_config() {
        // Arrange: no arguments at all
        let cli = Cli::parse_from(["serialws-bridge"]);

        // Act
        let config = cli.resolve_config().unwrap();

        // Assert
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.port, 8080);
        assert_eq!(config.baud_rate, 115_200);
        assert!(config.strip_newline);
        assert!(!config.local_only);
    }

    #[test]
    fn test_cli_line_settings_override() {
        let cli = Cli::parse_from([
            "serialws-bridge",
            "--baud-rate",
            "9600",
            "--data-bits",
            "7",
            "--stop-bits",
            "2",
            "--parity",
            "even",
        ]);

        let config = cli.resolve_config().unwrap();

        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.data_bits, DataBits::Seven);
        assert_eq!(config.stop_bits, StopBits::Two);
        assert_eq!(config.parity, Parity::Even);
    }

    #[test]
    fn test_cli_network_flags_override() {
        let cli = Cli::parse_from([
            "serialws-bridge",
            "--local-only",
            "--port",
            "9000",
            "--port-index",
            "2",
            "--keep-newline",
        ]);

        let config = cli.resolve_config().unwrap();

        assert!(config.local_only);
        assert_eq!(config.port, 9000);
        assert_eq!(config.port_index, 2);
        assert!(!config.strip_newline);
        assert_eq!(config.bind_addr().to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn test_cli_accepts_one_and_a_half_stop_bits() {
        let cli = Cli::parse_from(["serialws-bridge", "--stop-bits", "1.5"]);
        assert_eq!(cli.stop_bits, Some(StopBits::OnePointFive));
    }

    #[test]
    fn test_cli_rejects_unknown_parity() {
        let result = Cli::try_parse_from(["serialws-bridge", "--parity", "sideways"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_rejects_nine_data_bits() {
        let result = Cli::try_parse_from(["serialws-bridge", "--data-bits", "9"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_baud_fails_validation() {
        let cli = Cli::parse_from(["serialws-bridge", "--baud-rate", "0"]);

        let result = cli.resolve_config();

        assert!(result.is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        // Arrange: a file that sets port and parity
        let dir = std::env::temp_dir().join(format!("serialws-cli-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bridge.toml");
        std::fs::write(&path, "port = 7000\nparity = \"odd\"\nbaud_rate = 57600\n").unwrap();

        let cli = Cli::parse_from([
            "serialws-bridge",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "7001",
        ]);

        // Act
        let config = cli.resolve_config().unwrap();

        // Assert: the flag wins, the file fills the rest
        assert_eq!(config.port, 7001);
        assert_eq!(config.parity, Parity::Odd);
        assert_eq!(config.baud_rate, 57_600);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cli = Cli::parse_from([
            "serialws-bridge",
            "--config",
            "/nonexistent/serialws/bridge.toml",
        ]);

        assert!(cli.resolve_config().is_err());
    }

    #[test]
    fn test_retry_interval_has_a_floor_of_one_second() {
        let cli = Cli::parse_from(["serialws-bridge", "--retry-interval", "0"]);
        assert_eq!(cli.retry_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_explicit_false_overrides_config_file_booleans() {
        // Arrange: a file that binds locally and keeps newlines
        let dir = std::env::temp_dir().join(format!("serialws-cli-bool-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bridge.toml");
        std::fs::write(&path, "local_only = true\nstrip_newline = false\n").unwrap();

        let cli = Cli::parse_from([
            "serialws-bridge",
            "--config",
            path.to_str().unwrap(),
            "--local-only=false",
            "--keep-newline=false",
        ]);

        // Act
        let config = cli.resolve_config().unwrap();

        // Assert
        assert!(!config.local_only);
        assert!(config.strip_newline);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_boolean_flags_without_value_mean_true() {
        let cli = Cli::parse_from(["serialws-bridge", "--local-only", "--keep-newline"]);

        assert_eq!(cli.local_only, Some(true));
        assert_eq!(cli.keep_newline, Some(true));
    }

    #[test]
    fn test_absent_boolean_flags_leave_config_alone() {
        let cli = Cli::parse_from(["serialws-bridge"]);

        assert_eq!(cli.local_only, None);
        assert_eq!(cli.keep_newline, None);
        assert!(!cli.restart);
    }

    // ── client URLs ───────────────────────────────────────────────────────────

    #[test]
    fn test_wildcard_bind_lists_lan_addresses() {
        let bound: SocketAddr = "0.0.0.0:8080".parse().unwrap();
        let interfaces: Vec<IpAddr> = vec![
            "127.0.0.1".parse().unwrap(),
            "192.168.1.20".parse().unwrap(),
            "fe80::1".parse().unwrap(),
            "10.0.0.5".parse().unwrap(),
        ];

        let urls = client_urls(bound, &interfaces);

        assert_eq!(urls, vec!["ws://192.168.1.20:8080", "ws://10.0.0.5:8080"]);
    }

    #[test]
    fn test_wildcard_bind_without_lan_falls_back_to_loopback() {
        let bound: SocketAddr = "0.0.0.0:9000".parse().unwrap();

        let urls = client_urls(bound, &["127.0.0.1".parse().unwrap()]);

        assert_eq!(urls, vec!["ws://127.0.0.1:9000"]);
    }

    #[test]
    fn test_local_bind_is_reported_as_is() {
        let bound: SocketAddr = "127.0.0.1:45123".parse().unwrap();

        let urls = client_urls(bound, &["192.168.1.20".parse().unwrap()]);

        assert_eq!(urls, vec!["ws://127.0.0.1:45123"]);
    }

    // ── run loop ──────────────────────────────────────────────────────────────

    fn virtual_bridge(devices: &Arc<VirtualDevices>) -> (BridgeOrchestrator, Arc<Notify>) {
        let stopped = Arc::new(Notify::new());
        let orchestrator = BridgeOrchestrator::new(
            DeviceDiscovery::new(Arc::clone(devices) as _),
            Arc::new(ExitOnStop {
                stopped: Arc::clone(&stopped),
            }),
        );
        (orchestrator, stopped)
    }

    fn loopback_config() -> BridgeConfig {
        BridgeConfig {
            local_only: true,
            port: 0,
            ..BridgeConfig::default()
        }
    }

    fn run_options(restart: bool) -> RunOptions {
        RunOptions {
            wait: false,
            restart,
            retry_interval: Duration::from_millis(20),
        }
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..300 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met within 3 s");
    }

    #[tokio::test]
    async fn test_restart_starts_a_new_session_after_unplug() {
        // Arrange
        let devices = Arc::new(VirtualDevices::single_ftdi());
        let (orchestrator, stopped) = virtual_bridge(&devices);
        let config = loopback_config();
        let first = devices.attach_pipe();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        // Act
        let run = run_until_shutdown(&orchestrator, &config, run_options(true), &stopped, async {
            let _ = shutdown_rx.await;
        });
        let replug = async {
            wait_until(|| orchestrator.is_running()).await;
            drop(first);
            wait_until(|| !orchestrator.is_running()).await;

            let second = devices.attach_pipe();
            wait_until(|| orchestrator.is_running()).await;
            let _ = shutdown_tx.send(());
            second
        };
        let (result, _second) = tokio::time::timeout(Duration::from_secs(10), async {
            tokio::join!(run, replug)
        })
        .await
        .expect("run loop must finish after shutdown");

        // Assert
        assert!(result.is_ok());
        assert_eq!(orchestrator.state(), BridgeState::Stopped);
        assert!(devices.opened_ports().len() >= 2);
    }

    #[tokio::test]
    async fn test_without_restart_unplug_ends_the_run() {
        let devices = Arc::new(VirtualDevices::single_ftdi());
        let (orchestrator, stopped) = virtual_bridge(&devices);
        let config = loopback_config();
        let device = devices.attach_pipe();

        let run = run_until_shutdown(
            &orchestrator,
            &config,
            run_options(false),
            &stopped,
            std::future::pending::<()>(),
        );
        let unplug = async {
            wait_until(|| orchestrator.is_running()).await;
            drop(device);
        };
        let (result, ()) = tokio::time::timeout(Duration::from_secs(10), async {
            tokio::join!(run, unplug)
        })
        .await
        .expect("run loop must end with the session");

        assert!(result.is_ok());
        assert_eq!(devices.opened_ports().len(), 1);
    }
}

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, ValueEnum};
use mesh_sidecar_common::constants::{
    BACKEND_STATE_NEEDS_LOGIN, DEFAULT_LOCAL_API_SOCKET, DEFAULT_OVERLAY_SOCKS5,
    DIAL_TIMEOUT_SECS, STARTUP_POLL_INTERVAL_MS, STARTUP_TIMEOUT_SECS, TUNNEL_DIAL_TIMEOUT_SECS,
};
use mesh_sidecar_common::{SidecarEvent, validate_hostname};
use mesh_sidecar_gateway::server::{bind_loopback, serve_status};
use mesh_sidecar_gateway::{
    Dialer, Gateway, GatewayConfig, LocalApiNode, ProxyMode, Socks5Dialer, StartOptions,
    StatusSource, SystemDialer, wait_until_running,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod events;

use events::{EventEmitter, EventFormat, EventSink};

/// Proxy protocol served on the listening port
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Http,
    Socks5,
}

impl From<Mode> for ProxyMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Http => ProxyMode::Http,
            Mode::Socks5 => ProxyMode::Socks5,
        }
    }
}

/// How outbound connections reach the overlay network
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DialerKind {
    /// Host network stack (overlay node in kernel TUN mode)
    System,
    /// The overlay node's local SOCKS5 endpoint (userspace networking)
    Socks5,
}

/// CLI arguments for the sidecar
#[derive(Parser, Debug)]
#[command(name = "mesh-sidecar")]
#[command(about = "Expose an overlay network to local apps through an HTTP or SOCKS5 proxy", long_about = None)]
#[command(version)]
struct Args {
    /// Pre-authorized key used to log the overlay node in
    #[arg(long, env = "SIDECAR_AUTHKEY")]
    authkey: Option<String>,

    /// Coordination server URL (the node's default when unset)
    #[arg(long, env = "SIDECAR_COORDSERVER")]
    coordserver: Option<String>,

    /// Hostname the node registers on the overlay network
    #[arg(long, default_value = "ts-proxy")]
    hostname: String,

    /// Local port for the proxy listener
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Proxy protocol
    #[arg(long, value_enum, default_value = "http")]
    mode: Mode,

    /// Local port for the status API (disabled when unset)
    #[arg(long)]
    statusport: Option<u16>,

    /// Outbound dialer
    #[arg(long, value_enum, default_value = "system")]
    dialer: DialerKind,

    /// Overlay SOCKS5 endpoint used by `--dialer socks5`
    #[arg(long, default_value = DEFAULT_OVERLAY_SOCKS5)]
    overlay_socks5: SocketAddr,

    /// Unix socket of the overlay node's local API
    #[arg(long, default_value = DEFAULT_LOCAL_API_SOCKET)]
    local_api_socket: PathBuf,

    /// Dial timeout in seconds for forwarded requests and SOCKS5 (0 = none)
    #[arg(long, default_value_t = DIAL_TIMEOUT_SECS)]
    dial_timeout: u64,

    /// Dial timeout in seconds for CONNECT tunnels (0 = none)
    #[arg(long, default_value_t = TUNNEL_DIAL_TIMEOUT_SECS)]
    tunnel_dial_timeout: u64,

    /// Seconds to wait for the overlay node to come online
    #[arg(long, default_value_t = STARTUP_TIMEOUT_SECS)]
    startup_timeout: u64,

    /// Event destination: `stdout` or a file/FIFO path
    #[arg(long, default_value = "stdout")]
    events: String,

    /// Event line format
    #[arg(long, value_enum, default_value = "json")]
    event_format: EventFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Configuration for the sidecar, fixed for the process lifetime
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-authorized key; bring-up skips the login call without one
    pub auth_key: Option<String>,

    /// Coordination server URL, empty for the node's default
    pub control_url: String,

    pub hostname: String,

    pub proxy_port: u16,

    pub mode: ProxyMode,

    pub status_port: Option<u16>,

    dialer: DialerKind,

    pub overlay_socks5: SocketAddr,

    pub local_api_socket: PathBuf,

    /// Dial deadlines handed to the gateway
    pub gateway: GatewayConfig,

    /// Bound on overlay bring-up
    pub startup_timeout: Duration,

    pub poll_interval: Duration,

    pub events: EventSink,

    pub event_format: EventFormat,
}

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl Config {
    fn from_args(args: Args) -> Result<Self> {
        validate_hostname(&args.hostname).context("Invalid --hostname")?;
        if args.startup_timeout == 0 {
            bail!("--startup-timeout must be greater than zero");
        }

        Ok(Self {
            auth_key: args.authkey.filter(|key| !key.is_empty()),
            control_url: args.coordserver.unwrap_or_default(),
            hostname: args.hostname,
            proxy_port: args.port,
            mode: args.mode.into(),
            status_port: args.statusport,
            dialer: args.dialer,
            overlay_socks5: args.overlay_socks5,
            local_api_socket: args.local_api_socket,
            gateway: GatewayConfig {
                dial_timeout: timeout_from_secs(args.dial_timeout),
                tunnel_dial_timeout: timeout_from_secs(args.tunnel_dial_timeout),
            },
            startup_timeout: Duration::from_secs(args.startup_timeout),
            poll_interval: Duration::from_millis(STARTUP_POLL_INTERVAL_MS),
            events: EventSink::parse(&args.events),
            event_format: args.event_format,
        })
    }

    fn build_dialer(&self) -> Arc<dyn Dialer> {
        match self.dialer {
            DialerKind::System => Arc::new(SystemDialer),
            DialerKind::Socks5 => Arc::new(Socks5Dialer::new(self.overlay_socks5)),
        }
    }
}

/// Bring the overlay node online within the startup deadline
///
/// The deadline covers the whole sequence, login call included.
async fn bring_up(config: &Config, emitter: &EventEmitter) -> Result<Vec<String>> {
    emitter.emit(&SidecarEvent::Connecting {
        hostname: config.hostname.clone(),
    });
    info!("Starting overlay node '{}'...", config.hostname);

    let node = LocalApiNode::new(&config.local_api_socket);
    let client = node
        .status_client()
        .context("Overlay node is not reachable")?;

    let startup = async {
        if let Some(auth_key) = &config.auth_key {
            let options = StartOptions {
                auth_key: auth_key.clone(),
                hostname: config.hostname.clone(),
                control_url: config.control_url.clone(),
            };
            node.start(&options)
                .await
                .context("Failed to start overlay node")?;
        }

        let status = wait_until_running(client.as_ref(), config.poll_interval, |status| {
            info!("Overlay backend state: {}", status.backend_state);
            if status.is_state(BACKEND_STATE_NEEDS_LOGIN) {
                if let Some(url) = &status.auth_url {
                    info!("Overlay login required: {}", url);
                }
                emitter.emit(&SidecarEvent::AuthRequired {
                    url: status.auth_url.clone(),
                });
            }
        })
        .await;
        Ok::<_, anyhow::Error>(status)
    };

    let status = tokio::time::timeout(config.startup_timeout, startup)
        .await
        .map_err(|_| {
            anyhow!(
                "Overlay node did not reach Running within {:?}",
                config.startup_timeout
            )
        })??;

    info!("Overlay node is online");
    Ok(status
        .tailscale_ips
        .iter()
        .map(|ip| ip.to_string())
        .collect())
}

/// Startup sequence and proxy serving; returns on Ctrl-C or a fatal fault
async fn run(config: &Config, emitter: &EventEmitter) -> Result<()> {
    let ips = bring_up(config, emitter)
        .await
        .context("Tailnet connection failed")?;
    emitter.emit(&SidecarEvent::Connected { ips });

    // status listener is bound before readiness is reported
    if let Some(port) = config.status_port {
        let listener = bind_loopback(port)
            .await
            .with_context(|| format!("Failed to bind status API on port {}", port))?;
        let source: Arc<dyn StatusSource> =
            Arc::new(LocalApiNode::new(&config.local_api_socket));
        tokio::spawn(async move {
            if let Err(e) = serve_status(listener, source).await {
                error!("Status server failed: {}", e);
            }
        });
    }

    let listener = bind_loopback(config.proxy_port)
        .await
        .with_context(|| format!("Failed to bind proxy on port {}", config.proxy_port))?;
    let addr = listener.local_addr()?;

    let gateway = Arc::new(Gateway::new(
        config.mode,
        config.build_dialer(),
        config.gateway,
    ));

    info!(
        "Configure your apps to use {} proxy: {}",
        config.mode.as_str().to_uppercase(),
        addr
    );
    emitter.emit(&SidecarEvent::Listening {
        mode: config.mode.to_string(),
        addr: addr.to_string(),
    });
    emitter.emit(&SidecarEvent::Ready {
        url: config.mode.proxy_url(addr),
    });

    tokio::select! {
        result = gateway.serve(listener) => {
            result.with_context(|| format!("{} server failed", config.mode))?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down gracefully...");
            emitter.emit(&SidecarEvent::Shutdown);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    init_logging(args.verbose);

    let version = env!("CARGO_PKG_VERSION");
    info!("Mesh Sidecar v{}", version);

    // Build configuration
    let config = Config::from_args(args)?;
    let emitter = EventEmitter::open(&config.events, config.event_format)?;

    emitter.emit(&SidecarEvent::Starting {
        version: version.to_string(),
    });

    if let Err(e) = run(&config, &emitter).await {
        error!("{:#}", e);
        emitter.emit(&SidecarEvent::Error {
            message: format!("{:#}", e),
        });
        return Err(e);
    }

    Ok(())
}

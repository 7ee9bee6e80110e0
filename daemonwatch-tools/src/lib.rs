use clap::Parser;
use daemonwatch::config::{Config, ConfigError, TOKEN_ENV};
use uuid::Uuid;

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use crossterm::{cursor, terminal, ExecutableCommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
pub struct DaemonOpts {
    /// YAML configuration file; flags given here override it
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Daemon host name or address
    #[arg(short = 'H', long = "host")]
    pub host: Option<String>,

    /// Daemon port
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Use https/wss
    #[arg(long)]
    pub tls: bool,

    /// API token
    #[arg(long, env = TOKEN_ENV, hide_env_values = true)]
    pub token: Option<String>,

    /// Give up on a channel that has not opened after this many ms
    #[arg(long = "connect-timeout", value_name = "MS")]
    pub connect_timeout_ms: Option<u64>,

    /// Instance to watch
    #[arg(short = 't', long = "target", value_name = "UUID")]
    pub target: Uuid,

    /// Open the view as an observer without access to this instance
    #[arg(long = "no-permission")]
    pub no_permission: bool,

    /// Write logs to this file (filtered by RUST_LOG)
    #[arg(long = "log-file", value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

impl DaemonOpts {
    pub fn has_permission(&self) -> bool {
        !self.no_permission
    }

    /// Builds the effective configuration: file (or defaults), then flags,
    /// then the token environment variable.
    pub fn load_config(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.tls {
            config.tls = true;
        }
        if self.token.is_some() {
            config.token = self.token.clone();
        }
        if self.connect_timeout_ms.is_some() {
            config.connect_timeout_ms = self.connect_timeout_ms;
        }
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Logs go to `--log-file` when given. Without one only an explicit
    /// RUST_LOG enables output, on stderr, since the views own the terminal.
    pub fn init_logging(&self) -> io::Result<()> {
        match &self.log_file {
            Some(path) => {
                let file = File::create(path)?;
                let filter = EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("daemonwatch=info"));
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .init();
            }
            None => {
                let filter =
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off"));
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(io::stderr)
                    .init();
            }
        }
        Ok(())
    }
}

/// Raw-mode alternate screen, restored on teardown.
pub struct Tui {
    pub stdout: io::Stdout,
}

impl Tui {
    pub fn setup() -> io::Result<Self> {
        let mut stdout = io::stdout();
        terminal::enable_raw_mode()?;
        stdout.execute(terminal::EnterAlternateScreen)?;
        stdout.execute(cursor::Hide)?;
        Ok(Self { stdout })
    }

    pub fn teardown(&mut self) {
        let _ = self.stdout.execute(cursor::Show);
        let _ = self.stdout.execute(terminal::LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
        let _ = self.stdout.flush();
    }

    /// Makes a panic leave the terminal usable.
    pub fn install_panic_hook() {
        let original_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            let mut t = Tui {
                stdout: io::stdout(),
            };
            t.teardown();
            original_hook(panic_info);
        }));
    }
}

pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{:.0} {}", value, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

pub fn format_uptime(uptime: chrono::Duration) -> String {
    let secs = uptime.num_seconds().max(0);
    let (days, rem) = (secs / 86400, secs % 86400);
    let (h, m, s) = (rem / 3600, rem % 3600 / 60, rem % 60);
    if days > 0 {
        format!("{}d {:02}:{:02}:{:02}", days, h, m, s)
    } else {
        format!("{:02}:{:02}:{:02}", h, m, s)
    }
}

/// Cuts `text` to at most `width` characters.
pub fn clip(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: &str = "3f2b1c9e-8d4a-4b6f-9e1a-2c3d4e5f6a7b";

    #[test]
    fn flags_override_defaults() {
        let opts = DaemonOpts::try_parse_from([
            "daemon-console",
            "-t",
            TARGET,
            "-H",
            "daemon.lan",
            "--port",
            "8443",
            "--tls",
            "--token",
            "abc",
            "--connect-timeout",
            "2500",
        ])
        .unwrap();
        let config = opts.load_config().unwrap();
        assert_eq!(config.host, "daemon.lan");
        assert_eq!(config.port, 8443);
        assert!(config.tls);
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.connect_timeout_ms, Some(2500));
        assert!(opts.has_permission());
        assert_eq!(opts.target, Uuid::parse_str(TARGET).unwrap());
    }

    #[test]
    fn target_is_required() {
        assert!(DaemonOpts::try_parse_from(["daemon-console"]).is_err());
        assert!(DaemonOpts::try_parse_from(["daemon-console", "-t", "nope"]).is_err());
    }

    #[test]
    fn no_permission_flag() {
        let opts =
            DaemonOpts::try_parse_from(["daemon-perf", "-t", TARGET, "--no-permission"]).unwrap();
        assert!(!opts.has_permission());
    }

    #[test]
    fn byte_formatting() {
        assert_eq!(format_bytes(512.0), "512 B");
        assert_eq!(format_bytes(1536.0), "1.5 KiB");
        assert_eq!(format_bytes(3.0 * 1024.0 * 1024.0 * 1024.0), "3.0 GiB");
    }

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(chrono::Duration::seconds(3725)), "01:02:05");
        assert_eq!(
            format_uptime(chrono::Duration::seconds(2 * 86400 + 61)),
            "2d 00:01:01"
        );
    }

    #[test]
    fn clip_counts_chars() {
        assert_eq!(clip("héllo", 2), "hé");
        assert_eq!(clip("hi", 10), "hi");
    }
}

//! Command-line surface and the validated [`Config`] it parses into.
//!
//! `Cli` mirrors the raw flags one-to-one; `Config::from_cli` applies the
//! mode-dependent validation rules and produces the shape the rest of the
//! crate actually wants to work with.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::directory::Endpoint;
use crate::engine::Mode;
use crate::error::{Error, Result};

#[derive(Debug, Parser)]
#[command(name = "miniplexd", version, about = "UDP datagram multiplexer")]
pub struct Cli {
    #[arg(long)]
    pub hub: bool,
    #[arg(long)]
    pub trunk: bool,
    #[arg(long)]
    pub prune: bool,
    #[arg(long)]
    pub switch: bool,

    #[arg(long, default_value = "0.0.0.0")]
    pub local_addr: String,
    #[arg(long)]
    pub local_port: u16,

    #[arg(long)]
    pub trunk_ip: Option<String>,
    #[arg(long)]
    pub trunk_port: Option<u16>,

    #[arg(long = "branch-ip")]
    pub branch_ip: Vec<String>,
    #[arg(long = "branch-port")]
    pub branch_port: Vec<u16>,

    #[arg(long)]
    pub byte_code: Option<PathBuf>,

    #[arg(long, default_value_t = 512 * 1024)]
    pub so_rcvbuf: usize,
    /// Endpoint activity-refresh TTL, in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    pub timeout: u64,
    #[arg(long)]
    pub concurrency: Option<usize>,
    #[arg(long, default_value_t = 1024)]
    pub max_process_q: usize,

    #[arg(long, default_value = "info")]
    pub console_level: String,
    #[arg(long, default_value = "info")]
    pub file_level: String,
    #[arg(long, default_value = "miniplex.log")]
    pub log_file: PathBuf,
    #[arg(long, default_value_t = 10_240)]
    pub log_size_kb: u64,
    #[arg(long, default_value_t = 5)]
    pub log_num: usize,

    #[arg(long)]
    pub benchmark: bool,
    #[arg(long, default_value_t = 5000)]
    pub benchmark_duration_ms: u64,
}

/// Validated, ready-to-run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub local_addr: SocketAddr,
    pub perma_branches: HashSet<Endpoint>,
    pub so_rcvbuf: usize,
    pub timeout: Duration,
    pub concurrency: usize,
    pub max_process_q: usize,
    pub console_level: String,
    pub file_level: String,
    pub log_file: PathBuf,
    pub log_size_kb: u64,
    pub log_num: usize,
    pub benchmark: bool,
    pub benchmark_duration_ms: Duration,
}

const VALID_LEVELS: &[&str] = &["off", "trace", "debug", "info", "warn", "error"];

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let mode_flags = [cli.hub, cli.trunk, cli.prune, cli.switch];
        if mode_flags.iter().filter(|&&b| b).count() != 1 {
            return Err(Error::config("exactly one of --hub/--trunk/--prune/--switch is required"));
        }

        let local_ip: IpAddr = cli
            .local_addr
            .parse()
            .map_err(|_| Error::config(format!("invalid --local-addr {:?}", cli.local_addr)))?;
        let local_addr = SocketAddr::new(local_ip, cli.local_port);

        let trunk_endpoint = parse_trunk(&cli)?;

        let mode = if cli.hub {
            reject_trunk_flags(&cli)?;
            reject_byte_code(&cli)?;
            Mode::Hub
        } else if cli.trunk {
            reject_byte_code(&cli)?;
            let trunk = trunk_endpoint.ok_or_else(|| Error::config("--trunk-ip/--trunk-port required in trunk mode"))?;
            Mode::Trunk { trunk }
        } else if cli.prune {
            reject_byte_code(&cli)?;
            if !cli.branch_ip.is_empty() || !cli.branch_port.is_empty() {
                return Err(Error::config("--branch-ip/--branch-port are not allowed in prune mode: branches are learned"));
            }
            let trunk = trunk_endpoint.ok_or_else(|| Error::config("--trunk-ip/--trunk-port required in prune mode"))?;
            Mode::Prune { trunk }
        } else {
            reject_trunk_flags(&cli)?;
            let byte_code = cli
                .byte_code
                .clone()
                .ok_or_else(|| Error::config("--byte-code is required in switch mode"))?;
            Mode::Switch { byte_code }
        };

        let perma_branches = parse_branches(&cli)?;

        validate_level(&cli.console_level)?;
        validate_level(&cli.file_level)?;

        let concurrency = cli.concurrency.unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1));
        if concurrency == 0 {
            return Err(Error::config("--concurrency must be at least 1"));
        }

        Ok(Config {
            mode,
            local_addr,
            perma_branches,
            so_rcvbuf: cli.so_rcvbuf,
            timeout: Duration::from_millis(cli.timeout),
            concurrency,
            max_process_q: cli.max_process_q,
            console_level: cli.console_level,
            file_level: cli.file_level,
            log_file: cli.log_file,
            log_size_kb: cli.log_size_kb,
            log_num: cli.log_num,
            benchmark: cli.benchmark,
            benchmark_duration_ms: Duration::from_millis(cli.benchmark_duration_ms),
        })
    }
}

fn parse_trunk(cli: &Cli) -> Result<Option<Endpoint>> {
    match (&cli.trunk_ip, cli.trunk_port) {
        (None, None) => Ok(None),
        (Some(ip), Some(port)) => {
            let ip: IpAddr = ip.parse().map_err(|_| Error::config(format!("invalid --trunk-ip {ip:?}")))?;
            Ok(Some(SocketAddr::new(ip, port)))
        }
        _ => Err(Error::config("--trunk-ip and --trunk-port must be given together")),
    }
}

fn reject_trunk_flags(cli: &Cli) -> Result<()> {
    if cli.trunk_ip.is_some() || cli.trunk_port.is_some() {
        return Err(Error::config("--trunk-ip/--trunk-port are only valid in trunk or prune mode"));
    }
    Ok(())
}

fn reject_byte_code(cli: &Cli) -> Result<()> {
    if cli.byte_code.is_some() {
        return Err(Error::config("--byte-code is only valid in switch mode"));
    }
    Ok(())
}

fn parse_branches(cli: &Cli) -> Result<HashSet<Endpoint>> {
    if cli.branch_ip.len() != cli.branch_port.len() {
        return Err(Error::config("--branch-ip and --branch-port must be given the same number of times"));
    }
    let mut out = HashSet::with_capacity(cli.branch_ip.len());
    for (ip, &port) in cli.branch_ip.iter().zip(cli.branch_port.iter()) {
        let ip: IpAddr = ip.parse().map_err(|_| Error::config(format!("invalid --branch-ip {ip:?}")))?;
        out.insert(SocketAddr::new(ip, port));
    }
    Ok(out)
}

fn validate_level(level: &str) -> Result<()> {
    if VALID_LEVELS.contains(&level) {
        Ok(())
    } else {
        Err(Error::config(format!(
            "invalid log level {level:?}, expected one of {VALID_LEVELS:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args(mode_flag: &str) -> Vec<&str> {
        vec!["miniplexd", mode_flag, "--local-port", "9000"]
    }

    #[test]
    fn hub_mode_parses_with_no_trunk() {
        let cli = Cli::parse_from(base_args("--hub"));
        let cfg = Config::from_cli(cli).unwrap();
        assert!(matches!(cfg.mode, Mode::Hub));
    }

    #[test]
    fn trunk_mode_requires_trunk_address() {
        let cli = Cli::parse_from(base_args("--trunk"));
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn trunk_mode_parses_with_trunk_address() {
        let mut args = base_args("--trunk");
        args.extend(["--trunk-ip", "10.0.0.9", "--trunk-port", "7000"]);
        let cli = Cli::parse_from(args);
        let cfg = Config::from_cli(cli).unwrap();
        assert!(matches!(cfg.mode, Mode::Trunk { .. }));
    }

    #[test]
    fn prune_mode_rejects_branch_flags() {
        let mut args = base_args("--prune");
        args.extend([
            "--trunk-ip", "10.0.0.9", "--trunk-port", "7000", "--branch-ip", "10.0.0.1", "--branch-port", "5001",
        ]);
        let cli = Cli::parse_from(args);
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn switch_mode_requires_byte_code() {
        let cli = Cli::parse_from(base_args("--switch"));
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn mismatched_branch_counts_are_rejected() {
        let mut args = base_args("--hub");
        args.extend(["--branch-ip", "10.0.0.1", "--branch-ip", "10.0.0.2", "--branch-port", "5001"]);
        let cli = Cli::parse_from(args);
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let mut args = base_args("--hub");
        args.extend(["--console-level", "verbose"]);
        let cli = Cli::parse_from(args);
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn no_mode_flag_is_rejected() {
        let cli = Cli::parse_from(vec!["miniplexd", "--local-port", "9000"]);
        assert!(Config::from_cli(cli).is_err());
    }
}

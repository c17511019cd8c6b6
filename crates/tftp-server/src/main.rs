//! TFTP Server - Main executable
//!
//! Serves files from a read directory and accepts uploads into a write directory.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use argh::FromArgs;
use tftp::{RetryPolicy, ServerConfig, SessionConfig, TftpServer};

const DEFAULT_BIND: &str = "0.0.0.0:4970"; // unprivileged; run as root or redirect for :69
const DEFAULT_READ_ROOT: &str = "./read";
const DEFAULT_WRITE_ROOT: &str = "./write";

#[derive(FromArgs, Debug)]
#[argh(
    description = "TFTP server - serves reads and accepts writes over RFC 1350",
    example = "Serve on the standard port:\n  {command_name} --bind 0.0.0.0:69 --read-root /srv/tftp --write-root /srv/tftp/incoming",
    example = "Tolerate slow clients:\n  {command_name} --timeout-ms 10000 --max-retries 8"
)]
struct CliConfig {
    #[argh(
        option,
        short = 'b',
        description = "listening address",
        default = "DEFAULT_BIND.to_string()"
    )]
    bind: String,

    #[argh(
        option,
        short = 'r',
        description = "directory served to read requests",
        default = "PathBuf::from(DEFAULT_READ_ROOT)"
    )]
    read_root: PathBuf,

    #[argh(
        option,
        short = 'w',
        description = "directory receiving write requests",
        default = "PathBuf::from(DEFAULT_WRITE_ROOT)"
    )]
    write_root: PathBuf,

    #[argh(option, description = "local IP for per-transfer sockets")]
    local_ip: Option<String>,

    #[argh(option, description = "per-attempt timeout in milliseconds", default = "5000")]
    timeout_ms: u64,

    #[argh(option, description = "retransmissions before a transfer is abandoned", default = "5")]
    max_retries: u32,

    #[argh(switch, description = "replace existing files on write requests")]
    allow_overwrite: bool,
}

impl CliConfig {
    fn into_server_config(self) -> Result<ServerConfig> {
        if self.timeout_ms == 0 {
            bail!("--timeout-ms must be greater than zero");
        }

        let local_bind = self
            .local_ip
            .as_deref()
            .map(|ip| ip.parse::<IpAddr>().with_context(|| format!("Invalid local IP: {}", ip)))
            .transpose()?;

        for (flag, dir) in [("--read-root", &self.read_root), ("--write-root", &self.write_root)] {
            if !dir.is_dir() {
                bail!("{} {} is not a directory", flag, dir.display());
            }
        }

        Ok(ServerConfig {
            bind_address: self.bind,
            local_bind,
            session: SessionConfig {
                read_root: self.read_root,
                write_root: self.write_root,
                retry: RetryPolicy {
                    timeout: Duration::from_millis(self.timeout_ms),
                    max_retries: self.max_retries,
                },
                allow_overwrite: self.allow_overwrite,
            },
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli_config: CliConfig = argh::from_env();
    let config = cli_config.into_server_config()?;

    tracing::info!(
        "Starting TFTP server on {} (timeout {:?}, {} retries{})",
        config.bind_address,
        config.session.retry.timeout,
        config.session.retry.max_retries,
        if config.session.allow_overwrite { ", overwrite enabled" } else { "" }
    );

    TftpServer::new(config).run().await
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn cli(read_root: PathBuf, write_root: PathBuf) -> CliConfig {
        CliConfig {
            bind: DEFAULT_BIND.to_string(),
            read_root,
            write_root,
            local_ip: None,
            timeout_ms: 5000,
            max_retries: 5,
            allow_overwrite: false,
        }
    }

    #[test]
    fn test_cli_defaults_parse() {
        let cli: CliConfig = CliConfig::from_args(&["tftp-server"], &[]).unwrap();
        assert_eq!(cli.bind, DEFAULT_BIND);
        assert_eq!(cli.read_root, PathBuf::from(DEFAULT_READ_ROOT));
        assert_eq!(cli.write_root, PathBuf::from(DEFAULT_WRITE_ROOT));
        assert_eq!(cli.timeout_ms, 5000);
        assert_eq!(cli.max_retries, 5);
        assert!(!cli.allow_overwrite);
    }

    #[test]
    fn test_into_server_config() {
        let dir = tempdir().unwrap();
        let mut cli = cli(dir.path().to_path_buf(), dir.path().to_path_buf());
        cli.local_ip = Some("127.0.0.1".to_string());
        cli.timeout_ms = 250;
        cli.allow_overwrite = true;

        let config = cli.into_server_config().unwrap();
        assert_eq!(config.local_bind, Some("127.0.0.1".parse().unwrap()));
        assert_eq!(config.session.retry.timeout, Duration::from_millis(250));
        assert!(config.session.allow_overwrite);
    }

    #[test]
    fn test_into_server_config_rejects_bad_input() {
        let dir = tempdir().unwrap();

        let mut bad_ip = cli(dir.path().to_path_buf(), dir.path().to_path_buf());
        bad_ip.local_ip = Some("not-an-ip".to_string());
        assert!(bad_ip.into_server_config().is_err());

        let missing = cli(dir.path().join("missing"), dir.path().to_path_buf());
        assert!(missing.into_server_config().is_err());

        let mut zero_timeout = cli(dir.path().to_path_buf(), dir.path().to_path_buf());
        zero_timeout.timeout_ms = 0;
        assert!(zero_timeout.into_server_config().is_err());
    }
}

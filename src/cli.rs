//! Clap option structs and argument validators for both binaries

use clap::Parser;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::archiver::ArchiverKind;

pub const MIN_PORT: u16 = 1024;

/// Port number in the unprivileged range 1024..=65535
pub fn parse_port(s: &str) -> Result<u16, String> {
    let port: u16 = s
        .trim()
        .parse()
        .map_err(|_| format!("invalid port {:?} (integer between {} and 65535)", s, MIN_PORT))?;
    if port < MIN_PORT {
        return Err(format!("invalid port {} (integer between {} and 65535)", port, MIN_PORT));
    }
    Ok(port)
}

/// Dotted-decimal IPv4 address, or the literal `localhost`
pub fn parse_host(s: &str) -> Result<Ipv4Addr, String> {
    if s == "localhost" {
        return Ok(Ipv4Addr::LOCALHOST);
    }
    s.parse::<Ipv4Addr>()
        .map_err(|_| format!("invalid IPv4 address {:?} (four numbers 0-255 separated by dots)", s))
}

/// remcompd: remote compression daemon
#[derive(Clone, Debug, Parser)]
#[command(name = "remcompd", version)]
pub struct ServerOpts {
    /// TCP port to listen on
    #[arg(value_parser = parse_port)]
    pub port: u16,

    /// Address to bind
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Number of pool workers (concurrent clients)
    #[arg(long, short = 'w')]
    pub workers: Option<usize>,

    /// Directory holding the per-worker scratch folders
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Archive backend
    #[arg(long, value_enum)]
    pub archiver: Option<ArchiverKind>,

    /// Append a session journal to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// TOML file with defaults for the options above
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,
}

/// remcomp: interactive remote compression client
#[derive(Clone, Debug, Parser)]
#[command(name = "remcomp", version)]
pub struct ClientOpts {
    /// Server IPv4 address or "localhost"
    #[arg(value_parser = parse_host)]
    pub host: Ipv4Addr,

    /// Server port
    #[arg(value_parser = parse_port)]
    pub port: u16,

    /// Disable transfer progress bars
    #[arg(long)]
    pub no_progress: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_range() {
        assert_eq!(parse_port("1024"), Ok(1024));
        assert_eq!(parse_port("65535"), Ok(65535));
        assert!(parse_port("1023").is_err());
        assert!(parse_port("65536").is_err());
        assert!(parse_port("http").is_err());
    }

    #[test]
    fn host_forms() {
        assert_eq!(parse_host("localhost"), Ok(Ipv4Addr::LOCALHOST));
        assert_eq!(parse_host("10.0.0.7"), Ok(Ipv4Addr::new(10, 0, 0, 7)));
        assert!(parse_host("256.1.1.1").is_err());
        assert!(parse_host("example.org").is_err());
    }

    #[test]
    fn server_opts_parse() {
        let o = ServerOpts::try_parse_from([
            "remcompd", "4000", "--workers", "2", "--archiver", "builtin", "--bind", "127.0.0.1",
        ])
        .unwrap();
        assert_eq!(o.port, 4000);
        assert_eq!(o.workers, Some(2));
        assert_eq!(o.archiver, Some(ArchiverKind::Builtin));
        assert!(ServerOpts::try_parse_from(["remcompd", "80"]).is_err());
        assert!(ServerOpts::try_parse_from(["remcompd"]).is_err());
    }

    #[test]
    fn client_opts_parse() {
        let o = ClientOpts::try_parse_from(["remcomp", "localhost", "4000", "--no-progress"]).unwrap();
        assert_eq!(o.host, Ipv4Addr::LOCALHOST);
        assert!(o.no_progress);
        assert!(ClientOpts::try_parse_from(["remcomp", "nohost", "4000"]).is_err());
    }
}

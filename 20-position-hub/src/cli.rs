use std::{net::SocketAddr, time::Duration};

use clap::Parser;

use crate::server::HubConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Socket address the hub should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:3333")]
    pub listen: SocketAddr,

    /// Upper bound for a single write to one client, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    pub write_timeout_ms: u64,
}

impl Cli {
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_the_fixed_port() {
        let cli = Cli::parse_from(["position_hub"]);
        assert_eq!(cli.listen, "0.0.0.0:3333".parse::<SocketAddr>().unwrap());
        assert_eq!(cli.hub_config().write_timeout, Duration::from_secs(5));
    }

    #[test]
    fn accepts_overrides() {
        let cli = Cli::parse_from([
            "position_hub",
            "--listen",
            "127.0.0.1:0",
            "--write-timeout-ms",
            "250",
        ]);
        assert_eq!(cli.listen.port(), 0);
        assert_eq!(cli.hub_config().write_timeout, Duration::from_millis(250));
    }
}

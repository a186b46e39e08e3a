use clap::Parser;
use std::net::Ipv4Addr;
use std::time::Duration;

use pingcore::PingConfig;

/// Ping engine demo over a simulated IP link
#[derive(Parser, Debug, Clone)]
#[command(name = "pingcore")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Target IPv4 address
    #[arg(required = true)]
    pub target: Ipv4Addr,

    /// Number of echo requests (0 = default of 4)
    #[arg(short = 'c', long = "count", default_value = "4")]
    pub count: u32,

    /// Interval between requests in seconds
    #[arg(short = 'i', long = "interval", default_value = "1.0")]
    pub interval: f64,

    /// Per-request timeout in seconds
    #[arg(long = "timeout", default_value = "1.0")]
    pub timeout: f64,

    /// Echo payload size in bytes
    #[arg(short = 's', long = "size", default_value = "56")]
    pub size: usize,

    /// Ping continuously in the background until Ctrl-C
    #[arg(long = "continuous")]
    pub continuous: bool,

    /// Simulated link latency in milliseconds
    #[arg(long = "latency", default_value = "20")]
    pub latency: u64,

    /// Drop every Nth reply on the simulated link (0 = no loss)
    #[arg(long = "drop-every", default_value = "0")]
    pub drop_every: u64,

    /// Print the final statistics as JSON
    #[arg(long = "json")]
    pub json: bool,

    /// Log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Get per-request timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    /// Get probe interval as Duration
    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs_f64(self.interval)
    }

    pub fn to_config(&self) -> PingConfig {
        PingConfig {
            timeout: self.timeout_duration(),
            interval: self.interval_duration(),
            payload_size: self.size,
        }
    }
}

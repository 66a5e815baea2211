//! Command-line arguments

use std::path::PathBuf;

use clap::Parser;

pub const DEFAULT_CONF_PATH: &str = "/etc/eapold.conf";
pub const DEFAULT_PID_PATH: &str = "/var/run/eapold.pid";
pub const DEFAULT_LOG_PATH: &str = "/var/log/eapold.log";

#[derive(Parser, Debug)]
#[command(name = "eapold")]
#[command(version, about = "Transparent EAPOL (IEEE 802.1X) proxy daemon", long_about = None)]
pub struct Args {
    /// Run as a daemon (disables console output, implies --syslog)
    #[arg(short = 'd', long)]
    pub daemon: bool,

    /// PID file path
    #[arg(short = 'p', long = "pid", value_name = "PATH", default_value = DEFAULT_PID_PATH)]
    pub pidfile: PathBuf,

    /// Config file path
    #[arg(short = 'c', long = "config", value_name = "PATH", default_value = DEFAULT_CONF_PATH)]
    pub config: PathBuf,

    /// Test the config file and exit
    #[arg(short = 't', long = "test")]
    pub test: bool,

    /// Output to a log file (default path when PATH is not given)
    #[arg(
        short = 'l',
        long = "log",
        value_name = "PATH",
        num_args = 0..=1,
        default_missing_value = DEFAULT_LOG_PATH
    )]
    pub logfile: Option<PathBuf>,

    /// Output to syslog
    #[arg(short = 's', long)]
    pub syslog: bool,

    /// Verbosity of output (-v, -vv, -vvv for increasing verbosity)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log script execution notices at higher verbosity
    #[arg(short = 'q', long = "quiet-script")]
    pub quiet_script: bool,

    /// Do not colorize console output
    #[arg(short = 'n', long = "no-color")]
    pub no_color: bool,

    /// Exit instead of restarting the proxy after runtime errors
    #[arg(short = 'o', long)]
    pub oneshot: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["eapold"]);
        assert!(!args.daemon);
        assert!(!args.oneshot);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONF_PATH));
        assert_eq!(args.pidfile, PathBuf::from(DEFAULT_PID_PATH));
        assert!(args.logfile.is_none());
        assert_eq!(args.verbose, 0);
    }

    #[test]
    fn test_log_optional_value() {
        let args = Args::parse_from(["eapold", "-l"]);
        assert_eq!(args.logfile, Some(PathBuf::from(DEFAULT_LOG_PATH)));

        let args = Args::parse_from(["eapold", "--log", "/tmp/x.log"]);
        assert_eq!(args.logfile, Some(PathBuf::from("/tmp/x.log")));
    }

    #[test]
    fn test_verbosity_count() {
        let args = Args::parse_from(["eapold", "-vvv"]);
        assert_eq!(args.verbose, 3);
    }
}

//! eapold - transparent EAPOL (IEEE 802.1X) proxy daemon
//!
//! Relays EAPOL frames between configured Ethernet interfaces, with optional
//! per-interface filtering, 802.1Q tag rewriting, MAC spoofing, and script
//! execution on recognised packets.

mod args;
mod daemonize;
mod logging;
mod policy;
mod proxy;
mod script;
mod signals;

use clap::Parser;
use tracing::{debug, error, info, warn};

use eapold_capture::iface::IfaceTable;
use eapold_core::config::Config;

use crate::args::Args;
use crate::proxy::Proxy;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    // Before anything else: the signal mask must be in place before any
    // other code runs, so nothing is ever delivered outside the wait.
    if let Err(e) = signals::install() {
        eprintln!("eapold: cannot set up signal handling: {e}");
        return 1;
    }

    let args = Args::parse();

    if args.test {
        println!("testing config file at '{}'", args.config.display());
        return match Config::load(&args.config) {
            Ok(_) => {
                println!("config file seems valid");
                0
            }
            Err(e) => {
                eprintln!("eapold: {e}");
                1
            }
        };
    }

    if let Err(e) = logging::init(&args) {
        eprintln!("eapold: {e}");
        return 1;
    }

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return 1;
        }
    };
    debug!(
        "loaded {} interfaces from '{}'",
        config.ifaces.len(),
        args.config.display()
    );
    for iface in &config.ifaces {
        debug!("{iface:?}");
    }

    let uid = unsafe { libc::getuid() };
    info!("running as user {uid}");
    if uid != 0 {
        warn!("not running as root");
    }

    let table = match IfaceTable::from_config(&config) {
        Ok(table) => table,
        Err(e) => {
            error!("{e}");
            return 1;
        }
    };

    if args.daemon {
        if let Err(e) = daemonize::daemonize(&args.pidfile) {
            error!("{e}");
            return 1;
        }
    }

    let mut proxy = Proxy::new(table, args.oneshot, args.quiet_script);
    match proxy.run() {
        Ok(()) => {
            info!("goodbye");
            0
        }
        Err(e) => {
            error!("{e}");
            1
        }
    }
}

//! Logging facilities: console, log file, and syslog
//!
//! Built as a `tracing-subscriber` registry with up to three layers. The
//! console layer writes to stderr and honors `--no-color`; it is left out
//! entirely when daemonised. The file layer appends datestamped plain-text
//! lines. The syslog layer forwards everything up to DEBUG through
//! `syslog(3)`; TRACE output (hexdumps, structure views) never reaches
//! syslog.

use std::ffi::CString;
use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use eapold_core::{Error, Result};

use crate::args::Args;

/// Initialize the logging registry. Called exactly once at startup.
pub fn init(args: &Args) -> Result<()> {
    let filter = EnvFilter::new(match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    });

    let console = if args.daemon {
        None
    } else {
        Some(
            fmt::layer()
                .with_target(false)
                .with_ansi(!args.no_color)
                .with_writer(std::io::stderr),
        )
    };

    let file = match &args.logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    Error::config(format!("cannot open log file '{}': {e}", path.display()))
                })?;
            Some(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let syslog = if args.syslog || args.daemon {
        open_syslog(args.daemon);
        Some(SyslogLayer)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .with(syslog)
        .init();

    if let Some(path) = &args.logfile {
        tracing::info!("logging to '{}'", path.display());
    }

    Ok(())
}

fn open_syslog(daemon: bool) {
    static IDENT: &[u8] = b"eapold\0";
    let facility = if daemon {
        libc::LOG_DAEMON
    } else {
        libc::LOG_USER
    };
    unsafe {
        libc::openlog(
            IDENT.as_ptr() as *const libc::c_char,
            libc::LOG_PID,
            facility,
        );
    }
}

/// Forwards events to `syslog(3)`
struct SyslogLayer;

impl<S: Subscriber> Layer<S> for SyslogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level == Level::TRACE {
            return;
        }
        let priority = match level {
            Level::ERROR => libc::LOG_ERR,
            Level::WARN => libc::LOG_WARNING,
            Level::INFO => libc::LOG_NOTICE,
            _ => libc::LOG_DEBUG,
        };

        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        if let Ok(msg) = CString::new(visitor.0) {
            static FMT: &[u8] = b"%s\0";
            unsafe {
                libc::syslog(priority, FMT.as_ptr() as *const libc::c_char, msg.as_ptr());
            }
        }
    }
}

/// Collects the `message` field of an event
struct MessageVisitor(String);

impl tracing::field::Visit for MessageVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.0.push_str(value);
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            use std::fmt::Write;
            let _ = write!(self.0, "{value:?}");
        }
    }
}

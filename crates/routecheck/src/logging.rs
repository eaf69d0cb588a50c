//! Logging setup for route_check
//!
//! Logs go to stderr through `tracing-subscriber`. With `--log-to-syslog` a
//! second layer mirrors every record to the local syslog socket.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-3: Content of Audit Records - Structured fields on every record
//! - AU-9: Protection of Audit Information - Mirrored to the system log

use anyhow::Context;
use parking_lot::Mutex;
use std::io;
use std::path::Path;
use std::sync::Arc;
use syslog::{Facility, Formatter3164, Logger, LoggerBackend};
use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::report::ReportingConfig;

/// Syslog identifier
pub const SYSLOG_TAG: &str = "route_check";

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over the `--mode` level when set.
pub fn init(config: &ReportingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.mode.as_filter()));

    let syslog_layer = if config.log_to_syslog {
        let writer = SyslogMakeWriter::connect_default(SYSLOG_TAG)
            .context("Failed to open the local syslog socket")?;
        Some(
            fmt::layer()
                .with_ansi(false)
                .without_time()
                .with_level(false)
                .with_target(false)
                .with_writer(writer),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .compact(),
        )
        .with(syslog_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

type SyslogLogger = Logger<LoggerBackend, Formatter3164>;

fn formatter(tag: &str) -> Formatter3164 {
    Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: tag.to_string(),
        pid: std::process::id(),
    }
}

fn syslog_error(e: syslog::Error) -> io::Error {
    io::Error::other(e.to_string())
}

/// `MakeWriter` that hands each formatted event to the system logger
#[derive(Clone)]
pub struct SyslogMakeWriter {
    logger: Arc<Mutex<SyslogLogger>>,
}

impl SyslogMakeWriter {
    /// Connects to the platform's default syslog socket.
    pub fn connect_default(tag: &str) -> io::Result<Self> {
        let logger = syslog::unix(formatter(tag)).map_err(syslog_error)?;
        Ok(Self::from_logger(logger))
    }

    /// Connects to the syslog socket at `path`.
    pub fn connect(path: &Path, tag: &str) -> io::Result<Self> {
        let logger = syslog::unix_custom(formatter(tag), path).map_err(syslog_error)?;
        Ok(Self::from_logger(logger))
    }

    fn from_logger(logger: SyslogLogger) -> Self {
        Self {
            logger: Arc::new(Mutex::new(logger)),
        }
    }

    fn writer(&self, level: Level) -> SyslogWriter<'_> {
        SyslogWriter {
            target: self,
            level,
            buffer: Vec::new(),
        }
    }
}

impl<'a> MakeWriter<'a> for SyslogMakeWriter {
    type Writer = SyslogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        self.writer(Level::INFO)
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        self.writer(*meta.level())
    }
}

/// Buffers one event and logs it when dropped
pub struct SyslogWriter<'a> {
    target: &'a SyslogMakeWriter,
    level: Level,
    buffer: Vec<u8>,
}

impl io::Write for SyslogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SyslogWriter<'_> {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.buffer);
        let message = text.trim_end();
        if message.is_empty() {
            return;
        }

        let mut logger = self.target.logger.lock();
        let sent = match self.level {
            Level::ERROR => logger.err(message),
            Level::WARN => logger.warning(message),
            Level::INFO => logger.info(message),
            Level::DEBUG | Level::TRACE => logger.debug(message),
        };
        // Nowhere to report a logging failure.
        let _ = sent;
    }
}

//! Routes `tracing` output into the script log.
//!
//! The runtime handle is borrowed for the length of one command, so the
//! subscriber cannot hold it. Formatted lines are buffered per thread instead
//! and handed to [`Host::print`] by [`flush_to`].

use std::{
    cell::RefCell,
    io,
};

use tracing_subscriber::EnvFilter;

use crate::host::Host;

thread_local! {
    static BUFFER: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
}

/// Writer handed to the fmt layer.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl io::Write for LogSink {
    fn write(
        &mut self,
        buf: &[u8],
    ) -> io::Result<usize> {
        BUFFER.with(|b| b.borrow_mut().extend_from_slice(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Installs the global subscriber. Later calls keep the first subscriber.
pub fn init(level: &str) {
    let filter =
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(|| LogSink)
        .without_time()
        .with_ansi(false)
        .with_target(false)
        .compact()
        .try_init();
}

/// Takes every buffered line.
pub fn drain() -> Vec<String> {
    let bytes = BUFFER.with(|b| std::mem::take(&mut *b.borrow_mut()));

    String::from_utf8_lossy(&bytes)
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect()
}

pub fn flush_to(host: &impl Host) {
    for line in drain() {
        host.print(&line);
    }
}

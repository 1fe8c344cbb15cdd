use std::io::{self, Write};

use serde::Serialize;

use crate::progress::{Level, ProgressEvent, ProgressSink};

/// Forwards progress events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingOutput;

impl ProgressSink for TracingOutput {
    fn event(&self, event: ProgressEvent) {
        match event.level {
            Level::Debug => tracing::debug!("{}", event.message),
            Level::Info => tracing::info!("{}", event.message),
            Level::Warn => tracing::warn!("{}", event.message),
            Level::Error => tracing::error!("{}", event.message),
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

use std::{fs::OpenOptions, path::Path, sync::Mutex};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber: stdout plus an optional append-only log file
///
/// `RUST_LOG` takes precedence over the verbosity derived from the CLI.
pub fn init(verbosity: u8, file: Option<&Path>) -> std::io::Result<()> {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = match file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;

            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    // a second call (e.g. from tests) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init();

    Ok(())
}

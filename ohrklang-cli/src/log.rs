use std::{fs::File, path::Path, sync::Arc};
use tracing::Level;
use tracing_subscriber::{filter::Targets, fmt, prelude::*};

/// Compact log on stderr filtered by `verbosity`, plus an optional JSON log
/// file that records everything the global filter lets through.
pub fn init(verbosity: u8, debug_log: Option<&Path>) -> Result<(), std::io::Error> {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let stderr_log = fmt::layer().compact().with_writer(std::io::stderr);

    let debug_log = match debug_log {
        Some(path) => {
            let file = File::create(path)?;
            Some(fmt::layer().with_writer(Arc::new(file)).json())
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_log.with_filter(Targets::default().with_default(level)))
        .with(debug_log)
        .with(
            Targets::default()
                .with_target("ohrklang", Level::TRACE)
                .with_default(Level::WARN),
        )
        .init();

    Ok(())
}

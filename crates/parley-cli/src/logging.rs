//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use parley_core::config::LoggingConfig;

/// Directive string used when `RUST_LOG` is unset.
pub fn default_directives(verbose: bool, logging: Option<&LoggingConfig>) -> String {
    let level = match logging.and_then(|l| l.level.as_deref()) {
        _ if verbose => "debug",
        Some(level) => level,
        None => "info",
    };
    let mut directives = vec![level.to_string()];
    if let Some(logging) = logging {
        directives.extend(logging.filters.iter().cloned());
    }
    directives.join(",")
}

/// Install the global subscriber. `RUST_LOG` wins over the config file.
pub fn init(verbose: bool, logging: Option<&LoggingConfig>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose, logging)));

    let to_stdout = logging.is_some_and(|l| l.output == "stdout");
    let writer = if to_stdout {
        BoxMakeWriter::new(std::io::stdout)
    } else {
        BoxMakeWriter::new(std::io::stderr)
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    let result = if logging.is_some_and(|l| l.format == "json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("logging already initialized: {e}");
    }
}

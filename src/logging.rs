//! Log subscriber setup for binaries. The library itself only emits events.

use tracing::subscriber::set_global_default;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Map `-v` / `-q` counts to a level; INFO with neither
pub fn level_for(verbose: u8, quiet: u8) -> Level {
    match 1 + i16::from(verbose) - i16::from(quiet) {
        i16::MIN..=-1 => Level::ERROR,
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Install a compact stderr subscriber. `RUST_LOG` directives refine `level`.
pub fn init_tracing(level: Level) {
    let env_filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .compact()
        .finish();

    // Already set (tests, embedding application)
    let _ = set_global_default(subscriber);
}

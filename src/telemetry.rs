use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Log level for a `-v` count: info, debug, then trace
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Install the global subscriber for a binary
///
/// Logs from this crate and from `binary` go to stderr at `level`; everything
/// else (hyper, rustls, ...) only at warn.
pub fn init(binary: &'static str, level: LevelFilter) {
    let filter = filter::Targets::new()
        .with_default(LevelFilter::WARN)
        .with_targets(vec![("process_dashboard", level), (binary, level)]);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

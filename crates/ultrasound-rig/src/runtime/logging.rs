use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber with optional JSON output.
///
/// Logs go to stderr; stdout carries the run summary.
pub fn init_tracing(json_output: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ultrasound_rig=debug,ultrasound_core=info"));

    if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .init();
    }
}

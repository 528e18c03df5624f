use tracing_subscriber::{EnvFilter, prelude::*};

const WORKSPACE_CRATES: &[&str] = &["server", "pipeline", "db", "utils"];

/// Filter directive: `warn` globally, `level` for the workspace crates
pub fn filter_directive(level: &str) -> String {
    let crates: Vec<String> = WORKSPACE_CRATES
        .iter()
        .map(|name| format!("{}={}", name, level))
        .collect();
    format!("warn,{}", crates.join(","))
}

/// Install the global subscriber with the level from `RUST_LOG` (default `info`)
pub fn init_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_new(filter_directive(&log_level)).unwrap_or_else(|e| {
        eprintln!("Invalid RUST_LOG value '{}': {}, falling back to info", log_level, e);
        EnvFilter::new(filter_directive("info"))
    });

    // A subscriber may already be set, e.g. in tests
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .try_init();
}

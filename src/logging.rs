use tracing::Level;

/// Log to stderr; `--debug` turns on per-call provider logging
pub fn init(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

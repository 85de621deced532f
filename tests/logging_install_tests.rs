//! The default sink refuses to replace a subscriber installed by someone else.
//!
//! Kept in its own test binary since it claims the global default first.

use mesh_app::error::LogError;
use mesh_app::logging::{LogConfig, LogSink, TracingSink};

#[test]
fn foreign_global_subscriber_is_install_error() {
    let foreign = tracing_subscriber::fmt().with_writer(std::io::sink).finish();
    tracing::subscriber::set_global_default(foreign).unwrap();

    match TracingSink.init(&LogConfig::default()) {
        Err(LogError::Install(_)) => {}
        other => panic!("expected install error, got {other:?}"),
    }
}

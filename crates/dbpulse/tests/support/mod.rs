#![allow(dead_code)]

pub mod mock_db;

/// Route library logs to the test harness. Filter with `RUST_LOG`, e.g.
/// `RUST_LOG=dbpulse=debug cargo test -- --nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

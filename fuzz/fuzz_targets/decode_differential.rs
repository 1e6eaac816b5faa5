#![no_main]

use libfuzzer_sys::fuzz_target;
use lpdiff_core::{Harness, HarnessConfig, Registry};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static HARNESS: OnceLock<Harness> = OnceLock::new();

/// Built once per process from the file named by `LPDIFF_CONFIG`.
fn harness() -> &'static Harness {
    HARNESS.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .compact()
            .init();
        let config = match std::env::var_os("LPDIFF_CONFIG") {
            Some(path) => HarnessConfig::load_from_file(&PathBuf::from(path))
                .unwrap_or_else(|e| panic!("cannot load LPDIFF_CONFIG: {e:#}")),
            None => HarnessConfig::default(),
        };
        Harness::for_fuzzing(config, Registry::new())
            .unwrap_or_else(|e| panic!("cannot build harness: {e}"))
    })
}

/// Every input goes through all configured decoders. Any disagreement
/// panics with the inconsistency report, which libFuzzer records as a crash.
fuzz_target!(|data: &[u8]| {
    harness().run_one_input(data);
});

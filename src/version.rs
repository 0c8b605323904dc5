/// Falls back to the crate version when no release tag was injected at build time.
const fn release_or_crate_version(release: Option<&'static str>) -> &'static str {
    match release {
        Some(tag) => tag,
        None => env!("CARGO_PKG_VERSION"),
    }
}

pub const VERSION: &str = release_or_crate_version(option_env!("SPEEDTEST_INGEST_VERSION"));

/// One-line version output for `--version`.
pub fn version_line(binary: &str) -> String {
    format!("{binary} version: {VERSION}")
}

//! Terminal output for fetcher events.

use framepin_core::Reporter;
use framepin_core::filename_from_url;
use framepin_schema::{ArtifactName, ProductName, Sha256Digest};

/// Writes one line per fetcher event to stderr.
///
/// Failures are always shown; everything else is suppressed when `quiet`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalReporter {
    quiet: bool,
}

impl TerminalReporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl Reporter for TerminalReporter {
    fn fetching(&self, name: &ArtifactName, url: &str) {
        if !self.quiet {
            eprintln!("  fetching  {name} ({})", filename_from_url(url));
        }
    }

    fn cached(&self, name: &ArtifactName) {
        if !self.quiet {
            eprintln!("  cached    {name}");
        }
    }

    fn verified(&self, name: &ArtifactName, checksum: &Sha256Digest, size: u64) {
        if !self.quiet {
            eprintln!(
                "  verified  {name} {} ({})",
                short(checksum),
                format_size(size)
            );
        }
    }

    fn failed(&self, name: &ArtifactName, reason: &str) {
        eprintln!("  failed    {name}: {reason}");
    }

    fn materialized(&self, product: &ProductName, modules: usize) {
        if !self.quiet {
            eprintln!("  ready     {product} ({modules} modules)");
        }
    }
}

fn short(checksum: &Sha256Digest) -> &str {
    &checksum.as_str()[..12]
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

use crate::modules::{CacheListing, CacheStats, EntrySummary, ResolveError, ResolvedModule};
use crate::runtime::ScriptError;
use serde::Serialize;

/// Print a failed run the way the script would have seen it
pub fn report_error(error: &ScriptError, debug: bool) {
    eprintln!("{}", error.render(debug));
}

/// Print cache statistics in human-readable format
pub fn print_cache_stats(stats: &CacheStats, root: &str) {
    println!("📦 Module Cache");
    println!("==============");
    println!("  • Location: {}", root);
    println!("  • Entries: {}", stats.entry_count);
    println!("  • Total size: {}", format_size(stats.total_size_bytes));
}

/// Print every cached module, newest first
pub fn print_cache_listing(listing: &CacheListing) {
    if listing.is_empty() {
        println!("📭 Module cache is empty");
        return;
    }

    println!("📦 Cached Modules ({}):", listing.len());
    for entry in sorted_entries(listing) {
        println!(
            "  • {} ({}, {} old)",
            entry.url,
            format_size(entry.size),
            format_age(entry.age_millis)
        );
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), ScriptError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| ScriptError::internal(format!("cannot encode JSON: {e}")))?;
    println!("{}", text);
    Ok(())
}

/// Per-module preload results; returns the number of failures
pub fn print_preload_results(results: &[(String, Result<ResolvedModule, ResolveError>)]) -> usize {
    let mut failures = 0;
    for (specifier, result) in results {
        match result {
            Ok(module) => println!("  ✅ {} → {}", specifier, module.url()),
            Err(e) => {
                failures += 1;
                println!("  ❌ {}: {}", specifier, e);
            }
        }
    }

    println!();
    if failures == 0 {
        println!("✅ Preloaded {} module(s)", results.len());
    } else {
        println!(
            "⚠️  Preloaded {}/{} module(s)",
            results.len() - failures,
            results.len()
        );
    }
    failures
}

pub fn sorted_entries(listing: &CacheListing) -> Vec<EntrySummary> {
    let mut entries: Vec<EntrySummary> = listing.iter().collect();
    entries.sort_by(|a, b| a.age_millis.cmp(&b.age_millis).then_with(|| a.url.cmp(&b.url)));
    entries
}

/// Byte count with a binary unit suffix
pub fn format_size(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

pub fn format_age(millis: u64) -> String {
    let secs = millis / 1000;
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(999), "0s");
        assert_eq!(format_age(90_000), "1m");
        assert_eq!(format_age(7_200_000), "2h");
        assert_eq!(format_age(3 * 86_400_000), "3d");
    }
}

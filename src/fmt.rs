//! Formatting helpers for byte sizes.
//!
//! Byte sizes show up in two places: in the config file, where group budgets are
//! written with suffixes like `64m` or `1g`, and in diagnostics output, where raw
//! byte counts are hard to read.

/// Formats a size in bytes using binary magnitude prefixes.
///
/// # Examples
///
/// ```
/// assert_eq!(callisto::fmt::format_size(0), "0 B");
/// assert_eq!(callisto::fmt::format_size(512), "512 B");
/// assert_eq!(callisto::fmt::format_size(2048), "2.00 KiB");
/// assert_eq!(callisto::fmt::format_size(150 * 1024), "150 KiB");
/// assert_eq!(callisto::fmt::format_size(64 * 1024 * 1024), "64.0 MiB");
/// assert_eq!(callisto::fmt::format_size(3 * 1024 * 1024 * 1024), "3.00 GiB");
/// ```
pub fn format_size(size_in_bytes: usize) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];

    if size_in_bytes < 1024 {
        return format!("{} B", size_in_bytes);
    }

    let mut size = size_in_bytes as f64 / 1024.;
    let mut unit = 0;
    while size >= 1024. && unit + 1 < UNITS.len() {
        size /= 1024.;
        unit += 1;
    }

    if size >= 100. {
        format!("{:.0} {}", size, UNITS[unit])
    } else if size >= 10. {
        format!("{:.1} {}", size, UNITS[unit])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}

/// Parses a byte size from a string.
///
/// The number may carry one of the following suffixes: **b** (bytes, the default),
/// **k** (KiB), **m** (MiB), **g** (GiB) or **t** (TiB). Suffixes are case
/// insensitive and may be separated from the number by whitespace.
///
/// # Examples
///
/// ```
/// assert_eq!(callisto::fmt::parse_size("100").unwrap(), 100);
/// assert_eq!(callisto::fmt::parse_size("100b").unwrap(), 100);
/// assert_eq!(callisto::fmt::parse_size("8k").unwrap(), 8192);
/// assert_eq!(callisto::fmt::parse_size("64m").unwrap(), 64 * 1024 * 1024);
/// assert_eq!(callisto::fmt::parse_size("2 G").unwrap(), 2 * 1024 * 1024 * 1024);
///
/// // Fractions, negative numbers and unknown suffixes are rejected...
/// assert_eq!(callisto::fmt::parse_size("1.5m").is_err(), true);
/// assert_eq!(callisto::fmt::parse_size("-1").is_err(), true);
/// assert_eq!(callisto::fmt::parse_size("3x").is_err(), true);
/// ```
pub fn parse_size(input: impl AsRef<str>) -> anyhow::Result<usize> {
    lazy_static::lazy_static! {
        static ref SIZE_EXPRESSION: regex::Regex =
            regex::Regex::new(r"^\s*(\d+)\s*([bBkKmMgGtT]?)\s*$").unwrap();
    }

    let captures = SIZE_EXPRESSION.captures(input.as_ref()).ok_or_else(|| {
        anyhow::anyhow!(
            "'{}' is not a valid size. Expected a whole number with an optional \
             'b', 'k', 'm', 'g' or 't' suffix.",
            input.as_ref()
        )
    })?;

    let number: usize = captures[1].parse()?;
    let factor: usize = match captures[2].to_ascii_lowercase().as_str() {
        "k" => 1024,
        "m" => 1024 * 1024,
        "g" => 1024 * 1024 * 1024,
        "t" => 1024 * 1024 * 1024 * 1024,
        _ => 1,
    };

    Ok(number * factor)
}

//! Kubernetes resource quantity parsing

/// Parse a quantity string into its numeric value in base units.
///
/// Supports plain numbers, decimal exponents (`1e3`), decimal SI suffixes
/// (`n u m k M G T P E`) and binary suffixes (`Ki Mi Gi Ti Pi Ei`).
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    const BINARY: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ];
    for (suffix, factor) in BINARY {
        if let Some(number) = s.strip_suffix(suffix) {
            return parse_number(number).map(|n| n * factor);
        }
    }

    const DECIMAL: &[(char, i32)] = &[
        ('n', -9),
        ('u', -6),
        ('m', -3),
        ('k', 3),
        ('M', 6),
        ('G', 9),
        ('T', 12),
        ('P', 15),
        ('E', 18),
    ];
    if let Some(last) = s.chars().last() {
        for (suffix, exponent) in DECIMAL {
            if last == *suffix {
                let number = parse_number(&s[..s.len() - suffix.len_utf8()])?;
                let scale = 10f64.powi(exponent.abs());
                return Some(if *exponent < 0 {
                    number / scale
                } else {
                    number * scale
                });
            }
        }
    }

    parse_number(s)
}

/// Parse a CPU quantity into cores
pub fn parse_cpu_cores(raw: &str) -> Option<f64> {
    parse_quantity(raw)
}

/// Parse a memory quantity into bytes
pub fn parse_memory_bytes(raw: &str) -> Option<f64> {
    parse_quantity(raw)
}

fn parse_number(s: &str) -> Option<f64> {
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

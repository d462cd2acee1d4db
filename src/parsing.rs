use std::time::Duration;

const NANOS_PER_MILLICORE: i128 = 1_000_000;

pub fn parse_cpu_to_nanocores(q: &str) -> Option<i128> {
    let q = q.trim();
    if q.is_empty() {
        return None;
    }
    if let Some(stripped) = q.strip_suffix('n') {
        stripped.parse::<i128>().ok()
    } else if let Some(stripped) = q.strip_suffix('u') {
        stripped.parse::<i128>().ok()?.checked_mul(1_000)
    } else if let Some(stripped) = q.strip_suffix('m') {
        stripped.parse::<i128>().ok()?.checked_mul(NANOS_PER_MILLICORE)
    } else {
        // treat as cores; can be integer or float
        let cores = q.parse::<f64>().ok().filter(|c| c.is_finite())?;
        Some((cores * 1e9).round() as i128)
    }
}

pub fn parse_memory_to_bytes(q: &str) -> Option<i64> {
    let q = q.trim();
    if q.is_empty() {
        return None;
    }

    // Order matters: check binary suffixes first (Ki, Mi, ...), then decimal (K, M, ...)
    const BINARY_UNITS: &[(&str, i64)] = &[
        ("Ki", 1024),
        ("Mi", 1024 * 1024),
        ("Gi", 1024 * 1024 * 1024),
        ("Ti", 1024_i64.pow(4)),
        ("Pi", 1024_i64.pow(5)),
        ("Ei", 1024_i64.pow(6)),
    ];
    const DECIMAL_UNITS: &[(&str, i64)] = &[
        ("K", 1000),
        ("M", 1000 * 1000),
        ("G", 1000 * 1000 * 1000),
        ("T", 1000_i64.pow(4)),
        ("P", 1000_i64.pow(5)),
        ("E", 1000_i64.pow(6)),
        ("k", 1000),
    ];

    for (suf, mul) in BINARY_UNITS {
        if let Some(stripped) = q.strip_suffix(suf) {
            if let Ok(v) = stripped.parse::<f64>() {
                return Some((v * (*mul as f64)).round() as i64);
            }
        }
    }
    for (suf, mul) in DECIMAL_UNITS {
        if let Some(stripped) = q.strip_suffix(suf) {
            if let Ok(v) = stripped.parse::<f64>() {
                return Some((v * (*mul as f64)).round() as i64);
            }
        }
    }
    // bytes without suffix
    if let Ok(v) = q.parse::<i64>() {
        return Some(v);
    }
    None
}

pub fn is_zero_quantity(q: &str) -> bool {
    let q = q.trim();
    if q.is_empty() {
        return true;
    }
    let numeric_end = q
        .char_indices()
        .find(|(_, c)| c.is_ascii_alphabetic() && *c != 'e' && *c != 'E')
        .map(|(i, _)| i)
        .unwrap_or(q.len());
    // A trailing exponent unit ("1E") is a decimal suffix, not scientific notation.
    let numeric = q[..numeric_end].trim_end_matches(['e', 'E']);
    match numeric.parse::<f64>() {
        Ok(v) => v == 0.0,
        Err(_) => false,
    }
}

pub fn format_cpu_nanocores(nanocores: i128) -> String {
    if nanocores % NANOS_PER_MILLICORE == 0 {
        format!("{}m", nanocores / NANOS_PER_MILLICORE)
    } else {
        format!("{}n", nanocores)
    }
}

pub fn format_memory_bytes(bytes: i64) -> String {
    const UNITS: &[(&str, i64)] = &[
        ("Ti", 1024_i64.pow(4)),
        ("Gi", 1024 * 1024 * 1024),
        ("Mi", 1024 * 1024),
        ("Ki", 1024),
    ];
    if bytes != 0 {
        for (suf, mul) in UNITS {
            if bytes % mul == 0 {
                return format!("{}{}", bytes / mul, suf);
            }
        }
    }
    bytes.to_string()
}

/// Parse a Go-style duration such as `3h`, `90m`, `1h30m` or `45s`.
///
/// Bare numbers are rejected; every component needs a unit.
pub fn parse_interval(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_ms: u128 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return None;
        }
        let value: f64 = rest[..digits_end].parse().ok()?;
        rest = &rest[digits_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_ms: f64 = match &rest[..unit_end] {
            "ms" => 1.0,
            "s" => 1_000.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            _ => return None,
        };
        rest = &rest[unit_end..];
        total_ms += (value * unit_ms).round() as u128;
    }

    u64::try_from(total_ms).ok().map(Duration::from_millis)
}

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};

/// Parse a Jira timestamp (`2024-01-02T10:00:00.000+0000`) into UTC.
/// Also accepts RFC 3339 (`+00:00` / `Z` offsets).
pub fn parse_jira_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Parse a GLPI timestamp (`2024-01-01 10:00:00`) into UTC. GLPI stores
/// naive local times, so `server_offset` is the offset of the GLPI server.
pub fn parse_glpi_timestamp(s: &str, server_offset: FixedOffset) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()?;
    server_offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a UTC offset such as `+03:00`, `-0500`, `Z` or `UTC`.
pub fn parse_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("utc") || s == "Z" {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Strictly-newer check. A missing timestamp on either side is never newer.
pub fn is_newer(candidate: Option<DateTime<Utc>>, other: Option<DateTime<Utc>>) -> bool {
    match (candidate, other) {
        (Some(a), Some(b)) => a > b,
        _ => false,
    }
}

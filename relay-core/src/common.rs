//! Shared helpers used across the router's component modules.

/// Serde helper for `Duration` fields in on-disk config, accepting either a
/// suffixed string (`"30s"`, `"500ms"`, `"2m"`) or `{secs, nanos}`.
pub mod duration_serde {
    use serde::{Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;
        use serde_json::Value;

        let value = Value::deserialize(deserializer)?;
        match value {
            Value::String(s) => parse_duration_string(&s).map_err(Error::custom),
            Value::Object(obj) => {
                let secs = obj
                    .get("secs")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| Error::custom("missing 'secs' field"))?;
                let nanos = obj.get("nanos").and_then(|v| v.as_u64()).unwrap_or(0);
                Ok(Duration::new(secs, nanos as u32))
            }
            Value::Number(n) => {
                let ms = n.as_u64().ok_or_else(|| Error::custom("invalid duration number"))?;
                Ok(Duration::from_millis(ms))
            }
            _ => Err(Error::custom("invalid duration format")),
        }
    }

    fn parse_duration_string(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration string".to_string());
        }
        if let Some(stripped) = s.strip_suffix("ms") {
            let num: u64 = stripped
                .parse()
                .map_err(|_| format!("invalid number: {stripped}"))?;
            return Ok(Duration::from_millis(num));
        }
        if let Some(stripped) = s.strip_suffix('s') {
            let num: f64 = stripped
                .parse()
                .map_err(|_| format!("invalid number: {stripped}"))?;
            return Ok(Duration::from_secs_f64(num));
        }
        if let Some(stripped) = s.strip_suffix('m') {
            let num: u64 = stripped
                .parse()
                .map_err(|_| format!("invalid number: {stripped}"))?;
            return Ok(Duration::from_secs(num * 60));
        }
        if let Some(stripped) = s.strip_suffix('h') {
            let num: u64 = stripped
                .parse()
                .map_err(|_| format!("invalid number: {stripped}"))?;
            return Ok(Duration::from_secs(num * 3600));
        }
        Err(format!("unknown duration unit in '{s}'"))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn parses_ms_s_m_h() {
            assert_eq!(parse_duration_string("500ms").unwrap(), Duration::from_millis(500));
            assert_eq!(parse_duration_string("30s").unwrap(), Duration::from_secs(30));
            assert_eq!(parse_duration_string("2m").unwrap(), Duration::from_secs(120));
            assert_eq!(parse_duration_string("1h").unwrap(), Duration::from_secs(3600));
        }
    }
}

/// Exponential backoff with full jitter, per the router's retry schedule
/// (`base * 2^attempt`, jitter uniform in `[0, base)`).
pub fn backoff_with_jitter(attempt: u32, base: std::time::Duration) -> std::time::Duration {
    let capped_attempt = attempt.min(16);
    let factor = 1u64.checked_shl(capped_attempt).unwrap_or(u64::MAX);
    let scaled = base.checked_mul(factor as u32).unwrap_or(base);
    let jitter_ms = rand::random::<u64>() % (base.as_millis() as u64).max(1);
    scaled + std::time::Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn backoff_grows_and_stays_jittered_above_base_power() {
        let base = Duration::from_millis(100);
        for attempt in 0..5 {
            let d = backoff_with_jitter(attempt, base);
            let floor = base * (1u32 << attempt);
            assert!(d >= floor);
            assert!(d < floor + base);
        }
    }
}

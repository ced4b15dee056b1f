use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch. Used for wire timestamps.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Seconds since the Unix epoch. Used inside session tokens.
pub fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_and_secs_agree() {
        let millis = unix_millis();
        let secs = unix_secs();
        assert!(millis / 1000 >= secs.saturating_sub(1));
        assert!(millis / 1000 <= secs + 1);
    }
}

use std::time::{SystemTime, UNIX_EPOCH};

/// The current wall-clock time, in milliseconds since the Unix epoch.
///
/// Rooms only ever compare two of these against each other (elapsed time
/// since `lastActivity`), so wall-clock drift across a fleet is tolerable -
/// unlike a true monotonic clock, this stays meaningful across a restart.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the unix epoch")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_millis_is_increasing() {
        let a = now_millis();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = now_millis();

        assert!(b >= a);
    }
}

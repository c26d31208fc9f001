use itertools::Itertools;
use std::time::Duration;

const SECONDS_IN_ONE_MINUTE: u64 = 60;
const SECONDS_IN_ONE_HOUR: u64 = 60 * SECONDS_IN_ONE_MINUTE;
const SECONDS_IN_ONE_DAY: u64 = 24 * SECONDS_IN_ONE_HOUR;

/// Formats a duration as e.g. `1 day, 2 hours, and 5 seconds`.
///
/// Sub-second remainders are dropped.
pub fn human_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let parts = [
        (secs / SECONDS_IN_ONE_DAY, "day"),
        ((secs % SECONDS_IN_ONE_DAY) / SECONDS_IN_ONE_HOUR, "hour"),
        ((secs % SECONDS_IN_ONE_HOUR) / SECONDS_IN_ONE_MINUTE, "minute"),
        (secs % SECONDS_IN_ONE_MINUTE, "second"),
    ]
    .into_iter()
    .filter(|(n, _)| *n > 0)
    .map(|(n, unit)| format!("{n} {unit}{}", if n == 1 { "" } else { "s" }))
    .collect_vec();

    match parts.as_slice() {
        [] => "0 seconds".to_string(),
        [only] => only.clone(),
        [first, second] => format!("{first} and {second}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero() {
        assert_eq!(human_duration(Duration::ZERO), "0 seconds");
        assert_eq!(human_duration(Duration::from_millis(999)), "0 seconds");
    }

    #[test]
    fn test_single_unit() {
        assert_eq!(human_duration(Duration::from_secs(1)), "1 second");
        assert_eq!(human_duration(Duration::from_secs(3600)), "1 hour");
        assert_eq!(human_duration(Duration::from_secs(2 * 86400)), "2 days");
    }

    #[test]
    fn test_two_units() {
        assert_eq!(human_duration(Duration::from_secs(3660)), "1 hour and 1 minute");
    }

    #[test]
    fn test_many_units() {
        assert_eq!(
            human_duration(Duration::from_secs(86400 + 2 * 3600 + 5)),
            "1 day, 2 hours, and 5 seconds"
        );
        assert_eq!(
            human_duration(Duration::from_secs(86400 + 3600 + 60 + 1)),
            "1 day, 1 hour, 1 minute, and 1 second"
        );
    }
}

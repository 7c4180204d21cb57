//! Coarse duration strings for time-boxed grants.
//!
//! A span is reduced to the largest whole unit it covers at least once.
//! Remainders are dropped, so `90m` becomes `1h`.

use std::time::Duration;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

pub fn encode(span: Duration) -> String {
    let secs = span.as_secs();
    if secs >= DAY {
        format!("{}d", secs / DAY)
    } else if secs >= HOUR {
        format!("{}h", secs / HOUR)
    } else if secs >= MINUTE {
        format!("{}m", secs / MINUTE)
    } else {
        format!("{secs}s")
    }
}

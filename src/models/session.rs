use chrono::{DateTime, Timelike, Utc};
use chrono_tz::US::Eastern;

/// Trading sessions in US/Eastern minutes since midnight. Later entries win on overlap.
const SESSIONS: &[(&str, (u32, u32), (u32, u32))] = &[
    ("asian", (20, 0), (2, 0)),
    ("london", (2, 0), (7, 0)),
    ("ny", (7, 0), (16, 0)),
];

const OFF_SESSION: &str = "off_session";

/// Session active at `ts`, as seen from New York.
pub fn session_at(ts: DateTime<Utc>) -> &'static str {
    let et = ts.with_timezone(&Eastern);
    let current = et.hour() * 60 + et.minute();

    let mut found = OFF_SESSION;
    for &(name, start, end) in SESSIONS {
        let start_min = start.0 * 60 + start.1;
        let end_min = end.0 * 60 + end.1;

        let in_session = if start_min < end_min {
            current >= start_min && current < end_min
        } else {
            // Wraps midnight
            current >= start_min || current < end_min
        };

        if in_session {
            found = name;
        }
    }
    found
}

/// Day name ("Monday"...) in US/Eastern.
pub fn day_of_week(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Eastern).format("%A").to_string()
}

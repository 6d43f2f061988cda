//! The daily poll template.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::types::{PollAnswer, PollMedia, PollRequest};

/// Hours offered as answers, ascending.
pub const TIME_OPTIONS: [u8; 9] = [7, 9, 11, 13, 15, 17, 19, 21, 23];

/// How long the poll stays open.
pub const POLL_DURATION_HOURS: u32 = 24;

/// Duration sent on the wire, in seconds.
pub const POLL_DURATION_SECS: u32 = POLL_DURATION_HOURS * 3600;

/// Title format: zero-padded day/month/4-digit year.
pub const TITLE_FORMAT: &str = "%d/%m/%Y";

/// Today's date in `tz`, formatted as the poll title.
pub fn title(now: DateTime<Utc>, tz: Tz) -> String {
    now.with_timezone(&tz).format(TITLE_FORMAT).to_string()
}

/// Build the poll for the local date of `now`.
pub fn compose(now: DateTime<Utc>, tz: Tz) -> PollRequest {
    PollRequest {
        question: PollMedia {
            text: title(now, tz),
        },
        answers: TIME_OPTIONS
            .iter()
            .map(|hour| PollAnswer {
                poll_media: PollMedia {
                    text: hour.to_string(),
                },
            })
            .collect(),
        duration: POLL_DURATION_SECS,
        allow_multiselect: true,
    }
}

/// [`compose`] against the wall clock.
pub fn compose_now(tz: Tz) -> PollRequest {
    compose(Utc::now(), tz)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ROME: Tz = chrono_tz::Europe::Rome;

    fn is_dd_mm_yyyy(s: &str) -> bool {
        let parts: Vec<&str> = s.split('/').collect();
        parts.len() == 3
            && parts[0].len() == 2
            && parts[1].len() == 2
            && parts[2].len() == 4
            && parts.iter().all(|p| p.chars().all(|c| c.is_ascii_digit()))
    }

    #[test]
    fn compose_has_fixed_shape() {
        let poll = compose(Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap(), ROME);
        assert_eq!(
            poll.options(),
            vec!["7", "9", "11", "13", "15", "17", "19", "21", "23"]
        );
        assert_eq!(poll.duration, 86_400);
        assert!(poll.allow_multiselect);
        assert_eq!(poll.question.text, "05/01/2026");
    }

    #[test]
    fn title_uses_the_local_date() {
        // 23:30 UTC on Jan 5 is already Jan 6 in Rome (UTC+1).
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 23, 30, 0).unwrap();
        assert_eq!(title(now, ROME), "06/01/2026");
        assert_eq!(title(now, chrono_tz::UTC), "05/01/2026");
    }

    #[test]
    fn title_is_always_dd_mm_yyyy() {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        for day in 0..366 {
            let now = base + chrono::TimeDelta::days(day);
            let t = title(now, ROME);
            assert!(is_dd_mm_yyyy(&t), "bad title {t}");
        }
    }

    #[test]
    fn compose_is_stable_within_a_second() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 9, 15, 30).unwrap();
        let later = now + chrono::TimeDelta::milliseconds(900);
        assert_eq!(compose(now, ROME), compose(later, ROME));
    }

    #[test]
    fn compose_now_matches_the_template() {
        let poll = compose_now(ROME);
        assert_eq!(poll.answers.len(), 9);
        assert!(is_dd_mm_yyyy(&poll.question.text));
    }

    #[test]
    fn poll_json_matches_the_wire_format() {
        let poll = compose(Utc.with_ymd_and_hms(2026, 2, 14, 10, 0, 0).unwrap(), ROME);
        let json = serde_json::to_value(&poll).unwrap();

        let answers: Vec<serde_json::Value> = TIME_OPTIONS
            .iter()
            .map(|h| serde_json::json!({ "poll_media": { "text": h.to_string() } }))
            .collect();
        assert_eq!(
            json,
            serde_json::json!({
                "question": { "text": "14/02/2026" },
                "answers": answers,
                "duration": 86400,
                "allow_multiselect": true,
            })
        );
    }

    #[test]
    fn time_options_are_ascending() {
        assert!(TIME_OPTIONS.windows(2).all(|w| w[0] < w[1]));
    }
}

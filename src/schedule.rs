//! Daily trigger at local midnight.
//!
//! The trigger instant is always the first instant of the calendar day
//! after `now` in the configured timezone, so a run can never fire twice
//! for the same date and a missed day is simply skipped.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, info};

/// First valid local instant of `date` in `tz`.
///
/// Normally local midnight. Zones that jump over 00:00 on a DST change
/// start the day at the end of the gap instead; on an ambiguous midnight
/// the earlier instant wins.
pub fn start_of_day(date: NaiveDate, tz: Tz) -> DateTime<Tz> {
    let mut local = date.and_time(NaiveTime::MIN);
    loop {
        if let Some(instant) = tz.from_local_datetime(&local).earliest() {
            return instant;
        }
        local += TimeDelta::minutes(15);
    }
}

/// The next local midnight strictly after `now`.
pub fn next_trigger(now: DateTime<Utc>, tz: Tz) -> DateTime<Tz> {
    let today = now.with_timezone(&tz).date_naive();
    let tomorrow = today.succ_opt().unwrap_or(NaiveDate::MAX);
    start_of_day(tomorrow, tz)
}

/// How long to sleep from `now` until [`next_trigger`].
pub fn wait_until_next_trigger(now: DateTime<Utc>, tz: Tz) -> Duration {
    let target = next_trigger(now, tz).with_timezone(&Utc);
    (target - now).to_std().unwrap_or(Duration::ZERO)
}

/// Run `job` at every local midnight in `tz`, forever.
pub async fn run_daily<F, Fut>(tz: Tz, job: F)
where
    F: FnMut(DateTime<Tz>) -> Fut,
    Fut: Future<Output = ()>,
{
    run_daily_with_clock(tz, Utc::now, job).await
}

/// [`run_daily`] with an injectable wall clock.
///
/// The timer sleeps on tokio's clock but every decision is taken against
/// `clock`, so a wake-up that lands a little before midnight sleeps the
/// remainder instead of firing for the wrong date.
pub async fn run_daily_with_clock<C, F, Fut>(tz: Tz, clock: C, mut job: F)
where
    C: Fn() -> DateTime<Utc>,
    F: FnMut(DateTime<Tz>) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut last_fired: Option<NaiveDate> = None;

    loop {
        let now = clock();
        let target = next_trigger(now, tz);
        let wait = wait_until_next_trigger(now, tz);
        info!(
            next = %target.format("%Y-%m-%d %H:%M:%S %Z"),
            hours = wait.as_secs_f64() / 3600.0,
            "next daily poll scheduled"
        );

        sleep_until(&clock, target.with_timezone(&Utc)).await;

        let date = target.date_naive();
        if last_fired == Some(date) {
            debug!(%date, "already fired for this date, skipping");
            continue;
        }
        last_fired = Some(date);

        job(target).await;
    }
}

async fn sleep_until<C>(clock: &C, target: DateTime<Utc>)
where
    C: Fn() -> DateTime<Utc>,
{
    loop {
        match (target - clock()).to_std() {
            Ok(remaining) if !remaining.is_zero() => tokio::time::sleep(remaining).await,
            _ => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    const ROME: Tz = chrono_tz::Europe::Rome;

    fn rome(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        ROME.with_ymd_and_hms(y, m, d, h, min, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn one_minute_before_midnight_waits_sixty_seconds() {
        let now = rome(2026, 3, 10, 23, 59, 0);
        assert_eq!(wait_until_next_trigger(now, ROME), Duration::from_secs(60));
    }

    #[test]
    fn just_after_midnight_waits_for_the_next_day() {
        let now = rome(2026, 3, 10, 0, 0, 1);
        assert_eq!(
            wait_until_next_trigger(now, ROME),
            Duration::from_secs(86_399)
        );
        let target = next_trigger(now, ROME);
        assert_eq!(target.date_naive(), NaiveDate::from_ymd_opt(2026, 3, 11).unwrap());
    }

    #[test]
    fn exactly_midnight_schedules_tomorrow() {
        let now = rome(2026, 3, 10, 0, 0, 0);
        assert_eq!(
            wait_until_next_trigger(now, ROME),
            Duration::from_secs(86_400)
        );
    }

    #[test]
    fn trigger_lands_on_local_midnight_across_zones() {
        let zones = [
            chrono_tz::Europe::Rome,
            chrono_tz::America::New_York,
            chrono_tz::Asia::Kolkata,
            chrono_tz::Pacific::Chatham,
            chrono_tz::UTC,
        ];
        let base = Utc.with_ymd_and_hms(2026, 6, 15, 0, 0, 0).unwrap();

        for tz in zones {
            for step in 0..96 {
                let now = base + TimeDelta::minutes(step * 15 + 7);
                let wait = wait_until_next_trigger(now, tz);
                assert!(wait > Duration::ZERO, "{tz}: zero wait at {now}");
                assert!(wait < Duration::from_secs(86_400), "{tz}: {wait:?} at {now}");

                let fired = (now + TimeDelta::from_std(wait).unwrap()).with_timezone(&tz);
                assert_eq!(fired.time(), NaiveTime::MIN, "{tz}: fired at {fired}");
                assert!(fired.date_naive() > now.with_timezone(&tz).date_naive());
            }
        }
    }

    #[test]
    fn dst_change_days_are_measured_in_real_time() {
        // Rome springs forward on 2026-03-29 and falls back on 2026-10-25.
        let spring = rome(2026, 3, 29, 0, 0, 1);
        assert_eq!(
            wait_until_next_trigger(spring, ROME),
            Duration::from_secs(23 * 3600 - 1)
        );
        let autumn = rome(2026, 10, 25, 0, 0, 1);
        assert_eq!(
            wait_until_next_trigger(autumn, ROME),
            Duration::from_secs(25 * 3600 - 1)
        );
    }

    #[test]
    fn missing_midnight_uses_first_valid_instant() {
        // Santiago skipped 00:00 -> 01:00 on 2023-09-03.
        let tz = chrono_tz::America::Santiago;
        let date = NaiveDate::from_ymd_opt(2023, 9, 3).unwrap();
        let start = start_of_day(date, tz);
        assert_eq!(start.date_naive(), date);
        assert_eq!(start.time(), NaiveTime::from_hms_opt(1, 0, 0).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_per_local_day() {
        let base = rome(2026, 3, 10, 23, 59, 0);
        let started = tokio::time::Instant::now();
        let clock = move || {
            base + TimeDelta::from_std(started.elapsed()).unwrap()
        };

        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        let task = tokio::spawn(run_daily_with_clock(ROME, clock, move |at| {
            sink.lock().unwrap().push(at.date_naive());
            async {}
        }));

        tokio::time::sleep(Duration::from_secs(2 * 86_400 + 30)).await;
        task.abort();

        let fired = fired.lock().unwrap().clone();
        assert_eq!(
            fired,
            vec![
                NaiveDate::from_ymd_opt(2026, 3, 11).unwrap(),
                NaiveDate::from_ymd_opt(2026, 3, 12).unwrap(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn early_wakeup_sleeps_the_remainder() {
        let base = rome(2026, 3, 10, 23, 59, 0);
        let started = tokio::time::Instant::now();
        // Wall clock runs two seconds slow relative to the timer.
        let clock = move || {
            let elapsed = started.elapsed().saturating_sub(Duration::from_secs(2));
            base + TimeDelta::from_std(elapsed).unwrap()
        };

        let fired_at = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired_at);
        let task = tokio::spawn(run_daily_with_clock(ROME, clock, move |_| {
            sink.lock().unwrap().push(started.elapsed());
            async {}
        }));

        tokio::time::sleep(Duration::from_secs(120)).await;
        task.abort();

        let fired_at = fired_at.lock().unwrap().clone();
        assert_eq!(fired_at.len(), 1);
        assert!(fired_at[0] >= Duration::from_secs(62), "{:?}", fired_at[0]);
    }
}

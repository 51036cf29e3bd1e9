use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;

use crate::domain::models::{SchedulePolicy, ScheduleMode, ScheduleSnapshot, SendWindow};

/// How far forward the calculator searches for an allowed (weekday, window)
/// combination before degrading to next-day-start.
const LOOKAHEAD_DAYS: i64 = 14;

/// Fixed-mode target when the policy carries no time-of-day.
fn default_fixed_time() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Maps (now, step delay, contact timezone, policy) to the next UTC send
/// instant. Pure: identical inputs and an identical random source always
/// produce the same output.
///
/// The random source is only consulted in `Window` mode, where the result is
/// spread uniformly inside the remaining portion of the chosen window.
pub fn compute_scheduled_utc(
    now: DateTime<Utc>,
    step_delay_hours: i64,
    contact_timezone: Option<&str>,
    fallback_timezone: Option<&str>,
    policy: &SchedulePolicy,
    random: &mut dyn FnMut() -> f64,
) -> DateTime<Utc> {
    let zone = effective_zone(policy, contact_timezone, fallback_timezone);
    let base = now + Duration::hours(step_delay_hours);
    let local = base.with_timezone(&zone).naive_local();

    let candidate = match policy.mode {
        ScheduleMode::Fixed => next_fixed_instant(local, policy),
        ScheduleMode::Immediate => next_window_instant(local, policy, None),
        ScheduleMode::Window => next_window_instant(local, policy, Some(random)),
    };

    match candidate {
        Some(naive) => resolve_local(zone, naive),
        // Lookahead exhausted: soft degradation to the start of the next
        // local day rather than a scheduling failure.
        None => {
            let next_day = (local.date() + Duration::days(1)).and_time(NaiveTime::MIN);
            resolve_local(zone, next_day)
        }
    }
}

/// The zone the policy resolves to for a given contact, also recorded on the
/// enrollment row for audit.
pub fn resolve_snapshot(
    policy: &SchedulePolicy,
    contact_timezone: Option<&str>,
    fallback_timezone: Option<&str>,
) -> ScheduleSnapshot {
    ScheduleSnapshot {
        mode: policy.mode,
        windows: policy.windows.clone(),
        timezone: effective_zone(policy, contact_timezone, fallback_timezone)
            .name()
            .to_string(),
    }
}

fn effective_zone(
    policy: &SchedulePolicy,
    contact_timezone: Option<&str>,
    fallback_timezone: Option<&str>,
) -> Tz {
    if policy.respect_contact_timezone
        && let Some(zone) = contact_timezone.and_then(parse_zone)
    {
        return zone;
    }
    policy
        .timezone
        .as_deref()
        .and_then(parse_zone)
        .or_else(|| fallback_timezone.and_then(parse_zone))
        .unwrap_or(Tz::UTC)
}

/// An unknown identifier is treated as absent, never an error.
fn parse_zone(id: &str) -> Option<Tz> {
    id.parse::<Tz>().ok()
}

fn next_fixed_instant(local: NaiveDateTime, policy: &SchedulePolicy) -> Option<NaiveDateTime> {
    let target = policy.send_time.unwrap_or_else(default_fixed_time);
    let first_offset = if local.time() >= target { 1 } else { 0 };
    for offset in first_offset..=first_offset + LOOKAHEAD_DAYS {
        let date = local.date() + Duration::days(offset);
        if policy.allows_weekday(date.weekday()) {
            return Some(date.and_time(target));
        }
    }
    None
}

fn next_window_instant(
    local: NaiveDateTime,
    policy: &SchedulePolicy,
    mut random: Option<&mut dyn FnMut() -> f64>,
) -> Option<NaiveDateTime> {
    let full_day = [SendWindow {
        start: NaiveTime::MIN,
        end: NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN),
    }];
    let windows: &[SendWindow] = if policy.windows.is_empty() {
        &full_day
    } else {
        &policy.windows
    };

    for offset in 0..=LOOKAHEAD_DAYS {
        let date = local.date() + Duration::days(offset);
        if !policy.allows_weekday(date.weekday()) {
            continue;
        }
        for window in windows {
            if window.end <= window.start {
                continue;
            }
            let start = date.and_time(window.start);
            let end = date.and_time(window.end);
            let earliest = if offset == 0 { local.max(start) } else { start };
            if earliest >= end {
                continue;
            }
            return Some(match random.as_mut() {
                // Window mode: uniform instant inside the remaining portion
                // of the window, spreading sends away from the start edge.
                Some(random) => {
                    let remaining = (end - earliest).num_seconds();
                    let fraction = random().clamp(0.0, 1.0 - f64::EPSILON);
                    earliest + Duration::seconds((remaining as f64 * fraction) as i64)
                }
                None => earliest,
            });
        }
    }
    None
}

fn resolve_local(zone: Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    match zone.from_local_datetime(&naive) {
        LocalResult::Single(instant) => instant.with_timezone(&Utc),
        // Clock rolled back: the earlier of the two readings.
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        // Clock jumped forward over this instant: roll past the gap.
        LocalResult::None => match zone.from_local_datetime(&(naive + Duration::hours(1))) {
            LocalResult::Single(instant) | LocalResult::Ambiguous(instant, _) => {
                instant.with_timezone(&Utc)
            }
            LocalResult::None => Utc.from_utc_datetime(&naive),
        },
    }
}

#[cfg(test)]
mod tests {
    use chrono::Weekday;

    use super::*;

    fn policy(mode: ScheduleMode) -> SchedulePolicy {
        SchedulePolicy {
            mode,
            send_time: None,
            windows: Vec::new(),
            weekdays: Vec::new(),
            respect_contact_timezone: true,
            timezone: None,
        }
    }

    fn window(start: (u32, u32), end: (u32, u32)) -> SendWindow {
        SendWindow {
            start: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
        }
    }

    fn no_random() -> impl FnMut() -> f64 {
        || panic!("random source must not be consulted outside window mode")
    }

    #[test]
    fn fixed_mode_past_local_send_time_moves_to_next_day() {
        // 20:00 UTC is 16:00 in New York (EDT), already past 09:00 local.
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 20, 0, 0).unwrap();
        let mut policy = policy(ScheduleMode::Fixed);
        policy.send_time = NaiveTime::from_hms_opt(9, 0, 0);

        let scheduled = compute_scheduled_utc(
            now,
            0,
            Some("America/New_York"),
            None,
            &policy,
            &mut no_random(),
        );

        // 2025-03-11 09:00 EDT == 13:00 UTC.
        assert_eq!(
            scheduled,
            Utc.with_ymd_and_hms(2025, 3, 11, 13, 0, 0).unwrap()
        );
    }

    #[test]
    fn immediate_mode_inside_window_sends_at_base_instant() {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 10, 30, 0).unwrap();
        let mut policy = policy(ScheduleMode::Immediate);
        policy.respect_contact_timezone = false;
        policy.windows = vec![window((9, 0), (17, 0))];

        let scheduled = compute_scheduled_utc(now, 2, None, None, &policy, &mut no_random());
        assert_eq!(scheduled, now + Duration::hours(2));
    }

    #[test]
    fn immediate_mode_before_window_advances_to_window_start() {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 5, 0, 0).unwrap();
        let mut policy = policy(ScheduleMode::Immediate);
        policy.respect_contact_timezone = false;
        policy.windows = vec![window((9, 0), (17, 0))];

        let scheduled = compute_scheduled_utc(now, 0, None, None, &policy, &mut no_random());
        assert_eq!(scheduled, Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap());
    }

    #[test]
    fn weekday_filter_skips_to_next_allowed_day() {
        // 2025-06-06 is a Friday; only Mondays are allowed.
        let now = Utc.with_ymd_and_hms(2025, 6, 6, 12, 0, 0).unwrap();
        let mut policy = policy(ScheduleMode::Immediate);
        policy.respect_contact_timezone = false;
        policy.weekdays = vec![Weekday::Mon];
        policy.windows = vec![window((9, 0), (17, 0))];

        let scheduled = compute_scheduled_utc(now, 0, None, None, &policy, &mut no_random());
        assert_eq!(scheduled, Utc.with_ymd_and_hms(2025, 6, 9, 9, 0, 0).unwrap());
    }

    #[test]
    fn window_mode_spreads_inside_remaining_window() {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap();
        let mut policy = policy(ScheduleMode::Window);
        policy.respect_contact_timezone = false;
        policy.windows = vec![window((9, 0), (17, 0))];

        // Seven hours remain from 10:00; r = 0.5 lands at 13:30.
        let mut random = || 0.5;
        let scheduled = compute_scheduled_utc(now, 0, None, None, &policy, &mut random);
        assert_eq!(
            scheduled,
            Utc.with_ymd_and_hms(2025, 6, 2, 13, 30, 0).unwrap()
        );

        // Deterministic under an identical random source.
        let mut random = || 0.5;
        let again = compute_scheduled_utc(now, 0, None, None, &policy, &mut random);
        assert_eq!(scheduled, again);
    }

    #[test]
    fn window_mode_clamps_random_values_outside_unit_range() {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap();
        let mut policy = policy(ScheduleMode::Window);
        policy.respect_contact_timezone = false;
        policy.windows = vec![window((9, 0), (17, 0))];

        let mut random = || 5.0;
        let scheduled = compute_scheduled_utc(now, 0, None, None, &policy, &mut random);
        assert!(scheduled < Utc.with_ymd_and_hms(2025, 6, 2, 17, 0, 0).unwrap());
        assert!(scheduled >= now);
    }

    #[test]
    fn invalid_contact_timezone_falls_back_to_policy_zone() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 20, 0, 0).unwrap();
        let mut policy = policy(ScheduleMode::Fixed);
        policy.send_time = NaiveTime::from_hms_opt(9, 0, 0);
        policy.timezone = Some("America/New_York".to_string());

        let with_invalid = compute_scheduled_utc(
            now,
            0,
            Some("Mars/Olympus_Mons"),
            None,
            &policy,
            &mut no_random(),
        );
        let with_valid = compute_scheduled_utc(
            now,
            0,
            Some("America/New_York"),
            None,
            &policy,
            &mut no_random(),
        );
        assert_eq!(with_invalid, with_valid);
    }

    #[test]
    fn unresolvable_policy_degrades_to_next_day_start() {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap();
        let mut policy = policy(ScheduleMode::Immediate);
        policy.respect_contact_timezone = false;
        // Degenerate window: no candidate exists inside the lookahead.
        policy.windows = vec![window((9, 0), (9, 0))];

        let scheduled = compute_scheduled_utc(now, 0, None, None, &policy, &mut no_random());
        assert_eq!(scheduled, Utc.with_ymd_and_hms(2025, 6, 3, 0, 0, 0).unwrap());
    }

    #[test]
    fn result_never_precedes_base_instant() {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 3, 0, 0).unwrap();
        for delay in [0, 1, 24, 72] {
            for mode in [ScheduleMode::Immediate, ScheduleMode::Fixed, ScheduleMode::Window] {
                let mut policy = policy(mode);
                policy.send_time = NaiveTime::from_hms_opt(11, 0, 0);
                policy.windows = vec![window((9, 0), (17, 0))];
                let mut random = || 0.25;
                let scheduled = compute_scheduled_utc(
                    now,
                    delay,
                    Some("Europe/Berlin"),
                    None,
                    &policy,
                    &mut random,
                );
                assert!(
                    scheduled >= now + Duration::hours(delay),
                    "mode {mode:?} delay {delay} scheduled {scheduled}"
                );
            }
        }
    }

    #[test]
    fn snapshot_records_the_resolved_zone() {
        let policy = policy(ScheduleMode::Immediate);
        let snapshot = resolve_snapshot(&policy, Some("Asia/Tokyo"), Some("Europe/Paris"));
        assert_eq!(snapshot.timezone, "Asia/Tokyo");

        let snapshot = resolve_snapshot(&policy, Some("not-a-zone"), Some("Europe/Paris"));
        assert_eq!(snapshot.timezone, "Europe/Paris");

        let snapshot = resolve_snapshot(&policy, None, None);
        assert_eq!(snapshot.timezone, "UTC");
    }
}

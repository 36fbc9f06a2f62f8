use crate::domain::models::ScheduleSlot;
use crate::domain::time_window::{TimeWindow, WindowAnchor, format_hhmm};
use crate::error::ScheduleError;
use std::collections::BTreeMap;

/// Windows grouped by day, each day sorted by start minute.
pub fn group_by_day(slots: &[ScheduleSlot]) -> BTreeMap<WindowAnchor, Vec<ScheduleSlot>> {
    let mut days: BTreeMap<WindowAnchor, Vec<ScheduleSlot>> = BTreeMap::new();
    for slot in slots {
        days.entry(slot.window.anchor()).or_default().push(slot.clone());
    }
    for day in days.values_mut() {
        day.sort_by(|left, right| left.window.cmp(&right.window).then_with(|| left.id.cmp(&right.id)));
    }
    days
}

/// Availability windows that apply on the same day as `window`, re-anchored onto
/// that day. A date-specific window also sees the weekly windows of its weekday.
fn same_day_windows<'a>(
    availability: &'a [ScheduleSlot],
    window: &'a TimeWindow,
) -> impl Iterator<Item = TimeWindow> + 'a {
    availability.iter().filter_map(move |slot| match window.anchor() {
        WindowAnchor::Weekly(_) => {
            (slot.window.anchor() == window.anchor()).then_some(slot.window)
        }
        WindowAnchor::Date(date) => slot.window.project_onto(date),
    })
}

pub fn is_break_contained(availability: &[ScheduleSlot], window: &TimeWindow) -> bool {
    same_day_windows(availability, window).any(|candidate| candidate.contains(window))
}

pub fn validate_break_containment(
    availability: &[ScheduleSlot],
    window: &TimeWindow,
) -> Result<(), ScheduleError> {
    if is_break_contained(availability, window) {
        return Ok(());
    }
    Err(ScheduleError::BreakOutsideAvailability {
        day: window.anchor().to_string(),
        start: format_hhmm(window.start_minute()),
        end: format_hhmm(window.end_minute()),
    })
}

/// Ids of breaks no longer inside any of `availability`.
pub fn orphaned_breaks(availability: &[ScheduleSlot], breaks: &[ScheduleSlot]) -> Vec<String> {
    breaks
        .iter()
        .filter(|slot| !is_break_contained(availability, &slot.window))
        .map(|slot| slot.id.clone())
        .collect()
}

/// Proposes a break centred on the first availability window of `anchor`,
/// clamped so it stays inside that window.
pub fn suggest_break(
    availability: &[ScheduleSlot],
    anchor: WindowAnchor,
    duration_minutes: u16,
) -> Option<TimeWindow> {
    let probe = TimeWindow::new(anchor, 0, 1).ok()?;
    let first = same_day_windows(availability, &probe).min()?;

    let duration = duration_minutes.max(1).min(first.duration_minutes());
    let midpoint = first.start_minute() + first.duration_minutes() / 2;
    let start = midpoint
        .saturating_sub(duration / 2)
        .max(first.start_minute())
        .min(first.end_minute() - duration);
    TimeWindow::new(anchor, start, start + duration).ok()
}

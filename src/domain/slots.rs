use crate::domain::models::ScheduleSlot;
use crate::domain::time_window::{TimeWindow, WindowAnchor};
use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotResolution {
    /// Bookable windows on the date, ascending and non-overlapping.
    pub windows: Vec<TimeWindow>,
    /// Breaks that overlap availability without being contained in it. They are
    /// not subtracted.
    pub ignored_break_ids: Vec<String>,
}

/// Availability that applies on `date`, re-anchored onto it. A date-specific
/// window replaces a recurring one with the identical range.
pub fn effective_availability(date: NaiveDate, availability: &[ScheduleSlot]) -> Vec<ScheduleSlot> {
    let (specific, recurring): (Vec<_>, Vec<_>) = availability
        .iter()
        .filter(|slot| slot.window.anchor().applies_on(date))
        .partition(|slot| matches!(slot.window.anchor(), WindowAnchor::Date(_)));

    let mut effective = specific
        .iter()
        .map(|slot| (*slot).clone())
        .collect::<Vec<_>>();
    for slot in recurring {
        if specific.iter().any(|candidate| candidate.window.same_range(&slot.window)) {
            continue;
        }
        if let Some(window) = slot.window.project_onto(date) {
            effective.push(ScheduleSlot {
                window,
                ..slot.clone()
            });
        }
    }
    effective.sort_by(|left, right| left.window.cmp(&right.window));
    effective
}

pub fn bookable_windows(
    date: NaiveDate,
    availability: &[ScheduleSlot],
    breaks: &[ScheduleSlot],
) -> SlotResolution {
    let merged = merge_windows(
        effective_availability(date, availability)
            .into_iter()
            .map(|slot| slot.window)
            .collect(),
    );

    let mut projected_breaks = breaks
        .iter()
        .filter_map(|slot| slot.window.project_onto(date).map(|window| (slot.id.as_str(), window)))
        .collect::<Vec<_>>();
    projected_breaks.sort_by(|left, right| left.1.cmp(&right.1));

    let mut resolution = SlotResolution::default();
    for (break_id, window) in &projected_breaks {
        let contained = merged.iter().any(|available| available.contains(window));
        let overlapping = merged.iter().any(|available| available.overlaps(window));
        if !contained && overlapping {
            resolution.ignored_break_ids.push((*break_id).to_string());
        }
    }

    for available in &merged {
        let mut cursor = available.start_minute();
        for (_, carved) in projected_breaks
            .iter()
            .filter(|(_, window)| available.contains(window))
        {
            if let Some(window) = available.with_range(cursor, carved.start_minute()) {
                resolution.windows.push(window);
            }
            cursor = cursor.max(carved.end_minute());
        }
        if let Some(window) = available.with_range(cursor, available.end_minute()) {
            resolution.windows.push(window);
        }
    }
    resolution
}

/// True iff `[start, end)` fits inside one bookable window.
pub fn fits_in(windows: &[TimeWindow], start_minute: u16, end_minute: u16) -> bool {
    start_minute < end_minute
        && windows
            .iter()
            .any(|window| window.start_minute() <= start_minute && end_minute <= window.end_minute())
}

/// Union of same-day windows; touching windows are joined.
fn merge_windows(mut windows: Vec<TimeWindow>) -> Vec<TimeWindow> {
    windows.sort_unstable();
    let mut merged: Vec<TimeWindow> = Vec::with_capacity(windows.len());
    for window in windows {
        if let Some(last) = merged.last_mut() {
            if window.start_minute() <= last.end_minute() {
                if window.end_minute() > last.end_minute() {
                    if let Some(extended) = last.with_range(last.start_minute(), window.end_minute()) {
                        *last = extended;
                    }
                }
                continue;
            }
        }
        merged.push(window);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::time_window::{DayOfWeek, format_hhmm, parse_hhmm};
    use chrono::Weekday;
    use proptest::prelude::*;

    fn monday_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 11).expect("date")
    }

    fn weekly_slot(id: &str, start: &str, end: &str) -> ScheduleSlot {
        ScheduleSlot {
            id: id.to_string(),
            tutor_id: "tutor-1".to_string(),
            window: TimeWindow::weekly(
                DayOfWeek::from(Weekday::Mon),
                parse_hhmm(start).expect("start"),
                parse_hhmm(end).expect("end"),
            )
            .expect("window"),
            notes: None,
        }
    }

    fn rendered(windows: &[TimeWindow]) -> Vec<String> {
        windows
            .iter()
            .map(|window| {
                format!(
                    "{}-{}",
                    format_hhmm(window.start_minute()),
                    format_hhmm(window.end_minute())
                )
            })
            .collect()
    }

    #[test]
    fn interior_break_splits_window_in_two() {
        let resolution = bookable_windows(
            monday_date(),
            &[weekly_slot("a1", "09:00", "17:00")],
            &[weekly_slot("b1", "12:00", "13:00")],
        );
        assert_eq!(rendered(&resolution.windows), vec!["09:00-12:00", "13:00-17:00"]);
        assert!(resolution.ignored_break_ids.is_empty());
    }

    #[test]
    fn edge_break_trims_window() {
        let resolution = bookable_windows(
            monday_date(),
            &[weekly_slot("a1", "09:00", "17:00")],
            &[weekly_slot("b1", "09:00", "10:00")],
        );
        assert_eq!(rendered(&resolution.windows), vec!["10:00-17:00"]);
    }

    #[test]
    fn break_covering_whole_window_removes_it() {
        let resolution = bookable_windows(
            monday_date(),
            &[weekly_slot("a1", "09:00", "10:00"), weekly_slot("a2", "14:00", "15:00")],
            &[weekly_slot("b1", "09:00", "10:00")],
        );
        assert_eq!(rendered(&resolution.windows), vec!["14:00-15:00"]);
    }

    #[test]
    fn other_weekdays_contribute_nothing() {
        let sunday = NaiveDate::from_ymd_opt(2024, 3, 10).expect("date");
        let resolution = bookable_windows(sunday, &[weekly_slot("a1", "09:00", "17:00")], &[]);
        assert!(resolution.windows.is_empty());
    }

    #[test]
    fn date_specific_window_takes_priority_for_identical_range() {
        let mut specific = weekly_slot("a-date", "09:00", "12:00");
        specific.window = TimeWindow::on_date(monday_date(), 540, 720).expect("window");
        specific.notes = Some("holiday hours".to_string());
        let recurring = weekly_slot("a-weekly", "09:00", "12:00");

        let effective = effective_availability(monday_date(), &[recurring, specific]);
        assert_eq!(effective.len(), 1);
        assert_eq!(effective[0].id, "a-date");
        assert_eq!(effective[0].notes.as_deref(), Some("holiday hours"));
    }

    #[test]
    fn overlapping_availability_is_treated_as_union() {
        let resolution = bookable_windows(
            monday_date(),
            &[weekly_slot("a1", "09:00", "12:00"), weekly_slot("a2", "11:00", "14:00")],
            &[weekly_slot("b1", "11:30", "12:30")],
        );
        assert_eq!(rendered(&resolution.windows), vec!["09:00-11:30", "12:30-14:00"]);
    }

    #[test]
    fn uncontained_overlapping_break_is_reported_not_subtracted() {
        let resolution = bookable_windows(
            monday_date(),
            &[weekly_slot("a1", "09:00", "12:00")],
            &[weekly_slot("b-stray", "11:30", "12:30")],
        );
        assert_eq!(rendered(&resolution.windows), vec!["09:00-12:00"]);
        assert_eq!(resolution.ignored_break_ids, vec!["b-stray".to_string()]);
    }

    #[test]
    fn fits_in_requires_full_containment() {
        let resolution = bookable_windows(
            monday_date(),
            &[weekly_slot("a1", "09:00", "17:00")],
            &[weekly_slot("b1", "12:00", "13:00")],
        );
        assert!(fits_in(&resolution.windows, 600, 660));
        assert!(fits_in(&resolution.windows, 540, 720));
        assert!(!fits_in(&resolution.windows, 690, 750));
        assert!(!fits_in(&resolution.windows, 600, 600));
    }

    proptest! {
        #[test]
        fn bookable_time_never_intersects_breaks(
            avail_start in 0u16..1200,
            avail_len in 60u16..230,
            break_offset in 0u16..59,
            break_len in 1u16..60
        ) {
            let avail_end = avail_start + avail_len;
            let break_start = avail_start + break_offset;
            let break_end = (break_start + break_len).min(avail_end);
            prop_assume!(break_start < break_end);

            let mut availability = weekly_slot("a1", "00:00", "00:01");
            availability.window = TimeWindow::weekly(DayOfWeek::from(Weekday::Mon), avail_start, avail_end)
                .expect("availability");
            let mut carved = weekly_slot("b1", "00:00", "00:01");
            carved.window = TimeWindow::weekly(DayOfWeek::from(Weekday::Mon), break_start, break_end)
                .expect("break");

            let resolution = bookable_windows(monday_date(), &[availability], &[carved.clone()]);
            let projected = carved.window.project_onto(monday_date()).expect("projected");
            let total: u16 = resolution.windows.iter().map(TimeWindow::duration_minutes).sum();

            prop_assert!(resolution.windows.iter().all(|window| !window.overlaps(&projected)));
            prop_assert_eq!(total, avail_len - (break_end - break_start));
            prop_assert!(resolution.windows.len() <= 2);
        }
    }
}

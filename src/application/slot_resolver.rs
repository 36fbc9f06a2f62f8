use crate::domain::slots::{SlotResolution, bookable_windows, fits_in};
use crate::error::ScheduleError;
use crate::infrastructure::slot_repository::SlotRepository;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::warn;

pub struct SlotResolver<A, B>
where
    A: SlotRepository,
    B: SlotRepository,
{
    availability: Arc<A>,
    breaks: Arc<B>,
}

impl<A, B> Clone for SlotResolver<A, B>
where
    A: SlotRepository,
    B: SlotRepository,
{
    fn clone(&self) -> Self {
        Self {
            availability: Arc::clone(&self.availability),
            breaks: Arc::clone(&self.breaks),
        }
    }
}

impl<A, B> SlotResolver<A, B>
where
    A: SlotRepository,
    B: SlotRepository,
{
    pub fn new(availability: Arc<A>, breaks: Arc<B>) -> Self {
        Self {
            availability,
            breaks,
        }
    }

    pub async fn bookable_windows_for_date(
        &self,
        tutor_id: &str,
        date: NaiveDate,
    ) -> Result<SlotResolution, ScheduleError> {
        let availability = self.availability.list_for_tutor(tutor_id).await?;
        let breaks = self.breaks.list_for_tutor(tutor_id).await?;
        let resolution = bookable_windows(date, &availability, &breaks);
        if !resolution.ignored_break_ids.is_empty() {
            warn!(
                tutor_id,
                %date,
                break_ids = ?resolution.ignored_break_ids,
                "breaks outside availability were not subtracted"
            );
        }
        Ok(resolution)
    }

    /// True iff `[start_minute, end_minute)` lies inside one bookable window.
    pub async fn is_time_available(
        &self,
        tutor_id: &str,
        date: NaiveDate,
        start_minute: u16,
        end_minute: u16,
    ) -> Result<bool, ScheduleError> {
        let resolution = self.bookable_windows_for_date(tutor_id, date).await?;
        Ok(fits_in(&resolution.windows, start_minute, end_minute))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ScheduleSlot;
    use crate::domain::time_window::{DayOfWeek, TimeWindow};
    use crate::infrastructure::slot_repository::InMemorySlotRepository;
    use chrono::Weekday;

    async fn seed(repository: &InMemorySlotRepository, id: &str, window: TimeWindow) {
        repository
            .upsert(&ScheduleSlot {
                id: id.to_string(),
                tutor_id: "tutor-1".to_string(),
                window,
                notes: None,
            })
            .await
            .expect("seed");
    }

    async fn resolver() -> SlotResolver<InMemorySlotRepository, InMemorySlotRepository> {
        let availability = Arc::new(InMemorySlotRepository::default());
        let breaks = Arc::new(InMemorySlotRepository::default());
        let monday = DayOfWeek::from(Weekday::Mon);
        seed(&availability, "a1", TimeWindow::weekly(monday, 540, 1020).expect("window")).await;
        seed(&breaks, "b1", TimeWindow::weekly(monday, 720, 780).expect("window")).await;
        SlotResolver::new(availability, breaks)
    }

    #[tokio::test]
    async fn bookable_windows_exclude_breaks() {
        let resolver = resolver().await;
        let monday = NaiveDate::from_ymd_opt(2024, 3, 11).expect("date");
        let resolution = resolver
            .bookable_windows_for_date("tutor-1", monday)
            .await
            .expect("resolve");
        let bounds = resolution
            .windows
            .iter()
            .map(|window| (window.start_minute(), window.end_minute()))
            .collect::<Vec<_>>();
        assert_eq!(bounds, vec![(540, 720), (780, 1020)]);
    }

    #[tokio::test]
    async fn time_availability_requires_full_fit() {
        let resolver = resolver().await;
        let monday = NaiveDate::from_ymd_opt(2024, 3, 11).expect("date");
        let tuesday = NaiveDate::from_ymd_opt(2024, 3, 12).expect("date");

        assert!(resolver.is_time_available("tutor-1", monday, 600, 660).await.expect("check"));
        assert!(!resolver.is_time_available("tutor-1", monday, 700, 760).await.expect("check"));
        assert!(!resolver.is_time_available("tutor-1", tuesday, 600, 660).await.expect("check"));
        assert!(!resolver.is_time_available("tutor-2", monday, 600, 660).await.expect("check"));
    }
}

use crate::application::access::require_tutor;
use crate::application::availability::{SlotDraft, owned_slot};
use crate::application::{IdProvider, default_id_provider};
use crate::domain::models::{Actor, ScheduleSlot};
use crate::domain::schedule::{group_by_day, suggest_break, validate_break_containment};
use crate::domain::time_window::{TimeWindow, WindowAnchor};
use crate::error::ScheduleError;
use crate::infrastructure::slot_repository::SlotRepository;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

const DEFAULT_BREAK_MINUTES: u16 = 60;

pub struct BreakService<A, B>
where
    A: SlotRepository,
    B: SlotRepository,
{
    availability: Arc<A>,
    breaks: Arc<B>,
    default_break_minutes: u16,
    id_provider: IdProvider,
}

impl<A, B> BreakService<A, B>
where
    A: SlotRepository,
    B: SlotRepository,
{
    pub fn new(availability: Arc<A>, breaks: Arc<B>) -> Self {
        Self {
            availability,
            breaks,
            default_break_minutes: DEFAULT_BREAK_MINUTES,
            id_provider: default_id_provider(),
        }
    }

    pub fn with_default_break_minutes(mut self, minutes: u16) -> Self {
        self.default_break_minutes = minutes.max(1);
        self
    }

    pub fn with_id_provider(mut self, id_provider: IdProvider) -> Self {
        self.id_provider = id_provider;
        self
    }

    /// Creates or edits a break. Containment is checked on every write, so
    /// moving a break to another day or time is validated like a new one.
    pub async fn upsert(&self, actor: &Actor, draft: SlotDraft) -> Result<ScheduleSlot, ScheduleError> {
        require_tutor(actor, &draft.tutor_id)?;
        let slot = draft.into_slot(&self.id_provider, "break");
        owned_slot(self.breaks.as_ref(), actor, &slot.id).await?;

        let availability = self.availability.list_for_tutor(&slot.tutor_id).await?;
        validate_break_containment(&availability, &slot.window)?;
        self.breaks.upsert(&slot).await?;

        info!(tutor_id = %slot.tutor_id, break_id = %slot.id, window = %slot.window, "break saved");
        Ok(slot)
    }

    pub async fn remove(&self, actor: &Actor, break_id: &str) -> Result<ScheduleSlot, ScheduleError> {
        let slot = owned_slot(self.breaks.as_ref(), actor, break_id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound(format!("break {break_id}")))?;
        self.breaks.remove(&slot.id).await?;
        info!(tutor_id = %slot.tutor_id, break_id = %slot.id, "break removed");
        Ok(slot)
    }

    pub async fn list_by_day(
        &self,
        tutor_id: &str,
    ) -> Result<BTreeMap<WindowAnchor, Vec<ScheduleSlot>>, ScheduleError> {
        let slots = self.breaks.list_for_tutor(tutor_id).await?;
        Ok(group_by_day(&slots))
    }

    /// Default times for the break form. `None` when the day has no availability.
    pub async fn suggest(
        &self,
        tutor_id: &str,
        anchor: WindowAnchor,
        duration_minutes: Option<u16>,
    ) -> Result<Option<TimeWindow>, ScheduleError> {
        let availability = self.availability.list_for_tutor(tutor_id).await?;
        Ok(suggest_break(
            &availability,
            anchor,
            duration_minutes.unwrap_or(self.default_break_minutes),
        ))
    }
}

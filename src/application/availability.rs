use crate::application::access::require_tutor;
use crate::application::{IdProvider, default_id_provider};
use crate::domain::models::{Actor, ScheduleSlot};
use crate::domain::schedule::{group_by_day, is_break_contained, orphaned_breaks};
use crate::domain::time_window::{TimeWindow, WindowAnchor};
use crate::error::ScheduleError;
use crate::infrastructure::config::OrphanedBreakPolicy;
use crate::infrastructure::slot_repository::SlotRepository;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// A window to create (no id) or replace (existing id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDraft {
    pub id: Option<String>,
    pub tutor_id: String,
    pub window: TimeWindow,
    pub notes: Option<String>,
}

impl SlotDraft {
    pub(crate) fn into_slot(self, id_provider: &IdProvider, prefix: &str) -> ScheduleSlot {
        let id = self
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| id_provider(prefix));
        ScheduleSlot {
            id,
            tutor_id: self.tutor_id,
            window: self.window,
            notes: self
                .notes
                .map(|notes| notes.trim().to_string())
                .filter(|notes| !notes.is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityChange {
    pub slot: ScheduleSlot,
    /// Breaks deleted because the change would have left them uncovered.
    pub cascaded_break_ids: Vec<String>,
}

/// Loads an existing slot and checks it belongs to the acting tutor.
pub(crate) async fn owned_slot<R>(
    repository: &R,
    actor: &Actor,
    slot_id: &str,
) -> Result<Option<ScheduleSlot>, ScheduleError>
where
    R: SlotRepository + ?Sized,
{
    let Some(existing) = repository.get(slot_id).await? else {
        return Ok(None);
    };
    require_tutor(actor, &existing.tutor_id)?;
    Ok(Some(existing))
}

pub struct AvailabilityService<A, B>
where
    A: SlotRepository,
    B: SlotRepository,
{
    availability: Arc<A>,
    breaks: Arc<B>,
    orphaned_break_policy: OrphanedBreakPolicy,
    id_provider: IdProvider,
}

impl<A, B> AvailabilityService<A, B>
where
    A: SlotRepository,
    B: SlotRepository,
{
    pub fn new(availability: Arc<A>, breaks: Arc<B>) -> Self {
        Self {
            availability,
            breaks,
            orphaned_break_policy: OrphanedBreakPolicy::default(),
            id_provider: default_id_provider(),
        }
    }

    pub fn with_orphaned_break_policy(mut self, policy: OrphanedBreakPolicy) -> Self {
        self.orphaned_break_policy = policy;
        self
    }

    pub fn with_id_provider(mut self, id_provider: IdProvider) -> Self {
        self.id_provider = id_provider;
        self
    }

    /// Inserts or replaces a window. Overlap with other windows is allowed.
    pub async fn upsert(&self, actor: &Actor, draft: SlotDraft) -> Result<AvailabilityChange, ScheduleError> {
        require_tutor(actor, &draft.tutor_id)?;
        let slot = draft.into_slot(&self.id_provider, "avail");
        let previous = owned_slot(self.availability.as_ref(), actor, &slot.id).await?;

        let mut cascaded_break_ids = Vec::new();
        if let Some(previous) = &previous {
            cascaded_break_ids = self
                .release_breaks(&slot.tutor_id, &previous.id, Some(&slot))
                .await?;
        }
        self.availability.upsert(&slot).await?;

        info!(
            tutor_id = %slot.tutor_id,
            availability_id = %slot.id,
            window = %slot.window,
            replaced = previous.is_some(),
            "availability saved"
        );
        Ok(AvailabilityChange {
            slot,
            cascaded_break_ids,
        })
    }

    pub async fn remove(&self, actor: &Actor, availability_id: &str) -> Result<AvailabilityChange, ScheduleError> {
        let slot = owned_slot(self.availability.as_ref(), actor, availability_id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound(format!("availability {availability_id}")))?;

        let cascaded_break_ids = self.release_breaks(&slot.tutor_id, &slot.id, None).await?;
        self.availability.remove(&slot.id).await?;

        info!(tutor_id = %slot.tutor_id, availability_id = %slot.id, "availability removed");
        Ok(AvailabilityChange {
            slot,
            cascaded_break_ids,
        })
    }

    pub async fn list_by_day(
        &self,
        tutor_id: &str,
    ) -> Result<BTreeMap<WindowAnchor, Vec<ScheduleSlot>>, ScheduleError> {
        let slots = self.availability.list_for_tutor(tutor_id).await?;
        Ok(group_by_day(&slots))
    }

    /// Breaks covered today that would be uncovered once `availability_id` is
    /// replaced by `replacement` (or removed). Blocks or cascades per policy.
    async fn release_breaks(
        &self,
        tutor_id: &str,
        availability_id: &str,
        replacement: Option<&ScheduleSlot>,
    ) -> Result<Vec<String>, ScheduleError> {
        let before = self.availability.list_for_tutor(tutor_id).await?;
        let after = before
            .iter()
            .filter(|slot| slot.id != availability_id)
            .chain(replacement)
            .cloned()
            .collect::<Vec<_>>();
        let covered = self
            .breaks
            .list_for_tutor(tutor_id)
            .await?
            .into_iter()
            .filter(|slot| is_break_contained(&before, &slot.window))
            .collect::<Vec<_>>();

        let orphaned = orphaned_breaks(&after, &covered);
        if orphaned.is_empty() {
            return Ok(orphaned);
        }

        match self.orphaned_break_policy {
            OrphanedBreakPolicy::Block => Err(ScheduleError::AvailabilityInUse {
                availability_id: availability_id.to_string(),
                break_ids: orphaned,
            }),
            OrphanedBreakPolicy::Cascade => {
                for break_id in &orphaned {
                    self.breaks.remove(break_id).await?;
                }
                info!(
                    tutor_id,
                    availability_id,
                    break_ids = ?orphaned,
                    "removed breaks left outside availability"
                );
                Ok(orphaned)
            }
        }
    }
}

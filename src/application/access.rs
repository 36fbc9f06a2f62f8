use crate::domain::models::{Actor, Role};
use crate::error::ScheduleError;

/// The caller must be the tutor who owns `tutor_id`'s schedule.
pub fn require_tutor(actor: &Actor, tutor_id: &str) -> Result<(), ScheduleError> {
    if actor.role != Role::Tutor {
        return Err(ScheduleError::Forbidden(format!(
            "user {} is not a tutor",
            actor.user_id
        )));
    }
    if actor.user_id != tutor_id {
        return Err(ScheduleError::Forbidden(format!(
            "tutor {} cannot manage the schedule of {tutor_id}",
            actor.user_id
        )));
    }
    Ok(())
}

pub fn require_parent(actor: &Actor) -> Result<(), ScheduleError> {
    if actor.role != Role::Parent {
        return Err(ScheduleError::Forbidden(format!(
            "user {} is not a parent",
            actor.user_id
        )));
    }
    Ok(())
}

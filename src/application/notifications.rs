use crate::domain::models::LessonRequest;
use crate::error::ScheduleError;
use crate::infrastructure::notification_channel::{Notification, NotificationChannel, NotificationKind};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// A notification that one channel could not deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryFailure {
    pub parent_id: String,
    pub channel: String,
    pub message: String,
}

impl From<DeliveryFailure> for ScheduleError {
    fn from(failure: DeliveryFailure) -> Self {
        ScheduleError::NotificationDeliveryFailure {
            parent_id: failure.parent_id,
            channel: failure.channel,
            message: failure.message,
        }
    }
}

/// One notification per parent, listing that parent's students and subjects.
/// Date and time come from the first member, matching the grouped view.
pub fn notifications_for(
    kind: NotificationKind,
    members: &[LessonRequest],
    response: Option<&str>,
) -> Vec<Notification> {
    let Some(first) = members.first() else {
        return Vec::new();
    };
    let mut notifications: Vec<Notification> = Vec::new();
    for member in members {
        let index = match notifications
            .iter()
            .position(|notification| notification.parent_id == member.parent_id)
        {
            Some(index) => index,
            None => {
                notifications.push(Notification {
                    kind,
                    parent_id: member.parent_id.clone(),
                    student_names: Vec::new(),
                    subjects: Vec::new(),
                    date: first.preferred_date,
                    time: first.preferred_time,
                    response: response.map(ToOwned::to_owned),
                });
                notifications.len() - 1
            }
        };
        let notification = &mut notifications[index];
        if !notification.student_names.contains(&member.student_name) {
            notification.student_names.push(member.student_name.clone());
        }
        if !notification.subjects.contains(&member.subject) {
            notification.subjects.push(member.subject);
        }
    }
    notifications
}

/// Delivers queued notifications after the primary operation has finished.
/// Failures are collected and logged, never raised.
#[derive(Clone, Default)]
pub struct NotificationOutbox {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl NotificationOutbox {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|channel| channel.name()).collect()
    }

    pub async fn dispatch(&self, notifications: Vec<Notification>) -> Vec<DeliveryFailure> {
        let mut failures = Vec::new();
        for notification in &notifications {
            for channel in &self.channels {
                match channel.deliver(notification).await {
                    Ok(()) => info!(
                        parent_id = %notification.parent_id,
                        channel = channel.name(),
                        kind = notification.kind.as_str(),
                        "notification delivered"
                    ),
                    Err(error) => {
                        let failure = DeliveryFailure {
                            parent_id: notification.parent_id.clone(),
                            channel: channel.name().to_string(),
                            message: error.to_string(),
                        };
                        warn!(error = %ScheduleError::from(failure.clone()), "notification not delivered");
                        failures.push(failure);
                    }
                }
            }
        }
        failures
    }
}

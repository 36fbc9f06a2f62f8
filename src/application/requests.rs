use crate::application::access::{require_parent, require_tutor};
use crate::application::slot_resolver::SlotResolver;
use crate::application::{IdProvider, default_id_provider};
use crate::domain::grouping::{GroupedRequestView, group_requests};
use crate::domain::models::{Actor, LessonRequest, NewLessonRequest, RequestStatus};
use crate::domain::time_window::{MINUTES_PER_DAY, format_hhmm};
use crate::error::ScheduleError;
use crate::infrastructure::request_repository::LessonRequestRepository;
use crate::infrastructure::slot_repository::SlotRepository;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct RequestService<R, A, B>
where
    R: LessonRequestRepository,
    A: SlotRepository,
    B: SlotRepository,
{
    requests: Arc<R>,
    resolver: SlotResolver<A, B>,
    enforce_availability: bool,
    now_provider: NowProvider,
    id_provider: IdProvider,
}

impl<R, A, B> RequestService<R, A, B>
where
    R: LessonRequestRepository,
    A: SlotRepository,
    B: SlotRepository,
{
    pub fn new(requests: Arc<R>, resolver: SlotResolver<A, B>) -> Self {
        Self {
            requests,
            resolver,
            enforce_availability: true,
            now_provider: Arc::new(Utc::now),
            id_provider: default_id_provider(),
        }
    }

    pub fn with_availability_enforcement(mut self, enforce: bool) -> Self {
        self.enforce_availability = enforce;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_id_provider(mut self, id_provider: IdProvider) -> Self {
        self.id_provider = id_provider;
        self
    }

    pub async fn submit(&self, actor: &Actor, request: NewLessonRequest) -> Result<LessonRequest, ScheduleError> {
        require_parent(actor)?;
        request.validate().map_err(ScheduleError::Validation)?;
        self.check_requested_time(&request).await?;

        let stored = self.materialize(actor, request, None, (self.now_provider)());
        self.requests.insert(&stored).await?;
        info!(
            request_id = %stored.id,
            tutor_id = %stored.tutor_id,
            request_type = stored.kind.as_str(),
            "lesson request submitted"
        );
        Ok(stored)
    }

    /// Submits one request per student under a shared group id. Every member
    /// takes the date, time, duration and notes of the first entry.
    pub async fn submit_combined(
        &self,
        actor: &Actor,
        entries: Vec<NewLessonRequest>,
    ) -> Result<Vec<LessonRequest>, ScheduleError> {
        require_parent(actor)?;
        let Some(first) = entries.first().cloned() else {
            return Err(ScheduleError::Validation(
                "a combined session needs at least two students".to_string(),
            ));
        };
        if entries.len() < 2 {
            return Err(ScheduleError::Validation(
                "a combined session needs at least two students".to_string(),
            ));
        }
        if entries.iter().any(|entry| entry.tutor_id != first.tutor_id) {
            return Err(ScheduleError::Validation(
                "all students of a combined session must request the same tutor".to_string(),
            ));
        }

        let entries = entries
            .into_iter()
            .map(|entry| NewLessonRequest {
                preferred_date: first.preferred_date,
                preferred_time: first.preferred_time,
                preferred_duration_minutes: first.preferred_duration_minutes,
                notes: first.notes.clone(),
                ..entry
            })
            .collect::<Vec<_>>();
        for entry in &entries {
            entry.validate().map_err(ScheduleError::Validation)?;
        }
        self.check_requested_time(&first).await?;

        let group_id = (self.id_provider)("group");
        let created_at = (self.now_provider)();
        let mut stored = Vec::with_capacity(entries.len());
        for entry in entries {
            let request = self.materialize(actor, entry, Some(group_id.clone()), created_at);
            self.requests.insert(&request).await?;
            stored.push(request);
        }
        info!(
            group_id = %group_id,
            tutor_id = %first.tutor_id,
            members = stored.len(),
            "combined lesson request submitted"
        );
        Ok(stored)
    }

    /// Parents may withdraw their own requests while they are still pending.
    pub async fn delete(&self, actor: &Actor, request_id: &str) -> Result<(), ScheduleError> {
        require_parent(actor)?;
        let request = self
            .requests
            .get(request_id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound(format!("lesson request {request_id}")))?;
        if request.parent_id != actor.user_id {
            return Err(ScheduleError::Forbidden(format!(
                "request {request_id} belongs to another parent"
            )));
        }
        if request.status != RequestStatus::Pending {
            return Err(ScheduleError::invalid_state(
                request_id,
                request.status,
                RequestStatus::Pending.as_str(),
            ));
        }
        self.requests.delete(request_id).await?;
        info!(request_id, "lesson request deleted");
        Ok(())
    }

    pub async fn list_grouped(
        &self,
        actor: &Actor,
        tutor_id: &str,
        status: Option<RequestStatus>,
    ) -> Result<Vec<GroupedRequestView>, ScheduleError> {
        require_tutor(actor, tutor_id)?;
        let requests = self.requests.list_for_tutor(tutor_id, status).await?;
        let views = group_requests(&requests);
        for view in views.iter().filter(|view| !view.divergent_member_ids.is_empty()) {
            warn!(
                group_id = view.key.id(),
                divergent = ?view.divergent_member_ids,
                "combined session members disagree on date or time; using first member"
            );
        }
        Ok(views)
    }

    async fn check_requested_time(&self, request: &NewLessonRequest) -> Result<(), ScheduleError> {
        let Some(start) = request.preferred_time else {
            return Ok(());
        };
        let end = u32::from(start)
            .checked_add(request.preferred_duration_minutes)
            .and_then(|end| u16::try_from(end).ok())
            .filter(|end| *end <= MINUTES_PER_DAY);
        let available = match end {
            Some(end) => {
                self.resolver
                    .is_time_available(&request.tutor_id, request.preferred_date, start, end)
                    .await?
            }
            None => false,
        };
        if available {
            return Ok(());
        }

        let error = ScheduleError::SlotUnavailable {
            date: request.preferred_date.format("%Y-%m-%d").to_string(),
            start: format_hhmm(start),
            end: end.map(format_hhmm).unwrap_or_else(|| "past midnight".to_string()),
        };
        if self.enforce_availability {
            return Err(error);
        }
        warn!(tutor_id = %request.tutor_id, %error, "accepting request outside bookable time");
        Ok(())
    }

    fn materialize(
        &self,
        actor: &Actor,
        request: NewLessonRequest,
        request_group_id: Option<String>,
        created_at: DateTime<Utc>,
    ) -> LessonRequest {
        LessonRequest {
            id: (self.id_provider)("req"),
            tutor_id: request.tutor_id,
            parent_id: actor.user_id.clone(),
            student_id: request.student_id,
            student_name: request.student_name.trim().to_string(),
            subject: request.subject,
            preferred_date: request.preferred_date,
            preferred_time: request.preferred_time,
            preferred_duration_minutes: request.preferred_duration_minutes,
            notes: request
                .notes
                .map(|notes| notes.trim().to_string())
                .filter(|notes| !notes.is_empty()),
            kind: request.kind,
            request_group_id,
            status: RequestStatus::Pending,
            tutor_response: None,
            scheduled_lesson_id: None,
            created_at,
        }
    }
}

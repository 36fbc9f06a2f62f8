use crate::application::access::require_tutor;
use crate::application::notifications::{DeliveryFailure, NotificationOutbox, notifications_for};
use crate::application::{IdProvider, default_id_provider};
use crate::domain::grouping::GroupKey;
use crate::domain::models::{Actor, LessonRequest, RequestStatus, ScheduledLesson};
use crate::domain::time_window::format_hhmm;
use crate::error::{FailedStep, MemberFailure, ScheduleError};
use crate::infrastructure::lesson_repository::LessonRepository;
use crate::infrastructure::notification_channel::NotificationKind;
use crate::infrastructure::request_repository::{LessonRequestRepository, StatusUpdate};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a fully successful approve or reject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionOutcome {
    pub target: GroupKey,
    pub status: RequestStatus,
    pub updated_request_ids: Vec<String>,
    pub lessons: Vec<ScheduledLesson>,
    /// Original lessons of reschedule requests that could not be deleted.
    pub undeleted_original_lesson_ids: Vec<String>,
    pub notification_failures: Vec<DeliveryFailure>,
}

/// Local wall-clock start of a lesson, converted to UTC. Inside a DST gap the
/// time does not exist and `None` is returned; in an overlap the earlier
/// instant wins.
pub fn local_start(timezone: Tz, date: NaiveDate, minute: u16) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(u32::from(minute / 60), u32::from(minute % 60), 0)?;
    timezone
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|start| start.with_timezone(&Utc))
}

/// Minutes each member of a combined session gets. Remainder minutes are dropped.
pub fn split_duration(total_minutes: u32, members: usize) -> u32 {
    match u32::try_from(members) {
        Ok(0) | Err(_) => 0,
        Ok(count) => total_minutes / count,
    }
}

struct LessonPlan {
    scheduled_at: DateTime<Utc>,
    duration_minutes: u32,
    session_group_id: Option<String>,
}

pub struct ApprovalService<R, L>
where
    R: LessonRequestRepository,
    L: LessonRepository,
{
    requests: Arc<R>,
    lessons: Arc<L>,
    outbox: NotificationOutbox,
    timezone: Tz,
    id_provider: IdProvider,
}

impl<R, L> ApprovalService<R, L>
where
    R: LessonRequestRepository,
    L: LessonRepository,
{
    pub fn new(requests: Arc<R>, lessons: Arc<L>, outbox: NotificationOutbox) -> Self {
        Self {
            requests,
            lessons,
            outbox,
            timezone: Tz::UTC,
            id_provider: default_id_provider(),
        }
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_id_provider(mut self, id_provider: IdProvider) -> Self {
        self.id_provider = id_provider;
        self
    }

    /// Approves every member of `target`. With `should_create_lesson` each
    /// member gets a lesson and ends `scheduled`; otherwise it ends `approved`.
    pub async fn approve(
        &self,
        actor: &Actor,
        target: &GroupKey,
        tutor_response: Option<String>,
        should_create_lesson: bool,
    ) -> Result<DecisionOutcome, ScheduleError> {
        let members = self.pending_members(actor, target).await?;
        let tutor_response = normalize_response(tutor_response);

        let plan = if should_create_lesson {
            Some(self.plan_lessons(target, &members)?)
        } else {
            None
        };
        let status = if plan.is_some() {
            RequestStatus::Scheduled
        } else {
            RequestStatus::Approved
        };

        let mut failed = Vec::new();
        let mut succeeded = Vec::new();
        let mut lessons = Vec::new();
        let mut undeleted_original_lesson_ids = Vec::new();

        for member in &members {
            let lesson = match &plan {
                Some(plan) => {
                    let lesson = self.lesson_for(member, plan);
                    if let Err(error) = self.lessons.create(&lesson).await {
                        warn!(request_id = %member.id, %error, "lesson creation failed");
                        failed.push(MemberFailure {
                            request_id: member.id.clone(),
                            step: FailedStep::CreateLesson,
                            message: error.to_string(),
                        });
                        continue;
                    }
                    Some(lesson)
                }
                None => None,
            };

            let update = StatusUpdate {
                request_id: member.id.clone(),
                status,
                tutor_response: tutor_response.clone(),
                scheduled_lesson_id: lesson.as_ref().map(|lesson| lesson.id.clone()),
            };
            if let Err(error) = self.requests.update_status(&update).await {
                warn!(request_id = %member.id, %error, "request status update failed");
                failed.push(MemberFailure {
                    request_id: member.id.clone(),
                    step: FailedStep::UpdateStatus,
                    message: error.to_string(),
                });
                continue;
            }

            if let (Some(_), Some(original_lesson_id)) = (&lesson, member.kind.original_lesson_id()) {
                if !self.delete_original(&member.id, original_lesson_id).await {
                    undeleted_original_lesson_ids.push(original_lesson_id.to_string());
                }
            }
            succeeded.push(member.clone());
            lessons.extend(lesson);
        }

        let notification_failures = self
            .outbox
            .dispatch(notifications_for(
                NotificationKind::LessonApproved,
                &succeeded,
                tutor_response.as_deref(),
            ))
            .await;

        let updated_request_ids = succeeded.into_iter().map(|member| member.id).collect::<Vec<_>>();
        if !failed.is_empty() {
            return Err(ScheduleError::PartialGroupFailure {
                failed,
                succeeded: updated_request_ids,
            });
        }

        info!(
            group = target.id(),
            status = status.as_str(),
            members = updated_request_ids.len(),
            "lesson request approved"
        );
        Ok(DecisionOutcome {
            target: target.clone(),
            status,
            updated_request_ids,
            lessons,
            undeleted_original_lesson_ids,
            notification_failures,
        })
    }

    pub async fn reject(
        &self,
        actor: &Actor,
        target: &GroupKey,
        reason: Option<String>,
    ) -> Result<DecisionOutcome, ScheduleError> {
        let members = self.pending_members(actor, target).await?;
        let reason = normalize_response(reason);

        let mut failed = Vec::new();
        let mut succeeded = Vec::new();
        for member in &members {
            let update = StatusUpdate {
                request_id: member.id.clone(),
                status: RequestStatus::Rejected,
                tutor_response: reason.clone(),
                scheduled_lesson_id: None,
            };
            match self.requests.update_status(&update).await {
                Ok(()) => succeeded.push(member.clone()),
                Err(error) => {
                    warn!(request_id = %member.id, %error, "request status update failed");
                    failed.push(MemberFailure {
                        request_id: member.id.clone(),
                        step: FailedStep::UpdateStatus,
                        message: error.to_string(),
                    });
                }
            }
        }

        let notification_failures = self
            .outbox
            .dispatch(notifications_for(
                NotificationKind::LessonRejected,
                &succeeded,
                reason.as_deref(),
            ))
            .await;

        let updated_request_ids = succeeded.into_iter().map(|member| member.id).collect::<Vec<_>>();
        if !failed.is_empty() {
            return Err(ScheduleError::PartialGroupFailure {
                failed,
                succeeded: updated_request_ids,
            });
        }

        info!(group = target.id(), members = updated_request_ids.len(), "lesson request rejected");
        Ok(DecisionOutcome {
            target: target.clone(),
            status: RequestStatus::Rejected,
            updated_request_ids,
            lessons: Vec::new(),
            undeleted_original_lesson_ids: Vec::new(),
            notification_failures,
        })
    }

    /// Loads the members of `target` and checks, before any write, that the
    /// actor owns them and that every one of them is still pending.
    async fn pending_members(&self, actor: &Actor, target: &GroupKey) -> Result<Vec<LessonRequest>, ScheduleError> {
        let members: Vec<LessonRequest> = match target {
            GroupKey::Standalone(request_id) => self.requests.get(request_id).await?.into_iter().collect(),
            GroupKey::Combined(group_id) => self.requests.list_by_group(group_id).await?,
        };
        if members.is_empty() {
            return Err(ScheduleError::NotFound(format!("lesson request {}", target.id())));
        }
        for member in &members {
            require_tutor(actor, &member.tutor_id)?;
        }
        if let GroupKey::Standalone(request_id) = target {
            if let Some(group_id) = members.iter().find_map(|member| member.request_group_id.as_deref()) {
                return Err(ScheduleError::Validation(format!(
                    "request {request_id} belongs to combined session {group_id}; decide the session as a whole"
                )));
            }
        }
        if let Some(blocked) = members
            .iter()
            .find(|member| member.status.is_terminal())
        {
            return Err(ScheduleError::invalid_state(
                &blocked.id,
                blocked.status,
                RequestStatus::Pending.as_str(),
            ));
        }
        Ok(members)
    }

    fn plan_lessons(&self, target: &GroupKey, members: &[LessonRequest]) -> Result<LessonPlan, ScheduleError> {
        let first = &members[0];
        let minute = first
            .preferred_time
            .ok_or_else(|| ScheduleError::MissingPreferredTime(first.id.clone()))?;
        let scheduled_at = local_start(self.timezone, first.preferred_date, minute).ok_or_else(|| {
            ScheduleError::Validation(format!(
                "{} {} does not exist in {}",
                first.preferred_date,
                format_hhmm(minute),
                self.timezone.name()
            ))
        })?;

        if members.len() == 1 {
            return Ok(LessonPlan {
                scheduled_at,
                duration_minutes: first.preferred_duration_minutes,
                session_group_id: None,
            });
        }
        let duration_minutes = split_duration(first.preferred_duration_minutes, members.len());
        if duration_minutes == 0 {
            return Err(ScheduleError::Validation(format!(
                "{} minutes cannot be split across {} students",
                first.preferred_duration_minutes,
                members.len()
            )));
        }
        Ok(LessonPlan {
            scheduled_at,
            duration_minutes,
            session_group_id: Some(match target {
                GroupKey::Combined(group_id) => format!("session-{group_id}"),
                GroupKey::Standalone(_) => (self.id_provider)("session"),
            }),
        })
    }

    fn lesson_for(&self, member: &LessonRequest, plan: &LessonPlan) -> ScheduledLesson {
        ScheduledLesson {
            id: (self.id_provider)("lesson"),
            tutor_id: member.tutor_id.clone(),
            parent_id: member.parent_id.clone(),
            student_id: member.student_id.clone(),
            subject: member.subject,
            scheduled_at: plan.scheduled_at,
            duration_minutes: plan.duration_minutes,
            session_group_id: plan.session_group_id.clone(),
            source_request_id: Some(member.id.clone()),
            notes: member.notes.clone(),
        }
    }

    /// Best effort; a failure is logged and reported, never rolled back.
    async fn delete_original(&self, request_id: &str, original_lesson_id: &str) -> bool {
        match self.lessons.delete(original_lesson_id).await {
            Ok(true) => {
                info!(request_id, original_lesson_id, "rescheduled lesson removed");
                true
            }
            Ok(false) => {
                warn!(request_id, original_lesson_id, "original lesson was already gone");
                false
            }
            Err(error) => {
                warn!(request_id, original_lesson_id, %error, "failed to delete original lesson");
                false
            }
        }
    }
}

fn normalize_response(response: Option<String>) -> Option<String> {
    response
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{RequestKind, Subject};
    use crate::infrastructure::error::InfraError;
    use crate::infrastructure::lesson_repository::InMemoryLessonRepository;
    use crate::infrastructure::notification_channel::{InMemoryNotificationChannel, NotificationChannel};
    use crate::infrastructure::request_repository::InMemoryLessonRequestRepository;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps the in-memory store and fails status updates for chosen ids.
    #[derive(Default)]
    struct FlakyRequestRepository {
        inner: InMemoryLessonRequestRepository,
        failing_updates: Vec<String>,
    }

    #[async_trait]
    impl LessonRequestRepository for FlakyRequestRepository {
        async fn insert(&self, request: &LessonRequest) -> Result<(), InfraError> {
            self.inner.insert(request).await
        }

        async fn get(&self, request_id: &str) -> Result<Option<LessonRequest>, InfraError> {
            self.inner.get(request_id).await
        }

        async fn list_by_group(&self, group_id: &str) -> Result<Vec<LessonRequest>, InfraError> {
            self.inner.list_by_group(group_id).await
        }

        async fn list_for_tutor(
            &self,
            tutor_id: &str,
            status: Option<RequestStatus>,
        ) -> Result<Vec<LessonRequest>, InfraError> {
            self.inner.list_for_tutor(tutor_id, status).await
        }

        async fn update_status(&self, update: &StatusUpdate) -> Result<(), InfraError> {
            if self.failing_updates.contains(&update.request_id) {
                return Err(InfraError::NotFound(format!("simulated outage for {}", update.request_id)));
            }
            self.inner.update_status(update).await
        }

        async fn delete(&self, request_id: &str) -> Result<bool, InfraError> {
            self.inner.delete(request_id).await
        }
    }

    /// Fails lesson creation for chosen students and every delete.
    #[derive(Default)]
    struct FlakyLessonRepository {
        inner: InMemoryLessonRepository,
        failing_students: Vec<String>,
        fail_deletes: bool,
    }

    #[async_trait]
    impl LessonRepository for FlakyLessonRepository {
        async fn create(&self, lesson: &ScheduledLesson) -> Result<(), InfraError> {
            if self.failing_students.contains(&lesson.student_id) {
                return Err(InfraError::NotFound(format!("simulated outage for {}", lesson.student_id)));
            }
            self.inner.create(lesson).await
        }

        async fn get(&self, lesson_id: &str) -> Result<Option<ScheduledLesson>, InfraError> {
            self.inner.get(lesson_id).await
        }

        async fn delete(&self, lesson_id: &str) -> Result<bool, InfraError> {
            if self.fail_deletes {
                return Err(InfraError::NotFound(format!("simulated outage for {lesson_id}")));
            }
            self.inner.delete(lesson_id).await
        }

        async fn list_for_tutor(&self, tutor_id: &str) -> Result<Vec<ScheduledLesson>, InfraError> {
            self.inner.list_for_tutor(tutor_id).await
        }
    }

    fn created_at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T08:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn request(id: &str, group: Option<&str>, parent: &str) -> LessonRequest {
        LessonRequest {
            id: id.to_string(),
            tutor_id: "tutor-1".to_string(),
            parent_id: parent.to_string(),
            student_id: format!("student-{id}"),
            student_name: format!("Student {id}"),
            subject: Subject::Reading,
            preferred_date: NaiveDate::from_ymd_opt(2024, 3, 10).expect("date"),
            preferred_time: Some(14 * 60 + 15),
            preferred_duration_minutes: 100,
            notes: None,
            kind: RequestKind::DropIn,
            request_group_id: group.map(ToOwned::to_owned),
            status: RequestStatus::Pending,
            tutor_response: None,
            scheduled_lesson_id: None,
            created_at: created_at(),
        }
    }

    fn counting_ids() -> IdProvider {
        let counter = Arc::new(AtomicUsize::new(0));
        Arc::new(move |prefix: &str| format!("{prefix}-{}", counter.fetch_add(1, Ordering::Relaxed)))
    }

    struct Fixture {
        requests: Arc<FlakyRequestRepository>,
        lessons: Arc<FlakyLessonRepository>,
        channel: Arc<InMemoryNotificationChannel>,
        service: ApprovalService<FlakyRequestRepository, FlakyLessonRepository>,
    }

    async fn fixture(
        seeded: Vec<LessonRequest>,
        requests: FlakyRequestRepository,
        lessons: FlakyLessonRepository,
        channel: InMemoryNotificationChannel,
    ) -> Fixture {
        for request in &seeded {
            requests.insert(request).await.expect("seed request");
        }
        let requests = Arc::new(requests);
        let lessons = Arc::new(lessons);
        let channel = Arc::new(channel);
        let channels: Vec<Arc<dyn NotificationChannel>> = vec![channel.clone()];
        let service = ApprovalService::new(requests.clone(), lessons.clone(), NotificationOutbox::new(channels))
            .with_timezone(chrono_tz::America::New_York)
            .with_id_provider(counting_ids());
        Fixture {
            requests,
            lessons,
            channel,
            service,
        }
    }

    fn tutor() -> Actor {
        Actor::tutor("tutor-1")
    }

    #[test]
    fn local_start_uses_the_calendar_date_in_the_zone() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).expect("date");
        let start = local_start(chrono_tz::America::New_York, date, 23 * 60 + 30).expect("start");
        assert_eq!(start.to_rfc3339(), "2024-03-11T03:30:00+00:00");

        // 02:30 on the spring-forward date does not exist in New York.
        assert!(local_start(chrono_tz::America::New_York, date, 2 * 60 + 30).is_none());
        assert_eq!(
            local_start(Tz::UTC, date, 0).expect("midnight").to_rfc3339(),
            "2024-03-10T00:00:00+00:00"
        );
    }

    #[test]
    fn combined_duration_uses_floor_division() {
        assert_eq!(split_duration(100, 3), 33);
        assert_eq!(split_duration(90, 2), 45);
        assert_eq!(split_duration(60, 0), 0);
    }

    proptest! {
        #[test]
        fn split_never_exceeds_requested_total(total in 1u32..600, members in 1usize..8) {
            let each = split_duration(total, members);
            let assigned = each * members as u32;
            prop_assert!(assigned <= total);
            prop_assert!(total - assigned < members as u32);
        }
    }

    #[tokio::test]
    async fn approving_single_request_schedules_one_lesson() {
        let fixture = fixture(
            vec![request("r1", None, "parent-1")],
            FlakyRequestRepository::default(),
            FlakyLessonRepository::default(),
            InMemoryNotificationChannel::default(),
        )
        .await;

        let outcome = fixture
            .service
            .approve(&tutor(), &GroupKey::Standalone("r1".to_string()), Some(" See you ".to_string()), true)
            .await
            .expect("approve");

        assert_eq!(outcome.status, RequestStatus::Scheduled);
        assert_eq!(outcome.lessons.len(), 1);
        let lesson = &outcome.lessons[0];
        assert_eq!(lesson.duration_minutes, 100);
        assert_eq!(lesson.session_group_id, None);
        assert_eq!(lesson.scheduled_at.to_rfc3339(), "2024-03-10T18:15:00+00:00");

        let stored = fixture.requests.get("r1").await.expect("get").expect("request");
        assert_eq!(stored.status, RequestStatus::Scheduled);
        assert_eq!(stored.tutor_response.as_deref(), Some("See you"));
        assert_eq!(stored.scheduled_lesson_id.as_deref(), Some(lesson.id.as_str()));

        let delivered = fixture.channel.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].kind, NotificationKind::LessonApproved);
    }

    #[tokio::test]
    async fn combined_session_splits_duration_across_members() {
        let fixture = fixture(
            vec![
                request("r1", Some("g"), "parent-1"),
                request("r2", Some("g"), "parent-2"),
                request("r3", Some("g"), "parent-1"),
            ],
            FlakyRequestRepository::default(),
            FlakyLessonRepository::default(),
            InMemoryNotificationChannel::default(),
        )
        .await;

        let outcome = fixture
            .service
            .approve(&tutor(), &GroupKey::Combined("g".to_string()), None, true)
            .await
            .expect("approve");

        assert_eq!(outcome.updated_request_ids, vec!["r1", "r2", "r3"]);
        assert!(outcome.lessons.iter().all(|lesson| lesson.duration_minutes == 33));
        assert!(
            outcome
                .lessons
                .iter()
                .all(|lesson| lesson.session_group_id.as_deref() == Some("session-g"))
        );
        let stored = fixture.lessons.list_for_tutor("tutor-1").await.expect("lessons");
        assert_eq!(stored.len(), 3);
        assert_eq!(fixture.channel.delivered().len(), 2);
    }

    #[tokio::test]
    async fn approval_without_lesson_leaves_requests_approved() {
        let fixture = fixture(
            vec![request("r1", None, "parent-1")],
            FlakyRequestRepository::default(),
            FlakyLessonRepository::default(),
            InMemoryNotificationChannel::default(),
        )
        .await;

        let outcome = fixture
            .service
            .approve(&tutor(), &GroupKey::Standalone("r1".to_string()), None, false)
            .await
            .expect("approve");
        assert_eq!(outcome.status, RequestStatus::Approved);
        assert!(outcome.lessons.is_empty());
        assert!(fixture.lessons.list_for_tutor("tutor-1").await.expect("lessons").is_empty());
    }

    #[tokio::test]
    async fn rejecting_terminal_request_is_invalid_state_and_changes_nothing() {
        let mut rejected = request("r1", None, "parent-1");
        rejected.status = RequestStatus::Rejected;
        rejected.tutor_response = Some("full".to_string());
        let mut scheduled = request("r2", None, "parent-1");
        scheduled.status = RequestStatus::Scheduled;
        let fixture = fixture(
            vec![rejected.clone(), scheduled.clone()],
            FlakyRequestRepository::default(),
            FlakyLessonRepository::default(),
            InMemoryNotificationChannel::default(),
        )
        .await;

        for (id, original) in [("r1", rejected), ("r2", scheduled)] {
            let result = fixture
                .service
                .reject(&tutor(), &GroupKey::Standalone(id.to_string()), Some("again".to_string()))
                .await;
            assert!(matches!(result, Err(ScheduleError::InvalidState { .. })));
            assert_eq!(fixture.requests.get(id).await.expect("get"), Some(original));
        }
        assert!(fixture.channel.delivered().is_empty());
    }

    #[tokio::test]
    async fn group_with_one_decided_member_is_not_touched() {
        let mut decided = request("r2", Some("g"), "parent-1");
        decided.status = RequestStatus::Approved;
        let fixture = fixture(
            vec![request("r1", Some("g"), "parent-1"), decided],
            FlakyRequestRepository::default(),
            FlakyLessonRepository::default(),
            InMemoryNotificationChannel::default(),
        )
        .await;

        let result = fixture
            .service
            .approve(&tutor(), &GroupKey::Combined("g".to_string()), None, true)
            .await;
        assert!(matches!(
            result,
            Err(ScheduleError::InvalidState { ref request_id, .. }) if request_id == "r2"
        ));
        let first = fixture.requests.get("r1").await.expect("get").expect("request");
        assert_eq!(first.status, RequestStatus::Pending);
        assert!(fixture.lessons.list_for_tutor("tutor-1").await.expect("lessons").is_empty());
    }

    #[tokio::test]
    async fn combined_member_cannot_be_decided_on_its_own() {
        let fixture = fixture(
            vec![request("r1", Some("g"), "parent-1"), request("r2", Some("g"), "parent-2")],
            FlakyRequestRepository::default(),
            FlakyLessonRepository::default(),
            InMemoryNotificationChannel::default(),
        )
        .await;

        let approved = fixture
            .service
            .approve(&tutor(), &GroupKey::Standalone("r1".to_string()), None, true)
            .await;
        assert!(matches!(approved, Err(ScheduleError::Validation(_))));
        let rejected = fixture
            .service
            .reject(&tutor(), &GroupKey::Standalone("r2".to_string()), None)
            .await;
        assert!(matches!(rejected, Err(ScheduleError::Validation(_))));

        for id in ["r1", "r2"] {
            let stored = fixture.requests.get(id).await.expect("get").expect("request");
            assert_eq!(stored.status, RequestStatus::Pending);
        }
        assert!(fixture.lessons.list_for_tutor("tutor-1").await.expect("lessons").is_empty());
        assert!(fixture.channel.delivered().is_empty());

        let outcome = fixture
            .service
            .approve(&tutor(), &GroupKey::Combined("g".to_string()), None, true)
            .await
            .expect("approve session");
        assert!(outcome.lessons.iter().all(|lesson| lesson.duration_minutes == 50));
    }

    #[tokio::test]
    async fn partial_failure_reports_failed_members_without_rollback() {
        let fixture = fixture(
            vec![
                request("r1", Some("g"), "parent-1"),
                request("r2", Some("g"), "parent-2"),
                request("r3", Some("g"), "parent-3"),
            ],
            FlakyRequestRepository {
                failing_updates: vec!["r3".to_string()],
                ..FlakyRequestRepository::default()
            },
            FlakyLessonRepository {
                failing_students: vec!["student-r2".to_string()],
                ..FlakyLessonRepository::default()
            },
            InMemoryNotificationChannel::default(),
        )
        .await;

        let error = fixture
            .service
            .approve(&tutor(), &GroupKey::Combined("g".to_string()), None, true)
            .await
            .expect_err("partial failure");
        assert_eq!(error.failed_request_ids(), vec!["r2", "r3"]);
        match &error {
            ScheduleError::PartialGroupFailure { failed, succeeded } => {
                assert_eq!(failed[0].step, FailedStep::CreateLesson);
                assert_eq!(failed[1].step, FailedStep::UpdateStatus);
                assert_eq!(succeeded, &vec!["r1".to_string()]);
            }
            other => panic!("expected partial failure, got {other:?}"),
        }

        let r1 = fixture.requests.get("r1").await.expect("get").expect("r1");
        assert_eq!(r1.status, RequestStatus::Scheduled);
        let r2 = fixture.requests.get("r2").await.expect("get").expect("r2");
        assert_eq!(r2.status, RequestStatus::Pending);
        // r3's lesson was created before its status update failed and stays.
        assert_eq!(fixture.lessons.list_for_tutor("tutor-1").await.expect("lessons").len(), 2);
        let delivered = fixture.channel.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].parent_id, "parent-1");
    }

    #[tokio::test]
    async fn reschedule_approval_deletes_original_lesson() {
        let mut reschedule = request("r1", None, "parent-1");
        reschedule.kind = RequestKind::Reschedule {
            original_lesson_id: "lesson-old".to_string(),
        };
        let lessons = FlakyLessonRepository::default();
        lessons
            .inner
            .create(&ScheduledLesson {
                id: "lesson-old".to_string(),
                tutor_id: "tutor-1".to_string(),
                parent_id: "parent-1".to_string(),
                student_id: "student-r1".to_string(),
                subject: Subject::Reading,
                scheduled_at: created_at(),
                duration_minutes: 30,
                session_group_id: None,
                source_request_id: None,
                notes: None,
            })
            .await
            .expect("seed lesson");
        let fixture = fixture(
            vec![reschedule],
            FlakyRequestRepository::default(),
            lessons,
            InMemoryNotificationChannel::default(),
        )
        .await;

        let outcome = fixture
            .service
            .approve(&tutor(), &GroupKey::Standalone("r1".to_string()), None, true)
            .await
            .expect("approve");
        assert!(outcome.undeleted_original_lesson_ids.is_empty());
        assert!(fixture.lessons.get("lesson-old").await.expect("get").is_none());
        assert_eq!(fixture.lessons.list_for_tutor("tutor-1").await.expect("lessons").len(), 1);
    }

    #[tokio::test]
    async fn failed_original_delete_does_not_fail_approval() {
        let mut reschedule = request("r1", None, "parent-1");
        reschedule.kind = RequestKind::Reschedule {
            original_lesson_id: "lesson-old".to_string(),
        };
        let fixture = fixture(
            vec![reschedule],
            FlakyRequestRepository::default(),
            FlakyLessonRepository {
                fail_deletes: true,
                ..FlakyLessonRepository::default()
            },
            InMemoryNotificationChannel::default(),
        )
        .await;

        let outcome = fixture
            .service
            .approve(&tutor(), &GroupKey::Standalone("r1".to_string()), None, true)
            .await
            .expect("approve");
        assert_eq!(outcome.undeleted_original_lesson_ids, vec!["lesson-old"]);
        let stored = fixture.requests.get("r1").await.expect("get").expect("request");
        assert_eq!(stored.status, RequestStatus::Scheduled);
    }

    #[tokio::test]
    async fn notification_failure_never_fails_the_decision() {
        let fixture = fixture(
            vec![request("r1", None, "parent-1")],
            FlakyRequestRepository::default(),
            FlakyLessonRepository::default(),
            InMemoryNotificationChannel::failing_for(&["parent-1"]),
        )
        .await;

        let outcome = fixture
            .service
            .reject(&tutor(), &GroupKey::Standalone("r1".to_string()), Some("Fully booked".to_string()))
            .await
            .expect("reject");
        assert_eq!(outcome.status, RequestStatus::Rejected);
        assert_eq!(outcome.notification_failures.len(), 1);
        let stored = fixture.requests.get("r1").await.expect("get").expect("request");
        assert_eq!(stored.status, RequestStatus::Rejected);
        assert_eq!(stored.tutor_response.as_deref(), Some("Fully booked"));
    }

    #[tokio::test]
    async fn scheduling_needs_a_preferred_time_and_owner() {
        let mut untimed = request("r1", None, "parent-1");
        untimed.preferred_time = None;
        let fixture = fixture(
            vec![untimed],
            FlakyRequestRepository::default(),
            FlakyLessonRepository::default(),
            InMemoryNotificationChannel::default(),
        )
        .await;
        let target = GroupKey::Standalone("r1".to_string());

        assert!(matches!(
            fixture.service.approve(&Actor::tutor("tutor-2"), &target, None, true).await,
            Err(ScheduleError::Forbidden(_))
        ));
        assert!(matches!(
            fixture.service.approve(&tutor(), &target, None, true).await,
            Err(ScheduleError::MissingPreferredTime(_))
        ));
        fixture
            .service
            .approve(&tutor(), &target, None, false)
            .await
            .expect("approval without lesson needs no time");
        assert!(matches!(
            fixture
                .service
                .approve(&tutor(), &GroupKey::Standalone("missing".to_string()), None, false)
                .await,
            Err(ScheduleError::NotFound(_))
        ));
    }
}

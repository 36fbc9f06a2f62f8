use crate::application::approval::{ApprovalService, DecisionOutcome};
use crate::application::availability::{AvailabilityChange, AvailabilityService, SlotDraft};
use crate::application::bootstrap::bootstrap_workspace;
use crate::application::breaks::BreakService;
use crate::application::notifications::NotificationOutbox;
use crate::application::requests::RequestService;
use crate::application::slot_resolver::SlotResolver;
use crate::domain::grouping::{GroupKey, GroupedRequestView};
use crate::domain::models::{Actor, LessonRequest, NewLessonRequest, RequestKind, RequestStatus, ScheduleSlot, Subject};
use crate::domain::time_window::{
    DayOfWeek, TimeWindow, WindowAnchor, format_display_time, format_hhmm, parse_local_date, parse_time,
};
use crate::error::ScheduleError;
use crate::infrastructure::config::Settings;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::lesson_repository::SqliteLessonRepository;
use crate::infrastructure::notification_channel::{NotificationChannel, ReqwestEmailChannel, SqliteInAppChannel};
use crate::infrastructure::request_repository::SqliteLessonRequestRepository;
use crate::infrastructure::slot_repository::{SlotTable, SqliteSlotRepository};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

type Slots = SqliteSlotRepository;
type Requests = SqliteLessonRequestRepository;
type Lessons = SqliteLessonRepository;

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    settings: Settings,
    availability: AvailabilityService<Slots, Slots>,
    breaks: BreakService<Slots, Slots>,
    resolver: SlotResolver<Slots, Slots>,
    requests: RequestService<Requests, Slots, Slots>,
    approvals: ApprovalService<Requests, Lessons>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let settings = bootstrap.settings;
        let database_path = bootstrap.database_path;

        let availability_store = Arc::new(SqliteSlotRepository::new(&database_path, SlotTable::Availability));
        let break_store = Arc::new(SqliteSlotRepository::new(&database_path, SlotTable::Breaks));
        let request_store = Arc::new(SqliteLessonRequestRepository::new(&database_path));
        let lesson_store = Arc::new(SqliteLessonRepository::new(&database_path));
        let resolver = SlotResolver::new(availability_store.clone(), break_store.clone());
        let outbox = NotificationOutbox::new(notification_channels(&settings, &database_path)?);
        info!(channels = ?outbox.channel_names(), timezone = settings.timezone.name(), "app state ready");

        Ok(Self {
            availability: AvailabilityService::new(availability_store.clone(), break_store.clone())
                .with_orphaned_break_policy(settings.orphaned_break_policy),
            breaks: BreakService::new(availability_store, break_store)
                .with_default_break_minutes(settings.default_break_minutes),
            requests: RequestService::new(request_store.clone(), resolver.clone())
                .with_availability_enforcement(settings.enforce_availability_on_request),
            approvals: ApprovalService::new(request_store, lesson_store, outbox)
                .with_timezone(settings.timezone),
            resolver,
            config_dir: bootstrap.config_dir,
            database_path,
            logs_dir: bootstrap.logs_dir,
            settings,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Logs a failed command and returns the message shown to the user.
    pub fn command_error(&self, command: &str, error: &ScheduleError) -> String {
        let failed_request_ids = error.failed_request_ids();
        if failed_request_ids.is_empty() {
            error!(command, error = %error, "command failed");
        } else {
            error!(command, error = %error, failed_request_ids = ?failed_request_ids, "command partially failed");
        }
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        info!(command, message);
    }

    fn finish<T>(&self, command: &str, result: Result<T, ScheduleError>) -> Result<T, ScheduleError> {
        if let Err(error) = &result {
            self.command_error(command, error);
        }
        result
    }
}

fn notification_channels(
    settings: &Settings,
    database_path: &Path,
) -> Result<Vec<Arc<dyn NotificationChannel>>, InfraError> {
    let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();
    if settings.in_app_enabled {
        channels.push(Arc::new(SqliteInAppChannel::new(database_path)));
    }
    if let Some(endpoint) = &settings.email_endpoint {
        channels.push(Arc::new(ReqwestEmailChannel::new(
            endpoint.clone(),
            settings.email_api_key.clone(),
        )?));
    }
    Ok(channels)
}

/// Availability or break window as entered in the schedule form.
#[derive(Debug, Clone, Deserialize)]
pub struct SlotInput {
    pub id: Option<String>,
    pub tutor_id: String,
    pub day_of_week: Option<u8>,
    pub specific_date: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub notes: Option<String>,
}

/// A lesson request as entered by a parent.
#[derive(Debug, Clone, Deserialize)]
pub struct LessonRequestInput {
    pub tutor_id: String,
    pub student_id: String,
    pub student_name: String,
    pub subject: String,
    pub preferred_date: String,
    pub preferred_time: Option<String>,
    pub preferred_duration_minutes: u32,
    pub notes: Option<String>,
    pub request_type: String,
    pub original_lesson_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SlotResponse {
    pub id: String,
    pub tutor_id: String,
    pub day_of_week: Option<u8>,
    pub specific_date: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub label: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DayScheduleResponse {
    pub day: String,
    pub slots: Vec<SlotResponse>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AvailabilityChangeResponse {
    pub slot: SlotResponse,
    pub cascaded_break_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WindowResponse {
    pub start_time: String,
    pub end_time: String,
    pub display: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BookableWindowsResponse {
    pub tutor_id: String,
    pub date: String,
    pub day_of_week: String,
    pub windows: Vec<WindowResponse>,
    pub ignored_break_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimeAvailabilityResponse {
    pub available: bool,
    pub start_time: String,
    pub end_time: String,
}

fn to_slot_response(slot: &ScheduleSlot) -> SlotResponse {
    let (day_of_week, specific_date) = match slot.window.anchor() {
        WindowAnchor::Weekly(day) => (Some(day.index()), None),
        WindowAnchor::Date(date) => (None, Some(date.format("%Y-%m-%d").to_string())),
    };
    SlotResponse {
        id: slot.id.clone(),
        tutor_id: slot.tutor_id.clone(),
        day_of_week,
        specific_date,
        start_time: format_hhmm(slot.window.start_minute()),
        end_time: format_hhmm(slot.window.end_minute()),
        label: slot.window.to_string(),
        notes: slot.notes.clone(),
    }
}

fn to_day_responses(days: BTreeMap<WindowAnchor, Vec<ScheduleSlot>>) -> Vec<DayScheduleResponse> {
    days.into_iter()
        .map(|(anchor, slots)| DayScheduleResponse {
            day: anchor.to_string(),
            slots: slots.iter().map(to_slot_response).collect(),
        })
        .collect()
}

fn to_change_response(change: AvailabilityChange) -> AvailabilityChangeResponse {
    AvailabilityChangeResponse {
        slot: to_slot_response(&change.slot),
        cascaded_break_ids: change.cascaded_break_ids,
    }
}

fn to_window_response(window: &TimeWindow) -> WindowResponse {
    WindowResponse {
        start_time: format_hhmm(window.start_minute()),
        end_time: format_hhmm(window.end_minute()),
        display: format!(
            "{} - {}",
            format_display_time(window.start_minute()),
            format_display_time(window.end_minute())
        ),
    }
}

fn parse_slot_input(input: SlotInput) -> Result<SlotDraft, ScheduleError> {
    let specific_date = input
        .specific_date
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(parse_local_date)
        .transpose()?;
    let window = TimeWindow::from_parts(
        input.day_of_week,
        specific_date,
        parse_time(&input.start_time)?,
        parse_time(&input.end_time)?,
    )?;
    Ok(SlotDraft {
        id: input.id,
        tutor_id: required(&input.tutor_id, "tutor_id")?,
        window,
        notes: input.notes,
    })
}

fn parse_request_input(input: LessonRequestInput) -> Result<NewLessonRequest, ScheduleError> {
    let kind = match input.request_type.trim().to_ascii_lowercase().as_str() {
        "dropin" | "drop_in" => RequestKind::DropIn,
        "reschedule" => RequestKind::Reschedule {
            original_lesson_id: required(
                input.original_lesson_id.as_deref().unwrap_or_default(),
                "original_lesson_id",
            )?,
        },
        other => {
            return Err(ScheduleError::Validation(format!(
                "unsupported request_type: {other}"
            )));
        }
    };
    let preferred_time = input
        .preferred_time
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(parse_time)
        .transpose()?;

    Ok(NewLessonRequest {
        tutor_id: required(&input.tutor_id, "tutor_id")?,
        student_id: required(&input.student_id, "student_id")?,
        student_name: required(&input.student_name, "student_name")?,
        subject: input
            .subject
            .parse::<Subject>()
            .map_err(ScheduleError::Validation)?,
        preferred_date: parse_local_date(&input.preferred_date)?,
        preferred_time,
        preferred_duration_minutes: input.preferred_duration_minutes,
        notes: input.notes,
        kind,
    })
}

fn parse_target(request_id: Option<String>, group_id: Option<String>) -> Result<GroupKey, ScheduleError> {
    let request_id = request_id.map(|id| id.trim().to_string()).filter(|id| !id.is_empty());
    let group_id = group_id.map(|id| id.trim().to_string()).filter(|id| !id.is_empty());
    match (request_id, group_id) {
        (Some(request_id), None) => Ok(GroupKey::Standalone(request_id)),
        (None, Some(group_id)) => Ok(GroupKey::Combined(group_id)),
        _ => Err(ScheduleError::Validation(
            "exactly one of request_id or group_id is required".to_string(),
        )),
    }
}

fn parse_anchor(day_of_week: Option<u8>, specific_date: Option<String>) -> Result<WindowAnchor, ScheduleError> {
    let specific_date = specific_date
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(parse_local_date)
        .transpose()?;
    WindowAnchor::from_parts(day_of_week, specific_date)
}

fn required(value: &str, field: &str) -> Result<String, ScheduleError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ScheduleError::Validation(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

pub async fn upsert_availability_impl(
    state: &AppState,
    actor: &Actor,
    input: SlotInput,
) -> Result<AvailabilityChangeResponse, ScheduleError> {
    let result: Result<_, ScheduleError> = async {
        let draft = parse_slot_input(input)?;
        let change = state.availability.upsert(actor, draft).await?;
        state.log_info(
            "upsert_availability",
            &format!("saved availability_id={} window={}", change.slot.id, change.slot.window),
        );
        Ok(to_change_response(change))
    }
    .await;
    state.finish("upsert_availability", result)
}

pub async fn remove_availability_impl(
    state: &AppState,
    actor: &Actor,
    availability_id: String,
) -> Result<AvailabilityChangeResponse, ScheduleError> {
    let result: Result<_, ScheduleError> = async {
        let availability_id = required(&availability_id, "availability_id")?;
        let change = state.availability.remove(actor, &availability_id).await?;
        state.log_info(
            "remove_availability",
            &format!(
                "removed availability_id={} cascaded_breaks={}",
                change.slot.id,
                change.cascaded_break_ids.len()
            ),
        );
        Ok(to_change_response(change))
    }
    .await;
    state.finish("remove_availability", result)
}

pub async fn list_availability_impl(
    state: &AppState,
    tutor_id: String,
) -> Result<Vec<DayScheduleResponse>, ScheduleError> {
    let result: Result<_, ScheduleError> = async {
        let tutor_id = required(&tutor_id, "tutor_id")?;
        Ok(to_day_responses(state.availability.list_by_day(&tutor_id).await?))
    }
    .await;
    state.finish("list_availability", result)
}

pub async fn upsert_break_impl(
    state: &AppState,
    actor: &Actor,
    input: SlotInput,
) -> Result<SlotResponse, ScheduleError> {
    let result: Result<_, ScheduleError> = async {
        let draft = parse_slot_input(input)?;
        let slot = state.breaks.upsert(actor, draft).await?;
        state.log_info(
            "upsert_break",
            &format!("saved break_id={} window={}", slot.id, slot.window),
        );
        Ok(to_slot_response(&slot))
    }
    .await;
    state.finish("upsert_break", result)
}

pub async fn remove_break_impl(
    state: &AppState,
    actor: &Actor,
    break_id: String,
) -> Result<SlotResponse, ScheduleError> {
    let result: Result<_, ScheduleError> = async {
        let break_id = required(&break_id, "break_id")?;
        let slot = state.breaks.remove(actor, &break_id).await?;
        state.log_info("remove_break", &format!("removed break_id={}", slot.id));
        Ok(to_slot_response(&slot))
    }
    .await;
    state.finish("remove_break", result)
}

pub async fn list_breaks_impl(state: &AppState, tutor_id: String) -> Result<Vec<DayScheduleResponse>, ScheduleError> {
    let result: Result<_, ScheduleError> = async {
        let tutor_id = required(&tutor_id, "tutor_id")?;
        Ok(to_day_responses(state.breaks.list_by_day(&tutor_id).await?))
    }
    .await;
    state.finish("list_breaks", result)
}

pub async fn suggest_break_impl(
    state: &AppState,
    tutor_id: String,
    day_of_week: Option<u8>,
    specific_date: Option<String>,
    duration_minutes: Option<u16>,
) -> Result<Option<WindowResponse>, ScheduleError> {
    let result: Result<_, ScheduleError> = async {
        let tutor_id = required(&tutor_id, "tutor_id")?;
        let anchor = parse_anchor(day_of_week, specific_date)?;
        let suggestion = state.breaks.suggest(&tutor_id, anchor, duration_minutes).await?;
        Ok(suggestion.as_ref().map(to_window_response))
    }
    .await;
    state.finish("suggest_break", result)
}

pub async fn bookable_windows_impl(
    state: &AppState,
    tutor_id: String,
    date: String,
) -> Result<BookableWindowsResponse, ScheduleError> {
    let result: Result<_, ScheduleError> = async {
        let tutor_id = required(&tutor_id, "tutor_id")?;
        let date = parse_local_date(&date)?;
        let resolution = state.resolver.bookable_windows_for_date(&tutor_id, date).await?;
        Ok(BookableWindowsResponse {
            day_of_week: DayOfWeek::of_date(date).name().to_string(),
            date: date.format("%Y-%m-%d").to_string(),
            windows: resolution.windows.iter().map(to_window_response).collect(),
            ignored_break_ids: resolution.ignored_break_ids,
            tutor_id,
        })
    }
    .await;
    state.finish("bookable_windows", result)
}

pub async fn check_time_available_impl(
    state: &AppState,
    tutor_id: String,
    date: String,
    start_time: String,
    end_time: String,
) -> Result<TimeAvailabilityResponse, ScheduleError> {
    let result: Result<_, ScheduleError> = async {
        let tutor_id = required(&tutor_id, "tutor_id")?;
        let date = parse_local_date(&date)?;
        let start = parse_time(&start_time)?;
        let end = parse_time(&end_time)?;
        let available = state.resolver.is_time_available(&tutor_id, date, start, end).await?;
        Ok(TimeAvailabilityResponse {
            available,
            start_time: format_hhmm(start),
            end_time: format_hhmm(end),
        })
    }
    .await;
    state.finish("check_time_available", result)
}

pub async fn submit_request_impl(
    state: &AppState,
    actor: &Actor,
    input: LessonRequestInput,
) -> Result<LessonRequest, ScheduleError> {
    let result: Result<_, ScheduleError> = async {
        let request = parse_request_input(input)?;
        let stored = state.requests.submit(actor, request).await?;
        state.log_info("submit_request", &format!("created request_id={}", stored.id));
        Ok(stored)
    }
    .await;
    state.finish("submit_request", result)
}

pub async fn submit_combined_request_impl(
    state: &AppState,
    actor: &Actor,
    inputs: Vec<LessonRequestInput>,
) -> Result<Vec<LessonRequest>, ScheduleError> {
    let result: Result<_, ScheduleError> = async {
        let entries = inputs
            .into_iter()
            .map(parse_request_input)
            .collect::<Result<Vec<_>, _>>()?;
        let stored = state.requests.submit_combined(actor, entries).await?;
        let group_id = stored
            .first()
            .and_then(|request| request.request_group_id.clone())
            .unwrap_or_default();
        state.log_info(
            "submit_combined_request",
            &format!("created group_id={group_id} members={}", stored.len()),
        );
        Ok(stored)
    }
    .await;
    state.finish("submit_combined_request", result)
}

pub async fn delete_request_impl(state: &AppState, actor: &Actor, request_id: String) -> Result<bool, ScheduleError> {
    let result: Result<_, ScheduleError> = async {
        let request_id = required(&request_id, "request_id")?;
        state.requests.delete(actor, &request_id).await?;
        state.log_info("delete_request", &format!("deleted request_id={request_id}"));
        Ok(true)
    }
    .await;
    state.finish("delete_request", result)
}

pub async fn list_grouped_requests_impl(
    state: &AppState,
    actor: &Actor,
    tutor_id: String,
    status: Option<String>,
) -> Result<Vec<GroupedRequestView>, ScheduleError> {
    let result: Result<_, ScheduleError> = async {
        let tutor_id = required(&tutor_id, "tutor_id")?;
        let status = status
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::parse::<RequestStatus>)
            .transpose()
            .map_err(ScheduleError::Validation)?;
        state.requests.list_grouped(actor, &tutor_id, status).await
    }
    .await;
    state.finish("list_grouped_requests", result)
}

pub async fn approve_request_impl(
    state: &AppState,
    actor: &Actor,
    request_id: Option<String>,
    group_id: Option<String>,
    tutor_response: Option<String>,
    should_create_lesson: bool,
) -> Result<DecisionOutcome, ScheduleError> {
    let result: Result<_, ScheduleError> = async {
        let target = parse_target(request_id, group_id)?;
        let outcome = state
            .approvals
            .approve(actor, &target, tutor_response, should_create_lesson)
            .await?;
        state.log_info(
            "approve_request",
            &format!(
                "approved target={} status={} lessons={}",
                target.id(),
                outcome.status,
                outcome.lessons.len()
            ),
        );
        Ok(outcome)
    }
    .await;
    state.finish("approve_request", result)
}

pub async fn reject_request_impl(
    state: &AppState,
    actor: &Actor,
    request_id: Option<String>,
    group_id: Option<String>,
    reason: Option<String>,
) -> Result<DecisionOutcome, ScheduleError> {
    let result: Result<_, ScheduleError> = async {
        let target = parse_target(request_id, group_id)?;
        let outcome = state.approvals.reject(actor, &target, reason).await?;
        state.log_info(
            "reject_request",
            &format!(
                "rejected target={} members={}",
                target.id(),
                outcome.updated_request_ids.len()
            ),
        );
        Ok(outcome)
    }
    .await;
    state.finish("reject_request", result)
}

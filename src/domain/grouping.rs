use crate::domain::models::{LessonRequest, RequestStatus, Subject};
use crate::domain::time_window::optional_hhmm;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// How a reviewable unit is addressed: one request, or every request of a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum GroupKey {
    Standalone(String),
    Combined(String),
}

impl GroupKey {
    pub fn of(request: &LessonRequest) -> Self {
        match &request.request_group_id {
            Some(group_id) => Self::Combined(group_id.clone()),
            None => Self::Standalone(request.id.clone()),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Standalone(id) | Self::Combined(id) => id,
        }
    }
}

/// One card in the tutor's review list. Shared fields come from the first
/// member in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupedRequestView {
    pub key: GroupKey,
    pub members: Vec<LessonRequest>,
    pub student_names: Vec<String>,
    pub subjects: Vec<Subject>,
    pub preferred_date: NaiveDate,
    #[serde(with = "optional_hhmm")]
    pub preferred_time: Option<u16>,
    pub preferred_duration_minutes: u32,
    pub notes: Option<String>,
    pub status: RequestStatus,
    pub tutor_response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_combined_session: bool,
    /// Members whose preferred date or time differs from the first member.
    pub divergent_member_ids: Vec<String>,
}

impl GroupedRequestView {
    fn from_members(key: GroupKey, members: Vec<LessonRequest>) -> Option<Self> {
        let first = members.first()?.clone();

        let mut student_names: Vec<String> = Vec::new();
        let mut subjects: Vec<Subject> = Vec::new();
        for member in &members {
            if !student_names.contains(&member.student_name) {
                student_names.push(member.student_name.clone());
            }
            if !subjects.contains(&member.subject) {
                subjects.push(member.subject);
            }
        }
        let divergent_member_ids = members
            .iter()
            .filter(|member| {
                member.preferred_date != first.preferred_date
                    || member.preferred_time != first.preferred_time
            })
            .map(|member| member.id.clone())
            .collect();

        Some(Self {
            key,
            is_combined_session: members.len() > 1,
            student_names,
            subjects,
            preferred_date: first.preferred_date,
            preferred_time: first.preferred_time,
            preferred_duration_minutes: first.preferred_duration_minutes,
            notes: first.notes,
            status: first.status,
            tutor_response: first.tutor_response,
            created_at: first.created_at,
            divergent_member_ids,
            members,
        })
    }

    pub fn member_ids(&self) -> Vec<&str> {
        self.members.iter().map(|member| member.id.as_str()).collect()
    }
}

/// Partitions a flat request list into standalone and combined-session views,
/// newest first. Pure: the same input always yields the same output.
pub fn group_requests(requests: &[LessonRequest]) -> Vec<GroupedRequestView> {
    let mut order: Vec<(GroupKey, Vec<LessonRequest>)> = Vec::new();
    let mut group_index: HashMap<&str, usize> = HashMap::new();

    for request in requests {
        match request.request_group_id.as_deref() {
            Some(group_id) => match group_index.get(group_id) {
                Some(&index) => order[index].1.push(request.clone()),
                None => {
                    group_index.insert(group_id, order.len());
                    order.push((GroupKey::of(request), vec![request.clone()]));
                }
            },
            None => order.push((GroupKey::of(request), vec![request.clone()])),
        }
    }

    let mut views = order
        .into_iter()
        .filter_map(|(key, members)| GroupedRequestView::from_members(key, members))
        .collect::<Vec<_>>();
    views.sort_by(|left, right| right.created_at.cmp(&left.created_at));
    views
}

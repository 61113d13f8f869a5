use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::change_log::{display_bool, display_date, display_text, FieldValues, Tracked};
use crate::completeness::RequiredDocumentsPolicy;
use crate::domain::approval::ApprovalSlots;
use crate::domain::documents::SupportingDocuments;
use crate::domain::user::{Profession, UserId, UserRef};
use crate::event_log::{EntityRef, Loggable};
use crate::flows::states::RequestState;

pub const ENTITY_KIND: &str = "resourcing_request";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourcingRequestId(pub String);

impl ResourcingRequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    New,
    Extension,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Extension => "extension",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Extension => "Extension",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new" => Some(Self::New),
            "extension" => Some(Self::Extension),
            _ => None,
        }
    }
}

/// Editable request fields, as submitted by the requestor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDetails {
    pub request_type: RequestType,
    pub full_name: String,
    pub job_title: String,
    pub project_name: String,
    pub portfolio: String,
    pub profession: Profession,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// `None` until the IR35 determination has been made.
    pub is_ir35: Option<bool>,
    pub chief: Option<UserRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcingRequest {
    pub id: ResourcingRequestId,
    pub requestor: UserId,
    pub details: RequestDetails,
    pub state: RequestState,
    pub approvals: ApprovalSlots,
    pub documents: SupportingDocuments,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by every workflow commit. A commit only applies on top of the
    /// version it was built from.
    #[serde(default)]
    pub version: i64,
}

impl ResourcingRequest {
    pub fn new(requestor: UserId, details: RequestDetails, created_at: DateTime<Utc>) -> Self {
        Self {
            id: ResourcingRequestId::generate(),
            requestor,
            details,
            state: RequestState::Draft,
            approvals: ApprovalSlots::default(),
            documents: SupportingDocuments::default(),
            created_at,
            updated_at: created_at,
            version: 0,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.approvals.is_fully_approved()
    }

    pub fn can_update(&self) -> bool {
        matches!(self.state, RequestState::Draft | RequestState::Amending)
    }

    /// Supporting documents stay editable after approval so that paperwork
    /// needed for completion can still be replaced.
    pub fn can_update_documents(&self) -> bool {
        self.can_update() || self.state == RequestState::Approved
    }

    /// Whether everything needed for submission is present, whatever the state.
    pub fn is_complete(&self, policy: &RequiredDocumentsPolicy) -> bool {
        policy.is_complete_for_submission(self)
    }

    pub fn can_send_for_approval(&self, policy: &RequiredDocumentsPolicy) -> bool {
        self.state == RequestState::Draft && self.is_complete(policy)
    }

    pub fn can_amend(&self) -> bool {
        matches!(self.state, RequestState::AwaitingApprovals | RequestState::AmendmentsReview)
    }

    pub fn can_send_for_review(&self) -> bool {
        self.state == RequestState::Amending
    }

    pub fn can_finish_amendments_review(&self) -> bool {
        self.state == RequestState::AmendmentsReview
    }

    pub fn can_approve(&self) -> bool {
        self.state == RequestState::AwaitingApprovals && !self.is_approved()
    }

    pub fn can_clear_approval(&self) -> bool {
        self.state == RequestState::AmendmentsReview
    }

    pub fn can_mark_as_complete(&self, policy: &RequiredDocumentsPolicy) -> bool {
        self.state == RequestState::Approved && policy.is_complete_for_completion(self)
    }
}

impl Loggable for ResourcingRequest {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::new(ENTITY_KIND, self.id.0.clone())
    }
}

impl Tracked for RequestDetails {
    fn display_values(&self) -> FieldValues {
        FieldValues::from([
            ("type", display_text(self.request_type.label())),
            ("full_name", display_text(&self.full_name)),
            ("job_title", display_text(&self.job_title)),
            ("project_name", display_text(&self.project_name)),
            ("portfolio", display_text(&self.portfolio)),
            ("profession", display_text(&self.profession.name)),
            ("start_date", display_date(self.start_date)),
            ("end_date", display_date(self.end_date)),
            ("is_ir35", display_bool(self.is_ir35)),
            ("chief", self.chief.as_ref().map(|chief| chief.display_name.clone())),
        ])
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::{RequestDetails, RequestType, ResourcingRequest};
    use crate::change_log::diff;
    use crate::domain::user::{Profession, ProfessionId, UserId, UserRef};
    use crate::event_log::Loggable;
    use crate::flows::states::RequestState;

    fn details() -> RequestDetails {
        RequestDetails {
            request_type: RequestType::New,
            full_name: "Tess Contractor".to_string(),
            job_title: "Python Developer".to_string(),
            project_name: "Data platform".to_string(),
            portfolio: "Digital".to_string(),
            profession: Profession {
                id: ProfessionId("ddat".to_string()),
                name: "Digital, Data and Technology".to_string(),
            },
            start_date: NaiveDate::from_ymd_opt(2026, 4, 1).expect("valid date"),
            end_date: NaiveDate::from_ymd_opt(2026, 9, 30).expect("valid date"),
            is_ir35: Some(true),
            chief: Some(UserRef {
                id: UserId("u-chief".to_string()),
                display_name: "Chris Chief".to_string(),
            }),
        }
    }

    #[test]
    fn new_request_starts_in_draft_and_is_editable() {
        let request = ResourcingRequest::new(UserId("u-1".to_string()), details(), Utc::now());

        assert_eq!(request.state, RequestState::Draft);
        assert!(request.can_update());
        assert!(!request.can_approve());
        assert!(!request.can_amend());
        assert_eq!(request.entity_ref().kind, "resourcing_request");
    }

    #[test]
    fn guards_follow_state() {
        let mut request = ResourcingRequest::new(UserId("u-1".to_string()), details(), Utc::now());

        request.state = RequestState::AwaitingApprovals;
        assert!(!request.can_update());
        assert!(request.can_amend());
        assert!(request.can_approve());
        assert!(!request.can_clear_approval());

        request.state = RequestState::AmendmentsReview;
        assert!(request.can_amend());
        assert!(request.can_clear_approval());
        assert!(request.can_finish_amendments_review());
        assert!(!request.can_approve());

        request.state = RequestState::Amending;
        assert!(request.can_update());
        assert!(request.can_send_for_review());
    }

    #[test]
    fn details_are_tracked_by_display_label() {
        let before = details();
        let after = RequestDetails { is_ir35: Some(false), ..details() };

        let change = diff(
            crate::event_log::EntityRef::new("resourcing_request", "RR-1"),
            &before,
            &after,
            Utc::now(),
        )
        .expect("is_ir35 changed");
        assert_eq!(change.changes["is_ir35"].as_deref(), Some("Yes"));
    }
}

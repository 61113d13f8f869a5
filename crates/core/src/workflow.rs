//! Guarded request lifecycle operations.
//!
//! Every operation validates first and then returns a [`WorkflowCommit`]: the
//! updated request plus the records, events and notification jobs that must be
//! persisted together in one transaction.

use chrono::{DateTime, Utc};

use crate::completeness::RequiredDocumentsPolicy;
use crate::domain::approval::{Approval, ApprovalType};
use crate::domain::comment::Comment;
use crate::domain::documents::{DocumentKind, SupportingDocument};
use crate::domain::resourcing_request::{RequestDetails, ResourcingRequest};
use crate::domain::user::{Permission, User};
use crate::errors::DomainError;
use crate::event_log::{context, EntityRef, Event, EventContext, EventType};
use crate::flows::{
    FlowEngine, ResourcingFlow, WorkflowAction, WorkflowContext, WorkflowEvent,
};
use crate::notifications::NotificationJob;

const REQUEST_OBJECT: &str = "resourcing request";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocumentChange {
    Saved(SupportingDocument),
    Deleted(DocumentKind),
}

/// Everything one guarded operation writes, in a single unit of work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowCommit {
    pub request: ResourcingRequest,
    pub comment: Option<Comment>,
    pub approval: Option<Approval>,
    pub document: Option<DocumentChange>,
    pub events: Vec<Event>,
    pub jobs: Vec<NotificationJob>,
}

impl WorkflowCommit {
    pub(crate) fn new(mut request: ResourcingRequest) -> Self {
        request.version += 1;
        Self {
            request,
            comment: None,
            approval: None,
            document: None,
            events: Vec::new(),
            jobs: Vec::new(),
        }
    }

    /// The version the persisted row must still be at for this commit to apply.
    pub fn base_version(&self) -> i64 {
        self.request.version - 1
    }

    pub(crate) fn record(
        &mut self,
        actor: &User,
        event_type: EventType,
        event_context: &EventContext,
        timestamp: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let event =
            Event::build(&self.request, Some(actor.id.clone()), event_type, event_context, timestamp)?;
        self.events.push(event);
        Ok(())
    }
}

pub struct WorkflowService {
    flow: FlowEngine<ResourcingFlow>,
    policy: RequiredDocumentsPolicy,
}

impl WorkflowService {
    pub fn new(policy: RequiredDocumentsPolicy) -> Self {
        Self { flow: FlowEngine::default(), policy }
    }

    pub fn policy(&self) -> &RequiredDocumentsPolicy {
        &self.policy
    }

    pub fn create_request(
        &self,
        actor: &User,
        details: RequestDetails,
        now: DateTime<Utc>,
    ) -> Result<WorkflowCommit, DomainError> {
        if !actor.has_permission(Permission::AddResourcingRequest) {
            return Err(DomainError::PermissionDenied(
                "user cannot create resourcing requests".to_string(),
            ));
        }
        validate_details(&details)?;

        let request = ResourcingRequest::new(actor.id.clone(), details, now);
        let mut commit = WorkflowCommit::new(request);
        commit.record(actor, EventType::Created, &object_context(REQUEST_OBJECT), now)?;
        Ok(commit)
    }

    pub fn update_request(
        &self,
        actor: &User,
        request: &ResourcingRequest,
        details: RequestDetails,
        now: DateTime<Utc>,
    ) -> Result<WorkflowCommit, DomainError> {
        ensure_editor(actor, request)?;
        self.apply_edit(request)?;
        validate_details(&details)?;

        let mut updated = request.clone();
        updated.details = details;
        updated.updated_at = now;

        let mut commit = WorkflowCommit::new(updated);
        commit.record(actor, EventType::Updated, &object_context(REQUEST_OBJECT), now)?;
        Ok(commit)
    }

    /// The returned commit carries the `Deleted` event; its request is the one
    /// being removed.
    pub fn delete_request(
        &self,
        actor: &User,
        request: &ResourcingRequest,
        now: DateTime<Utc>,
    ) -> Result<WorkflowCommit, DomainError> {
        if actor.id != request.requestor && !actor.has_permission(Permission::DeleteResourcingRequest)
        {
            return Err(DomainError::PermissionDenied(
                "user cannot delete this resourcing request".to_string(),
            ));
        }
        self.apply_edit(request)?;

        let mut commit = WorkflowCommit::new(request.clone());
        commit.record(actor, EventType::Deleted, &object_context(REQUEST_OBJECT), now)?;
        Ok(commit)
    }

    pub fn save_document(
        &self,
        actor: &User,
        request: &ResourcingRequest,
        document: SupportingDocument,
        now: DateTime<Utc>,
    ) -> Result<WorkflowCommit, DomainError> {
        ensure_editor(actor, request)?;
        ensure_documents_editable(request)?;

        let kind = document.kind();
        let event_type =
            if request.documents.contains(kind) { EventType::Updated } else { EventType::Created };

        let mut updated = request.clone();
        updated.documents.insert(document.clone());
        updated.updated_at = now;

        let mut commit = WorkflowCommit::new(updated);
        commit.document = Some(DocumentChange::Saved(document));
        commit.record(actor, event_type, &object_context(&kind.label().to_lowercase()), now)?;
        Ok(commit)
    }

    pub fn delete_document(
        &self,
        actor: &User,
        request: &ResourcingRequest,
        kind: DocumentKind,
        now: DateTime<Utc>,
    ) -> Result<WorkflowCommit, DomainError> {
        ensure_editor(actor, request)?;
        ensure_documents_editable(request)?;

        let mut updated = request.clone();
        if updated.documents.remove(kind).is_none() {
            return Err(DomainError::InvalidInput(format!(
                "resourcing request has no {}",
                kind.label().to_lowercase()
            )));
        }
        updated.updated_at = now;

        let mut commit = WorkflowCommit::new(updated);
        commit.document = Some(DocumentChange::Deleted(kind));
        commit.record(actor, EventType::Deleted, &object_context(&kind.label().to_lowercase()), now)?;
        Ok(commit)
    }

    pub fn send_for_approval(
        &self,
        actor: &User,
        request: &ResourcingRequest,
        now: DateTime<Utc>,
    ) -> Result<WorkflowCommit, DomainError> {
        ensure_editor(actor, request)?;
        let workflow_context = WorkflowContext {
            missing_documents: self.policy.missing_for_submission(request),
            ..WorkflowContext::default()
        };
        self.transition(actor, request, WorkflowEvent::SendForApproval, &workflow_context, now)
    }

    pub fn amend(
        &self,
        actor: &User,
        request: &ResourcingRequest,
        now: DateTime<Utc>,
    ) -> Result<WorkflowCommit, DomainError> {
        ensure_editor(actor, request)?;
        self.transition(actor, request, WorkflowEvent::Amend, &WorkflowContext::default(), now)
    }

    pub fn send_for_review(
        &self,
        actor: &User,
        request: &ResourcingRequest,
        now: DateTime<Utc>,
    ) -> Result<WorkflowCommit, DomainError> {
        ensure_editor(actor, request)?;
        self.transition(actor, request, WorkflowEvent::SendForReview, &WorkflowContext::default(), now)
    }

    pub fn finish_amendments_review(
        &self,
        actor: &User,
        request: &ResourcingRequest,
        now: DateTime<Utc>,
    ) -> Result<WorkflowCommit, DomainError> {
        let actor_is_busops = actor.has_approval_permission(ApprovalType::Busops);
        if !actor_is_busops {
            return Err(DomainError::PermissionDenied(
                "only BusOps can finish reviewing amendments".to_string(),
            ));
        }
        let workflow_context = WorkflowContext { actor_is_busops, ..WorkflowContext::default() };
        self.transition(actor, request, WorkflowEvent::FinishAmendmentsReview, &workflow_context, now)
    }

    pub fn mark_as_complete(
        &self,
        actor: &User,
        request: &ResourcingRequest,
        now: DateTime<Utc>,
    ) -> Result<WorkflowCommit, DomainError> {
        ensure_editor(actor, request)?;
        let workflow_context = WorkflowContext {
            missing_documents: self.policy.missing_for_completion(request),
            ..WorkflowContext::default()
        };
        self.transition(actor, request, WorkflowEvent::MarkAsComplete, &workflow_context, now)
    }

    fn apply_edit(&self, request: &ResourcingRequest) -> Result<(), DomainError> {
        if self.flow.can_apply(&request.state, &WorkflowEvent::Edit, &WorkflowContext::default()) {
            return Ok(());
        }
        Err(DomainError::Precondition(format!(
            "resourcing request cannot be edited while {}",
            request.state.label().to_lowercase()
        )))
    }

    fn transition(
        &self,
        actor: &User,
        request: &ResourcingRequest,
        event: WorkflowEvent,
        workflow_context: &WorkflowContext,
        now: DateTime<Utc>,
    ) -> Result<WorkflowCommit, DomainError> {
        let outcome = self.flow.apply(&request.state, &event, workflow_context)?;

        let mut updated = request.clone();
        updated.state = outcome.to;
        updated.updated_at = now;

        let mut commit = WorkflowCommit::new(updated);
        if let Some(event_type) = event_type_for(event) {
            commit.record(actor, event_type, &EventContext::new(), now)?;
        }
        commit.jobs = jobs_for(&outcome.actions, &commit.request);
        Ok(commit)
    }
}

impl Default for WorkflowService {
    fn default() -> Self {
        Self::new(RequiredDocumentsPolicy::default())
    }
}

pub(crate) fn jobs_for(actions: &[WorkflowAction], request: &ResourcingRequest) -> Vec<NotificationJob> {
    let request_id = request.id.clone();
    actions
        .iter()
        .map(|action| match action {
            WorkflowAction::NotifyApprovers => {
                NotificationJob::NotifyApprovers { request_id: request_id.clone(), approval_id: None }
            }
            WorkflowAction::NotifyBusOpsOfAmendments => {
                NotificationJob::AmendmentsSubmitted { request_id: request_id.clone() }
            }
            WorkflowAction::NotifyRequestorAmendmentsReviewed => {
                NotificationJob::AmendmentsReviewed { request_id: request_id.clone() }
            }
            WorkflowAction::NotifyClearedApprovers => {
                NotificationJob::ReApproval { request_id: request_id.clone() }
            }
        })
        .collect()
}

fn event_type_for(event: WorkflowEvent) -> Option<EventType> {
    match event {
        WorkflowEvent::SendForApproval => Some(EventType::SentForApproval),
        WorkflowEvent::Amend => Some(EventType::Amending),
        WorkflowEvent::SendForReview => Some(EventType::SentForReview),
        WorkflowEvent::FinishAmendmentsReview => Some(EventType::ReviewedAmendments),
        WorkflowEvent::AllApprovalsGiven => Some(EventType::Approved),
        WorkflowEvent::MarkAsComplete => Some(EventType::Completed),
        WorkflowEvent::Edit => None,
    }
}

fn object_context(object: &str) -> EventContext {
    context([("object", object.to_string())])
}

/// Requestors edit their own requests; anyone else needs the change permission.
fn ensure_editor(actor: &User, request: &ResourcingRequest) -> Result<(), DomainError> {
    if actor.id == request.requestor || actor.has_permission(Permission::ChangeResourcingRequest) {
        return Ok(());
    }
    Err(DomainError::PermissionDenied("user cannot change this resourcing request".to_string()))
}

fn ensure_documents_editable(request: &ResourcingRequest) -> Result<(), DomainError> {
    if request.can_update_documents() {
        return Ok(());
    }
    Err(DomainError::Precondition(format!(
        "supporting documents cannot be changed while {}",
        request.state.label().to_lowercase()
    )))
}

fn validate_details(details: &RequestDetails) -> Result<(), DomainError> {
    if details.full_name.trim().is_empty() {
        return Err(DomainError::InvalidInput("full name is required".to_string()));
    }
    if details.job_title.trim().is_empty() {
        return Err(DomainError::InvalidInput("job title is required".to_string()));
    }
    if details.end_date < details.start_date {
        return Err(DomainError::InvalidInput("end date must not be before start date".to_string()));
    }
    Ok(())
}

/// Entity key for a supporting document's change history.
pub fn document_entity(request: &ResourcingRequest, kind: DocumentKind) -> EntityRef {
    EntityRef::new(kind.as_str(), request.id.0.clone())
}

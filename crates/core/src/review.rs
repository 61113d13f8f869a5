use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::approvals::ApprovalValidator;
use crate::domain::approval::{Approval, ApprovalType};
use crate::domain::comment::Comment;
use crate::domain::resourcing_request::ResourcingRequest;
use crate::domain::user::{Permission, User};
use crate::errors::DomainError;
use crate::event_log::{context, EventContext, EventType};
use crate::flows::{FlowEngine, ResourcingFlow, WorkflowContext, WorkflowEvent};
use crate::notifications::NotificationJob;
use crate::workflow::WorkflowCommit;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Reject,
    RequestChanges,
    Comment,
    ClearApproval,
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::RequestChanges => "request_changes",
            Self::Comment => "comment",
            Self::ClearApproval => "clear_approval",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            "request_changes" => Some(Self::RequestChanges),
            "comment" => Some(Self::Comment),
            "clear_approval" => Some(Self::ClearApproval),
            _ => None,
        }
    }

    fn decision(&self) -> Option<Option<bool>> {
        match self {
            Self::Approve => Some(Some(true)),
            Self::Reject => Some(Some(false)),
            Self::ClearApproval => Some(None),
            Self::RequestChanges | Self::Comment => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub action: ReviewAction,
    pub approval_type: Option<ApprovalType>,
    pub text: Option<String>,
}

impl Review {
    pub fn new(action: ReviewAction) -> Self {
        Self { action, approval_type: None, text: None }
    }

    pub fn with_approval_type(mut self, approval_type: ApprovalType) -> Self {
        self.approval_type = Some(approval_type);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    fn trimmed_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|text| !text.is_empty())
    }
}

/// Single entry point for approvals, rejections, clears and comments.
///
/// Every check runs before any record is built, so a failed review leaves the
/// request untouched.
pub struct ReviewService {
    flow: FlowEngine<ResourcingFlow>,
    validator: ApprovalValidator,
}

impl Default for ReviewService {
    fn default() -> Self {
        Self { flow: FlowEngine::default(), validator: ApprovalValidator }
    }
}

impl ReviewService {
    pub fn add_review(
        &self,
        actor: &User,
        request: &ResourcingRequest,
        review: &Review,
        now: DateTime<Utc>,
    ) -> Result<WorkflowCommit, DomainError> {
        self.validate(actor, request, review)?;

        let mut updated = request.clone();
        updated.updated_at = now;
        let mut commit = WorkflowCommit::new(updated);

        commit.comment = review
            .trimmed_text()
            .map(|text| Comment::new(request.id.clone(), actor.id.clone(), text, now));

        match (review.action.decision(), review.approval_type) {
            (Some(decision), Some(approval_type)) => {
                self.record_decision(&mut commit, actor, approval_type, decision, now)?;
            }
            (Some(_), None) => {
                return Err(DomainError::InvalidInput(
                    "an approval type is required for this action".to_string(),
                ));
            }
            (None, _) => {
                let comment_id = commit.comment.as_ref().map(|comment| comment.id.clone()).ok_or_else(
                    || DomainError::InvalidInput("comment text is required".to_string()),
                )?;
                commit.record(actor, EventType::Commented, &EventContext::new(), now)?;
                commit.jobs.push(NotificationJob::CommentLeft {
                    request_id: request.id.clone(),
                    comment_id,
                });
            }
        }

        Ok(commit)
    }

    fn validate(
        &self,
        actor: &User,
        request: &ResourcingRequest,
        review: &Review,
    ) -> Result<(), DomainError> {
        match review.action {
            ReviewAction::Approve | ReviewAction::Reject => {
                let approval_type = required_type(review)?;
                let authorization = self.validator.validate(actor, request, approval_type);
                if !authorization.allowed {
                    return Err(DomainError::PermissionDenied(authorization.reason));
                }
                if request.is_approved() {
                    return Err(DomainError::AlreadyApproved);
                }
                if !request.can_approve() {
                    return Err(DomainError::Precondition(
                        "the resourcing request cannot be approved".to_string(),
                    ));
                }
            }
            ReviewAction::ClearApproval => {
                required_type(review)?;
                if !actor.has_approval_permission(ApprovalType::Busops) {
                    return Err(DomainError::PermissionDenied(
                        "only BusOps can clear approvals".to_string(),
                    ));
                }
                if request.is_approved() {
                    return Err(DomainError::AlreadyApproved);
                }
                if !request.can_clear_approval() {
                    return Err(DomainError::Precondition(
                        "approvals can only be cleared while reviewing amendments".to_string(),
                    ));
                }
            }
            ReviewAction::RequestChanges | ReviewAction::Comment => {
                if !actor.has_permission(Permission::AddComment) {
                    return Err(DomainError::PermissionDenied("user cannot comment".to_string()));
                }
                if review.trimmed_text().is_none() {
                    return Err(DomainError::InvalidInput("comment text is required".to_string()));
                }
            }
        }
        Ok(())
    }

    fn record_decision(
        &self,
        commit: &mut WorkflowCommit,
        actor: &User,
        approval_type: ApprovalType,
        decision: Option<bool>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let approval = Approval::new(
            commit.request.id.clone(),
            approval_type,
            decision,
            actor.id.clone(),
            commit.comment.as_ref().map(|comment| comment.id.clone()),
            now,
        );
        commit.request.approvals.set(approval.clone());

        let event_type = match decision {
            Some(true) => EventType::GroupApproved,
            Some(false) => EventType::GroupRejected,
            None => EventType::ApprovalCleared,
        };
        commit.record(actor, event_type, &context([("group", approval_type.label().to_string())]), now)?;

        if decision == Some(true) && commit.request.is_approved() {
            let outcome = self.flow.apply(
                &commit.request.state,
                &WorkflowEvent::AllApprovalsGiven,
                &WorkflowContext { fully_approved: true, ..WorkflowContext::default() },
            )?;
            commit.request.state = outcome.to;
            commit.record(actor, EventType::Approved, &EventContext::new(), now)?;
        }

        let request_id = commit.request.id.clone();
        if decision == Some(true) {
            commit.jobs.push(NotificationJob::NotifyApprovers {
                request_id: request_id.clone(),
                approval_id: Some(approval.id.clone()),
            });
        }
        if decision.is_some() {
            commit.jobs.push(NotificationJob::ApprovalDecision {
                request_id,
                approval_id: approval.id.clone(),
            });
        }

        commit.approval = Some(approval);
        Ok(())
    }
}

fn required_type(review: &Review) -> Result<ApprovalType, DomainError> {
    review
        .approval_type
        .ok_or_else(|| DomainError::InvalidInput("an approval type is required for this action".to_string()))
}

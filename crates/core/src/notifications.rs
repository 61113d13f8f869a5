//! Deciding who hears about what.
//!
//! Jobs are queued inside the workflow transaction and planned later against
//! committed state, so running the same job twice, or jobs out of order, never
//! notifies a tier before every earlier tier has been decided.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::approvals::ApprovalOrder;
use crate::domain::approval::{Approval, ApprovalId, ApprovalType};
use crate::domain::comment::{Comment, CommentId};
use crate::domain::resourcing_request::{ResourcingRequest, ResourcingRequestId};
use crate::domain::user::{Permission, ProfessionId, User, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationScenario {
    ReadyForApproval,
    ApprovalDecision,
    Approved,
    Amended,
    AmendmentsReviewed,
    ReApproval,
    CommentLeft,
}

impl NotificationScenario {
    pub const ALL: [Self; 7] = [
        Self::ReadyForApproval,
        Self::ApprovalDecision,
        Self::Approved,
        Self::Amended,
        Self::AmendmentsReviewed,
        Self::ReApproval,
        Self::CommentLeft,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadyForApproval => "ready_for_approval",
            Self::ApprovalDecision => "approval_decision",
            Self::Approved => "approved",
            Self::Amended => "amended",
            Self::AmendmentsReviewed => "amendments_reviewed",
            Self::ReApproval => "re_approval",
            Self::CommentLeft => "comment_left",
        }
    }
}

/// Notify template identifier per scenario.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateIds {
    pub ready_for_approval: String,
    pub approval_decision: String,
    pub approved: String,
    pub amended: String,
    pub amendments_reviewed: String,
    pub re_approval: String,
    pub comment_left: String,
}

impl TemplateIds {
    pub fn template_for(&self, scenario: NotificationScenario) -> &str {
        match scenario {
            NotificationScenario::ReadyForApproval => &self.ready_for_approval,
            NotificationScenario::ApprovalDecision => &self.approval_decision,
            NotificationScenario::Approved => &self.approved,
            NotificationScenario::Amended => &self.amended,
            NotificationScenario::AmendmentsReviewed => &self.amendments_reviewed,
            NotificationScenario::ReApproval => &self.re_approval,
            NotificationScenario::CommentLeft => &self.comment_left,
        }
    }

    pub fn template_mut(&mut self, scenario: NotificationScenario) -> &mut String {
        match scenario {
            NotificationScenario::ReadyForApproval => &mut self.ready_for_approval,
            NotificationScenario::ApprovalDecision => &mut self.approval_decision,
            NotificationScenario::Approved => &mut self.approved,
            NotificationScenario::Amended => &mut self.amended,
            NotificationScenario::AmendmentsReviewed => &mut self.amendments_reviewed,
            NotificationScenario::ReApproval => &mut self.re_approval,
            NotificationScenario::CommentLeft => &mut self.comment_left,
        }
    }
}

/// Outbox payload. Recipients are derived when the job runs, not when it is queued.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationJob {
    /// `approval_id` is `None` for the initial submission.
    NotifyApprovers { request_id: ResourcingRequestId, approval_id: Option<ApprovalId> },
    ApprovalDecision { request_id: ResourcingRequestId, approval_id: ApprovalId },
    CommentLeft { request_id: ResourcingRequestId, comment_id: CommentId },
    AmendmentsSubmitted { request_id: ResourcingRequestId },
    AmendmentsReviewed { request_id: ResourcingRequestId },
    ReApproval { request_id: ResourcingRequestId },
}

impl NotificationJob {
    pub fn request_id(&self) -> &ResourcingRequestId {
        match self {
            Self::NotifyApprovers { request_id, .. }
            | Self::ApprovalDecision { request_id, .. }
            | Self::CommentLeft { request_id, .. }
            | Self::AmendmentsSubmitted { request_id }
            | Self::AmendmentsReviewed { request_id }
            | Self::ReApproval { request_id } => request_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotifyApprovers { .. } => "notify_approvers",
            Self::ApprovalDecision { .. } => "approval_decision",
            Self::CommentLeft { .. } => "comment_left",
            Self::AmendmentsSubmitted { .. } => "amendments_submitted",
            Self::AmendmentsReviewed { .. } => "amendments_reviewed",
            Self::ReApproval { .. } => "re_approval",
        }
    }

    pub fn approval_id(&self) -> Option<&ApprovalId> {
        match self {
            Self::NotifyApprovers { approval_id, .. } => approval_id.as_ref(),
            Self::ApprovalDecision { approval_id, .. } => Some(approval_id),
            _ => None,
        }
    }

    pub fn comment_id(&self) -> Option<&CommentId> {
        match self {
            Self::CommentLeft { comment_id, .. } => Some(comment_id),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Audience {
    Individual(UserId),
    Requestor,
    /// Users explicitly granted the permission, optionally restricted to a profession.
    PermissionHolders { permission: Permission, profession: Option<ProfessionId> },
}

impl Audience {
    pub fn includes(&self, user: &User, request: &ResourcingRequest) -> bool {
        match self {
            Self::Individual(id) => &user.id == id,
            Self::Requestor => user.id == request.requestor,
            Self::PermissionHolders { permission, profession } => {
                user.holds_permission(*permission)
                    && profession.as_ref().map_or(true, |required| user.profession.as_ref() == Some(required))
            }
        }
    }

    fn approvers(approval_type: ApprovalType, request: &ResourcingRequest) -> Option<Self> {
        match approval_type {
            ApprovalType::Chief => {
                request.details.chief.as_ref().map(|chief| Self::Individual(chief.id.clone()))
            }
            ApprovalType::HeadOfProfession => Some(Self::PermissionHolders {
                permission: Permission::GiveApproval(approval_type),
                profession: Some(request.details.profession.id.clone()),
            }),
            _ => Some(Self::PermissionHolders {
                permission: Permission::GiveApproval(approval_type),
                profession: None,
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedNotification {
    pub scenario: NotificationScenario,
    pub audience: Audience,
}

impl PlannedNotification {
    fn new(scenario: NotificationScenario, audience: Audience) -> Self {
        Self { scenario, audience }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub recipient: UserId,
    pub email_address: String,
    pub scenario: NotificationScenario,
    pub template_id: String,
    pub personalisation: BTreeMap<String, String>,
}

/// Committed records a job refers to.
#[derive(Clone, Copy, Debug)]
pub struct DispatchFacts<'a> {
    pub request: &'a ResourcingRequest,
    pub approval: Option<&'a Approval>,
    pub comment: Option<&'a Comment>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("notification job `{job}` refers to a missing {record}")]
    MissingRecord { job: &'static str, record: &'static str },
    #[error("notification job `{job}` belongs to a different resourcing request")]
    RequestMismatch { job: &'static str },
}

pub trait UserDirectory {
    fn find(&self, id: &UserId) -> Option<&User>;
    fn all(&self) -> Vec<&User>;
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryUserDirectory {
    users: BTreeMap<UserId, User>,
}

impl InMemoryUserDirectory {
    pub fn insert(&mut self, user: User) {
        self.users.insert(user.id.clone(), user);
    }
}

impl FromIterator<User> for InMemoryUserDirectory {
    fn from_iter<I: IntoIterator<Item = User>>(iter: I) -> Self {
        Self { users: iter.into_iter().map(|user| (user.id.clone(), user)).collect() }
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn find(&self, id: &UserId) -> Option<&User> {
        self.users.get(id)
    }

    fn all(&self) -> Vec<&User> {
        self.users.values().collect()
    }
}

pub fn resourcing_request_url(base_url: &str, id: &ResourcingRequestId) -> String {
    format!("{}/resourcing-request/{}/", base_url.trim_end_matches('/'), id.0)
}

#[derive(Clone, Debug)]
pub struct NotificationDispatcher {
    order: ApprovalOrder,
    templates: TemplateIds,
    site_base_url: String,
}

impl NotificationDispatcher {
    pub fn new(order: ApprovalOrder, templates: TemplateIds, site_base_url: impl Into<String>) -> Self {
        Self { order, templates, site_base_url: site_base_url.into() }
    }

    pub fn order(&self) -> &ApprovalOrder {
        &self.order
    }

    /// Works out which audiences a job addresses given the committed request.
    pub fn plan(
        &self,
        job: &NotificationJob,
        facts: &DispatchFacts<'_>,
    ) -> Result<Vec<PlannedNotification>, DispatchError> {
        if job.request_id() != &facts.request.id {
            return Err(DispatchError::RequestMismatch { job: job.kind() });
        }

        let plan = match job {
            NotificationJob::NotifyApprovers { approval_id: None, .. } => {
                self.initial_approvers(facts.request)
            }
            NotificationJob::NotifyApprovers { approval_id: Some(_), .. } => {
                let approval = self.approval_for(job, facts)?;
                self.ready_to_notify(facts.request, approval.approval_type)
            }
            NotificationJob::ApprovalDecision { .. } => {
                self.approval_for(job, facts)?;
                vec![PlannedNotification::new(
                    NotificationScenario::ApprovalDecision,
                    Audience::Requestor,
                )]
            }
            NotificationJob::CommentLeft { .. } => {
                self.comment_for(job, facts)?;
                vec![PlannedNotification::new(NotificationScenario::CommentLeft, Audience::Requestor)]
            }
            NotificationJob::AmendmentsSubmitted { .. } => vec![PlannedNotification::new(
                NotificationScenario::Amended,
                Audience::PermissionHolders {
                    permission: Permission::GiveApproval(ApprovalType::Busops),
                    profession: None,
                },
            )],
            NotificationJob::AmendmentsReviewed { .. } => vec![PlannedNotification::new(
                NotificationScenario::AmendmentsReviewed,
                Audience::Requestor,
            )],
            NotificationJob::ReApproval { .. } => facts
                .request
                .approvals
                .cleared_types()
                .into_iter()
                .filter_map(|approval_type| Audience::approvers(approval_type, facts.request))
                .map(|audience| PlannedNotification::new(NotificationScenario::ReApproval, audience))
                .collect(),
        };

        Ok(plan)
    }

    /// Resolves planned audiences to concrete, de-duplicated messages.
    pub fn dispatch<D>(
        &self,
        job: &NotificationJob,
        facts: &DispatchFacts<'_>,
        directory: &D,
    ) -> Result<Vec<OutboundMessage>, DispatchError>
    where
        D: UserDirectory + ?Sized,
    {
        let plan = self.plan(job, facts)?;
        let url = resourcing_request_url(&self.site_base_url, &facts.request.id);
        let users = directory.all();

        let mut seen = BTreeSet::new();
        let mut messages = Vec::new();
        for planned in plan {
            let extra = self.scenario_personalisation(planned.scenario, facts, directory);
            for user in users.iter().filter(|user| planned.audience.includes(user, facts.request)) {
                if user.email.trim().is_empty() || !seen.insert((planned.scenario, user.id.clone())) {
                    continue;
                }

                let mut personalisation = extra.clone();
                personalisation.insert("first_name".to_string(), user.first_name.clone());
                personalisation.insert("resourcing_request_url".to_string(), url.clone());

                messages.push(OutboundMessage {
                    recipient: user.id.clone(),
                    email_address: user.email.clone(),
                    scenario: planned.scenario,
                    template_id: self.templates.template_for(planned.scenario).to_string(),
                    personalisation,
                });
            }
        }

        Ok(messages)
    }

    fn initial_approvers(&self, request: &ResourcingRequest) -> Vec<PlannedNotification> {
        let Some(first_tier) = self.order.tiers().first() else {
            return Vec::new();
        };

        self.undecided_audiences(request, first_tier.iter().copied())
    }

    /// Audiences for the first open tier after the one holding `approval_type`,
    /// provided that tier and every tier before it are approved. An undecided
    /// or rejected slot holds dispatch back. A fully approved request notifies
    /// the requestor instead.
    pub fn ready_to_notify(
        &self,
        request: &ResourcingRequest,
        approval_type: ApprovalType,
    ) -> Vec<PlannedNotification> {
        if request.is_approved() {
            return vec![PlannedNotification::new(NotificationScenario::Approved, Audience::Requestor)];
        }

        let Some(index) = self.order.tier_index(approval_type) else {
            return Vec::new();
        };

        let approved = |approval_type: &ApprovalType| {
            request.approvals.decision(*approval_type) == Some(true)
        };
        let earlier_open = self.order.tiers()[..=index].iter().flatten().any(|t| !approved(t));
        if earlier_open {
            return Vec::new();
        }

        // A late decision on an earlier tier may find the next tier already
        // approved; the first tier still open is the one to notify.
        let next_open =
            self.order.tiers()[index + 1..].iter().find(|tier| !tier.iter().all(approved));
        match next_open {
            Some(tier) => self.undecided_audiences(request, tier.iter().copied()),
            None => Vec::new(),
        }
    }

    fn undecided_audiences(
        &self,
        request: &ResourcingRequest,
        approval_types: impl Iterator<Item = ApprovalType>,
    ) -> Vec<PlannedNotification> {
        approval_types
            .filter(|approval_type| !request.approvals.is_decided(*approval_type))
            .filter_map(|approval_type| Audience::approvers(approval_type, request))
            .map(|audience| PlannedNotification::new(NotificationScenario::ReadyForApproval, audience))
            .collect()
    }

    fn approval_for<'a>(
        &self,
        job: &NotificationJob,
        facts: &DispatchFacts<'a>,
    ) -> Result<&'a Approval, DispatchError> {
        let approval = facts
            .approval
            .filter(|approval| Some(&approval.id) == job.approval_id())
            .ok_or(DispatchError::MissingRecord { job: job.kind(), record: "approval" })?;
        if approval.resourcing_request_id != facts.request.id {
            return Err(DispatchError::RequestMismatch { job: job.kind() });
        }
        Ok(approval)
    }

    fn comment_for<'a>(
        &self,
        job: &NotificationJob,
        facts: &DispatchFacts<'a>,
    ) -> Result<&'a Comment, DispatchError> {
        let comment = facts
            .comment
            .filter(|comment| Some(&comment.id) == job.comment_id())
            .ok_or(DispatchError::MissingRecord { job: job.kind(), record: "comment" })?;
        if comment.resourcing_request_id != facts.request.id {
            return Err(DispatchError::RequestMismatch { job: job.kind() });
        }
        Ok(comment)
    }

    fn scenario_personalisation<D>(
        &self,
        scenario: NotificationScenario,
        facts: &DispatchFacts<'_>,
        directory: &D,
    ) -> BTreeMap<String, String>
    where
        D: UserDirectory + ?Sized,
    {
        let name_of = |id: &UserId| {
            directory.find(id).map(User::full_name).unwrap_or_else(|| id.0.clone())
        };

        let mut personalisation = BTreeMap::new();
        match scenario {
            NotificationScenario::ApprovalDecision => {
                if let Some(approval) = facts.approval {
                    personalisation.insert("approver".to_string(), name_of(&approval.user_id));
                    let decision =
                        if approval.approved == Some(true) { "approved" } else { "rejected" };
                    personalisation.insert("approved_or_rejected".to_string(), decision.to_string());
                }
            }
            NotificationScenario::CommentLeft => {
                if let Some(comment) = facts.comment {
                    personalisation.insert("commenter".to_string(), name_of(&comment.user_id));
                }
            }
            _ => {}
        }
        personalisation
    }
}

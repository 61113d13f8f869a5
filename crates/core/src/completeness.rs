//! Which supporting documents a request needs before it can move on.
//!
//! The IR35 determination always applies: inside IR35 needs a job description,
//! outside IR35 needs a valid statement of work, and an undetermined request is
//! incomplete. The remaining required kinds are configurable per gate.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::documents::DocumentKind;
use crate::domain::resourcing_request::ResourcingRequest;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredDocumentsPolicy {
    pub required_for_submission: BTreeSet<DocumentKind>,
    pub required_for_completion: BTreeSet<DocumentKind>,
}

impl Default for RequiredDocumentsPolicy {
    fn default() -> Self {
        let always = BTreeSet::from([
            DocumentKind::FinancialInformation,
            DocumentKind::InterimRequest,
            DocumentKind::CestDocument,
            DocumentKind::SdsStatusDetermination,
        ]);
        Self { required_for_submission: always.clone(), required_for_completion: always }
    }
}

impl RequiredDocumentsPolicy {
    pub fn new(
        required_for_submission: impl IntoIterator<Item = DocumentKind>,
        required_for_completion: impl IntoIterator<Item = DocumentKind>,
    ) -> Self {
        Self {
            required_for_submission: required_for_submission.into_iter().collect(),
            required_for_completion: required_for_completion.into_iter().collect(),
        }
    }

    pub fn missing_for_submission(&self, request: &ResourcingRequest) -> Vec<DocumentKind> {
        missing(&self.required_for_submission, request)
    }

    pub fn missing_for_completion(&self, request: &ResourcingRequest) -> Vec<DocumentKind> {
        missing(&self.required_for_completion, request)
    }

    pub fn is_complete_for_submission(&self, request: &ResourcingRequest) -> bool {
        self.missing_for_submission(request).is_empty()
    }

    pub fn is_complete_for_completion(&self, request: &ResourcingRequest) -> bool {
        self.missing_for_completion(request).is_empty()
    }
}

fn missing(required: &BTreeSet<DocumentKind>, request: &ResourcingRequest) -> Vec<DocumentKind> {
    let documents = &request.documents;
    let statement_of_work_valid =
        documents.statement_of_work().is_some_and(|statement| statement.is_valid());

    let mut missing: BTreeSet<DocumentKind> =
        required.iter().copied().filter(|kind| !documents.contains(*kind)).collect();

    match request.details.is_ir35 {
        Some(true) => {
            if !documents.contains(DocumentKind::JobDescription) {
                missing.insert(DocumentKind::JobDescription);
            }
        }
        Some(false) => {
            if !statement_of_work_valid {
                missing.insert(DocumentKind::StatementOfWork);
            }
        }
        None => {
            missing.insert(DocumentKind::JobDescription);
            missing.insert(DocumentKind::StatementOfWork);
        }
    }

    if required.contains(&DocumentKind::StatementOfWork) && !statement_of_work_valid {
        missing.insert(DocumentKind::StatementOfWork);
    }

    missing.into_iter().collect()
}

//! Supporting documents owned by a resourcing request.
//!
//! A request holds at most one document of each [`DocumentKind`]. Documents are
//! deleted together with their request.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::change_log::{
    display_bool, display_date, display_money, display_optional_text, display_text, FieldValues,
    Tracked,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    FinancialInformation,
    JobDescription,
    StatementOfWork,
    InterimRequest,
    CestRationale,
    CestDocument,
    SdsStatusDetermination,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 7] = [
        Self::FinancialInformation,
        Self::JobDescription,
        Self::StatementOfWork,
        Self::InterimRequest,
        Self::CestRationale,
        Self::CestDocument,
        Self::SdsStatusDetermination,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FinancialInformation => "financial_information",
            Self::JobDescription => "job_description",
            Self::StatementOfWork => "statement_of_work",
            Self::InterimRequest => "interim_request",
            Self::CestRationale => "cest_rationale",
            Self::CestDocument => "cest_document",
            Self::SdsStatusDetermination => "sds_status_determination",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::FinancialInformation => "Financial information",
            Self::JobDescription => "Job description",
            Self::StatementOfWork => "Statement of work",
            Self::InterimRequest => "Interim request",
            Self::CestRationale => "CEST rationale",
            Self::CestDocument => "CEST document",
            Self::SdsStatusDetermination => "SDS status determination",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let key = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.as_str() == key)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaOfWork {
    Ddat,
    NonDdat,
}

impl AreaOfWork {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ddat => "DDaT",
            Self::NonDdat => "Non-DDaT",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialInformation {
    pub group: String,
    pub directorate: String,
    pub cost_centre_code: String,
    pub team: String,
    pub programme_code: Option<String>,
    pub area_of_work: AreaOfWork,
    pub total_budget: Decimal,
    pub min_day_rate: Option<Decimal>,
    pub max_day_rate: Option<Decimal>,
    pub days_required: Option<u32>,
    pub project_fees: Option<Decimal>,
    pub timesheet_and_expenses_validator: String,
}

impl Tracked for FinancialInformation {
    fn display_values(&self) -> FieldValues {
        FieldValues::from([
            ("group", display_text(&self.group)),
            ("directorate", display_text(&self.directorate)),
            ("cost_centre_code", display_text(&self.cost_centre_code)),
            ("team", display_text(&self.team)),
            ("programme_code", display_optional_text(self.programme_code.as_deref())),
            ("area_of_work", display_text(self.area_of_work.label())),
            ("total_budget", display_money(Some(self.total_budget))),
            ("min_day_rate", display_money(self.min_day_rate)),
            ("max_day_rate", display_money(self.max_day_rate)),
            ("days_required", self.days_required.map(|days| days.to_string())),
            ("project_fees", display_money(self.project_fees)),
            (
                "timesheet_and_expenses_validator",
                display_text(&self.timesheet_and_expenses_validator),
            ),
        ])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescription {
    pub role_description: String,
}

impl Tracked for JobDescription {
    fn display_values(&self) -> FieldValues {
        FieldValues::from([("role_description", display_text(&self.role_description))])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliverable {
    pub title: String,
    pub description: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub monthly_fee: Decimal,
    pub payment_date: NaiveDate,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementOfWorkModule {
    pub title: String,
    pub completion_date: NaiveDate,
    pub deliverables: Vec<Deliverable>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementOfWork {
    pub company_name: String,
    pub company_address: String,
    pub hiring_manager: String,
    pub project_description: String,
    pub notice_period: String,
    pub fees: Decimal,
    pub exceptional_expenses: Option<String>,
    pub modules: Vec<StatementOfWorkModule>,
}

impl StatementOfWork {
    /// At least one module, and every module carries at least one deliverable.
    pub fn is_valid(&self) -> bool {
        !self.modules.is_empty() && self.modules.iter().all(|module| !module.deliverables.is_empty())
    }
}

impl Tracked for StatementOfWork {
    fn display_values(&self) -> FieldValues {
        let deliverables: usize = self.modules.iter().map(|module| module.deliverables.len()).sum();
        FieldValues::from([
            ("company_name", display_text(&self.company_name)),
            ("company_address", display_text(&self.company_address)),
            ("hiring_manager", display_text(&self.hiring_manager)),
            ("project_description", display_text(&self.project_description)),
            ("notice_period", display_text(&self.notice_period)),
            ("fees", display_money(Some(self.fees))),
            ("exceptional_expenses", display_optional_text(self.exceptional_expenses.as_deref())),
            ("modules", Some(self.modules.len().to_string())),
            ("deliverables", Some(deliverables.to_string())),
        ])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CivilServantGrade {
    Ao,
    Eo,
    Heo,
    Seo,
    G7,
    G6,
    Scs1,
    Scs2,
}

impl CivilServantGrade {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ao => "AO",
            Self::Eo => "EO",
            Self::Heo => "HEO",
            Self::Seo => "SEO",
            Self::G7 => "G7",
            Self::G6 => "G6",
            Self::Scs1 => "SCS1",
            Self::Scs2 => "SCS2",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Supplier {
    GreenPark,
    Other,
}

impl Supplier {
    pub fn label(&self) -> &'static str {
        match self {
            Self::GreenPark => "Green Park",
            Self::Other => "Other",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterimRequest {
    pub uk_based: bool,
    pub overseas_country: Option<String>,
    pub security_clearance: String,
    pub contractor_type: String,
    pub equivalent_civil_servant_grade: CivilServantGrade,
    pub supplier: Supplier,
    pub business_case: String,
    pub impact_if_not_approved: String,
    pub main_reason: String,
}

impl Tracked for InterimRequest {
    fn display_values(&self) -> FieldValues {
        FieldValues::from([
            ("uk_based", display_bool(Some(self.uk_based))),
            ("overseas_country", display_optional_text(self.overseas_country.as_deref())),
            ("security_clearance", display_text(&self.security_clearance)),
            ("contractor_type", display_text(&self.contractor_type)),
            (
                "equivalent_civil_servant_grade",
                display_text(self.equivalent_civil_servant_grade.label()),
            ),
            ("supplier", display_text(self.supplier.label())),
            ("business_case", display_text(&self.business_case)),
            ("impact_if_not_approved", display_text(&self.impact_if_not_approved)),
            ("main_reason", display_text(&self.main_reason)),
        ])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CestRationale {
    pub rationale: String,
    pub worker_has_substitution_right: Option<bool>,
}

impl Tracked for CestRationale {
    fn display_values(&self) -> FieldValues {
        FieldValues::from([
            ("rationale", display_text(&self.rationale)),
            ("worker_has_substitution_right", display_bool(self.worker_has_substitution_right)),
        ])
    }
}

/// Uploaded CEST result. The file itself lives in external storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CestDocument {
    pub file_name: String,
    pub storage_key: String,
}

impl Tracked for CestDocument {
    fn display_values(&self) -> FieldValues {
        FieldValues::from([("file_name", display_text(&self.file_name))])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdsStatusDetermination {
    pub company_name: String,
    pub worker_name: String,
    pub agency: String,
    pub contract_start_date: NaiveDate,
    pub contract_end_date: NaiveDate,
    pub on_behalf_of: String,
    pub date_completed: NaiveDate,
    pub reasons: String,
}

impl Tracked for SdsStatusDetermination {
    fn display_values(&self) -> FieldValues {
        FieldValues::from([
            ("company_name", display_text(&self.company_name)),
            ("worker_name", display_text(&self.worker_name)),
            ("agency", display_text(&self.agency)),
            ("contract_start_date", display_date(self.contract_start_date)),
            ("contract_end_date", display_date(self.contract_end_date)),
            ("on_behalf_of", display_text(&self.on_behalf_of)),
            ("date_completed", display_date(self.date_completed)),
            ("reasons", display_text(&self.reasons)),
        ])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum SupportingDocument {
    FinancialInformation(FinancialInformation),
    JobDescription(JobDescription),
    StatementOfWork(StatementOfWork),
    InterimRequest(InterimRequest),
    CestRationale(CestRationale),
    CestDocument(CestDocument),
    SdsStatusDetermination(SdsStatusDetermination),
}

impl SupportingDocument {
    pub fn kind(&self) -> DocumentKind {
        match self {
            Self::FinancialInformation(_) => DocumentKind::FinancialInformation,
            Self::JobDescription(_) => DocumentKind::JobDescription,
            Self::StatementOfWork(_) => DocumentKind::StatementOfWork,
            Self::InterimRequest(_) => DocumentKind::InterimRequest,
            Self::CestRationale(_) => DocumentKind::CestRationale,
            Self::CestDocument(_) => DocumentKind::CestDocument,
            Self::SdsStatusDetermination(_) => DocumentKind::SdsStatusDetermination,
        }
    }
}

impl Tracked for SupportingDocument {
    fn display_values(&self) -> FieldValues {
        match self {
            Self::FinancialInformation(document) => document.display_values(),
            Self::JobDescription(document) => document.display_values(),
            Self::StatementOfWork(document) => document.display_values(),
            Self::InterimRequest(document) => document.display_values(),
            Self::CestRationale(document) => document.display_values(),
            Self::CestDocument(document) => document.display_values(),
            Self::SdsStatusDetermination(document) => document.display_values(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportingDocuments {
    documents: BTreeMap<DocumentKind, SupportingDocument>,
}

impl SupportingDocuments {
    pub fn get(&self, kind: DocumentKind) -> Option<&SupportingDocument> {
        self.documents.get(&kind)
    }

    pub fn contains(&self, kind: DocumentKind) -> bool {
        self.documents.contains_key(&kind)
    }

    /// Stores the document, replacing any earlier one of the same kind.
    pub fn insert(&mut self, document: SupportingDocument) -> Option<SupportingDocument> {
        self.documents.insert(document.kind(), document)
    }

    pub fn remove(&mut self, kind: DocumentKind) -> Option<SupportingDocument> {
        self.documents.remove(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = DocumentKind> + '_ {
        self.documents.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SupportingDocument> {
        self.documents.values()
    }

    pub fn statement_of_work(&self) -> Option<&StatementOfWork> {
        match self.get(DocumentKind::StatementOfWork) {
            Some(SupportingDocument::StatementOfWork(statement)) => Some(statement),
            _ => None,
        }
    }

    pub fn financial_information(&self) -> Option<&FinancialInformation> {
        match self.get(DocumentKind::FinancialInformation) {
            Some(SupportingDocument::FinancialInformation(information)) => Some(information),
            _ => None,
        }
    }
}

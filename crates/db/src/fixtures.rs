use std::collections::BTreeSet;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;

use resourcing_core::domain::approval::ApprovalType;
use resourcing_core::domain::documents::{
    AreaOfWork, CestDocument, CivilServantGrade, Deliverable, FinancialInformation,
    InterimRequest, JobDescription, SdsStatusDetermination, StatementOfWork,
    StatementOfWorkModule, Supplier, SupportingDocument,
};
use resourcing_core::domain::resourcing_request::{
    RequestDetails, RequestType, ResourcingRequest, ResourcingRequestId,
};
use resourcing_core::domain::user::{Permission, Profession, ProfessionId, User, UserId, UserRef};
use resourcing_core::event_log::{context, Event, EventType};
use resourcing_core::flows::RequestState;
use resourcing_core::workflow::{WorkflowCommit, WorkflowService};

use crate::connection::DbPool;
use crate::repositories::{
    RepositoryError, ResourcingRequestRepository, SqlResourcingRequestRepository,
    SqlUserRepository, UserRepository,
};

const SEED_PROFESSIONS: &[(&str, &str)] = &[
    ("ddat", "Digital, Data and Technology"),
    ("policy", "Policy"),
    ("finance", "Finance"),
];

const SEED_REQUESTOR_ID: &str = "seed-requestor";
const SEED_CHIEF_ID: &str = "seed-chief";

/// Deterministic requests covering both IR35 outcomes.
const SEED_REQUESTS: &[SeedRequestContract] = &[
    SeedRequestContract {
        id: "seed-request-inside-ir35",
        full_name: "Tess Contractor",
        job_title: "Python Developer",
        is_ir35: true,
        send_for_approval: false,
        state: RequestState::Draft,
        description: "Inside IR35 with a job description - draft",
    },
    SeedRequestContract {
        id: "seed-request-outside-ir35",
        full_name: "Sam Consultant",
        job_title: "Delivery Manager",
        is_ir35: false,
        send_for_approval: true,
        state: RequestState::AwaitingApprovals,
        description: "Outside IR35 with a statement of work - awaiting approvals",
    },
];

/// Seed dataset for local environments and end-to-end tests: professions, one
/// approver per approval type, a requestor and two complete requests.
pub struct SeedDataset;

impl SeedDataset {
    /// Safe to run repeatedly. Users are upserted and existing requests are left alone.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let users = SqlUserRepository::new(pool.clone());
        let requests = SqlResourcingRequestRepository::new(pool.clone());
        let workflow = WorkflowService::default();

        for profession in seed_professions() {
            users.save_profession(&profession).await?;
        }
        let requestor = seed_requestor();
        users.save(&requestor).await?;
        let approvers = seed_approvers();
        for user in &approvers {
            users.save(user).await?;
        }

        let mut requests_seeded = Vec::with_capacity(SEED_REQUESTS.len());
        for contract in SEED_REQUESTS {
            let id = ResourcingRequestId(contract.id.to_string());
            if requests.find_by_id(&id).await?.is_none() {
                for commit in contract.commits(&workflow, &requestor)? {
                    requests.commit(&commit).await?;
                }
            }
            requests_seeded.push(RequestSeedInfo {
                request_id: contract.id,
                description: contract.description,
            });
        }

        Ok(SeedResult { requests_seeded, users_seeded: 1 + approvers.len() })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let profession_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM profession WHERE id IN {}",
            sql_array_from_ids(&SEED_PROFESSIONS.iter().map(|(id, _)| *id).collect::<Vec<_>>())
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("professions", profession_count == SEED_PROFESSIONS.len() as i64));

        for approval_type in ApprovalType::ALL {
            let approver_count: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM user_permission WHERE codename = ?1",
            )
            .bind(Permission::GiveApproval(approval_type).codename())
            .fetch_one(pool)
            .await?;
            checks.push((approval_type.as_str(), approver_count >= 1));
        }

        let requests = SqlResourcingRequestRepository::new(pool.clone());
        let workflow = WorkflowService::default();
        for contract in SEED_REQUESTS {
            let request =
                requests.find_by_id(&ResourcingRequestId(contract.id.to_string())).await?;
            let matches = request.is_some_and(|request| {
                request.state == contract.state
                    && request.details.is_ir35 == Some(contract.is_ir35)
                    && request.is_complete(workflow.policy())
            });
            checks.push((contract.id, matches));

            let created: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM event WHERE entity_id = ?1 AND event_type = ?2)",
            )
            .bind(contract.id)
            .bind(EventType::Created.code())
            .fetch_one(pool)
            .await?;
            checks.push((contract.created_label(), created == 1));
        }

        let all_present = checks.iter().all(|(_, passed)| *passed);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes seeded requests and their history. Users and professions stay.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let ids = SEED_REQUESTS.iter().map(|contract| contract.id).collect::<Vec<_>>();
        let quoted = sql_array_from_ids(&ids);
        let mut tx = pool.begin().await?;

        sqlx::query(&format!("DELETE FROM notification_task WHERE resourcing_request_id IN {quoted}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM event WHERE entity_id IN {quoted}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM change_record WHERE entity_id IN {quoted}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM resourcing_request WHERE id IN {quoted}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedRequestContract {
    id: &'static str,
    full_name: &'static str,
    job_title: &'static str,
    is_ir35: bool,
    send_for_approval: bool,
    state: RequestState,
    description: &'static str,
}

impl SeedRequestContract {
    fn created_label(&self) -> &'static str {
        if self.is_ir35 {
            "event-inside-ir35-created"
        } else {
            "event-outside-ir35-created"
        }
    }

    fn details(&self) -> RequestDetails {
        RequestDetails {
            request_type: RequestType::New,
            full_name: self.full_name.to_string(),
            job_title: self.job_title.to_string(),
            project_name: "Trade data platform".to_string(),
            portfolio: "Digital".to_string(),
            profession: Profession {
                id: ProfessionId("ddat".to_string()),
                name: "Digital, Data and Technology".to_string(),
            },
            start_date: date(2026, 4, 1),
            end_date: date(2026, 9, 30),
            is_ir35: Some(self.is_ir35),
            chief: Some(UserRef {
                id: UserId(SEED_CHIEF_ID.to_string()),
                display_name: "Chris Chief".to_string(),
            }),
        }
    }

    /// Create, attach documents and optionally submit. Seeding never queues
    /// notifications.
    fn commits(
        &self,
        workflow: &WorkflowService,
        requestor: &User,
    ) -> Result<Vec<WorkflowCommit>, RepositoryError> {
        let mut request = ResourcingRequest::new(requestor.id.clone(), self.details(), seeded_at(0));
        request.id = ResourcingRequestId(self.id.to_string());

        let created = Event::build(
            &request,
            Some(requestor.id.clone()),
            EventType::Created,
            &context([("object", "resourcing request".to_string())]),
            seeded_at(0),
        )
        .map_err(resourcing_core::errors::DomainError::from)?;
        let mut commits = vec![WorkflowCommit {
            request: request.clone(),
            comment: None,
            approval: None,
            document: None,
            events: vec![created],
            jobs: Vec::new(),
        }];

        for (offset, document) in self.documents().into_iter().enumerate() {
            let commit =
                workflow.save_document(requestor, &request, document, seeded_at(1 + offset as i64))?;
            request = commit.request.clone();
            commits.push(commit);
        }

        if self.send_for_approval {
            let mut commit = workflow.send_for_approval(requestor, &request, seeded_at(30))?;
            commit.jobs.clear();
            commits.push(commit);
        }

        Ok(commits)
    }

    fn documents(&self) -> Vec<SupportingDocument> {
        let determination = if self.is_ir35 {
            SupportingDocument::JobDescription(JobDescription {
                role_description: "Build and maintain data pipelines".to_string(),
            })
        } else {
            SupportingDocument::StatementOfWork(StatementOfWork {
                company_name: "Consulting Ltd".to_string(),
                company_address: "1 High Street, London".to_string(),
                hiring_manager: "Hana Okafor".to_string(),
                project_description: "Discovery for the trade data platform".to_string(),
                notice_period: "4 weeks".to_string(),
                fees: Decimal::new(48_000, 0),
                exceptional_expenses: None,
                modules: vec![StatementOfWorkModule {
                    title: "Discovery".to_string(),
                    completion_date: date(2026, 6, 30),
                    deliverables: vec![Deliverable {
                        title: "Discovery report".to_string(),
                        description: "User research findings and recommendations".to_string(),
                        start_date: date(2026, 4, 1),
                        end_date: date(2026, 6, 30),
                        monthly_fee: Decimal::new(16_000, 0),
                        payment_date: date(2026, 7, 31),
                    }],
                }],
            })
        };

        vec![
            SupportingDocument::FinancialInformation(FinancialInformation {
                group: "Trade".to_string(),
                directorate: "Digital".to_string(),
                cost_centre_code: "CC-1001".to_string(),
                team: "Data".to_string(),
                programme_code: None,
                area_of_work: AreaOfWork::Ddat,
                total_budget: Decimal::new(120_000, 0),
                min_day_rate: Some(Decimal::new(550, 0)),
                max_day_rate: Some(Decimal::new(650, 0)),
                days_required: Some(120),
                project_fees: None,
                timesheet_and_expenses_validator: "Val Idator".to_string(),
            }),
            determination,
            SupportingDocument::InterimRequest(InterimRequest {
                uk_based: true,
                overseas_country: None,
                security_clearance: "SC".to_string(),
                contractor_type: "Specialist".to_string(),
                equivalent_civil_servant_grade: CivilServantGrade::G7,
                supplier: Supplier::GreenPark,
                business_case: "Skills gap in the data team".to_string(),
                impact_if_not_approved: "Platform delivery slips a quarter".to_string(),
                main_reason: "No permanent candidate available".to_string(),
            }),
            SupportingDocument::CestDocument(CestDocument {
                file_name: "cest.pdf".to_string(),
                storage_key: format!("cest/{}.pdf", self.id),
            }),
            SupportingDocument::SdsStatusDetermination(SdsStatusDetermination {
                company_name: "Contracting Ltd".to_string(),
                worker_name: self.full_name.to_string(),
                agency: "Green Park".to_string(),
                contract_start_date: date(2026, 4, 1),
                contract_end_date: date(2026, 9, 30),
                on_behalf_of: "Department for Business and Trade".to_string(),
                date_completed: date(2026, 3, 1),
                reasons: if self.is_ir35 {
                    "Client controls how the work is done".to_string()
                } else {
                    "Worker controls how the work is done".to_string()
                },
            }),
        ]
    }
}

fn seed_professions() -> Vec<Profession> {
    SEED_PROFESSIONS
        .iter()
        .map(|(id, name)| Profession { id: ProfessionId(id.to_string()), name: name.to_string() })
        .collect()
}

fn seed_requestor() -> User {
    seed_user(
        SEED_REQUESTOR_ID,
        "Riley",
        "Requestor",
        Some("ddat"),
        [Permission::AddResourcingRequest, Permission::ChangeResourcingRequest, Permission::AddComment],
    )
}

/// One approver per approval type. The chief approver is also the chief named
/// on seeded requests.
fn seed_approvers() -> Vec<User> {
    ApprovalType::ALL
        .into_iter()
        .map(|approval_type| {
            let (id, first_name, last_name) = match approval_type {
                ApprovalType::Chief => (SEED_CHIEF_ID.to_string(), "Chris", "Chief"),
                other => (format!("seed-{}", other.as_str().replace('_', "-")), "Seed", other.label()),
            };
            let profession = (approval_type == ApprovalType::HeadOfProfession).then_some("ddat");
            seed_user(
                &id,
                first_name,
                last_name,
                profession,
                [Permission::GiveApproval(approval_type), Permission::AddComment],
            )
        })
        .collect()
}

fn seed_user<const N: usize>(
    id: &str,
    first_name: &str,
    last_name: &str,
    profession: Option<&str>,
    permissions: [Permission; N],
) -> User {
    User {
        id: UserId(id.to_string()),
        email: format!("{id}@example.gov.uk"),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        profession: profession.map(|value| ProfessionId(value.to_string())),
        is_superuser: false,
        permissions: permissions.into_iter().collect::<BTreeSet<_>>(),
    }
}

fn seeded_at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .map(|base| base + Duration::minutes(minutes))
        .unwrap_or_else(Utc::now)
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub requests_seeded: Vec<RequestSeedInfo>,
    pub users_seeded: usize,
}

#[derive(Debug)]
pub struct RequestSeedInfo {
    pub request_id: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

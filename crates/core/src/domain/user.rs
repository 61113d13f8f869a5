use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::approval::ApprovalType;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfessionId(pub String);

/// A user as referenced from another entity, carrying the name shown in history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub display_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profession {
    pub id: ProfessionId,
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    GiveApproval(ApprovalType),
    AddComment,
    AddResourcingRequest,
    ChangeResourcingRequest,
    DeleteResourcingRequest,
}

impl Permission {
    pub fn codename(&self) -> String {
        match self {
            Self::GiveApproval(approval_type) => {
                format!("can_give_{}_approval", approval_type.as_str())
            }
            Self::AddComment => "add_comment".to_string(),
            Self::AddResourcingRequest => "add_resourcingrequest".to_string(),
            Self::ChangeResourcingRequest => "change_resourcingrequest".to_string(),
            Self::DeleteResourcingRequest => "delete_resourcingrequest".to_string(),
        }
    }

    pub fn parse(codename: &str) -> Option<Self> {
        let codename = codename.trim().to_ascii_lowercase();
        match codename.as_str() {
            "add_comment" => return Some(Self::AddComment),
            "add_resourcingrequest" => return Some(Self::AddResourcingRequest),
            "change_resourcingrequest" => return Some(Self::ChangeResourcingRequest),
            "delete_resourcingrequest" => return Some(Self::DeleteResourcingRequest),
            _ => {}
        }

        codename
            .strip_prefix("can_give_")
            .and_then(|rest| rest.strip_suffix("_approval"))
            .and_then(ApprovalType::parse)
            .map(Self::GiveApproval)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub profession: Option<ProfessionId>,
    pub is_superuser: bool,
    pub permissions: BTreeSet<Permission>,
}

impl User {
    /// Superusers implicitly hold every permission.
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.is_superuser || self.permissions.contains(&permission)
    }

    /// Only permissions granted explicitly. Used for group notification audiences
    /// so superusers are not mailed for every tier.
    pub fn holds_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn has_approval_permission(&self, approval_type: ApprovalType) -> bool {
        self.has_permission(Permission::GiveApproval(approval_type))
    }

    pub fn is_approver(&self) -> bool {
        ApprovalType::ALL.iter().any(|approval_type| self.has_approval_permission(*approval_type))
    }

    pub fn full_name(&self) -> String {
        let full_name = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let full_name = full_name.trim();
        if full_name.is_empty() {
            self.email.clone()
        } else {
            full_name.to_string()
        }
    }
}

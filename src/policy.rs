//! Authorization policy: which roles may run an operation and which
//! ownership predicate applies. Every service checks it once per call.

use uuid::Uuid;

use crate::auth::{extractors::Caller, repo_types::Role};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateInspection,
    ViewInspection,
    UpdateInspection,
    DeleteInspection,
    AssignTechnician,
    StartInspection,
    CompleteInspection,
    CancelInspection,
    RateInspection,
    CreatePaymentIntent,
    ConfirmPayment,
    ViewPayment,
    RefundPayment,
    ManageTechnicianProfile,
    ManageUsers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ownership {
    Any,
    /// Caller must be the subject's owner (client or payer).
    Owner,
    /// Caller must be the technician assigned to the subject.
    Assigned,
    OwnerOrAssigned,
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    roles: &'static [Role],
    ownership: Ownership,
    /// Admins skip the ownership predicate unless this is false.
    admin_bypass: bool,
}

const ALL: &[Role] = &[Role::Client, Role::Technician, Role::Admin];
const CLIENT_ADMIN: &[Role] = &[Role::Client, Role::Admin];
const TECHNICIAN_ADMIN: &[Role] = &[Role::Technician, Role::Admin];

const fn rule(roles: &'static [Role], ownership: Ownership) -> Rule {
    Rule {
        roles,
        ownership,
        admin_bypass: true,
    }
}

fn rule_for(op: Operation) -> Rule {
    use Operation::*;
    match op {
        CreateInspection => rule(CLIENT_ADMIN, Ownership::Any),
        ViewInspection => rule(ALL, Ownership::OwnerOrAssigned),
        UpdateInspection | DeleteInspection => rule(CLIENT_ADMIN, Ownership::Owner),
        AssignTechnician | CancelInspection => rule(&[Role::Admin], Ownership::Any),
        StartInspection | CompleteInspection => rule(TECHNICIAN_ADMIN, Ownership::Assigned),
        RateInspection => Rule {
            roles: &[Role::Client],
            ownership: Ownership::Owner,
            admin_bypass: false,
        },
        CreatePaymentIntent | ConfirmPayment => rule(CLIENT_ADMIN, Ownership::Owner),
        ViewPayment => rule(ALL, Ownership::Owner),
        RefundPayment | ManageUsers => rule(&[Role::Admin], Ownership::Any),
        ManageTechnicianProfile => rule(&[Role::Technician], Ownership::Any),
    }
}

/// The parties attached to the record an operation targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct Subject {
    pub owner_id: Option<Uuid>,
    pub assigned_id: Option<Uuid>,
}

impl Subject {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn owned_by(owner_id: Uuid) -> Self {
        Self {
            owner_id: Some(owner_id),
            assigned_id: None,
        }
    }
}

pub fn authorize(op: Operation, caller: &Caller, subject: Subject) -> AppResult<()> {
    let rule = rule_for(op);
    if !rule.roles.contains(&caller.role) {
        return Err(AppError::forbidden(format!(
            "role {:?} may not perform {:?}",
            caller.role, op
        )));
    }
    if rule.admin_bypass && caller.is_admin() {
        return Ok(());
    }
    let is_owner = subject.owner_id == Some(caller.user_id);
    let is_assigned = subject.assigned_id == Some(caller.user_id);
    let allowed = match rule.ownership {
        Ownership::Any => true,
        Ownership::Owner => is_owner,
        Ownership::Assigned => is_assigned,
        Ownership::OwnerOrAssigned => is_owner || is_assigned,
    };
    if allowed {
        Ok(())
    } else {
        Err(AppError::forbidden(format!("not allowed to perform {:?} on this record", op)))
    }
}

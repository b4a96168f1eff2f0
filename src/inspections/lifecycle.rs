//! Inspection state machine. Each transition takes the current record and
//! returns the next one with `version` bumped; nothing here touches storage.
//!
//! ```text
//! pending ──assign──▶ confirmed ──start──▶ in-progress
//!    │                   │                     │
//!    │                   └──────complete───────┴──▶ completed ──rate (once)
//!    └──────────── cancel (any non-terminal) ─────▶ cancelled
//! ```
//!
//! A payment received before assignment promotes pending to confirmed with
//! no technician yet; such an inspection can still be assigned.

use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{Inspection, InspectionStatus};
use crate::error::{AppError, AppResult};

fn bump(cur: &Inspection, now: OffsetDateTime) -> Inspection {
    let mut next = cur.clone();
    next.version = cur.version + 1;
    next.updated_at = now;
    next
}

fn invalid(cur: &Inspection, action: &str) -> AppError {
    AppError::conflict(format!(
        "cannot {action} an inspection in status {:?}",
        cur.status
    ))
}

pub fn assign(cur: &Inspection, technician_id: Uuid, now: OffsetDateTime) -> AppResult<Inspection> {
    let awaiting_assignment = cur.status == InspectionStatus::Pending
        || (cur.status == InspectionStatus::Confirmed && cur.technician_id.is_none());
    if !awaiting_assignment {
        return Err(invalid(cur, "assign a technician to"));
    }
    let mut next = bump(cur, now);
    next.technician_id = Some(technician_id);
    next.status = InspectionStatus::Confirmed;
    Ok(next)
}

pub fn start(cur: &Inspection, now: OffsetDateTime) -> AppResult<Inspection> {
    if cur.status != InspectionStatus::Confirmed || cur.technician_id.is_none() {
        return Err(invalid(cur, "start"));
    }
    let mut next = bump(cur, now);
    next.status = InspectionStatus::InProgress;
    Ok(next)
}

pub fn complete(cur: &Inspection, now: OffsetDateTime) -> AppResult<Inspection> {
    let ready = matches!(
        cur.status,
        InspectionStatus::Confirmed | InspectionStatus::InProgress
    ) && cur.technician_id.is_some();
    if !ready {
        return Err(invalid(cur, "complete"));
    }
    let mut next = bump(cur, now);
    next.status = InspectionStatus::Completed;
    next.completed_date = Some(now);
    Ok(next)
}

pub fn cancel(cur: &Inspection, now: OffsetDateTime) -> AppResult<Inspection> {
    if cur.status.is_terminal() {
        return Err(invalid(cur, "cancel"));
    }
    let mut next = bump(cur, now);
    next.status = InspectionStatus::Cancelled;
    Ok(next)
}

pub fn rate(
    cur: &Inspection,
    rating: i16,
    comment: Option<String>,
    now: OffsetDateTime,
) -> AppResult<Inspection> {
    if !(1..=5).contains(&rating) {
        return Err(AppError::validation("Rating must be between 1 and 5"));
    }
    if cur.status != InspectionStatus::Completed {
        return Err(invalid(cur, "rate"));
    }
    if cur.rating.is_some() {
        return Err(AppError::conflict("inspection has already been rated"));
    }
    let mut next = bump(cur, now);
    next.rating = Some(rating);
    next.comment = comment;
    Ok(next)
}

/// Descriptor edits are only accepted before anyone is assigned.
pub fn ensure_editable(cur: &Inspection) -> AppResult<()> {
    if cur.status != InspectionStatus::Pending {
        return Err(invalid(cur, "edit"));
    }
    Ok(())
}

pub fn ensure_deletable(cur: &Inspection) -> AppResult<()> {
    if cur.status == InspectionStatus::Completed {
        return Err(AppError::conflict("cannot delete completed inspection"));
    }
    Ok(())
}

/// Structural invariants every persisted inspection satisfies.
pub fn invariants_hold(i: &Inspection) -> bool {
    let technician_ok = match i.status {
        InspectionStatus::Pending => i.technician_id.is_none(),
        InspectionStatus::InProgress | InspectionStatus::Completed => i.technician_id.is_some(),
        InspectionStatus::Confirmed | InspectionStatus::Cancelled => true,
    };
    let completed_ok = (i.status == InspectionStatus::Completed) == i.completed_date.is_some();
    let rating_ok = i.rating.map_or(true, |r| {
        i.status == InspectionStatus::Completed && (1..=5).contains(&r)
    });
    technician_ok && completed_ok && rating_ok
}

#[cfg(test)]
pub(crate) fn sample(client_id: Uuid) -> Inspection {
    use super::repo_types::InspectionType;
    let now = OffsetDateTime::now_utc();
    Inspection {
        id: Uuid::new_v4(),
        client_id,
        technician_id: None,
        boat_name: "Sea Breeze".into(),
        boat_model: Some("Beneteau Oceanis 40".into()),
        boat_year: Some(2012),
        boat_length: None,
        listing_url: None,
        inspection_type: InspectionType::PrePurchase,
        status: InspectionStatus::Pending,
        location: "Port Vell, Barcelona".into(),
        scheduled_date: Some(now),
        completed_date: None,
        price_cents: 0,
        rating: None,
        comment: None,
        notes: None,
        version: 1,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    #[test]
    fn happy_path_keeps_invariants() {
        let tech = Uuid::new_v4();
        let pending = sample(Uuid::new_v4());
        assert!(invariants_hold(&pending));

        let confirmed = assign(&pending, tech, now()).unwrap();
        assert_eq!(confirmed.status, InspectionStatus::Confirmed);
        assert_eq!(confirmed.technician_id, Some(tech));
        assert_eq!(confirmed.version, pending.version + 1);
        assert!(invariants_hold(&confirmed));

        let in_progress = start(&confirmed, now()).unwrap();
        let completed = complete(&in_progress, now()).unwrap();
        assert_eq!(completed.status, InspectionStatus::Completed);
        assert!(completed.completed_date.is_some());
        assert!(invariants_hold(&completed));

        let rated = rate(&completed, 5, Some("thorough".into()), now()).unwrap();
        assert_eq!(rated.rating, Some(5));
        assert!(invariants_hold(&rated));
    }

    #[test]
    fn completed_inspections_are_frozen() {
        let pending = sample(Uuid::new_v4());
        let completed = complete(&assign(&pending, Uuid::new_v4(), now()).unwrap(), now()).unwrap();
        assert!(matches!(cancel(&completed, now()), Err(AppError::Conflict(_))));
        assert!(matches!(start(&completed, now()), Err(AppError::Conflict(_))));
        assert!(matches!(
            assign(&completed, Uuid::new_v4(), now()),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(ensure_deletable(&completed), Err(AppError::Conflict(_))));
    }

    #[test]
    fn cancelled_is_terminal() {
        let cancelled = cancel(&sample(Uuid::new_v4()), now()).unwrap();
        assert!(cancel(&cancelled, now()).is_err());
        assert!(complete(&cancelled, now()).is_err());
        assert!(assign(&cancelled, Uuid::new_v4(), now()).is_err());
        assert!(ensure_deletable(&cancelled).is_ok());
    }

    #[test]
    fn cannot_complete_without_technician() {
        assert!(matches!(
            complete(&sample(Uuid::new_v4()), now()),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn rating_rules() {
        let pending = sample(Uuid::new_v4());
        assert!(matches!(rate(&pending, 4, None, now()), Err(AppError::Conflict(_))));

        let completed = complete(&assign(&pending, Uuid::new_v4(), now()).unwrap(), now()).unwrap();
        assert!(matches!(rate(&completed, 0, None, now()), Err(AppError::Validation(_))));
        assert!(matches!(rate(&completed, 6, None, now()), Err(AppError::Validation(_))));

        let rated = rate(&completed, 3, None, now()).unwrap();
        assert!(matches!(rate(&rated, 5, None, now()), Err(AppError::Conflict(_))));
    }

    #[test]
    fn payment_promoted_inspection_can_still_be_assigned() {
        let mut promoted = sample(Uuid::new_v4());
        promoted.status = InspectionStatus::Confirmed;
        let tech = Uuid::new_v4();
        let assigned = assign(&promoted, tech, now()).unwrap();
        assert_eq!(assigned.technician_id, Some(tech));
        assert!(assign(&assigned, Uuid::new_v4(), now()).is_err());
    }
}

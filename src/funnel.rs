//! Status funnel: which transitions a ledger row may take, and who may fire them.
//!
//! A transition that does not apply is a skip, never an error, so that
//! re-entrant runs over the same ledger stay harmless.

use crate::model::{LedgerRow, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// Pipeline stages.
    Automation,
    /// A human reviewing results in the ledger.
    Reviewer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Apply,
    Skip(&'static str),
}

impl Transition {
    pub fn is_apply(&self) -> bool {
        matches!(self, Transition::Apply)
    }
}

pub fn check(row: &LedgerRow, target: Status, actor: Actor) -> Transition {
    let from = row.status;
    if from == target {
        return Transition::Skip("row is already in the target status");
    }
    if from.is_terminal() {
        return Transition::Skip("terminal status is owned by review");
    }
    if target.rank() < from.rank() {
        return Transition::Skip("status never regresses");
    }
    match (actor, from, target) {
        (Actor::Automation, Status::Ideated, Status::Uploaded) => {
            if row.asset_url.trim().is_empty() {
                Transition::Skip("asset URL missing")
            } else {
                Transition::Apply
            }
        }
        (Actor::Automation, _, _) => {
            Transition::Skip("automation only moves Ideated rows to Uploaded")
        }
        (Actor::Reviewer, _, Status::Rejected) => Transition::Apply,
        (Actor::Reviewer, Status::Uploaded, Status::Tested) => Transition::Apply,
        (Actor::Reviewer, _, _) => Transition::Skip("review only rejects rows or marks Uploaded rows Tested"),
    }
}

/// Apply `target` to `row` in memory when the funnel allows it.
pub fn apply(row: &mut LedgerRow, target: Status, actor: Actor) -> Transition {
    let transition = check(row, target, actor);
    if transition.is_apply() {
        row.status = target;
    }
    transition
}

/// Rows the synchronizer should attach ads for.
pub fn sync_eligible(row: &LedgerRow) -> bool {
    row.status == Status::Uploaded && row.refs.ad().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ObjectRole;
    use crate::model::ExternalRefs;
    use chrono::Utc;

    fn row(status: Status, asset_url: &str) -> LedgerRow {
        LedgerRow {
            id: 1,
            created_at: Utc::now(),
            status,
            app_name: "FocusTimer".into(),
            target_audience: "students".into(),
            platform: "Meta".into(),
            hook: "Curiosity".into(),
            idea: "idea".into(),
            image_prompt: "prompt".into(),
            asset_url: asset_url.into(),
            refs: ExternalRefs::default(),
        }
    }

    #[test]
    fn upload_requires_asset_url() {
        let r = row(Status::Ideated, "");
        assert_eq!(
            check(&r, Status::Uploaded, Actor::Automation),
            Transition::Skip("asset URL missing")
        );
        let mut r = row(Status::Ideated, "https://drive/x");
        assert!(apply(&mut r, Status::Uploaded, Actor::Automation).is_apply());
        assert_eq!(r.status, Status::Uploaded);
    }

    #[test]
    fn automation_never_regresses_or_touches_terminal_rows() {
        for from in [Status::Uploaded, Status::Tested, Status::Rejected] {
            let mut r = row(from, "https://drive/x");
            assert!(!apply(&mut r, Status::Ideated, Actor::Automation).is_apply());
            assert_eq!(r.status, from);
        }
        let r = row(Status::Rejected, "https://drive/x");
        assert!(!check(&r, Status::Uploaded, Actor::Automation).is_apply());
    }

    #[test]
    fn automation_cannot_produce_review_statuses() {
        let r = row(Status::Uploaded, "u");
        assert!(!check(&r, Status::Tested, Actor::Automation).is_apply());
        assert!(!check(&r, Status::Rejected, Actor::Automation).is_apply());
    }

    #[test]
    fn reviewer_rejects_any_open_row() {
        assert!(check(&row(Status::Ideated, ""), Status::Rejected, Actor::Reviewer).is_apply());
        assert!(check(&row(Status::Uploaded, "u"), Status::Rejected, Actor::Reviewer).is_apply());
        assert!(check(&row(Status::Uploaded, "u"), Status::Tested, Actor::Reviewer).is_apply());
        assert!(!check(&row(Status::Ideated, ""), Status::Tested, Actor::Reviewer).is_apply());
        assert!(!check(&row(Status::Tested, "u"), Status::Rejected, Actor::Reviewer).is_apply());
    }

    #[test]
    fn sync_eligibility_needs_uploaded_without_ad() {
        let mut r = row(Status::Uploaded, "u");
        assert!(sync_eligible(&r));
        for role in [ObjectRole::Campaign, ObjectRole::AdSet, ObjectRole::Creative, ObjectRole::Ad] {
            r.refs.record(role, "id").unwrap();
        }
        assert!(!sync_eligible(&r));
        assert!(!sync_eligible(&row(Status::Tested, "u")));
    }
}

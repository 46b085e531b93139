use uuid::Uuid;

use super::principal::Principal;
use super::{PermissionSet, Role};

/// The subdivision being checked. The scope is required by construction:
/// there is deliberately no way to resolve permissions without one, so the
/// "called without a subdivision" programming error cannot compile.
#[derive(Debug, Clone, Copy)]
pub struct SubdivisionScope {
    pub id: Uuid,
    pub manager_id: Option<Uuid>,
}

struct AccessRequest<'a> {
    principal: Option<&'a Principal>,
    subdivision: &'a SubdivisionScope,
    resource_owner: Option<Uuid>,
}

type RuleFn = for<'a> fn(&AccessRequest<'a>) -> Option<PermissionSet>;

/// The precedence table. Evaluated top to bottom, first match wins; rules are
/// never merged. Anonymous and the cross-cutting overrides come before the
/// subdivision-scoped role rules; anything unmatched lands on the view-only
/// default appended at the end.
const RULES: &[(&str, RuleFn)] = &[
    ("anonymous", rule_anonymous),
    ("superuser", rule_superuser),
    ("manager", rule_manager),
    ("super_admin", rule_super_admin),
    ("subdivision_admin", rule_subdivision_admin),
    ("editor", rule_editor),
    ("default", rule_default),
];

fn rule_anonymous(req: &AccessRequest) -> Option<PermissionSet> {
    if req.principal.is_none() {
        return Some(PermissionSet::VIEW_ONLY);
    }
    None
}

fn rule_superuser(req: &AccessRequest) -> Option<PermissionSet> {
    req.principal
        .filter(|p| p.is_superuser)
        .map(|_| PermissionSet::ALL)
}

/// The designated manager has full control of their own subdivision, even
/// with no roles assigned at all.
fn rule_manager(req: &AccessRequest) -> Option<PermissionSet> {
    let principal = req.principal?;
    if req.subdivision.manager_id == Some(principal.user_id) {
        return Some(PermissionSet::ALL);
    }
    None
}

fn rule_super_admin(req: &AccessRequest) -> Option<PermissionSet> {
    req.principal
        .filter(|p| p.has_role(Role::SuperAdmin))
        .map(|_| PermissionSet::ALL)
}

/// Full control inside the home subdivision only; elsewhere this rule does
/// not match and the caller falls through to view-only.
fn rule_subdivision_admin(req: &AccessRequest) -> Option<PermissionSet> {
    let principal = req.principal?;
    if principal.has_role(Role::SubdivisionAdmin) && principal.is_home(req.subdivision.id) {
        return Some(PermissionSet::ALL);
    }
    None
}

/// Editors may add in their home subdivision; `edit_any` is granted only for
/// their own records (resource owner == caller). Outside the home
/// subdivision the rule does not match.
fn rule_editor(req: &AccessRequest) -> Option<PermissionSet> {
    let principal = req.principal?;
    if principal.has_role(Role::Editor) && principal.is_home(req.subdivision.id) {
        return Some(PermissionSet {
            view: true,
            add: true,
            edit_any: req.resource_owner == Some(principal.user_id),
            delete: false,
            manage: false,
        });
    }
    None
}

fn rule_default(_req: &AccessRequest) -> Option<PermissionSet> {
    Some(PermissionSet::VIEW_ONLY)
}

/// Resolve the effective permission set for a caller against a subdivision.
///
/// `principal` is `None` for anonymous callers. `resource_owner` is the
/// creator of the specific resource being acted on, when there is one; it
/// only influences the Editor rule. Deterministic and side-effect free
/// beyond a `debug` trace of the matched rule.
pub fn resolve_permissions(
    principal: Option<&Principal>,
    subdivision: &SubdivisionScope,
    resource_owner: Option<Uuid>,
) -> PermissionSet {
    let req = AccessRequest {
        principal,
        subdivision,
        resource_owner,
    };

    for (name, rule) in RULES {
        if let Some(perms) = rule(&req) {
            tracing::debug!(
                rule = name,
                user_id = ?principal.map(|p| p.user_id),
                subdivision_id = %subdivision.id,
                ?perms,
                "permission rule matched"
            );
            return perms;
        }
    }

    // The table ends with an unconditional default.
    unreachable!("permission rule table must terminate")
}

pub fn can_view(principal: Option<&Principal>, subdivision: &SubdivisionScope) -> bool {
    resolve_permissions(principal, subdivision, None).view
}

pub fn can_add(principal: Option<&Principal>, subdivision: &SubdivisionScope) -> bool {
    resolve_permissions(principal, subdivision, None).add
}

/// Edit check for a concrete resource: the resource creator is passed through
/// as `resource_owner` so Editors get self-service rights on their own
/// records.
pub fn can_edit(
    principal: Option<&Principal>,
    subdivision: &SubdivisionScope,
    resource_owner: Option<Uuid>,
) -> bool {
    resolve_permissions(principal, subdivision, resource_owner).edit_any
}

pub fn can_delete(principal: Option<&Principal>, subdivision: &SubdivisionScope) -> bool {
    resolve_permissions(principal, subdivision, None).delete
}

pub fn can_manage(principal: Option<&Principal>, subdivision: &SubdivisionScope) -> bool {
    resolve_permissions(principal, subdivision, None).manage
}

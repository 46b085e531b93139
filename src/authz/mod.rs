//! Authorization core.
//!
//! A layered, per-subdivision permission model. The engine is a pure
//! function over an ordered rule table: cross-cutting overrides (superuser,
//! subdivision manager, Super_Admin) win over subdivision-scoped role rules
//! (Subdivision_Admin, Editor), which in turn fall through to a view-only
//! default. Callers do the I/O (`Principal::load`); the engine does none.

mod engine;
mod principal;

pub use engine::{
    can_add, can_delete, can_edit, can_manage, can_view, resolve_permissions, SubdivisionScope,
};
pub use principal::Principal;

use serde::Serialize;
use utoipa::ToSchema;

/// The fixed role vocabulary. Stored in the `roles` table by canonical name;
/// unknown names are ignored when a principal is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
pub enum Role {
    Viewer,
    Editor,
    SubdivisionAdmin,
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Viewer,
        Role::Editor,
        Role::SubdivisionAdmin,
        Role::SuperAdmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "Viewer",
            Role::Editor => "Editor",
            Role::SubdivisionAdmin => "Subdivision_Admin",
            Role::SuperAdmin => "Super_Admin",
        }
    }

    pub fn from_name(name: &str) -> Option<Role> {
        match name {
            "Viewer" => Some(Role::Viewer),
            "Editor" => Some(Role::Editor),
            "Subdivision_Admin" => Some(Role::SubdivisionAdmin),
            "Super_Admin" => Some(Role::SuperAdmin),
            _ => None,
        }
    }

    /// Human description used by the seed CLI.
    pub fn description(&self) -> &'static str {
        match self {
            Role::Viewer => "Read-only access to the catalog",
            Role::Editor => "Add products and edit own records in the home subdivision",
            Role::SubdivisionAdmin => "Full control inside the home subdivision",
            Role::SuperAdmin => "Full control everywhere",
        }
    }
}

/// Effective permission flags for one (user, subdivision, resource) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct PermissionSet {
    pub view: bool,
    pub add: bool,
    pub edit_any: bool,
    pub delete: bool,
    pub manage: bool,
}

impl PermissionSet {
    pub const ALL: PermissionSet = PermissionSet {
        view: true,
        add: true,
        edit_any: true,
        delete: true,
        manage: true,
    };

    /// The default grant: everyone, including anonymous callers, may browse.
    pub const VIEW_ONLY: PermissionSet = PermissionSet {
        view: true,
        add: false,
        edit_any: false,
        delete: false,
        manage: false,
    };
}

//! Role-based permission checks.
//!
//! The role/permission table is fixed at compile time as an exhaustive
//! match, so the compiler checks completeness and lookups are O(1).

use super::Role;

/// Everything a role can be allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    // Job permissions
    CreateJob,
    ViewOwnJobs,
    ViewAllJobs,
    StopOwnJobs,
    StopAllJobs,
    ThrottleJobs,
    GrantJobAccess,

    // Admin permissions
    CreateToken,
    CreateAdminToken,
    ViewTokens,
    RevokeToken,
    ModifyToken,
    ViewTokenUsage,
}

impl Role {
    /// Checks the static role/permission table. Pure function, no I/O.
    pub fn allows(self, permission: Permission) -> bool {
        use Permission::*;
        match self {
            Role::Admin => true,
            Role::JobManager => matches!(
                permission,
                CreateJob | ViewOwnJobs | ViewAllJobs | StopOwnJobs | StopAllJobs | ThrottleJobs
            ),
            Role::JobWriter => matches!(
                permission,
                CreateJob | ViewOwnJobs | StopOwnJobs | GrantJobAccess
            ),
            Role::JobReader => matches!(permission, ViewOwnJobs),
        }
    }
}

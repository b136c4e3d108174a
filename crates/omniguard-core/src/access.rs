// CAPABILITY-GATED ADMINISTRATION
// Role table consulted by every administrative entry point.
//
// SAFETY INVARIANTS:
// 1. There is always at least one Admin (the last Admin cannot be revoked)
// 2. Only an Admin can grant or revoke roles
// 3. Role checks never mutate state

use log::{info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::AuthorizationError;
use crate::types::AccountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Protocol registry, fee parameters, breaker reset, reporters, overrides
    Admin,
    /// May trip the breaker (pause) but not reset it
    Guardian,
    /// May relay inbound deliveries and resolution callbacks on behalf of adapters
    Relayer,
}

/// Role table
#[derive(Debug, Default)]
pub struct AccessControl {
    roles: RwLock<BTreeMap<AccountId, BTreeSet<Role>>>,
}

impl AccessControl {
    /// Create a table with a single initial admin
    pub fn with_admin(admin: AccountId) -> Self {
        let mut roles = BTreeMap::new();
        roles.insert(admin, BTreeSet::from([Role::Admin]));
        AccessControl {
            roles: RwLock::new(roles),
        }
    }

    pub fn has_role(&self, account: &AccountId, role: Role) -> bool {
        self.roles
            .read()
            .get(account)
            .map(|set| set.contains(&role))
            .unwrap_or(false)
    }

    /// Fail unless `caller` holds `role`
    pub fn require(&self, caller: &AccountId, role: Role) -> Result<(), AuthorizationError> {
        if self.has_role(caller, role) {
            Ok(())
        } else {
            warn!("Authorization denied: {} lacks {:?}", caller, role);
            Err(AuthorizationError::MissingRole {
                caller: caller.clone(),
                required: role,
            })
        }
    }

    /// Fail unless `caller` holds at least one of `roles`
    pub fn require_any(&self, caller: &AccountId, roles: &[Role]) -> Result<(), AuthorizationError> {
        if roles.iter().any(|role| self.has_role(caller, *role)) {
            Ok(())
        } else {
            warn!("Authorization denied: {} lacks any of {:?}", caller, roles);
            Err(AuthorizationError::MissingAnyRole {
                caller: caller.clone(),
                required: roles.to_vec(),
            })
        }
    }

    pub fn grant_role(
        &self,
        caller: &AccountId,
        account: AccountId,
        role: Role,
    ) -> Result<(), AuthorizationError> {
        self.require(caller, Role::Admin)?;
        info!("{} granted {:?} to {}", caller, role, account);
        self.roles.write().entry(account).or_default().insert(role);
        Ok(())
    }

    /// Revoke a role. Revoking the last admin is a no-op returning `false`.
    pub fn revoke_role(
        &self,
        caller: &AccountId,
        account: &AccountId,
        role: Role,
    ) -> Result<bool, AuthorizationError> {
        self.require(caller, Role::Admin)?;
        let mut roles = self.roles.write();

        if role == Role::Admin {
            let admins = roles.values().filter(|set| set.contains(&Role::Admin)).count();
            if admins <= 1 {
                warn!("Refusing to revoke the last admin {}", account);
                return Ok(false);
            }
        }

        let removed = roles
            .get_mut(account)
            .map(|set| set.remove(&role))
            .unwrap_or(false);
        if removed {
            info!("{} revoked {:?} from {}", caller, role, account);
        }
        Ok(removed)
    }

    /// Accounts currently holding `role`
    pub fn members(&self, role: Role) -> Vec<AccountId> {
        self.roles
            .read()
            .iter()
            .filter(|(_, set)| set.contains(&role))
            .map(|(account, _)| account.clone())
            .collect()
    }
}

//! SharedPool: serialized reservation of shared database slots.
//!
//! Every mutation of a member's `current_count` happens inside one mutex
//! critical section that re-checks headroom before incrementing, so
//! concurrent callers can never push a member past `max_count`.
//! Reservations are keyed by instance identifier: reserving twice for the
//! same instance returns the first reservation, and releasing an instance
//! without a reservation is a no-op.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use hostgrid_core::{InstanceId, MemberId, PoolMemberConfig};

use crate::error::{PoolError, PoolResult};
use crate::member::{SharedPoolMember, select_member};

/// A slot held on a pool member for one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub instance_id: InstanceId,
    pub member_id: MemberId,
    pub endpoint: String,
}

#[derive(Debug, Default)]
struct PoolState {
    members: BTreeMap<MemberId, SharedPoolMember>,
    reservations: HashMap<InstanceId, MemberId>,
}

impl PoolState {
    fn reservation(&self, instance_id: InstanceId) -> Option<Reservation> {
        let member_id = self.reservations.get(&instance_id)?;
        let member = self.members.get(member_id)?;
        Some(Reservation {
            instance_id,
            member_id: member_id.clone(),
            endpoint: member.endpoint.clone(),
        })
    }

    /// Increment `member_id` for `instance_id` if it has headroom.
    fn take_slot(&mut self, instance_id: InstanceId, member_id: &str) -> PoolResult<Reservation> {
        let member = self
            .members
            .get_mut(member_id)
            .ok_or_else(|| PoolError::UnknownMember(member_id.to_string()))?;
        if member.current_count >= member.max_count {
            return Err(PoolError::MemberFull(member_id.to_string()));
        }
        member.current_count += 1;
        let reservation = Reservation {
            instance_id,
            member_id: member.id.clone(),
            endpoint: member.endpoint.clone(),
        };
        self.reservations.insert(instance_id, member.id.clone());
        Ok(reservation)
    }
}

/// The shared database pool. Owns all member counters.
#[derive(Debug, Default)]
pub struct SharedPool {
    state: Mutex<PoolState>,
}

impl SharedPool {
    pub fn new(members: impl IntoIterator<Item = SharedPoolMember>) -> Self {
        let members = members
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();
        Self {
            state: Mutex::new(PoolState {
                members,
                reservations: HashMap::new(),
            }),
        }
    }

    pub fn from_config(members: &[PoolMemberConfig]) -> Self {
        Self::new(members.iter().map(SharedPoolMember::from))
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // The critical sections never panic midway, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a slot for `instance_id` on the least-loaded eligible member.
    pub fn reserve(&self, instance_id: InstanceId) -> PoolResult<Reservation> {
        let mut state = self.lock();

        if let Some(existing) = state.reservation(instance_id) {
            debug!(instance = %instance_id, member = %existing.member_id, "reusing existing pool reservation");
            return Ok(existing);
        }

        let Some(member_id) = select_member(state.members.values()).map(|m| m.id.clone()) else {
            let active_members = state.members.values().filter(|m| m.active).count();
            warn!(instance = %instance_id, active_members, "shared pool exhausted");
            return Err(PoolError::Exhausted { active_members });
        };

        let reservation = state.take_slot(instance_id, &member_id)?;
        info!(
            instance = %instance_id,
            member = %reservation.member_id,
            "reserved shared database slot"
        );
        Ok(reservation)
    }

    /// Record a reservation on a specific member for a database that
    /// already exists there.
    pub fn adopt(&self, instance_id: InstanceId, member_id: &str) -> PoolResult<Reservation> {
        let mut state = self.lock();

        if let Some(existing) = state.reservation(instance_id) {
            if existing.member_id == member_id {
                return Ok(existing);
            }
            // The slot follows the database.
            if let Some(old) = state.members.get_mut(&existing.member_id) {
                old.current_count = old.current_count.saturating_sub(1);
            }
            state.reservations.remove(&instance_id);
        }

        let reservation = state.take_slot(instance_id, member_id)?;
        info!(instance = %instance_id, member = %member_id, "adopted shared database slot");
        Ok(reservation)
    }

    /// Release the slot held by `instance_id`.
    ///
    /// Returns the member it was held on, or `None` if there was nothing to
    /// release.
    pub fn release(&self, instance_id: InstanceId) -> Option<MemberId> {
        let mut state = self.lock();
        let member_id = state.reservations.remove(&instance_id)?;
        if let Some(member) = state.members.get_mut(&member_id) {
            member.current_count = member.current_count.saturating_sub(1);
        }
        info!(instance = %instance_id, member = %member_id, "released shared database slot");
        Some(member_id)
    }

    /// The current reservation of `instance_id`, if any.
    pub fn reservation(&self, instance_id: InstanceId) -> Option<Reservation> {
        self.lock().reservation(instance_id)
    }

    /// Stop (or resume) placing new tenants on a member.
    pub fn set_active(&self, member_id: &str, active: bool) -> PoolResult<()> {
        let mut state = self.lock();
        let member = state
            .members
            .get_mut(member_id)
            .ok_or_else(|| PoolError::UnknownMember(member_id.to_string()))?;
        member.active = active;
        info!(member = %member_id, active, "pool member activity changed");
        Ok(())
    }

    /// Copy of every member's counters, ordered by member id.
    pub fn snapshot(&self) -> Vec<SharedPoolMember> {
        self.lock().members.values().cloned().collect()
    }

    /// Rebuild counters from recorded assignments (e.g. after a restart).
    ///
    /// Assignments naming unknown or full members are skipped with a
    /// warning. Returns the number restored.
    pub fn restore<I>(&self, assignments: I) -> usize
    where
        I: IntoIterator<Item = (InstanceId, MemberId)>,
    {
        let mut state = self.lock();
        let mut restored = 0;
        for (instance_id, member_id) in assignments {
            if state.reservations.contains_key(&instance_id) {
                continue;
            }
            match state.take_slot(instance_id, &member_id) {
                Ok(_) => restored += 1,
                Err(e) => {
                    warn!(instance = %instance_id, member = %member_id, error = %e, "skipping pool assignment");
                }
            }
        }
        debug!(restored, "pool assignments restored");
        restored
    }
}

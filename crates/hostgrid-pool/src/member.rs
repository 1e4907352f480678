//! Pool member state and placement policy.
//!
//! Placement is least-loaded: among active members with headroom, pick the
//! one with the fewest tenants. Ties go to the lowest member id so the
//! choice is deterministic.

use serde::{Deserialize, Serialize};

use hostgrid_core::PoolMemberConfig;

/// One shared database host and its tenant counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedPoolMember {
    pub id: String,
    pub endpoint: String,
    pub current_count: u32,
    pub max_count: u32,
    /// Drained members keep their tenants but take no new ones.
    pub active: bool,
}

impl SharedPoolMember {
    pub fn new(id: &str, endpoint: &str, max_count: u32) -> Self {
        Self {
            id: id.to_string(),
            endpoint: endpoint.to_string(),
            current_count: 0,
            max_count,
            active: true,
        }
    }

    pub fn headroom(&self) -> u32 {
        self.max_count.saturating_sub(self.current_count)
    }

    /// Whether a new tenant may be placed here.
    pub fn is_eligible(&self) -> bool {
        self.active && self.headroom() > 0
    }
}

impl From<&PoolMemberConfig> for SharedPoolMember {
    fn from(cfg: &PoolMemberConfig) -> Self {
        Self {
            id: cfg.id.clone(),
            endpoint: cfg.endpoint.clone(),
            current_count: 0,
            max_count: cfg.max_tenants,
            active: cfg.active,
        }
    }
}

/// Eligible members, best placement first.
pub fn rank_members<'a, I>(members: I) -> Vec<&'a SharedPoolMember>
where
    I: IntoIterator<Item = &'a SharedPoolMember>,
{
    let mut eligible: Vec<&SharedPoolMember> =
        members.into_iter().filter(|m| m.is_eligible()).collect();
    eligible.sort_by(|a, b| {
        a.current_count
            .cmp(&b.current_count)
            .then_with(|| a.id.cmp(&b.id))
    });
    eligible
}

/// The member a new tenant should go to, if any has headroom.
pub fn select_member<'a, I>(members: I) -> Option<&'a SharedPoolMember>
where
    I: IntoIterator<Item = &'a SharedPoolMember>,
{
    rank_members(members).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, current: u32, max: u32) -> SharedPoolMember {
        SharedPoolMember {
            current_count: current,
            ..SharedPoolMember::new(id, &format!("{id}.internal"), max)
        }
    }

    #[test]
    fn picks_least_loaded() {
        let members = vec![member("pg-a", 5, 10), member("pg-b", 2, 10), member("pg-c", 7, 10)];
        assert_eq!(select_member(&members).unwrap().id, "pg-b");
    }

    #[test]
    fn ties_go_to_lowest_id() {
        let members = vec![member("pg-c", 1, 10), member("pg-a", 1, 10), member("pg-b", 1, 10)];
        assert_eq!(select_member(&members).unwrap().id, "pg-a");
    }

    #[test]
    fn full_members_are_skipped() {
        let members = vec![member("pg-a", 0, 0), member("pg-b", 3, 3), member("pg-c", 9, 10)];
        assert_eq!(select_member(&members).unwrap().id, "pg-c");
    }

    #[test]
    fn drained_members_are_skipped() {
        let mut drained = member("pg-a", 0, 10);
        drained.active = false;
        let members = vec![drained, member("pg-b", 4, 10)];
        assert_eq!(select_member(&members).unwrap().id, "pg-b");
    }

    #[test]
    fn nothing_selected_when_all_full() {
        let members = vec![member("pg-a", 2, 2), member("pg-b", 1, 1)];
        assert!(select_member(&members).is_none());
        assert!(rank_members(&members).is_empty());
    }

    #[test]
    fn ranking_orders_by_load_then_id() {
        let members = vec![member("pg-b", 1, 5), member("pg-a", 3, 5), member("pg-c", 1, 5)];
        let ids: Vec<&str> = rank_members(&members).iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["pg-b", "pg-c", "pg-a"]);
    }

    #[test]
    fn from_config_starts_empty() {
        let cfg = PoolMemberConfig {
            id: "pg-a".to_string(),
            endpoint: "pg-a.internal".to_string(),
            max_tenants: 25,
            active: false,
        };
        let m = SharedPoolMember::from(&cfg);
        assert_eq!(m.current_count, 0);
        assert_eq!(m.headroom(), 25);
        assert!(!m.is_eligible());
    }
}

//! Pool-Membership Resolver
//!
//! Matches disks against the leaf devices of every storage pool and moves
//! matched disks into the state that mirrors the member's health.
//!
//! # Matching
//!
//! Pools usually reference a partition of a disk through one of its stable
//! links rather than the kernel node:
//!
//! ```text
//! disk lookup set:  /dev/sda, /dev/disk/by-id/ata-WDC_WD40-XYZ
//! pool member:      /dev/disk/by-id/ata-WDC_WD40-XYZ-part1   ──▶ match
//! pool member:      /dev/sda1                                ──▶ match
//! pool member:      /dev/sda10x                              ──▶ no match
//! ```

use std::sync::Arc;

use tracing::{debug, warn};

use super::stage::{SkipReason, StageOutcome};
use super::{DiskState, PhysicalDisk};
use crate::domain::ports::{PoolStatusSource, ProbeContext, ToolLocator, VdevNode};

/// A leaf device of a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolMember {
    pub path: String,
    /// Health token as reported
    pub state: String,
}

/// Flattened member list of one pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolMembers {
    pub pool: String,
    pub members: Vec<PoolMember>,
}

// =============================================================================
// Tree Flattening
// =============================================================================

/// Collect every leaf below `root`, depth first.
///
/// The root itself is the pool and never a member. Leaves without a health
/// token are empty section headers and are dropped.
pub fn flatten_members(root: &VdevNode) -> Vec<PoolMember> {
    let mut members = Vec::new();
    for child in &root.children {
        collect_leaves(child, &mut members);
    }
    members
}

fn collect_leaves(node: &VdevNode, members: &mut Vec<PoolMember>) {
    if node.is_leaf() {
        if let Some(state) = &node.state {
            members.push(PoolMember {
                path: node.name.clone(),
                state: state.clone(),
            });
        }
        return;
    }
    for child in &node.children {
        collect_leaves(child, members);
    }
}

// =============================================================================
// Path Matching
// =============================================================================

/// Check whether `suffix` turns a path into one of its partitions.
///
/// - `-1`, `_1`, `-part1`, `_part1` after any base
/// - `p1` after a base ending in a digit (`nvme0n1p1`, `mmcblk0p2`)
/// - `1` after a base not ending in a digit (`sda1`)
///
/// The bare `p` and digit forms are narrower than "p or digits after any
/// base" and depend on the base's last character: `sda` never matches
/// `sdap1` and `nvme0n1` never matches `nvme0n12`.
pub fn is_partition_suffix(base: &str, suffix: &str) -> bool {
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    if let Some(rest) = suffix.strip_prefix(['-', '_']) {
        let rest = rest.strip_prefix("part").unwrap_or(rest);
        return all_digits(rest);
    }

    let base_ends_in_digit = base.bytes().last().is_some_and(|b| b.is_ascii_digit());
    if base_ends_in_digit {
        suffix.strip_prefix('p').is_some_and(all_digits)
    } else {
        all_digits(suffix)
    }
}

/// Check whether a pool member is `lookup` or one of its partitions
pub fn member_matches(lookup: &str, member: &str) -> bool {
    if lookup.is_empty() {
        return false;
    }
    if member == lookup {
        return true;
    }
    member
        .strip_prefix(lookup)
        .is_some_and(|suffix| is_partition_suffix(lookup, suffix))
}

/// Map a reported health token to a disk state.
///
/// The flag is false when the token was not recognized and `Online` was
/// assumed.
pub fn map_pool_health(token: &str) -> (DiskState, bool) {
    match token.trim().to_ascii_uppercase().as_str() {
        "ONLINE" => (DiskState::Online, true),
        "DEGRADED" => (DiskState::Degraded, true),
        "FAULTED" => (DiskState::Faulted, true),
        "UNAVAIL" => (DiskState::Unavail, true),
        "OFFLINE" => (DiskState::Offline, true),
        _ => (DiskState::Online, false),
    }
}

/// First pool member naming this disk, pools in the given order.
pub fn find_membership<'a>(
    disk: &PhysicalDisk,
    pools: &'a [PoolMembers],
) -> Option<(&'a str, &'a PoolMember)> {
    let lookup = disk.lookup_paths();
    pools.iter().find_map(|pool| {
        pool.members
            .iter()
            .find(|member| lookup.iter().any(|path| member_matches(path, &member.path)))
            .map(|member| (pool.pool.as_str(), member))
    })
}

/// Record pool membership on `disk`.
///
/// A match overrides whatever state earlier stages assigned.
pub fn apply_membership(disk: &mut PhysicalDisk, pools: &[PoolMembers]) -> StageOutcome {
    let Some((pool, member)) = find_membership(disk, pools) else {
        return StageOutcome::Unchanged;
    };

    let (state, recognized) = map_pool_health(&member.state);
    if !recognized {
        warn!(
            "Unrecognized health '{}' for {} in pool {}, assuming Online",
            member.state, member.path, pool
        );
    }

    debug!("{} is member {} of pool {} ({})", disk.device_path, member.path, pool, state);
    disk.pool_name = Some(pool.to_string());
    disk.state = state;
    StageOutcome::Applied
}

// =============================================================================
// Resolver
// =============================================================================

/// Pool membership stage
pub struct PoolResolver {
    source: Arc<dyn PoolStatusSource>,
    tools: Arc<dyn ToolLocator>,
}

impl PoolResolver {
    pub fn new(source: Arc<dyn PoolStatusSource>, tools: Arc<dyn ToolLocator>) -> Self {
        Self { source, tools }
    }

    /// Query pool status once and flatten every pool, in pool name order.
    ///
    /// Returns `None` when the stage was skipped or failed.
    pub async fn load(&self, ctx: &ProbeContext) -> (Option<Vec<PoolMembers>>, StageOutcome) {
        let probe = self.source.required_tool().unwrap_or("pool-status");
        if let Some(tool) = self.source.required_tool() {
            if !self.tools.tool_available(tool) {
                debug!("Skipping pool membership: {} not installed", tool);
                return (
                    None,
                    StageOutcome::Skipped(SkipReason::ToolUnavailable(tool.to_string())),
                );
            }
        }

        match ctx.run(probe, self.source.query_pool_status(ctx)).await {
            Ok(status) => {
                let pools: Vec<PoolMembers> = status
                    .iter()
                    .map(|(name, root)| PoolMembers {
                        pool: name.clone(),
                        members: flatten_members(root),
                    })
                    .collect();
                debug!("Loaded {} pools", pools.len());
                (Some(pools), StageOutcome::Applied)
            }
            Err(e) => {
                warn!("Pool status query failed, leaving disk states unchanged: {}", e);
                (None, StageOutcome::failed(&e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tank() -> VdevNode {
        VdevNode::new("tank", "DEGRADED")
            .with_child(
                VdevNode::new("mirror-0", "DEGRADED")
                    .with_child(VdevNode::new("/dev/disk/by-id/ata-DISK_A-part1", "ONLINE"))
                    .with_child(VdevNode::new("/dev/disk/by-id/ata-DISK_B-part1", "FAULTED")),
            )
            .with_child(
                VdevNode::section("logs")
                    .with_child(VdevNode::new("/dev/nvme0n1p4", "ONLINE")),
            )
            .with_child(VdevNode::section("spares"))
    }

    #[test]
    fn test_flatten_nested_tree() {
        let members = flatten_members(&tank());
        let paths: Vec<_> = members.iter().map(|m| m.path.as_str()).collect();

        assert_eq!(
            paths,
            vec![
                "/dev/disk/by-id/ata-DISK_A-part1",
                "/dev/disk/by-id/ata-DISK_B-part1",
                "/dev/nvme0n1p4",
            ]
        );
        assert_eq!(members[1].state, "FAULTED");
    }

    #[test]
    fn test_flatten_empty_pool() {
        assert!(flatten_members(&VdevNode::new("empty", "ONLINE")).is_empty());
    }

    #[test]
    fn test_partition_suffixes() {
        assert!(member_matches("/dev/sda", "/dev/sda"));
        assert!(member_matches("/dev/sda", "/dev/sda1"));
        assert!(member_matches("/dev/nvme0n1", "/dev/nvme0n1p2"));
        assert!(member_matches("/dev/disk/by-id/ata-X", "/dev/disk/by-id/ata-X-part3"));
        assert!(member_matches("/dev/disk/by-id/ata-X", "/dev/disk/by-id/ata-X_part3"));
        assert!(member_matches("/dev/disk/by-id/ata-X", "/dev/disk/by-id/ata-X-3"));

        assert!(!member_matches("/dev/sda", "/dev/sdab"));
        assert!(!member_matches("/dev/sda", "/dev/sda1x"));
        assert!(!member_matches("/dev/nvme0n1", "/dev/nvme0n12"));
        assert!(!member_matches("/dev/sda", "/dev/sdap1"));
        assert!(!member_matches("/dev/disk/by-id/ata-X", "/dev/disk/by-id/ata-X-part"));
        assert!(!member_matches("", "/dev/sda1"));
    }

    #[test]
    fn test_health_mapping() {
        assert_eq!(map_pool_health("ONLINE"), (DiskState::Online, true));
        assert_eq!(map_pool_health("degraded"), (DiskState::Degraded, true));
        assert_eq!(map_pool_health("FAULTED"), (DiskState::Faulted, true));
        assert_eq!(map_pool_health("UNAVAIL"), (DiskState::Unavail, true));
        assert_eq!(map_pool_health("OFFLINE"), (DiskState::Offline, true));
        assert_eq!(map_pool_health("REMOVED"), (DiskState::Online, false));
    }

    #[test]
    fn test_membership_through_link() {
        let pools = vec![PoolMembers {
            pool: "tank".to_string(),
            members: flatten_members(&tank()),
        }];

        let mut disk = PhysicalDisk::new("/dev/sdb");
        disk.set_device_links(["/dev/disk/by-id/ata-DISK_B"]);
        disk.state = DiskState::System;

        assert_eq!(apply_membership(&mut disk, &pools), StageOutcome::Applied);
        assert_eq!(disk.pool_name.as_deref(), Some("tank"));
        assert_eq!(disk.state, DiskState::Faulted);
    }

    #[test]
    fn test_first_pool_wins() {
        let pools = vec![
            PoolMembers {
                pool: "alpha".to_string(),
                members: vec![PoolMember {
                    path: "/dev/sdc1".to_string(),
                    state: "DEGRADED".to_string(),
                }],
            },
            PoolMembers {
                pool: "beta".to_string(),
                members: vec![PoolMember {
                    path: "/dev/sdc".to_string(),
                    state: "ONLINE".to_string(),
                }],
            },
        ];

        let mut disk = PhysicalDisk::new("/dev/sdc");
        apply_membership(&mut disk, &pools);
        assert_eq!(disk.pool_name.as_deref(), Some("alpha"));
        assert_eq!(disk.state, DiskState::Degraded);
    }

    #[test]
    fn test_no_match_leaves_state() {
        let pools = vec![PoolMembers {
            pool: "tank".to_string(),
            members: flatten_members(&tank()),
        }];
        let mut disk = PhysicalDisk::new("/dev/sdz");

        assert_eq!(apply_membership(&mut disk, &pools), StageOutcome::Unchanged);
        assert_eq!(disk.state, DiskState::Available);
        assert!(disk.pool_name.is_none());
    }

    proptest! {
        #[test]
        fn prop_partition_of_letter_base(base in "/dev/sd[a-z]{1,2}", part in 1u32..128) {
            let member = format!("{}{}", base, part);
            prop_assert!(member_matches(&base, &member));
            let member = format!("{}p{}", base, part);
            prop_assert!(!member_matches(&base, &member));
        }

        #[test]
        fn prop_partition_of_digit_base(ctrl in 0u32..8, ns in 1u32..8, part in 1u32..128) {
            let base = format!("/dev/nvme{}n{}", ctrl, ns);
            let member = format!("{}p{}", base, part);
            prop_assert!(member_matches(&base, &member));
            let member = format!("{}{}", base, part);
            prop_assert!(!member_matches(&base, &member));
        }

        #[test]
        fn prop_link_partition(id in "[a-zA-Z0-9_]{4,20}", part in 1u32..16, sep in "[-_]", word in proptest::bool::ANY) {
            let base = format!("/dev/disk/by-id/ata-{}", id);
            let member = format!("{}{}{}{}", base, sep, if word { "part" } else { "" }, part);
            prop_assert!(member_matches(&base, &member));
        }
    }
}

//! Placement rule engine
//!
//! Operators express placement constraints as VM tags:
//!
//! - `plb_affinity_<group>` keeps members of `<group>` co-located
//! - `plb_anti_affinity_<group>` spreads members of `<group>` apart
//! - `plb_pin_<host>` restricts a VM to the named host (multiple tags union)
//! - `plb_ignore_<reason>` excludes a VM from balancing entirely
//!
//! The engine is rebuilt from a fresh VM snapshot every cycle; VM placements
//! are stored once and groups reference them by id.

use crate::models::Vm;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

const AFFINITY_PREFIX: &str = "plb_affinity_";
const ANTI_AFFINITY_PREFIX: &str = "plb_anti_affinity_";
const PIN_PREFIX: &str = "plb_pin_";
const IGNORE_PREFIX: &str = "plb_ignore_";

/// Why a placement was rejected; one variant per rule
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlacementError {
    #[error("VM {vm} is ignored and cannot be moved")]
    Ignored { vm: String },

    #[error("VM {vm} is pinned to {allowed:?}, cannot move to {target}")]
    PinViolation {
        vm: String,
        allowed: Vec<String>,
        target: String,
    },

    #[error("VM {vm} belongs to affinity group {group}, but no other member is on {target}")]
    AffinityBroken {
        vm: String,
        group: String,
        target: String,
    },

    #[error("VM {vm} belongs to anti-affinity group {group}, and another member is already on {target}")]
    AntiAffinityConflict {
        vm: String,
        group: String,
        target: String,
    },
}

/// Minimal per-VM placement snapshot referenced from groups
#[derive(Debug, Clone)]
struct VmPlacement {
    name: String,
    host: String,
}

/// A tag-derived group: member ids plus the hosts those members occupy
#[derive(Debug, Clone, Default)]
pub struct TagGroup {
    pub members: BTreeSet<u32>,
    pub hosts: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct RuleEngine {
    vms: HashMap<u32, VmPlacement>,
    affinity: BTreeMap<String, TagGroup>,
    anti_affinity: BTreeMap<String, TagGroup>,
    pinned: HashMap<u32, BTreeSet<String>>,
    ignored: HashMap<u32, Vec<String>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild all rule state from a VM snapshot. Pure function of the
    /// input; previous state is discarded.
    pub fn ingest(&mut self, vms: &[Vm]) {
        self.vms.clear();
        self.affinity.clear();
        self.anti_affinity.clear();
        self.pinned.clear();
        self.ignored.clear();

        for vm in vms {
            self.vms.insert(
                vm.id,
                VmPlacement {
                    name: vm.name.clone(),
                    host: vm.host.clone(),
                },
            );
            for tag in &vm.tags {
                self.classify_tag(vm, tag.trim());
            }
        }
    }

    // Prefix priority order: affinity, anti-affinity, pin, ignore. Other
    // plb_* tags are informational and skipped silently.
    fn classify_tag(&mut self, vm: &Vm, tag: &str) {
        if let Some(group) = tag.strip_prefix(AFFINITY_PREFIX) {
            let entry = self.affinity.entry(group.to_string()).or_default();
            entry.members.insert(vm.id);
            entry.hosts.insert(vm.host.clone());
        } else if let Some(group) = tag.strip_prefix(ANTI_AFFINITY_PREFIX) {
            let entry = self.anti_affinity.entry(group.to_string()).or_default();
            entry.members.insert(vm.id);
            entry.hosts.insert(vm.host.clone());
        } else if let Some(host) = tag.strip_prefix(PIN_PREFIX) {
            self.pinned
                .entry(vm.id)
                .or_default()
                .insert(host.to_string());
        } else if let Some(reason) = tag.strip_prefix(IGNORE_PREFIX) {
            self.ignored
                .entry(vm.id)
                .or_default()
                .push(reason.to_string());
        }
    }

    pub fn is_ignored(&self, vm_id: u32) -> bool {
        self.ignored.contains_key(&vm_id)
    }

    pub fn is_pinned(&self, vm_id: u32) -> bool {
        self.pinned.contains_key(&vm_id)
    }

    pub fn pinned_hosts(&self, vm_id: u32) -> BTreeSet<String> {
        self.pinned.get(&vm_id).cloned().unwrap_or_default()
    }

    pub fn affinity_groups(&self) -> &BTreeMap<String, TagGroup> {
        &self.affinity
    }

    pub fn anti_affinity_groups(&self) -> &BTreeMap<String, TagGroup> {
        &self.anti_affinity
    }

    /// Ids of VMs sharing an anti-affinity group with `vm_id`.
    pub fn anti_affinity_peers(&self, vm_id: u32) -> BTreeSet<u32> {
        let mut peers = BTreeSet::new();
        for group in self.anti_affinity.values() {
            if group.members.contains(&vm_id) {
                peers.extend(group.members.iter().filter(|&&id| id != vm_id));
            }
        }
        peers
    }

    /// Validate moving `vm` onto `target`. Checks run in rule priority
    /// order: ignore, pin, affinity, anti-affinity.
    pub fn validate_placement(&self, vm: &Vm, target: &str) -> Result<(), PlacementError> {
        if self.is_ignored(vm.id) {
            return Err(PlacementError::Ignored {
                vm: vm.name.clone(),
            });
        }

        if let Some(allowed) = self.pinned.get(&vm.id) {
            if !allowed.contains(target) {
                return Err(PlacementError::PinViolation {
                    vm: vm.name.clone(),
                    allowed: allowed.iter().cloned().collect(),
                    target: target.to_string(),
                });
            }
        }

        for (name, group) in &self.affinity {
            if group.members.contains(&vm.id) {
                self.check_affinity(vm, target, name, group)?;
            }
        }

        for (name, group) in &self.anti_affinity {
            if group.members.contains(&vm.id) {
                self.check_anti_affinity(vm, target, name, group)?;
            }
        }

        Ok(())
    }

    /// Filter `candidates` down to hosts where `vm` may be placed.
    pub fn valid_targets<'a>(&self, vm: &Vm, candidates: &'a [String]) -> Vec<&'a String> {
        candidates
            .iter()
            .filter(|host| self.validate_placement(vm, host).is_ok())
            .collect()
    }

    fn check_affinity(
        &self,
        vm: &Vm,
        target: &str,
        name: &str,
        group: &TagGroup,
    ) -> Result<(), PlacementError> {
        let mut other_elsewhere = false;
        for &member in &group.members {
            if member == vm.id {
                continue;
            }
            let Some(placement) = self.vms.get(&member) else {
                continue;
            };
            if placement.host == target {
                // A group member already lives on the target.
                return Ok(());
            }
            other_elsewhere = true;
        }

        if other_elsewhere {
            return Err(PlacementError::AffinityBroken {
                vm: vm.name.clone(),
                group: name.to_string(),
                target: target.to_string(),
            });
        }
        // Solo member: free to move anywhere.
        Ok(())
    }

    fn check_anti_affinity(
        &self,
        vm: &Vm,
        target: &str,
        name: &str,
        group: &TagGroup,
    ) -> Result<(), PlacementError> {
        for &member in &group.members {
            if member == vm.id {
                continue;
            }
            if let Some(placement) = self.vms.get(&member) {
                if placement.host == target {
                    return Err(PlacementError::AntiAffinityConflict {
                        vm: vm.name.clone(),
                        group: name.to_string(),
                        target: target.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{VmKind, VmStatus};

    fn vm(id: u32, name: &str, host: &str, tags: &[&str]) -> Vm {
        Vm {
            id,
            name: name.to_string(),
            host: host.to_string(),
            kind: VmKind::Machine,
            status: VmStatus::Running,
            cpu_pct: 10.0,
            memory_bytes: 1 << 30,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            last_migrated: None,
        }
    }

    fn engine(vms: &[Vm]) -> RuleEngine {
        let mut e = RuleEngine::new();
        e.ingest(vms);
        e
    }

    #[test]
    fn parses_tag_namespace() {
        let vms = vec![
            vm(100, "web1", "a", &["plb_affinity_web", "prod"]),
            vm(101, "ntp1", "a", &["plb_anti_affinity_ntp"]),
            vm(102, "db", "a", &["plb_pin_a", " plb_pin_b "]),
            vm(103, "dev", "a", &["plb_ignore_dev"]),
            vm(104, "misc", "a", &["plb_unknown_thing"]),
        ];
        let e = engine(&vms);

        assert!(e.affinity_groups().contains_key("web"));
        assert_eq!(
            e.affinity_groups()["web"].hosts,
            BTreeSet::from(["a".to_string()])
        );
        assert!(e.anti_affinity_groups().contains_key("ntp"));
        assert!(e.is_pinned(102));
        assert_eq!(
            e.pinned_hosts(102),
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
        assert!(e.is_ignored(103));
        assert!(!e.is_ignored(104));
        assert!(!e.is_pinned(104));
    }

    #[test]
    fn ingest_is_idempotent() {
        let vms = vec![vm(100, "web1", "a", &["plb_affinity_web"])];
        let mut e = RuleEngine::new();
        e.ingest(&vms);
        e.ingest(&vms);
        assert_eq!(e.affinity_groups()["web"].members.len(), 1);

        e.ingest(&[]);
        assert!(e.affinity_groups().is_empty());
    }

    #[test]
    fn ignored_vm_rejects_every_target() {
        let vms = vec![vm(100, "dev", "a", &["plb_ignore_dev"])];
        let e = engine(&vms);
        assert_eq!(
            e.validate_placement(&vms[0], "b"),
            Err(PlacementError::Ignored {
                vm: "dev".to_string()
            })
        );
        assert!(e.valid_targets(&vms[0], &["b".to_string(), "c".to_string()]).is_empty());
    }

    #[test]
    fn pin_restricts_targets_to_union() {
        let vms = vec![vm(100, "db", "a", &["plb_pin_a", "plb_pin_b"])];
        let e = engine(&vms);
        assert!(e.validate_placement(&vms[0], "b").is_ok());
        assert!(matches!(
            e.validate_placement(&vms[0], "c"),
            Err(PlacementError::PinViolation { .. })
        ));
    }

    #[test]
    fn affinity_allows_join_and_forbids_split() {
        let vms = vec![
            vm(100, "web1", "a", &["plb_affinity_web"]),
            vm(101, "web2", "b", &["plb_affinity_web"]),
            vm(102, "web3", "a", &["plb_affinity_web"]),
        ];
        let e = engine(&vms);

        // web3 may join web2 on b; it may not split to an empty host c.
        assert!(e.validate_placement(&vms[2], "b").is_ok());
        assert!(matches!(
            e.validate_placement(&vms[2], "c"),
            Err(PlacementError::AffinityBroken { .. })
        ));
    }

    #[test]
    fn solo_affinity_member_moves_freely() {
        let vms = vec![vm(100, "web1", "a", &["plb_affinity_web"])];
        let e = engine(&vms);
        assert!(e.validate_placement(&vms[0], "c").is_ok());
    }

    #[test]
    fn anti_affinity_blocks_cohabitation() {
        let vms = vec![
            vm(100, "ntp1", "a", &["plb_anti_affinity_ntp"]),
            vm(101, "ntp2", "b", &["plb_anti_affinity_ntp"]),
        ];
        let e = engine(&vms);

        assert!(matches!(
            e.validate_placement(&vms[0], "b"),
            Err(PlacementError::AntiAffinityConflict { .. })
        ));
        assert!(e.validate_placement(&vms[0], "c").is_ok());

        let candidates = vec!["b".to_string(), "c".to_string()];
        let targets = e.valid_targets(&vms[0], &candidates);
        assert_eq!(targets, vec![&"c".to_string()]);
    }

    #[test]
    fn anti_affinity_peer_lookup() {
        let vms = vec![
            vm(100, "ntp1", "a", &["plb_anti_affinity_ntp"]),
            vm(101, "ntp2", "b", &["plb_anti_affinity_ntp"]),
            vm(102, "other", "c", &[]),
        ];
        let e = engine(&vms);
        assert_eq!(e.anti_affinity_peers(100), BTreeSet::from([101]));
        assert!(e.anti_affinity_peers(102).is_empty());
    }

    #[test]
    fn ignore_wins_over_pin() {
        let vms = vec![vm(100, "db", "a", &["plb_pin_b", "plb_ignore_locked"])];
        let e = engine(&vms);
        // The ignore rule is checked first and reported as the reason.
        assert!(matches!(
            e.validate_placement(&vms[0], "b"),
            Err(PlacementError::Ignored { .. })
        ));
    }

    #[test]
    fn whitespace_in_tags_is_trimmed() {
        let vms = vec![vm(100, "db", "a", &["  plb_pin_b  "])];
        let e = engine(&vms);
        assert_eq!(e.pinned_hosts(100), BTreeSet::from(["b".to_string()]));
    }
}

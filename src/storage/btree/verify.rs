use std::collections::HashSet;

use serde::Serialize;

use super::tree::BTree;
use crate::primitives::bytes::FixedCodec;
use crate::primitives::pager::SlotFile;
use crate::types::{Result, SlotOffset, SombraError};

const MAX_FINDINGS: usize = 32;

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Space is wasted but every reachable entry is intact.
    Warning,
    /// The tree or a free list is structurally broken.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Human-readable description of the issue.
    pub message: String,
}

/// Statistics collected during the verification process.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Nodes reachable from the root.
    pub nodes: u64,
    /// Entries stored across those nodes.
    pub entries: u64,
    /// Number of levels, counting the root.
    pub depth: u32,
    /// Slots on the node free list.
    pub free_node_slots: u64,
    /// Slots on the value free list.
    pub free_value_slots: u64,
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// Whether verification passed without any error finding.
    pub success: bool,
    /// List of issues discovered during verification, capped at a few dozen.
    pub findings: Vec<VerifyFinding>,
    /// Statistics about the structures examined.
    pub counts: VerifyCounts,
}

struct Pending<K> {
    offset: SlotOffset,
    depth: u32,
    lower: Option<K>,
    upper: Option<K>,
}

#[derive(Default)]
struct Findings(Vec<VerifyFinding>);

impl Findings {
    fn push(&mut self, severity: VerifySeverity, message: impl Into<String>) {
        if self.0.len() < MAX_FINDINGS {
            self.0.push(VerifyFinding {
                severity,
                message: message.into(),
            });
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.push(VerifySeverity::Error, message);
    }
}

impl<K, V> BTree<K, V>
where
    K: FixedCodec + Ord + Clone,
    V: FixedCodec,
{
    pub(super) fn verify_structure(&mut self) -> Result<VerifyReport> {
        let mut findings = Findings::default();
        let mut counts = VerifyCounts::default();
        let mut live_nodes = HashSet::new();
        let mut live_values = HashSet::new();
        let mut leaf_depth = None;
        let min_keys = self.layout.min_keys();
        let mut stack = vec![Pending {
            offset: self.root,
            depth: 0,
            lower: None,
            upper: None,
        }];

        while let Some(item) = stack.pop() {
            if !live_nodes.insert(item.offset.0) {
                findings.error(format!("node {} is reachable more than once", item.offset));
                continue;
            }
            let node = match self.read_node(item.offset) {
                Ok(node) => node,
                Err(SombraError::Corruption(why)) => {
                    findings.error(format!("node {}: {why}", item.offset));
                    continue;
                }
                Err(err) => return Err(err),
            };
            counts.nodes += 1;
            counts.entries += node.keys.len() as u64;

            if item.depth > 0 && node.keys.len() < min_keys {
                findings.error(format!(
                    "node {} holds {} keys, fewer than {min_keys}",
                    item.offset,
                    node.keys.len()
                ));
            }
            if item.depth == 0 && !node.is_leaf() && node.keys.is_empty() {
                findings.error("internal root holds no keys");
            }
            let below_lower = matches!((node.keys.first(), &item.lower), (Some(k), Some(lo)) if k <= lo);
            let above_upper = matches!((node.keys.last(), &item.upper), (Some(k), Some(hi)) if k >= hi);
            if below_lower || above_upper {
                findings.error(format!("node {} has keys outside its parent's bounds", item.offset));
            }
            for &value in &node.values {
                if !self.values.holds(value) {
                    findings.error(format!("node {} points at value {value} outside the value file", item.offset));
                } else if !live_values.insert(value) {
                    findings.error(format!("value slot {value} is shared by two entries"));
                }
            }

            if node.is_leaf() {
                match leaf_depth {
                    None => leaf_depth = Some(item.depth),
                    Some(depth) if depth != item.depth => findings.error(format!(
                        "leaf {} sits at depth {}, expected {depth}",
                        item.offset, item.depth
                    )),
                    Some(_) => {}
                }
                continue;
            }
            for (i, &child) in node.children.iter().enumerate().rev() {
                stack.push(Pending {
                    offset: child,
                    depth: item.depth + 1,
                    lower: if i == 0 { item.lower.clone() } else { node.keys.get(i - 1).cloned() },
                    upper: node.keys.get(i).cloned().or_else(|| item.upper.clone()),
                });
            }
        }
        counts.depth = leaf_depth.map_or(0, |depth| depth + 1);

        counts.free_node_slots =
            check_free_list(&self.nodes, "node", &live_nodes, &mut findings)?;
        counts.free_value_slots =
            check_free_list(&self.values, "value", &live_values, &mut findings)?;

        let leaked_nodes = self
            .nodes
            .slot_count()
            .saturating_sub(live_nodes.len() as u64 + counts.free_node_slots);
        if leaked_nodes > 0 {
            findings.push(
                VerifySeverity::Warning,
                format!("{leaked_nodes} node slots are neither live nor free"),
            );
        }
        let leaked_values = self
            .values
            .slot_count()
            .saturating_sub(live_values.len() as u64 + counts.free_value_slots);
        if leaked_values > 0 {
            findings.push(
                VerifySeverity::Warning,
                format!("{leaked_values} value slots are neither live nor free"),
            );
        }

        let findings = findings.0;
        Ok(VerifyReport {
            success: findings.iter().all(|f| f.severity != VerifySeverity::Error),
            findings,
            counts,
        })
    }
}

fn check_free_list(
    file: &SlotFile,
    label: &str,
    live: &HashSet<u64>,
    findings: &mut Findings,
) -> Result<u64> {
    match file.free_slots() {
        Ok(slots) => {
            for slot in &slots {
                if live.contains(&slot.0) {
                    findings.error(format!("free {label} slot {slot} is still referenced"));
                }
            }
            Ok(slots.len() as u64)
        }
        Err(SombraError::Corruption(why)) => {
            findings.error(format!("{label} free list: {why}"));
            Ok(0)
        }
        Err(err) => Err(err),
    }
}

//! Pool status via `zpool status -P`
//!
//! The `config:` section of each pool is an indentation tree. Two spaces
//! (tabs count as eight) make one level; `logs`, `cache`, `spares`,
//! `special` and `dedup` are printed at the pool's own level but belong to
//! it:
//!
//! ```text
//!         NAME                          STATE     READ WRITE CKSUM
//!         tank                          DEGRADED     0     0     0
//!           mirror-0                    DEGRADED     0     0     0
//!             /dev/disk/by-id/ata-A-part1  ONLINE    0     0     0
//!             /dev/disk/by-id/ata-B-part1  FAULTED   3     0     0  too many errors
//!         logs
//!           /dev/nvme0n1p4              ONLINE       0     0     0
//!         spares
//!           /dev/sdd1                   AVAIL
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::ports::{CommandRunner, PoolStatusMap, PoolStatusSource, ProbeContext, VdevNode};
use crate::error::{Error, Result};

const PROBE: &str = "zpool";

/// `PoolStatusSource` backed by `zpool status`
pub struct ZpoolStatusProbe {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl ZpoolStatusProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }
}

#[async_trait]
impl PoolStatusSource for ZpoolStatusProbe {
    fn required_tool(&self) -> Option<&str> {
        Some(self.program.as_str())
    }

    async fn query_pool_status(&self, ctx: &ProbeContext) -> Result<PoolStatusMap> {
        let output = self.runner.run(&self.program, &["status", "-P"], ctx).await?;
        if !output.success() {
            return Err(Error::probe_failed(&self.program, output.error_summary()));
        }
        parse_zpool_status(&output.stdout)
    }
}

fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 8 } else { 1 })
        .sum()
}

/// Parse the full output of `zpool status`.
pub fn parse_zpool_status(text: &str) -> Result<PoolStatusMap> {
    let mut pools = PoolStatusMap::new();
    if text.trim().is_empty() || text.trim() == "no pools available" {
        return Ok(pools);
    }

    let mut lines = text.lines().peekable();
    while let Some(line) = lines.next() {
        let Some(name) = line.trim().strip_prefix("pool:") else {
            continue;
        };
        let name = name.trim().to_string();

        // Everything up to the next pool header belongs to this pool.
        let mut block = Vec::new();
        while let Some(next) = lines.peek() {
            if next.trim_start().starts_with("pool:") {
                break;
            }
            block.push(*next);
            lines.next();
        }

        let root = parse_config_tree(&block)
            .map_err(|reason| Error::probe_parse(PROBE, format!("pool {}: {}", name, reason)))?;
        pools.insert(name, root);
    }

    Ok(pools)
}

/// Build the device tree from the lines following a `pool:` header.
fn parse_config_tree(lines: &[&str]) -> std::result::Result<VdevNode, String> {
    let header = lines
        .iter()
        .position(|l| l.split_whitespace().next() == Some("NAME"))
        .ok_or("missing config header")?;
    let base = indent_width(lines[header]);

    let mut entries = Vec::new();
    let mut in_section = false;
    for line in &lines[header + 1..] {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("errors:") {
            break;
        }

        let indent = indent_width(line);
        if indent < base || (indent - base) % 2 != 0 {
            return Err(format!("bad indentation: {:?}", line));
        }
        let level = (indent - base) / 2;

        let mut fields = trimmed.split_whitespace();
        let name = fields.next().unwrap_or_default();
        let node = match fields.next() {
            Some(state) => VdevNode::new(name, state),
            None => VdevNode::section(name),
        };

        let depth = if entries.is_empty() {
            level
        } else if level == 0 {
            in_section = true;
            1
        } else if in_section {
            level + 1
        } else {
            level
        };
        entries.push((depth, node));
    }

    build_tree(entries)
}

fn build_tree(entries: Vec<(usize, VdevNode)>) -> std::result::Result<VdevNode, String> {
    let mut stack: Vec<(usize, VdevNode)> = Vec::new();

    for (depth, node) in entries {
        if stack.is_empty() {
            if depth != 0 {
                return Err(format!("tree does not start at the pool: {}", node.name));
            }
            stack.push((depth, node));
            continue;
        }
        if depth == 0 {
            return Err(format!("second root: {}", node.name));
        }

        while stack.last().is_some_and(|(d, _)| *d >= depth) {
            fold_top(&mut stack);
        }
        if stack.last().is_some_and(|(d, _)| depth > d + 1) {
            return Err(format!("skipped indentation level at {}", node.name));
        }
        stack.push((depth, node));
    }

    while stack.len() > 1 {
        fold_top(&mut stack);
    }
    stack.pop().map(|(_, root)| root).ok_or_else(|| "empty config".to_string())
}

fn fold_top(stack: &mut Vec<(usize, VdevNode)>) {
    if let Some((_, done)) = stack.pop() {
        if let Some((_, parent)) = stack.last_mut() {
            parent.children.push(done);
        }
    }
}

//! Node positions for the dashboard graph view.

use std::collections::BTreeMap;

use crate::error::GraphError;
use crate::validate::{NodeDeps, level_pairs, topo_pairs};

const X_GAP: u32 = 200;
const Y_GAP: u32 = 120;
const NODE_W: u32 = 140;
const NODE_H: u32 = 48;
const MARGIN: u32 = 40;

/// Computed canvas layout: one position per node plus the canvas extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub positions: BTreeMap<String, (u32, u32)>,
    pub width: u32,
    pub height: u32,
}

/// Place nodes on a grid: column by dependency level, row by arrival order
/// within the level.
pub fn layout_positions(nodes: &[NodeDeps]) -> Result<Layout, GraphError> {
    let order = topo_pairs(nodes)?;
    let level = level_pairs(nodes, &order);

    let mut grouped: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
    for (name, _) in nodes {
        grouped.entry(level[name]).or_default().push(name.as_str());
    }

    let mut positions = BTreeMap::new();
    let mut width = 0;
    let mut height = 0;
    for (lvl, names) in &grouped {
        for (idx, name) in names.iter().enumerate() {
            let x = MARGIN + (*lvl as u32) * X_GAP;
            let y = MARGIN + (idx as u32) * Y_GAP;
            positions.insert(name.to_string(), (x, y));
            width = width.max(x + NODE_W + MARGIN);
            height = height.max(y + NODE_H + MARGIN);
        }
    }

    Ok(Layout {
        positions,
        width,
        height,
    })
}

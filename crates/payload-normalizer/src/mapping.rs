use tracing::warn;

use property_table::schema::{self, CELL_COUNT};
use property_table::PropertyTable;

use crate::node::Node;
use crate::PayloadUpdate;

/// How the children of a top-level object map onto bus paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// `/Key/Subkey`
    Group,
    /// `/Key/<channel>/Subkey`, with channel `0` implied for direct leaves.
    Channels,
    /// `/Key/Cell<n>` for `"Cell<n>"` or `"<n>"` keys, `/Key/Subkey` otherwise.
    Cells,
}

const SECTION_LAYOUTS: &[(&str, Layout)] = &[
    ("Dc", Layout::Channels),
    ("Voltages", Layout::Cells),
    ("Balances", Layout::Cells),
];

fn layout_for(key: &str) -> Layout {
    SECTION_LAYOUTS
        .iter()
        .find(|(section, _)| *section == key)
        .map(|(_, layout)| *layout)
        .unwrap_or(Layout::Group)
}

pub(crate) fn flatten(root: &[(String, Node)], table: &PropertyTable) -> PayloadUpdate {
    let mut flat = Flattener {
        table,
        update: PayloadUpdate::default(),
    };

    for (key, node) in root {
        if schema::is_ignored(key) {
            continue;
        }
        match node {
            Node::Map(children) => flat.section(key, children),
            leaf => flat.leaf(format!("/{key}"), leaf),
        }
    }

    flat.update
}

struct Flattener<'a> {
    table: &'a PropertyTable,
    update: PayloadUpdate,
}

impl Flattener<'_> {
    fn section(&mut self, key: &str, children: &[(String, Node)]) {
        let layout = layout_for(key);
        for (sub, node) in children {
            match layout {
                Layout::Channels if is_channel(sub) => match node {
                    Node::Map(leaves) => {
                        for (leaf_key, leaf) in leaves {
                            self.leaf(format!("/{key}/{sub}/{leaf_key}"), leaf);
                        }
                    }
                    other => self.unknown(&format!("{key}.{sub}"), other),
                },
                Layout::Channels => self.leaf(format!("/{key}/0/{sub}"), node),
                Layout::Cells => match cell_index(sub) {
                    Some(index) => {
                        let path = format!("/{key}/Cell{index}");
                        if key == "Voltages" {
                            self.update.cell_map_present = true;
                            if let Node::Scalar(value) = node {
                                if let Some(voltage) = value.as_f64().filter(|v| *v != 0.0) {
                                    self.update.cell_voltages.push((index, voltage));
                                }
                            }
                        }
                        self.leaf(path, node);
                    }
                    None => self.leaf(format!("/{key}/{sub}"), node),
                },
                Layout::Group => self.leaf(format!("/{key}/{sub}"), node),
            }
        }
    }

    fn leaf(&mut self, path: String, node: &Node) {
        let value = match node {
            Node::Scalar(value) => value,
            Node::Absent if self.table.contains(&path) => {
                self.update.writes.push((path, None));
                return;
            }
            other => {
                self.unknown(&path, other);
                return;
            }
        };

        if !self.table.contains(&path) {
            self.unknown(&path, node);
            return;
        }
        if let Err(err) = self.table.check(&path, Some(value)) {
            warn!(path = %path, value = %value, error = %err, "payload value has the wrong type, skipping");
            self.update.skipped += 1;
            return;
        }

        // Zero and empty string are published as "unknown".
        if value.is_falsy() {
            self.update.writes.push((path, None));
        } else {
            self.update.supplied.insert(path.clone());
            self.update.writes.push((path, Some(value.clone())));
        }
    }

    fn unknown(&mut self, key: &str, node: &Node) {
        warn!(key, value = %node.describe(), "unknown field in payload, skipping");
        self.update.skipped += 1;
    }
}

fn is_channel(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit())
}

fn cell_index(key: &str) -> Option<usize> {
    let digits = key.strip_prefix("Cell").unwrap_or(key);
    let index = digits.parse::<usize>().ok()?;
    (1..=CELL_COUNT).contains(&index).then_some(index)
}

/// Scalar helper for the schema gate.
pub(crate) fn is_present(node: Option<&Node>) -> bool {
    matches!(node, Some(Node::Scalar(_)) | Some(Node::Absent))
}

use crate::error::{LoaderError, Result};
use crate::schema::LoaderConfig;
use indexmap::{IndexMap, IndexSet};
use log::debug;
use std::collections::{BTreeSet, HashMap};

/// The order lists, and tables within each list, are handed to a sink.
///
/// For every foreign key `A -> B` between mapped tables, `B` is written before
/// `A` is attempted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessingOrder {
    pub lists: Vec<ListOrder>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListOrder {
    pub list: String,
    pub tables: Vec<String>,
}

impl ProcessingOrder {
    /// First-appearance order, used when no foreign keys are configured.
    pub fn from_groups(groups: &IndexMap<String, IndexSet<String>>) -> Self {
        Self {
            lists: groups
                .iter()
                .map(|(list, tables)| ListOrder {
                    list: list.clone(),
                    tables: tables.iter().cloned().collect(),
                })
                .collect(),
        }
    }

    pub fn list_rank(&self, list: &str) -> Option<usize> {
        self.lists.iter().position(|l| l.list == list)
    }

    pub fn table_rank(&self, list: &str, table: &str) -> Option<usize> {
        self.lists
            .iter()
            .find(|l| l.list == list)
            .and_then(|l| l.tables.iter().position(|t| t == table))
    }

    pub fn list_names(&self) -> impl Iterator<Item = &str> {
        self.lists.iter().map(|l| l.list.as_str())
    }
}

/// Foreign-key graph over the tables named by the mapping.
pub struct DependencyGraph {
    groups: IndexMap<String, IndexSet<String>>,
    references: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new(
        groups: IndexMap<String, IndexSet<String>>,
        references: HashMap<String, Vec<String>>,
    ) -> Self {
        Self { groups, references }
    }

    /// Groups the config's mapping rows by list and table in first-appearance
    /// order and collects each table's `references`.
    pub fn from_config(config: &LoaderConfig) -> Self {
        let mut groups: IndexMap<String, IndexSet<String>> = IndexMap::new();
        for entry in &config.mapping {
            groups
                .entry(entry.list.clone())
                .or_default()
                .insert(entry.table.clone());
        }

        let references = config
            .tables
            .iter()
            .filter(|t| !t.references.is_empty())
            .map(|t| (t.name.clone(), t.references.clone()))
            .collect();

        Self::new(groups, references)
    }

    pub fn has_references(&self) -> bool {
        !self.references.is_empty()
    }

    fn is_mapped(&self, table: &str) -> bool {
        self.groups.values().any(|tables| tables.contains(table))
    }

    /// Referenced tables that are themselves mapped. References to tables the
    /// run never writes, and self references, impose no order.
    fn mapped_references<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.references
            .get(table)
            .into_iter()
            .flatten()
            .map(|s| s.as_str())
            .filter(move |r| *r != table && self.is_mapped(r))
    }

    /// Length of the longest foreign-key chain starting at each mapped table.
    pub fn table_depths(&self) -> Result<HashMap<String, usize>> {
        let mut depths = HashMap::new();
        for tables in self.groups.values() {
            for table in tables {
                let mut path = Vec::new();
                self.depth_of(table, &mut depths, &mut path)?;
            }
        }
        Ok(depths)
    }

    fn depth_of(
        &self,
        table: &str,
        depths: &mut HashMap<String, usize>,
        path: &mut Vec<String>,
    ) -> Result<usize> {
        if let Some(depth) = depths.get(table) {
            return Ok(*depth);
        }
        if let Some(start) = path.iter().position(|t| t == table) {
            let mut cycle = path[start..].to_vec();
            cycle.push(table.to_string());
            return Err(LoaderError::DependencyCycle(cycle.join(" -> ")));
        }

        path.push(table.to_string());
        let mut depth = 0;
        for referenced in self.mapped_references(table) {
            depth = depth.max(self.depth_of(referenced, depths, path)? + 1);
        }
        path.pop();

        depths.insert(table.to_string(), depth);
        Ok(depth)
    }

    pub fn order(&self) -> Result<ProcessingOrder> {
        let depths = self.table_depths()?;

        let list_names: Vec<&String> = self.groups.keys().collect();
        let list_of = |table: &str| -> Vec<usize> {
            self.groups
                .values()
                .enumerate()
                .filter(|(_, tables)| tables.contains(table))
                .map(|(idx, _)| idx)
                .collect()
        };

        // prerequisites[i]: lists that must be written before list i
        let mut prerequisites: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); list_names.len()];
        for (idx, tables) in self.groups.values().enumerate() {
            for table in tables {
                for referenced in self.mapped_references(table) {
                    for before in list_of(referenced) {
                        if before != idx {
                            prerequisites[idx].insert(before);
                        }
                    }
                }
            }
        }

        let mut placed: Vec<usize> = Vec::with_capacity(list_names.len());
        while placed.len() < list_names.len() {
            let next = (0..list_names.len()).find(|idx| {
                !placed.contains(idx) && prerequisites[*idx].iter().all(|p| placed.contains(p))
            });
            match next {
                Some(idx) => placed.push(idx),
                None => {
                    let stuck: Vec<&str> = (0..list_names.len())
                        .filter(|idx| !placed.contains(idx))
                        .map(|idx| list_names[idx].as_str())
                        .collect();
                    return Err(LoaderError::DependencyCycle(format!(
                        "lists {} reference each other",
                        stuck.join(", ")
                    )));
                }
            }
        }

        let lists = placed
            .into_iter()
            .filter_map(|idx| self.groups.get_index(idx))
            .map(|(list, tables)| {
                let mut tables: Vec<String> = tables.iter().cloned().collect();
                // stable: ties keep first-appearance order
                tables.sort_by_key(|t| depths.get(t).copied().unwrap_or(0));
                debug!("Processing order for {}: {}", list, tables.join(", "));
                ListOrder {
                    list: list.clone(),
                    tables,
                }
            })
            .collect();

        Ok(ProcessingOrder { lists })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(entries: &[(&str, &[&str])]) -> IndexMap<String, IndexSet<String>> {
        entries
            .iter()
            .map(|(list, tables)| {
                (
                    list.to_string(),
                    tables.iter().map(|t| t.to_string()).collect(),
                )
            })
            .collect()
    }

    fn refs(entries: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(t, r)| (t.to_string(), r.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_referenced_table_comes_first_within_list() {
        let graph = DependencyGraph::new(
            groups(&[("BANKTRANLIST", &["Orders", "Accounts"])]),
            refs(&[("Orders", &["Accounts"])]),
        );
        let order = graph.order().unwrap();
        assert_eq!(order.lists[0].tables, vec!["Accounts", "Orders"]);
        assert_eq!(order.table_rank("BANKTRANLIST", "Accounts"), Some(0));
    }

    #[test]
    fn test_referenced_list_comes_first() {
        let graph = DependencyGraph::new(
            groups(&[
                ("INVSTMTRS/INVTRANLIST", &["Transactions"]),
                ("SECLIST", &["Securities"]),
            ]),
            refs(&[("Transactions", &["Securities"])]),
        );
        let order = graph.order().unwrap();
        let names: Vec<&str> = order.list_names().collect();
        assert_eq!(names, vec!["SECLIST", "INVSTMTRS/INVTRANLIST"]);
    }

    #[test]
    fn test_depths_follow_longest_chain() {
        let graph = DependencyGraph::new(
            groups(&[("L", &["Lots", "Orders", "Accounts", "Banks"])]),
            refs(&[
                ("Lots", &["Orders", "Accounts"]),
                ("Orders", &["Accounts"]),
                ("Accounts", &["Banks", "Unmapped"]),
                ("Banks", &["Banks"]),
            ]),
        );
        let depths = graph.table_depths().unwrap();
        assert_eq!(depths["Banks"], 0);
        assert_eq!(depths["Accounts"], 1);
        assert_eq!(depths["Orders"], 2);
        assert_eq!(depths["Lots"], 3);

        let order = graph.order().unwrap();
        assert_eq!(order.lists[0].tables, vec!["Banks", "Accounts", "Orders", "Lots"]);
    }

    #[test]
    fn test_cycle_is_a_configuration_error() {
        let graph = DependencyGraph::new(
            groups(&[("L", &["A", "B"])]),
            refs(&[("A", &["B"]), ("B", &["A"])]),
        );
        let err = graph.order().unwrap_err();
        assert!(matches!(err, LoaderError::DependencyCycle(_)));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_no_references_keeps_appearance_order() {
        let g = groups(&[("SECLIST", &["Securities"]), ("INVPOSLIST", &["Positions", "Lots"])]);
        let graph = DependencyGraph::new(g.clone(), HashMap::new());
        assert!(!graph.has_references());
        assert_eq!(graph.order().unwrap(), ProcessingOrder::from_groups(&g));
    }
}

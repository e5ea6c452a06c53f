// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Reference resolution
//!
//! Resolves named cross-references between declared records into a
//! directed reference graph, before anything is sent to the server. The
//! graph also yields the intra-stage application levels (a composite view
//! after its components, an environment after its prior) and the lifecycle
//! chain of every organization.

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap};

use crate::errors::{ContentflowError, ContentflowResult};
use crate::pipeline::Stage;
use crate::promotion::LifecycleChain;
use crate::resources::{
    RecordKey, ResourceKind, ResourceRecord, ResourceSet, VersionBinding, LIBRARY,
};

/// A reference after name lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReference {
    /// Declaring field
    pub field: &'static str,
    /// Record the reference points at
    pub target: RecordKey,
    /// Version binding, for composite view components
    pub binding: Option<VersionBinding>,
    /// Target is the implicit Library environment, which is never declared
    pub implicit: bool,
}

/// Resolved reference graph over a [`ResourceSet`]
#[derive(Debug)]
pub struct ResolvedGraph {
    /// Edges point from a referenced record to the record referencing it
    graph: DiGraph<RecordKey, &'static str>,
    key_to_index: HashMap<RecordKey, NodeIndex>,
    references: HashMap<RecordKey, Vec<ResolvedReference>>,
    levels: BTreeMap<Stage, Vec<Vec<RecordKey>>>,
    chains: BTreeMap<String, LifecycleChain>,
}

/// Reference resolver
pub struct ReferenceResolver;

impl ReferenceResolver {
    /// Resolve every reference in the set, failing on the first structural problem
    pub fn resolve(set: &ResourceSet) -> ContentflowResult<ResolvedGraph> {
        let mut graph = DiGraph::new();
        let mut key_to_index = HashMap::new();

        for record in set.iter() {
            let key = record.key();
            let node = graph.add_node(key.clone());
            key_to_index.insert(key, node);
        }

        let defaults = default_priors(set);
        let mut references = HashMap::new();

        for record in set.iter() {
            let key = record.key();
            let mut resolved = Vec::new();

            for reference in &record.references {
                let target = lookup(set, record, reference.targets, &reference.name)?;
                resolved.push(ResolvedReference {
                    field: reference.field,
                    implicit: is_library(&target),
                    target,
                    binding: reference.binding,
                });
            }

            if let Some(prior) = defaults.get(&key) {
                resolved.push(ResolvedReference {
                    field: "prior",
                    implicit: is_library(prior),
                    target: prior.clone(),
                    binding: None,
                });
            }

            for reference in &resolved {
                if reference.implicit {
                    continue;
                }
                if Stage::of(reference.target.kind).rank() > Stage::of(key.kind).rank() {
                    return Err(ContentflowError::ReferenceOrder {
                        referencing: key.to_string(),
                        target: reference.target.to_string(),
                    });
                }
                let from = key_to_index[&reference.target];
                let to = key_to_index[&key];
                if !graph.contains_edge(from, to) {
                    graph.add_edge(from, to, reference.field);
                }
            }

            references.insert(key, resolved);
        }

        let mut resolved = ResolvedGraph {
            graph,
            key_to_index,
            references,
            levels: BTreeMap::new(),
            chains: BTreeMap::new(),
        };

        resolved.validate_acyclic()?;
        resolved.validate_components()?;
        resolved.build_levels(set)?;
        resolved.build_chains(set)?;

        tracing::debug!(
            records = resolved.graph.node_count(),
            references = resolved.graph.edge_count(),
            "resolved reference graph"
        );

        Ok(resolved)
    }
}

fn is_library(key: &RecordKey) -> bool {
    key.kind == ResourceKind::LifecycleEnvironment && key.name == LIBRARY
}

/// Find the record a name refers to within the referencing record's organization
fn lookup(
    set: &ResourceSet,
    record: &ResourceRecord,
    targets: &[ResourceKind],
    name: &str,
) -> ContentflowResult<RecordKey> {
    if name == LIBRARY && targets.contains(&ResourceKind::LifecycleEnvironment) {
        return Ok(RecordKey::new(
            ResourceKind::LifecycleEnvironment,
            &record.organization,
            LIBRARY,
        ));
    }

    let matches: Vec<RecordKey> = targets
        .iter()
        .map(|kind| RecordKey::new(*kind, &record.organization, name))
        .filter(|key| set.get(key).is_some())
        .collect();

    match matches.as_slice() {
        [] => Err(ContentflowError::UnresolvedReference {
            kind: targets[0],
            name: name.to_string(),
            referencing: record.key().to_string(),
        }),
        [only] => Ok(only.clone()),
        _ => Err(ContentflowError::AmbiguousReference {
            referencing: record.key().to_string(),
            name: name.to_string(),
            kinds: matches
                .iter()
                .map(|k| k.kind.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}

/// Environments without an explicit `prior` follow the one declared before them
fn default_priors(set: &ResourceSet) -> HashMap<RecordKey, RecordKey> {
    let mut defaults = HashMap::new();
    let mut previous: HashMap<&str, &str> = HashMap::new();

    for env in set.records(ResourceKind::LifecycleEnvironment) {
        let org = env.organization.as_str();
        if env.references_in("prior").next().is_none() {
            let prior = previous.get(org).copied().unwrap_or(LIBRARY);
            defaults.insert(
                env.key(),
                RecordKey::new(ResourceKind::LifecycleEnvironment, org, prior),
            );
        }
        previous.insert(org, env.name.as_str());
    }

    defaults
}

impl ResolvedGraph {
    fn validate_acyclic(&self) -> ContentflowResult<()> {
        if toposort(&self.graph, None).is_ok() {
            return Ok(());
        }

        let cycle = tarjan_scc(&self.graph)
            .into_iter()
            .find(|scc| {
                scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0])
            })
            .unwrap_or_default();

        let mut records: Vec<String> = cycle
            .iter()
            .rev()
            .map(|n| self.graph[*n].to_string())
            .collect();
        if let Some(first) = records.first().cloned() {
            records.push(first);
        }

        Err(ContentflowError::CyclicReference { records })
    }

    /// Composite views may only include plain content views
    fn validate_components(&self) -> ContentflowResult<()> {
        let errors: Vec<String> = self
            .references
            .iter()
            .filter(|(key, _)| key.kind == ResourceKind::CompositeContentView)
            .flat_map(|(key, refs)| {
                refs.iter()
                    .filter(|r| r.target.kind == ResourceKind::CompositeContentView)
                    .map(move |r| {
                        format!(
                            "{} includes composite '{}'; components must be plain content views",
                            key, r.target.name
                        )
                    })
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ContentflowError::Validation { errors })
        }
    }

    /// Group each stage's records into levels; a record's level is one past
    /// the deepest same-stage record it references
    fn build_levels(&mut self, set: &ResourceSet) -> ContentflowResult<()> {
        let order = toposort(&self.graph, None).map_err(|cycle| {
            ContentflowError::CyclicReference {
                records: vec![self.graph[cycle.node_id()].to_string()],
            }
        })?;

        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        for node in order {
            let stage = Stage::of(self.graph[node].kind);
            let level = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .filter(|pred| Stage::of(self.graph[*pred].kind) == stage)
                .map(|pred| depth.get(&pred).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            depth.insert(node, level);
        }

        // Walk in declaration order so levels keep it
        for record in set.iter() {
            let key = record.key();
            let level = depth[&self.key_to_index[&key]];
            let levels = self.levels.entry(Stage::of(key.kind)).or_default();
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(key);
        }

        Ok(())
    }

    fn build_chains(&mut self, set: &ResourceSet) -> ContentflowResult<()> {
        for organization in set.organizations() {
            let mut successors: HashMap<String, String> = HashMap::new();
            let mut count = 0;

            for env in set
                .records(ResourceKind::LifecycleEnvironment)
                .iter()
                .filter(|e| e.organization == organization)
            {
                count += 1;
                let prior = self
                    .references(&env.key())
                    .iter()
                    .find(|r| r.field == "prior")
                    .map(|r| r.target.name.clone())
                    .unwrap_or_else(|| LIBRARY.to_string());

                if let Some(existing) = successors.insert(prior.clone(), env.name.clone()) {
                    return Err(ContentflowError::InvalidLifecycleChain {
                        organization: organization.clone(),
                        reason: format!(
                            "'{}' and '{}' both follow '{}'",
                            existing, env.name, prior
                        ),
                    });
                }
            }

            let mut environments = Vec::new();
            let mut current = LIBRARY.to_string();
            while let Some(next) = successors.get(&current) {
                environments.push(next.clone());
                current = next.clone();
            }

            if environments.len() != count {
                return Err(ContentflowError::InvalidLifecycleChain {
                    organization: organization.clone(),
                    reason: "some environments are not reachable from Library".into(),
                });
            }

            self.chains.insert(
                organization.clone(),
                LifecycleChain::new(&organization, environments),
            );
        }

        Ok(())
    }

    /// Resolved references of a record
    pub fn references(&self, key: &RecordKey) -> &[ResolvedReference] {
        self.references.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Application levels of a stage; records within a level are independent
    pub fn levels(&self, stage: Stage) -> &[Vec<RecordKey>] {
        self.levels.get(&stage).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Lifecycle chain of an organization; Library-only when none are declared
    pub fn chain(&self, organization: &str) -> LifecycleChain {
        self.chains
            .get(organization)
            .cloned()
            .unwrap_or_else(|| LifecycleChain::library_only(organization))
    }

    /// All chains, by organization
    pub fn chains(&self) -> impl Iterator<Item = &LifecycleChain> {
        self.chains.values()
    }

    /// Records a record references directly
    pub fn dependencies(&self, key: &RecordKey) -> Vec<RecordKey> {
        self.neighbors(key, Direction::Incoming)
    }

    /// Records that reference a record directly
    pub fn dependents(&self, key: &RecordKey) -> Vec<RecordKey> {
        self.neighbors(key, Direction::Outgoing)
    }

    fn neighbors(&self, key: &RecordKey, direction: Direction) -> Vec<RecordKey> {
        let Some(node) = self.key_to_index.get(key) else {
            return Vec::new();
        };
        let mut keys: Vec<RecordKey> = self
            .graph
            .neighbors_directed(*node, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        keys.sort();
        keys
    }

    /// Check if record A depends (directly or transitively) on record B
    pub fn depends_on(&self, a: &RecordKey, b: &RecordKey) -> bool {
        let (Some(node_a), Some(node_b)) = (self.key_to_index.get(a), self.key_to_index.get(b))
        else {
            return false;
        };
        petgraph::algo::has_path_connecting(&self.graph, *node_b, *node_a, None)
    }

    pub fn record_count(&self) -> usize {
        self.graph.node_count()
    }

    fn node_id(key: &RecordKey) -> String {
        format!("{}_{}_{}", key.kind, key.organization, key.name)
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }

    /// Generate Mermaid diagram of the reference graph
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for node in self.graph.node_indices() {
            let key = &self.graph[node];
            out.push_str(&format!(
                "    {}[\"{}: {}\"]\n",
                Self::node_id(key),
                key.kind,
                key.name
            ));
        }

        for edge in self.graph.edge_indices() {
            if let Some((from, to)) = self.graph.edge_endpoints(edge) {
                out.push_str(&format!(
                    "    {} -->|{}| {}\n",
                    Self::node_id(&self.graph[from]),
                    self.graph[edge],
                    Self::node_id(&self.graph[to])
                ));
            }
        }

        out
    }

    /// Generate DOT diagram of the reference graph
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph references {\n");
        out.push_str("    rankdir=LR;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for node in self.graph.node_indices() {
            let key = &self.graph[node];
            out.push_str(&format!(
                "    \"{}\" [label=\"{}\\n{}\"];\n",
                Self::node_id(key),
                key.kind,
                key.name
            ));
        }

        for edge in self.graph.edge_indices() {
            if let Some((from, to)) = self.graph.edge_endpoints(edge) {
                out.push_str(&format!(
                    "    \"{}\" -> \"{}\" [label=\"{}\"];\n",
                    Self::node_id(&self.graph[from]),
                    Self::node_id(&self.graph[to]),
                    self.graph[edge]
                ));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Text representation of the application plan
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let mut step = 1;

        for stage in Stage::ALL {
            if !stage.reconciles_records() {
                out.push_str(&format!("{}. {}\n", step, stage));
                for chain in self.chains() {
                    out.push_str(&format!("   chain [{}]: {}\n", chain.organization(), chain));
                }
                step += 1;
                continue;
            }

            let levels = self.levels(stage);
            if levels.is_empty() {
                continue;
            }

            out.push_str(&format!("{}. {}\n", step, stage));
            for (i, level) in levels.iter().enumerate() {
                for key in level {
                    let deps: Vec<String> = self
                        .references(key)
                        .iter()
                        .map(|r| format!("{}={}", r.field, r.target.name))
                        .collect();
                    out.push_str(&format!("   [{}] {}", i, key));
                    if !deps.is_empty() {
                        out.push_str(&format!(" ({})", deps.join(", ")));
                    }
                    out.push('\n');
                }
            }
            step += 1;
        }

        out
    }
}

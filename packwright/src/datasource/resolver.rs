//! Dependency-ordered evaluation of datasource declarations.
//!
//! Declarations whose dependencies have all been evaluated are started
//! together; each one runs through
//! `Declared -> Starting -> Configured -> Evaluated | Failed`.
//! Problems never stop unrelated declarations: every failure becomes a
//! diagnostic and the caller decides what to do with the report.

use super::declaration::{DatasourceDeclaration, DatasourceRef, Expr};
use super::registry::DatasourceRegistry;
use super::value::{DatasourceValues, Resolved};
use crate::cancellation::CancellationToken;
use crate::diagnostics::{Diagnostic, Diagnostics};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Whether plugins compute real values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveMode {
    /// Configure and execute every plugin.
    #[default]
    Execute,
    /// Configure only; values are the output schema's placeholders.
    Validate,
}

/// Lifecycle of a single declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasourceState {
    /// Accepted for resolution.
    Declared,
    /// Plugin instance started.
    Starting,
    /// Plugin accepted its configuration.
    Configured,
    /// Value computed and stored.
    Evaluated,
    /// Will not produce a value.
    Failed,
}

/// Result of [`Resolver::resolve`].
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Values of the evaluated declarations.
    pub values: DatasourceValues,
    /// Every diagnostic, in the order it was raised.
    pub diagnostics: Diagnostics,
    /// State history per declaration.
    pub states: BTreeMap<DatasourceRef, Vec<DatasourceState>>,
}

impl Resolution {
    /// Returns true if no error diagnostic was raised.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.diagnostics.has_errors()
    }

    /// Returns the final state of a declaration.
    #[must_use]
    pub fn state_of(&self, r: &DatasourceRef) -> Option<DatasourceState> {
        self.states.get(r).and_then(|history| history.last().copied())
    }

    /// Splits into the value map and the diagnostics.
    #[must_use]
    pub fn into_parts(self) -> (DatasourceValues, Diagnostics) {
        (self.values, self.diagnostics)
    }

    fn fail(&mut self, r: &DatasourceRef, failed: &mut BTreeSet<DatasourceRef>) {
        self.states.entry(r.clone()).or_default().push(DatasourceState::Failed);
        failed.insert(r.clone());
    }
}

struct Node<'a> {
    decl: &'a DatasourceDeclaration,
    deps: BTreeSet<DatasourceRef>,
}

struct Evaluation {
    reference: DatasourceRef,
    transitions: Vec<DatasourceState>,
    result: Result<Value, Diagnostics>,
}

/// Evaluates datasource declarations through a [`DatasourceRegistry`].
#[derive(Debug, Clone)]
pub struct Resolver {
    registry: Arc<DatasourceRegistry>,
    cancellation: Option<Arc<CancellationToken>>,
    mode: ResolveMode,
    max_concurrency: Option<usize>,
}

impl Resolver {
    /// Creates a resolver over `registry`.
    #[must_use]
    pub fn new(registry: Arc<DatasourceRegistry>) -> Self {
        Self {
            registry,
            cancellation: None,
            mode: ResolveMode::default(),
            max_concurrency: None,
        }
    }

    /// Stops starting new evaluations once `token` fires.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Sets the resolve mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: ResolveMode) -> Self {
        self.mode = mode;
        self
    }

    /// Bounds how many declarations evaluate at once.
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    /// Evaluates `declarations` in dependency order.
    pub async fn resolve(&self, declarations: &[DatasourceDeclaration]) -> Resolution {
        let mut res = Resolution::default();
        let mut failed = BTreeSet::new();
        let mut pending = self.accept(declarations, &mut res, &mut failed);

        self.reject_missing(&mut pending, &mut res, &mut failed);
        while let Some(cycle) = find_cycle(&pending) {
            let path: Vec<String> = cycle.iter().map(ToString::to_string).collect();
            let subject = pending.get(&cycle[0]).and_then(|n| n.decl.range.clone());
            warn!(cycle = %path.join(" -> "), "Datasource dependency cycle");
            res.diagnostics.push(
                Diagnostic::error("Cycle in data source dependencies")
                    .with_detail(path.join(" -> "))
                    .with_subject(subject),
            );
            for r in cycle.iter().collect::<BTreeSet<_>>() {
                if pending.remove(r).is_some() {
                    res.fail(r, &mut failed);
                }
            }
        }

        let limit = self.max_concurrency.unwrap_or(usize::MAX);
        let mut evaluated = BTreeSet::new();
        let mut running = FuturesUnordered::new();
        let mut cancelled = false;

        loop {
            fail_dependents(&mut pending, &mut res, &mut failed);

            if !cancelled {
                let ready: Vec<DatasourceRef> = pending
                    .iter()
                    .filter(|(_, node)| node.deps.iter().all(|d| evaluated.contains(d)))
                    .map(|(r, _)| r.clone())
                    .collect();

                for r in ready {
                    if running.len() >= limit {
                        break;
                    }
                    if let Some(reason) = self.cancel_reason() {
                        info!(reason = %reason, "Datasource resolution cancelled");
                        res.diagnostics.push(
                            Diagnostic::error("Datasource resolution cancelled").with_detail(reason),
                        );
                        cancelled = true;
                        break;
                    }
                    if let Some(node) = pending.remove(&r) {
                        let body = substitute(node.decl, &res.values);
                        running.push(self.evaluate(r, node.decl, body));
                    }
                }
            }

            let Some(done) = running.next().await else {
                break;
            };

            let Evaluation {
                reference,
                transitions,
                result,
            } = done;
            res.states.entry(reference.clone()).or_default().extend(transitions);
            match result {
                Ok(value) => {
                    info!(datasource = %reference, "Datasource evaluated");
                    res.values.insert(&reference.kind, &reference.name, value);
                    res.states
                        .entry(reference.clone())
                        .or_default()
                        .push(DatasourceState::Evaluated);
                    evaluated.insert(reference);
                }
                Err(diags) => {
                    warn!(datasource = %reference, "Datasource failed");
                    res.diagnostics.extend(diags);
                    res.fail(&reference, &mut failed);
                }
            }
        }

        let stranded: Vec<DatasourceRef> = pending.keys().cloned().collect();
        for r in &stranded {
            res.fail(r, &mut failed);
        }

        res
    }

    /// Validates identities and registers every acceptable declaration.
    fn accept<'a>(
        &self,
        declarations: &'a [DatasourceDeclaration],
        res: &mut Resolution,
        failed: &mut BTreeSet<DatasourceRef>,
    ) -> BTreeMap<DatasourceRef, Node<'a>> {
        let mut nodes = BTreeMap::new();
        let mut seen: BTreeMap<DatasourceRef, &DatasourceDeclaration> = BTreeMap::new();

        for decl in declarations {
            let r = decl.reference();
            if let Some(first) = seen.get(&r) {
                let at = first
                    .range
                    .as_ref()
                    .map_or_else(String::new, |range| format!(" at {range}"));
                res.diagnostics.push(
                    Diagnostic::error(format!("Duplicate {r} block"))
                        .with_detail(format!(
                            "This {} data source named \"{}\" was already declared{at}.",
                            r.kind, r.name
                        ))
                        .with_subject(decl.range.clone()),
                );
                continue;
            }
            seen.insert(r.clone(), decl);
            res.states.entry(r.clone()).or_default().push(DatasourceState::Declared);

            let diags = decl.validate_identifiers();
            if diags.has_errors() {
                res.diagnostics.extend(diags);
                res.fail(&r, failed);
                continue;
            }

            if !self.registry.has(&decl.kind) {
                res.diagnostics.push(
                    Diagnostic::error(format!("Unknown data source type {}", decl.kind))
                        .with_detail(format!("known data sources: [{}]", self.registry.list().join(" ")))
                        .with_subject(decl.range.clone()),
                );
                res.fail(&r, failed);
                continue;
            }

            match decl.dependencies() {
                Ok(deps) => {
                    nodes.insert(r, Node { decl, deps });
                }
                Err(diags) => {
                    res.diagnostics.extend(diags);
                    res.fail(&r, failed);
                }
            }
        }

        nodes
    }

    /// Fails every node that depends on something never declared.
    fn reject_missing(
        &self,
        pending: &mut BTreeMap<DatasourceRef, Node<'_>>,
        res: &mut Resolution,
        failed: &mut BTreeSet<DatasourceRef>,
    ) {
        let missing: Vec<(DatasourceRef, DatasourceRef)> = pending
            .iter()
            .filter_map(|(r, node)| {
                node.deps
                    .iter()
                    .find(|d| !pending.contains_key(*d) && !failed.contains(*d))
                    .map(|d| (r.clone(), d.clone()))
            })
            .collect();

        for (r, dep) in missing {
            if let Some(node) = pending.remove(&r) {
                res.diagnostics.push(
                    Diagnostic::error("Missing data source dependency")
                        .with_detail(format!("{r} depends on {dep}, which is not declared."))
                        .with_subject(node.decl.range.clone()),
                );
                res.fail(&r, failed);
            }
        }
    }

    fn cancel_reason(&self) -> Option<String> {
        self.cancellation
            .as_ref()
            .filter(|t| t.is_cancelled())
            .map(|t| t.reason().unwrap_or_else(|| "cancelled".to_string()))
    }

    async fn evaluate(
        &self,
        reference: DatasourceRef,
        decl: &DatasourceDeclaration,
        body: BTreeMap<String, Resolved>,
    ) -> Evaluation {
        debug!(datasource = %reference, "Starting datasource");
        let mut transitions = vec![DatasourceState::Starting];
        let subject = decl.range.as_ref();
        let error = |summary: String| Diagnostic::error(summary).with_subject(subject.cloned());

        let result: Result<Value, Diagnostics> = async {
            let mut plugin = self.registry.start(&decl.kind).map_err(|e| {
                Diagnostics::from(
                    error(format!("failed to start datasource plugin \"{reference}\"")).with_detail(e.message),
                )
            })?;

            let (config, diags) = plugin.config_spec().decode(body, subject);
            if diags.has_errors() {
                return Err(diags);
            }

            plugin
                .configure(config)
                .await
                .map_err(|e| Diagnostics::from(error(e.to_string())))?;
            transitions.push(DatasourceState::Configured);

            let value = match self.mode {
                ResolveMode::Execute => plugin
                    .execute()
                    .await
                    .map_err(|e| Diagnostics::from(error(e.to_string())))?,
                ResolveMode::Validate => plugin.output_spec().placeholder_object(),
            };

            if value.is_null() {
                return Err(Diagnostics::from(
                    error("empty value".to_string()).with_detail(format!("{reference} produced no value")),
                ));
            }
            Ok(value)
        }
        .await;

        Evaluation {
            reference,
            transitions,
            result,
        }
    }
}

/// Fails pending nodes with a failed dependency until none are left.
fn fail_dependents(
    pending: &mut BTreeMap<DatasourceRef, Node<'_>>,
    res: &mut Resolution,
    failed: &mut BTreeSet<DatasourceRef>,
) {
    loop {
        let doomed: Vec<(DatasourceRef, DatasourceRef)> = pending
            .iter()
            .filter_map(|(r, node)| {
                node.deps
                    .iter()
                    .find(|d| failed.contains(*d))
                    .map(|d| (r.clone(), d.clone()))
            })
            .collect();
        if doomed.is_empty() {
            return;
        }
        for (r, dep) in doomed {
            if let Some(node) = pending.remove(&r) {
                res.diagnostics.push(
                    Diagnostic::error("Dependency failed")
                        .with_detail(format!("{r} was not evaluated because {dep} failed."))
                        .with_subject(node.decl.range.clone()),
                );
                res.fail(&r, failed);
            }
        }
    }
}

/// Turns a declaration body into resolved attribute values.
fn substitute(decl: &DatasourceDeclaration, values: &DatasourceValues) -> BTreeMap<String, Resolved> {
    decl.body
        .iter()
        .map(|(name, expr)| {
            let resolved = match *expr {
                Expr::Literal(ref v) => Resolved::Known(v.clone()),
                Expr::Unknown(ref u) => Resolved::Unknown(u.ty),
                Expr::Reference(ref r) => r
                    .path
                    .strip_prefix("data.")
                    .and_then(|path| values.lookup(path))
                    .map_or_else(
                        || Resolved::Error(format!("{} does not exist", r.path)),
                        |v| Resolved::Known(v.clone()),
                    ),
            };
            (name.clone(), resolved)
        })
        .collect()
}

/// Finds one dependency cycle among `nodes`, as a path that ends where it
/// starts.
fn find_cycle(nodes: &BTreeMap<DatasourceRef, Node<'_>>) -> Option<Vec<DatasourceRef>> {
    fn dfs(
        node: &DatasourceRef,
        nodes: &BTreeMap<DatasourceRef, Node<'_>>,
        visited: &mut BTreeSet<DatasourceRef>,
        path: &mut Vec<DatasourceRef>,
    ) -> Option<Vec<DatasourceRef>> {
        if let Some(start) = path.iter().position(|n| n == node) {
            let mut cycle = path[start..].to_vec();
            cycle.push(node.clone());
            return Some(cycle);
        }
        if !visited.insert(node.clone()) {
            return None;
        }

        path.push(node.clone());
        if let Some(n) = nodes.get(node) {
            for dep in n.deps.iter().filter(|d| nodes.contains_key(*d)) {
                if let Some(cycle) = dfs(dep, nodes, visited, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        None
    }

    let mut visited = BTreeSet::new();
    nodes
        .keys()
        .find_map(|r| dfs(r, nodes, &mut visited, &mut Vec::new()))
}

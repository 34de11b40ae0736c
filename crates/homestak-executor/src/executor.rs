use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use homestak_action::{with_retry, ActionRegistry, ActionResult, Context, ErrorKind, HostConfig};
use homestak_domain::{Manifest, Node, NodeKind, NodeName, OnError};
use homestak_graph::{compute_fingerprint, extract_subtree, validate};
use homestak_server::{ServerHandle, ServerLayout};
use homestak_state::{AuditEvent, ExecutionKey, ExecutionState, RunLock, StateStore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ExecutorError;
use crate::report::{Change, RunReport, Verb};
use crate::vars;

/// Drives one manifest through its create/configure/test/destroy lifecycle,
/// across the three node lifecycles (leaf guest, interior hypervisor, root
/// hypervisor).
pub struct Executor {
    registry: Arc<ActionRegistry>,
    store: Arc<dyn StateStore>,
    server_layout: Option<ServerLayout>,
    bearer_token: String,
    signing_key: Vec<u8>,
    /// Directory holding one lock file per execution key. `None` disables
    /// cross-run locking (used by in-process tests against `InMemoryStore`,
    /// where no other process could contend for the key anyway).
    lock_root: Option<PathBuf>,
    cancellation: CancellationToken,
}

impl Executor {
    pub fn new(
        registry: Arc<ActionRegistry>,
        store: Arc<dyn StateStore>,
        server_layout: Option<ServerLayout>,
        bearer_token: String,
        signing_key: Vec<u8>,
        lock_root: Option<PathBuf>,
    ) -> Self {
        Executor {
            registry,
            store,
            server_layout,
            bearer_token,
            signing_key,
            lock_root,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Acquires the cross-run lock for `key`, if a lock directory is
    /// configured. Held for the caller's stack frame; dropped (and the
    /// lock file removed) when the returned guard goes out of scope.
    fn acquire_run_lock(&self, key: &ExecutionKey) -> Result<Option<RunLock>, ExecutorError> {
        let root = match &self.lock_root {
            Some(root) => root,
            None => return Ok(None),
        };
        let path = root.join(format!("{}.lock", lock_slug(key)));
        let holder = format!("pid-{}", std::process::id());
        Ok(Some(RunLock::acquire(&path, &holder)?))
    }

    /// Runs the create → configure (→ delegate) lifecycle for every node
    /// not already `Ready`/`Delegated`, applying `settings.on_error` when a
    /// node fails.
    pub async fn apply(&self, manifest: &Manifest, host: &str) -> Result<RunReport, ExecutorError> {
        let resolved = validate(&manifest.nodes)?;
        let key = ExecutionKey::new(manifest.name.clone(), host.to_string());
        let _lock = self.acquire_run_lock(&key)?;
        let mut state = self.store.get(&key).await?.unwrap_or_default();

        let manifest_fingerprint = compute_fingerprint(manifest);
        if let Some(previous) = &state.fingerprint {
            if previous != &manifest_fingerprint {
                let archived_key = ExecutionKey::new(
                    format!("{}@archived-{}", manifest.name, Utc::now().timestamp()),
                    host.to_string(),
                );
                self.store.put(&archived_key, &state).await?;
                warn!(
                    manifest = %manifest.name,
                    host,
                    archived_as = %archived_key,
                    "manifest fingerprint changed since last run; archived previous state and starting fresh"
                );
                state = ExecutionState::default();
            }
        }
        state.fingerprint = Some(manifest_fingerprint);

        let mut report = RunReport::new(Verb::Apply, false);

        self.store
            .append_event(
                &key,
                &AuditEvent::RunStarted {
                    id: Uuid::new_v4(),
                    at: Utc::now(),
                    manifest: manifest.name.clone(),
                    dry_run: false,
                },
            )
            .await?;

        let server = self.ensure_server_if_needed(manifest).await?;
        let mut failed_or_skipped: HashSet<NodeName> = HashSet::new();

        'nodes: for name in &resolved.create_order {
            if self.cancellation.is_cancelled() {
                let message = "run was cancelled".to_string();
                state.node_mut(name).mark_failed(Utc::now(), message.clone(), ErrorKind::Cancelled);
                self.store.put(&key, &state).await?;
                self.store
                    .append_event(
                        &key,
                        &AuditEvent::NodeError {
                            id: Uuid::new_v4(),
                            at: Utc::now(),
                            node: name.clone(),
                            message: message.clone(),
                            kind: ErrorKind::Cancelled,
                        },
                    )
                    .await?;
                report.errors.push(format!("{name}: {message}"));
                report.changes.push(Change::NodeFailed {
                    node: name.clone(),
                    message,
                });
                break;
            }
            let node = manifest
                .node(name)
                .ok_or_else(|| ExecutorError::Internal(format!("node '{name}' vanished from manifest")))?;

            if let Some(parent) = &node.parent {
                if failed_or_skipped.contains(parent) {
                    state.node_mut(name).status = homestak_domain::NodeStatus::Skipped;
                    failed_or_skipped.insert(name.clone());
                    report.changes.push(Change::NodeSkipped { node: name.clone() });
                    continue 'nodes;
                }
            }

            let existing_status = state.nodes.get(name).map(|n| n.status);
            if matches!(
                existing_status,
                Some(homestak_domain::NodeStatus::Ready) | Some(homestak_domain::NodeStatus::Delegating)
            ) {
                let fingerprint = compute_fingerprint(node);
                if state.nodes.get(name).and_then(|n| n.fingerprint.as_deref()) == Some(fingerprint.as_str())
                {
                    continue 'nodes;
                }
            }

            match self.apply_one(manifest, host, node, &mut state).await {
                Ok(changes) => {
                    report.changes.extend(changes);
                    self.store.put(&key, &state).await?;
                }
                Err(e) => {
                    let kind = action_error_kind(&e);
                    let message = e.to_string();
                    warn!(node = %name, error = %message, "node apply failed");
                    state.node_mut(name).mark_failed(Utc::now(), message.clone(), kind);
                    self.store.put(&key, &state).await?;
                    self.store
                        .append_event(
                            &key,
                            &AuditEvent::NodeError {
                                id: Uuid::new_v4(),
                                at: Utc::now(),
                                node: name.clone(),
                                message: message.clone(),
                                kind,
                            },
                        )
                        .await?;
                    report.errors.push(format!("{name}: {message}"));
                    report.changes.push(Change::NodeFailed {
                        node: name.clone(),
                        message,
                    });
                    failed_or_skipped.insert(name.clone());

                    match manifest.settings.on_error {
                        OnError::Stop => break 'nodes,
                        OnError::Rollback => {
                            self.rollback(manifest, host, &resolved.destroy_order(), &mut state, &mut report)
                                .await?;
                            break 'nodes;
                        }
                        OnError::Continue => {
                            for descendant in descendants_of(manifest, name) {
                                state.node_mut(&descendant).status = homestak_domain::NodeStatus::Skipped;
                                failed_or_skipped.insert(descendant.clone());
                                report.changes.push(Change::NodeSkipped { node: descendant });
                            }
                        }
                    }
                }
            }
        }

        self.store
            .append_event(
                &key,
                &AuditEvent::RunCompleted {
                    id: Uuid::new_v4(),
                    at: Utc::now(),
                    manifest: manifest.name.clone(),
                    changes: report.changes.len(),
                    dry_run: false,
                },
            )
            .await?;

        if let Some(server) = server {
            server.release().await?;
        }

        info!(
            changes = report.changes.len(),
            errors = report.errors.len(),
            "apply run complete"
        );
        Ok(report)
    }

    /// Destroys every node that isn't already `Destroyed`, children first.
    pub async fn destroy(&self, manifest: &Manifest, host: &str) -> Result<RunReport, ExecutorError> {
        let resolved = validate(&manifest.nodes)?;
        let key = ExecutionKey::new(manifest.name.clone(), host.to_string());
        let _lock = self.acquire_run_lock(&key)?;
        let mut state = self.store.get(&key).await?.unwrap_or_default();
        let mut report = RunReport::new(Verb::Destroy, false);
        let no_tokens: HashMap<String, String> = HashMap::new();

        for name in resolved.destroy_order() {
            if state
                .nodes
                .get(&name)
                .map(|n| n.status == homestak_domain::NodeStatus::Destroyed)
                .unwrap_or(true)
            {
                continue;
            }
            let node = manifest
                .node(&name)
                .ok_or_else(|| ExecutorError::Internal(format!("node '{name}' vanished from manifest")))?;
            let host_cfg = self.host_config_for(&state, node, host, &no_tokens);
            let ctx = Context::default();

            match self.invoke("destroy_resource", node, &host_cfg, &ctx).await {
                Ok(_) => {
                    state.node_mut(&name).mark_destroyed(Utc::now());
                    self.store
                        .append_event(
                            &key,
                            &AuditEvent::NodeDestroyed {
                                id: Uuid::new_v4(),
                                at: Utc::now(),
                                node: name.clone(),
                            },
                        )
                        .await?;
                    report.changes.push(Change::NodeDestroyed { node: name.clone() });
                }
                Err(e) => {
                    report.errors.push(format!("{name}: {e}"));
                }
            }
            self.store.put(&key, &state).await?;
        }

        Ok(report)
    }

    /// Runs read-only checks against every `Ready`/`Delegating` node.
    /// `run_configuration` doubles as the check action here — it is the
    /// only action in the vocabulary capable of touching a node's applied
    /// configuration, and configuration tools commonly support a
    /// check/no-op mode; the executor signals that mode through
    /// `Context::vars["mode"] = "test"` rather than adding a new action.
    pub async fn test(&self, manifest: &Manifest, host: &str) -> Result<RunReport, ExecutorError> {
        let resolved = validate(&manifest.nodes)?;
        let key = ExecutionKey::new(manifest.name.clone(), host.to_string());
        let _lock = self.acquire_run_lock(&key)?;
        let state = self.store.get(&key).await?.unwrap_or_default();
        let mut report = RunReport::new(Verb::Test, false);
        let no_tokens: HashMap<String, String> = HashMap::new();

        for name in &resolved.create_order {
            let ready = state
                .nodes
                .get(name)
                .map(|n| {
                    matches!(
                        n.status,
                        homestak_domain::NodeStatus::Ready | homestak_domain::NodeStatus::Delegating
                    )
                })
                .unwrap_or(false);
            if !ready {
                continue;
            }
            let node = manifest
                .node(name)
                .ok_or_else(|| ExecutorError::Internal(format!("node '{name}' vanished from manifest")))?;
            let host_cfg = self.host_config_for(&state, node, host, &no_tokens);
            let mut ctx = Context::default();
            ctx.vars.insert("mode".to_string(), "test".to_string());

            match self.invoke("run_configuration", node, &host_cfg, &ctx).await {
                Ok(_) => report.changes.push(Change::NodeTested { node: name.clone() }),
                Err(e) => report.errors.push(format!("{name}: {e}")),
            }
        }

        Ok(report)
    }

    async fn apply_one(
        &self,
        manifest: &Manifest,
        host: &str,
        node: &Node,
        state: &mut ExecutionState,
    ) -> Result<Vec<Change>, ExecutorError> {
        let mut changes = Vec::new();
        let is_root_hypervisor = node.kind == NodeKind::Pve && node.parent.is_none();
        let has_children = manifest.children_of(&node.name).next().is_some();

        let mut ctx = Context::default();
        let mut token_vars: HashMap<String, String> = HashMap::new();

        if !is_root_hypervisor {
            // Token issuance (§4.7): mint before provisioning so the token
            // can ride along in the tfvars/cloud-init bundle the
            // provisioner consumes.
            if node.execution.spec.is_some() {
                let host_cfg = self.host_config_for(state, node, host, &token_vars);
                let credential = self
                    .invoke("issue_hypervisor_credential", node, &host_cfg, &ctx)
                    .await?;
                if let Some(token) = credential.context_additions.get("token") {
                    token_vars.insert("token".to_string(), token.clone());
                    ctx.vars.insert("token".to_string(), token.clone());
                }
            }

            let host_cfg = self.host_config_for(state, node, host, &token_vars);
            state
                .node_mut(&node.name)
                .mark_started(Utc::now(), homestak_domain::NodeStatus::Provisioning);
            self.invoke("ensure_image_artifact", node, &host_cfg, &ctx).await?;
            self.invoke("provision_infrastructure", node, &host_cfg, &ctx).await?;

            state.node_mut(&node.name).status = homestak_domain::NodeStatus::Starting;
            self.invoke("start_resource", node, &host_cfg, &ctx).await?;

            state.node_mut(&node.name).status = homestak_domain::NodeStatus::AwaitingAddress;
            let ctx_snapshot = ctx.clone();
            let addressed = with_retry(|| self.invoke("await_address", node, &host_cfg, &ctx_snapshot)).await?;
            ctx.vars.extend(addressed.context_additions.clone());
            if let Some(address) = addressed.context_additions.get("address") {
                state.node_mut(&node.name).address = Some(address.clone());
            }
            state.node_mut(&node.name).parent_address = node
                .parent
                .as_ref()
                .and_then(|p| state.nodes.get(p))
                .and_then(|ps| ps.address.clone());

            changes.push(Change::NodeCreated { node: node.name.clone() });

            // Configure.
            state.node_mut(&node.name).status = homestak_domain::NodeStatus::AwaitingReachable;
            let host_cfg = self.host_config_for(state, node, host, &token_vars);
            let ctx_snapshot = ctx.clone();
            with_retry(|| self.invoke("await_reachable", node, &host_cfg, &ctx_snapshot)).await?;

            state.node_mut(&node.name).status = homestak_domain::NodeStatus::Configuring;
            match node.execution.mode {
                homestak_domain::ExecutionMode::Push => {
                    self.invoke("run_configuration", node, &host_cfg, &ctx).await?;
                }
                homestak_domain::ExecutionMode::Pull => {
                    let ctx_snapshot = ctx.clone();
                    with_retry(|| self.invoke("await_file", node, &host_cfg, &ctx_snapshot)).await?;
                }
            }
            changes.push(Change::NodeConfigured { node: node.name.clone() });

            if !has_children {
                let fingerprint = compute_fingerprint(node);
                state.node_mut(&node.name).mark_ready(Utc::now(), fingerprint);
                return Ok(changes);
            }
        }

        // Hypervisor delegation sub-sequence (interior and root).
        state.node_mut(&node.name).status = homestak_domain::NodeStatus::Delegating;
        let host_cfg = self.host_config_for(state, node, host, &token_vars);

        let subtree = extract_subtree(manifest, &node.name)?;
        let mut child_count = 0usize;
        for child in subtree.roots() {
            self.invoke("ensure_image_artifact", child, &host_cfg, &ctx).await?;
            if child.execution.spec.is_some() {
                let credential = self
                    .invoke("issue_hypervisor_credential", child, &host_cfg, &ctx)
                    .await?;
                if let Some(token) = credential.context_additions.get("token") {
                    ctx.vars
                        .insert(format!("token:{}", child.name.as_str()), token.clone());
                }
            }
            child_count += 1;
        }

        let manifest_text = serde_json::to_string(&subtree)
            .map_err(|e| ExecutorError::Internal(format!("serializing subtree for delegation: {e}")))?;
        ctx.vars.insert("delegate_manifest".to_string(), manifest_text);
        ctx.vars.insert("delegate_verb".to_string(), "apply".to_string());
        let allow_list: Vec<String> = subtree
            .nodes
            .iter()
            .flat_map(|n| [format!("{}_address", n.name.as_str()), format!("{}_id", n.name.as_str())])
            .collect();
        ctx.vars.insert("delegate_allow_list".to_string(), allow_list.join(","));

        let delegated = self.invoke("delegate_subtree", node, &host_cfg, &ctx).await?;
        state
            .node_mut(&node.name)
            .context_overlay
            .extend(delegated.context_additions.clone());

        let fingerprint = compute_fingerprint(node);
        state.node_mut(&node.name).mark_ready(Utc::now(), fingerprint);
        changes.push(Change::NodeDelegated {
            node: node.name.clone(),
            child_count,
        });

        Ok(changes)
    }

    async fn rollback(
        &self,
        manifest: &Manifest,
        host: &str,
        destroy_order: &[NodeName],
        state: &mut ExecutionState,
        report: &mut RunReport,
    ) -> Result<(), ExecutorError> {
        let key = ExecutionKey::new(manifest.name.clone(), host.to_string());
        let no_tokens: HashMap<String, String> = HashMap::new();
        for name in destroy_order {
            let created_or_later = state.nodes.get(name).map(|n| {
                !matches!(
                    n.status,
                    homestak_domain::NodeStatus::Pending
                        | homestak_domain::NodeStatus::Destroyed
                        | homestak_domain::NodeStatus::Failed
                        | homestak_domain::NodeStatus::Skipped
                )
            });
            if created_or_later != Some(true) {
                continue;
            }
            let node = match manifest.node(name) {
                Some(n) => n,
                None => continue,
            };
            let host_cfg = self.host_config_for(state, node, host, &no_tokens);
            let ctx = Context::default();
            if let Err(e) = self.invoke("destroy_resource", node, &host_cfg, &ctx).await {
                report.errors.push(format!("rollback {name}: {e}"));
                continue;
            }
            state.node_mut(name).mark_destroyed(Utc::now());
            self.store
                .append_event(
                    &key,
                    &AuditEvent::NodeDestroyed {
                        id: Uuid::new_v4(),
                        at: Utc::now(),
                        node: name.clone(),
                    },
                )
                .await?;
            report.changes.push(Change::NodeDestroyed { node: name.clone() });
        }
        self.store.put(&key, state).await?;
        Ok(())
    }

    async fn invoke(
        &self,
        name: &str,
        node: &Node,
        host: &HostConfig,
        ctx: &Context,
    ) -> Result<ActionResult, homestak_action::ActionError> {
        let action = self.registry.get(name)?;
        action.execute(node, host, ctx).await
    }

    fn host_config_for(
        &self,
        state: &ExecutionState,
        node: &Node,
        run_host: &str,
        token_vars: &HashMap<String, String>,
    ) -> HostConfig {
        let address = node
            .parent
            .as_ref()
            .and_then(|p| state.nodes.get(p))
            .and_then(|ps| ps.address.clone())
            .unwrap_or_else(|| run_host.to_string());

        let empty: HashMap<String, String> = HashMap::new();
        let vars = vars::resolve(&[&empty, &empty, &empty, &node.vars, token_vars]);
        HostConfig { address, vars }
    }

    async fn ensure_server_if_needed(
        &self,
        manifest: &Manifest,
    ) -> Result<Option<ServerHandle>, ExecutorError> {
        let layout = match &self.server_layout {
            Some(l) => l.clone(),
            None => return Ok(None),
        };
        let needs_server = manifest.nodes.iter().any(|n| {
            n.execution.spec.is_some() || (n.kind == NodeKind::Pve && manifest.children_of(&n.name).next().is_some())
        });
        if !needs_server {
            return Ok(None);
        }
        let handle = ServerHandle::ensure(layout, self.bearer_token.clone(), self.signing_key.clone()).await?;
        Ok(Some(handle))
    }
}

/// Maps an executor-level error onto the closed `ErrorKind` taxonomy a
/// persisted `NodeError` carries. Errors raised below the `Action` layer
/// (graph/store/config/server/internal) have no Action-specific kind of
/// their own, so they fall back to `Internal`.
fn action_error_kind(error: &ExecutorError) -> ErrorKind {
    match error {
        ExecutorError::Action(e) => e.kind(),
        ExecutorError::Token(homestak_token::TokenError::Expired { .. }) => ErrorKind::Expired,
        ExecutorError::Token(homestak_token::TokenError::Malformed) => ErrorKind::Malformed,
        ExecutorError::Token(homestak_token::TokenError::BadSignature) => ErrorKind::Unauthorized,
        ExecutorError::Token(homestak_token::TokenError::NoKey) => ErrorKind::Internal,
        _ => ErrorKind::Internal,
    }
}

fn lock_slug(key: &ExecutionKey) -> String {
    key.to_string()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn descendants_of(manifest: &Manifest, root: &NodeName) -> HashSet<NodeName> {
    let mut keep: HashSet<NodeName> = manifest.children_of(root).map(|n| n.name.clone()).collect();
    loop {
        let before = keep.len();
        for n in &manifest.nodes {
            if let Some(p) = &n.parent {
                if keep.contains(p) {
                    keep.insert(n.name.clone());
                }
            }
        }
        if keep.len() == before {
            break;
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use homestak_action::{Action, ActionError, LocalAction};
    use homestak_domain::{Execution, ExecutionMode, Settings};
    use homestak_state::InMemoryStore;
    use std::collections::HashMap as Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn registry() -> Arc<ActionRegistry> {
        let mut r = ActionRegistry::new();
        LocalAction::register_all(&mut r);
        Arc::new(r)
    }

    fn leaf_manifest(on_error: OnError) -> Manifest {
        Manifest {
            schema_version: 2,
            name: "lab".into(),
            settings: Settings {
                on_error,
                ..Settings::default()
            },
            nodes: vec![Node {
                name: NodeName::new("guest1"),
                kind: NodeKind::Vm,
                parent: None,
                preset: "small".into(),
                image: "debian-12".into(),
                vmid: None,
                disk_gib: 16,
                execution: Execution {
                    mode: ExecutionMode::Pull,
                    spec: None,
                },
                vars: Map::new(),
            }],
        }
    }

    fn two_level_manifest(on_error: OnError) -> Manifest {
        Manifest {
            schema_version: 2,
            name: "lab".into(),
            settings: Settings {
                on_error,
                ..Settings::default()
            },
            nodes: vec![
                Node {
                    name: NodeName::new("root"),
                    kind: NodeKind::Pve,
                    parent: None,
                    preset: "large".into(),
                    image: "pve-base".into(),
                    vmid: None,
                    disk_gib: 64,
                    execution: Execution {
                        mode: ExecutionMode::Push,
                        spec: None,
                    },
                    vars: Map::new(),
                },
                Node {
                    name: NodeName::new("edge"),
                    kind: NodeKind::Vm,
                    parent: Some(NodeName::new("root")),
                    preset: "small".into(),
                    image: "debian-12".into(),
                    vmid: None,
                    disk_gib: 16,
                    execution: Execution {
                        mode: ExecutionMode::Pull,
                        spec: None,
                    },
                    vars: Map::new(),
                },
            ],
        }
    }

    fn executor_with(registry: Arc<ActionRegistry>) -> Executor {
        Executor::new(
            registry,
            Arc::new(InMemoryStore::new()),
            None,
            "test-bearer".into(),
            homestak_token::TokenService::generate_key(),
            None,
        )
    }

    fn executor() -> Executor {
        executor_with(registry())
    }

    /// Stub `delegate_subtree` that reports fixed context additions, the
    /// way a real child run would via its structured-output trailer.
    #[derive(Debug, Clone)]
    struct StubDelegate {
        outputs: Map<String, String>,
    }

    #[async_trait::async_trait]
    impl Action for StubDelegate {
        fn name(&self) -> &'static str {
            "delegate_subtree"
        }

        async fn execute(
            &self,
            _node: &Node,
            _host: &homestak_action::HostConfig,
            _ctx: &Context,
        ) -> Result<ActionResult, ActionError> {
            Ok(ActionResult::ok("delegated").with_outputs(self.outputs.clone()))
        }
    }

    /// Counts invocations of one named capability, then delegates to a
    /// `LocalAction` simulating the same name.
    struct CountingAction {
        name: &'static str,
        count: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Action for CountingAction {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(
            &self,
            node: &Node,
            host: &homestak_action::HostConfig,
            ctx: &Context,
        ) -> Result<ActionResult, ActionError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            LocalAction::new(self.name).execute(node, host, ctx).await
        }
    }

    /// Always fails with a fixed error kind, used to force S4's rollback.
    struct FailingAction {
        name: &'static str,
    }

    #[async_trait::async_trait]
    impl Action for FailingAction {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(
            &self,
            _node: &Node,
            _host: &homestak_action::HostConfig,
            _ctx: &Context,
        ) -> Result<ActionResult, ActionError> {
            // Conflict is not in the retry allow-list, so this fails the node
            // on the first attempt instead of burning through the real
            // with_retry backoff schedule.
            Err(ActionError::Conflict("forced failure".into()))
        }
    }

    #[tokio::test]
    async fn apply_single_leaf_reaches_ready() {
        let manifest = leaf_manifest(OnError::Stop);
        let exec = executor();
        let report = exec.apply(&manifest, "127.0.0.1").await.unwrap();
        assert!(report.is_success(), "{:?}", report.errors);
        assert!(report
            .changes
            .iter()
            .any(|c| matches!(c, Change::NodeCreated { .. })));
        assert!(report
            .changes
            .iter()
            .any(|c| matches!(c, Change::NodeConfigured { .. })));
    }

    #[tokio::test]
    async fn apply_is_idempotent_on_second_run() {
        let manifest = leaf_manifest(OnError::Stop);
        let exec = executor();
        exec.apply(&manifest, "127.0.0.1").await.unwrap();
        let second = exec.apply(&manifest, "127.0.0.1").await.unwrap();
        assert!(second.changes.is_empty(), "second apply should be a no-op");
    }

    #[tokio::test]
    async fn destroy_marks_node_destroyed() {
        let manifest = leaf_manifest(OnError::Stop);
        let exec = executor();
        exec.apply(&manifest, "127.0.0.1").await.unwrap();
        let report = exec.destroy(&manifest, "127.0.0.1").await.unwrap();
        assert!(report
            .changes
            .iter()
            .any(|c| matches!(c, Change::NodeDestroyed { .. })));
    }

    /// S2: a pull-mode, spec-referencing leaf must have a provisioning
    /// token minted before it's provisioned.
    #[tokio::test]
    async fn spec_referencing_leaf_mints_a_token_before_provisioning() {
        let mut manifest = leaf_manifest(OnError::Stop);
        manifest.nodes[0].execution.spec = Some("s1-spec".into());

        let credential_calls = Arc::new(AtomicUsize::new(0));
        let mut r = ActionRegistry::new();
        LocalAction::register_all(&mut r);
        r.register(Arc::new(CountingAction {
            name: "issue_hypervisor_credential",
            count: credential_calls.clone(),
        }));

        let exec = executor_with(Arc::new(r));
        let report = exec.apply(&manifest, "127.0.0.1").await.unwrap();
        assert!(report.is_success(), "{:?}", report.errors);
        assert_eq!(credential_calls.load(Ordering::SeqCst), 1);
    }

    /// S3: after a hypervisor delegates its subtree, the child run's
    /// reported context (edge address/id) must be imported into the
    /// parent's persisted context overlay.
    #[tokio::test]
    async fn delegation_imports_child_reported_context() {
        let manifest = two_level_manifest(OnError::Stop);
        let mut r = ActionRegistry::new();
        LocalAction::register_all(&mut r);
        let mut outputs = Map::new();
        outputs.insert("edge_address".to_string(), "10.0.0.5".to_string());
        outputs.insert("edge_id".to_string(), "501".to_string());
        r.register(Arc::new(StubDelegate { outputs }));

        let store = Arc::new(InMemoryStore::new());
        let exec = Executor::new(
            Arc::new(r),
            store.clone(),
            None,
            "test-bearer".into(),
            homestak_token::TokenService::generate_key(),
            None,
        );
        let report = exec.apply(&manifest, "127.0.0.1").await.unwrap();
        assert!(report.is_success(), "{:?}", report.errors);
        assert!(report
            .changes
            .iter()
            .any(|c| matches!(c, Change::NodeDelegated { .. })));

        let key = ExecutionKey::new("lab", "127.0.0.1");
        let state = store.get(&key).await.unwrap().unwrap();
        let root = state.nodes.get(&NodeName::new("root")).unwrap();
        assert_eq!(root.context_overlay.get("edge_address").unwrap(), "10.0.0.5");
        assert_eq!(root.context_overlay.get("edge_id").unwrap(), "501");
    }

    /// S4: on `rollback`, a forced failure in a child's `await_reachable`
    /// must destroy the child (if created) and then the parent, in strict
    /// reverse of create order.
    #[tokio::test]
    async fn rollback_destroys_in_reverse_create_order() {
        let manifest = two_level_manifest(OnError::Rollback);
        let mut r = ActionRegistry::new();
        LocalAction::register_all(&mut r);
        r.register(Arc::new(FailingAction {
            name: "await_reachable",
        }));

        let destroy_log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        struct RecordingDestroy {
            log: Arc<Mutex<Vec<String>>>,
        }
        #[async_trait::async_trait]
        impl Action for RecordingDestroy {
            fn name(&self) -> &'static str {
                "destroy_resource"
            }
            async fn execute(
                &self,
                node: &Node,
                _host: &homestak_action::HostConfig,
                _ctx: &Context,
            ) -> Result<ActionResult, ActionError> {
                self.log.lock().unwrap().push(node.name.as_str().to_string());
                Ok(ActionResult::ok("destroyed"))
            }
        }
        r.register(Arc::new(RecordingDestroy {
            log: destroy_log.clone(),
        }));

        let exec = Executor::new(
            Arc::new(r),
            Arc::new(InMemoryStore::new()),
            None,
            "test-bearer".into(),
            homestak_token::TokenService::generate_key(),
            None,
        );
        let report = exec.apply(&manifest, "127.0.0.1").await.unwrap();
        assert!(!report.is_success());
        assert!(report.errors.iter().any(|e| e.contains("edge")));

        let destroyed = destroy_log.lock().unwrap().clone();
        // `root` was created (it has no await_reachable of its own before
        // delegation starts); `edge` failed before ever reaching `created`,
        // so only `root` is rolled back.
        assert_eq!(destroyed, vec!["root".to_string()]);
    }
}

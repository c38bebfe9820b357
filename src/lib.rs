//! # prefab-graph: prefab scene graph engine
//!
//! An editable scene graph whose nodes can be cloned into live-linked
//! copies (references and variants) that keep following their source as
//! it is edited, with a command layer that makes every edit undoable.
//!
//! ## Design Principles
//!
//! 1. **Arena-first**: nodes and property models live in one registry keyed
//!    by `NodeId`; every back-reference is an id, never a pointer
//! 2. **Commands own mutation**: every change is a `Command` that can undo
//!    itself exactly; the `Session` is the only entry point
//! 3. **Contracts at the edges**: storage, rendering and asset loading are
//!    traits (`Datastore`, `ViewProvider`, `ResourceProvider`)
//! 4. **Fan-out is derived**: clone families are walked through the
//!    `ledger`, nothing caches the closure
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use prefab_graph::{CloneMode, Session, Value};
//! use prefab_graph::command::{AddChild, CloneNode, CreateNode, ModifyModel};
//!
//! # fn example() -> prefab_graph::Result<()> {
//! let mut session = Session::open_memory();
//!
//! // Author a prefab and place a reference to it
//! let door = session.execute(CreateNode::new("group").named("Door"))?[0];
//! let placed = session.execute(CloneNode::new(door, CloneMode::ReferenceRoot))?[0];
//!
//! // Structural edits on the source fan out to every instance
//! session.execute(AddChild::new_node(door, "sprite"))?;
//! assert_eq!(session.graph().children(placed)?.len(), 1);
//!
//! // Content edits on the instance are routed to the source
//! session.execute(ModifyModel::set(placed, "opacity", 0.5))?;
//! assert_eq!(session.graph().get_value(door, "opacity")?, Value::Float(0.5));
//!
//! session.undo()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Datastores
//!
//! | Datastore | Description |
//! |-----------|-------------|
//! | `MemoryDatastore` | Records every operation; used for tests and embedding |

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod properties;
pub mod graph;
pub mod ledger;
pub mod factory;
pub mod command;
pub mod history;
pub mod datastore;
pub mod view;
pub mod resource;
pub mod export;

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{
    CloneInfo, CloneInfoDescriptor, CloneMode, CustomProperties, ModelPatch,
    NodeDescriptor, NodeId, PropertyMap, SceneNode, Value, props,
};

// ============================================================================
// Re-exports: Properties and graph
// ============================================================================

pub use properties::{
    Constraint, ModelDelta, PropertyCategory, PropertySchema, PropertySpec,
};
pub use graph::SceneGraph;
pub use factory::{NodeFactory, NodeType};

// ============================================================================
// Re-exports: Commands and contracts
// ============================================================================

pub use command::{Command, CommandContext, CommandRecord, Effects};
pub use history::UndoStack;
pub use datastore::{Datastore, DatastoreOp, MemoryDatastore, RemoteChange};
pub use view::{ViewHandle, ViewProvider};
pub use resource::{AssetRef, ResourceCache, ResourceProvider};

use command::{CloakNode, LoadNode, ModifyModel, ReorderChildren, SetParent, UpdateCloneInfo};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Maximum number of undo groups retained; `None` keeps everything.
    pub history_limit: Option<usize>,
    /// Run the structural integrity check after every command.
    pub check_integrity: bool,
    pub emit_events: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_limit: None,
            check_integrity: cfg!(debug_assertions),
            emit_events: true,
        }
    }
}

/// What the session did, queued for the host in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Applied { command: &'static str },
    Undone { command: &'static str },
    Redone { command: &'static str },
    /// A remote notification was folded in.
    Remote { command: &'static str },
}

// ============================================================================
// Session
// ============================================================================

/// The primary entry point. A `Session` owns the scene graph and its undo
/// history, and mirrors every committed command into a datastore.
pub struct Session<D: Datastore> {
    graph: SceneGraph,
    history: UndoStack,
    datastore: D,
    views: Option<Box<dyn ViewProvider>>,
    config: SessionConfig,
    events: Vec<SessionEvent>,
    deltas: Vec<ModelDelta>,
}

impl<D: Datastore> Session<D> {
    pub fn with_datastore(datastore: D, factory: NodeFactory, config: SessionConfig) -> Self {
        Self {
            graph: SceneGraph::new(factory),
            history: UndoStack::new(config.history_limit),
            datastore,
            views: None,
            config,
            events: Vec::new(),
            deltas: Vec::new(),
        }
    }

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    pub fn datastore(&self) -> &D {
        &self.datastore
    }

    pub fn history(&self) -> &UndoStack {
        &self.history
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Install the view provider. Views are created lazily, the next time
    /// a command touches a node.
    pub fn set_view_provider(&mut self, views: impl ViewProvider + 'static) {
        self.views = Some(Box::new(views));
    }

    /// Run `command` as the start of a new undo group. Returns the ids of
    /// the nodes it created.
    pub fn execute(&mut self, command: impl Command + 'static) -> Result<Vec<NodeId>> {
        self.run(Box::new(command), true)
    }

    /// Run `command` as part of the current undo group.
    pub fn execute_in_group(&mut self, command: impl Command + 'static) -> Result<Vec<NodeId>> {
        self.run(Box::new(command), false)
    }

    fn run(&mut self, mut command: Box<dyn Command>, undo_root: bool) -> Result<Vec<NodeId>> {
        let name = command.name();
        let mut cx = CommandContext::new(&mut self.graph);
        command.apply(&mut cx)?;
        let effects = cx.into_effects();

        if self.config.check_integrity {
            if let Err(e) = self.graph.check_integrity() {
                tracing::warn!(command = name, error = %e, "integrity check failed, rolling back");
                self.rollback(command.as_mut(), false);
                return Err(e);
            }
        }
        if let Err((e, sent)) = self.flush(&effects.ops) {
            tracing::warn!(command = name, error = %e, "datastore rejected command");
            self.rollback(command.as_mut(), sent > 0);
            return Err(e);
        }

        tracing::debug!(command = name, ops = effects.ops.len(), "command applied");
        self.history.push(command, undo_root, &mut self.graph)?;
        let created = effects.created.clone();
        self.settle(effects, SessionEvent::Applied { command: name })?;
        Ok(created)
    }

    /// Reverse an applied command that will not be recorded. Compensating
    /// operations are only sent when part of its outbox already went out.
    fn rollback(&mut self, command: &mut dyn Command, compensate: bool) {
        let mut cx = if compensate {
            CommandContext::new(&mut self.graph)
        } else {
            CommandContext::graph_only(&mut self.graph)
        };
        if let Err(e) = command.undo(&mut cx) {
            tracing::warn!(command = command.name(), error = %e, "rollback failed");
            return;
        }
        let ops = cx.into_effects().ops;
        if let Err(e) = command.discard(&mut self.graph) {
            tracing::warn!(command = command.name(), error = %e, "discard after rollback failed");
        }
        if let Err((e, _)) = self.flush(&ops) {
            tracing::warn!(command = command.name(), error = %e, "compensating operations rejected");
        }
    }

    /// Send an outbox in order. A rejected create stops the flush; the
    /// error carries how many operations were already sent.
    fn flush(&self, ops: &[DatastoreOp]) -> std::result::Result<(), (Error, usize)> {
        for (sent, op) in ops.iter().enumerate() {
            op.apply_to(&self.datastore).map_err(|e| (e, sent))?;
        }
        Ok(())
    }

    /// Undo the most recent group. Returns `false` when there was nothing
    /// to undo.
    pub fn undo(&mut self) -> Result<bool> {
        if !self.history.can_undo() {
            return Ok(false);
        }
        let mut cx = CommandContext::new(&mut self.graph);
        let names = self.history.undo(&mut cx)?;
        let effects = cx.into_effects();
        self.flush(&effects.ops).map_err(|(e, _)| e)?;
        for name in &names {
            tracing::debug!(command = name, "command undone");
        }
        self.settle_many(effects, names.into_iter().map(|command| SessionEvent::Undone { command }))?;
        Ok(true)
    }

    /// Redo the next group. Returns `false` when there was nothing to redo.
    pub fn redo(&mut self) -> Result<bool> {
        if !self.history.can_redo() {
            return Ok(false);
        }
        let mut cx = CommandContext::new(&mut self.graph);
        let names = self.history.redo(&mut cx)?;
        let effects = cx.into_effects();
        self.flush(&effects.ops).map_err(|(e, _)| e)?;
        for name in &names {
            tracing::debug!(command = name, "command redone");
        }
        self.settle_many(effects, names.into_iter().map(|command| SessionEvent::Redone { command }))?;
        Ok(true)
    }

    /// Serialized log of the applied commands.
    pub fn log(&self) -> Result<Vec<CommandRecord>> {
        self.history.log()
    }

    /// Rebuild and execute logged commands in order, keeping their grouping.
    pub fn replay(&mut self, records: &[CommandRecord]) -> Result<()> {
        for record in records {
            let command = command::from_record(record)?;
            self.run(command, record.undo_root)?;
        }
        Ok(())
    }

    pub fn clear_history(&mut self) -> Result<()> {
        self.history.clear(&mut self.graph)
    }

    /// Populate the graph from stored descriptors. Nothing is sent back to
    /// the datastore and nothing is recorded for undo.
    pub fn load(&mut self, descriptors: &[NodeDescriptor]) -> Result<Vec<NodeId>> {
        let ids = export::import(&mut self.graph, descriptors)?;
        self.refresh_views(&ids)?;
        Ok(ids)
    }

    /// Fold a change reported by the datastore into the graph. Echoes of
    /// local edits are recognised and skipped; returns whether the graph
    /// changed.
    pub fn apply_remote(&mut self, change: RemoteChange) -> Result<bool> {
        let Some(mut command) = self.remote_command(change)? else {
            tracing::trace!("remote change is an echo");
            return Ok(false);
        };
        let name = command.name();
        let mut cx = CommandContext::graph_only(&mut self.graph);
        if let Err(e) = command.apply(&mut cx) {
            tracing::warn!(command = name, error = %e, "remote change rejected");
            return Err(e);
        }
        let effects = cx.into_effects();
        tracing::debug!(command = name, "remote change applied");
        self.settle(effects, SessionEvent::Remote { command: name })?;
        Ok(true)
    }

    fn remote_command(&self, change: RemoteChange) -> Result<Option<Box<dyn Command>>> {
        let g = &self.graph;
        let command: Box<dyn Command> = match change {
            RemoteChange::NodeCreated { descriptor } => {
                if g.is_live(descriptor.id) {
                    return Ok(None);
                }
                Box::new(LoadNode::new(descriptor))
            }
            RemoteChange::NodeRemoved { id } => {
                if !g.is_live(id) {
                    return Ok(None);
                }
                Box::new(CloakNode::new(id))
            }
            RemoteChange::ParentChanged { child, parent } => {
                if g.parent(child)? == parent {
                    return Ok(None);
                }
                Box::new(SetParent::new(child, parent, None))
            }
            RemoteChange::ModelKeyChanged { id, key, value } => {
                let model = g.models().get(id).ok_or(Error::NodeNotFound(id))?;
                if model.own(&key) == value.as_ref() {
                    return Ok(None);
                }
                let mut patch = ModelPatch::new();
                patch.insert(key, value);
                Box::new(ModifyModel::new(id, patch).raw())
            }
            RemoteChange::CloneInfoChanged { id, info } => {
                let node = g.node(id)?;
                if node.mode() == info.clone_mode && node.cloner() == info.cloner {
                    return Ok(None);
                }
                Box::new(UpdateCloneInfo::new(id, info.clone_mode, info.cloner))
            }
            RemoteChange::ChildrenReordered { id, children } => {
                let visible = g.children(id)?;
                let order: Vec<NodeId> = children.into_iter().filter(|c| visible.contains(c)).collect();
                if order == visible {
                    return Ok(None);
                }
                Box::new(ReorderChildren::new(id, order))
            }
        };
        Ok(Some(command))
    }

    /// Take the queued session events.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Take the model deltas produced since the last drain.
    pub fn drain_deltas(&mut self) -> Vec<ModelDelta> {
        std::mem::take(&mut self.deltas)
    }

    fn settle(&mut self, effects: Effects, event: SessionEvent) -> Result<()> {
        self.settle_many(effects, std::iter::once(event))
    }

    fn settle_many(&mut self, effects: Effects, events: impl IntoIterator<Item = SessionEvent>) -> Result<()> {
        if self.config.emit_events {
            self.events.extend(events);
        }
        self.deltas.extend(effects.deltas);
        self.refresh_views(&effects.touched)
    }

    /// Create missing views, push effective values to live nodes and hide
    /// the views of nodes that stopped being live.
    fn refresh_views(&mut self, touched: &[NodeId]) -> Result<()> {
        let Some(views) = self.views.as_mut() else {
            return Ok(());
        };
        let mut seen = HashSet::new();
        for &id in touched {
            if !seen.insert(id) {
                continue;
            }
            let Some(node) = self.graph.get(id) else { continue };
            if !self.graph.is_live(id) {
                if let Some(handle) = node.view {
                    views.hide_view(handle, node);
                }
                continue;
            }
            let handle = match node.view {
                Some(handle) => handle,
                None => {
                    let handle = views.create_view(node);
                    self.graph.set_view(id, handle)?;
                    handle
                }
            };
            let values = self.graph.effective_values(id)?;
            views.update_view(handle, self.graph.node(id)?, &values);
        }
        Ok(())
    }
}

/// In-memory session with the built-in node types.
impl Session<MemoryDatastore> {
    pub fn open_memory() -> Self {
        Self::with_datastore(MemoryDatastore::new(), NodeFactory::with_builtin_types(), SessionConfig::default())
    }
}

impl<D: Datastore + std::fmt::Debug> std::fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("nodes", &self.graph.len())
            .field("history", &self.history)
            .field("datastore", &self.datastore)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Structural integrity
    #[error("Broken clone chain at node {node}")]
    BrokenCloneChain { node: NodeId },

    #[error("Node {child} is already a child of {parent:?}")]
    AlreadyParent { child: NodeId, parent: Option<NodeId> },

    #[error("Node {child} not found among the children of {parent:?}")]
    ChildNotFound { parent: Option<NodeId>, child: NodeId },

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Node is cloaked: {0}")]
    NodeCloaked(NodeId),

    #[error("Model cycle: {child} cannot inherit from {parent}")]
    ModelCycle { child: NodeId, parent: NodeId },

    #[error("Tree cycle: {child} cannot be placed under {parent}")]
    TreeCycle { child: NodeId, parent: NodeId },

    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    // Domain validation
    #[error("Type error: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    // External
    #[error("Datastore error: {0}")]
    Datastore(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Structural errors mean a bug or corrupted state, not bad input.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::BrokenCloneChain { .. }
                | Error::AlreadyParent { .. }
                | Error::ChildNotFound { .. }
                | Error::NodeNotFound(_)
                | Error::NodeCloaked(_)
                | Error::ModelCycle { .. }
                | Error::TreeCycle { .. }
                | Error::IntegrityViolation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

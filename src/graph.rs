//! Branching conversation graph
//!
//! Each conversation owns an append-only tree of query/response nodes.
//! Selecting any node resolves to a root-to-node path that snaps forward
//! through unambiguous single-child continuations, so the UI can render a
//! straight line everywhere except genuine branch points.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// One query/response exchange in a conversation tree.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatNode {
    /// `{conversation_id}-{n}` where n counts nodes created so far.
    pub id: String,
    pub parent_id: Option<String>,
    /// Child node ids in branch-creation order. Only ever grows.
    pub children: Vec<String>,
    pub query: String,
    /// Empty or partial while a stream is in flight; frozen by `mark_complete`.
    pub response: String,
    /// Reasoning-channel text accumulated alongside the response.
    pub reasoning: String,
    pub model: Option<String>,
    /// Name of an attached document, if any. Carries no graph semantics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_name: Option<String>,
    pub complete: bool,
}

/// A flattened root-to-node path, ready to send to a model backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    pub query: String,
    pub response: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown conversation: {0}")]
    UnknownConversation(String),
    #[error("unknown node: {0}")]
    UnknownNode(String),
    #[error("unknown parent node: {0}")]
    UnknownParent(String),
    #[error("node {0} is complete; its response is immutable")]
    NodeComplete(String),
    #[error("graph store lock poisoned")]
    LockPoisoned,
}

/// The node tree for a single conversation.
#[derive(Debug, Default)]
pub struct ConversationGraph {
    conversation_id: String,
    nodes: HashMap<String, ChatNode>,
    /// Count of nodes ever created. Ids are never reused.
    next_index: usize,
}

impl ConversationGraph {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            nodes: HashMap::new(),
            next_index: 0,
        }
    }

    /// Allocate the next node id and insert the node, linking it under
    /// `parent_id` when given. The first node (parent `None`) is the root.
    pub fn create_node(
        &mut self,
        parent_id: Option<&str>,
        query: impl Into<String>,
    ) -> Result<&ChatNode, GraphError> {
        if let Some(parent) = parent_id {
            if !self.nodes.contains_key(parent) {
                return Err(GraphError::UnknownParent(parent.to_string()));
            }
        }

        let id = format!("{}-{}", self.conversation_id, self.next_index);
        self.next_index += 1;

        let node = ChatNode {
            id: id.clone(),
            parent_id: parent_id.map(str::to_string),
            children: Vec::new(),
            query: query.into(),
            response: String::new(),
            reasoning: String::new(),
            model: None,
            attachment_name: None,
            complete: false,
        };
        self.nodes.insert(id.clone(), node);

        if let Some(parent) = parent_id {
            // Checked above; the parent cannot have vanished since.
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                parent_node.children.push(id.clone());
            }
        }

        Ok(&self.nodes[&id])
    }

    pub fn get(&self, node_id: &str) -> Option<&ChatNode> {
        self.nodes.get(node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ChatNode> {
        self.nodes.values()
    }

    pub fn set_model(&mut self, node_id: &str, model: &str) -> Result<(), GraphError> {
        let node = self.node_mut(node_id)?;
        node.model = Some(model.to_string());
        Ok(())
    }

    pub fn set_attachment(&mut self, node_id: &str, name: &str) -> Result<(), GraphError> {
        let node = self.node_mut(node_id)?;
        node.attachment_name = Some(name.to_string());
        Ok(())
    }

    /// Concatenate a streamed content fragment onto the node's response.
    pub fn append_response(&mut self, node_id: &str, fragment: &str) -> Result<(), GraphError> {
        let node = self.writable_node_mut(node_id)?;
        node.response.push_str(fragment);
        Ok(())
    }

    /// Concatenate a streamed reasoning fragment onto the node's reasoning text.
    pub fn append_reasoning(&mut self, node_id: &str, fragment: &str) -> Result<(), GraphError> {
        let node = self.writable_node_mut(node_id)?;
        node.reasoning.push_str(fragment);
        Ok(())
    }

    /// Freeze the node once its stream has ended (normally or with an error).
    /// Whatever partial response has accumulated is kept.
    pub fn mark_complete(&mut self, node_id: &str) -> Result<(), GraphError> {
        let node = self.node_mut(node_id)?;
        node.complete = true;
        Ok(())
    }

    /// Build the root-to-`selected` path, then extend it forward while the
    /// tail node has exactly one child. The returned path always ends at a
    /// leaf or at a node with two or more children, so a genuine branch
    /// point forces the caller to disambiguate.
    pub fn resolve_context_path(&self, selected: &str) -> Result<Vec<String>, GraphError> {
        if !self.nodes.contains_key(selected) {
            return Err(GraphError::UnknownNode(selected.to_string()));
        }

        let mut path = Vec::new();
        let mut cursor = Some(selected.to_string());
        while let Some(id) = cursor {
            cursor = self.nodes[&id].parent_id.clone();
            path.push(id);
        }
        path.reverse();

        loop {
            let tail = &self.nodes[path.last().map(String::as_str).unwrap_or(selected)];
            match tail.children.as_slice() {
                [only] => path.push(only.clone()),
                _ => break,
            }
        }

        Ok(path)
    }

    /// Truncate `path` to end at `at` inclusive. The continuation that
    /// previously followed `at` stays in the tree untouched; the caller
    /// creates the alternative child afterwards.
    pub fn branch(path: &[String], at: &str) -> Vec<String> {
        match path.iter().position(|id| id == at) {
            Some(idx) => path[..=idx].to_vec(),
            None => path.to_vec(),
        }
    }

    /// Flatten a context path into the exact message sequence for a backend
    /// call. Role alternation is the caller's responsibility.
    pub fn linearize(&self, path: &[String]) -> Result<Vec<Exchange>, GraphError> {
        path.iter()
            .map(|id| {
                let node = self
                    .nodes
                    .get(id)
                    .ok_or_else(|| GraphError::UnknownNode(id.clone()))?;
                Ok(Exchange {
                    query: node.query.clone(),
                    response: node.response.clone(),
                })
            })
            .collect()
    }

    fn node_mut(&mut self, node_id: &str) -> Result<&mut ChatNode, GraphError> {
        self.nodes
            .get_mut(node_id)
            .ok_or_else(|| GraphError::UnknownNode(node_id.to_string()))
    }

    fn writable_node_mut(&mut self, node_id: &str) -> Result<&mut ChatNode, GraphError> {
        let node = self.node_mut(node_id)?;
        if node.complete {
            return Err(GraphError::NodeComplete(node_id.to_string()));
        }
        Ok(node)
    }
}

/// Process-wide store of conversation graphs.
///
/// Axum handlers run on a multithreaded runtime, so every mutation goes
/// through this mutex. The three write entry points a persistence layer
/// must observe are `create_node`, `append_*`, and `mark_complete`.
#[derive(Debug, Default)]
pub struct GraphStore {
    conversations: Mutex<HashMap<String, ConversationGraph>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh conversation and return its id.
    pub fn create_conversation(&self) -> Result<String, GraphError> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut conversations = self.lock()?;
        conversations.insert(id.clone(), ConversationGraph::new(id.clone()));
        Ok(id)
    }

    /// Remove a conversation and its entire graph. Individual nodes are
    /// never deleted; deletion is all-or-nothing.
    pub fn delete_conversation(&self, conversation_id: &str) -> Result<bool, GraphError> {
        let mut conversations = self.lock()?;
        Ok(conversations.remove(conversation_id).is_some())
    }

    pub fn create_node(
        &self,
        conversation_id: &str,
        parent_id: Option<&str>,
        query: &str,
    ) -> Result<ChatNode, GraphError> {
        self.with_graph_mut(conversation_id, |graph| {
            graph.create_node(parent_id, query).map(Clone::clone)
        })
    }

    pub fn append_response(
        &self,
        conversation_id: &str,
        node_id: &str,
        fragment: &str,
    ) -> Result<(), GraphError> {
        self.with_graph_mut(conversation_id, |graph| {
            graph.append_response(node_id, fragment)
        })
    }

    pub fn append_reasoning(
        &self,
        conversation_id: &str,
        node_id: &str,
        fragment: &str,
    ) -> Result<(), GraphError> {
        self.with_graph_mut(conversation_id, |graph| {
            graph.append_reasoning(node_id, fragment)
        })
    }

    pub fn mark_complete(&self, conversation_id: &str, node_id: &str) -> Result<(), GraphError> {
        self.with_graph_mut(conversation_id, |graph| graph.mark_complete(node_id))
    }

    pub fn set_model(
        &self,
        conversation_id: &str,
        node_id: &str,
        model: &str,
    ) -> Result<(), GraphError> {
        self.with_graph_mut(conversation_id, |graph| graph.set_model(node_id, model))
    }

    pub fn set_attachment(
        &self,
        conversation_id: &str,
        node_id: &str,
        name: &str,
    ) -> Result<(), GraphError> {
        self.with_graph_mut(conversation_id, |graph| graph.set_attachment(node_id, name))
    }

    pub fn resolve_context_path(
        &self,
        conversation_id: &str,
        node_id: &str,
    ) -> Result<Vec<String>, GraphError> {
        self.with_graph(conversation_id, |graph| graph.resolve_context_path(node_id))
    }

    pub fn linearize(
        &self,
        conversation_id: &str,
        path: &[String],
    ) -> Result<Vec<Exchange>, GraphError> {
        self.with_graph(conversation_id, |graph| graph.linearize(path))
    }

    /// Snapshot every node in a conversation, sorted by creation index.
    pub fn snapshot(&self, conversation_id: &str) -> Result<Vec<ChatNode>, GraphError> {
        self.with_graph(conversation_id, |graph| {
            let mut nodes: Vec<ChatNode> = graph.nodes().cloned().collect();
            nodes.sort_by_key(|n| {
                n.id.rsplit('-')
                    .next()
                    .and_then(|n| n.parse::<usize>().ok())
                    .unwrap_or(usize::MAX)
            });
            Ok(nodes)
        })
    }

    fn with_graph<T>(
        &self,
        conversation_id: &str,
        f: impl FnOnce(&ConversationGraph) -> Result<T, GraphError>,
    ) -> Result<T, GraphError> {
        let conversations = self.lock()?;
        let graph = conversations
            .get(conversation_id)
            .ok_or_else(|| GraphError::UnknownConversation(conversation_id.to_string()))?;
        f(graph)
    }

    fn with_graph_mut<T>(
        &self,
        conversation_id: &str,
        f: impl FnOnce(&mut ConversationGraph) -> Result<T, GraphError>,
    ) -> Result<T, GraphError> {
        let mut conversations = self.lock()?;
        let graph = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| GraphError::UnknownConversation(conversation_id.to_string()))?;
        f(graph)
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, ConversationGraph>>, GraphError> {
        self.conversations
            .lock()
            .map_err(|_| GraphError::LockPoisoned)
    }
}

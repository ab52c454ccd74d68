//! Search-root enumeration across shadow trees and frames.
//!
//! Traversal is iterative over an arena of context nodes. Each document is
//! finished (its light DOM, then its open shadow roots breadth-first) before
//! the next queued frame document is entered, so root handles are only ever
//! used while the driver sits in the frame they belong to.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::driver::{BrowserDriver, RootHandle, ShadowHost, ShadowMode};
use crate::errors::{DriverError, LocatorError};
use crate::types::{AttemptMethod, AttemptOutcome, ContextPath, ElementContext, ResolutionAttempt};

pub const DEFAULT_MAX_DEPTH: usize = 8;
pub const DEFAULT_MAX_ROOTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigatorLimits {
    /// Frames plus shadow hosts crossed from the top document.
    pub max_depth: usize,
    /// Searchable roots yielded per traversal.
    pub max_roots: usize,
}

impl Default for NavigatorLimits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_roots: DEFAULT_MAX_ROOTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRoot {
    pub path: ContextPath,
    pub root: RootHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootVisit {
    /// Driver is positioned in the root's frame; query it now.
    Searchable(SearchRoot),
    Unreachable { path: ContextPath, reason: String },
    Errored { path: ContextPath, message: String },
}

impl RootVisit {
    pub fn path(&self) -> &ContextPath {
        match self {
            RootVisit::Searchable(root) => &root.path,
            RootVisit::Unreachable { path, .. } | RootVisit::Errored { path, .. } => path,
        }
    }

    /// Context-level attempt for visits that could not be searched.
    pub fn attempt(&self) -> Option<ResolutionAttempt> {
        match self {
            RootVisit::Searchable(_) => None,
            RootVisit::Unreachable { path, reason } => {
                Some(ResolutionAttempt::unreachable(path.clone(), reason.clone()))
            }
            RootVisit::Errored { path, message } => Some(ResolutionAttempt::new(
                AttemptMethod::Context,
                path.clone(),
                AttemptOutcome::Errored {
                    message: message.clone(),
                },
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Document,
    Shadow,
}

#[derive(Debug)]
struct ContextNode {
    path: ContextPath,
    parent: Option<usize>,
    kind: NodeKind,
    root: Option<RootHandle>,
}

fn is_fatal(err: &DriverError) -> bool {
    matches!(err, DriverError::Disconnected(_))
}

/// Path labels for the hosts of one root, in driver order. A key seen
/// before gets its occurrence index appended (`product-card[1]`), so sibling
/// hosts without an id still map to distinct paths.
fn label_hosts(hosts: Vec<ShadowHost>) -> Vec<(String, ShadowHost)> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    hosts
        .into_iter()
        .map(|host| {
            let count = seen.entry(host.key.clone()).or_insert(0);
            let label = match *count {
                0 => host.key.clone(),
                n => format!("{}[{n}]", host.key),
            };
            *count += 1;
            (label, host)
        })
        .collect()
}

/// Lazily yields every reachable search root, fast path first.
///
/// The driver is left inside whatever frame the last yielded root lives in;
/// call [`ContextNavigator::restore`] when done, including on error paths.
pub struct ContextNavigator<'a> {
    driver: &'a dyn BrowserDriver,
    limits: NavigatorLimits,
    preferred: Option<ContextPath>,
    nodes: Vec<ContextNode>,
    documents: VecDeque<usize>,
    shadows: VecDeque<usize>,
    pending: VecDeque<RootVisit>,
    visited: HashSet<ContextPath>,
    reported: HashSet<ContextPath>,
    emitted: usize,
    entered_frames: Option<Vec<usize>>,
    touched_frames: bool,
    fast_path_pending: bool,
    exhausted: bool,
}

impl<'a> ContextNavigator<'a> {
    pub fn new(driver: &'a dyn BrowserDriver, limits: NavigatorLimits) -> Self {
        let mut navigator = Self {
            driver,
            limits,
            preferred: None,
            nodes: Vec::new(),
            documents: VecDeque::new(),
            shadows: VecDeque::new(),
            pending: VecDeque::new(),
            visited: HashSet::new(),
            reported: HashSet::new(),
            emitted: 0,
            entered_frames: None,
            touched_frames: false,
            fast_path_pending: false,
            exhausted: false,
        };
        navigator.reset();
        navigator
    }

    /// Try the recorded context before exhaustive enumeration.
    pub fn with_preferred(mut self, context: &ElementContext) -> Self {
        self.preferred = (!context.is_light_dom()).then(|| context.path());
        self.fast_path_pending = self.preferred.is_some();
        self
    }

    /// Start the traversal over; the next call to `next` yields from the top.
    pub fn restart(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.nodes.clear();
        self.documents.clear();
        self.shadows.clear();
        self.pending.clear();
        self.visited.clear();
        self.reported.clear();
        self.emitted = 0;
        self.exhausted = false;
        self.fast_path_pending = self.preferred.is_some();
        let top = self.push_node(ContextPath::document(), None, NodeKind::Document);
        self.documents.push_back(top);
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    fn push_node(&mut self, path: ContextPath, parent: Option<usize>, kind: NodeKind) -> usize {
        self.nodes.push(ContextNode {
            path,
            parent,
            kind,
            root: None,
        });
        self.nodes.len() - 1
    }

    /// Document node owning `id`, following parent links.
    fn owner_document(&self, mut id: usize) -> usize {
        while self.nodes[id].kind == NodeKind::Shadow {
            match self.nodes[id].parent {
                Some(parent) => id = parent,
                None => break,
            }
        }
        id
    }

    pub async fn next(&mut self) -> Result<Option<RootVisit>, LocatorError> {
        loop {
            if let Some(visit) = self.pending.pop_front() {
                return Ok(Some(visit));
            }
            if self.exhausted {
                return Ok(None);
            }
            if self.emitted >= self.limits.max_roots {
                warn!(max_roots = self.limits.max_roots, "root limit reached, traversal truncated");
                self.exhausted = true;
                continue;
            }

            if self.fast_path_pending {
                self.fast_path_pending = false;
                if let Some(root) = self.enter_preferred().await? {
                    debug!(path = %root.path, "fast path reached recorded context");
                    self.visited.insert(root.path.clone());
                    self.emitted += 1;
                    return Ok(Some(RootVisit::Searchable(root)));
                }
                continue;
            }

            if let Some(id) = self.shadows.pop_front() {
                let path = self.nodes[id].path.clone();
                let Some(root) = self.nodes[id].root.clone() else {
                    continue;
                };
                self.expand_shadow_hosts(id, &root).await?;
                if !self.visited.insert(path.clone()) {
                    debug!(path = %path, "root already visited");
                    continue;
                }
                self.emitted += 1;
                return Ok(Some(RootVisit::Searchable(SearchRoot { path, root })));
            }

            let Some(doc) = self.documents.pop_front() else {
                self.exhausted = true;
                continue;
            };
            let path = self.nodes[doc].path.clone();
            match self.open_document(&path).await {
                Ok(root) => {
                    self.nodes[doc].root = Some(root.clone());
                    self.expand_frames(doc, &root).await?;
                    self.shadows.push_back(doc);
                }
                Err(err) if doc == 0 || is_fatal(&err) => return Err(err.into()),
                Err(DriverError::CrossOrigin(_)) => {
                    self.report_unreachable(path, "cross-origin frame");
                }
                Err(err) => {
                    warn!(path = %path, error = %err, "frame document could not be opened");
                    self.pending.push_back(RootVisit::Errored {
                        path,
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    /// Return the driver to the top-level document.
    pub async fn restore(&mut self) -> Result<(), LocatorError> {
        if self.touched_frames || self.entered_frames.as_ref().map_or(true, |f| !f.is_empty()) {
            self.driver.switch_to_default().await?;
        }
        self.entered_frames = Some(Vec::new());
        self.touched_frames = false;
        Ok(())
    }

    async fn enter_frames(&mut self, frames: &[usize]) -> Result<(), DriverError> {
        if self.entered_frames.as_deref() == Some(frames) {
            return Ok(());
        }
        self.driver.switch_to_default().await?;
        self.entered_frames = Some(Vec::new());
        for &index in frames {
            self.touched_frames = true;
            if let Err(err) = self.driver.switch_to_frame(index).await {
                self.entered_frames = None;
                return Err(err);
            }
            if let Some(entered) = self.entered_frames.as_mut() {
                entered.push(index);
            }
        }
        Ok(())
    }

    async fn open_document(&mut self, path: &ContextPath) -> Result<RootHandle, DriverError> {
        self.enter_frames(&path.frame_path).await?;
        self.driver.document_root().await
    }

    async fn expand_frames(&mut self, doc: usize, root: &RootHandle) -> Result<(), LocatorError> {
        let doc_path = self.nodes[doc].path.clone();
        let frames = match self.driver.frames(root).await {
            Ok(frames) => frames,
            Err(err) if is_fatal(&err) => return Err(err.into()),
            Err(err) => {
                warn!(path = %doc_path, error = %err, "frame enumeration failed");
                self.pending.push_back(RootVisit::Errored {
                    path: doc_path,
                    message: err.to_string(),
                });
                return Ok(());
            }
        };
        for frame in frames {
            let path = doc_path.child_frame(frame.index);
            if path.depth() > self.limits.max_depth {
                debug!(path = %path, "frame beyond max depth skipped");
                continue;
            }
            if !frame.same_origin {
                self.report_unreachable(path, "cross-origin frame");
                continue;
            }
            let id = self.push_node(path, Some(doc), NodeKind::Document);
            self.documents.push_back(id);
        }
        Ok(())
    }

    async fn expand_shadow_hosts(&mut self, id: usize, root: &RootHandle) -> Result<(), LocatorError> {
        let parent_path = self.nodes[id].path.clone();
        let hosts = match self.driver.shadow_hosts(root).await {
            Ok(hosts) => hosts,
            Err(err) if is_fatal(&err) => return Err(err.into()),
            Err(err) => {
                warn!(path = %parent_path, error = %err, "shadow host enumeration failed");
                self.pending.push_back(RootVisit::Errored {
                    path: parent_path,
                    message: err.to_string(),
                });
                return Ok(());
            }
        };
        let owner = self.owner_document(id);
        for (label, host) in label_hosts(hosts) {
            let path = parent_path.child_shadow(&label);
            if path.depth() > self.limits.max_depth {
                debug!(path = %path, "shadow root beyond max depth skipped");
                continue;
            }
            if host.mode == ShadowMode::Closed {
                self.report_unreachable(path, "closed shadow root");
                continue;
            }
            match self.driver.shadow_root(&host.element).await {
                Ok(Some(shadow)) => {
                    let child = self.push_node(path, Some(id), NodeKind::Shadow);
                    self.nodes[child].root = Some(shadow);
                    debug_assert_eq!(self.owner_document(child), owner);
                    self.shadows.push_back(child);
                }
                Ok(None) => self.report_unreachable(path, "shadow root not attached"),
                Err(err) if is_fatal(&err) => return Err(err.into()),
                Err(err) => self.pending.push_back(RootVisit::Errored {
                    path,
                    message: err.to_string(),
                }),
            }
        }
        Ok(())
    }

    fn report_unreachable(&mut self, path: ContextPath, reason: &str) {
        if self.reported.insert(path.clone()) {
            debug!(path = %path, reason, "context unreachable");
            self.pending.push_back(RootVisit::Unreachable {
                path,
                reason: reason.to_string(),
            });
        }
    }

    async fn enter_preferred(&mut self) -> Result<Option<SearchRoot>, LocatorError> {
        let Some(target) = self.preferred.clone() else {
            return Ok(None);
        };
        if target.depth() > self.limits.max_depth {
            debug!(path = %target, "recorded context deeper than max depth");
            return Ok(None);
        }
        match self.walk_to(&target).await {
            Ok(found) => Ok(found),
            Err(err) if is_fatal(&err) => Err(err.into()),
            Err(err) => {
                debug!(path = %target, error = %err, "fast path failed, falling back");
                Ok(None)
            }
        }
    }

    /// Follow a recorded path step by step. `None` when a step is missing.
    async fn walk_to(&mut self, target: &ContextPath) -> Result<Option<SearchRoot>, DriverError> {
        self.enter_frames(&[]).await?;
        let mut path = ContextPath::document();
        for &index in &target.frame_path {
            let root = self.driver.document_root().await?;
            let frames = self.driver.frames(&root).await?;
            let child = path.child_frame(index);
            match frames.iter().find(|frame| frame.index == index) {
                None => {
                    debug!(path = %child, "recorded frame missing");
                    return Ok(None);
                }
                Some(frame) if !frame.same_origin => {
                    self.report_unreachable(child, "cross-origin frame");
                    return Ok(None);
                }
                Some(_) => {}
            }
            self.touched_frames = true;
            if let Err(err) = self.driver.switch_to_frame(index).await {
                self.entered_frames = None;
                if let DriverError::CrossOrigin(_) = err {
                    self.report_unreachable(child, "cross-origin frame");
                    return Ok(None);
                }
                return Err(err);
            }
            if let Some(entered) = self.entered_frames.as_mut() {
                entered.push(index);
            }
            path = child;
        }

        let mut root = self.driver.document_root().await?;
        for key in &target.shadow_path {
            let child = path.child_shadow(key);
            let hosts = label_hosts(self.driver.shadow_hosts(&root).await?);
            let Some((_, host)) = hosts.into_iter().find(|(label, _)| label == key) else {
                debug!(path = %child, "recorded shadow host missing");
                return Ok(None);
            };
            if host.mode == ShadowMode::Closed {
                self.report_unreachable(child, "closed shadow root");
                return Ok(None);
            }
            match self.driver.shadow_root(&host.element).await? {
                Some(shadow) => root = shadow,
                None => {
                    self.report_unreachable(child, "shadow root not attached");
                    return Ok(None);
                }
            }
            path = child;
        }
        Ok(Some(SearchRoot { path, root }))
    }
}

impl Drop for ContextNavigator<'_> {
    fn drop(&mut self) {
        if self.touched_frames {
            warn!("context navigator dropped without restoring default content");
        }
    }
}

//! In-memory page model implementing [`BrowserDriver`].
//!
//! Pages are built with [`MockDocument`] and [`MockNode`], compiled into a flat
//! arena, and queried with a small CSS and XPath subset. Frame switching is
//! stateful exactly like a real session: handles from another frame are stale.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use relocator_core_types::{Point, Rect, Screenshot, Viewport};

use crate::driver::{
    BrowserDriver, ConsoleMessage, ElementHandle, ElementInfo, ElementQuery, FrameInfo, ReadyState,
    RootHandle, ShadowHost, ShadowMode,
};
use crate::errors::DriverError;
use crate::strategies::normalize_text;

#[derive(Debug, Clone)]
pub struct MockNode {
    tag: String,
    attributes: BTreeMap<String, String>,
    text: String,
    displayed: bool,
    rect: Option<Rect>,
    children: Vec<MockNode>,
    shadow: Option<(ShadowMode, Vec<MockNode>)>,
    frame: Option<(MockDocument, bool)>,
}

impl MockNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attributes: BTreeMap::new(),
            text: String::new(),
            displayed: true,
            rect: None,
            children: Vec::new(),
            shadow: None,
            frame: None,
        }
    }

    pub fn id(self, id: impl Into<String>) -> Self {
        self.attr("id", id)
    }

    pub fn class(self, class: impl Into<String>) -> Self {
        self.attr("class", class)
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.displayed = false;
        self
    }

    pub fn rect(mut self, rect: Rect) -> Self {
        self.rect = Some(rect);
        self
    }

    pub fn child(mut self, child: MockNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn open_shadow(mut self, children: Vec<MockNode>) -> Self {
        self.shadow = Some((ShadowMode::Open, children));
        self
    }

    pub fn closed_shadow(mut self, children: Vec<MockNode>) -> Self {
        self.shadow = Some((ShadowMode::Closed, children));
        self
    }

    pub fn iframe(mut self, document: MockDocument, same_origin: bool) -> Self {
        self.frame = Some((document, same_origin));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockDocument {
    children: Vec<MockNode>,
}

impl MockDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(mut self, node: MockNode) -> Self {
        self.children.push(node);
        self
    }
}

#[derive(Debug)]
struct Node {
    tag: String,
    attributes: BTreeMap<String, String>,
    own_text: String,
    displayed: bool,
    rect: Option<Rect>,
    parent: Option<usize>,
    children: Vec<usize>,
    doc: usize,
    shadow: Option<(ShadowMode, usize)>,
}

#[derive(Debug)]
struct Root {
    doc: usize,
    children: Vec<usize>,
}

#[derive(Debug)]
struct FrameSlot {
    doc: usize,
    same_origin: bool,
    src: Option<String>,
}

#[derive(Debug)]
struct Doc {
    root: usize,
    frames: Vec<FrameSlot>,
}

#[derive(Debug, Default)]
struct Page {
    nodes: Vec<Node>,
    roots: Vec<Root>,
    docs: Vec<Doc>,
}

impl Page {
    fn compile(document: &MockDocument) -> Self {
        let mut page = Page::default();
        page.compile_doc(document);
        page
    }

    fn compile_doc(&mut self, document: &MockDocument) -> usize {
        let doc = self.docs.len();
        self.docs.push(Doc {
            root: 0,
            frames: Vec::new(),
        });
        let root = self.new_root(doc);
        self.docs[doc].root = root;
        for child in &document.children {
            let id = self.compile_node(child, doc, root, None, true);
            self.roots[root].children.push(id);
        }
        doc
    }

    fn new_root(&mut self, doc: usize) -> usize {
        self.roots.push(Root {
            doc,
            children: Vec::new(),
        });
        self.roots.len() - 1
    }

    fn compile_node(
        &mut self,
        node: &MockNode,
        doc: usize,
        root: usize,
        parent: Option<usize>,
        parent_displayed: bool,
    ) -> usize {
        let id = self.nodes.len();
        let displayed = parent_displayed && node.displayed;
        self.nodes.push(Node {
            tag: node.tag.clone(),
            attributes: node.attributes.clone(),
            own_text: node.text.clone(),
            displayed,
            rect: node.rect,
            parent,
            children: Vec::new(),
            doc,
            shadow: None,
        });

        if let Some((mode, children)) = &node.shadow {
            let shadow_root = self.new_root(doc);
            for child in children {
                let child_id = self.compile_node(child, doc, shadow_root, None, displayed);
                self.roots[shadow_root].children.push(child_id);
            }
            self.nodes[id].shadow = Some((*mode, shadow_root));
        }
        for child in &node.children {
            let child_id = self.compile_node(child, doc, root, Some(id), displayed);
            self.nodes[id].children.push(child_id);
        }
        if let Some((document, same_origin)) = &node.frame {
            let child_doc = self.compile_doc(document);
            self.docs[doc].frames.push(FrameSlot {
                doc: child_doc,
                same_origin: *same_origin,
                src: node.attributes.get("src").cloned(),
            });
        }
        id
    }

    /// Light-tree nodes of a root in document order.
    fn nodes_in_root(&self, root: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.roots[root].children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.nodes[id].children.iter().rev().copied());
        }
        out
    }

    fn descendants(&self, id: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.nodes[id].children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.nodes[next].children.iter().rev().copied());
        }
        out
    }

    fn full_text(&self, id: usize) -> String {
        let mut parts = vec![self.nodes[id].own_text.as_str()];
        for child in self.descendants(id) {
            parts.push(self.nodes[child].own_text.as_str());
        }
        normalize_text(&parts.join(" "))
    }

    fn info(&self, id: usize) -> ElementInfo {
        let node = &self.nodes[id];
        ElementInfo {
            tag_name: node.tag.clone(),
            text: self.full_text(id),
            attributes: node.attributes.clone(),
            displayed: node.displayed,
            rect: node.rect,
        }
    }

    fn host_key(&self, id: usize) -> String {
        let node = &self.nodes[id];
        match node.attributes.get("id") {
            Some(id) => format!("{}#{}", node.tag, id),
            None => node.tag.clone(),
        }
    }

    fn is_anchor_like(&self, id: usize) -> bool {
        let node = &self.nodes[id];
        node.tag == "a"
            || node.tag == "area"
            || node
                .attributes
                .get("role")
                .is_some_and(|role| role.eq_ignore_ascii_case("link"))
    }

    fn has_class(&self, id: usize, class: &str) -> bool {
        self.nodes[id]
            .attributes
            .get("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    fn query(&self, root: usize, query: &ElementQuery) -> Result<Vec<usize>, DriverError> {
        let nodes = self.nodes_in_root(root);
        let attr_is = |id: usize, name: &str, value: &str| {
            self.nodes[id].attributes.get(name).map(String::as_str) == Some(value)
        };
        let found = match query {
            ElementQuery::Id(v) => nodes.into_iter().filter(|&id| attr_is(id, "id", v)).collect(),
            ElementQuery::Name(v) => nodes.into_iter().filter(|&id| attr_is(id, "name", v)).collect(),
            ElementQuery::TagName(v) => nodes
                .into_iter()
                .filter(|&id| self.nodes[id].tag.eq_ignore_ascii_case(v))
                .collect(),
            ElementQuery::ClassName(v) => {
                if v.is_empty() || v.contains(char::is_whitespace) {
                    return Err(DriverError::InvalidSelector(format!(
                        "compound class names not permitted: '{v}'"
                    )));
                }
                nodes.into_iter().filter(|&id| self.has_class(id, v)).collect()
            }
            ElementQuery::LinkText(v) => nodes
                .into_iter()
                .filter(|&id| self.is_anchor_like(id) && self.full_text(id) == *v)
                .collect(),
            ElementQuery::PartialLinkText(v) => nodes
                .into_iter()
                .filter(|&id| self.is_anchor_like(id) && self.full_text(id).contains(v.as_str()))
                .collect(),
            ElementQuery::Text(v) => {
                if v.is_empty() {
                    Vec::new()
                } else {
                    nodes
                        .into_iter()
                        .filter(|&id| normalize_text(&self.nodes[id].own_text).contains(v.as_str()))
                        .collect()
                }
            }
            ElementQuery::Css(selector) => {
                let groups = css::parse(selector).map_err(DriverError::InvalidSelector)?;
                nodes
                    .into_iter()
                    .filter(|&id| groups.iter().any(|group| self.css_matches(id, group, group.len() - 1)))
                    .collect()
            }
            ElementQuery::XPath(expr) => {
                let steps = xpath::parse(expr).map_err(DriverError::InvalidSelector)?;
                self.xpath_eval(root, &steps)
            }
        };
        Ok(found)
    }

    fn css_matches(&self, id: usize, parts: &[(css::Combinator, css::Compound)], idx: usize) -> bool {
        let (combinator, compound) = &parts[idx];
        if !compound.matches(&self.nodes[id].tag, &self.nodes[id].attributes) {
            return false;
        }
        if idx == 0 {
            return true;
        }
        match combinator {
            css::Combinator::Child => self.nodes[id]
                .parent
                .is_some_and(|parent| self.css_matches(parent, parts, idx - 1)),
            css::Combinator::Descendant => {
                let mut current = self.nodes[id].parent;
                while let Some(ancestor) = current {
                    if self.css_matches(ancestor, parts, idx - 1) {
                        return true;
                    }
                    current = self.nodes[ancestor].parent;
                }
                false
            }
        }
    }

    fn xpath_eval(&self, root: usize, steps: &[xpath::Step]) -> Vec<usize> {
        let mut contexts: Vec<Option<usize>> = vec![None];
        for step in steps {
            let mut next: Vec<usize> = Vec::new();
            for context in &contexts {
                let candidates = match (context, step.descendant) {
                    (None, false) => self.roots[root].children.clone(),
                    (None, true) => self.nodes_in_root(root),
                    (Some(id), false) => self.nodes[*id].children.clone(),
                    (Some(id), true) => self.descendants(*id),
                };
                for candidate in candidates {
                    if step.name_matches(&self.nodes[candidate].tag)
                        && step
                            .predicates
                            .iter()
                            .all(|predicate| self.xpath_predicate(root, candidate, step, predicate))
                    {
                        next.push(candidate);
                    }
                }
            }
            next.sort_unstable();
            next.dedup();
            contexts = next.into_iter().map(Some).collect();
        }
        contexts.into_iter().flatten().collect()
    }

    fn xpath_predicate(
        &self,
        root: usize,
        id: usize,
        step: &xpath::Step,
        predicate: &xpath::Predicate,
    ) -> bool {
        let node = &self.nodes[id];
        match predicate {
            xpath::Predicate::AttrExists(name) => node.attributes.contains_key(name),
            xpath::Predicate::AttrEq(name, value) => node.attributes.get(name) == Some(value),
            xpath::Predicate::AttrContains(name, value) => node
                .attributes
                .get(name)
                .is_some_and(|attr| attr.contains(value.as_str())),
            xpath::Predicate::TextEq(value) => normalize_text(&node.own_text) == normalize_text(value),
            xpath::Predicate::TextContains(value) => node.own_text.contains(value.as_str()),
            xpath::Predicate::StringContains(value) => self.full_text(id).contains(value.as_str()),
            xpath::Predicate::Position(position) => {
                let siblings = match node.parent {
                    Some(parent) => &self.nodes[parent].children,
                    None => &self.roots[root].children,
                };
                siblings
                    .iter()
                    .filter(|&&sibling| step.name_matches(&self.nodes[sibling].tag))
                    .position(|&sibling| sibling == id)
                    .is_some_and(|index| index + 1 == *position)
            }
        }
    }
}

mod css {
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Combinator {
        Descendant,
        Child,
    }

    #[derive(Debug, Default)]
    pub struct Compound {
        tag: Option<String>,
        id: Option<String>,
        classes: Vec<String>,
        attributes: Vec<(String, Option<String>)>,
    }

    impl Compound {
        pub fn matches(&self, tag: &str, attributes: &BTreeMap<String, String>) -> bool {
            if let Some(expected) = &self.tag {
                if !expected.eq_ignore_ascii_case(tag) {
                    return false;
                }
            }
            if let Some(id) = &self.id {
                if attributes.get("id") != Some(id) {
                    return false;
                }
            }
            let classes = attributes.get("class").map(String::as_str).unwrap_or_default();
            if !self
                .classes
                .iter()
                .all(|class| classes.split_whitespace().any(|c| c == class))
            {
                return false;
            }
            self.attributes.iter().all(|(name, value)| match value {
                Some(value) => attributes.get(name) == Some(value),
                None => attributes.contains_key(name),
            })
        }
    }

    fn is_ident(c: char) -> bool {
        c.is_alphanumeric() || c == '-' || c == '_'
    }

    fn ident(chars: &[char], pos: &mut usize) -> Result<String, String> {
        let start = *pos;
        while *pos < chars.len() && is_ident(chars[*pos]) {
            *pos += 1;
        }
        if start == *pos {
            return Err(format!("expected identifier at offset {start}"));
        }
        Ok(chars[start..*pos].iter().collect())
    }

    fn attribute(chars: &[char], pos: &mut usize) -> Result<(String, Option<String>), String> {
        let name = ident(chars, pos)?;
        match chars.get(*pos) {
            Some(']') => {
                *pos += 1;
                Ok((name, None))
            }
            Some('=') => {
                *pos += 1;
                let value = match chars.get(*pos) {
                    Some(&quote) if quote == '"' || quote == '\'' => {
                        *pos += 1;
                        let start = *pos;
                        while *pos < chars.len() && chars[*pos] != quote {
                            *pos += 1;
                        }
                        if *pos >= chars.len() {
                            return Err("unterminated string in attribute selector".to_string());
                        }
                        let value: String = chars[start..*pos].iter().collect();
                        *pos += 1;
                        value
                    }
                    _ => ident(chars, pos)?,
                };
                if chars.get(*pos) != Some(&']') {
                    return Err("expected ']' in attribute selector".to_string());
                }
                *pos += 1;
                Ok((name, Some(value)))
            }
            _ => Err("malformed attribute selector".to_string()),
        }
    }

    fn compound(chars: &[char], pos: &mut usize) -> Result<Compound, String> {
        let mut compound = Compound::default();
        let start = *pos;
        if chars.get(*pos) == Some(&'*') {
            *pos += 1;
        } else if chars.get(*pos).is_some_and(|c| is_ident(*c)) {
            compound.tag = Some(ident(chars, pos)?.to_ascii_lowercase());
        }
        while let Some(&c) = chars.get(*pos) {
            match c {
                '#' => {
                    *pos += 1;
                    compound.id = Some(ident(chars, pos)?);
                }
                '.' => {
                    *pos += 1;
                    compound.classes.push(ident(chars, pos)?);
                }
                '[' => {
                    *pos += 1;
                    compound.attributes.push(attribute(chars, pos)?);
                }
                c if c.is_whitespace() || c == '>' => break,
                other => return Err(format!("unexpected '{other}' in selector")),
            }
        }
        if start == *pos {
            return Err("empty compound selector".to_string());
        }
        Ok(compound)
    }

    fn complex(group: &str) -> Result<Vec<(Combinator, Compound)>, String> {
        let chars: Vec<char> = group.trim().chars().collect();
        if chars.is_empty() {
            return Err("empty selector".to_string());
        }
        let mut pos = 0;
        let mut parts = Vec::new();
        let mut combinator = Combinator::Descendant;
        loop {
            let mut saw_space = false;
            while chars.get(pos).is_some_and(|c| c.is_whitespace()) {
                pos += 1;
                saw_space = true;
            }
            if pos >= chars.len() {
                break;
            }
            if chars[pos] == '>' {
                if parts.is_empty() {
                    return Err("selector starts with a combinator".to_string());
                }
                combinator = Combinator::Child;
                pos += 1;
                continue;
            }
            if saw_space && combinator != Combinator::Child {
                combinator = Combinator::Descendant;
            }
            parts.push((combinator, compound(&chars, &mut pos)?));
            combinator = Combinator::Descendant;
        }
        if parts.is_empty() {
            return Err("empty selector".to_string());
        }
        Ok(parts)
    }

    pub fn parse(selector: &str) -> Result<Vec<Vec<(Combinator, Compound)>>, String> {
        selector.split(',').map(complex).collect()
    }
}

mod xpath {
    #[derive(Debug)]
    pub enum Predicate {
        AttrExists(String),
        AttrEq(String, String),
        AttrContains(String, String),
        TextEq(String),
        TextContains(String),
        StringContains(String),
        Position(usize),
    }

    #[derive(Debug)]
    pub struct Step {
        pub descendant: bool,
        pub name: String,
        pub predicates: Vec<Predicate>,
    }

    impl Step {
        pub fn name_matches(&self, tag: &str) -> bool {
            self.name == "*" || self.name.eq_ignore_ascii_case(tag)
        }
    }

    fn unquote(raw: &str) -> Result<String, String> {
        let raw = raw.trim();
        let mut chars = raw.chars();
        match (chars.next(), chars.last()) {
            (Some(open), Some(close)) if raw.len() >= 2 && open == close && (open == '\'' || open == '"') => {
                Ok(raw[1..raw.len() - 1].to_string())
            }
            _ => Err(format!("expected quoted literal, got '{raw}'")),
        }
    }

    fn predicate(body: &str) -> Result<Predicate, String> {
        let body = body.trim();
        if let Ok(position) = body.parse::<usize>() {
            if position == 0 {
                return Err("positions start at 1".to_string());
            }
            return Ok(Predicate::Position(position));
        }
        if let Some(inner) = body.strip_prefix("contains(").and_then(|rest| rest.strip_suffix(')')) {
            let (subject, needle) = inner
                .split_once(',')
                .ok_or_else(|| "contains() takes two arguments".to_string())?;
            let needle = unquote(needle)?;
            let subject = subject.trim();
            return match subject {
                "text()" => Ok(Predicate::TextContains(needle)),
                "." => Ok(Predicate::StringContains(needle)),
                attr if attr.starts_with('@') && attr.len() > 1 => {
                    Ok(Predicate::AttrContains(attr[1..].to_string(), needle))
                }
                other => Err(format!("unsupported contains() subject '{other}'")),
            };
        }
        if let Some((left, right)) = body.split_once('=') {
            let left = left.trim();
            let value = unquote(right)?;
            return match left {
                "text()" | "normalize-space()" | "normalize-space(text())" => Ok(Predicate::TextEq(value)),
                attr if attr.starts_with('@') && attr.len() > 1 => {
                    Ok(Predicate::AttrEq(attr[1..].to_string(), value))
                }
                other => Err(format!("unsupported predicate subject '{other}'")),
            };
        }
        if let Some(name) = body.strip_prefix('@') {
            if !name.is_empty() {
                return Ok(Predicate::AttrExists(name.to_string()));
            }
        }
        Err(format!("unsupported predicate '[{body}]'"))
    }

    pub fn parse(expr: &str) -> Result<Vec<Step>, String> {
        let chars: Vec<char> = expr.trim().chars().collect();
        if chars.first() != Some(&'/') {
            return Err(format!("xpath must be absolute: '{expr}'"));
        }
        let mut steps = Vec::new();
        let mut pos = 0;
        while pos < chars.len() {
            if chars[pos] != '/' {
                return Err(format!("expected '/' at offset {pos}"));
            }
            let descendant = chars.get(pos + 1) == Some(&'/');
            pos += if descendant { 2 } else { 1 };

            let start = pos;
            while pos < chars.len() && chars[pos] != '[' && chars[pos] != '/' {
                pos += 1;
            }
            let name: String = chars[start..pos].iter().collect::<String>().trim().to_string();
            if name.is_empty()
                || !(name == "*" || name.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_'))
            {
                return Err(format!("invalid node test '{name}'"));
            }

            let mut predicates = Vec::new();
            while chars.get(pos) == Some(&'[') {
                pos += 1;
                let body_start = pos;
                let mut quote: Option<char> = None;
                while pos < chars.len() {
                    let c = chars[pos];
                    match quote {
                        Some(q) if c == q => quote = None,
                        Some(_) => {}
                        None if c == '\'' || c == '"' => quote = Some(c),
                        None if c == ']' => break,
                        None => {}
                    }
                    pos += 1;
                }
                if pos >= chars.len() {
                    return Err("unterminated predicate".to_string());
                }
                let body: String = chars[body_start..pos].iter().collect();
                predicates.push(predicate(&body)?);
                pos += 1;
            }
            steps.push(Step {
                descendant,
                name,
                predicates,
            });
        }
        Ok(steps)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub find_elements: usize,
    pub screenshots: usize,
    pub frame_switches: usize,
}

struct MockState {
    page: Page,
    page_version: u64,
    frames: Vec<usize>,
    screenshot: Option<Screenshot>,
    viewport: Viewport,
    url: Option<String>,
    console: Vec<ConsoleMessage>,
    ready_state: ReadyState,
    disconnected: bool,
    calls: MockCalls,
}

impl MockState {
    fn check_connected(&self) -> Result<(), DriverError> {
        if self.disconnected {
            Err(DriverError::Disconnected("mock session closed".to_string()))
        } else {
            Ok(())
        }
    }

    fn current_doc(&self) -> usize {
        let mut doc = 0;
        for &index in &self.frames {
            if let Some(slot) = self.page.docs.get(doc).and_then(|d| d.frames.get(index)) {
                doc = slot.doc;
            }
        }
        doc
    }

    fn root_id(&self, root: &RootHandle) -> Result<usize, DriverError> {
        let id = parse_handle(&root.0, "root-")
            .filter(|&id| id < self.page.roots.len())
            .ok_or_else(|| DriverError::StaleContext(format!("unknown root {root}")))?;
        if self.page.roots[id].doc != self.current_doc() {
            return Err(DriverError::StaleContext(format!("{root} belongs to another frame")));
        }
        Ok(id)
    }

    fn node_id(&self, element: &ElementHandle) -> Result<usize, DriverError> {
        let id = parse_handle(&element.0, "node-")
            .filter(|&id| id < self.page.nodes.len())
            .ok_or_else(|| DriverError::StaleContext(format!("unknown element {element}")))?;
        if self.page.nodes[id].doc != self.current_doc() {
            return Err(DriverError::StaleContext(format!("{element} belongs to another frame")));
        }
        Ok(id)
    }
}

fn parse_handle(raw: &str, prefix: &str) -> Option<usize> {
    raw.strip_prefix(prefix)?.parse().ok()
}

fn element_handle(id: usize) -> ElementHandle {
    ElementHandle(format!("node-{id}"))
}

fn root_handle(id: usize) -> RootHandle {
    RootHandle(format!("root-{id}"))
}

/// Scriptable in-memory browser session.
pub struct MockDriver {
    state: RwLock<MockState>,
}

impl MockDriver {
    pub fn new(document: MockDocument) -> Self {
        Self {
            state: RwLock::new(MockState {
                page: Page::compile(&document),
                page_version: 0,
                frames: Vec::new(),
                screenshot: None,
                viewport: Viewport::default(),
                url: None,
                console: Vec::new(),
                ready_state: ReadyState::Complete,
                disconnected: false,
                calls: MockCalls::default(),
            }),
        }
    }

    /// Replace the page; the session returns to the top-level document.
    pub fn set_page(&self, document: MockDocument) {
        let mut state = self.state.write();
        state.page = Page::compile(&document);
        state.page_version += 1;
        state.frames.clear();
    }

    /// Fixed screenshot; by default one is derived from the page version.
    pub fn set_screenshot(&self, screenshot: Screenshot) {
        self.state.write().screenshot = Some(screenshot);
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        self.state.write().viewport = viewport;
    }

    pub fn set_url(&self, url: impl Into<String>) {
        self.state.write().url = Some(url.into());
    }

    pub fn push_console(&self, message: ConsoleMessage) {
        self.state.write().console.push(message);
    }

    pub fn set_ready_state(&self, ready_state: ReadyState) {
        self.state.write().ready_state = ready_state;
    }

    pub fn set_disconnected(&self, disconnected: bool) {
        self.state.write().disconnected = disconnected;
    }

    pub fn current_frame_depth(&self) -> usize {
        self.state.read().frames.len()
    }

    pub fn calls(&self) -> MockCalls {
        self.state.read().calls
    }

    /// Handle of the first element carrying `id`, in any document.
    pub fn element_with_id(&self, id: &str) -> Option<ElementHandle> {
        let state = self.state.read();
        state
            .page
            .nodes
            .iter()
            .position(|node| node.attributes.get("id").map(String::as_str) == Some(id))
            .map(element_handle)
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn document_root(&self) -> Result<RootHandle, DriverError> {
        let state = self.state.read();
        state.check_connected()?;
        let doc = state.current_doc();
        Ok(root_handle(state.page.docs[doc].root))
    }

    async fn find_elements(
        &self,
        root: &RootHandle,
        query: &ElementQuery,
    ) -> Result<Vec<ElementHandle>, DriverError> {
        let mut state = self.state.write();
        state.check_connected()?;
        state.calls.find_elements += 1;
        let root = state.root_id(root)?;
        let ids = state.page.query(root, query)?;
        Ok(ids.into_iter().map(element_handle).collect())
    }

    async fn describe(&self, element: &ElementHandle) -> Result<ElementInfo, DriverError> {
        let state = self.state.read();
        state.check_connected()?;
        let id = state.node_id(element)?;
        Ok(state.page.info(id))
    }

    async fn shadow_hosts(&self, root: &RootHandle) -> Result<Vec<ShadowHost>, DriverError> {
        let state = self.state.read();
        state.check_connected()?;
        let root = state.root_id(root)?;
        let hosts = state
            .page
            .nodes_in_root(root)
            .into_iter()
            .filter_map(|id| {
                state.page.nodes[id].shadow.map(|(mode, _)| ShadowHost {
                    element: element_handle(id),
                    key: state.page.host_key(id),
                    mode,
                })
            })
            .collect();
        Ok(hosts)
    }

    async fn shadow_root(&self, host: &ElementHandle) -> Result<Option<RootHandle>, DriverError> {
        let state = self.state.read();
        state.check_connected()?;
        let id = state.node_id(host)?;
        Ok(match state.page.nodes[id].shadow {
            Some((ShadowMode::Open, root)) => Some(root_handle(root)),
            _ => None,
        })
    }

    async fn frames(&self, root: &RootHandle) -> Result<Vec<FrameInfo>, DriverError> {
        let state = self.state.read();
        state.check_connected()?;
        let root = state.root_id(root)?;
        let doc = state.page.roots[root].doc;
        Ok(state.page.docs[doc]
            .frames
            .iter()
            .enumerate()
            .map(|(index, slot)| FrameInfo {
                index,
                same_origin: slot.same_origin,
                src: slot.src.clone(),
            })
            .collect())
    }

    async fn switch_to_frame(&self, index: usize) -> Result<(), DriverError> {
        let mut state = self.state.write();
        state.check_connected()?;
        state.calls.frame_switches += 1;
        let doc = state.current_doc();
        let slot = state.page.docs[doc]
            .frames
            .get(index)
            .ok_or(DriverError::NoSuchFrame(index))?;
        if !slot.same_origin {
            return Err(DriverError::CrossOrigin(index));
        }
        state.frames.push(index);
        Ok(())
    }

    async fn switch_to_default(&self) -> Result<(), DriverError> {
        let mut state = self.state.write();
        state.check_connected()?;
        state.frames.clear();
        Ok(())
    }

    async fn screenshot(&self) -> Result<Screenshot, DriverError> {
        let mut state = self.state.write();
        state.check_connected()?;
        state.calls.screenshots += 1;
        if let Some(screenshot) = &state.screenshot {
            return Ok(screenshot.clone());
        }
        let data = format!("mock-page-v{}", state.page_version).into_bytes();
        Ok(Screenshot::new(data, state.viewport.width, state.viewport.height))
    }

    async fn viewport(&self) -> Result<Viewport, DriverError> {
        let state = self.state.read();
        state.check_connected()?;
        Ok(state.viewport)
    }

    async fn element_at_point(&self, point: Point) -> Result<Option<ElementHandle>, DriverError> {
        let state = self.state.read();
        state.check_connected()?;
        Ok(state
            .page
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| {
                node.doc == 0 && node.displayed && node.rect.is_some_and(|rect| rect.contains(point))
            })
            .map(|(id, _)| id)
            .last()
            .map(element_handle))
    }

    async fn current_url(&self) -> Result<Option<String>, DriverError> {
        Ok(self.state.read().url.clone())
    }

    async fn console_messages(&self) -> Result<Vec<ConsoleMessage>, DriverError> {
        Ok(self.state.read().console.clone())
    }

    async fn ready_state(&self) -> Result<ReadyState, DriverError> {
        Ok(self.state.read().ready_state)
    }
}

//! Template engine: pattern construction, search and generation.
//!
//! A template is an ordered list of (source, connector, target) triples whose
//! items are concrete handles, variable type masks or named back-references.
//! Searching binds every variable against the store; generation creates the
//! missing elements instead.

mod generate;
mod search;

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::storage::Store;
use crate::types::{Constancy, ElementId, ElementType, Result, StoreError};

pub use generate::GenResult;
pub use search::{SearchFlow, SearchResult};

use search::StaticPlan;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ItemValue {
    Addr(ElementId),
    Type(ElementType),
    Replacement,
}

/// One position of a template triple.
#[derive(Clone, Debug)]
pub struct TemplateItem {
    pub(crate) value: ItemValue,
    pub(crate) name: Option<String>,
}

impl TemplateItem {
    /// Concrete element handle.
    pub fn addr(id: ElementId) -> Self {
        TemplateItem {
            value: ItemValue::Addr(id),
            name: None,
        }
    }

    /// Variable with a type mask.
    pub fn typed(t: ElementType) -> Self {
        TemplateItem {
            value: ItemValue::Type(t),
            name: None,
        }
    }

    /// Back-reference to a previously named item.
    pub fn replacement(name: impl Into<String>) -> Self {
        TemplateItem {
            value: ItemValue::Replacement,
            name: Some(name.into()),
        }
    }

    /// Attaches a replacement name to this item.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn is_fixed_addr(&self) -> bool {
        matches!(self.value, ItemValue::Addr(_))
    }
}

impl From<ElementId> for TemplateItem {
    fn from(id: ElementId) -> Self {
        TemplateItem::addr(id)
    }
}

impl From<ElementType> for TemplateItem {
    fn from(t: ElementType) -> Self {
        TemplateItem::typed(t)
    }
}

impl From<&str> for TemplateItem {
    fn from(name: &str) -> Self {
        TemplateItem::replacement(name)
    }
}

impl From<String> for TemplateItem {
    fn from(name: String) -> Self {
        TemplateItem::replacement(name)
    }
}

/// Ordered triple pattern with named variables.
pub struct Template {
    pub(crate) triples: Vec<[TemplateItem; 3]>,
    /// Replacement name to its first result position.
    pub(crate) replacements: FxHashMap<String, usize>,
    /// Every result position a name occurs at, in template order.
    pub(crate) name_positions: FxHashMap<String, Vec<usize>>,
    pub(crate) named_addrs: FxHashMap<String, ElementId>,
    pub(crate) named_types: FxHashMap<String, ElementType>,
    plan: Mutex<Option<Arc<StaticPlan>>>,
}

impl Default for Template {
    fn default() -> Self {
        Self::new()
    }
}

impl Template {
    /// Creates an empty template.
    pub fn new() -> Self {
        Template {
            triples: Vec::new(),
            replacements: FxHashMap::default(),
            name_positions: FxHashMap::default(),
            named_addrs: FxHashMap::default(),
            named_types: FxHashMap::default(),
            plan: Mutex::new(None),
        }
    }

    /// Appends one triple. Items can be handles, type masks or replacement
    /// names; see the item validation rules.
    pub fn triple(
        &mut self,
        source: impl Into<TemplateItem>,
        connector: impl Into<TemplateItem>,
        target: impl Into<TemplateItem>,
    ) -> Result<&mut Self> {
        let mut items = [source.into(), connector.into(), target.into()];

        if let Some(conn_name) = &items[1].name {
            for end in [&items[0], &items[2]] {
                if end.name.as_ref() == Some(conn_name) {
                    return Err(StoreError::InvalidParams(format!(
                        "connector item shares name `{conn_name}` with its endpoint"
                    )));
                }
            }
        }
        for item in &items {
            match &item.value {
                ItemValue::Addr(id) if id.is_empty() => {
                    return Err(StoreError::InvalidParams(
                        "template item references the empty handle".into(),
                    ));
                }
                ItemValue::Type(t) if t.constancy() == Some(Constancy::Const) => {
                    return Err(StoreError::InvalidParams(
                        "template type items must be variable, not constant".into(),
                    ));
                }
                _ => {}
            }
        }

        // A back-reference to a named concrete handle collapses to that
        // handle; its first occurrence position still resolves the value.
        for item in &mut items {
            if item.value == ItemValue::Replacement {
                if let Some(name) = &item.name {
                    if let Some(addr) = self.named_addrs.get(name) {
                        item.value = ItemValue::Addr(*addr);
                    }
                }
            }
        }

        let base = self.triples.len() * 3;
        for (i, item) in items.iter().enumerate() {
            if let Some(name) = &item.name {
                let pos = base + i;
                self.replacements.entry(name.clone()).or_insert(pos);
                self.name_positions.entry(name.clone()).or_default().push(pos);
                match &item.value {
                    ItemValue::Addr(id) => {
                        self.named_addrs.entry(name.clone()).or_insert(*id);
                    }
                    ItemValue::Type(t) => {
                        self.named_types.entry(name.clone()).or_insert(*t);
                    }
                    ItemValue::Replacement => {}
                }
            }
        }
        self.triples.push(items);
        *self.plan.lock() = None;
        Ok(self)
    }

    /// Appends a quintuple: the base triple plus an attribute triple whose
    /// target back-references the base connector. An unnamed base connector
    /// gets the generated name `_repl_<pos>`.
    pub fn quintuple(
        &mut self,
        source: impl Into<TemplateItem>,
        connector: impl Into<TemplateItem>,
        target: impl Into<TemplateItem>,
        attr_connector: impl Into<TemplateItem>,
        attr_source: impl Into<TemplateItem>,
    ) -> Result<&mut Self> {
        let mut connector = connector.into();
        let conn_name = match &connector.name {
            Some(name) => name.clone(),
            None => {
                let name = format!("_repl_{}", self.triples.len() * 3 + 1);
                connector.name = Some(name.clone());
                name
            }
        };
        self.triple(source, connector, target)?;
        self.triple(
            attr_source,
            attr_connector,
            TemplateItem::replacement(conn_name),
        )?;
        Ok(self)
    }

    /// Drops every triple and cached plan.
    pub fn clear(&mut self) {
        self.triples.clear();
        self.replacements.clear();
        self.name_positions.clear();
        self.named_addrs.clear();
        self.named_types.clear();
        *self.plan.lock() = None;
    }

    /// True when the template holds no triples.
    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Number of triples.
    pub fn size(&self) -> usize {
        self.triples.len()
    }

    /// True when `name` is bound to a result position.
    pub fn has_replacement(&self, name: &str) -> bool {
        self.replacements.contains_key(name)
    }

    pub(crate) fn plan(&self) -> Arc<StaticPlan> {
        let mut slot = self.plan.lock();
        match &*slot {
            Some(plan) => Arc::clone(plan),
            None => {
                let plan = Arc::new(StaticPlan::build(self));
                *slot = Some(Arc::clone(&plan));
                plan
            }
        }
    }

    /// Finds every binding of the template in `store`.
    pub fn search(&self, store: &Store) -> Result<SearchResult> {
        search::run(self, store, None, None)
    }

    /// Like [`Template::search`], restricted to rows fully contained in the
    /// structure `struct_id` (membership via constant positive permanent
    /// access arcs).
    pub fn search_in_struct(&self, store: &Store, struct_id: ElementId) -> Result<SearchResult> {
        search::run(self, store, Some(struct_id), None)
    }

    /// Streaming search; the callback decides per row whether to continue.
    /// Returns the number of rows delivered.
    pub fn search_with_callback(
        &self,
        store: &Store,
        mut callback: impl FnMut(&ResultRow<'_>) -> SearchFlow,
    ) -> Result<usize> {
        search::run(self, store, None, Some(&mut callback)).map(|r| r.len())
    }

    /// Instantiates the template, creating every unbound variable.
    pub fn generate(&self, store: &Store, params: &TemplateParams) -> Result<GenResult> {
        generate::run(self, store, params)
    }
}

/// Name bindings supplied to [`Template::generate`].
#[derive(Default, Clone, Debug)]
pub struct TemplateParams {
    pub(crate) map: FxHashMap<String, ElementId>,
}

impl TemplateParams {
    /// Empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to a concrete handle; a duplicate name is rejected.
    pub fn add(&mut self, name: impl Into<String>, id: ElementId) -> Result<&mut Self> {
        let name = name.into();
        if self.map.contains_key(&name) {
            return Err(StoreError::InvalidParams(format!(
                "parameter `{name}` bound twice"
            )));
        }
        self.map.insert(name, id);
        Ok(self)
    }

    /// Looks up a bound name.
    pub fn get(&self, name: &str) -> Option<ElementId> {
        self.map.get(name).copied()
    }
}

/// One matched row: a handle per template position plus the name map.
pub struct ResultRow<'a> {
    pub(crate) addrs: &'a [ElementId],
    pub(crate) replacements: &'a FxHashMap<String, usize>,
}

impl ResultRow<'_> {
    /// Handle bound at a template position.
    pub fn at(&self, pos: usize) -> Option<ElementId> {
        self.addrs.get(pos).copied()
    }

    /// Handle bound to a replacement name.
    pub fn get(&self, name: &str) -> Option<ElementId> {
        self.replacements
            .get(name)
            .and_then(|pos| self.addrs.get(*pos))
            .copied()
    }

    /// True when the row knows `name`.
    pub fn has(&self, name: &str) -> bool {
        self.replacements.contains_key(name)
    }

    /// Number of positions in the row.
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// True for a zero-width row.
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

impl std::ops::Index<usize> for ResultRow<'_> {
    type Output = ElementId;

    fn index(&self, pos: usize) -> &ElementId {
        &self.addrs[pos]
    }
}

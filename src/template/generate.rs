//! Template generation: instantiate a pattern, creating what is not bound.

use rustc_hash::FxHashMap;
use tracing::debug;

use super::{ItemValue, ResultRow, Template, TemplateParams};
use crate::storage::Store;
use crate::types::{Constancy, ElementId, ElementType, Kind, Result, StoreError};

/// The single row produced by a generation.
pub struct GenResult {
    addrs: Vec<ElementId>,
    replacements: FxHashMap<String, usize>,
}

impl GenResult {
    /// Number of template positions.
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// True for an empty template.
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// Handle at a template position.
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

    /// Row view over the generated handles.
    pub fn row(&self) -> ResultRow<'_> {
        ResultRow {
            addrs: &self.addrs,
            replacements: &self.replacements,
        }
    }
}

/// Concrete creation type: variable constancy flipped to constant, unset
/// constancy filled with constant.
fn concretize(t: ElementType) -> ElementType {
    let t = t.searchable();
    if t.constancy().is_none() {
        t.with_constancy(Constancy::Const)
    } else {
        t
    }
}

fn declared_type(template: &Template, item: &super::TemplateItem) -> Option<ElementType> {
    match &item.value {
        ItemValue::Type(t) => Some(*t),
        ItemValue::Replacement => item
            .name
            .as_ref()
            .and_then(|n| template.named_types.get(n))
            .copied(),
        ItemValue::Addr(_) => None,
    }
}

fn validate_params(template: &Template, store: &Store, params: &TemplateParams) -> Result<()> {
    for (name, id) in &params.map {
        let Some(positions) = template.name_positions.get(name) else {
            return Err(StoreError::InvalidParams(format!(
                "parameter `{name}` does not occur in the template"
            )));
        };
        if template.named_addrs.contains_key(name) {
            return Err(StoreError::InvalidParams(format!(
                "parameter `{name}` overrides a fixed template item"
            )));
        }
        if positions.iter().any(|pos| pos % 3 == 1) {
            return Err(StoreError::InvalidParams(format!(
                "parameter `{name}` addresses a connector position"
            )));
        }
        let concrete = store.element_type(*id)?;
        if let Some(declared) = template.named_types.get(name) {
            if !declared.searchable().subsumes(&concrete) {
                return Err(StoreError::InvalidParams(format!(
                    "parameter `{name}` does not satisfy the declared type"
                )));
            }
        }
    }
    Ok(())
}

struct Gen<'s> {
    template: &'s Template,
    store: &'s Store,
    params: &'s TemplateParams,
    addrs: Vec<ElementId>,
}

impl Gen<'_> {
    fn bound_by_name(&self, name: &str) -> Option<ElementId> {
        let positions = self.template.name_positions.get(name)?;
        positions
            .iter()
            .filter_map(|pos| self.addrs.get(*pos))
            .find(|id| id.is_valid())
            .copied()
    }

    /// Resolves or creates an endpoint item.
    fn endpoint(&self, triple: usize, slot: usize) -> Result<ElementId> {
        let item = &self.template.triples[triple][slot];
        if let ItemValue::Addr(id) = item.value {
            if !self.store.is_element(id) {
                return Err(StoreError::NotAnElement(id));
            }
            return Ok(id);
        }
        if let Some(name) = &item.name {
            if let Some(id) = self.bound_by_name(name) {
                return Ok(id);
            }
            if let Some(id) = self.params.get(name) {
                return Ok(id);
            }
        }
        let declared = declared_type(self.template, item).unwrap_or(ElementType::NODE_VAR);
        let t = concretize(declared);
        match t.kind() {
            None | Some(Kind::Node) => self.store.create_node(t.with_kind(Kind::Node)),
            Some(Kind::Link) => self.store.create_link(t),
            Some(_) => Err(StoreError::InvalidParams(
                "endpoint with a connector type must be bound before use".into(),
            )),
        }
    }

    /// Resolves or creates the connector of a triple with known endpoints.
    fn connector(&self, triple: usize, begin: ElementId, end: ElementId) -> Result<ElementId> {
        let item = &self.template.triples[triple][1];
        let existing = match &item.value {
            ItemValue::Addr(id) => Some(*id),
            _ => item.name.as_ref().and_then(|n| self.bound_by_name(n)),
        };
        if let Some(id) = existing {
            if self.store.arc_info(id)? != (begin, end) {
                return Err(StoreError::InvalidParams(
                    "bound connector does not join the triple's endpoints".into(),
                ));
            }
            return Ok(id);
        }
        let declared = declared_type(self.template, item).ok_or_else(|| {
            StoreError::InvalidParams("connector item carries no type to create from".into())
        })?;
        let t = concretize(declared);
        if !t.is_connector() {
            return Err(StoreError::InvalidParams(
                "connector item must carry a connector type".into(),
            ));
        }
        self.store.create_connector(t, begin, end)
    }
}

pub(crate) fn run(template: &Template, store: &Store, params: &TemplateParams) -> Result<GenResult> {
    validate_params(template, store, params)?;
    let mut gen = Gen {
        template,
        store,
        params,
        addrs: vec![ElementId::EMPTY; template.triples.len() * 3],
    };
    for i in 0..template.triples.len() {
        let begin = gen.endpoint(i, 0)?;
        let end = gen.endpoint(i, 2)?;
        let conn = gen.connector(i, begin, end)?;
        gen.addrs[i * 3] = begin;
        gen.addrs[i * 3 + 1] = conn;
        gen.addrs[i * 3 + 2] = end;
    }
    debug!(positions = gen.addrs.len(), "generated template instance");
    Ok(GenResult {
        addrs: gen.addrs,
        replacements: template.replacements.clone(),
    })
}

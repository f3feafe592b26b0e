#![allow(missing_docs)]

use semgraph::storage::{Store, StoreOptions};
use semgraph::template::{Template, TemplateItem, TemplateParams};
use semgraph::types::{ElementType, Result, StoreError};
use tempfile::tempdir;

fn open(dir: &tempfile::TempDir) -> Result<Store> {
    Store::open(StoreOptions::new(dir.path().join("repo")))
}

#[test]
fn generated_instances_are_searchable() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;
    let class = store.create_node(ElementType::NODE_CONST)?;

    let mut t = Template::new();
    t.triple(
        class,
        TemplateItem::typed(ElementType::EDGE_ACCESS_VAR_POS_PERM).named("e"),
        TemplateItem::typed(ElementType::NODE_VAR).named("member"),
    )?;

    let gen = t.generate(&store, &TemplateParams::new())?;
    let member = gen.get("member").unwrap();
    assert!(store.is_element(member));
    assert_eq!(
        store.element_type(gen.get("e").unwrap())?,
        ElementType::EDGE_ACCESS_CONST_POS_PERM,
        "variable connector generates as constant"
    );

    let found = t.search(&store)?;
    assert_eq!(found.len(), 1);
    assert_eq!(found.row(0).unwrap().get("member"), Some(member));
    Ok(())
}

#[test]
fn quintuple_generation_attributes_the_connector() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;
    let a = store.create_node(ElementType::NODE_CONST)?;
    let rel = store.create_node(ElementType::NODE_CONST)?;

    let mut t = Template::new();
    t.quintuple(
        a,
        TemplateItem::typed(ElementType::ARC_COMMON_VAR).named("edge"),
        TemplateItem::typed(ElementType::NODE_VAR).named("b"),
        ElementType::EDGE_ACCESS_VAR_POS_PERM,
        rel,
    )?;

    let gen = t.generate(&store, &TemplateParams::new())?;
    let edge = gen.get("edge").unwrap();
    let b = gen.get("b").unwrap();
    assert_eq!(store.arc_info(edge)?, (a, b));
    // The attribute arc targets the generated connector itself.
    let attr = gen.at(4).unwrap();
    assert_eq!(store.arc_info(attr)?, (rel, edge));
    Ok(())
}

#[test]
fn params_bind_variables_to_existing_elements() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;
    let class = store.create_node(ElementType::NODE_CONST)?;
    let member = store.create_node(ElementType::NODE_CONST)?;

    let mut t = Template::new();
    t.triple(
        class,
        ElementType::EDGE_ACCESS_VAR_POS_PERM,
        TemplateItem::typed(ElementType::NODE_VAR).named("member"),
    )?;

    let mut params = TemplateParams::new();
    params.add("member", member)?;
    let gen = t.generate(&store, &params)?;
    assert_eq!(gen.get("member"), Some(member), "no fresh node was created");
    assert_eq!(store.arc_end(gen.at(1).unwrap())?, member);
    Ok(())
}

#[test]
fn bound_connector_must_join_the_endpoints() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir)?;
    let a = store.create_node(ElementType::NODE_CONST)?;
    let b = store.create_node(ElementType::NODE_CONST)?;
    let c = store.create_node(ElementType::NODE_CONST)?;
    let wrong = store.create_connector(ElementType::EDGE_ACCESS_CONST_POS_PERM, a, c)?;

    let mut t = Template::new();
    t.triple(a, wrong, b)?;
    assert!(matches!(
        t.generate(&store, &TemplateParams::new()),
        Err(StoreError::InvalidParams(_))
    ));
    Ok(())
}

#[test]
fn duplicate_parameter_names_are_rejected() {
    let mut params = TemplateParams::new();
    params
        .add("x", semgraph::types::ElementId(37))
        .unwrap();
    assert!(matches!(
        params.add("x", semgraph::types::ElementId(73)),
        Err(StoreError::InvalidParams(_))
    ));
}

#![allow(missing_docs)]

use semgraph::storage::{Store, StoreOptions};
use semgraph::types::{ElementType, Result};
use tempfile::tempdir;

fn open(path: &std::path::Path) -> Result<Store> {
    Store::open(StoreOptions::new(path))
}

#[test]
fn exact_search_groups_links_by_content() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir.path().join("repo"))?;

    let l1 = store.create_link(ElementType::LINK_CONST)?;
    let l2 = store.create_link(ElementType::LINK_CONST)?;
    let l3 = store.create_link(ElementType::LINK_CONST)?;
    store.set_link_content(l1, b"concept_animal")?;
    store.set_link_content(l2, b"concept_animal")?;
    store.set_link_content(l3, b"concept_plant")?;

    let mut hits = store.find_links_by_content(b"concept_animal");
    hits.sort();
    assert_eq!(hits, vec![l1, l2]);
    assert!(store.find_links_by_content(b"missing").is_empty());
    Ok(())
}

#[test]
fn overwriting_moves_the_link() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir.path().join("repo"))?;

    let link = store.create_link(ElementType::LINK_CONST)?;
    store.set_link_content(link, b"before")?;
    store.set_link_content(link, b"after")?;
    assert!(store.find_links_by_content(b"before").is_empty());
    assert_eq!(store.find_links_by_content(b"after"), vec![link]);
    assert_eq!(store.link_content(link)?, b"after");
    Ok(())
}

#[test]
fn substring_threshold_switches_prefix_walk_to_full_scan() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir.path().join("repo"))?;

    let l1 = store.create_link(ElementType::LINK_CONST)?;
    let l2 = store.create_link(ElementType::LINK_CONST)?;
    store.set_link_content(l1, b"weather_station")?;
    store.set_link_content(l2, b"station_report")?;

    // At or below the threshold the pattern is a prefix query.
    let hits = store.find_links_by_substring(b"station", 7);
    assert_eq!(hits, vec![l2], "prefix walk matches only content heads");

    // Above the threshold the same pattern matches anywhere.
    let mut hits = store.find_links_by_substring(b"station", 3);
    hits.sort();
    assert_eq!(hits, vec![l1, l2]);

    let mut contents = store.find_contents_by_substring(b"station", 3);
    contents.sort();
    assert_eq!(
        contents,
        vec![b"station_report".to_vec(), b"weather_station".to_vec()]
    );
    Ok(())
}

#[test]
fn freed_links_leave_the_dictionaries() -> Result<()> {
    let dir = tempdir()?;
    let store = open(&dir.path().join("repo"))?;

    let link = store.create_link(ElementType::LINK_CONST)?;
    store.set_link_content(link, b"ephemeral")?;
    store.free_element(link)?;
    assert!(store.find_links_by_content(b"ephemeral").is_empty());
    Ok(())
}

#[test]
fn dictionaries_persist_across_reopen() -> Result<()> {
    let dir = tempdir()?;
    let repo = dir.path().join("repo");
    let (shared_a, shared_b, solo) = {
        let store = open(&repo)?;
        let a = store.create_link(ElementType::LINK_CONST)?;
        let b = store.create_link(ElementType::LINK_CONST)?;
        let c = store.create_link(ElementType::LINK_CONST)?;
        store.set_link_content(a, b"shared")?;
        store.set_link_content(b, b"shared")?;
        store.set_link_content(c, b"solo")?;
        store.save()?;
        (a, b, c)
    };

    let store = open(&repo)?;
    let mut hits = store.find_links_by_content(b"shared");
    hits.sort();
    assert_eq!(hits, vec![shared_a, shared_b]);
    assert_eq!(store.link_content(solo)?, b"solo");
    Ok(())
}

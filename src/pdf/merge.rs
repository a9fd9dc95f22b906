//! Page-level concatenation of whole PDF documents with `lopdf`.
//!
//! Every input is renumbered into a disjoint object-id range, its page
//! objects are re-parented under one new page tree, and the old catalogs and
//! page-tree nodes are dropped. Attributes a page inherits from its old
//! parents (`Resources`, `MediaBox`, `CropBox`, `Rotate`) are copied onto the
//! page first so nothing is lost with the old tree.

use lopdf::{dictionary, Document, Object, ObjectId};
use std::collections::BTreeSet;
use thiserror::Error;

const INHERITABLE: &[&[u8]] = &[b"Resources", b"MediaBox", b"CropBox", b"Rotate"];
const MAX_TREE_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("nothing to merge")]
    NoInput,

    #[error("document {index} could not be parsed: {source}")]
    Parse {
        index: usize,
        #[source]
        source: lopdf::Error,
    },

    #[error("no pages found in any input document")]
    NoPages,

    #[error("failed to serialise merged document: {0}")]
    Save(String),
}

/// Concatenate `inputs` in order; pages keep their order within each input.
pub fn merge_documents(inputs: &[&[u8]]) -> Result<Vec<u8>, MergeError> {
    if inputs.is_empty() {
        return Err(MergeError::NoInput);
    }

    let mut merged = Document::with_version("1.5");
    let mut next_id: u32 = 1;
    let mut page_ids: Vec<ObjectId> = Vec::new();

    for (index, bytes) in inputs.iter().enumerate() {
        let mut doc =
            Document::load_mem(bytes).map_err(|source| MergeError::Parse { index, source })?;
        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;

        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        for &page_id in &pages {
            flatten_inherited(&mut doc, page_id);
        }

        let mut dropped: BTreeSet<ObjectId> = doc
            .objects
            .iter()
            .filter(|(_, obj)| is_dict_of_type(obj, b"Pages"))
            .map(|(id, _)| *id)
            .collect();
        if let Ok(root) = doc.trailer.get(b"Root").and_then(Object::as_reference) {
            dropped.insert(root);
        }

        for (id, obj) in doc.objects {
            if !dropped.contains(&id) {
                merged.objects.insert(id, obj);
            }
        }
        page_ids.extend(pages);
    }

    if page_ids.is_empty() {
        return Err(MergeError::NoPages);
    }

    let pages_id: ObjectId = (next_id, 0);
    let catalog_id: ObjectId = (next_id + 1, 0);

    for id in &page_ids {
        if let Some(Object::Dictionary(dict)) = merged.objects.get_mut(id) {
            dict.set("Parent", Object::Reference(pages_id));
        }
    }

    let kids: Vec<Object> = page_ids.iter().map(|id| Object::Reference(*id)).collect();
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_ids.len() as i64,
        }),
    );
    merged.objects.insert(
        catalog_id,
        Object::Dictionary(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        }),
    );
    merged.trailer.set("Root", catalog_id);
    merged.max_id = catalog_id.0;

    let mut out = Vec::new();
    merged
        .save_to(&mut out)
        .map_err(|e| MergeError::Save(e.to_string()))?;
    Ok(out)
}

fn is_dict_of_type(obj: &Object, ty: &[u8]) -> bool {
    obj.as_dict()
        .ok()
        .and_then(|d| d.get(b"Type").ok())
        .and_then(|t| t.as_name().ok())
        .is_some_and(|name| name == ty)
}

/// Copy inheritable attributes from the parent chain onto the page itself.
fn flatten_inherited(doc: &mut Document, page_id: ObjectId) {
    let Ok(page) = doc.get_dictionary(page_id) else {
        return;
    };
    let mut missing: Vec<&[u8]> = INHERITABLE
        .iter()
        .copied()
        .filter(|key| !page.has(key))
        .collect();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut inherited: Vec<(Vec<u8>, Object)> = Vec::new();

    let mut depth = 0;
    while let Some(parent_id) = parent {
        if missing.is_empty() || depth >= MAX_TREE_DEPTH {
            break;
        }
        let Ok(node) = doc.get_dictionary(parent_id) else {
            break;
        };
        missing.retain(|key| match node.get(key) {
            Ok(value) => {
                inherited.push((key.to_vec(), value.clone()));
                false
            }
            Err(_) => true,
        });
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        depth += 1;
    }

    if inherited.is_empty() {
        return;
    }
    if let Some(Object::Dictionary(page)) = doc.objects.get_mut(&page_id) {
        for (key, value) in inherited {
            page.set(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::writer::{Font, Page, PdfDocument};

    fn doc_with_pages(labels: &[&str]) -> Vec<u8> {
        let mut doc = PdfDocument::new(612.0, 792.0);
        for label in labels {
            let mut page = Page::new();
            page.text(Font::Courier, 12.0, 72.0, 700.0, label);
            doc.add_page(page);
        }
        doc.to_bytes().expect("writer output")
    }

    fn page_texts(bytes: &[u8]) -> Vec<String> {
        let doc = Document::load_mem(bytes).expect("merged output parses");
        doc.get_pages()
            .into_values()
            .map(|id| String::from_utf8_lossy(&doc.get_page_content(id).unwrap()).into_owned())
            .collect()
    }

    #[test]
    fn preserves_document_and_page_order() {
        let a = doc_with_pages(&["A1", "A2"]);
        let b = doc_with_pages(&["B1"]);
        let c = doc_with_pages(&["C1"]);

        let merged = merge_documents(&[&a, &b, &c]).unwrap();
        assert!(merged.starts_with(b"%PDF-"));

        let texts = page_texts(&merged);
        assert_eq!(texts.len(), 4);
        for (text, label) in texts.iter().zip(["A1", "A2", "B1", "C1"]) {
            assert!(text.contains(&format!("({label})")), "{text} vs {label}");
        }
    }

    #[test]
    fn inherited_resources_survive() {
        // The writer puts MediaBox on the page tree, not on pages.
        let a = doc_with_pages(&["A"]);
        let merged = merge_documents(&[&a, &a]).unwrap();
        let doc = Document::load_mem(&merged).unwrap();
        for id in doc.get_pages().into_values() {
            let page = doc.get_dictionary(id).unwrap();
            assert!(page.has(b"MediaBox"));
            assert!(page.has(b"Resources"));
        }
    }

    #[test]
    fn garbage_input_is_a_parse_error() {
        let a = doc_with_pages(&["A"]);
        let err = merge_documents(&[&a, b"not a pdf"]).unwrap_err();
        assert!(matches!(err, MergeError::Parse { index: 1, .. }));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(merge_documents(&[]), Err(MergeError::NoInput)));
    }
}

//! Deterministic PDF concatenation.
//!
//! Assembly order is a documented external contract: optional banner page,
//! then the body section, then attachment fragments in their original
//! encounter order. Downstream tooling may rely on "page 1 is the source
//! identity, the next N pages are the message", so the merge must be stable
//! across runs on identical input.
//!
//! Every section arriving here has already been validated by the planner; a
//! section that fails to load is an internal invariant violation, reported
//! as `AssemblyFailed` rather than downgraded.

use std::collections::BTreeMap;

use lopdf::{dictionary, Document, Object, ObjectId};

use crate::error::{ConvertError, Result};

/// The merged document and its page count.
#[derive(Debug)]
pub struct AssembledPdf {
    pub bytes: Vec<u8>,
    pub pages: usize,
}

/// Merge PDF sections, in the order given, into one document.
///
/// Object ids of each section are renumbered into a common space; the old
/// per-section catalogs and page trees are dropped and a single fresh page
/// tree references every page in order.
pub fn assemble(sections: &[Vec<u8>]) -> Result<AssembledPdf> {
    if sections.is_empty() {
        return Err(assembly_error("no sections to assemble"));
    }

    let mut max_id = 1u32;
    let mut page_order: Vec<ObjectId> = Vec::new();
    let mut page_dicts: BTreeMap<ObjectId, lopdf::Dictionary> = BTreeMap::new();
    let mut merged = Document::with_version("1.5");

    for (section_index, bytes) in sections.iter().enumerate() {
        let mut doc = Document::load_mem(bytes).map_err(|e| {
            assembly_error(format!("section {section_index} is not well-formed PDF: {e}"))
        })?;

        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        // get_pages is keyed by page number, so iteration preserves the
        // section's own page order.
        for (_number, page_id) in doc.get_pages() {
            page_order.push(page_id);
        }

        for (object_id, object) in std::mem::take(&mut doc.objects) {
            let type_name: &[u8] = match object.as_dict().ok().and_then(|d| d.get(b"Type").ok()) {
                Some(Object::Name(name)) => name,
                _ => b"",
            };
            match type_name {
                // Replaced by the fresh page tree below.
                b"Catalog" | b"Pages" | b"Outlines" | b"Outline" => {}
                b"Page" => {
                    let dict = object.as_dict().map_err(|e| {
                        assembly_error(format!("page object is not a dictionary: {e}"))
                    })?;
                    page_dicts.insert(object_id, dict.clone());
                }
                _ => {
                    merged.objects.insert(object_id, object);
                }
            }
        }
    }

    if page_order.is_empty() {
        return Err(assembly_error("merged document would have no pages"));
    }

    let pages_id: ObjectId = (max_id, 0);
    max_id += 1;
    let catalog_id: ObjectId = (max_id, 0);
    max_id += 1;

    for (object_id, mut dict) in page_dicts {
        dict.set("Parent", Object::Reference(pages_id));
        merged.objects.insert(object_id, Object::Dictionary(dict));
    }

    let kids: Vec<Object> = page_order.iter().map(|id| Object::Reference(*id)).collect();
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => page_order.len() as i64,
            "Kids" => kids,
        }),
    );
    merged.objects.insert(
        catalog_id,
        Object::Dictionary(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        }),
    );

    merged.trailer.set("Root", catalog_id);
    merged.max_id = max_id;
    merged.renumber_objects();
    merged.compress();

    let pages = page_order.len();
    let mut bytes = Vec::new();
    merged
        .save_to(&mut bytes)
        .map_err(|e| assembly_error(format!("failed to serialize merged PDF: {e}")))?;

    Ok(AssembledPdf { bytes, pages })
}

fn assembly_error(reason: impl Into<String>) -> ConvertError {
    ConvertError::AssemblyFailed {
        reason: reason.into(),
    }
}

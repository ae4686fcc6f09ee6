//! Document matching and mutation helpers
//!
//! Filters match by top-level field equality; updates merge top-level
//! fields. The full query language of a production document store is out of
//! scope here.

use crate::{FindAndModifyOptions, FindOptions};
use serde_json::Value;
use std::cmp::Ordering;
use txngate_common::{Document, Filter};

/// Top-level equality match.
pub fn matches(doc: &Document, filter: &Filter) -> bool {
    filter
        .iter()
        .all(|(key, expected)| doc.get(key) == Some(expected))
}

/// Merge `update`'s top-level fields into `doc`.
pub fn apply_update(doc: &mut Document, update: &Document) {
    for (key, value) in update {
        doc.insert(key.clone(), value.clone());
    }
}

pub fn do_insert(data: &mut Vec<Document>, docs: Vec<Document>) {
    data.extend(docs);
}

pub fn do_update(data: &mut [Document], filter: &Filter, update: &Document) -> u64 {
    let mut updated = 0;
    for doc in data.iter_mut() {
        if matches(doc, filter) {
            apply_update(doc, update);
            updated += 1;
        }
    }
    updated
}

pub fn do_delete(data: &mut Vec<Document>, filter: &Filter) -> u64 {
    let before = data.len();
    data.retain(|doc| !matches(doc, filter));
    (before - data.len()) as u64
}

pub fn do_count(data: &[Document], filter: &Filter) -> u64 {
    data.iter().filter(|doc| matches(doc, filter)).count() as u64
}

pub fn do_find(data: &[Document], filter: &Filter, opts: &FindOptions) -> Vec<Document> {
    let mut found: Vec<Document> = data
        .iter()
        .filter(|doc| matches(doc, filter))
        .cloned()
        .collect();

    for (field, descending) in opts.sort.iter().rev() {
        found.sort_by(|a, b| {
            let order = cmp_values(a.get(field), b.get(field));
            if *descending {
                order.reverse()
            } else {
                order
            }
        });
    }

    let start = opts.start.min(found.len() as u64) as usize;
    let mut found = found.split_off(start);
    if opts.limit > 0 && found.len() as u64 > opts.limit {
        found.truncate(opts.limit as usize);
    }

    if !opts.fields.is_empty() {
        for doc in &mut found {
            doc.retain(|key, _| opts.fields.iter().any(|field| field == key));
        }
    }
    found
}

pub fn do_find_and_modify(
    data: &mut Vec<Document>,
    filter: &Filter,
    update: &Document,
    opts: &FindAndModifyOptions,
) -> Option<Document> {
    let position = data.iter().position(|doc| matches(doc, filter));
    match position {
        Some(index) => {
            if opts.remove {
                return Some(data.remove(index));
            }
            let old = data[index].clone();
            apply_update(&mut data[index], update);
            Some(if opts.return_new {
                data[index].clone()
            } else {
                old
            })
        }
        None if opts.upsert && !opts.remove => {
            // upserted doc: equality fields from the filter plus the update
            let mut doc = filter.clone();
            apply_update(&mut doc, update);
            data.push(doc.clone());
            opts.return_new.then_some(doc)
        }
        None => None,
    }
}

fn cmp_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Number(x), Value::Number(y)) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}

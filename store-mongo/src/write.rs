//! Translates a neutral `WriteDescriptor` into native Mongo update
//! operators, and into the literal document a batch `insertMany` needs
//! (which has no operator support, so `$setOnInsert`/`$currentDate` are
//! flattened to plain values there — see `adapter::insert_many`).

use bson::{doc, Bson, Document as BsonDoc};
use chrono::{DateTime, Utc};
use store_core::enrich::WriteDescriptor;

use crate::query::json_to_bson;

/// Build the `$set`/`$setOnInsert`/`$inc`/`$unset`/`$push`/`$currentDate`
/// update document for `updateOne`/`updateMany`/the single-create upsert.
pub fn translate_update(descriptor: &WriteDescriptor) -> BsonDoc {
    let mut update = BsonDoc::new();

    if !descriptor.set.is_empty() {
        let mut set = BsonDoc::new();
        for (k, v) in &descriptor.set {
            set.insert(k.clone(), json_to_bson(v));
        }
        update.insert("$set", set);
    }

    if !descriptor.set_on_insert.is_empty() {
        let mut set_on_insert = BsonDoc::new();
        for (k, v) in &descriptor.set_on_insert {
            set_on_insert.insert(k.clone(), json_to_bson(v));
        }
        update.insert("$setOnInsert", set_on_insert);
    }

    if !descriptor.inc.is_empty() {
        let mut inc = BsonDoc::new();
        for (k, v) in &descriptor.inc {
            inc.insert(k.clone(), *v);
        }
        update.insert("$inc", inc);
    }

    if !descriptor.unset.is_empty() {
        let mut unset = BsonDoc::new();
        for k in &descriptor.unset {
            unset.insert(k.clone(), "");
        }
        update.insert("$unset", unset);
    }

    if !descriptor.push.is_empty() {
        let mut push = BsonDoc::new();
        for op in &descriptor.push {
            let entry = match op.keep_last_n {
                Some(n) => doc! {
                    "$each": [json_to_bson(&op.value)],
                    "$slice": -(n as i64),
                },
                None => doc! { "$each": [json_to_bson(&op.value)] },
            };
            push.insert(op.field.clone(), entry);
        }
        update.insert("$push", push);
    }

    if !descriptor.current_date.is_empty() {
        let mut current_date = BsonDoc::new();
        for field in &descriptor.current_date {
            current_date.insert(field.clone(), true);
        }
        update.insert("$currentDate", current_date);
    }

    update
}

/// Flatten a create descriptor into a literal document for batch
/// `insertMany`, which accepts no update operators. `set` and
/// `set_on_insert` are equivalent on a fresh document, so both land
/// directly on the document; `current_date` fields are stamped with `now`
/// since there is no server-side `$currentDate` equivalent for a literal
/// insert.
pub fn flatten_for_insert(descriptor: &WriteDescriptor, now: DateTime<Utc>) -> BsonDoc {
    let mut out = BsonDoc::new();
    for (k, v) in &descriptor.set {
        out.insert(k.clone(), json_to_bson(v));
    }
    for (k, v) in &descriptor.set_on_insert {
        out.insert(k.clone(), json_to_bson(v));
    }
    for (k, v) in &descriptor.inc {
        out.insert(k.clone(), *v);
    }
    for field in &descriptor.current_date {
        out.insert(field.clone(), Bson::from(now));
    }
    for op in &descriptor.push {
        let mut values = vec![json_to_bson(&op.value)];
        if let Some(n) = op.keep_last_n {
            values.truncate(n);
        }
        out.insert(op.field.clone(), values);
    }
    out
}

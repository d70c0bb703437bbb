//! Eager loading of relationship fields
//!
//! Requested relations are fetched in the same statement as the root rows:
//! belongs-to relations join the target table on the foreign key, and
//! many-to-many relations join the association table and then the target.
//! The joined rows are folded back into one result per root row.

use std::collections::{BTreeMap, HashSet};
use std::ops::Deref;

use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection};

use crate::filter::Predicate;
use crate::schema::ddl::quote;
use crate::schema::{Entity, EntityDef, RelationKind, Schema};
use crate::value::Record;
use crate::Result;

/// A root row plus its loaded relations, before typing
#[derive(Debug)]
pub(crate) struct LoadedRow {
    record: Record,
    relations: BTreeMap<String, Vec<Record>>,
}

/// An entity together with the relations requested for it.
///
/// Relations that were requested but have no rows map to an empty list.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<E> {
    pub entity: E,
    relations: BTreeMap<String, Vec<Record>>,
}

impl<E: Entity> Loaded<E> {
    pub(crate) fn from_row(row: LoadedRow) -> Result<Self> {
        Ok(Self {
            entity: E::from_record(&row.record)?,
            relations: row.relations,
        })
    }
}

impl<E> Loaded<E> {
    /// Related rows for `relation`; empty when none or not requested
    pub fn related(&self, relation: &str) -> &[Record] {
        self.relations.get(relation).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn related_as<T: Entity>(&self, relation: &str) -> Result<Vec<T>> {
        self.related(relation).iter().map(T::from_record).collect()
    }

    /// Names of the relations that were loaded
    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    pub fn into_inner(self) -> E {
        self.entity
    }
}

impl<E> Deref for Loaded<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.entity
    }
}

struct Join {
    relation: &'static str,
    target: &'static EntityDef,
}

/// Load rows of `def` matching `predicate` with `relations` populated
pub(crate) fn load(
    conn: &Connection,
    schema: &Schema,
    def: &EntityDef,
    predicate: &Predicate,
    relations: &[&str],
) -> Result<Vec<LoadedRow>> {
    let mut joins: Vec<Join> = Vec::new();
    let mut select = vec![def.select_list("t0")];
    let mut from = format!("{} AS t0", quote(def.table));
    let mut order = vec![format!("t0.{}", quote("id"))];

    for name in relations {
        let relation = def.relation(name)?;
        if joins.iter().any(|j| j.relation == relation.name) {
            continue;
        }
        let target = schema.entity(relation.target)?;
        let alias = format!("r{}", joins.len());

        match relation.kind {
            RelationKind::BelongsTo { column } => {
                from.push_str(&format!(
                    " LEFT JOIN {} AS {} ON {}.{} = t0.{}",
                    quote(target.table),
                    alias,
                    alias,
                    quote("id"),
                    quote(column)
                ));
            }
            RelationKind::Through { table } => {
                let (local, remote) = schema.edge_sides(def, relation, table)?;
                let edge = format!("e{}", joins.len());
                from.push_str(&format!(
                    " LEFT JOIN {} AS {} ON {}.{} = t0.{}",
                    quote(table.def().table),
                    edge,
                    edge,
                    quote(local.name),
                    quote("id")
                ));
                from.push_str(&format!(
                    " LEFT JOIN {} AS {} ON {}.{} = {}.{}",
                    quote(target.table),
                    alias,
                    alias,
                    quote("id"),
                    edge,
                    quote(remote.name)
                ));
            }
        }

        select.push(target.select_list(&alias));
        order.push(format!("{}.{}", alias, quote("id")));
        joins.push(Join {
            relation: relation.name,
            target,
        });
    }

    let (clause, params) = predicate.to_sql(Some("t0"));
    let sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {}",
        select.join(", "),
        from,
        clause,
        order.join(", ")
    );
    tracing::trace!("Eager load: {}", sql);

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params.iter()))?;

    let mut loaded: Vec<LoadedRow> = Vec::new();
    let mut last_root: Option<i64> = None;
    // (join index, related id) pairs already attached to the current root
    let mut seen: HashSet<(usize, i64)> = HashSet::new();

    while let Some(row) = rows.next()? {
        let root_id: i64 = row.get(0)?;
        if last_root != Some(root_id) {
            last_root = Some(root_id);
            seen.clear();
            loaded.push(LoadedRow {
                record: def.decode_row(row, 0)?,
                relations: joins
                    .iter()
                    .map(|j| (j.relation.to_string(), Vec::new()))
                    .collect(),
            });
        }
        let Some(current) = loaded.last_mut() else {
            continue;
        };

        let mut offset = def.columns.len();
        for (idx, join) in joins.iter().enumerate() {
            // A NULL id means the outer join found nothing
            if let ValueRef::Integer(related_id) = row.get_ref(offset)? {
                if seen.insert((idx, related_id)) {
                    let related = join.target.decode_row(row, offset)?;
                    if let Some(list) = current.relations.get_mut(join.relation) {
                        list.push(related);
                    }
                }
            }
            offset += join.target.columns.len();
        }
    }

    Ok(loaded)
}

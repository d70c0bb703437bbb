//! Association Mutator - edge insertion and bulk remapping
//!
//! Edges are written through SQL rather than through loaded relation
//! collections, so maintaining them never reads the related rows.

use rusqlite::{params, Connection};
use serde::Serialize;

use super::session::UnitOfWork;
use crate::schema::ddl::quote;
use crate::schema::EdgeTableDef;
use crate::{AssociationTable, Error, Result};

/// Result of [`UnitOfWork::remap_edges`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemapOutcome {
    /// Edges moved from the old id to the new one
    pub rewritten: usize,
    /// Edges dropped because the new id already had the same link
    pub collapsed: usize,
}

/// One stored edge, in `(left, right)` column order of its table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EdgeRow {
    pub id: i64,
    pub left: i64,
    pub right: i64,
}

fn pair_from_columns(def: &EdgeTableDef, columns: &[(&str, i64)]) -> Result<(i64, i64)> {
    let mut left = None;
    let mut right = None;
    for (name, id) in columns {
        let column = def.column(name)?;
        let slot = if column.name == def.left.name { &mut left } else { &mut right };
        if slot.replace(*id).is_some() {
            return Err(Error::InvalidArgument(format!("{} given twice", column.name)));
        }
    }
    match (left, right) {
        (Some(l), Some(r)) => Ok((l, r)),
        _ => Err(Error::InvalidArgument(format!(
            "an edge in {} needs both {} and {}",
            def.table, def.left.name, def.right.name
        ))),
    }
}

fn insert_pair(conn: &Connection, def: &EdgeTableDef, left: i64, right: i64) -> Result<bool> {
    let (t, l, r) = (quote(def.table), quote(def.left.name), quote(def.right.name));
    let sql = format!(
        "INSERT INTO {t} ({l}, {r}) SELECT ?1, ?2 \
         WHERE NOT EXISTS (SELECT 1 FROM {t} WHERE {l} = ?1 AND {r} = ?2) \
         ON CONFLICT DO NOTHING"
    );
    let inserted = conn.execute(&sql, params![left, right])?;
    Ok(inserted > 0)
}

fn remap(conn: &Connection, def: &EdgeTableDef, column: &str, from: i64, to: i64) -> Result<RemapOutcome> {
    let target = def.column(column)?;
    let other = def.other(column)?;
    let (t, c, o) = (quote(def.table), quote(target.name), quote(other.name));

    // Drop links the new id already has before rewriting the rest
    let collapsed = conn.execute(
        &format!(
            "DELETE FROM {t} WHERE {c} = ?1 AND EXISTS \
             (SELECT 1 FROM {t} AS dup WHERE dup.{c} = ?2 AND dup.{o} = {t}.{o})"
        ),
        params![from, to],
    )?;
    let rewritten = conn.execute(&format!("UPDATE {t} SET {c} = ?2 WHERE {c} = ?1"), params![from, to])?;

    Ok(RemapOutcome { rewritten, collapsed })
}

fn select_edges(conn: &Connection, def: &EdgeTableDef, filter: Option<(&str, i64)>) -> Result<Vec<EdgeRow>> {
    let (t, l, r) = (quote(def.table), quote(def.left.name), quote(def.right.name));
    let mut sql = format!("SELECT {}, {l}, {r} FROM {t}", quote("id"));
    let mut bound = Vec::new();
    if let Some((column, id)) = filter {
        sql.push_str(&format!(" WHERE {} = ?1", quote(def.column(column)?.name)));
        bound.push(id);
    }
    sql.push_str(&format!(" ORDER BY {}", quote("id")));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(bound.iter()), |row| {
        Ok(EdgeRow {
            id: row.get(0)?,
            left: row.get(1)?,
            right: row.get(2)?,
        })
    })?;
    let edges = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(edges)
}

impl UnitOfWork {
    // ========== Edge Operations ==========

    /// Insert an edge unless the same pair is already linked.
    ///
    /// `columns` names both sides of the edge, e.g.
    /// `[("user_id", 7), ("project_id", 3)]`. Returns whether a row was
    /// written. Idempotent on every association table, including those
    /// without a unique constraint on the pair.
    pub fn insert_edge_if_absent(&mut self, table: AssociationTable, columns: &[(&str, i64)]) -> Result<bool> {
        let def = table.def();
        let inserted = self.run("insert edge", |conn, _| {
            let (left, right) = pair_from_columns(def, columns)?;
            insert_pair(conn, def, left, right)
        })?;
        if inserted {
            tracing::debug!("Linked {} {:?}", def.table, columns);
        }
        Ok(inserted)
    }

    /// Positional form of [`insert_edge_if_absent`](Self::insert_edge_if_absent)
    pub fn link(&mut self, table: AssociationTable, left: i64, right: i64) -> Result<bool> {
        let def = table.def();
        self.run("insert edge", |conn, _| insert_pair(conn, def, left, right))
    }

    /// Point every edge whose `column` equals `from` at `to` instead.
    ///
    /// Used when two entities are merged. Edges that would duplicate a link
    /// `to` already has are removed rather than rewritten. Remapping an id
    /// onto itself changes nothing.
    pub fn remap_edges(
        &mut self,
        table: AssociationTable,
        column: &str,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<RemapOutcome> {
        let def = table.def();
        let outcome = self.run("remap edges", |conn, _| {
            let (Some(from), Some(to)) = (from, to) else {
                return Err(Error::InvalidArgument(
                    "remapping edges needs both a source and a target id".to_string(),
                ));
            };
            if from == to {
                def.column(column)?;
                return Ok(RemapOutcome::default());
            }
            remap(conn, def, column, from, to)
        })?;
        tracing::info!(
            "Remapped {}.{}: {} rewritten, {} collapsed",
            def.table,
            column,
            outcome.rewritten,
            outcome.collapsed
        );
        Ok(outcome)
    }

    /// Edges whose `column` equals `id`
    pub fn edges(&mut self, table: AssociationTable, column: &str, id: i64) -> Result<Vec<EdgeRow>> {
        let def = table.def();
        self.run("read edges", |conn, _| select_edges(conn, def, Some((column, id))))
    }

    pub fn all_edges(&mut self, table: AssociationTable) -> Result<Vec<EdgeRow>> {
        let def = table.def();
        self.run("read edges", |conn, _| select_edges(conn, def, None))
    }

    pub fn count_edges(&mut self, table: AssociationTable) -> Result<usize> {
        let def = table.def();
        self.run("count edges", |conn, _| {
            let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", quote(def.table)), [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }
}

//! Schema Model - typed entities and their static descriptors
//!
//! Each entity is declared once with [`entity!`]; the declaration produces the
//! Rust struct and an immutable [`EntityDef`] describing its table. The
//! [`Schema`] registry is built from those descriptors once at startup and is
//! the only place field names are resolved.

use std::collections::BTreeMap;

use rusqlite::Row;

use crate::value::{decode_error, Record, Value};
use crate::{Error, Result};

pub mod association;
pub mod column;
pub mod ddl;
pub mod enums;
pub mod mapped;

pub use association::{AssociationTable, EdgeColumn, EdgeTableDef};
pub use column::{ColumnDef, Field, SqlType};
pub use mapped::{MappedTable, MAPPED_FIELDS};

/// How a relationship field reaches its target rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Foreign-key column on this entity's own row
    BelongsTo { column: &'static str },
    /// Rows linked through an association table
    Through { table: AssociationTable },
}

/// A named relationship field, e.g. `Project.users`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationDef {
    pub name: &'static str,
    /// Target table
    pub target: &'static str,
    pub kind: RelationKind,
}

impl RelationDef {
    pub const fn belongs_to(name: &'static str, column: &'static str, target: &'static str) -> Self {
        Self {
            name,
            target,
            kind: RelationKind::BelongsTo { column },
        }
    }

    pub const fn through(name: &'static str, table: AssociationTable, target: &'static str) -> Self {
        Self {
            name,
            target,
            kind: RelationKind::Through { table },
        }
    }
}

/// Static description of an entity's table
#[derive(Debug, PartialEq, Eq)]
pub struct EntityDef {
    /// Rust type name
    pub name: &'static str,
    pub table: &'static str,
    /// Historical snapshots are never mutated after creation
    pub immutable: bool,
    /// `id` first, then data columns in declaration order
    pub columns: &'static [ColumnDef],
    pub relations: &'static [RelationDef],
}

impl EntityDef {
    /// Resolve a field name against the declared columns
    pub fn column(&self, name: &str) -> Result<&'static ColumnDef> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::unknown_attribute(self.name, name))
    }

    /// Resolve a relationship field name
    pub fn relation(&self, name: &str) -> Result<&'static RelationDef> {
        self.relations
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::unknown_attribute(self.name, name))
    }

    /// Every column except the primary key
    pub fn data_columns(&self) -> impl Iterator<Item = &'static ColumnDef> {
        self.columns.iter().filter(|c| !c.primary_key)
    }

    /// `"id", "name", ...`
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| ddl::quote(c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `alias."id", alias."name", ...`
    pub fn select_list(&self, alias: &str) -> String {
        self.columns
            .iter()
            .map(|c| format!("{}.{}", alias, ddl::quote(c.name)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Decode `self.columns.len()` values starting at `offset`
    pub fn decode_row(&self, row: &Row, offset: usize) -> rusqlite::Result<Record> {
        let mut record = Record::new();
        for (i, column) in self.columns.iter().enumerate() {
            let idx = offset + i;
            let raw = row.get_ref(idx)?;
            let value = Value::decode(column.sql_type, raw).map_err(|e| decode_error(idx, raw, e))?;
            record.insert(column.name, value);
        }
        Ok(record)
    }
}

/// A typed row of one entity table
pub trait Entity: Sized {
    fn def() -> &'static EntityDef;

    /// Surrogate key; `None` until the row is created
    fn id(&self) -> Option<i64>;

    fn to_record(&self) -> Record;

    fn from_record(record: &Record) -> Result<Self>;
}

/// Declares an entity struct together with its static [`EntityDef`].
///
/// Every entity gets an `id: Option<i64>` surrogate key. Columns take
/// optional `[modifier, ...]` lists of [`ColumnDef`] const modifiers.
macro_rules! entity {
    (@immutable) => { false };
    (@immutable immutable) => { true };
    (
        $(#[$meta:meta])*
        pub struct $name:ident in $table:literal $(($flag:ident))? {
            $(
                $(#[$fmeta:meta])*
                $field:ident : $ty:ty $([ $($modifier:ident $(($arg:expr))?),+ ])?
            ),* $(,)?
        }
        $(relations { $($rel:expr),* $(,)? })?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
        pub struct $name {
            pub id: Option<i64>,
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl $crate::schema::Entity for $name {
            fn def() -> &'static $crate::schema::EntityDef {
                static DEF: $crate::schema::EntityDef = $crate::schema::EntityDef {
                    name: stringify!($name),
                    table: $table,
                    immutable: entity!(@immutable $($flag)?),
                    columns: &[
                        $crate::schema::ColumnDef::primary_key("id"),
                        $(
                            $crate::schema::ColumnDef::of::<$ty>(stringify!($field))
                                $($( .$modifier($($arg)?) )+)?,
                        )*
                    ],
                    relations: &[ $($($rel),*)? ],
                };
                &DEF
            }

            fn id(&self) -> Option<i64> {
                self.id
            }

            fn to_record(&self) -> $crate::value::Record {
                let mut record = $crate::value::Record::new();
                record.insert("id", $crate::value::Value::from(self.id));
                $( record.insert(stringify!($field), $crate::schema::Field::to_value(&self.$field)); )*
                record
            }

            fn from_record(record: &$crate::value::Record) -> $crate::Result<Self> {
                Ok(Self {
                    id: record.get_as::<Option<i64>>("id")?,
                    $( $field: record.get_as::<$ty>(stringify!($field))?, )*
                })
            }
        }
    };
}

pub mod entities;

/// Registry of every entity and association table, built once at startup.
#[derive(Debug)]
pub struct Schema {
    entities: Vec<&'static EntityDef>,
    by_table: BTreeMap<&'static str, &'static EntityDef>,
}

impl Schema {
    /// Build and validate the registry for the full domain model
    pub fn build() -> Result<Self> {
        Self::from_defs(entities::all())
    }

    /// Build a registry from an explicit list of descriptors.
    ///
    /// Rejects duplicate tables and references to unregistered tables or
    /// undeclared columns.
    pub fn from_defs(defs: Vec<&'static EntityDef>) -> Result<Self> {
        let mut by_table = BTreeMap::new();
        for def in &defs {
            if by_table.insert(def.table, *def).is_some() {
                return Err(Error::InvalidArgument(format!("duplicate table: {}", def.table)));
            }
        }

        let schema = Self { entities: defs, by_table };
        schema.validate()?;
        Ok(schema)
    }

    fn validate(&self) -> Result<()> {
        for def in &self.entities {
            for column in def.columns {
                if let Some(target) = column.references {
                    self.entity(target)?;
                }
            }
            for relation in def.relations {
                self.entity(relation.target)?;
                match relation.kind {
                    RelationKind::BelongsTo { column } => {
                        if def.column(column)?.references != Some(relation.target) {
                            return Err(Error::InvalidArgument(format!(
                                "{}.{} does not reference {}",
                                def.table, column, relation.target
                            )));
                        }
                    }
                    RelationKind::Through { table } => {
                        self.edge_sides(def, relation, table)?;
                    }
                }
            }
        }
        for table in AssociationTable::all() {
            for column in table.def().columns() {
                self.entity(column.references)?;
            }
        }
        Ok(())
    }

    /// `(local, remote)` association columns for a many-to-many relation
    pub fn edge_sides(
        &self,
        def: &EntityDef,
        relation: &RelationDef,
        table: AssociationTable,
    ) -> Result<(EdgeColumn, EdgeColumn)> {
        let edge = table.def();
        match (edge.side_for(def.table), edge.side_for(relation.target)) {
            (Some(local), Some(remote)) if local.name != remote.name => Ok((local, remote)),
            _ => Err(Error::InvalidArgument(format!(
                "{} does not link {} to {}",
                edge.table, def.table, relation.target
            ))),
        }
    }

    /// Look up an entity by table name
    pub fn entity(&self, table: &str) -> Result<&'static EntityDef> {
        self.by_table
            .get(table)
            .copied()
            .ok_or_else(|| Error::InvalidArgument(format!("Unknown table: {}", table)))
    }

    /// Entities in registration order
    pub fn entities(&self) -> impl Iterator<Item = &'static EntityDef> + '_ {
        self.entities.iter().copied()
    }

    pub fn associations(&self) -> &'static [AssociationTable] {
        AssociationTable::all()
    }

    /// DDL that creates the whole schema idempotently
    pub fn statements(&self) -> Vec<String> {
        ddl::all_schema_statements(self)
    }
}

#[cfg(test)]
mod tests {
    use super::entities::{Project, User};
    use super::*;

    #[test]
    fn test_full_schema_validates() {
        let schema = Schema::build().unwrap();
        assert_eq!(schema.entity("user").unwrap().name, "User");
        assert!(matches!(schema.entity("people"), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_unregistered_reference_is_rejected() {
        // Project references the user table, which is missing here
        let err = Schema::from_defs(vec![Project::def()]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_field_resolution() {
        let def = User::def();
        assert_eq!(def.column("username").unwrap().sql_type, SqlType::Text);
        assert!(def.column("username").unwrap().unique);
        match def.column("nickname") {
            Err(Error::UnknownAttribute { entity, name }) => {
                assert_eq!(entity, "User");
                assert_eq!(name, "nickname");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(def.relation("projects").is_ok());
        assert!(def.relation("friends").is_err());
    }

    #[test]
    fn test_entity_record_roundtrip() {
        let user = User {
            id: Some(3),
            username: "bob".to_string(),
            password: "secret".to_string(),
            ..Default::default()
        };
        let record = user.to_record();
        assert_eq!(record.get("username"), Some(&Value::from("bob")));
        assert_eq!(User::from_record(&record).unwrap(), user);
    }
}

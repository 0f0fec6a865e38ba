use crate::registry::{Registry, TableInfo};
use std::fmt::Write as _;

/// DDL for one table: CREATE TABLE, link tables, then indexes. Idempotent
/// (`IF NOT EXISTS`) so schema maintenance can re-run after registry
/// changes.
#[must_use]
pub fn create_table_sql(info: &TableInfo) -> Vec<String> {
    let mut statements = Vec::new();

    let mut columns = Vec::with_capacity(info.columns.len());
    for column in &info.columns {
        let mut part = format!(r#""{}" {}"#, column.name, column.sql_type);
        if column.name == "id" {
            part.push_str(" PRIMARY KEY");
        } else {
            if column.not_null {
                part.push_str(" NOT NULL");
            }
            if column.unique {
                part.push_str(" UNIQUE");
            }
            if let Some((ref_table, ondelete)) = &column.foreign_key {
                write!(part, r#" REFERENCES "{ref_table}" ("id") ON DELETE {ondelete}"#).ok();
            }
        }
        columns.push(part);
    }
    statements.push(format!(
        r#"CREATE TABLE IF NOT EXISTS "{}" ({})"#,
        info.table,
        columns.join(", ")
    ));

    for link in &info.link_tables {
        statements.push(format!(
            r#"CREATE TABLE IF NOT EXISTS "{}" ("{}" bigint NOT NULL REFERENCES "{}" ("id") ON DELETE CASCADE, "{}" bigint NOT NULL REFERENCES "{}" ("id") ON DELETE CASCADE, PRIMARY KEY ("{}", "{}"))"#,
            link.name,
            link.left_column,
            link.left_table,
            link.right_column,
            link.right_table,
            link.left_column,
            link.right_column,
        ));
    }

    for index in &info.indexes {
        let unique = if index.unique { "UNIQUE " } else { "" };
        let columns: Vec<String> = index
            .columns
            .iter()
            .map(|c| {
                if index.functional_lower {
                    format!(r#"lower("{c}")"#)
                } else {
                    format!(r#""{c}""#)
                }
            })
            .collect();
        statements.push(format!(
            r#"CREATE {unique}INDEX IF NOT EXISTS "{}" ON "{}" ({})"#,
            index.name,
            index.table,
            columns.join(", ")
        ));
    }

    statements
}

/// Full-schema DDL in registry order.
#[must_use]
pub fn schema_sql(registry: &Registry) -> Vec<String> {
    registry.tables().flat_map(create_table_sql).collect()
}

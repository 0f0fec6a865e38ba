use crate::{registry::Model, value::FieldKind};

///
/// TableInfo
///
/// SQL schema derived from one effective model: columns, indexes, and
/// many2many link tables. Consumed by DDL generation and the index-health
/// tooling.
///

#[derive(Clone, Debug)]
pub struct TableInfo {
    pub model: String,
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
    pub link_tables: Vec<LinkTableInfo>,
}

#[derive(Clone, Debug)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: String,
    pub not_null: bool,
    pub unique: bool,
    /// `(referenced table, on delete clause)` for many2one columns.
    pub foreign_key: Option<(String, String)>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
    /// Btree over `lower(col)` for case-insensitive matching.
    pub functional_lower: bool,
}

#[derive(Clone, Debug)]
pub struct LinkTableInfo {
    pub name: String,
    pub left_column: String,
    pub right_column: String,
    pub left_table: String,
    pub right_table: String,
}

/// Column type for one field kind.
#[must_use]
pub fn sql_type(kind: &FieldKind) -> String {
    match kind {
        FieldKind::Boolean => "boolean".to_string(),
        FieldKind::Integer => "bigint".to_string(),
        FieldKind::Float { .. } => "double precision".to_string(),
        FieldKind::Monetary { .. } => "numeric".to_string(),
        FieldKind::Char { size: Some(n) } => format!("varchar({n})"),
        FieldKind::Char { size: None } | FieldKind::Selection | FieldKind::Reference => {
            "varchar".to_string()
        }
        FieldKind::Text | FieldKind::Html => "text".to_string(),
        FieldKind::Date => "date".to_string(),
        FieldKind::Datetime => "timestamp".to_string(),
        FieldKind::Binary => "bytea".to_string(),
        FieldKind::Many2one { .. } => "bigint".to_string(),
        FieldKind::One2many { .. } | FieldKind::Many2many { .. } => {
            // No column; never reached by DDL.
            "bigint".to_string()
        }
    }
}

/// Table name for an entity name: dots become underscores.
#[must_use]
pub fn table_name(model: &str) -> String {
    model.replace('.', "_")
}

pub(crate) fn build_table_info(model: &Model, ondelete_sql: impl Fn(&str) -> String) -> TableInfo {
    let table = model.table.clone();
    let mut columns = vec![ColumnInfo {
        name: "id".to_string(),
        sql_type: "bigserial".to_string(),
        not_null: true,
        unique: true,
        foreign_key: None,
    }];
    let mut indexes = Vec::new();
    let mut link_tables = Vec::new();

    for field in model.fields() {
        match &field.kind {
            FieldKind::Many2many { comodel, relation } => {
                link_tables.push(LinkTableInfo {
                    name: relation.clone(),
                    left_column: format!("{}_id", table),
                    right_column: format!("{}_id", table_name(comodel)),
                    left_table: table.clone(),
                    right_table: table_name(comodel),
                });
                continue;
            }
            FieldKind::One2many { .. } => continue,
            _ => {}
        }
        if !field.is_column() {
            continue;
        }

        let foreign_key = match &field.kind {
            FieldKind::Many2one { comodel } => {
                Some((table_name(comodel), ondelete_sql(&field.name)))
            }
            _ => None,
        };
        let is_fk = foreign_key.is_some();

        columns.push(ColumnInfo {
            name: field.name.clone(),
            sql_type: sql_type(&field.kind),
            not_null: field.required,
            unique: field.unique,
            foreign_key,
        });

        // Indexing policy: declared indexes, every FK column, and every
        // column under a uniqueness constraint.
        if field.index {
            indexes.push(IndexInfo {
                name: format!("{table}_{}_idx", field.name),
                table: table.clone(),
                columns: vec![field.name.clone()],
                unique: false,
                functional_lower: matches!(
                    field.kind,
                    FieldKind::Char { .. } | FieldKind::Text
                ),
            });
        }
        if is_fk {
            indexes.push(IndexInfo {
                name: format!("{table}_{}_fkey_idx", field.name),
                table: table.clone(),
                columns: vec![field.name.clone()],
                unique: false,
                functional_lower: false,
            });
        }
        if field.unique {
            indexes.push(IndexInfo {
                name: format!("{table}_{}_uniq", field.name),
                table: table.clone(),
                columns: vec![field.name.clone()],
                unique: true,
                functional_lower: false,
            });
        }
    }

    for (name, fields) in &model.uniques {
        indexes.push(IndexInfo {
            name: format!("{table}_{name}_uniq"),
            table: table.clone(),
            columns: fields.clone(),
            unique: true,
            functional_lower: false,
        });
    }

    TableInfo {
        model: model.name.clone(),
        table,
        columns,
        indexes,
        link_tables,
    }
}

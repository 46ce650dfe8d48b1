use sqlx::postgres::PgRow;
use sqlx::{Column as _, Row as _, TypeInfo as _};

use cascadia_core::{
    ColumnDef, DataType, ForeignKeyDef, ReferentialAction, Row, StoreError, Value,
};

use super::map_sqlx_error;
use super::queries::{RawColumn, RawForeignKey};

pub fn map_columns(raw: Vec<RawColumn>) -> Vec<ColumnDef> {
    raw.into_iter()
        .map(|column| ColumnDef {
            data_type: data_type_from_pg(&column.data_type),
            nullable: column.is_nullable,
            primary_key: column.is_primary,
            auto_increment: column.is_serial,
            unique: column.is_unique,
            name: column.name,
        })
        .collect()
}

pub fn map_foreign_keys(raw: Vec<RawForeignKey>) -> Vec<ForeignKeyDef> {
    raw.into_iter()
        .map(|fk| ForeignKeyDef {
            name: fk.name,
            column: fk.column,
            referenced_table: fk.referenced_table,
            referenced_column: fk.referenced_column,
            on_delete: fk_action_from_code(fk.on_delete_code),
            on_update: fk_action_from_code(fk.on_update_code),
        })
        .collect()
}

/// Convert a `pg_constraint` action code to a referential action.
///
/// `SET DEFAULT` has no counterpart and reads as `NO ACTION`.
pub fn fk_action_from_code(code: i8) -> ReferentialAction {
    match code as u8 as char {
        'r' => ReferentialAction::Restrict,
        'c' => ReferentialAction::Cascade,
        'n' => ReferentialAction::SetNull,
        _ => ReferentialAction::NoAction,
    }
}

fn data_type_from_pg(formatted: &str) -> DataType {
    match formatted {
        "text" => DataType::Text,
        "bigint" | "integer" | "smallint" => DataType::Integer,
        "double precision" | "real" => DataType::Float,
        "boolean" => DataType::Boolean,
        _ => DataType::String,
    }
}

/// Decode a result row by column type name.
pub fn decode_row(row: &PgRow) -> Result<Row, StoreError> {
    let mut decoded = Row::new();
    for column in row.columns() {
        let index = column.ordinal();
        let value = match column.type_info().name() {
            "INT2" => row
                .try_get::<Option<i16>, _>(index)
                .map(|value| value.map(|v| Value::Integer(i64::from(v)))),
            "INT4" => row
                .try_get::<Option<i32>, _>(index)
                .map(|value| value.map(|v| Value::Integer(i64::from(v)))),
            "INT8" => row
                .try_get::<Option<i64>, _>(index)
                .map(|value| value.map(Value::Integer)),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(index)
                .map(|value| value.map(|v| Value::Float(f64::from(v)))),
            "FLOAT8" => row
                .try_get::<Option<f64>, _>(index)
                .map(|value| value.map(Value::Float)),
            "BOOL" => row
                .try_get::<Option<bool>, _>(index)
                .map(|value| value.map(Value::Bool)),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row
                .try_get::<Option<String>, _>(index)
                .map(|value| value.map(Value::Text)),
            other => {
                return Err(StoreError::unsupported(format!(
                    "column \"{}\" has unsupported type {other}",
                    column.name()
                )));
            }
        }
        .map_err(map_sqlx_error)?;
        decoded.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }
    Ok(decoded)
}

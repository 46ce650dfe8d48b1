use sqlx::{PgPool, Row as _};

use cascadia_core::Result;

use super::map_sqlx_error;

pub struct RawColumn {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary: bool,
    pub is_unique: bool,
    pub is_serial: bool,
}

pub async fn list_columns(pool: &PgPool, table: &str) -> Result<Vec<RawColumn>> {
    let rows = sqlx::query(
        r#"
        select
          a.attname::text as name,
          pg_catalog.format_type(a.atttypid, a.atttypmod) as data_type,
          (not a.attnotnull) as is_nullable,
          exists (
            select 1 from pg_constraint pk
            where pk.conrelid = c.oid and pk.contype = 'p' and a.attnum = any(pk.conkey)
          ) as is_primary,
          exists (
            select 1 from pg_constraint uq
            where uq.conrelid = c.oid and uq.contype = 'u' and uq.conkey = array[a.attnum]
          ) as is_unique,
          coalesce(pg_get_expr(ad.adbin, ad.adrelid), '') like 'nextval(%' as is_serial
        from pg_attribute a
        join pg_class c on c.oid = a.attrelid
        join pg_namespace n on n.oid = c.relnamespace
        left join pg_attrdef ad on ad.adrelid = a.attrelid and ad.adnum = a.attnum
        where n.nspname = current_schema()
          and c.relname = $1
          and c.relkind in ('r','p')
          and a.attnum > 0
          and not a.attisdropped
        order by a.attnum
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_error)?;

    rows.iter()
        .map(|row| -> Result<RawColumn> {
            Ok(RawColumn {
                name: row.try_get("name").map_err(map_sqlx_error)?,
                data_type: row.try_get("data_type").map_err(map_sqlx_error)?,
                is_nullable: row.try_get("is_nullable").map_err(map_sqlx_error)?,
                is_primary: row.try_get("is_primary").map_err(map_sqlx_error)?,
                is_unique: row.try_get("is_unique").map_err(map_sqlx_error)?,
                is_serial: row.try_get("is_serial").map_err(map_sqlx_error)?,
            })
        })
        .collect()
}

pub struct RawForeignKey {
    pub name: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
    pub on_update_code: i8,
    pub on_delete_code: i8,
}

pub async fn list_foreign_keys(pool: &PgPool, table: &str) -> Result<Vec<RawForeignKey>> {
    let rows = sqlx::query(
        r#"
        select
          con.conname::text as name,
          src_att.attname::text as column_name,
          ref_rel.relname::text as referenced_table,
          ref_att.attname::text as referenced_column,
          con.confupdtype as on_update_code,
          con.confdeltype as on_delete_code
        from pg_constraint con
        join pg_class src_rel on src_rel.oid = con.conrelid
        join pg_namespace src_nsp on src_nsp.oid = src_rel.relnamespace
        join pg_class ref_rel on ref_rel.oid = con.confrelid
        join pg_attribute src_att on src_att.attrelid = con.conrelid and src_att.attnum = con.conkey[1]
        join pg_attribute ref_att on ref_att.attrelid = con.confrelid and ref_att.attnum = con.confkey[1]
        where src_nsp.nspname = current_schema()
          and src_rel.relname = $1
          and con.contype = 'f'
        order by con.conname
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_error)?;

    rows.iter()
        .map(|row| -> Result<RawForeignKey> {
            Ok(RawForeignKey {
                name: row.try_get("name").map_err(map_sqlx_error)?,
                column: row.try_get("column_name").map_err(map_sqlx_error)?,
                referenced_table: row.try_get("referenced_table").map_err(map_sqlx_error)?,
                referenced_column: row.try_get("referenced_column").map_err(map_sqlx_error)?,
                on_update_code: row.try_get("on_update_code").map_err(map_sqlx_error)?,
                on_delete_code: row.try_get("on_delete_code").map_err(map_sqlx_error)?,
            })
        })
        .collect()
}

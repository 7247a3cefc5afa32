use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use pg_escape::quote_identifier;
use serde_json::{json, Value};
use sqlx::{PgPool, Row};

use crate::features::models::{Feature, SinkTable, TableLayout};
use crate::features::repositories::FeatureSink;
use geosync_common::error::{GeoSyncError, GeoSyncResult};

/// Feature sink backed by a PostGIS database.
#[derive(Clone)]
pub struct PgFeatureSink {
    pool: PgPool,
}

impl PgFeatureSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Non-geometry columns of an existing table, in table order.
    async fn existing_columns(&self, table: &SinkTable) -> GeoSyncResult<Vec<String>> {
        let rows = sqlx::query(
            "select column_name from information_schema.columns
             where table_schema = $1 and table_name = $2
             order by ordinal_position",
        )
        .bind(&table.schema)
        .bind(&table.name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error(&format!("list columns of {table}"), e))?;

        if rows.is_empty() {
            return Err(GeoSyncError::Database(format!(
                "table {table} does not exist"
            )));
        }

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("column_name"))
            .filter(|name| *name != table.geometry_column)
            .collect())
    }
}

fn db_error(action: &str, e: sqlx::Error) -> GeoSyncError {
    GeoSyncError::Database(format!("{action}: {e}"))
}

/// SQL expression turning a GeoJSON text geometry into the sink's geometry.
/// Create and append share it so a table stays uniformly typed.
fn geometry_expr(geojson: &str, srid: i32) -> String {
    format!("ST_Multi(ST_Force2D(ST_SetSRID(ST_GeomFromGeoJSON({geojson}), {srid})))")
}

pub(crate) fn create_table_sql(table: &SinkTable, layout: &TableLayout) -> String {
    let id_column = table.id_column();
    let mut parts: Vec<String> = layout
        .columns
        .iter()
        .map(|col| {
            let unique = if table.upsert && col.name == id_column {
                " unique"
            } else {
                ""
            };
            format!(
                "{} {}{}",
                quote_identifier(&col.name),
                col.column_type.sql(),
                unique
            )
        })
        .collect();
    parts.push(format!(
        "{} geometry({}, {})",
        quote_identifier(&table.geometry_column),
        layout.geometry.postgis_type(),
        table.srid
    ));

    format!(
        "create table {} ({})",
        table.qualified_name(),
        parts.join(", ")
    )
}

pub(crate) fn spatial_index_sql(table: &SinkTable) -> String {
    format!(
        "create index on {} using gist ({})",
        table.qualified_name(),
        quote_identifier(&table.geometry_column)
    )
}

/// Statement loading a JSON array of `{properties, geometry}` rows bound as `$1`.
///
/// Attribute values are cast to the table's column types by
/// `jsonb_populate_record`; properties without a matching column are ignored.
pub(crate) fn insert_sql(table: &SinkTable, columns: &[String]) -> GeoSyncResult<String> {
    let qualified = table.qualified_name();
    let geom = quote_identifier(&table.geometry_column).into_owned();
    let quoted: Vec<String> = columns
        .iter()
        .map(|c| quote_identifier(c).into_owned())
        .collect();

    let mut target_cols = quoted.clone();
    target_cols.push(geom.clone());

    let mut select_cols: Vec<String> = quoted.iter().map(|c| format!("r.{c}")).collect();
    select_cols.push(geometry_expr("f->>'geometry'", table.srid));

    let mut sql = format!(
        "insert into {qualified} ({})
         select {}
         from jsonb_array_elements($1::jsonb) as f
         cross join lateral jsonb_populate_record(null::{qualified}, f->'properties') as r",
        target_cols.join(", "),
        select_cols.join(", "),
    );

    if table.upsert {
        let id_column = table.id_column();
        if !columns.contains(&id_column) {
            return Err(GeoSyncError::Validation(format!(
                "upsert into {table} needs identifier column '{id_column}'"
            )));
        }
        let assignments: Vec<String> = columns
            .iter()
            .filter(|c| **c != id_column)
            .map(|c| quote_identifier(c).into_owned())
            .chain(std::iter::once(geom))
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();
        sql.push_str(&format!(
            " on conflict ({}) do update set {}",
            quote_identifier(&id_column),
            assignments.join(", ")
        ));
    }

    Ok(sql)
}

/// Columns an append writes, in table order, and the page attributes the
/// table has no column for.
///
/// Only columns the page supplies are listed so that the table's own
/// defaults (serial keys, `default now()` stamps) fill the rest.
pub(crate) fn append_columns(
    table_columns: &[String],
    table: &SinkTable,
    features: &[Feature],
) -> (Vec<String>, Vec<String>) {
    let supplied: BTreeSet<String> = features
        .iter()
        .flat_map(|f| f.sink_row(table).into_iter().map(|(k, _)| k))
        .collect();

    let columns: Vec<String> = table_columns
        .iter()
        .filter(|c| supplied.contains(c.as_str()))
        .cloned()
        .collect();
    let known: HashSet<&str> = table_columns.iter().map(String::as_str).collect();
    let ignored = supplied
        .into_iter()
        .filter(|k| !known.contains(k.as_str()))
        .collect();

    (columns, ignored)
}

pub(crate) fn rows_payload(table: &SinkTable, features: &[Feature]) -> Value {
    Value::Array(
        features
            .iter()
            .map(|f| {
                json!({
                    "properties": f.sink_row(table),
                    "geometry": f.geometry.clone().unwrap_or(Value::Null),
                })
            })
            .collect(),
    )
}

#[async_trait]
impl FeatureSink for PgFeatureSink {
    async fn table_exists(&self, table: &SinkTable) -> GeoSyncResult<bool> {
        let row = sqlx::query("select to_regclass($1) is not null as present")
            .bind(table.qualified_name())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error(&format!("probe {table}"), e))?;
        Ok(row.get::<bool, _>("present"))
    }

    async fn create_and_load(&self, table: &SinkTable, features: &[Feature]) -> GeoSyncResult<u64> {
        let layout = TableLayout::infer(table, features);
        let create_schema = format!(
            "create schema if not exists {}",
            quote_identifier(&table.schema)
        );
        let drop_table = format!("drop table if exists {}", table.qualified_name());
        let create_table = create_table_sql(table, &layout);
        let create_index = spatial_index_sql(table);
        let insert = insert_sql(table, &layout.column_names())?;

        tracing::debug!(table = %table, ddl = %create_table, "creating sink table");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        for statement in [&create_schema, &drop_table, &create_table, &create_index] {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error(&format!("create {table}"), e))?;
        }

        let written = sqlx::query(&insert)
            .bind(rows_payload(table, features))
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(&format!("load {table}"), e))?
            .rows_affected();

        tx.commit()
            .await
            .map_err(|e| db_error(&format!("commit {table}"), e))?;

        Ok(written)
    }

    async fn append(&self, table: &SinkTable, features: &[Feature]) -> GeoSyncResult<u64> {
        let table_columns = self.existing_columns(table).await?;
        let (columns, ignored) = append_columns(&table_columns, table, features);
        if !ignored.is_empty() {
            tracing::debug!(table = %table, ?ignored, "attributes without a sink column");
        }

        let insert = insert_sql(table, &columns)?;
        let written = sqlx::query(&insert)
            .bind(rows_payload(table, features))
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(&format!("append to {table}"), e))?
            .rows_affected();

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;
    use crate::features::models::{ColumnDef, ColumnType, GeometryFamily};
    use serde_json::Map;

    fn parcels() -> SinkTable {
        SinkTable::new("public", "parcels", "OBJECTID")
    }

    fn polygon_feature(id: i64, zip: &str) -> Feature {
        let mut properties = Map::new();
        properties.insert("OBJECTID".to_string(), json!(id));
        properties.insert("ZIP".to_string(), json!(zip));
        Feature {
            id: None,
            properties,
            geometry: Some(json!({
                "type": "Polygon",
                "coordinates": [[[-84.5, 39.1], [-84.4, 39.1], [-84.4, 39.2], [-84.5, 39.1]]]
            })),
        }
    }

    fn layout() -> TableLayout {
        TableLayout {
            columns: vec![
                ColumnDef {
                    name: "objectid".to_string(),
                    column_type: ColumnType::BigInt,
                },
                ColumnDef {
                    name: "zip".to_string(),
                    column_type: ColumnType::Text,
                },
            ],
            geometry: GeometryFamily::Polygon,
        }
    }

    #[test]
    fn create_table_sql_plain() {
        let sql = create_table_sql(&parcels(), &layout());
        assert_eq!(
            sql,
            "create table public.parcels (objectid bigint, zip text, geom geometry(MultiPolygon, 4326))"
        );
    }

    #[test]
    fn create_table_sql_with_upsert_adds_unique() {
        let table = parcels().with_upsert(true).with_srid(3735);
        let sql = create_table_sql(&table, &layout());
        assert!(sql.contains("objectid bigint unique"), "got: {sql}");
        assert!(sql.contains("geometry(MultiPolygon, 3735)"), "got: {sql}");
    }

    #[test]
    fn spatial_index_targets_geometry_column() {
        assert_eq!(
            spatial_index_sql(&parcels()),
            "create index on public.parcels using gist (geom)"
        );
    }

    #[test]
    fn insert_sql_applies_geometry_policy() {
        let sql = insert_sql(&parcels(), &["objectid".to_string(), "zip".to_string()]).unwrap();
        assert!(sql.starts_with("insert into public.parcels (objectid, zip, geom)"));
        assert!(sql.contains("select r.objectid, r.zip, ST_Multi(ST_Force2D(ST_SetSRID(ST_GeomFromGeoJSON(f->>'geometry'), 4326)))"));
        assert!(sql.contains("jsonb_populate_record(null::public.parcels, f->'properties')"));
        assert!(!sql.contains("on conflict"));
    }

    #[test]
    fn insert_sql_upsert_updates_all_but_id() {
        let table = parcels().with_upsert(true);
        let sql = insert_sql(&table, &["objectid".to_string(), "zip".to_string()]).unwrap();
        assert!(
            sql.ends_with(" on conflict (objectid) do update set zip = excluded.zip, geom = excluded.geom"),
            "got: {sql}"
        );
    }

    #[test]
    fn insert_sql_upsert_requires_id_column() {
        let table = parcels().with_upsert(true);
        let err = insert_sql(&table, &["zip".to_string()]).unwrap_err();
        assert!(matches!(err, GeoSyncError::Validation(_)));
    }

    #[test]
    fn payload_uses_sink_columns_and_null_geometry() {
        let mut f = polygon_feature(3, "45202");
        f.geometry = None;
        let payload = rows_payload(&parcels(), &[f]);
        assert_eq!(payload[0]["properties"]["objectid"], json!(3));
        assert_eq!(payload[0]["properties"]["zip"], json!("45202"));
        assert!(payload[0]["geometry"].is_null());
    }

    #[test]
    fn append_columns_skip_unsupplied_table_columns() {
        let table_columns: Vec<String> = ["ogc_fid", "objectid", "zip", "loaded_at"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        let mut f = polygon_feature(7, "45202");
        f.properties.insert("EXTRA".to_string(), json!("x"));

        let (columns, ignored) = append_columns(&table_columns, &parcels(), &[f]);
        assert_eq!(columns, vec!["objectid", "zip"]);
        assert_eq!(ignored, vec!["extra"]);

        let sql = insert_sql(&parcels(), &columns).unwrap();
        assert!(sql.starts_with("insert into public.parcels (objectid, zip, geom)"), "got: {sql}");
        assert!(!sql.contains("ogc_fid") && !sql.contains("loaded_at"), "got: {sql}");
    }

    #[test]
    fn append_columns_always_include_identifier() {
        let table_columns = vec!["objectid".to_string(), "zip".to_string()];
        let f = Feature {
            id: Some(json!(12)),
            ..Default::default()
        };
        let (columns, ignored) = append_columns(&table_columns, &parcels(), &[f]);
        assert_eq!(columns, vec!["objectid"]);
        assert!(ignored.is_empty());
    }

    async fn test_sink() -> Option<(PgFeatureSink, PgPool)> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&url).await.expect("db should connect");
        sqlx::query("create extension if not exists postgis")
            .execute(&pool)
            .await
            .ok()?;
        Some((PgFeatureSink::new(pool.clone()), pool))
    }

    fn scratch_table() -> SinkTable {
        let name = format!("parcels_{}", uuid::Uuid::new_v4().simple());
        SinkTable::new("geosync_test", &name, "OBJECTID")
    }

    async fn count(pool: &PgPool, table: &SinkTable) -> i64 {
        sqlx::query(&format!("select count(*) as cnt from {}", table.qualified_name()))
            .fetch_one(pool)
            .await
            .expect("count")
            .get::<i64, _>("cnt")
    }

    #[tokio::test]
    async fn create_then_append() {
        let (sink, pool) = match test_sink().await {
            Some(s) => s,
            None => return,
        };
        let table = scratch_table();

        assert!(!sink.table_exists(&table).await.expect("probe"));

        let written = sink
            .create_and_load(&table, &[polygon_feature(1, "45202"), polygon_feature(2, "45203")])
            .await
            .expect("create");
        assert_eq!(written, 2);
        assert!(sink.table_exists(&table).await.expect("probe"));

        let written = sink
            .append(&table, &[polygon_feature(3, "45204")])
            .await
            .expect("append");
        assert_eq!(written, 1);
        assert_eq!(count(&pool, &table).await, 3);

        let geom_type: String = sqlx::query(&format!(
            "select distinct GeometryType(geom) as t from {}",
            table.qualified_name()
        ))
        .fetch_one(&pool)
        .await
        .expect("geometry type")
        .get("t");
        assert_eq!(geom_type, "MULTIPOLYGON");
    }

    #[tokio::test]
    async fn create_replaces_stale_table() {
        let (sink, pool) = match test_sink().await {
            Some(s) => s,
            None => return,
        };
        let table = scratch_table();

        sink.create_and_load(&table, &[polygon_feature(1, "45202")])
            .await
            .expect("first create");
        sink.create_and_load(&table, &[polygon_feature(5, "45205")])
            .await
            .expect("second create");
        assert_eq!(count(&pool, &table).await, 1);
    }

    #[tokio::test]
    async fn upsert_deduplicates_on_identifier() {
        let (sink, pool) = match test_sink().await {
            Some(s) => s,
            None => return,
        };
        let table = scratch_table().with_upsert(true);

        sink.create_and_load(&table, &[polygon_feature(1, "45202")])
            .await
            .expect("create");
        sink.append(&table, &[polygon_feature(1, "45299"), polygon_feature(2, "45203")])
            .await
            .expect("append");
        assert_eq!(count(&pool, &table).await, 2);

        let zip: String = sqlx::query(&format!(
            "select zip from {} where objectid = 1",
            table.qualified_name()
        ))
        .fetch_one(&pool)
        .await
        .expect("row")
        .get("zip");
        assert_eq!(zip, "45299");
    }

    #[tokio::test]
    async fn append_keeps_defaults_of_existing_table() {
        let (sink, pool) = match test_sink().await {
            Some(s) => s,
            None => return,
        };
        let table = scratch_table();
        sqlx::query("create schema if not exists geosync_test")
            .execute(&pool)
            .await
            .expect("schema");
        sqlx::query(&format!(
            "create table {} (
               id serial primary key,
               objectid bigint,
               zip text,
               loaded_at timestamptz not null default now(),
               geom geometry(MultiPolygon, 4326)
             )",
            table.qualified_name()
        ))
        .execute(&pool)
        .await
        .expect("create existing table");

        let written = sink
            .append(&table, &[polygon_feature(1, "45202"), polygon_feature(2, "45203")])
            .await
            .expect("append");
        assert_eq!(written, 2);

        let filled: i64 = sqlx::query(&format!(
            "select count(*) as cnt from {} where id is not null and loaded_at is not null",
            table.qualified_name()
        ))
        .fetch_one(&pool)
        .await
        .expect("count")
        .get("cnt");
        assert_eq!(filled, 2);
    }

    #[tokio::test]
    async fn append_to_missing_table_fails() {
        let (sink, _pool) = match test_sink().await {
            Some(s) => s,
            None => return,
        };
        let err = sink
            .append(&scratch_table(), &[polygon_feature(1, "45202")])
            .await
            .unwrap_err();
        assert!(matches!(err, GeoSyncError::Database(_)));
    }
}

/// Filter selecting features above the watermark, e.g. `OBJECTID > 500`.
pub fn build_where_clause(id_field: &str, floor: i64) -> String {
    format!("{id_field} > {floor}")
}

/// Query-string parameters for one page of a layer `query` request.
///
/// Asks for every attribute plus geometry, ascending by identifier,
/// reprojected to `out_srid`, as GeoJSON.
pub fn build_page_params(
    id_field: &str,
    floor: i64,
    offset: u64,
    page_size: u32,
    out_srid: i32,
) -> Vec<(&'static str, String)> {
    vec![
        ("where", build_where_clause(id_field, floor)),
        ("outFields", "*".to_string()),
        ("returnGeometry", "true".to_string()),
        ("orderByFields", format!("{id_field} ASC")),
        ("outSR", out_srid.to_string()),
        ("f", "geojson".to_string()),
        ("resultOffset", offset.to_string()),
        ("resultRecordCount", page_size.to_string()),
    ]
}

/// `{layer_url}/query`, tolerating a trailing slash on the layer URL.
pub fn query_url(layer_url: &str) -> String {
    format!("{}/query", layer_url.trim_end_matches('/'))
}

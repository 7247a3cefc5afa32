use std::fmt;

use pg_escape::quote_identifier;
use serde_json::{Map, Value};

pub const DEFAULT_GEOMETRY_COLUMN: &str = "geom";
pub const DEFAULT_SRID: i32 = 4326;

/// One record from a feature layer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Feature {
    /// Feature-level id reported next to the properties, if any.
    pub id: Option<Value>,
    pub properties: Map<String, Value>,
    /// GeoJSON geometry object.
    pub geometry: Option<Value>,
}

impl Feature {
    /// Numeric identifier of this feature.
    ///
    /// Looks up `id_field` among the properties (exact name first, then
    /// case-insensitively) and falls back to the feature-level id only when
    /// the attribute is absent. Returns `None` when the value is not an
    /// integer.
    pub fn identifier(&self, id_field: &str) -> Option<i64> {
        let attr = self.properties.get(id_field).or_else(|| {
            self.properties
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(id_field))
                .map(|(_, v)| v)
        });
        match attr {
            Some(v) => parse_identifier(v),
            None => self.id.as_ref().and_then(parse_identifier),
        }
    }

    /// GeoJSON `type` of the geometry, e.g. `"Polygon"`.
    pub fn geometry_type(&self) -> Option<&str> {
        self.geometry.as_ref()?.get("type")?.as_str()
    }

    /// Properties keyed by sink column name, ready to be written into `table`.
    ///
    /// The identifier column always holds the parsed integer identifier,
    /// taken from the feature-level id when the attribute is missing, or null
    /// when neither parses.
    pub fn sink_row(&self, table: &SinkTable) -> Map<String, Value> {
        let mut row = Map::with_capacity(self.properties.len() + 1);
        for (key, value) in &self.properties {
            let column = table.column_for(key);
            row.entry(column).or_insert_with(|| value.clone());
        }

        let id = self
            .identifier(&table.id_field)
            .map_or(Value::Null, Value::from);
        row.insert(table.id_column(), id);
        row
    }
}

/// Interpret a JSON value as an integer identifier.
pub fn parse_identifier(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| integral_f64(n.as_f64()?)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| integral_f64(s.parse::<f64>().ok()?))
        }
        _ => None,
    }
}

// `i64::MAX as f64` rounds up to 2^63, which is out of range.
fn integral_f64(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Turn an attribute name into a lowercase, SQL-safe column name.
pub fn launder_column_name(name: &str) -> String {
    let mut out: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();

    if out.is_empty() {
        out.push_str("field");
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Destination table of a sync target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkTable {
    pub schema: String,
    pub name: String,
    /// Source attribute holding the feature identifier, e.g. `OBJECTID`.
    pub id_field: String,
    pub geometry_column: String,
    pub srid: i32,
    /// Deduplicate on the identifier column instead of plain appends.
    pub upsert: bool,
}

impl SinkTable {
    pub fn new(schema: &str, name: &str, id_field: &str) -> Self {
        Self {
            schema: schema.to_string(),
            name: name.to_string(),
            id_field: id_field.to_string(),
            geometry_column: DEFAULT_GEOMETRY_COLUMN.to_string(),
            srid: DEFAULT_SRID,
            upsert: false,
        }
    }

    pub fn with_srid(mut self, srid: i32) -> Self {
        self.srid = srid;
        self
    }

    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    /// `schema.table` with identifiers quoted where Postgres needs it.
    pub fn qualified_name(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(&self.name)
        )
    }

    pub fn id_column(&self) -> String {
        launder_column_name(&self.id_field)
    }

    /// Column an attribute lands in. Attributes that would shadow the
    /// geometry column get an `_attr` suffix.
    pub fn column_for(&self, attribute: &str) -> String {
        let column = launder_column_name(attribute);
        if column == self.geometry_column {
            format!("{column}_attr")
        } else {
            column
        }
    }
}

impl fmt::Display for SinkTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    BigInt,
    Double,
    Boolean,
    Text,
}

impl ColumnType {
    /// Type suggested by a single value; `None` for JSON null.
    pub fn infer(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Boolean),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self::BigInt),
            Value::Number(_) => Some(Self::Double),
            _ => Some(Self::Text),
        }
    }

    /// Widen two observed types to one that holds both.
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::BigInt, Self::Double) | (Self::Double, Self::BigInt) => Self::Double,
            _ => Self::Text,
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            Self::BigInt => "bigint",
            Self::Double => "double precision",
            Self::Boolean => "boolean",
            Self::Text => "text",
        }
    }
}

/// Geometry kind a table stores; every family is written as its multi variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryFamily {
    Point,
    LineString,
    Polygon,
    Mixed,
}

impl GeometryFamily {
    pub fn from_geojson_type(geometry_type: &str) -> Self {
        match geometry_type {
            "Point" | "MultiPoint" => Self::Point,
            "LineString" | "MultiLineString" => Self::LineString,
            "Polygon" | "MultiPolygon" => Self::Polygon,
            _ => Self::Mixed,
        }
    }

    pub fn merge(self, other: Self) -> Self {
        if self == other {
            self
        } else {
            Self::Mixed
        }
    }

    /// PostGIS type modifier for the geometry column.
    pub fn postgis_type(self) -> &'static str {
        match self {
            Self::Point => "MultiPoint",
            Self::LineString => "MultiLineString",
            Self::Polygon => "MultiPolygon",
            Self::Mixed => "Geometry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

/// Table shape inferred from a page of features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub columns: Vec<ColumnDef>,
    pub geometry: GeometryFamily,
}

impl TableLayout {
    /// Infer columns and geometry family from `features`.
    ///
    /// The identifier column always comes first and is always `bigint`;
    /// attribute columns follow in first-seen order. Columns that are null in
    /// every feature become `text`.
    pub fn infer(table: &SinkTable, features: &[Feature]) -> Self {
        let id_column = table.id_column();
        let mut columns: Vec<(String, Option<ColumnType>)> = vec![(id_column.clone(), None)];
        let mut geometry: Option<GeometryFamily> = None;

        for feature in features {
            for (name, value) in feature.sink_row(table) {
                let observed = ColumnType::infer(&value);
                match columns.iter_mut().find(|(n, _)| *n == name) {
                    Some((_, ty)) => {
                        *ty = match (*ty, observed) {
                            (Some(a), Some(b)) => Some(a.merge(b)),
                            (a, b) => a.or(b),
                        };
                    }
                    None => columns.push((name, observed)),
                }
            }

            if let Some(kind) = feature.geometry_type() {
                let family = GeometryFamily::from_geojson_type(kind);
                geometry = Some(geometry.map_or(family, |g| g.merge(family)));
            }
        }

        let columns = columns
            .into_iter()
            .map(|(name, ty)| {
                let column_type = if name == id_column {
                    ColumnType::BigInt
                } else {
                    ty.unwrap_or(ColumnType::Text)
                };
                ColumnDef { name, column_type }
            })
            .collect();

        Self {
            columns,
            geometry: geometry.unwrap_or(GeometryFamily::Mixed),
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

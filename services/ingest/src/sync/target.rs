use geosync_common::error::{GeoSyncError, GeoSyncResult};
use geosync_db::features::SinkTable;

pub const DEFAULT_ID_FIELD: &str = "OBJECTID";
pub const DEFAULT_SCHEMA: &str = "public";

/// One feature layer mirrored into one sink table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTargetConfig {
    /// Stable name; keys the watermark and the per-target env vars.
    pub name: String,
    pub layer_url: String,
    /// Monotonically increasing integer attribute used as the cursor.
    pub id_field: String,
    pub table: SinkTable,
}

impl SyncTargetConfig {
    /// Load every target listed in `GEOSYNC_TARGETS`.
    pub fn list_from_env(srid: i32) -> GeoSyncResult<Vec<Self>> {
        parse_csv_target_names("GEOSYNC_TARGETS")?
            .iter()
            .map(|name| Self::from_env(name, srid))
            .collect()
    }

    /// Load one target from its `GEOSYNC_<NAME>_*` variables.
    pub fn from_env(name: &str, srid: i32) -> GeoSyncResult<Self> {
        let prefix = env_prefix(name);

        let layer_url = std::env::var(format!("{prefix}_LAYER_URL"))
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                GeoSyncError::Config(format!(
                    "{prefix}_LAYER_URL is required for target '{name}' but not set"
                ))
            })?;

        let id_field = env_or(&format!("{prefix}_ID_FIELD"), DEFAULT_ID_FIELD);
        validate_id_field(&id_field)?;

        let table_name = env_or(&format!("{prefix}_TABLE"), &name.replace('-', "_"));
        let schema = env_or(&format!("{prefix}_SCHEMA"), DEFAULT_SCHEMA);
        let upsert = parse_flag(&format!("{prefix}_UPSERT"))?;

        let table = SinkTable::new(&schema, &table_name, &id_field)
            .with_srid(srid)
            .with_upsert(upsert);

        Ok(Self {
            name: name.to_string(),
            layer_url,
            id_field,
            table,
        })
    }
}

/// Parse a comma-separated list of target names from `env_key`.
///
/// Names are trimmed and lowercased; empty entries and duplicates are dropped.
/// Only ASCII letters, digits, `_` and `-` are accepted.
pub fn parse_csv_target_names(env_key: &str) -> GeoSyncResult<Vec<String>> {
    let raw = std::env::var(env_key)
        .map_err(|_| GeoSyncError::Config(format!("{env_key} is required but not set")))?;

    let mut names: Vec<String> = Vec::new();
    for name in raw
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
    {
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(GeoSyncError::Config(format!(
                "{env_key} contains invalid target name '{name}'"
            )));
        }
        if !names.contains(&name) {
            names.push(name);
        }
    }

    if names.is_empty() {
        return Err(GeoSyncError::Config(format!(
            "{env_key} is set but contains no target names"
        )));
    }

    Ok(names)
}

/// Keep only the targets named in `selected`; all of them when it is empty.
///
/// Unknown names are a configuration error rather than a silent no-op.
pub fn select_targets(
    targets: Vec<SyncTargetConfig>,
    selected: &[String],
) -> GeoSyncResult<Vec<SyncTargetConfig>> {
    if selected.is_empty() {
        return Ok(targets);
    }

    let wanted: Vec<String> = selected.iter().map(|s| s.trim().to_lowercase()).collect();
    if let Some(unknown) = wanted
        .iter()
        .find(|w| !targets.iter().any(|t| &t.name == *w))
    {
        return Err(GeoSyncError::Config(format!(
            "unknown target '{unknown}' (not listed in GEOSYNC_TARGETS)"
        )));
    }

    Ok(targets
        .into_iter()
        .filter(|t| wanted.contains(&t.name))
        .collect())
}

fn env_prefix(name: &str) -> String {
    format!("GEOSYNC_{}", name.to_ascii_uppercase().replace('-', "_"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_flag(key: &str) -> GeoSyncResult<bool> {
    match std::env::var(key) {
        Err(_) => Ok(false),
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "" | "0" | "false" | "no" | "off" => Ok(false),
            "1" | "true" | "yes" | "on" => Ok(true),
            other => Err(GeoSyncError::Config(format!(
                "{key} must be a boolean, got '{other}'"
            ))),
        },
    }
}

// The identifier is interpolated into the `where` and `orderByFields` parameters.
fn validate_id_field(id_field: &str) -> GeoSyncResult<()> {
    let valid = id_field
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && id_field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(GeoSyncError::Config(format!(
            "invalid identifier field '{id_field}'"
        )))
    }
}

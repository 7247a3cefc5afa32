use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};

use geosync_db::features::Feature;

const FEATURE_COLLECTION: &str = "FeatureCollection";

/// GeoJSON document returned by a layer `query` with `f=geojson`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureCollection {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub features: Vec<GeoJsonFeature>,
    #[serde(default)]
    pub exceeded_transfer_limit: Option<bool>,
    #[serde(default)]
    pub properties: Option<CollectionProperties>,
}

/// Some servers report truncation under the collection's `properties`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionProperties {
    #[serde(default)]
    pub exceeded_transfer_limit: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoJsonFeature {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
    #[serde(default)]
    pub geometry: Option<Value>,
}

impl From<GeoJsonFeature> for Feature {
    fn from(f: GeoJsonFeature) -> Self {
        Feature {
            id: f.id,
            properties: f.properties.unwrap_or_default(),
            geometry: f.geometry.filter(|g| !g.is_null()),
        }
    }
}

/// Why a success response could not be used as a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyRejection {
    /// No feature-collection marker: an error envelope, HTML, or other JSON.
    NotFeatureCollection,
    /// The marker is present but the document does not decode.
    Undecodable(String),
}

impl FeatureCollection {
    /// Validate that `body` is a feature collection, then decode it.
    ///
    /// The body must be a JSON object that either declares
    /// `"type": "FeatureCollection"` or carries a `features` array, and must
    /// not carry the service's `error` envelope.
    pub fn from_body(body: &str) -> Result<Self, BodyRejection> {
        if !body.contains(FEATURE_COLLECTION) && !body.contains("\"features\"") {
            return Err(BodyRejection::NotFeatureCollection);
        }

        let value: Value =
            serde_json::from_str(body).map_err(|_| BodyRejection::NotFeatureCollection)?;
        let Some(obj) = value.as_object() else {
            return Err(BodyRejection::NotFeatureCollection);
        };
        if obj.contains_key("error") {
            return Err(BodyRejection::NotFeatureCollection);
        }

        let declared = obj.get("type").and_then(Value::as_str) == Some(FEATURE_COLLECTION);
        let has_features = obj.get("features").map_or(false, Value::is_array);
        if !declared && !has_features {
            return Err(BodyRejection::NotFeatureCollection);
        }

        serde_json::from_value(value).map_err(|e| BodyRejection::Undecodable(e.to_string()))
    }

    /// Server-reported truncation flag, wherever the server put it.
    pub fn truncated(&self) -> bool {
        self.exceeded_transfer_limit
            .or_else(|| {
                self.properties
                    .as_ref()
                    .and_then(|p| p.exceeded_transfer_limit)
            })
            .unwrap_or(false)
    }
}

/// One fetched page of features.
#[derive(Debug, Clone)]
pub struct Page {
    pub status: StatusCode,
    pub features: Vec<Feature>,
    /// More features exist beyond this page.
    pub truncated: bool,
}

impl Page {
    pub fn from_collection(status: StatusCode, collection: FeatureCollection) -> Self {
        let truncated = collection.truncated();
        Self {
            status,
            features: collection.features.into_iter().map(Feature::from).collect(),
            truncated,
        }
    }
}

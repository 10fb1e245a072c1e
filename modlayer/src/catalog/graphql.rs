//! GraphQL catalog client.

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::client::{Catalog, CatalogError, CatalogRequest, CatalogResult, DownloadKind};
use super::types::{PackageInfo, VariantSummary, VersionInfo};

const VERSION_QUERY: &str = r#"
query GetVersion($id: UUID!, $options: JSON, $full: Boolean, $key: String, $downloadKind: DownloadKind!) {
    getVersion(id: $id) {
        version
        versionId: id
        modHash
        batched
        batches
        package: packageInfo { id name tagline description author website tags coverImage }
        variant { id name isDefault }
        groups
        defaultOption
        neededFiles(options: $options, full: $full, key: $key, downloadKind: $downloadKind)
    }
}
"#;

const VARIANT_QUERY: &str = r#"
query GetVariant($id: UUID!) {
    variant(id: $id) { id name packageId packageName isDefault }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionData {
    get_version: Option<VersionInfo>,
}

#[derive(Debug, Deserialize)]
struct VariantData {
    variant: Option<VariantSummary>,
}

/// Decode a GraphQL envelope. A non-empty error list fails the call even if
/// data is present.
fn decode_envelope<T: DeserializeOwned>(body: &[u8]) -> CatalogResult<T> {
    let response: GraphQlResponse<T> =
        serde_json::from_slice(body).map_err(|e| CatalogError::Parse(e.to_string()))?;

    if !response.errors.is_empty() {
        return Err(CatalogError::Remote {
            messages: response.errors.into_iter().map(|e| e.message).collect(),
        });
    }
    response
        .data
        .ok_or_else(|| CatalogError::Parse("response has neither data nor errors".to_string()))
}

pub(crate) fn parse_version_response(body: &[u8], version_id: Uuid) -> CatalogResult<VersionInfo> {
    let data: VersionData = decode_envelope(body)?;
    data.get_version
        .map(|mut info| {
            info.needed_files = std::mem::take(&mut info.needed_files).normalized();
            info
        })
        .ok_or(CatalogError::MissingVersion(version_id))
}

pub(crate) fn parse_variant_response(body: &[u8], variant_id: Uuid) -> CatalogResult<VariantSummary> {
    let data: VariantData = decode_envelope(body)?;
    data.variant.ok_or(CatalogError::MissingVariant(variant_id))
}

/// Catalog backed by a GraphQL endpoint.
#[derive(Debug, Clone)]
pub struct GraphQlCatalog {
    client: reqwest::Client,
    endpoint: String,
}

impl GraphQlCatalog {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> CatalogResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("modlayer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CatalogError::Http(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, body: serde_json::Value) -> CatalogResult<Bytes> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| CatalogError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status(status.as_u16()));
        }
        response
            .bytes()
            .await
            .map_err(|e| CatalogError::Http(e.to_string()))
    }
}

impl Catalog for GraphQlCatalog {
    fn version<'a>(&'a self, request: &'a CatalogRequest) -> BoxFuture<'a, CatalogResult<VersionInfo>> {
        async move {
            let kind = match request.kind {
                DownloadKind::Install => "INSTALL",
                DownloadKind::Update => "UPDATE",
            };
            let body = json!({
                "query": VERSION_QUERY,
                "variables": {
                    "id": request.version_id,
                    "options": request.selection,
                    "full": request.full,
                    "key": request.access_code,
                    "downloadKind": kind,
                },
            });

            tracing::debug!(version_id = %request.version_id, full = request.full, "Querying catalog for version");
            let bytes = self.post(body).await?;
            parse_version_response(&bytes, request.version_id)
        }
        .boxed()
    }

    fn variant<'a>(&'a self, variant_id: Uuid) -> BoxFuture<'a, CatalogResult<VariantSummary>> {
        async move {
            let body = json!({
                "query": VARIANT_QUERY,
                "variables": { "id": variant_id },
            });
            let bytes = self.post(body).await?;
            parse_variant_response(&bytes, variant_id)
        }
        .boxed()
    }

    fn cover_image<'a>(&'a self, package: &'a PackageInfo) -> BoxFuture<'a, CatalogResult<Option<Bytes>>> {
        async move {
            let Some(url) = package.cover_image.as_deref() else {
                return Ok(None);
            };
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| CatalogError::Http(e.to_string()))?;
            if !response.status().is_success() {
                return Err(CatalogError::Status(response.status().as_u16()));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| CatalogError::Http(e.to_string()))?;
            Ok(Some(bytes))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version_body() -> serde_json::Value {
        json!({
            "data": {
                "getVersion": {
                    "version": "1.2.0",
                    "versionId": Uuid::from_u128(3),
                    "package": { "id": Uuid::from_u128(1), "name": "Cool Hat", "tags": ["hat"] },
                    "variant": { "id": Uuid::from_u128(2), "name": "Default", "isDefault": true },
                    "groups": [],
                    "neededFiles": {
                        "baseUri": "https://cdn.example/files/",
                        "files": { "h1": [[null, null, "b.mdl"], [null, null, "a.mdl"]] }
                    }
                }
            }
        })
    }

    #[test]
    fn test_parse_version_response() {
        let body = serde_json::to_vec(&version_body()).unwrap();
        let info = parse_version_response(&body, Uuid::from_u128(3)).unwrap();

        assert_eq!(info.version, "1.2.0");
        assert_eq!(info.package.name, "Cool Hat");
        assert!(info.variant.is_default);
        // Destinations come back normalized.
        assert_eq!(info.needed_files.files["h1"][0].game_path, "a.mdl");
    }

    #[test]
    fn test_errors_abort_even_with_data() {
        let mut body = version_body();
        body["errors"] = json!([{ "message": "bad key" }, { "message": "nope" }]);
        let body = serde_json::to_vec(&body).unwrap();

        match parse_version_response(&body, Uuid::from_u128(3)) {
            Err(CatalogError::Remote { messages }) => assert_eq!(messages.len(), 2),
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[test]
    fn test_null_version_is_missing() {
        let body = br#"{"data":{"getVersion":null}}"#;
        let err = parse_version_response(body, Uuid::from_u128(9)).unwrap_err();
        assert!(err.is_missing_entity());
    }

    #[test]
    fn test_parse_variant_response() {
        let body = serde_json::to_vec(&json!({
            "data": { "variant": {
                "id": Uuid::from_u128(2),
                "name": "Alt",
                "packageId": Uuid::from_u128(1),
                "packageName": "Cool Hat"
            }}
        }))
        .unwrap();
        let variant = parse_variant_response(&body, Uuid::from_u128(2)).unwrap();
        assert_eq!(variant.name, "Alt");

        let missing = parse_variant_response(br#"{"data":{"variant":null}}"#, Uuid::from_u128(2));
        assert!(matches!(missing, Err(CatalogError::MissingVariant(_))));
    }

    #[test]
    fn test_garbage_body() {
        assert!(matches!(
            parse_version_response(b"<html>", Uuid::nil()),
            Err(CatalogError::Parse(_))
        ));
    }
}

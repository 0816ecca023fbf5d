use std::time::Duration;

use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::{Value, json};

use crate::domain::{EntityId, SnapshotKind};
use crate::error::CivicError;
use crate::http;

pub const VARIANT_QUERY: &str = r#"query variant($id: Int!) {
  variant(id: $id) {
    singleVariantMolecularProfile {
      description
      molecularProfileScore
      evidenceItems {
        nodes {
          disease {
            name
            id
          }
        }
      }
    }
    id
    link
    name
    referenceBases
    variantBases
    referenceBuild
    primaryCoordinates {
      chromosome
      start
      stop
      representativeTranscript
    }
  }
}"#;

pub const GENE_QUERY: &str = r#"query gene($id: Int!) {
  gene(id: $id) {
    id
    description
    name
    geneAliases
  }
}"#;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GraphqlRequest {
    pub query: &'static str,
    pub operation_name: String,
    pub variables: Value,
}

impl GraphqlRequest {
    pub fn for_entity(kind: SnapshotKind, id: EntityId) -> Self {
        let query = match kind {
            SnapshotKind::Variant => VARIANT_QUERY,
            SnapshotKind::Gene => GENE_QUERY,
        };
        Self {
            query,
            operation_name: format!("{kind}_{id}"),
            variables: json!({ "id": id.get() }),
        }
    }
}

/// Parsed GraphQL response for one entity. Every accessor answers `None` for
/// absent, null or wrongly-typed fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnrichmentResult {
    body: Value,
    parse_error: Option<String>,
}

impl EnrichmentResult {
    pub fn new(body: Value) -> Self {
        Self {
            body,
            parse_error: None,
        }
    }

    /// Wraps a response body; a body that is not JSON yields an empty result
    /// that remembers why.
    pub fn from_body(text: &str) -> Self {
        match serde_json::from_str(text) {
            Ok(body) => Self::new(body),
            Err(err) => Self {
                body: Value::Null,
                parse_error: Some(err.to_string()),
            },
        }
    }

    pub fn parse_error(&self) -> Option<&str> {
        self.parse_error.as_deref()
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        let mut current = &self.body;
        for key in path {
            current = current.get(key)?;
        }
        (!current.is_null()).then_some(current)
    }

    pub fn str_at(&self, path: &[&str]) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn float_at(&self, path: &[&str]) -> Option<f64> {
        match self.get(path)? {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// Scalar rendered as text, so a chromosome given as `7` or `"7"` reads the same.
    pub fn text_at(&self, path: &[&str]) -> Option<String> {
        match self.get(path)? {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }

    pub fn array_at(&self, path: &[&str]) -> Option<&[Value]> {
        self.get(path).and_then(Value::as_array).map(Vec::as_slice)
    }

    /// Messages from a GraphQL `errors` array.
    pub fn errors(&self) -> Vec<String> {
        self.body
            .get("errors")
            .and_then(Value::as_array)
            .map(|errors| {
                errors
                    .iter()
                    .map(|err| {
                        err.get("message")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| err.to_string())
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub trait EnrichmentClient: Send + Sync {
    fn fetch_variant(&self, id: EntityId) -> Result<EnrichmentResult, CivicError>;
    fn fetch_gene(&self, id: EntityId) -> Result<EnrichmentResult, CivicError>;
}

#[derive(Clone)]
pub struct GraphqlHttpClient {
    client: Client,
    url: String,
}

impl GraphqlHttpClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, CivicError> {
        let client = http::build_client(timeout, CivicError::EnrichmentHttp)?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    fn query(&self, request: &GraphqlRequest) -> Result<EnrichmentResult, CivicError> {
        let response = http::send_with_retries(
            || self.client.post(&self.url).json(request),
            CivicError::EnrichmentHttp,
        )?;
        let response = http::check_status(response, "enrichment request failed")
            .map_err(|(status, message)| CivicError::EnrichmentStatus { status, message })?;
        let text = response
            .text()
            .map_err(|err| CivicError::EnrichmentHttp(err.to_string()))?;
        Ok(EnrichmentResult::from_body(&text))
    }
}

impl EnrichmentClient for GraphqlHttpClient {
    fn fetch_variant(&self, id: EntityId) -> Result<EnrichmentResult, CivicError> {
        self.query(&GraphqlRequest::for_entity(SnapshotKind::Variant, id))
    }

    fn fetch_gene(&self, id: EntityId) -> Result<EnrichmentResult, CivicError> {
        self.query(&GraphqlRequest::for_entity(SnapshotKind::Gene, id))
    }
}

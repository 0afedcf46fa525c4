//! Reference analysers bundled with the crate

use crate::analyser::Analyser;
use crate::context::Context;
use crate::element::{Element, ElementData};
use crate::error::AnalyserError;
use crate::etype::Etype;
use crate::schema::ResolvedConfig;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

/// Passes every element through unchanged (`Any → Any`)
pub struct Identity;

#[async_trait]
impl Analyser for Identity {
    fn in_etype(&self) -> Etype {
        Etype::Any
    }

    fn out_etype(&self) -> Etype {
        Etype::Any
    }

    async fn analyse_element(
        &self,
        _ctx: &Context,
        element: Element,
        _config: &ResolvedConfig,
    ) -> Result<Element, AnalyserError> {
        Ok(element)
    }
}

/// Describes the payload of any element as JSON (`Any → Json`)
pub struct MediaMeta;

impl MediaMeta {
    async fn payload_bytes(payload: &ElementData) -> Result<u64, AnalyserError> {
        let mut total = 0;
        let mut pending = vec![payload];
        while let Some(item) = pending.pop() {
            total += match item {
                ElementData::Bytes(bytes) => bytes.len() as u64,
                ElementData::FilePath(path) => tokio::fs::metadata(path).await?.len(),
                ElementData::Json(value) => serde_json::to_vec(value)?.len() as u64,
                ElementData::Multiple(items) => {
                    pending.extend(items.iter());
                    0
                }
            };
        }
        Ok(total)
    }
}

#[async_trait]
impl Analyser for MediaMeta {
    fn in_etype(&self) -> Etype {
        Etype::Any
    }

    fn out_etype(&self) -> Etype {
        Etype::Json
    }

    fn expected_args(&self) -> &[&'static str] {
        &["include_path"]
    }

    async fn analyse_element(
        &self,
        ctx: &Context,
        element: Element,
        config: &ResolvedConfig,
    ) -> Result<Element, AnalyserError> {
        let bytes = Self::payload_bytes(&element.payload).await?;

        let mut meta = json!({
            "id": &element.id,
            "etype": element.etype.name(),
            "kind": element.payload.kind(),
            "bytes": bytes,
        });

        if let ElementData::FilePath(path) = &element.payload {
            let extension = path
                .extension()
                .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
            meta["extension"] = json!(extension);
            if config.get_bool("include_path").unwrap_or(false) {
                meta["path"] = json!(path.to_string_lossy());
            }
        }

        if ctx.verbose {
            debug!("MediaMeta {}: {} bytes", element.id, bytes);
        }

        Ok(Element::json(element.id, Etype::Json, meta))
    }
}

/// Keeps predictions whose label is listed and whose score clears the
/// threshold (`CvJson → CvJson`)
pub struct LabelFilter;

#[async_trait]
impl Analyser for LabelFilter {
    fn in_etype(&self) -> Etype {
        Etype::CvJson
    }

    fn out_etype(&self) -> Etype {
        Etype::CvJson
    }

    fn expected_args(&self) -> &[&'static str] {
        &["labels", "threshold"]
    }

    async fn analyse_element(
        &self,
        _ctx: &Context,
        element: Element,
        config: &ResolvedConfig,
    ) -> Result<Element, AnalyserError> {
        let Element { id, payload, .. } = element;
        let mut value = match payload {
            ElementData::Json(value) => value,
            other => {
                return Err(AnalyserError::InvalidInput(format!(
                    "LabelFilter expects a JSON payload, got {}",
                    other.kind()
                )))
            }
        };

        let threshold = config.get_f64("threshold").unwrap_or(0.1);
        let labels = config.get_list("labels");

        let predictions = value
            .get_mut("predictions")
            .and_then(Value::as_array_mut)
            .ok_or_else(|| {
                AnalyserError::InvalidInput(format!("element '{id}' has no predictions array"))
            })?;

        predictions.retain(|prediction| {
            let label = prediction.get("label").and_then(Value::as_str);
            let score = prediction.get("score").and_then(Value::as_f64);
            match (label, score) {
                (Some(label), Some(score)) => {
                    score >= threshold && labels.map_or(true, |keep| keep.iter().any(|l| l == label))
                }
                _ => false,
            }
        });

        Ok(Element::json(id, Etype::CvJson, value))
    }
}

//! services/api/src/adapters/gemini.rs
//!
//! Vision and image-generation adapters backed by the Gemini `generateContent`
//! REST endpoint. Implements `VisionService` and `GenerationService`.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use photo_coach_core::domain::{AnalysisResult, MAX_SCORE};
use photo_coach_core::ports::{
    BlobStorage, GenerationService, PortError, PortResult, VisionService,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const ANALYSIS_PROMPT: &str = r#"You are a professional photographer and a patient photography teacher.
Critique the attached photo and score it from 0 to 10 in each of these categories:
composition, exposure, color, lighting, focus, development (post-processing), distance
(how close the photographer stood to the subject), and intentClarity (how clearly the
photo communicates what the photographer wanted to show).

For every category give a one or two sentence comment on what you see and one concrete,
actionable improvement. Then give:
- photoSummary: a short title for the photo (under 40 characters)
- summary: two or three sentences a beginner can act on right away
- overallComment: an encouraging overall assessment
- overallScore: the overall score from 0 to 10

Answer only with JSON matching the response schema."#;

const ENHANCEMENT_PROMPT: &str = r#"You are a professional photo retoucher and teacher.
Keep the subject and content of the original photo, and produce a natural, high quality
improved version at contest-winning level, applying the critique below.

On top of the improved photo, mark the changes like a teacher's red pen: red circles or
arrows on the improved areas and short handwritten-style notes such as "brighter here" or
"cleaner framing". Output the improved photo with these annotations drawn on it."#;

const COMPARE_PROMPT: &str = r#"Compare the original photo (first image) with the improved version
(second image). Explain concretely what was improved and give shooting and editing advice
the photographer can apply next time."#;

/// Talks to the Gemini REST API for both structured analysis and image generation.
#[derive(Clone)]
pub struct GeminiAdapter {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    analysis_model: String,
    image_model: String,
    blobs: Arc<dyn BlobStorage>,
}

impl GeminiAdapter {
    pub fn new(
        api_base: &str,
        api_key: String,
        analysis_model: String,
        image_model: String,
        blobs: Arc<dyn BlobStorage>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            analysis_model,
            image_model,
            blobs,
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{}", trimmed)
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    async fn image_part(&self, locator: &str) -> PortResult<Value> {
        let (data, mime_type) = self.blobs.read_all(locator).await?;
        Ok(json!({
            "inlineData": {
                "mimeType": mime_type,
                "data": BASE64.encode(&data),
            }
        }))
    }

    async fn generate_content(&self, model: &str, payload: &Value) -> PortResult<Value> {
        let endpoint = self.endpoint_for_model(model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .timeout(REQUEST_TIMEOUT)
            .json(payload)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(format!("Gemini request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(300).collect();
            return Err(PortError::Unexpected(format!(
                "Gemini returned {}: {}",
                status, snippet
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| PortError::Unexpected(format!("Gemini response unreadable: {}", e)))
    }
}

/// Parts of the first candidate, or an empty list.
fn candidate_parts(payload: &Value) -> Vec<Value> {
    payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn response_text(payload: &Value) -> String {
    candidate_parts(payload)
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect()
}

fn extract_inline_image(payload: &Value) -> PortResult<Option<Bytes>> {
    for part in candidate_parts(payload) {
        let data = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(|inline| inline.get("data"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let bytes = BASE64
            .decode(data.as_bytes())
            .map_err(|e| PortError::Integrity(format!("Gemini image base64 decode failed: {}", e)))?;
        return Ok(Some(Bytes::from(bytes)));
    }
    Ok(None)
}

/// Decodes the model's JSON answer into an `AnalysisResult`.
pub fn parse_analysis(text: &str) -> PortResult<AnalysisResult> {
    let trimmed = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let analysis: AnalysisResult = serde_json::from_str(trimmed)
        .map_err(|e| PortError::Integrity(format!("Analysis JSON did not parse: {}", e)))?;
    analysis.validate().map_err(PortError::Integrity)?;
    Ok(analysis)
}

fn analysis_response_schema() -> Value {
    let category = json!({
        "type": "OBJECT",
        "properties": {
            "score": { "type": "INTEGER", "minimum": 0, "maximum": MAX_SCORE },
            "comment": { "type": "STRING" },
            "improvement": { "type": "STRING" },
        },
        "required": ["score", "comment", "improvement"],
    });
    let categories = [
        "composition",
        "exposure",
        "color",
        "lighting",
        "focus",
        "development",
        "distance",
        "intentClarity",
    ];

    let mut properties = serde_json::Map::new();
    properties.insert("photoSummary".to_string(), json!({ "type": "STRING" }));
    properties.insert("summary".to_string(), json!({ "type": "STRING" }));
    properties.insert("overallComment".to_string(), json!({ "type": "STRING" }));
    properties.insert(
        "overallScore".to_string(),
        json!({ "type": "INTEGER", "minimum": 0, "maximum": MAX_SCORE }),
    );
    for name in categories {
        properties.insert(name.to_string(), category.clone());
    }
    let required: Vec<String> = properties.keys().cloned().collect();

    json!({
        "type": "OBJECT",
        "properties": properties,
        "required": required,
    })
}

/// The analysis summary when `analysis_json` parses, else the raw text.
pub fn comparison_context(analysis_json: &str) -> String {
    match serde_json::from_str::<AnalysisResult>(analysis_json) {
        Ok(analysis) if !analysis.summary.trim().is_empty() => analysis.summary,
        _ => analysis_json.trim().to_string(),
    }
}

/// Renders the critique as plain lines the image model can follow.
pub fn format_enhancement_brief(analysis: &AnalysisResult) -> String {
    let mut lines = Vec::new();
    if !analysis.summary.trim().is_empty() {
        lines.push(format!("Summary: {}", analysis.summary.trim()));
    }
    if !analysis.overall_comment.trim().is_empty() {
        lines.push(format!("Overall comment: {}", analysis.overall_comment.trim()));
    }
    if analysis.overall_score > 0 {
        lines.push(format!("Overall score: {}/{}", analysis.overall_score, MAX_SCORE));
    }
    lines.push("Per-category suggestions:".to_string());
    for (name, category) in analysis.categories() {
        let mut line = format!("- {}: {}/{}", name, category.score, MAX_SCORE);
        if !category.comment.trim().is_empty() {
            line.push_str(&format!(" / comment: {}", category.comment.trim()));
        }
        if !category.improvement.trim().is_empty() {
            line.push_str(&format!(" / improve: {}", category.improvement.trim()));
        }
        lines.push(line);
    }
    lines.join("\n")
}

#[async_trait]
impl VisionService for GeminiAdapter {
    async fn analyze(&self, image_locator: &str) -> PortResult<AnalysisResult> {
        let image = self.image_part(image_locator).await?;
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [image, { "text": ANALYSIS_PROMPT }],
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": analysis_response_schema(),
            },
        });

        let response = self.generate_content(&self.analysis_model, &payload).await?;
        let text = response_text(&response);
        if text.trim().is_empty() {
            return Err(PortError::Integrity("Gemini returned no analysis text".to_string()));
        }
        debug!("Analysis response: {} chars", text.len());
        parse_analysis(&text)
    }

    async fn compare(
        &self,
        original_locator: &str,
        enhanced_locator: &str,
        analysis_json: &str,
    ) -> PortResult<String> {
        let original = self.image_part(original_locator).await?;
        let enhanced = self.image_part(enhanced_locator).await?;
        let prompt = format!(
            "{}\nAnalysis: {}",
            COMPARE_PROMPT,
            comparison_context(analysis_json)
        );
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }, original, enhanced],
            }],
        });

        let response = self.generate_content(&self.analysis_model, &payload).await?;
        let advice = response_text(&response).trim().to_string();
        if advice.is_empty() {
            return Err(PortError::Integrity("Gemini returned no comparison text".to_string()));
        }
        Ok(advice)
    }
}

#[async_trait]
impl GenerationService for GeminiAdapter {
    async fn enhance(&self, image_locator: &str, analysis: &AnalysisResult) -> PortResult<Bytes> {
        let prompt = format!(
            "{}\n\nCritique and suggestions:\n{}",
            ENHANCEMENT_PROMPT,
            format_enhancement_brief(analysis)
        );
        let image = self.image_part(image_locator).await?;
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }, image],
            }],
            "generationConfig": { "responseModalities": ["IMAGE", "TEXT"] },
        });

        let response = self.generate_content(&self.image_model, &payload).await?;
        match extract_inline_image(&response)? {
            Some(bytes) => Ok(bytes),
            None => {
                warn!("Image model answered without image data: {}", response_text(&response));
                Err(PortError::Integrity("Image data missing in response".to_string()))
            }
        }
    }
}

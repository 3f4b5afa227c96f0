use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// One extraction job as handed to a worker
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub session_id: String,
    pub document_id: String,
    pub document_type: String,
    pub raw_input: Value,
}

/// The extraction capability itself. Implementations run off the
/// foreground path on the worker pool; a failure becomes a failed
/// completion entry, never a crashed engine iteration.
#[async_trait]
pub trait DocumentExtractor: Send + Sync + 'static {
    /// Returns the extractor's unique name.
    fn name(&self) -> String;

    /// Extract structured fields from the submitted document.
    async fn extract(&self, request: &ExtractionRequest) -> Result<Value>;

    /// JSON schema the extracted fields must satisfy for this document
    /// type, if the extractor declares one.
    fn output_schema(&self, _document_type: &str) -> Option<Value> {
        None
    }

    fn validate_output(&self, document_type: &str, fields: &Value) -> Result<()> {
        let Some(schema) = self.output_schema(document_type) else {
            return Ok(());
        };
        let compiled_schema = jsonschema::validator_for(&schema)
            .map_err(|e| anyhow::anyhow!("Failed to compile output schema: {}", e))?;
        if let Err(errors) = compiled_schema.validate(fields) {
            warn!(
                "Output validation failed for extractor {}: {}",
                self.name(),
                errors
            );
            return Err(anyhow::anyhow!("Invalid extraction output: {}", errors));
        }
        Ok(())
    }
}

/// Development extractor: produces placeholder values for a fixed field
/// list per document type, after an optional simulated processing delay.
/// Unknown document types extract to an empty object.
pub struct TemplateExtractor {
    fields_by_type: HashMap<String, Vec<String>>,
    delay: Duration,
}

impl TemplateExtractor {
    pub fn new(fields_by_type: HashMap<String, Vec<String>>) -> Self {
        Self {
            fields_by_type,
            delay: Duration::ZERO,
        }
    }

    /// Simulate per-document processing time
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Field lists for the document set of a typical lending intake
    pub fn lending_documents() -> Self {
        let fields_by_type = [
            (
                "bank_statement",
                vec!["bank_name", "account_number", "ifsc", "account_holder", "balance"],
            ),
            ("payslip", vec!["employer", "gross_salary", "net_salary", "pay_period"]),
            ("cibil", vec!["cibil_score", "report_date", "outstanding_loans"]),
            ("pan", vec!["pan_number", "name_on_pan", "dob"]),
            ("aadhaar", vec!["aadhaar_number", "name_on_aadhaar", "address"]),
        ]
        .into_iter()
        .map(|(doc_type, fields)| {
            (
                doc_type.to_string(),
                fields.into_iter().map(str::to_string).collect(),
            )
        })
        .collect();
        Self::new(fields_by_type)
    }
}

#[async_trait]
impl DocumentExtractor for TemplateExtractor {
    fn name(&self) -> String {
        "template".to_string()
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<Value> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let fields = self
            .fields_by_type
            .get(&request.document_type)
            .map(|names| {
                names
                    .iter()
                    .map(|name| (name.clone(), json!(format!("<extracted_{}>", name))))
                    .collect::<serde_json::Map<String, Value>>()
            })
            .unwrap_or_default();
        Ok(Value::Object(fields))
    }

    fn output_schema(&self, document_type: &str) -> Option<Value> {
        let names = self.fields_by_type.get(document_type)?;
        Some(json!({
            "type": "object",
            "properties": names
                .iter()
                .map(|name| (name.clone(), json!({"type": "string"})))
                .collect::<serde_json::Map<String, Value>>(),
            "required": names,
        }))
    }
}

use crate::Result;
use schemars::{JsonSchema, schema_for};

/// A named structured output the model is asked to produce.
pub struct ToolDefinition {
    pub name: String,
    pub desc: String,
    pub params: serde_json::Value,
}

impl ToolDefinition {
    pub fn new<P: JsonSchema>(name: &str, desc: &str) -> Result<Self> {
        let schema = schema_for!(P);
        let params = serde_json::to_value(&schema.schema)?;
        Ok(Self {
            name: name.to_string(),
            desc: desc.to_string(),
            params,
        })
    }

    /// Prompt-ready description: the purpose line followed by the JSON schema.
    pub fn render(&self) -> Result<String> {
        Ok(format!(
            "{} ({}):\n{}",
            self.name,
            self.desc,
            serde_json::to_string_pretty(&self.params)?
        ))
    }
}

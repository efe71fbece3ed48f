use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the result tool when a [`ResultSpec`] does not pick one.
pub const DEFAULT_RESULT_TOOL_NAME: &str = "final_result";

/// Descriptor for tool function parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub r#type: String,
    pub function: FunctionDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDescriptor {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            r#type: "function".to_string(),
            function: FunctionDescriptor {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// Shape of the structured value the caller wants back.
///
/// Offered to the execution model as a tool; calling it ends the run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSpec {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

impl ResultSpec {
    pub fn new(schema: Value) -> Self {
        Self {
            name: DEFAULT_RESULT_TOOL_NAME.to_string(),
            description: "The final response which ends this conversation".to_string(),
            schema,
        }
    }

    /// Derive the schema from a Rust type.
    pub fn for_type<T: schemars::JsonSchema>() -> Result<Self> {
        let schema = serde_json::to_value(schemars::schema_for!(T))?;
        Ok(Self::new(schema))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn to_tool(&self) -> ToolDescriptor {
        ToolDescriptor::function(&self.name, &self.description, self.schema.clone())
    }

    /// Check that `arguments` can stand in for a value of this schema.
    ///
    /// Only the top-level shape is checked: an object carrying every
    /// `required` property.
    pub fn missing_properties(&self, arguments: &Value) -> Option<Vec<String>> {
        let object = arguments.as_object()?;
        let missing = self.schema["required"]
            .as_array()
            .map(|required| {
                required
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|key| !object.contains_key(*key))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        Some(missing)
    }
}

/// What a single execution request is allowed to produce.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestParameters {
    pub result: Option<ResultSpec>,
    pub tools: Vec<ToolDescriptor>,
    pub allow_text_result: bool,
}

impl Default for RequestParameters {
    fn default() -> Self {
        Self {
            result: None,
            tools: Vec::new(),
            allow_text_result: true,
        }
    }
}

impl RequestParameters {
    /// Require a structured result; plain text answers are no longer accepted.
    pub fn with_result(mut self, spec: ResultSpec) -> Self {
        self.result = Some(spec);
        self.allow_text_result = false;
        self
    }

    pub fn with_tool(mut self, tool: ToolDescriptor) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn allow_text(mut self, allow: bool) -> Self {
        self.allow_text_result = allow;
        self
    }

    /// Every tool offered to the model, function tools first.
    pub fn all_tools(&self) -> Vec<ToolDescriptor> {
        let mut tools = self.tools.clone();
        if let Some(result) = &self.result {
            tools.push(result.to_tool());
        }
        tools
    }

    pub fn is_result_tool(&self, name: &str) -> bool {
        self.result.as_ref().is_some_and(|r| r.name == name)
    }

    pub fn is_function_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }
}

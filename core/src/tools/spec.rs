use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::context::{ToolArgs, ToolError};

/// JSON schema representation for tool parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JsonSchema {
  String {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
  },
  Number {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
  },
  Boolean {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
  },
  Array {
    items: Box<JsonSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
  },
  Object {
    properties: BTreeMap<String, JsonSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    required: Option<Vec<String>>,
  },
}

impl JsonSchema {
  pub fn to_value(&self) -> Value {
    serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
  }

  /// Shallow check of an argument object: required keys and primitive types.
  pub fn check_args(&self, args: &ToolArgs) -> Result<(), ToolError> {
    let JsonSchema::Object {
      properties,
      required,
    } = self
    else {
      return Ok(());
    };

    for key in required.iter().flatten() {
      if !args.contains_key(key) {
        return Err(ToolError::InvalidParams(format!(
          "params must have required property '{key}'"
        )));
      }
    }

    for (key, value) in args {
      let Some(schema) = properties.get(key) else {
        continue;
      };
      let matches = match schema {
        JsonSchema::String { .. } => value.is_string(),
        JsonSchema::Number { .. } => value.is_number(),
        JsonSchema::Boolean { .. } => value.is_boolean(),
        JsonSchema::Array { .. } => value.is_array(),
        JsonSchema::Object { .. } => value.is_object(),
      };
      if !matches && !value.is_null() {
        return Err(ToolError::InvalidParams(format!(
          "params/{key} must be {}",
          schema.type_name()
        )));
      }
    }
    Ok(())
  }

  fn type_name(&self) -> &'static str {
    match self {
      JsonSchema::String { .. } => "string",
      JsonSchema::Number { .. } => "number",
      JsonSchema::Boolean { .. } => "boolean",
      JsonSchema::Array { .. } => "array",
      JsonSchema::Object { .. } => "object",
    }
  }
}

/// Declaration of a tool as advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
  pub name: String,
  pub description: String,
  pub parameters: JsonSchema,
}

impl ToolSpec {
  pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: JsonSchema) -> Self {
    Self {
      name: name.into(),
      description: description.into(),
      parameters,
    }
  }

  /// Function declaration in the shape model APIs expect.
  pub fn to_declaration(&self) -> Value {
    serde_json::json!({
      "name": self.name,
      "description": self.description,
      "parameters": self.parameters.to_value(),
    })
  }
}

pub(crate) fn obj(properties: BTreeMap<String, JsonSchema>, required: &[&str]) -> JsonSchema {
  JsonSchema::Object {
    properties,
    required: if required.is_empty() {
      None
    } else {
      Some(required.iter().map(|s| s.to_string()).collect())
    },
  }
}

pub(crate) fn str_field(desc: &str) -> JsonSchema {
  JsonSchema::String {
    description: Some(desc.to_string()),
  }
}

pub(crate) fn int_field(desc: &str) -> JsonSchema {
  JsonSchema::Number {
    description: Some(desc.to_string()),
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use serde_json::json;

  use super::*;

  fn schema() -> JsonSchema {
    let mut props = BTreeMap::new();
    props.insert("file_path".to_string(), str_field("File path"));
    props.insert("limit".to_string(), int_field("Maximum lines"));
    obj(props, &["file_path"])
  }

  fn args(value: Value) -> ToolArgs {
    match value {
      Value::Object(map) => map,
      _ => panic!("expected object"),
    }
  }

  #[test]
  fn missing_required_property_is_rejected() {
    let err = schema().check_args(&args(json!({ "limit": 3 }))).expect_err("missing");
    assert_eq!(
      err,
      ToolError::InvalidParams("params must have required property 'file_path'".to_string())
    );
  }

  #[test]
  fn wrong_primitive_type_is_rejected() {
    let err = schema()
      .check_args(&args(json!({ "file_path": "a", "limit": "ten" })))
      .expect_err("type");
    assert_eq!(err, ToolError::InvalidParams("params/limit must be number".to_string()));
    assert!(schema().check_args(&args(json!({ "file_path": "a", "extra": true }))).is_ok());
  }

  #[test]
  fn declaration_embeds_schema() {
    let spec = ToolSpec::new("read_file", "Read a file", schema());
    let decl = spec.to_declaration();
    assert_eq!(decl["name"], json!("read_file"));
    assert_eq!(decl["parameters"]["type"], json!("object"));
    assert_eq!(decl["parameters"]["required"], json!(["file_path"]));
  }
}

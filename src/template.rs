use std::collections::BTreeMap;

use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use tracing::debug;
use validator::{Validate, ValidationError};

use crate::intrinsics::{Expr, PSEUDO_PARAMETERS};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Name `{0}` is not alphanumeric")]
    InvalidName(String),

    #[error("Duplicate key `{0}` detected")]
    DuplicateName(String),

    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("`{from}` references undeclared `{target}`")]
    UnresolvedReference { from: String, target: String },

    #[error("`{0}` is part of a reference cycle")]
    CircularReference(String),

    #[error("`{from}` looks up undeclared mapping `{mapping}`")]
    UnknownMapping { from: String, mapping: String },

    #[error("`{from}` depends on undeclared resource `{target}`")]
    UnknownDependency { from: String, target: String },

    #[error("Unknown parameter `{0}`")]
    UnknownParameter(String),

    #[error("No value supplied for parameter `{0}`")]
    MissingParameterValue(String),

    #[error("Value for parameter `{name}` rejected: {violation}")]
    ParameterValue { name: String, violation: Violation },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Why a single parameter value fails its declared constraints.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Violation {
    #[error("value must not be empty")]
    Empty,

    #[error("shorter than the minimum length of {0}")]
    TooShort(u32),

    #[error("longer than the maximum length of {0}")]
    TooLong(u32),

    #[error("`{0}` is not one of the allowed values")]
    NotAllowed(String),

    #[error("does not match the pattern `{0}`")]
    PatternMismatch(String),

    #[error("`{0}` is not a valid pattern")]
    InvalidPattern(String),
}

const PARAMETER_TYPES: [&str; 4] = ["String", "Number", "List<Number>", "CommaDelimitedList"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Validate)]
#[serde(rename_all = "PascalCase")]
#[validate(schema(function = "validate_constraints"))]
pub struct Parameter {
    #[serde(rename = "Type")]
    #[validate(custom = "validate_parameter_type")]
    pub parameter_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 4000))]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint_description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_pattern: Option<String>,
}

impl Parameter {
    /// Checks a caller-supplied value the way CloudFormation does when the
    /// stack is created. Patterns must match the whole value.
    pub fn check_value(&self, value: &str) -> Result<(), Violation> {
        if self.parameter_type.starts_with("AWS::") && value.is_empty() {
            return Err(Violation::Empty);
        }

        let length = value.chars().count() as u32;
        if let Some(min_length) = self.min_length {
            if length < min_length {
                return Err(Violation::TooShort(min_length));
            }
        }
        if let Some(max_length) = self.max_length {
            if length > max_length {
                return Err(Violation::TooLong(max_length));
            }
        }

        if !self.allowed_values.is_empty() && !self.allowed_values.iter().any(|v| v == value) {
            return Err(Violation::NotAllowed(value.to_string()));
        }

        if let Some(pattern) = &self.allowed_pattern {
            if !anchored(pattern)?.is_match(value) {
                return Err(Violation::PatternMismatch(pattern.clone()));
            }
        }

        Ok(())
    }
}

fn anchored(pattern: &str) -> Result<Regex, Violation> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|_| Violation::InvalidPattern(pattern.to_string()))
}

fn validate_parameter_type(parameter_type: &str) -> Result<(), ValidationError> {
    if PARAMETER_TYPES.contains(&parameter_type)
        || parameter_type.starts_with("AWS::")
        || parameter_type.starts_with("List<AWS::")
    {
        return Ok(());
    }

    Err(ValidationError::new("Unsupported parameter type"))
}

fn validate_constraints(parameter: &Parameter) -> Result<(), ValidationError> {
    if let (Some(min_length), Some(max_length)) = (parameter.min_length, parameter.max_length) {
        if min_length > max_length {
            return Err(ValidationError::new("MinLength must not exceed MaxLength"));
        }
    }

    if let Some(pattern) = &parameter.allowed_pattern {
        if anchored(pattern).is_err() {
            return Err(ValidationError::new("AllowedPattern is not a valid regular expression"));
        }
    }

    if let Some(default) = &parameter.default {
        if parameter.check_value(default).is_err() {
            return Err(ValidationError::new("Default violates the parameter constraints"));
        }
    }

    Ok(())
}

/// Typed property bag of a CloudFormation resource.
pub trait ResourceProperties: Serialize {
    const RESOURCE_TYPE: &'static str;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    #[serde(skip)]
    title: String,

    #[serde(rename = "Type")]
    resource_type: String,

    #[serde(rename = "Properties", skip_serializing_if = "is_empty_object")]
    properties: Value,

    #[serde(
        rename = "DependsOn",
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "serialize_depends_on"
    )]
    depends_on: Vec<String>,
}

impl Resource {
    pub fn new<P: ResourceProperties>(
        title: impl Into<String>,
        properties: &P,
    ) -> Result<Self, Error> {
        let properties = serde_json::to_value(properties)
            .map_err(|error| Error::Serialization(error.to_string()))?;

        Ok(Self {
            title: title.into(),
            resource_type: P::RESOURCE_TYPE.to_string(),
            properties,
            depends_on: Vec::new(),
        })
    }

    /// Adds an explicit ordering hint on another resource.
    pub fn depends_on(mut self, title: impl Into<String>) -> Self {
        self.depends_on.push(title.into());
        self
    }
}

fn is_empty_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

// A single dependency is written as a bare string, several as a list.
fn serialize_depends_on<S: Serializer>(
    depends_on: &[String],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match depends_on {
        [single] => serializer.serialize_str(single),
        many => many.serialize(serializer),
    }
}

/// Region (or other top-level key) to attribute table, e.g. `RegionMap`.
pub type Mapping = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Debug, Default, Serialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion", skip_serializing_if = "Option::is_none")]
    version: Option<String>,

    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    description: Option<String>,

    #[serde(rename = "Mappings", skip_serializing_if = "BTreeMap::is_empty")]
    mappings: BTreeMap<String, Mapping>,

    #[serde(rename = "Parameters", skip_serializing_if = "BTreeMap::is_empty")]
    parameters: BTreeMap<String, Parameter>,

    #[serde(rename = "Resources")]
    resources: BTreeMap<String, Resource>,
}

enum Reference<'a> {
    Ref(&'a str),
    Mapping(&'a str),
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_version(&mut self, version: &str) {
        self.version = Some(version.to_string());
    }

    pub fn add_description(&mut self, description: &str) {
        self.description = Some(description.to_string());
    }

    pub fn add_mapping(&mut self, name: &str, mapping: Mapping) -> Result<(), Error> {
        check_alphanumeric(name)?;
        if self.mappings.contains_key(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }

        debug!("Declared mapping {}", name);
        self.mappings.insert(name.to_string(), mapping);
        Ok(())
    }

    /// Declares a parameter and returns a `Ref` to it.
    pub fn add_parameter(&mut self, name: &str, parameter: Parameter) -> Result<Expr, Error> {
        self.check_logical_name(name)?;
        parameter
            .validate()
            .map_err(|errors| Error::InvalidParameter {
                name: name.to_string(),
                reason: errors.to_string(),
            })?;

        debug!("Declared parameter {} ({})", name, parameter.parameter_type);
        self.parameters.insert(name.to_string(), parameter);
        Ok(Expr::reference(name))
    }

    /// Declares a resource and returns a `Ref` to it.
    pub fn add_resource(&mut self, resource: Resource) -> Result<Expr, Error> {
        self.check_logical_name(&resource.title)?;

        debug!("Declared resource {} ({})", resource.title, resource.resource_type);
        let title = resource.title.clone();
        self.resources.insert(title.clone(), resource);
        Ok(Expr::reference(title))
    }

    pub fn mapping(&self, name: &str) -> Option<&Mapping> {
        self.mappings.get(name)
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.keys().map(String::as_str).collect()
    }

    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    fn check_logical_name(&self, name: &str) -> Result<(), Error> {
        check_alphanumeric(name)?;
        if self.parameters.contains_key(name) || self.resources.contains_key(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    fn is_referenceable(&self, target: &str) -> bool {
        PSEUDO_PARAMETERS.contains(&target)
            || self.parameters.contains_key(target)
            || self.resources.contains_key(target)
    }

    /// Checks that every reference in the resource graph resolves to a
    /// declaration and that the resources form no cycle. Resolution itself
    /// happens at deploy time.
    pub fn validate(&self) -> Result<(), Error> {
        for (title, resource) in &self.resources {
            for target in &resource.depends_on {
                if !self.resources.contains_key(target) {
                    return Err(Error::UnknownDependency {
                        from: title.clone(),
                        target: target.clone(),
                    });
                }
            }

            let mut references = Vec::new();
            collect_references(&resource.properties, &mut references);
            for reference in references {
                match reference {
                    Reference::Ref(target) if !self.is_referenceable(target) => {
                        return Err(Error::UnresolvedReference {
                            from: title.clone(),
                            target: target.to_string(),
                        });
                    }
                    Reference::Mapping(mapping) if !self.mappings.contains_key(mapping) => {
                        return Err(Error::UnknownMapping {
                            from: title.clone(),
                            mapping: mapping.to_string(),
                        });
                    }
                    _ => (),
                }
            }
        }

        self.check_acyclic()
    }

    // Edges are `DependsOn` entries plus every `Ref` to another resource.
    fn check_acyclic(&self) -> Result<(), Error> {
        let mut edges: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (title, resource) in &self.resources {
            let mut references = Vec::new();
            collect_references(&resource.properties, &mut references);

            let targets = resource
                .depends_on
                .iter()
                .map(String::as_str)
                .chain(references.into_iter().filter_map(|reference| match reference {
                    Reference::Ref(target) => Some(target),
                    Reference::Mapping(_) => None,
                }))
                .filter(|target| self.resources.contains_key(*target))
                .collect();
            edges.insert(title, targets);
        }

        let mut finished = BTreeMap::new();
        for title in edges.keys().copied() {
            visit(title, &edges, &mut finished)?;
        }
        Ok(())
    }

    /// Checks the values a deploying caller would supply against the
    /// declared parameters. Parameters with a default may be omitted.
    pub fn validate_parameter_values(
        &self,
        values: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        if let Some(unknown) = values.keys().find(|name| !self.parameters.contains_key(*name)) {
            return Err(Error::UnknownParameter(unknown.clone()));
        }

        for (name, parameter) in &self.parameters {
            let value = match values.get(name).or(parameter.default.as_ref()) {
                Some(value) => value,
                None => return Err(Error::MissingParameterValue(name.clone())),
            };

            parameter
                .check_value(value)
                .map_err(|violation| Error::ParameterValue {
                    name: name.clone(),
                    violation,
                })?;
        }

        Ok(())
    }

    /// Renders the template as key-sorted JSON indented by four spaces.
    pub fn to_json(&self) -> Result<String, Error> {
        self.validate()?;
        let value =
            serde_json::to_value(self).map_err(|error| Error::Serialization(error.to_string()))?;

        let mut buffer = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        value
            .serialize(&mut serializer)
            .map_err(|error| Error::Serialization(error.to_string()))?;

        String::from_utf8(buffer).map_err(|error| Error::Serialization(error.to_string()))
    }
}

fn check_alphanumeric(name: &str) -> Result<(), Error> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

// `finished` is false while a node is on the current path, true once done.
fn visit<'a>(
    title: &'a str,
    edges: &BTreeMap<&'a str, Vec<&'a str>>,
    finished: &mut BTreeMap<&'a str, bool>,
) -> Result<(), Error> {
    match finished.get(title) {
        Some(true) => return Ok(()),
        Some(false) => return Err(Error::CircularReference(title.to_string())),
        None => (),
    }

    finished.insert(title, false);
    for target in edges.get(title).into_iter().flatten().copied() {
        visit(target, edges, finished)?;
    }
    finished.insert(title, true);
    Ok(())
}

fn collect_references<'a>(value: &'a Value, references: &mut Vec<Reference<'a>>) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                match (key.as_str(), inner) {
                    ("Ref", Value::String(target)) => references.push(Reference::Ref(target)),
                    ("Fn::FindInMap", Value::Array(items)) => {
                        if let Some(Value::String(mapping)) = items.first() {
                            references.push(Reference::Mapping(mapping));
                        }
                    }
                    _ => (),
                }
                collect_references(inner, references);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, references);
            }
        }
        _ => (),
    }
}

//! JSON Schema subset used to check structured model output
//!
//! A schema is compiled once from its JSON form into [`JsonSchema`], a
//! closed recursive type. Unknown keywords and malformed keyword values are
//! rejected at compile time, so validation only ever walks shapes it
//! understands. Every validation failure carries the JSON pointer of the
//! offending location, e.g. `#/flashcards/0/front`.

use std::collections::BTreeMap;
use serde_json::{Map, Number, Value};
use log::trace;

use crate::error::{Result, ServiceError};

pub const ROOT_POINTER: &str = "#";

/// Keywords accepted and ignored
const ANNOTATIONS: [&str; 8] = [
  "title", "description", "$schema", "$id", "$comment",
  "default", "examples", "format",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType
{   Null
  , Boolean
  , Integer
  , Number
  , String
  , Array
  , Object
}

impl SchemaType
{   pub fn parse(name: &str) -> Option<Self>
    {   match name
        {   "null" => Some(SchemaType::Null)
          , "boolean" => Some(SchemaType::Boolean)
          , "integer" => Some(SchemaType::Integer)
          , "number" => Some(SchemaType::Number)
          , "string" => Some(SchemaType::String)
          , "array" => Some(SchemaType::Array)
          , "object" => Some(SchemaType::Object)
          , _ => None
        }
    }

    pub fn name(&self) -> &'static str
    {   match self
        {   SchemaType::Null => "null"
          , SchemaType::Boolean => "boolean"
          , SchemaType::Integer => "integer"
          , SchemaType::Number => "number"
          , SchemaType::String => "string"
          , SchemaType::Array => "array"
          , SchemaType::Object => "object"
        }
    }

    pub fn matches(&self, value: &Value) -> bool
    {   match (self, value)
        {   (SchemaType::Null, Value::Null) => true
          , (SchemaType::Boolean, Value::Bool(_)) => true
          , (SchemaType::Integer, Value::Number(n)) => is_whole(n)
          , (SchemaType::Number, Value::Number(n)) => is_finite(n)
          , (SchemaType::String, Value::String(_)) => true
          , (SchemaType::Array, Value::Array(_)) => true
          , (SchemaType::Object, Value::Object(_)) => true
          , _ => false
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Items
{   /// Every element checked against one schema
    Single(Box<JsonSchema>)
  , /// Element `i` checked against schema `i`
    Tuple(Vec<JsonSchema>)
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdditionalProperties
{   Allowed(bool)
  , Schema(Box<JsonSchema>)
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct JsonSchema
{   pub types: Option<Vec<SchemaType>>
  , pub properties: Option<BTreeMap<String, JsonSchema>>
  , pub required: Vec<String>
  , pub additional_properties: Option<AdditionalProperties>
  , pub items: Option<Items>
  , pub min_items: Option<usize>
  , pub max_items: Option<usize>
  , pub min_length: Option<usize>
  , pub max_length: Option<usize>
  , pub minimum: Option<f64>
  , pub maximum: Option<f64>
  , pub enum_values: Option<Vec<Value>>
  , pub any_of: Option<Vec<JsonSchema>>
  , pub all_of: Option<Vec<JsonSchema>>
  , pub one_of: Option<Vec<JsonSchema>>
}

/// Compile `schema` and check `value` against it
pub fn validate(schema: &Value, value: &Value) -> Result<()>
{   JsonSchema::compile(schema)?.validate(value)
}

impl JsonSchema
{   pub fn compile(schema: &Value) -> Result<Self>
    {   compile_at(schema, ROOT_POINTER)
    }

    pub fn validate(&self, value: &Value) -> Result<()>
    {   self.validate_at(value, ROOT_POINTER)
    }

    fn allows(&self, ty: SchemaType) -> bool
    {   match &self.types
        {   None => true
          , Some(types) => types.contains(&ty)
        }
    }

    fn has_object_keywords(&self) -> bool
    {   self.properties.is_some()
          || !self.required.is_empty()
          || self.additional_properties.is_some()
    }

    fn has_array_keywords(&self) -> bool
    {   self.items.is_some()
          || self.min_items.is_some()
          || self.max_items.is_some()
    }

    pub fn validate_at(&self, value: &Value, pointer: &str) -> Result<()>
    {   trace!("Validating {}", pointer);
        self.check_composition(value, pointer)?;

        if let Some(options) = &self.enum_values
        {   if !options.iter().any(|o| deep_equal(o, value))
            {   return Err(mismatch(
                  pointer,
                  format!("value is not one of {} allowed values", options.len())
                ).with_details(Value::Array(options.clone())));
            }
        }

        if let Some(types) = &self.types
        {   if !types.iter().any(|t| t.matches(value))
            {   let names: Vec<&str>
                  = types.iter().map(SchemaType::name).collect();
                return Err(mismatch(
                  pointer,
                  format!(
                    "expected {}, got {}",
                    names.join(" | "),
                    describe(value)
                  )
                ));
            }
        }

        match value
        {   Value::Object(map)
              if self.has_object_keywords()
                && self.allows(SchemaType::Object) => {
              self.check_object(map, pointer)
            }
          , Value::Array(elements)
              if self.has_array_keywords()
                && self.allows(SchemaType::Array) => {
              self.check_array(elements, pointer)
            }
          , Value::String(s) => self.check_string(s, pointer)
          , Value::Number(n) => self.check_number(n, pointer)
          , _ => Ok(())
        }
    }

    fn check_composition(&self, value: &Value, pointer: &str) -> Result<()>
    {   if let Some(branches) = &self.any_of
        {   if !branches.iter().any(|b| b.validate_at(value, pointer).is_ok())
            {   return Err(mismatch(
                  pointer,
                  format!(
                    "value matches none of {} anyOf branches",
                    branches.len()
                  )
                ));
            }
        }

        if let Some(branches) = &self.one_of
        {   let matched = branches.iter()
              .filter(|b| b.validate_at(value, pointer).is_ok())
              .count();
            if matched != 1
            {   return Err(mismatch(
                  pointer,
                  format!(
                    "value must match exactly one oneOf branch, matched {}",
                    matched
                  )
                ));
            }
        }

        if let Some(branches) = &self.all_of
        {   for branch in branches
            {   branch.validate_at(value, pointer)?;
            }
        }
        Ok(())
    }

    fn check_object(
      &self
    , map: &Map<String, Value>
    , pointer: &str
    ) -> Result<()>
    {   for name in &self.required
        {   if !map.contains_key(name)
            {   return Err(mismatch(
                  pointer,
                  format!("missing required property '{}'", name)
                ));
            }
        }

        let empty = BTreeMap::new();
        let properties = self.properties.as_ref().unwrap_or(&empty);
        for (name, schema) in properties
        {   if let Some(child) = map.get(name)
            {   schema.validate_at(child, &child_pointer(pointer, name))?;
            }
        }

        match &self.additional_properties
        {   Some(AdditionalProperties::Allowed(false)) => {
              let mut names: Vec<&str> = map.keys()
                .filter(|k| !properties.contains_key(*k))
                .map(String::as_str)
                .collect();
              if !names.is_empty()
              {   names.sort_unstable();
                  return Err(mismatch(
                    pointer,
                    format!(
                      "unexpected properties: {}",
                      names.join(", ")
                    )
                  ).with_details(Value::from(names)));
              }
            }
          , Some(AdditionalProperties::Schema(schema)) => {
              for (name, child) in map
              {   if !properties.contains_key(name)
                  {   schema.validate_at(
                        child,
                        &child_pointer(pointer, name)
                      )?;
                  }
              }
            }
          , Some(AdditionalProperties::Allowed(true)) | None => {}
        }
        Ok(())
    }

    fn check_array(&self, elements: &[Value], pointer: &str) -> Result<()>
    {   if let Some(min) = self.min_items
        {   if elements.len() < min
            {   return Err(mismatch(
                  pointer,
                  format!(
                    "expected at least {} items, got {}",
                    min, elements.len()
                  )
                ));
            }
        }
        if let Some(max) = self.max_items
        {   if elements.len() > max
            {   return Err(mismatch(
                  pointer,
                  format!(
                    "expected at most {} items, got {}",
                    max, elements.len()
                  )
                ));
            }
        }

        match &self.items
        {   Some(Items::Tuple(schemas)) => {
              for (i, (schema, element))
                in schemas.iter().zip(elements).enumerate()
              {   schema.validate_at(
                    element,
                    &child_pointer(pointer, &i.to_string())
                  )?;
              }
            }
          , Some(Items::Single(schema)) => {
              for (i, element) in elements.iter().enumerate()
              {   schema.validate_at(
                    element,
                    &child_pointer(pointer, &i.to_string())
                  )?;
              }
            }
          , None => {}
        }
        Ok(())
    }

    fn check_string(&self, s: &str, pointer: &str) -> Result<()>
    {   let len = s.chars().count();
        if let Some(min) = self.min_length
        {   if len < min
            {   return Err(mismatch(
                  pointer,
                  format!("string shorter than {} characters", min)
                ));
            }
        }
        if let Some(max) = self.max_length
        {   if len > max
            {   return Err(mismatch(
                  pointer,
                  format!("string longer than {} characters", max)
                ));
            }
        }
        Ok(())
    }

    fn check_number(&self, n: &Number, pointer: &str) -> Result<()>
    {   let Some(x) = n.as_f64().filter(|x| x.is_finite())
        else
        {   return Err(mismatch(pointer, "number is not finite"));
        };
        if let Some(min) = self.minimum
        {   if x < min
            {   return Err(mismatch(
                  pointer,
                  format!("{} is below the minimum {}", x, min)
                ));
            }
        }
        if let Some(max) = self.maximum
        {   if x > max
            {   return Err(mismatch(
                  pointer,
                  format!("{} is above the maximum {}", x, max)
                ));
            }
        }
        Ok(())
    }
}

fn compile_at(schema: &Value, pointer: &str) -> Result<JsonSchema>
{   let Value::Object(map) = schema
    else
    {   return Err(bad_schema(pointer, "schema must be a JSON object"));
    };

    let mut out = JsonSchema::default();
    for (key, value) in map
    {   let at = child_pointer(pointer, key);
        match key.as_str()
        {   "type" => out.types = Some(compile_types(value, &at)?)
          , "properties" => {
              let Value::Object(props) = value
              else
              {   return Err(bad_schema(&at, "properties must be an object"));
              };
              let mut compiled = BTreeMap::new();
              for (name, sub) in props
              {   compiled.insert(
                    name.clone(),
                    compile_at(sub, &child_pointer(&at, name))?
                  );
              }
              out.properties = Some(compiled);
            }
          , "required" => {
              out.required = value.as_array()
                .and_then(|names| {
                  names.iter()
                    .map(|n| n.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                })
                .ok_or_else(|| {
                  bad_schema(&at, "required must be an array of strings")
                })?;
            }
          , "additionalProperties" => {
              out.additional_properties = Some(match value
              {   Value::Bool(b) => AdditionalProperties::Allowed(*b)
                , Value::Object(_) => AdditionalProperties::Schema(
                    Box::new(compile_at(value, &at)?)
                  )
                , _ => return Err(bad_schema(
                    &at,
                    "additionalProperties must be a boolean or a schema"
                  ))
              });
            }
          , "items" => {
              out.items = Some(match value
              {   Value::Object(_) => Items::Single(
                    Box::new(compile_at(value, &at)?)
                  )
                , Value::Array(_) => Items::Tuple(
                    compile_list(value, &at, false)?
                  )
                , _ => return Err(bad_schema(
                    &at,
                    "items must be a schema or an array of schemas"
                  ))
              });
            }
          , "enum" => {
              let Value::Array(options) = value
              else
              {   return Err(bad_schema(&at, "enum must be an array"));
              };
              out.enum_values = Some(options.clone());
            }
          , "minItems" => out.min_items = Some(compile_count(value, &at)?)
          , "maxItems" => out.max_items = Some(compile_count(value, &at)?)
          , "minLength" => out.min_length = Some(compile_count(value, &at)?)
          , "maxLength" => out.max_length = Some(compile_count(value, &at)?)
          , "minimum" => out.minimum = Some(compile_bound(value, &at)?)
          , "maximum" => out.maximum = Some(compile_bound(value, &at)?)
          , "anyOf" => out.any_of = Some(compile_list(value, &at, true)?)
          , "allOf" => out.all_of = Some(compile_list(value, &at, true)?)
          , "oneOf" => out.one_of = Some(compile_list(value, &at, true)?)
          , k if ANNOTATIONS.contains(&k) => {}
          , other => {
              return Err(bad_schema(
                &at,
                format!("unsupported schema keyword '{}'", other)
              ));
            }
        }
    }
    Ok(out)
}

fn compile_types(value: &Value, pointer: &str) -> Result<Vec<SchemaType>>
{   let names: Vec<&Value> = match value
    {   Value::String(_) => vec![value]
      , Value::Array(list) if !list.is_empty() => list.iter().collect()
      , _ => return Err(bad_schema(
          pointer,
          "type must be a type name or a non-empty array of names"
        ))
    };
    names.into_iter()
      .map(|n| {
        n.as_str()
          .and_then(SchemaType::parse)
          .ok_or_else(|| {
            bad_schema(pointer, format!("unknown type {}", n))
          })
      })
      .collect()
}

fn compile_list(
  value: &Value
, pointer: &str
, non_empty: bool
) -> Result<Vec<JsonSchema>>
{   let list = value.as_array()
      .filter(|l| !non_empty || !l.is_empty())
      .ok_or_else(|| bad_schema(pointer, "expected an array of schemas"))?;
    list.iter()
      .enumerate()
      .map(|(i, sub)| compile_at(sub, &child_pointer(pointer, &i.to_string())))
      .collect()
}

fn compile_count(value: &Value, pointer: &str) -> Result<usize>
{   value.as_u64()
      .and_then(|n| usize::try_from(n).ok())
      .ok_or_else(|| bad_schema(pointer, "expected a non-negative integer"))
}

fn compile_bound(value: &Value, pointer: &str) -> Result<f64>
{   value.as_f64()
      .ok_or_else(|| bad_schema(pointer, "expected a number"))
}

/// Structural equality. Numbers compare by value, so `1` equals `1.0`;
/// object key order is ignored, array order is not.
pub fn deep_equal(a: &Value, b: &Value) -> bool
{   match (a, b)
    {   (Value::Number(x), Value::Number(y)) => {
          match (x.as_i64(), y.as_i64(), x.as_u64(), y.as_u64())
          {   (Some(i), Some(j), _, _) => i == j
            , (_, _, Some(i), Some(j)) => i == j
            , _ => x.as_f64() == y.as_f64()
          }
        }
      , (Value::Array(xs), Value::Array(ys)) => {
          xs.len() == ys.len()
            && xs.iter().zip(ys).all(|(x, y)| deep_equal(x, y))
        }
      , (Value::Object(xs), Value::Object(ys)) => {
          xs.len() == ys.len()
            && xs.iter().all(|(k, x)| {
              ys.get(k).map_or(false, |y| deep_equal(x, y))
            })
        }
      , _ => a == b
    }
}

/// `#/a/b` plus `c` gives `#/a/b/c`, with `~` and `/` escaped
pub fn child_pointer(parent: &str, segment: &str) -> String
{   let escaped = segment.replace('~', "~0").replace('/', "~1");
    format!("{}/{}", parent, escaped)
}

fn is_whole(n: &Number) -> bool
{   n.is_i64()
      || n.is_u64()
      || n.as_f64().map_or(false, |x| x.is_finite() && x.fract() == 0.0)
}

fn is_finite(n: &Number) -> bool
{   n.as_f64().map_or(false, f64::is_finite)
}

fn describe(value: &Value) -> &'static str
{   match value
    {   Value::Null => "null"
      , Value::Bool(_) => "boolean"
      , Value::Number(n) if is_whole(n) => "integer"
      , Value::Number(_) => "number"
      , Value::String(_) => "string"
      , Value::Array(_) => "array"
      , Value::Object(_) => "object"
    }
}

fn mismatch(pointer: &str, message: impl Into<String>) -> ServiceError
{   let message = message.into();
    ServiceError::validation(format!(
      "Structured output failed validation at {}: {}",
      pointer, message
    )).with_pointer(pointer)
}

fn bad_schema(pointer: &str, message: impl Into<String>) -> ServiceError
{   let message = message.into();
    ServiceError::validation(format!(
      "Invalid response schema at {}: {}",
      pointer, message
    )).with_pointer(pointer)
}

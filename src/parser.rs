//! Config text parsers.
//!
//! The store never parses text itself; it hands file contents to a
//! [`ConfigParser`]. JSON is the default. Any parser producing a
//! `serde_json::Value` can be plugged in.

use serde_json::Value;

/// Boxed error returned by parsers.
pub type ParseError = Box<dyn std::error::Error + Send + Sync>;

/// Turns config file text into a structured value.
pub trait ConfigParser: Send + Sync {
    fn parse(&self, text: &str) -> Result<Value, ParseError>;
}

/// Standard JSON parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl ConfigParser for JsonParser {
    fn parse(&self, text: &str) -> Result<Value, ParseError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// YAML parser, for config files written as YAML.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlParser;

impl ConfigParser for YamlParser {
    fn parse(&self, text: &str) -> Result<Value, ParseError> {
        Ok(serde_yaml::from_str(text)?)
    }
}

impl<F> ConfigParser for F
where
    F: Fn(&str) -> Result<Value, ParseError> + Send + Sync,
{
    fn parse(&self, text: &str) -> Result<Value, ParseError> {
        self(text)
    }
}

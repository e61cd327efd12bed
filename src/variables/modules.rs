//! Input modules: `{module:key}` lookups against the request environment.

use crate::invoke::Environment;

/// Sources of values that do not come from the map stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputModule {
    /// `{request-param:name}`
    RequestParam,
    /// `{request-header:name}`
    RequestHeader,
    /// `{request-attr:name}`
    RequestAttribute,
    /// `{env:uri}`, `{env:prefix}`, `{env:method}`, `{env:full-uri}`
    Env,
}

impl InputModule {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "request-param" => Some(InputModule::RequestParam),
            "request-header" => Some(InputModule::RequestHeader),
            "request-attr" => Some(InputModule::RequestAttribute),
            "env" => Some(InputModule::Env),
            _ => None,
        }
    }

    pub fn attribute(&self, key: &str, env: &Environment) -> Option<String> {
        match self {
            InputModule::RequestParam => env.parameter(key).map(str::to_string),
            InputModule::RequestHeader => env.header(key).map(str::to_string),
            InputModule::RequestAttribute => env.attribute(key).map(str::to_string),
            InputModule::Env => match key {
                "uri" => Some(env.uri().to_string()),
                "prefix" => Some(env.prefix().to_string()),
                "full-uri" => Some(env.full_uri()),
                "method" => Some(env.method().to_string()),
                _ => None,
            },
        }
    }
}

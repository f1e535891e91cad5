//! Stack requests: the desired state submitted to the convergence engine

use crate::error::{CloudError, Result};
use crate::templates;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a stack provisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackKind {
    Application,
    Environment,
    Service,
    Pipeline,
    Task,
}

impl std::fmt::Display for StackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StackKind::Application => write!(f, "application"),
            StackKind::Environment => write!(f, "environment"),
            StackKind::Service => write!(f, "service"),
            StackKind::Pipeline => write!(f, "pipeline"),
            StackKind::Task => write!(f, "task"),
        }
    }
}

/// Identity of a stack: at most one operation may be in flight per target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StackTarget {
    pub kind: StackKind,
    pub name: String,
    pub region: String,
}

impl StackTarget {
    pub fn new(kind: StackKind, name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            region: region.into(),
        }
    }
}

impl std::fmt::Display for StackTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.kind, self.name, self.region)
    }
}

/// Desired state for one stack
///
/// Built once by a descriptor and handed to the engine by value; the
/// builder methods consume `self` so a submitted request cannot change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackRequest {
    pub kind: StackKind,
    pub name: String,
    pub region: String,
    pub template: String,
    /// Ordered key-value parameters
    pub parameters: Vec<(String, String)>,
    pub tags: BTreeMap<String, String>,
}

impl StackRequest {
    pub fn new(
        kind: StackKind,
        name: impl Into<String>,
        region: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            region: region.into(),
            template: template.into(),
            parameters: Vec::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Set a parameter, replacing an earlier value for the same key in place
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.parameters.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => self.parameters.push((key, value)),
        }
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn target(&self) -> StackTarget {
        StackTarget::new(self.kind, self.name.clone(), self.region.clone())
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parameter keys the template does not declare
    ///
    /// The backend rejects a request that passes any of these.
    pub fn undeclared_parameters(&self) -> Result<Vec<String>> {
        let declared = templates::declared_parameters(&self.template)?;
        Ok(self
            .parameters
            .iter()
            .filter(|(key, _)| !declared.contains(key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    /// Parameters as a key-sorted map
    pub fn parameter_map(&self) -> BTreeMap<String, String> {
        self.parameters.iter().cloned().collect()
    }
}

/// Anything that can describe a stack's desired topology
///
/// Descriptors are pure data: rendering a template never performs I/O.
pub trait StackDescriptor {
    fn kind(&self) -> StackKind;

    /// Backend stack name
    fn stack_name(&self) -> String;

    fn template(&self) -> Result<String>;

    fn parameters(&self) -> Vec<(String, String)>;

    fn tags(&self) -> BTreeMap<String, String>;

    /// Parameters serialized the way the backend expects them
    fn serialized_parameters(&self) -> Result<String> {
        let params: Vec<serde_json::Value> = self
            .parameters()
            .into_iter()
            .map(|(k, v)| serde_json::json!({ "ParameterKey": k, "ParameterValue": v }))
            .collect();
        Ok(serde_json::to_string_pretty(&params)?)
    }

    fn to_request(&self, region: &str) -> Result<StackRequest> {
        let mut request = StackRequest::new(self.kind(), self.stack_name(), region, self.template()?);
        for (key, value) in self.parameters() {
            request = request.with_parameter(key, value);
        }
        for (key, value) in self.tags() {
            request = request.with_tag(key, value);
        }
        let undeclared = request.undeclared_parameters()?;
        if !undeclared.is_empty() {
            return Err(CloudError::Template(format!(
                "{} passes parameters its template does not declare: {}",
                request.name,
                undeclared.join(", ")
            )));
        }
        Ok(request)
    }
}

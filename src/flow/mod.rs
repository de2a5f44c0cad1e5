// Flow-host primitives
// Minimal in-crate representations of the host runtime's message machinery:
// flow files, relationships, the property context and the per-trigger session.
// The host's processor hierarchy collapses to a single lifecycle trait.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::Result;

/// A named outcome lane the processor can transfer flow files to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relationship {
    pub name: &'static str,
    pub description: &'static str,
}

/// Messages whose token validated and, where configured, passed authorization.
pub const REL_SUCCESS: Relationship = Relationship {
    name: "success",
    description: "Flow files with a validated token (or no token where none is required)",
};

/// Messages that failed extraction, validation or authorization.
pub const REL_AUTHENTICATION_FAILED: Relationship = Relationship {
    name: "authentication-failed",
    description: "Flow files whose token was missing, invalid or denied",
};

/// All relationships exposed to the host at registration time.
pub const RELATIONSHIPS: &[Relationship] = &[REL_SUCCESS, REL_AUTHENTICATION_FAILED];

/// A single message moving through the flow: attributes plus payload.
#[derive(Debug, Clone, Default)]
pub struct FlowFile {
    attributes: HashMap<String, String>,
    payload: Bytes,
}

impl FlowFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(payload: impl Into<Bytes>) -> Self {
        Self {
            attributes: HashMap::new(),
            payload: payload.into(),
        }
    }

    /// Exact-name attribute lookup.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Case-insensitive attribute lookup (HTTP header attributes arrive with
    /// host-dependent casing).
    pub fn attribute_ignore_case(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn put_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Write a batch of attributes in one call.
    pub fn put_all(&mut self, attrs: impl IntoIterator<Item = (String, String)>) {
        self.attributes.extend(attrs);
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// The host-supplied configuration view: a string->string property map.
#[derive(Debug, Clone, Default)]
pub struct ProcessContext {
    properties: HashMap<String, String>,
}

impl ProcessContext {
    pub fn new(properties: HashMap<String, String>) -> Self {
        Self { properties }
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            properties: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }
}

/// Per-trigger session: hands the incoming flow file to the processor and
/// records where it was transferred.
#[derive(Debug, Default)]
pub struct ProcessSession {
    incoming: Option<FlowFile>,
    transferred: Vec<(FlowFile, &'static str)>,
}

impl ProcessSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flow_file(flow_file: FlowFile) -> Self {
        Self {
            incoming: Some(flow_file),
            transferred: Vec::new(),
        }
    }

    /// Take the incoming flow file, if any. Each trigger processes at most one.
    pub fn take(&mut self) -> Option<FlowFile> {
        self.incoming.take()
    }

    pub fn transfer(&mut self, flow_file: FlowFile, relationship: Relationship) {
        self.transferred.push((flow_file, relationship.name));
    }

    /// Flow files transferred to the named relationship so far.
    pub fn transferred_to(&self, relationship: Relationship) -> Vec<&FlowFile> {
        self.transferred
            .iter()
            .filter(|(_, name)| *name == relationship.name)
            .map(|(ff, _)| ff)
            .collect()
    }

    pub fn transfers(&self) -> &[(FlowFile, &'static str)] {
        &self.transferred
    }
}

/// Lifecycle surface the host drives. One instance serves many concurrent
/// `on_trigger` calls; `on_scheduled`/`on_stopped` bracket a scheduling epoch.
pub trait Processor {
    /// One-time registration hook.
    fn initialize(&self) {}

    /// Validate configuration and build runtime state. A returned error halts
    /// scheduling; no messages are processed.
    fn on_scheduled(
        &self,
        context: &ProcessContext,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Drop runtime state. In-flight fetches are abandoned.
    fn on_stopped(&self);

    /// Process one message to completion. Never returns an error for
    /// per-message failures; those route to `authentication-failed`.
    fn on_trigger(
        &self,
        context: &ProcessContext,
        session: &mut ProcessSession,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

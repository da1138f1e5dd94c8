//! Process-wide resource attributes and the tagger that stamps them onto items.

use crate::signal::{AttributeValue, Attributes, TelemetryItem};
use std::sync::Arc;

pub const SERVICE_NAME: &str = "service.name";
pub const SERVICE_VERSION: &str = "service.version";
pub const TELEMETRY_SDK_LANGUAGE: &str = "telemetry.sdk.language";
pub const TELEMETRY_SDK_NAME: &str = "telemetry.sdk.name";
pub const TELEMETRY_SDK_VERSION: &str = "telemetry.sdk.version";

/// Immutable attribute set describing the emitting process.
///
/// Cloning shares the underlying map; there is no way to mutate a `Resource`
/// after [`ResourceBuilder::build`].
#[derive(Debug, Clone)]
pub struct Resource {
    attributes: Arc<Attributes>,
}

impl Resource {
    pub fn builder() -> ResourceBuilder {
        ResourceBuilder::default()
    }

    /// A resource with no attributes; items carry it until tagged.
    pub fn empty() -> Self {
        Self {
            attributes: Arc::new(Attributes::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn service_name(&self) -> Option<&str> {
        match self.get(SERVICE_NAME) {
            Some(AttributeValue::String(name)) => Some(name),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.attributes.iter()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Returns `true` if both handles share the same allocation.
    pub fn ptr_eq(&self, other: &Resource) -> bool {
        Arc::ptr_eq(&self.attributes, &other.attributes)
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.attributes == other.attributes
    }
}

/// Builder for [`Resource`]. Starts with the SDK attributes pre-populated.
#[derive(Debug, Clone)]
pub struct ResourceBuilder {
    attributes: Attributes,
}

impl Default for ResourceBuilder {
    fn default() -> Self {
        let mut attributes = Attributes::new();
        attributes.insert(TELEMETRY_SDK_LANGUAGE.to_string(), "rust".into());
        attributes.insert(TELEMETRY_SDK_NAME.to_string(), env!("CARGO_PKG_NAME").into());
        attributes.insert(
            TELEMETRY_SDK_VERSION.to_string(),
            env!("CARGO_PKG_VERSION").into(),
        );
        Self { attributes }
    }
}

impl ResourceBuilder {
    pub fn with_service_name(self, name: impl Into<String>) -> Self {
        let name: String = name.into();
        self.with_attribute(SERVICE_NAME, name)
    }

    pub fn with_service_version(self, version: impl Into<String>) -> Self {
        let version: String = version.into();
        self.with_attribute(SERVICE_VERSION, version)
    }

    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Resource {
        Resource {
            attributes: Arc::new(self.attributes),
        }
    }
}

/// Attaches the shared [`Resource`] to items before they are enqueued.
#[derive(Debug, Clone)]
pub struct ResourceTagger {
    resource: Resource,
}

impl ResourceTagger {
    pub fn new(resource: Resource) -> Self {
        Self { resource }
    }

    /// Points `item` at the shared resource. O(1): only the `Arc` is cloned.
    #[inline]
    pub fn tag(&self, item: &mut TelemetryItem) {
        item.set_resource(self.resource.clone());
    }

    /// By-value form of [`tag`](Self::tag).
    #[inline]
    pub fn tagged(&self, mut item: TelemetryItem) -> TelemetryItem {
        self.tag(&mut item);
        item
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{LogRecord, Severity};

    #[test]
    fn test_builder_includes_sdk_attributes() {
        let resource = Resource::builder().with_service_name("cpp-example").build();

        assert_eq!(resource.service_name(), Some("cpp-example"));
        assert_eq!(
            resource.get(TELEMETRY_SDK_LANGUAGE),
            Some(&AttributeValue::String("rust".to_string()))
        );
        assert!(resource.get(TELEMETRY_SDK_VERSION).is_some());
    }

    #[test]
    fn test_tagger_shares_resource_allocation() {
        let resource = Resource::builder().with_service_name("svc").build();
        let tagger = ResourceTagger::new(resource.clone());

        let first = tagger.tagged(LogRecord::new(Severity::Info, "a").into());
        let second = tagger.tagged(LogRecord::new(Severity::Info, "b").into());

        assert!(first.resource().ptr_eq(&resource));
        assert!(second.resource().ptr_eq(first.resource()));
        // tagging never touches the resource contents
        assert_eq!(resource.len(), tagger.resource().len());
    }

    #[test]
    fn test_equality_by_content() {
        let a = Resource::builder().with_service_name("svc").build();
        let b = Resource::builder().with_service_name("svc").build();
        let c = Resource::builder().with_service_name("other").build();

        assert!(!a.ptr_eq(&b));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}

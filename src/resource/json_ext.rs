use crate::resource::ResourceKeyRef;

use serde_json::Value;

pub static NAMESPACE_POINTER: &str = "/metadata/namespace";
pub static NAME_POINTER: &str = "/metadata/name";
pub static RESOURCE_VERSION_POINTER: &str = "/metadata/resourceVersion";

/// Accessors for the handful of metadata fields that the stores need to look at on raw json
/// resources, without deserializing the whole thing.
pub trait ResourceJson: std::fmt::Display {
    fn get_namespace(&self) -> Option<&str>;
    fn get_name(&self) -> Option<&str>;
    fn get_resource_version(&self) -> Option<&str>;

    fn get_key_ref(&self) -> Option<ResourceKeyRef> {
        let namespace = self.get_namespace().unwrap_or("");
        let name = self.get_name()?;
        Some(ResourceKeyRef::new(namespace, name))
    }
}

fn str_value<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

impl ResourceJson for Value {
    fn get_namespace(&self) -> Option<&str> {
        str_value(self, NAMESPACE_POINTER)
    }

    fn get_name(&self) -> Option<&str> {
        str_value(self, NAME_POINTER).filter(|name| !name.is_empty())
    }

    fn get_resource_version(&self) -> Option<&str> {
        str_value(self, RESOURCE_VERSION_POINTER)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_ref_uses_empty_namespace_when_missing() {
        let value = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": "alpha" }
        });
        assert_eq!(Some(ResourceKeyRef::new("", "alpha")), value.get_key_ref());
    }

    #[test]
    fn key_ref_is_none_when_name_is_missing_or_empty() {
        assert!(json!({"metadata": {}}).get_key_ref().is_none());
        assert!(json!({"metadata": {"name": ""}}).get_key_ref().is_none());
    }
}

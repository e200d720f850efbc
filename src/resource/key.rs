//! Every reconcile request identifies its resource by a key, which is the combination of the
//! `namespace` and `name` fields from the `metadata`. Keys carry no payload: reconcilers always
//! re-read the resource from the store.
//!
//! `ResourceKey` is the _owned_ form, which is what gets queued and passed to reconcilers.
//! `ResourceKeyRef` _borrows_ its fields, typically from a resource that was just read, so
//! logging and comparisons don't need to allocate.
//!
//! ### Cluster scoped resources
//!
//! Namespaces themselves are not namespaced, so their keys have an empty namespace. Both key
//! types represent a missing namespace as an empty string, and `namespace()` returns an
//! `Option<&str>` for callers that need to tell the difference.
use std::fmt::{self, Display};

/// An owned resource key
#[derive(Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> ResourceKey {
        ResourceKey {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// key for a resource that does not live in a namespace
    pub fn cluster_scoped(name: impl Into<String>) -> ResourceKey {
        ResourceKey::new(String::new(), name)
    }

    pub fn as_key_ref(&self) -> ResourceKeyRef {
        ResourceKeyRef {
            namespace: &self.namespace,
            name: &self.name,
        }
    }

    /// Returns the namespace, or None if it is empty
    pub fn namespace(&self) -> Option<&str> {
        self.as_key_ref().namespace()
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.as_key_ref().fmt(f)
    }
}

/// A key that borrows its fields
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct ResourceKeyRef<'a> {
    pub namespace: &'a str,
    pub name: &'a str,
}

impl<'a> ResourceKeyRef<'a> {
    pub fn new(namespace: &'a str, name: &'a str) -> ResourceKeyRef<'a> {
        ResourceKeyRef { namespace, name }
    }

    pub fn to_owned(&self) -> ResourceKey {
        ResourceKey::new(self.namespace, self.name)
    }

    pub fn namespace(&self) -> Option<&'a str> {
        if self.namespace.is_empty() {
            None
        } else {
            Some(self.namespace)
        }
    }

    pub fn name(&self) -> &'a str {
        self.name
    }
}

impl<'a> Display for ResourceKeyRef<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl<'a> PartialEq<ResourceKeyRef<'a>> for ResourceKey {
    fn eq(&self, other: &ResourceKeyRef<'a>) -> bool {
        self.namespace == other.namespace && self.name == other.name
    }
}

impl<'a> PartialEq<ResourceKey> for ResourceKeyRef<'a> {
    fn eq(&self, other: &ResourceKey) -> bool {
        self.namespace == other.namespace && self.name == other.name
    }
}

impl<'a> From<&'a ResourceKey> for ResourceKeyRef<'a> {
    fn from(key: &'a ResourceKey) -> ResourceKeyRef<'a> {
        key.as_key_ref()
    }
}

impl<'a> From<(&'a str, &'a str)> for ResourceKeyRef<'a> {
    fn from((namespace, name): (&'a str, &'a str)) -> ResourceKeyRef<'a> {
        ResourceKeyRef { namespace, name }
    }
}

impl<'a> From<(&'a str, &'a str)> for ResourceKey {
    fn from((namespace, name): (&'a str, &'a str)) -> ResourceKey {
        ResourceKey::new(namespace, name)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    #[test]
    fn key_has_same_hash_as_ref() {
        let key = ResourceKey::new("foo", "bar");
        let key_ref = key.as_key_ref();

        assert_eq!(hash(&key), hash(&key_ref));
        assert_eq!(&key, &key_ref);
    }

    #[test]
    fn cluster_scoped_keys_display_only_the_name() {
        let key = ResourceKey::cluster_scoped("alpha");
        assert_eq!(None, key.namespace());
        assert_eq!("alpha", key.to_string());
        assert_eq!("alpha/beta", ResourceKey::new("alpha", "beta").to_string());
    }

    fn hash<T: Hash>(obj: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        obj.hash(&mut hasher);
        hasher.finish()
    }
}

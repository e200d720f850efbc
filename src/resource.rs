//! Typed views of the two resource kinds this operator reconciles. Only the fields the
//! reconcilers actually look at are modeled. Everything else is captured in `other` maps and
//! written back untouched, so reading and then updating a resource never drops data that
//! some other controller put there.
pub mod json_ext;
pub mod key;

pub use self::key::{ResourceKey, ResourceKeyRef};

use crate::k8s_types::{self, K8sType};

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use std::collections::BTreeMap;

pub type JsonObject = serde_json::Map<String, Value>;

/// Labels and annotations are both plain string maps. `BTreeMap` keeps serialization and
/// iteration order stable, which the last-applied snapshot relies on.
pub type StringMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: StringMap,

    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: StringMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Set by the api server once deletion has been requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<String>,

    #[serde(flatten)]
    pub other: JsonObject,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> ObjectMeta {
        ObjectMeta {
            name: name.into(),
            ..Default::default()
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let opt = Option::<T>::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

/// Common behavior of the typed resources that are read from and written to a `ResourceStore`
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn k8s_type() -> &'static K8sType;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> ResourceKeyRef<'_> {
        let meta = self.metadata();
        ResourceKeyRef::new(meta.namespace.as_deref().unwrap_or(""), meta.name.as_str())
    }

    /// true once the resource carries a deletion marker
    fn is_being_deleted(&self) -> bool {
        self.metadata().deletion_timestamp.is_some()
    }
}

fn v1() -> String {
    "v1".to_owned()
}

fn namespace_kind() -> String {
    "Namespace".to_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    #[serde(default = "v1")]
    pub api_version: String,
    #[serde(default = "namespace_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub other: JsonObject,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Namespace {
        Namespace {
            api_version: v1(),
            kind: namespace_kind(),
            metadata: ObjectMeta::named(name),
            other: JsonObject::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.annotations.insert(key.into(), value.into());
        self
    }

    pub fn labels(&self) -> &StringMap {
        &self.metadata.labels
    }

    pub fn annotations(&self) -> &StringMap {
        &self.metadata.annotations
    }
}

impl Resource for Namespace {
    fn k8s_type() -> &'static K8sType {
        k8s_types::core::v1::Namespace
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn key(&self) -> ResourceKeyRef<'_> {
        // namespaces are cluster scoped, regardless of what might be in metadata.namespace
        ResourceKeyRef::new("", self.metadata.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TestSpec {
    #[serde(default)]
    pub size: i32,
    #[serde(flatten)]
    pub other: JsonObject,
}

/// An instance of the `Test` custom resource. It's read-only as far as this operator is
/// concerned, so the status is just carried along as raw json.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResource {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: TestSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
    #[serde(flatten)]
    pub other: JsonObject,
}

impl TestResource {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, size: i32) -> TestResource {
        let test_type = k8s_types::demo_com_example::v1alpha1::Test;
        let mut metadata = ObjectMeta::named(name);
        metadata.namespace = Some(namespace.into());
        TestResource {
            api_version: test_type.format_api_version(),
            kind: test_type.kind.to_owned(),
            metadata,
            spec: TestSpec {
                size,
                other: JsonObject::new(),
            },
            status: None,
            other: JsonObject::new(),
        }
    }
}

impl Resource for TestResource {
    fn k8s_type() -> &'static K8sType {
        k8s_types::demo_com_example::v1alpha1::Test
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

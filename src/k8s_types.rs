use std::fmt::{self, Display};

/// A basic description of a Kubernetes resource type, with just enough information to build api
/// server urls and to dispatch events to the right reconciler. Everything is `&'static str` so
/// types can be declared as statics and passed around by reference:
///
/// ```no_run
/// use namespace_operator::k8s_types::K8sType;
///
/// pub static MY_CRD: &K8sType = &K8sType {
///     group: "example.com",
///     version: "v1",
///     kind: "MyCrd",
///     plural_kind: "mycrds",
///     namespaced: true,
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct K8sType {
    /// Api group, empty for the core group
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural_kind: &'static str,
    /// Whether instances live inside a namespace. Cluster scoped resources always use an
    /// empty namespace in their keys.
    pub namespaced: bool,
}

impl K8sType {
    pub fn format_api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_owned()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl Display for K8sType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.plural_kind)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.plural_kind)
        }
    }
}

pub mod core {
    pub mod v1 {
        use crate::k8s_types::K8sType;

        #[allow(non_upper_case_globals)]
        pub static Namespace: &K8sType = &K8sType {
            group: "",
            version: "v1",
            kind: "Namespace",
            plural_kind: "namespaces",
            namespaced: false,
        };
    }
}

pub mod demo_com_example {
    pub mod v1alpha1 {
        use crate::k8s_types::K8sType;

        /// The `Test` custom resource. Each instance gets a companion Namespace of the same name.
        #[allow(non_upper_case_globals)]
        pub static Test: &K8sType = &K8sType {
            group: "demo.com.example",
            version: "v1alpha1",
            kind: "Test",
            plural_kind: "tests",
            namespaced: true,
        };
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn api_version_includes_group_only_when_present() {
        assert_eq!("v1", core::v1::Namespace.format_api_version());
        assert_eq!(
            "demo.com.example/v1alpha1",
            demo_com_example::v1alpha1::Test.format_api_version()
        );
    }
}

use crate::context::Context;
use crate::error::ReconcileError;
use crate::k8s_types::{self, K8sType};
use crate::reconcile::{Outcome, Reconciler, SkipReason};
use crate::resource::{Namespace, Resource, ResourceKey, TestResource};
use crate::store::{self, ResourceStore};

use async_trait::async_trait;
use regex::Regex;

use std::sync::Arc;

/// Label set on every companion namespace, with the operator name as its value
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Label set on every companion namespace, with the name of the Test resource as its value
pub const TEST_NAME_LABEL: &str = "demo.com.example/test";

const MAX_NAMESPACE_NAME_LEN: usize = 63;

lazy_static! {
    static ref DNS_LABEL: Regex = Regex::new("^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap();
}

/// Namespace names must be valid DNS-1123 labels
fn is_valid_namespace_name(name: &str) -> bool {
    name.len() <= MAX_NAMESPACE_NAME_LEN && DNS_LABEL.is_match(name)
}

/// Creates a companion namespace, named after the Test resource, for every Test resource
pub struct TestResourceReconciler {
    store: Arc<dyn ResourceStore>,
    operator_name: String,
}

impl TestResourceReconciler {
    pub fn new(store: Arc<dyn ResourceStore>, operator_name: impl Into<String>) -> TestResourceReconciler {
        TestResourceReconciler {
            store,
            operator_name: operator_name.into(),
        }
    }

    fn companion_for(&self, test: &TestResource) -> Result<Namespace, ReconcileError> {
        let name = test.metadata().name.as_str();
        if !is_valid_namespace_name(name) {
            return Err(ReconcileError::InvalidCompanionName(name.to_owned()));
        }
        Ok(Namespace::new(name)
            .with_label(MANAGED_BY_LABEL, self.operator_name.as_str())
            .with_label(TEST_NAME_LABEL, name))
    }
}

#[async_trait]
impl Reconciler for TestResourceReconciler {
    fn kind(&self) -> &'static K8sType {
        k8s_types::demo_com_example::v1alpha1::Test
    }

    async fn reconcile(&self, key: &ResourceKey, ctx: &Context) -> Result<Outcome, ReconcileError> {
        let test = match store::get::<TestResource>(&*self.store, key, ctx).await {
            Ok(test) => test,
            Err(err) if err.is_not_found() => {
                log::info!(
                    "Test resource '{}' not found, it was probably deleted after the reconcile was triggered",
                    key
                );
                return Ok(Outcome::Skipped(SkipReason::NotFound));
            }
            Err(err) => {
                log::error!("Failed to get Test resource '{}': {}", key, err);
                return Err(err.into());
            }
        };

        let companion = self.companion_for(&test)?;
        let companion_key = companion.key().to_owned();

        match store::create(&*self.store, &companion, ctx).await {
            Ok(_) => {
                log::info!("Created namespace '{}' for Test resource '{}'", companion_key, key);
                Ok(Outcome::Created(companion_key))
            }
            Err(err) if err.is_already_exists() => {
                log::debug!(
                    "Namespace '{}' for Test resource '{}' already exists",
                    companion_key,
                    key
                );
                Ok(Outcome::Skipped(SkipReason::CompanionExists))
            }
            Err(err) => {
                log::warn!(
                    "Failed to create namespace '{}' for Test resource '{}': {}",
                    companion_key,
                    key,
                    err
                );
                Err(err.into())
            }
        }
    }
}

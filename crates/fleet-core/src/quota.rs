//! Quota / entitlement collaborator.

use std::collections::HashSet;
use std::sync::RwLock;

use crate::provider::ProviderFuture;

/// Answers whether an organization is still entitled to a billing model.
pub trait QuotaService: Send + Sync {
    fn is_entitlement_active<'a>(
        &'a self,
        organization_id: &'a str,
        billing_model: &'a str,
    ) -> ProviderFuture<'a, bool>;
}

/// Entitlements from a fixed list of lapsed organizations.
#[derive(Debug, Default)]
pub struct StaticQuota {
    inactive: RwLock<HashSet<String>>,
}

impl StaticQuota {
    pub fn new<I, S>(inactive_organizations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inactive: RwLock::new(inactive_organizations.into_iter().map(Into::into).collect()),
        }
    }

    /// Mark an organization's entitlement as lapsed.
    pub fn deactivate(&self, organization_id: &str) {
        if let Ok(mut inactive) = self.inactive.write() {
            inactive.insert(organization_id.to_string());
        }
    }

    pub fn reactivate(&self, organization_id: &str) {
        if let Ok(mut inactive) = self.inactive.write() {
            inactive.remove(organization_id);
        }
    }
}

impl QuotaService for StaticQuota {
    fn is_entitlement_active<'a>(
        &'a self,
        organization_id: &'a str,
        _billing_model: &'a str,
    ) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            let inactive = match self.inactive.read() {
                Ok(guard) => guard.contains(organization_id),
                Err(poisoned) => poisoned.into_inner().contains(organization_id),
            };
            Ok(!inactive)
        })
    }
}

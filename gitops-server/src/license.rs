use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    MultiTenancy,
}

impl Feature {
    /// Message returned to callers who hit a feature their plan lacks.
    pub fn access_error_message(&self) -> String {
        format!("{} is a enterprise feature, please upgrade to access it.", self)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::MultiTenancy => f.write_str("bb.feature.multi-tenancy"),
        }
    }
}

pub trait LicenseService: Send + Sync {
    fn is_feature_enabled(&self, feature: Feature) -> bool;
}

/// License fixed at startup from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticLicense {
    pub multi_tenancy: bool,
}

impl LicenseService for StaticLicense {
    fn is_feature_enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::MultiTenancy => self.multi_tenancy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_license() {
        assert!(!StaticLicense::default().is_feature_enabled(Feature::MultiTenancy));
        assert!(StaticLicense { multi_tenancy: true }.is_feature_enabled(Feature::MultiTenancy));
    }

    #[test]
    fn test_access_error_message_names_feature() {
        assert!(Feature::MultiTenancy
            .access_error_message()
            .starts_with("bb.feature.multi-tenancy"));
    }
}

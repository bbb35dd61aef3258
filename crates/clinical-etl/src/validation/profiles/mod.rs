//! Target-schema profiles: which component to use and how to validate it.

mod genomic;
mod moh;

use super::rules::RuleTable;

/// Name of the profile used when a manifest does not pick one.
pub const DEFAULT_PROFILE: &str = "MoHSchemaV3";

/// A rule table bound to one schema component.
#[derive(Debug, Clone)]
pub struct Profile {
    /// Schema class name, written to the output as `schema_class`.
    pub name: String,
    /// OpenAPI component records are validated against.
    pub component: String,
    /// Prefix of generated template lines (`DONOR.INDEX...`).
    pub base_name: String,
    pub rules: RuleTable,
}

impl Profile {
    /// Look up a profile by schema class name.
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "MoHSchemaV3" => Some(Self::moh_v3()),
            "GenomicSchema" => Some(Self::genomic()),
            _ => None,
        }
    }

    /// All profile names.
    pub fn names() -> &'static [&'static str] {
        &["MoHSchemaV3", "GenomicSchema"]
    }

    /// Clinical donor records with MoH v3 business rules.
    pub fn moh_v3() -> Self {
        Self {
            name: "MoHSchemaV3".to_string(),
            component: "DonorWithClinicalDataSchema".to_string(),
            base_name: "DONOR".to_string(),
            rules: moh::rules(),
        }
    }

    /// Genomic file to sample pairings.
    pub fn genomic() -> Self {
        Self {
            name: "GenomicSchema".to_string(),
            component: "GenomicSample".to_string(),
            base_name: "GENOMIC_ID".to_string(),
            rules: genomic::rules(),
        }
    }

    /// Key the root records are written under in the map output.
    pub fn root_key(&self) -> &str {
        self.rules.root_name()
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::moh_v3()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(Profile::by_name("GenomicSchema").unwrap().root_key(), "genomic_ids");
        assert_eq!(Profile::by_name(DEFAULT_PROFILE).unwrap().root_key(), "donors");
        assert!(Profile::by_name("MoHSchemaV1").is_none());
    }

    #[test]
    fn test_nested_types_have_rules() {
        for name in Profile::names() {
            let profile = Profile::by_name(name).unwrap();
            for tag in profile.rules.tags() {
                for nested in &profile.rules.get(tag).unwrap().nested_types {
                    assert!(profile.rules.get(nested).is_some(), "{name}: {nested}");
                }
            }
        }
    }
}

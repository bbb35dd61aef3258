use crate::validation::rules::{RuleTable, ValidationRule};

pub(super) fn rules() -> RuleTable {
    RuleTable::new()
        .with(
            "genomic_ids",
            ValidationRule::new(Some("genomic_file_id"), "Genomic File ID").nested(&["samples"]),
        )
        .with(
            "samples",
            ValidationRule::new(Some("submitter_sample_id"), "Submitter Sample Pairing")
                .required(&["genomic_file_sample_id"]),
        )
}

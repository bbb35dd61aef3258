//! MoH clinical data model v3: rule table and business rules.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::validation::rules::{
    DatePoint, RuleContext, RuleTable, ValidationRule, has, is_no, is_yes,
};

const PROGRESSION_STATES: &[&str] = &[
    "Distant progression",
    "Loco-regional progression",
    "Progression not otherwise specified",
    "Relapse or recurrence",
];

const SMOKER_STATES: &[&str] = &[
    "Current reformed smoker for <= 15 years",
    "Current reformed smoker for > 15 years",
    "Current reformed smoker, duration not specified",
    "Current smoker",
];

const TUMOUR_SPECIMEN_FIELDS: &[&str] = &[
    "reference_pathology_confirmed_diagnosis",
    "reference_pathology_confirmed_tumour_presence",
    "tumour_grading_system",
    "tumour_grade",
    "percent_tumour_cells_range",
    "percent_tumour_cells_measurement_method",
];

pub(super) fn rules() -> RuleTable {
    RuleTable::new()
        .with(
            "donors",
            ValidationRule::new(Some("submitter_donor_id"), "Donor")
                .required(&[
                    "submitter_donor_id",
                    "gender",
                    "sex_at_birth",
                    "is_deceased",
                    "program_id",
                    "date_resolution",
                    "date_of_birth",
                ])
                .nested(&[
                    "primary_diagnoses",
                    "comorbidities",
                    "exposures",
                    "biomarkers",
                    "followups",
                ])
                .with_handler(donors),
        )
        .with(
            "primary_diagnoses",
            ValidationRule::new(Some("submitter_primary_diagnosis_id"), "Primary Diagnosis")
                .required(&[
                    "submitter_primary_diagnosis_id",
                    "date_of_diagnosis",
                    "cancer_type_code",
                    "primary_site",
                    "basis_of_diagnosis",
                ])
                .nested(&["specimens", "treatments", "biomarkers", "followups"])
                .with_handler(primary_diagnoses),
        )
        .with(
            "specimens",
            ValidationRule::new(Some("submitter_specimen_id"), "Specimen")
                .required(&[
                    "submitter_specimen_id",
                    "specimen_collection_date",
                    "specimen_storage",
                    "specimen_anatomic_location",
                ])
                .nested(&["sample_registrations", "biomarkers"])
                .with_handler(specimens),
        )
        .with(
            "sample_registrations",
            ValidationRule::new(Some("submitter_sample_id"), "Sample Registration").required(&[
                "submitter_sample_id",
                "specimen_tissue_source",
                "specimen_type",
                "sample_type",
            ]),
        )
        .with(
            "treatments",
            ValidationRule::new(Some("submitter_treatment_id"), "Treatment")
                .required(&[
                    "submitter_treatment_id",
                    "treatment_type",
                    "is_primary_treatment",
                    "treatment_start_date",
                    "treatment_end_date",
                    "treatment_intent",
                ])
                .nested(&[
                    "systemic_therapies",
                    "radiations",
                    "surgeries",
                    "followups",
                    "biomarkers",
                ])
                .with_handler(treatments),
        )
        .with(
            "systemic_therapies",
            ValidationRule::new(None, "Systemic Therapy")
                .required(&[
                    "systemic_therapy_type",
                    "start_date",
                    "end_date",
                    "drug_reference_database",
                    "drug_reference_identifier",
                    "drug_name",
                ])
                .with_handler(systemic_therapies),
        )
        .with(
            "radiations",
            ValidationRule::new(None, "Radiation")
                .required(&[
                    "radiation_therapy_modality",
                    "radiation_therapy_type",
                    "anatomical_site_irradiated",
                    "radiation_therapy_fractions",
                    "radiation_therapy_dosage",
                ])
                .with_handler(radiations),
        )
        .with(
            "surgeries",
            ValidationRule::new(None, "Surgery").required(&[
                "surgery_reference_database",
                "surgery_reference_identifier",
                "surgery_type",
            ]),
        )
        .with(
            "biomarkers",
            ValidationRule::new(None, "Biomarker").with_handler(biomarkers),
        )
        .with(
            "followups",
            ValidationRule::new(Some("submitter_follow_up_id"), "Follow Up")
                .required(&[
                    "submitter_follow_up_id",
                    "date_of_followup",
                    "disease_status_at_followup",
                ])
                .nested(&["biomarkers"])
                .with_handler(followups),
        )
        .with(
            "comorbidities",
            ValidationRule::new(None, "Comorbidity")
                .required(&["comorbidity_type_code"])
                .with_handler(comorbidities),
        )
        .with(
            "exposures",
            ValidationRule::new(None, "Exposure").with_handler(exposures),
        )
}

fn items<'a>(node: &'a Map<String, Value>, field: &str) -> &'a [Value] {
    node.get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn text_of(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn is_after(a: Option<DatePoint>, b: Option<DatePoint>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a > b)
}

fn is_before(a: Option<DatePoint>, b: Option<DatePoint>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a < b)
}

fn donors(node: &Map<String, Value>, ctx: &mut RuleContext) {
    let is_deceased = node.get("is_deceased");
    for key in node.keys() {
        match key.as_str() {
            "is_deceased" => {
                if is_yes(is_deceased) {
                    if !node.contains_key("cause_of_death") {
                        ctx.warn("cause_of_death required if is_deceased = Yes");
                    }
                    if !node.contains_key("date_of_death") {
                        ctx.warn("date_of_death required if is_deceased = Yes");
                    }
                }
            }
            "lost_to_followup_after_clinical_event_identifier" => {
                if has(node, key) && is_yes(is_deceased) {
                    ctx.fail(
                        "lost_to_followup_after_clinical_event_identifier cannot be present if is_deceased = Yes",
                    );
                }
            }
            "lost_to_followup_reason" => {
                if has(node, key)
                    && !node.contains_key("lost_to_followup_after_clinical_event_identifier")
                {
                    ctx.fail(
                        "lost_to_followup_reason should only be submitted if lost_to_followup_after_clinical_event_identifier is submitted",
                    );
                }
            }
            "date_alive_after_lost_to_followup" => {
                if has(node, key)
                    && !node.contains_key("lost_to_followup_after_clinical_event_identifier")
                {
                    ctx.warn(
                        "lost_to_followup_after_clinical_event_identifier is required if date_alive_after_lost_to_followup is submitted",
                    );
                }
            }
            "cause_of_death" => {
                if has(node, key) && is_no(is_deceased) {
                    ctx.fail("cause_of_death should only be submitted if is_deceased = Yes");
                }
            }
            "primary_diagnoses" => diagnosis_timeline(node, ctx),
            "date_of_death" => {
                if has(node, key) && is_no(is_deceased) {
                    ctx.fail("date_of_death should only be submitted if is_deceased = Yes");
                }
                let birth = ctx.date_point(node.get("date_of_birth"));
                let death = ctx.date_point(node.get("date_of_death"));
                let alive = ctx.date_point(node.get("date_alive_after_lost_to_followup"));
                if is_after(birth, death) {
                    ctx.fail("date_of_death cannot be earlier than date_of_birth");
                }
                if is_after(alive, death) {
                    ctx.fail("date_alive_after_lost_to_followup cannot be after date_of death");
                }
                if is_before(alive, birth) {
                    ctx.fail("date_alive_after_lost_to_followup cannot be before date_of birth");
                }
            }
            "biomarkers" => {
                for item in items(node, key) {
                    if item.get("test_date").is_none_or(Value::is_null) {
                        ctx.warn("test_date is required for biomarkers not associated with nested events");
                    }
                }
            }
            _ => {}
        }
    }
}

/// Diagnosis and treatment dates checked against the donor's birth and death.
fn diagnosis_timeline(node: &Map<String, Value>, ctx: &mut RuleContext) {
    let diagnoses = items(node, "primary_diagnoses");
    if diagnoses.is_empty() {
        return;
    }
    let birth = ctx.date_point(node.get("date_of_birth"));
    let death = ctx.date_point(node.get("date_of_death"));

    let mut diagnosis_dates: IndexMap<String, DatePoint> = IndexMap::new();
    for diagnosis in diagnoses {
        let pd = text_of(diagnosis.get("submitter_primary_diagnosis_id"));
        let diagnosed = ctx.date_point(diagnosis.get("date_of_diagnosis"));
        if let Some(date) = diagnosed {
            diagnosis_dates.insert(pd.clone(), date);
            if is_after(diagnosed, death) {
                ctx.fail(format!("{pd}: date_of_death cannot be earlier than date_of_diagnosis"));
            }
            if is_before(diagnosed, birth) {
                ctx.fail(format!("{pd}: date_of_birth cannot be later than date_of_diagnosis"));
            }
        }

        for treatment in diagnosis
            .get("treatments")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let tr = text_of(treatment.get("submitter_treatment_id"));
            let start = ctx.date_point(treatment.get("treatment_start_date"));
            let end = ctx.date_point(treatment.get("treatment_end_date"));
            if is_after(end, death) {
                ctx.fail(format!(
                    "{pd} > {tr}: date_of_death cannot be earlier than treatment_end_date"
                ));
            }
            if is_before(end, diagnosed) {
                ctx.warn(format!(
                    "{pd} > {tr}: date_of_diagnosis should be earlier than treatment_end_date"
                ));
            }
            if is_after(start, death) {
                ctx.fail(format!("{pd} > {tr}: treatment_start_date cannot be after date_of_death"));
            }
            if is_before(start, birth) {
                ctx.fail(format!("{pd} > {tr}: treatment_start_date cannot be before date_of_birth"));
            }
            if is_before(start, diagnosed) {
                ctx.warn(format!(
                    "{pd} > {tr}: treatment_start_date should not be before date_of_diagnosis"
                ));
            }
        }
    }

    let first_is_interval = matches!(diagnosis_dates.values().next(), Some(DatePoint::Interval(_)));
    if first_is_interval && !diagnosis_dates.values().any(|d| *d == DatePoint::Interval(0)) {
        let intervals: Map<String, Value> = diagnosis_dates
            .iter()
            .map(|(id, date)| {
                let value = match date {
                    DatePoint::Interval(months) => Value::from(*months),
                    DatePoint::Date(date) => Value::from(date.to_string()),
                };
                (id.clone(), value)
            })
            .collect();
        ctx.warn(format!(
            "Earliest primary_diagnosis.date_of_diagnosis.month_interval should be 0, current month_intervals: {}",
            Value::Object(intervals)
        ));
    }
}

fn primary_diagnoses(node: &Map<String, Value>, ctx: &mut RuleContext) {
    if !node.contains_key("clinical_tumour_staging_system")
        && !node.contains_key("pathological_tumour_staging_system")
    {
        ctx.warn(
            "Either clinical_tumour_staging_system or pathological_tumour_staging_system is required",
        );
    }
    for key in node.keys() {
        match key.as_str() {
            "clinical_tumour_staging_system" => staging_system(node, "clinical", ctx),
            "pathological_tumour_staging_system" => staging_system(node, "pathological", ctx),
            _ => {}
        }
    }
}

fn staging_system(node: &Map<String, Value>, staging: &str, ctx: &mut RuleContext) {
    let Some(system) = node
        .get(&format!("{staging}_tumour_staging_system"))
        .and_then(Value::as_str)
    else {
        return;
    };
    if system.contains("AJCC") {
        for category in ["t_category", "n_category", "m_category"] {
            if !has(node, &format!("{staging}_{category}")) {
                ctx.warn(format!(
                    "{staging}_{category} is required if {staging}_tumour_staging_system is AJCC"
                ));
            }
        }
    } else if !has(node, &format!("{staging}_stage_group")) {
        ctx.warn(format!(
            "{staging}_stage_group is required for {staging}_tumour_staging_system {system}"
        ));
    }
}

fn specimens(node: &Map<String, Value>, ctx: &mut RuleContext) {
    let tumour = items(node, "sample_registrations")
        .iter()
        .any(|s| s.get("tumour_normal_designation").and_then(Value::as_str) == Some("Tumour"));
    if tumour {
        for field in TUMOUR_SPECIMEN_FIELDS {
            if !node.contains_key(*field) {
                ctx.warn(format!("Tumour specimens require a {field}"));
            }
        }
    }
}

fn treatments(node: &Map<String, Value>, ctx: &mut RuleContext) {
    for key in node.keys() {
        match key.as_str() {
            "treatment_type" => {
                let types: Vec<&str> = match node.get(key) {
                    Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).collect(),
                    Some(Value::String(s)) => vec![s.as_str()],
                    _ => Vec::new(),
                };
                for treatment_type in types {
                    let (nested, message) = match treatment_type {
                        "Systemic therapy" => (
                            "systemic_therapies",
                            "Treatment type Systemic therapy should have one or more systemic therapies submitted",
                        ),
                        "Radiation therapy" => (
                            "radiations",
                            "Treatment type Radiation therapy should have one or more radiation submitted",
                        ),
                        "Surgery" => (
                            "surgeries",
                            "Treatment type Surgery should have one or more surgery submitted",
                        ),
                        _ => continue,
                    };
                    if items(node, nested).is_empty() {
                        ctx.warn(message);
                    }
                }
            }
            "treatment_start_date" => {
                if !has(node, "treatment_start_date") || !has(node, "treatment_end_date") {
                    continue;
                }
                let start = ctx.date_point(node.get("treatment_start_date"));
                let end = ctx.date_point(node.get("treatment_end_date"));
                if is_after(start, end) {
                    ctx.fail("Treatment start cannot be after treatment end.");
                }
                for therapy in items(node, "systemic_therapies") {
                    if is_before(ctx.date_point(therapy.get("start_date")), start) {
                        ctx.fail("Systemic therapy start date cannot be earlier than its treatment start date.");
                    }
                    if is_after(ctx.date_point(therapy.get("end_date")), end) {
                        ctx.fail("Systemic therapy end date cannot be after its treatment end date.");
                    }
                }
            }
            _ => {}
        }
    }
}

fn systemic_therapies(node: &Map<String, Value>, ctx: &mut RuleContext) {
    if !has(node, "drug_dose_units") {
        for dose in ["prescribed_cumulative_drug_dose", "actual_cumulative_drug_dose"] {
            if has(node, dose) {
                ctx.warn(format!("drug_dose_units required if {dose} is submitted"));
            }
        }
    }
    let start = ctx.date_point(node.get("start_date"));
    let end = ctx.date_point(node.get("end_date"));
    if is_after(start, end) {
        ctx.fail("Systemic therapy start cannot be after systemic therapy end.");
    }
}

fn radiations(node: &Map<String, Value>, ctx: &mut RuleContext) {
    if is_yes(node.get("radiation_boost")) && !has(node, "reference_radiation_treatment_id") {
        ctx.warn("reference_radiation_treatment_id required if radiation_boost = Yes");
    }
}

fn followups(node: &Map<String, Value>, ctx: &mut RuleContext) {
    let Some(status) = node
        .get("disease_status_at_followup")
        .and_then(Value::as_str)
        .filter(|s| PROGRESSION_STATES.contains(s))
    else {
        return;
    };
    for field in ["relapse_type", "date_of_relapse", "method_of_progression_status"] {
        if !node.contains_key(field) {
            ctx.warn(format!("{field} is required if disease_status_at_followup is {status}"));
        }
    }
    let relapse_type = node.get("relapse_type");
    if !node.contains_key("anatomic_site_progression_or_recurrence")
        && relapse_type.is_some()
        && relapse_type.and_then(Value::as_str) != Some("Biochemical progression")
    {
        ctx.warn(format!(
            "anatomic_site_progression_or_recurrence is required if disease_status_at_followup is {status}"
        ));
    }
}

fn biomarkers(node: &Map<String, Value>, ctx: &mut RuleContext) {
    if node.get("hpv_pcr_status").and_then(Value::as_str) == Some("Positive")
        && !node.contains_key("hpv_strain")
    {
        ctx.warn("If hpv_pcr_status is positive, hpv_strain is required");
    }
}

fn comorbidities(node: &Map<String, Value>, ctx: &mut RuleContext) {
    if node.contains_key("laterality_of_prior_malignancy") && !is_yes(node.get("prior_malignancy")) {
        ctx.fail("laterality_of_prior_malignancy should not be submitted unless prior_malignancy = Yes");
    }
}

fn exposures(node: &Map<String, Value>, ctx: &mut RuleContext) {
    let Some(status) = node.get("tobacco_smoking_status").filter(|v| !v.is_null()) else {
        ctx.warn("tobacco_smoking_status required for exposure");
        return;
    };
    let smoker = status.as_str().is_some_and(|s| SMOKER_STATES.contains(&s));
    if smoker {
        return;
    }
    let status = text_of(Some(status));
    for field in ["tobacco_type", "pack_years_smoked"] {
        if node.contains_key(field) {
            ctx.fail(format!("{field} cannot be submitted for tobacco_smoking_status = {status}"));
        }
    }
}

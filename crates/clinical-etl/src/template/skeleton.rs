//! Template skeletons derived from a schema component.

use crate::schema::{OpenApiSchema, Shape};
use crate::validation::{Profile, RuleTable};

/// Lines of a template skeleton with default mappings filled in.
struct Skeleton<'a> {
    rules: &'a RuleTable,
    lines: Vec<String>,
}

/// Write a template for every field of the profile's component.
///
/// Arrays of records become `INDEX` lines joined to their parent through
/// `indexed_on`, and every other field gets a default mapping chosen from
/// its name and type.
pub fn generate_template(schema: &OpenApiSchema, profile: &Profile) -> String {
    let mut lines = vec![format!("## Schema generated from {}", schema.source)];
    if let Some(sha) = &schema.commit_sha {
        lines.push(format!("## Based on repo commit sha \"{sha}\""));
    }
    lines.push("## Items are comma separated: element, mapping method".to_string());

    let rules = &profile.rules;
    let root_tag = rules.root_name();
    let root_id = rules
        .root()
        .and_then(|r| r.id_field.clone())
        .unwrap_or_else(|| format!("{}_id", root_tag.trim_end_matches('s')));
    let sheet = format!("{}_SHEET", profile.base_name);
    lines.push(format!(
        "{}.INDEX, {{indexed_on({sheet}.{root_id})}}",
        profile.base_name
    ));

    let mut skeleton = Skeleton { rules, lines };
    if let Shape::Object {
        properties,
        required,
    } = schema.shape(rules)
    {
        let path = format!("{}.INDEX", profile.base_name);
        skeleton.object(&path, root_tag, &properties, &required, &sheet, &root_id);
    }
    let mut text = skeleton.lines.join("\n");
    text.push('\n');
    text
}

impl Skeleton<'_> {
    fn object(
        &mut self,
        path: &str,
        tag: &str,
        properties: &indexmap::IndexMap<String, Shape>,
        required: &[String],
        sheet: &str,
        parent_id: &str,
    ) {
        let rule = self.rules.get(tag);
        let is_required = |name: &str| {
            required.iter().any(|r| r == name)
                || rule.is_some_and(|r| r.required_fields.iter().any(|f| f == name))
        };

        for (name, shape) in properties {
            let marker = if is_required(name) { "*" } else { "" };
            let field_path = format!("{path}.{name}");
            match shape {
                Shape::Array(items) => match items.as_ref() {
                    Shape::Object {
                        properties,
                        required,
                    } => {
                        let child_sheet = format!("{}_SHEET", name.to_uppercase());
                        self.lines.push(format!(
                            "{field_path}.INDEX{marker}, {{indexed_on({child_sheet}.{parent_id})}}"
                        ));
                        let child_id = self
                            .rules
                            .get(name)
                            .and_then(|r| r.id_field.as_deref())
                            .unwrap_or(parent_id);
                        self.object(
                            &format!("{field_path}.INDEX"),
                            name,
                            properties,
                            required,
                            &child_sheet,
                            child_id,
                        );
                    }
                    _ => self.lines.push(format!(
                        "{field_path}{marker}, {{list_val({sheet}.{name})}}"
                    )),
                },
                Shape::Object {
                    properties,
                    required,
                } => {
                    if is_date_name(name) {
                        self.lines.push(format!(
                            "{field_path}{marker}, {{date_interval({sheet}.{name})}}"
                        ));
                    } else {
                        self.lines.push(format!("{field_path}{marker},"));
                        self.object(&field_path, name, properties, required, sheet, parent_id);
                    }
                }
                Shape::Primitive(_) => {
                    let function = default_function(name);
                    self.lines.push(format!(
                        "{field_path}{marker}, {{{function}({sheet}.{name})}}"
                    ));
                }
            }
        }
    }
}

fn is_date_name(name: &str) -> bool {
    name.starts_with("date") || name.ends_with("date")
}

/// Default mapping function for a scalar field.
fn default_function(name: &str) -> &'static str {
    if is_date_name(name) {
        "single_date"
    } else if name.starts_with("is_") || name.starts_with("has_") {
        "boolean"
    } else if name.starts_with("number_") || name.starts_with("age_") || name.contains("_per_") {
        "integer"
    } else {
        "single_val"
    }
}

//! Builtin mapping functions.

use chrono::{NaiveDate, Utc};
use indexmap::IndexMap;
use serde_json::{Map, Number, Value, json};
use tracing::warn;

use super::dates::{self, DateOrder};
use super::{Cell, FunctionRegistry, IndexDescriptor, MappingEnv, MappingError, MappingResult, ValuesByParam};

pub(super) fn register_builtins(registry: &mut FunctionRegistry) {
    registry.register("single_val", |v, _| single_val(v));
    registry.register("list_val", |v, _| Ok(Value::Array(list_val(v))));
    registry.register("index_val", |v, _| Ok(Value::Array(list_val(v))));
    registry.register("flat_list_val", |v, _| Ok(flat_list_val(v)));
    registry.register("concat_vals", |v, _| Ok(concat_vals(v)));
    registry.register("boolean", |v, _| boolean(v));
    registry.register("integer", integer);
    registry.register("floating", floating);
    registry.register("has_value", |v, _| Ok(Value::Bool(has_value(v))));
    registry.register("pipe_delim", |v, _| pipe_delim(v));
    registry.register("placeholder", |v, _| Ok(json!({ "placeholder": v })));
    registry.register("ontology_placeholder", |v, _| {
        Ok(json!({ "id": "placeholder", "label": single_val(v)? }))
    });
    registry.register("date", date);
    registry.register("single_date", single_date);
    registry.register("earliest_date", earliest_date);
    registry.register("date_interval", date_interval);
    registry.register("int_to_date_interval_json", int_to_date_interval_json);
    registry.register("indexed_on", |v, _| Ok(indexed_on(v)));
    registry.register("moh_indexed_on_donor_if_others_absent", |v, _| {
        Ok(moh_indexed_on_donor_if_others_absent(v))
    });
}

fn first_param(values: &ValuesByParam) -> Option<(&str, &IndexMap<String, Cell>)> {
    values.first().map(|(param, sheets)| (param.as_str(), sheets))
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Every value of the first parameter, across all its sheets.
fn list_val(values: &ValuesByParam) -> Vec<Value> {
    first_param(values)
        .map(|(_, sheets)| sheets.values().flat_map(|c| c.values().cloned()).collect())
        .unwrap_or_default()
}

/// The one distinct non-null value of the first parameter.
pub(crate) fn single_val(values: &ValuesByParam) -> MappingResult {
    let mut unique: Vec<Value> = Vec::new();
    for item in list_val(values) {
        if !item.is_null() && !unique.contains(&item) {
            unique.push(item);
        }
    }
    if unique.len() > 1 {
        let param = first_param(values).map(|(p, _)| p).unwrap_or_default();
        let data = serde_json::to_string(values).unwrap_or_default();
        return Err(MappingError::new(format!(
            "More than one value was found for {param} in {data}"
        )));
    }
    Ok(match unique.pop() {
        Some(Value::String(s)) if s.eq_ignore_ascii_case("nan") => Value::Null,
        Some(v) => v,
        None => Value::Null,
    })
}

fn has_value(values: &ValuesByParam) -> bool {
    first_param(values).is_some_and(|(_, sheets)| {
        sheets.values().flat_map(Cell::values).any(|v| match v {
            Value::Null => false,
            Value::String(s) => !s.is_empty() && !s.eq_ignore_ascii_case("nan"),
            _ => true,
        })
    })
}

/// Expand stringified lists (`['a', 'b']` or `a, b`) into one flat list.
fn flat_list_val(values: &ValuesByParam) -> Value {
    let mut items = Vec::new();
    for item in list_val(values) {
        match item {
            Value::Null => {}
            Value::Array(inner) => items.extend(inner),
            Value::String(text) => {
                let text = text.trim();
                let parts = text
                    .strip_prefix('[')
                    .and_then(|rest| rest.strip_suffix(']'))
                    .unwrap_or(text);
                items.extend(
                    parts
                        .split(',')
                        .map(|p| p.trim().trim_matches(['\'', '"']).trim())
                        .filter(|p| !p.is_empty())
                        .map(|p| Value::String(p.to_string())),
                );
            }
            other => items.push(other),
        }
    }
    Value::Array(items)
}

fn concat_vals(values: &ValuesByParam) -> Value {
    let parts: Vec<String> = values
        .values()
        .flat_map(|sheets| sheets.values())
        .flat_map(Cell::values)
        .filter_map(as_text)
        .collect();
    if parts.is_empty() {
        Value::Null
    } else {
        Value::String(parts.join("_"))
    }
}

fn boolean(values: &ValuesByParam) -> MappingResult {
    Ok(match single_val(values)? {
        Value::Bool(b) => Value::Bool(b),
        Value::String(s) => match s.trim().to_ascii_lowercase().chars().next() {
            Some('n' | 'f') => Value::Bool(false),
            Some('y' | 't') => Value::Bool(true),
            _ => Value::Null,
        },
        _ => Value::Null,
    })
}

fn integer(values: &ValuesByParam, env: &MappingEnv<'_>) -> MappingResult {
    Ok(match single_val(values)? {
        Value::Null => Value::Null,
        Value::Number(n) => n
            .as_i64()
            .map(Value::from)
            .or_else(|| n.as_f64().map(|f| Value::from(f.trunc() as i64)))
            .unwrap_or(Value::Null),
        other => {
            let text = as_text(&other).unwrap_or_default();
            match text.trim().parse::<f64>() {
                Ok(f) if f.is_finite() => Value::from(f.trunc() as i64),
                _ => {
                    warn!(subject = env.subject, value = %text, "could not convert to an integer");
                    Value::Null
                }
            }
        }
    })
}

fn floating(values: &ValuesByParam, env: &MappingEnv<'_>) -> MappingResult {
    Ok(match single_val(values)? {
        Value::Null => Value::Null,
        Value::Number(n) => Value::Number(n),
        other => {
            let text = as_text(&other).unwrap_or_default();
            match text.trim().parse::<f64>().ok().and_then(Number::from_f64) {
                Some(n) => Value::Number(n),
                None => {
                    warn!(subject = env.subject, value = %text, "could not convert to a float");
                    Value::Null
                }
            }
        }
    })
}

fn pipe_delim(values: &ValuesByParam) -> MappingResult {
    Ok(match as_text(&single_val(values)?) {
        Some(text) => Value::Array(text.split('|').map(|s| Value::String(s.to_string())).collect()),
        None => Value::Null,
    })
}

/// Format a date-like string as `YYYY-MM`. Text without digits passes
/// through unchanged.
fn format_month(text: &str, order: DateOrder) -> MappingResult {
    if !text.chars().any(|c| c.is_ascii_digit()) {
        return Ok(Value::String(text.to_string()));
    }
    dates::parse_date(text, order)
        .map(|d| Value::String(d.format("%Y-%m").to_string()))
        .ok_or_else(|| MappingError::new(format!("error in date({text}): unrecognised date format")))
}

fn date(values: &ValuesByParam, env: &MappingEnv<'_>) -> MappingResult {
    list_val(values)
        .iter()
        .map(|v| match as_text(v) {
            Some(text) => format_month(&text, env.date_order),
            None => Ok(Value::Null),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

fn single_date(values: &ValuesByParam, env: &MappingEnv<'_>) -> MappingResult {
    match as_text(&single_val(values)?) {
        Some(text) => format_month(&text, env.date_order),
        None => Ok(Value::Null),
    }
}

fn parse_or_fail(text: &str, order: DateOrder) -> Result<NaiveDate, MappingError> {
    dates::parse_date(text, order).ok_or_else(|| MappingError::new(format!("Cannot parse date '{text}'")))
}

/// `{offset, period}` where offset is the earliest of the dates in the
/// second parameter (today if none are earlier) and period is the first
/// parameter's date resolution.
fn earliest_date(values: &ValuesByParam, env: &MappingEnv<'_>) -> MappingResult {
    let mut params = values.values();
    let (Some(resolution), Some(dates)) = (params.next(), params.next()) else {
        return Err(MappingError::new(
            "earliest_date needs a date resolution and a list of dates",
        ));
    };
    let period = resolution
        .values()
        .next()
        .and_then(|cell| cell.values().find(|v| !v.is_null()).cloned())
        .unwrap_or(Value::Null);

    let mut earliest = Utc::now().date_naive();
    if let Some(cell) = dates.values().next() {
        for text in cell.values().filter_map(as_text) {
            let d = parse_or_fail(&text, env.date_order)?;
            if d < earliest {
                earliest = d;
            }
        }
    }

    Ok(json!({
        "offset": earliest.format("%Y-%m-%d").to_string(),
        "period": period,
    }))
}

/// Month (and, for day resolution, day) distance from the reference date.
fn date_interval(values: &ValuesByParam, env: &MappingEnv<'_>) -> MappingResult {
    let reference = env.reference_date.ok_or_else(|| {
        MappingError::new(
            "No reference date found to calculate date_interval: is there a reference_date specified in the manifest?",
        )
    })?;
    let Some(endpoint) = as_text(&single_val(values)?) else {
        return Ok(Value::Null);
    };
    let date = parse_or_fail(&endpoint, env.date_order)?;
    let offset = reference
        .get("offset")
        .and_then(Value::as_str)
        .and_then(|s| dates::parse_date(s, DateOrder::Ymd))
        .unwrap_or(date);

    let (months, days) = dates::interval(offset, date);
    let mut result = Map::new();
    result.insert("month_interval".to_string(), Value::from(months));
    if reference.get("period").and_then(Value::as_str) == Some("day") {
        result.insert("day_interval".to_string(), Value::from(days));
    }
    Ok(Value::Object(result))
}

/// Whole months in a day count, at 30 days a month and 365 a year.
fn months_from_days(days: i64) -> i64 {
    let sign = if days < 0 { -1 } else { 1 };
    let abs = days.abs();
    if abs <= 365 {
        sign * (abs / 30)
    } else {
        sign * (12 * (abs / 365) + (abs % 365) / 30)
    }
}

fn date_resolution(env: &MappingEnv<'_>) -> Option<String> {
    let first_value = |sheet: &str| {
        env.data
            .column(sheet, env.subject, "date_resolution")
            .and_then(|vals| vals.iter().flatten().next().cloned())
    };
    first_value("Donor").or_else(|| {
        env.data
            .sheets_with("date_resolution")
            .iter()
            .find_map(|sheet| first_value(sheet))
    })
}

fn int_to_date_interval_json(values: &ValuesByParam, env: &MappingEnv<'_>) -> MappingResult {
    let Some(n) = integer(values, env)?.as_i64() else {
        return Ok(Value::Null);
    };
    let resolution = date_resolution(env).ok_or_else(|| {
        MappingError::new(
            "No date_resolution found to specify date interval resolution: is there a date_resolution specified in the donor file?",
        )
    })?;
    match resolution.as_str() {
        "month" => Ok(json!({ "month_interval": n })),
        "day" => Ok(json!({ "day_interval": n, "month_interval": months_from_days(n) })),
        other => Err(MappingError::new(format!(
            "date_resolution '{other}' must be either 'month' or 'day'"
        ))),
    }
}

/// Link descriptor over the first parameter's first sheet.
fn indexed_on(values: &ValuesByParam) -> Value {
    let Some((field, sheets)) = first_param(values) else {
        return Value::Null;
    };
    let Some((sheet, cell)) = sheets.first() else {
        return Value::Null;
    };
    IndexDescriptor {
        field: field.to_string(),
        sheet: sheet.clone(),
        values: cell.to_list(),
    }
    .to_value()
}

/// Link rows to the donor only where no other parameter links them.
///
/// The donor identifier parameter must come first. A row position keeps a
/// value only when exactly one parameter is non-null there.
fn moh_indexed_on_donor_if_others_absent(values: &ValuesByParam) -> Value {
    let Some((field, sheets)) = first_param(values) else {
        return Value::Null;
    };
    let Some(sheet) = sheets.keys().next() else {
        return Value::Null;
    };

    let mut slots: Vec<(usize, Value)> = Vec::new();
    for param_sheets in values.values() {
        let Some(cell) = param_sheets.values().last() else {
            continue;
        };
        for (i, v) in cell.values().enumerate() {
            if slots.len() <= i {
                slots.push((0, Value::Null));
            }
            if !v.is_null() {
                slots[i].0 += 1;
                slots[i].1 = v.clone();
            }
        }
    }

    IndexDescriptor {
        field: field.to_string(),
        sheet: sheet.clone(),
        values: slots
            .into_iter()
            .map(|(count, v)| if count == 1 { v } else { Value::Null })
            .collect(),
    }
    .to_value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexedData;
    use crate::input::{DataTable, SheetSet};

    fn vbp(entries: &[(&str, &str, Cell)]) -> ValuesByParam {
        let mut out = ValuesByParam::new();
        for (param, sheet, cell) in entries {
            out.entry(param.to_string())
                .or_default()
                .insert(sheet.to_string(), cell.clone());
        }
        out
    }

    fn list(items: &[Option<&str>]) -> Cell {
        Cell::List(items.iter().map(|v| v.map_or(Value::Null, |s| json!(s))).collect())
    }

    fn empty_data() -> IndexedData {
        IndexedData::build("submitter_donor_id", &SheetSet::new()).unwrap()
    }

    fn env<'a>(data: &'a IndexedData, reference: Option<&'a Value>) -> MappingEnv<'a> {
        MappingEnv {
            subject: "D1",
            date_order: DateOrder::Dmy,
            reference_date: reference,
            data,
        }
    }

    #[test]
    fn test_single_val_dedupes_and_drops_nulls() {
        let values = vbp(&[("sex", "Donor", list(&[Some("Male"), None, Some("Male")]))]);
        assert_eq!(single_val(&values).unwrap(), json!("Male"));

        let values = vbp(&[("sex", "Donor", list(&[None, None]))]);
        assert_eq!(single_val(&values).unwrap(), Value::Null);

        let values = vbp(&[("sex", "Donor", Cell::Scalar(json!("NaN")))]);
        assert_eq!(single_val(&values).unwrap(), Value::Null);
    }

    #[test]
    fn test_single_val_conflict_is_error() {
        let values = vbp(&[("sex", "Donor", list(&[Some("Male"), Some("Female")]))]);
        let err = single_val(&values).unwrap_err();
        assert!(err.message.starts_with("More than one value was found for sex"));
    }

    #[test]
    fn test_list_val_flattens_sheets() {
        let values = vbp(&[
            ("id", "A", list(&[Some("1"), Some("2")])),
            ("id", "B", Cell::Scalar(json!("3"))),
        ]);
        assert_eq!(list_val(&values), vec![json!("1"), json!("2"), json!("3")]);
    }

    #[test]
    fn test_flat_list_val() {
        let values = vbp(&[(
            "drugs",
            "Treatment",
            list(&[Some("['a', 'b']"), Some("c, d"), None]),
        )]);
        assert_eq!(flat_list_val(&values), json!(["a", "b", "c", "d"]));
    }

    #[test]
    fn test_concat_vals_skips_nulls() {
        let values = vbp(&[
            ("a", "S", Cell::Scalar(json!("x"))),
            ("b", "S", Cell::Scalar(Value::Null)),
            ("c", "S", Cell::Scalar(json!("z"))),
        ]);
        assert_eq!(concat_vals(&values), json!("x_z"));
        assert_eq!(concat_vals(&vbp(&[("b", "S", list(&[None]))])), Value::Null);
    }

    #[test]
    fn test_boolean_and_numbers() {
        let data = empty_data();
        let env = env(&data, None);
        let b = |s: &str| boolean(&vbp(&[("x", "S", Cell::Scalar(json!(s)))])).unwrap();
        assert_eq!(b("Yes"), json!(true));
        assert_eq!(b(" false"), json!(false));
        assert_eq!(b("unknown"), Value::Null);

        let i = |s: &str| integer(&vbp(&[("x", "S", Cell::Scalar(json!(s)))]), &env).unwrap();
        assert_eq!(i("42.9"), json!(42));
        assert_eq!(i("-3"), json!(-3));
        assert_eq!(i("forty"), Value::Null);

        let f = floating(&vbp(&[("x", "S", Cell::Scalar(json!("2.5")))]), &env).unwrap();
        assert_eq!(f, json!(2.5));
    }

    #[test]
    fn test_has_value_and_pipe_delim() {
        assert!(!has_value(&vbp(&[("x", "S", list(&[None]))])));
        assert!(has_value(&vbp(&[("x", "S", list(&[None, Some("a")]))])));

        let values = vbp(&[("x", "S", Cell::Scalar(json!("a|b|c")))]);
        assert_eq!(pipe_delim(&values).unwrap(), json!(["a", "b", "c"]));
    }

    #[test]
    fn test_dates_format_and_pass_through() {
        let data = empty_data();
        let env = env(&data, None);
        let values = vbp(&[("d", "S", list(&[Some("2020-03-15"), Some("Unknown"), None]))]);
        assert_eq!(date(&values, &env).unwrap(), json!(["2020-03", "Unknown", null]));

        let values = vbp(&[("d", "S", Cell::Scalar(json!("15/03/2020")))]);
        assert_eq!(single_date(&values, &env).unwrap(), json!("2020-03"));

        let values = vbp(&[("d", "S", Cell::Scalar(json!("99/99/9999")))]);
        assert!(single_date(&values, &env).is_err());
    }

    #[test]
    fn test_earliest_date() {
        let data = empty_data();
        let env = env(&data, None);
        let values = vbp(&[
            ("date_resolution", "Donor", Cell::Scalar(json!("day"))),
            (
                "date_of_diagnosis",
                "PrimaryDiagnosis",
                list(&[Some("2019-06-01"), Some("2018-02-10"), None]),
            ),
        ]);
        assert_eq!(
            earliest_date(&values, &env).unwrap(),
            json!({"offset": "2018-02-10", "period": "day"})
        );
    }

    #[test]
    fn test_date_interval_requires_reference() {
        let data = empty_data();
        let values = vbp(&[("d", "S", Cell::Scalar(json!("2018-05-10")))]);
        assert!(date_interval(&values, &env(&data, None)).is_err());

        let reference = json!({"offset": "2018-02-10", "period": "day"});
        let result = date_interval(&values, &env(&data, Some(&reference))).unwrap();
        assert_eq!(result, json!({"month_interval": 3, "day_interval": 89}));

        let reference = json!({"offset": "2018-02-10", "period": "month"});
        let before = vbp(&[("d", "S", Cell::Scalar(json!("2017-02-10")))]);
        let result = date_interval(&before, &env(&data, Some(&reference))).unwrap();
        assert_eq!(result, json!({"month_interval": -12}));
    }

    #[test]
    fn test_int_to_date_interval_json() {
        let mut sheets = SheetSet::new();
        sheets.insert(
            "Donor".to_string(),
            DataTable::from_rows(&["submitter_donor_id", "date_resolution"], &[&["D1", "day"]]),
        );
        let data = IndexedData::build("submitter_donor_id", &sheets).unwrap();
        let env = env(&data, None);
        let at = |n: &str| {
            int_to_date_interval_json(&vbp(&[("x", "S", Cell::Scalar(json!(n)))]), &env).unwrap()
        };
        assert_eq!(at("45"), json!({"day_interval": 45, "month_interval": 1}));
        assert_eq!(at("-400"), json!({"day_interval": -400, "month_interval": -13}));

        let no_resolution = empty_data();
        let values = vbp(&[("x", "S", Cell::Scalar(json!("10")))]);
        assert!(int_to_date_interval_json(&values, &MappingEnv { data: &no_resolution, ..env }).is_err());
    }

    #[test]
    fn test_indexed_on_descriptor() {
        let values = vbp(&[(
            "submitter_treatment_id",
            "Treatment",
            list(&[Some("T1"), Some("T2")]),
        )]);
        let descriptor = IndexDescriptor::from_value(&indexed_on(&values)).unwrap();
        assert_eq!(descriptor.field, "submitter_treatment_id");
        assert_eq!(descriptor.sheet, "Treatment");
        assert_eq!(descriptor.values, vec![json!("T1"), json!("T2")]);
    }

    #[test]
    fn test_donor_link_only_when_others_absent() {
        let values = vbp(&[
            ("submitter_donor_id", "FollowUp", list(&[Some("D1"), Some("D1"), Some("D1")])),
            ("submitter_treatment_id", "FollowUp", list(&[None, Some("T1"), None])),
            ("submitter_primary_diagnosis_id", "FollowUp", list(&[None, None, Some("P1")])),
        ]);
        let descriptor =
            IndexDescriptor::from_value(&moh_indexed_on_donor_if_others_absent(&values)).unwrap();
        assert_eq!(descriptor.sheet, "FollowUp");
        assert_eq!(descriptor.values, vec![json!("D1"), Value::Null, Value::Null]);
    }

    #[test]
    fn test_months_from_days() {
        assert_eq!(months_from_days(0), 0);
        assert_eq!(months_from_days(365), 12);
        assert_eq!(months_from_days(730 + 61), 26);
        assert_eq!(months_from_days(-59), -1);
    }
}

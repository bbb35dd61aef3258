//! Evaluation of a mapping scaffold against one subject's data.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use super::context::{ConversionContext, Frame, SubjectSnapshot};
use crate::error::{EtlError, Result};
use crate::index::{CALCULATED_SHEET, IndexedData};
use crate::mapping::{
    Cell, DateOrder, FunctionRegistry, IndexDescriptor, MappingEnv, MappingExpression, ParamRef,
    ValuesByParam,
};
use crate::template::Scaffold;

/// Key the reference date is computed under.
pub const REFERENCE_DATE: &str = "REFERENCE_DATE";

/// Records produced for one subject.
#[derive(Debug, Clone, Default)]
pub struct SubjectOutcome {
    pub records: Vec<Value>,
    /// Template fields left out because a parameter was not in the input.
    pub omissions: Vec<String>,
    pub snapshot: SubjectSnapshot,
}

/// Walks a scaffold once per subject.
pub struct ScaffoldEvaluator<'a> {
    scaffold: &'a Scaffold,
    registry: &'a FunctionRegistry,
    data: &'a IndexedData,
    date_order: DateOrder,
    reference_date: Option<MappingExpression>,
}

impl<'a> ScaffoldEvaluator<'a> {
    /// Check every function the scaffold calls is registered, and report
    /// columns that more than one sheet could supply.
    pub fn new(
        scaffold: &'a Scaffold,
        registry: &'a FunctionRegistry,
        data: &'a IndexedData,
    ) -> Result<Self> {
        let evaluator = Self {
            scaffold,
            registry,
            data,
            date_order: DateOrder::default(),
            reference_date: None,
        };
        evaluator.check_expressions(scaffold.expressions())?;
        Ok(evaluator)
    }

    pub fn with_date_order(mut self, date_order: DateOrder) -> Self {
        self.date_order = date_order;
        self
    }

    /// Compute a reference date per subject before the main pass.
    pub fn with_reference_date(mut self, expression: MappingExpression) -> Result<Self> {
        self.check_expressions([&expression])?;
        self.reference_date = Some(expression);
        Ok(self)
    }

    fn check_expressions<'e>(
        &self,
        expressions: impl IntoIterator<Item = &'e MappingExpression>,
    ) -> Result<()> {
        for expression in expressions {
            if !self.registry.contains(&expression.function) {
                return Err(EtlError::Config(format!(
                    "unknown mapping function '{}' in {expression}",
                    expression.function
                )));
            }
            for param in expression.params.iter().filter(|p| p.sheet.is_none()) {
                let sheets = self.data.sheets_with(&param.column);
                if sheets.len() > 1 {
                    warn!(
                        column = %param.column,
                        sheets = %sheets.join(", "),
                        using = %sheets[0],
                        "several sheets contain this column; qualify it as Sheet.column"
                    );
                }
            }
        }
        Ok(())
    }

    /// Convert one subject into root records.
    pub fn convert_subject(&self, subject: &str) -> Result<SubjectOutcome> {
        self.convert_in(ConversionContext::new(subject, self.data))
    }

    /// Convert the context's subject, starting from whatever its stack holds.
    pub(crate) fn convert_in(&self, mut ctx: ConversionContext<'_>) -> Result<SubjectOutcome> {
        let subject = ctx.subject;
        if let Some(expression) = &self.reference_date {
            self.compute_reference_date(expression, &mut ctx)?;
        }

        ctx.push(Frame::root());
        let packet = self.eval_node(self.scaffold, &mut ctx, Some(0))?;
        self.check_stack(&mut ctx)?;

        let mut records = Vec::new();
        if let Some(Value::Object(packet)) = packet {
            match packet.into_iter().next().map(|(_, v)| v) {
                Some(Value::Array(items)) => records.extend(items),
                Some(record @ Value::Object(_)) => records.push(record),
                _ => {}
            }
        }
        debug!(subject, records = records.len(), "converted subject");

        Ok(SubjectOutcome {
            records,
            omissions: std::mem::take(&mut ctx.omissions),
            snapshot: ctx.into_snapshot(),
        })
    }

    fn check_stack(&self, ctx: &mut ConversionContext<'_>) -> Result<()> {
        if ctx.pop().is_none() {
            return Err(EtlError::StackImbalance {
                subject: ctx.subject.to_string(),
                detail: "stack popped too far".to_string(),
            });
        }
        if !ctx.stack().is_empty() {
            return Err(EtlError::StackImbalance {
                subject: ctx.subject.to_string(),
                detail: format!("stack not empty: {:?}", ctx.stack()),
            });
        }
        Ok(())
    }

    fn compute_reference_date(
        &self,
        expression: &MappingExpression,
        ctx: &mut ConversionContext<'_>,
    ) -> Result<()> {
        let sheet = expression.params.first().and_then(|p| self.resolve(p, ctx));
        ctx.push(Frame {
            sheet,
            field: Some(self.data.identifier_field.clone()),
            row: 0,
        });
        let node = Scaffold::Object(IndexMap::from([(
            REFERENCE_DATE.to_string(),
            Scaffold::Leaf(Some(expression.clone())),
        )]));
        self.eval_node(&node, ctx, Some(0))?;
        ctx.clear_stack();
        ctx.reference_date = ctx.calculated(REFERENCE_DATE).first().cloned();
        trace!(subject = ctx.subject, reference_date = ?ctx.reference_date, "reference date");
        Ok(())
    }

    fn eval_node(
        &self,
        node: &Scaffold,
        ctx: &mut ConversionContext<'_>,
        rownum: Option<usize>,
    ) -> Result<Option<Value>> {
        match node {
            Scaffold::Leaf(None) => Ok(None),
            Scaffold::Leaf(Some(expression)) => {
                let value = self.eval_expression(expression, ctx, rownum)?;
                Ok((!value.is_null()).then_some(value))
            }
            Scaffold::Object(children) => {
                let mut result = Map::new();
                for (key, child) in children {
                    ctx.path.push(key.clone());
                    let value = self.eval_node(child, ctx, rownum);
                    ctx.path.pop();
                    if let Some(value) = value? {
                        ctx.record_calculated(key, value.clone());
                        result.insert(key.clone(), value);
                    }
                }
                Ok((!result.is_empty()).then_some(Value::Object(result)))
            }
            Scaffold::Indexed { index, nodes } => self.eval_indexed(index, nodes, ctx),
        }
    }

    fn eval_indexed(
        &self,
        index: &MappingExpression,
        nodes: &Scaffold,
        ctx: &mut ConversionContext<'_>,
    ) -> Result<Option<Value>> {
        let value = self.eval_expression(index, ctx, None)?;
        if value.is_null() {
            return Ok(None);
        }
        let descriptor = IndexDescriptor::from_value(&value).ok_or_else(|| {
            EtlError::Config(format!(
                "index expression {index} at {} did not produce a {{field, sheet, values}} index",
                ctx.path_string()
            ))
        })?;
        if !ctx.has_rows_on(&descriptor.sheet) {
            return Ok(None);
        }
        ctx.override_column(&descriptor.sheet, &descriptor.field, descriptor.values.clone());

        let subject = ctx.subject;
        let Some(top) = ctx.top_mut() else {
            return Err(EtlError::StackImbalance {
                subject: subject.to_string(),
                detail: format!("no frame to index {index} from"),
            });
        };
        if top.sheet.is_none() {
            top.sheet = Some(descriptor.sheet.clone());
            top.field = Some(descriptor.field.clone());
        }
        let (top_sheet, top_row) = (top.sheet.clone(), top.row);
        let row_value = top_sheet
            .and_then(|sheet| ctx.column(&sheet, &descriptor.field))
            .and_then(|values| values.get(top_row).cloned())
            .unwrap_or(Value::Null);
        trace!(index = %index, candidates = ?descriptor.values, row_value = %row_value, "indexing");

        let mut items = Vec::new();
        ctx.path.push("INDEX".to_string());
        for (i, candidate) in descriptor.values.iter().enumerate() {
            ctx.push(Frame::new(&descriptor.sheet, &descriptor.field, i));
            let produced = if !candidate.is_null() && *candidate == row_value {
                self.eval_node(nodes, ctx, Some(i))
            } else {
                Ok(None)
            };
            ctx.pop();
            match produced {
                Ok(Some(item)) => items.push(item),
                Ok(None) => {}
                Err(e) => {
                    ctx.path.pop();
                    return Err(e);
                }
            }
        }
        ctx.path.pop();
        Ok((!items.is_empty()).then_some(Value::Array(items)))
    }

    /// The sheet a parameter reads from, if it resolves at all.
    fn resolve(&self, param: &ParamRef, ctx: &ConversionContext<'_>) -> Option<String> {
        match &param.sheet {
            Some(sheet) if self.data.has_column(sheet, &param.column) => Some(sheet.clone()),
            Some(sheet) if sheet == CALCULATED_SHEET && ctx.has_calculated(&param.column) => {
                Some(sheet.clone())
            }
            Some(_) => None,
            None => self.data.sheets_with(&param.column).first().cloned().or_else(|| {
                ctx.has_calculated(&param.column)
                    .then(|| CALCULATED_SHEET.to_string())
            }),
        }
    }

    /// Gather parameter values: whole columns when computing an index, the
    /// active row's value for a parameter on the active sheet.
    fn populate(
        &self,
        expression: &MappingExpression,
        ctx: &mut ConversionContext<'_>,
        rownum: Option<usize>,
    ) -> Option<ValuesByParam> {
        let mut values = ValuesByParam::new();
        for param in &expression.params {
            let Some(sheet) = self.resolve(param, ctx) else {
                let omission = format!("{}: {param} is not in the input data", ctx.path_string());
                debug!(subject = ctx.subject, "{omission}");
                ctx.omissions.push(omission);
                return None;
            };
            let cell = if !ctx.has_rows_on(&sheet) {
                Cell::List(Vec::new())
            } else {
                let column = ctx.column(&sheet, &param.column).unwrap_or_default();
                let on_active_sheet = ctx
                    .top()
                    .is_some_and(|top| top.sheet.as_deref() == Some(sheet.as_str()));
                match rownum {
                    Some(row) if on_active_sheet => {
                        Cell::Scalar(column.get(row).cloned().unwrap_or(Value::Null))
                    }
                    _ => Cell::List(column),
                }
            };
            values
                .entry(param.column.clone())
                .or_default()
                .insert(sheet, cell);
        }
        Some(values)
    }

    fn eval_expression(
        &self,
        expression: &MappingExpression,
        ctx: &mut ConversionContext<'_>,
        rownum: Option<usize>,
    ) -> Result<Value> {
        let Some(values) = self.populate(expression, ctx, rownum) else {
            return Ok(Value::Null);
        };
        if values.is_empty() {
            return Ok(Value::Null);
        }
        let function = self.registry.get(&expression.function).ok_or_else(|| {
            EtlError::Config(format!("unknown mapping function '{}'", expression.function))
        })?;
        let env = MappingEnv {
            subject: ctx.subject,
            date_order: self.date_order,
            reference_date: ctx.reference_date.as_ref(),
            data: self.data,
        };
        function(&values, &env).map_err(|e| EtlError::Mapping {
            subject: ctx.subject.to_string(),
            field: ctx.path_string(),
            message: e.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{DataTable, SheetSet};
    use crate::mapping::MappingError;
    use crate::template::MappingTemplate;
    use serde_json::json;

    fn data() -> IndexedData {
        let mut sheets = SheetSet::new();
        sheets.insert(
            "Donor".to_string(),
            DataTable::from_rows(
                &["submitter_donor_id", "sex", "date_of_birth", "date_resolution"],
                &[
                    &["D1", "Female", "2000-01-15", "month"],
                    &["D2", "Male", "1990-06-01", "month"],
                ],
            ),
        );
        sheets.insert(
            "PrimaryDiagnosis".to_string(),
            DataTable::from_rows(
                &["submitter_donor_id", "submitter_primary_diagnosis_id", "primary_site"],
                &[&["D1", "P1", "Breast"], &["D1", "P2", "Skin"]],
            ),
        );
        sheets.insert(
            "Treatment".to_string(),
            DataTable::from_rows(
                &["submitter_donor_id", "submitter_primary_diagnosis_id", "submitter_treatment_id"],
                &[&["D1", "P1", "T1"], &["D1", "P1", "T2"], &["D1", "P2", "T3"]],
            ),
        );
        IndexedData::build("submitter_donor_id", &sheets).unwrap()
    }

    fn scaffold(text: &str) -> Scaffold {
        MappingTemplate::parse(text).unwrap().scaffold().unwrap()
    }

    const TEMPLATE: &str = "\
DONOR.INDEX,{indexed_on(Donor.submitter_donor_id)}
DONOR.INDEX.submitter_donor_id,{single_val(Donor.submitter_donor_id)}
DONOR.INDEX.sex,{single_val(Donor.sex)}
DONOR.INDEX.primary_diagnoses.INDEX,{indexed_on(PrimaryDiagnosis.submitter_donor_id)}
DONOR.INDEX.primary_diagnoses.INDEX.submitter_primary_diagnosis_id,{single_val(PrimaryDiagnosis.submitter_primary_diagnosis_id)}
DONOR.INDEX.primary_diagnoses.INDEX.primary_site,{single_val(primary_site)}
DONOR.INDEX.primary_diagnoses.INDEX.treatments.INDEX,{indexed_on(Treatment.submitter_primary_diagnosis_id)}
DONOR.INDEX.primary_diagnoses.INDEX.treatments.INDEX.submitter_treatment_id,{single_val(Treatment.submitter_treatment_id)}
";

    #[test]
    fn test_nested_records_follow_links() {
        let data = data();
        let scaffold = scaffold(TEMPLATE);
        let registry = FunctionRegistry::new();
        let evaluator = ScaffoldEvaluator::new(&scaffold, &registry, &data).unwrap();

        let outcome = evaluator.convert_subject("D1").unwrap();
        assert_eq!(
            outcome.records,
            vec![json!({
                "submitter_donor_id": "D1",
                "sex": "Female",
                "primary_diagnoses": [
                    {
                        "submitter_primary_diagnosis_id": "P1",
                        "primary_site": "Breast",
                        "treatments": [
                            {"submitter_treatment_id": "T1"},
                            {"submitter_treatment_id": "T2"}
                        ]
                    },
                    {
                        "submitter_primary_diagnosis_id": "P2",
                        "primary_site": "Skin",
                        "treatments": [{"submitter_treatment_id": "T3"}]
                    }
                ]
            })]
        );
        assert!(outcome.omissions.is_empty());
        assert_eq!(
            outcome.snapshot.overrides["Treatment"]["submitter_primary_diagnosis_id"],
            vec![json!("P1"), json!("P1"), json!("P2")]
        );
    }

    #[test]
    fn test_subject_without_nested_rows_omits_the_field() {
        let data = data();
        let scaffold = scaffold(TEMPLATE);
        let registry = FunctionRegistry::new();
        let evaluator = ScaffoldEvaluator::new(&scaffold, &registry, &data).unwrap();

        let outcome = evaluator.convert_subject("D2").unwrap();
        assert_eq!(
            outcome.records,
            vec![json!({"submitter_donor_id": "D2", "sex": "Male"})]
        );
    }

    #[test]
    fn test_unresolved_parameter_is_an_omission() {
        let data = data();
        let scaffold = scaffold(
            "DONOR.INDEX,{indexed_on(Donor.submitter_donor_id)}\n\
             DONOR.INDEX.gender,{single_val(Donor.gender)}\n\
             DONOR.INDEX.sex,{single_val(sex)}\n",
        );
        let registry = FunctionRegistry::new();
        let evaluator = ScaffoldEvaluator::new(&scaffold, &registry, &data).unwrap();
        let outcome = evaluator.convert_subject("D2").unwrap();
        assert_eq!(outcome.records, vec![json!({"sex": "Male"})]);
        assert_eq!(outcome.omissions.len(), 1);
        assert!(outcome.omissions[0].contains("Donor.gender"));
    }

    #[test]
    fn test_unknown_function_is_rejected_up_front() {
        let data = data();
        let scaffold = scaffold("DONOR.INDEX,{indexed_on(Donor.submitter_donor_id)}\nDONOR.INDEX.sex,{shout(sex)}\n");
        let registry = FunctionRegistry::new();
        let err = ScaffoldEvaluator::new(&scaffold, &registry, &data).err().unwrap();
        assert!(err.to_string().contains("shout"));
    }

    #[test]
    fn test_mapping_error_names_subject_and_field() {
        let data = data();
        let scaffold = scaffold(
            "DONOR.INDEX,{indexed_on(Donor.submitter_donor_id)}\n\
             DONOR.INDEX.sites,{single_val(PrimaryDiagnosis.primary_site)}\n",
        );
        let registry = FunctionRegistry::new();
        let evaluator = ScaffoldEvaluator::new(&scaffold, &registry, &data).unwrap();
        match evaluator.convert_subject("D1") {
            Err(EtlError::Mapping { subject, field, message }) => {
                assert_eq!(subject, "D1");
                assert_eq!(field, "DONOR.INDEX.sites");
                assert!(message.starts_with("More than one value was found for primary_site"));
            }
            other => panic!("expected a mapping error, got {other:?}"),
        }
    }

    #[test]
    fn test_non_descriptor_index_is_fatal() {
        let data = data();
        let scaffold = scaffold("DONOR.INDEX,{single_val(Donor.sex)}\nDONOR.INDEX.sex,{single_val(sex)}\n");
        let registry = FunctionRegistry::new();
        let evaluator = ScaffoldEvaluator::new(&scaffold, &registry, &data).unwrap();
        assert!(matches!(evaluator.convert_subject("D1"), Err(EtlError::Config(_))));
    }

    #[test]
    fn test_custom_function_failure_aborts_only_that_subject() {
        let data = data();
        let scaffold = scaffold(
            "DONOR.INDEX,{indexed_on(Donor.submitter_donor_id)}\n\
             DONOR.INDEX.sex,{custom.checked(sex)}\n",
        );
        let mut registry = FunctionRegistry::new();
        registry.register("custom.checked", |_: &ValuesByParam, env: &MappingEnv<'_>| {
            if env.subject == "D1" {
                Err(MappingError::new("nope"))
            } else {
                Ok(json!("ok"))
            }
        });
        let evaluator = ScaffoldEvaluator::new(&scaffold, &registry, &data).unwrap();
        assert!(matches!(evaluator.convert_subject("D1"), Err(EtlError::Mapping { .. })));
        assert_eq!(evaluator.convert_subject("D2").unwrap().records, vec![json!({"sex": "ok"})]);
    }

    #[test]
    fn test_stack_imbalance_is_reported() {
        let data = data();
        let mut ctx = ConversionContext::new("D1", &data);
        let scaffold = scaffold(TEMPLATE);
        let registry = FunctionRegistry::new();
        let evaluator = ScaffoldEvaluator::new(&scaffold, &registry, &data).unwrap();

        assert!(matches!(
            evaluator.check_stack(&mut ctx),
            Err(EtlError::StackImbalance { .. })
        ));
        ctx.push(Frame::root());
        ctx.push(Frame::root());
        match evaluator.check_stack(&mut ctx) {
            Err(EtlError::StackImbalance { subject, detail }) => {
                assert_eq!(subject, "D1");
                assert!(detail.starts_with("stack not empty"));
            }
            other => panic!("expected a stack imbalance, got {other:?}"),
        }
    }

    #[test]
    fn test_reference_date_feeds_intervals() {
        let data = data();
        let scaffold = scaffold(
            "DONOR.INDEX,{indexed_on(Donor.submitter_donor_id)}\n\
             DONOR.INDEX.date_of_birth,{date_interval(Donor.date_of_birth)}\n",
        );
        let registry = FunctionRegistry::new();
        let evaluator = ScaffoldEvaluator::new(&scaffold, &registry, &data)
            .unwrap()
            .with_date_order(DateOrder::Ymd)
            .with_reference_date(MappingExpression::parse("earliest_date(Donor.date_resolution; Donor.date_of_birth)").unwrap())
            .unwrap();

        let outcome = evaluator.convert_subject("D1").unwrap();
        assert_eq!(
            outcome.records,
            vec![json!({"date_of_birth": {"month_interval": 0}})]
        );
        assert_eq!(
            outcome.snapshot.calculated[REFERENCE_DATE][0]["offset"],
            json!("2000-01-15")
        );
    }
}

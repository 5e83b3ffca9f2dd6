use super::binding::macro_text;
use super::classify::{Classification, MethodCategory, ResultStrategy, SinglePolicy};
use super::crud::CrudIdentitySpec;
use crate::connection::config::DaoConfig;
use crate::connection::{FetchDirection, StatementOptions};
use crate::core::{Arg, DaoError, Result, TypeShape, Value};
use crate::descriptor::{MacroKind, MethodDescriptor, OutParameter, ParamDirective};
use crate::sql::ParsedSql;
use std::collections::HashMap;
use std::sync::Arc;

/// A macro parameter and the literal it replaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroSlot {
    pub arg: usize,
    pub placeholder: String,
    pub kind: MacroKind,
}

/// Frozen execution facts of one statement-backed method.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub final_text: String,
    pub parsed: Arc<ParsedSql>,
    pub parameter_count: usize,
    pub category: MethodCategory,
    pub options: StatementOptions,
    pub is_batch: bool,
    pub batch_size: usize,
    pub is_single_argument: bool,
    pub is_select: bool,
    pub is_callable: bool,
    pub is_named: bool,
    pub out_parameters: Vec<OutParameter>,
    pub macros: Vec<MacroSlot>,
    /// Argument whose elements expand the last positional slot.
    pub expansion: Option<usize>,
}

/// The statement text for one call, after macros and list expansion.
#[derive(Debug, Clone)]
pub struct RenderedQuery {
    parsed: Arc<ParsedSql>,
    expanded: Option<String>,
    generated: HashMap<String, Value>,
}

impl RenderedQuery {
    /// Text sent to the driver, in `?` form.
    pub fn sql(&self) -> &str {
        self.expanded
            .as_deref()
            .unwrap_or_else(|| self.parsed.parameterized_sql())
    }

    pub fn parsed(&self) -> &ParsedSql {
        &self.parsed
    }

    /// Values of placeholders introduced by list binding macros.
    pub fn generated(&self) -> &HashMap<String, Value> {
        &self.generated
    }
}

/// Fetch size, row cap and direction implied by how many rows the result needs.
fn fetch_tuning(
    strategy: &ResultStrategy,
    method: &MethodDescriptor,
    config: &DaoConfig,
) -> (Option<usize>, Option<usize>, FetchDirection) {
    let bulk = || {
        (
            Some(method.metadata.fetch_size.unwrap_or(config.big_result_fetch_size)),
            None,
            FetchDirection::Forward,
        )
    };
    match strategy {
        ResultStrategy::Existence
        | ResultStrategy::Scalar { unique: false, .. }
        | ResultStrategy::Single {
            policy: SinglePolicy::FirstOrNull | SinglePolicy::FirstOrFail,
            ..
        } => (Some(1), Some(1), FetchDirection::Forward),
        ResultStrategy::Scalar { unique: true, .. }
        | ResultStrategy::Single {
            policy: SinglePolicy::ExactlyOneOrFail,
            ..
        } => (Some(2), Some(2), FetchDirection::Forward),
        ResultStrategy::Collection { .. }
        | ResultStrategy::Stream { .. }
        | ResultStrategy::Tabular
        | ResultStrategy::GroupedMap { .. }
        | ResultStrategy::MergedByKeys { .. }
        | ResultStrategy::Extracted => bulk(),
        _ => (method.metadata.fetch_size, None, FetchDirection::Forward),
    }
}

impl QueryPlan {
    pub fn finalize(
        method: &MethodDescriptor,
        classification: &Classification,
        config: &DaoConfig,
        crud: Option<&CrudIdentitySpec>,
    ) -> Result<Self> {
        let fail = |msg: String| DaoError::config(format!("{}: {}", method.qualified_name(), msg));
        let text = method
            .query_text
            .clone()
            .ok_or_else(|| fail("no query text".into()))?;

        let mut macros = Vec::new();
        let mut expansion = None;
        for (arg, param) in method.params.iter().enumerate() {
            match &param.directive {
                ParamDirective::Macro { placeholder, kind } => {
                    if !text.contains(placeholder.as_str()) {
                        return Err(fail(format!("macro {} does not appear in the query", placeholder)));
                    }
                    macros.push(MacroSlot {
                        arg,
                        placeholder: placeholder.clone(),
                        kind: *kind,
                    });
                }
                ParamDirective::Expand => expansion = Some(arg),
                _ => {}
            }
        }

        let parsed = ParsedSql::parse(&text)
            .map_err(|e| DaoError::ParseError(format!("{}: {}", method.qualified_name(), e)))?;
        let bind_list = macros.iter().any(|m| m.kind == MacroKind::BindList);
        if bind_list && parsed.parameter_count() > 0 && !parsed.is_named() {
            return Err(fail("list binding macros need named parameters".into()));
        }
        if expansion.is_some() && parsed.is_named() {
            return Err(fail("list expansion needs '?' placeholders".into()));
        }

        let category = classification.category;
        let out_parameters = method.metadata.out_parameters.clone();
        if !out_parameters.is_empty() && !category.is_call() {
            return Err(fail("output parameters are only valid on procedure calls".into()));
        }
        if let Some(bad) = out_parameters
            .iter()
            .find(|o| o.position == 0 || o.position > parsed.parameter_count())
        {
            return Err(fail(format!(
                "output parameter '{}' at {} is outside the {} placeholders",
                bad.name,
                bad.position,
                parsed.parameter_count()
            )));
        }

        let batch_size = method.metadata.batch_size.unwrap_or(config.batch_size);
        if batch_size == 0 {
            return Err(fail("batch size must be > 0".into()));
        }

        let (fetch_size, mut max_rows, fetch_direction) =
            fetch_tuning(&classification.strategy, method, config);
        if method.params.iter().any(|p| p.ty == TypeShape::RowFilter) {
            max_rows = None;
        }
        let generated_key_columns = match (&classification.strategy, crud) {
            (ResultStrategy::GeneratedId | ResultStrategy::GeneratedIds, Some(crud)) => {
                crud.id_columns.clone()
            }
            _ => Vec::new(),
        };

        let statement_args = method
            .params
            .iter()
            .filter(|p| !p.is_macro() && !p.ty.is_functional())
            .count();

        Ok(Self {
            parameter_count: parsed.parameter_count(),
            is_named: parsed.is_named() || bind_list,
            parsed,
            final_text: text,
            category,
            options: StatementOptions {
                query_timeout: method.metadata.timeout.or(config.query_timeout),
                fetch_size,
                max_rows,
                fetch_direction,
                generated_key_columns,
            },
            is_batch: category.is_batch(),
            batch_size,
            is_single_argument: statement_args == 1,
            is_select: category.is_select(),
            is_callable: category.is_call(),
            out_parameters,
            macros,
            expansion,
        })
    }

    /// Applies macros and list expansion for one call. Without either, the
    /// compile-time parse is reused as is.
    pub fn render(&self, args: &[Arg]) -> Result<RenderedQuery> {
        if self.macros.is_empty() && self.expansion.is_none() {
            return Ok(RenderedQuery {
                parsed: Arc::clone(&self.parsed),
                expanded: None,
                generated: HashMap::new(),
            });
        }

        let mut generated = HashMap::new();
        let parsed = if self.macros.is_empty() {
            Arc::clone(&self.parsed)
        } else {
            let mut text = self.final_text.clone();
            for slot in &self.macros {
                let value = arg_value(args, slot.arg)?;
                let replacement = match slot.kind {
                    MacroKind::BindList => {
                        let base = slot.placeholder.trim_matches(|c| c == '{' || c == '}');
                        let items = match value {
                            Value::List(items) => items,
                            Value::Null => Vec::new(),
                            single => vec![single],
                        };
                        if items.is_empty() {
                            "NULL".to_string()
                        } else {
                            let mut names = Vec::with_capacity(items.len());
                            for (i, item) in items.into_iter().enumerate() {
                                let name = format!("{}_{}", base, i);
                                names.push(format!(":{}", name));
                                generated.insert(name, item);
                            }
                            names.join(", ")
                        }
                    }
                    kind => macro_text(&value, kind),
                };
                text = text.replace(&slot.placeholder, &replacement);
            }
            ParsedSql::parse(&text)?
        };

        let expanded = match self.expansion {
            Some(arg) => {
                let count = match arg_value(args, arg)? {
                    Value::List(items) => items.len(),
                    Value::Null => 0,
                    other => {
                        return Err(DaoError::TypeMismatch(format!(
                            "expanded argument must be a list, got {}",
                            other.type_name()
                        )));
                    }
                };
                let slot = parsed.parameter_count().checked_sub(1).ok_or_else(|| {
                    DaoError::ExecutionError("no placeholder left to expand".into())
                })?;
                parsed.expand_slot(slot, count)
            }
            None => None,
        };

        Ok(RenderedQuery {
            parsed,
            expanded,
            generated,
        })
    }
}

fn arg_value(args: &[Arg], index: usize) -> Result<Value> {
    args.get(index)
        .ok_or_else(|| DaoError::ExecutionError(format!("argument {} missing", index)))?
        .value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::classify::classify;
    use crate::descriptor::{InterfaceDescriptor, MethodDecl, extract};
    use crate::sql::InMemoryQueryRegistry;
    use std::time::Duration;

    fn finalize(decl: MethodDecl, config: &DaoConfig) -> Result<QueryPlan> {
        let interface = InterfaceDescriptor::new("TestDao").method(decl);
        let method = extract(&interface, &InMemoryQueryRegistry::new("r"))?.remove(0);
        let classification = classify(&method, None)?;
        QueryPlan::finalize(&method, &classification, config, None)
    }

    #[test]
    fn test_fetch_tuning_by_category() {
        let config = DaoConfig::default().big_result_fetch_size(500);
        let first = finalize(
            MethodDecl::select("firstName", "SELECT name FROM t").returns(TypeShape::optional(TypeShape::Text)),
            &config,
        )
        .unwrap();
        assert_eq!(first.options.fetch_size, Some(1));
        assert_eq!(first.options.max_rows, Some(1));

        let unique = finalize(
            MethodDecl::select("findOnlyOneName", "SELECT name FROM t").returns(TypeShape::Text),
            &config,
        )
        .unwrap();
        assert_eq!(unique.options.max_rows, Some(2));

        let list = finalize(
            MethodDecl::select("names", "SELECT name FROM t").returns(TypeShape::list(TypeShape::Text)),
            &config,
        )
        .unwrap();
        assert_eq!(list.options.fetch_size, Some(500));
        assert_eq!(list.options.max_rows, None);
        assert_eq!(list.options.fetch_direction, FetchDirection::Forward);
        assert!(list.is_select);
    }

    #[test]
    fn test_timeout_precedence() {
        let config = DaoConfig::default().query_timeout(Duration::from_secs(9));
        let inherited = finalize(MethodDecl::update("touch", "UPDATE t SET x = 1"), &config).unwrap();
        assert_eq!(inherited.options.query_timeout, Some(Duration::from_secs(9)));

        let own = finalize(
            MethodDecl::update("touch", "UPDATE t SET x = 1").timeout(Duration::from_secs(2)),
            &config,
        )
        .unwrap();
        assert_eq!(own.options.query_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_macro_must_appear_in_text() {
        let err = finalize(
            MethodDecl::select("rows", "SELECT * FROM account")
                .define("table", TypeShape::Text, "table", MacroKind::Plain)
                .returns(TypeShape::DataSet),
            &DaoConfig::default(),
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_render_macros() {
        let plan = finalize(
            MethodDecl::select("rows", "SELECT * FROM {table} WHERE kind IN ({kinds}) AND id IN ({ids})")
                .define("table", TypeShape::Text, "table", MacroKind::Plain)
                .define("kinds", TypeShape::list(TypeShape::Text), "kinds", MacroKind::List)
                .define("ids", TypeShape::list(TypeShape::Integer), "{ids}", MacroKind::BindList)
                .returns(TypeShape::DataSet),
            &DaoConfig::default(),
        )
        .unwrap();
        assert!(plan.is_named);

        let args = [
            Arg::val("audit"),
            Arg::val(vec!["a", "b"]),
            Arg::val(vec![5i64, 6]),
        ];
        let rendered = plan.render(&args).unwrap();
        assert_eq!(
            rendered.sql(),
            "SELECT * FROM audit WHERE kind IN ('a', 'b') AND id IN (?, ?)"
        );
        assert_eq!(rendered.generated().get("ids_1"), Some(&Value::Integer(6)));
    }

    #[test]
    fn test_batch_size_precedence() {
        let config = DaoConfig::default().batch_size(50);
        let plan = finalize(
            MethodDecl::insert("addAll", "INSERT INTO t (x) VALUES (?)")
                .param("xs", TypeShape::list(TypeShape::Integer))
                .batch(Some(2)),
            &config,
        )
        .unwrap();
        assert!(plan.is_batch);
        assert_eq!(plan.batch_size, 2);
    }
}

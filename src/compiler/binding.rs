use super::synth::field_of;
use super::template::{QueryPlan, RenderedQuery};
use crate::core::{Arg, DaoError, Record, Result, ResultExtractor, RowFilter, RowMapper, TypeShape, Value};
use crate::descriptor::{MacroKind, MethodDescriptor, ParamDirective};
use crate::sql::ParsedSql;
use std::collections::{HashMap, HashSet};

/// How one declared parameter contributes to the statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingStrategy {
    /// Fills the next `?` slot.
    Positional(usize),
    /// Value bound to one named placeholder.
    NamedField(String),
    /// Fields bound to placeholders of the same name (or `prefix.field`).
    WholeObject { prefix: Option<String> },
    /// Final positional slot expanded to one `?` per element.
    ListExpansion,
    /// Spliced into the query text before parsing.
    MacroSubstitution,
    /// Each element supplies one parameter set.
    BatchElements,
    Mapper,
    Filter,
    Extractor,
}

/// Row handling callbacks taken from the call arguments.
#[derive(Clone, Default)]
pub struct RowHandlers {
    pub mapper: Option<RowMapper>,
    pub filter: Option<RowFilter>,
    pub extractor: Option<ResultExtractor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Arg(usize),
    /// The current batch element.
    Element,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NameSource {
    Value(Source),
    Field { source: Source, field: String },
}

/// Precomputed mapping from call arguments to statement parameters.
#[derive(Debug, Clone)]
pub struct ParameterBindingPlan {
    strategies: Vec<BindingStrategy>,
    named: bool,
    direct: bool,
    out_positions: HashSet<usize>,
    names: HashMap<String, NameSource>,
    /// Untyped structured argument that answers any unclaimed name.
    open_object: Option<(Source, Option<String>)>,
    positional_args: Vec<usize>,
    expansion: Option<usize>,
    batch_arg: Option<usize>,
    entity_arg: Option<usize>,
    mapper: Option<usize>,
    filter: Option<usize>,
    extractor: Option<usize>,
}

/// Name of a placeholder relative to `prefix`, if it falls under it.
fn relative<'a>(name: &'a str, prefix: Option<&str>) -> Option<&'a str> {
    match prefix {
        None => Some(name),
        Some(prefix) => name.strip_prefix(prefix)?.strip_prefix('.'),
    }
}

fn list_items(value: Value, what: &str) -> Result<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(DaoError::TypeMismatch(format!(
            "{} must be a list, got {}",
            what,
            other.type_name()
        ))),
    }
}

/// Binds `record` fields to the named slots of `parsed`; absent fields bind null.
pub(crate) fn bind_record(parsed: &ParsedSql, record: &Record) -> Vec<(usize, Value)> {
    let source = Value::Record(record.clone());
    parsed
        .named_parameters()
        .iter()
        .enumerate()
        .map(|(slot, name)| (slot + 1, field_of(&source, name).unwrap_or(Value::Null)))
        .collect()
}

struct Builder<'a> {
    method: &'a MethodDescriptor,
    placeholders: Vec<String>,
    has_macros: bool,
    names: HashMap<String, NameSource>,
    open_object: Option<(Source, Option<String>)>,
}

impl Builder<'_> {
    fn fail(&self, msg: impl std::fmt::Display) -> DaoError {
        DaoError::config(format!("{}: {}", self.method.qualified_name(), msg))
    }

    fn claim(&mut self, name: &str, source: NameSource) -> Result<()> {
        if self.names.insert(name.to_string(), source).is_some() {
            return Err(self.fail(format!("placeholder :{} is bound more than once", name)));
        }
        Ok(())
    }

    /// Claims the placeholders `param`'s fields answer. A typed entity must
    /// claim at least one unless macros may still introduce placeholders.
    fn object(&mut self, param: &str, source: Source, ty: &TypeShape, prefix: Option<&str>) -> Result<()> {
        match ty.unwrap_optional() {
            TypeShape::Entity(entity) => {
                let placeholders = self.placeholders.clone();
                let mut claimed = 0;
                for name in &placeholders {
                    let Some(rel) = relative(name, prefix) else {
                        continue;
                    };
                    let (head, rest) = match rel.split_once('.') {
                        Some((head, rest)) => (head, Some(rest)),
                        None => (rel, None),
                    };
                    let Some(field) = entity.field_for_label(head) else {
                        continue;
                    };
                    let field = match rest {
                        Some(rest) => format!("{}.{}", field.name, rest),
                        None => field.name.clone(),
                    };
                    self.claim(name, NameSource::Field { source, field })?;
                    claimed += 1;
                }
                if claimed == 0 && !self.has_macros {
                    return Err(self.fail(format!("'{}' matches no placeholder", param)));
                }
                Ok(())
            }
            _ => {
                if self.open_object.is_some() {
                    return Err(self.fail("at most one untyped object argument may be bound by name"));
                }
                self.open_object = Some((source, prefix.map(str::to_string)));
                Ok(())
            }
        }
    }
}

impl ParameterBindingPlan {
    pub fn build(method: &MethodDescriptor, plan: &QueryPlan) -> Result<Self> {
        let fail = |msg: String| DaoError::config(format!("{}: {}", method.qualified_name(), msg));
        let params = &method.params;
        let last = params.len().saturating_sub(1);

        let mut strategies = Vec::with_capacity(params.len());
        let (mut mapper, mut filter, mut extractor) = (None, None, None);
        let mut statement_args = Vec::new();

        for (i, param) in params.iter().enumerate() {
            let strategy = match param.ty {
                TypeShape::RowMapper => {
                    if i != last || mapper.is_some() {
                        return Err(fail("a row mapper must be the last parameter".into()));
                    }
                    mapper = Some(i);
                    BindingStrategy::Mapper
                }
                TypeShape::RowFilter => {
                    let before_mapper = i + 1 == last && params[last].ty == TypeShape::RowMapper;
                    if (i != last && !before_mapper) || filter.is_some() {
                        return Err(fail(
                            "a row filter must be last or directly before the row mapper".into(),
                        ));
                    }
                    filter = Some(i);
                    BindingStrategy::Filter
                }
                TypeShape::ResultExtractor => {
                    if i != last || extractor.is_some() {
                        return Err(fail("a result extractor must be the last parameter".into()));
                    }
                    extractor = Some(i);
                    BindingStrategy::Extractor
                }
                _ if param.is_macro() => BindingStrategy::MacroSubstitution,
                _ => {
                    statement_args.push(i);
                    // Placeholder; replaced below.
                    BindingStrategy::Positional(usize::MAX)
                }
            };
            strategies.push(strategy);
        }
        if extractor.is_some() && (mapper.is_some() || filter.is_some()) {
            return Err(fail(
                "a result extractor cannot be combined with a row mapper or filter".into(),
            ));
        }

        let batch_arg = plan.is_batch.then(|| statement_args.first().copied()).flatten();
        if plan.is_batch && batch_arg.is_none() {
            return Err(fail("batch methods need a collection argument".into()));
        }
        let entity_arg = statement_args.iter().copied().find(|&i| {
            let ty = &params[i].ty;
            let ty = if Some(i) == batch_arg { ty.element().unwrap_or(ty) } else { ty };
            matches!(ty.unwrap_optional(), TypeShape::Entity(_))
        });

        let out_positions: HashSet<usize> = plan.out_parameters.iter().map(|o| o.position).collect();
        let has_macros = params.iter().any(|p| p.is_macro());

        let mut out = Self {
            strategies,
            named: plan.is_named,
            direct: false,
            out_positions,
            names: HashMap::new(),
            open_object: None,
            positional_args: Vec::new(),
            expansion: None,
            batch_arg,
            entity_arg,
            mapper,
            filter,
            extractor,
        };

        if plan.is_named {
            out.build_named(method, plan, &statement_args, has_macros)?;
        } else {
            out.build_positional(method, plan, &statement_args, has_macros)?;
        }
        Ok(out)
    }

    fn build_named(
        &mut self,
        method: &MethodDescriptor,
        plan: &QueryPlan,
        statement_args: &[usize],
        has_macros: bool,
    ) -> Result<()> {
        let parsed = &plan.parsed;
        let mut placeholders = Vec::new();
        for (slot, name) in parsed.named_parameters().iter().enumerate() {
            if !self.out_positions.contains(&(slot + 1)) && !placeholders.contains(name) {
                placeholders.push(name.clone());
            }
        }

        let mut b = Builder {
            method,
            placeholders,
            has_macros,
            names: HashMap::new(),
            open_object: None,
        };

        for &i in statement_args {
            let param = &method.params[i];
            if Some(i) == self.batch_arg {
                let element = param.ty.element().cloned().unwrap_or(TypeShape::Any);
                let prefix = match &param.directive {
                    ParamDirective::BindObject { prefix } => prefix.clone(),
                    _ => None,
                };
                if element.unwrap_optional().is_scalar() {
                    if let ParamDirective::Bind(name) = &param.directive {
                        b.claim(name, NameSource::Value(Source::Element))?;
                        self.strategies[i] = BindingStrategy::BatchElements;
                    }
                    // Otherwise claimed once every other argument has taken its names.
                    continue;
                }
                b.object(&param.name, Source::Element, &element, prefix.as_deref())?;
                self.strategies[i] = BindingStrategy::BatchElements;
                continue;
            }

            self.strategies[i] = match &param.directive {
                ParamDirective::Bind(name) => {
                    if !b.placeholders.contains(name) && !b.has_macros {
                        return Err(b.fail(format!("no placeholder named :{}", name)));
                    }
                    b.claim(name, NameSource::Value(Source::Arg(i)))?;
                    BindingStrategy::NamedField(name.clone())
                }
                ParamDirective::BindObject { prefix } => {
                    b.object(&param.name, Source::Arg(i), &param.ty, prefix.as_deref())?;
                    BindingStrategy::WholeObject { prefix: prefix.clone() }
                }
                ParamDirective::Expand => {
                    return Err(b.fail(format!(
                        "'{}' expands a positional list; use a list binding macro with named parameters",
                        param.name
                    )));
                }
                ParamDirective::Macro { .. } => BindingStrategy::MacroSubstitution,
                ParamDirective::Auto => {
                    let ty = param.ty.unwrap_optional();
                    if b.placeholders.contains(&param.name) && !matches!(ty, TypeShape::Entity(_) | TypeShape::Record) {
                        b.claim(&param.name, NameSource::Value(Source::Arg(i)))?;
                        BindingStrategy::NamedField(param.name.clone())
                    } else if ty.is_structured() || matches!(ty, TypeShape::Any) {
                        b.object(&param.name, Source::Arg(i), &param.ty, None)?;
                        BindingStrategy::WholeObject { prefix: None }
                    } else {
                        return Err(b.fail(format!(
                            "parameter '{}' matches no placeholder; declare the name it binds to",
                            param.name
                        )));
                    }
                }
            };
        }

        if let Some(i) = self.batch_arg
            && self.strategies[i] != BindingStrategy::BatchElements
        {
            let unclaimed: Vec<&String> =
                b.placeholders.iter().filter(|p| !b.names.contains_key(*p)).collect();
            if unclaimed.len() != 1 {
                return Err(b.fail(format!(
                    "scalar batch elements need exactly one unbound placeholder, found {}",
                    unclaimed.len()
                )));
            }
            let name = unclaimed[0].clone();
            b.claim(&name, NameSource::Value(Source::Element))?;
            self.strategies[i] = BindingStrategy::BatchElements;
        }

        if b.open_object.is_none()
            && let Some(missing) = b.placeholders.iter().find(|p| !b.names.contains_key(*p))
        {
            return Err(b.fail(format!("placeholder :{} has no matching argument", missing)));
        }

        self.names = b.names;
        self.open_object = b.open_object;
        Ok(())
    }

    fn build_positional(
        &mut self,
        method: &MethodDescriptor,
        plan: &QueryPlan,
        statement_args: &[usize],
        has_macros: bool,
    ) -> Result<()> {
        let fail = |msg: String| DaoError::config(format!("{}: {}", method.qualified_name(), msg));
        let slots = plan.parameter_count - self.out_positions.len();

        if let Some(batch) = self.batch_arg {
            if statement_args.len() != 1 {
                return Err(fail(
                    "positional batch methods take the collection as their only argument".into(),
                ));
            }
            let element = method.params[batch].ty.element().cloned().unwrap_or(TypeShape::Any);
            match element.unwrap_optional() {
                t if t.is_scalar() && slots != 1 => {
                    return Err(fail(format!(
                        "scalar batch elements fill one placeholder, query has {}",
                        slots
                    )));
                }
                TypeShape::Entity(_) | TypeShape::Record | TypeShape::Map(..) => {
                    return Err(fail("structured batch elements need named parameters".into()));
                }
                _ => {}
            }
            self.strategies[batch] = BindingStrategy::BatchElements;
            return Ok(());
        }

        for (k, &i) in statement_args.iter().enumerate() {
            let param = &method.params[i];
            self.strategies[i] = match &param.directive {
                ParamDirective::Expand => {
                    if k + 1 != statement_args.len() {
                        return Err(fail(format!(
                            "expanded list '{}' must be the last statement argument",
                            param.name
                        )));
                    }
                    if !self.out_positions.is_empty() {
                        return Err(fail("list expansion cannot be combined with output parameters".into()));
                    }
                    self.expansion = Some(i);
                    BindingStrategy::ListExpansion
                }
                ParamDirective::Auto if !param.ty.unwrap_optional().is_structured() => {
                    self.positional_args.push(i);
                    BindingStrategy::Positional(k)
                }
                ParamDirective::Auto | ParamDirective::BindObject { .. } => {
                    return Err(fail(format!(
                        "structured argument '{}' needs named parameters",
                        param.name
                    )));
                }
                ParamDirective::Bind(name) => {
                    return Err(fail(format!(
                        "'{}' binds :{} but the query uses '?' placeholders",
                        param.name, name
                    )));
                }
                ParamDirective::Macro { .. } => BindingStrategy::MacroSubstitution,
            };
        }

        if !has_macros && statement_args.len() != slots {
            return Err(fail(format!(
                "{} arguments for {} placeholders",
                statement_args.len(),
                slots
            )));
        }

        self.direct = !has_macros && self.expansion.is_none();
        Ok(())
    }

    pub fn strategies(&self) -> &[BindingStrategy] {
        &self.strategies
    }

    pub fn is_named(&self) -> bool {
        self.named
    }

    /// Every argument maps straight onto the next slot.
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    pub(crate) fn entity_arg(&self) -> Option<usize> {
        self.entity_arg
    }

    pub(crate) fn handlers(&self, args: &[Arg]) -> RowHandlers {
        RowHandlers {
            mapper: self.mapper.and_then(|i| args.get(i)?.as_mapper().cloned()),
            filter: self.filter.and_then(|i| args.get(i)?.as_filter().cloned()),
            extractor: self.extractor.and_then(|i| args.get(i)?.as_extractor().cloned()),
        }
    }

    fn in_positions(&self, parsed: &ParsedSql) -> Vec<usize> {
        (1..=parsed.parameter_count())
            .filter(|p| !self.out_positions.contains(p))
            .collect()
    }

    fn arg_values(&self, args: &[Arg]) -> Result<Vec<Value>> {
        args.iter()
            .enumerate()
            .map(|(i, arg)| match self.strategies.get(i) {
                Some(BindingStrategy::Mapper | BindingStrategy::Filter | BindingStrategy::Extractor) => {
                    Ok(Value::Null)
                }
                _ => arg.value(),
            })
            .collect()
    }

    fn resolve(
        &self,
        name: &str,
        values: &[Value],
        element: Option<&Value>,
        generated: &HashMap<String, Value>,
    ) -> Result<Value> {
        if let Some(v) = generated.get(name) {
            return Ok(v.clone());
        }
        let source_value = |source: &Source| -> Result<Value> {
            match source {
                Source::Arg(i) => values.get(*i).cloned().ok_or_else(|| {
                    DaoError::ExecutionError(format!("argument {} missing", i))
                }),
                Source::Element => element.cloned().ok_or_else(|| {
                    DaoError::ExecutionError("no batch element in scope".into())
                }),
            }
        };

        match self.names.get(name) {
            Some(NameSource::Value(source)) => source_value(source),
            Some(NameSource::Field { source, field }) => {
                Ok(field_of(&source_value(source)?, field).unwrap_or(Value::Null))
            }
            None => {
                let (source, prefix) = self.open_object.as_ref().ok_or_else(|| {
                    DaoError::ExecutionError(format!("no argument binds :{}", name))
                })?;
                let field = relative(name, prefix.as_deref()).ok_or_else(|| {
                    DaoError::ExecutionError(format!("no argument binds :{}", name))
                })?;
                field_of(&source_value(source)?, field).ok_or_else(|| {
                    DaoError::ExecutionError(format!("no value for :{}", name))
                })
            }
        }
    }

    fn bind_named(
        &self,
        query: &RenderedQuery,
        values: &[Value],
        element: Option<&Value>,
    ) -> Result<Vec<(usize, Value)>> {
        let mut out = Vec::with_capacity(query.parsed().parameter_count());
        for (slot, name) in query.parsed().named_parameters().iter().enumerate() {
            let position = slot + 1;
            if self.out_positions.contains(&position) {
                continue;
            }
            out.push((position, self.resolve(name, values, element, query.generated())?));
        }
        Ok(out)
    }

    /// Statement parameters for one call, as 1-based `(index, value)` pairs.
    pub fn bind(&self, query: &RenderedQuery, args: &[Arg]) -> Result<Vec<(usize, Value)>> {
        if self.named || query.parsed().is_named() {
            let values = self.arg_values(args)?;
            return self.bind_named(query, &values, None);
        }

        let mut values = Vec::with_capacity(self.positional_args.len());
        for &i in &self.positional_args {
            values.push(args[i].value()?);
        }
        if let Some(i) = self.expansion {
            values.extend(list_items(args[i].value()?, "expanded argument")?);
        }

        if self.expansion.is_none() {
            let positions = self.in_positions(query.parsed());
            if positions.len() != values.len() {
                return Err(DaoError::ExecutionError(format!(
                    "{} values for {} placeholders",
                    values.len(),
                    positions.len()
                )));
            }
            return Ok(positions.into_iter().zip(values).collect());
        }
        Ok(values.into_iter().enumerate().map(|(i, v)| (i + 1, v)).collect())
    }

    /// One parameter set per element of the batch argument.
    pub fn bind_batch(&self, query: &RenderedQuery, args: &[Arg]) -> Result<Vec<Vec<(usize, Value)>>> {
        let batch = self
            .batch_arg
            .ok_or_else(|| DaoError::ExecutionError("not a batch method".into()))?;
        let values = self.arg_values(args)?;
        let elements = list_items(values[batch].clone(), "batch argument")?;

        if self.named || query.parsed().is_named() {
            return elements
                .iter()
                .map(|element| self.bind_named(query, &values, Some(element)))
                .collect();
        }

        let positions = self.in_positions(query.parsed());
        elements
            .into_iter()
            .map(|element| {
                let set = match element {
                    Value::List(items) => items,
                    single => vec![single],
                };
                if set.len() != positions.len() {
                    return Err(DaoError::ExecutionError(format!(
                        "batch element has {} values for {} placeholders",
                        set.len(),
                        positions.len()
                    )));
                }
                Ok(positions.iter().copied().zip(set).collect())
            })
            .collect()
    }
}

/// Comma-separated SQL literals for a list macro.
pub(crate) fn list_literal(value: &Value) -> String {
    fn literal(value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            other => other.to_string(),
        }
    }
    match value {
        Value::List(items) => items.iter().map(literal).collect::<Vec<_>>().join(", "),
        other => literal(other),
    }
}

/// Plain text of a macro value.
pub(crate) fn macro_text(value: &Value, kind: MacroKind) -> String {
    match (kind, value) {
        (MacroKind::List, v) => list_literal(v),
        (_, Value::Text(s)) => s.clone(),
        (_, Value::Null) => String::new(),
        (_, other) => other.to_string(),
    }
}

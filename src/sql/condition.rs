/// WHERE-clause algebra over named parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Eq { column: String, param: String },
    In { column: String, params: Vec<String> },
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    pub fn eq(column: impl Into<String>, param: impl Into<String>) -> Self {
        Self::Eq {
            column: column.into(),
            param: param.into(),
        }
    }

    pub fn in_list(column: impl Into<String>, params: Vec<String>) -> Self {
        Self::In {
            column: column.into(),
            params,
        }
    }

    /// Collapses single-element conjunctions.
    pub fn and(mut parts: Vec<Condition>) -> Self {
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Self::And(parts)
        }
    }

    pub fn or(mut parts: Vec<Condition>) -> Self {
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Self::Or(parts)
        }
    }

    /// Renders with `:name` placeholders.
    pub fn to_sql(&self) -> String {
        match self {
            Self::Eq { column, param } => format!("{} = :{}", column, param),
            Self::In { params, .. } if params.is_empty() => "1 = 0".to_string(),
            Self::In { column, params } => {
                let slots: Vec<String> = params.iter().map(|p| format!(":{}", p)).collect();
                format!("{} IN ({})", column, slots.join(", "))
            }
            Self::And(parts) => join(parts, " AND "),
            Self::Or(parts) => join(parts, " OR "),
        }
    }
}

fn join(parts: &[Condition], sep: &str) -> String {
    parts
        .iter()
        .map(|p| match p {
            Condition::And(_) | Condition::Or(_) => format!("({})", p.to_sql()),
            _ => p.to_sql(),
        })
        .collect::<Vec<_>>()
        .join(sep)
}

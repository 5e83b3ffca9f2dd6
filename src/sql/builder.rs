use super::Condition;

/// Row-limiting clause flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// `... LIMIT n` (PostgreSQL, MySQL, SQLite)
    #[default]
    Limit,
    /// `... FETCH FIRST n ROWS ONLY` (Oracle 12c+, DB2, standard SQL)
    FetchFirst,
    /// `SELECT TOP n ...` (SQL Server)
    Top,
}

impl Dialect {
    pub fn limit(&self, select_list: &str, rest: &str, n: usize) -> String {
        match self {
            Self::Limit => format!("SELECT {} {} LIMIT {}", select_list, rest, n),
            Self::FetchFirst => {
                format!("SELECT {} {} FETCH FIRST {} ROWS ONLY", select_list, rest, n)
            }
            Self::Top => format!("SELECT TOP {} {} {}", n, select_list, rest),
        }
    }
}

/// Property-to-column naming used by generated statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamingPolicy {
    #[default]
    SnakeCase,
    UpperSnakeCase,
    AsIs,
}

impl NamingPolicy {
    pub fn column_name(&self, property: &str) -> String {
        match self {
            Self::AsIs => property.to_string(),
            Self::SnakeCase => snake_case(property),
            Self::UpperSnakeCase => snake_case(property).to_ascii_uppercase(),
        }
    }
}

fn snake_case(property: &str) -> String {
    let mut out = String::with_capacity(property.len() + 4);
    for (i, c) in property.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

pub fn select_sql(columns: &[String], table: &str, condition: &Condition) -> String {
    format!(
        "SELECT {} FROM {} WHERE {}",
        columns.join(", "),
        table,
        condition.to_sql()
    )
}

pub fn exists_sql(dialect: Dialect, table: &str, condition: &Condition) -> String {
    dialect.limit("1", &format!("FROM {} WHERE {}", table, condition.to_sql()), 1)
}

/// `columns` and `params` are index-aligned.
pub fn insert_sql(table: &str, columns: &[String], params: &[String]) -> String {
    let slots: Vec<String> = params.iter().map(|p| format!(":{}", p)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        slots.join(", ")
    )
}

pub fn update_sql(table: &str, sets: &[(String, String)], condition: &Condition) -> String {
    let assignments: Vec<String> = sets
        .iter()
        .map(|(column, param)| format!("{} = :{}", column, param))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE {}",
        table,
        assignments.join(", "),
        condition.to_sql()
    )
}

pub fn delete_sql(table: &str, condition: &Condition) -> String {
    format!("DELETE FROM {} WHERE {}", table, condition.to_sql())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_policy() {
        assert_eq!(NamingPolicy::SnakeCase.column_name("firstName"), "first_name");
        assert_eq!(NamingPolicy::UpperSnakeCase.column_name("firstName"), "FIRST_NAME");
        assert_eq!(NamingPolicy::AsIs.column_name("firstName"), "firstName");
    }

    #[test]
    fn test_exists_by_dialect() {
        let cond = Condition::eq("id", "id");
        assert_eq!(
            exists_sql(Dialect::Limit, "account", &cond),
            "SELECT 1 FROM account WHERE id = :id LIMIT 1"
        );
        assert_eq!(
            exists_sql(Dialect::FetchFirst, "account", &cond),
            "SELECT 1 FROM account WHERE id = :id FETCH FIRST 1 ROWS ONLY"
        );
        assert_eq!(
            exists_sql(Dialect::Top, "account", &cond),
            "SELECT TOP 1 1 FROM account WHERE id = :id"
        );
    }

    #[test]
    fn test_write_statements() {
        let cond = Condition::eq("id", "id");
        assert_eq!(
            insert_sql("account", &["id".into(), "first_name".into()], &["id".into(), "firstName".into()]),
            "INSERT INTO account (id, first_name) VALUES (:id, :firstName)"
        );
        assert_eq!(
            update_sql("account", &[("first_name".into(), "firstName".into())], &cond),
            "UPDATE account SET first_name = :firstName WHERE id = :id"
        );
        assert_eq!(delete_sql("account", &cond), "DELETE FROM account WHERE id = :id");
    }
}

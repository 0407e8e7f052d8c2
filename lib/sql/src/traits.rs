use crate::error::SQLError;

/// A dynamically-typed SQL parameter value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// A row returned from a SQL query: column name to value.
#[derive(Debug, Clone)]
pub struct Row {
    pub columns: Vec<(String, Value)>,
}

impl Row {
    /// Get a column value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Get a text column value by name.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Value::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get an integer column value by name.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(Value::Integer(i)) => Some(*i),
            _ => None,
        }
    }
}

/// SQLStore provides a SQL execution interface backed by an embedded database.
pub trait SQLStore: Send + Sync {
    /// Execute a query and return rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, SQLError>;

    /// Execute a statement (INSERT/UPDATE/DELETE) and return affected row count.
    fn exec(&self, sql: &str, params: &[Value]) -> Result<u64, SQLError>;

    /// Execute a batch of semicolon-separated statements without parameters.
    /// Used for schema initialisation, where a single string carries the
    /// CREATE TABLE plus its indexes.
    fn exec_batch(&self, sql: &str) -> Result<(), SQLError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_lookup_by_name() {
        let row = Row {
            columns: vec![
                ("id".to_string(), Value::Text("t1".to_string())),
                ("n".to_string(), Value::Integer(7)),
                ("blob".to_string(), Value::Null),
            ],
        };
        assert_eq!(row.get_str("id"), Some("t1"));
        assert_eq!(row.get_i64("n"), Some(7));
        assert_eq!(row.get_str("n"), None);
        assert!(matches!(row.get("blob"), Some(Value::Null)));
        assert!(row.get("missing").is_none());
    }
}

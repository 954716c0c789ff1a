use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::{AnyPool, Arguments, Column, Row, TypeInfo};
use tracing::debug;

use crate::data::{Operator, QueryRequest, Record, RecordSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    Question,
    Dollar,
}

/// Record source backed by a SQL database through the sqlx `Any` driver.
pub struct SqlRecordSource {
    pool: AnyPool,
    placeholder: Placeholder,
}

impl SqlRecordSource {
    /// Connect to `url` (e.g. `sqlite://data.db?mode=rwc`).
    pub async fn connect(url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let pool = AnyPool::connect(url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to database '{}': {}", url, e))?;

        let placeholder = if url.starts_with("postgres") {
            Placeholder::Dollar
        } else {
            Placeholder::Question
        };

        Ok(Self { pool, placeholder })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

#[async_trait]
impl RecordSource for SqlRecordSource {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Record>> {
        let (sql, params) = build_select(request, self.placeholder)?;
        debug!(sql = %sql, params = params.len(), "Querying records");

        let args = bind_params(&params)?;
        let rows: Vec<AnyRow> = sqlx::query_with(&sql, args)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Record query on '{}' failed: {}", request.table, e))?;

        rows.iter().map(row_to_record).collect()
    }
}

fn check_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !valid {
        bail!("Invalid SQL identifier: '{}'", name);
    }
    Ok(())
}

fn build_select(request: &QueryRequest, placeholder: Placeholder) -> Result<(String, Vec<Value>)> {
    check_identifier(&request.table)?;

    let mut params: Vec<Value> = Vec::new();
    let next = |value: &Value, params: &mut Vec<Value>| {
        params.push(value.clone());
        match placeholder {
            Placeholder::Question => "?".to_string(),
            Placeholder::Dollar => format!("${}", params.len()),
        }
    };

    let mut clauses = Vec::new();
    for criterion in &request.filter.criteria {
        check_identifier(&criterion.field)?;
        let field = &criterion.field;
        let clause = match criterion.operator {
            Operator::Equals | Operator::NotEquals | Operator::GreaterThan | Operator::LessThan => {
                let value = criterion.values.first().ok_or_else(|| {
                    anyhow::anyhow!("Criterion on '{}' requires a value", field)
                })?;
                let op = match criterion.operator {
                    Operator::Equals => "=",
                    Operator::NotEquals => "<>",
                    Operator::GreaterThan => ">",
                    _ => "<",
                };
                if value.is_null() {
                    match criterion.operator {
                        Operator::Equals => format!("{} IS NULL", field),
                        Operator::NotEquals => format!("{} IS NOT NULL", field),
                        _ => bail!("Cannot compare '{}' against null", field),
                    }
                } else {
                    format!("{} {} {}", field, op, next(value, &mut params))
                }
            }
            Operator::In | Operator::NotIn => {
                let negate = criterion.operator == Operator::NotIn;
                if criterion.values.is_empty() {
                    if negate { "1 = 1".to_string() } else { "1 = 0".to_string() }
                } else {
                    let marks: Vec<String> = criterion
                        .values
                        .iter()
                        .map(|v| next(v, &mut params))
                        .collect();
                    let kw = if negate { "NOT IN" } else { "IN" };
                    format!("{} {} ({})", field, kw, marks.join(", "))
                }
            }
        };
        clauses.push(clause);
    }

    let mut sql = format!("SELECT * FROM {}", request.table);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    if let Some(limit) = request.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    Ok((sql, params))
}

/// Bind typed JSON parameters to an sqlx AnyArguments buffer.
fn bind_params(params: &[Value]) -> Result<AnyArguments<'_>> {
    let mut args = AnyArguments::default();
    for (i, param) in params.iter().enumerate() {
        match param {
            Value::String(s) => args
                .add(s.as_str())
                .map_err(|e| anyhow::anyhow!("Failed to bind param {}: {}", i, e))?,
            Value::Number(n) => {
                if let Some(int_val) = n.as_i64() {
                    args.add(int_val)
                        .map_err(|e| anyhow::anyhow!("Failed to bind param {}: {}", i, e))?;
                } else if let Some(float_val) = n.as_f64() {
                    args.add(float_val)
                        .map_err(|e| anyhow::anyhow!("Failed to bind param {}: {}", i, e))?;
                }
            }
            Value::Bool(b) => args
                .add(*b)
                .map_err(|e| anyhow::anyhow!("Failed to bind param {}: {}", i, e))?,
            Value::Null => args
                .add(None::<String>)
                .map_err(|e| anyhow::anyhow!("Failed to bind param {}: {}", i, e))?,
            _ => bail!("Unsupported filter value at index {}: arrays/objects cannot be bound", i),
        }
    }
    Ok(args)
}

/// Convert a row to a record by inspecting column types at runtime.
fn row_to_record(row: &AnyRow) -> Result<Record> {
    let mut map = Record::new();

    for col in row.columns() {
        let name = col.name().to_string();
        let value = match col.type_info().name() {
            "INTEGER" | "INT" | "INT4" | "INT8" | "BIGINT" | "SMALLINT" => row
                .try_get::<i64, _>(col.ordinal())
                .map(|v| serde_json::json!(v))
                .unwrap_or(Value::Null),
            "REAL" | "FLOAT" | "FLOAT4" | "FLOAT8" | "DOUBLE" | "NUMERIC" => row
                .try_get::<f64, _>(col.ordinal())
                .map(|v| serde_json::json!(v))
                .unwrap_or(Value::Null),
            "BOOLEAN" | "BOOL" => row
                .try_get::<bool, _>(col.ordinal())
                .map(Value::Bool)
                .unwrap_or(Value::Null),
            _ => row
                .try_get::<String, _>(col.ordinal())
                .map(Value::String)
                .unwrap_or(Value::Null),
        };
        map.insert(name, value);
    }

    Ok(map)
}

//! ProvisionSchema: create destination tables when absent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::ports::Warehouse;
use super::Stage;
use crate::context::StageContext;
use crate::core::{Artifact, ArtifactKind, FailureCause, StageKind, StageOutcome};
use crate::utils::{validate_identifier, IdentifierError};

/// A column of a destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Column name.
    pub name: String,
    /// SQL type, e.g. `DECIMAL(10,2)`.
    #[serde(rename = "type")]
    pub sql_type: String,
}

impl ColumnDefinition {
    /// Creates a column definition.
    #[must_use]
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
        }
    }
}

/// A destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Unqualified table name.
    pub name: String,
    /// Columns, in order.
    pub columns: Vec<ColumnDefinition>,
}

impl TableDefinition {
    /// Creates a table definition.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// The default fact table.
    #[must_use]
    pub fn sales_fact() -> Self {
        Self::new(
            "sales_fact",
            vec![
                ColumnDefinition::new("sale_id", "INTEGER"),
                ColumnDefinition::new("product_id", "INTEGER"),
                ColumnDefinition::new("customer_id", "INTEGER"),
                ColumnDefinition::new("sale_date", "DATE"),
                ColumnDefinition::new("amount", "DECIMAL(10,2)"),
                ColumnDefinition::new("processed_date", "DATE"),
            ],
        )
    }

    /// The default customer dimension.
    #[must_use]
    pub fn customer_dimension() -> Self {
        Self::new(
            "customer_dimension",
            vec![
                ColumnDefinition::new("customer_id", "INTEGER"),
                ColumnDefinition::new("customer_name", "VARCHAR(100)"),
                ColumnDefinition::new("segment", "VARCHAR(50)"),
                ColumnDefinition::new("region", "VARCHAR(50)"),
            ],
        )
    }

    /// Checks the table and column names.
    pub fn validate(&self) -> Result<(), IdentifierError> {
        validate_identifier(&self.name)?;
        if self.columns.is_empty() {
            return Err(IdentifierError {
                identifier: self.name.clone(),
                reason: "table has no columns",
            });
        }
        for column in &self.columns {
            validate_identifier(&column.name)?;
            if !is_safe_type(&column.sql_type) {
                return Err(IdentifierError {
                    identifier: column.sql_type.clone(),
                    reason: "unsupported column type",
                });
            }
        }
        Ok(())
    }

    /// Renders an idempotent `CREATE TABLE IF NOT EXISTS` statement.
    #[must_use]
    pub fn create_statement(&self, qualifier: Option<&str>) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("    {} {}", c.name, c.sql_type))
            .collect::<Vec<_>>()
            .join(",\n");
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{columns}\n)",
            qualify(qualifier, &self.name)
        )
    }
}

/// Column types are limited to a word with an optional numeric argument list.
fn is_safe_type(sql_type: &str) -> bool {
    let (base, args) = match sql_type.split_once('(') {
        Some((base, rest)) => match rest.strip_suffix(')') {
            Some(args) => (base, Some(args)),
            None => return false,
        },
        None => (sql_type, None),
    };
    validate_identifier(base).is_ok()
        && args.map_or(true, |a| {
            a.split(',')
                .all(|n| !n.trim().is_empty() && n.trim().chars().all(|c| c.is_ascii_digit()))
        })
}

fn qualify(qualifier: Option<&str>, name: &str) -> String {
    match qualifier {
        Some(q) if !q.is_empty() => format!("{q}.{name}"),
        _ => name.to_string(),
    }
}

/// Issues one `CREATE TABLE IF NOT EXISTS` per configured table.
pub struct ProvisionSchemaStage {
    name: String,
    warehouse: Arc<dyn Warehouse>,
    tables: Vec<TableDefinition>,
    qualifier: Option<String>,
}

impl ProvisionSchemaStage {
    /// Creates a provision stage for the given tables.
    #[must_use]
    pub fn new(warehouse: Arc<dyn Warehouse>, tables: Vec<TableDefinition>) -> Self {
        Self {
            name: StageKind::ProvisionSchema.to_string(),
            warehouse,
            tables,
            qualifier: None,
        }
    }

    /// Qualifies table names with `DATABASE.SCHEMA`.
    #[must_use]
    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// Overrides the stage name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl std::fmt::Debug for ProvisionSchemaStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionSchemaStage")
            .field("name", &self.name)
            .field("tables", &self.tables.iter().map(|t| &t.name).collect::<Vec<_>>())
            .field("qualifier", &self.qualifier)
            .finish()
    }
}

#[async_trait]
impl Stage for ProvisionSchemaStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::ProvisionSchema
    }

    async fn execute(&self, _inputs: &[Artifact], ctx: &StageContext) -> StageOutcome {
        if self.tables.is_empty() {
            return StageOutcome::fatal(FailureCause::data_contract("no tables to provision"));
        }

        // Every definition is checked before the first statement runs.
        for table in &self.tables {
            if let Err(e) = table.validate() {
                return StageOutcome::fatal(FailureCause::data_contract(format!(
                    "table '{}': {e}",
                    table.name
                )));
            }
        }
        if let Some(q) = &self.qualifier {
            if let Err(e) = crate::utils::validate_qualified_name(q) {
                return StageOutcome::fatal(FailureCause::data_contract(e.to_string()));
            }
        }

        let qualifier = self.qualifier.as_deref();
        let mut provisioned = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            let statement = table.create_statement(qualifier);
            debug!(run_id = %ctx.run_id(), table = %table.name, "Executing DDL");
            if let Err(e) = self.warehouse.execute_ddl(&statement).await {
                return e.into_outcome(&format!("create table '{}'", table.name), ctx.attempt());
            }
            provisioned.push(qualify(qualifier, &table.name));
        }

        info!(run_id = %ctx.run_id(), tables = provisioned.len(), "Schema provisioned");

        let count = provisioned.len() as u64;
        let artifact = Artifact::new(ArtifactKind::Schema, StageKind::ProvisionSchema)
            .with_locations(provisioned);
        StageOutcome::success_with_metrics(artifact, [("tables_provisioned", count)])
    }
}

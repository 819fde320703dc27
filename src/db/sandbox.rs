//! Scoped temp tables and transactions
//!
//! Both helpers hand the caller's connection to a closure and undo their
//! setup afterwards on every exit path, unwinding included.

use anyhow::Result;

use super::{DbError, SqlConnection};
use crate::error::SqlMetaError;
use crate::model::TempTable;
use crate::parser::{rewrite_local_temp_tables, RunToken};

/// How temp table definitions are materialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxScope {
    /// Scripts and bare temp tables: `#name` becomes a run-prefixed `##name`
    /// so introspection running in another session can see it.
    Script,
    /// Procedures: definitions run unchanged, creating session-local tables.
    Procedure,
}

/// A set of temp table definitions that exist only while [`run`](Self::run) executes.
#[derive(Debug, Clone, Copy)]
pub struct TempTableSandbox<'a> {
    tables: &'a [TempTable],
    scope: SandboxScope,
    token: &'a RunToken,
}

impl<'a> TempTableSandbox<'a> {
    pub fn new(tables: &'a [TempTable], scope: SandboxScope, token: &'a RunToken) -> Self {
        Self {
            tables,
            scope,
            token,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Definition text as it will be executed, in declaration order.
    pub fn create_statements(&self) -> Vec<String> {
        self.tables
            .iter()
            .map(|t| match self.scope {
                SandboxScope::Script => rewrite_local_temp_tables(&t.create_statement, self.token),
                SandboxScope::Procedure => t.create_statement.clone(),
            })
            .collect()
    }

    /// Names of the tables as they exist on the server.
    pub fn table_names(&self) -> Vec<String> {
        self.tables
            .iter()
            .map(|t| match self.scope {
                SandboxScope::Script => self.token.global_temp_table_name(&t.name),
                SandboxScope::Procedure => t.name.clone(),
            })
            .collect()
    }

    /// Creates every table, runs `op`, then drops the tables in creation order.
    ///
    /// Tables already created are dropped even when a later definition fails.
    pub fn run<T>(
        &self,
        conn: &mut dyn SqlConnection,
        op: impl FnOnce(&mut dyn SqlConnection) -> Result<T>,
    ) -> Result<T> {
        let mut guard = DisposeGuard {
            conn,
            drops: Vec::new(),
            armed: true,
        };

        for (statement, name) in self.create_statements().into_iter().zip(self.table_names()) {
            tracing::debug!(table = %name, "creating temp table");
            if let Err(source) = guard.conn.execute(&statement) {
                if let Err(e) = guard.dispose() {
                    tracing::warn!(error = %e, "dropping partially created temp tables failed");
                }
                return Err(SqlMetaError::Database {
                    context: format!("creating temp table {}", name),
                    source,
                }
                .into());
            }
            guard.drops.push(drop_statement(&name));
        }

        let result = op(&mut *guard.conn);
        let disposed = guard.dispose();
        let value = result?;
        disposed.map_err(|source| SqlMetaError::Database {
            context: "dropping temp tables".to_string(),
            source,
        })?;
        Ok(value)
    }
}

/// Begins a transaction, runs `op` and always rolls the transaction back.
pub fn with_rolled_back_transaction<T>(
    conn: &mut dyn SqlConnection,
    op: impl FnOnce(&mut dyn SqlConnection) -> Result<T>,
) -> Result<T> {
    conn.execute("BEGIN TRANSACTION")
        .map_err(|source| SqlMetaError::Database {
            context: "starting a transaction".to_string(),
            source,
        })?;

    let mut guard = DisposeGuard {
        conn,
        drops: vec![ROLLBACK.to_string()],
        armed: true,
    };
    let result = op(&mut *guard.conn);
    let rolled_back = guard.dispose();
    let value = result?;
    rolled_back.map_err(|source| SqlMetaError::Database {
        context: "rolling back".to_string(),
        source,
    })?;
    Ok(value)
}

const ROLLBACK: &str = "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION";

fn drop_statement(name: &str) -> String {
    format!("IF OBJECT_ID('tempdb..{0}') IS NOT NULL DROP TABLE {0}", name)
}

/// Runs cleanup statements once, either explicitly or when dropped during unwinding.
struct DisposeGuard<'c> {
    conn: &'c mut dyn SqlConnection,
    drops: Vec<String>,
    armed: bool,
}

impl DisposeGuard<'_> {
    /// Runs every cleanup statement; the first failure is returned after all were attempted.
    fn dispose(&mut self) -> Result<(), DbError> {
        self.armed = false;
        let mut first_error = None;
        for statement in &self.drops {
            if let Err(e) = self.conn.execute(statement) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for DisposeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.dispose() {
                tracing::warn!(error = %e, "cleanup after failed operation did not complete");
            }
        }
    }
}

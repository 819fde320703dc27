//! Parameter and result set inference against a scripted server

use pretty_assertions::assert_eq;

use rust_sqlmeta::assemble;
use rust_sqlmeta::catalog::TypeCatalog;
use rust_sqlmeta::db::{DbError, ExecutedColumn};
use rust_sqlmeta::inference::{
    infer_parameters, infer_result_set, InferenceContext, ResultSetStrategy,
};
use rust_sqlmeta::model::{Diagnostics, ExecutableUnit, Script};
use rust_sqlmeta::parser::RunToken;
use rust_sqlmeta::rules::{EffectiveRule, GlobRuleSet, ObjectRule, ParameterRule, RuleScope};
use rust_sqlmeta::SqlMetaError;

use crate::common::*;

fn types() -> TypeCatalog {
    TypeCatalog::from_parts(
        [
            (INT, "int".to_string()),
            (NVARCHAR, "nvarchar".to_string()),
            (BIT, "bit".to_string()),
        ],
        Vec::new(),
    )
}

fn token() -> RunToken {
    RunToken::new("run42")
}

// ============================================================================
// Parameters
// ============================================================================

#[test]
fn test_undeclared_parameters_follow_first_use() {
    let server = FakeServer::new();
    server.on(
        &[DESCRIBE_PARAMETERS],
        Reply::Rows(vec![
            undeclared_parameter_row("@status", NVARCHAR, 40),
            undeclared_parameter_row("@customer", INT, 4),
        ]),
    );
    let (types, token) = (types(), token());
    let ctx = InferenceContext {
        types: &types,
        token: &token,
        factory: None,
    };
    let script = Script::new(
        "orders/search",
        "SELECT * FROM dbo.Orders WHERE CustomerId = @customer AND Status = @status",
    );
    let mut diagnostics = Diagnostics::new();

    let parameters = infer_parameters(
        &mut server.connection(),
        &ctx,
        ExecutableUnit::Script(&script),
        &EffectiveRule::default(),
        &mut diagnostics,
    )
    .unwrap();

    let shape: Vec<(&str, String)> = parameters
        .iter()
        .map(|p| (p.name.as_str(), p.type_declaration()))
        .collect();
    assert_eq!(
        shape,
        vec![
            ("@customer", "int".to_string()),
            ("@status", "nvarchar(20)".to_string()),
        ]
    );
}

#[test]
fn test_declared_variables_are_not_parameters() {
    let server = FakeServer::new();
    let (types, token) = (types(), token());
    let ctx = InferenceContext {
        types: &types,
        token: &token,
        factory: None,
    };
    let script = Script::new("calc", "DECLARE @a int = 1; SELECT @a AS A, @a + 1 AS B");

    let parameters = infer_parameters(
        &mut server.connection(),
        &ctx,
        ExecutableUnit::Script(&script),
        &EffectiveRule::default(),
        &mut Diagnostics::new(),
    )
    .unwrap();

    assert!(parameters.is_empty());
    assert_eq!(server.position(DESCRIBE_PARAMETERS), None);
}

#[test]
fn test_rule_type_is_pinned_through_placeholder() {
    let server = FakeServer::new();
    server.on(
        &[DESCRIBE_PARAMETERS, "DECLARE @status nvarchar(10) = @run42_status;"],
        Reply::Rows(vec![
            undeclared_parameter_row("@run42_status", NVARCHAR, 20),
            undeclared_parameter_row("@customer", INT, 4),
        ]),
    );
    let (types, token) = (types(), token());
    let ctx = InferenceContext {
        types: &types,
        token: &token,
        factory: None,
    };
    let script = Script::new(
        "orders/search",
        "SELECT * FROM dbo.Orders WHERE CustomerId = @customer AND Status = @status",
    );
    let rule = EffectiveRule::default().with_parameter(
        "@Status",
        ParameterRule {
            sql_type: Some("nvarchar(10)".to_string()),
            nullable: Some(true),
            build_value: None,
        },
    );

    let parameters = infer_parameters(
        &mut server.connection(),
        &ctx,
        ExecutableUnit::Script(&script),
        &rule,
        &mut Diagnostics::new(),
    )
    .unwrap();

    assert_eq!(parameters[0].name, "@customer");
    assert!(!parameters[0].is_nullable);
    assert_eq!(parameters[1].name, "@status");
    assert_eq!(parameters[1].type_declaration(), "nvarchar(10)");
    assert!(parameters[1].is_nullable);
}

#[test]
fn test_unused_rule_parameter_is_warned() {
    let server = FakeServer::new();
    let (types, token) = (types(), token());
    let ctx = InferenceContext {
        types: &types,
        token: &token,
        factory: None,
    };
    let script = Script::new("ping", "SELECT 1 AS One");
    let rule = EffectiveRule::default().with_parameter("@id", ParameterRule::default());
    let mut diagnostics = Diagnostics::new();

    infer_parameters(
        &mut server.connection(),
        &ctx,
        ExecutableUnit::Script(&script),
        &rule,
        &mut diagnostics,
    )
    .unwrap();

    assert_eq!(diagnostics.warnings().len(), 1);
    assert!(diagnostics.warnings()[0].message.contains("@id"));
}

#[test]
fn test_parameter_of_unknown_type_is_fatal() {
    let server = FakeServer::new();
    server.on(
        &[DESCRIBE_PARAMETERS],
        Reply::Rows(vec![undeclared_parameter_row("@area", GEOGRAPHY, -1)]),
    );
    let (types, token) = (types(), token());
    let ctx = InferenceContext {
        types: &types,
        token: &token,
        factory: None,
    };
    let script = Script::new(
        "places/within",
        "SELECT Id FROM dbo.Places WHERE Shape.STWithin(@area) = 1",
    );

    let err = infer_parameters(
        &mut server.connection(),
        &ctx,
        ExecutableUnit::Script(&script),
        &EffectiveRule::default(),
        &mut Diagnostics::new(),
    )
    .unwrap_err();

    match err.downcast_ref::<SqlMetaError>() {
        Some(SqlMetaError::UnsupportedType { subject, unit, .. }) => {
            assert_eq!(subject, "parameter @area");
            assert_eq!(unit, "script 'places/within'");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_repeated_parameter_error_gets_guidance() {
    let server = FakeServer::new();
    server.on(
        &[DESCRIBE_PARAMETERS],
        Reply::Fail(DbError::server(
            11508,
            "The undeclared parameter '@a' is used more than once in the batch being analyzed.",
        )),
    );
    let (types, token) = (types(), token());
    let ctx = InferenceContext {
        types: &types,
        token: &token,
        factory: None,
    };
    let script = Script::new("twice", "SELECT @a AS A UNION ALL SELECT @a + 1");

    let err = infer_parameters(
        &mut server.connection(),
        &ctx,
        ExecutableUnit::Script(&script),
        &EffectiveRule::default(),
        &mut Diagnostics::new(),
    )
    .unwrap_err();

    match err.downcast_ref::<SqlMetaError>() {
        Some(SqlMetaError::ParameterInference { unit, guidance, .. }) => {
            assert_eq!(unit, "script 'twice'");
            assert!(guidance.contains("declare its type explicitly"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_script_output_parameter_drops_the_script() {
    let server = server_with_types();
    server.on(
        &[DESCRIBE_PARAMETERS],
        Reply::Rows(vec![undeclared_output_parameter_row("@total", INT, 4)]),
    );
    let scripts = vec![Script::new(
        "reports/count",
        "SELECT @total = COUNT(*) FROM dbo.Orders",
    )];

    let model = assemble(
        &mut server.connection(),
        Some(&server),
        &GlobRuleSet::new(),
        scripts,
        &options(),
    )
    .unwrap();

    assert!(model.scripts.is_empty());
    assert_eq!(model.warnings.len(), 1);
    assert!(model.warnings[0].message.contains("output parameter"));
    assert_eq!(server.position(DESCRIBE_RESULT_SET), None);
}

// ============================================================================
// Result sets
// ============================================================================

#[test]
fn test_schema_only_execution_follows_catalog_failure() {
    let server = FakeServer::new();
    server.on(
        &[DESCRIBE_RESULT_SET],
        Reply::Fail(DbError::server(
            11514,
            "The metadata could not be determined because the statement contains dynamic SQL.",
        )),
    );
    server.on(
        &["SET FMTONLY ON"],
        Reply::Columns(vec![ExecutedColumn {
            name: "Total".to_string(),
            type_name: "int".to_string(),
        }]),
    );
    let (types, token) = (types(), token());
    let ctx = InferenceContext {
        types: &types,
        token: &token,
        factory: None,
    };
    let script = Script::new("dynamic", "EXEC sp_executesql N'SELECT 1 AS Total'");

    let result = infer_result_set(
        &mut server.connection(),
        &ctx,
        ExecutableUnit::Script(&script),
        &EffectiveRule::default(),
    )
    .unwrap();

    assert_eq!(result.strategy, Some(ResultSetStrategy::SchemaOnly));
    let columns = result.columns.unwrap();
    assert_eq!(columns.len(), 1);
    assert_eq!(columns[0].name, "Total");
    assert!(columns[0].is_nullable);
    assert!(server.position("SET FMTONLY OFF") > server.position("SET FMTONLY ON"));
}

#[test]
fn test_isolated_execution_is_rolled_back() {
    let server = FakeServer::new();
    server.on(
        &[DESCRIBE_RESULT_SET],
        Reply::Fail(DbError::server(11514, "dynamic SQL")),
    );
    server.on(&["SET FMTONLY ON"], Reply::Fail(DbError::server(11514, "dynamic SQL")));
    server.on(
        &["SET ROWCOUNT 1"],
        Reply::Columns(vec![ExecutedColumn {
            name: "Id".to_string(),
            type_name: "bigint".to_string(),
        }]),
    );
    let (types, token) = (types(), token());
    let ctx = InferenceContext {
        types: &types,
        token: &token,
        factory: Some(&server),
    };
    let script = Script::new("dynamic", "EXEC('SELECT CAST(1 AS bigint) AS Id')");

    let result = infer_result_set(
        &mut server.connection(),
        &ctx,
        ExecutableUnit::Script(&script),
        &EffectiveRule::default(),
    )
    .unwrap();

    assert_eq!(result.strategy, Some(ResultSetStrategy::IsolatedExecution));
    assert_eq!(result.columns.unwrap()[0].type_declaration(), "bigint");
    let begin = server.position("BEGIN TRANSACTION").unwrap();
    let run = server.position("SET ROWCOUNT 1").unwrap();
    let rollback = server.position("ROLLBACK TRANSACTION").unwrap();
    assert!(begin < run && run < rollback);
}

#[test]
fn test_failure_of_every_strategy_reports_guidance() {
    let server = FakeServer::new();
    server.on(
        &["staging"],
        Reply::Fail(DbError::server(208, "Invalid object name '#staging'.")),
    );
    let (types, token) = (types(), token());
    let ctx = InferenceContext {
        types: &types,
        token: &token,
        factory: None,
    };
    let script = Script::new("load", "SELECT * FROM #staging");

    let err = infer_result_set(
        &mut server.connection(),
        &ctx,
        ExecutableUnit::Script(&script),
        &EffectiveRule::default(),
    )
    .unwrap_err();

    match err.downcast_ref::<SqlMetaError>() {
        Some(SqlMetaError::ResultSetInference { guidance, sql, .. }) => {
            assert!(guidance.contains("temp table"));
            assert!(sql.contains("##run42_staging"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_no_result_set_is_none() {
    let server = FakeServer::new();
    let (types, token) = (types(), token());
    let ctx = InferenceContext {
        types: &types,
        token: &token,
        factory: None,
    };
    let script = Script::new("touch", "UPDATE dbo.Orders SET Touched = 1");

    let result = infer_result_set(
        &mut server.connection(),
        &ctx,
        ExecutableUnit::Script(&script),
        &EffectiveRule::default(),
    )
    .unwrap();

    assert_eq!(result.columns, None);
    assert_eq!(result.strategy, Some(ResultSetStrategy::Catalog));
}

#[test]
fn test_unnamed_column_of_unknown_type_is_fatal() {
    let server = FakeServer::new();
    server.on(
        &[DESCRIBE_RESULT_SET],
        Reply::Rows(result_set_rows(&[col("Id", INT, 4), col("", GEOGRAPHY, -1)])),
    );
    let (types, token) = (types(), token());
    let ctx = InferenceContext {
        types: &types,
        token: &token,
        factory: None,
    };
    let script = Script::new("shapes", "SELECT Id, Shape.STBuffer(1) FROM dbo.Places");

    let err = infer_result_set(
        &mut server.connection(),
        &ctx,
        ExecutableUnit::Script(&script),
        &EffectiveRule::default(),
    )
    .unwrap_err();

    let err = err.downcast_ref::<SqlMetaError>().unwrap();
    assert!(matches!(
        err,
        SqlMetaError::UnsupportedType { subject, .. } if subject == "<unnamed column>"
    ));
    assert!(err.to_string().contains("script 'shapes'"));
}

#[test]
fn test_skipped_columns_are_kept_in_all_names() {
    let server = FakeServer::new();
    server.on(
        &[DESCRIBE_RESULT_SET],
        Reply::Rows(result_set_rows(&[col("Id", INT, 4), col("RowVersion", INT, 4)])),
    );
    let (types, token) = (types(), token());
    let ctx = InferenceContext {
        types: &types,
        token: &token,
        factory: None,
    };
    let script = Script::new("list", "SELECT Id, RowVersion FROM dbo.Orders");
    let rule = EffectiveRule::default().with_column(
        "rowversion",
        rust_sqlmeta::rules::ColumnRule {
            skip: Some(true),
            ..Default::default()
        },
    );

    let result = infer_result_set(
        &mut server.connection(),
        &ctx,
        ExecutableUnit::Script(&script),
        &rule,
    )
    .unwrap();

    let names: Vec<&str> = result.columns.as_ref().unwrap().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Id"]);
    assert_eq!(result.all_column_names, vec!["Id".to_string(), "RowVersion".to_string()]);
}

// ============================================================================
// Temp tables
// ============================================================================

#[test]
fn test_configured_temp_table_exists_during_inference() {
    let server = server_with_types();
    server.on(
        &[DESCRIBE_RESULT_SET, "SELECT * FROM ##run42_0_ids"],
        Reply::Rows(result_set_rows(&[col("Id", INT, 4)])),
    );
    server.on(
        &[DESCRIBE_RESULT_SET, "SELECT Id FROM ##run42_0_ids"],
        Reply::Rows(result_set_rows(&[col("Id", INT, 4)])),
    );
    let rules = GlobRuleSet::new().with_rule(
        ObjectRule::new(RuleScope::Scripts, "orders/staged")
            .unwrap()
            .temp_table("CREATE TABLE #ids (Id int NOT NULL)"),
    );
    let scripts = vec![Script::new("orders/staged", "SELECT Id FROM #ids")];

    let model = assemble(
        &mut server.connection(),
        Some(&server),
        &rules,
        scripts,
        &options(),
    )
    .unwrap();

    let script = &model.scripts[0];
    assert_eq!(script.temp_tables.len(), 1);
    assert_eq!(script.temp_tables[0].name, "#ids");
    assert_eq!(script.temp_tables[0].columns[0].name, "Id");
    assert_eq!(script.result_set.as_ref().unwrap()[0].name, "Id");

    let log = server.log();
    let creates = log
        .iter()
        .filter(|s| s.starts_with("CREATE TABLE ##run42_0_ids"))
        .count();
    let drops = log
        .iter()
        .filter(|s| s.contains("DROP TABLE ##run42_0_ids"))
        .count();
    assert_eq!((creates, drops), (2, 2));
    let create = server.position("CREATE TABLE ##run42_0_ids").unwrap();
    let describe = server.position("SELECT * FROM ##run42_0_ids").unwrap();
    let drop = server.position("DROP TABLE ##run42_0_ids").unwrap();
    assert!(create < describe && describe < drop);
}

#[test]
fn test_temp_table_named_like_parameter_is_fatal() {
    let server = server_with_types();
    let rules = GlobRuleSet::new().with_rule(
        ObjectRule::new(RuleScope::Scripts, "*")
            .unwrap()
            .temp_table("CREATE TABLE #customer (Id int)"),
    );
    let scripts = vec![Script::new(
        "orders/by-customer",
        "SELECT c.Id FROM #customer c WHERE c.Id = @customer",
    )];

    let err = assemble(
        &mut server.connection(),
        Some(&server),
        &rules,
        scripts,
        &options(),
    )
    .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<SqlMetaError>(),
        Some(SqlMetaError::TempTableParameterCollision { name, .. }) if name == "customer"
    ));
}

//! Whole-pipeline tests: catalog reads, synthesis, inference, filtering and
//! rule coverage against a scripted server.

use pretty_assertions::assert_eq;

use rust_sqlmeta::assemble;
use rust_sqlmeta::db::{DbRow, DbValue};
use rust_sqlmeta::model::{ParameterType, ResolvedModel, Script};
use rust_sqlmeta::rules::{
    ColumnRule, GlobRuleSet, ObjectRule, ParameterRule, RuleScope, TableScriptRule,
};
use rust_sqlmeta::synth::ScriptKind;
use rust_sqlmeta::{InferOptions, SqlMetaError};

use crate::common::*;

fn run(server: &FakeServer, rules: &GlobRuleSet, scripts: Vec<Script>) -> ResolvedModel {
    run_with(server, rules, scripts, &options())
}

fn run_with(
    server: &FakeServer,
    rules: &GlobRuleSet,
    scripts: Vec<Script>,
    options: &InferOptions,
) -> ResolvedModel {
    let mut conn = server.connection();
    assemble(&mut conn, Some(server), rules, scripts, options).unwrap()
}

fn widget_server() -> FakeServer {
    let server = server_with_types();
    server.on(
        &[TABLES],
        Reply::Rows(table_rows(
            "dbo",
            "Widget",
            &[col("Id", INT, 4).identity(), col("Name", NVARCHAR, 100)],
        )),
    );
    server.on(&[PRIMARY_KEYS], Reply::Rows(primary_key_rows("dbo", "Widget", &["Id"])));
    server
}

fn warning_messages(model: &ResolvedModel) -> Vec<String> {
    model.warnings.iter().map(|w| w.to_string()).collect()
}

// ============================================================================
// Generated scripts
// ============================================================================

#[test]
fn test_widget_get_by_id_end_to_end() {
    let server = widget_server();
    server.on(
        &[DESCRIBE_PARAMETERS, "DECLARE @id int = @run42_id;"],
        Reply::Rows(vec![undeclared_parameter_row("@run42_id", INT, 4)]),
    );
    server.on(
        &[DESCRIBE_RESULT_SET, "FROM [dbo].[Widget] WHERE [Id] = @id", "@id int"],
        Reply::Rows(result_set_rows(&[
            col("Id", INT, 4).identity(),
            col("Name", NVARCHAR, 100),
        ])),
    );
    let rules = GlobRuleSet::new().with_rule(
        ObjectRule::new(RuleScope::Tables, "dbo.Widget")
            .unwrap()
            .include(true)
            .table_script(TableScriptRule::new(ScriptKind::GetById)),
    );

    let model = run(&server, &rules, Vec::new());

    assert_eq!(warning_messages(&model), Vec::<String>::new());
    assert_eq!(model.scripts.len(), 1);
    let script = &model.scripts[0];
    assert_eq!(script.identity, "dbo/Widget/getById");
    assert!(script.is_synthesized);
    assert_eq!(
        script.source_text,
        "SELECT [Id],[Name] FROM [dbo].[Widget] WHERE [Id] = @id"
    );

    let parameters: Vec<(&str, String)> = script
        .parameters
        .iter()
        .map(|p| (p.name.as_str(), p.type_declaration()))
        .collect();
    assert_eq!(parameters, vec![("@id", "int".to_string())]);
    assert!(!script.parameters[0].is_nullable);

    let columns = script.result_set.as_ref().unwrap();
    let shape: Vec<(&str, String, bool)> = columns
        .iter()
        .map(|c| (c.name.as_str(), c.type_declaration(), c.is_nullable))
        .collect();
    assert_eq!(
        shape,
        vec![
            ("Id", "int".to_string(), false),
            ("Name", "nvarchar(50)".to_string(), false),
        ]
    );

    assert_eq!(model.table_dtos.len(), 1);
    assert_eq!(model.table_dtos[0].primary_key_columns[0].name, "Id");
}

#[test]
fn test_script_file_replaces_generated_script() {
    let server = widget_server();
    server.on(
        &[DESCRIBE_RESULT_SET],
        Reply::Rows(result_set_rows(&[col("Id", INT, 4)])),
    );
    let rules = GlobRuleSet::new().with_rule(
        ObjectRule::new(RuleScope::Tables, "dbo.Widget")
            .unwrap()
            .table_script(TableScriptRule::new(ScriptKind::GetAll)),
    );
    let custom = Script::new("dbo/Widget/getAll", "SELECT [Id] FROM [dbo].[Widget]");

    let model = run(&server, &rules, vec![custom]);

    assert_eq!(model.scripts.len(), 1);
    assert!(!model.scripts[0].is_synthesized);
    assert_eq!(model.scripts[0].source_text, "SELECT [Id] FROM [dbo].[Widget]");
    assert!(model.table_dtos.is_empty());
    assert!(warning_messages(&model)[0].contains("replaces the generated script"));
}

#[test]
fn test_missing_primary_key_is_fatal() {
    let server = server_with_types();
    server.on(
        &[TABLES],
        Reply::Rows(table_rows("dbo", "Log", &[col("Message", NVARCHAR, -1)])),
    );
    let rules = GlobRuleSet::new().with_rule(
        ObjectRule::new(RuleScope::Tables, "dbo.Log")
            .unwrap()
            .table_script(TableScriptRule::new(ScriptKind::Delete)),
    );

    let mut conn = server.connection();
    let err = assemble(&mut conn, Some(&server), &rules, Vec::new(), &options()).unwrap_err();
    assert!(err.to_string().contains("[dbo].[Log]"));
    assert!(err.to_string().contains("primary key"));
}

// ============================================================================
// Table DTOs
// ============================================================================

#[test]
fn test_skipping_key_column_empties_primary_key() {
    let server = widget_server();
    let rules = GlobRuleSet::new().with_rule(
        ObjectRule::new(RuleScope::Tables, "dbo.Widget")
            .unwrap()
            .include(true)
            .column(
                "Id",
                ColumnRule {
                    skip: Some(true),
                    ..ColumnRule::default()
                },
            ),
    );

    let model = run(&server, &rules, Vec::new());

    let dto = &model.table_dtos[0];
    let names: Vec<&str> = dto.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Name"]);
    assert!(dto.primary_key_columns.is_empty());
    assert!(model.warnings.is_empty());
}

#[test]
fn test_unsupported_table_column_is_left_out_with_warning() {
    let server = server_with_types();
    server.on(
        &[TABLES],
        Reply::Rows(table_rows(
            "dbo",
            "Place",
            &[col("Id", INT, 4), col("Location", GEOGRAPHY, -1).nullable()],
        )),
    );
    let rules = GlobRuleSet::new()
        .with_rule(ObjectRule::new(RuleScope::Tables, "dbo.*").unwrap().include(true));

    let model = run(&server, &rules, Vec::new());

    assert_eq!(model.table_dtos[0].columns.len(), 1);
    assert_eq!(
        warning_messages(&model),
        vec![
            "table [dbo].[Place]: column 'Location' has unsupported type 'geography' and is left out"
                .to_string()
        ]
    );
}

// ============================================================================
// Procedures
// ============================================================================

#[test]
fn test_procedure_with_duplicate_column_names_is_dropped() {
    let server = server_with_types();
    server.on(
        &[PROCEDURES],
        Reply::Rows(vec![
            procedure_row(
                100,
                "dbo",
                "GetPairs",
                "CREATE PROCEDURE dbo.GetPairs AS SELECT 1 AS id, 2 AS id",
            ),
            procedure_row(101, "dbo", "GetOne", "CREATE PROCEDURE dbo.GetOne AS SELECT 1 AS id"),
        ]),
    );
    server.on(
        &[DESCRIBE_RESULT_SET, "EXEC [dbo].[GetPairs]"],
        Reply::Rows(result_set_rows(&[col("id", INT, 4), col("id", INT, 4)])),
    );
    server.on(
        &[DESCRIBE_RESULT_SET, "EXEC [dbo].[GetOne]"],
        Reply::Rows(result_set_rows(&[col("id", INT, 4)])),
    );
    let rules = GlobRuleSet::new()
        .with_rule(ObjectRule::new(RuleScope::Procedures, "dbo.*").unwrap().include(true));

    let model = run(&server, &rules, Vec::new());

    let names: Vec<&str> = model
        .stored_procedures
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(names, vec!["GetOne"]);
    assert_eq!(model.warnings.len(), 1);
    assert_eq!(model.warnings[0].subject, "procedure [dbo].[GetPairs]");
    assert!(model.warnings[0].message.contains("more than one column named 'id'"));
}

#[test]
fn test_procedure_defaults_and_nullability() {
    let server = server_with_types();
    server.on(
        &[PROCEDURES],
        Reply::Rows(vec![procedure_row(
            200,
            "dbo",
            "Find",
            "CREATE PROCEDURE dbo.Find @name nvarchar(50) = NULL, @top int = 10, @since int AS SELECT 1 AS Id",
        )]),
    );
    server.on(
        &[PARAMETERS],
        Reply::Rows(vec![
            parameter_row(200, 1, "@name", NVARCHAR, NVARCHAR, 100),
            parameter_row(200, 2, "@top", INT, INT, 4),
            parameter_row(200, 3, "@since", INT, INT, 4),
        ]),
    );
    server.on(
        &[DESCRIBE_RESULT_SET, "EXEC [dbo].[Find] @name = @name, @top = @top, @since = @since"],
        Reply::Rows(result_set_rows(&[col("Id", INT, 4)])),
    );
    let rules = GlobRuleSet::new().with_rule(
        ObjectRule::new(RuleScope::Procedures, "dbo.Find")
            .unwrap()
            .include(true)
            .parameter(
                "@top",
                rust_sqlmeta::rules::ParameterRule {
                    nullable: Some(false),
                    ..Default::default()
                },
            )
            .parameter(
                "@since",
                rust_sqlmeta::rules::ParameterRule {
                    nullable: Some(true),
                    ..Default::default()
                },
            ),
    );

    let model = run(&server, &rules, Vec::new());

    let parameters: Vec<(&str, String, bool, Option<&str>)> = model.stored_procedures[0]
        .parameters
        .iter()
        .map(|p| {
            (
                p.name.as_str(),
                p.type_declaration(),
                p.is_nullable,
                p.default_value.as_deref(),
            )
        })
        .collect();
    assert_eq!(
        parameters,
        vec![
            ("@name", "nvarchar(50)".to_string(), true, Some("NULL")),
            ("@top", "int".to_string(), false, None),
            ("@since", "int".to_string(), true, Some("NULL")),
        ]
    );
    assert_eq!(model.stored_procedures[0].result_set.as_ref().unwrap().len(), 1);
}

#[test]
fn test_only_referenced_table_types_are_published() {
    let server = server_with_types();
    let mut table_types = table_type_rows(300, "dbo", "IdList", &[col("Id", INT, 4)]);
    table_types.extend(table_type_rows(301, "dbo", "CodeList", &[col("Code", NVARCHAR, 20)]));
    server.on(&[TABLE_TYPES], Reply::Rows(table_types));
    server.on(
        &[PROCEDURES],
        Reply::Rows(vec![procedure_row(
            300,
            "dbo",
            "ImportIds",
            "CREATE PROCEDURE dbo.ImportIds @ids dbo.IdList READONLY AS SELECT 1 AS Imported",
        )]),
    );
    server.on(
        &[PARAMETERS],
        Reply::Rows(vec![parameter_row(300, 1, "@ids", 243, 300, -1)]),
    );
    server.on(
        &[DESCRIBE_RESULT_SET, "EXEC [dbo].[ImportIds] @ids = @ids", "@ids [dbo].[IdList] READONLY"],
        Reply::Rows(result_set_rows(&[col("Imported", INT, 4)])),
    );
    let rules = GlobRuleSet::new()
        .with_rule(ObjectRule::new(RuleScope::Procedures, "dbo.*").unwrap().include(true));

    let model = run(&server, &rules, Vec::new());

    let names: Vec<&str> = model.table_types.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["IdList"]);
    let parameter = &model.stored_procedures[0].parameters[0];
    assert!(matches!(parameter.param_type, ParameterType::Table(ref t) if t.name == "IdList"));
    assert!(!parameter.is_nullable);
    assert!(!parameter.is_output);
}

#[test]
fn test_nullable_rule_on_table_valued_parameter_is_ignored() {
    let server = server_with_types();
    server.on(
        &[TABLE_TYPES],
        Reply::Rows(table_type_rows(300, "dbo", "IdList", &[col("Id", INT, 4)])),
    );
    server.on(
        &[PROCEDURES],
        Reply::Rows(vec![procedure_row(
            300,
            "dbo",
            "ImportIds",
            "CREATE PROCEDURE dbo.ImportIds @ids dbo.IdList READONLY AS SELECT 1 AS Imported",
        )]),
    );
    server.on(
        &[PARAMETERS],
        Reply::Rows(vec![parameter_row(300, 1, "@ids", 243, 300, -1)]),
    );
    server.on(
        &[DESCRIBE_RESULT_SET, "EXEC [dbo].[ImportIds] @ids = @ids"],
        Reply::Rows(result_set_rows(&[col("Imported", INT, 4)])),
    );
    let rules = GlobRuleSet::new().with_rule(
        ObjectRule::new(RuleScope::Procedures, "dbo.ImportIds")
            .unwrap()
            .include(true)
            .parameter(
                "@ids",
                ParameterRule {
                    nullable: Some(true),
                    ..Default::default()
                },
            ),
    );

    let model = run(&server, &rules, Vec::new());

    let parameter = &model.stored_procedures[0].parameters[0];
    assert!(matches!(parameter.param_type, ParameterType::Table(_)));
    assert!(!parameter.is_nullable);
    assert_eq!(parameter.default_value, None);
    assert_eq!(model.warnings.len(), 1);
    assert_eq!(model.warnings[0].subject, "procedure [dbo].[ImportIds]");
    assert!(model.warnings[0].message.contains("@ids cannot be nullable"));
}

#[test]
fn test_procedure_without_readable_definition_is_fatal() {
    let server = server_with_types();
    let encrypted = DbRow::default()
        .with("object_id", DbValue::Int(400))
        .with("schema_name", DbValue::Text("dbo".to_string()))
        .with("procedure_name", DbValue::Text("Secret".to_string()))
        .with("definition", DbValue::Null);
    server.on(&[PROCEDURES], Reply::Rows(vec![encrypted]));
    let rules = GlobRuleSet::new()
        .with_rule(ObjectRule::new(RuleScope::Procedures, "dbo.*").unwrap().include(true));

    let mut conn = server.connection();
    let err = assemble(&mut conn, Some(&server), &rules, Vec::new(), &options()).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<SqlMetaError>(),
        Some(SqlMetaError::ProcedureDefinitionUnreadable { procedure }) if procedure == "[dbo].[Secret]"
    ));
    assert_eq!(server.position(DESCRIBE_RESULT_SET), None);
}

// ============================================================================
// Rule coverage
// ============================================================================

#[test]
fn test_rules_matching_nothing_are_reported() {
    let server = server_with_types();
    let rules = GlobRuleSet::new()
        .with_rule(ObjectRule::new(RuleScope::Procedures, "sales.*").unwrap().include(true))
        .with_rule(ObjectRule::new(RuleScope::Scripts, "reports/*").unwrap());

    let model = run(&server, &rules, Vec::new());

    assert_eq!(
        warning_messages(&model),
        vec![
            "procedure rule 'sales.*': matches no procedure".to_string(),
            "script rule 'reports/*': matches no script".to_string(),
        ]
    );
}

#[test]
fn test_excluded_procedure_rule_is_not_dead() {
    let server = server_with_types();
    server.on(
        &[PROCEDURES],
        Reply::Rows(vec![procedure_row(
            400,
            "dbo",
            "LegacyImport",
            "CREATE PROCEDURE dbo.LegacyImport AS SELECT 1 AS Id",
        )]),
    );
    let rules = GlobRuleSet::new()
        .with_rule(ObjectRule::new(RuleScope::Procedures, "dbo.*").unwrap().include(true))
        .with_rule(
            ObjectRule::new(RuleScope::Procedures, "dbo.Legacy*")
                .unwrap()
                .include(false),
        );

    let model = run(&server, &rules, Vec::new());

    assert!(model.stored_procedures.is_empty());
    assert!(model.warnings.is_empty());
    assert_eq!(server.position("EXEC [dbo].[LegacyImport]"), None);
}

// ============================================================================
// Parallel inference
// ============================================================================

#[test]
fn test_parallel_inference_restores_identity_order() {
    let server = server_with_types();
    server.on(
        &[DESCRIBE_RESULT_SET],
        Reply::Rows(result_set_rows(&[col("Value", INT, 4)])),
    );
    let scripts: Vec<Script> = (0..12)
        .rev()
        .map(|i| Script::new(format!("q/{:02}", i), format!("SELECT {} AS Value", i)))
        .collect();
    let options = InferOptions {
        parallelism: 4,
        ..options()
    };

    let model = run_with(&server, &GlobRuleSet::new(), scripts, &options);

    let identities: Vec<&str> = model.scripts.iter().map(|s| s.identity.as_str()).collect();
    let expected: Vec<String> = (0..12).map(|i| format!("q/{:02}", i)).collect();
    assert_eq!(identities, expected.iter().map(String::as_str).collect::<Vec<_>>());
    assert!(model
        .scripts
        .iter()
        .all(|s| s.result_set.as_ref().is_some_and(|c| c.len() == 1)));
}

#[test]
fn test_parallel_units_sharing_a_temp_table_name_do_not_collide() {
    let server = server_with_types();
    server.reject_duplicate_temp_tables();
    server.on(
        &[DESCRIBE_RESULT_SET],
        Reply::Rows(result_set_rows(&[col("Id", INT, 4)])),
    );
    let rules = GlobRuleSet::new().with_rule(
        ObjectRule::new(RuleScope::Scripts, "load/*")
            .unwrap()
            .temp_table("CREATE TABLE #staging (Id int)"),
    );
    let scripts: Vec<Script> = (0..8)
        .map(|i| Script::new(format!("load/{}", i), "SELECT Id FROM #staging"))
        .collect();
    let options = InferOptions {
        parallelism: 4,
        ..options()
    };

    let model = run_with(&server, &rules, scripts, &options);

    assert_eq!(model.scripts.len(), 8);
    let created: std::collections::BTreeSet<String> = server
        .log()
        .iter()
        .filter_map(|s| s.strip_prefix("CREATE TABLE "))
        .filter_map(|s| s.split_whitespace().next())
        .map(str::to_string)
        .collect();
    assert_eq!(created.len(), 8);
    assert!(created.iter().all(|name| name.starts_with("##run42_")));
}

#[test]
fn test_parallel_inference_opens_one_connection_per_worker() {
    let server = server_with_types();
    let scripts: Vec<Script> = (0..40)
        .map(|i| Script::new(format!("q/{:02}", i), format!("SELECT {} AS Value", i)))
        .collect();
    let options = InferOptions {
        parallelism: 3,
        ..options()
    };

    run_with(&server, &GlobRuleSet::new(), scripts, &options);

    assert_eq!(server.connections_opened(), 3);
}

#[test]
fn test_infer_metadata_loads_scripts_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("reports")).unwrap();
    std::fs::write(
        dir.path().join("reports/Totals.sql"),
        "SELECT SUM(Amount) AS Total FROM dbo.Orders",
    )
    .unwrap();

    let server = server_with_types();
    server.on(
        &[DESCRIBE_RESULT_SET, "SUM(Amount)"],
        Reply::Rows(result_set_rows(&[col("Total", DECIMAL, 17).nullable()])),
    );

    let model = rust_sqlmeta::infer_metadata(
        &server,
        &GlobRuleSet::new(),
        Some(dir.path()),
        &options(),
    )
    .unwrap();

    assert_eq!(model.scripts.len(), 1);
    assert_eq!(model.scripts[0].identity, "reports/Totals");
    let total = &model.scripts[0].result_set.as_ref().unwrap()[0];
    assert_eq!(total.name, "Total");
    assert!(total.is_nullable);
}

use replkit_protocols::{Command, EventKind};
use serde_json::json;

use super::CalcEngine;
use crate::context::InvocationContext;
use crate::engine::{ExecutionOutput, LanguageEngine};

async fn run(engine: &mut CalcEngine, code: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let command = Command::submit_code(code);
    let code = code.to_string();
    let (_, result) =
        InvocationContext::run_scoped(command.clone(), Vec::new(), |ctx| async move {
            let output = ExecutionOutput::new(ctx.clone(), command.clone());
            engine.execute(&code, &output).await
        })
        .await;
    result
}

#[tokio::test]
async fn test_literal_evaluates_to_itself() {
    let mut engine = CalcEngine::new();
    assert_eq!(run(&mut engine, "123").await.unwrap(), Some(json!(123)));
}

#[tokio::test]
async fn test_arithmetic_precedence() {
    let mut engine = CalcEngine::new();
    assert_eq!(
        run(&mut engine, "1 + 2 * 3").await.unwrap(),
        Some(json!(7))
    );
    assert_eq!(
        run(&mut engine, "(1 + 2) * 3").await.unwrap(),
        Some(json!(9))
    );
    assert_eq!(run(&mut engine, "-4 + 10").await.unwrap(), Some(json!(6)));
}

#[tokio::test]
async fn test_variables_persist_across_submissions() {
    let mut engine = CalcEngine::new();
    assert_eq!(run(&mut engine, "var x = 1;").await.unwrap(), None);
    assert_eq!(run(&mut engine, "x").await.unwrap(), Some(json!(1)));
    assert_eq!(run(&mut engine, "x + 41").await.unwrap(), Some(json!(42)));
}

#[tokio::test]
async fn test_last_statement_value_wins() {
    let mut engine = CalcEngine::new();
    assert_eq!(
        run(&mut engine, "var a = 2\na * 3\na * 5").await.unwrap(),
        Some(json!(10))
    );
}

#[tokio::test]
async fn test_unknown_variable_is_user_error() {
    let mut engine = CalcEngine::new();
    let err = run(&mut engine, "nope").await.unwrap_err();
    assert!(err.to_string().contains("unknown variable"));
}

#[tokio::test]
async fn test_division_by_zero_is_user_error() {
    let mut engine = CalcEngine::new();
    let err = run(&mut engine, "1 / 0").await.unwrap_err();
    assert!(err.to_string().contains("division by zero"));
}

#[tokio::test]
async fn test_error_statement_raises_with_message() {
    let mut engine = CalcEngine::new();
    let err = run(&mut engine, "error something went wrong")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "something went wrong");
}

#[tokio::test]
async fn test_print_publishes_stdout() {
    let mut engine = CalcEngine::new();
    let command = Command::submit_code("print 5 + 5");
    let (ctx, result) =
        InvocationContext::run_scoped(command.clone(), Vec::new(), |ctx| async move {
            let output = ExecutionOutput::new(ctx.clone(), command.clone());
            engine.execute("print 5 + 5", &output).await
        })
        .await;
    assert_eq!(result.unwrap(), None);
    assert!(ctx.events().iter().any(|e| e.kind
        == EventKind::StandardOutputValueProduced {
            value: "10".to_string()
        }));
}

#[tokio::test]
async fn test_incomplete_submission_detection() {
    let engine = CalcEngine::new();
    assert!(!engine.is_complete("1 + (2"));
    assert!(engine.is_complete("1 + (2)"));
    assert!(engine.is_complete("1 + 2"));
}

#[tokio::test]
async fn test_completions_cover_variables_and_keywords() {
    let mut engine = CalcEngine::new();
    run(&mut engine, "var value = 1;").await.unwrap();
    let items = engine.completions("va", 2).await;
    let names: Vec<_> = items.iter().map(|i| i.display_text.as_str()).collect();
    assert!(names.contains(&"value"));
    assert!(names.contains(&"var"));
}

#[tokio::test]
async fn test_signature_help_for_builtins() {
    let mut engine = CalcEngine::new();
    let signatures = engine.signature_help("print 1", 5).await;
    assert_eq!(signatures, vec!["print <expression>".to_string()]);
    assert!(engine.signature_help("1 + 1", 3).await.is_empty());
}

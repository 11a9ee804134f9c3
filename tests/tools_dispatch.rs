use std::sync::Arc;
use std::time::Duration;

use hashi::tools::{Tools, current_tool_call_id};
use hashi::types::{Parameter, ParameterKind, Tool, ToolCall, ToolResultContent};
use hashi::value::Value;

fn search_tool() -> Tool {
    Tool::with_schema(
        "search",
        "Search the index",
        serde_json::json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        }),
        |args| {
            Box::pin(async move {
                let query = args
                    .get("query")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok(vec![ToolResultContent::text(format!("results for {query}"))])
            })
        },
    )
}

fn call(name: &str, id: &str, params: &[(&str, Value)]) -> ToolCall {
    let mut call = ToolCall::new(name, id);
    call.parameters = params
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    call
}

#[tokio::test]
async fn missing_required_parameter_yields_error_result() {
    let tools = Arc::new(Tools::new(vec![search_tool()]).expect("registry"));
    let result = tools.call(&call("search", "c1", &[])).await;

    assert!(result.is_error);
    assert_eq!(result.id, "c1");
    assert_eq!(result.name, "search");
    match &result.content[0] {
        ToolResultContent::Text { text } => {
            assert!(
                text.contains("query"),
                "validator message should mention the missing field: {text}"
            );
        }
        other => panic!("unexpected content: {other:?}"),
    }
}

#[tokio::test]
async fn valid_arguments_reach_the_executor() {
    let tools = Arc::new(Tools::new(vec![search_tool()]).expect("registry"));
    let result = tools
        .call(&call("search", "c2", &[("query", Value::from("rust"))]))
        .await;
    assert!(!result.is_error);
    match &result.content[0] {
        ToolResultContent::Text { text } => assert_eq!(text, "results for rust"),
        other => panic!("unexpected content: {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_dispatch_keeps_positional_order_and_call_ids() {
    let sleepy = Tool::new(
        "sleepy",
        "Sleeps proportionally to its argument",
        vec![Parameter::new("ms", ParameterKind::Int)],
        |args| {
            Box::pin(async move {
                let ms = args.get("ms").and_then(|v| v.to_int(false)).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms as u64)).await;
                let id = current_tool_call_id().unwrap_or_default();
                Ok(vec![ToolResultContent::text(id)])
            })
        },
    );
    let tools = Arc::new(Tools::new(vec![sleepy]).expect("registry"));

    // The slowest call comes first; order must still be positional.
    let calls = vec![
        call("sleepy", "slow", &[("ms", Value::Int(80))]),
        call("sleepy", "medium", &[("ms", Value::Int(40))]),
        call("sleepy", "fast", &[("ms", Value::Int(1))]),
    ];
    let results = tools.call_many(&calls).await;

    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["slow", "medium", "fast"]);

    // Each executor observed its own task-local call id.
    for result in &results {
        match &result.content[0] {
            ToolResultContent::Text { text } => assert_eq!(text, &result.id),
            other => panic!("unexpected content: {other:?}"),
        }
    }
}

#[tokio::test]
async fn unknown_tool_and_mismatched_id_are_forwarded_verbatim() {
    let tools = Arc::new(Tools::new(vec![search_tool()]).expect("registry"));
    let result = tools.call(&call("rename_me", "weird-id", &[])).await;
    assert!(result.is_error);
    // The result echoes whatever id the caller supplied.
    assert_eq!(result.id, "weird-id");
    assert_eq!(result.name, "rename_me");
}

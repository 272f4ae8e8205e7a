use std::sync::Arc;

use judgecraft_core::{
    from_async_fn, EvaluationCase, FieldValidator, JsonlCaseSource, OpenAiBackend, Pacing, Runner,
    Schedule, SemanticJudge, VecCaseSource,
};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Agent: a toy sentiment classifier
    let agent = from_async_fn(|input| {
        let text = input.as_str().unwrap_or_default().to_lowercase();
        async move {
            let sentiment = if text.contains("great") || text.contains("love") {
                "positive"
            } else {
                "negative"
            };
            Ok(json!({ "sentiment": sentiment, "rawResponse": format!("<s>{sentiment}</s>") }))
        }
    });

    // Example 1: Inline cases
    let cases = vec![
        EvaluationCase::expecting("love", json!("I love it"), json!({"sentiment": "positive"}).as_object().cloned().unwrap_or_default())?,
        EvaluationCase::builder("meh", json!("Dull plot, weak ending"))
            .expected(json!({"sentiment": "negative"}).as_object().cloned().unwrap_or_default())
            .field("sentiment", FieldValidator::one_of(["negative", "neutral"]))
            .build()?,
    ];

    let mut builder = Runner::builder().agent(agent).pacing(Pacing::none());
    // Criteria fields need a judge; point it at any OpenAI-compatible endpoint.
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        let backend = OpenAiBackend::new("https://api.openai.com/v1", "gpt-4o-mini").with_api_key(key);
        builder = builder.judge(Arc::new(SemanticJudge::new(Arc::new(backend))));
    }
    let runner = builder.build()?;

    let report = runner.run(&VecCaseSource::new(cases), Schedule::parallel(5)).await?;
    println!("{}", report.summary_table());

    // Example 2: Load from JSONL file if provided
    if let Some(path) = std::env::args().nth(1) {
        let report = runner.run(&JsonlCaseSource::new(path), Schedule::Sequential).await?;
        println!("{}", report.summary_table());
    }

    Ok(())
}

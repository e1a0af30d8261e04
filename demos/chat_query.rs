use anyhow::Context;
use dotenv::dotenv;
use institution_query_engine::llm::{GeminiClient, GeminiIntentParser, GeminiSummarizer};
use institution_query_engine::{describe_execution, EngineConfig, FirestoreStore, QueryAssistant};
use std::io::{self, Write};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let api_key = std::env::var("GEMINI_API_KEY").context("GEMINI_API_KEY must be set")?;
    let config = EngineConfig::from_env()?;
    let project_id = config
        .firestore_project_id
        .clone()
        .context("FIRESTORE_PROJECT_ID must be set")?;

    let mut store = FirestoreStore::new(project_id);
    if let Ok(key) = std::env::var("FIRESTORE_API_KEY") {
        store = store.with_api_key(key);
    }

    let client = GeminiClient::new(api_key);
    let parser = GeminiIntentParser::new(client.clone(), &config);
    let summarizer = GeminiSummarizer::new(client, &config);
    let assistant = QueryAssistant::new(store, config, parser).with_summarizer(summarizer);

    println!("💬 Ask about finance, sports or education (prefix with 'merge:' to compare by location, 'quit' to exit).");
    println!("------------------------------------------------------------------");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let prompt = input.trim();

        if prompt.eq_ignore_ascii_case("quit") || prompt.eq_ignore_ascii_case("exit") {
            break;
        }
        if prompt.is_empty() {
            continue;
        }

        if let Some(question) = prompt.strip_prefix("merge:") {
            match assistant.answer_cross(question.trim()).await {
                Ok(answer) => {
                    for record in &answer.result.records {
                        let values: Vec<String> = answer
                            .intent
                            .metrics
                            .iter()
                            .map(|m| format!("{}={}", m, record.metric_value(*m)))
                            .collect();
                        println!("  {:<20} {}", record.code(), values.join("  "));
                    }
                    if let Some(summary) = answer.summary {
                        println!("\n🤖 {}\n", summary);
                    }
                }
                Err(e) => eprintln!("❌ {}", e),
            }
            continue;
        }

        match assistant.answer(prompt).await {
            Ok(answer) => {
                println!("ℹ️  {}", describe_execution(&answer.intent, &answer.result));
                for record in &answer.result.records {
                    println!(
                        "  {:<10} {:<30} {:>12.2}",
                        record.code(),
                        record.name().unwrap_or("-"),
                        record.metric_value(answer.intent.metric)
                    );
                }
                println!("  Total: {:.2}", answer.aggregate.total);
                for entry in &answer.aggregate.breakdown {
                    println!("    {:<16} {:>12.2}", entry.collection, entry.value);
                }
                if let Some(summary) = answer.summary {
                    println!("\n🤖 {}\n", summary);
                }
            }
            Err(e) => eprintln!("❌ {}", e),
        }
    }

    Ok(())
}

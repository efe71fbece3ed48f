//! Greater Number Example
//!
//! A reasoning model thinks about which number is bigger, then a tool-calling
//! model turns that thinking into a structured answer.
//!
//! Needs DEEPSEEK_R1_API_KEY and OPENAI_API_KEY (a `.env` file works too).
//!
//! Run with: cargo run --example greater

use deepagent::llm::backends::DeepseekConfig;
use deepagent::prelude::*;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize, JsonSchema)]
struct BiggerNumber {
    /// The bigger of the two numbers
    result: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let reasoning = DeepseekReasoningModel::with_config(DeepseekConfig::default())?;
    let execution = OpenAIExecutionModel::new("gpt-4o-mini")?;
    let model = CompositeModel::new(reasoning, execution);

    let identity = model.identity();
    println!("Model: {} ({})", identity.name, identity.provider);
    println!("==========================================\n");

    // Only the execution model sees the caller's system prompt.
    let conversation = Conversation::from_messages(vec![
        LlmMessage::system("You are a helpful assistant. You must use a tool."),
        LlmMessage::user("9.11 and 9.8, which is greater?"),
    ])?;
    let params = RequestParameters::default().with_result(ResultSpec::for_type::<BiggerNumber>()?);

    let (result, usage) = model.request(&conversation, None, &params).await?;
    let answer: BiggerNumber = result.into_typed()?;

    println!("Bigger number: {}", answer.result);
    println!(
        "Usage: {} requests, {} request tokens, {} response tokens, {} total",
        usage.requests, usage.request_tokens, usage.response_tokens, usage.total_tokens
    );
    for (key, value) in &usage.details {
        println!("  {}: {}", key, value);
    }

    Ok(())
}

//! Streaming Example
//!
//! Prints the reasoning model's thinking as it arrives, then the execution
//! model's tool calls, then the combined usage.
//!
//! Run with: cargo run --example streaming

use deepagent::prelude::*;
use futures::stream::StreamExt;
use serde_json::json;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let model = CompositeModel::new(
        DeepseekReasoningModel::with_config(Default::default())?,
        OpenAIExecutionModel::new("gpt-4o-mini")?,
    );

    let conversation = Conversation::from_messages(vec![LlmMessage::user(
        "Which is larger, 2^10 or 10^3? Answer with the larger value.",
    )])?;
    let params = RequestParameters::default().with_result(ResultSpec::new(json!({
        "type": "object",
        "properties": {"value": {"type": "integer"}},
        "required": ["value"]
    })));

    let mut stream = model.request_stream(&conversation, None, &params)?;

    println!("Thinking...\n");
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(StreamChunk::Reasoning(text)) => print!("{}", text),
            Ok(StreamChunk::Content(text)) => print!("\n\nAnswer: {}", text),
            Ok(StreamChunk::ToolCalls(calls)) => {
                for call in calls {
                    println!("\n\nTool call {}: {:?}", call.name, call.arguments);
                }
            }
            Ok(StreamChunk::Usage(usage)) => {
                println!("\nTotal tokens: {} over {} requests", usage.total_tokens, usage.requests)
            }
            Err(e) => eprintln!("\nError: {}", e),
        }
    }

    println!("\nDone!");
    Ok(())
}

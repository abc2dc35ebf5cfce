use anyhow::Context;
use tracing_subscriber::EnvFilter;

use law_retrieval::config::Config;
use law_retrieval::models::{KnowledgeMode, UserId};
use law_retrieval::pipeline::AnswerRequest;
use law_retrieval::state::AppState;

const USAGE: &str = "usage: law-retrieval <question> [mode] [user_id] [--web]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let request = parse_args(std::env::args().skip(1).collect())?;

    let config = Config::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("LLM provider: {} ({})", config.llm.provider, config.llm.base_url);

    let state = AppState::new(config)?;
    let outcome = state.orchestrator.answer(request).await;
    state.orchestrator.release_models();

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn parse_args(args: Vec<String>) -> anyhow::Result<AnswerRequest> {
    let use_web_search = args.iter().any(|a| a == "--web");
    let mut positional = args.into_iter().filter(|a| a != "--web");

    let question = positional.next().context(USAGE)?;
    let mode = match positional.next() {
        Some(m) => m.parse::<KnowledgeMode>().map_err(anyhow::Error::msg)?,
        None => KnowledgeMode::PublicKnowledge,
    };
    let user_id: UserId = match positional.next() {
        Some(id) => id.parse().with_context(|| format!("invalid user id: {id}"))?,
        None => 0,
    };

    Ok(AnswerRequest {
        question,
        conversation_id: None,
        mode,
        user_id,
        top_k: None,
        use_web_search,
    })
}

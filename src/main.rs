use anyhow::{Context, Result};
use clap::Parser;
use convlog::cli::{Cli, Commands};
use convlog::core::Metadata;
use convlog::{batch, utils, ConvLog, LogRequest, LogResponse, Settings};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::new().context("Failed to load settings")?,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let convlog = ConvLog::connect(settings).await?;

    let result = match cli.command {
        Commands::Log {
            session,
            message,
            response,
            skill,
            processing_time,
            metadata,
        } => {
            handle_log(
                &convlog,
                session,
                message,
                response,
                skill,
                processing_time,
                metadata,
            )
            .await
        }
        Commands::History {
            session,
            limit,
            offset,
        } => handle_history(&convlog, &session, limit, offset).await,
        Commands::Summary { session } => handle_summary(&convlog, &session).await,
        Commands::Stats { days } => handle_stats(&convlog, days).await,
        Commands::Show { conversation_id } => handle_show(&convlog, &conversation_id).await,
        Commands::TestLog => {
            report(&convlog.test_log().await);
            Ok(())
        }
        Commands::Import { file, concurrency } => handle_import(&convlog, &file, concurrency).await,
    };

    // Shutdown gracefully
    convlog.shutdown().await?;

    result
}

fn report(response: &LogResponse) {
    if response.success {
        utils::print_success(&format!(
            "{} ({} in session {})",
            response.message, response.conversation_id, response.session_id
        ));
    } else {
        utils::print_error(&format!(
            "Logging failed for session '{}': {}",
            response.session_id, response.message
        ));
    }
}

async fn handle_log(
    convlog: &ConvLog,
    session: String,
    message: String,
    response: String,
    skill: Option<String>,
    processing_time: Option<f64>,
    metadata: Option<String>,
) -> Result<()> {
    let metadata = metadata
        .map(|raw| serde_json::from_str::<Metadata>(&raw))
        .transpose()
        .context("--metadata must be a JSON object")?;

    let request = LogRequest {
        skill_used: skill,
        processing_time,
        metadata,
        ..LogRequest::new(session, message, response)
    };
    let response = convlog.log_conversation(request).await;
    report(&response);

    if !response.success {
        anyhow::bail!("conversation was not logged");
    }
    Ok(())
}

async fn handle_history(
    convlog: &ConvLog,
    session: &str,
    limit: usize,
    offset: usize,
) -> Result<()> {
    let history = convlog.history_page(session, limit, offset).await?;

    utils::print_header(&format!("History: {}", session));
    if history.conversations.is_empty() {
        utils::print_info("No conversations found");
        return Ok(());
    }
    for record in &history.conversations {
        utils::print_record(record);
    }
    utils::print_info(&format!("\n{} conversation(s)", history.count));
    Ok(())
}

async fn handle_summary(convlog: &ConvLog, session: &str) -> Result<()> {
    let response = convlog.summary(session).await?;
    match &response.summary {
        Some(summary) => {
            utils::print_header(&format!("Summary: {}", session));
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
        None => utils::print_info(&format!("Session '{}' has no conversations", session)),
    }
    Ok(())
}

async fn handle_stats(convlog: &ConvLog, days: Option<i64>) -> Result<()> {
    let since = days.map(|d| chrono::Utc::now() - chrono::Duration::days(d));
    let stats = convlog.stats_since(since).await?;

    utils::print_header("Conversation Stats");
    if stats.stats.malformed_records > 0 {
        utils::print_warning(&format!(
            "Skipped {} malformed record(s)",
            stats.stats.malformed_records
        ));
    }
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn handle_show(convlog: &ConvLog, conversation_id: &str) -> Result<()> {
    let id = Uuid::parse_str(conversation_id)
        .with_context(|| format!("'{}' is not a conversation id", conversation_id))?;

    match convlog.conversation(id).await? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => utils::print_info(&format!("Conversation {} not found", id)),
    }
    Ok(())
}

async fn handle_import(convlog: &ConvLog, file: &str, concurrency: usize) -> Result<()> {
    utils::print_info(&format!(
        "Importing conversations from {} with concurrency {}",
        file, concurrency
    ));

    let input = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file))?;

    let mut requests = vec![];
    let mut lines = vec![];
    for (line, parsed) in batch::parse_lines(&input) {
        match parsed {
            Ok(request) => {
                requests.push(request);
                lines.push(line);
            }
            Err(e) => utils::print_error(&format!("Line {}: invalid request: {}", line, e)),
        }
    }

    let responses = batch::log_batch(convlog, requests, concurrency).await;
    let mut failed = 0;
    for (line, response) in lines.iter().zip(&responses) {
        if !response.success {
            failed += 1;
            utils::print_error(&format!("Line {}: {}", line, response.message));
        }
    }

    utils::print_success(&format!(
        "Imported {} of {} conversation(s)",
        responses.len() - failed,
        responses.len()
    ));
    Ok(())
}

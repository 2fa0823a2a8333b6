use crate::core::ConversationRecord;
use colored::*;

pub fn print_header(text: &str) {
    println!("\n{}", text.bright_cyan().bold());
    println!("{}", "=".repeat(text.chars().count()).bright_cyan());
}

pub fn print_success(text: &str) {
    println!("{}", text.green());
}

pub fn print_error(text: &str) {
    eprintln!("{}", text.red().bold());
}

pub fn print_info(text: &str) {
    println!("{}", text.blue());
}

pub fn print_warning(text: &str) {
    println!("{}", text.yellow().bold());
}

/// One turn as a short block: header line, then both sides of the exchange
pub fn print_record(record: &ConversationRecord) {
    let skill = record.skill_used.as_deref().unwrap_or("-");
    let header = format!(
        "[{}] {} ({}, {:.3}s)",
        record.created_at.format("%Y-%m-%d %H:%M:%S"),
        record.conversation_id,
        skill,
        record.processing_time
    );
    if record.is_error() {
        println!("{}", header.red());
    } else {
        println!("{}", header.bright_black());
    }
    println!("  {} {}", "user:".yellow().bold(), record.user_message);
    println!("  {} {}", "agent:".cyan().bold(), record.agent_response);
}

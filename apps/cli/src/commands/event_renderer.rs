//! Renders pipeline progress to the terminal as it arrives.

use audiogym_training::{LogRecord, LogSource, NoticeLevel, ProgressEvent, ProgressSink};
use colored::Colorize;

/// Stage log lines go to stdout verbatim; notices are colored and errors
/// go to stderr.
#[derive(Debug, Default)]
pub struct TerminalRenderer;

impl ProgressSink for TerminalRenderer {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Notice { level: NoticeLevel::Info, message } => {
                println!("{} {}", "→".cyan(), message);
            }
            ProgressEvent::Notice { level: NoticeLevel::Warn, message } => {
                println!("{} {}", "⚠".yellow().bold(), message.yellow());
            }
            ProgressEvent::Notice { level: NoticeLevel::Error, message } => {
                eprintln!("{} {}", "✗".red().bold(), message.red());
            }
            ProgressEvent::Log { record, .. } => render_record(&record),
            ProgressEvent::Finished { job, stage, success } => {
                if success {
                    println!("\n{} {} {}", "✓".green().bold(), stage.to_string().bold(), job.as_str().cyan());
                } else {
                    println!("\n{} {} {}", "✗".red().bold(), stage.to_string().bold(), job.as_str().cyan());
                }
            }
        }
    }
}

fn render_record(record: &LogRecord) {
    match record {
        LogRecord::Line { source: LogSource::Runner, .. } | LogRecord::Exited { .. } => {
            println!("{}", record.to_string().dimmed());
        }
        LogRecord::Line { text, .. } => println!("{text}"),
    }
}

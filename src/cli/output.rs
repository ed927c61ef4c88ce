//! Colored output helpers for CLI
//!
//! Provides consistent, colored terminal output for the taxrag CLI.

use crate::types::{Citation, StreamEvent, SynthesisStrategy};
use owo_colors::OwoColorize;
use std::io::{self, Write};

/// Output style configuration
pub struct Output {
    /// Whether to use colored output
    pub colored: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    /// Create a new output helper with colors enabled
    pub fn new() -> Self {
        Self { colored: true }
    }

    /// Create a new output helper with colors disabled
    pub fn no_color() -> Self {
        Self { colored: false }
    }

    /// Print the startup banner
    pub fn banner(&self) {
        if self.colored {
            println!(
                "\n   {} {}\n   {}\n",
                "taxrag".bright_cyan().bold(),
                format!("v{}", env!("CARGO_PKG_VERSION")).dimmed(),
                "Multi-agent tax research server".bright_white().bold(),
            );
        } else {
            println!(
                "\n   taxrag v{}\n   Multi-agent tax research server\n",
                env!("CARGO_PKG_VERSION")
            );
        }
    }

    /// Print a success message with a checkmark
    pub fn success(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "✓".green().bold(), message.green());
        } else {
            println!("  [OK] {}", message);
        }
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "•".blue(), message);
        } else {
            println!("  [INFO] {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "⚠".yellow().bold(), message.yellow());
        } else {
            println!("  [WARN] {}", message);
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.colored {
            eprintln!("  {} {}", "✗".red().bold(), message.red());
        } else {
            eprintln!("  [ERROR] {}", message);
        }
    }

    /// Print a header for a section
    pub fn header(&self, title: &str) {
        if self.colored {
            println!("\n  {}", title.bright_white().bold().underline());
        } else {
            println!("\n  === {} ===", title);
        }
    }

    /// Print a key-value pair
    pub fn kv(&self, key: &str, value: &str) {
        if self.colored {
            println!("    {}: {}", key.dimmed(), value.bright_white());
        } else {
            println!("    {}: {}", key, value);
        }
    }

    /// Print a hint/tip message
    pub fn hint(&self, message: &str) {
        if self.colored {
            println!("\n  {}", message.dimmed().italic());
        } else {
            println!("\n  [TIP] {}", message);
        }
    }

    /// Print a table header row
    pub fn table_header(&self, columns: &[&str]) {
        let header: String = columns
            .iter()
            .map(|c| format!("{:<15}", c))
            .collect::<Vec<_>>()
            .join(" ");
        if self.colored {
            println!("    {}", header.bright_white().bold());
            println!("    {}", "─".repeat(columns.len() * 16).dimmed());
        } else {
            println!("    {}", header);
            println!("    {}", "-".repeat(columns.len() * 16));
        }
    }

    /// Print a table row
    pub fn table_row(&self, values: &[&str]) {
        let row: String = values
            .iter()
            .map(|v| format!("{:<15}", v))
            .collect::<Vec<_>>()
            .join(" ");
        println!("    {}", row);
    }

    /// Print one stream event as it arrives. Deltas are written inline.
    pub fn event(&self, event: &StreamEvent) {
        match event {
            StreamEvent::Delta { text } => {
                print!("{}", text);
                io::stdout().flush().ok();
            }
            StreamEvent::Final {
                citations,
                strategy,
                confidence,
                ..
            } => {
                println!();
                self.answer_footer(*strategy, *confidence, citations);
            }
            StreamEvent::Error { message } => {
                println!();
                self.error(message);
            }
        }
    }

    fn answer_footer(&self, strategy: SynthesisStrategy, confidence: f32, citations: &[Citation]) {
        self.header("Answer");
        self.kv("strategy", strategy.as_str());
        self.kv("confidence", &format!("{:.2}", confidence));
        if citations.is_empty() {
            return;
        }
        self.header("Citations");
        for (i, citation) in citations.iter().enumerate() {
            let line = format!(
                "[{}] {} ({}, {})",
                i + 1,
                citation.source,
                citation.reference,
                citation.source_type
            );
            if self.colored {
                println!("    {}", line.cyan());
            } else {
                println!("    {}", line);
            }
        }
    }
}

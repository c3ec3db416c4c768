use colored::*;
use lprof_viewer::{FunctionSummary, FunctionView, LineDetail, SkippedEntry};

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let tail: String = text
        .chars()
        .rev()
        .take(width.saturating_sub(1))
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("…{}", tail)
}

pub fn print_skipped(skipped: &[SkippedEntry]) {
    for entry in skipped {
        eprintln!(
            "{}",
            format!(
                "====> Skipped {} in {}: {}",
                entry.func.as_deref().unwrap_or("<unknown function>"),
                entry.file.as_deref().unwrap_or("<unknown file>"),
                entry.reason
            )
            .yellow()
        );
    }
}

pub fn print_summary(summaries: &[FunctionSummary], top: Option<usize>) {
    println!(
        "{}",
        format!(
            "{:<40} {:<24} {:>12} {:>10} {:>8}",
            "file", "func", "total_time_s", "hits", "pct"
        )
        .bold()
    );
    for summary in summaries.iter().take(top.unwrap_or(usize::MAX)) {
        println!(
            "{:<40} {:<24} {:>12.6} {:>10} {:>7.2}%",
            truncate(&summary.file, 40),
            truncate(&summary.func, 24),
            summary.total_time_seconds,
            summary.total_hits,
            summary.pct_of_total
        );
    }
}

pub fn print_line_details(details: &[LineDetail], top: Option<usize>) {
    println!(
        "{}",
        format!(
            "{:<32} {:<20} {:>6} {:>10} {:>12}  {}",
            "file", "func", "lineno", "hits", "time_s", "Code"
        )
        .bold()
    );
    for detail in details.iter().take(top.unwrap_or(usize::MAX)) {
        println!(
            "{:<32} {:<20} {:>6} {:>10} {:>12.6}  {}",
            truncate(&detail.file, 32),
            truncate(&detail.func, 20),
            detail.lineno,
            detail.hits,
            detail.time_s,
            detail.code.trim_end()
        );
    }
}

pub fn print_function_view(view: &FunctionView) {
    println!(
        "{}",
        format!(
            "====> {} at {}:{}",
            view.key.func, view.key.file, view.key.start_line
        )
        .green()
    );
    if !view.source_found {
        println!("{}", format!("Source for {} not found.", view.key.file).yellow());
        return;
    }
    if view.lines.is_empty() {
        println!(
            "{}",
            format!(
                "No function definition found at line {} of {}.",
                view.key.start_line, view.key.file
            )
            .yellow()
        );
        return;
    }
    for line in &view.lines {
        let time_label = if line.time_s > 0.0 {
            format!("{:.4}s", line.time_s)
        } else {
            String::new()
        };
        let hits_label = if line.hits > 0 {
            format!("×{}", line.hits)
        } else {
            String::new()
        };
        let gutter = format!("{:4}  {:>10}  {:>6}  ", line.line, time_label, hits_label);
        let code = if line.heat > 0.0 {
            let red = (255.0 * line.heat).round() as u8;
            line.code.on_truecolor(red, 40, 40)
        } else {
            line.code.normal()
        };
        println!("{}{}", gutter.dimmed(), code);
    }
}

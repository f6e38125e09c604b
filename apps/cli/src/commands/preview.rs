//! Paginated dataset preview.

use super::Context;
use anyhow::Result;
use colored::Colorize;
use trainsync_core::PageWindow;

const MAX_CELL: usize = 18;

fn cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => truncate(s.clone()),
        serde_json::Value::Null => String::new(),
        other => truncate(other.to_string()),
    }
}

fn truncate(text: String) -> String {
    if text.chars().count() > MAX_CELL {
        let cut: String = text.chars().take(MAX_CELL - 1).collect();
        format!("{cut}~")
    } else {
        text
    }
}

pub async fn execute(ctx: &Context, dataset_id: &str, page: u32, page_size: u32, json: bool) -> Result<()> {
    PageWindow::new(page, page_size)?;
    let registry = ctx.registry()?;
    ctx.enter_dataset(dataset_id).await;
    let page = registry.fetch_preview(dataset_id, page, page_size).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    println!(
        "{} page {} of {} ({} rows total)",
        format!("Dataset {dataset_id}").bold().cyan(),
        page.page,
        page.total_pages,
        page.total_items
    );
    if page.items.is_empty() {
        println!("  {}", "No rows on this page.".dimmed());
        return Ok(());
    }

    let header: Vec<String> = page.columns.iter().map(|c| format!("{:<MAX_CELL$}", truncate(c.clone()))).collect();
    if !header.is_empty() {
        println!("{}", header.join(" ").bold());
    }
    for row in &page.items {
        let cells: Vec<String> = row.iter().map(|v| format!("{:<MAX_CELL$}", cell(v))).collect();
        println!("{}", cells.join(" "));
    }

    let mut nav = Vec::new();
    if let Some(prev) = page.previous_window() {
        nav.push(format!("--page {} for previous", prev.page()));
    }
    if let Some(next) = page.next_window() {
        nav.push(format!("--page {} for next", next.page()));
    }
    if !nav.is_empty() {
        println!("{}", nav.join(", ").dimmed());
    }
    Ok(())
}

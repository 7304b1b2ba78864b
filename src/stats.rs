//! Index and usage overview for `docqa stats`.

use anyhow::Result;

use crate::service::{RagService, SystemStats};

/// Print a summary of what is indexed and what the model has cost so far.
pub async fn run_stats(service: &RagService) -> Result<()> {
    let stats = service.get_vector_store_stats().await?;
    let index_size = stats
        .vector_store
        .path
        .as_ref()
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);
    print!("{}", render(&stats, index_size));
    Ok(())
}

fn render(stats: &SystemStats, index_size: u64) -> String {
    let mut out = String::new();
    let mut line = |s: String| {
        out.push_str(&s);
        out.push('\n');
    };

    line("Document QA Stats".to_string());
    line("=================".to_string());
    line(String::new());
    line(format!("  Backend:     {}", stats.vector_store.backend));
    if let Some(path) = &stats.vector_store.path {
        line(format!("  Index:       {}", path));
        line(format!("  Size:        {}", format_bytes(index_size)));
    }
    line(format!("  Chunks:      {}", stats.vector_store.total_vectors));
    line(format!("  Documents:   {}", stats.documents.total_uploaded));

    if !stats.documents.status_breakdown.is_empty() {
        line(String::new());
        line("  By status:".to_string());
        for (status, n) in &stats.documents.status_breakdown {
            line(format!("  {:<24} {:>6}", status, n));
        }
    }
    if !stats.documents.type_breakdown.is_empty() {
        line(String::new());
        line("  By type:".to_string());
        for (content_type, n) in &stats.documents.type_breakdown {
            line(format!("  {:<48} {:>6}", content_type, n));
        }
    }

    let usage = &stats.token_usage;
    line(String::new());
    line(format!(
        "  Tokens:      {} in / {} out ({} total)",
        usage.total_input_tokens, usage.total_output_tokens, usage.total_tokens
    ));
    line(format!("  Cost:        ${:.4}", usage.total_cost_usd));
    if !usage.by_operation.is_empty() {
        line(format!(
            "  {:<12} {:>6} {:>10} {:>10} {:>10}",
            "OPERATION", "CALLS", "INPUT", "OUTPUT", "COST"
        ));
        line(format!("  {}", "-".repeat(52)));
        for (op, totals) in &usage.by_operation {
            line(format!(
                "  {:<12} {:>6} {:>10} {:>10} {:>10.4}",
                op, totals.calls, totals.input_tokens, totals.output_tokens, totals.cost_usd
            ));
        }
    }

    let cfg = &stats.configuration;
    line(String::new());
    line(format!("  Embedding:   {}", cfg.embedding_model));
    line(format!("  LLM:         {}", cfg.llm_model));
    line(format!(
        "  Chunking:    {} chars, {} overlap, k = {}",
        cfg.chunk_size, cfg.chunk_overlap, cfg.k
    ));
    line(String::new());
    out
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}

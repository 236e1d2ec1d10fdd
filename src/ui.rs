//! Interface de terminal do ocr-batch: barra de progresso e saída colorida.
//!
//! Usa `indicatif` para a barra de progresso e `console` para estilização.
//! O [`BatchProgress`] consome os [`ProgressEvent`] emitidos pelo
//! orquestrador e imprime o resumo final da execução.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::ledger::RunSummary;
use crate::orchestrator::ProgressEvent;

/// Indicador visual de progresso para um lote de imagens.
///
/// Retentativas aparecem em amarelo e reparos em ciano acima da barra,
/// sem interromper a animação.
pub struct BatchProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    cyan: Style,
}

impl BatchProgress {
    /// Cria a barra para `total` imagens.
    pub fn start(total: usize) -> Self {
        let pb = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        pb.set_style(style);
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            cyan: Style::new().cyan(),
        }
    }

    /// Aplica um evento do orquestrador à barra.
    pub fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Completed {
                id,
                succeeded,
                completed,
                success_rate,
                ..
            } => {
                self.pb.set_position(*completed as u64);
                self.pb.set_message(format!("{success_rate:.1}% ok"));
                if !succeeded {
                    self.pb
                        .println(format!("  {} {id}", self.red.apply_to("✗")));
                }
            }
            ProgressEvent::Retrying {
                id,
                kind,
                attempt,
                delay,
            } => {
                self.pb.println(format!(
                    "  {} {id}: {kind} (attempt {attempt}), retrying in {:.1}s",
                    self.yellow.apply_to("↻"),
                    delay.as_secs_f64()
                ));
            }
            ProgressEvent::Repairing { id, kind, limits } => {
                self.pb.println(format!(
                    "  {} {id}: {kind}, re-conditioning to {} px / {} bytes",
                    self.cyan.apply_to("⤓"),
                    limits.max_dimension,
                    limits.max_payload_bytes
                ));
            }
        }
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }

    /// Imprime o resumo da execução, listando as falhas por tipo.
    pub fn print_summary(&self, summary: &RunSummary) {
        let headline = if summary.failed == 0 {
            &self.green
        } else {
            &self.yellow
        };
        println!();
        println!("{}", headline.apply_to("─── Run Summary ───"));
        println!("  run id:        {}", summary.run_id);
        println!(
            "  processed:     {} ({} ok, {} failed)",
            summary.total, summary.succeeded, summary.failed
        );
        if summary.not_dispatched > 0 {
            println!("  not started:   {}", summary.not_dispatched);
        }
        println!("  success rate:  {:.1}%", summary.success_rate);
        println!("  characters:    {}", summary.total_chars);
        println!(
            "  wall clock:    {:.2}s (avg {:.2}s per image)",
            summary.wall_clock_ms as f64 / 1000.0,
            summary.average_item_ms as f64 / 1000.0
        );

        if summary.failed_items.is_empty() {
            println!("  {} all images recognized", self.green.apply_to("✓"));
            return;
        }

        for (kind, count) in &summary.failures_by_kind {
            println!("  {} {kind}: {count}", self.red.apply_to("✗"));
        }
        for item in &summary.failed_items {
            println!(
                "    {} [{}] after {} attempt(s): {}",
                item.id, item.kind, item.attempts, item.message
            );
        }

        let resubmittable = summary
            .failed_items
            .iter()
            .filter(|item| item.kind.is_transient() || item.kind.is_repairable())
            .count();
        if resubmittable > 0 {
            println!(
                "  {} {resubmittable} failure(s) may succeed later: ocr-batch retry --report <file>",
                self.yellow.apply_to("↻")
            );
        }
    }

    /// Imprime o resumo em JSON formatado.
    pub fn print_json(&self, summary: &RunSummary) {
        println!(
            "{}",
            serde_json::to_string_pretty(summary).unwrap_or_default()
        );
    }
}

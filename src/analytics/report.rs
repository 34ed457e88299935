use crate::analytics::patterns::{PatternAnalysis, PatternRecord};
use crate::analytics::performance::PerformanceStats;

fn pct(v: Option<f64>) -> String {
    v.map(|x| format!("{:.1}%", x)).unwrap_or_else(|| "n/a".to_string())
}

fn usd(v: Option<f64>) -> String {
    v.map(|x| format!("${:+.2}", x)).unwrap_or_else(|| "n/a".to_string())
}

fn ratio(v: Option<f64>) -> String {
    v.map(|x| format!("{:.2}", x)).unwrap_or_else(|| "n/a".to_string())
}

impl PerformanceStats {
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(70));
        println!("  SIGNAL PERFORMANCE");
        println!("{}", "=".repeat(70));
        println!("  Notional:    ${:.2} per signal", self.notional_usd);
        println!();
        println!("  STATUS");
        println!("  ───────────────────────────────────");
        println!("  Total:       {}", self.total_trades);
        for (status, count) in &self.by_status {
            println!("  {:<18} {}", status, count);
        }
        println!();
        println!("  OUTCOMES");
        println!("  ───────────────────────────────────");
        println!("  Win/Loss:    {} / {}", self.wins, self.losses);
        println!("  Success:     {}", pct(self.success_rate));
        println!("  Closed:      {}", self.closed_trades);
        println!("  PnL:         ${:+.2}", self.total_pnl_usd);
        println!("  Avg Win:     {}", usd(self.avg_win_usd));
        println!("  Avg Loss:    {}", usd(self.avg_loss_usd));
        println!("  Best:        {}", usd(self.best_trade_usd));
        println!("  Worst:       {}", usd(self.worst_trade_usd));
        println!(
            "  Avg Hold:    {}",
            self.avg_duration_hours
                .map(|h| format!("{:.1}h", h))
                .unwrap_or_else(|| "n/a".to_string())
        );
        println!();
        println!("  TARGETS ({} evaluated)", self.hit_rates.evaluated);
        println!("  ───────────────────────────────────");
        println!(
            "  TP1 {} | TP2 {} | TP3 {} | SL {}",
            pct(self.hit_rates.tp1),
            pct(self.hit_rates.tp2),
            pct(self.hit_rates.tp3),
            pct(self.hit_rates.stop_loss)
        );
        println!();
        println!("  RISK");
        println!("  ───────────────────────────────────");
        let a = &self.advanced;
        println!("  Sharpe:      {}", ratio(a.sharpe_ratio));
        match &a.max_drawdown {
            Some(dd) => {
                println!("  Max DD:      ${:.2} ({:.1}%)", dd.amount_usd, dd.percent);
                println!(
                    "  Recovery:    {}",
                    dd.days_to_recover
                        .map(|d| format!("{:.1} days", d))
                        .unwrap_or_else(|| "not recovered".to_string())
                );
            }
            None => println!("  Max DD:      none"),
        }
        if a.profit_factor.is_infinite() {
            println!("  Profit Factor: inf");
        } else {
            println!("  Profit Factor: {:.2}", a.profit_factor);
        }
        println!("  Expectancy:  {}", usd(a.expectancy_usd));
        println!("  Recovery F.: {}", ratio(a.recovery_factor));
        println!(
            "  Streaks:     best {}W / worst {}L{}",
            a.streaks.longest_win,
            a.streaks.longest_loss,
            a.streaks
                .current
                .map(|c| format!(" | current {} x{}", c.outcome, c.length))
                .unwrap_or_default()
        );
        if let Some(c) = &a.confidence_correlation {
            println!(
                "  Conf. corr:  {:+.3} ({:?}, n={})",
                c.coefficient, c.strength, c.samples
            );
        }

        if !self.by_symbol.is_empty() {
            println!();
            println!("  BY SYMBOL");
            println!("  ───────────────────────────────────");
            for (symbol, s) in &self.by_symbol {
                println!(
                    "  {:>8}: {} trades | WR {} | PnL ${:+.2}",
                    symbol,
                    s.trades,
                    pct(s.win_rate),
                    s.total_pnl_usd
                );
            }
        }

        if !self.by_timeframe.is_empty() {
            println!();
            println!("  BY TIMEFRAME");
            println!("  ───────────────────────────────────");
            for (tf, s) in &self.by_timeframe {
                println!(
                    "  {:>8}: {} trades | WR {} | PnL ${:+.2}",
                    tf,
                    s.trades,
                    pct(s.win_rate),
                    s.total_pnl_usd
                );
            }
        }

        println!("{}", "=".repeat(70));
    }
}

fn print_patterns(title: &str, records: &[PatternRecord]) {
    println!();
    println!("  {}", title);
    println!("  ───────────────────────────────────");
    if records.is_empty() {
        println!("  none");
        return;
    }
    for p in records {
        println!(
            "  {:<36} win {:>5.1}% vs loss {:>5.1}% | p={:.4} | power {:.2}",
            p.condition(),
            p.rate_in_winners * 100.0,
            p.rate_in_losers * 100.0,
            p.p_value,
            p.predictive_power
        );
    }
}

impl PatternAnalysis {
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(70));
        println!("  SIGNAL PATTERNS");
        println!("{}", "=".repeat(70));
        println!(
            "  {} winners / {} losers | {} conditions tested, {} excluded",
            self.winners, self.losers, self.conditions_tested, self.conditions_excluded
        );
        print_patterns("SUCCESS FACTORS", &self.success_factors);
        print_patterns("FAILURE FACTORS", &self.failure_factors);
        println!("{}", "=".repeat(70));
    }
}

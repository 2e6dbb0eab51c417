//! Human-readable plan table for the CLI.

use std::io;

use decimal_percentage::Percentage;
use rust_decimal::{Decimal, prelude::FromPrimitive};
use rusty_money::Money;
use tabled::{
    builder::Builder,
    grid::config::HorizontalLine,
    settings::{Alignment, Color, Style, Theme, object::{Columns, Rows}},
};

use crate::plan::{FulfillmentMode, Plan, PlanLine};

/// Writes the plan as a table followed by a totals summary and warnings.
///
/// # Errors
///
/// Returns any error from the underlying writer.
pub fn write_plan(mut out: impl io::Write, plan: &Plan) -> io::Result<()> {
    let mut builder = Builder::default();
    builder.push_record(["Item", "Qty", "Vendor", "Unit Price", "Discount", "Line Total", "Fulfillment"]);

    let currency = plan.total_cost.currency();
    for line in &plan.lines {
        builder.push_record([
            line.item.to_string(),
            line.qty.to_string(),
            line.vendor.to_string(),
            line.unit_price.to_string(),
            discount_cell(line),
            Money::from_minor(line.total_minor(), currency).to_string(),
            mode_label(line.fulfillment).to_string(),
        ]);
    }

    let mut table = builder.build();
    let mut theme = Theme::from(Style::modern_rounded());
    let separator = HorizontalLine::new(Some('─'), Some('┼'), Some('├'), Some('┤'));
    theme.remove_horizontal_lines();
    theme.insert_horizontal_line(1, separator);

    table.with(theme);
    table.modify(Rows::first(), Color::BOLD);
    table.modify(Columns::new(3..6), Alignment::right());

    writeln!(out, "\n{table}")?;

    write_summary(&mut out, plan)
}

fn write_summary(out: &mut impl io::Write, plan: &Plan) -> io::Result<()> {
    writeln!(out, " Total:   {}", plan.total_cost)?;

    let percent_points = savings_percent_points(plan);
    writeln!(
        out,
        " Savings: ({percent_points:.2}%) {}",
        plan.total_savings
    )?;

    if !plan.unmet.is_empty() {
        write!(out, " Unmet:   ")?;
        for (i, item) in plan.unmet.iter().enumerate() {
            if i > 0 {
                write!(out, ", ")?;
            }
            write!(out, "{item}")?;
        }
        writeln!(out)?;
    }

    for warning in &plan.warnings {
        writeln!(out, " Warning: {warning}")?;
    }

    writeln!(out)
}

fn discount_cell(line: &PlanLine) -> String {
    if line.discount.is_zero() {
        String::new()
    } else {
        format!("-{}", line.discount)
    }
}

fn mode_label(mode: FulfillmentMode) -> &'static str {
    match mode {
        FulfillmentMode::Delivery => "delivery",
        FulfillmentMode::Pickup => "pickup",
    }
}

/// Savings relative to the pre-savings anchor (total + savings), in percent
/// points. Ratio is taken in decimal space to avoid truncation.
fn savings_percent_points(plan: &Plan) -> Decimal {
    let savings_minor = plan.total_savings.to_minor_units();
    let anchor_minor = plan.total_cost.to_minor_units() + savings_minor;

    if anchor_minor == 0 {
        return Decimal::ZERO;
    }

    let savings = Decimal::from_i64(savings_minor).unwrap_or(Decimal::ZERO);
    let anchor = Decimal::from_i64(anchor_minor).unwrap_or(Decimal::ZERO);
    let fraction = Percentage::from(savings / anchor);

    ((fraction * Decimal::ONE) * Decimal::from_i64(100).unwrap_or(Decimal::ZERO)).round_dp(2)
}

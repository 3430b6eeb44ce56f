//! Resident ledger totals. Money is summed in integer cents.

use super::decimal::{decimal_text, Decimal};
use super::ResourceService;
use crate::error::AppError;
use crate::query::Filter;
use serde_json::{Map, Value};

pub const LEDGER: &str = "resident_ledger";
pub const LEDGER_ENTRY: &str = "resident_ledger_entry";

/// Parse a money amount (JSON number or plain decimal string) into cents, rounding half away from zero.
/// `None` for anything else, including amounts too large for i64 cents.
pub fn to_cents(v: &Value) -> Option<i64> {
    if let Some(i) = v.as_i64() {
        return i.checked_mul(100);
    }
    let text = decimal_text(v)?;
    decimal_cents(Decimal::parse(&text)?)
}

fn decimal_cents(d: Decimal<'_>) -> Option<i64> {
    let whole: i64 = if d.whole.is_empty() { 0 } else { d.whole.parse().ok()? };
    let mut frac_digits = d.frac.bytes().map(|b| i64::from(b - b'0'));
    let tens = frac_digits.next().unwrap_or(0);
    let ones = frac_digits.next().unwrap_or(0);
    let round_up = frac_digits.next().map(|digit| digit >= 5).unwrap_or(false);
    let cents = whole
        .checked_mul(100)?
        .checked_add(tens * 10 + ones + i64::from(round_up))?;
    Some(if d.negative { -cents } else { cents })
}

/// Render cents as a fixed two-decimal string, e.g. `-12.05`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LedgerTotals {
    pub charges: i64,
    pub credits: i64,
}

impl LedgerTotals {
    /// Charges add to the balance; credits, discounts and payments reduce it.
    /// An unreadable amount or an overflowing sum is an error, never skipped.
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a Value>) -> Result<Self, AppError> {
        let mut totals = LedgerTotals::default();
        for entry in entries {
            let total = match entry["kind"].as_str() {
                Some("charge") => &mut totals.charges,
                Some("credit" | "discount" | "payment") => &mut totals.credits,
                _ => continue,
            };
            let amount = to_cents(&entry["amount"]).ok_or_else(|| {
                AppError::Internal(format!("ledger entry {} has unreadable amount {}", entry["id"], entry["amount"]))
            })?;
            *total = total
                .checked_add(amount)
                .ok_or_else(|| AppError::Internal("ledger totals overflow".into()))?;
        }
        Ok(totals)
    }

    pub fn balance(&self) -> i64 {
        self.charges.saturating_sub(self.credits)
    }

    fn to_values(self) -> Map<String, Value> {
        let mut values = Map::new();
        values.insert("total_charges".into(), Value::String(format_cents(self.charges)));
        values.insert("total_credits".into(), Value::String(format_cents(self.credits)));
        values.insert("balance".into(), Value::String(format_cents(self.balance())));
        values
    }
}

impl ResourceService {
    /// Recompute a ledger's totals from its active entries and store them.
    pub async fn recalculate_ledger(&self, ledger_id: i64) -> Result<Value, AppError> {
        let ledgers = self.model.require(LEDGER)?;
        let entries = self.model.require(LEDGER_ENTRY)?;
        if self.store.find(ledgers, ledger_id, false).await?.is_none() {
            return Err(ledgers.not_found(ledger_id));
        }
        let rows = self
            .store
            .list(entries, &[Filter::eq("ledger_id", Value::from(ledger_id))], &[], false)
            .await?;
        let totals = LedgerTotals::from_entries(&rows)?;
        let updated = self
            .store
            .update(ledgers, ledger_id, &totals.to_values())
            .await?
            .ok_or_else(|| ledgers.not_found(ledger_id))?;
        tracing::info!(
            ledger_id,
            entries = rows.len(),
            balance = %format_cents(totals.balance()),
            "ledger recalculated"
        );
        Ok(updated)
    }

    /// Recalculate every listed ledger that still exists (entries may outlive a deleted ledger mid-cascade).
    pub(crate) async fn recalculate_ledgers(&self, ledger_ids: impl IntoIterator<Item = i64>) -> Result<(), AppError> {
        let ledgers = self.model.require(LEDGER)?;
        let mut ids: Vec<i64> = ledger_ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        for id in ids {
            if self.store.find(ledgers, id, false).await?.is_some() {
                self.recalculate_ledger(id).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cents_from_strings_and_numbers() {
        assert_eq!(to_cents(&json!("12.5")), Some(1250));
        assert_eq!(to_cents(&json!("0.105")), Some(11));
        assert_eq!(to_cents(&json!("-3.01")), Some(-301));
        assert_eq!(to_cents(&json!(".99")), Some(99));
        assert_eq!(to_cents(&json!(7)), Some(700));
        assert_eq!(to_cents(&json!(0.1)), Some(10));
        assert_eq!(to_cents(&json!("abc")), None);
        assert_eq!(to_cents(&json!("1.2.3")), None);
        assert_eq!(to_cents(&json!("1e2")), None);
        assert_eq!(to_cents(&Value::Null), None);
    }

    #[test]
    fn oversized_amounts_do_not_overflow() {
        assert_eq!(to_cents(&json!("92233720368547758.08")), None);
        assert_eq!(to_cents(&json!("92233720368547758.07")), Some(i64::MAX));
        assert_eq!(to_cents(&json!(i64::MAX)), None);

        let entries = vec![
            json!({"kind": "charge", "amount": "92233720368547758.07"}),
            json!({"kind": "charge", "amount": "0.01"}),
        ];
        assert!(matches!(LedgerTotals::from_entries(&entries), Err(AppError::Internal(_))));
    }

    #[test]
    fn unreadable_amounts_are_errors() {
        let entries = vec![
            json!({"kind": "charge", "amount": "100"}),
            json!({"id": 7, "kind": "charge", "amount": "1e2"}),
        ];
        match LedgerTotals::from_entries(&entries) {
            Err(AppError::Internal(msg)) => assert!(msg.contains("entry 7")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn formats_two_decimals() {
        assert_eq!(format_cents(0), "0.00");
        assert_eq!(format_cents(1205), "12.05");
        assert_eq!(format_cents(-5), "-0.05");
    }

    #[test]
    fn balance_is_charges_minus_credits() {
        let entries = vec![
            json!({"kind": "charge", "amount": "100.10"}),
            json!({"kind": "charge", "amount": 0.2}),
            json!({"kind": "payment", "amount": "50"}),
            json!({"kind": "discount", "amount": "0.30"}),
            json!({"kind": "credit", "amount": "10"}),
            json!({"kind": "other", "amount": "999"}),
        ];
        let totals = LedgerTotals::from_entries(&entries).unwrap();
        assert_eq!(totals.charges, 10030);
        assert_eq!(totals.credits, 6030);
        assert_eq!(totals.balance(), 4000);
    }
}

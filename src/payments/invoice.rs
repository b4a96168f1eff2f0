use anyhow::Context;
use bytes::Bytes;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use super::repo_types::Payment;
use crate::html::escape;
use crate::inspections::repo_types::Inspection;
use crate::money::format_cents;
use crate::storage::StorageClient;

/// Links are presigned per response, so they only need to outlive the download.
const INVOICE_LINK_SECS: u64 = 60 * 60;

/// `INV-<millis><4 digits>`. The random tail keeps numbers unique when two
/// confirmations land in the same millisecond.
pub fn invoice_number(at: OffsetDateTime, tail: u16) -> String {
    format!("INV-{}{:04}", at.unix_timestamp_nanos() / 1_000_000, tail % 10_000)
}

pub fn object_key(number: &str) -> String {
    format!("invoices/{number}.html")
}

pub fn render(number: &str, payment: &Payment, inspection: &Inspection, payer: &str) -> String {
    let paid_at = payment
        .paid_at
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_default();
    let amount = format_cents(payment.amount_cents);
    format!(
        r#"<!doctype html>
<html><head><meta charset="utf-8"><title>Invoice {number}</title></head>
<body>
<h1>Invoice {number}</h1>
<p>Billed to: {payer}<br>Paid: {paid_at}</p>
<table>
<tr><th>Item</th><th>Amount</th></tr>
<tr><td>{kind} inspection: {boat} ({location})</td><td>{amount} {currency}</td></tr>
<tr><td><strong>Total</strong></td><td><strong>{amount} {currency}</strong></td></tr>
</table>
<p>Payment reference {intent}</p>
</body></html>
"#,
        number = escape(number),
        payer = escape(payer),
        kind = inspection.inspection_type.label(),
        boat = escape(&inspection.boat_name),
        location = escape(&inspection.location),
        currency = escape(&payment.currency),
        intent = escape(&payment.external_intent_id),
    )
}

pub async fn upload(storage: &dyn StorageClient, key: &str, html: String) -> anyhow::Result<()> {
    storage
        .put_object(key, Bytes::from(html), "text/html; charset=utf-8")
        .await
        .context("upload invoice")
}

pub async fn link(storage: &dyn StorageClient, key: &str) -> anyhow::Result<String> {
    storage
        .presign_get(key, INVOICE_LINK_SECS)
        .await
        .context("presign invoice")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspections::lifecycle::sample;
    use crate::payments::repo_types::PaymentStatus;
    use uuid::Uuid;

    #[test]
    fn number_is_millis_plus_tail() {
        let at = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(invoice_number(at, 42), "INV-17000000000000042");
        assert_eq!(invoice_number(at, 12_345), "INV-17000000000002345");
        assert_ne!(invoice_number(at, 1), invoice_number(at, 2));
        assert_eq!(object_key("INV-1"), "invoices/INV-1.html");
    }

    #[test]
    fn renders_line_item_and_escapes() {
        let mut inspection = sample(Uuid::new_v4());
        inspection.boat_name = "Sea <Breeze>".into();
        let now = OffsetDateTime::now_utc();
        let payment = Payment {
            id: Uuid::new_v4(),
            inspection_id: inspection.id,
            user_id: inspection.client_id,
            amount_cents: 45000,
            currency: "USD".into(),
            external_intent_id: "pi_1".into(),
            status: PaymentStatus::Completed,
            invoice_number: None,
            invoice_key: None,
            invoice_url: None,
            paid_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        let html = render("INV-1", &payment, &inspection, "a@example.com");
        assert!(html.contains("450.00 USD"));
        assert!(html.contains("Sea &lt;Breeze&gt;"));
    }
}

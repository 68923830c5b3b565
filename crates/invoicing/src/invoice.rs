use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tapor_core::{CustomerId, DomainError, DomainResult, Entity, InvoiceId, Money};

use crate::numbering::InvoiceNumber;

/// Invoice kind.
///
/// A pre-invoice is a quote: it never touches stock until converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvoiceKind {
    Invoice,
    PreInvoice,
}

impl InvoiceKind {
    /// Status a freshly created document of this kind starts in.
    pub fn initial_status(self) -> InvoiceStatus {
        match self {
            InvoiceKind::Invoice => InvoiceStatus::Final,
            InvoiceKind::PreInvoice => InvoiceStatus::Draft,
        }
    }

    /// Whether creating a document of this kind consumes stock.
    pub fn consumes_stock(self) -> bool {
        self == InvoiceKind::Invoice
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceKind::Invoice => "invoice",
            InvoiceKind::PreInvoice => "pre-invoice",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "invoice" => Ok(InvoiceKind::Invoice),
            "pre-invoice" => Ok(InvoiceKind::PreInvoice),
            other => Err(DomainError::invalid_field(
                "type",
                format!("unknown invoice type '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Final,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Final => "final",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "draft" => Ok(InvoiceStatus::Draft),
            "final" => Ok(InvoiceStatus::Final),
            other => Err(DomainError::invalid_field(
                "status",
                format!("unknown invoice status '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    /// `discount_value` is whole percent points of the subtotal.
    #[default]
    Percent,
    /// `discount_value` is a fixed amount in smallest currency unit.
    Amount,
}

impl DiscountType {
    pub fn as_str(self) -> &'static str {
        match self {
            DiscountType::Percent => "percent",
            DiscountType::Amount => "amount",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "percent" => Ok(DiscountType::Percent),
            "amount" => Ok(DiscountType::Amount),
            other => Err(DomainError::invalid_field(
                "discountType",
                format!("unknown discount type '{other}'"),
            )),
        }
    }
}

/// Persisted invoice or pre-invoice header.
///
/// Amounts are stored exactly as the caller supplied them; `total` always
/// equals `subtotal - discount_amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: InvoiceId,
    pub invoice_number: InvoiceNumber,
    pub customer_id: CustomerId,
    #[serde(rename = "type")]
    pub kind: InvoiceKind,
    pub subtotal: Money,
    pub discount_type: DiscountType,
    pub discount_value: Money,
    pub discount_amount: Money,
    pub total: Money,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn from_draft(
        id: InvoiceId,
        invoice_number: InvoiceNumber,
        draft: &InvoiceDraft,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            invoice_number,
            customer_id: draft.customer_id,
            kind: draft.kind,
            subtotal: draft.subtotal,
            discount_type: draft.discount_type,
            discount_value: draft.discount_value,
            discount_amount: draft.discount_amount,
            total: draft.total,
            status: draft.kind.initial_status(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Conversion is only defined for pre-invoices; anything else is reported
    /// as a missing pre-invoice.
    pub fn ensure_convertible(&self) -> DomainResult<()> {
        if self.kind != InvoiceKind::PreInvoice {
            return Err(DomainError::not_found(format!(
                "pre-invoice {}",
                self.invoice_number
            )));
        }
        Ok(())
    }

    /// Turn a pre-invoice into a final invoice in place (same id and number).
    pub fn convert(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_convertible()?;
        self.kind = InvoiceKind::Invoice;
        self.status = InvoiceStatus::Final;
        self.updated_at = now;
        Ok(())
    }

    /// Apply a partial update to the scalar fields.
    ///
    /// The merged header must still satisfy the totals rule. Kind and status
    /// are not patchable; only conversion changes them.
    pub fn apply_patch(&mut self, patch: &InvoicePatch, now: DateTime<Utc>) -> DomainResult<()> {
        let mut next = self.clone();
        if let Some(customer_id) = patch.customer_id {
            next.customer_id = customer_id;
        }
        if let Some(subtotal) = patch.subtotal {
            next.subtotal = subtotal;
        }
        if let Some(discount_type) = patch.discount_type {
            next.discount_type = discount_type;
        }
        if let Some(discount_value) = patch.discount_value {
            next.discount_value = discount_value;
        }
        if let Some(discount_amount) = patch.discount_amount {
            next.discount_amount = discount_amount;
        }
        if let Some(total) = patch.total {
            next.total = total;
        }
        validate_amounts(
            next.subtotal,
            next.discount_type,
            next.discount_value,
            next.discount_amount,
            next.total,
        )?;
        next.updated_at = now;
        *self = next;
        Ok(())
    }
}

impl Entity for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// Input for creating an invoice or pre-invoice.
///
/// Number, status and timestamps are assigned by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDraft {
    pub customer_id: CustomerId,
    #[serde(rename = "type")]
    pub kind: InvoiceKind,
    pub subtotal: Money,
    #[serde(default)]
    pub discount_type: DiscountType,
    #[serde(default)]
    pub discount_value: Money,
    #[serde(default)]
    pub discount_amount: Money,
    pub total: Money,
}

impl InvoiceDraft {
    pub fn validate(&self) -> DomainResult<()> {
        validate_amounts(
            self.subtotal,
            self.discount_type,
            self.discount_value,
            self.discount_amount,
            self.total,
        )
    }
}

/// Partial update of an invoice header. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoicePatch {
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    #[serde(default)]
    pub subtotal: Option<Money>,
    #[serde(default)]
    pub discount_type: Option<DiscountType>,
    #[serde(default)]
    pub discount_value: Option<Money>,
    #[serde(default)]
    pub discount_amount: Option<Money>,
    #[serde(default)]
    pub total: Option<Money>,
}

fn validate_amounts(
    subtotal: Money,
    discount_type: DiscountType,
    discount_value: Money,
    discount_amount: Money,
    total: Money,
) -> DomainResult<()> {
    if subtotal < 0 {
        return Err(DomainError::invalid_field("subtotal", "cannot be negative"));
    }
    if discount_value < 0 {
        return Err(DomainError::invalid_field("discountValue", "cannot be negative"));
    }
    if discount_type == DiscountType::Percent && discount_value > 100 {
        return Err(DomainError::invalid_field(
            "discountValue",
            "percent discount cannot exceed 100",
        ));
    }
    if discount_amount < 0 {
        return Err(DomainError::invalid_field("discountAmount", "cannot be negative"));
    }
    if subtotal.checked_sub(discount_amount) != Some(total) {
        return Err(DomainError::invalid_field(
            "total",
            "must equal subtotal minus discountAmount",
        ));
    }
    if total < 0 {
        return Err(DomainError::invalid_field("total", "cannot be negative"));
    }
    Ok(())
}

//! Result Reconciler
//!
//! Fuses provider results into one `ReconciledReceipt` via confidence-based
//! selection with provenance.
//!
//! Algorithm:
//! 1. For each logical field, collect every non-empty value from every result
//! 2. Select the value with the highest declared confidence (absent ranks lowest)
//! 3. Break confidence ties by the field class priority table
//! 4. Break remaining ties (same provider kind) by the smaller rendered value
//! 5. Overall OCR confidence = maximum scalar confidence (never an average)
//!
//! The selection order is total, so the output depends only on the values in
//! the result set and never on their arrival order.

use crate::error::ReconcileError;
use crate::types::{
    ProviderAttribution, ProviderKind, ProviderResult, ReconciledReceipt, Sourced,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

/// Field specialization classes used for tie-breaking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldClass {
    /// Total, subtotal, tax, tip
    Monetary,
    /// Purchase date, line items, transaction id, payment method, document type
    Transactional,
    /// Store name, address, phone, postal code, country
    Location,
}

/// Provider priority per field class (earlier wins a confidence tie)
///
/// New provider kinds are added by appending them to each list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityTable {
    monetary: Vec<ProviderKind>,
    transactional: Vec<ProviderKind>,
    location: Vec<ProviderKind>,
}

impl Default for PriorityTable {
    fn default() -> Self {
        Self {
            monetary: vec![ProviderKind::StructuredExtraction, ProviderKind::TextLocation],
            transactional: vec![ProviderKind::StructuredExtraction, ProviderKind::TextLocation],
            location: vec![ProviderKind::TextLocation, ProviderKind::StructuredExtraction],
        }
    }
}

impl PriorityTable {
    pub fn order(&self, class: FieldClass) -> &[ProviderKind] {
        match class {
            FieldClass::Monetary => &self.monetary,
            FieldClass::Transactional => &self.transactional,
            FieldClass::Location => &self.location,
        }
    }

    /// Position of `provider` within `class` (unlisted providers rank last)
    pub fn rank(&self, class: FieldClass, provider: ProviderKind) -> usize {
        self.order(class)
            .iter()
            .position(|p| *p == provider)
            .unwrap_or(usize::MAX)
    }
}

/// Result reconciler
///
/// Pure fusion logic: inputs are borrowed and never mutated.
#[derive(Debug, Clone, Default)]
pub struct ResultReconciler {
    priorities: PriorityTable,
}

/// Selection candidate: one non-empty value from one result
struct Candidate<T> {
    value: T,
    provider: ProviderKind,
    confidence: Option<f64>,
}

impl ResultReconciler {
    pub fn new(priorities: PriorityTable) -> Self {
        Self { priorities }
    }

    /// Fuse `results` into one structured receipt
    ///
    /// # Errors
    /// `NoUsableResult` if `results` is empty (every provider failed). A
    /// non-empty set whose results carry no fields reconciles to an empty
    /// receipt; validation then rejects it.
    pub fn reconcile(
        &self,
        results: &[ProviderResult],
    ) -> Result<ReconciledReceipt, ReconcileError> {
        if results.is_empty() {
            return Err(ReconcileError::NoUsableResult);
        }

        use FieldClass::*;

        let store_name = self.select(results, Location, |r| r.fields.store_name.clone());
        let address = self.select(results, Location, |r| r.fields.address.clone());
        let phone = self.select(results, Location, |r| r.fields.phone.clone());
        let postal_code = self.select(results, Location, |r| r.fields.postal_code.clone());
        let country = self.select(results, Location, |r| r.fields.country.clone());

        let total_amount = self.select(results, Monetary, |r| r.fields.total_amount);
        let subtotal_amount = self.select(results, Monetary, |r| r.fields.subtotal_amount);
        let tax_amount = self.select(results, Monetary, |r| r.fields.tax_amount);
        let tip_amount = self.select(results, Monetary, |r| r.fields.tip_amount);

        let purchase_date = self.select(results, Transactional, |r| r.fields.purchase_date);
        let line_items = self.select(results, Transactional, |r| {
            (!r.fields.line_items.is_empty()).then(|| r.fields.line_items.clone())
        });
        let transaction_id = self.select(results, Transactional, |r| r.fields.transaction_id.clone());
        let payment_method = self.select(results, Transactional, |r| r.fields.payment_method.clone());
        let document_type = self.select(results, Transactional, |r| r.document_type.clone());

        let ocr_confidence = max_confidence(results.iter());
        let location_confidence = max_confidence(results.iter().filter(|r| {
            let f = &r.fields;
            f.store_name.is_some()
                || f.address.is_some()
                || f.phone.is_some()
                || f.postal_code.is_some()
                || f.country.is_some()
        }));

        let mut reconciled = ReconciledReceipt {
            store_name,
            address,
            phone,
            postal_code,
            country,
            purchase_date,
            total_amount,
            subtotal_amount,
            tax_amount,
            tip_amount,
            line_items,
            transaction_id,
            payment_method,
            document_type,
            ocr_confidence,
            location_confidence,
            attribution: None,
            preprocessing: preprocessing_labels(results),
        };

        let contributors: BTreeSet<ProviderKind> =
            reconciled.field_sources().into_values().collect();
        reconciled.attribution = match contributors.len() {
            0 => None,
            1 => contributors.iter().next().copied().map(ProviderAttribution::Single),
            _ => Some(ProviderAttribution::Hybrid),
        };

        tracing::debug!(
            results = results.len(),
            fields = reconciled.field_sources().len(),
            contributors = contributors.len(),
            ocr_confidence = ?reconciled.ocr_confidence,
            completeness = reconciled.completeness(),
            "Provider results reconciled"
        );

        Ok(reconciled)
    }

    /// Select the winning value for one field
    fn select<T, F>(&self, results: &[ProviderResult], class: FieldClass, get: F) -> Option<Sourced<T>>
    where
        T: Debug,
        F: Fn(&ProviderResult) -> Option<T>,
    {
        results
            .iter()
            .filter_map(|r| {
                get(r).map(|value| Candidate {
                    value,
                    provider: r.provider,
                    confidence: r.confidence,
                })
            })
            .min_by(|a, b| self.compare(class, a, b))
            .map(|winner| Sourced {
                value: winner.value,
                provider: winner.provider,
                confidence: winner.confidence,
            })
    }

    /// Total order over candidates; `Less` means "preferred"
    fn compare<T: Debug>(&self, class: FieldClass, a: &Candidate<T>, b: &Candidate<T>) -> Ordering {
        confidence_key(b.confidence)
            .total_cmp(&confidence_key(a.confidence))
            .then_with(|| {
                self.priorities
                    .rank(class, a.provider)
                    .cmp(&self.priorities.rank(class, b.provider))
            })
            .then_with(|| a.provider.cmp(&b.provider))
            .then_with(|| format!("{:?}", a.value).cmp(&format!("{:?}", b.value)))
    }
}

/// Fuse `results` with the default priority table
pub fn reconcile(results: &[ProviderResult]) -> Result<ReconciledReceipt, ReconcileError> {
    ResultReconciler::default().reconcile(results)
}

/// Absent confidence ranks below any declared confidence
fn confidence_key(confidence: Option<f64>) -> f64 {
    confidence.unwrap_or(f64::NEG_INFINITY)
}

fn max_confidence<'a>(results: impl Iterator<Item = &'a ProviderResult>) -> Option<f64> {
    results
        .filter_map(|r| r.confidence)
        .max_by(|a, b| a.total_cmp(b))
}

/// Preprocessing label per provider, from that provider's most confident labelled result
fn preprocessing_labels(results: &[ProviderResult]) -> BTreeMap<ProviderKind, String> {
    let mut best: BTreeMap<ProviderKind, (Option<f64>, String)> = BTreeMap::new();

    for result in results {
        let Some(label) = &result.preprocessing else {
            continue;
        };

        let replace = match best.get(&result.provider) {
            None => true,
            Some((confidence, current)) => {
                match confidence_key(result.confidence).total_cmp(&confidence_key(*confidence)) {
                    Ordering::Greater => true,
                    Ordering::Equal => label < current,
                    Ordering::Less => false,
                }
            }
        };

        if replace {
            best.insert(result.provider, (result.confidence, label.clone()));
        }
    }

    best.into_iter().map(|(kind, (_, label))| (kind, label)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Amount, ExtractedFields, LineItem, PurchaseDate};
    use chrono::NaiveDate;

    fn structured(confidence: Option<f64>, fields: ExtractedFields) -> ProviderResult {
        ProviderResult::new(ProviderKind::StructuredExtraction, confidence, fields)
    }

    fn text_location(confidence: Option<f64>, fields: ExtractedFields) -> ProviderResult {
        ProviderResult::new(ProviderKind::TextLocation, confidence, fields)
    }

    fn store(name: &str) -> ExtractedFields {
        ExtractedFields {
            store_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn total(minor: i64) -> ExtractedFields {
        ExtractedFields {
            total_amount: Some(Amount::from_minor(minor)),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_results_is_no_usable_result() {
        assert_eq!(reconcile(&[]).unwrap_err(), ReconcileError::NoUsableResult);
    }

    #[test]
    fn test_empty_results_reconcile_to_empty_receipt() {
        let reconciled = reconcile(&[text_location(Some(0.0), ExtractedFields::default())]).unwrap();

        assert!(reconciled.is_empty());
        assert_eq!(reconciled.attribution, None);
        assert_eq!(reconciled.completeness(), 0.0);
        assert_eq!(reconciled.ocr_confidence, Some(0.0));
    }

    #[test]
    fn test_higher_confidence_wins_store_name() {
        let results = [
            structured(Some(0.9), store("ACME MART")),
            text_location(Some(0.4), store("ACNE MART")),
        ];

        let reconciled = reconcile(&results).unwrap();
        let name = reconciled.store_name.unwrap();
        assert_eq!(name.value, "ACME MART");
        assert_eq!(name.provider, ProviderKind::StructuredExtraction);
        assert_eq!(name.confidence, Some(0.9));
    }

    #[test]
    fn test_single_source_field_passes_unchanged() {
        let results = [
            structured(
                Some(0.3),
                ExtractedFields {
                    payment_method: Some("VISA".to_string()),
                    ..Default::default()
                },
            ),
            text_location(
                Some(0.95),
                ExtractedFields {
                    postal_code: Some("50450".to_string()),
                    ..Default::default()
                },
            ),
        ];

        let reconciled = reconcile(&results).unwrap();
        assert_eq!(reconciled.payment_method.unwrap().value, "VISA");
        assert_eq!(reconciled.postal_code.unwrap().value, "50450");
        assert_eq!(reconciled.attribution, Some(ProviderAttribution::Hybrid));
    }

    #[test]
    fn test_total_disagreement_uses_higher_confidence() {
        let results = [
            structured(Some(0.6), total(1250)),
            text_location(Some(0.8), total(1280)),
        ];

        let total = reconcile(&results).unwrap().total_amount.unwrap();
        assert_eq!(total.value, Amount::from_minor(1280));
        assert_eq!(total.provider, ProviderKind::TextLocation);
    }

    #[test]
    fn test_equal_confidence_monetary_prefers_structured() {
        let results = [
            text_location(Some(0.7), total(1280)),
            structured(Some(0.7), total(1250)),
        ];

        let total = reconcile(&results).unwrap().total_amount.unwrap();
        assert_eq!(total.value, Amount::from_minor(1250));
        assert_eq!(total.provider, ProviderKind::StructuredExtraction);
    }

    #[test]
    fn test_equal_confidence_location_prefers_text_location() {
        let results = [
            structured(Some(0.7), store("ACME")),
            text_location(Some(0.7), store("ACME MART SDN BHD")),
        ];

        let name = reconcile(&results).unwrap().store_name.unwrap();
        assert_eq!(name.value, "ACME MART SDN BHD");
        assert_eq!(name.provider, ProviderKind::TextLocation);
    }

    #[test]
    fn test_absent_confidence_ranks_lowest() {
        let results = [
            structured(None, total(999)),
            text_location(Some(0.1), total(111)),
        ];

        let total = reconcile(&results).unwrap().total_amount.unwrap();
        assert_eq!(total.value, Amount::from_minor(111));
    }

    #[test]
    fn test_order_independent() {
        let date = PurchaseDate {
            date: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
            time: None,
        };
        let mut first = structured(
            Some(0.8),
            ExtractedFields {
                store_name: Some("ACME MART".to_string()),
                total_amount: Some(Amount::from_minor(4200)),
                purchase_date: Some(date),
                line_items: vec![LineItem {
                    name: Some("Bread".to_string()),
                    quantity: Some(1.0),
                    unit_price: Some(Amount::from_minor(350)),
                    total_price: Some(Amount::from_minor(350)),
                }],
                ..Default::default()
            },
        );
        first = first.with_preprocessing("service_default").with_document_type("receipt.retailMeal");
        let second = text_location(
            Some(0.8),
            ExtractedFields {
                store_name: Some("ACME MART BANGSAR".to_string()),
                address: Some("12 Jalan Telawi".to_string()),
                total_amount: Some(Amount::from_minor(4290)),
                ..Default::default()
            },
        )
        .with_preprocessing("enhanced");
        let third = text_location(Some(0.8), store("ACME MARTS")).with_preprocessing("simple");

        let a = reconcile(&[first.clone(), second.clone(), third.clone()]).unwrap();
        let b = reconcile(&[third.clone(), first.clone(), second.clone()]).unwrap();
        let c = reconcile(&[second, third, first]).unwrap();

        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.store_name.as_ref().unwrap().value, "ACME MART BANGSAR");
        assert_eq!(a.preprocessing.get(&ProviderKind::TextLocation).map(String::as_str), Some("enhanced"));
    }

    #[test]
    fn test_idempotent_and_inputs_untouched() {
        let results = vec![
            structured(Some(0.9), store("ACME MART")),
            text_location(Some(0.4), store("ACNE MART")),
        ];
        let snapshot = results.clone();

        let first = reconcile(&results).unwrap();
        let second = reconcile(&results).unwrap();

        assert_eq!(first, second);
        assert_eq!(results, snapshot);
    }

    #[test]
    fn test_overall_confidence_is_maximum() {
        let results = [
            structured(Some(0.95), total(100)),
            text_location(Some(0.2), store("ACME")),
        ];

        let reconciled = reconcile(&results).unwrap();
        assert_eq!(reconciled.ocr_confidence, Some(0.95));
        assert_eq!(reconciled.location_confidence, Some(0.2));
    }

    #[test]
    fn test_single_provider_attribution() {
        let reconciled = reconcile(&[structured(Some(0.9), store("ACME"))]).unwrap();
        assert_eq!(
            reconciled.attribution,
            Some(ProviderAttribution::Single(ProviderKind::StructuredExtraction))
        );
    }

    #[test]
    fn test_priority_rank_unlisted_last() {
        let table = PriorityTable {
            monetary: vec![ProviderKind::StructuredExtraction],
            transactional: vec![],
            location: vec![],
        };

        assert_eq!(table.rank(FieldClass::Monetary, ProviderKind::StructuredExtraction), 0);
        assert_eq!(table.rank(FieldClass::Monetary, ProviderKind::TextLocation), usize::MAX);
    }
}

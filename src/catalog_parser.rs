use log::{debug, warn};

use crate::{
    config::ParseFailurePolicy,
    error::EtlError,
    exchange_rate::CurrencyReference,
    val_curs::{self, Item, Valuta},
};

/// Picks the tracked currencies out of the full catalog, in document order.
pub fn parse_catalog(
    valuta: &Valuta,
    tracked_ids: &[String],
    policy: ParseFailurePolicy,
) -> Result<Vec<CurrencyReference>, EtlError> {
    let mut references: Vec<CurrencyReference> = Vec::new();

    for item in &valuta.items {
        let id = item.id.trim();
        if !tracked_ids.iter().any(|tracked| tracked == id) {
            continue;
        }

        if references.iter().any(|known| known.id == id) {
            warn!("Duplicate catalog item {id}, keeping the first one");
            continue;
        }

        match parse_item(item) {
            Ok(reference) => references.push(reference),
            Err(e) if policy == ParseFailurePolicy::Skip => {
                warn!("Skipping catalog item {id}: {e}");
            }
            Err(e) => return Err(e),
        }
    }

    debug!(
        "Catalog has {} items, {} tracked",
        valuta.items.len(),
        references.len()
    );

    Ok(references)
}

fn parse_item(item: &Item) -> Result<CurrencyReference, EtlError> {
    Ok(CurrencyReference {
        id: item.id.trim().to_string(),
        name: val_curs::text(&item.name).map(str::to_string),
        eng_name: val_curs::text(&item.eng_name).map(str::to_string),
        nominal: val_curs::text(&item.nominal).map(parse_nominal).transpose()?,
        iso_char_code: val_curs::text(&item.iso_char_code).map(str::to_string),
    })
}

fn parse_nominal(s: &str) -> Result<i32, EtlError> {
    let nominal: i32 = s.parse().map_err(|e| EtlError::parse("Nominal", s, e))?;

    if nominal <= 0 {
        return Err(EtlError::parse("Nominal", s, "nominal must be positive"));
    }

    Ok(nominal)
}

//! Field IDs requested when a subscription view is enabled.
//!
//! Look up acronyms in the RDM field dictionary when extending the table.

use thiserror::Error;

use crate::core::batcher::FieldView;

/// An acronym that is not in [`AUD_FIELD_IDS`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown field acronym [{0}]")]
pub struct UnknownField(pub String);

/// A named field in the feed's data dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldId {
    /// Dictionary acronym, e.g. `BID`.
    pub acronym: &'static str,
    /// Numeric field id.
    pub id: u32,
}

const fn field(acronym: &'static str, id: u32) -> FieldId {
    FieldId { acronym, id }
}

/// Fields for listed equities and AUD crosses, in request order.
pub const AUD_FIELD_IDS: &[FieldId] = &[
    field("RDN_EXCHID", 4),
    field("BID", 22),
    field("ASK", 25),
    field("BIDSIZE", 30),
    field("ASKSIZE", 31),
    field("QUOTIM", 1025),
    field("QUOTE_DATE", 3386),
    field("NETCHNG_1", 11),
    field("PCTCHNG", 56),
    field("HST_CLOSE", 21),
    field("CURRENCY", 15),
    field("TRDPRC_1", 6),
    field("TRDTIM_1", 18),
    field("TRD_STATUS", 6614),
    field("BCAST_REF", 728),
    field("PROV_SYMB", 3422),
    field("HIGH_1", 12),
    field("LOW_1", 13),
    field("OPEN_PRC", 19),
    field("ADJUST_CLS", 1465),
    field("OFF_CLOSE", 3372),
    field("ACVOL_1", 32),
    field("VWAP", 3404),
    field("MKT_VALUE", 2150),
    field("YIELD", 35),
    field("YRHIGH", 90),
    field("YRLOW", 91),
    field("INST_PHASE", 8927),
    field("HSTCLSDATE", 79),
    field("CUM_EX_MKR", 117),
    field("PERATIO", 36),
];

/// Field id for `acronym`, matched case-sensitively.
pub fn lookup(acronym: &str) -> Option<u32> {
    AUD_FIELD_IDS
        .iter()
        .find(|f| f.acronym == acronym)
        .map(|f| f.id)
}

/// View over every field in [`AUD_FIELD_IDS`].
pub fn default_view() -> FieldView {
    FieldView::from_field_ids(AUD_FIELD_IDS.iter().map(|f| f.id))
}

/// View over the named fields, in the order given.
///
/// # Errors
/// Fails on the first acronym missing from the table.
pub fn view_from_acronyms<S: AsRef<str>>(acronyms: &[S]) -> Result<FieldView, UnknownField> {
    let ids = acronyms
        .iter()
        .map(|acronym| {
            let acronym = acronym.as_ref().trim();
            lookup(acronym).ok_or_else(|| UnknownField(acronym.to_string()))
        })
        .collect::<Result<Vec<u32>, UnknownField>>()?;
    Ok(FieldView::from_field_ids(ids))
}

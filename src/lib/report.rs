use std::collections::BTreeMap;

use serde::Serialize;

use super::{
    archive::AggregateResult,
    error::{MetaError, Result},
};

/// Multi-dimension report document returned by the stats endpoint. The
/// dimension maps serialize flattened, so the wire shape is
/// `{"species": {...}, "type": {...}}`; the summed query time is carried for
/// callers but stays out of the response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CombinedReport {
    #[serde(flatten)]
    pub dimensions: BTreeMap<String, BTreeMap<String, u64>>,
    #[serde(skip)]
    pub time_ms: u64,
}

/// Folds independently computed dimension results into one report.
///
/// Composition is atomic: if any dimension carries an error the whole call
/// fails naming that dimension, and no partial report is produced. With
/// error-free inputs the output holds exactly the requested dimension keys
/// and the exact integer sum of the input query times.
pub fn combine(dimensions: Vec<(&str, Result<AggregateResult>)>) -> Result<CombinedReport> {
    let mut checked = Vec::with_capacity(dimensions.len());
    for (name, result) in dimensions {
        match result {
            Ok(result) => checked.push((name, result)),
            Err(err) => {
                return Err(MetaError::Composition {
                    dimension: name.to_string(),
                    message: err.to_string(),
                });
            }
        }
    }

    let mut report = CombinedReport::default();
    for (name, result) in checked {
        report.time_ms += result.time_ms;
        let buckets = result
            .rows
            .into_iter()
            .map(|row| (row.label, row.count))
            .collect();
        report.dimensions.insert(name.to_string(), buckets);
    }

    Ok(report)
}

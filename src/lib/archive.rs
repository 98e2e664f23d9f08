use std::time::Instant;

use rusqlite::{params_from_iter, types::Value};
use serde::Serialize;
use tracing::warn;

use super::{
    error::{MetaError, Result},
    store::MetadataStore,
};

/// File types included in the public file count. Index and tabix companions
/// in the file table are not browsable and stay out of the total.
const VARIANT_FILE_TYPES: &[&str] = &["vcf", "vcf_aggregate"];

/// Bucket label substituted for rows whose grouping value is null or empty.
pub const OTHERS_BUCKET: &str = "Others";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupCount {
    pub label: String,
    pub count: u64,
}

/// One grouped aggregate: all buckets of a dimension, sorted by count
/// descending, plus the wall-clock time the query itself took.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateResult {
    pub rows: Vec<GroupCount>,
    pub num_results: usize,
    pub num_total_results: usize,
    pub time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScalarCount {
    pub count: u64,
    pub time_ms: u64,
}

/// Caller-supplied species filter. Values are matched for exact, case
/// sensitive equality against both the common and the scientific name
/// columns; an empty filter leaves the query unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeciesFilter {
    values: Vec<String>,
}

impl SpeciesFilter {
    pub fn new(values: Vec<String>) -> Self {
        Self { values }
    }

    /// Parses the comma-separated `species` query parameter. Empty segments
    /// are discarded, so `species=` and a missing parameter both mean
    /// unfiltered.
    pub fn parse(raw: &str) -> Self {
        let values = raw
            .split(',')
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
            .collect();
        Self { values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// Read-side adaptor over the archive metadata tables. Each operation
/// performs exactly one query against the store and never lets a store
/// failure unwind past this boundary.
pub struct ArchiveAdaptor {
    store: MetadataStore,
}

impl ArchiveAdaptor {
    pub fn new(store: MetadataStore) -> Self {
        Self { store }
    }

    /// Number of registered studies.
    pub fn count_studies(&self) -> Result<ScalarCount> {
        self.count_table("project")
    }

    /// Number of registered species.
    pub fn count_species(&self) -> Result<ScalarCount> {
        self.count_table("taxonomy")
    }

    /// Number of browsable variant files, restricted to
    /// [`VARIANT_FILE_TYPES`].
    pub fn count_files(&self) -> Result<ScalarCount> {
        let mut params = Vec::new();
        let clause = in_clause("file_type", VARIANT_FILE_TYPES.iter().copied(), &mut params);
        let sql = format!("SELECT COUNT(*) FROM file WHERE {clause}");
        self.run_scalar(&sql, params)
    }

    /// Study counts grouped by species common name.
    pub fn count_studies_per_species(&self, filter: &SpeciesFilter) -> Result<AggregateResult> {
        self.count_grouped_by("common_name", filter)
    }

    /// Study counts grouped by experiment type.
    pub fn count_studies_per_type(&self, filter: &SpeciesFilter) -> Result<AggregateResult> {
        self.count_grouped_by("experiment_type", filter)
    }

    fn count_table(&self, table: &str) -> Result<ScalarCount> {
        let sql = format!("SELECT COUNT(*) FROM {table}");
        self.run_scalar(&sql, Vec::new())
    }

    fn run_scalar(&self, sql: &str, params: Vec<Value>) -> Result<ScalarCount> {
        let conn = self.store.connect()?;
        let mut stmt = conn.prepare(sql).map_err(query_error)?;

        let start = Instant::now();
        let count = stmt
            .query_row(params_from_iter(params), |row| row.get::<_, u64>(0))
            .map_err(query_error)?;
        let time_ms = elapsed_ms(start);

        Ok(ScalarCount { count, time_ms })
    }

    /// Builds and runs one group-by query over the study browser. The
    /// dimension column is a compile-time constant supplied by the public
    /// wrappers; filter values only ever travel through bound parameters.
    fn count_grouped_by(&self, dimension: &str, filter: &SpeciesFilter) -> Result<AggregateResult> {
        let mut params = Vec::new();
        let mut sql = format!("SELECT {dimension}, COUNT(*) AS c FROM study_browser");
        if !filter.is_empty() {
            let common = in_clause(
                "common_name",
                filter.values().iter().map(String::as_str),
                &mut params,
            );
            let scientific = in_clause(
                "scientific_name",
                filter.values().iter().map(String::as_str),
                &mut params,
            );
            sql.push_str(&format!(" WHERE ({common} OR {scientific})"));
        }
        sql.push_str(&format!(" GROUP BY {dimension} ORDER BY c DESC"));

        let conn = self.store.connect()?;
        let mut stmt = conn.prepare(&sql).map_err(query_error)?;

        let start = Instant::now();
        let mut raw = stmt.query(params_from_iter(params)).map_err(query_error)?;
        let mut rows: Vec<GroupCount> = Vec::new();
        let mut others: Option<usize> = None;
        while let Some(row) = raw.next().map_err(query_error)? {
            let label: Option<String> = row.get(0).map_err(query_error)?;
            let count: u64 = row.get(1).map_err(query_error)?;
            let label = match label.filter(|label| !label.is_empty()) {
                Some(label) => label,
                None => OTHERS_BUCKET.to_string(),
            };
            // NULL and '' group separately in SQL; fold both into one bucket.
            if label == OTHERS_BUCKET {
                match others {
                    Some(idx) => {
                        rows[idx].count += count;
                        continue;
                    }
                    None => others = Some(rows.len()),
                }
            }
            rows.push(GroupCount { label, count });
        }
        let time_ms = elapsed_ms(start);

        // The merge can grow the bucket past its sorted position; the sort is
        // stable, so tie order stays as the database produced it.
        rows.sort_by(|a, b| b.count.cmp(&a.count));

        let num_results = rows.len();
        Ok(AggregateResult {
            rows,
            num_results,
            num_total_results: num_results,
            time_ms,
        })
    }
}

/// Emits `column IN (?N, ...)` and pushes the matching values onto `params`.
/// Caller values never reach the SQL text itself.
fn in_clause<'a>(
    column: &str,
    values: impl Iterator<Item = &'a str>,
    params: &mut Vec<Value>,
) -> String {
    let mut placeholders = Vec::new();
    for value in values {
        params.push(Value::from(value.to_string()));
        placeholders.push(format!("?{}", params.len()));
    }
    format!("{} IN ({})", column, placeholders.join(", "))
}

fn query_error(err: rusqlite::Error) -> MetaError {
    warn!("metadata query failed: {err}");
    MetaError::Query(err.to_string())
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    use rusqlite::Connection;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, ArchiveAdaptor) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evapro.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE project (project_accession TEXT PRIMARY KEY, title TEXT);
             CREATE TABLE taxonomy (taxonomy_id INTEGER PRIMARY KEY, common_name TEXT);
             CREATE TABLE file (file_id INTEGER PRIMARY KEY, filename TEXT, file_type TEXT);
             CREATE TABLE study_browser (
                 project_accession TEXT,
                 common_name TEXT,
                 scientific_name TEXT,
                 experiment_type TEXT
             );

             INSERT INTO project VALUES ('PRJEB0001', 'Human WGS panel');
             INSERT INTO project VALUES ('PRJEB0002', 'Human exomes');
             INSERT INTO project VALUES ('PRJEB0003', 'Mouse strains');
             INSERT INTO project VALUES ('PRJEB0004', 'Unassigned submission');

             INSERT INTO taxonomy VALUES (9606, 'Human');
             INSERT INTO taxonomy VALUES (10090, 'Mouse');
             INSERT INTO taxonomy VALUES (9031, 'Chicken');

             INSERT INTO file VALUES (1, 'a.vcf.gz', 'vcf');
             INSERT INTO file VALUES (2, 'b.vcf.gz', 'vcf');
             INSERT INTO file VALUES (3, 'c.vcf.gz', 'vcf_aggregate');
             INSERT INTO file VALUES (4, 'a.vcf.gz.tbi', 'tabix');
             INSERT INTO file VALUES (5, 'readme.txt', 'text');

             INSERT INTO study_browser VALUES ('PRJEB0001', 'Human', 'Homo sapiens', 'Whole Genome Sequencing');
             INSERT INTO study_browser VALUES ('PRJEB0002', 'Human', 'Homo sapiens', 'Exome Sequencing');
             INSERT INTO study_browser VALUES ('PRJEB0003', 'Mouse', 'Mus musculus', 'Whole Genome Sequencing');
             INSERT INTO study_browser VALUES ('PRJEB0004', NULL, NULL, 'RNA-Seq');
             INSERT INTO study_browser VALUES ('PRJEB0005', '', '', 'RNA-Seq');",
        )
        .unwrap();

        let adaptor = ArchiveAdaptor::new(MetadataStore::new(&path));
        (dir, adaptor)
    }

    fn bucket(result: &AggregateResult, label: &str) -> Option<u64> {
        result
            .rows
            .iter()
            .find(|row| row.label == label)
            .map(|row| row.count)
    }

    #[test]
    fn counts_every_study_and_species() {
        let (_dir, adaptor) = fixture();

        let studies = adaptor.count_studies().unwrap();
        assert_eq!(studies.count, 4);

        let species = adaptor.count_species().unwrap();
        assert_eq!(species.count, 3);
    }

    #[test]
    fn total_counts_are_idempotent() {
        let (_dir, adaptor) = fixture();

        let first = adaptor.count_species().unwrap();
        let second = adaptor.count_species().unwrap();
        assert_eq!(first.count, second.count);
    }

    #[test]
    fn file_count_only_includes_variant_file_types() {
        let (_dir, adaptor) = fixture();

        let files = adaptor.count_files().unwrap();
        assert_eq!(files.count, 3);
    }

    #[test]
    fn null_and_empty_labels_merge_into_one_others_bucket() {
        let (_dir, adaptor) = fixture();

        let result = adaptor
            .count_studies_per_species(&SpeciesFilter::default())
            .unwrap();

        let others: Vec<_> = result
            .rows
            .iter()
            .filter(|row| row.label == OTHERS_BUCKET)
            .collect();
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].count, 2);
        assert_eq!(bucket(&result, "Human"), Some(2));
        assert_eq!(bucket(&result, "Mouse"), Some(1));
        assert_eq!(result.num_results, 3);
        assert_eq!(result.num_total_results, 3);
    }

    #[test]
    fn grouped_rows_are_sorted_by_count_descending() {
        let (_dir, adaptor) = fixture();

        let result = adaptor
            .count_studies_per_type(&SpeciesFilter::default())
            .unwrap();

        let counts: Vec<u64> = result.rows.iter().map(|row| row.count).collect();
        let mut sorted = counts.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(counts, sorted);
        assert_eq!(bucket(&result, "Whole Genome Sequencing"), Some(2));
        assert_eq!(bucket(&result, "RNA-Seq"), Some(2));
        assert_eq!(bucket(&result, "Exome Sequencing"), Some(1));
    }

    #[test]
    fn filter_matches_common_and_scientific_names() {
        let (_dir, adaptor) = fixture();

        let by_common = adaptor
            .count_studies_per_species(&SpeciesFilter::new(vec!["Human".into()]))
            .unwrap();
        assert_eq!(by_common.rows.len(), 1);
        assert_eq!(bucket(&by_common, "Human"), Some(2));

        let by_scientific = adaptor
            .count_studies_per_species(&SpeciesFilter::new(vec!["Mus musculus".into()]))
            .unwrap();
        assert_eq!(by_scientific.rows.len(), 1);
        assert_eq!(bucket(&by_scientific, "Mouse"), Some(1));
    }

    #[test]
    fn filtered_totals_never_exceed_the_unfiltered_total() {
        let (_dir, adaptor) = fixture();

        let unfiltered: u64 = adaptor
            .count_studies_per_species(&SpeciesFilter::default())
            .unwrap()
            .rows
            .iter()
            .map(|row| row.count)
            .sum();

        for filter in [
            SpeciesFilter::new(vec!["Human".into()]),
            SpeciesFilter::new(vec!["Human".into(), "Mouse".into()]),
            SpeciesFilter::new(vec!["Chicken".into()]),
        ] {
            let filtered: u64 = adaptor
                .count_studies_per_species(&filter)
                .unwrap()
                .rows
                .iter()
                .map(|row| row.count)
                .sum();
            assert!(filtered <= unfiltered);
        }
    }

    #[test]
    fn hostile_filter_values_are_bound_not_interpolated() {
        let (_dir, adaptor) = fixture();

        let filter = SpeciesFilter::new(vec!["Human') OR ('1'='1".into()]);
        let result = adaptor.count_studies_per_species(&filter).unwrap();
        assert!(result.rows.is_empty());

        let filter = SpeciesFilter::new(vec!["x\"; DROP TABLE study_browser; --".into()]);
        let result = adaptor.count_studies_per_type(&filter).unwrap();
        assert!(result.rows.is_empty());
    }

    #[test]
    fn species_filter_parsing_drops_empty_segments() {
        let filter = SpeciesFilter::parse("Human,,Mouse");
        assert_eq!(filter.values(), ["Human", "Mouse"]);

        assert!(SpeciesFilter::parse("").is_empty());
    }

    #[test]
    fn missing_store_surfaces_as_connectivity_error() {
        let adaptor = ArchiveAdaptor::new(MetadataStore::new("/nonexistent/evapro.db"));
        let err = adaptor.count_studies().unwrap_err();
        assert!(matches!(err, MetaError::StoreConnectivity(_)));
    }

    #[test]
    fn missing_table_surfaces_as_query_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.db");
        Connection::open(&path).unwrap();

        let adaptor = ArchiveAdaptor::new(MetadataStore::new(&path));
        let err = adaptor.count_studies().unwrap_err();
        assert!(matches!(err, MetaError::Query(_)));
    }

    #[test]
    fn in_clause_emits_one_placeholder_per_value() {
        let mut params = Vec::new();
        let clause = in_clause("common_name", ["Human", "Mouse"].into_iter(), &mut params);
        assert_eq!(clause, "common_name IN (?1, ?2)");
        assert_eq!(params.len(), 2);

        let clause = in_clause("scientific_name", ["Homo sapiens"].into_iter(), &mut params);
        assert_eq!(clause, "scientific_name IN (?3)");
        assert_eq!(params.len(), 3);
    }
}

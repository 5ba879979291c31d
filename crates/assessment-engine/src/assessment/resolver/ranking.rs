use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::assessment::domain::{AccessLevel, EntityRef, IndicatorSubject, PublicationSeriesId};
use crate::assessment::indicators::{IndicatorError, IndicatorStore};

/// Indicator holding a journal's textual `rank/total` position within a category.
pub const JIF_RANK_INDICATOR: &str = "jifRank";

/// Position of a journal in one subject category of one ranking edition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRanking {
    pub series_id: PublicationSeriesId,
    pub year: i32,
    pub edition: String,
    pub category: String,
    pub rank: u32,
    pub total: u32,
    #[serde(default)]
    pub impact_factor: Option<f64>,
}

impl JournalRanking {
    /// Rank as a share of the category size; the best journal scores close to zero.
    pub fn percentile(&self) -> f64 {
        f64::from(self.rank) / f64::from(self.total)
    }

    /// Rank must be a position inside a non-empty category.
    pub fn check_position(&self) -> Result<(), RankingError> {
        if self.total == 0 || self.rank == 0 || self.rank > self.total {
            return Err(RankingError::InvalidPosition {
                series: self.series_id,
                rank: self.rank,
                total: self.total,
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RankingError {
    #[error("failed to read ranking table: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed ranking CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("journal {series} ranked {rank} out of {total} is not a valid position")]
    InvalidPosition {
        series: PublicationSeriesId,
        rank: u32,
        total: u32,
    },
    #[error("ranking row {line}: {reason}")]
    InvalidRow { line: usize, reason: String },
    #[error(transparent)]
    Indicators(#[from] IndicatorError),
}

/// Source of journal rankings for a series and year.
pub trait RankingTableProvider: Send + Sync {
    fn rankings(
        &self,
        series: PublicationSeriesId,
        year: i32,
    ) -> Result<Vec<JournalRanking>, RankingError>;
}

/// Rankings held in memory, typically imported from a CSV export.
#[derive(Debug, Clone, Default)]
pub struct RankingTable {
    entries: BTreeMap<(PublicationSeriesId, i32), Vec<JournalRanking>>,
}

#[derive(Debug, Deserialize)]
struct RankingRow {
    series_id: u64,
    year: i32,
    edition: String,
    category: String,
    rank: u32,
    total: u32,
    impact_factor: Option<f64>,
}

impl RankingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ranking: JournalRanking) -> Result<(), RankingError> {
        ranking.check_position()?;
        self.entries
            .entry((ranking.series_id, ranking.year))
            .or_default()
            .push(ranking);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reads `series_id,year,edition,category,rank,total,impact_factor` rows.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, RankingError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut table = Self::new();

        for (index, row) in csv_reader.deserialize::<RankingRow>().enumerate() {
            let row = row?;
            // Header is line 1.
            let line = index + 2;
            if row.total == 0 || row.rank == 0 || row.rank > row.total {
                return Err(RankingError::InvalidRow {
                    line,
                    reason: format!(
                        "rank {} out of {} is not a valid position",
                        row.rank, row.total
                    ),
                });
            }
            if row.edition.is_empty() || row.category.is_empty() {
                return Err(RankingError::InvalidRow {
                    line,
                    reason: "edition and category are required".to_string(),
                });
            }
            table.insert(JournalRanking {
                series_id: PublicationSeriesId(row.series_id),
                year: row.year,
                edition: row.edition,
                category: row.category,
                rank: row.rank,
                total: row.total,
                impact_factor: row.impact_factor,
            })?;
        }

        Ok(table)
    }

    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self, RankingError> {
        let file = File::open(path)?;
        Self::from_csv_reader(file)
    }
}

impl RankingTableProvider for RankingTable {
    fn rankings(
        &self,
        series: PublicationSeriesId,
        year: i32,
    ) -> Result<Vec<JournalRanking>, RankingError> {
        Ok(self.entries.get(&(series, year)).cloned().unwrap_or_default())
    }
}

/// Rankings derived from `jifRank` indicator values stored for a series.
#[derive(Clone)]
pub struct IndicatorRankings {
    indicators: IndicatorStore,
}

impl IndicatorRankings {
    pub fn new(indicators: IndicatorStore) -> Self {
        Self { indicators }
    }
}

impl RankingTableProvider for IndicatorRankings {
    fn rankings(
        &self,
        series: PublicationSeriesId,
        year: i32,
    ) -> Result<Vec<JournalRanking>, RankingError> {
        let values = self.indicators.find_indicators_for_subject_and_access_level(
            EntityRef::PublicationSeries(series),
            AccessLevel::AdminOnly,
        )?;

        let rankings = values
            .into_iter()
            .filter(|value| value.indicator_code == JIF_RANK_INDICATOR && value.valid_in_year(year))
            .filter_map(|value| {
                let (rank, total) = value.value.as_text().and_then(parse_rank)?;
                let IndicatorSubject::PublicationSeries {
                    edition,
                    category_identifier,
                    ..
                } = value.subject
                else {
                    return None;
                };
                Some(JournalRanking {
                    series_id: series,
                    year,
                    edition: edition?,
                    category: category_identifier.unwrap_or_default(),
                    rank,
                    total,
                    impact_factor: None,
                })
            })
            .collect();
        Ok(rankings)
    }
}

/// Parses `"12/180"` into `(12, 180)`; anything else is ignored.
pub(crate) fn parse_rank(raw: &str) -> Option<(u32, u32)> {
    let (rank, total) = raw.split_once('/')?;
    let rank: u32 = rank.trim().parse().ok()?;
    let total: u32 = total.trim().parse().ok()?;
    (rank >= 1 && rank <= total).then_some((rank, total))
}

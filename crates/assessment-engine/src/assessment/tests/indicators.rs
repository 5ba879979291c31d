use std::sync::Arc;

use chrono::NaiveDate;

use super::common::*;

use crate::assessment::domain::{
    AccessLevel, EntityKind, EntityRef, Indicator, IndicatorSource, IndicatorSubject,
    IndicatorValue, MultiLingualText,
};
use crate::assessment::indicators::{IndicatorDraft, IndicatorError};
use crate::assessment::resolver::{
    ClassificationResolver, IndicatorRankings, RankingTableProvider, JIF_RANK_INDICATOR,
};
use crate::assessment::rules::RuleRegistry;

fn define(fixture: &Fixture, code: &str, kinds: &[EntityKind], access_level: AccessLevel) {
    fixture
        .service
        .indicators()
        .define_indicator(Indicator {
            code: code.to_string(),
            title: MultiLingualText::bilingual(code, code),
            applicable_types: kinds.iter().copied().collect(),
            access_level,
        })
        .expect("indicator defined");
}

fn series_subject(edition: Option<&str>, category: Option<&str>) -> IndicatorSubject {
    IndicatorSubject::PublicationSeries {
        series_id: GOOD_JOURNAL,
        edition: edition.map(str::to_string),
        category_identifier: category.map(str::to_string),
    }
}

fn draft(code: &str, value: IndicatorValue, source: IndicatorSource) -> IndicatorDraft {
    IndicatorDraft {
        indicator_code: code.to_string(),
        subject: series_subject(None, None),
        value,
        from_date: None,
        to_date: None,
        source,
        proofs: Vec::new(),
    }
}

fn codes(values: &[crate::assessment::domain::EntityIndicator]) -> Vec<&str> {
    let mut codes: Vec<&str> = values
        .iter()
        .map(|value| value.indicator_code.as_str())
        .collect();
    codes.sort_unstable();
    codes
}

#[test]
fn reads_are_filtered_by_clearance() {
    let fixture = build_fixture();
    let journal = [EntityKind::PublicationSeries];
    define(&fixture, "fiveYearJIF", &journal, AccessLevel::Open);
    define(&fixture, "citations", &journal, AccessLevel::Closed);
    define(&fixture, "internalScore", &journal, AccessLevel::AdminOnly);
    for code in ["fiveYearJIF", "citations", "internalScore"] {
        fixture
            .service
            .upsert_indicator(draft(code, IndicatorValue::Numeric(1.5), IndicatorSource::Manual))
            .expect("stored");
    }

    let entity = EntityRef::PublicationSeries(GOOD_JOURNAL);
    let read = |clearance| {
        fixture
            .service
            .indicators_for(entity, clearance)
            .expect("readable")
    };
    assert_eq!(codes(&read(AccessLevel::Open)), vec!["fiveYearJIF"]);
    assert_eq!(codes(&read(AccessLevel::Closed)), vec!["citations", "fiveYearJIF"]);
    assert_eq!(
        codes(&read(AccessLevel::AdminOnly)),
        vec!["citations", "fiveYearJIF", "internalScore"]
    );
}

#[test]
fn upsert_replaces_per_source() {
    let fixture = build_fixture();
    define(
        &fixture,
        "fiveYearJIF",
        &[EntityKind::PublicationSeries],
        AccessLevel::Open,
    );
    let store = fixture.service.indicators();

    let first = store
        .upsert(draft("fiveYearJIF", IndicatorValue::Numeric(2.1), IndicatorSource::WebOfScience))
        .expect("stored");
    let updated = store
        .upsert(draft("fiveYearJIF", IndicatorValue::Numeric(2.4), IndicatorSource::WebOfScience))
        .expect("replaced");
    let other_source = store
        .upsert(draft("fiveYearJIF", IndicatorValue::Numeric(1.9), IndicatorSource::Scimago))
        .expect("separate value");

    assert_eq!(updated.id, first.id);
    assert_eq!(updated.value.as_numeric(), Some(2.4));
    assert_ne!(other_source.id, first.id);

    let values = store
        .find_indicators_for_subject_and_access_level(
            EntityRef::PublicationSeries(GOOD_JOURNAL),
            AccessLevel::Open,
        )
        .expect("readable");
    assert_eq!(values.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_upserts_keep_one_value_per_key() {
    let fixture = build_fixture();
    define(
        &fixture,
        "fiveYearJIF",
        &[EntityKind::PublicationSeries],
        AccessLevel::Open,
    );

    let writers: Vec<_> = (0..8)
        .map(|attempt| {
            let service = Arc::clone(&fixture.service);
            tokio::spawn(async move {
                service.upsert_indicator(draft(
                    "fiveYearJIF",
                    IndicatorValue::Numeric(2.0 + f64::from(attempt)),
                    IndicatorSource::WebOfScience,
                ))
            })
        })
        .collect();
    let mut ids = Vec::new();
    for writer in writers {
        let stored = writer.await.expect("writer joins").expect("stored");
        ids.push(stored.id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let values = fixture
        .service
        .indicators_for(EntityRef::PublicationSeries(GOOD_JOURNAL), AccessLevel::Open)
        .expect("readable");
    assert_eq!(values.len(), 1);
}

#[test]
fn upsert_validates_the_definition() {
    let fixture = build_fixture();
    define(&fixture, "citations", &[EntityKind::Document], AccessLevel::Open);
    let store = fixture.service.indicators();

    assert!(matches!(
        store.upsert(draft("unknown", IndicatorValue::Boolean(true), IndicatorSource::Manual)),
        Err(IndicatorError::UnknownIndicator(_))
    ));
    assert!(matches!(
        store.upsert(draft("citations", IndicatorValue::Numeric(3.0), IndicatorSource::Manual)),
        Err(IndicatorError::NotApplicable {
            kind: "publication_series",
            ..
        })
    ));

    define(
        &fixture,
        "fiveYearJIF",
        &[EntityKind::PublicationSeries],
        AccessLevel::Open,
    );
    let inverted = IndicatorDraft {
        from_date: NaiveDate::from_ymd_opt(2024, 1, 1),
        to_date: NaiveDate::from_ymd_opt(2023, 12, 31),
        ..draft("fiveYearJIF", IndicatorValue::Numeric(1.0), IndicatorSource::Manual)
    };
    assert!(matches!(store.upsert(inverted), Err(IndicatorError::InvalidWindow)));
}

#[test]
fn definitions_in_use_cannot_be_deleted() {
    let fixture = build_fixture();
    define(
        &fixture,
        "fiveYearJIF",
        &[EntityKind::PublicationSeries],
        AccessLevel::Open,
    );
    let store = fixture.service.indicators();
    assert!(matches!(
        store.define_indicator(Indicator {
            code: "fiveYearJIF".to_string(),
            title: MultiLingualText::new(),
            applicable_types: Default::default(),
            access_level: AccessLevel::Open,
        }),
        Err(IndicatorError::DuplicateCode(_))
    ));

    let value = store
        .upsert(draft("fiveYearJIF", IndicatorValue::Numeric(2.0), IndicatorSource::Manual))
        .expect("stored");
    assert!(matches!(
        store.delete_indicator("fiveYearJIF"),
        Err(IndicatorError::InUse { references: 1, .. })
    ));

    store.delete_indicator_value(value.id).expect("value deleted");
    assert!(matches!(
        store.delete_indicator_value(value.id),
        Err(IndicatorError::NotFound(_))
    ));
    store.delete_indicator("fiveYearJIF").expect("definition deleted");
    assert!(matches!(
        store.indicator("fiveYearJIF"),
        Err(IndicatorError::UnknownIndicator(_))
    ));
}

#[test]
fn jif_rank_values_feed_the_resolver() {
    let fixture = build_fixture();
    define(
        &fixture,
        JIF_RANK_INDICATOR,
        &[EntityKind::PublicationSeries],
        AccessLevel::AdminOnly,
    );
    let store = fixture.service.indicators();
    store
        .upsert(IndicatorDraft {
            subject: series_subject(Some("SCIE"), Some("Optics")),
            from_date: NaiveDate::from_ymd_opt(2021, 1, 1),
            to_date: NaiveDate::from_ymd_opt(2021, 12, 31),
            ..draft(
                JIF_RANK_INDICATOR,
                IndicatorValue::Textual("4/80".to_string()),
                IndicatorSource::WebOfScience,
            )
        })
        .expect("rank stored");
    // No edition: cannot be matched against a tier.
    store
        .upsert(draft(
            JIF_RANK_INDICATOR,
            IndicatorValue::Textual("1/80".to_string()),
            IndicatorSource::Manual,
        ))
        .expect("rank stored");

    let provider = IndicatorRankings::new(store.clone());
    let rankings = provider.rankings(GOOD_JOURNAL, 2021).expect("rankings");
    assert_eq!(rankings.len(), 1);
    assert_eq!((rankings[0].rank, rankings[0].total), (4, 80));
    assert!(provider.rankings(GOOD_JOURNAL, 2020).expect("rankings").is_empty());

    let resolver = ClassificationResolver::new(
        Arc::new(RuleRegistry::standard()),
        Arc::new(provider),
        fixture.service.classifications().clone(),
        fixture.service.catalog().clone(),
    );
    let resolution = resolver
        .resolve_publication_series(GOOD_JOURNAL, &fixture.commission, 2022)
        .expect("resolves")
        .expect("ranked through lookback");
    assert_eq!(resolution.classification.code, "M21a");
}

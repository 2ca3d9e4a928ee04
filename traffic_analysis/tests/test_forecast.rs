use chrono::{Duration, NaiveDate};
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;
use traffic_analysis::{
    ArimaOrder, Deadline, ForecastEngine, ForecastMode, ForecastOutcome, ForecastPaths,
    OrderSelector,
};
use wiki_traffic::{PageKey, TrafficTable};

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn table(columns: Vec<(PageKey, Vec<Option<f64>>)>) -> TrafficTable {
    let n = columns.first().map_or(0, |(_, v)| v.len());
    let dates = (0..n).map(|i| start() + Duration::days(i as i64)).collect();
    TrafficTable::from_columns(dates, columns.into_iter().collect::<BTreeMap<_, _>>()).unwrap()
}

/// AR(1) traffic around 500 daily views
fn traffic(n: usize, seed: u64) -> Vec<Option<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut level = 0.0;
    (0..n)
        .map(|_| {
            level = 0.6 * level + rng.gen_range(-20.0..20.0);
            Some(500.0 + level)
        })
        .collect()
}

/// Always answers with one order and counts how often it was asked
#[derive(Clone)]
struct CountingSelector {
    order: Option<ArimaOrder>,
    calls: Arc<AtomicUsize>,
}

impl CountingSelector {
    fn new(order: Option<ArimaOrder>) -> Self {
        Self {
            order,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OrderSelector for CountingSelector {
    fn best_order(&self, _series: &[f64]) -> Option<ArimaOrder> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.order
    }
}

fn engine(dir: &Path, selector: CountingSelector) -> ForecastEngine<CountingSelector> {
    ForecastEngine::with_selector(
        selector,
        ForecastPaths::standard(dir.join("static"), dir.join("files")),
    )
}

#[test]
fn test_plain_forecast_rows_and_bounds() {
    let dir = tempdir().unwrap();
    let selector = CountingSelector::new(Some(ArimaOrder::new(1, 0, 0)));
    let engine = engine(dir.path(), selector.clone());
    let data = table(vec![(PageKey::new("en", "Earthquake"), traffic(100, 1))]);

    let groups = engine.forecast(&data, 7, &Deadline::none()).unwrap();

    let result = &groups["Earthquake"][0];
    assert_eq!(result.order, Some(ArimaOrder::new(1, 0, 0)));
    assert_eq!(result.rows.len(), 7);
    assert_eq!(result.rows[0].date, start() + Duration::days(100));
    for row in &result.rows {
        assert!(row.lower <= row.mean && row.mean <= row.upper);
    }
    assert_eq!(selector.calls(), 1);
    assert!(dir.path().join("static/arima_figures/arima_en_Earthquake.svg").is_file());

    let csv = fs::read_to_string(dir.path().join("files/arima_results.csv")).unwrap();
    assert!(csv.starts_with("Column,Date,Mean,Mean_CI_Lower,Mean_CI_Upper"));
    assert_eq!(csv.lines().count(), 8);
}

#[test]
fn test_cached_forecast_skips_order_search() {
    let dir = tempdir().unwrap();
    let selector = CountingSelector::new(Some(ArimaOrder::new(1, 0, 0)));
    let engine = engine(dir.path(), selector.clone());
    let data = table(vec![(PageKey::new("en", "Earthquake"), traffic(60, 2))]);

    // Seed the CSV and the figure by hand
    fs::create_dir_all(dir.path().join("files")).unwrap();
    fs::create_dir_all(dir.path().join("static/arima_figures")).unwrap();
    fs::write(
        dir.path().join("files/arima_results.csv"),
        "Column,Date,Mean,Mean_CI_Lower,Mean_CI_Upper\n\
         en_Earthquake,2024-03-01,510.5,480.0,541.0\n\
         en_Earthquake,2024-03-02,505.25,470.0,540.5\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("static/arima_figures/arima_en_Earthquake.svg"),
        "<svg/>",
    )
    .unwrap();

    let groups = engine.forecast(&data, 2, &Deadline::none()).unwrap();

    assert_eq!(selector.calls(), 0);
    let result = &groups["Earthquake"][0];
    assert_eq!(result.order, None);
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[1].mean, 505.25);
}

#[test]
fn test_second_plain_run_does_not_refit() {
    let dir = tempdir().unwrap();
    let selector = CountingSelector::new(Some(ArimaOrder::new(1, 0, 0)));
    let engine = engine(dir.path(), selector.clone());
    let data = table(vec![
        (PageKey::new("en", "Earthquake"), traffic(80, 3)),
        (PageKey::new("fr", "Earthquake"), traffic(80, 4)),
    ]);

    let first = engine.forecast(&data, 5, &Deadline::none()).unwrap();
    assert_eq!(selector.calls(), 2);
    let second = engine.forecast(&data, 5, &Deadline::none()).unwrap();
    assert_eq!(selector.calls(), 2);

    assert_eq!(first["Earthquake"][0].rows, second["Earthquake"][0].rows);

    // A different horizon no longer matches the cached rows
    engine.forecast(&data, 3, &Deadline::none()).unwrap();
    assert_eq!(selector.calls(), 4);
}

#[test]
fn test_column_without_order_is_skipped() {
    let dir = tempdir().unwrap();
    let engine = engine(dir.path(), CountingSelector::new(None));
    let data = table(vec![(PageKey::new("en", "Earthquake"), traffic(60, 5))]);

    let groups = engine.forecast(&data, 7, &Deadline::none()).unwrap();

    assert!(groups.is_empty());
}

#[test]
fn test_rolling_length_matches_test_split() {
    let dir = tempdir().unwrap();
    let selector = CountingSelector::new(Some(ArimaOrder::new(1, 0, 0)));
    let engine = engine(dir.path(), selector.clone());
    let mut values = vec![None; 10];
    values.extend(traffic(100, 6));
    let data = table(vec![(PageKey::new("en", "Earthquake"), values)]);

    let groups = engine.rolling(&data, 0.7, &Deadline::none()).unwrap();

    let result = &groups["Earthquake"][0];
    assert_eq!(result.steps.len(), 30);
    assert_eq!(result.steps[0].date, start() + Duration::days(80));
    let mean_error = result.steps.iter().map(|s| s.error).sum::<f64>() / 30.0;
    assert!((result.steps[29].mae - mean_error).abs() < 1e-9);
    for step in &result.steps {
        assert!((step.error - (step.actual - step.forecast).abs()).abs() < 1e-12);
    }
    assert!(result.rmse > 0.0);
    // The synthetic traffic never drops to zero
    assert!(result.mape.unwrap() > 0.0);
    assert!(dir
        .path()
        .join("static/arima_rolling_figures/arima_rolling_en_Earthquake.svg")
        .is_file());

    let csv = fs::read_to_string(dir.path().join("files/arima_rolling_results.csv")).unwrap();
    assert!(csv.starts_with("Subject,Date,Forecast,Actual,Error,MAE"));
    assert!(csv.lines().nth(1).unwrap().starts_with("en_Earthquake,"));
}

#[test]
fn test_second_rolling_run_uses_cache() {
    let dir = tempdir().unwrap();
    let selector = CountingSelector::new(Some(ArimaOrder::new(1, 0, 0)));
    let engine = engine(dir.path(), selector.clone());
    let data = table(vec![(PageKey::new("en", "Earthquake"), traffic(90, 7))]);

    let first = engine
        .run(&data, ForecastMode::Rolling { train_ratio: 0.7 }, &Deadline::none())
        .unwrap();
    let second = engine
        .run(&data, ForecastMode::Rolling { train_ratio: 0.7 }, &Deadline::none())
        .unwrap();

    assert_eq!(selector.calls(), 1);
    match (first, second) {
        (ForecastOutcome::Rolling(a), ForecastOutcome::Rolling(b)) => {
            assert_eq!(a["Earthquake"][0].steps, b["Earthquake"][0].steps);
            assert!((a["Earthquake"][0].rmse - b["Earthquake"][0].rmse).abs() < 1e-9);
            assert_eq!(a["Earthquake"][0].mape.is_some(), b["Earthquake"][0].mape.is_some());
            assert_eq!(b["Earthquake"][0].order, None);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[test]
fn test_grid_search_forecast_end_to_end() {
    let dir = tempdir().unwrap();
    let engine = ForecastEngine::new(ForecastPaths::standard(
        dir.path().join("static"),
        dir.path().join("files"),
    ));
    let data = table(vec![(PageKey::new("en", "Earthquake"), traffic(120, 8))]);

    let outcome = engine
        .run(&data, ForecastMode::Plain { steps: 7 }, &Deadline::none())
        .unwrap();

    match outcome {
        ForecastOutcome::Plain(groups) => {
            let result = &groups["Earthquake"][0];
            assert!(result.order.is_some());
            assert_eq!(result.rows.len(), 7);
            assert!(result.rows.iter().all(|r| r.mean.is_finite()));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[test]
fn test_invalid_parameters_are_rejected() {
    let dir = tempdir().unwrap();
    let engine = engine(dir.path(), CountingSelector::new(None));
    let data = table(vec![(PageKey::new("en", "Earthquake"), traffic(30, 9))]);

    assert!(engine.forecast(&data, 0, &Deadline::none()).is_err());
    assert!(engine.rolling(&data, 1.0, &Deadline::none()).is_err());
}

//! Planner behaviour when collaborators are slow, down or cancelled.
//!
//! Offers and rules are critical: their failure fails the request with a
//! retryable error. Preferences and delivery quotes are non-critical: the
//! planner proceeds on defaults and flags the degradation in the response.

use std::time::Duration;

use testresult::TestResult;
use tokio::sync::watch;

use hamper::{
    PlanError, PlanWarning, Planner, PlannerConfig,
    fixtures::{Scenario, StaticSources},
};

fn config_for(scenario: &Scenario) -> PlannerConfig {
    PlannerConfig {
        currency: scenario.currency.iso_alpha_code.to_owned(),
        critical_timeout_ms: 50,
        noncritical_timeout_ms: 50,
        ..PlannerConfig::default()
    }
}

fn sources_for(scenario: &Scenario, config: &PlannerConfig) -> StaticSources {
    scenario.sources(config.distance_cache_ttl_secs)
}

#[tokio::test]
async fn an_unreachable_offer_source_fails_the_request() -> TestResult {
    let scenario = Scenario::from_set("two_vendor_split")?;
    let config = config_for(&scenario);
    let sources = sources_for(&scenario, &config).with_offers_unavailable();

    let err = Planner::new(sources, config).plan(&scenario.request).await;

    assert!(
        matches!(err, Err(PlanError::DataUnavailable { source: "offers", .. })),
        "expected critical offers failure, got {err:?}",
    );

    Ok(())
}

#[tokio::test]
async fn a_slow_offer_source_times_out() -> TestResult {
    let scenario = Scenario::from_set("two_vendor_split")?;
    let config = config_for(&scenario);
    let sources = sources_for(&scenario, &config).with_offer_delay(Duration::from_millis(200));

    let err = Planner::new(sources, config).plan(&scenario.request).await;

    assert!(
        matches!(err, Err(PlanError::DataUnavailable { source: "offers", .. })),
        "expected offers timeout, got {err:?}",
    );

    Ok(())
}

#[tokio::test]
async fn a_missing_profile_degrades_to_defaults() -> TestResult {
    let scenario = Scenario::from_set("two_vendor_split")?;
    let config = config_for(&scenario);
    let sources = sources_for(&scenario, &config).with_profile_unavailable();

    let plan = Planner::new(sources, config)
        .plan_detailed(&scenario.request)
        .await?;

    assert_eq!(plan.total_cost.to_minor_units(), 200);
    assert!(
        plan.warnings
            .iter()
            .any(|w| matches!(w, PlanWarning::PartialData { source: "preferences" })),
        "missing preferences degradation warning: {:?}",
        plan.warnings,
    );

    Ok(())
}

#[tokio::test]
async fn slow_delivery_quotes_fall_back_to_flat_fees() -> TestResult {
    let scenario = Scenario::from_set("two_vendor_split")?;
    let config = config_for(&scenario);
    let fallback_fee = config.fallback_delivery_fee_minor;
    let sources = sources_for(&scenario, &config).with_delivery_delay(Duration::from_millis(200));

    let plan = Planner::new(sources, config)
        .plan_detailed(&scenario.request)
        .await?;

    assert!(
        plan.warnings
            .iter()
            .any(|w| matches!(w, PlanWarning::PartialData { source: "delivery" })),
        "missing delivery degradation warning: {:?}",
        plan.warnings,
    );
    // Both vendors now quote the same fallback fee, so the line sum plus one
    // fallback fee is the whole total.
    let line_sum: i64 = plan.lines.iter().map(|l| l.total_minor()).sum();
    assert_eq!(plan.total_cost.to_minor_units(), line_sum + fallback_fee);

    Ok(())
}

#[tokio::test]
async fn cancellation_during_the_fetch_aborts_cleanly() -> TestResult {
    let scenario = Scenario::from_set("two_vendor_split")?;
    let config = config_for(&scenario);
    let sources = sources_for(&scenario, &config).with_offer_delay(Duration::from_millis(200));
    let planner = Planner::new(sources, config);

    let (tx, rx) = watch::channel(false);
    let cancel = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = tx.send(true);
        tx
    });

    let err = planner.plan_with_cancel(&scenario.request, rx).await;

    assert!(
        matches!(err, Err(PlanError::Cancelled)),
        "expected cancellation, got {err:?}",
    );

    drop(cancel.await?);

    Ok(())
}

#[tokio::test]
async fn the_explanation_carries_degradation_warnings() -> TestResult {
    let scenario = Scenario::from_set("two_vendor_split")?;
    let config = config_for(&scenario);
    let sources = sources_for(&scenario, &config).with_profile_unavailable();

    let response = Planner::new(sources, config).plan(&scenario.request).await?;

    assert!(
        response.explanation.contains("preferences"),
        "explanation should mention the degraded source: {}",
        response.explanation,
    );

    Ok(())
}

mod common;

use rand::seq::SliceRandom;

use buysmart_pipeline::config::{ConstraintPolicy, RankingConfig};
use buysmart_pipeline::intent::parse_intent;
use buysmart_pipeline::offer::NormalizedOffer;
use buysmart_pipeline::rank::scoring::check_constraints;
use buysmart_pipeline::rank::{BrandTrustTable, RankingEngine};

fn engine(policy: ConstraintPolicy) -> RankingEngine {
    RankingEngine::new(
        RankingConfig {
            constraint_policy: policy,
            ..RankingConfig::default()
        },
        BrandTrustTable::default(),
    )
}

fn ids(engine: &RankingEngine, query: &str, offers: Vec<NormalizedOffer>) -> Vec<String> {
    let intent = parse_intent(query).unwrap();
    engine
        .baseline(&intent, offers)
        .ranked
        .iter()
        .map(|s| s.offer.id.clone())
        .collect()
}

#[test]
fn permuted_input_gives_identical_order() {
    let mut rng = rand::rng();
    for policy in [ConstraintPolicy::Strict, ConstraintPolicy::Lenient] {
        let e = engine(policy);
        for query in ["laptop under $900", "laptop with at least 16GB RAM, prefer lenovo"] {
            let reference = ids(&e, query, common::offer_pool());
            assert!(!reference.is_empty());
            for _ in 0..25 {
                let mut pool = common::offer_pool();
                pool.shuffle(&mut rng);
                assert_eq!(ids(&e, query, pool), reference, "{query} / {policy:?}");
            }
        }
    }
}

#[test]
fn no_violator_survives_filtering() {
    let mut rng = rand::rng();
    let queries = [
        "laptop under $700",
        "laptop between $600 and $800 with at least 16GB RAM",
        "laptop with at least 16GB RAM",
    ];
    for query in queries {
        let intent = parse_intent(query).unwrap();
        for policy in [ConstraintPolicy::Strict, ConstraintPolicy::Lenient] {
            for _ in 0..10 {
                let mut pool = common::offer_pool();
                pool.shuffle(&mut rng);
                pool.truncate(12);
                let b = engine(policy).baseline(&intent, pool);
                for s in &b.ranked {
                    let check = check_constraints(&intent, &s.offer);
                    assert!(
                        check.violated.is_empty(),
                        "{query}: {} violates {:?}",
                        s.offer.id,
                        check.violated
                    );
                    if policy == ConstraintPolicy::Strict {
                        assert!(check.unknown.is_empty());
                    } else {
                        assert_eq!(s.unverified, check.unknown);
                    }
                }
                assert_eq!(b.ranked.len() + b.excluded.len(), b.considered);
            }
        }
    }
}

#[test]
fn scores_are_bounded_and_sorted() {
    let intent = parse_intent("laptop, prefer more ram").unwrap();
    let b = engine(ConstraintPolicy::Lenient).baseline(&intent, common::offer_pool());
    assert!(b.ranked.windows(2).all(|w| w[0].score >= w[1].score));
    for s in &b.ranked {
        assert!((0.0..=1.0).contains(&s.score));
        assert!(s.sub_scores.values().all(|v| (0.0..=1.0).contains(v)));
    }
}

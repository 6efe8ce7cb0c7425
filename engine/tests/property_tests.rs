use proptest::prelude::*;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use arc_engine::config::Config;
use arc_engine::dag::{DagRunner, Node, RunContext};
use arc_engine::recovery::{parse_json_recovering, ParseStage};
use arc_engine::scoring::{score, Confidence, RiskRating, ScoreInputs, MAX_SCORE, MIN_SCORE};

/// Mantissa and exponent written out, e.g. `4.07e-212`
fn exponent_literal() -> impl Strategy<Value = Value> {
    (1u8..=9, 0u8..100, -300i32..300).prop_map(|(whole, frac, exp)| {
        serde_json::from_str(&format!("{}.{}e{}", whole, frac, exp)).unwrap()
    })
}

fn json_leaf(text: BoxedStrategy<String>) -> impl Strategy<Value = Value> {
    use prop::num::f64::{NEGATIVE, NORMAL, POSITIVE};

    prop_oneof![
        3 => text.prop_map(Value::String),
        1 => any::<i64>().prop_map(Value::from),
        1 => any::<u64>().prop_map(Value::from),
        2 => (POSITIVE | NEGATIVE | NORMAL).prop_map(Value::from),
        2 => exponent_literal(),
        1 => any::<bool>().prop_map(Value::Bool),
        1 => Just(Value::Null),
    ]
}

fn object_from(entries: BTreeMap<String, Value>) -> Value {
    Value::Object(entries.into_iter().collect::<Map<String, Value>>())
}

/// Objects whose members nest arrays and objects up to three levels deep
fn json_object(text: BoxedStrategy<String>) -> impl Strategy<Value = Value> {
    let member_text = text.clone();
    let value = json_leaf(text.clone()).prop_recursive(3, 24, 4, move |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(member_text.clone(), inner, 0..4).prop_map(object_from),
        ]
    });
    prop::collection::btree_map(text, value, 0..6).prop_map(object_from)
}

fn any_text() -> BoxedStrategy<String> {
    any::<String>().boxed()
}

/// Printable text, half of it dense in quotes, backslashes and JSON
/// punctuation. Control characters are dropped by the repair pass and
/// backticks would open a fence.
fn printable_text() -> BoxedStrategy<String> {
    prop_oneof!["[^\\p{C}`]{0,12}", "[a-z \"\\\\'{}\\[\\],:/]{0,8}"].boxed()
}

fn confidence() -> impl Strategy<Value = Option<Confidence>> {
    prop_oneof![
        Just(None),
        Just(Some(Confidence::High)),
        Just(Some(Confidence::Medium)),
        Just(Some(Confidence::Low)),
        (0.0..=10.0f64).prop_map(|n| Some(Confidence::Numeric(n))),
    ]
}

fn risk() -> impl Strategy<Value = Option<RiskRating>> {
    prop_oneof![
        Just(None),
        Just(Some(RiskRating::Low)),
        Just(Some(RiskRating::Medium)),
        Just(Some(RiskRating::High)),
        Just(Some(RiskRating::VeryHigh)),
    ]
}

prop_compose! {
    fn score_inputs()(
        confidence in confidence(),
        bull_probability in prop::option::of(0.0..=1.0f64),
        bear_probability in prop::option::of(0.0..=1.0f64),
        price in prop::option::of(1.0..500.0f64),
        bear_value in prop::option::of(0.0..500.0f64),
        base_value in prop::option::of(0.0..800.0f64),
        bull_value in prop::option::of(0.0..1500.0f64),
        risk_rating in risk(),
        likely_failures in prop::option::of(0u32..8),
    ) -> ScoreInputs {
        ScoreInputs {
            confidence,
            bull_probability,
            bear_probability,
            price,
            bear_value,
            base_value,
            bull_value,
            risk_rating,
            likely_failures,
        }
    }
}

proptest! {
    #[test]
    fn test_valid_object_parses_directly(object in json_object(any_text())) {
        let text = serde_json::to_string(&object).unwrap();
        let outcome = parse_json_recovering(&text);
        prop_assert!(outcome.success, "{:?}", outcome.error);
        prop_assert_eq!(outcome.stage, Some(ParseStage::Direct));
        prop_assert_eq!(outcome.data, Some(object));
    }

    #[test]
    fn test_fenced_reply_with_prose_recovers_object(object in json_object(printable_text())) {
        let reply = format!(
            "Sure, here is the analysis.\n```json\n{}\n```\nLet me know if you need more.",
            serde_json::to_string_pretty(&object).unwrap()
        );
        let outcome = parse_json_recovering(&reply);
        prop_assert!(outcome.success, "{:?}", outcome.error);
        prop_assert_eq!(outcome.data, Some(object));
    }

    #[test]
    fn test_trailing_commas_are_repaired(object in json_object(printable_text())) {
        let text = serde_json::to_string(&object).unwrap();
        prop_assume!(text.len() > 2);
        let broken = format!("Result: {},}} thanks", &text[..text.len() - 1]);

        let outcome = parse_json_recovering(&broken);
        prop_assert!(outcome.success, "{:?}", outcome.error);
        prop_assert_eq!(outcome.stage, Some(ParseStage::Repaired));
        prop_assert_eq!(outcome.data, Some(object));
    }

    #[test]
    fn test_text_without_braces_never_succeeds(text in "[^{}]{0,200}") {
        let outcome = parse_json_recovering(&text);
        prop_assert!(!outcome.success);
        prop_assert!(outcome.data.is_none());
        prop_assert!(outcome.error.is_some());
    }

    #[test]
    fn test_arbitrary_text_never_panics(text in ".{0,300}") {
        let outcome = parse_json_recovering(&text);
        prop_assert_eq!(outcome.success, outcome.data.is_some());
        if let Some(data) = outcome.data {
            prop_assert!(data.is_object());
        }
    }

    #[test]
    fn test_score_is_deterministic_and_bounded(inputs in score_inputs()) {
        let first = score(&inputs);
        let second = score(&inputs);
        prop_assert_eq!(&first, &second);
        prop_assert!((MIN_SCORE..=MAX_SCORE).contains(&(first.score as i32)));
        prop_assert_eq!(first.recommendation(), second.recommendation());
    }

    #[test]
    fn test_more_bull_probability_never_lowers_score(
        inputs in score_inputs(),
        bull in 0.0..=1.0f64,
        bump in 0.0..=1.0f64,
        bear in 0.0..=1.0f64,
    ) {
        let lower = ScoreInputs {
            bull_probability: Some(bull),
            bear_probability: Some(bear),
            ..inputs.clone()
        };
        let higher = ScoreInputs {
            bull_probability: Some((bull + bump).min(1.0)),
            ..lower.clone()
        };
        prop_assert!(score(&higher).score >= score(&lower).score);
    }

    #[test]
    fn test_dag_runs_nodes_after_their_dependencies(
        edges in prop::collection::vec((0usize..8, 0usize..8), 0..20),
    ) {
        // Edges always point from a lower to a higher index, so the graph is acyclic
        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); 8];
        for (a, b) in edges {
            if a < b && !deps[b].contains(&a) {
                deps[b].push(a);
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let nodes: Vec<Node> = deps
            .iter()
            .enumerate()
            .map(|(i, node_deps)| {
                let log = Arc::clone(&log);
                Node::new(format!("n{}", i), move |_ctx: Arc<RunContext>| {
                    let log = Arc::clone(&log);
                    async move {
                        log.lock().unwrap().push(i);
                        Ok(())
                    }
                })
                .depends_on(node_deps.iter().map(|d| format!("n{}", d)))
            })
            .collect();

        let runner = DagRunner::new(nodes).unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(runner.run(Arc::new(RunContext::new())));
        prop_assert!(result.is_success());

        let order = log.lock().unwrap().clone();
        prop_assert_eq!(order.len(), 8);
        for (node, node_deps) in deps.iter().enumerate() {
            let at = order.iter().position(|n| *n == node).unwrap();
            for dep in node_deps {
                let dep_at = order.iter().position(|n| n == dep).unwrap();
                prop_assert!(dep_at < at, "n{} ran before its dependency n{}", node, dep);
            }
        }
    }

    #[test]
    fn test_config_parsing_round_trip(
        log_level in "error|warn|info|debug|trace",
        default_provider in "ollama|openai",
        batch_size in 1usize..50,
        max_artifacts in 1usize..500,
        lane_timeout_secs in 1u64..3600,
        weekly_top_n in 1usize..20,
        ceiling_cents in 0u32..10_000,
    ) {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("data");
        let toml = format!(
            r#"
[core]
data_dir = "{}"
log_level = "{}"

[llm]
default_provider = "{}"

[pipeline]
batch_size = {}
max_artifacts = {}
lane_timeout_secs = {}
weekly_top_n = {}
watchlist = ["ACME", "BRK.B"]

[budget]
daily_ceiling_usd = {:.2}
"#,
            data_dir.display().to_string().replace('\\', "/"),
            log_level,
            default_provider,
            batch_size,
            max_artifacts,
            lane_timeout_secs,
            weekly_top_n,
            ceiling_cents as f64 / 100.0,
        );

        let parsed = Config::from_toml_str(&toml).unwrap();
        prop_assert!(data_dir.exists());

        let reserialized = toml::to_string_pretty(&parsed).unwrap();
        let reparsed = Config::from_toml_str(&reserialized).unwrap();

        prop_assert_eq!(&reparsed.core.log_level, &log_level);
        prop_assert_eq!(&reparsed.llm.default_provider, &default_provider);
        prop_assert_eq!(reparsed.pipeline.batch_size, batch_size);
        prop_assert_eq!(reparsed.pipeline.max_artifacts, max_artifacts);
        prop_assert_eq!(reparsed.pipeline.lane_timeout_secs, lane_timeout_secs);
        prop_assert_eq!(reparsed.pipeline.weekly_top_n, weekly_top_n);
        prop_assert_eq!(&reparsed.pipeline.watchlist, &parsed.pipeline.watchlist);
        prop_assert_eq!(reparsed.core.data_dir, parsed.core.data_dir);
    }
}
